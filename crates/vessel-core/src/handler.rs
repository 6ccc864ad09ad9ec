//! The media-handler capability trait and the data that flows between
//! handlers.
//!
//! # Architecture
//!
//! A packaging graph is a set of trees.  Each tree is rooted at an
//! [`OriginHandler`] (a demuxer or a text parser) which *pulls* bytes from its
//! input and *pushes* [`StreamData`] through its successors with direct
//! synchronous calls:
//!
//! ```text
//! demuxer[selector] ─► cue_aligner? ─► chunker ─► encryptor? ─► replicator ─► muxer
//!                                                                  │
//!                                                                  └─► trick_play ─► muxer
//! ```
//!
//! Handlers are shared as `Arc<dyn MediaHandler>` because several chains may
//! reference the same node (demuxers per input, replicators per stream).
//! Within one chain all calls happen on the thread of the owning job, so
//! internal state sits behind plain mutexes with no contention in the steady
//! state.
//!
//! The handler set is closed and known at build time; no open inheritance.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::{PackagerError, Result};

// ─── Stream data ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    Audio,
    Video,
    Text,
}

/// Per-track metadata, emitted once before any sample.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub stream_type: StreamType,
    /// Timestamp units per second for this track's samples.
    pub time_scale: u32,
    pub codec: String,
    pub language: String,
    pub width: u32,
    pub height: u32,
    pub trick_play_factor: u32,
    pub is_encrypted: bool,
}

impl StreamInfo {
    pub fn new(stream_type: StreamType, time_scale: u32, codec: &str) -> Self {
        Self {
            stream_type,
            time_scale,
            codec: codec.to_string(),
            language: String::new(),
            width: 0,
            height: 0,
            trick_play_factor: 0,
            is_encrypted: false,
        }
    }
}

/// One demuxed media access unit.  Timestamps are in `StreamInfo::time_scale`
/// units.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaSample {
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub is_key_frame: bool,
    pub data: Vec<u8>,
}

/// One text cue.  Timestamps are in milliseconds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextSample {
    pub id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub settings: String,
    pub payload: String,
}

/// Marks the end of one finished segment (or subsegment).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentInfo {
    /// Segment start in track time-scale units (milliseconds for text).
    pub start: i64,
    pub duration: i64,
    /// 1-based segment number, used for `$Number$` expansion.
    pub number: u64,
    pub is_subsegment: bool,
    pub is_encrypted: bool,
}

/// A promoted ad-cue boundary, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CueEvent {
    pub time_in_seconds: f64,
}

/// The typed payload pushed from a handler to its successors.
#[derive(Clone, Debug)]
pub enum StreamData {
    StreamInfo(Arc<StreamInfo>),
    MediaSample(Arc<MediaSample>),
    TextSample(Arc<TextSample>),
    SegmentInfo(SegmentInfo),
    CueEvent(CueEvent),
}

// ─── Handler traits ─────────────────────────────────────────────────────────

/// A node in the packaging graph.
///
/// Capability set: accept an upstream payload ([`handle`](Self::handle)),
/// emit downstream (by holding successor references), [`flush`](Self::flush),
/// and cooperative cancellation (roots observe the job token; interior
/// handlers stop receiving pushes once their root stops).
pub trait MediaHandler: Send + Sync {
    /// Short stable name for diagnostics and chain errors.
    fn name(&self) -> &'static str;

    /// Bind the next open output slot to `downstream`.
    ///
    /// Single-output handlers reject a second bind; sinks reject any bind.
    fn connect(&self, downstream: Arc<dyn MediaHandler>) -> Result<()>;

    /// Called once after the graph is fully wired, before any data flows.
    /// Implementations must forward initialization to their successors.
    fn initialize(&self) -> Result<()>;

    /// Accept one payload from upstream.
    fn handle(&self, data: StreamData) -> Result<()>;

    /// Upstream is done; drain state and forward the flush.
    fn flush(&self) -> Result<()>;
}

/// A graph root: owns an input and drives its tree to completion.
pub trait OriginHandler: MediaHandler {
    /// Pull from the input and push through the graph until end of stream,
    /// error, or cancellation.  Checked at every payload boundary.
    fn run(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Wire `handlers` in order, skipping `None` entries.
///
/// The optional slots let call sites write chains with optional stages
/// (cue aligner, encryptor) without branching.
pub fn chain(handlers: &[Option<Arc<dyn MediaHandler>>]) -> Result<()> {
    let present: Vec<&Arc<dyn MediaHandler>> = handlers.iter().flatten().collect();
    for pair in present.windows(2) {
        pair[0].connect(Arc::clone(pair[1]))?;
    }
    Ok(())
}

// ─── Output slot helper ─────────────────────────────────────────────────────

/// A bind-once downstream slot shared by the single-output handlers.
#[derive(Default)]
pub struct OutputSlot {
    inner: Mutex<Option<Arc<dyn MediaHandler>>>,
}

impl OutputSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the slot, failing if it is already bound.
    pub fn bind(&self, owner: &'static str, downstream: Arc<dyn MediaHandler>) -> Result<()> {
        let mut slot = self.inner.lock().unwrap();
        if slot.is_some() {
            return Err(PackagerError::Chain(format!(
                "{owner} output is already connected"
            )));
        }
        *slot = Some(downstream);
        Ok(())
    }

    fn get(&self, owner: &'static str) -> Result<Arc<dyn MediaHandler>> {
        self.inner
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PackagerError::Chain(format!("{owner} has no downstream connected")))
    }

    pub fn initialize(&self, owner: &'static str) -> Result<()> {
        self.get(owner)?.initialize()
    }

    pub fn send(&self, owner: &'static str, data: StreamData) -> Result<()> {
        self.get(owner)?.handle(data)
    }

    pub fn flush(&self, owner: &'static str) -> Result<()> {
        self.get(owner)?.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        received: AtomicUsize,
        next: OutputSlot,
    }

    impl MediaHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn connect(&self, downstream: Arc<dyn MediaHandler>) -> Result<()> {
            self.next.bind("recorder", downstream)
        }
        fn initialize(&self) -> Result<()> {
            Ok(())
        }
        fn handle(&self, _data: StreamData) -> Result<()> {
            self.received.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn chain_skips_absent_stages() {
        let a = Arc::new(Recorder::default());
        let c = Arc::new(Recorder::default());
        chain(&[
            Some(a.clone() as Arc<dyn MediaHandler>),
            None,
            Some(c.clone() as Arc<dyn MediaHandler>),
        ])
        .expect("chain should wire around the missing stage");

        a.next
            .send("recorder", StreamData::CueEvent(CueEvent { time_in_seconds: 1.0 }))
            .expect("a must be bound to c");
        assert_eq!(c.received.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn rebinding_a_bound_slot_is_a_chain_error() {
        let a = Arc::new(Recorder::default());
        let b: Arc<dyn MediaHandler> = Arc::new(Recorder::default());
        let c: Arc<dyn MediaHandler> = Arc::new(Recorder::default());

        a.connect(b).expect("first bind");
        let err = a.connect(c).expect_err("second bind must fail");
        assert!(err.to_string().contains("already connected"));
    }

    #[test]
    fn sending_through_an_unbound_slot_is_a_chain_error() {
        let slot = OutputSlot::new();
        let err = slot
            .send("chunker", StreamData::CueEvent(CueEvent { time_in_seconds: 0.0 }))
            .expect_err("unbound slot must fail");
        assert!(err.to_string().contains("no downstream"));
    }
}
