//! Per-input consumer of the shared [`SyncPointQueue`].
//!
//! One `CueAlignmentHandler` exists per input; it registers a single queue
//! consumer no matter how many of that input's streams are selected.  Each
//! selected stream chains through its own [`CueAlignmentPort`], which shares
//! the parent's consumer (hints merge into the consumer's furthest position)
//! but keeps its own cue cursor, so every chain still observes the full cue
//! sequence.  A port emits a [`CueEvent`](StreamData::CueEvent) ahead of the
//! first payload past each promoted cue so the downstream chunker can force a
//! segment boundary there.
//!
//! The consumer unregisters from the queue once every port has flushed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vessel_core::error::Result;
use vessel_core::handler::{CueEvent, MediaHandler, OutputSlot, StreamData};

use crate::sync_point_queue::{ConsumerId, SyncPointQueue};

const NAME: &str = "cue_aligner";

/// The per-input aligner: owns the queue consumer shared by its ports.
pub struct CueAlignmentHandler {
    sync_points: Arc<SyncPointQueue>,
    consumer: Mutex<Option<ConsumerId>>,
    active_ports: AtomicUsize,
}

impl CueAlignmentHandler {
    pub fn new(sync_points: Arc<SyncPointQueue>) -> Arc<Self> {
        Arc::new(Self {
            sync_points,
            consumer: Mutex::new(None),
            active_ports: AtomicUsize::new(0),
        })
    }

    /// Open one chain-facing port.  Call once per selected stream of the
    /// owning input.
    pub fn create_port(self: Arc<Self>) -> Arc<CueAlignmentPort> {
        self.active_ports.fetch_add(1, Ordering::SeqCst);
        Arc::new(CueAlignmentPort {
            parent: self,
            state: Mutex::new(PortState::default()),
            next: OutputSlot::new(),
        })
    }

    /// Number of ports that have not flushed yet.
    pub fn ports(&self) -> usize {
        self.active_ports.load(Ordering::SeqCst)
    }

    fn ensure_registered(&self) -> ConsumerId {
        let mut consumer = self.consumer.lock().unwrap();
        *consumer.get_or_insert_with(|| self.sync_points.register())
    }

    fn consumer(&self) -> Option<ConsumerId> {
        *self.consumer.lock().unwrap()
    }

    /// Called when a port flushes; the consumer leaves the rendezvous once
    /// the last port is done.
    fn port_finished(&self) {
        if self.active_ports.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(id) = self.consumer() {
                self.sync_points.finish(id);
            }
        }
    }
}

#[derive(Default)]
struct PortState {
    cursor: usize,
    time_scale: u32,
    finished: bool,
}

/// One stream's view of its input's [`CueAlignmentHandler`].
pub struct CueAlignmentPort {
    parent: Arc<CueAlignmentHandler>,
    state: Mutex<PortState>,
    next: OutputSlot,
}

impl CueAlignmentPort {
    /// Position of a payload's trailing edge in seconds.
    fn hint_for(&self, data: &StreamData, time_scale: u32) -> Option<f64> {
        match data {
            StreamData::MediaSample(sample) if time_scale > 0 => {
                Some((sample.pts + sample.duration) as f64 / time_scale as f64)
            }
            StreamData::TextSample(sample) => Some(sample.end_ms as f64 / 1000.0),
            _ => None,
        }
    }
}

impl MediaHandler for CueAlignmentPort {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self, downstream: Arc<dyn MediaHandler>) -> Result<()> {
        self.next.bind(NAME, downstream)
    }

    fn initialize(&self) -> Result<()> {
        self.parent.ensure_registered();
        self.next.initialize(NAME)
    }

    fn handle(&self, data: StreamData) -> Result<()> {
        let (mut cursor, time_scale) = {
            let mut state = self.state.lock().unwrap();
            if let StreamData::StreamInfo(info) = &data {
                state.time_scale = info.time_scale;
            }
            (state.cursor, state.time_scale)
        };
        let Some(consumer) = self.parent.consumer() else {
            // Not registered; no cue source for this chain.
            return self.next.send(NAME, data);
        };

        if let Some(hint) = self.hint_for(&data, time_scale) {
            // The queue blocks here until every other input reaches the cue.
            while let Some(cue) = self
                .parent
                .sync_points
                .next_cue(consumer, &mut cursor, hint)?
            {
                tracing::debug!(cue, hint, "Emitting cue boundary");
                self.next.send(
                    NAME,
                    StreamData::CueEvent(CueEvent {
                        time_in_seconds: cue,
                    }),
                )?;
            }
            self.state.lock().unwrap().cursor = cursor;
        }

        self.next.send(NAME, data)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.finished {
            state.finished = true;
            drop(state);
            self.parent.port_finished();
        } else {
            drop(state);
        }
        self.next.flush(NAME)
    }
}
