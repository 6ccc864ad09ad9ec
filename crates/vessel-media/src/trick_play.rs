//! Trick-play decimation.
//!
//! Produces a reduced-rate derivative track from a full-rate stream: only key
//! frames survive, and only every `factor`-th of those.  Kept frames have
//! their duration stretched to cover the dropped span so the track timeline
//! stays gap-free.

use std::sync::{Arc, Mutex};

use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{MediaHandler, MediaSample, OutputSlot, StreamData};

const NAME: &str = "trick_play";

#[derive(Default)]
struct TrickPlayState {
    key_frames_seen: u64,
    /// Held back until the next kept key frame fixes its duration.
    pending: Option<MediaSample>,
}

pub struct TrickPlayHandler {
    factor: u32,
    state: Mutex<TrickPlayState>,
    next: OutputSlot,
}

impl std::fmt::Debug for TrickPlayHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrickPlayHandler")
            .field("factor", &self.factor)
            .finish()
    }
}

impl TrickPlayHandler {
    pub fn new(factor: u32) -> Result<Self> {
        if factor == 0 {
            return Err(PackagerError::InvalidArgument(
                "Trick play factor must be positive".into(),
            ));
        }
        Ok(Self {
            factor,
            state: Mutex::new(TrickPlayState::default()),
            next: OutputSlot::new(),
        })
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    fn emit_pending(&self, state: &mut TrickPlayState, end: Option<i64>) -> Result<()> {
        let Some(mut sample) = state.pending.take() else {
            return Ok(());
        };
        if let Some(end) = end {
            sample.duration = (end - sample.pts).max(sample.duration);
        }
        self.next.send(NAME, StreamData::MediaSample(Arc::new(sample)))
    }
}

impl MediaHandler for TrickPlayHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self, downstream: Arc<dyn MediaHandler>) -> Result<()> {
        self.next.bind(NAME, downstream)
    }

    fn initialize(&self) -> Result<()> {
        self.next.initialize(NAME)
    }

    fn handle(&self, data: StreamData) -> Result<()> {
        match data {
            StreamData::StreamInfo(info) => {
                let mut stamped = (*info).clone();
                stamped.trick_play_factor = self.factor;
                self.next
                    .send(NAME, StreamData::StreamInfo(Arc::new(stamped)))
            }
            StreamData::MediaSample(sample) => {
                if !sample.is_key_frame {
                    return Ok(());
                }
                let mut state = self.state.lock().unwrap();
                let keep = state.key_frames_seen % self.factor as u64 == 0;
                state.key_frames_seen += 1;
                if keep {
                    self.emit_pending(&mut state, Some(sample.pts))?;
                    state.pending = Some((*sample).clone());
                }
                Ok(())
            }
            other => self.next.send(NAME, other),
        }
    }

    fn flush(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            self.emit_pending(&mut state, None)?;
        }
        self.next.flush(NAME)
    }
}
