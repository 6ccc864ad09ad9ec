//! Gap filling for text streams.
//!
//! Downstream chunking assumes a contiguous cue timeline.  The padder emits
//! empty cues over the gaps between real cues (and, when a stream duration is
//! known up front, out to that duration at flush).  The orchestrator
//! constructs it with zero duration because stream length is unknown before
//! parsing.

use std::sync::{Arc, Mutex};

use vessel_core::error::Result;
use vessel_core::handler::{MediaHandler, OutputSlot, StreamData, TextSample};

const NAME: &str = "text_padder";

#[derive(Default)]
struct PadState {
    max_end_ms: i64,
}

pub struct TextPadder {
    duration_ms: i64,
    state: Mutex<PadState>,
    next: OutputSlot,
}

impl TextPadder {
    pub fn new(duration_ms: i64) -> Self {
        Self {
            duration_ms,
            state: Mutex::new(PadState::default()),
            next: OutputSlot::new(),
        }
    }

    fn padding(start_ms: i64, end_ms: i64) -> StreamData {
        StreamData::TextSample(Arc::new(TextSample {
            id: String::new(),
            start_ms,
            end_ms,
            settings: String::new(),
            payload: String::new(),
        }))
    }
}

impl MediaHandler for TextPadder {
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
        if let StreamData::TextSample(sample) = &data {
            let gap = {
                let mut state = self.state.lock().unwrap();
                let gap = if sample.start_ms > state.max_end_ms {
                    Some((state.max_end_ms, sample.start_ms))
                } else {
                    None
                };
                state.max_end_ms = state.max_end_ms.max(sample.end_ms);
                gap
            };
            if let Some((start, end)) = gap {
                self.next.send(NAME, Self::padding(start, end))?;
            }
        }
        self.next.send(NAME, data)
    }

    fn flush(&self) -> Result<()> {
        let tail = {
            let state = self.state.lock().unwrap();
            if self.duration_ms > state.max_end_ms {
                Some((state.max_end_ms, self.duration_ms))
            } else {
                None
            }
        };
        if let Some((start, end)) = tail {
            self.next.send(NAME, Self::padding(start, end))?;
        }
        self.next.flush(NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector(Mutex<Vec<TextSample>>);
    impl MediaHandler for Collector {
        fn name(&self) -> &'static str {
            "collector"
        }
        fn connect(&self, _d: Arc<dyn MediaHandler>) -> Result<()> {
            unreachable!()
        }
        fn initialize(&self) -> Result<()> {
            Ok(())
        }
        fn handle(&self, data: StreamData) -> Result<()> {
            if let StreamData::TextSample(s) = data {
                self.0.lock().unwrap().push((*s).clone());
            }
            Ok(())
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn cue(start_ms: i64, end_ms: i64, payload: &str) -> StreamData {
        StreamData::TextSample(Arc::new(TextSample {
            start_ms,
            end_ms,
            payload: payload.into(),
            ..Default::default()
        }))
    }

    #[test]
    fn gaps_between_cues_are_filled_with_empty_cues() {
        let padder = TextPadder::new(0);
        let sink = Arc::new(Collector::default());
        padder.connect(sink.clone()).unwrap();

        padder.handle(cue(0, 1000, "a")).unwrap();
        padder.handle(cue(3000, 4000, "b")).unwrap();
        padder.flush().unwrap();

        let cues = sink.0.lock().unwrap();
        assert_eq!(cues.len(), 3);
        assert_eq!((cues[1].start_ms, cues[1].end_ms), (1000, 3000));
        assert!(cues[1].payload.is_empty());
    }

    #[test]
    fn overlapping_cues_are_not_padded() {
        let padder = TextPadder::new(0);
        let sink = Arc::new(Collector::default());
        padder.connect(sink.clone()).unwrap();

        padder.handle(cue(0, 2000, "a")).unwrap();
        padder.handle(cue(1000, 3000, "b")).unwrap();
        padder.flush().unwrap();

        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn known_duration_pads_the_tail_at_flush() {
        let padder = TextPadder::new(5000);
        let sink = Arc::new(Collector::default());
        padder.connect(sink.clone()).unwrap();

        padder.handle(cue(0, 1000, "a")).unwrap();
        padder.flush().unwrap();

        let cues = sink.0.lock().unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!((cues[1].start_ms, cues[1].end_ms), (1000, 5000));
    }
}
