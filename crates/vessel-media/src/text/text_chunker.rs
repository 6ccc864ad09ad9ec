//! Fixed-duration segmenter for text streams.
//!
//! Text has no key frames, so segments cut on a wall-clock grid: segment `n`
//! covers `[n*d, (n+1)*d)`.  A cue event moves the next boundary to the ad
//! cue so text segments line up with the audio/video representations.

use std::sync::{Arc, Mutex};

use vessel_core::error::Result;
use vessel_core::handler::{MediaHandler, OutputSlot, SegmentInfo, StreamData};

const NAME: &str = "text_chunker";

struct TextChunkState {
    segment_start_ms: i64,
    /// End of the current segment; normally start + duration, pulled earlier
    /// by a cue event.
    segment_end_ms: i64,
    number: u64,
    max_end_ms: i64,
    saw_cue_payload: bool,
}

pub struct TextChunker {
    segment_duration_ms: i64,
    state: Mutex<TextChunkState>,
    next: OutputSlot,
}

impl TextChunker {
    pub fn new(segment_duration_in_seconds: f64) -> Self {
        let segment_duration_ms = (segment_duration_in_seconds * 1000.0).max(1.0) as i64;
        Self {
            segment_duration_ms,
            state: Mutex::new(TextChunkState {
                segment_start_ms: 0,
                segment_end_ms: segment_duration_ms,
                number: 0,
                max_end_ms: 0,
                saw_cue_payload: false,
            }),
            next: OutputSlot::new(),
        }
    }

    fn close_segment(&self, state: &mut TextChunkState) -> Result<()> {
        state.number += 1;
        let info = SegmentInfo {
            start: state.segment_start_ms,
            duration: state.segment_end_ms - state.segment_start_ms,
            number: state.number,
            is_subsegment: false,
            is_encrypted: false,
        };
        state.segment_start_ms = state.segment_end_ms;
        state.segment_end_ms = state.segment_start_ms + self.segment_duration_ms;
        self.next.send(NAME, StreamData::SegmentInfo(info))
    }
}

impl MediaHandler for TextChunker {
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
            StreamData::TextSample(sample) => {
                {
                    let mut state = self.state.lock().unwrap();
                    while sample.start_ms >= state.segment_end_ms {
                        self.close_segment(&mut state)?;
                    }
                    state.max_end_ms = state.max_end_ms.max(sample.end_ms);
                    state.saw_cue_payload = true;
                }
                self.next.send(NAME, StreamData::TextSample(sample))
            }
            StreamData::CueEvent(cue) => {
                {
                    let mut state = self.state.lock().unwrap();
                    let cue_ms = (cue.time_in_seconds * 1000.0) as i64;
                    if cue_ms > state.segment_start_ms {
                        state.segment_end_ms = state.segment_end_ms.min(cue_ms);
                    }
                }
                self.next.send(NAME, StreamData::CueEvent(cue))
            }
            other => self.next.send(NAME, other),
        }
    }

    fn flush(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.saw_cue_payload {
                // Cues may extend past the last boundary; emit segments until
                // the timeline is covered.
                while state.max_end_ms > state.segment_start_ms {
                    state.segment_end_ms = (state.segment_start_ms + self.segment_duration_ms)
                        .min(state.max_end_ms);
                    self.close_segment(&mut state)?;
                }
            }
        }
        self.next.flush(NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_core::handler::{CueEvent, TextSample};

    #[derive(Default)]
    struct Collector {
        segments: Mutex<Vec<SegmentInfo>>,
    }
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
            if let StreamData::SegmentInfo(info) = data {
                self.segments.lock().unwrap().push(info);
            }
            Ok(())
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn cue(start_ms: i64, end_ms: i64) -> StreamData {
        StreamData::TextSample(Arc::new(TextSample {
            start_ms,
            end_ms,
            ..Default::default()
        }))
    }

    #[test]
    fn segments_cut_on_the_duration_grid() {
        let chunker = TextChunker::new(2.0);
        let sink = Arc::new(Collector::default());
        chunker.connect(sink.clone()).unwrap();

        chunker.handle(cue(0, 1500)).unwrap();
        chunker.handle(cue(2500, 3000)).unwrap();
        chunker.flush().unwrap();

        let segments = sink.segments.lock().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!((segments[0].start, segments[0].duration), (0, 2000));
        assert_eq!(segments[0].number, 1);
        assert_eq!(segments[1].start, 2000);
    }

    #[test]
    fn a_cue_event_pulls_the_boundary_earlier() {
        let chunker = TextChunker::new(10.0);
        let sink = Arc::new(Collector::default());
        chunker.connect(sink.clone()).unwrap();

        chunker.handle(cue(0, 1000)).unwrap();
        chunker
            .handle(StreamData::CueEvent(CueEvent {
                time_in_seconds: 1.5,
            }))
            .unwrap();
        chunker.handle(cue(2000, 3000)).unwrap();
        chunker.flush().unwrap();

        let segments = sink.segments.lock().unwrap();
        assert_eq!(segments[0].duration, 1500);
    }

    #[test]
    fn no_cues_means_no_segments() {
        let chunker = TextChunker::new(2.0);
        let sink = Arc::new(Collector::default());
        chunker.connect(sink.clone()).unwrap();
        chunker.flush().unwrap();
        assert!(sink.segments.lock().unwrap().is_empty());
    }
}
