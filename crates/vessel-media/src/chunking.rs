//! Segment boundary detection for audio/video streams.
//!
//! Watches sample timestamps and emits a [`SegmentInfo`] for every finished
//! segment (and subsegment, when configured).  SAP alignment defers the cut
//! to the next key frame.  A [`CueEvent`](StreamData::CueEvent) from the cue
//! aligner forces a cut regardless of the configured duration so every
//! representation agrees on the ad boundary.

use std::sync::{Arc, Mutex};

use vessel_core::descriptor::ChunkingParams;
use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{MediaHandler, OutputSlot, SegmentInfo, StreamData};

const NAME: &str = "chunker";

#[derive(Default)]
struct ChunkState {
    time_scale: u32,
    /// Segment duration in time-scale units; zero until stream info arrives.
    segment_duration: i64,
    subsegment_duration: i64,
    segment_start: Option<i64>,
    subsegment_start: i64,
    last_sample_end: i64,
    segment_number: u64,
    /// Set by a cue event; the next sample closes the current segment.
    cue_pending: bool,
}

pub struct ChunkingHandler {
    params: ChunkingParams,
    state: Mutex<ChunkState>,
    next: OutputSlot,
}

impl ChunkingHandler {
    pub fn new(params: &ChunkingParams) -> Self {
        Self {
            params: params.clone(),
            state: Mutex::new(ChunkState::default()),
            next: OutputSlot::new(),
        }
    }

    fn close_segment(&self, state: &mut ChunkState, end: i64) -> Result<()> {
        let Some(start) = state.segment_start.take() else {
            return Ok(());
        };
        state.segment_number += 1;
        let info = SegmentInfo {
            start,
            duration: (end - start).max(0),
            number: state.segment_number,
            is_subsegment: false,
            is_encrypted: false,
        };
        state.subsegment_start = end;
        self.next.send(NAME, StreamData::SegmentInfo(info))
    }

    fn close_subsegment(&self, state: &mut ChunkState, end: i64) -> Result<()> {
        let info = SegmentInfo {
            start: state.subsegment_start,
            duration: (end - state.subsegment_start).max(0),
            number: state.segment_number + 1,
            is_subsegment: true,
            is_encrypted: false,
        };
        state.subsegment_start = end;
        self.next.send(NAME, StreamData::SegmentInfo(info))
    }
}

impl MediaHandler for ChunkingHandler {
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
                {
                    let mut state = self.state.lock().unwrap();
                    state.time_scale = info.time_scale;
                    state.segment_duration = (self.params.segment_duration_in_seconds
                        * info.time_scale as f64) as i64;
                    state.subsegment_duration = (self.params.subsegment_duration_in_seconds
                        * info.time_scale as f64) as i64;
                }
                self.next.send(NAME, StreamData::StreamInfo(info))
            }
            StreamData::MediaSample(sample) => {
                let mut state = self.state.lock().unwrap();
                if state.time_scale == 0 {
                    return Err(PackagerError::Internal(
                        "Chunker received a sample before stream info".into(),
                    ));
                }

                match state.segment_start {
                    None => {
                        state.segment_start = Some(sample.pts);
                        state.subsegment_start = sample.pts;
                    }
                    Some(start) => {
                        let over_duration = state.segment_duration > 0
                            && sample.pts - start >= state.segment_duration;
                        let sap_ok = sample.is_key_frame || !self.params.segment_sap_aligned;
                        let cue_cut = state.cue_pending && sap_ok;

                        if (over_duration && sap_ok) || cue_cut {
                            state.cue_pending = false;
                            self.close_segment(&mut state, sample.pts)?;
                            state.segment_start = Some(sample.pts);
                        } else if state.subsegment_duration > 0
                            && sample.pts - state.subsegment_start >= state.subsegment_duration
                            && (sample.is_key_frame || !self.params.subsegment_sap_aligned)
                        {
                            self.close_subsegment(&mut state, sample.pts)?;
                        }
                    }
                }

                state.last_sample_end = sample.pts + sample.duration;
                drop(state);
                self.next.send(NAME, StreamData::MediaSample(sample))
            }
            StreamData::CueEvent(cue) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.cue_pending = true;
                }
                self.next.send(NAME, StreamData::CueEvent(cue))
            }
            other => self.next.send(NAME, other),
        }
    }

    fn flush(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let end = state.last_sample_end;
            self.close_segment(&mut state, end)?;
        }
        self.next.flush(NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_core::handler::{CueEvent, MediaSample, StreamInfo, StreamType};

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

    fn setup(params: ChunkingParams) -> (Arc<ChunkingHandler>, Arc<Collector>) {
        let chunker = Arc::new(ChunkingHandler::new(&params));
        let sink = Arc::new(Collector::default());
        chunker
            .connect(sink.clone() as Arc<dyn MediaHandler>)
            .unwrap();
        (chunker, sink)
    }

    fn push_sample(h: &ChunkingHandler, pts: i64, duration: i64, key: bool) {
        h.handle(StreamData::MediaSample(Arc::new(MediaSample {
            pts,
            dts: pts,
            duration,
            is_key_frame: key,
            data: vec![],
        })))
        .unwrap();
    }

    #[test]
    fn segments_cut_at_keyframes_past_the_duration() {
        let (chunker, sink) = setup(ChunkingParams {
            segment_duration_in_seconds: 1.0,
            ..Default::default()
        });
        chunker
            .handle(StreamData::StreamInfo(Arc::new(StreamInfo::new(
                StreamType::Video,
                1000,
                "avc1",
            ))))
            .unwrap();

        push_sample(&chunker, 0, 500, true);
        // Past the duration but not a key frame: the cut waits.
        push_sample(&chunker, 500, 500, false);
        push_sample(&chunker, 1000, 500, false);
        assert!(sink.segments.lock().unwrap().is_empty());

        push_sample(&chunker, 1500, 500, true);
        chunker.flush().unwrap();

        let segments = sink.segments.lock().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[0].duration, 1500);
        assert_eq!(segments[0].number, 1);
        assert_eq!(segments[1].start, 1500);
        assert_eq!(segments[1].duration, 500);
    }

    #[test]
    fn cue_event_forces_an_early_cut() {
        let (chunker, sink) = setup(ChunkingParams {
            segment_duration_in_seconds: 100.0,
            ..Default::default()
        });
        chunker
            .handle(StreamData::StreamInfo(Arc::new(StreamInfo::new(
                StreamType::Video,
                1000,
                "avc1",
            ))))
            .unwrap();

        push_sample(&chunker, 0, 500, true);
        chunker
            .handle(StreamData::CueEvent(CueEvent {
                time_in_seconds: 0.5,
            }))
            .unwrap();
        push_sample(&chunker, 500, 500, true);
        chunker.flush().unwrap();

        let segments = sink.segments.lock().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].duration, 500);
    }

    #[test]
    fn subsegments_cut_within_a_segment() {
        let (chunker, sink) = setup(ChunkingParams {
            segment_duration_in_seconds: 10.0,
            subsegment_duration_in_seconds: 1.0,
            ..Default::default()
        });
        chunker
            .handle(StreamData::StreamInfo(Arc::new(StreamInfo::new(
                StreamType::Audio,
                1000,
                "mp4a",
            ))))
            .unwrap();

        for i in 0..4 {
            push_sample(&chunker, i * 500, 500, true);
        }
        chunker.flush().unwrap();

        let segments = sink.segments.lock().unwrap();
        let subsegments: Vec<_> = segments.iter().filter(|s| s.is_subsegment).collect();
        assert_eq!(subsegments.len(), 1);
        assert_eq!(subsegments[0].start, 0);
        assert_eq!(subsegments[0].duration, 1000);
        assert!(segments.last().map(|s| !s.is_subsegment).unwrap());
    }

    #[test]
    fn sample_before_stream_info_is_an_error() {
        let (chunker, _sink) = setup(ChunkingParams::default());
        let err = chunker
            .handle(StreamData::MediaSample(Arc::new(MediaSample {
                pts: 0,
                dts: 0,
                duration: 1,
                is_key_frame: true,
                data: vec![],
            })))
            .expect_err("must fail without stream info");
        assert!(err.to_string().contains("before stream info"));
    }
}
