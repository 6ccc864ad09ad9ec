//! WebVTT → ISO-BMFF sample conversion.
//!
//! Turns text cues into the boxed samples the `wvtt` track format expects:
//! a `vttc` box (with `iden`/`sttg`/`payl` children) per cue, and a `vtte`
//! box for empty padding spans.  Downstream is a regular MP4 muxer.

use std::sync::Arc;

use vessel_core::error::Result;
use vessel_core::handler::{
    MediaHandler, MediaSample, OutputSlot, StreamData, TextSample,
};

const NAME: &str = "webvtt_to_mp4";

fn write_box(fourcc: &[u8; 4], content: &[u8], out: &mut Vec<u8>) {
    let size = (8 + content.len()) as u32;
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(content);
}

/// Box the cue for carriage in an MP4 sample.
fn cue_to_sample_payload(cue: &TextSample) -> Vec<u8> {
    let mut out = Vec::new();
    if cue.payload.is_empty() {
        write_box(b"vtte", &[], &mut out);
        return out;
    }

    let mut children = Vec::new();
    if !cue.id.is_empty() {
        write_box(b"iden", cue.id.as_bytes(), &mut children);
    }
    if !cue.settings.is_empty() {
        write_box(b"sttg", cue.settings.as_bytes(), &mut children);
    }
    write_box(b"payl", cue.payload.as_bytes(), &mut children);
    write_box(b"vttc", &children, &mut out);
    out
}

#[derive(Default)]
pub struct WebVttToMp4Handler {
    next: OutputSlot,
}

impl WebVttToMp4Handler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaHandler for WebVttToMp4Handler {
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
            StreamData::TextSample(cue) => {
                let sample = MediaSample {
                    pts: cue.start_ms,
                    dts: cue.start_ms,
                    duration: cue.end_ms - cue.start_ms,
                    is_key_frame: true,
                    data: cue_to_sample_payload(&cue),
                };
                self.next
                    .send(NAME, StreamData::MediaSample(Arc::new(sample)))
            }
            other => self.next.send(NAME, other),
        }
    }

    fn flush(&self) -> Result<()> {
        self.next.flush(NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collector(Mutex<Vec<MediaSample>>);
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
            if let StreamData::MediaSample(s) = data {
                self.0.lock().unwrap().push((*s).clone());
            }
            Ok(())
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn cues_become_vttc_boxed_samples() {
        let handler = WebVttToMp4Handler::new();
        let sink = Arc::new(Collector::default());
        handler.connect(sink.clone()).unwrap();

        handler
            .handle(StreamData::TextSample(Arc::new(TextSample {
                id: "c1".into(),
                start_ms: 1000,
                end_ms: 2500,
                settings: "align:middle".into(),
                payload: "Hello".into(),
            })))
            .unwrap();

        let samples = sink.0.lock().unwrap();
        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert_eq!(sample.pts, 1000);
        assert_eq!(sample.duration, 1500);
        assert_eq!(&sample.data[4..8], b"vttc");
        let body = String::from_utf8_lossy(&sample.data);
        assert!(body.contains("iden"));
        assert!(body.contains("sttg"));
        assert!(body.contains("payl"));
        assert!(body.contains("Hello"));
    }

    #[test]
    fn empty_cues_become_vtte_boxes() {
        let handler = WebVttToMp4Handler::new();
        let sink = Arc::new(Collector::default());
        handler.connect(sink.clone()).unwrap();

        handler
            .handle(StreamData::TextSample(Arc::new(TextSample {
                start_ms: 0,
                end_ms: 1000,
                ..Default::default()
            })))
            .unwrap();

        let samples = sink.0.lock().unwrap();
        assert_eq!(&samples[0].data[4..8], b"vtte");
        assert_eq!(samples[0].data.len(), 8);
    }
}
