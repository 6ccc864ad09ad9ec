//! Segmented WebVTT file output.
//!
//! The sink of the HLS text pipeline: buffers cues, writes one `.vtt` file
//! per finished segment from the segment template, and keeps the muxer
//! listener informed so the HLS notifier can build the subtitle playlist.

use std::sync::{Arc, Mutex};

use vessel_core::container::MediaContainer;
use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{MediaHandler, StreamData, StreamInfo, TextSample};
use vessel_core::io;
use vessel_core::media_info::MediaInfo;

use crate::muxer::{MuxerListener, MuxerOptions};
use crate::template;

use super::format_timestamp;

const NAME: &str = "webvtt_text_output";

#[derive(Default)]
struct OutputState {
    stream_info: Option<StreamInfo>,
    /// Cues not yet fully written out.
    pending: Vec<TextSample>,
    segments_written: u64,
    last_segment_end_ms: i64,
}

pub struct WebVttTextOutputHandler {
    options: MuxerOptions,
    listener: Box<dyn MuxerListener>,
    state: Mutex<OutputState>,
}

impl WebVttTextOutputHandler {
    pub fn new(options: MuxerOptions, listener: Box<dyn MuxerListener>) -> Self {
        Self {
            options,
            listener,
            state: Mutex::new(OutputState::default()),
        }
    }

    fn render_segment(cues: &[&TextSample]) -> String {
        let mut out = String::from("WEBVTT\n\n");
        for cue in cues {
            if cue.payload.is_empty() {
                continue;
            }
            if !cue.id.is_empty() {
                out.push_str(&cue.id);
                out.push('\n');
            }
            out.push_str(&format_timestamp(cue.start_ms));
            out.push_str(" --> ");
            out.push_str(&format_timestamp(cue.end_ms));
            if !cue.settings.is_empty() {
                out.push(' ');
                out.push_str(&cue.settings);
            }
            out.push('\n');
            out.push_str(&cue.payload);
            out.push_str("\n\n");
        }
        out
    }

    fn write_segment(&self, start_ms: i64, duration_ms: i64, number: u64) -> Result<()> {
        let end_ms = start_ms + duration_ms;
        let (name, size) = {
            let mut state = self.state.lock().unwrap();
            let in_segment: Vec<&TextSample> = state
                .pending
                .iter()
                .filter(|c| c.start_ms < end_ms && c.end_ms > start_ms)
                .collect();
            let content = Self::render_segment(&in_segment);

            let name = template::expand(
                &self.options.segment_template,
                number,
                start_ms,
                self.options.bandwidth,
                &self.options.representation_id,
            );
            let size = io::write_all(&name, content.as_bytes())?;

            state.pending.retain(|c| c.end_ms > end_ms);
            state.segments_written += 1;
            state.last_segment_end_ms = end_ms;
            (name, size)
        };

        tracing::debug!(segment = %name, number, "Text segment finished");
        self.listener
            .on_new_segment(&name, start_ms, duration_ms, size);
        Ok(())
    }
}

impl MediaHandler for WebVttTextOutputHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self, _downstream: Arc<dyn MediaHandler>) -> Result<()> {
        Err(PackagerError::Chain(
            "text output is a sink and accepts no downstream".into(),
        ))
    }

    fn initialize(&self) -> Result<()> {
        if self.options.segment_template.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Segmented text output requires a segment template".into(),
            ));
        }
        Ok(())
    }

    fn handle(&self, data: StreamData) -> Result<()> {
        match data {
            StreamData::StreamInfo(info) => {
                self.state.lock().unwrap().stream_info = Some((*info).clone());
                self.listener.on_media_start(&self.options, &info);
                Ok(())
            }
            StreamData::TextSample(cue) => {
                self.state.lock().unwrap().pending.push((*cue).clone());
                Ok(())
            }
            StreamData::SegmentInfo(info) => {
                if info.is_subsegment {
                    return Ok(());
                }
                self.write_segment(info.start, info.duration, info.number)
            }
            StreamData::CueEvent(_) => Ok(()),
            StreamData::MediaSample(_) => Err(PackagerError::MuxFailure(
                "Text output cannot accept media samples".into(),
            )),
        }
    }

    fn flush(&self) -> Result<()> {
        let media_info = {
            let state = self.state.lock().unwrap();
            let Some(stream_info) = state.stream_info.clone() else {
                return Ok(());
            };
            let mut media_info = MediaInfo {
                segment_template: self.options.segment_template.clone(),
                container_type: MediaContainer::WebVtt.as_str().to_string(),
                bandwidth: self.options.bandwidth,
                media_duration_seconds: state.last_segment_end_ms as f64 / 1000.0,
                ..Default::default()
            };
            media_info.apply_stream_info(&stream_info);
            media_info
        };
        tracing::info!(
            template = %self.options.segment_template,
            "Segmented text output finished"
        );
        self.listener.on_media_end(&media_info);
        Ok(())
    }
}
