//! Per-input origin handler.
//!
//! Exactly one demuxer exists per distinct input URI; every stream selected
//! from that input hangs off one of its selector outputs.  At run time the
//! demuxer opens its input through the file indirection, sniffs the
//! container, and drives the matching parser, pushing stream info and
//! samples into the bound chains.
//!
//! Parsers for rich containers (MP4, TS, WebM) are format collaborators; the
//! engine bundles the self-framing ADTS/AAC parser.  A recognised container
//! without a bundled parser surfaces `ParserFailure` at run time, never at
//! initialise time, so graph construction stays cheap and order-independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use vessel_core::container::MediaContainer;
use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{
    MediaHandler, MediaSample, OriginHandler, StreamData, StreamInfo, StreamType,
};
use vessel_core::io;

use crate::encryption::KeySource;

const NAME: &str = "demuxer";

/// Bytes sniffed from the input head for container detection.
const SNIFF_LEN: usize = 512;

#[derive(Default)]
struct DemuxState {
    /// selector → downstream chain head.
    handlers: HashMap<String, Arc<dyn MediaHandler>>,
    /// selector → language override applied to discovered stream info.
    language_overrides: HashMap<String, String>,
}

pub struct Demuxer {
    input: String,
    dump_stream_info: bool,
    decryption_key_source: Option<Arc<dyn KeySource>>,
    state: Mutex<DemuxState>,
}

impl Demuxer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
            dump_stream_info: false,
            decryption_key_source: None,
            state: Mutex::new(DemuxState::default()),
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_dump_stream_info(&mut self, dump: bool) {
        self.dump_stream_info = dump;
    }

    pub fn set_key_source(&mut self, key_source: Arc<dyn KeySource>) {
        self.decryption_key_source = Some(key_source);
    }

    /// Route one selector output into `handler`.  Selectors are `"audio"`,
    /// `"video"`, `"text"`, or a zero-based stream index.
    pub fn set_handler(&self, stream_selector: &str, handler: Arc<dyn MediaHandler>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .handlers
            .insert(stream_selector.to_string(), handler)
            .is_some()
        {
            return Err(PackagerError::Chain(format!(
                "demuxer output '{stream_selector}' is already connected"
            )));
        }
        Ok(())
    }

    pub fn set_language_override(&self, stream_selector: &str, language: &str) {
        self.state
            .lock()
            .unwrap()
            .language_overrides
            .insert(stream_selector.to_string(), language.to_string());
    }

    /// Find the chain bound to a discovered stream, matching either by type
    /// name or by stream index.
    fn handler_for(
        &self,
        stream_type: StreamType,
        stream_index: usize,
    ) -> Option<(String, Arc<dyn MediaHandler>)> {
        let type_name = match stream_type {
            StreamType::Audio => "audio",
            StreamType::Video => "video",
            StreamType::Text => "text",
        };
        let state = self.state.lock().unwrap();
        if let Some(h) = state.handlers.get(type_name) {
            return Some((type_name.to_string(), Arc::clone(h)));
        }
        let index = stream_index.to_string();
        state
            .handlers
            .get(&index)
            .map(|h| (index, Arc::clone(h)))
    }

    fn dispatch_stream(
        &self,
        cancel: &CancellationToken,
        mut info: StreamInfo,
        stream_index: usize,
        samples: Vec<MediaSample>,
    ) -> Result<()> {
        if self.dump_stream_info {
            tracing::info!(
                input = %self.input,
                stream_index,
                stream_type = ?info.stream_type,
                codec = %info.codec,
                time_scale = info.time_scale,
                samples = samples.len(),
                "Stream info"
            );
        }

        let Some((selector, handler)) = self.handler_for(info.stream_type, stream_index) else {
            tracing::warn!(
                input = %self.input,
                stream_index,
                stream_type = ?info.stream_type,
                "No stream selector matched; dropping stream"
            );
            return Ok(());
        };

        let language_override = self
            .state
            .lock()
            .unwrap()
            .language_overrides
            .get(&selector)
            .cloned();
        if let Some(language) = language_override {
            info.language = language;
        }

        handler.handle(StreamData::StreamInfo(Arc::new(info)))?;
        for sample in samples {
            if cancel.is_cancelled() {
                return Err(PackagerError::Cancelled);
            }
            handler.handle(StreamData::MediaSample(Arc::new(sample)))?;
        }
        handler.flush()
    }
}

impl MediaHandler for Demuxer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self, _downstream: Arc<dyn MediaHandler>) -> Result<()> {
        Err(PackagerError::Chain(
            "demuxer outputs are bound per stream selector; use set_handler".into(),
        ))
    }

    fn initialize(&self) -> Result<()> {
        let handlers: Vec<Arc<dyn MediaHandler>> =
            self.state.lock().unwrap().handlers.values().cloned().collect();
        for handler in handlers {
            handler.initialize()?;
        }
        Ok(())
    }

    fn handle(&self, _data: StreamData) -> Result<()> {
        Err(PackagerError::Chain(
            "demuxer is an origin and accepts no upstream data".into(),
        ))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl OriginHandler for Demuxer {
    fn run(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PackagerError::Cancelled);
        }

        let head = io::read_head(&self.input, SNIFF_LEN)?;
        let container = MediaContainer::sniff(&head);
        tracing::info!(input = %self.input, container = %container.as_str(), "Demuxer opened");

        if self.decryption_key_source.is_some() {
            tracing::debug!(input = %self.input, "Decryption key source attached");
        }

        match container {
            MediaContainer::Aac => {
                let data = io::read_to_vec(&self.input)?;
                let (info, samples) = adts::parse(&data).map_err(|e| {
                    PackagerError::ParserFailure(format!(
                        "Failed to parse ADTS input {}: {e}",
                        self.input
                    ))
                })?;
                self.dispatch_stream(cancel, info, 0, samples)
            }
            MediaContainer::Unknown => Err(PackagerError::ParserFailure(format!(
                "Could not detect the container of {}",
                self.input
            ))),
            other => Err(PackagerError::ParserFailure(format!(
                "No bundled parser for {} input {}; register a format plugin",
                other.as_str(),
                self.input
            ))),
        }
    }
}

/// Minimal ADTS/AAC frame walker.  Each frame carries its own header with an
/// explicit length, so the format is fully parseable without codec knowledge.
pub mod adts {
    use super::*;

    const SAMPLE_RATES: [u32; 13] = [
        96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
        8_000, 7_350,
    ];

    /// Samples per AAC frame.
    const FRAME_SAMPLES: i64 = 1024;

    /// Parse a whole ADTS bitstream into stream info plus per-frame samples.
    /// Sample payloads keep their ADTS headers, so packed audio output is a
    /// byte-for-byte passthrough.
    pub fn parse(data: &[u8]) -> std::result::Result<(StreamInfo, Vec<MediaSample>), String> {
        let mut samples = Vec::new();
        let mut offset = 0usize;
        let mut sample_rate = 0u32;
        let mut object_type = 0u8;
        let mut pts = 0i64;

        while offset + 7 <= data.len() {
            let h = &data[offset..];
            if h[0] != 0xFF || (h[1] & 0xF0) != 0xF0 {
                return Err(format!("lost ADTS sync at byte {offset}"));
            }
            let rate_index = ((h[2] >> 2) & 0x0F) as usize;
            if rate_index >= SAMPLE_RATES.len() {
                return Err(format!("invalid sampling frequency index {rate_index}"));
            }
            let frame_rate = SAMPLE_RATES[rate_index];
            if sample_rate == 0 {
                sample_rate = frame_rate;
                object_type = (h[2] >> 6) + 1;
            } else if frame_rate != sample_rate {
                return Err("sample rate changed mid-stream".into());
            }

            let frame_length =
                (((h[3] & 0x03) as usize) << 11) | ((h[4] as usize) << 3) | ((h[5] as usize) >> 5);
            if frame_length < 7 || offset + frame_length > data.len() {
                return Err(format!("truncated ADTS frame at byte {offset}"));
            }

            samples.push(MediaSample {
                pts,
                dts: pts,
                duration: FRAME_SAMPLES,
                is_key_frame: true,
                data: data[offset..offset + frame_length].to_vec(),
            });
            pts += FRAME_SAMPLES;
            offset += frame_length;
        }

        if samples.is_empty() {
            return Err("no ADTS frames found".into());
        }

        let info = StreamInfo::new(
            StreamType::Audio,
            sample_rate,
            &format!("mp4a.40.{object_type}"),
        );
        Ok((info, samples))
    }

    /// Build one syntactically valid ADTS frame around `payload` (test and
    /// fixture helper).
    pub fn build_frame(rate_index: u8, payload: &[u8]) -> Vec<u8> {
        let frame_length = 7 + payload.len();
        let mut frame = vec![
            0xFF,
            0xF1,
            0x40 | (rate_index << 2),
            ((frame_length >> 11) & 0x03) as u8,
            ((frame_length >> 3) & 0xFF) as u8,
            (((frame_length & 0x07) as u8) << 5) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }
}
