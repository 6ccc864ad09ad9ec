//! Container-tagged segment writer.
//!
//! The muxer is the sink of every audio/video chain.  It collects samples
//! into the current segment, writes finished segments when the upstream
//! chunker emits [`SegmentInfo`], and reports progress to its
//! [`MuxerListener`] so manifests stay in step with the files on disk.
//!
//! Two output modes, chosen by [`MuxerOptions::segment_template`]:
//!
//! - **segmented**: each finished segment goes to its own file expanded from
//!   the template; `output_file_name` (when set) receives the init segment.
//! - **single file**: segments append to `output_file_name`.
//!
//! Byte-exact container framing (boxes, TS packets) is the format
//! collaborator's concern; the muxer writes sample payloads as produced
//! upstream and keeps the bookkeeping exact.

use std::sync::{Arc, Mutex};

use vessel_core::container::MediaContainer;
use vessel_core::descriptor::Mp4OutputParams;
use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{MediaHandler, SegmentInfo, StreamData, StreamInfo};
use vessel_core::io::{self, FileWriter};
use vessel_core::media_info::MediaInfo;

use crate::template;

const NAME: &str = "muxer";

/// Per-muxer output configuration, assembled by the graph builder from the
/// stream descriptor and the packaging params.
#[derive(Clone, Debug, Default)]
pub struct MuxerOptions {
    pub mp4_params: Mp4OutputParams,
    pub temp_dir: String,
    pub bandwidth: u32,
    pub output_file_name: String,
    pub segment_template: String,
    /// Unique id of this representation within the request; substituted for
    /// `$RepresentationID$` in segment templates.
    pub representation_id: String,
}

/// Callback sink bridging muxers to manifest notifiers and media-info dumps.
pub trait MuxerListener: Send + Sync {
    fn on_media_start(&self, options: &MuxerOptions, info: &StreamInfo);
    fn on_new_segment(&self, file_name: &str, start_time: i64, duration: i64, segment_size: u64);
    fn on_media_end(&self, media_info: &MediaInfo);
}

#[derive(Default)]
struct MuxState {
    stream_info: Option<StreamInfo>,
    segment_buffer: Vec<u8>,
    single_file: Option<FileWriter>,
    first_pts: Option<i64>,
    last_pts_end: i64,
    segments_written: u64,
    total_bytes: u64,
    protected: bool,
}

pub struct Muxer {
    container: MediaContainer,
    options: MuxerOptions,
    listener: Mutex<Option<Box<dyn MuxerListener>>>,
    state: Mutex<MuxState>,
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("container", &self.container)
            .field("options", &self.options)
            .finish()
    }
}

impl Muxer {
    pub fn new(container: MediaContainer, options: MuxerOptions) -> Result<Self> {
        if container == MediaContainer::Unknown {
            return Err(PackagerError::InvalidArgument(
                "Cannot create muxer for unknown container".into(),
            ));
        }
        Ok(Self {
            container,
            options,
            listener: Mutex::new(None),
            state: Mutex::new(MuxState::default()),
        })
    }

    pub fn set_listener(&self, listener: Box<dyn MuxerListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    pub fn container(&self) -> MediaContainer {
        self.container
    }

    fn segmented(&self) -> bool {
        !self.options.segment_template.is_empty()
    }

    fn with_listener(&self, f: impl FnOnce(&dyn MuxerListener)) {
        if let Some(listener) = self.listener.lock().unwrap().as_deref() {
            f(listener);
        }
    }

    fn on_stream_info(&self, info: &StreamInfo) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.protected = info.is_encrypted;
        state.stream_info = Some(info.clone());

        if self.segmented() {
            if !self.options.output_file_name.is_empty() {
                // Init segment: the container preamble for this track.
                let mut header = MediaInfo {
                    container_type: self.container.as_str().to_string(),
                    ..Default::default()
                };
                header.apply_stream_info(info);
                let bytes = serde_json::to_vec(&header).map_err(|e| {
                    PackagerError::MuxFailure(format!("Failed to encode init segment: {e}"))
                })?;
                io::write_all(&self.options.output_file_name, &bytes)?;
                tracing::debug!(
                    init = %self.options.output_file_name,
                    "Wrote init segment"
                );
            }
        } else {
            state.single_file = Some(FileWriter::create(&self.options.output_file_name)?);
        }
        drop(state);

        self.with_listener(|l| l.on_media_start(&self.options, info));
        Ok(())
    }

    fn write_segment(&self, info: &SegmentInfo) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let buffer = std::mem::take(&mut state.segment_buffer);
        let size = buffer.len() as u64;
        state.total_bytes += size;
        state.segments_written += 1;

        let file_name = if self.segmented() {
            let name = template::expand(
                &self.options.segment_template,
                info.number,
                info.start,
                self.options.bandwidth,
                &self.options.representation_id,
            );
            io::write_all(&name, &buffer)?;
            name
        } else {
            match state.single_file.as_mut() {
                Some(writer) => writer.write(&buffer)?,
                None => {
                    return Err(PackagerError::MuxFailure(
                        "Muxer received a segment before stream info".into(),
                    ));
                }
            }
            self.options.output_file_name.clone()
        };

        if info.is_encrypted {
            state.protected = true;
        }
        let segments = state.segments_written;
        drop(state);

        tracing::debug!(
            segment = %file_name,
            number = info.number,
            duration = info.duration,
            size,
            segments,
            "Segment finished"
        );
        self.with_listener(|l| l.on_new_segment(&file_name, info.start, info.duration, size));
        Ok(())
    }
}

impl MediaHandler for Muxer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&self, _downstream: Arc<dyn MediaHandler>) -> Result<()> {
        Err(PackagerError::Chain(
            "muxer is a sink and accepts no downstream".into(),
        ))
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn handle(&self, data: StreamData) -> Result<()> {
        match data {
            StreamData::StreamInfo(info) => self.on_stream_info(&info),
            StreamData::MediaSample(sample) => {
                let mut state = self.state.lock().unwrap();
                if state.stream_info.is_none() {
                    return Err(PackagerError::MuxFailure(
                        "Muxer received a sample before stream info".into(),
                    ));
                }
                if state.first_pts.is_none() {
                    state.first_pts = Some(sample.pts);
                }
                state.last_pts_end = state.last_pts_end.max(sample.pts + sample.duration);
                state.segment_buffer.extend_from_slice(&sample.data);
                Ok(())
            }
            StreamData::SegmentInfo(info) => {
                if info.is_subsegment {
                    return Ok(());
                }
                self.write_segment(&info)
            }
            StreamData::CueEvent(_) => Ok(()),
            StreamData::TextSample(_) => Err(PackagerError::MuxFailure(
                "Muxer cannot accept raw text samples; route text through the MP4 conversion \
                 handler"
                    .into(),
            )),
        }
    }

    fn flush(&self) -> Result<()> {
        let media_info = {
            let mut state = self.state.lock().unwrap();

            // Anything still buffered becomes a trailing segment.
            if !state.segment_buffer.is_empty() {
                let start = state.first_pts.unwrap_or(0);
                let info = SegmentInfo {
                    start,
                    duration: state.last_pts_end - start,
                    number: state.segments_written + 1,
                    is_subsegment: false,
                    is_encrypted: state.protected,
                };
                drop(state);
                self.write_segment(&info)?;
                state = self.state.lock().unwrap();
            }

            if let Some(writer) = state.single_file.take() {
                writer.close()?;
            }

            let Some(stream_info) = state.stream_info.clone() else {
                // Nothing reached this muxer; nothing to finalise.
                return Ok(());
            };

            let duration_units = state.last_pts_end - state.first_pts.unwrap_or(0);
            let mut media_info = MediaInfo {
                media_file_name: self.options.output_file_name.clone(),
                init_segment_name: if self.segmented() {
                    self.options.output_file_name.clone()
                } else {
                    String::new()
                },
                segment_template: self.options.segment_template.clone(),
                container_type: self.container.as_str().to_string(),
                bandwidth: self.options.bandwidth,
                media_duration_seconds: if stream_info.time_scale > 0 {
                    duration_units as f64 / stream_info.time_scale as f64
                } else {
                    0.0
                },
                ..Default::default()
            };
            media_info.apply_stream_info(&stream_info);
            media_info.protected = state.protected;
            media_info
        };

        tracing::info!(
            output = %self.options.output_file_name,
            template = %self.options.segment_template,
            container = %self.container.as_str(),
            "Muxer finished"
        );
        self.with_listener(|l| l.on_media_end(&media_info));
        Ok(())
    }
}
