//! Muxer listener construction.
//!
//! Muxers report lifecycle events through a single [`MuxerListener`]; the
//! factory assembles that listener from up to three concerns: the on-demand
//! media-info dump, the DASH notifier bridge, and the HLS notifier bridge.

use std::sync::{Arc, Mutex};

use vessel_core::descriptor::StreamDescriptor;
use vessel_core::error::Result;
use vessel_core::handler::StreamInfo;
use vessel_core::io;
use vessel_core::media_info::MediaInfo;
use vessel_media::muxer::{MuxerListener, MuxerOptions};

use crate::hls::HlsNotifier;
use crate::mpd::MpdNotifier;

const MEDIA_INFO_SUFFIX: &str = ".media_info";

/// The descriptor fields a listener needs.
#[derive(Clone, Debug, Default)]
pub struct StreamListenerData {
    pub media_info_output: String,
    pub hls_group_id: String,
    pub hls_name: String,
    pub hls_playlist_name: String,
    pub hls_iframe_playlist_name: String,
}

impl StreamListenerData {
    pub fn from_descriptor(stream: &StreamDescriptor) -> Self {
        Self {
            media_info_output: stream.output.clone(),
            hls_group_id: stream.hls_group_id.clone(),
            hls_name: stream.hls_name.clone(),
            hls_playlist_name: stream.hls_playlist_name.clone(),
            hls_iframe_playlist_name: stream.hls_iframe_playlist_name.clone(),
        }
    }
}

/// Serialize a media-info dump next to the output it describes.
pub fn write_media_info_dump(media_info: &MediaInfo, output: &str) -> Result<()> {
    let path = format!("{output}{MEDIA_INFO_SUFFIX}");
    let json = serde_json::to_vec_pretty(media_info).map_err(|e| {
        vessel_core::error::PackagerError::Internal(format!("Failed to encode media info: {e}"))
    })?;
    io::write_all(&path, &json)?;
    tracing::debug!(path = %path, "Media info written");
    Ok(())
}

pub struct MuxerListenerFactory {
    output_media_info: bool,
    mpd_notifier: Option<Arc<MpdNotifier>>,
    hls_notifier: Option<Arc<HlsNotifier>>,
}

impl MuxerListenerFactory {
    pub fn new(
        output_media_info: bool,
        mpd_notifier: Option<Arc<MpdNotifier>>,
        hls_notifier: Option<Arc<HlsNotifier>>,
    ) -> Self {
        Self {
            output_media_info,
            mpd_notifier,
            hls_notifier,
        }
    }

    /// The full listener stack for an audio/video muxer.
    pub fn create_listener(&self, data: StreamListenerData) -> Box<dyn MuxerListener> {
        let mut listeners: Vec<Box<dyn MuxerListener>> = Vec::new();
        if self.output_media_info && !data.media_info_output.is_empty() {
            listeners.push(Box::new(MediaInfoDumpListener {
                output: data.media_info_output.clone(),
            }));
        }
        if let Some(mpd) = &self.mpd_notifier {
            listeners.push(Box::new(MpdListener {
                notifier: mpd.clone(),
                id: Mutex::new(None),
            }));
        }
        if let Some(hls) = self.create_hls_listener(data) {
            listeners.push(hls);
        }
        Box::new(CombinedListener { listeners })
    }

    /// The HLS-only listener, or `None` when no HLS output is configured.
    pub fn create_hls_listener(&self, data: StreamListenerData) -> Option<Box<dyn MuxerListener>> {
        let notifier = self.hls_notifier.clone()?;
        Some(Box::new(HlsListener {
            notifier,
            data,
            registered: Mutex::new(None),
        }))
    }
}

struct CombinedListener {
    listeners: Vec<Box<dyn MuxerListener>>,
}

impl MuxerListener for CombinedListener {
    fn on_media_start(&self, options: &MuxerOptions, info: &StreamInfo) {
        for listener in &self.listeners {
            listener.on_media_start(options, info);
        }
    }
    fn on_new_segment(&self, file_name: &str, start: i64, duration: i64, size: u64) {
        for listener in &self.listeners {
            listener.on_new_segment(file_name, start, duration, size);
        }
    }
    fn on_media_end(&self, media_info: &MediaInfo) {
        for listener in &self.listeners {
            listener.on_media_end(media_info);
        }
    }
}

/// Writes `<output>.media_info` when the stream finishes (on-demand only).
struct MediaInfoDumpListener {
    output: String,
}

impl MuxerListener for MediaInfoDumpListener {
    fn on_media_start(&self, _options: &MuxerOptions, _info: &StreamInfo) {}
    fn on_new_segment(&self, _file_name: &str, _start: i64, _duration: i64, _size: u64) {}
    fn on_media_end(&self, media_info: &MediaInfo) {
        if let Err(e) = write_media_info_dump(media_info, &self.output) {
            tracing::error!(output = %self.output, %e, "Failed to dump media info");
        }
    }
}

/// Bridges one muxer to the DASH notifier.
struct MpdListener {
    notifier: Arc<MpdNotifier>,
    id: Mutex<Option<u32>>,
}

impl MpdListener {
    fn provisional_info(options: &MuxerOptions, info: &StreamInfo) -> MediaInfo {
        let mut media_info = MediaInfo {
            media_file_name: options.output_file_name.clone(),
            segment_template: options.segment_template.clone(),
            bandwidth: options.bandwidth,
            ..Default::default()
        };
        if !options.segment_template.is_empty() {
            media_info.init_segment_name = options.output_file_name.clone();
        }
        media_info.apply_stream_info(info);
        media_info
    }
}

impl MuxerListener for MpdListener {
    fn on_media_start(&self, options: &MuxerOptions, info: &StreamInfo) {
        match self
            .notifier
            .notify_new_container(&Self::provisional_info(options, info))
        {
            Ok(id) => *self.id.lock().unwrap() = Some(id),
            Err(e) => tracing::error!(%e, "MPD container registration failed"),
        }
    }

    fn on_new_segment(&self, _file_name: &str, start: i64, duration: i64, _size: u64) {
        if let Some(id) = *self.id.lock().unwrap() {
            if let Err(e) = self.notifier.notify_new_segment(id, start, duration) {
                tracing::error!(%e, "MPD segment notification failed");
            }
        }
    }

    fn on_media_end(&self, media_info: &MediaInfo) {
        if let Some(id) = *self.id.lock().unwrap() {
            if let Err(e) = self.notifier.update_container(id, media_info) {
                tracing::error!(%e, "MPD container update failed");
            }
        }
    }
}

/// Bridges one muxer to the HLS notifier.
struct HlsListener {
    notifier: Arc<HlsNotifier>,
    data: StreamListenerData,
    /// (stream id, time scale) once the stream has started.
    registered: Mutex<Option<(u32, u32)>>,
}

impl MuxerListener for HlsListener {
    fn on_media_start(&self, options: &MuxerOptions, info: &StreamInfo) {
        let mut media_info = MediaInfo {
            media_file_name: options.output_file_name.clone(),
            segment_template: options.segment_template.clone(),
            bandwidth: options.bandwidth,
            ..Default::default()
        };
        media_info.apply_stream_info(info);
        match self.notifier.notify_new_stream(
            &media_info,
            &self.data.hls_playlist_name,
            &self.data.hls_name,
            &self.data.hls_group_id,
        ) {
            Ok(id) => {
                *self.registered.lock().unwrap() = Some((id, info.time_scale.max(1)));
            }
            Err(e) => tracing::error!(%e, "HLS stream registration failed"),
        }
    }

    fn on_new_segment(&self, file_name: &str, _start: i64, duration: i64, _size: u64) {
        if let Some((id, time_scale)) = *self.registered.lock().unwrap() {
            // Segment durations arrive in the stream's own time scale; the
            // playlist wants seconds.
            let seconds = duration as f64 / time_scale as f64;
            if let Err(e) = self.notifier.notify_new_segment(id, file_name, seconds) {
                tracing::error!(%e, "HLS segment notification failed");
            }
        }
    }

    fn on_media_end(&self, media_info: &MediaInfo) {
        if let Some((id, _)) = *self.registered.lock().unwrap() {
            if let Err(e) = self.notifier.update_stream(id, media_info) {
                tracing::error!(%e, "HLS stream update failed");
            }
        }
    }
}
