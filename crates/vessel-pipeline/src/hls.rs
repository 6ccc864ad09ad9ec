//! HLS playlist notification and rendering.
//!
//! One media playlist per notified stream plus one master playlist.  Video
//! streams become `#EXT-X-STREAM-INF` variants; audio and subtitle streams
//! become `#EXT-X-MEDIA` renditions grouped by `hls_group_id`.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Mutex;

use vessel_core::descriptor::{HlsParams, HlsPlaylistType};
use vessel_core::error::{PackagerError, Result};
use vessel_core::io;
use vessel_core::media_info::MediaInfo;

use crate::version;

#[derive(Clone, Debug)]
struct SegmentRecord {
    file_name: String,
    duration_seconds: f64,
}

#[derive(Clone, Debug)]
struct HlsStream {
    media_info: MediaInfo,
    playlist_name: String,
    stream_name: String,
    group_id: String,
    segments: Vec<SegmentRecord>,
}

#[derive(Default)]
struct HlsState {
    streams: Vec<HlsStream>,
}

pub struct HlsNotifier {
    params: HlsParams,
    state: Mutex<HlsState>,
}

impl HlsNotifier {
    pub fn new(params: HlsParams) -> Self {
        Self {
            params,
            state: Mutex::new(HlsState::default()),
        }
    }

    pub fn master_playlist_output(&self) -> &str {
        &self.params.master_playlist_output
    }

    /// Register a stream; returns the id used for segment notifications.
    pub fn notify_new_stream(
        &self,
        media_info: &MediaInfo,
        playlist_name: &str,
        stream_name: &str,
        group_id: &str,
    ) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        let id = state.streams.len() as u32;
        let playlist_name = if playlist_name.is_empty() {
            format!("stream_{id}.m3u8")
        } else {
            playlist_name.to_string()
        };
        tracing::debug!(id, playlist = %playlist_name, "HLS stream registered");
        state.streams.push(HlsStream {
            media_info: media_info.clone(),
            playlist_name,
            stream_name: stream_name.to_string(),
            group_id: group_id.to_string(),
            segments: Vec::new(),
        });
        Ok(id)
    }

    /// Refresh a stream's media info (final bandwidth/duration at flush).
    pub fn update_stream(&self, id: u32, media_info: &MediaInfo) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stream = state
            .streams
            .get_mut(id as usize)
            .ok_or_else(|| PackagerError::Internal(format!("Unknown HLS stream id {id}")))?;
        stream.media_info = media_info.clone();
        Ok(())
    }

    pub fn notify_new_segment(
        &self,
        id: u32,
        file_name: &str,
        duration_seconds: f64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stream = state
            .streams
            .get_mut(id as usize)
            .ok_or_else(|| PackagerError::Internal(format!("Unknown HLS stream id {id}")))?;
        stream.segments.push(SegmentRecord {
            file_name: file_name.to_string(),
            duration_seconds,
        });
        Ok(())
    }

    /// Render and write the master playlist plus every media playlist.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        let master_output = &self.params.master_playlist_output;

        for stream in &state.streams {
            let playlist = self.render_media_playlist(stream);
            let path = sibling_path(master_output, &stream.playlist_name);
            io::write_all(&path, playlist.as_bytes())?;
        }

        let master = self.render_master(&state);
        io::write_all(master_output, master.as_bytes())?;
        tracing::info!(output = %master_output, streams = state.streams.len(), "HLS playlists written");
        Ok(())
    }

    fn render_master(&self, state: &HlsState) -> String {
        let mut out = String::from("#EXTM3U\n");
        let _ = writeln!(
            out,
            "## Generated with vessel version {}",
            version::library_version()
        );

        let has_video = state
            .streams
            .iter()
            .any(|s| s.media_info.content_type() == "video");

        // Renditions first.
        for stream in &state.streams {
            let content_type = stream.media_info.content_type();
            if content_type == "video" {
                continue;
            }
            if content_type == "audio" && !has_video {
                // Audio-only presentation: emit variants below instead.
                continue;
            }
            let media_type = if content_type == "audio" {
                "AUDIO"
            } else {
                "SUBTITLES"
            };
            let group = if stream.group_id.is_empty() {
                if content_type == "audio" {
                    "audio"
                } else {
                    "text"
                }
            } else {
                &stream.group_id
            };
            let _ = write!(
                out,
                "#EXT-X-MEDIA:TYPE={media_type},GROUP-ID=\"{group}\",NAME=\"{}\",URI=\"{}\"",
                if stream.stream_name.is_empty() {
                    "default"
                } else {
                    &stream.stream_name
                },
                stream.playlist_name
            );
            let language = stream_language(&stream.media_info);
            if !language.is_empty() {
                let _ = write!(out, ",LANGUAGE=\"{language}\"");
            }
            out.push('\n');
        }

        // Variants.
        for stream in &state.streams {
            let content_type = stream.media_info.content_type();
            let is_variant = content_type == "video" || (content_type == "audio" && !has_video);
            if !is_variant {
                continue;
            }
            let info = &stream.media_info;
            let _ = write!(out, "#EXT-X-STREAM-INF:BANDWIDTH={}", info.bandwidth.max(1));
            if let Some(video) = &info.video_info {
                if video.width > 0 {
                    let _ = write!(out, ",RESOLUTION={}x{}", video.width, video.height);
                }
                if !video.codec.is_empty() {
                    let _ = write!(out, ",CODECS=\"{}\"", video.codec);
                }
            } else if let Some(audio) = &info.audio_info {
                if !audio.codec.is_empty() {
                    let _ = write!(out, ",CODECS=\"{}\"", audio.codec);
                }
            }
            let audio_group = state
                .streams
                .iter()
                .find(|s| s.media_info.content_type() == "audio" && has_video)
                .map(|s| {
                    if s.group_id.is_empty() {
                        "audio".to_string()
                    } else {
                        s.group_id.clone()
                    }
                });
            if let Some(group) = audio_group {
                let _ = write!(out, ",AUDIO=\"{group}\"");
            }
            let _ = writeln!(out, "\n{}", stream.playlist_name);
        }
        out
    }

    fn render_media_playlist(&self, stream: &HlsStream) -> String {
        let target_duration = stream
            .segments
            .iter()
            .map(|s| s.duration_seconds)
            .fold(0.0f64, f64::max)
            .ceil()
            .max(1.0) as u64;

        let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:6\n");
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{target_duration}");
        match self.params.playlist_type {
            HlsPlaylistType::Vod => out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n"),
            HlsPlaylistType::Event => out.push_str("#EXT-X-PLAYLIST-TYPE:EVENT\n"),
            HlsPlaylistType::Live => {}
        }
        if stream.media_info.protected {
            out.push_str("#EXT-X-KEY:METHOD=SAMPLE-AES\n");
        }

        for segment in &stream.segments {
            let uri = segment_uri(&self.params.base_url, &segment.file_name);
            let _ = writeln!(out, "#EXTINF:{:.3},", segment.duration_seconds);
            let _ = writeln!(out, "{uri}");
        }
        if self.params.playlist_type == HlsPlaylistType::Vod {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }
}

fn stream_language(info: &MediaInfo) -> String {
    info.audio_info
        .as_ref()
        .map(|a| a.language.clone())
        .or_else(|| info.text_info.as_ref().map(|t| t.language.clone()))
        .unwrap_or_default()
}

/// Resolve `name` next to the master playlist.
fn sibling_path(master_output: &str, name: &str) -> String {
    if io::is_callback_file_name(master_output) {
        return name.to_string();
    }
    match Path::new(master_output).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(name).to_string_lossy().into_owned()
        }
        _ => name.to_string(),
    }
}

/// Playlist-facing URI of a segment file: base URL plus the file's name.
fn segment_uri(base_url: &str, file_name: &str) -> String {
    let name = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    format!("{base_url}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_core::media_info::{AudioInfo, VideoInfo};

    fn video() -> MediaInfo {
        MediaInfo {
            container_type: "mpeg2ts".into(),
            bandwidth: 3_000_000,
            video_info: Some(VideoInfo {
                codec: "avc1.64001f".into(),
                width: 1280,
                height: 720,
                time_scale: 90_000,
            }),
            ..Default::default()
        }
    }

    fn audio() -> MediaInfo {
        MediaInfo {
            container_type: "aac".into(),
            bandwidth: 128_000,
            audio_info: Some(AudioInfo {
                codec: "mp4a.40.2".into(),
                sampling_frequency: 44_100,
                language: "eng".into(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn master_lists_variants_and_renditions() {
        let notifier = HlsNotifier::new(HlsParams::default());
        notifier
            .notify_new_stream(&video(), "video.m3u8", "video", "")
            .unwrap();
        notifier
            .notify_new_stream(&audio(), "audio.m3u8", "english", "aud")
            .unwrap();

        let master = notifier.render_master(&notifier.state.lock().unwrap());
        assert!(master.starts_with("#EXTM3U"));
        assert!(master.contains(
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"english\",URI=\"audio.m3u8\""
        ));
        assert!(master.contains("LANGUAGE=\"eng\""));
        assert!(master.contains("#EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1280x720"));
        assert!(master.contains("AUDIO=\"aud\""));
        assert!(master.contains("video.m3u8"));
    }

    #[test]
    fn audio_only_presentations_emit_variants() {
        let notifier = HlsNotifier::new(HlsParams::default());
        notifier
            .notify_new_stream(&audio(), "audio.m3u8", "english", "")
            .unwrap();
        let master = notifier.render_master(&notifier.state.lock().unwrap());
        assert!(master.contains("#EXT-X-STREAM-INF:BANDWIDTH=128000"));
        assert!(!master.contains("#EXT-X-MEDIA"));
    }

    #[test]
    fn vod_media_playlists_are_terminated() {
        let notifier = HlsNotifier::new(HlsParams::default());
        let id = notifier
            .notify_new_stream(&video(), "video.m3u8", "video", "")
            .unwrap();
        notifier
            .notify_new_segment(id, "seg-1.ts", 6.0)
            .unwrap();
        notifier
            .notify_new_segment(id, "seg-2.ts", 4.5)
            .unwrap();

        let playlist =
            notifier.render_media_playlist(&notifier.state.lock().unwrap().streams[0]);
        assert!(playlist.contains("#EXT-X-TARGETDURATION:6"));
        assert!(playlist.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(playlist.contains("#EXTINF:6.000,\nseg-1.ts"));
        assert!(playlist.contains("#EXTINF:4.500,\nseg-2.ts"));
        assert!(playlist.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn flush_writes_master_and_media_playlists() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("master.m3u8");
        let notifier = HlsNotifier::new(HlsParams {
            master_playlist_output: master.to_str().unwrap().into(),
            ..Default::default()
        });
        let id = notifier
            .notify_new_stream(&video(), "video.m3u8", "video", "")
            .unwrap();
        notifier
            .notify_new_segment(id, "seg-1.ts", 6.0)
            .unwrap();
        notifier.flush().unwrap();

        assert!(master.exists());
        assert!(dir.path().join("video.m3u8").exists());
    }

    #[test]
    fn protected_streams_advertise_a_key() {
        let notifier = HlsNotifier::new(HlsParams::default());
        let mut info = video();
        info.protected = true;
        notifier
            .notify_new_stream(&info, "v.m3u8", "v", "")
            .unwrap();
        let playlist =
            notifier.render_media_playlist(&notifier.state.lock().unwrap().streams[0]);
        assert!(playlist.contains("#EXT-X-KEY"));
    }
}
