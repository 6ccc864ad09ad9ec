//! DASH MPD notification and rendering.
//!
//! Muxers (through their listeners) register containers and report segments
//! from their own threads; `flush` renders the manifest through the file
//! indirection.  One Period; one AdaptationSet per content type; one
//! Representation per notified container.

use std::fmt::Write as _;
use std::sync::Mutex;

use vessel_core::error::{PackagerError, Result};
use vessel_core::io;
use vessel_core::media_info::MediaInfo;

use crate::version;

/// Notifier configuration, resolved from `MpdParams` plus the request
/// profile.
#[derive(Clone, Debug, Default)]
pub struct MpdOptions {
    pub on_demand: bool,
    pub mpd_output: String,
    pub base_urls: Vec<String>,
    pub min_buffer_time_in_seconds: f64,
    pub default_language: String,
    pub target_segment_duration: f64,
}

#[derive(Clone, Debug)]
struct SegmentRecord {
    start: i64,
    duration: i64,
}

#[derive(Clone, Debug)]
struct Representation {
    media_info: MediaInfo,
    segments: Vec<SegmentRecord>,
}

#[derive(Default)]
struct MpdState {
    representations: Vec<Representation>,
}

pub struct MpdNotifier {
    options: MpdOptions,
    state: Mutex<MpdState>,
}

impl MpdNotifier {
    pub fn new(options: MpdOptions) -> Self {
        Self {
            options,
            state: Mutex::new(MpdState::default()),
        }
    }

    pub fn output(&self) -> &str {
        &self.options.mpd_output
    }

    /// Register a stream; returns the id used for segment notifications.
    pub fn notify_new_container(&self, media_info: &MediaInfo) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        state.representations.push(Representation {
            media_info: media_info.clone(),
            segments: Vec::new(),
        });
        let id = (state.representations.len() - 1) as u32;
        tracing::debug!(id, content_type = media_info.content_type(), "MPD container registered");
        Ok(id)
    }

    /// Refresh a stream's media info (final bandwidth/duration at flush).
    pub fn update_container(&self, id: u32, media_info: &MediaInfo) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let rep = state
            .representations
            .get_mut(id as usize)
            .ok_or_else(|| PackagerError::Internal(format!("Unknown MPD container id {id}")))?;
        rep.media_info = media_info.clone();
        Ok(())
    }

    pub fn notify_new_segment(&self, id: u32, start: i64, duration: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let rep = state
            .representations
            .get_mut(id as usize)
            .ok_or_else(|| PackagerError::Internal(format!("Unknown MPD container id {id}")))?;
        rep.segments.push(SegmentRecord { start, duration });
        Ok(())
    }

    /// Render and write the MPD.
    pub fn flush(&self) -> Result<()> {
        let xml = self.render();
        io::write_all(&self.options.mpd_output, xml.as_bytes())?;
        tracing::info!(output = %self.options.mpd_output, "MPD written");
        Ok(())
    }

    fn render(&self) -> String {
        let state = self.state.lock().unwrap();

        let duration = state
            .representations
            .iter()
            .map(|r| r.media_info.media_duration_seconds)
            .fold(0.0f64, f64::max);

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = write!(
            xml,
            "<!-- Generated with vessel version {} -->\n",
            version::library_version()
        );
        let _ = write!(
            xml,
            "<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\" minBufferTime=\"PT{}S\"",
            self.options.min_buffer_time_in_seconds
        );
        if self.options.on_demand {
            let _ = write!(
                xml,
                " type=\"static\" mediaPresentationDuration=\"PT{duration}S\" \
                 profiles=\"urn:mpeg:dash:profile:isoff-on-demand:2011\">\n"
            );
        } else {
            xml.push_str(
                " type=\"dynamic\" profiles=\"urn:mpeg:dash:profile:isoff-live:2011\">\n",
            );
        }
        for base_url in &self.options.base_urls {
            let _ = writeln!(xml, "  <BaseURL>{}</BaseURL>", escape(base_url));
        }
        xml.push_str("  <Period id=\"0\">\n");

        let mut adaptation_set_id = 0;
        for content_type in ["video", "audio", "text"] {
            let reps: Vec<(usize, &Representation)> = state
                .representations
                .iter()
                .enumerate()
                .filter(|(_, r)| r.media_info.content_type() == content_type)
                .collect();
            if reps.is_empty() {
                continue;
            }
            let _ = write!(
                xml,
                "    <AdaptationSet id=\"{adaptation_set_id}\" contentType=\"{content_type}\""
            );
            let language = reps
                .iter()
                .find_map(|(_, r)| rep_language(&r.media_info))
                .unwrap_or_else(|| self.options.default_language.clone());
            if !language.is_empty() {
                let _ = write!(xml, " lang=\"{}\"", escape(&language));
            }
            xml.push_str(">\n");

            for (id, rep) in reps {
                self.render_representation(&mut xml, id, rep);
            }
            xml.push_str("    </AdaptationSet>\n");
            adaptation_set_id += 1;
        }

        xml.push_str("  </Period>\n</MPD>\n");
        xml
    }

    fn render_representation(&self, xml: &mut String, id: usize, rep: &Representation) {
        let info = &rep.media_info;
        let _ = write!(
            xml,
            "      <Representation id=\"{id}\" bandwidth=\"{}\" mimeType=\"{}\"",
            info.bandwidth,
            mime_type(info)
        );
        if let Some(codec) = rep_codec(info) {
            let _ = write!(xml, " codecs=\"{}\"", escape(&codec));
        }
        if let Some(video) = &info.video_info {
            if video.width > 0 {
                let _ = write!(xml, " width=\"{}\" height=\"{}\"", video.width, video.height);
            }
        }
        xml.push_str(">\n");
        if info.protected {
            xml.push_str(
                "        <ContentProtection \
                 schemeIdUri=\"urn:mpeg:dash:mp4protection:2011\"/>\n",
            );
        }

        if !info.segment_template.is_empty() {
            let time_scale = segment_time_scale(info);
            let _ = write!(
                xml,
                "        <SegmentTemplate timescale=\"{time_scale}\" media=\"{}\"",
                escape(&info.segment_template)
            );
            if !info.init_segment_name.is_empty() {
                let _ = write!(
                    xml,
                    " initialization=\"{}\"",
                    escape(&info.init_segment_name)
                );
            }
            xml.push_str(" startNumber=\"1\">\n          <SegmentTimeline>\n");
            for segment in &rep.segments {
                let _ = writeln!(
                    xml,
                    "            <S t=\"{}\" d=\"{}\"/>",
                    segment.start, segment.duration
                );
            }
            xml.push_str("          </SegmentTimeline>\n        </SegmentTemplate>\n");
        } else if !info.media_file_name.is_empty() {
            let _ = writeln!(
                xml,
                "        <BaseURL>{}</BaseURL>",
                escape(&info.media_file_name)
            );
        }
        xml.push_str("      </Representation>\n");
    }
}

fn rep_language(info: &MediaInfo) -> Option<String> {
    let language = info
        .audio_info
        .as_ref()
        .map(|a| a.language.clone())
        .or_else(|| info.text_info.as_ref().map(|t| t.language.clone()))?;
    if language.is_empty() {
        None
    } else {
        Some(language)
    }
}

fn rep_codec(info: &MediaInfo) -> Option<String> {
    info.video_info
        .as_ref()
        .map(|v| v.codec.clone())
        .or_else(|| info.audio_info.as_ref().map(|a| a.codec.clone()))
        .or_else(|| info.text_info.as_ref().map(|t| t.codec.clone()))
        .filter(|c| !c.is_empty())
}

fn segment_time_scale(info: &MediaInfo) -> u32 {
    info.video_info
        .as_ref()
        .map(|v| v.time_scale)
        .or_else(|| info.audio_info.as_ref().map(|a| a.sampling_frequency))
        .filter(|ts| *ts > 0)
        .unwrap_or(1000)
}

fn mime_type(info: &MediaInfo) -> String {
    match info.container_type.as_str() {
        "mp4" => format!("{}/mp4", info.content_type()),
        "mpeg2ts" => "video/mp2t".to_string(),
        "webvtt" | "text" => "text/vtt".to_string(),
        "ttml" => "application/ttml+xml".to_string(),
        "aac" => "audio/aac".to_string(),
        "ac3" => "audio/ac3".to_string(),
        "eac3" => "audio/eac3".to_string(),
        "webm" => format!("{}/webm", info.content_type()),
        other => format!("application/{other}"),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
