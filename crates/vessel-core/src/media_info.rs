//! Manifest-facing description of one packaged stream.
//!
//! Muxers assemble a [`MediaInfo`] when a stream finishes (or, for the text
//! passthrough path, the builder synthesises one up front) and hand it to the
//! manifest notifiers.  The same structure serialises to
//! `<output>.media_info` when media-info dumping is enabled.

use serde::{Deserialize, Serialize};

use crate::handler::{StreamInfo, StreamType};

/// Bandwidth assumed for whole-file text streams when the descriptor does not
/// provide one.  Text files are small and served in one request, so any
/// reasonable value works.
pub const DEFAULT_TEXT_BANDWIDTH: u32 = 256;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioInfo {
    pub codec: String,
    pub sampling_frequency: u32,
    pub language: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub time_scale: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextInfo {
    pub codec: String,
    pub language: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaInfo {
    pub media_file_name: String,
    pub init_segment_name: String,
    pub segment_template: String,
    pub container_type: String,
    pub bandwidth: u32,
    pub media_duration_seconds: f64,
    pub protected: bool,
    pub audio_info: Option<AudioInfo>,
    pub video_info: Option<VideoInfo>,
    pub text_info: Option<TextInfo>,
}

impl MediaInfo {
    /// Build the stream-type specific section from a live [`StreamInfo`].
    pub fn apply_stream_info(&mut self, info: &StreamInfo) {
        self.protected = info.is_encrypted;
        match info.stream_type {
            StreamType::Audio => {
                self.audio_info = Some(AudioInfo {
                    codec: info.codec.clone(),
                    sampling_frequency: info.time_scale,
                    language: info.language.clone(),
                });
            }
            StreamType::Video => {
                self.video_info = Some(VideoInfo {
                    codec: info.codec.clone(),
                    width: info.width,
                    height: info.height,
                    time_scale: info.time_scale,
                });
            }
            StreamType::Text => {
                self.text_info = Some(TextInfo {
                    codec: info.codec.clone(),
                    language: info.language.clone(),
                });
            }
        }
    }

    /// Content type as used by MPD adaptation sets and HLS media tags.
    pub fn content_type(&self) -> &'static str {
        if self.video_info.is_some() {
            "video"
        } else if self.audio_info.is_some() {
            "audio"
        } else {
            "text"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_info_populates_the_matching_section() {
        let mut media_info = MediaInfo::default();
        let mut info = StreamInfo::new(StreamType::Video, 90_000, "avc1.640028");
        info.width = 1920;
        info.height = 1080;
        media_info.apply_stream_info(&info);

        let video = media_info.video_info.as_ref().expect("video info");
        assert_eq!(video.width, 1920);
        assert_eq!(media_info.content_type(), "video");
        assert!(media_info.audio_info.is_none());
    }

    #[test]
    fn content_type_defaults_to_text() {
        assert_eq!(MediaInfo::default().content_type(), "text");
    }
}
