//! Media container tags and detection.
//!
//! A container can be named three ways: explicitly (`output_format`), by the
//! extension of an output or segment-template file name, or by sniffing the
//! first bytes of an input file.  All three funnel into [`MediaContainer`].

use serde::{Deserialize, Serialize};

/// Closed set of container formats the engine routes on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaContainer {
    #[default]
    Unknown,
    Mp4,
    Mpeg2Ts,
    WebVtt,
    Ttml,
    Aac,
    Ac3,
    Eac3,
    WebM,
}

impl MediaContainer {
    /// Resolve an explicit format name, e.g. the `output_format` descriptor
    /// field.  Unknown names map to [`MediaContainer::Unknown`].
    pub fn from_format_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "mp4" | "mov" | "m4s" => Self::Mp4,
            "ts" | "mpeg2ts" => Self::Mpeg2Ts,
            "vtt" | "webvtt" => Self::WebVtt,
            "ttml" => Self::Ttml,
            "aac" => Self::Aac,
            "ac3" => Self::Ac3,
            "ec3" | "eac3" => Self::Eac3,
            "webm" => Self::WebM,
            _ => Self::Unknown,
        }
    }

    /// Infer a container from a file name's extension.
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = match file_name.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => return Self::Unknown,
        };
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "m4s" | "m4a" | "m4v" | "mov" => Self::Mp4,
            "ts" | "m2t" | "m2ts" => Self::Mpeg2Ts,
            "vtt" | "webvtt" => Self::WebVtt,
            "ttml" => Self::Ttml,
            "aac" => Self::Aac,
            "ac3" => Self::Ac3,
            "ec3" | "eac3" => Self::Eac3,
            "webm" => Self::WebM,
            _ => Self::Unknown,
        }
    }

    /// Sniff a container from the head bytes of a file.
    ///
    /// Detection is ordered from most to least specific magic.
    pub fn sniff(head: &[u8]) -> Self {
        // Strip a UTF-8 BOM for the text formats.
        let text_head = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);

        if text_head.starts_with(b"WEBVTT") {
            return Self::WebVtt;
        }
        if head.len() >= 8 && &head[4..8] == b"ftyp" {
            return Self::Mp4;
        }
        if head.starts_with(b"\x1A\x45\xDF\xA3") {
            return Self::WebM;
        }
        // MPEG-2 TS sync bytes repeat every 188 bytes.
        if head.len() >= 189 && head[0] == 0x47 && head[188] == 0x47 {
            return Self::Mpeg2Ts;
        }
        if looks_like_ttml(text_head) {
            return Self::Ttml;
        }
        // ADTS sync word: 12 set bits.
        if head.len() >= 2 && head[0] == 0xFF && (head[1] & 0xF0) == 0xF0 {
            return Self::Aac;
        }
        Self::Unknown
    }

    /// `true` for the packed-audio formats that are self-initializing and
    /// therefore must not carry an init segment.
    pub fn is_packed_audio(self) -> bool {
        matches!(self, Self::Aac | Self::Ac3 | Self::Eac3)
    }

    /// Manifest-facing name of the container.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Mp4 => "mp4",
            Self::Mpeg2Ts => "mpeg2ts",
            Self::WebVtt => "webvtt",
            Self::Ttml => "ttml",
            Self::Aac => "aac",
            Self::Ac3 => "ac3",
            Self::Eac3 => "eac3",
            Self::WebM => "webm",
        }
    }
}

fn looks_like_ttml(head: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let trimmed = text.trim_start();
    trimmed.starts_with("<tt") || (trimmed.starts_with("<?xml") && text.contains("<tt"))
}
