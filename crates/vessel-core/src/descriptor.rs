//! User-facing packaging configuration.
//!
//! A packaging request is a list of [`StreamDescriptor`]s (one per requested
//! output track) plus one [`PackagingParams`] (global knobs).  Both are plain
//! data; the facade normalises them (callback-file rewriting, language
//! mapping) before any graph construction.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Describes a single requested output stream.
///
/// Immutable after facade normalisation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamDescriptor {
    /// Input source URI.  Usually a file path; `udp://` inputs are accepted.
    pub input: String,
    /// Selects a track within the input: `"audio"`, `"video"`, `"text"`, or a
    /// zero-based numeric index.
    pub stream_selector: String,
    /// Single-file output, or the init-segment path for segmented output.
    pub output: String,
    /// Segment file template with `$Number$` or `$Time$` placeholders.
    pub segment_template: String,
    /// Explicit output container name; inferred from file names when empty.
    pub output_format: String,
    /// Manifest bandwidth in bits per second.  Zero means unset.
    pub bandwidth: u32,
    /// BCP-47-ish language tag; normalised to ISO-639-2 by the facade.
    pub language: String,
    /// Trick-play decimation factor.  Zero marks the main track.
    pub trick_play_factor: u32,
    /// Leave this stream in the clear even when a key source is configured.
    pub skip_encryption: bool,
    /// Key-source grouping label override.
    pub drm_label: String,
    pub hls_group_id: String,
    pub hls_name: String,
    pub hls_playlist_name: String,
    pub hls_iframe_playlist_name: String,
}

// ─── Chunking ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingParams {
    pub segment_duration_in_seconds: f64,
    /// Zero disables subsegment (fragment) boundaries.
    pub subsegment_duration_in_seconds: f64,
    /// Force segments to begin on stream access points (key frames).
    pub segment_sap_aligned: bool,
    pub subsegment_sap_aligned: bool,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            segment_duration_in_seconds: 6.0,
            subsegment_duration_in_seconds: 0.0,
            segment_sap_aligned: true,
            subsegment_sap_aligned: true,
        }
    }
}

// ─── Encryption / decryption ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyProvider {
    #[default]
    None,
    RawKey,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionScheme {
    #[default]
    Cenc,
    Cbcs,
    AppleSampleAes,
}

/// One raw key entry, addressed by stream label.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawKey {
    pub key_id: Vec<u8>,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawKeyParams {
    /// Label → key.  The empty label is the fallback for unmatched streams.
    pub key_map: HashMap<String, RawKey>,
}

/// Attributes of a stream being encrypted, handed to the label function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptedStreamAttributes {
    Audio,
    Video { width: u32, height: u32 },
    Text,
}

/// Maps stream attributes to a key-source label.
pub type StreamLabelFn = Arc<dyn Fn(&EncryptedStreamAttributes) -> String + Send + Sync>;

#[derive(Clone, Default)]
pub struct EncryptionParams {
    pub key_provider: KeyProvider,
    pub protection_scheme: ProtectionScheme,
    pub raw_key: RawKeyParams,
    /// Caller-provided label function; a pixel-count based default is
    /// installed when absent.
    pub stream_label_func: Option<StreamLabelFn>,
    pub clear_lead_in_seconds: f64,
}

impl fmt::Debug for EncryptionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionParams")
            .field("key_provider", &self.key_provider)
            .field("protection_scheme", &self.protection_scheme)
            .field("raw_key", &self.raw_key)
            .field(
                "stream_label_func",
                &self.stream_label_func.as_ref().map(|_| "<fn>"),
            )
            .field("clear_lead_in_seconds", &self.clear_lead_in_seconds)
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptionParams {
    pub key_provider: KeyProvider,
    pub raw_key: RawKeyParams,
}

// ─── Output formats ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mp4OutputParams {
    pub include_pssh_in_stream: bool,
    /// Write `sidx` boxes for on-demand single-file output.
    pub generate_sidx_in_media_segments: bool,
}

impl Default for Mp4OutputParams {
    fn default() -> Self {
        Self {
            include_pssh_in_stream: true,
            generate_sidx_in_media_segments: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpdParams {
    pub mpd_output: String,
    pub base_urls: Vec<String>,
    pub min_buffer_time_in_seconds: f64,
    pub minimum_update_period_in_seconds: f64,
    pub time_shift_buffer_depth_in_seconds: f64,
    pub default_language: String,
    /// Emit a static MPD even when a segment template is used.
    pub generate_static_live_mpd: bool,
}

impl Default for MpdParams {
    fn default() -> Self {
        Self {
            mpd_output: String::new(),
            base_urls: Vec::new(),
            min_buffer_time_in_seconds: 2.0,
            minimum_update_period_in_seconds: 5.0,
            time_shift_buffer_depth_in_seconds: 1800.0,
            default_language: String::new(),
            generate_static_live_mpd: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HlsPlaylistType {
    #[default]
    Vod,
    Event,
    Live,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsParams {
    pub master_playlist_output: String,
    pub playlist_type: HlsPlaylistType,
    /// Prefixed to segment URIs in media playlists.
    pub base_url: String,
    pub time_shift_buffer_depth: f64,
    pub default_language: String,
}

// ─── Ad cues ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cuepoint {
    pub start_time_in_seconds: f64,
    pub duration_in_seconds: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdCueGeneratorParams {
    pub cue_points: Vec<Cuepoint>,
}

// ─── Buffer callbacks ───────────────────────────────────────────────────────

/// Read callback: `(name, buffer) -> bytes read`, negative on failure, zero
/// at end of stream.
pub type ReadCallback = Arc<dyn Fn(&str, &mut [u8]) -> i64 + Send + Sync>;
/// Write callback: `(name, data) -> bytes written`, negative on failure.
pub type WriteCallback = Arc<dyn Fn(&str, &[u8]) -> i64 + Send + Sync>;

#[derive(Clone, Default)]
pub struct BufferCallbackParams {
    pub read_func: Option<ReadCallback>,
    pub write_func: Option<WriteCallback>,
}

impl BufferCallbackParams {
    pub fn is_configured(&self) -> bool {
        self.read_func.is_some() || self.write_func.is_some()
    }
}

impl fmt::Debug for BufferCallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCallbackParams")
            .field("read_func", &self.read_func.as_ref().map(|_| "<fn>"))
            .field("write_func", &self.write_func.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

// ─── Test hooks ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestParams {
    /// Log discovered stream info instead of requiring outputs.
    pub dump_stream_info: bool,
    /// Overrides the library version reported in manifests.
    pub injected_library_version: String,
}

// ─── Top level ──────────────────────────────────────────────────────────────

/// Global packaging parameters shared by all streams of one request.
#[derive(Clone, Debug, Default)]
pub struct PackagingParams {
    pub chunking_params: ChunkingParams,
    pub encryption_params: EncryptionParams,
    pub decryption_params: DecryptionParams,
    pub mp4_output_params: Mp4OutputParams,
    pub mpd_params: MpdParams,
    pub hls_params: HlsParams,
    pub ad_cue_generator_params: AdCueGeneratorParams,
    pub buffer_callback_params: BufferCallbackParams,
    pub test_params: TestParams,
    /// Scratch directory for muxers.  Empty uses the output directory.
    pub temp_dir: String,
    /// Dump a `<output>.media_info` file next to each on-demand output.
    pub output_media_info: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_are_empty() {
        let d = StreamDescriptor::default();
        assert!(d.input.is_empty());
        assert_eq!(d.trick_play_factor, 0);
        assert!(!d.skip_encryption);
    }

    #[test]
    fn chunking_defaults_are_sap_aligned() {
        let c = ChunkingParams::default();
        assert!(c.segment_sap_aligned);
        assert!(c.subsegment_sap_aligned);
        assert_eq!(c.segment_duration_in_seconds, 6.0);
    }

    #[test]
    fn descriptor_round_trips_through_serde() {
        let d = StreamDescriptor {
            input: "in.mp4".into(),
            stream_selector: "video".into(),
            segment_template: "seg-$Number$.m4s".into(),
            trick_play_factor: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&d).expect("serialize");
        let back: StreamDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(d, back);
    }

    #[test]
    fn callback_params_report_configuration() {
        let mut p = BufferCallbackParams::default();
        assert!(!p.is_configured());
        p.write_func = Some(Arc::new(|_, data| data.len() as i64));
        assert!(p.is_configured());
    }
}
