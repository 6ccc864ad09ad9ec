//! Encryption handler and key sources.
//!
//! The handler binds a stream to a key via the stream-label function, marks
//! stream info and segment info as protected, and stamps the resolved scheme.
//! Byte-level sample transformation belongs to the crypto collaborator behind
//! the [`KeySource`] seam.

use std::sync::{Arc, Mutex};

use vessel_core::descriptor::{
    EncryptedStreamAttributes, EncryptionParams, ProtectionScheme, RawKeyParams,
};
use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{MediaHandler, OutputSlot, StreamData, StreamType};

const NAME: &str = "encryptor";

/// One resolved content key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionKey {
    pub key_id: Vec<u8>,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Provides content keys by stream label.  Must be safe for concurrent
/// `get_key` calls; one handler per chain may fetch from its own thread.
pub trait KeySource: Send + Sync {
    fn get_key(&self, label: &str) -> Result<EncryptionKey>;
}

/// Key source over a fixed label → key map supplied in the packaging params.
#[derive(Debug)]
pub struct RawKeySource {
    params: RawKeyParams,
}

impl RawKeySource {
    pub fn new(params: &RawKeyParams) -> Result<Self> {
        if params.key_map.is_empty() {
            return Err(PackagerError::KeyFailure(
                "Raw key source requires at least one key".into(),
            ));
        }
        for (label, key) in &params.key_map {
            if key.key.is_empty() || key.key_id.is_empty() {
                return Err(PackagerError::KeyFailure(format!(
                    "Raw key for label '{label}' is missing key or key id"
                )));
            }
        }
        Ok(Self {
            params: params.clone(),
        })
    }
}

impl KeySource for RawKeySource {
    fn get_key(&self, label: &str) -> Result<EncryptionKey> {
        // Fall back to the empty label for unmatched streams.
        let raw = self
            .params
            .key_map
            .get(label)
            .or_else(|| self.params.key_map.get(""))
            .ok_or_else(|| {
                PackagerError::KeyFailure(format!("No raw key configured for label '{label}'"))
            })?;
        Ok(EncryptionKey {
            key_id: raw.key_id.clone(),
            key: raw.key.clone(),
            iv: raw.iv.clone(),
        })
    }
}

/// Classify a stream for key selection: audio in one bucket, video bucketed
/// by pixel count.
pub fn default_stream_label(
    max_sd_pixels: u64,
    max_hd_pixels: u64,
    max_uhd1_pixels: u64,
    attributes: &EncryptedStreamAttributes,
) -> String {
    match attributes {
        EncryptedStreamAttributes::Audio => "AUDIO".to_string(),
        EncryptedStreamAttributes::Video { width, height } => {
            let pixels = *width as u64 * *height as u64;
            if pixels <= max_sd_pixels {
                "SD".to_string()
            } else if pixels <= max_hd_pixels {
                "HD".to_string()
            } else if pixels <= max_uhd1_pixels {
                "UHD1".to_string()
            } else {
                "UHD2".to_string()
            }
        }
        EncryptedStreamAttributes::Text => String::new(),
    }
}

#[derive(Default)]
struct EncryptionState {
    key: Option<EncryptionKey>,
    label: String,
}

/// Marks a stream as protected under the resolved scheme and key.
pub struct EncryptionHandler {
    params: EncryptionParams,
    key_source: Arc<dyn KeySource>,
    state: Mutex<EncryptionState>,
    next: OutputSlot,
}

impl EncryptionHandler {
    /// `params` must already carry the per-stream overrides (scheme forcing,
    /// label function) applied by the graph builder.
    pub fn new(params: EncryptionParams, key_source: Arc<dyn KeySource>) -> Self {
        Self {
            params,
            key_source,
            state: Mutex::new(EncryptionState::default()),
            next: OutputSlot::new(),
        }
    }

    pub fn protection_scheme(&self) -> ProtectionScheme {
        self.params.protection_scheme
    }

    /// Label the stream and fetch its key.  Resolution order: the builder's
    /// label function, else the built-in pixel-count default.
    fn bind_key(&self, attributes: &EncryptedStreamAttributes) -> Result<EncryptionKey> {
        const DEFAULT_MAX_SD_PIXELS: u64 = 768 * 576;
        const DEFAULT_MAX_HD_PIXELS: u64 = 1920 * 1080;
        const DEFAULT_MAX_UHD1_PIXELS: u64 = 4096 * 2160;

        let label = match &self.params.stream_label_func {
            Some(func) => func(attributes),
            None => default_stream_label(
                DEFAULT_MAX_SD_PIXELS,
                DEFAULT_MAX_HD_PIXELS,
                DEFAULT_MAX_UHD1_PIXELS,
                attributes,
            ),
        };
        let key = self.key_source.get_key(&label)?;
        let mut state = self.state.lock().unwrap();
        state.label = label;
        state.key = Some(key.clone());
        Ok(key)
    }
}

impl MediaHandler for EncryptionHandler {
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
            StreamData::StreamInfo(info) => {
                let attributes = match info.stream_type {
                    StreamType::Audio => EncryptedStreamAttributes::Audio,
                    StreamType::Video => EncryptedStreamAttributes::Video {
                        width: info.width,
                        height: info.height,
                    },
                    StreamType::Text => EncryptedStreamAttributes::Text,
                };
                let key = self.bind_key(&attributes)?;
                tracing::debug!(
                    label = %self.state.lock().unwrap().label,
                    scheme = ?self.params.protection_scheme,
                    key_id_len = key.key_id.len(),
                    "Bound stream to content key"
                );

                let mut protected = (*info).clone();
                protected.is_encrypted = true;
                self.next
                    .send(NAME, StreamData::StreamInfo(Arc::new(protected)))
            }
            StreamData::SegmentInfo(mut info) => {
                info.is_encrypted = true;
                self.next.send(NAME, StreamData::SegmentInfo(info))
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
    use std::collections::HashMap;
    use vessel_core::descriptor::RawKey;
    use vessel_core::handler::{SegmentInfo, StreamInfo};

    fn raw_params(labels: &[&str]) -> RawKeyParams {
        let mut key_map = HashMap::new();
        for label in labels {
            key_map.insert(
                label.to_string(),
                RawKey {
                    key_id: vec![1; 16],
                    key: vec![2; 16],
                    iv: vec![3; 8],
                },
            );
        }
        RawKeyParams { key_map }
    }

    #[derive(Default)]
    struct Collector {
        infos: Mutex<Vec<StreamInfo>>,
        segments: Mutex<Vec<SegmentInfo>>,
    }

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
            match data {
                StreamData::StreamInfo(i) => self.infos.lock().unwrap().push((*i).clone()),
                StreamData::SegmentInfo(s) => self.segments.lock().unwrap().push(s),
                _ => {}
            }
            Ok(())
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn default_labels_bucket_by_pixel_count() {
        let sd = 768 * 576;
        let hd = 1920 * 1080;
        let uhd1 = 4096 * 2160;
        let label = |w, h| {
            default_stream_label(
                sd,
                hd,
                uhd1,
                &EncryptedStreamAttributes::Video {
                    width: w,
                    height: h,
                },
            )
        };
        assert_eq!(label(640, 480), "SD");
        assert_eq!(label(1920, 1080), "HD");
        assert_eq!(label(3840, 2160), "UHD1");
        assert_eq!(label(7680, 4320), "UHD2");
        assert_eq!(
            default_stream_label(sd, hd, uhd1, &EncryptedStreamAttributes::Audio),
            "AUDIO"
        );
    }

    #[test]
    fn raw_key_source_falls_back_to_the_empty_label() {
        let source = RawKeySource::new(&raw_params(&[""])).unwrap();
        source.get_key("HD").expect("fallback key");

        let source = RawKeySource::new(&raw_params(&["SD"])).unwrap();
        let err = source.get_key("HD").expect_err("no fallback configured");
        assert!(err.to_string().contains("No raw key"));
    }

    #[test]
    fn empty_raw_key_map_is_rejected() {
        let err = RawKeySource::new(&RawKeyParams::default()).expect_err("must fail");
        assert!(err.to_string().contains("at least one key"));
    }

    #[test]
    fn stream_and_segments_are_marked_protected() {
        let source: Arc<dyn KeySource> = Arc::new(RawKeySource::new(&raw_params(&[""])).unwrap());
        let handler = EncryptionHandler::new(EncryptionParams::default(), source);
        let sink = Arc::new(Collector::default());
        handler.connect(sink.clone()).unwrap();

        let mut info = StreamInfo::new(StreamType::Video, 90_000, "avc1");
        info.width = 1280;
        info.height = 720;
        handler
            .handle(StreamData::StreamInfo(Arc::new(info)))
            .unwrap();
        handler
            .handle(StreamData::SegmentInfo(SegmentInfo {
                start: 0,
                duration: 1000,
                number: 1,
                is_subsegment: false,
                is_encrypted: false,
            }))
            .unwrap();

        assert!(sink.infos.lock().unwrap()[0].is_encrypted);
        assert!(sink.segments.lock().unwrap()[0].is_encrypted);
    }

    #[test]
    fn drm_label_style_constant_function_wins() {
        let source: Arc<dyn KeySource> =
            Arc::new(RawKeySource::new(&raw_params(&["MY_LABEL"])).unwrap());
        let mut params = EncryptionParams::default();
        params.stream_label_func = Some(Arc::new(|_| "MY_LABEL".to_string()));
        let handler = EncryptionHandler::new(params, source);
        let sink = Arc::new(Collector::default());
        handler.connect(sink).unwrap();

        handler
            .handle(StreamData::StreamInfo(Arc::new(StreamInfo::new(
                StreamType::Audio,
                48_000,
                "mp4a",
            ))))
            .expect("constant label must resolve against the key map");
    }
}
