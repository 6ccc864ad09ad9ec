//! The packager facade.
//!
//! Lifecycle: `Uninitialized → Initialized → Running → Completed`, with
//! `Cancelled` reachable from any state after initialization.  `initialize`
//! validates, normalises descriptors, builds the notifiers and the whole
//! handler graph; `run` blocks until every job finishes and then flushes the
//! manifests; `cancel` asks every running root to stop.

use std::sync::{Arc, Mutex, Once};

use tracing::{debug, info};

use vessel_core::descriptor::{EncryptedStreamAttributes, KeyProvider};
use vessel_core::error::{PackagerError, Result};
use vessel_core::io;
use vessel_core::language;
use vessel_core::{PackagingParams, StreamDescriptor};
use vessel_media::encryption::{self, KeySource, RawKeySource};
use vessel_media::sync_point_queue::SyncPointQueue;

use crate::builder::create_all_jobs;
use crate::hls::HlsNotifier;
use crate::job_manager::JobManager;
use crate::listener::MuxerListenerFactory;
use crate::mpd::{MpdNotifier, MpdOptions};
use crate::validate::validate_params;
use crate::version;

/// One-shot process-wide setup (file-callback registry, version plumbing).
/// Idempotent; guarded by a process-lifetime latch.
fn process_global_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        debug!(version = %version::library_version(), "Packaging engine process state initialized");
    });
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initialized,
    Running,
    Completed,
    Cancelled,
}

struct PackagerInternal {
    job_manager: Arc<JobManager>,
    mpd_notifier: Option<Arc<MpdNotifier>>,
    hls_notifier: Option<Arc<HlsNotifier>>,
    #[allow(dead_code)]
    encryption_key_source: Option<Arc<dyn KeySource>>,
}

/// The public entry point of the packaging engine.
pub struct Packager {
    state: Mutex<Lifecycle>,
    internal: Mutex<Option<Arc<PackagerInternal>>>,
}

impl Default for Packager {
    fn default() -> Self {
        Self::new()
    }
}

impl Packager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Lifecycle::Uninitialized),
            internal: Mutex::new(None),
        }
    }

    /// Validate the request and build the full processing graph.
    ///
    /// Nothing is constructed when validation fails.  Calling this twice is
    /// an error.
    pub fn initialize(
        &self,
        packaging_params: &PackagingParams,
        stream_descriptors: &[StreamDescriptor],
    ) -> Result<()> {
        process_global_init();

        {
            let state = self.state.lock().unwrap();
            if *state != Lifecycle::Uninitialized {
                return Err(PackagerError::InvalidArgument("Already initialized.".into()));
            }
        }

        validate_params(packaging_params, stream_descriptors)?;

        if !packaging_params
            .test_params
            .injected_library_version
            .is_empty()
        {
            version::set_version_for_testing(
                &packaging_params.test_params.injected_library_version,
            );
        }

        // Create the encryption key source if needed.
        let encryption_key_source: Option<Arc<dyn KeySource>> =
            if packaging_params.encryption_params.key_provider != KeyProvider::None {
                let source = RawKeySource::new(&packaging_params.encryption_params.raw_key)
                    .map_err(|_| {
                        PackagerError::InvalidArgument("Failed to create key source.".into())
                    })?;
                Some(Arc::new(source))
            } else {
                None
            };

        // Route MPD/HLS outputs through the callback registry when the host
        // supplied buffer callbacks.
        let callback_id = packaging_params
            .buffer_callback_params
            .is_configured()
            .then(|| io::register_callbacks(&packaging_params.buffer_callback_params));

        let mut mpd_params = packaging_params.mpd_params.clone();
        let mut hls_params = packaging_params.hls_params.clone();
        if packaging_params.buffer_callback_params.write_func.is_some() {
            let id = callback_id.unwrap();
            mpd_params.mpd_output = io::make_callback_file_name(id, &mpd_params.mpd_output);
            hls_params.master_playlist_output =
                io::make_callback_file_name(id, &hls_params.master_playlist_output);
        }

        // DASH and HLS both want RFC 5646 languages in the shortest form.
        mpd_params.default_language = language::shortest_form(&mpd_params.default_language);
        hls_params.default_language = language::shortest_form(&hls_params.default_language);

        let on_demand_dash_profile = stream_descriptors[0].segment_template.is_empty();

        let mpd_notifier = if !mpd_params.mpd_output.is_empty() {
            Some(Arc::new(MpdNotifier::new(MpdOptions {
                on_demand: on_demand_dash_profile,
                mpd_output: mpd_params.mpd_output.clone(),
                base_urls: mpd_params.base_urls.clone(),
                min_buffer_time_in_seconds: mpd_params.min_buffer_time_in_seconds,
                default_language: mpd_params.default_language.clone(),
                target_segment_duration: packaging_params
                    .chunking_params
                    .segment_duration_in_seconds,
            })))
        } else {
            None
        };
        let hls_notifier = if !hls_params.master_playlist_output.is_empty() {
            Some(Arc::new(HlsNotifier::new(hls_params)))
        } else {
            None
        };

        let sync_points = if !packaging_params
            .ad_cue_generator_params
            .cue_points
            .is_empty()
        {
            Some(Arc::new(SyncPointQueue::new(
                &packaging_params.ad_cue_generator_params,
            )))
        } else {
            None
        };
        let job_manager = Arc::new(JobManager::new(sync_points.clone()));

        // Normalise the descriptors: callback-file rewriting plus language
        // mapping.  Work on copies; the caller's descriptors stay untouched.
        let mut streams_for_jobs = Vec::with_capacity(stream_descriptors.len());
        for descriptor in stream_descriptors {
            let mut copy = descriptor.clone();

            if packaging_params.buffer_callback_params.read_func.is_some() {
                let id = callback_id.unwrap();
                copy.input = io::make_callback_file_name(id, &descriptor.input);
            }
            if packaging_params.buffer_callback_params.write_func.is_some() {
                let id = callback_id.unwrap();
                copy.output = io::make_callback_file_name(id, &descriptor.output);
                copy.segment_template =
                    io::make_callback_file_name(id, &descriptor.segment_template);
            }

            if !copy.language.is_empty() {
                copy.language = language::to_iso_639_2(&descriptor.language);
                if copy.language == "und" {
                    return Err(PackagerError::InvalidArgument(format!(
                        "Unknown/invalid language specified: {}",
                        descriptor.language
                    )));
                }
            }

            streams_for_jobs.push(copy);
        }

        let muxer_listener_factory = MuxerListenerFactory::new(
            packaging_params.output_media_info,
            mpd_notifier.clone(),
            hls_notifier.clone(),
        );

        create_all_jobs(
            &streams_for_jobs,
            packaging_params,
            mpd_notifier.as_ref(),
            encryption_key_source.as_ref(),
            sync_points.as_ref(),
            &muxer_listener_factory,
            &job_manager,
        )?;

        *self.internal.lock().unwrap() = Some(Arc::new(PackagerInternal {
            job_manager,
            mpd_notifier,
            hls_notifier,
            encryption_key_source,
        }));
        *self.state.lock().unwrap() = Lifecycle::Initialized;
        info!(
            streams = stream_descriptors.len(),
            on_demand = on_demand_dash_profile,
            "Packager initialized"
        );
        Ok(())
    }

    /// Run all jobs to completion, then flush the HLS and MPD manifests in
    /// that order.  Blocks.
    pub fn run(&self) -> Result<()> {
        let internal = {
            let mut state = self.state.lock().unwrap();
            match *state {
                Lifecycle::Initialized => {}
                Lifecycle::Uninitialized => {
                    return Err(PackagerError::InvalidArgument("Not yet initialized.".into()));
                }
                _ => {
                    return Err(PackagerError::InvalidArgument(
                        "Packager can only run once.".into(),
                    ));
                }
            }
            let Some(internal) = self.internal.lock().unwrap().clone() else {
                return Err(PackagerError::Internal(
                    "Initialized state without internal resources".into(),
                ));
            };
            *state = Lifecycle::Running;
            internal
        };

        let result = internal.job_manager.run_jobs().and_then(|()| {
            // HLS first, then MPD.
            if let Some(hls) = &internal.hls_notifier {
                hls.flush()?;
            }
            if let Some(mpd) = &internal.mpd_notifier {
                mpd.flush()?;
            }
            Ok(())
        });

        let final_state = match &result {
            Err(e) if e.is_cancellation() => Lifecycle::Cancelled,
            _ => Lifecycle::Completed,
        };
        *self.state.lock().unwrap() = final_state;
        if result.is_ok() {
            info!("Packaging complete");
        }
        result
    }

    /// Signal all running jobs to stop.  Permitted in any state; a no-op
    /// before initialization.
    pub fn cancel(&self) {
        let internal = self.internal.lock().unwrap().clone();
        match internal {
            None => {
                info!("Not yet initialized. Return directly.");
            }
            Some(internal) => {
                *self.state.lock().unwrap() = Lifecycle::Cancelled;
                internal.job_manager.cancel_jobs();
            }
        }
    }

    /// The engine version reported in manifests.
    pub fn library_version() -> String {
        version::library_version()
    }

    /// Default stream-label classification used by encryption when the caller
    /// supplies no label function.
    pub fn default_stream_label(
        max_sd_pixels: u64,
        max_hd_pixels: u64,
        max_uhd1_pixels: u64,
        stream_attributes: &EncryptedStreamAttributes,
    ) -> String {
        encryption::default_stream_label(
            max_sd_pixels,
            max_hd_pixels,
            max_uhd1_pixels,
            stream_attributes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_before_initialize_is_rejected() {
        let packager = Packager::new();
        let err = packager.run().expect_err("must fail");
        assert!(err.to_string().contains("Not yet initialized."));
    }

    #[test]
    fn cancel_before_initialize_is_a_noop() {
        let packager = Packager::new();
        packager.cancel();
        let err = packager.run().expect_err("still uninitialized");
        assert!(err.to_string().contains("Not yet initialized."));
    }

    #[test]
    fn failed_validation_leaves_the_packager_uninitialized() {
        let packager = Packager::new();
        let err = packager
            .initialize(&PackagingParams::default(), &[])
            .expect_err("empty descriptors");
        assert!(err.to_string().contains("cannot be empty"));

        // Still uninitialized: a second initialize attempt gets the same
        // validation error, not "Already initialized".
        let err = packager
            .initialize(&PackagingParams::default(), &[])
            .expect_err("empty descriptors again");
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn default_stream_label_is_exposed_on_the_facade() {
        assert_eq!(
            Packager::default_stream_label(1, 2, 3, &EncryptedStreamAttributes::Audio),
            "AUDIO"
        );
    }

    #[test]
    fn library_version_is_reported() {
        assert!(!Packager::library_version().is_empty());
    }
}
