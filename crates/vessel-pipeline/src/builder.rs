//! Graph construction: the pipeline compiler.
//!
//! Turns validated descriptors into wired handler trees and registers their
//! roots with the job manager.  Ordering is load-bearing:
//!
//! 1. Text and audio/video streams build through different pipelines.
//! 2. A/V streams are walked in sorted order (input, selector, main track
//!    before trick-play branches) so that demuxers are shared per input and
//!    replicators per (input, selector), and every trick-play branch finds
//!    its replicator already built.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use vessel_core::container::MediaContainer;
use vessel_core::descriptor::{KeyProvider, PackagingParams, ProtectionScheme, StreamDescriptor};
use vessel_core::error::{PackagerError, Result};
use vessel_core::handler::{chain, MediaHandler};
use vessel_core::io;
use vessel_core::media_info::{MediaInfo, TextInfo, DEFAULT_TEXT_BANDWIDTH};
use vessel_media::chunking::ChunkingHandler;
use vessel_media::cue_alignment::CueAlignmentHandler;
use vessel_media::demuxer::Demuxer;
use vessel_media::encryption::{EncryptionHandler, KeySource, RawKeySource};
use vessel_media::muxer::{Muxer, MuxerOptions};
use vessel_media::replicator::Replicator;
use vessel_media::sync_point_queue::SyncPointQueue;
use vessel_media::text::{
    TextChunker, TextPadder, WebVttParser, WebVttTextOutputHandler, WebVttToMp4Handler,
};
use vessel_media::trick_play::TrickPlayHandler;

use crate::format::get_output_format;
use crate::job_manager::JobManager;
use crate::listener::{write_media_info_dump, MuxerListenerFactory, StreamListenerData};
use crate::mpd::MpdNotifier;

/// Split a request into text streams and audio/video streams.
pub fn partition(
    descriptors: &[StreamDescriptor],
) -> (Vec<&StreamDescriptor>, Vec<&StreamDescriptor>) {
    let mut text_streams = Vec::new();
    let mut audio_video_streams = Vec::new();
    for stream in descriptors {
        if stream.stream_selector == "text" {
            text_streams.push(stream);
        } else {
            audio_video_streams.push(stream);
        }
    }
    (text_streams, audio_video_streams)
}

/// Total order over A/V descriptors: input, then selector, then the main
/// track ahead of every trick-play branch, larger factors first.  The main
/// track must be walked first so its replicator exists before trick-play
/// branches attach.
pub fn stream_descriptor_order(a: &StreamDescriptor, b: &StreamDescriptor) -> Ordering {
    match a.input.cmp(&b.input) {
        Ordering::Equal => {}
        other => return other,
    }
    match a.stream_selector.cmp(&b.stream_selector) {
        Ordering::Equal => {}
        other => return other,
    }
    if a.trick_play_factor == 0 || b.trick_play_factor == 0 {
        a.trick_play_factor.cmp(&b.trick_play_factor)
    } else {
        b.trick_play_factor.cmp(&a.trick_play_factor)
    }
}

fn create_muxer_options(
    stream: &StreamDescriptor,
    params: &PackagingParams,
    representation_id: &str,
) -> MuxerOptions {
    MuxerOptions {
        mp4_params: params.mp4_output_params.clone(),
        temp_dir: params.temp_dir.clone(),
        bandwidth: stream.bandwidth,
        output_file_name: stream.output.clone(),
        segment_template: stream.segment_template.clone(),
        representation_id: representation_id.to_string(),
    }
}

/// Hand out request-unique representation ids in build order.
fn next_representation_id(index: &mut u32) -> String {
    let id = *index;
    *index += 1;
    id.to_string()
}

/// Build the demuxer for one input, including its decryption key source.
fn create_demuxer(stream: &StreamDescriptor, params: &PackagingParams) -> Result<Demuxer> {
    let mut demuxer = Demuxer::new(&stream.input);
    demuxer.set_dump_stream_info(params.test_params.dump_stream_info);

    if params.decryption_params.key_provider != KeyProvider::None {
        let key_source = RawKeySource::new(&params.decryption_params.raw_key).map_err(|_| {
            PackagerError::InvalidArgument(
                "Must define decryption key source when defining key provider".into(),
            )
        })?;
        demuxer.set_key_source(Arc::new(key_source));
    }
    Ok(demuxer)
}

/// §4.6: build the encryption stage for one stream, or `None`.
fn create_encryption_handler(
    params: &PackagingParams,
    stream: &StreamDescriptor,
    key_source: Option<&Arc<dyn KeySource>>,
) -> Result<Option<Arc<dyn MediaHandler>>> {
    if stream.skip_encryption {
        return Ok(None);
    }
    let Some(key_source) = key_source else {
        return Ok(None);
    };

    // Copy so the overrides stay specific to this stream.
    let mut encryption_params = params.encryption_params.clone();

    // Only Sample AES is valid inside MPEG2-TS and packed audio.
    let format = get_output_format(stream);
    if format == MediaContainer::Mpeg2Ts || format.is_packed_audio() {
        debug!("Using Apple Sample AES encryption for MPEG2-TS or packed audio");
        encryption_params.protection_scheme = ProtectionScheme::AppleSampleAes;
    }

    if !stream.drm_label.is_empty() {
        let drm_label = stream.drm_label.clone();
        encryption_params.stream_label_func = Some(Arc::new(move |_| drm_label.clone()));
    }
    // With no label function configured the handler falls back to the
    // SD/HD/UHD pixel-count default.

    Ok(Some(Arc::new(EncryptionHandler::new(
        encryption_params,
        Arc::clone(key_source),
    ))))
}

/// Construction statistics, for logging and graph-shape tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AvBuildStats {
    pub demuxers: usize,
    pub replicators: usize,
    pub muxers: usize,
    pub trick_play_handlers: usize,
    pub cue_aligners: usize,
}

/// Build the audio/video jobs.  `streams` must already be sorted by
/// [`stream_descriptor_order`].
pub fn create_audio_video_jobs(
    streams: &[&StreamDescriptor],
    params: &PackagingParams,
    encryption_key_source: Option<&Arc<dyn KeySource>>,
    sync_points: Option<&Arc<SyncPointQueue>>,
    muxer_listener_factory: &MuxerListenerFactory,
    job_manager: &JobManager,
    representation_index: &mut u32,
) -> Result<AvBuildStats> {
    let mut stats = AvBuildStats::default();

    // One demuxer per distinct input, and one cue aligner per input when a
    // sync-point queue exists.  BTreeMaps keep job registration
    // deterministic.
    let mut sources: BTreeMap<String, Arc<Demuxer>> = BTreeMap::new();
    let mut cue_aligners: BTreeMap<String, Option<Arc<CueAlignmentHandler>>> = BTreeMap::new();
    for stream in streams {
        if sources.contains_key(&stream.input) {
            continue;
        }
        let demuxer = Arc::new(create_demuxer(stream, params)?);
        sources.insert(stream.input.clone(), demuxer);
        let aligner = sync_points.map(|queue| {
            stats.cue_aligners += 1;
            CueAlignmentHandler::new(Arc::clone(queue))
        });
        cue_aligners.insert(stream.input.clone(), aligner);
    }
    for demuxer in sources.values() {
        job_manager.add("RemuxJob", Arc::clone(demuxer) as _);
        stats.demuxers += 1;
    }

    // Replicators are shared among all streams with the same input and
    // stream selector.
    let mut replicator: Option<Arc<Replicator>> = None;

    let mut previous_input = String::new();
    let mut previous_selector = String::new();

    for stream in streams {
        let demuxer = &sources[&stream.input];

        let new_input_file = stream.input != previous_input;
        let new_stream = new_input_file || previous_selector != stream.stream_selector;
        previous_input = stream.input.clone();
        previous_selector = stream.stream_selector.clone();

        // A stream with no output exists only to carry dump_stream_info.
        if stream.output.is_empty() && stream.segment_template.is_empty() {
            continue;
        }

        // A different descriptor is not necessarily a different stream:
        // trick-play branches share the main track's replicator.
        if new_stream {
            if !stream.language.is_empty() {
                demuxer.set_language_override(&stream.stream_selector, &stream.language);
            }

            let new_replicator = Arc::new(Replicator::new());
            let chunker: Arc<dyn MediaHandler> =
                Arc::new(ChunkingHandler::new(&params.chunking_params));
            let encryptor = create_encryption_handler(params, stream, encryption_key_source)?;

            // The input's shared aligner opens one port per selected stream.
            if let Some(aligner) = &cue_aligners[&stream.input] {
                let port: Arc<dyn MediaHandler> = Arc::clone(aligner).create_port();
                chain(&[
                    Some(Arc::clone(&port)),
                    Some(Arc::clone(&chunker)),
                    encryptor,
                    Some(Arc::clone(&new_replicator) as _),
                ])?;
                demuxer.set_handler(&stream.stream_selector, port)?;
            } else {
                chain(&[
                    Some(Arc::clone(&chunker)),
                    encryptor,
                    Some(Arc::clone(&new_replicator) as _),
                ])?;
                demuxer.set_handler(&stream.stream_selector, chunker)?;
            }

            replicator = Some(new_replicator);
            stats.replicators += 1;
        }

        // The muxer (output) branch for this descriptor.
        let muxer = Arc::new(Muxer::new(
            get_output_format(stream),
            create_muxer_options(stream, params, &next_representation_id(representation_index)),
        )?);
        muxer.set_listener(
            muxer_listener_factory.create_listener(StreamListenerData::from_descriptor(stream)),
        );
        stats.muxers += 1;

        let trick_play: Option<Arc<dyn MediaHandler>> = if stream.trick_play_factor > 0 {
            stats.trick_play_handlers += 1;
            Some(Arc::new(TrickPlayHandler::new(stream.trick_play_factor)?))
        } else {
            None
        };

        let replicator = replicator.as_ref().ok_or_else(|| {
            PackagerError::Internal(format!(
                "No replicator for {}:{}; descriptors were not sorted",
                stream.input, stream.stream_selector
            ))
        })?;
        chain(&[
            Some(Arc::clone(replicator) as _),
            trick_play,
            Some(muxer as _),
        ])?;
    }

    debug!(
        demuxers = stats.demuxers,
        replicators = stats.replicators,
        muxers = stats.muxers,
        trick_play = stats.trick_play_handlers,
        "Audio/video graph built"
    );
    Ok(stats)
}

/// Derive the manifest description of a whole-file text stream by sniffing
/// its codec from the file head.
fn stream_info_to_text_media_info(stream: &StreamDescriptor) -> Result<MediaInfo> {
    let head = io::read_head(&stream.input, 1024)?;
    let codec = match MediaContainer::sniff(&head) {
        MediaContainer::WebVtt => "wvtt",
        MediaContainer::Ttml => "ttml",
        _ => {
            return Err(PackagerError::InvalidArgument(format!(
                "Could not determine the text file format of {}",
                stream.input
            )));
        }
    };

    Ok(MediaInfo {
        media_file_name: stream.output.clone(),
        container_type: "text".to_string(),
        // Text files are small and fetched in one request, so a nominal
        // bandwidth is fine when the descriptor does not set one.
        bandwidth: if stream.bandwidth != 0 {
            stream.bandwidth
        } else {
            DEFAULT_TEXT_BANDWIDTH
        },
        text_info: Some(TextInfo {
            codec: codec.to_string(),
            language: stream.language.clone(),
        }),
        ..Default::default()
    })
}

/// Build the WebVTT → MP4 job for one text stream.
fn create_webvtt_to_mp4_text_job(
    stream: &StreamDescriptor,
    params: &PackagingParams,
    sync_points: Option<&Arc<SyncPointQueue>>,
    muxer_listener_factory: &MuxerListenerFactory,
    job_manager: &JobManager,
    representation_id: &str,
) -> Result<()> {
    let parser = Arc::new(WebVttParser::new(&stream.input, &stream.language));
    let padder = Arc::new(TextPadder::new(0));
    let cue_aligner: Option<Arc<dyn MediaHandler>> = sync_points
        .map(|queue| CueAlignmentHandler::new(Arc::clone(queue)).create_port() as _);
    let chunker = Arc::new(TextChunker::new(
        params.chunking_params.segment_duration_in_seconds,
    ));
    let text_to_mp4 = Arc::new(WebVttToMp4Handler::new());

    let muxer = Arc::new(Muxer::new(
        get_output_format(stream),
        create_muxer_options(stream, params, representation_id),
    )?);
    muxer.set_listener(
        muxer_listener_factory.create_listener(StreamListenerData::from_descriptor(stream)),
    );

    chain(&[
        Some(Arc::clone(&parser) as _),
        Some(padder as _),
        cue_aligner,
        Some(chunker as _),
        Some(text_to_mp4 as _),
        Some(muxer as _),
    ])?;
    job_manager.add("MP4 text job", parser);
    Ok(())
}

/// Build the HLS segmented-text job for one text stream.
fn create_hls_text_job(
    stream: &StreamDescriptor,
    params: &PackagingParams,
    hls_listener: Box<dyn vessel_media::muxer::MuxerListener>,
    sync_points: Option<&Arc<SyncPointQueue>>,
    job_manager: &JobManager,
    representation_id: &str,
) -> Result<()> {
    if stream.segment_template.is_empty() {
        return Err(PackagerError::InvalidArgument(format!(
            "Cannot output text ({}) to HLS with no segment template",
            stream.input
        )));
    }

    let mut muxer_options = create_muxer_options(stream, params, representation_id);
    // Text files are small and fetched whole, so default the bandwidth to
    // something reasonable when missing.
    if muxer_options.bandwidth == 0 {
        muxer_options.bandwidth = DEFAULT_TEXT_BANDWIDTH;
    }
    let output = Arc::new(WebVttTextOutputHandler::new(muxer_options, hls_listener));

    let parser = Arc::new(WebVttParser::new(&stream.input, &stream.language));
    let padder = Arc::new(TextPadder::new(0));
    let cue_aligner: Option<Arc<dyn MediaHandler>> = sync_points
        .map(|queue| CueAlignmentHandler::new(Arc::clone(queue)).create_port() as _);
    let chunker = Arc::new(TextChunker::new(
        params.chunking_params.segment_duration_in_seconds,
    ));

    job_manager.add("Segmented Text Job", Arc::clone(&parser) as _);

    chain(&[
        Some(parser as _),
        Some(padder as _),
        cue_aligner,
        Some(chunker as _),
        Some(output as _),
    ])
}

/// Build all text jobs.
///
/// Supported routings: WebVTT → WebVTT (file passthrough or HLS segments) and
/// WebVTT → MP4.  MP4-boxed text input is not supported.
pub fn create_text_jobs(
    streams: &[&StreamDescriptor],
    params: &PackagingParams,
    sync_points: Option<&Arc<SyncPointQueue>>,
    muxer_listener_factory: &MuxerListenerFactory,
    mpd_notifier: Option<&Arc<MpdNotifier>>,
    job_manager: &JobManager,
    representation_index: &mut u32,
) -> Result<()> {
    for stream in streams {
        let input_container = MediaContainer::from_file_name(&stream.input);
        let output_container = get_output_format(stream);

        if input_container != MediaContainer::WebVtt {
            return Err(PackagerError::InvalidArgument(format!(
                "Text output format is not supported for {}",
                stream.input
            )));
        }

        if output_container == MediaContainer::Mp4 {
            create_webvtt_to_mp4_text_job(
                stream,
                params,
                sync_points,
                muxer_listener_factory,
                job_manager,
                &next_representation_id(representation_index),
            )?;
            continue;
        }

        let hls_listener = muxer_listener_factory
            .create_hls_listener(StreamListenerData::from_descriptor(stream));

        // Check the descriptor shape up front so nothing is half-built.
        if hls_listener.is_some()
            && (stream.segment_template.is_empty() || !stream.output.is_empty())
        {
            return Err(PackagerError::InvalidArgument(
                "segment_template needs to be specified for HLS text output. Single file \
                 output is not supported yet."
                    .into(),
            ));
        }

        if mpd_notifier.is_some() && !stream.segment_template.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Cannot create text output for MPD with segment output.".into(),
            ));
        }

        if let Some(hls_listener) = hls_listener {
            create_hls_text_job(
                stream,
                params,
                hls_listener,
                sync_points,
                job_manager,
                &next_representation_id(representation_index),
            )?;
        }

        if !stream.output.is_empty() {
            io::copy(&stream.input, &stream.output).map_err(|_| {
                PackagerError::FileFailure(format!(
                    "Failed to copy the input file ({}) to output file ({}).",
                    stream.input, stream.output
                ))
            })?;

            let text_media_info = stream_info_to_text_media_info(stream)?;

            // With an MPD configured, the passthrough file goes straight into
            // the manifest.
            if let Some(notifier) = mpd_notifier {
                notifier
                    .notify_new_container(&text_media_info)
                    .and_then(|_| notifier.flush())
                    .map_err(|_| {
                        PackagerError::ParserFailure(format!(
                            "Failed to process text file {}",
                            stream.input
                        ))
                    })?;
            }

            if params.output_media_info {
                write_media_info_dump(&text_media_info, &stream.output)?;
            }
        }
    }
    Ok(())
}

/// Build every job for the request and initialize the processing graph.
#[allow(clippy::too_many_arguments)]
pub fn create_all_jobs(
    stream_descriptors: &[StreamDescriptor],
    params: &PackagingParams,
    mpd_notifier: Option<&Arc<MpdNotifier>>,
    encryption_key_source: Option<&Arc<dyn KeySource>>,
    sync_points: Option<&Arc<SyncPointQueue>>,
    muxer_listener_factory: &MuxerListenerFactory,
    job_manager: &JobManager,
) -> Result<()> {
    let (text_streams, mut audio_video_streams) = partition(stream_descriptors);

    // Sorted order is what makes demuxer and replicator sharing (and
    // trick-play attachment) correct.
    audio_video_streams.sort_by(|a, b| stream_descriptor_order(a, b));

    let mut representation_index = 0u32;
    create_text_jobs(
        &text_streams,
        params,
        sync_points,
        muxer_listener_factory,
        mpd_notifier,
        job_manager,
        &mut representation_index,
    )?;
    create_audio_video_jobs(
        &audio_video_streams,
        params,
        encryption_key_source,
        sync_points,
        muxer_listener_factory,
        job_manager,
        &mut representation_index,
    )?;

    job_manager.initialize_jobs()
}
