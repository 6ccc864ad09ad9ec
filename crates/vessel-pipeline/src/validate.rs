//! Request validation.
//!
//! Everything here runs before any handler, notifier or file is constructed:
//! failing requests must leave no side effects, and validating twice must
//! give the same answer.

use vessel_core::container::MediaContainer;
use vessel_core::descriptor::{HlsPlaylistType, PackagingParams, StreamDescriptor};
use vessel_core::error::{PackagerError, Result};
use vessel_media::template::validate_segment_template;

use crate::format::get_output_format;

/// Validate a single stream descriptor.
///
/// `dump_stream_info` relaxes the output requirement: a descriptor with no
/// outputs is then only a probe request.
pub fn validate_stream_descriptor(
    dump_stream_info: bool,
    stream: &StreamDescriptor,
) -> Result<()> {
    if stream.input.is_empty() {
        return Err(PackagerError::InvalidArgument(
            "Stream input not specified.".into(),
        ));
    }

    // The only time a stream can have no outputs is when dump stream info is
    // set.
    if dump_stream_info && stream.output.is_empty() && stream.segment_template.is_empty() {
        return Ok(());
    }

    if stream.output.is_empty() && stream.segment_template.is_empty() {
        return Err(PackagerError::InvalidArgument(
            "Streams must specify 'output' or 'segment template'.".into(),
        ));
    }

    // Whenever there is output, a stream must be selected.
    if stream.stream_selector.is_empty() {
        return Err(PackagerError::InvalidArgument(
            "Stream stream_selector not specified.".into(),
        ));
    }

    if !stream.segment_template.is_empty() {
        validate_segment_template(&stream.segment_template)?;
    }

    // "$" is only allowed if the output file name is a template, which is
    // used to support one file per Representation per Period when there are
    // Ad Cues.
    if stream.output.contains('$') {
        validate_segment_template(&stream.output)?;
    }

    let output_format = get_output_format(stream);
    if output_format == MediaContainer::Unknown {
        return Err(PackagerError::InvalidArgument(
            "Unsupported output format.".into(),
        ));
    }

    if output_format == MediaContainer::Mpeg2Ts {
        if stream.segment_template.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Please specify 'segment_template'. Single file TS output is not supported."
                    .into(),
            ));
        }
        // The init segment is stored in 'output' for multi-segment content,
        // but TS segments are self-initializing.
        if !stream.output.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "All TS segments must be self-initializing. Stream descriptors 'output' or \
                 'init_segment' are not allowed."
                    .into(),
            ));
        }
    } else if output_format.is_packed_audio() {
        // Packed audio frames are self-framing; like TS, output must be
        // segmented and cannot carry an init segment.
        if stream.segment_template.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Please specify 'segment_template'. Single file PackedAudio output is not \
                 supported."
                    .into(),
            ));
        }
        if !stream.output.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Segmented WebVTT or PackedAudio output cannot have an init segment. Do not \
                 specify stream descriptors 'output' or 'init_segment' when using \
                 'segment_template'."
                    .into(),
            ));
        }
    } else if output_format == MediaContainer::WebVtt {
        // No initialization data exists for WebVTT.
        if !stream.segment_template.is_empty() && !stream.output.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Segmented WebVTT or PackedAudio output cannot have an init segment. Do not \
                 specify stream descriptors 'output' or 'init_segment' when using \
                 'segment_template'."
                    .into(),
            ));
        }
    } else {
        // Any other segmented format needs an init segment.
        if !stream.segment_template.is_empty() && stream.output.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Please specify 'init_segment'. All non-TS multi-segment content must provide \
                 an init segment."
                    .into(),
            ));
        }
    }

    Ok(())
}

/// Validate a whole packaging request.
pub fn validate_params(
    params: &PackagingParams,
    stream_descriptors: &[StreamDescriptor],
) -> Result<()> {
    if !params.chunking_params.segment_sap_aligned
        && params.chunking_params.subsegment_sap_aligned
    {
        return Err(PackagerError::InvalidArgument(
            "Setting segment_sap_aligned to false but subsegment_sap_aligned to true is not \
             allowed."
                .into(),
        ));
    }

    if stream_descriptors.is_empty() {
        return Err(PackagerError::InvalidArgument(
            "Stream descriptors cannot be empty.".into(),
        ));
    }

    // The on-demand profile generates a single file per stream while the live
    // profile generates segments from a template; the two cannot mix.
    let on_demand_dash_profile = stream_descriptors[0].segment_template.is_empty();
    for descriptor in stream_descriptors {
        if on_demand_dash_profile != descriptor.segment_template.is_empty() {
            return Err(PackagerError::InvalidArgument(
                "Inconsistent stream descriptor specification: segment_template should be \
                 specified for none or all stream descriptors."
                    .into(),
            ));
        }

        validate_stream_descriptor(params.test_params.dump_stream_info, descriptor)?;

        if descriptor.input.starts_with("udp://") {
            let hls_params = &params.hls_params;
            if !hls_params.master_playlist_output.is_empty()
                && hls_params.playlist_type == HlsPlaylistType::Vod
            {
                tracing::warn!(
                    input = %descriptor.input,
                    "Seeing UDP input with HLS Playlist Type set to VOD. The playlists will \
                     only be generated when UDP socket is closed. If you want to do live \
                     packaging, --hls_playlist_type needs to be set to LIVE."
                );
            }
            // No check for DASH: an MPD with a segment template already
            // defaults to dynamic.
        }
    }

    if params.output_media_info && !on_demand_dash_profile {
        // TODO: support partial media info dumps for live.
        return Err(PackagerError::Unimplemented(
            "output_media_info is only supported for on-demand profile (not using \
             segment_template)."
                .into(),
        ));
    }

    Ok(())
}
