//! Output container inference.

use vessel_core::container::MediaContainer;
use vessel_core::descriptor::StreamDescriptor;

/// Determine the output container of a stream descriptor.
///
/// Priority order: the explicit `output_format` name wins (silently, even
/// when the file extensions disagree with it); otherwise the container is
/// inferred from `output` and `segment_template` extensions, which must agree
/// when both are present.  Unresolvable inputs yield
/// [`MediaContainer::Unknown`], which validation rejects.
pub fn get_output_format(descriptor: &StreamDescriptor) -> MediaContainer {
    if !descriptor.output_format.is_empty() {
        let format = MediaContainer::from_format_name(&descriptor.output_format);
        if format == MediaContainer::Unknown {
            tracing::error!(
                output_format = %descriptor.output_format,
                "Unable to determine output format"
            );
        }
        return format;
    }

    let from_output = if descriptor.output.is_empty() {
        None
    } else {
        let format = MediaContainer::from_file_name(&descriptor.output);
        if format == MediaContainer::Unknown {
            tracing::error!(output = %descriptor.output, "Unable to determine output format");
        }
        Some(format)
    };
    let from_template = if descriptor.segment_template.is_empty() {
        None
    } else {
        let format = MediaContainer::from_file_name(&descriptor.segment_template);
        if format == MediaContainer::Unknown {
            tracing::error!(
                segment_template = %descriptor.segment_template,
                "Unable to determine output format"
            );
        }
        Some(format)
    };

    if let (Some(a), Some(b)) = (from_output, from_template) {
        if a != b {
            tracing::error!(
                output = %descriptor.output,
                segment_template = %descriptor.segment_template,
                "Output format determined from 'output' differs from 'segment_template'"
            );
            return MediaContainer::Unknown;
        }
    }

    from_output
        .or(from_template)
        .unwrap_or(MediaContainer::Unknown)
}
