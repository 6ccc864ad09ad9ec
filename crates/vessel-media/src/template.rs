//! Segment template validation and expansion.
//!
//! Templates follow the DASH `$identifier$` syntax: `$Number$` or `$Time$`
//! (exactly one of the two), the optional `$RepresentationID$` and
//! `$Bandwidth$` identifiers, the `$$` escape, and a printf-style width tag
//! such as `$Number%05d$` on the numeric identifiers.

use vessel_core::error::{PackagerError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Identifier {
    Number,
    Time,
    RepresentationId,
    Bandwidth,
    Escape,
}

fn parse_identifier(body: &str, template: &str) -> Result<(Identifier, usize)> {
    if body.is_empty() {
        return Ok((Identifier::Escape, 0));
    }
    let (name, format_tag) = match body.split_once('%') {
        Some((name, tag)) => (name, Some(tag)),
        None => (body, None),
    };
    let identifier = match name {
        "Number" => Identifier::Number,
        "Time" => Identifier::Time,
        "RepresentationID" => Identifier::RepresentationId,
        "Bandwidth" => Identifier::Bandwidth,
        _ => {
            return Err(PackagerError::InvalidArgument(format!(
                "Invalid segment template '{template}': unknown identifier '${body}$'"
            )));
        }
    };
    let width = match format_tag {
        None => 0,
        Some(tag) => {
            // RepresentationID is a string; a width tag makes no sense there.
            if identifier == Identifier::RepresentationId {
                return Err(PackagerError::InvalidArgument(format!(
                    "Invalid segment template '{template}': $RepresentationID$ must not carry \
                     a format tag"
                )));
            }
            // Accept %0<width>d only.
            let digits = tag
                .strip_prefix('0')
                .and_then(|t| t.strip_suffix('d'))
                .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()));
            match digits {
                Some(d) => d.parse::<usize>().map_err(|_| {
                    PackagerError::InvalidArgument(format!(
                        "Invalid segment template '{template}': bad format tag '%{tag}'"
                    ))
                })?,
                None => {
                    return Err(PackagerError::InvalidArgument(format!(
                        "Invalid segment template '{template}': bad format tag '%{tag}'"
                    )));
                }
            }
        }
    };
    Ok((identifier, width))
}

fn scan(template: &str) -> Result<Vec<(Identifier, usize)>> {
    let mut identifiers = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('$') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('$') else {
            return Err(PackagerError::InvalidArgument(format!(
                "Invalid segment template '{template}': unpaired '$'"
            )));
        };
        identifiers.push(parse_identifier(&after[..close], template)?);
        rest = &after[close + 1..];
    }
    Ok(identifiers)
}

/// Check that `template` is a usable segment template: paired `$`s, known
/// identifiers, and exactly one of `$Number$`/`$Time$`.
pub fn validate_segment_template(template: &str) -> Result<()> {
    let identifiers = scan(template)?;
    let numbers = identifiers
        .iter()
        .filter(|(id, _)| *id == Identifier::Number)
        .count();
    let times = identifiers
        .iter()
        .filter(|(id, _)| *id == Identifier::Time)
        .count();
    if numbers + times != 1 {
        return Err(PackagerError::InvalidArgument(format!(
            "Invalid segment template '{template}': one and only one of $Number$ and $Time$ \
             is required"
        )));
    }
    Ok(())
}

/// Expand `template` for one segment.  `number` is 1-based; `time` is the
/// segment start in time-scale units; `bandwidth` and `representation_id`
/// come from the owning representation.
///
/// Callers validate first; expansion of an invalid template falls back to
/// emitting the raw text between identifiers.
pub fn expand(
    template: &str,
    number: u64,
    time: i64,
    bandwidth: u32,
    representation_id: &str,
) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;
    while let Some(open) = rest.find('$') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('$') else {
            out.push('$');
            rest = after;
            continue;
        };
        let body = &after[..close];
        match parse_identifier(body, template) {
            Ok((Identifier::Escape, _)) => out.push('$'),
            Ok((Identifier::Number, width)) => {
                out.push_str(&format!("{number:0width$}"));
            }
            Ok((Identifier::Time, width)) => {
                out.push_str(&format!("{time:0width$}"));
            }
            Ok((Identifier::Bandwidth, width)) => {
                out.push_str(&format!("{bandwidth:0width$}"));
            }
            Ok((Identifier::RepresentationId, _)) => {
                out.push_str(representation_id);
            }
            Err(_) => {
                out.push('$');
                out.push_str(body);
                out.push('$');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}
