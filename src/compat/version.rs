//! Release string parsing.
//!
//! `major.minor.patch` maps onto `major * 1_000_000 + minor * 1_000 + patch`,
//! the integer guest binaries compare against when probing kernel features.

use crate::config::types::{PersonalityError, Result, MIN_OSREL};

const FIELD: &str = "linux.osrelease";

/// Parse a release string into its numeric form.
///
/// Rejects anything but three dot-separated runs of ASCII digits, and any
/// value below [`MIN_OSREL`].
pub fn parse_osrel(osrelease: &str) -> Result<u32> {
    let format_error = || PersonalityError::Format {
        field: FIELD,
        value: osrelease.to_string(),
    };

    let mut fields = osrelease.split('.');
    let mut parts = [0u64; 3];
    for part in parts.iter_mut() {
        let text = fields.next().ok_or_else(format_error)?;
        *part = parse_field(text).ok_or_else(format_error)?;
    }
    if fields.next().is_some() {
        return Err(format_error());
    }

    let [major, minor, patch] = parts;
    let value = major
        .checked_mul(1_000_000)
        .and_then(|v| minor.checked_mul(1_000).and_then(|m| v.checked_add(m)))
        .and_then(|v| v.checked_add(patch))
        .ok_or_else(format_error)?;

    if value < u64::from(MIN_OSREL) {
        return Err(format_error());
    }
    u32::try_from(value).map_err(|_| format_error())
}

fn parse_field(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
