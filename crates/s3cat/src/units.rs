//! 📏 Size strings to bytes. `"10MB"` goes in, `10485760` comes out.
//!
//! Binary units (1 KB = 1024 B), decimals allowed, suffix case-insensitive.
//! Anything else is a configuration error, raised before we touch the store.

use crate::error::ConcatError;

pub const KIB: u64 = 1024;
pub const MIB: u64 = KIB * 1024;
pub const GIB: u64 = MIB * 1024;
pub const TIB: u64 = GIB * 1024;

const UNIT_TABLE: [(&str, u64); 5] = [("TB", TIB), ("GB", GIB), ("MB", MIB), ("KB", KIB), ("B", 1)];

/// 🔢 Parse a human size like `"5.2GB"`, `"512"` or `"12 B"` into bytes.
///
/// Fractional results are truncated toward zero.
pub fn parse_size(raw: &str) -> Result<u64, ConcatError> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (number, multiplier) = UNIT_TABLE
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|number| (number.trim(), *multiplier))
        })
        .unwrap_or((upper.as_str(), 1));

    let valid_shape = !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.chars().filter(|c| *c == '.').count() <= 1
        && !number.starts_with('.')
        && !number.ends_with('.');
    if !valid_shape {
        return Err(ConcatError::Configuration(format!(
            "'{raw}' is not a valid size. Try something like 512, 10KB, 5.2GB"
        )));
    }

    let value: f64 = number.parse().map_err(|e| {
        ConcatError::Configuration(format!("'{raw}' is not a valid size: {e}"))
    })?;
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(ConcatError::Configuration(format!(
            "'{raw}' is larger than any bucket will ever love"
        )));
    }
    Ok(bytes as u64)
}

/// 🔢 Same as [`parse_size`] but `None` stays `None`: no threshold means one big group.
pub fn parse_optional_size(raw: Option<&str>) -> Result<Option<u64>, ConcatError> {
    raw.map(parse_size).transpose()
}
