use core::str::FromStr;

use chrono::NaiveDateTime;
use domain::base::Name;

use crate::error::Error;

/// Parse a domain name, case-folded.
pub fn parse_name(arg: &str) -> Result<Name<Vec<u8>>, Error> {
    Name::from_str(&arg.to_lowercase()).map_err(|e| Error::from(e.to_string()))
}

/// Parse a domain name into the canonical form used throughout the key
/// store: lower case, with a trailing dot.
pub fn parse_zone_name(arg: &str) -> Result<String, Error> {
    let name = parse_name(arg)?;
    if name.is_root() {
        return Err("the root zone cannot be managed here".into());
    }
    Ok(format!("{}", name.fmt_with_dot()))
}

/// Parse a duration given in seconds or with one of the suffixes
/// `s`, `m`, `h`, `d` or `w`, returning seconds.
pub fn parse_duration(value: &str) -> Result<u32, Error> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => value.split_at(pos),
        None => (value, ""),
    };
    let number: u32 = digits
        .parse()
        .map_err(|_| Error::from(format!("invalid duration '{value}'")))?;
    let factor = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        _ => return Err(format!("invalid duration unit '{unit}' in '{value}'").into()),
    };
    number
        .checked_mul(factor)
        .ok_or_else(|| format!("duration '{value}' is out of range").into())
}

/// The timestamp format used in key-file meta comments.
const TIMESTAMP_FMT: &str = "%Y%m%d%H%M%S";

/// Parse a `YYYYMMDDhhmmss` timestamp into seconds since the epoch.
pub fn parse_timestamp(value: &str) -> Result<u32, Error> {
    let dt = NaiveDateTime::parse_from_str(value, TIMESTAMP_FMT)
        .map_err(|e| Error::from(format!("invalid timestamp '{value}': {e}")))?;
    let secs = dt.and_utc().timestamp();
    u32::try_from(secs).map_err(|_| format!("timestamp '{value}' is out of range").into())
}

/// Format seconds since the epoch as a `YYYYMMDDhhmmss` timestamp.
pub fn format_timestamp(seconds: u32) -> String {
    chrono::DateTime::from_timestamp(seconds.into(), 0)
        .map(|dt| dt.format(TIMESTAMP_FMT).to_string())
        .unwrap_or_default()
}
