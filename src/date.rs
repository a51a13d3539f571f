use chrono::DateTime;

/// Sentinel used both as the normalized date and as the grouping key.
pub const UNKNOWN: &str = "Unknown";

/// Parses an RFC 5322 `Date:` header into `YYYY-MM-DD HH:MM:SS` in the header's own offset.
/// Anything unparsable becomes [`UNKNOWN`].
pub fn normalize_date(raw: &str) -> String {
    // Trailing zone comment, e.g. "-0700 (PDT)".
    let cleaned = match raw.find('(') {
        Some(pos) => &raw[..pos],
        None => raw,
    };

    match DateTime::parse_from_rfc2822(cleaned.trim()) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => UNKNOWN.to_string(),
    }
}

/// Year-month key (`YYYY-MM`) for a normalized date, or [`UNKNOWN`].
pub fn grouping_key(normalized: &str) -> String {
    let mut parts = normalized.split('-');
    match (parts.next(), parts.next()) {
        (Some(year), Some(month)) if normalized != UNKNOWN => format!("{year}-{month}"),
        _ => UNKNOWN.to_string(),
    }
}
