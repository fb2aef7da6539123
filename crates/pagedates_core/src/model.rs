use chrono::{DateTime, FixedOffset, NaiveDateTime};

/// One page of a space, as returned by the content listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub url: String,
    /// `version.when` from the listing expansion, when present.
    pub version_when: Option<DateTime<FixedOffset>>,
}

/// A page with whatever date metadata the resolver filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub date_modified: Option<DateTime<FixedOffset>>,
    pub date_viewed: Option<DateTime<FixedOffset>>,
}

/// Parse a timestamp from an API payload. Accepts RFC 3339 (including a
/// trailing `Z`) and the bare `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS`
/// shapes some analytics backends return; bare values are taken as UTC.
pub fn parse_api_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed);
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()?;
    Some(naive.and_utc().fixed_offset())
}

/// Render a timestamp the way the report expects it.
pub fn format_timestamp(value: &DateTime<FixedOffset>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}
