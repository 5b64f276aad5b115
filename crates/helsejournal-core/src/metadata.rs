//! Metadata normalization.
//!
//! Upload forms and edits arrive as loose strings. [`normalize`] turns them
//! into a [`DocumentMetadata`] record: dates are parsed from several ISO-8601
//! shapes, blank strings mean "not provided", and nothing here ever fails.
//! A malformed date or year is dropped so the document is still storable.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form metadata as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<String>,
    pub provider: Option<String>,
    pub clinician: Option<String>,
    pub document_date: Option<String>,
    pub category: Option<String>,
}

/// Canonical descriptive metadata of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub provider: Option<String>,
    pub clinician: Option<String>,
    pub document_date: Option<DateTime<Utc>>,
    pub category: Option<String>,
}

/// Normalizes a complete set of raw fields.
pub fn normalize(raw: &RawMetadata) -> DocumentMetadata {
    DocumentMetadata {
        title: non_blank(raw.title.as_deref()),
        description: non_blank(raw.description.as_deref()),
        year: raw.year.as_deref().and_then(parse_year),
        provider: non_blank(raw.provider.as_deref()),
        clinician: non_blank(raw.clinician.as_deref()),
        document_date: raw.document_date.as_deref().and_then(parse_date),
        category: non_blank(raw.category.as_deref()),
    }
}

/// Applies a partial update on top of `current`.
///
/// Fields that are `None` in `patch` are left untouched; fields that are
/// present go through the same rules as [`normalize`], so a blank value
/// clears the field.
pub fn normalize_patch(current: &DocumentMetadata, patch: &RawMetadata) -> DocumentMetadata {
    let mut out = current.clone();
    if let Some(ref v) = patch.title {
        out.title = non_blank(Some(v));
    }
    if let Some(ref v) = patch.description {
        out.description = non_blank(Some(v));
    }
    if let Some(ref v) = patch.year {
        out.year = parse_year(v);
    }
    if let Some(ref v) = patch.provider {
        out.provider = non_blank(Some(v));
    }
    if let Some(ref v) = patch.clinician {
        out.clinician = non_blank(Some(v));
    }
    if let Some(ref v) = patch.document_date {
        out.document_date = parse_date(v);
    }
    if let Some(ref v) = patch.category {
        out.category = non_blank(Some(v));
    }
    out
}

/// Trims and maps blank strings to `None`.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_year(value: &str) -> Option<i32> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.parse::<i32>() {
        Ok(year) => Some(year),
        Err(_) => {
            tracing::warn!(value, "ignoring unparseable year");
            None
        }
    }
}

/// Parses a document date.
///
/// Accepted, in order: RFC 3339 (`Z` or offset), naive date-time with `T` or
/// space separator and optional fractional seconds (taken as UTC), plain
/// `YYYY-MM-DD` (midnight UTC). Anything else yields `None`.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }

    tracing::debug!(value, "dropping unparseable document date");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn parses_utc_marker_and_offset() {
        let z = parse_date("2023-04-05T10:30:00Z").unwrap();
        assert_eq!(z, Utc.with_ymd_and_hms(2023, 4, 5, 10, 30, 0).unwrap());

        let offset = parse_date("2023-04-05T12:30:00+02:00").unwrap();
        assert_eq!(offset, z);
    }

    #[test]
    fn parses_naive_variants() {
        let t = parse_date("2023-04-05T10:30:00").unwrap();
        assert_eq!(t.hour(), 10);
        let frac = parse_date("2023-04-05T10:30:00.250").unwrap();
        assert_eq!(frac.minute(), 30);
        let space = parse_date("2023-04-05 10:30:00").unwrap();
        assert_eq!(space, t);
        let date_only = parse_date("2023-04-05").unwrap();
        assert_eq!((date_only.year(), date_only.hour()), (2023, 0));
    }

    #[test]
    fn malformed_date_is_dropped_not_raised() {
        assert_eq!(parse_date("05/04/2023"), None);
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(parse_date("   "), None);
    }

    #[test]
    fn blank_fields_become_absent() {
        let raw = RawMetadata {
            title: Some("  Blodprøve  ".into()),
            description: Some("".into()),
            year: Some(" 2022 ".into()),
            provider: Some("   ".into()),
            clinician: Some("Dr. Hansen".into()),
            document_date: Some("not a date".into()),
            category: Some("lab".into()),
        };
        let meta = normalize(&raw);
        assert_eq!(meta.title.as_deref(), Some("Blodprøve"));
        assert_eq!(meta.description, None);
        assert_eq!(meta.year, Some(2022));
        assert_eq!(meta.provider, None);
        assert_eq!(meta.clinician.as_deref(), Some("Dr. Hansen"));
        assert_eq!(meta.document_date, None);
        assert_eq!(meta.category.as_deref(), Some("lab"));
    }

    #[test]
    fn unparseable_year_is_dropped() {
        let raw = RawMetadata {
            year: Some("twenty".into()),
            ..Default::default()
        };
        assert_eq!(normalize(&raw).year, None);
    }

    #[test]
    fn patch_leaves_unspecified_fields_and_clears_blank_ones() {
        let current = DocumentMetadata {
            title: Some("Old".into()),
            provider: Some("Ullevål".into()),
            year: Some(2020),
            ..Default::default()
        };
        let patch = RawMetadata {
            title: Some("New".into()),
            provider: Some("".into()),
            ..Default::default()
        };
        let out = normalize_patch(&current, &patch);
        assert_eq!(out.title.as_deref(), Some("New"));
        assert_eq!(out.provider, None);
        assert_eq!(out.year, Some(2020));
    }
}
