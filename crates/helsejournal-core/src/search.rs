//! Substring search and highlighting over an owner's documents.
//!
//! # Matching
//!
//! A document matches when the query occurs, case-insensitively, in any of
//! title, description, extracted text, provider or clinician. Optional
//! filters are ANDed on top: year equality and a case-insensitive provider
//! substring. Archived documents never match.
//!
//! # Highlighting
//!
//! When the match lies in the extracted text, the first occurrence is
//! returned with up to [`HIGHLIGHT_CONTEXT_CHARS`] characters of context on
//! each side, clamped to the text, and flagged as truncated on every side
//! that does not reach the text boundary.
//!
//! # Ranking
//!
//! 1. Sum the weights of the matching fields (title 3, provider 2,
//!    clinician 2, description 1.5, text 1).
//! 2. Add `0.1 × min(occurrences in text, 10)`.
//! 3. Sort by score (desc); ties keep the caller's order.

use serde::Serialize;
use uuid::Uuid;

use crate::error::{ArchiveError, Result};
use crate::metadata::non_blank;
use crate::models::Document;

/// Characters of context kept on each side of a highlighted match.
pub const HIGHLIGHT_CONTEXT_CHARS: usize = 50;

const TEXT_OCCURRENCE_CAP: usize = 10;
const TEXT_OCCURRENCE_WEIGHT: f64 = 0.1;

/// Optional restrictions ANDed with the text match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub year: Option<i32>,
    pub provider: Option<String>,
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub filters: SearchFilters,
    /// Maximum results to return after ranking.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    Title,
    Description,
    Text,
    Provider,
    Clinician,
}

impl MatchedField {
    fn weight(self) -> f64 {
        match self {
            Self::Title => 3.0,
            Self::Provider | Self::Clinician => 2.0,
            Self::Description => 1.5,
            Self::Text => 1.0,
        }
    }
}

/// A context window around the first match inside a longer text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Highlight {
    /// Context window, original casing preserved.
    pub snippet: String,
    /// Offset of the match inside `snippet`, in characters.
    pub match_offset: usize,
    /// Length of the match, in characters.
    pub match_len: usize,
    /// Text continues before the snippet.
    pub truncated_start: bool,
    /// Text continues after the snippet.
    pub truncated_end: bool,
}

impl Highlight {
    /// `...context...` with ellipses only on truncated sides.
    pub fn render(&self) -> String {
        format!(
            "{}{}{}",
            if self.truncated_start { "..." } else { "" },
            self.snippet,
            if self.truncated_end { "..." } else { "" }
        )
    }

    /// The matched text itself.
    pub fn matched(&self) -> String {
        self.snippet
            .chars()
            .skip(self.match_offset)
            .take(self.match_len)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document_id: Uuid,
    pub title: String,
    pub original_filename: String,
    pub year: Option<i32>,
    pub provider: Option<String>,
    pub clinician: Option<String>,
    pub highlight: Option<Highlight>,
    pub score: f64,
    pub matched_fields: Vec<MatchedField>,
}

/// Runs a search over `documents`, which should all belong to one owner.
pub fn search(documents: &[Document], request: &SearchRequest<'_>) -> Result<Vec<SearchResult>> {
    let query = request.query;
    if query.trim().is_empty() {
        return Err(ArchiveError::validation("search query must not be empty"));
    }

    let mut results: Vec<SearchResult> = documents
        .iter()
        .filter(|doc| !doc.archived)
        .filter(|doc| passes_filters(doc, &request.filters))
        .filter_map(|doc| score_document(doc, query))
        .collect();

    // stable: equal scores keep store order
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(limit) = request.limit {
        results.truncate(limit);
    }
    Ok(results)
}

fn passes_filters(doc: &Document, filters: &SearchFilters) -> bool {
    if let Some(year) = filters.year {
        if doc.year != Some(year) {
            return false;
        }
    }
    // A blank provider filter means "no provider filter".
    if let Some(provider) = non_blank(filters.provider.as_deref()) {
        if !doc
            .provider
            .as_deref()
            .is_some_and(|p| contains_ci(p, &provider))
        {
            return false;
        }
    }
    true
}

fn score_document(doc: &Document, query: &str) -> Option<SearchResult> {
    let fields: [(MatchedField, Option<&str>); 5] = [
        (MatchedField::Title, doc.title.as_deref()),
        (MatchedField::Description, doc.description.as_deref()),
        (MatchedField::Text, doc.extracted_text.as_deref()),
        (MatchedField::Provider, doc.provider.as_deref()),
        (MatchedField::Clinician, doc.clinician.as_deref()),
    ];

    let matched: Vec<MatchedField> = fields
        .iter()
        .filter(|(_, value)| value.is_some_and(|v| contains_ci(v, query)))
        .map(|(field, _)| *field)
        .collect();

    if matched.is_empty() {
        return None;
    }

    let mut score: f64 = matched.iter().map(|f| f.weight()).sum();
    let highlight = if matched.contains(&MatchedField::Text) {
        let text = doc.text();
        score += TEXT_OCCURRENCE_WEIGHT * count_ci(text, query, TEXT_OCCURRENCE_CAP) as f64;
        highlight(text, query, HIGHLIGHT_CONTEXT_CHARS)
    } else {
        None
    };

    Some(SearchResult {
        document_id: doc.id,
        title: doc.display_title().to_string(),
        original_filename: doc.original_filename.clone(),
        year: doc.year,
        provider: doc.provider.clone(),
        clinician: doc.clinician.clone(),
        highlight,
        score,
        matched_fields: matched,
    })
}

// ============ Case-insensitive matching ============

/// Lowercased characters of `s`, each tagged with the index of the original
/// character it came from. Some characters lowercase to several.
fn fold(s: &str) -> (Vec<char>, Vec<usize>) {
    let mut folded = Vec::with_capacity(s.len());
    let mut origin = Vec::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        for lc in c.to_lowercase() {
            folded.push(lc);
            origin.push(i);
        }
    }
    (folded, origin)
}

fn fold_needle(needle: &str) -> Vec<char> {
    needle.chars().flat_map(char::to_lowercase).collect()
}

/// Case-insensitive substring test. An empty needle matches everything.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    find_ci(haystack, needle).is_some()
}

/// First case-insensitive occurrence of `needle`, as a half-open range of
/// character indices into `haystack`.
pub fn find_ci(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle = fold_needle(needle);
    if needle.is_empty() {
        return None;
    }
    let (folded, origin) = fold(haystack);
    let pos = folded.windows(needle.len()).position(|w| w == needle.as_slice())?;
    let start = origin[pos];
    let end = origin[pos + needle.len() - 1] + 1;
    Some((start, end))
}

/// Non-overlapping case-insensitive occurrences, counted up to `cap`.
pub fn count_ci(haystack: &str, needle: &str, cap: usize) -> usize {
    let needle = fold_needle(needle);
    if needle.is_empty() {
        return 0;
    }
    let (folded, _) = fold(haystack);
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= folded.len() && count < cap {
        if folded[i..i + needle.len()] == needle[..] {
            count += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    count
}

/// Builds a highlight around the first occurrence of `query` in `text`.
pub fn highlight(text: &str, query: &str, context_chars: usize) -> Option<Highlight> {
    let (match_start, match_end) = find_ci(text, query)?;
    let chars: Vec<char> = text.chars().collect();

    let start = match_start.saturating_sub(context_chars);
    let end = (match_end + context_chars).min(chars.len());

    Some(Highlight {
        snippet: chars[start..end].iter().collect(),
        match_offset: match_start - start,
        match_len: match_end - match_start,
        truncated_start: start > 0,
        truncated_end: end < chars.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DocumentMetadata;
    use crate::models::DocumentDraft;
    use chrono::Utc;

    fn make_doc(title: &str) -> Document {
        let draft = DocumentDraft {
            owner_id: "admin".into(),
            fingerprint: crate::fingerprint::fingerprint(title.as_bytes()),
            stored_name: "x.pdf".into(),
            original_filename: format!("{}.pdf", title),
            size_bytes: 1,
        };
        let meta = DocumentMetadata {
            title: Some(title.to_string()),
            ..Default::default()
        };
        Document::from_draft(draft, meta, Utc::now())
    }

    fn request(query: &str) -> SearchRequest<'_> {
        SearchRequest {
            query,
            filters: SearchFilters::default(),
            limit: None,
        }
    }

    #[test]
    fn test_find_ci_basic() {
        assert_eq!(find_ci("Hemoglobin normal", "GLOBIN"), Some((4, 10)));
        assert_eq!(find_ci("abc", "d"), None);
    }

    #[test]
    fn test_find_ci_non_ascii() {
        assert_eq!(find_ci("Blodprøve fra Ullevål", "ULLEVÅL"), Some((14, 21)));
        assert!(contains_ci("ÆRØSKØBING", "ærø"));
    }

    #[test]
    fn test_count_ci_caps() {
        assert_eq!(count_ci("aa aa aa", "AA", 10), 3);
        assert_eq!(count_ci("aaaa", "aa", 10), 2);
        assert_eq!(count_ci("aa aa aa", "aa", 2), 2);
    }

    #[test]
    fn test_highlight_context_and_truncation() {
        let text = format!("{}ferritin{}", "x".repeat(80), "y".repeat(80));
        let h = highlight(&text, "FERRITIN", 50).unwrap();
        assert_eq!(h.snippet.chars().count(), 50 + 8 + 50);
        assert!(h.truncated_start && h.truncated_end);
        assert_eq!(h.matched(), "ferritin");
        assert!(h.render().starts_with("...") && h.render().ends_with("..."));
    }

    #[test]
    fn test_highlight_clamps_at_bounds() {
        let h = highlight("Ferritin low", "ferritin", 50).unwrap();
        assert_eq!(h.snippet, "Ferritin low");
        assert_eq!(h.match_offset, 0);
        assert!(!h.truncated_start && !h.truncated_end);
        assert_eq!(h.render(), "Ferritin low");
    }

    #[test]
    fn test_highlight_counts_characters_not_bytes() {
        let text = format!("{}målt{}", "ø".repeat(60), "å".repeat(60));
        let h = highlight(&text, "MÅLT", 50).unwrap();
        assert_eq!(h.snippet.chars().count(), 104);
        assert_eq!(h.matched(), "målt");
    }

    #[test]
    fn test_blank_query_rejected() {
        let err = search(&[], &request("   ")).unwrap_err();
        assert!(matches!(err, ArchiveError::Validation(_)));
    }

    #[test]
    fn test_text_only_match_has_highlight() {
        let mut doc = make_doc("Report");
        doc.extracted_text = Some("Pasienten har forhøyet CRP og feber.".into());
        let results = search(&[doc], &request("crp")).unwrap();
        assert_eq!(results.len(), 1);
        let h = results[0].highlight.as_ref().unwrap();
        assert!(h.snippet.to_lowercase().contains("crp"));
        assert_eq!(results[0].matched_fields, vec![MatchedField::Text]);
    }

    #[test]
    fn test_metadata_match_has_no_highlight() {
        let mut doc = make_doc("MR kne");
        doc.clinician = Some("Dr. Berg".into());
        let results = search(&[doc], &request("berg")).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].highlight.is_none());
    }

    #[test]
    fn test_archived_never_returned() {
        let mut doc = make_doc("Epikrise");
        doc.extracted_text = Some("epikrise".into());
        doc.archived = true;
        assert!(search(&[doc], &request("epikrise")).unwrap().is_empty());
    }

    #[test]
    fn test_filters_are_anded() {
        let mut a = make_doc("Lab A");
        a.year = Some(2022);
        a.provider = Some("Haukeland".into());
        let mut b = make_doc("Lab B");
        b.year = Some(2023);
        b.provider = Some("Haukeland".into());
        let mut c = make_doc("Lab C");
        c.year = Some(2022);
        c.provider = Some("Ullevål".into());
        let docs = vec![a.clone(), b, c];

        let req = SearchRequest {
            query: "lab",
            filters: SearchFilters {
                year: Some(2022),
                provider: Some("hauke".into()),
            },
            limit: None,
        };
        let results = search(&docs, &req).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, a.id);
    }

    #[test]
    fn test_provider_filter_excludes_missing_provider() {
        let doc = make_doc("Lab");
        let req = SearchRequest {
            query: "lab",
            filters: SearchFilters {
                year: None,
                provider: Some("x".into()),
            },
            limit: None,
        };
        assert!(search(&[doc], &req).unwrap().is_empty());
    }

    #[test]
    fn test_ranking_prefers_more_fields_and_keeps_ties_stable() {
        let mut weak = make_doc("Notat");
        weak.extracted_text = Some("nevnt diabetes en gang".into());
        let mut strong = make_doc("Diabetes kontroll");
        strong.extracted_text = Some("diabetes diabetes".into());
        let tie_a = make_doc("Diabetes A");
        let tie_b = make_doc("Diabetes B");

        let docs = vec![weak.clone(), tie_a.clone(), strong.clone(), tie_b.clone()];
        let results = search(&docs, &request("diabetes")).unwrap();
        let ids: Vec<Uuid> = results.iter().map(|r| r.document_id).collect();
        assert_eq!(ids, vec![strong.id, tie_a.id, tie_b.id, weak.id]);
    }

    #[test]
    fn test_filename_is_not_searched() {
        let mut doc = make_doc("ignored");
        doc.title = None;
        doc.original_filename = "rontgen_thorax.pdf".into();
        assert!(search(&[doc.clone()], &request("thorax")).unwrap().is_empty());

        // The filename still names the hit when another field matches.
        doc.description = Some("Rontgen av thorax".into());
        let results = search(&[doc], &request("thorax")).unwrap();
        assert_eq!(results[0].matched_fields, vec![MatchedField::Description]);
        assert_eq!(results[0].title, "rontgen_thorax.pdf");
    }

    #[test]
    fn test_blank_provider_filter_is_ignored() {
        let mut known = make_doc("Kontroll");
        known.provider = Some("Haukeland".into());
        let unknown = make_doc("Kontroll uten sted");
        let req = SearchRequest {
            query: "kontroll",
            filters: SearchFilters {
                year: None,
                provider: Some("  ".into()),
            },
            limit: None,
        };
        assert_eq!(search(&[known, unknown], &req).unwrap().len(), 2);
    }

    #[test]
    fn test_limit_truncates() {
        let docs: Vec<Document> = (0..5).map(|i| make_doc(&format!("lab {}", i))).collect();
        let req = SearchRequest {
            query: "lab",
            filters: SearchFilters::default(),
            limit: Some(2),
        };
        assert_eq!(search(&docs, &req).unwrap().len(), 2);
    }
}
