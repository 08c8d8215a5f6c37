//! Duplicate detection across citation imports.
//!
//! Matching is deliberately conservative: a wrong merge corrupts screening
//! state, a missed merge only costs a duplicate screen. DOI identity wins
//! when both records carry one; otherwise a normalized title key plus
//! publication year (plus first-author surname when both sides have
//! authors) must match exactly. Anything ambiguous is treated as no match.

use std::collections::HashMap;

use crate::model::Citation;

/// Lowercase a DOI and strip resolver prefixes.
///
/// DOIs are case-insensitive by definition; registries and exports disagree
/// on casing and on whether to prepend `https://doi.org/`.
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
        "doi:",
    ] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim_start_matches('/').to_string();
            break;
        }
    }
    let doi = doi.trim_end_matches(['.', ';', ',']).to_string();
    if doi.starts_with("10.") && doi.contains('/') {
        Some(doi)
    } else {
        None
    }
}

/// Reduce a title to a comparison key: lowercase, diacritics folded,
/// punctuation dropped, whitespace collapsed.
pub fn title_key(title: &str) -> String {
    let mut key = String::with_capacity(title.len());
    let mut last_was_space = true;
    for c in title.chars() {
        for folded in fold_char(c) {
            if folded.is_alphanumeric() {
                key.extend(folded.to_lowercase());
                last_was_space = false;
            } else if folded.is_whitespace() || folded == '-' {
                if !last_was_space {
                    key.push(' ');
                    last_was_space = true;
                }
            }
            // Other punctuation is dropped entirely.
        }
    }
    key.trim_end().to_string()
}

/// Fold common Latin diacritics to their ASCII base letter.
///
/// Imports mix pre-composed accented characters with plain ASCII for the
/// same article, so the key must not distinguish them. Unmapped characters
/// pass through unchanged.
fn fold_char(c: char) -> impl Iterator<Item = char> {
    let folded: &str = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "a",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "o",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ñ' | 'Ñ' => "n",
        'ç' | 'Ç' => "c",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        'đ' | 'Đ' | 'ð' => "d",
        'š' | 'Š' => "s",
        'ž' | 'Ž' => "z",
        _ => return Fold::Keep(c),
    };
    Fold::Mapped(folded.chars())
}

enum Fold {
    Keep(char),
    Mapped(std::str::Chars<'static>),
}

impl Iterator for Fold {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        match self {
            Fold::Keep(c) => {
                let c = *c;
                *self = Fold::Mapped("".chars());
                Some(c)
            }
            Fold::Mapped(chars) => chars.next(),
        }
    }
}

/// Fallback identity: title key + year, with first-author surname when
/// both records carry authors.
fn fallback_key(citation: &Citation) -> Option<(String, i32)> {
    let key = title_key(&citation.title);
    if key.is_empty() {
        return None;
    }
    Some((key, citation.year?))
}

/// Index over a review's existing citations for duplicate lookup.
///
/// Built once per import batch from a snapshot of stored citations, then
/// queried per incoming record. Ambiguous fallback keys (two stored
/// citations sharing a title key and year) are dropped from the index, so
/// they can never match.
pub struct CitationMatcher {
    by_doi: HashMap<String, i64>,
    by_title_year: HashMap<(String, i32), FallbackEntry>,
}

enum FallbackEntry {
    Unique { id: i64, surname: Option<String> },
    Ambiguous,
}

impl CitationMatcher {
    pub fn new(existing: &[Citation]) -> Self {
        let mut matcher = Self {
            by_doi: HashMap::new(),
            by_title_year: HashMap::new(),
        };
        for c in existing {
            matcher.insert(c);
        }
        matcher
    }

    /// Register a stored citation, so later records in the same import
    /// batch dedupe against it.
    pub fn insert(&mut self, citation: &Citation) {
        if let Some(doi) = citation.doi.as_deref().and_then(normalize_doi) {
            self.by_doi.insert(doi, citation.id);
        }
        if let Some(key) = fallback_key(citation) {
            self.by_title_year
                .entry(key)
                .and_modify(|e| *e = FallbackEntry::Ambiguous)
                .or_insert(FallbackEntry::Unique {
                    id: citation.id,
                    surname: citation.first_author_surname(),
                });
        }
    }

    /// The stored citation ID the incoming record duplicates, if any.
    pub fn find_match(&self, incoming: &Citation) -> Option<i64> {
        if let Some(doi) = incoming.doi.as_deref().and_then(normalize_doi) {
            if let Some(&id) = self.by_doi.get(&doi) {
                return Some(id);
            }
        }

        let key = fallback_key(incoming)?;
        match self.by_title_year.get(&key)? {
            FallbackEntry::Unique { id, surname } => {
                // When both sides name authors, the surnames must agree.
                match (surname, incoming.first_author_surname()) {
                    (Some(stored), Some(inc)) if *stored != inc => None,
                    _ => Some(*id),
                }
            }
            FallbackEntry::Ambiguous => {
                tracing::warn!(
                    title = %incoming.title,
                    year = ?incoming.year,
                    "Multiple stored citations share this title and year; not merging"
                );
                None
            }
        }
    }
}
