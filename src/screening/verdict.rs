//! Parsing free-form model output into a tagged verdict.
//!
//! Reviewers are instructed to answer with a `REASONING:` block followed by
//! `DECISION: INCLUDE|EXCLUDE|UNCERTAIN`. Output that cannot be mapped onto
//! one of the three verdicts is an explicit parse error — never a silent
//! default — so malformed model output is surfaced to the operator instead
//! of skewing the screen.

use thiserror::Error;

use crate::model::Verdict;

/// Model output that does not map onto a verdict.
#[derive(Debug, Error)]
#[error("could not parse a screening verdict from model output: {snippet}")]
pub struct VerdictParseError {
    /// Leading slice of the offending output, for operator diagnostics.
    pub snippet: String,
}

impl VerdictParseError {
    fn new(response: &str) -> Self {
        let trimmed = response.trim();
        let end = trimmed
            .char_indices()
            .take(160)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        Self {
            snippet: trimmed[..end].to_string(),
        }
    }
}

// Markers are ASCII, so matching compares bytes case-insensitively against
// the original response. Uppercasing the whole response first would shift
// byte offsets for characters whose uppercase form has a different UTF-8
// length (dotless i, ligatures), and the offsets must index `response`.

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle`.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

/// Byte offset of the last ASCII-case-insensitive occurrence of `needle`.
fn rfind_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len())
        .rev()
        .find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn starts_with_ascii_ci(haystack: &str, needle: &str) -> bool {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    h.len() >= n.len() && h[..n.len()].eq_ignore_ascii_case(n)
}

fn contains_ascii_ci(haystack: &str, needle: &str) -> bool {
    find_ascii_ci(haystack, needle).is_some()
}

/// Parse a reviewer response into (verdict, rationale).
///
/// Primary path is the `DECISION:` marker; the rationale is the text of the
/// `REASONING:` block when present, otherwise the full response. A keyword
/// fallback handles models that answer with a bare "INCLUDE"/"EXCLUDE", but
/// an answer mentioning both without a marker is unparseable.
pub fn parse_verdict(response: &str) -> Result<(Verdict, String), VerdictParseError> {
    let rationale = extract_rationale(response);

    if let Some(pos) = rfind_ascii_ci(response, "DECISION:") {
        let after = response[pos + "DECISION:".len()..].trim_start();
        let after = after.trim_start_matches(['[', '*', '_']);
        let verdict = if starts_with_ascii_ci(after, "INCLUDE") {
            Verdict::Include
        } else if starts_with_ascii_ci(after, "EXCLUDE") {
            Verdict::Exclude
        } else if starts_with_ascii_ci(after, "UNCERTAIN") {
            Verdict::Uncertain
        } else {
            return Err(VerdictParseError::new(response));
        };
        return Ok((verdict, rationale));
    }

    // No marker: accept only an unambiguous keyword.
    let has_include =
        contains_ascii_ci(response, "INCLUDE") && !contains_ascii_ci(response, "NOT INCLUDE");
    let has_exclude = contains_ascii_ci(response, "EXCLUDE");
    let has_uncertain = contains_ascii_ci(response, "UNCERTAIN");
    match (has_include, has_exclude, has_uncertain) {
        (true, false, false) => Ok((Verdict::Include, rationale)),
        (false, true, false) => Ok((Verdict::Exclude, rationale)),
        (false, false, true) => Ok((Verdict::Uncertain, rationale)),
        _ => Err(VerdictParseError::new(response)),
    }
}

/// The `REASONING:` block when present, otherwise everything before the
/// decision marker, otherwise the whole response.
fn extract_rationale(response: &str) -> String {
    let decision_pos = rfind_ascii_ci(response, "DECISION:");
    let reasoning_pos = find_ascii_ci(response, "REASONING:");

    let slice = match (reasoning_pos, decision_pos) {
        (Some(r), Some(d)) if d > r => &response[r + "REASONING:".len()..d],
        (Some(r), None) => &response[r + "REASONING:".len()..],
        (None, Some(d)) => &response[..d],
        _ => response,
    };
    slice.trim().to_string()
}
