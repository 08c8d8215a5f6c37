//! Secondary filters over extracted citations.
//!
//! After extraction, the review team applies deterministic eligibility
//! checks that need the extracted data rather than a model: studies that
//! never report the required outcome variables, duplicates that slipped
//! past import dedupe (preprint vs journal version), and interventions or
//! comparators outside the protocol's eligible set. Findings are advisory:
//! nothing is removed from storage, the operator decides what to exclude
//! and records it in the protocol.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::matcher::{normalize_doi, title_key};
use crate::model::{Citation, ExtractionRecord};

// ── Rules ────────────────────────────────────────────────────────

/// Protocol-authored filter configuration.
///
/// All lists are optional; an empty list disables that check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Extraction variables that must be reported (non-null, not an
    /// "NR"-style placeholder).
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Eligible intervention names; matched by substring in either
    /// direction, case-insensitively.
    #[serde(default)]
    pub eligible_interventions: Vec<String>,
    /// Eligible comparator names, matched the same way.
    #[serde(default)]
    pub eligible_comparators: Vec<String>,
    /// Extraction variable holding the intervention.
    #[serde(default = "default_intervention_field")]
    pub intervention_field: String,
    /// Extraction variable holding the comparator.
    #[serde(default = "default_comparator_field")]
    pub comparator_field: String,
}

fn default_intervention_field() -> String {
    "intervention".into()
}

fn default_comparator_field() -> String {
    "comparator".into()
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            required_fields: Vec::new(),
            eligible_interventions: Vec::new(),
            eligible_comparators: Vec::new(),
            intervention_field: default_intervention_field(),
            comparator_field: default_comparator_field(),
        }
    }
}

// ── Findings ─────────────────────────────────────────────────────

/// Why a citation was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    MissingRequiredField,
    DuplicateStudy,
    IneligibleIntervention,
    IneligibleComparator,
}

impl FilterReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingRequiredField => "missing required field",
            Self::DuplicateStudy => "duplicate study",
            Self::IneligibleIntervention => "ineligible intervention",
            Self::IneligibleComparator => "ineligible comparator",
        }
    }
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flagged citation, with enough context to act on it.
#[derive(Debug, Clone, Serialize)]
pub struct FilterFinding {
    pub citation_id: i64,
    pub reason: FilterReason,
    pub details: String,
}

/// Findings tallied by reason, for the run summary.
pub fn summary(findings: &[FilterFinding]) -> BTreeMap<FilterReason, usize> {
    let mut counts = BTreeMap::new();
    for f in findings {
        *counts.entry(f.reason).or_insert(0) += 1;
    }
    counts
}

// ── Filter ───────────────────────────────────────────────────────

/// Applies the configured checks over (citation, extraction) pairs.
pub struct SecondaryFilter {
    rules: FilterRules,
}

impl SecondaryFilter {
    pub fn new(rules: FilterRules) -> Self {
        Self { rules }
    }

    /// Flag citations failing any check; at most one finding per citation,
    /// checks applied in declaration order.
    ///
    /// Duplicate detection runs in citation-id order, so the earlier record
    /// is the one kept and the later one flagged.
    pub fn apply(&self, items: &[(Citation, ExtractionRecord)]) -> Vec<FilterFinding> {
        let mut ordered: Vec<&(Citation, ExtractionRecord)> = items.iter().collect();
        ordered.sort_by_key(|(c, _)| c.id);

        let mut findings = Vec::new();
        let mut seen_dois: HashMap<String, i64> = HashMap::new();
        let mut seen_titles: HashMap<String, i64> = HashMap::new();

        for (citation, record) in ordered {
            let finding = self
                .missing_field(citation, record)
                .or_else(|| self.duplicate(citation, &mut seen_dois, &mut seen_titles))
                .or_else(|| {
                    self.ineligible(
                        citation,
                        record,
                        &self.rules.intervention_field,
                        &self.rules.eligible_interventions,
                        FilterReason::IneligibleIntervention,
                    )
                })
                .or_else(|| {
                    self.ineligible(
                        citation,
                        record,
                        &self.rules.comparator_field,
                        &self.rules.eligible_comparators,
                        FilterReason::IneligibleComparator,
                    )
                });
            if let Some(f) = finding {
                tracing::info!(
                    citation_id = f.citation_id,
                    reason = %f.reason,
                    details = %f.details,
                    "Secondary filter flagged citation"
                );
                findings.push(f);
            }
        }
        findings
    }

    fn missing_field(
        &self,
        citation: &Citation,
        record: &ExtractionRecord,
    ) -> Option<FilterFinding> {
        let field = self
            .rules
            .required_fields
            .iter()
            .find(|f| is_missing(record.data.get(f.as_str())))?;
        Some(FilterFinding {
            citation_id: citation.id,
            reason: FilterReason::MissingRequiredField,
            details: format!("'{field}' is not reported"),
        })
    }

    /// Identity reuses the import matcher's keys: normalized DOI wins,
    /// normalized title is the fallback.
    fn duplicate(
        &self,
        citation: &Citation,
        seen_dois: &mut HashMap<String, i64>,
        seen_titles: &mut HashMap<String, i64>,
    ) -> Option<FilterFinding> {
        let doi = citation.doi.as_deref().and_then(normalize_doi);
        if let Some(doi) = &doi {
            if let Some(&earlier) = seen_dois.get(doi) {
                return Some(FilterFinding {
                    citation_id: citation.id,
                    reason: FilterReason::DuplicateStudy,
                    details: format!("same DOI as citation {earlier}"),
                });
            }
        }
        let key = title_key(&citation.title);
        if !key.is_empty() {
            if let Some(&earlier) = seen_titles.get(&key) {
                return Some(FilterFinding {
                    citation_id: citation.id,
                    reason: FilterReason::DuplicateStudy,
                    details: format!("same title as citation {earlier}"),
                });
            }
            seen_titles.insert(key, citation.id);
        }
        if let Some(doi) = doi {
            seen_dois.insert(doi, citation.id);
        }
        None
    }

    fn ineligible(
        &self,
        citation: &Citation,
        record: &ExtractionRecord,
        field: &str,
        allowed: &[String],
        reason: FilterReason,
    ) -> Option<FilterFinding> {
        if allowed.is_empty() {
            return None;
        }
        // A study that never reports the field is not flagged here; the
        // required_fields check owns missingness.
        let value = text_value(record.data.get(field))?;
        if matches_any(&value, allowed) {
            return None;
        }
        Some(FilterFinding {
            citation_id: citation.id,
            reason,
            details: format!("'{value}' matches no eligible entry for '{field}'"),
        })
    }
}

/// Null, absent, or an "NR"-style placeholder.
fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "" | "na" | "n/a" | "not available" | "not reported" | "nr" | "none"
        ),
        Some(_) => false,
    }
}

/// String form of a reported value, `None` when missing.
fn text_value(value: Option<&Value>) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    Some(match value? {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    })
}

/// Case-insensitive containment in either direction, so "atorvastatin 80mg"
/// matches an eligible "atorvastatin" and vice versa.
fn matches_any(value: &str, allowed: &[String]) -> bool {
    let v = value.to_lowercase();
    allowed.iter().any(|a| {
        let a = a.to_lowercase();
        v.contains(&a) || a.contains(&v)
    })
}
