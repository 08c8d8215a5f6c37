//! Shared data model for reviews, citations, and screening state.
//!
//! Every persisted row the pipeline reasons about lives here: citations as
//! imported, per-reviewer screening decisions, the resolved per-stage
//! outcome, and extraction records. The orchestrator and aggregator operate
//! on these types only — they never touch SQL directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Screening stage ──────────────────────────────────────────────

/// A screening pass with its own reviewer set and outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Title + abstract screening.
    Abstract,
    /// Full-text screening over extracted PDF content.
    Fulltext,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abstract => "abstract",
            Self::Fulltext => "fulltext",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "fulltext" => Self::Fulltext,
            _ => Self::Abstract,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Verdict ──────────────────────────────────────────────────────

/// A reviewer's screening verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Include,
    Exclude,
    Uncertain,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
            Self::Uncertain => "uncertain",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "include" => Self::Include,
            "exclude" => Self::Exclude,
            _ => Self::Uncertain,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Import provenance ────────────────────────────────────────────

/// Where a citation record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Ris,
    OpenAlex,
    Zotero,
    Manual,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ris => "ris",
            Self::OpenAlex => "openalex",
            Self::Zotero => "zotero",
            Self::Manual => "manual",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "ris" => Self::Ris,
            "openalex" => Self::OpenAlex,
            "zotero" => Self::Zotero,
            _ => Self::Manual,
        }
    }
}

// ── Citation ─────────────────────────────────────────────────────

/// A citation imported into a review.
///
/// Immutable after import except for the full-text attachment (set by the
/// PDF collaborator) and dedupe merges, which enrich missing fields on the
/// existing row instead of inserting a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Row ID; 0 until persisted.
    #[serde(default)]
    pub id: i64,
    /// Owning review; 0 until persisted.
    #[serde(default)]
    pub review_id: i64,
    pub source: Source,
    /// Zotero item key, RIS index, or external record ID.
    #[serde(default)]
    pub source_key: Option<String>,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    /// Extracted full-text content. Presence doubles as the PDF-availability
    /// flag for the full-text stage.
    #[serde(default)]
    pub fulltext: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Citation {
    /// Minimal constructor for manually-entered citations.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: 0,
            review_id: 0,
            source: Source::Manual,
            source_key: None,
            title: title.into(),
            authors: Vec::new(),
            abstract_text: None,
            year: None,
            doi: None,
            journal: None,
            fulltext: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_abstract(&self) -> bool {
        self.abstract_text
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty())
    }

    pub fn has_fulltext(&self) -> bool {
        self.fulltext
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Surname of the first listed author, used by the fallback identity key.
    ///
    /// Handles both "Smith, Jane" and "Jane Smith" orderings.
    pub fn first_author_surname(&self) -> Option<String> {
        let first = self.authors.first()?;
        let surname = match first.split_once(',') {
            Some((family, _)) => family.trim(),
            None => first.split_whitespace().last()?,
        };
        if surname.is_empty() {
            None
        } else {
            Some(surname.to_lowercase())
        }
    }
}

// ── Screening decision ───────────────────────────────────────────

/// One reviewer's verdict for one citation at one stage.
///
/// At most one row exists per (citation, stage, reviewer); a re-run
/// overwrites rather than appends, which is what makes an interrupted run
/// safely restartable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningDecision {
    pub citation_id: i64,
    pub stage: Stage,
    /// Reviewer name from the protocol configuration.
    pub reviewer: String,
    /// Model that produced the verdict.
    pub model: String,
    pub verdict: Verdict,
    /// Reviewer-authored free-text reasoning.
    pub rationale: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Stage outcome ────────────────────────────────────────────────

/// The resolved terminal state of a citation at a stage.
///
/// `PdfUnavailable` only occurs at the full-text stage and is neither an
/// include nor an exclude: it is reported separately in PRISMA counts and
/// excluded from the inclusion-rate denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    Include,
    Exclude,
    Uncertain,
    PdfUnavailable,
}

impl OutcomeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
            Self::Uncertain => "uncertain",
            Self::PdfUnavailable => "pdf_unavailable",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "include" => Self::Include,
            "exclude" => Self::Exclude,
            "pdf_unavailable" => Self::PdfUnavailable,
            _ => Self::Uncertain,
        }
    }
}

impl From<Verdict> for OutcomeState {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Include => Self::Include,
            Verdict::Exclude => Self::Exclude,
            Verdict::Uncertain => Self::Uncertain,
        }
    }
}

impl std::fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved per-stage outcome, persisted atomically with its contributing
/// decisions. Always recomputable from those decisions — the resolution rule
/// lives in one pure function in the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub citation_id: i64,
    pub stage: Stage,
    pub state: OutcomeState,
    /// Whether primary disagreement forced a tiebreak.
    pub required_tiebreaker: bool,
    /// Reviewer whose verdict determined the outcome (the tiebreaker when
    /// one ran, otherwise the first configured primary).
    pub decisive_reviewer: Option<String>,
    /// Decisive rationale when the state is `Exclude`; opaque free text,
    /// grouped by exact string in PRISMA reports.
    pub exclusion_reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Extraction record ────────────────────────────────────────────

/// Structured data mined from one full-text-included citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub citation_id: i64,
    /// Variable name → coerced value (null when not reported).
    pub data: serde_json::Map<String, serde_json::Value>,
    pub model: String,
    #[serde(default = "Utc::now")]
    pub extracted_at: DateTime<Utc>,
}

// ── Review ───────────────────────────────────────────────────────

/// A named systematic review owning citations and their screening state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub name: String,
    pub protocol_path: Option<String>,
    pub created_at: DateTime<Utc>,
}
