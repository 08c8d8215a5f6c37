//! PRISMA flow aggregation.
//!
//! The report is a pure computation over citations and stored outcomes:
//! running it writes nothing and never invokes a model, so it can be
//! recomputed at any point mid-review and the numbers always reconcile
//! with the underlying rows.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::model::{OutcomeState, Stage, StageOutcome};
use crate::store::Store;

/// Counts for one screening stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageCounts {
    pub screened: usize,
    pub included: usize,
    pub excluded: usize,
    pub uncertain: usize,
    /// Full-text stage only; always zero at the abstract stage.
    pub pdf_unavailable: usize,
    /// Outcomes that required the tiebreaker.
    pub tiebreaks: usize,
    /// Exclusion reason text, grouped by exact string, descending count.
    pub exclusion_reasons: Vec<(String, usize)>,
}

impl StageCounts {
    fn from_outcomes(outcomes: &[StageOutcome]) -> Self {
        let mut counts = Self {
            screened: outcomes.len(),
            ..Self::default()
        };
        let mut reasons: BTreeMap<&str, usize> = BTreeMap::new();
        for o in outcomes {
            match o.state {
                OutcomeState::Include => counts.included += 1,
                OutcomeState::Exclude => {
                    counts.excluded += 1;
                    if let Some(reason) = o.exclusion_reason.as_deref() {
                        *reasons.entry(reason).or_default() += 1;
                    }
                }
                OutcomeState::Uncertain => counts.uncertain += 1,
                OutcomeState::PdfUnavailable => counts.pdf_unavailable += 1,
            }
            if o.required_tiebreaker {
                counts.tiebreaks += 1;
            }
        }
        counts.exclusion_reasons = reasons
            .into_iter()
            .map(|(r, n)| (r.to_string(), n))
            .collect();
        // BTreeMap gives alphabetical order; the report wants most-common
        // first, ties alphabetical.
        counts.exclusion_reasons.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }

    /// Inclusion rate over decided citations. Unresolved and
    /// PDF-unavailable citations are outside the denominator.
    pub fn inclusion_rate(&self) -> Option<f64> {
        let decided = self.included + self.excluded + self.uncertain;
        (decided > 0).then(|| self.included as f64 / decided as f64)
    }
}

/// A PRISMA-style flow report for one review.
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport {
    pub review: String,
    /// Records imported, after deduplication.
    pub identified: usize,
    pub abstract_stage: StageCounts,
    pub fulltext_stage: StageCounts,
    pub extracted: usize,
}

impl FlowReport {
    /// Compute the flow report from stored rows. Read-only.
    pub fn compute(store: &Store, review_id: i64, review_name: &str) -> Result<Self> {
        let identified = store.citations(review_id)?.len();
        let abstract_stage =
            StageCounts::from_outcomes(&store.outcomes(review_id, Stage::Abstract)?);
        let fulltext_stage =
            StageCounts::from_outcomes(&store.outcomes(review_id, Stage::Fulltext)?);
        let extracted = store.extractions(review_id)?.len();

        Ok(Self {
            review: review_name.to_string(),
            identified,
            abstract_stage,
            fulltext_stage,
            extracted,
        })
    }

    /// Citations imported but not yet screened at the abstract stage.
    pub fn awaiting_abstract(&self) -> usize {
        self.identified.saturating_sub(self.abstract_stage.screened)
    }

    /// Abstract-included citations not yet resolved at full text.
    pub fn awaiting_fulltext(&self) -> usize {
        self.abstract_stage
            .included
            .saturating_sub(self.fulltext_stage.screened)
    }

    /// Human-readable flow summary for the terminal.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mut line = |s: String| {
            out.push_str(&s);
            out.push('\n');
        };

        line(format!("PRISMA flow: {}", self.review));
        line(format!("  Records identified:         {}", self.identified));
        line(format!(
            "  Abstract screened:          {} ({} pending)",
            self.abstract_stage.screened,
            self.awaiting_abstract()
        ));
        line(format!(
            "    included {} / excluded {} / uncertain {}",
            self.abstract_stage.included,
            self.abstract_stage.excluded,
            self.abstract_stage.uncertain
        ));
        line(format!(
            "  Full text screened:         {} ({} pending)",
            self.fulltext_stage.screened,
            self.awaiting_fulltext()
        ));
        line(format!(
            "    included {} / excluded {} / uncertain {} / no PDF {}",
            self.fulltext_stage.included,
            self.fulltext_stage.excluded,
            self.fulltext_stage.uncertain,
            self.fulltext_stage.pdf_unavailable
        ));
        line(format!("  Extracted:                  {}", self.extracted));

        if !self.fulltext_stage.exclusion_reasons.is_empty() {
            line("  Full-text exclusion reasons:".to_string());
            for (reason, n) in &self.fulltext_stage.exclusion_reasons {
                line(format!("    {n:>4}  {reason}"));
            }
        }
        out
    }
}
