//! Citation import: format parsing plus dedupe-aware ingestion.

pub mod ris;

use anyhow::Result;

use crate::matcher::CitationMatcher;
use crate::model::Citation;
use crate::store::Store;

/// Tally for one import batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// New citation rows created.
    pub imported: usize,
    /// Incoming records merged into an existing row.
    pub merged: usize,
}

/// Ingest a batch of parsed citations into a review.
///
/// Each incoming record is matched against everything already stored plus
/// everything inserted earlier in this batch, so a file containing its own
/// duplicates still produces one row per work. Matches enrich the stored
/// row's missing fields; non-matches insert.
pub fn import_citations(
    store: &Store,
    review_id: i64,
    incoming: Vec<Citation>,
) -> Result<ImportSummary> {
    let existing = store.citations(review_id)?;
    let mut matcher = CitationMatcher::new(&existing);
    let mut summary = ImportSummary::default();

    for mut citation in incoming {
        match matcher.find_match(&citation) {
            Some(existing_id) => {
                store.merge_citation(existing_id, &citation)?;
                summary.merged += 1;
            }
            None => {
                citation.review_id = review_id;
                let id = store.insert_citation(review_id, &citation)?;
                citation.id = id;
                matcher.insert(&citation);
                summary.imported += 1;
            }
        }
    }

    tracing::info!(
        review_id,
        imported = summary.imported,
        merged = summary.merged,
        "Citation import finished"
    );
    Ok(summary)
}
