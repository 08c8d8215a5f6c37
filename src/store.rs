//! SQLite persistence for reviews, citations, decisions, and extractions.
//!
//! The store is the sole source of truth for resumability: the orchestrator
//! holds no state across invocations, and PRISMA counts are derived purely
//! from rows written here. Writes are scoped per entity; the one global
//! invariant is that a citation's stage result (decisions + outcome) is
//! committed as a single transaction, so a crash never leaves an outcome
//! without the decisions that produced it.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::model::{
    Citation, ExtractionRecord, OutcomeState, Review, ScreeningDecision, Source, Stage,
    StageOutcome, Verdict,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS reviews (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE,
    protocol_path TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS citations (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    review_id    INTEGER NOT NULL REFERENCES reviews(id),
    source       TEXT NOT NULL,
    source_key   TEXT,
    title        TEXT NOT NULL,
    authors      TEXT NOT NULL DEFAULT '[]',
    abstract     TEXT,
    year         INTEGER,
    doi          TEXT,
    journal      TEXT,
    fulltext     TEXT,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_citations_review ON citations(review_id);
CREATE INDEX IF NOT EXISTS idx_citations_doi ON citations(review_id, doi);

CREATE TABLE IF NOT EXISTS decisions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    citation_id INTEGER NOT NULL REFERENCES citations(id),
    stage       TEXT NOT NULL CHECK(stage IN ('abstract', 'fulltext')),
    reviewer    TEXT NOT NULL,
    model       TEXT NOT NULL,
    verdict     TEXT NOT NULL CHECK(verdict IN ('include', 'exclude', 'uncertain')),
    rationale   TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    UNIQUE(citation_id, stage, reviewer)
);
CREATE INDEX IF NOT EXISTS idx_decisions_citation ON decisions(citation_id, stage);

CREATE TABLE IF NOT EXISTS outcomes (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    citation_id         INTEGER NOT NULL REFERENCES citations(id),
    stage               TEXT NOT NULL CHECK(stage IN ('abstract', 'fulltext')),
    state               TEXT NOT NULL
        CHECK(state IN ('include', 'exclude', 'uncertain', 'pdf_unavailable')),
    required_tiebreaker INTEGER NOT NULL DEFAULT 0,
    decisive_reviewer   TEXT,
    exclusion_reason    TEXT,
    created_at          TEXT NOT NULL,
    UNIQUE(citation_id, stage)
);
CREATE INDEX IF NOT EXISTS idx_outcomes_citation ON outcomes(citation_id, stage);

CREATE TABLE IF NOT EXISTS extractions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    citation_id  INTEGER NOT NULL UNIQUE REFERENCES citations(id),
    data         TEXT NOT NULL,
    model        TEXT NOT NULL,
    extracted_at TEXT NOT NULL
);
";

/// SQLite-backed entity store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open review DB: {}", db_path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA temp_store   = MEMORY;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Reviews ──────────────────────────────────────────────────

    pub fn create_review(&self, name: &str, protocol_path: Option<&str>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reviews (name, protocol_path, created_at) VALUES (?1, ?2, ?3)",
            params![name, protocol_path, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to create review '{name}'"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn review_by_name(&self, name: &str) -> Result<Option<Review>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, protocol_path, created_at FROM reviews WHERE name = ?1")?;
        let mut rows = stmt.query_map(params![name], row_to_review)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_reviews(&self) -> Result<Vec<Review>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, protocol_path, created_at FROM reviews ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], row_to_review)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    // ── Citations ────────────────────────────────────────────────

    pub fn insert_citation(&self, review_id: i64, citation: &Citation) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO citations
                (review_id, source, source_key, title, authors, abstract, year, doi, journal,
                 fulltext, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                review_id,
                citation.source.as_str(),
                citation.source_key,
                citation.title,
                serde_json::to_string(&citation.authors)?,
                citation.abstract_text,
                citation.year,
                citation.doi,
                citation.journal,
                citation.fulltext,
                citation.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Dedupe-merge: enrich an existing row with fields the incoming record
    /// has and the stored one lacks. Never overwrites populated fields and
    /// never creates a duplicate row.
    pub fn merge_citation(&self, citation_id: i64, incoming: &Citation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE citations SET
                abstract   = COALESCE(abstract, ?2),
                year       = COALESCE(year, ?3),
                doi        = COALESCE(doi, ?4),
                journal    = COALESCE(journal, ?5),
                source_key = COALESCE(source_key, ?6)
             WHERE id = ?1",
            params![
                citation_id,
                incoming.abstract_text,
                incoming.year,
                incoming.doi,
                incoming.journal,
                incoming.source_key,
            ],
        )?;
        Ok(())
    }

    pub fn citation(&self, citation_id: i64) -> Result<Option<Citation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CITATION_COLS} FROM citations c WHERE c.id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![citation_id], row_to_citation)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn citations(&self, review_id: i64) -> Result<Vec<Citation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CITATION_COLS} FROM citations c WHERE c.review_id = ?1 ORDER BY c.id"
        ))?;
        let rows = stmt.query_map(params![review_id], row_to_citation)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    pub fn attach_fulltext(&self, citation_id: i64, text: &str) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE citations SET fulltext = ?2 WHERE id = ?1",
            params![citation_id, text],
        )?;
        if n == 0 {
            anyhow::bail!("No citation with id {citation_id}");
        }
        Ok(())
    }

    // ── Decisions & outcomes ─────────────────────────────────────

    pub fn decisions(&self, citation_id: i64, stage: Stage) -> Result<Vec<ScreeningDecision>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT citation_id, stage, reviewer, model, verdict, rationale, created_at
             FROM decisions WHERE citation_id = ?1 AND stage = ?2 ORDER BY reviewer",
        )?;
        let rows = stmt.query_map(params![citation_id, stage.as_str()], row_to_decision)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    /// Persist a citation's stage result as one transaction.
    ///
    /// Decisions upsert with last-write-wins on (citation, stage, reviewer);
    /// the outcome, when present, upserts on (citation, stage). Passing no
    /// outcome persists partial progress for a `needs_retry` citation.
    pub fn persist_stage_result(
        &self,
        decisions: &[ScreeningDecision],
        outcome: Option<&StageOutcome>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for d in decisions {
            tx.execute(
                "INSERT OR REPLACE INTO decisions
                    (citation_id, stage, reviewer, model, verdict, rationale, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    d.citation_id,
                    d.stage.as_str(),
                    d.reviewer,
                    d.model,
                    d.verdict.as_str(),
                    d.rationale,
                    d.created_at.to_rfc3339(),
                ],
            )?;
        }
        if let Some(o) = outcome {
            tx.execute(
                "INSERT OR REPLACE INTO outcomes
                    (citation_id, stage, state, required_tiebreaker, decisive_reviewer,
                     exclusion_reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    o.citation_id,
                    o.stage.as_str(),
                    o.state.as_str(),
                    o.required_tiebreaker,
                    o.decisive_reviewer,
                    o.exclusion_reason,
                    o.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn outcome(&self, citation_id: i64, stage: Stage) -> Result<Option<StageOutcome>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OUTCOME_COLS} FROM outcomes o WHERE o.citation_id = ?1 AND o.stage = ?2"
        ))?;
        let mut rows = stmt.query_map(params![citation_id, stage.as_str()], row_to_outcome)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn outcomes(&self, review_id: i64, stage: Stage) -> Result<Vec<StageOutcome>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OUTCOME_COLS} FROM outcomes o
             JOIN citations c ON o.citation_id = c.id
             WHERE c.review_id = ?1 AND o.stage = ?2 ORDER BY o.citation_id"
        ))?;
        let rows = stmt.query_map(params![review_id, stage.as_str()], row_to_outcome)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    /// Citations still owed an outcome at a stage.
    ///
    /// Abstract: every citation without an abstract outcome. Full-text:
    /// abstract-included citations without a full-text outcome.
    pub fn pending_for_stage(&self, review_id: i64, stage: Stage) -> Result<Vec<Citation>> {
        let conn = self.conn.lock();
        let sql = match stage {
            Stage::Abstract => format!(
                "SELECT {CITATION_COLS} FROM citations c
                 LEFT JOIN outcomes o ON o.citation_id = c.id AND o.stage = 'abstract'
                 WHERE c.review_id = ?1 AND o.id IS NULL ORDER BY c.id"
            ),
            Stage::Fulltext => format!(
                "SELECT {CITATION_COLS} FROM citations c
                 JOIN outcomes ab ON ab.citation_id = c.id
                     AND ab.stage = 'abstract' AND ab.state = 'include'
                 LEFT JOIN outcomes ft ON ft.citation_id = c.id AND ft.stage = 'fulltext'
                 WHERE c.review_id = ?1 AND ft.id IS NULL ORDER BY c.id"
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![review_id], row_to_citation)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    /// Citations whose outcome at `stage` is `include`.
    pub fn included_at(&self, review_id: i64, stage: Stage) -> Result<Vec<Citation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CITATION_COLS} FROM citations c
             JOIN outcomes o ON o.citation_id = c.id
             WHERE c.review_id = ?1 AND o.stage = ?2 AND o.state = 'include' ORDER BY c.id"
        ))?;
        let rows = stmt.query_map(params![review_id, stage.as_str()], row_to_citation)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    // ── Extractions ──────────────────────────────────────────────

    pub fn save_extraction(&self, record: &ExtractionRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO extractions (citation_id, data, model, extracted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.citation_id,
                serde_json::to_string(&record.data)?,
                record.model,
                record.extracted_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn extraction(&self, citation_id: i64) -> Result<Option<ExtractionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT citation_id, data, model, extracted_at FROM extractions WHERE citation_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![citation_id], row_to_extraction)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn extractions(&self, review_id: i64) -> Result<Vec<ExtractionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT e.citation_id, e.data, e.model, e.extracted_at FROM extractions e
             JOIN citations c ON e.citation_id = c.id
             WHERE c.review_id = ?1 ORDER BY e.citation_id",
        )?;
        let rows = stmt.query_map(params![review_id], row_to_extraction)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    /// Full-text-included citations with no extraction record yet.
    pub fn unextracted(&self, review_id: i64) -> Result<Vec<Citation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CITATION_COLS} FROM citations c
             JOIN outcomes o ON o.citation_id = c.id
                 AND o.stage = 'fulltext' AND o.state = 'include'
             LEFT JOIN extractions e ON e.citation_id = c.id
             WHERE c.review_id = ?1 AND e.id IS NULL ORDER BY c.id"
        ))?;
        let rows = stmt.query_map(params![review_id], row_to_citation)?;
        rows.collect::<std::result::Result<_, _>>().map_err(Into::into)
    }
}

// ── Row mapping ──────────────────────────────────────────────────

const CITATION_COLS: &str = "c.id, c.review_id, c.source, c.source_key, c.title, c.authors, \
     c.abstract, c.year, c.doi, c.journal, c.fulltext, c.created_at";

const OUTCOME_COLS: &str = "o.citation_id, o.stage, o.state, o.required_tiebreaker, \
     o.decisive_reviewer, o.exclusion_reason, o.created_at";

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_review(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        name: row.get(1)?,
        protocol_path: row.get(2)?,
        created_at: parse_ts(row.get(3)?),
    })
}

fn row_to_citation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Citation> {
    let authors: String = row.get(5)?;
    Ok(Citation {
        id: row.get(0)?,
        review_id: row.get(1)?,
        source: Source::from_str_lossy(&row.get::<_, String>(2)?),
        source_key: row.get(3)?,
        title: row.get(4)?,
        authors: serde_json::from_str(&authors).unwrap_or_default(),
        abstract_text: row.get(6)?,
        year: row.get(7)?,
        doi: row.get(8)?,
        journal: row.get(9)?,
        fulltext: row.get(10)?,
        created_at: parse_ts(row.get(11)?),
    })
}

fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScreeningDecision> {
    Ok(ScreeningDecision {
        citation_id: row.get(0)?,
        stage: Stage::from_str_lossy(&row.get::<_, String>(1)?),
        reviewer: row.get(2)?,
        model: row.get(3)?,
        verdict: Verdict::from_str_lossy(&row.get::<_, String>(4)?),
        rationale: row.get(5)?,
        created_at: parse_ts(row.get(6)?),
    })
}

fn row_to_outcome(row: &rusqlite::Row<'_>) -> rusqlite::Result<StageOutcome> {
    Ok(StageOutcome {
        citation_id: row.get(0)?,
        stage: Stage::from_str_lossy(&row.get::<_, String>(1)?),
        state: OutcomeState::from_str_lossy(&row.get::<_, String>(2)?),
        required_tiebreaker: row.get(3)?,
        decisive_reviewer: row.get(4)?,
        exclusion_reason: row.get(5)?,
        created_at: parse_ts(row.get(6)?),
    })
}

fn row_to_extraction(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExtractionRecord> {
    let data: String = row.get(1)?;
    Ok(ExtractionRecord {
        citation_id: row.get(0)?,
        data: serde_json::from_str(&data).unwrap_or_default(),
        model: row.get(2)?,
        extracted_at: parse_ts(row.get(3)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn citation(title: &str) -> Citation {
        let mut c = Citation::new(title);
        c.source = Source::Ris;
        c.authors = vec!["Smith, Jane".into()];
        c.year = Some(2020);
        c
    }

    fn decision(citation_id: i64, stage: Stage, reviewer: &str, verdict: Verdict) -> ScreeningDecision {
        ScreeningDecision {
            citation_id,
            stage,
            reviewer: reviewer.into(),
            model: "test-model".into(),
            verdict,
            rationale: format!("{reviewer} says {verdict}"),
            created_at: Utc::now(),
        }
    }

    fn outcome(citation_id: i64, stage: Stage, state: OutcomeState) -> StageOutcome {
        StageOutcome {
            citation_id,
            stage,
            state,
            required_tiebreaker: false,
            decisive_reviewer: Some("r1".into()),
            exclusion_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn open_on_disk_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data").join("reviews.db");
        let store = Store::open(&path).unwrap();
        let rid = store.create_review("pilot", None).unwrap();
        drop(store);

        let store = Store::open(&path).unwrap();
        let review = store.review_by_name("pilot").unwrap().unwrap();
        assert_eq!(review.id, rid);
    }

    #[test]
    fn duplicate_review_name_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.create_review("r", None).unwrap();
        assert!(store.create_review("r", None).is_err());
    }

    #[test]
    fn citation_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let mut c = citation("Foo Bar");
        c.doi = Some("10.1000/xyz".into());
        let cid = store.insert_citation(rid, &c).unwrap();

        let got = store.citation(cid).unwrap().unwrap();
        assert_eq!(got.title, "Foo Bar");
        assert_eq!(got.authors, vec!["Smith, Jane".to_string()]);
        assert_eq!(got.doi.as_deref(), Some("10.1000/xyz"));
        assert_eq!(got.review_id, rid);
    }

    #[test]
    fn merge_fills_only_missing_fields() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let mut stored = citation("Foo");
        stored.year = Some(2019);
        let cid = store.insert_citation(rid, &stored).unwrap();

        let mut incoming = citation("Foo");
        incoming.year = Some(2022);
        incoming.abstract_text = Some("An abstract.".into());
        incoming.doi = Some("10.1/abc".into());
        store.merge_citation(cid, &incoming).unwrap();

        let got = store.citation(cid).unwrap().unwrap();
        assert_eq!(got.year, Some(2019), "populated field must not be overwritten");
        assert_eq!(got.abstract_text.as_deref(), Some("An abstract."));
        assert_eq!(got.doi.as_deref(), Some("10.1/abc"));
    }

    #[test]
    fn decision_upsert_is_last_write_wins() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let cid = store.insert_citation(rid, &citation("Foo")).unwrap();

        store
            .persist_stage_result(
                &[decision(cid, Stage::Abstract, "r1", Verdict::Include)],
                None,
            )
            .unwrap();
        store
            .persist_stage_result(
                &[decision(cid, Stage::Abstract, "r1", Verdict::Exclude)],
                None,
            )
            .unwrap();

        let decisions = store.decisions(cid, Stage::Abstract).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].verdict, Verdict::Exclude);
    }

    #[test]
    fn stage_result_commits_decisions_and_outcome_together() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let cid = store.insert_citation(rid, &citation("Foo")).unwrap();

        store
            .persist_stage_result(
                &[
                    decision(cid, Stage::Abstract, "r1", Verdict::Include),
                    decision(cid, Stage::Abstract, "r2", Verdict::Include),
                ],
                Some(&outcome(cid, Stage::Abstract, OutcomeState::Include)),
            )
            .unwrap();

        assert_eq!(store.decisions(cid, Stage::Abstract).unwrap().len(), 2);
        let o = store.outcome(cid, Stage::Abstract).unwrap().unwrap();
        assert_eq!(o.state, OutcomeState::Include);
    }

    #[test]
    fn pending_for_abstract_excludes_resolved() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let a = store.insert_citation(rid, &citation("A")).unwrap();
        let b = store.insert_citation(rid, &citation("B")).unwrap();

        store
            .persist_stage_result(&[], Some(&outcome(a, Stage::Abstract, OutcomeState::Exclude)))
            .unwrap();

        let pending = store.pending_for_stage(rid, Stage::Abstract).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
    }

    #[test]
    fn pending_for_fulltext_requires_abstract_include() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let a = store.insert_citation(rid, &citation("A")).unwrap();
        let b = store.insert_citation(rid, &citation("B")).unwrap();
        let c = store.insert_citation(rid, &citation("C")).unwrap();

        store
            .persist_stage_result(&[], Some(&outcome(a, Stage::Abstract, OutcomeState::Include)))
            .unwrap();
        store
            .persist_stage_result(&[], Some(&outcome(b, Stage::Abstract, OutcomeState::Exclude)))
            .unwrap();
        store
            .persist_stage_result(&[], Some(&outcome(c, Stage::Abstract, OutcomeState::Include)))
            .unwrap();
        store
            .persist_stage_result(&[], Some(&outcome(c, Stage::Fulltext, OutcomeState::Include)))
            .unwrap();

        let pending = store.pending_for_stage(rid, Stage::Fulltext).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a);
    }

    #[test]
    fn attach_fulltext_updates_flag() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let cid = store.insert_citation(rid, &citation("A")).unwrap();
        assert!(!store.citation(cid).unwrap().unwrap().has_fulltext());

        store.attach_fulltext(cid, "Full article text.").unwrap();
        assert!(store.citation(cid).unwrap().unwrap().has_fulltext());

        assert!(store.attach_fulltext(9999, "x").is_err());
    }

    #[test]
    fn extraction_round_trip_and_unextracted() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let cid = store.insert_citation(rid, &citation("A")).unwrap();
        store
            .persist_stage_result(&[], Some(&outcome(cid, Stage::Fulltext, OutcomeState::Include)))
            .unwrap();
        assert_eq!(store.unextracted(rid).unwrap().len(), 1);

        let mut data = serde_json::Map::new();
        data.insert("sample_size".into(), serde_json::json!(120));
        store
            .save_extraction(&ExtractionRecord {
                citation_id: cid,
                data,
                model: "test-model".into(),
                extracted_at: Utc::now(),
            })
            .unwrap();

        assert!(store.unextracted(rid).unwrap().is_empty());
        let got = store.extraction(cid).unwrap().unwrap();
        assert_eq!(got.data["sample_size"], serde_json::json!(120));
    }

    #[test]
    fn pdf_unavailable_outcome_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let rid = store.create_review("r", None).unwrap();
        let cid = store.insert_citation(rid, &citation("A")).unwrap();
        store
            .persist_stage_result(
                &[],
                Some(&outcome(cid, Stage::Fulltext, OutcomeState::PdfUnavailable)),
            )
            .unwrap();
        let o = store.outcome(cid, Stage::Fulltext).unwrap().unwrap();
        assert_eq!(o.state, OutcomeState::PdfUnavailable);
    }
}
