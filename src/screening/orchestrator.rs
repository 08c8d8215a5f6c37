//! The screening state machine, run over a whole review stage.
//!
//! One orchestrator run takes every citation still owed an outcome at a
//! stage, invokes the configured primary reviewers concurrently per
//! citation, and resolves agreement, disagreement (via the tiebreaker), or
//! partial failure (`needs_retry`). All cross-run state lives in the store:
//! stored decisions are reused instead of re-invoking their reviewer, so an
//! interrupted run resumes by simply running again.
//!
//! Resolution is a pure function of the collected verdicts; outcomes are
//! persisted for resumability but always recomputable from their decisions.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};

use crate::llm::{complete_with_retry, LlmClient, RetryPolicy};
use crate::model::{Citation, OutcomeState, ScreeningDecision, Stage, StageOutcome, Verdict};
use crate::protocol::{ReviewProtocol, ReviewerConfig, ReviewerRole};
use crate::store::Store;

use super::prompts;
use super::verdict::parse_verdict;

/// Token budget per screening completion. Verdicts are short; the budget
/// only needs to cover the reasoning block.
const SCREENING_MAX_TOKENS: u32 = 1024;

// ── Reviewer handles ─────────────────────────────────────────────

/// A configured reviewer bound to a provider client.
///
/// Clients are injected rather than constructed here so tests can substitute
/// scripted implementations.
#[derive(Clone)]
pub struct ReviewerHandle {
    pub config: ReviewerConfig,
    pub client: Arc<dyn LlmClient>,
}

// ── Run results ──────────────────────────────────────────────────

/// How a citation left one orchestrator pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A terminal outcome was persisted.
    Resolved(OutcomeState),
    /// At least one reviewer invocation failed after retries; no outcome was
    /// written and the citation will be picked up again on the next run.
    NeedsRetry,
}

/// Per-citation result of one orchestrator pass.
#[derive(Debug, Clone)]
pub struct CitationStageResult {
    pub citation_id: i64,
    pub title: String,
    pub disposition: Disposition,
    pub required_tiebreaker: bool,
    /// Reviewer invocation failures, one message per failed reviewer.
    pub reviewer_errors: Vec<String>,
    /// Provider calls made for this citation, including retries.
    pub llm_calls: u32,
}

/// Aggregated tally for a stage run.
#[derive(Debug, Clone, Default)]
pub struct StageRunSummary {
    pub screened: usize,
    pub included: usize,
    pub excluded: usize,
    pub uncertain: usize,
    pub pdf_unavailable: usize,
    pub needs_retry: usize,
    pub tiebreaks: usize,
    pub llm_calls: u32,
}

impl StageRunSummary {
    fn absorb(&mut self, result: &CitationStageResult) {
        self.screened += 1;
        self.llm_calls += result.llm_calls;
        if result.required_tiebreaker {
            self.tiebreaks += 1;
        }
        match result.disposition {
            Disposition::Resolved(OutcomeState::Include) => self.included += 1,
            Disposition::Resolved(OutcomeState::Exclude) => self.excluded += 1,
            Disposition::Resolved(OutcomeState::Uncertain) => self.uncertain += 1,
            Disposition::Resolved(OutcomeState::PdfUnavailable) => self.pdf_unavailable += 1,
            Disposition::NeedsRetry => self.needs_retry += 1,
        }
    }
}

// ── Pure resolution ──────────────────────────────────────────────

/// The unanimous verdict when every primary agrees, `None` on disagreement.
fn unanimous(verdicts: &[Verdict]) -> Option<Verdict> {
    let first = *verdicts.first()?;
    verdicts.iter().all(|v| *v == first).then_some(first)
}

// ── Orchestrator ─────────────────────────────────────────────────

/// Drives screening for one protocol over one store.
pub struct ScreeningOrchestrator {
    protocol: ReviewProtocol,
    store: Arc<Store>,
    primaries: Vec<ReviewerHandle>,
    tiebreaker: Option<ReviewerHandle>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl ScreeningOrchestrator {
    /// Build an orchestrator from a validated protocol and a handle per
    /// effective reviewer.
    ///
    /// Configuration faults are rejected here, before any provider spend.
    pub fn new(
        protocol: ReviewProtocol,
        store: Arc<Store>,
        handles: Vec<ReviewerHandle>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Result<Self> {
        protocol.validate()?;
        let mut primaries = Vec::new();
        let mut tiebreaker = None;
        for h in handles {
            match h.config.role {
                ReviewerRole::Primary => primaries.push(h),
                ReviewerRole::Tiebreaker => tiebreaker = Some(h),
            }
        }
        if primaries.is_empty() {
            anyhow::bail!("No primary reviewer handle configured");
        }
        if primaries.len() > 1 && tiebreaker.is_none() {
            anyhow::bail!("Multiple primary reviewers require a tiebreaker handle");
        }
        Ok(Self {
            protocol,
            store,
            primaries,
            tiebreaker,
            retry,
            concurrency: concurrency.max(1),
        })
    }

    /// Screen every citation still owed an outcome at `stage`.
    ///
    /// Citations run through a bounded-concurrency pool; each is persisted
    /// atomically as it resolves, so interrupting a run loses at most the
    /// in-flight citations.
    pub async fn run_stage(&self, review_id: i64, stage: Stage) -> Result<StageRunSummary> {
        let pending = self.store.pending_for_stage(review_id, stage)?;
        tracing::info!(
            review_id,
            stage = %stage,
            pending = pending.len(),
            primaries = self.primaries.len(),
            "Starting screening stage"
        );

        let mut summary = StageRunSummary::default();
        let mut results = stream::iter(pending)
            .map(|citation| self.screen_citation(citation, stage))
            .buffer_unordered(self.concurrency);

        while let Some(result) = results.next().await {
            let result = result?;
            for err in &result.reviewer_errors {
                tracing::warn!(
                    citation_id = result.citation_id,
                    stage = %stage,
                    error = %err,
                    "Reviewer invocation failed"
                );
            }
            summary.absorb(&result);
        }

        tracing::info!(
            review_id,
            stage = %stage,
            screened = summary.screened,
            included = summary.included,
            excluded = summary.excluded,
            uncertain = summary.uncertain,
            needs_retry = summary.needs_retry,
            tiebreaks = summary.tiebreaks,
            llm_calls = summary.llm_calls,
            "Screening stage finished"
        );
        Ok(summary)
    }

    /// Run the full state machine for one citation at one stage.
    async fn screen_citation(
        &self,
        citation: Citation,
        stage: Stage,
    ) -> Result<CitationStageResult> {
        // Full-text screening needs the attached text. Absence is its own
        // terminal state, reported separately from exclusion.
        if stage == Stage::Fulltext && !citation.has_fulltext() {
            let outcome = StageOutcome {
                citation_id: citation.id,
                stage,
                state: OutcomeState::PdfUnavailable,
                required_tiebreaker: false,
                decisive_reviewer: None,
                exclusion_reason: None,
                created_at: Utc::now(),
            };
            self.store
                .persist_stage_result(&[], Some(&outcome))
                .with_context(|| format!("Failed to persist outcome for citation {}", citation.id))?;
            return Ok(CitationStageResult {
                citation_id: citation.id,
                title: citation.title,
                disposition: Disposition::Resolved(OutcomeState::PdfUnavailable),
                required_tiebreaker: false,
                reviewer_errors: Vec::new(),
                llm_calls: 0,
            });
        }

        let stored: HashMap<String, ScreeningDecision> = self
            .store
            .decisions(citation.id, stage)?
            .into_iter()
            .map(|d| (d.reviewer.clone(), d))
            .collect();

        let mut new_decisions: Vec<ScreeningDecision> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut llm_calls = 0u32;

        // Invoke every primary missing a stored decision, concurrently.
        let missing: Vec<&ReviewerHandle> = self
            .primaries
            .iter()
            .filter(|h| !stored.contains_key(&h.config.name))
            .collect();
        let invocations = missing
            .iter()
            .map(|h| self.invoke_reviewer(h, &citation, stage));
        for outcome in futures_util::future::join_all(invocations).await {
            match outcome {
                Ok((decision, calls)) => {
                    llm_calls += calls;
                    new_decisions.push(decision);
                }
                Err(InvocationFailure { reviewer, calls, message }) => {
                    llm_calls += calls;
                    errors.push(format!("{reviewer}: {message}"));
                }
            }
        }

        // Any missing primary verdict means no outcome can be resolved.
        // Persist what did succeed so the next run only re-invokes the
        // failed reviewers.
        if !errors.is_empty() {
            self.store
                .persist_stage_result(&new_decisions, None)
                .with_context(|| {
                    format!("Failed to persist partial decisions for citation {}", citation.id)
                })?;
            return Ok(CitationStageResult {
                citation_id: citation.id,
                title: citation.title,
                disposition: Disposition::NeedsRetry,
                required_tiebreaker: false,
                reviewer_errors: errors,
                llm_calls,
            });
        }

        // All primary verdicts in hand, in roster order.
        let primary_decisions: Vec<ScreeningDecision> = self
            .primaries
            .iter()
            .map(|h| {
                new_decisions
                    .iter()
                    .find(|d| d.reviewer == h.config.name)
                    .cloned()
                    .or_else(|| stored.get(&h.config.name).cloned())
                    .with_context(|| format!("Missing verdict for reviewer '{}'", h.config.name))
            })
            .collect::<Result<_>>()?;
        let primary_verdicts: Vec<Verdict> = primary_decisions.iter().map(|d| d.verdict).collect();

        let agreed = unanimous(&primary_verdicts);
        let escalate = agreed == Some(Verdict::Uncertain)
            && self.protocol.escalate_uncertain
            && self.tiebreaker.is_some();

        let (state, required_tiebreaker, decisive) = match agreed {
            Some(v) if !escalate => (OutcomeState::from(v), false, primary_decisions[0].clone()),
            _ => {
                // Disagreement, or unanimous uncertain under escalation.
                let tiebreaker = self
                    .tiebreaker
                    .as_ref()
                    .context("Primary reviewers disagreed but no tiebreaker is configured")?;
                let decision = match stored.get(&tiebreaker.config.name) {
                    Some(d) => d.clone(),
                    None => match self.invoke_reviewer(tiebreaker, &citation, stage).await {
                        Ok((d, calls)) => {
                            llm_calls += calls;
                            new_decisions.push(d.clone());
                            d
                        }
                        Err(InvocationFailure { reviewer, calls, message }) => {
                            llm_calls += calls;
                            self.store.persist_stage_result(&new_decisions, None)?;
                            return Ok(CitationStageResult {
                                citation_id: citation.id,
                                title: citation.title,
                                disposition: Disposition::NeedsRetry,
                                required_tiebreaker: true,
                                reviewer_errors: vec![format!("{reviewer}: {message}")],
                                llm_calls,
                            });
                        }
                    },
                };
                (OutcomeState::from(decision.verdict), true, decision)
            }
        };

        let outcome = StageOutcome {
            citation_id: citation.id,
            stage,
            state,
            required_tiebreaker,
            decisive_reviewer: Some(decisive.reviewer.clone()),
            exclusion_reason: (state == OutcomeState::Exclude)
                .then(|| decisive.rationale.clone()),
            created_at: Utc::now(),
        };
        self.store
            .persist_stage_result(&new_decisions, Some(&outcome))
            .with_context(|| format!("Failed to persist outcome for citation {}", citation.id))?;

        tracing::debug!(
            citation_id = citation.id,
            stage = %stage,
            state = %state,
            required_tiebreaker,
            llm_calls,
            "Citation resolved"
        );
        Ok(CitationStageResult {
            citation_id: citation.id,
            title: citation.title,
            disposition: Disposition::Resolved(state),
            required_tiebreaker,
            reviewer_errors: Vec::new(),
            llm_calls,
        })
    }

    /// One reviewer invocation: render, complete with retry, parse.
    ///
    /// Unparseable output is a failure like any provider error. It is never
    /// coerced into a default verdict.
    async fn invoke_reviewer(
        &self,
        handle: &ReviewerHandle,
        citation: &Citation,
        stage: Stage,
    ) -> std::result::Result<(ScreeningDecision, u32), InvocationFailure> {
        let fail = |calls, message: String| InvocationFailure {
            reviewer: handle.config.name.clone(),
            calls,
            message,
        };

        let template = prompts::template_for(&handle.config, stage)
            .map_err(|e| fail(0, e.to_string()))?;
        let prompt = prompts::render(&template, &self.protocol, citation, stage);

        let (response, attempts) = complete_with_retry(
            handle.client.as_ref(),
            &handle.config.model,
            &prompt,
            SCREENING_MAX_TOKENS,
            self.retry,
        )
        .await
        .map_err(|e| fail(e.attempts, e.error.to_string()))?;

        let (verdict, rationale) =
            parse_verdict(&response).map_err(|e| fail(attempts, e.to_string()))?;
        Ok((
            ScreeningDecision {
                citation_id: citation.id,
                stage,
                reviewer: handle.config.name.clone(),
                model: handle.config.model.clone(),
                verdict,
                rationale,
                created_at: Utc::now(),
            },
            attempts,
        ))
    }
}

struct InvocationFailure {
    reviewer: String,
    calls: u32,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::protocol::{Provider, ReviewerRole};
    use crate::screening::prompts::PromptKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Client that answers by matching citation titles inside the prompt.
    ///
    /// Unmatched prompts get a transport error, which keeps test scripts
    /// honest: a reviewer invoked for a citation the test did not script is
    /// a test bug, surfaced as `needs_retry`.
    struct ScriptedClient {
        responses: Vec<(&'static str, &'static str)>,
        calls: AtomicU32,
        /// Titles that fail transiently this many times before succeeding.
        flaky: Mutex<HashMap<&'static str, u32>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                responses,
                calls: AtomicU32::new(0),
                flaky: Mutex::new(HashMap::new()),
            })
        }

        fn flaky_once(self: Arc<Self>, title: &'static str) -> Arc<Self> {
            self.flaky.lock().insert(title, 1);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _: &str, prompt: &str, _: u32) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for (title, response) in &self.responses {
                if prompt.contains(title) {
                    let mut flaky = self.flaky.lock();
                    if let Some(left) = flaky.get_mut(title) {
                        if *left > 0 {
                            *left -= 1;
                            return Err(LlmError::Transport("connection reset".into()));
                        }
                    }
                    return Ok(response.to_string());
                }
            }
            Err(LlmError::Transport("unscripted prompt".into()))
        }
    }

    /// Client that always fails with a non-retryable error.
    struct BrokenClient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for BrokenClient {
        fn provider_name(&self) -> &'static str {
            "broken"
        }

        async fn complete(&self, _: &str, _: &str, _: u32) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Api {
                provider: "broken",
                status: 401,
                message: "invalid key".into(),
            })
        }
    }

    const INCLUDE: &str = "REASONING: meets criteria\nDECISION: INCLUDE";
    const EXCLUDE: &str = "REASONING: wrong design\nDECISION: EXCLUDE";
    const UNCERTAIN: &str = "REASONING: abstract too thin\nDECISION: UNCERTAIN";

    fn reviewer(name: &str, role: ReviewerRole) -> ReviewerConfig {
        ReviewerConfig {
            name: name.into(),
            model: "test-model".into(),
            provider: Provider::Anthropic,
            prompt_template: PromptKind::Rigorous,
            custom_prompt: None,
            role,
        }
    }

    fn protocol(reviewers: Vec<ReviewerConfig>) -> ReviewProtocol {
        ReviewProtocol {
            name: "test".into(),
            objective: "screen things".into(),
            inclusion_criteria: vec!["relevant".into()],
            exclusion_criteria: vec!["irrelevant".into()],
            extraction_variables: vec![],
            model: "test-model".into(),
            reviewers,
            escalate_uncertain: false,
            secondary_filters: None,
        }
    }

    fn handle(config: ReviewerConfig, client: Arc<dyn LlmClient>) -> ReviewerHandle {
        ReviewerHandle { config, client }
    }

    fn seed(store: &Store, titles: &[&str]) -> (i64, Vec<i64>) {
        let rid = store.create_review("r", None).unwrap();
        let ids = titles
            .iter()
            .map(|t| {
                let mut c = Citation::new(*t);
                c.abstract_text = Some(format!("Abstract of {t}."));
                store.insert_citation(rid, &c).unwrap()
            })
            .collect();
        (rid, ids)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    fn two_primary_orchestrator(
        store: Arc<Store>,
        r1: Arc<dyn LlmClient>,
        r2: Arc<dyn LlmClient>,
        tb: Arc<dyn LlmClient>,
    ) -> ScreeningOrchestrator {
        let p = protocol(vec![
            reviewer("r1", ReviewerRole::Primary),
            reviewer("r2", ReviewerRole::Primary),
            reviewer("tb", ReviewerRole::Tiebreaker),
        ]);
        ScreeningOrchestrator::new(
            p.clone(),
            store,
            vec![
                handle(p.reviewers[0].clone(), r1),
                handle(p.reviewers[1].clone(), r2),
                handle(p.reviewers[2].clone(), tb),
            ],
            fast_retry(),
            4,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn agreement_disagreement_and_transient_failure() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha", "Beta", "Gamma"]);

        // Alpha: both include. Beta: split, tiebreak excludes.
        // Gamma: r1 fails once transiently, then both include.
        let r1 = ScriptedClient::new(vec![
            ("Alpha", INCLUDE),
            ("Beta", INCLUDE),
            ("Gamma", INCLUDE),
        ])
        .flaky_once("Gamma");
        let r2 = ScriptedClient::new(vec![
            ("Alpha", INCLUDE),
            ("Beta", EXCLUDE),
            ("Gamma", INCLUDE),
        ]);
        let tb = ScriptedClient::new(vec![("Beta", EXCLUDE)]);

        let orch =
            two_primary_orchestrator(store.clone(), r1.clone(), r2.clone(), tb.clone());
        let summary = orch.run_stage(rid, Stage::Abstract).await.unwrap();

        assert_eq!(summary.screened, 3);
        assert_eq!(summary.included, 2);
        assert_eq!(summary.excluded, 1);
        assert_eq!(summary.needs_retry, 0);
        assert_eq!(summary.tiebreaks, 1);

        // Tiebreaker ran for Beta only.
        assert_eq!(tb.calls(), 1);
        // Gamma cost r1 one extra call.
        assert_eq!(r1.calls(), 4);
        assert_eq!(r2.calls(), 3);

        let alpha = store.outcome(ids[0], Stage::Abstract).unwrap().unwrap();
        assert_eq!(alpha.state, OutcomeState::Include);
        assert!(!alpha.required_tiebreaker);
        assert_eq!(alpha.decisive_reviewer.as_deref(), Some("r1"));
        assert_eq!(alpha.exclusion_reason, None);

        let beta = store.outcome(ids[1], Stage::Abstract).unwrap().unwrap();
        assert_eq!(beta.state, OutcomeState::Exclude);
        assert!(beta.required_tiebreaker);
        assert_eq!(beta.decisive_reviewer.as_deref(), Some("tb"));
        assert_eq!(beta.exclusion_reason.as_deref(), Some("wrong design"));

        // Every primary decision was persisted.
        assert_eq!(store.decisions(ids[1], Stage::Abstract).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, _) = seed(&store, &["Alpha"]);

        let r1 = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let r2 = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let tb = ScriptedClient::new(vec![]);
        let orch = two_primary_orchestrator(store.clone(), r1.clone(), r2.clone(), tb.clone());

        orch.run_stage(rid, Stage::Abstract).await.unwrap();
        let second = orch.run_stage(rid, Stage::Abstract).await.unwrap();

        assert_eq!(second.screened, 0);
        assert_eq!(r1.calls(), 1);
        assert_eq!(r2.calls(), 1);
        assert_eq!(tb.calls(), 0);
    }

    #[tokio::test]
    async fn failed_reviewer_leaves_needs_retry_and_siblings_persisted() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha"]);

        let good = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let broken = Arc::new(BrokenClient {
            calls: AtomicU32::new(0),
        });
        let tb = ScriptedClient::new(vec![]);
        let orch = two_primary_orchestrator(store.clone(), good.clone(), broken.clone(), tb);

        let summary = orch.run_stage(rid, Stage::Abstract).await.unwrap();
        assert_eq!(summary.needs_retry, 1);
        assert_eq!(summary.included, 0);
        // Non-retryable error: exactly one call.
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        // The tally reflects calls actually made, not the retry budget.
        assert_eq!(summary.llm_calls, 2);

        // No outcome, but the successful sibling decision survived.
        assert!(store.outcome(ids[0], Stage::Abstract).unwrap().is_none());
        let decisions = store.decisions(ids[0], Stage::Abstract).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].reviewer, "r1");

        // A later run with a working client re-invokes only the failed
        // reviewer; the stored sibling decision is reused.
        let good2 = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let fixed = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let tb2 = ScriptedClient::new(vec![]);
        let orch2 =
            two_primary_orchestrator(store.clone(), good2.clone(), fixed.clone(), tb2);
        let summary = orch2.run_stage(rid, Stage::Abstract).await.unwrap();

        assert_eq!(summary.included, 1);
        assert_eq!(good2.calls(), 0, "stored decision must be reused");
        assert_eq!(fixed.calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_output_is_needs_retry_not_a_default() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha"]);

        let garbled = ScriptedClient::new(vec![("Alpha", "I cannot decide on this one.")]);
        let good = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let tb = ScriptedClient::new(vec![]);
        let orch = two_primary_orchestrator(store.clone(), garbled, good, tb);

        let summary = orch.run_stage(rid, Stage::Abstract).await.unwrap();
        assert_eq!(summary.needs_retry, 1);
        assert!(store.outcome(ids[0], Stage::Abstract).unwrap().is_none());
        // The garbled reviewer stored no decision.
        let decisions = store.decisions(ids[0], Stage::Abstract).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].reviewer, "r2");
    }

    #[tokio::test]
    async fn unanimous_uncertain_is_terminal_by_default() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha"]);

        let r1 = ScriptedClient::new(vec![("Alpha", UNCERTAIN)]);
        let r2 = ScriptedClient::new(vec![("Alpha", UNCERTAIN)]);
        let tb = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let orch = two_primary_orchestrator(store.clone(), r1, r2, tb.clone());

        let summary = orch.run_stage(rid, Stage::Abstract).await.unwrap();
        assert_eq!(summary.uncertain, 1);
        assert_eq!(tb.calls(), 0, "no escalation without opt-in");
        let o = store.outcome(ids[0], Stage::Abstract).unwrap().unwrap();
        assert_eq!(o.state, OutcomeState::Uncertain);
        assert!(!o.required_tiebreaker);
    }

    #[tokio::test]
    async fn unanimous_uncertain_escalates_when_opted_in() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha"]);

        let mut p = protocol(vec![
            reviewer("r1", ReviewerRole::Primary),
            reviewer("r2", ReviewerRole::Primary),
            reviewer("tb", ReviewerRole::Tiebreaker),
        ]);
        p.escalate_uncertain = true;

        let r1 = ScriptedClient::new(vec![("Alpha", UNCERTAIN)]);
        let r2 = ScriptedClient::new(vec![("Alpha", UNCERTAIN)]);
        let tb = ScriptedClient::new(vec![("Alpha", INCLUDE)]);
        let orch = ScreeningOrchestrator::new(
            p.clone(),
            store.clone(),
            vec![
                handle(p.reviewers[0].clone(), r1),
                handle(p.reviewers[1].clone(), r2),
                handle(p.reviewers[2].clone(), tb.clone()),
            ],
            fast_retry(),
            4,
        )
        .unwrap();

        let summary = orch.run_stage(rid, Stage::Abstract).await.unwrap();
        assert_eq!(summary.included, 1);
        assert_eq!(tb.calls(), 1);
        let o = store.outcome(ids[0], Stage::Abstract).unwrap().unwrap();
        assert_eq!(o.state, OutcomeState::Include);
        assert!(o.required_tiebreaker);
        assert_eq!(o.decisive_reviewer.as_deref(), Some("tb"));
    }

    #[tokio::test]
    async fn single_primary_verdict_maps_directly() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha", "Beta"]);

        let p = protocol(vec![reviewer("solo", ReviewerRole::Primary)]);
        let client =
            ScriptedClient::new(vec![("Alpha", EXCLUDE), ("Beta", INCLUDE)]);
        let orch = ScreeningOrchestrator::new(
            p.clone(),
            store.clone(),
            vec![handle(p.reviewers[0].clone(), client)],
            fast_retry(),
            4,
        )
        .unwrap();

        let summary = orch.run_stage(rid, Stage::Abstract).await.unwrap();
        assert_eq!(summary.included, 1);
        assert_eq!(summary.excluded, 1);
        assert_eq!(summary.tiebreaks, 0);

        let alpha = store.outcome(ids[0], Stage::Abstract).unwrap().unwrap();
        assert_eq!(alpha.exclusion_reason.as_deref(), Some("wrong design"));
        assert_eq!(alpha.decisive_reviewer.as_deref(), Some("solo"));
    }

    #[tokio::test]
    async fn fulltext_without_attachment_is_pdf_unavailable() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha", "Beta"]);
        for id in &ids {
            store
                .persist_stage_result(
                    &[],
                    Some(&StageOutcome {
                        citation_id: *id,
                        stage: Stage::Abstract,
                        state: OutcomeState::Include,
                        required_tiebreaker: false,
                        decisive_reviewer: Some("r1".into()),
                        exclusion_reason: None,
                        created_at: Utc::now(),
                    }),
                )
                .unwrap();
        }
        store.attach_fulltext(ids[1], "Beta full text body.").unwrap();

        let r1 = ScriptedClient::new(vec![("Beta", INCLUDE)]);
        let r2 = ScriptedClient::new(vec![("Beta", INCLUDE)]);
        let tb = ScriptedClient::new(vec![]);
        let orch = two_primary_orchestrator(store.clone(), r1.clone(), r2, tb);

        let summary = orch.run_stage(rid, Stage::Fulltext).await.unwrap();
        assert_eq!(summary.pdf_unavailable, 1);
        assert_eq!(summary.included, 1);

        let alpha = store.outcome(ids[0], Stage::Fulltext).unwrap().unwrap();
        assert_eq!(alpha.state, OutcomeState::PdfUnavailable);
        assert_eq!(alpha.decisive_reviewer, None);
        // No model was consulted for the missing PDF.
        assert_eq!(r1.calls(), 1);
    }

    #[tokio::test]
    async fn abstract_excluded_citations_never_reach_fulltext() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (rid, ids) = seed(&store, &["Alpha"]);
        store
            .persist_stage_result(
                &[],
                Some(&StageOutcome {
                    citation_id: ids[0],
                    stage: Stage::Abstract,
                    state: OutcomeState::Exclude,
                    required_tiebreaker: false,
                    decisive_reviewer: Some("r1".into()),
                    exclusion_reason: Some("off topic".into()),
                    created_at: Utc::now(),
                }),
            )
            .unwrap();

        let r1 = ScriptedClient::new(vec![]);
        let r2 = ScriptedClient::new(vec![]);
        let tb = ScriptedClient::new(vec![]);
        let orch = two_primary_orchestrator(store.clone(), r1.clone(), r2, tb);

        let summary = orch.run_stage(rid, Stage::Fulltext).await.unwrap();
        assert_eq!(summary.screened, 0);
        assert_eq!(r1.calls(), 0);
    }

    #[test]
    fn orchestrator_rejects_multi_primary_without_tiebreaker_handle() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        // Protocol itself is valid (it names a tiebreaker), but the caller
        // wired up only the primaries.
        let p = protocol(vec![
            reviewer("r1", ReviewerRole::Primary),
            reviewer("r2", ReviewerRole::Primary),
            reviewer("tb", ReviewerRole::Tiebreaker),
        ]);
        let client = ScriptedClient::new(vec![]);
        let err = ScreeningOrchestrator::new(
            p.clone(),
            store,
            vec![
                handle(p.reviewers[0].clone(), client.clone()),
                handle(p.reviewers[1].clone(), client),
            ],
            fast_retry(),
            1,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("tiebreaker"));
    }

    #[test]
    fn unanimous_resolution_rule() {
        use Verdict::*;
        assert_eq!(unanimous(&[Include, Include]), Some(Include));
        assert_eq!(unanimous(&[Exclude]), Some(Exclude));
        assert_eq!(unanimous(&[Include, Exclude]), None);
        assert_eq!(unanimous(&[Uncertain, Include]), None);
        assert_eq!(unanimous(&[]), None);
    }
}
