//! Review protocol: objective, criteria, reviewer roster, extraction plan.
//!
//! Protocols are authored as YAML and validated once at load time, so
//! configuration faults (duplicate reviewer names, missing tiebreaker) are
//! reported before any LLM spend occurs.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::filters::FilterRules;
use crate::screening::prompts::PromptKind;

// ── Provider ─────────────────────────────────────────────────────

/// Supported LLM API providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    Openai,
    Openrouter,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Openrouter => "openrouter",
        }
    }
}

// ── Reviewer role ────────────────────────────────────────────────

/// Role a reviewer plays in the screening state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReviewerRole {
    /// Independent screener; contributes to the agreement check.
    #[default]
    Primary,
    /// Invoked only on primary disagreement; its verdict is final.
    Tiebreaker,
}

// ── Reviewer configuration ───────────────────────────────────────

/// Configuration for a single reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerConfig {
    /// Unique name within the protocol (e.g. "screener-1").
    pub name: String,
    /// Model reference (e.g. "claude-haiku-4-5", "gpt-4.1").
    pub model: String,
    #[serde(default = "default_provider")]
    pub provider: Provider,
    /// Built-in template selector.
    #[serde(default)]
    pub prompt_template: PromptKind,
    /// Verbatim template text when `prompt_template` is `custom`.
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub role: ReviewerRole,
}

fn default_provider() -> Provider {
    Provider::Anthropic
}

// ── Extraction variables ─────────────────────────────────────────

/// Expected type of an extraction variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    List,
}

/// A variable to mine from included full-text articles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionVariable {
    pub name: String,
    pub description: String,
    #[serde(default, rename = "type")]
    pub var_type: VariableType,
    /// Optional closed option set; when present, the prompt names the
    /// allowed values.
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

// ── Protocol ─────────────────────────────────────────────────────

/// A systematic review protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewProtocol {
    pub name: String,
    pub objective: String,
    pub inclusion_criteria: Vec<String>,
    pub exclusion_criteria: Vec<String>,
    #[serde(default)]
    pub extraction_variables: Vec<ExtractionVariable>,
    /// Default model for extraction and single-reviewer runs.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub reviewers: Vec<ReviewerConfig>,
    /// When true, a unanimous `uncertain` outcome is escalated to the
    /// tiebreaker instead of being left terminal. Off by default: uncertain
    /// is its own terminal state, not a disagreement.
    #[serde(default)]
    pub escalate_uncertain: bool,
    /// Deterministic post-extraction checks (duplicate studies, unreported
    /// outcomes, ineligible interventions). Advisory; see [`crate::filters`].
    #[serde(default)]
    pub secondary_filters: Option<FilterRules>,
}

fn default_model() -> String {
    "claude-sonnet-4-5".into()
}

impl ReviewProtocol {
    /// Load and validate a protocol from a YAML file.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read protocol: {}", path.display()))?;
        let protocol: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid protocol YAML: {}", path.display()))?;
        protocol.validate()?;
        Ok(protocol)
    }

    /// Save the protocol to a YAML file.
    pub fn to_yaml(&self, path: &Path) -> Result<()> {
        let raw = serde_yaml::to_string(self).context("Failed to serialize protocol")?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write protocol: {}", path.display()))?;
        Ok(())
    }

    pub fn primary_reviewers(&self) -> Vec<&ReviewerConfig> {
        self.reviewers
            .iter()
            .filter(|r| r.role == ReviewerRole::Primary)
            .collect()
    }

    pub fn tiebreaker(&self) -> Option<&ReviewerConfig> {
        self.reviewers
            .iter()
            .find(|r| r.role == ReviewerRole::Tiebreaker)
    }

    pub fn has_multi_reviewer(&self) -> bool {
        self.primary_reviewers().len() > 1
    }

    /// Static configuration checks, run before any LLM spend.
    ///
    /// A protocol with no reviewers at all is accepted here (the single
    /// default-model reviewer is synthesized by the orchestrator); every
    /// other misconfiguration is fatal.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for r in &self.reviewers {
            if !seen.insert(r.name.as_str()) {
                anyhow::bail!("Duplicate reviewer name in protocol: '{}'", r.name);
            }
            if r.prompt_template == PromptKind::Custom && r.custom_prompt.is_none() {
                anyhow::bail!(
                    "Reviewer '{}' selects the custom template but provides no custom_prompt",
                    r.name
                );
            }
        }

        let tiebreakers = self
            .reviewers
            .iter()
            .filter(|r| r.role == ReviewerRole::Tiebreaker)
            .count();
        if tiebreakers > 1 {
            anyhow::bail!("Protocol configures {tiebreakers} tiebreakers; at most one is allowed");
        }
        if self.has_multi_reviewer() && tiebreakers == 0 {
            anyhow::bail!(
                "Protocol configures {} primary reviewers but no tiebreaker; \
                 disagreements could not be resolved",
                self.primary_reviewers().len()
            );
        }
        if !self.reviewers.is_empty() && self.primary_reviewers().is_empty() {
            anyhow::bail!("Protocol configures reviewers but none with role 'primary'");
        }

        Ok(())
    }

    /// The effective reviewer roster: configured reviewers, or a single
    /// default-model primary when the protocol names none.
    pub fn effective_reviewers(&self) -> Vec<ReviewerConfig> {
        if self.reviewers.is_empty() {
            vec![ReviewerConfig {
                name: "screener".into(),
                model: self.model.clone(),
                provider: Provider::Anthropic,
                prompt_template: PromptKind::Rigorous,
                custom_prompt: None,
                role: ReviewerRole::Primary,
            }]
        } else {
            self.reviewers.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reviewer(name: &str, role: ReviewerRole) -> ReviewerConfig {
        ReviewerConfig {
            name: name.into(),
            model: "claude-haiku-4-5".into(),
            provider: Provider::Anthropic,
            prompt_template: PromptKind::Rigorous,
            custom_prompt: None,
            role,
        }
    }

    fn base_protocol() -> ReviewProtocol {
        ReviewProtocol {
            name: "statins-dementia".into(),
            objective: "Assess statin use and dementia incidence".into(),
            inclusion_criteria: vec!["Human studies".into(), "Cohort or RCT design".into()],
            exclusion_criteria: vec!["Case reports".into()],
            extraction_variables: vec![],
            model: default_model(),
            reviewers: vec![],
            escalate_uncertain: false,
            secondary_filters: None,
        }
    }

    #[test]
    fn empty_roster_synthesizes_default_primary() {
        let p = base_protocol();
        assert!(p.validate().is_ok());
        let roster = p.effective_reviewers();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].role, ReviewerRole::Primary);
        assert_eq!(roster[0].model, p.model);
    }

    #[test]
    fn duplicate_reviewer_names_rejected() {
        let mut p = base_protocol();
        p.reviewers = vec![
            reviewer("a", ReviewerRole::Primary),
            reviewer("a", ReviewerRole::Tiebreaker),
        ];
        let err = p.validate().unwrap_err().to_string();
        assert!(err.contains("Duplicate reviewer name"));
    }

    #[test]
    fn multi_primary_without_tiebreaker_rejected() {
        let mut p = base_protocol();
        p.reviewers = vec![
            reviewer("a", ReviewerRole::Primary),
            reviewer("b", ReviewerRole::Primary),
        ];
        let err = p.validate().unwrap_err().to_string();
        assert!(err.contains("no tiebreaker"));
    }

    #[test]
    fn single_primary_without_tiebreaker_accepted() {
        let mut p = base_protocol();
        p.reviewers = vec![reviewer("a", ReviewerRole::Primary)];
        assert!(p.validate().is_ok());
    }

    #[test]
    fn custom_template_requires_prompt_text() {
        let mut p = base_protocol();
        let mut r = reviewer("a", ReviewerRole::Primary);
        r.prompt_template = PromptKind::Custom;
        p.reviewers = vec![r];
        assert!(p.validate().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("protocol.yaml");

        let mut p = base_protocol();
        p.reviewers = vec![
            reviewer("screener-1", ReviewerRole::Primary),
            reviewer("screener-2", ReviewerRole::Primary),
            reviewer("tiebreaker", ReviewerRole::Tiebreaker),
        ];
        p.extraction_variables = vec![ExtractionVariable {
            name: "sample_size".into(),
            description: "Number of participants".into(),
            var_type: VariableType::Integer,
            options: None,
        }];
        p.to_yaml(&path).unwrap();

        let loaded = ReviewProtocol::from_yaml(&path).unwrap();
        assert_eq!(loaded.name, p.name);
        assert_eq!(loaded.reviewers.len(), 3);
        assert_eq!(loaded.tiebreaker().unwrap().name, "tiebreaker");
        assert_eq!(loaded.extraction_variables[0].var_type, VariableType::Integer);
    }

    #[test]
    fn yaml_defaults_for_sparse_protocol() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("protocol.yaml");
        std::fs::write(
            &path,
            "name: minimal\nobjective: test\ninclusion_criteria: [a]\nexclusion_criteria: [b]\n",
        )
        .unwrap();

        let p = ReviewProtocol::from_yaml(&path).unwrap();
        assert!(p.reviewers.is_empty());
        assert!(!p.escalate_uncertain);
        assert_eq!(p.model, default_model());
    }
}
