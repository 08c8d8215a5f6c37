//! Multi-reviewer LLM screening.
//!
//! `prompts` renders the per-reviewer prompt, `verdict` parses model output,
//! and `orchestrator` drives the agreement/tiebreak state machine over a
//! whole review stage.

pub mod orchestrator;
pub mod prompts;
pub mod verdict;

pub use orchestrator::{
    CitationStageResult, Disposition, ReviewerHandle, ScreeningOrchestrator, StageRunSummary,
};
pub use prompts::PromptKind;
pub use verdict::{parse_verdict, VerdictParseError};
