//! LLM-assisted systematic review screening.
//!
//! The pipeline runs a citation corpus through protocol-driven screening:
//! import and dedupe (`citations`, `matcher`), multi-reviewer screening
//! with tiebreak resolution (`screening`), PRISMA flow reporting
//! (`prisma`), structured data extraction (`extraction`), and advisory
//! post-extraction eligibility checks (`filters`). All state
//! lives in the SQLite store (`store`), which is what makes interrupted
//! runs resumable.

pub mod citations;
pub mod cli;
pub mod config;
pub mod extraction;
pub mod filters;
pub mod llm;
pub mod matcher;
pub mod model;
pub mod prisma;
pub mod protocol;
pub mod screening;
pub mod store;
