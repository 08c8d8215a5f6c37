//! Structured data extraction from full-text-included citations.
//!
//! The extractor prompts for a single JSON object keyed by the protocol's
//! extraction variables, then coerces each value to its declared type.
//! Values the model cannot find, or that fail coercion, become null rather
//! than guesses. A citation whose PDF text is missing gets an all-null
//! record so the export stays rectangular.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use regex::Regex;
use serde_json::{Map, Value};

use crate::llm::{complete_with_retry, LlmClient, RetryPolicy};
use crate::model::{Citation, ExtractionRecord};
use crate::protocol::{ExtractionVariable, ReviewProtocol, VariableType};
use crate::store::Store;

const EXTRACTION_MAX_TOKENS: u32 = 4096;

/// Extracts protocol variables from included citations.
pub struct DataExtractor {
    protocol: ReviewProtocol,
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    concurrency: usize,
}

/// Tally for one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSummary {
    pub extracted: usize,
    pub missing_fulltext: usize,
    pub failed: usize,
}

impl DataExtractor {
    pub fn new(
        protocol: ReviewProtocol,
        client: Arc<dyn LlmClient>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            protocol,
            client,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Extract every full-text-included citation without a record yet.
    ///
    /// Extraction is idempotent the same way screening is: existing records
    /// are skipped, failures are logged and retried on the next run.
    pub async fn run(&self, store: &Store, review_id: i64) -> Result<ExtractionSummary> {
        if self.protocol.extraction_variables.is_empty() {
            anyhow::bail!("Protocol defines no extraction variables");
        }
        let pending = store.unextracted(review_id)?;
        tracing::info!(review_id, pending = pending.len(), "Starting extraction");

        let mut summary = ExtractionSummary::default();
        let mut results = stream::iter(pending)
            .map(|citation| async move {
                let result = self.extract(&citation).await;
                (citation, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((citation, result)) = results.next().await {
            match result {
                Ok(record) => {
                    if !citation.has_fulltext() {
                        summary.missing_fulltext += 1;
                    }
                    store.save_extraction(&record)?;
                    summary.extracted += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        citation_id = citation.id,
                        error = %e,
                        "Extraction failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            review_id,
            extracted = summary.extracted,
            missing_fulltext = summary.missing_fulltext,
            failed = summary.failed,
            "Extraction finished"
        );
        Ok(summary)
    }

    /// Extract one citation's variables.
    pub async fn extract(&self, citation: &Citation) -> Result<ExtractionRecord> {
        if !citation.has_fulltext() {
            return Ok(ExtractionRecord {
                citation_id: citation.id,
                data: null_record(&self.protocol.extraction_variables),
                model: self.protocol.model.clone(),
                extracted_at: Utc::now(),
            });
        }

        let prompt = self.build_prompt(citation);
        let (response, _) = complete_with_retry(
            self.client.as_ref(),
            &self.protocol.model,
            &prompt,
            EXTRACTION_MAX_TOKENS,
            self.retry,
        )
        .await
        .with_context(|| format!("Extraction call failed for citation {}", citation.id))?;

        let raw: Map<String, Value> = serde_json::from_str(strip_code_fences(&response))
            .with_context(|| {
                format!("Extraction output for citation {} is not a JSON object", citation.id)
            })?;

        let mut data = Map::new();
        for var in &self.protocol.extraction_variables {
            let value = raw
                .get(&var.name)
                .map(|v| coerce(v, var.var_type))
                .unwrap_or(Value::Null);
            data.insert(var.name.clone(), value);
        }

        Ok(ExtractionRecord {
            citation_id: citation.id,
            data,
            model: self.protocol.model.clone(),
            extracted_at: Utc::now(),
        })
    }

    fn build_prompt(&self, citation: &Citation) -> String {
        let mut vars = String::new();
        for v in &self.protocol.extraction_variables {
            vars.push_str(&format!(
                "- \"{}\" ({}): {}",
                v.name,
                type_name(v.var_type),
                v.description
            ));
            if let Some(options) = &v.options {
                vars.push_str(&format!(" Allowed values: {}.", options.join(", ")));
            }
            vars.push('\n');
        }

        format!(
            "You are extracting data for a systematic review.\n\
             Review objective: {objective}\n\n\
             Extract the following variables from the article below. Respond with a \
             single JSON object whose keys are exactly the variable names. Use null \
             for any variable the article does not report. Do not add commentary.\n\n\
             Variables:\n{vars}\n\
             Article title: {title}\n\n\
             Article text:\n{content}",
            objective = self.protocol.objective,
            vars = vars,
            title = citation.title,
            content = citation.fulltext.as_deref().unwrap_or_default(),
        )
    }
}

/// All variables set to null, for citations without full text.
pub fn null_record(variables: &[ExtractionVariable]) -> Map<String, Value> {
    variables
        .iter()
        .map(|v| (v.name.clone(), Value::Null))
        .collect()
}

fn type_name(t: VariableType) -> &'static str {
    match t {
        VariableType::String => "string",
        VariableType::Integer => "integer",
        VariableType::Float => "number",
        VariableType::Boolean => "boolean",
        VariableType::List => "list of strings",
    }
}

/// Drop a surrounding Markdown code fence, if the model added one.
fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an optional language tag on the fence line.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .trim_end_matches('`')
        .trim()
}

/// Coerce a raw JSON value to the variable's declared type.
///
/// Models report numbers as prose ("approximately 120 patients"); the
/// numeric coercions pull the first number out of a string. Unparseable
/// values become null, never fabricated defaults.
fn coerce(value: &Value, var_type: VariableType) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match var_type {
        VariableType::String => match value {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        },
        VariableType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
            Value::Number(n) => n
                .as_f64()
                .map(|f| Value::from(f.round() as i64))
                .unwrap_or(Value::Null),
            Value::String(s) => first_number(s)
                .and_then(|n| n.parse::<f64>().ok())
                .map(|f| Value::from(f.round() as i64))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        VariableType::Float => match value {
            Value::Number(_) => value.clone(),
            Value::String(s) => first_number(s)
                .and_then(|n| n.parse::<f64>().ok())
                .map(Value::from)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        VariableType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" => Value::Bool(true),
                "false" | "no" | "n" => Value::Bool(false),
                _ => Value::Null,
            },
            _ => Value::Null,
        },
        VariableType::List => match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => Value::String(s.clone()),
                        other => Value::String(other.to_string()),
                    })
                    .collect(),
            ),
            Value::String(s) => Value::Array(
                s.split([';', ','])
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            ),
            _ => Value::Null,
        },
    }
}

/// First decimal number in a string, sign and fraction included.
fn first_number(s: &str) -> Option<String> {
    // Thousands separators appear in reported sample sizes.
    static PATTERN: &str = r"-?\d[\d,]*\.?\d*";
    let re = Regex::new(PATTERN).ok()?;
    let m = re.find(s)?;
    Some(m.as_str().replace(',', ""))
}
