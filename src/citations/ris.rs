//! RIS reference-file parsing.
//!
//! RIS is line-oriented: `TAG  - value` lines between a `TY` opener and an
//! `ER` terminator, with bare lines continuing the previous tag. Exports
//! disagree on which tag carries which field (EndNote favors `T1`/`A1`/
//! `Y1`/`N2`, most others `TI`/`AU`/`PY`/`AB`), so both spellings map to
//! the same field and the first non-empty value wins.

use anyhow::{Context, Result};
use std::path::Path;

use crate::model::{Citation, Source};

/// Parse an RIS file into citations.
pub fn parse_file(path: &Path) -> Result<Vec<Citation>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read RIS file: {}", path.display()))?;
    parse(&raw)
}

/// Parse RIS text into citations.
///
/// Records without a title are skipped; an input with records but nothing
/// parseable is an error so a wrong file is not silently imported as zero
/// citations.
pub fn parse(input: &str) -> Result<Vec<Citation>> {
    let mut citations = Vec::new();
    let mut record: Option<RisRecord> = None;
    let mut saw_any_record = false;

    for line in input.lines() {
        let line = line.trim_end();
        match split_tag(line) {
            Some(("TY", _)) => {
                saw_any_record = true;
                // An unterminated record is flushed by the next TY.
                if let Some(r) = record.take() {
                    citations.extend(r.into_citation());
                }
                record = Some(RisRecord::default());
            }
            Some(("ER", _)) => {
                if let Some(r) = record.take() {
                    citations.extend(r.into_citation());
                }
            }
            Some((tag, value)) => {
                if let Some(r) = record.as_mut() {
                    r.apply(tag, value);
                }
            }
            None => {
                // Continuation of the previous tag's value.
                if let Some(r) = record.as_mut() {
                    r.continue_value(line.trim());
                }
            }
        }
    }
    if let Some(r) = record.take() {
        citations.extend(r.into_citation());
    }

    if saw_any_record && citations.is_empty() {
        anyhow::bail!("RIS input contains records but none with a title");
    }
    if !saw_any_record && !input.trim().is_empty() {
        anyhow::bail!("Input does not look like RIS (no TY record marker found)");
    }
    Ok(citations)
}

/// Split a `TAG  - value` line. The separator is two spaces, a hyphen, and
/// an optional space; tags are two characters, uppercase alphanumeric.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let tag = line.get(0..2)?;
    if !tag.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return None;
    }
    let rest = line.get(2..)?;
    let rest = rest.strip_prefix("  - ").or_else(|| rest.strip_prefix("  -"))?;
    Some((tag, rest.trim()))
}

#[derive(Default)]
struct RisRecord {
    title: Option<String>,
    authors: Vec<String>,
    abstract_text: Option<String>,
    year: Option<i32>,
    doi: Option<String>,
    journal: Option<String>,
    last_tag: Option<&'static str>,
}

impl RisRecord {
    fn apply(&mut self, tag: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        match tag {
            "TI" | "T1" => {
                set_first(&mut self.title, value);
                self.last_tag = Some("title");
            }
            "AU" | "A1" => {
                // Some exports pack several authors into one tag.
                self.authors.extend(
                    value
                        .split(';')
                        .map(str::trim)
                        .filter(|a| !a.is_empty())
                        .map(String::from),
                );
                self.last_tag = Some("author");
            }
            "AB" | "N2" => {
                set_first(&mut self.abstract_text, value);
                self.last_tag = Some("abstract");
            }
            "PY" | "Y1" => {
                // Date tags carry "2023" or "2023/01/15/".
                if self.year.is_none() {
                    self.year = value
                        .split('/')
                        .next()
                        .and_then(|y| y.trim().parse().ok());
                }
                self.last_tag = None;
            }
            "DO" => {
                set_first(&mut self.doi, value);
                self.last_tag = None;
            }
            "JO" | "JF" | "T2" => {
                set_first(&mut self.journal, value);
                self.last_tag = None;
            }
            _ => self.last_tag = None,
        }
    }

    fn continue_value(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let target = match self.last_tag {
            Some("title") => &mut self.title,
            Some("abstract") => &mut self.abstract_text,
            _ => return,
        };
        if let Some(existing) = target {
            existing.push(' ');
            existing.push_str(text);
        }
    }

    fn into_citation(self) -> Option<Citation> {
        let Some(title) = self.title else {
            tracing::warn!("Skipping RIS record without a title");
            return None;
        };
        let mut c = Citation::new(title);
        c.source = Source::Ris;
        c.authors = self.authors;
        c.abstract_text = self.abstract_text;
        c.year = self.year;
        c.doi = self.doi;
        c.journal = self.journal;
        Some(c)
    }
}

fn set_first(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}
