//! Built-in screening prompt templates.
//!
//! Three template families trade sensitivity against specificity:
//!
//! - `rigorous`: strict adherence to the criteria (balanced)
//! - `sensitive`: prioritizes recall, leans toward inclusion when unsure
//! - `specific`: prioritizes precision, leans toward exclusion when unsure
//!
//! Templates carry `{placeholder}` markers filled at render time; a reviewer
//! may instead supply `custom` prompt text using the same placeholders.

use serde::{Deserialize, Serialize};

use crate::model::{Citation, Stage};
use crate::protocol::{ReviewProtocol, ReviewerConfig};

/// Built-in template selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    #[default]
    Rigorous,
    Sensitive,
    Specific,
    Custom,
}

const RIGOROUS_ABSTRACT: &str = "\
You are a researcher rigorously screening titles and abstracts of scientific papers \
for inclusion or exclusion in a systematic review.

**Decision Rule**: If ANY exclusion criterion is met OR if NOT ALL inclusion criteria \
are met, EXCLUDE the article. If ALL inclusion criteria are met AND NO exclusion \
criteria are met, INCLUDE the article.

## Review Protocol

### Objective
{objective}

### Inclusion Criteria (ALL must be met)
{inclusion_criteria}

### Exclusion Criteria (ANY triggers exclusion)
{exclusion_criteria}

## Citation to Screen

**Title:** {title}
**Authors:** {authors}
**Year:** {year}
**Journal:** {journal}
**Abstract:** {abstract}

## Instructions

1. Carefully read the title and abstract
2. Evaluate EACH inclusion criterion - the article must meet ALL of them
3. Check EACH exclusion criterion - ANY match means the article should be EXCLUDED
4. Consider the study population, intervention/exposure, comparator, and outcomes
5. Provide step-by-step reasoning for your evaluation
6. Give your final verdict as INCLUDE, EXCLUDE, or UNCERTAIN

If the abstract provides insufficient information to determine eligibility with \
confidence, mark as UNCERTAIN for human review.

REASONING:
[Provide your systematic step-by-step evaluation here]

DECISION: [INCLUDE/EXCLUDE/UNCERTAIN]";

const SENSITIVE_ABSTRACT: &str = "\
You are a researcher screening titles and abstracts of scientific papers for a \
systematic review. Your goal is to MAXIMIZE SENSITIVITY - it is better to include a \
paper that turns out to be irrelevant than to miss a potentially relevant paper.

**Decision Rule**: When in doubt, INCLUDE. Only EXCLUDE when you are CERTAIN the \
article does not meet the criteria.

## Review Protocol

### Objective
{objective}

### Inclusion Criteria
{inclusion_criteria}

### Exclusion Criteria
{exclusion_criteria}

## Citation to Screen

**Title:** {title}
**Authors:** {authors}
**Year:** {year}
**Journal:** {journal}
**Abstract:** {abstract}

## Instructions

1. Read the title and abstract carefully
2. Look for ANY indication that this paper MIGHT be relevant
3. When information is missing or unclear, lean towards INCLUDE
4. Give your final verdict as INCLUDE, EXCLUDE, or UNCERTAIN

Remember: False negatives (missing relevant papers) are worse than false positives.

REASONING:
[Provide your evaluation here]

DECISION: [INCLUDE/EXCLUDE/UNCERTAIN]";

const SPECIFIC_ABSTRACT: &str = "\
You are a researcher screening titles and abstracts of scientific papers for a \
systematic review. Your goal is to MAXIMIZE SPECIFICITY - only include papers that \
clearly and definitively meet ALL inclusion criteria.

**Decision Rule**: When in doubt, EXCLUDE. Only INCLUDE when you are CERTAIN the \
article meets ALL inclusion criteria and violates NO exclusion criteria.

## Review Protocol

### Objective
{objective}

### Inclusion Criteria (ALL must be definitively met)
{inclusion_criteria}

### Exclusion Criteria (ANY triggers exclusion)
{exclusion_criteria}

## Citation to Screen

**Title:** {title}
**Authors:** {authors}
**Year:** {year}
**Journal:** {journal}
**Abstract:** {abstract}

## Instructions

1. Read the title and abstract carefully
2. Verify that EACH inclusion criterion is EXPLICITLY met
3. If information is missing or unclear, lean towards EXCLUDE
4. Give your final verdict as INCLUDE, EXCLUDE, or UNCERTAIN

Remember: False positives waste review resources. Be strict.

REASONING:
[Provide your detailed evaluation here]

DECISION: [INCLUDE/EXCLUDE/UNCERTAIN]";

const RIGOROUS_FULLTEXT: &str = "\
You are a researcher rigorously screening full-text articles for inclusion or \
exclusion in a systematic review. You have access to the complete article content.

**Decision Rule**: If ANY exclusion criterion is met OR if NOT ALL inclusion criteria \
are met, EXCLUDE. If ALL inclusion criteria are met AND NO exclusion criteria are \
met, INCLUDE.

## Review Protocol

### Objective
{objective}

### Inclusion Criteria (ALL must be met)
{inclusion_criteria}

### Exclusion Criteria (ANY triggers exclusion)
{exclusion_criteria}

## Article Information

**Title:** {title}
**Authors:** {authors}
**Year:** {year}
**Journal:** {journal}

## Full-Text Content

{content}

## Instructions

1. Review the full text of the article
2. Verify that ALL inclusion criteria are met by examining methods, results, and discussion
3. Check for ANY exclusion criteria throughout the article
4. Provide detailed reasoning with specific references to the article content
5. Give your final verdict as INCLUDE, EXCLUDE, or UNCERTAIN

REASONING:
[Provide your systematic evaluation with references to specific sections]

DECISION: [INCLUDE/EXCLUDE/UNCERTAIN]";

const SENSITIVE_FULLTEXT: &str = "\
You are a researcher screening full-text articles for a systematic review. Your goal \
is to MAXIMIZE SENSITIVITY - only exclude papers you are CERTAIN do not meet the \
criteria.

**Decision Rule**: When in doubt, INCLUDE. Only EXCLUDE when you have clear evidence \
from the full text that the article does not meet the criteria.

## Review Protocol

### Objective
{objective}

### Inclusion Criteria
{inclusion_criteria}

### Exclusion Criteria
{exclusion_criteria}

## Article Information

**Title:** {title}
**Authors:** {authors}
**Year:** {year}
**Journal:** {journal}

## Full-Text Content

{content}

## Instructions

1. Review the full text of the article
2. Only exclude if there is clear evidence the article fails to meet criteria
3. Give your final verdict as INCLUDE, EXCLUDE, or UNCERTAIN

REASONING:
[Provide your evaluation here]

DECISION: [INCLUDE/EXCLUDE/UNCERTAIN]";

const SPECIFIC_FULLTEXT: &str = "\
You are a researcher screening full-text articles for a systematic review. Your goal \
is to MAXIMIZE SPECIFICITY - only include papers that definitively meet ALL criteria.

**Decision Rule**: When in doubt, EXCLUDE. Only INCLUDE when the full text provides \
clear evidence that ALL inclusion criteria are met and NO exclusion criteria apply.

## Review Protocol

### Objective
{objective}

### Inclusion Criteria (ALL must be definitively met)
{inclusion_criteria}

### Exclusion Criteria (ANY triggers exclusion)
{exclusion_criteria}

## Article Information

**Title:** {title}
**Authors:** {authors}
**Year:** {year}
**Journal:** {journal}

## Full-Text Content

{content}

## Instructions

1. Review the full text of the article
2. Verify that EACH inclusion criterion is EXPLICITLY met with evidence from the text
3. Check thoroughly for ANY exclusion criteria
4. Give your final verdict as INCLUDE, EXCLUDE, or UNCERTAIN

REASONING:
[Provide your detailed evaluation with specific references]

DECISION: [INCLUDE/EXCLUDE/UNCERTAIN]";

/// Select the template for a reviewer at a stage.
///
/// `Custom` must carry prompt text; the protocol validator guarantees that,
/// so a bare `Custom` here is a programming error upstream.
pub fn template_for(reviewer: &ReviewerConfig, stage: Stage) -> anyhow::Result<String> {
    if let Some(custom) = &reviewer.custom_prompt {
        return Ok(custom.clone());
    }
    let template = match (reviewer.prompt_template, stage) {
        (PromptKind::Rigorous, Stage::Abstract) => RIGOROUS_ABSTRACT,
        (PromptKind::Sensitive, Stage::Abstract) => SENSITIVE_ABSTRACT,
        (PromptKind::Specific, Stage::Abstract) => SPECIFIC_ABSTRACT,
        (PromptKind::Rigorous, Stage::Fulltext) => RIGOROUS_FULLTEXT,
        (PromptKind::Sensitive, Stage::Fulltext) => SENSITIVE_FULLTEXT,
        (PromptKind::Specific, Stage::Fulltext) => SPECIFIC_FULLTEXT,
        (PromptKind::Custom, _) => {
            anyhow::bail!(
                "Reviewer '{}' selects the custom template without custom_prompt",
                reviewer.name
            )
        }
    };
    Ok(template.to_string())
}

/// Criteria as a numbered list, one per line.
pub fn format_criteria(criteria: &[String]) -> String {
    criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fill a template's placeholders from the protocol and citation.
///
/// `content` is the per-stage document text: the abstract at the abstract
/// stage, extracted PDF text at the full-text stage.
pub fn render(
    template: &str,
    protocol: &ReviewProtocol,
    citation: &Citation,
    stage: Stage,
) -> String {
    let abstract_text = citation
        .abstract_text
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or("Abstract not available");
    let content = match stage {
        Stage::Abstract => abstract_text,
        Stage::Fulltext => citation.fulltext.as_deref().unwrap_or_default(),
    };
    let authors = if citation.authors.is_empty() {
        "Not specified".to_string()
    } else {
        citation.authors.join(", ")
    };
    let year = citation
        .year
        .map_or_else(|| "Not specified".to_string(), |y| y.to_string());

    template
        .replace("{objective}", &protocol.objective)
        .replace(
            "{inclusion_criteria}",
            &format_criteria(&protocol.inclusion_criteria),
        )
        .replace(
            "{exclusion_criteria}",
            &format_criteria(&protocol.exclusion_criteria),
        )
        .replace("{title}", &citation.title)
        .replace("{authors}", &authors)
        .replace("{year}", &year)
        .replace(
            "{journal}",
            citation.journal.as_deref().unwrap_or("Not specified"),
        )
        .replace("{abstract}", abstract_text)
        .replace("{content}", content)
}
