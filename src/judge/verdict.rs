//! Extraction of a JSON verdict from free-form LLM output.
//!
//! Judges are asked for a bare JSON object but often wrap it in a markdown
//! fence or surround it with prose. Strategies, in order: the whole
//! response, a fenced code block, then the first balanced `{...}`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::JudgeVerdict;
use crate::error::JudgeError;
use crate::report::PassFailStatus;

/// Raw verdict shape requested from the LLM.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    passed: bool,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "improvement_strategies")]
    improvement_strategies: Vec<String>,
}

/// Parses a judge response into a verdict.
pub fn parse_verdict(content: &str) -> Result<JudgeVerdict, JudgeError> {
    let json = extract_json_object(content).ok_or_else(|| {
        let preview: String = content.chars().take(80).collect();
        JudgeError::InvalidVerdict(format!("no JSON object in response: '{}'", preview))
    })?;

    let raw: RawVerdict =
        serde_json::from_str(json).map_err(|e| JudgeError::InvalidVerdict(e.to_string()))?;

    Ok(JudgeVerdict {
        pass_fail_status: if raw.passed {
            PassFailStatus::Passed
        } else {
            PassFailStatus::Failed
        },
        metrics: raw.metrics,
        llm_judge_reasoning: raw.reasoning,
        improvement_strategies: raw.improvement_strategies,
    })
}

/// Returns the first JSON object embedded in `content`.
pub fn extract_json_object(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && find_matching_brace(trimmed) == Some(trimmed.len() - 1) {
        return Some(trimmed);
    }

    if let Some(block) = extract_code_block(content) {
        if let Some(obj) = balanced_object(block) {
            return Some(obj);
        }
    }

    balanced_object(content)
}

/// Markdown code fence, optionally tagged `json`.
static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").ok());

fn extract_code_block(content: &str) -> Option<&str> {
    CODE_FENCE
        .as_ref()?
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = find_matching_brace(&s[start..])?;
    Some(&s[start..=start + end])
}

/// Byte index of the brace closing the object that opens at `s[0]`.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
