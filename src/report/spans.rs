//! Conversion of observability spans into an agent trajectory.
//!
//! Spans are ordered by start time. Tool spans become an `action` step,
//! followed by a `tool_result` step when they carry an output. LLM spans
//! become `thinking` and/or `response` steps. Spans that match neither
//! (HTTP plumbing, framework internals) are skipped.

use serde_json::Value;

use super::types::{Span, StepType, TrajectoryStep};

const TOOL_NAME_KEYS: &[&str] = &["tool.name", "gen_ai.tool.name"];
const TOOL_INPUT_KEYS: &[&str] = &["tool.input", "gen_ai.tool.call.arguments", "input.value"];
const TOOL_OUTPUT_KEYS: &[&str] = &["tool.output", "gen_ai.tool.call.result", "output.value"];
const COMPLETION_KEYS: &[&str] = &["gen_ai.completion", "llm.output", "output.value"];
const REASONING_KEYS: &[&str] = &["gen_ai.reasoning", "llm.reasoning"];

/// Builds a trajectory from the spans of one agent run.
pub fn trajectory_from_spans(spans: &[Span]) -> Vec<TrajectoryStep> {
    let mut ordered: Vec<&Span> = spans.iter().collect();
    ordered.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.span_id.cmp(&b.span_id))
    });

    let mut steps = Vec::new();
    for span in ordered {
        if let Some(tool_name) = first_string(span, TOOL_NAME_KEYS) {
            let args = first_value(span, TOOL_INPUT_KEYS)
                .map(parse_embedded_json)
                .unwrap_or(Value::Null);
            steps.push(TrajectoryStep::action(tool_name, args).at(span.start_time));

            if let Some(output) = first_string(span, TOOL_OUTPUT_KEYS) {
                let at = span.end_time.unwrap_or(span.start_time);
                steps.push(TrajectoryStep::new(StepType::ToolResult, output).at(at));
            }
            continue;
        }

        if !is_llm_span(span) {
            continue;
        }

        if let Some(reasoning) = first_string(span, REASONING_KEYS) {
            steps.push(TrajectoryStep::new(StepType::Thinking, reasoning).at(span.start_time));
        }
        if let Some(completion) = first_string(span, COMPLETION_KEYS) {
            let at = span.end_time.unwrap_or(span.start_time);
            steps.push(TrajectoryStep::new(StepType::Response, completion).at(at));
        }
    }

    steps
}

fn is_llm_span(span: &Span) -> bool {
    span.attributes.contains_key("gen_ai.system")
        || span.attributes.contains_key("llm.model_name")
        || span.name.starts_with("llm")
        || span.name.starts_with("chat")
}

fn first_value<'a>(span: &'a Span, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| span.attributes.get(*k))
        .filter(|v| !v.is_null())
}

fn first_string(span: &Span, keys: &[&str]) -> Option<String> {
    first_value(span, keys)
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .filter(|s| !s.trim().is_empty())
}

/// Tool arguments are usually exported as a JSON-encoded string attribute.
fn parse_embedded_json(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn span(id: &str, name: &str, offset_secs: i64, attrs: &[(&str, Value)]) -> Span {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs);
        Span {
            trace_id: "trace-1".to_string(),
            span_id: id.to_string(),
            parent_span_id: None,
            name: name.to_string(),
            start_time: start,
            end_time: Some(start + Duration::seconds(1)),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_spans_ordered_by_start_time() {
        let spans = vec![
            span(
                "s2",
                "llm.call",
                10,
                &[
                    ("gen_ai.system", Value::from("anthropic")),
                    ("gen_ai.completion", Value::from("The refund was issued.")),
                ],
            ),
            span(
                "s1",
                "tool.execute",
                5,
                &[
                    ("tool.name", Value::from("issue_refund")),
                    ("tool.input", Value::from(r#"{"order":"A-1"}"#)),
                    ("tool.output", Value::from("ok")),
                ],
            ),
        ];

        let steps = trajectory_from_spans(&spans);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].step_type, StepType::Action);
        assert_eq!(steps[0].tool_name.as_deref(), Some("issue_refund"));
        assert_eq!(steps[0].tool_args, Some(serde_json::json!({"order": "A-1"})));
        assert_eq!(steps[1].step_type, StepType::ToolResult);
        assert_eq!(steps[1].content, "ok");
        assert_eq!(steps[2].step_type, StepType::Response);
    }

    #[test]
    fn test_reasoning_becomes_thinking_step() {
        let spans = vec![span(
            "s1",
            "chat gpt",
            0,
            &[
                ("gen_ai.reasoning", Value::from("check order first")),
                ("gen_ai.completion", Value::from("done")),
            ],
        )];
        let steps = trajectory_from_spans(&spans);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_type, StepType::Thinking);
        assert_eq!(steps[1].content, "done");
    }

    #[test]
    fn test_plumbing_spans_skipped() {
        let spans = vec![span("s1", "HTTP GET", 0, &[("http.status_code", Value::from(200))])];
        assert!(trajectory_from_spans(&spans).is_empty());
    }
}
