//! Normalization of model responses into [`Issue`]s
//!
//! Models answer in one of two shapes:
//!
//! - unified: `{"issues": [{..., "error_type": "Security"}]}`
//! - legacy: `{"bugs": [...], "securityIssues": [...], "codeSmells": [...]}`
//!
//! Both collapse into one `Vec<Issue>`. Anything that is not a JSON object
//! with one of those keys is "no result" rather than an error.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::models::{AnalysisUnit, ErrorType, Issue, Severity};

static FENCE: OnceLock<Regex> = OnceLock::new();

fn fence_regex() -> &'static Regex {
    FENCE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("valid regex"))
}

/// Legacy bucket keys and the error type assumed when an item carries none
const LEGACY_BUCKETS: &[(&str, ErrorType)] = &[
    ("bugs", ErrorType::Runtime),
    ("securityIssues", ErrorType::Security),
    ("security_issues", ErrorType::Security),
    ("codeSmells", ErrorType::BestPractice),
    ("code_smells", ErrorType::BestPractice),
];

/// Parse a raw response for `unit`.
///
/// Returned issues carry unit-relative line numbers (1 = first line of the
/// unit), clamped into the unit. `None` means the response held no usable
/// result; `Some(vec![])` means the model found nothing.
pub fn parse_issues(raw: &str, unit: &AnalysisUnit) -> Option<Vec<Issue>> {
    let object = extract_json_object(raw)?;

    let mut issues = Vec::new();
    let mut recognized = false;

    if let Some(Value::Array(items)) = object.get("issues") {
        recognized = true;
        issues.extend(items.iter().filter_map(|item| to_issue(item, None, unit)));
    }
    for (key, default_type) in LEGACY_BUCKETS {
        if let Some(Value::Array(items)) = object.get(*key) {
            recognized = true;
            issues.extend(
                items
                    .iter()
                    .filter_map(|item| to_issue(item, Some(*default_type), unit)),
            );
        }
    }

    if !recognized {
        tracing::debug!("Response for {} has no issue arrays", unit.path);
        return None;
    }
    Some(issues)
}

/// The outermost JSON object in `raw`, ignoring markdown fences and chatter
fn extract_json_object(raw: &str) -> Option<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut candidates: Vec<&str> = fence_regex()
        .captures_iter(trimmed)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    candidates.push(trimmed);

    for candidate in candidates {
        let (Some(open), Some(close)) = (candidate.find('{'), candidate.rfind('}')) else {
            continue;
        };
        if close <= open {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate[open..=close]) {
            return Some(map);
        }
    }
    None
}

fn field<'a>(item: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| item.get(*n).filter(|v| !v.is_null()))
}

fn text_field(item: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match field(item, names)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Lines come as 12, "12", "12-15" or "Line 12"
fn line_range(value: &Value) -> Option<(u32, Option<u32>)> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| (n.min(u32::MAX as u64) as u32, None)),
        Value::String(s) => {
            let numbers: Vec<u32> = s
                .split(|c: char| !c.is_ascii_digit())
                .filter(|p| !p.is_empty())
                .filter_map(|p| p.parse().ok())
                .collect();
            match numbers.as_slice() {
                [] => None,
                [start] => Some((*start, None)),
                [start, end, ..] => Some((*start, Some(*end))),
            }
        }
        _ => None,
    }
}

fn to_issue(value: &Value, default_type: Option<ErrorType>, unit: &AnalysisUnit) -> Option<Issue> {
    let item = value.as_object()?;

    let description = text_field(item, &["issue", "description", "message", "title"])
        .filter(|d| !d.is_empty())?;

    let error_type = text_field(item, &["error_type", "errorType", "type", "category"])
        .and_then(|t| ErrorType::parse_lenient(&t))
        .or(default_type)
        .unwrap_or(ErrorType::Runtime);

    let severity = text_field(item, &["severity", "level", "priority"])
        .and_then(|s| Severity::parse_lenient(&s))
        .unwrap_or_default();

    let (start, range_end) = field(item, &["start_line", "startLine", "line", "line_number", "lineNumber", "location"])
        .and_then(line_range)
        .unwrap_or((1, None));
    let end = field(item, &["end_line", "endLine"])
        .and_then(line_range)
        .map(|(n, _)| n)
        .or(range_end)
        .unwrap_or(start);

    let (start_line, end_line) = clamp_lines(start, end, unit);

    Some(Issue {
        file: unit.path.clone(),
        start_line,
        end_line,
        error_type,
        severity,
        issue: description,
        suggested_fix: text_field(item, &["suggested_fix", "suggestedFix", "fix", "suggestion", "recommendation"])
            .unwrap_or_default(),
        code: text_field(item, &["code", "snippet", "proof", "code_snippet"]).unwrap_or_default(),
    })
}

/// Keep lines inside `1..=unit.line_count()` with `end >= start`.
///
/// A number that falls outside the unit but inside its original-file range
/// was reported in file coordinates despite the instructions; translate it.
fn clamp_lines(start: u32, end: u32, unit: &AnalysisUnit) -> (u32, u32) {
    let count = unit.line_count().max(1);
    let offset = unit.line_offset();
    let translate = |n: u32| {
        if n > count && offset > 0 && n >= unit.start_line && n <= unit.end_line {
            n - offset
        } else {
            n
        }
    };
    let start = translate(start).clamp(1, count);
    let end = translate(end).clamp(start, count);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(start: u32, end: u32) -> AnalysisUnit {
        AnalysisUnit {
            path: "src/app.js".into(),
            content: String::new(),
            start_line: start,
            end_line: end,
            chunk_index: 0,
            chunk_total: 1,
            total_lines: end,
            depth: 0,
        }
    }

    #[test]
    fn test_unified_shape() {
        let raw = r#"{"issues": [{"start_line": 3, "end_line": 4, "error_type": "Security",
            "severity": "high", "issue": "eval of input", "suggested_fix": "don't", "code": "eval(x)"}]}"#;
        let issues = parse_issues(raw, &unit(1, 10)).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].error_type, ErrorType::Security);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!((issues[0].start_line, issues[0].end_line), (3, 4));
        assert_eq!(issues[0].file, "src/app.js");
    }

    #[test]
    fn test_legacy_shape_uses_bucket_types() {
        let raw = r#"{"bugs": [{"line": 2, "description": "null deref", "severity": "HIGH"}],
                      "securityIssues": [{"line": "5", "description": "sqli", "fix": "bind params"}],
                      "codeSmells": [{"line": 7, "description": "long function", "severity": "Low"}]}"#;
        let issues = parse_issues(raw, &unit(1, 10)).unwrap();
        let types: Vec<_> = issues.iter().map(|i| i.error_type).collect();
        assert_eq!(
            types,
            vec![ErrorType::Runtime, ErrorType::Security, ErrorType::BestPractice]
        );
        assert_eq!(issues[1].start_line, 5);
        assert_eq!(issues[1].suggested_fix, "bind params");
        assert_eq!(issues[1].severity, Severity::Medium);
    }

    #[test]
    fn test_fenced_and_chatty_response() {
        let raw = "Here you go:\n```json\n{\"issues\": [{\"line\": 1, \"issue\": \"x\", \"error_type\": \"Best Practice\"}]}\n```\nHope it helps!";
        let issues = parse_issues(raw, &unit(1, 3)).unwrap();
        assert_eq!(issues[0].error_type, ErrorType::BestPractice);
    }

    #[test]
    fn test_malformed_is_no_result() {
        assert!(parse_issues("", &unit(1, 3)).is_none());
        assert!(parse_issues("I could not analyze this file.", &unit(1, 3)).is_none());
        assert!(parse_issues("{\"issues\": [", &unit(1, 3)).is_none());
        assert!(parse_issues("{\"summary\": \"fine\"}", &unit(1, 3)).is_none());
    }

    #[test]
    fn test_empty_issue_list_is_a_result() {
        assert_eq!(parse_issues("{\"issues\": []}", &unit(1, 3)), Some(vec![]));
    }

    #[test]
    fn test_line_clamping() {
        let issues = parse_issues(
            r#"{"issues": [{"start_line": 0, "end_line": 99, "issue": "a"},
                           {"start_line": "4-2", "issue": "b"}]}"#,
            &unit(1, 10),
        )
        .unwrap();
        assert_eq!((issues[0].start_line, issues[0].end_line), (1, 10));
        assert_eq!((issues[1].start_line, issues[1].end_line), (4, 4));
    }

    #[test]
    fn test_file_coordinates_are_translated() {
        // Unit covers original lines 701..=800; model answered with 705
        let issues = parse_issues(
            r#"{"issues": [{"start_line": 705, "issue": "a"}]}"#,
            &unit(701, 800),
        )
        .unwrap();
        assert_eq!(issues[0].start_line, 5);
    }

    #[test]
    fn test_items_without_description_are_dropped() {
        let issues = parse_issues(r#"{"issues": [{"line": 1}, "junk", {"issue": "ok"}]}"#, &unit(1, 2))
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue, "ok");
    }
}
