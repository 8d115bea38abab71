//! Offline pattern analyzer
//!
//! A line-oriented rule set for the most common security and resource
//! problems. It answers in the same unified JSON shape a hosted model is
//! asked for, so the rest of the pipeline cannot tell the two apart.

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use super::{AiResult, ModelClient};
use crate::models::{AnalysisUnit, ErrorType, Severity};

struct Rule {
    pattern: Regex,
    /// Line is exempt when this also matches
    unless: Option<Regex>,
    error_type: ErrorType,
    severity: Severity,
    issue: &'static str,
    fix: &'static str,
}

fn rule(
    pattern: &str,
    unless: Option<&str>,
    error_type: ErrorType,
    severity: Severity,
    issue: &'static str,
    fix: &'static str,
) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("valid regex"),
        unless: unless.map(|u| Regex::new(u).expect("valid regex")),
        error_type,
        severity,
        issue,
        fix,
    }
}

static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
static HARDCODED_SECRET: OnceLock<Regex> = OnceLock::new();
static SECRET_FROM_ENV: OnceLock<Regex> = OnceLock::new();
static WHILE_TRUE: OnceLock<Regex> = OnceLock::new();
static LOOP_EXIT: OnceLock<Regex> = OnceLock::new();
static BARE_OPEN: OnceLock<Regex> = OnceLock::new();

fn rules() -> &'static Vec<Rule> {
    RULES.get_or_init(|| {
        vec![
            rule(
                r#"(?i)["'`]\s*(?:select\s.+\sfrom|insert\s+into|update\s+\w+\s+set|delete\s+from)\b[^\n]*(?:\{[^}]*\}|\$\{[^}]*\}|["'`]\s*\+|["']\s*%\s*[\w(]|\.format\()"#,
                None,
                ErrorType::Security,
                Severity::Critical,
                "Potential SQL injection through string formatting",
                "Use parameterized queries",
            ),
            rule(
                r#"(?:os\.system|os\.popen|subprocess\.(?:run|call|Popen|check_output)|execSync|\bexec)\s*\(\s*(?:f["']|["'`][^"'`]*\$\{|["'][^"']*["']\s*\+)"#,
                None,
                ErrorType::Security,
                Severity::Critical,
                "Potential command injection through string formatting",
                "Pass arguments as a list instead of building a shell string",
            ),
            rule(
                r"shell\s*=\s*True",
                None,
                ErrorType::Security,
                Severity::High,
                "Subprocess invoked with shell=True",
                "Call the program directly with a list of arguments",
            ),
            rule(
                r"\.(?:innerHTML|outerHTML)\s*=[^=]|dangerouslySetInnerHTML|render_template_string\s*\(|document\.write\s*\(",
                None,
                ErrorType::Security,
                Severity::Critical,
                "Potential XSS: untrusted content rendered as HTML",
                "Use textContent or escape the content before rendering",
            ),
            rule(
                r"pickle\.loads?\s*\(|\byaml\.load\s*\(|new\s+Function\s*\(|\beval\s*\(",
                Some(r"SafeLoader|safe_load"),
                ErrorType::Security,
                Severity::Critical,
                "Insecure deserialization or dynamic code evaluation",
                "Use a safe loader (json, yaml.safe_load) and never evaluate input",
            ),
            rule(
                r#"(?i)\b(?:md5|sha1)\s*\(|hashlib\.(?:md5|sha1)|createHash\(\s*["'](?:md5|sha1)"#,
                None,
                ErrorType::Security,
                Severity::High,
                "Weak hash algorithm",
                "Use SHA-256 or a dedicated password hash such as bcrypt or argon2",
            ),
            rule(
                r"(?:\bopen|readFile|readFileSync|writeFile|writeFileSync|sendFile|send_file)\s*\([^)]*(?:req\.(?:params|query|body)|request\.(?:args|form|GET|POST|files))",
                None,
                ErrorType::Security,
                Severity::High,
                "Potential path traversal from request input",
                "Resolve the path and check it stays inside an allowed directory",
            ),
        ]
    })
}

fn hardcoded_secret() -> &'static Regex {
    HARDCODED_SECRET.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:password|passwd|api_key|apikey|secret|secret_key|token|jwt_secret|access_key)\s*[:=]\s*["'][^"']{3,}["']"#)
            .expect("valid regex")
    })
}

fn secret_from_env() -> &'static Regex {
    SECRET_FROM_ENV.get_or_init(|| {
        Regex::new(r"os\.getenv|os\.environ|process\.env|config\.get|secrets\.get").expect("valid regex")
    })
}

fn while_true() -> &'static Regex {
    WHILE_TRUE.get_or_init(|| Regex::new(r"^(\s*)while\s+True\s*:").expect("valid regex"))
}

fn loop_exit() -> &'static Regex {
    LOOP_EXIT.get_or_init(|| Regex::new(r"\b(?:break|return|raise)\b|sys\.exit").expect("valid regex"))
}

fn bare_open() -> &'static Regex {
    BARE_OPEN.get_or_init(|| Regex::new(r"(?:^|[=(,\s])open\s*\(").expect("valid regex"))
}

#[derive(Debug, Serialize)]
struct Finding {
    start_line: u32,
    end_line: u32,
    error_type: ErrorType,
    severity: Severity,
    issue: &'static str,
    suggested_fix: &'static str,
    code: String,
}

#[derive(Serialize)]
struct Report {
    issues: Vec<Finding>,
}

/// Rule-based stand-in for a hosted model
#[derive(Debug, Default, Clone)]
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Findings for `content`, with lines relative to its first line
    fn scan(&self, path: &str, content: &str) -> Vec<Finding> {
        let lines: Vec<&str> = content.lines().collect();
        let is_python = path.ends_with(".py");
        let is_test = path.to_ascii_lowercase().contains("test");
        let secrets_from_env = secret_from_env().is_match(content);

        let mut findings = Vec::new();
        let mut push = |idx: usize, end_idx: usize, error_type, severity, issue, fix, line: &str| {
            findings.push(Finding {
                start_line: idx as u32 + 1,
                end_line: end_idx as u32 + 1,
                error_type,
                severity,
                issue,
                suggested_fix: fix,
                code: line.trim().to_string(),
            });
        };

        for (idx, &line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('#') {
                continue;
            }

            if !secrets_from_env && hardcoded_secret().is_match(line) {
                push(
                    idx,
                    idx,
                    ErrorType::Security,
                    Severity::Critical,
                    "Hardcoded credential found in code",
                    "Read secrets from environment variables or a secret store",
                    line,
                );
            }

            for rule in rules() {
                if rule.pattern.is_match(line) && !rule.unless.as_ref().is_some_and(|u| u.is_match(line)) {
                    push(idx, idx, rule.error_type, rule.severity, rule.issue, rule.fix, line);
                }
            }

            if is_python {
                if let Some(caps) = while_true().captures(line) {
                    let indent = caps.get(1).map_or(0, |m| m.as_str().len());
                    let body_end = block_end(&lines, idx, indent);
                    let exits = lines[idx + 1..=body_end].iter().any(|l| loop_exit().is_match(l));
                    if !exits {
                        push(
                            idx,
                            body_end,
                            ErrorType::Runtime,
                            Severity::High,
                            "Potential infinite loop without break condition",
                            "Add an exit condition to the loop",
                            line,
                        );
                    }
                }
                if bare_open().is_match(line) && !trimmed.starts_with("with ") && !trimmed.starts_with("def ") {
                    push(
                        idx,
                        idx,
                        ErrorType::BestPractice,
                        Severity::Medium,
                        "File opened without using a context manager",
                        "Use \"with open(...) as f:\" so the file is always closed",
                        line,
                    );
                }
            }
        }

        if is_test {
            for finding in &mut findings {
                finding.severity = finding.severity.downgrade();
            }
        }
        findings
    }
}

/// Index of the last line of the indented block opened at `start`
fn block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    let mut end = start;
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_indent = line.len() - line.trim_start().len();
        if line_indent <= indent {
            break;
        }
        end = start + 1 + offset;
    }
    end
}

#[async_trait]
impl ModelClient for PatternAnalyzer {
    async fn complete(&self, unit: &AnalysisUnit) -> AiResult<String> {
        let report = Report {
            issues: self.scan(&unit.path, &unit.content),
        };
        serde_json::to_string(&report).map_err(|e| super::AiError::ParseError(e.to_string()))
    }

    fn name(&self) -> String {
        "local".to_string()
    }
}
