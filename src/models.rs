//! Core data models for bugsweep
//!
//! These models flow through the whole pipeline: the selector produces
//! [`FileDescriptor`]s, the dispatcher turns them into [`AnalysisUnit`]s and
//! collects [`Issue`]s, and the status store folds [`AnalysisResult`]s into
//! one cumulative session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Severity levels for issues
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse the many spellings models use ("HIGH", "Critical", "minor", ...)
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "blocker" | "severe" => Some(Severity::Critical),
            "high" | "major" | "error" => Some(Severity::High),
            "medium" | "moderate" | "warning" | "warn" => Some(Severity::Medium),
            "low" | "minor" | "info" | "informational" | "trivial" => Some(Severity::Low),
            _ => None,
        }
    }

    /// One level less severe (saturating at `Low`)
    pub fn downgrade(self) -> Self {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium | Severity::Low => Severity::Low,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Kind of problem an issue describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    Syntax,
    Runtime,
    Security,
    Performance,
    BestPractice,
    Style,
}

impl ErrorType {
    /// Accepts "BestPractice", "best practice", "best_practice", "SECURITY", ...
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "syntax" | "syntaxerror" => Some(ErrorType::Syntax),
            "runtime" | "runtimeerror" | "bug" | "logic" | "logicerror" => Some(ErrorType::Runtime),
            "security" | "vulnerability" => Some(ErrorType::Security),
            "performance" | "perf" => Some(ErrorType::Performance),
            "bestpractice" | "bestpractices" | "codesmell" | "maintainability" => {
                Some(ErrorType::BestPractice)
            }
            "style" | "formatting" | "naming" => Some(ErrorType::Style),
            _ => None,
        }
    }

    /// Which legacy bucket this type is reported under
    pub fn group(self) -> IssueGroup {
        match self {
            ErrorType::Runtime | ErrorType::Syntax => IssueGroup::Bugs,
            ErrorType::Security => IssueGroup::SecurityIssues,
            ErrorType::Performance | ErrorType::BestPractice | ErrorType::Style => {
                IssueGroup::CodeSmells
            }
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorType::Syntax => "Syntax",
            ErrorType::Runtime => "Runtime",
            ErrorType::Security => "Security",
            ErrorType::Performance => "Performance",
            ErrorType::BestPractice => "BestPractice",
            ErrorType::Style => "Style",
        };
        f.write_str(name)
    }
}

/// Legacy three-array view of an issue set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueGroup {
    Bugs,
    SecurityIssues,
    CodeSmells,
}

/// One detected problem.
///
/// Line numbers are always in the coordinate space of the original file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub error_type: ErrorType,
    pub severity: Severity,
    pub issue: String,
    #[serde(default)]
    pub suggested_fix: String,
    #[serde(default)]
    pub code: String,
}

impl Issue {
    /// Move the issue by `offset` lines (unit-relative -> file-relative)
    pub fn shifted(mut self, offset: u32) -> Self {
        self.start_line += offset;
        self.end_line += offset;
        self
    }
}

/// One file's aggregated issues.
///
/// `issues` is the single source of truth; the legacy buckets are derived
/// from it on serialization so clients reading either shape keep working.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalysisResult {
    pub file: String,
    pub issues: Vec<Issue>,
}

impl AnalysisResult {
    pub fn new(file: impl Into<String>, issues: Vec<Issue>) -> Self {
        Self {
            file: file.into(),
            issues,
        }
    }

    /// Issues belonging to one legacy bucket
    pub fn group(&self, group: IssueGroup) -> Vec<&Issue> {
        self.issues
            .iter()
            .filter(|i| i.error_type.group() == group)
            .collect()
    }

    pub fn bugs(&self) -> Vec<&Issue> {
        self.group(IssueGroup::Bugs)
    }

    pub fn security_issues(&self) -> Vec<&Issue> {
        self.group(IssueGroup::SecurityIssues)
    }

    pub fn code_smells(&self) -> Vec<&Issue> {
        self.group(IssueGroup::CodeSmells)
    }
}

impl Serialize for AnalysisResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AnalysisResult", 5)?;
        s.serialize_field("file", &self.file)?;
        s.serialize_field("issues", &self.issues)?;
        s.serialize_field("bugs", &self.bugs())?;
        s.serialize_field("securityIssues", &self.security_issues())?;
        s.serialize_field("codeSmells", &self.code_smells())?;
        s.end()
    }
}

/// Summary of issues by severity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
}

impl IssueSummary {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut summary = Self::default();
        for issue in results.iter().flat_map(|r| r.issues.iter()) {
            match issue.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
            summary.total += 1;
        }
        summary
    }
}

/// Coarse kind of a file, inferred from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Code,
    Config,
    Doc,
}

/// A repository-relative file selected for analysis. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Forward-slash separated path relative to the repository root
    pub path: String,
    pub size: u64,
    pub extension: String,
    pub category: FileCategory,
}

impl FileDescriptor {
    /// Number of path components above the file (`a.rs` = 0, `src/a.rs` = 1)
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }
}

/// The unit of work dispatched to the model.
///
/// `content` holds the raw lines `start_line..=end_line` of `path`; the
/// annotation telling the model where it is lives in [`AnalysisUnit::annotated_content`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisUnit {
    pub path: String,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub total_lines: u32,
    /// Bisection depth (0 = as originally planned)
    pub depth: u32,
}

impl AnalysisUnit {
    /// Line offset to add to unit-relative line numbers
    pub fn line_offset(&self) -> u32 {
        self.start_line.saturating_sub(1)
    }

    pub fn line_count(&self) -> u32 {
        self.end_line + 1 - self.start_line
    }

    /// True when the unit covers the whole file
    pub fn is_whole_file(&self) -> bool {
        self.start_line == 1 && self.end_line >= self.total_lines
    }

    /// Content with a line-range header so reported numbers stay interpretable
    pub fn annotated_content(&self) -> String {
        if self.is_whole_file() {
            return self.content.clone();
        }
        format!(
            "[Chunk {}/{} of {}: original lines {}-{} of {}. Report line numbers relative to this chunk, starting at 1.]\n{}",
            self.chunk_index + 1,
            self.chunk_total,
            self.path,
            self.start_line,
            self.end_line,
            self.total_lines,
            self.content
        )
    }
}

/// How the repository content was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionStrategy {
    #[default]
    Archive,
    Clone,
    Local,
}

/// A materialized repository. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryHandle {
    pub owner: String,
    pub repo: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub language: Option<String>,
    pub estimated_time: String,
    pub strategy: AcquisitionStrategy,
    /// HEAD commit when the content is a git checkout
    pub revision: Option<String>,
    pub materialized_at: DateTime<Utc>,
}

impl RepositoryHandle {
    /// `owner/repo`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}
