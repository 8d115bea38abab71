//! Line-window planning for one file

use std::sync::Arc;

use crate::config::DispatchSettings;
use crate::models::AnalysisUnit;

/// A contiguous line range of one file, threaded through recovery.
///
/// Positions are carried explicitly (`start` into the original lines), so
/// bisected halves never need to recover their offset from anything else.
#[derive(Debug, Clone)]
pub struct Span {
    pub path: Arc<str>,
    lines: Arc<Vec<String>>,
    /// Index of the first line (0-based) in the original file
    pub start: usize,
    pub len: usize,
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub depth: u32,
}

impl Span {
    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    /// 1-based first line in original-file coordinates
    pub fn start_line(&self) -> u32 {
        self.start as u32 + 1
    }

    /// 1-based last line in original-file coordinates
    pub fn end_line(&self) -> u32 {
        (self.start + self.len) as u32
    }

    /// Offset to add to unit-relative line numbers
    pub fn line_offset(&self) -> u32 {
        self.start as u32
    }

    pub fn to_unit(&self) -> AnalysisUnit {
        let mut content = self.lines[self.start..self.start + self.len].join("\n");
        content.push('\n');
        AnalysisUnit {
            path: self.path.to_string(),
            content,
            start_line: self.start_line(),
            end_line: self.end_line(),
            chunk_index: self.chunk_index,
            chunk_total: self.chunk_total,
            total_lines: self.total_lines() as u32,
            depth: self.depth,
        }
    }

    /// Split at the midpoint. Both halves are one level deeper.
    pub fn bisect(&self) -> (Span, Span) {
        let first_len = self.len / 2;
        let first = Span {
            len: first_len,
            depth: self.depth + 1,
            ..self.clone()
        };
        let second = Span {
            start: self.start + first_len,
            len: self.len - first_len,
            depth: self.depth + 1,
            ..self.clone()
        };
        (first, second)
    }
}

/// Plan the units for a file's text.
///
/// Below `line_threshold` lines the file is one unit; otherwise it is cut
/// into `ceil(lines / window_lines)` contiguous windows. Empty text plans
/// nothing.
pub fn plan_spans(path: &str, text: &str, settings: &DispatchSettings) -> Vec<Span> {
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let total = lines.len();
    if total == 0 {
        return Vec::new();
    }

    let path: Arc<str> = Arc::from(path);
    let lines = Arc::new(lines);

    if total < settings.line_threshold {
        return vec![Span {
            path,
            lines,
            start: 0,
            len: total,
            chunk_index: 0,
            chunk_total: 1,
            depth: 0,
        }];
    }

    let window = settings.window_lines.max(1);
    let chunk_total = total.div_ceil(window);
    (0..chunk_total)
        .map(|chunk_index| {
            let start = chunk_index * window;
            Span {
                path: Arc::clone(&path),
                lines: Arc::clone(&lines),
                start,
                len: window.min(total - start),
                chunk_index,
                chunk_total,
                depth: 0,
            }
        })
        .collect()
}
