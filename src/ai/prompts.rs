//! Prompt text for unit analysis
//!
//! The wording is not load-bearing; the JSON shape it asks for is what
//! [`super::response`] expects.

use crate::models::AnalysisUnit;

pub const SYSTEM_PROMPT: &str = "You are an expert code reviewer. You find real bugs, \
security vulnerabilities and significant code smells in the code you are given. \
You never invent problems that are not visible in the code. \
Respond with a single JSON object and nothing else.";

const RESPONSE_FORMAT: &str = r#"Respond with JSON of exactly this shape:
{
  "issues": [
    {
      "start_line": <number>,
      "end_line": <number>,
      "error_type": "Syntax" | "Runtime" | "Security" | "Performance" | "BestPractice" | "Style",
      "severity": "critical" | "high" | "medium" | "low",
      "issue": "<what is wrong>",
      "suggested_fix": "<how to fix it>",
      "code": "<the offending code>"
    }
  ]
}
Use an empty "issues" array if you find nothing worth reporting."#;

/// Language hint for the code fence
fn language_for(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("") {
        "py" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "sh" | "bash" => "bash",
        "sql" => "sql",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        _ => "",
    }
}

/// User prompt for one unit
pub fn unit_prompt(unit: &AnalysisUnit) -> String {
    let mut prompt = String::with_capacity(unit.content.len() + 1024);
    prompt.push_str(&format!("Analyze the file `{}`.\n", unit.path));
    if unit.is_whole_file() {
        prompt.push_str("Line numbers start at 1 on the first line shown.\n\n");
    } else {
        prompt.push_str(&format!(
            "This is a fragment: lines {}-{} of {}. Report line numbers relative to the \
             fragment, where 1 is its first line.\n\n",
            unit.start_line, unit.end_line, unit.total_lines
        ));
    }
    prompt.push_str(&format!("```{}\n", language_for(&unit.path)));
    prompt.push_str(&unit.annotated_content());
    if !unit.content.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str("```\n\n");
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(start: u32, end: u32, total: u32) -> AnalysisUnit {
        AnalysisUnit {
            path: "src/app.py".into(),
            content: "x = 1\n".into(),
            start_line: start,
            end_line: end,
            chunk_index: 0,
            chunk_total: 1,
            total_lines: total,
            depth: 0,
        }
    }

    #[test]
    fn test_whole_file_prompt() {
        let prompt = unit_prompt(&unit(1, 1, 1));
        assert!(prompt.contains("```python\nx = 1\n```"));
        assert!(!prompt.contains("fragment"));
        assert!(prompt.contains("\"issues\""));
    }

    #[test]
    fn test_fragment_prompt_is_annotated() {
        let prompt = unit_prompt(&unit(176, 350, 800));
        assert!(prompt.contains("lines 176-350 of 800"));
        assert!(prompt.contains("[Chunk 1/1 of src/app.py"));
    }
}
