use anyhow::{Context, Result};
use std::path::Path;

/// Outcome of checking a JSONL file line by line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReport {
    /// Every line parsed; `lines` excludes a tolerated trailing empty line
    Valid { lines: usize },
    /// First offending line, 1-indexed, with the parser's message
    Invalid { line: usize, message: String },
}

/// Parse every line as JSON and stop at the first one that fails
pub fn validate_str(contents: &str) -> ValidationReport {
    let lines: Vec<&str> = contents.split('\n').collect();
    let last = lines.len() - 1;
    let mut checked = 0;

    for (index, line) in lines.iter().enumerate() {
        if index == last && line.is_empty() {
            continue;
        }

        if let Err(e) = serde_json::from_str::<serde_json::Value>(line) {
            return ValidationReport::Invalid {
                line: index + 1,
                message: e.to_string(),
            };
        }
        checked += 1;
    }

    ValidationReport::Valid { lines: checked }
}

pub fn validate_file(path: &Path) -> Result<ValidationReport> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSONL file: {}", path.display()))?;
    Ok(validate_str(&contents))
}
