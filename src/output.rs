use crate::models::{Assessment, EvaluationRow, LegacyScore, PromptVariant, Usage};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// `<kind>_output_<timestamp>.csv`
pub fn report_file_name(kind: &str, timestamp: DateTime<Local>) -> String {
    format!("{}_output_{}.csv", kind, timestamp.format("%Y-%m-%dT%H-%M-%S"))
}

/// Totals over everything written to a report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rows: usize,
    pub usage: Usage,
    /// Text-completion rows whose score could not be extracted
    pub unscored: usize,
}

impl RunSummary {
    pub fn from_rows(rows: &[EvaluationRow]) -> Self {
        let mut summary = Self {
            rows: rows.len(),
            ..Self::default()
        };
        for row in rows {
            summary.usage += row.usage;
            if matches!(
                row.assessment,
                Assessment::Legacy {
                    score: LegacyScore::Unscored,
                    ..
                }
            ) {
                summary.unscored += 1;
            }
        }
        summary
    }

    pub fn log(&self, path: &Path) {
        info!(
            rows = self.rows,
            prompt_tokens = self.usage.prompt_tokens,
            completion_tokens = self.usage.completion_tokens,
            total_tokens = self.usage.total_tokens,
            unscored = self.unscored,
            "report written to {}",
            path.display()
        );
    }
}

/// Owns the accumulated rows and writes them to the report file exactly once.
///
/// Call [`ReportWriter::finish`] on the normal and failure paths. If the writer
/// is dropped without that (an early `?` return or a panic unwinding through
/// the runner) it still flushes whatever was accumulated and logs the outcome.
pub struct ReportWriter {
    path: PathBuf,
    columns: &'static [&'static str],
    rows: Vec<EvaluationRow>,
    written: bool,
}

impl ReportWriter {
    pub fn new(output_dir: &Path, variant: &PromptVariant, timestamp: DateTime<Local>) -> Self {
        Self::at_path(
            output_dir.join(report_file_name(variant.kind(), timestamp)),
            variant,
        )
    }

    pub fn at_path(path: PathBuf, variant: &PromptVariant) -> Self {
        Self {
            path,
            columns: variant.columns(),
            rows: Vec::new(),
            written: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[EvaluationRow] {
        &self.rows
    }

    /// Append a finished row; rows are kept in arrival order
    pub fn push(&mut self, row: EvaluationRow) {
        self.rows.push(row);
    }

    /// Write the report and return its totals
    pub fn finish(mut self) -> Result<RunSummary> {
        self.written = true;
        self.write()?;

        let summary = RunSummary::from_rows(&self.rows);
        summary.log(&self.path);
        Ok(summary)
    }

    fn write(&self) -> Result<()> {
        self.ensure_directory_exists()?;

        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create report: {}", self.path.display()))?;
        writer
            .write_record(self.columns)
            .context("Failed to write report header")?;
        for row in &self.rows {
            writer
                .write_record(row.record())
                .context("Failed to write report row")?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush report: {}", self.path.display()))
    }

    fn ensure_directory_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

impl Drop for ReportWriter {
    fn drop(&mut self) {
        if self.written {
            return;
        }
        self.written = true;
        match self.write() {
            Ok(()) => info!(
                rows = self.rows.len(),
                "partial report written to {}",
                self.path.display()
            ),
            Err(e) => error!("could not write report {}: {:#}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_row(id: &str, assessment: Assessment) -> EvaluationRow {
        EvaluationRow {
            lesson_name: "Math101".to_string(),
            question: "What is 2+2?".to_string(),
            answer_id: id.to_string(),
            student_answer: "4, obviously".to_string(),
            latency_secs: 1,
            assessment,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
            },
        }
    }

    fn read_back(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_report_file_name() {
        let timestamp = Local.with_ymd_and_hms(2023, 7, 3, 16, 8, 3).unwrap();
        assert_eq!(
            report_file_name("chat_model_single_prompt", timestamp),
            "chat_model_single_prompt_output_2023-07-03T16-08-03.csv"
        );
    }

    #[test]
    fn test_finish_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let variant = PromptVariant::SingleScore;
        let mut writer = ReportWriter::new(dir.path(), &variant, Local::now());
        writer.push(sample_row("A1", Assessment::Single { score: "Yes".to_string() }));
        writer.push(sample_row("A2", Assessment::Single { score: "No".to_string() }));
        let path = writer.path().to_path_buf();

        let summary = writer.finish().unwrap();

        let records = read_back(&path);
        assert_eq!(records[0], variant.columns());
        assert_eq!(
            records[1],
            vec!["Math101", "What is 2+2?", "A1", "4, obviously", "1", "Yes", "10", "2", "12"]
        );
        assert_eq!(records[2][2], "A2");
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.usage.total_tokens, 24);
    }

    #[test]
    fn test_empty_report_has_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let writer = ReportWriter::at_path(path.clone(), &PromptVariant::LegacyCompletion);

        writer.finish().unwrap();

        let records = read_back(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last().map(String::as_str), Some("latency"));
    }

    #[test]
    fn test_drop_without_finish_flushes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.csv");
        {
            let mut writer = ReportWriter::at_path(path.clone(), &PromptVariant::SingleScore);
            writer.push(sample_row("A1", Assessment::Single { score: "Yes".to_string() }));
        }

        let records = read_back(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1][2], "A1");
    }

    #[test]
    fn test_creates_missing_output_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("reports").join("july");
        let writer = ReportWriter::new(&nested, &PromptVariant::Spanish, Local::now());
        let path = writer.path().to_path_buf();

        writer.finish().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_summary_counts_unscored_rows() {
        let rows = vec![
            sample_row(
                "A1",
                Assessment::Legacy {
                    score: LegacyScore::Scored(2),
                    completion: "Score: 2".to_string(),
                },
            ),
            sample_row(
                "A2",
                Assessment::Legacy {
                    score: LegacyScore::Unscored,
                    completion: "?".to_string(),
                },
            ),
        ];
        let summary = RunSummary::from_rows(&rows);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.unscored, 1);
        assert_eq!(summary.usage.prompt_tokens, 20);
    }
}
