use crate::client::CompletionClient;
use crate::error::CompletionFailure;
use crate::evaluation::Evaluator;
use crate::models::InputRow;
use crate::output::{ReportWriter, RunSummary};
use anyhow::Result;
use tracing::{error, info};

/// Drives the evaluator over every input row, strictly one row at a time
pub struct Runner<C> {
    evaluator: Evaluator<C>,
}

impl<C: CompletionClient> Runner<C> {
    /// Create a new runner around a configured evaluator
    pub fn new(evaluator: Evaluator<C>) -> Self {
        Self { evaluator }
    }

    /// Grade all rows into `report`, stopping at the first failed row.
    ///
    /// Rows graded before the failure stay in `report`; the failed row and
    /// everything after it are not recorded.
    pub async fn process_all_rows(
        &self,
        rows: &[InputRow],
        report: &mut ReportWriter,
    ) -> Result<(), CompletionFailure> {
        let total_rows = rows.len();

        for (row_index, row) in rows.iter().enumerate() {
            info!("--- processing prompt {}/{} ---", row_index + 1, total_rows);

            let graded = self
                .evaluator
                .evaluate_row(row)
                .await
                .map_err(|source| CompletionFailure {
                    row: row_index,
                    source,
                })?;

            info!(
                answer_id = %graded.answer_id,
                latency = graded.latency_secs,
                "--- finished processing prompt ---"
            );
            report.push(graded);
        }

        info!("100% complete");
        Ok(())
    }

    /// Grade all rows and write the report exactly once, whatever the outcome
    pub async fn run(&self, rows: &[InputRow], mut report: ReportWriter) -> Result<RunSummary> {
        info!(
            kind = self.evaluator.variant().kind(),
            rows = rows.len(),
            "starting run, report will be written to {}",
            report.path().display()
        );

        let outcome = self.process_all_rows(rows, &mut report).await;
        if let Err(failure) = &outcome {
            error!(
                row = failure.row,
                code = failure.source.code(),
                "{}; flushing {} graded rows",
                failure,
                report.rows().len()
            );
        }

        let written = report.finish();
        if let Err(failure) = outcome {
            // a write error is logged; the row failure is returned
            if let Err(e) = &written {
                error!("could not write report: {:#}", e);
            }
            return Err(failure.into());
        }
        let summary = written?;

        info!("DONE!");
        Ok(summary)
    }
}
