//! The orchestrator: validate, mutate, execute, wait, normalize, respond.
//!
//! Every operation re-reads the live cell count before validating and again
//! after each await, so edits made by other actors between calls (or during
//! an execution) are detected rather than silently misaddressed.

use crate::config::ExecutionConfig;
use crate::errors::RangeError;
use crate::model::{
    CellExecution, CellKind, CellRange, CellSpec, CellTerminalState, CellView,
    DeleteCellsResponse, ExecuteCellsResponse, ExecutionReport, ExecutionStatus,
    InsertCellsResponse, ModifyCellResponse, NotebookCellsResponse, NotebookInfoResponse,
    ReplaceCellsResponse, SaveNotebookResponse,
};
use crate::notebook::NotebookDocument;
use crate::tools::mutation::{self, MutationOutcome};
use crate::tools::normalize::normalize_outputs;
use crate::tools::range::{ensure_still_fits, validate_range};
use crate::tools::waiter::{self, WaitOutcome};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct NotebookService {
    document: Arc<dyn NotebookDocument>,
}

impl NotebookService {
    pub fn new(document: Arc<dyn NotebookDocument>) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Arc<dyn NotebookDocument> {
        &self.document
    }

    pub fn info(&self) -> NotebookInfoResponse {
        let descriptor = self.document.descriptor();
        NotebookInfoResponse {
            uri: descriptor.uri,
            notebook_type: descriptor.notebook_type,
            kernel: descriptor.kernel,
            cell_count: self.document.cell_count(),
            dirty: self.document.is_dirty(),
        }
    }

    pub fn cells(&self, config: &ExecutionConfig) -> NotebookCellsResponse {
        let kernel_language = self.document.descriptor().kernel.language;
        let count = self.document.cell_count();
        let cells: Vec<CellView> = (0..count)
            .map_while(|index| {
                self.document.cell(index).map(|cell| CellView {
                    index,
                    cell_type: cell.kind,
                    language: match cell.kind {
                        CellKind::Code => {
                            Some(cell.language.unwrap_or_else(|| kernel_language.clone()))
                        }
                        CellKind::Markdown => None,
                    },
                    outputs: normalize_outputs(&cell.outputs, config.max_output_size),
                    content: cell.content,
                    execution_count: cell.execution_count,
                })
            })
            .collect();

        NotebookCellsResponse {
            cell_count: cells.len(),
            cells,
        }
    }

    pub async fn insert(
        &self,
        cells: Vec<CellSpec>,
        position: Option<usize>,
        noexec: bool,
        config: &ExecutionConfig,
    ) -> Result<InsertCellsResponse> {
        let has_code = cells.iter().any(|c| c.kind.is_code());
        let mutation = mutation::insert_cells(self.document.as_ref(), cells, position).await?;

        let execution = if !noexec && has_code {
            Some(
                self.execute_after_mutation(&mutation, config)
                    .await
                    .with_context(|| {
                        format!(
                            "cells were inserted at {} but could not be executed",
                            mutation.range
                        )
                    })?,
            )
        } else {
            None
        };

        Ok(InsertCellsResponse {
            inserted: mutation.range,
            cell_count: self.document.cell_count(),
            execution,
        })
    }

    pub async fn replace(
        &self,
        range: CellRange,
        cells: Vec<CellSpec>,
        noexec: bool,
        config: &ExecutionConfig,
    ) -> Result<ReplaceCellsResponse> {
        let has_code = cells.iter().any(|c| c.kind.is_code());
        let mutation = mutation::replace_cells(self.document.as_ref(), range, cells).await?;

        let execution = if !noexec && has_code {
            Some(
                self.execute_after_mutation(&mutation, config)
                    .await
                    .with_context(|| {
                        format!(
                            "cells {range} were replaced by {} but could not be executed",
                            mutation.range
                        )
                    })?,
            )
        } else {
            None
        };

        Ok(ReplaceCellsResponse {
            replaced: range,
            inserted: mutation.range,
            cell_count: self.document.cell_count(),
            execution,
        })
    }

    pub async fn modify(
        &self,
        index: usize,
        content: String,
        noexec: bool,
        config: &ExecutionConfig,
    ) -> Result<ModifyCellResponse> {
        let mutation = mutation::modify_cell(self.document.as_ref(), index, content).await?;
        let cell_type = self
            .document
            .cell(index)
            .map(|cell| cell.kind)
            .ok_or(RangeError::Shifted {
                stage: "modify",
                start: index,
                end: index + 1,
                count: self.document.cell_count(),
            })?;

        let execution = if !noexec && cell_type.is_code() {
            Some(
                self.execute_after_mutation(&mutation, config)
                    .await
                    .with_context(|| {
                        format!("cell {index} was modified but could not be executed")
                    })?,
            )
        } else {
            None
        };

        Ok(ModifyCellResponse {
            cell_index: index,
            cell_type,
            outputs_cleared: mutation.outputs_cleared,
            execution,
        })
    }

    pub async fn execute(
        &self,
        range: CellRange,
        config: &ExecutionConfig,
    ) -> Result<ExecuteCellsResponse> {
        let range = validate_range(range, self.document.cell_count())?;
        let execution = self.execute_range(range, config).await?;
        Ok(ExecuteCellsResponse {
            cell_count: self.document.cell_count(),
            execution,
        })
    }

    pub async fn delete(&self, range: CellRange) -> Result<DeleteCellsResponse> {
        let mutation = mutation::delete_cells(self.document.as_ref(), range).await?;
        Ok(DeleteCellsResponse {
            deleted: range,
            cell_count: mutation.cell_count,
        })
    }

    pub async fn save(&self) -> Result<SaveNotebookResponse> {
        let path = self.document.save().await?;
        Ok(SaveNotebookResponse {
            saved_to: path.display().to_string(),
            saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            cell_count: self.document.cell_count(),
        })
    }

    async fn execute_after_mutation(
        &self,
        mutation: &MutationOutcome,
        config: &ExecutionConfig,
    ) -> Result<ExecutionReport> {
        ensure_still_fits(mutation.range, self.document.cell_count(), "mutation")?;
        self.execute_range(mutation.range, config).await
    }

    async fn execute_range(
        &self,
        range: CellRange,
        config: &ExecutionConfig,
    ) -> Result<ExecutionReport> {
        let wait = waiter::run_and_wait(self.document.as_ref(), range, config.timeout).await?;
        ensure_still_fits(range, self.document.cell_count(), "execution")?;
        self.report(wait, config)
    }

    fn report(&self, wait: WaitOutcome, config: &ExecutionConfig) -> Result<ExecutionReport> {
        let mut cells = Vec::with_capacity(wait.states.len());
        for (index, state) in wait.states {
            let cell = self.document.cell(index).ok_or(RangeError::Shifted {
                stage: "execution",
                start: wait.range.start,
                end: wait.range.end,
                count: self.document.cell_count(),
            })?;
            let outputs = match state {
                CellTerminalState::Cancelled => Vec::new(),
                _ => normalize_outputs(&cell.outputs, config.max_output_size),
            };
            cells.push(CellExecution {
                index,
                cell_type: cell.kind,
                state,
                outputs,
            });
        }

        let status = if wait.timed_out {
            ExecutionStatus::TimedOut
        } else {
            ExecutionStatus::Completed
        };
        let mut report = ExecutionReport {
            status,
            range: wait.range,
            summary: String::new(),
            cells,
        };
        report.summary = summarize(&report, config);
        tracing::info!(
            range = %report.range,
            elapsed_ms = u64::try_from(wait.elapsed.as_millis()).unwrap_or(u64::MAX),
            summary = %report.summary,
            "execution finished"
        );
        Ok(report)
    }
}

fn summarize(report: &ExecutionReport, config: &ExecutionConfig) -> String {
    let mut summary = format!(
        "{} succeeded, {} failed, {} cancelled",
        report.count(CellTerminalState::Succeeded),
        report.count(CellTerminalState::Failed),
        report.count(CellTerminalState::Cancelled),
    );
    if report.timed_out() {
        summary.push_str(&format!(
            " (timed out after {}s; completed cells are reported, the rest were not awaited)",
            config.timeout_seconds()
        ));
    }
    summary
}
