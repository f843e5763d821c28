//! Runs a range of cells and waits for each one to reach a terminal state.

use crate::errors::{BackingStoreError, RangeError};
use crate::model::{CellRange, CellTerminalState};
use crate::notebook::{CellOutcome, NotebookDocument};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub range: CellRange,
    /// Terminal state per cell, in index order.
    pub states: Vec<(usize, CellTerminalState)>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Submits `range` for execution and resolves once every code cell in it has
/// completed, or when `budget` runs out.
///
/// Markdown cells are terminal up front. Only completions stamped with this
/// call's run are counted. On timeout the run is cancelled, so the cell in flight
/// stops; cells that did not report are `Cancelled` and cells that did keep their
/// state. The completion subscription is released before returning on every path.
pub async fn run_and_wait(
    document: &dyn NotebookDocument,
    range: CellRange,
    budget: Duration,
) -> Result<WaitOutcome> {
    let started = Instant::now();
    let deadline = started + budget;

    let mut states = BTreeMap::new();
    let mut pending = BTreeSet::new();
    for index in range.indices() {
        let Some(cell) = document.cell(index) else {
            return Err(RangeError::Shifted {
                stage: "execution request",
                start: range.start,
                end: range.end,
                count: document.cell_count(),
            }
            .into());
        };
        if cell.kind.is_code() {
            pending.insert(index);
        } else {
            states.insert(index, CellTerminalState::Succeeded);
        }
    }

    if pending.is_empty() {
        tracing::debug!(%range, "no code cells to execute");
        return Ok(WaitOutcome {
            range,
            states: states.into_iter().collect(),
            timed_out: false,
            elapsed: started.elapsed(),
        });
    }

    let mut subscription = document.subscribe();
    let ticket = document.request_execution(range).await?;
    let _cancel_on_exit = ticket.cancel_on_drop();
    tracing::debug!(%range, run = ticket.run, pending = pending.len(), "execution requested");

    let mut timed_out = false;
    while !pending.is_empty() {
        match timeout_at(deadline, subscription.recv()).await {
            Ok(Some(completion)) => {
                if completion.run != ticket.run || !pending.remove(&completion.index) {
                    continue;
                }
                let state = match completion.outcome {
                    CellOutcome::Succeeded => CellTerminalState::Succeeded,
                    CellOutcome::Failed => CellTerminalState::Failed,
                };
                tracing::debug!(
                    index = completion.index,
                    ?state,
                    remaining = pending.len(),
                    "cell completed"
                );
                states.insert(completion.index, state);
            }
            Ok(None) => {
                return Err(BackingStoreError::new(
                    "execute",
                    "execution engine stopped publishing completions",
                )
                .into());
            }
            Err(_) => {
                tracing::warn!(
                    %range,
                    run = ticket.run,
                    pending = pending.len(),
                    budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                    "execution wait timed out"
                );
                ticket.cancel();
                timed_out = true;
                break;
            }
        }
    }
    drop(subscription);

    for index in pending {
        states.insert(index, CellTerminalState::Cancelled);
    }

    Ok(WaitOutcome {
        range,
        states: states.into_iter().collect(),
        timed_out,
        elapsed: started.elapsed(),
    })
}
