//! The document layer: an ordered list of cells addressed by position.
//!
//! The orchestrator only talks to [`NotebookDocument`]; it never keeps cell state
//! between calls.

use crate::kernel::KernelDescriptor;
use crate::model::{CellData, CellRange, CellSpec};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::{CancellationToken, DropGuard};

pub mod events;
pub mod ipynb;
pub mod live;
pub mod repository;

pub use events::{CellCompletion, CellOutcome, CompletionHub, Subscription};
pub use live::LiveNotebook;
pub use repository::{NotebookFilter, NotebookRepository, OpenedNotebook, PathNotebookRepository};

pub const NOTEBOOK_TYPE: &str = "jupyter-notebook";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookDescriptor {
    pub uri: String,
    pub path: PathBuf,
    pub notebook_type: String,
    pub kernel: KernelDescriptor,
}

/// One atomic change to the cell list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotebookEdit {
    /// Remove `delete_count` cells at `start`, then insert `cells` there.
    Splice {
        start: usize,
        delete_count: usize,
        cells: Vec<CellSpec>,
    },
    /// Replace one cell's source; code cell outputs are cleared.
    SetContent { index: usize, content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOutcome {
    pub cell_count: usize,
    pub outputs_cleared: bool,
}

/// One submitted execution. Its completions carry `run`; cancelling it stops the
/// cell in flight and skips the rest of the range.
#[derive(Debug, Clone)]
pub struct ExecutionTicket {
    pub run: u64,
    cancel: CancellationToken,
}

impl ExecutionTicket {
    pub fn new(run: u64, cancel: CancellationToken) -> Self {
        Self { run, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the run when the guard is dropped.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[async_trait]
pub trait NotebookDocument: Send + Sync {
    fn descriptor(&self) -> NotebookDescriptor;

    fn cell_count(&self) -> usize;

    fn cell(&self, index: usize) -> Option<CellData>;

    fn is_dirty(&self) -> bool;

    /// Applies the edit as a single transaction; no reader observes a partial splice.
    async fn apply_edit(&self, edit: NotebookEdit) -> Result<EditOutcome>;

    /// Completion signals published after this call are delivered to the subscription.
    fn subscribe(&self) -> Subscription;

    /// Queues the code cells of `range` in index order and returns without waiting.
    ///
    /// One [`CellCompletion`] stamped with the ticket's run is published per code
    /// cell; markdown cells publish nothing. A cancelled run publishes nothing further.
    async fn request_execution(&self, range: CellRange) -> Result<ExecutionTicket>;

    async fn save(&self) -> Result<PathBuf>;
}
