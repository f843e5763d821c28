use super::events::{CellCompletion, CellOutcome, CompletionHub, Subscription};
use super::ipynb::{self, NotebookFile, StoredCell};
use super::{
    EditOutcome, ExecutionTicket, NOTEBOOK_TYPE, NotebookDescriptor, NotebookDocument,
    NotebookEdit,
};
use crate::errors::BackingStoreError;
use crate::kernel::{KernelBackend, KernelDescriptor};
use crate::model::{CellData, CellRange, OutputRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio_util::sync::CancellationToken;

/// An in-memory notebook backed by an `.ipynb` file.
///
/// Edits apply under a write lock. Each execution request becomes a run on a
/// spawned task that takes the run lock, executes its cells one at a time and
/// publishes a [`CellCompletion`] per code cell. Cancelling the run drops the
/// kernel future of the cell in flight.
pub struct LiveNotebook {
    path: PathBuf,
    kernel: KernelDescriptor,
    shared: Arc<Shared>,
}

struct Shared {
    file: RwLock<NotebookFile>,
    backend: Arc<dyn KernelBackend>,
    hub: CompletionHub,
    dirty: AtomicBool,
    execution_counter: AtomicI64,
    run_lock: tokio::sync::Mutex<()>,
}

impl LiveNotebook {
    pub fn new(path: PathBuf, file: NotebookFile, backend: Arc<dyn KernelBackend>) -> Self {
        let kernel = file
            .kernel_descriptor()
            .unwrap_or_else(|| backend.descriptor());
        let last_count = file
            .cells
            .iter()
            .filter_map(|cell| cell.data.execution_count)
            .max()
            .unwrap_or(0);

        Self {
            path,
            kernel,
            shared: Arc::new(Shared {
                file: RwLock::new(file),
                backend,
                hub: CompletionHub::new(),
                dirty: AtomicBool::new(false),
                execution_counter: AtomicI64::new(last_count),
                run_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// A fresh notebook at `path`; nothing touches disk until `save`.
    pub fn create(path: PathBuf, backend: Arc<dyn KernelBackend>) -> Self {
        let file = NotebookFile::empty(&backend.descriptor());
        let notebook = Self::new(path, file, backend);
        notebook.shared.dirty.store(true, Ordering::SeqCst);
        notebook
    }

    pub async fn load(path: &Path, backend: Arc<dyn KernelBackend>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read notebook {:?}", path))?;
        let file = ipynb::parse(&contents)
            .with_context(|| format!("failed to parse notebook {:?}", path))?;
        Ok(Self::new(path.to_path_buf(), file, backend))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hub(&self) -> &CompletionHub {
        &self.shared.hub
    }
}

#[async_trait]
impl NotebookDocument for LiveNotebook {
    fn descriptor(&self) -> NotebookDescriptor {
        NotebookDescriptor {
            uri: path_to_uri(&self.path),
            path: self.path.clone(),
            notebook_type: NOTEBOOK_TYPE.to_string(),
            kernel: self.kernel.clone(),
        }
    }

    fn cell_count(&self) -> usize {
        self.shared.file.read().cells.len()
    }

    fn cell(&self, index: usize) -> Option<CellData> {
        self.shared
            .file
            .read()
            .cells
            .get(index)
            .map(|cell| cell.data.clone())
    }

    fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::SeqCst)
    }

    async fn apply_edit(&self, edit: NotebookEdit) -> Result<EditOutcome> {
        let outcome = {
            let mut file = self.shared.file.write();
            let count = file.cells.len();
            match edit {
                NotebookEdit::Splice {
                    start,
                    delete_count,
                    cells,
                } => {
                    let end = start.checked_add(delete_count).unwrap_or(usize::MAX);
                    if start > count || end > count {
                        return Err(BackingStoreError::new(
                            "apply_edit",
                            format!("splice [{start}, {end}) does not fit {count} cells"),
                        )
                        .into());
                    }
                    let inserted = cells.into_iter().map(StoredCell::from_spec);
                    file.cells.splice(start..end, inserted);
                    EditOutcome {
                        cell_count: file.cells.len(),
                        outputs_cleared: false,
                    }
                }
                NotebookEdit::SetContent { index, content } => {
                    let Some(cell) = file.cells.get_mut(index) else {
                        return Err(BackingStoreError::new(
                            "apply_edit",
                            format!("cell {index} does not exist ({count} cells)"),
                        )
                        .into());
                    };
                    cell.data.content = content;
                    let mut outputs_cleared = false;
                    if cell.data.kind.is_code() {
                        outputs_cleared =
                            !cell.data.outputs.is_empty() || cell.data.execution_count.is_some();
                        cell.data.outputs.clear();
                        cell.data.execution_count = None;
                    }
                    EditOutcome {
                        cell_count: count,
                        outputs_cleared,
                    }
                }
            }
        };
        self.shared.dirty.store(true, Ordering::SeqCst);
        Ok(outcome)
    }

    fn subscribe(&self) -> Subscription {
        self.shared.hub.subscribe()
    }

    async fn request_execution(&self, range: CellRange) -> Result<ExecutionTicket> {
        let indices: Vec<usize> = {
            let file = self.shared.file.read();
            if range.is_empty() || range.end > file.cells.len() {
                return Err(BackingStoreError::new(
                    "request_execution",
                    format!("range {range} does not fit {} cells", file.cells.len()),
                )
                .into());
            }
            range
                .indices()
                .filter(|&i| file.cells[i].data.kind.is_code())
                .collect()
        };

        let run = self.shared.hub.next_run();
        let ticket = ExecutionTicket::new(run, CancellationToken::new());
        if indices.is_empty() {
            return Ok(ticket);
        }

        let shared = self.shared.clone();
        let cancel = ticket.token().clone();
        tokio::spawn(async move {
            let _running = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(run, "run cancelled before it started");
                    return;
                }
                guard = shared.run_lock.lock() => guard,
            };
            for index in indices {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(run, index, "run cancelled");
                        return;
                    }
                    _ = shared.run_cell(run, index, &cancel) => {}
                }
            }
        });
        Ok(ticket)
    }

    async fn save(&self) -> Result<PathBuf> {
        let json = {
            let file = self.shared.file.read();
            ipynb::to_json(&file)?
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, json.as_bytes()))
            .await?
            .map_err(|e| BackingStoreError::new("save", format!("{:?}: {e:#}", self.path)))?;

        self.shared.dirty.store(false, Ordering::SeqCst);
        tracing::info!(path = %self.path.display(), "notebook saved");
        Ok(self.path.clone())
    }
}

impl Shared {
    async fn run_cell(&self, run: u64, index: usize, cancel: &CancellationToken) {
        let code = {
            let mut file = self.file.write();
            match file.cells.get_mut(index) {
                Some(cell) if cell.data.kind.is_code() => {
                    cell.data.outputs.clear();
                    cell.data.execution_count = None;
                    Some(cell.data.content.clone())
                }
                _ => None,
            }
        };

        let Some(code) = code else {
            tracing::warn!(index, "cell moved or changed kind before it ran");
            self.hub
                .publish(CellCompletion::new(run, index, CellOutcome::Failed));
            return;
        };

        tracing::debug!(run, index, backend = self.backend.name(), "executing cell");
        let (outputs, outcome) = match self.backend.execute(&code).await {
            Ok(kernel_run) => {
                let outcome = if kernel_run.failed() {
                    CellOutcome::Failed
                } else {
                    CellOutcome::Succeeded
                };
                tracing::debug!(
                    run,
                    index,
                    duration_ms = kernel_run.duration_ms,
                    ?outcome,
                    "cell finished"
                );
                (kernel_run.outputs, outcome)
            }
            Err(error) => {
                tracing::warn!(index, "kernel failed: {error:#}");
                (
                    vec![OutputRecord::error("KernelError", format!("{error:#}"))],
                    CellOutcome::Failed,
                )
            }
        };

        {
            let mut file = self.file.write();
            if cancel.is_cancelled() {
                return;
            }
            let count = self.execution_counter.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(cell) = file.cells.get_mut(index)
                && cell.data.kind.is_code()
            {
                cell.data.outputs = outputs;
                cell.data.execution_count = Some(count);
            }
        }
        self.dirty.store(true, Ordering::SeqCst);
        self.hub.publish(CellCompletion::new(run, index, outcome));
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

fn path_to_uri(path: &Path) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}
