use crate::kernel::KernelDescriptor;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{Display, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CellKind {
    Code,
    Markdown,
}

impl CellKind {
    pub fn is_code(self) -> bool {
        matches!(self, Self::Code)
    }
}

/// A new cell to be placed into the notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSpec {
    pub kind: CellKind,
    pub content: String,
    pub language: Option<String>,
}

impl CellSpec {
    pub fn code(content: impl Into<String>) -> Self {
        Self {
            kind: CellKind::Code,
            content: content.into(),
            language: None,
        }
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Self {
            kind: CellKind::Markdown,
            content: content.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// One captured result of executing a code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputRecord {
    Stream {
        name: String,
        text: String,
    },
    Error {
        name: String,
        message: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    Rich {
        data: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        execution_count: Option<i64>,
    },
}

impl OutputRecord {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stream {
            name: "stdout".to_string(),
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Stream {
            name: "stderr".to_string(),
            text: text.into(),
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            name: name.into(),
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        let mut data = BTreeMap::new();
        data.insert(
            "text/plain".to_string(),
            serde_json::Value::String(text.into()),
        );
        Self::Rich {
            data,
            execution_count: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Snapshot of one cell as read from the document layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CellData {
    pub kind: CellKind,
    pub content: String,
    pub language: Option<String>,
    pub outputs: Vec<OutputRecord>,
    pub execution_count: Option<i64>,
}

impl CellData {
    pub fn has_error(&self) -> bool {
        self.outputs.iter().any(OutputRecord::is_error)
    }
}

/// Half-open interval `[start, end)` over cell positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CellRange {
    pub start: usize,
    pub end: usize,
}

impl CellRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(index: usize) -> Self {
        Self {
            start: index,
            end: index + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct NotebookInfoResponse {
    pub uri: String,
    pub notebook_type: String,
    pub kernel: KernelDescriptor,
    pub cell_count: usize,
    pub dirty: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CellView {
    pub index: usize,
    pub cell_type: CellKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i64>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct NotebookCellsResponse {
    pub cell_count: usize,
    pub cells: Vec<CellView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CellTerminalState {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct CellExecution {
    pub index: usize,
    pub cell_type: CellKind,
    pub state: CellTerminalState,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    pub range: CellRange,
    /// Human readable summary, e.g. "2 succeeded, 1 cancelled (timed out after 30s)".
    pub summary: String,
    pub cells: Vec<CellExecution>,
}

impl ExecutionReport {
    pub fn timed_out(&self) -> bool {
        self.status == ExecutionStatus::TimedOut
    }

    pub fn count(&self, state: CellTerminalState) -> usize {
        self.cells.iter().filter(|c| c.state == state).count()
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct InsertCellsResponse {
    pub inserted: CellRange,
    pub cell_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReplaceCellsResponse {
    pub replaced: CellRange,
    pub inserted: CellRange,
    pub cell_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ModifyCellResponse {
    pub cell_index: usize,
    pub cell_type: CellKind,
    pub outputs_cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ExecuteCellsResponse {
    pub cell_count: usize,
    pub execution: ExecutionReport,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DeleteCellsResponse {
    pub deleted: CellRange,
    pub cell_count: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SaveNotebookResponse {
    pub saved_to: String,
    pub saved_at: String,
    pub cell_count: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct OpenNotebookResponse {
    pub uri: String,
    pub notebook_type: String,
    pub kernel: KernelDescriptor,
    pub cell_count: usize,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct NotebookEntry {
    pub path: String,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub open: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct NotebookListResponse {
    pub notebooks: Vec<NotebookEntry>,
}

/// Trait used by the server to decide whether a tool response is flagged as an error.
pub trait ToolOutcome {
    fn is_error(&self) -> bool {
        false
    }
}

fn execution_failed(execution: Option<&ExecutionReport>) -> bool {
    execution.is_some_and(ExecutionReport::timed_out)
}

impl ToolOutcome for NotebookInfoResponse {}
impl ToolOutcome for NotebookCellsResponse {}
impl ToolOutcome for DeleteCellsResponse {}
impl ToolOutcome for SaveNotebookResponse {}
impl ToolOutcome for OpenNotebookResponse {}
impl ToolOutcome for NotebookListResponse {}

impl ToolOutcome for InsertCellsResponse {
    fn is_error(&self) -> bool {
        execution_failed(self.execution.as_ref())
    }
}

impl ToolOutcome for ReplaceCellsResponse {
    fn is_error(&self) -> bool {
        execution_failed(self.execution.as_ref())
    }
}

impl ToolOutcome for ModifyCellResponse {
    fn is_error(&self) -> bool {
        execution_failed(self.execution.as_ref())
    }
}

impl ToolOutcome for ExecuteCellsResponse {
    fn is_error(&self) -> bool {
        self.execution.timed_out()
    }
}
