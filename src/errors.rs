use thiserror::Error;

/// A request field is missing, malformed, or out of its declared domain.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvalidParamsError {
    tool: &'static str,
    message: String,
    path: Option<String>,
}

impl InvalidParamsError {
    pub fn new(tool: &'static str, message: impl Into<String>) -> Self {
        Self {
            tool,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn tool(&self) -> &'static str {
        self.tool
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// An index or range does not fit the notebook's live cell count.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("cell index {index} is out of bounds (notebook has {count} cells)")]
    Index { index: usize, count: usize },
    #[error("insert position {position} is out of bounds (valid: 0..={count})")]
    Position { position: usize, count: usize },
    #[error("range [{start}, {end}) is empty; end_index must be greater than start_index")]
    Empty { start: usize, end: usize },
    #[error("range [{start}, {end}) is out of bounds (notebook has {count} cells)")]
    OutOfBounds {
        start: usize,
        end: usize,
        count: usize,
    },
    #[error(
        "notebook changed during {stage}: range [{start}, {end}) no longer fits {count} cells"
    )]
    Shifted {
        stage: &'static str,
        start: usize,
        end: usize,
        count: usize,
    },
}

/// The document layer refused a mutation, open, or save.
#[derive(Debug, Error)]
#[error("{operation} failed: {message}")]
pub struct BackingStoreError {
    operation: &'static str,
    message: String,
}

impl BackingStoreError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

#[derive(Debug, Error)]
#[error("no notebook is open; call open_notebook first")]
pub struct NoActiveNotebookError;
