//! nbformat v4 reading and writing.
//!
//! Only the parts of the format this server reads or edits are modeled; notebook
//! and cell metadata round-trip untouched.

use crate::kernel::KernelDescriptor;
use crate::model::{CellData, CellKind, CellSpec, OutputRecord};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const NBFORMAT: u32 = 4;
const NBFORMAT_MINOR: u32 = 5;

#[derive(Debug, Clone)]
pub struct NotebookFile {
    pub metadata: Map<String, Value>,
    pub nbformat_minor: u32,
    pub cells: Vec<StoredCell>,
}

/// A cell plus the persistence-only fields that never leave the document layer.
#[derive(Debug, Clone)]
pub struct StoredCell {
    pub id: String,
    pub raw: bool,
    pub metadata: Map<String, Value>,
    pub data: CellData,
}

impl StoredCell {
    pub fn from_spec(spec: CellSpec) -> Self {
        let language = match spec.kind {
            CellKind::Code => spec.language,
            CellKind::Markdown => None,
        };
        Self {
            id: new_cell_id(),
            raw: false,
            metadata: Map::new(),
            data: CellData {
                kind: spec.kind,
                content: spec.content,
                language,
                outputs: Vec::new(),
                execution_count: None,
            },
        }
    }
}

impl NotebookFile {
    pub fn empty(kernel: &KernelDescriptor) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            "kernelspec".to_string(),
            serde_json::json!({
                "name": kernel.name,
                "language": kernel.language,
                "display_name": kernel.display_name.clone().unwrap_or_else(|| kernel.name.clone()),
            }),
        );
        metadata.insert(
            "language_info".to_string(),
            serde_json::json!({ "name": kernel.language }),
        );
        Self {
            metadata,
            nbformat_minor: NBFORMAT_MINOR,
            cells: Vec::new(),
        }
    }

    /// Kernel named by the file's `kernelspec` (falling back to `language_info`).
    pub fn kernel_descriptor(&self) -> Option<KernelDescriptor> {
        let spec = self.metadata.get("kernelspec").and_then(Value::as_object);
        let language = spec
            .and_then(|s| s.get("language"))
            .and_then(Value::as_str)
            .or_else(|| {
                self.metadata
                    .get("language_info")
                    .and_then(|info| info.get("name"))
                    .and_then(Value::as_str)
            })?;
        let name = spec
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(language);
        Some(KernelDescriptor {
            name: name.to_string(),
            language: language.to_string(),
            display_name: spec
                .and_then(|s| s.get("display_name"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

pub fn parse(contents: &str) -> Result<NotebookFile> {
    let raw: RawNotebook = serde_json::from_str(contents).context("invalid notebook JSON")?;
    if raw.nbformat != NBFORMAT {
        bail!(
            "unsupported nbformat {} (only version {} is supported)",
            raw.nbformat,
            NBFORMAT
        );
    }

    let cells = raw
        .cells
        .into_iter()
        .map(stored_from_raw)
        .collect::<Result<Vec<_>>>()?;

    Ok(NotebookFile {
        metadata: raw.metadata,
        nbformat_minor: raw.nbformat_minor,
        cells,
    })
}

pub fn to_json(file: &NotebookFile) -> Result<String> {
    let raw = RawNotebook {
        metadata: file.metadata.clone(),
        nbformat: NBFORMAT,
        nbformat_minor: file.nbformat_minor.max(NBFORMAT_MINOR),
        cells: file.cells.iter().map(raw_from_stored).collect(),
    };
    let mut out = serde_json::to_string_pretty(&raw)?;
    out.push('\n');
    Ok(out)
}

pub fn new_cell_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct RawNotebook {
    #[serde(default)]
    metadata: Map<String, Value>,
    nbformat: u32,
    #[serde(default)]
    nbformat_minor: u32,
    #[serde(default)]
    cells: Vec<RawCell>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawCell {
    cell_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    source: MultilineText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_count: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outputs: Option<Vec<RawOutput>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MultilineText {
    Single(String),
    Lines(Vec<String>),
}

impl MultilineText {
    fn into_string(self) -> String {
        match self {
            Self::Single(s) => s,
            Self::Lines(lines) => lines.concat(),
        }
    }

    fn from_text(text: &str) -> Self {
        Self::Lines(text.split_inclusive('\n').map(str::to_string).collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
enum RawOutput {
    Stream {
        name: String,
        text: MultilineText,
    },
    DisplayData {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default)]
        execution_count: Option<i64>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

fn stored_from_raw(raw: RawCell) -> Result<StoredCell> {
    let (kind, is_raw) = match raw.cell_type.as_str() {
        "code" => (CellKind::Code, false),
        "markdown" => (CellKind::Markdown, false),
        "raw" => (CellKind::Markdown, true),
        other => bail!("unknown cell_type '{other}'"),
    };

    let language = raw
        .metadata
        .get("language")
        .or_else(|| {
            raw.metadata
                .get("vscode")
                .and_then(|v| v.get("languageId"))
        })
        .and_then(Value::as_str)
        .map(str::to_string);

    let outputs = raw
        .outputs
        .unwrap_or_default()
        .into_iter()
        .map(output_from_raw)
        .collect();

    Ok(StoredCell {
        id: raw.id.unwrap_or_else(new_cell_id),
        raw: is_raw,
        metadata: raw.metadata,
        data: CellData {
            kind,
            content: raw.source.into_string(),
            language: if kind.is_code() { language } else { None },
            outputs,
            execution_count: raw.execution_count.as_ref().and_then(Value::as_i64),
        },
    })
}

fn output_from_raw(raw: RawOutput) -> OutputRecord {
    match raw {
        RawOutput::Stream { name, text } => OutputRecord::Stream {
            name,
            text: text.into_string(),
        },
        RawOutput::DisplayData { data, .. } => OutputRecord::Rich {
            data: join_mime_bundle(data),
            execution_count: None,
        },
        RawOutput::ExecuteResult {
            data,
            execution_count,
            ..
        } => OutputRecord::Rich {
            data: join_mime_bundle(data),
            execution_count,
        },
        RawOutput::Error {
            ename,
            evalue,
            traceback,
        } => OutputRecord::Error {
            name: ename,
            message: evalue,
            traceback,
        },
    }
}

/// nbformat splits text mime values into line arrays; join them back.
fn join_mime_bundle(data: Map<String, Value>) -> BTreeMap<String, Value> {
    data.into_iter()
        .map(|(mime, value)| {
            let value = match value {
                Value::Array(items) if items.iter().all(Value::is_string) => Value::String(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .concat(),
                ),
                other => other,
            };
            (mime, value)
        })
        .collect()
}

fn raw_from_stored(cell: &StoredCell) -> RawCell {
    let cell_type = match (cell.raw, cell.data.kind) {
        (true, _) => "raw",
        (false, CellKind::Code) => "code",
        (false, CellKind::Markdown) => "markdown",
    };

    let mut metadata = cell.metadata.clone();
    if let Some(language) = &cell.data.language {
        metadata.insert("language".to_string(), Value::String(language.clone()));
    }

    let (execution_count, outputs) = if cell.data.kind.is_code() && !cell.raw {
        (
            Some(
                cell.data
                    .execution_count
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            ),
            Some(cell.data.outputs.iter().map(raw_from_output).collect()),
        )
    } else {
        (None, None)
    };

    RawCell {
        cell_type: cell_type.to_string(),
        id: Some(cell.id.clone()),
        metadata,
        source: MultilineText::from_text(&cell.data.content),
        execution_count,
        outputs,
    }
}

fn raw_from_output(output: &OutputRecord) -> RawOutput {
    match output {
        OutputRecord::Stream { name, text } => RawOutput::Stream {
            name: name.clone(),
            text: MultilineText::from_text(text),
        },
        OutputRecord::Error {
            name,
            message,
            traceback,
        } => RawOutput::Error {
            ename: name.clone(),
            evalue: message.clone(),
            traceback: traceback.clone(),
        },
        OutputRecord::Rich {
            data,
            execution_count,
        } => {
            let data: Map<String, Value> =
                data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            match execution_count {
                Some(count) => RawOutput::ExecuteResult {
                    data,
                    metadata: Map::new(),
                    execution_count: Some(*count),
                },
                None => RawOutput::DisplayData {
                    data,
                    metadata: Map::new(),
                },
            }
        }
    }
}
