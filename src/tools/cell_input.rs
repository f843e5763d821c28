use crate::errors::InvalidParamsError;
use crate::model::{CellKind, CellSpec};
use anyhow::Result;
use schemars::JsonSchema;
use serde::Deserialize;
use std::str::FromStr;

/// A cell as callers send it: either a bare string (a code cell) or an object.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellInput {
    Shorthand(String),
    Object(CellObjectInput),
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CellObjectInput {
    pub content: String,
    /// `code` or `markdown`.
    pub cell_type: String,
    #[serde(default)]
    pub language_id: Option<String>,
}

impl CellInput {
    pub fn code(content: impl Into<String>) -> Self {
        Self::Object(CellObjectInput {
            content: content.into(),
            cell_type: CellKind::Code.to_string(),
            language_id: None,
        })
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Self::Object(CellObjectInput {
            content: content.into(),
            cell_type: CellKind::Markdown.to_string(),
            language_id: None,
        })
    }
}

pub fn normalize_cells(
    tool: &'static str,
    cells: Vec<CellInput>,
    allow_empty: bool,
) -> Result<Vec<CellSpec>> {
    if cells.is_empty() && !allow_empty {
        return Err(InvalidParamsError::new(tool, "cells must contain at least one cell")
            .with_path("cells")
            .into());
    }

    let mut out = Vec::with_capacity(cells.len());
    for (i, cell) in cells.into_iter().enumerate() {
        match cell {
            CellInput::Shorthand(content) => out.push(CellSpec::code(content)),
            CellInput::Object(obj) => {
                let kind = CellKind::from_str(obj.cell_type.trim()).map_err(|_| {
                    InvalidParamsError::new(
                        tool,
                        format!(
                            "unknown cell_type '{}', expected one of `code`, `markdown`",
                            obj.cell_type
                        ),
                    )
                    .with_path(format!("cells[{i}].cell_type"))
                })?;

                let language = match (kind, obj.language_id) {
                    (CellKind::Code, Some(lang)) if !lang.trim().is_empty() => {
                        Some(lang.trim().to_string())
                    }
                    (CellKind::Markdown, Some(lang)) => {
                        tracing::debug!(
                            index = i,
                            language = %lang,
                            "ignoring language_id on markdown cell"
                        );
                        None
                    }
                    _ => None,
                };

                out.push(CellSpec {
                    kind,
                    content: obj.content,
                    language,
                });
            }
        }
    }
    Ok(out)
}

/// Converts a caller-supplied index to a position; negative values are invalid params.
pub fn to_index(tool: &'static str, field: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        anyhow::Error::new(
            InvalidParamsError::new(tool, format!("{field} must be >= 0, got {value}"))
                .with_path(field),
        )
    })
}
