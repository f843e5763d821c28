//! Turns edit requests into single document edits.
//!
//! Each function reads the live cell count right before validating, so a count
//! captured when the request was built is never trusted.

use super::range::{validate_index, validate_position, validate_range};
use crate::model::{CellRange, CellSpec};
use crate::notebook::{NotebookDocument, NotebookEdit};
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Positions now occupied by the new or modified cells.
    pub range: CellRange,
    pub cell_count: usize,
    pub outputs_cleared: bool,
}

pub async fn insert_cells(
    document: &dyn NotebookDocument,
    cells: Vec<CellSpec>,
    position: Option<usize>,
) -> Result<MutationOutcome> {
    let position = validate_position(position, document.cell_count())?;
    let inserted = cells.len();
    let outcome = document
        .apply_edit(NotebookEdit::Splice {
            start: position,
            delete_count: 0,
            cells,
        })
        .await?;
    tracing::debug!(position, inserted, cell_count = outcome.cell_count, "cells inserted");
    Ok(MutationOutcome {
        range: CellRange::new(position, position + inserted),
        cell_count: outcome.cell_count,
        outputs_cleared: false,
    })
}

pub async fn replace_cells(
    document: &dyn NotebookDocument,
    range: CellRange,
    cells: Vec<CellSpec>,
) -> Result<MutationOutcome> {
    let range = validate_range(range, document.cell_count())?;
    let inserted = cells.len();
    let outcome = document
        .apply_edit(NotebookEdit::Splice {
            start: range.start,
            delete_count: range.len(),
            cells,
        })
        .await?;
    tracing::debug!(%range, inserted, cell_count = outcome.cell_count, "cells replaced");
    Ok(MutationOutcome {
        range: CellRange::new(range.start, range.start + inserted),
        cell_count: outcome.cell_count,
        outputs_cleared: false,
    })
}

pub async fn modify_cell(
    document: &dyn NotebookDocument,
    index: usize,
    content: String,
) -> Result<MutationOutcome> {
    let index = validate_index(index, document.cell_count())?;
    let outcome = document
        .apply_edit(NotebookEdit::SetContent { index, content })
        .await?;
    Ok(MutationOutcome {
        range: CellRange::single(index),
        cell_count: outcome.cell_count,
        outputs_cleared: outcome.outputs_cleared,
    })
}

pub async fn delete_cells(
    document: &dyn NotebookDocument,
    range: CellRange,
) -> Result<MutationOutcome> {
    let range = validate_range(range, document.cell_count())?;
    let outcome = document
        .apply_edit(NotebookEdit::Splice {
            start: range.start,
            delete_count: range.len(),
            cells: Vec::new(),
        })
        .await?;
    tracing::debug!(%range, cell_count = outcome.cell_count, "cells deleted");
    Ok(MutationOutcome {
        range: CellRange::new(range.start, range.start),
        cell_count: outcome.cell_count,
        outputs_cleared: false,
    })
}
