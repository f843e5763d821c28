pub mod cell_input;
pub mod mutation;
pub mod normalize;
pub mod range;
pub mod waiter;

use crate::errors::InvalidParamsError;
use crate::model::{
    CellRange, DeleteCellsResponse, ExecuteCellsResponse, InsertCellsResponse,
    ModifyCellResponse, NotebookCellsResponse, NotebookInfoResponse, NotebookListResponse,
    OpenNotebookResponse, ReplaceCellsResponse, SaveNotebookResponse,
};
use crate::notebook::NotebookFilter;
use crate::state::AppState;
use anyhow::Result;
use cell_input::{CellInput, normalize_cells, to_index};
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

/// Tool arguments whose shape is checked after extraction.
///
/// Deserializing never fails, so a missing or mistyped field reaches the tool as
/// a `serde_json::Error` and is reported like any other validation error. The
/// advertised input schema is the one of `T`.
#[derive(Debug)]
pub struct ToolArgs<T>(Result<T, serde_json::Error>);

impl<T> ToolArgs<T> {
    pub fn into_inner(self) -> Result<T> {
        self.0.map_err(anyhow::Error::new)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for ToolArgs<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self(serde_json::from_value(value)))
    }
}

impl<T: JsonSchema> JsonSchema for ToolArgs<T> {
    fn schema_name() -> Cow<'static, str> {
        T::schema_name()
    }

    fn schema_id() -> Cow<'static, str> {
        T::schema_id()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        T::json_schema(generator)
    }

    fn inline_schema() -> bool {
        T::inline_schema()
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsertNotebookCellsParams {
    pub cells: Vec<CellInput>,
    /// Position to insert at; omitted appends. `0` prepends.
    #[serde(default)]
    pub insert_position: Option<i64>,
    /// Skip running the inserted code cells.
    #[serde(default)]
    pub noexec: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReplaceNotebookCellsParams {
    pub start_index: i64,
    /// Exclusive; must be greater than start_index.
    pub end_index: i64,
    pub cells: Vec<CellInput>,
    #[serde(default)]
    pub noexec: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ModifyNotebookCellContentParams {
    pub cell_index: i64,
    pub content: String,
    #[serde(default)]
    pub noexec: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteNotebookCellsParams {
    pub start_index: i64,
    pub end_index: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteNotebookCellsParams {
    pub start_index: i64,
    pub end_index: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct OpenNotebookParams {
    /// Notebook path, absolute or relative to the workspace root.
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListNotebooksParams {
    #[serde(default)]
    pub path_glob: Option<String>,
}

fn range_from(tool: &'static str, start_index: i64, end_index: i64) -> Result<CellRange> {
    Ok(CellRange::new(
        to_index(tool, "start_index", start_index)?,
        to_index(tool, "end_index", end_index)?,
    ))
}

pub async fn get_notebook_info(state: Arc<AppState>) -> Result<NotebookInfoResponse> {
    Ok(state.active_service()?.info())
}

pub async fn get_notebook_cells(state: Arc<AppState>) -> Result<NotebookCellsResponse> {
    Ok(state.active_service()?.cells(&state.execution()))
}

pub async fn insert_notebook_cells(
    state: Arc<AppState>,
    params: InsertNotebookCellsParams,
) -> Result<InsertCellsResponse> {
    const TOOL: &str = "insert_notebook_cells";
    let cells = normalize_cells(TOOL, params.cells, false)?;
    let position = params
        .insert_position
        .map(|p| to_index(TOOL, "insert_position", p))
        .transpose()?;
    let service = state.active_service()?;
    service
        .insert(
            cells,
            position,
            params.noexec.unwrap_or(false),
            &state.execution(),
        )
        .await
}

pub async fn replace_notebook_cells(
    state: Arc<AppState>,
    params: ReplaceNotebookCellsParams,
) -> Result<ReplaceCellsResponse> {
    const TOOL: &str = "replace_notebook_cells";
    let range = range_from(TOOL, params.start_index, params.end_index)?;
    let cells = normalize_cells(TOOL, params.cells, true)?;
    let service = state.active_service()?;
    service
        .replace(
            range,
            cells,
            params.noexec.unwrap_or(false),
            &state.execution(),
        )
        .await
}

pub async fn modify_notebook_cell_content(
    state: Arc<AppState>,
    params: ModifyNotebookCellContentParams,
) -> Result<ModifyCellResponse> {
    let index = to_index("modify_notebook_cell_content", "cell_index", params.cell_index)?;
    let service = state.active_service()?;
    service
        .modify(
            index,
            params.content,
            params.noexec.unwrap_or(false),
            &state.execution(),
        )
        .await
}

pub async fn execute_notebook_cells(
    state: Arc<AppState>,
    params: ExecuteNotebookCellsParams,
) -> Result<ExecuteCellsResponse> {
    let range = range_from("execute_notebook_cells", params.start_index, params.end_index)?;
    let service = state.active_service()?;
    service.execute(range, &state.execution()).await
}

pub async fn delete_notebook_cells(
    state: Arc<AppState>,
    params: DeleteNotebookCellsParams,
) -> Result<DeleteCellsResponse> {
    let range = range_from("delete_notebook_cells", params.start_index, params.end_index)?;
    state.active_service()?.delete(range).await
}

pub async fn save_notebook(state: Arc<AppState>) -> Result<SaveNotebookResponse> {
    state.active_service()?.save().await
}

pub async fn open_notebook(
    state: Arc<AppState>,
    params: OpenNotebookParams,
) -> Result<OpenNotebookResponse> {
    let path = params.path.trim();
    if path.is_empty() {
        return Err(
            InvalidParamsError::new("open_notebook", "path must not be empty")
                .with_path("path")
                .into(),
        );
    }

    let opened = state.open_notebook(&PathBuf::from(path)).await?;
    let descriptor = opened.document.descriptor();
    Ok(OpenNotebookResponse {
        uri: descriptor.uri,
        notebook_type: descriptor.notebook_type,
        kernel: descriptor.kernel,
        cell_count: opened.document.cell_count(),
        created: opened.created,
    })
}

pub async fn list_notebooks(
    state: Arc<AppState>,
    params: ListNotebooksParams,
) -> Result<NotebookListResponse> {
    let filter = NotebookFilter::new(params.path_glob.as_deref()).map_err(|e| {
        InvalidParamsError::new("list_notebooks", e.to_string()).with_path("path_glob")
    })?;
    state.list_notebooks(&filter)
}
