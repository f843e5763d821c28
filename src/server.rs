use crate::config::ServerConfig;
use crate::errors::{BackingStoreError, InvalidParamsError, NoActiveNotebookError, RangeError};
use crate::model::ToolOutcome;
use crate::state::AppState;
use crate::tools;
use anyhow::Result;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    transport::streamable_http_server::{
        StreamableHttpService, session::local::LocalSessionManager,
    },
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use {once_cell::sync::Lazy, regex::Regex};

const BASE_INSTRUCTIONS: &str = "\
Notebook MCP: edit and run Jupyter notebooks cell by cell.

WORKFLOW:
1) list_notebooks / open_notebook to pick the active notebook (a missing .ipynb path is created).
2) get_notebook_info and get_notebook_cells to see the current cells and outputs.
3) insert_notebook_cells / replace_notebook_cells / modify_notebook_cell_content edit cells and,
   unless noexec is true, run the new or changed code cells and return their outputs.
4) execute_notebook_cells re-runs a range; delete_notebook_cells removes one.
5) save_notebook writes the notebook to disk.

INDEXING:
- Cells are addressed by position. Ranges are half-open: [start_index, end_index).
- Any insert or delete shifts the indices of every later cell; re-read cells before
  issuing follow-up edits against old indices.

EXECUTION:
- Cells in a range run in order under one shared time budget.
- A cell that raised reports state 'failed' with its error output; the edit still applied.
- On timeout the response is flagged as an error, completed cells keep their outputs,
  and the rest are reported as 'cancelled'.
- Long outputs are truncated per output with a '[truncated N characters]' marker.";

fn build_instructions(config: &ServerConfig) -> String {
    let mut instructions = BASE_INSTRUCTIONS.to_string();
    instructions.push_str(&format!(
        "\n\nLIMITS: timeout {}s per execution, {} characters per output.",
        config.timeout_seconds, config.max_output_size
    ));
    if let Some(enabled) = &config.enabled_tools {
        let mut names: Vec<&str> = enabled.iter().map(String::as_str).collect();
        names.sort_unstable();
        instructions.push_str(&format!("\nEnabled tools: {}.", names.join(", ")));
    }
    instructions
}

#[derive(Clone)]
pub struct NotebookServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<NotebookServer>,
}

impl NotebookServer {
    pub async fn new(config: Arc<ServerConfig>) -> Result<Self> {
        config.ensure_workspace_root()?;
        let state = Arc::new(AppState::new(config.clone()));
        if let Some(path) = &config.notebook {
            state.open_notebook(path).await?;
        }
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub async fn run_stdio(self) -> Result<()> {
        let service = self
            .serve(stdio())
            .await
            .inspect_err(|error| tracing::error!("serving error: {:?}", error))?;
        service.waiting().await?;
        Ok(())
    }

    pub async fn run_http(self, bind: SocketAddr) -> Result<()> {
        let shutdown = CancellationToken::new();
        let server = self.clone();
        let service = StreamableHttpService::new(
            move || Ok(server.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let router = axum::Router::new().nest_service("/mcp", service);
        let listener = tokio::net::TcpListener::bind(bind).await?;
        tracing::info!(address = %listener.local_addr()?, "listening on http /mcp");

        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, shutting down");
            }
            token.cancel();
        });

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        Ok(())
    }

    fn ensure_tool_enabled(&self, tool: &str) -> Result<()> {
        tracing::info!(tool = tool, "tool invocation requested");
        if self.state.config().is_tool_enabled(tool) {
            Ok(())
        } else {
            Err(ToolDisabledError::new(tool).into())
        }
    }

    async fn run_tool<T, F>(&self, tool: &'static str, fut: F) -> Result<CallToolResult, McpError>
    where
        F: Future<Output = Result<T>>,
        T: Serialize + ToolOutcome,
    {
        let result = match self.ensure_tool_enabled(tool) {
            Ok(()) => fut.await,
            Err(error) => Err(error),
        };
        tool_result(tool, result)
    }

    async fn run_tool_with<P, T, F, Fut>(
        &self,
        tool: &'static str,
        args: tools::ToolArgs<P>,
        handler: F,
    ) -> Result<CallToolResult, McpError>
    where
        F: FnOnce(Arc<AppState>, P) -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + ToolOutcome,
    {
        let state = self.state.clone();
        self.run_tool(tool, async move { handler(state, args.into_inner()?).await })
            .await
    }
}

#[tool_router]
impl NotebookServer {
    #[tool(
        name = "list_notebooks",
        description = "List .ipynb files in the workspace, optionally filtered by a path glob"
    )]
    pub async fn list_notebooks(
        &self,
        Parameters(args): Parameters<tools::ToolArgs<tools::ListNotebooksParams>>,
    ) -> Result<CallToolResult, McpError> {
        self.run_tool_with("list_notebooks", args, tools::list_notebooks).await
    }

    #[tool(
        name = "open_notebook",
        description = "Open a notebook (created if the path does not exist) and make it active"
    )]
    pub async fn open_notebook(
        &self,
        Parameters(args): Parameters<tools::ToolArgs<tools::OpenNotebookParams>>,
    ) -> Result<CallToolResult, McpError> {
        self.run_tool_with("open_notebook", args, tools::open_notebook).await
    }

    #[tool(
        name = "get_notebook_info",
        description = "Describe the active notebook: uri, kernel, cell count, unsaved changes"
    )]
    pub async fn get_notebook_info(&self) -> Result<CallToolResult, McpError> {
        self.run_tool(
            "get_notebook_info",
            tools::get_notebook_info(self.state.clone()),
        )
        .await
    }

    #[tool(
        name = "get_notebook_cells",
        description = "Read every cell of the active notebook with its text outputs"
    )]
    pub async fn get_notebook_cells(&self) -> Result<CallToolResult, McpError> {
        self.run_tool(
            "get_notebook_cells",
            tools::get_notebook_cells(self.state.clone()),
        )
        .await
    }

    #[tool(
        name = "insert_notebook_cells",
        description = "Insert cells at insert_position (default: append). Code cells run unless noexec is true"
    )]
    pub async fn insert_notebook_cells(
        &self,
        Parameters(args): Parameters<tools::ToolArgs<tools::InsertNotebookCellsParams>>,
    ) -> Result<CallToolResult, McpError> {
        self.run_tool_with("insert_notebook_cells", args, tools::insert_notebook_cells).await
    }

    #[tool(
        name = "replace_notebook_cells",
        description = "Replace cells [start_index, end_index) with new cells in one edit. New code cells run unless noexec is true"
    )]
    pub async fn replace_notebook_cells(
        &self,
        Parameters(args): Parameters<tools::ToolArgs<tools::ReplaceNotebookCellsParams>>,
    ) -> Result<CallToolResult, McpError> {
        self.run_tool_with("replace_notebook_cells", args, tools::replace_notebook_cells).await
    }

    #[tool(
        name = "modify_notebook_cell_content",
        description = "Replace one cell's content in place. Clears stale outputs; code cells re-run unless noexec is true"
    )]
    pub async fn modify_notebook_cell_content(
        &self,
        Parameters(args): Parameters<tools::ToolArgs<tools::ModifyNotebookCellContentParams>>,
    ) -> Result<CallToolResult, McpError> {
        self.run_tool_with(
            "modify_notebook_cell_content",
            args,
            tools::modify_notebook_cell_content,
        )
        .await
    }

    #[tool(
        name = "execute_notebook_cells",
        description = "Run cells [start_index, end_index) in order and return their outputs"
    )]
    pub async fn execute_notebook_cells(
        &self,
        Parameters(args): Parameters<tools::ToolArgs<tools::ExecuteNotebookCellsParams>>,
    ) -> Result<CallToolResult, McpError> {
        self.run_tool_with("execute_notebook_cells", args, tools::execute_notebook_cells).await
    }

    #[tool(
        name = "delete_notebook_cells",
        description = "Delete cells [start_index, end_index)"
    )]
    pub async fn delete_notebook_cells(
        &self,
        Parameters(args): Parameters<tools::ToolArgs<tools::DeleteNotebookCellsParams>>,
    ) -> Result<CallToolResult, McpError> {
        self.run_tool_with("delete_notebook_cells", args, tools::delete_notebook_cells).await
    }

    #[tool(name = "save_notebook", description = "Write the active notebook to disk")]
    pub async fn save_notebook(&self) -> Result<CallToolResult, McpError> {
        self.run_tool("save_notebook", tools::save_notebook(self.state.clone()))
            .await
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for NotebookServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(build_instructions(&self.state.config())),
            ..ServerInfo::default()
        }
    }
}

fn tool_result<T>(tool: &str, result: Result<T>) -> Result<CallToolResult, McpError>
where
    T: Serialize + ToolOutcome,
{
    match result {
        Ok(value) => {
            let body = serde_json::to_string_pretty(&value).map_err(|e| {
                McpError::internal_error(format!("failed to serialize {tool} response: {e}"), None)
            })?;
            if value.is_error() {
                tracing::warn!(tool = tool, "tool completed with execution timeout");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "ExecutionTimeout: the edit was applied but execution did not finish in time\n{body}"
                ))]))
            } else {
                Ok(CallToolResult::success(vec![Content::text(body)]))
            }
        }
        Err(error) => Ok(CallToolResult::error(vec![Content::text(
            error_payload(tool, &error),
        )])),
    }
}

/// Renders `error` as `"<Kind>: <message>"`.
fn error_payload(tool: &str, error: &anyhow::Error) -> String {
    if let Some(disabled) = error.downcast_ref::<ToolDisabledError>() {
        return format!("ToolDisabled: {disabled}");
    }

    if let Some(inv) = error.downcast_ref::<InvalidParamsError>() {
        let variants = tool_variants(tool, inv.message())
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let msg = format_invalid_params_message(
            tool,
            inv.message(),
            inv.path(),
            (!variants.is_empty()).then_some(variants.as_slice()),
            tool_minimal_example(tool),
        );
        return format!("ValidationError: {msg}");
    }

    if let Some(serde_err) = error.downcast_ref::<serde_json::Error>() {
        let problem = serde_err.to_string();
        return format!("ValidationError: {}", describe_shape_problem(tool, &problem));
    }

    if error.downcast_ref::<RangeError>().is_some() {
        return format!("RangeError: {error:#}");
    }

    if error.downcast_ref::<NoActiveNotebookError>().is_some() {
        return format!("NoActiveNotebook: {error:#}");
    }

    if error.downcast_ref::<BackingStoreError>().is_some() {
        tracing::warn!(tool = tool, "backing store error: {error:#}");
        return format!("BackingStoreError: {error:#}");
    }

    let problem = format!("{error:#}");
    if looks_like_invalid_params(&problem) {
        return format!("ValidationError: {}", describe_shape_problem(tool, &problem));
    }

    tracing::error!(tool = tool, "tool failed: {problem}");
    format!("InternalError: {problem}")
}

fn describe_shape_problem(tool: &str, problem: &str) -> String {
    let path = infer_path_for_tool(tool, problem);
    let mut variants = extract_expected_variants(problem);
    if variants.is_empty()
        && let Some(extra) = tool_variants(tool, problem)
    {
        variants = extra.into_iter().map(|s| s.to_string()).collect();
    }
    format_invalid_params_message(
        tool,
        problem,
        path.as_deref(),
        (!variants.is_empty()).then_some(variants.as_slice()),
        tool_minimal_example(tool),
    )
}

fn format_invalid_params_message(
    tool: &str,
    problem: &str,
    path: Option<&str>,
    variants: Option<&[String]>,
    example: Option<&'static str>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Invalid params for tool '{tool}': {problem}"));

    if let Some(path) = path {
        out.push_str(&format!("\npath: {path}"));
    }

    if let Some(variants) = variants
        && !variants.is_empty()
    {
        out.push_str("\nvalid variants: ");
        out.push_str(&variants.join(", "));
    }

    if let Some(example) = example {
        out.push_str("\nexample: ");
        out.push_str(example);
    }

    out
}

fn tool_minimal_example(tool: &str) -> Option<&'static str> {
    match tool {
        "insert_notebook_cells" => Some(
            r#"{"cells":[{"content":"print('hi')","cell_type":"code"}],"insert_position":0,"noexec":false}"#,
        ),
        "replace_notebook_cells" => Some(
            r##"{"start_index":1,"end_index":2,"cells":[{"content":"# Notes","cell_type":"markdown"}]}"##,
        ),
        "modify_notebook_cell_content" => {
            Some(r#"{"cell_index":0,"content":"x = 1","noexec":true}"#)
        }
        "execute_notebook_cells" => Some(r#"{"start_index":0,"end_index":2}"#),
        "delete_notebook_cells" => Some(r#"{"start_index":1,"end_index":3}"#),
        "open_notebook" => Some(r#"{"path":"analysis/notebook.ipynb"}"#),
        "list_notebooks" => Some(r#"{"path_glob":"**/*.ipynb"}"#),
        _ => None,
    }
}

fn infer_path_for_tool(tool: &str, problem: &str) -> Option<String> {
    let p = problem.to_ascii_lowercase();

    for field in [
        "start_index",
        "end_index",
        "cell_index",
        "insert_position",
        "noexec",
        "content",
        "path",
    ] {
        if p.contains(&format!("`{field}`")) {
            return Some(field.to_string());
        }
    }

    match tool {
        "insert_notebook_cells" | "replace_notebook_cells" => {
            if p.contains("cell_type") {
                return Some("cells[0].cell_type".to_string());
            }
            if p.contains("did not match any variant") || p.contains("cellinput") {
                return Some("cells[0]".to_string());
            }
            if p.contains("`cells`") {
                return Some("cells".to_string());
            }
            None
        }
        _ => None,
    }
}

fn tool_variants(tool: &str, problem: &str) -> Option<Vec<&'static str>> {
    let p = problem.to_ascii_lowercase();

    match tool {
        "insert_notebook_cells" | "replace_notebook_cells" => {
            if p.contains("cell_type") {
                return Some(vec!["code", "markdown"]);
            }
            None
        }
        _ => None,
    }
}

fn looks_like_invalid_params(problem: &str) -> bool {
    let p = problem.to_ascii_lowercase();

    p.contains("missing field")
        || p.contains("unknown field")
        || p.contains("unknown variant")
        || p.contains("did not match any variant")
        || p.contains("invalid type")
}

fn extract_expected_variants(problem: &str) -> Vec<String> {
    static EXPECTED_TAIL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"expected(?: one of)? (?P<tail>.*)$").expect("regex"));
    static BACKTICK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("regex"));

    let Some(caps) = EXPECTED_TAIL_RE.captures(problem) else {
        return Vec::new();
    };
    let tail = caps.name("tail").map(|m| m.as_str()).unwrap_or("");
    BACKTICK_RE
        .captures_iter(tail)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

#[derive(Debug, Error)]
#[error("tool '{tool_name}' is disabled by server configuration")]
struct ToolDisabledError {
    tool_name: String,
}

impl ToolDisabledError {
    fn new(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_ascii_lowercase(),
        }
    }
}
