#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use notebook_mcp::config::{KernelConfig, ServerConfig, TransportKind};
use notebook_mcp::kernel::{KernelBackend, KernelDescriptor, KernelRun};
use notebook_mcp::model::{CellSpec, OutputRecord};
use notebook_mcp::notebook::{
    LiveNotebook, NotebookDocument, NotebookEdit, NotebookRepository, PathNotebookRepository,
};
use notebook_mcp::state::AppState;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestWorkspace {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let root = tempdir.path().to_path_buf();
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            workspace_root: self.root.clone(),
            notebook: None,
            cache_capacity: 4,
            enabled_tools: None,
            transport: TransportKind::Stdio,
            http_bind_address: "127.0.0.1:0".parse().expect("bind"),
            max_output_size: 2000,
            timeout_seconds: 5,
            kernel: KernelConfig::default(),
        }
    }

    pub fn config_with<F>(&self, f: F) -> ServerConfig
    where
        F: FnOnce(&mut ServerConfig),
    {
        let mut config = self.config();
        f(&mut config);
        config
    }

    /// Writes an nbformat 4 file whose `cells` are given as raw JSON.
    pub fn write_notebook(&self, relative: &str, cells: Vec<Value>) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dirs");
        }
        let notebook = json!({
            "metadata": {
                "kernelspec": {"name": "scripted", "language": "script", "display_name": "Scripted"}
            },
            "nbformat": 4,
            "nbformat_minor": 5,
            "cells": cells,
        });
        fs::write(&path, serde_json::to_string_pretty(&notebook).expect("json")).expect("write");
        path
    }
}

pub fn code_cell(source: &str) -> Value {
    json!({
        "cell_type": "code",
        "metadata": {},
        "source": source,
        "execution_count": null,
        "outputs": [],
    })
}

pub fn markdown_cell(source: &str) -> Value {
    json!({"cell_type": "markdown", "metadata": {}, "source": source})
}

/// A kernel driven by one command per line of cell source:
/// `sleep <ms>`, `hang`, `raise <Name>: <message>`, `fail <message>` (backend error),
/// and `print <text>`. Any other line is echoed to stdout.
#[derive(Default)]
pub struct ScriptedKernel {
    executed: Mutex<Vec<String>>,
}

impl ScriptedKernel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl KernelBackend for ScriptedKernel {
    async fn execute(&self, code: &str) -> Result<KernelRun> {
        self.executed.lock().push(code.to_string());

        let mut outputs = Vec::new();
        let mut stdout = String::new();
        for line in code.lines() {
            let line = line.trim();
            if let Some(ms) = line.strip_prefix("sleep ") {
                tokio::time::sleep(Duration::from_millis(ms.trim().parse()?)).await;
            } else if line == "hang" {
                std::future::pending::<()>().await;
            } else if let Some(rest) = line.strip_prefix("raise ") {
                let (name, message) = rest.split_once(':').unwrap_or((rest, ""));
                outputs.push(OutputRecord::error(name.trim(), message.trim()));
                break;
            } else if let Some(message) = line.strip_prefix("fail ") {
                anyhow::bail!("{message}");
            } else if let Some(text) = line.strip_prefix("print ") {
                stdout.push_str(text);
                stdout.push('\n');
            } else if !line.is_empty() {
                stdout.push_str(line);
                stdout.push('\n');
            }
        }
        if !stdout.is_empty() {
            outputs.insert(0, OutputRecord::stdout(stdout));
        }

        Ok(KernelRun {
            outputs,
            duration_ms: 0,
        })
    }

    fn descriptor(&self) -> KernelDescriptor {
        KernelDescriptor::new("scripted", "script")
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// An unsaved in-memory notebook seeded with `cells`.
pub async fn live_notebook(
    workspace: &TestWorkspace,
    kernel: Arc<ScriptedKernel>,
    cells: Vec<CellSpec>,
) -> Result<Arc<dyn NotebookDocument>> {
    let notebook = LiveNotebook::create(workspace.path("scratch.ipynb"), kernel);
    if !cells.is_empty() {
        notebook
            .apply_edit(NotebookEdit::Splice {
                start: 0,
                delete_count: 0,
                cells,
            })
            .await?;
    }
    Ok(Arc::new(notebook))
}

pub fn app_state_with_config(config: ServerConfig, kernel: Arc<ScriptedKernel>) -> Arc<AppState> {
    let config = Arc::new(config);
    let repository: Arc<dyn NotebookRepository> =
        Arc::new(PathNotebookRepository::new(config.clone(), kernel));
    Arc::new(AppState::new_with_repository(config, repository))
}

pub fn app_state(workspace: &TestWorkspace, kernel: Arc<ScriptedKernel>) -> Arc<AppState> {
    app_state_with_config(workspace.config(), kernel)
}
