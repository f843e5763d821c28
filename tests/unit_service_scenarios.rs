use anyhow::Result;
use assert_matches::assert_matches;
use notebook_mcp::errors::{InvalidParamsError, NoActiveNotebookError, RangeError};
use notebook_mcp::model::{CellKind, CellTerminalState, ExecutionStatus, ToolOutcome};
use notebook_mcp::notebook::ipynb;
use notebook_mcp::tools::cell_input::CellInput;
use notebook_mcp::tools::{
    DeleteNotebookCellsParams, ExecuteNotebookCellsParams, InsertNotebookCellsParams,
    ListNotebooksParams, ModifyNotebookCellContentParams, OpenNotebookParams,
    ReplaceNotebookCellsParams, delete_notebook_cells, execute_notebook_cells, get_notebook_cells,
    get_notebook_info, insert_notebook_cells, list_notebooks, modify_notebook_cell_content,
    open_notebook, replace_notebook_cells, save_notebook,
};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

mod support;

fn open(path: &str) -> OpenNotebookParams {
    OpenNotebookParams {
        path: path.to_string(),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn tools_require_an_open_notebook() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let state = support::app_state(&workspace, support::ScriptedKernel::new());

    let err = get_notebook_cells(state.clone()).await.unwrap_err();
    assert!(err.downcast_ref::<NoActiveNotebookError>().is_some());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn open_missing_notebook_creates_it_and_save_writes_it() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let state = support::app_state(&workspace, support::ScriptedKernel::new());

    let opened = open_notebook(state.clone(), open("new.ipynb")).await?;
    assert!(opened.created);
    assert_eq!(opened.cell_count, 0);
    assert_eq!(opened.notebook_type, "jupyter-notebook");
    assert!(opened.uri.starts_with("file://"));
    assert!(!workspace.path("new.ipynb").exists());

    insert_notebook_cells(
        state.clone(),
        InsertNotebookCellsParams {
            cells: vec![CellInput::markdown("# Title"), CellInput::code("print hi")],
            insert_position: None,
            noexec: Some(true),
        },
    )
    .await?;
    assert!(get_notebook_info(state.clone()).await?.dirty);

    let saved = save_notebook(state.clone()).await?;
    assert_eq!(saved.cell_count, 2);
    assert!(!get_notebook_info(state.clone()).await?.dirty);

    let written = ipynb::parse(&fs::read_to_string(workspace.path("new.ipynb"))?)?;
    assert_eq!(written.cells.len(), 2);
    assert_eq!(written.cells[0].data.kind, CellKind::Markdown);
    assert_eq!(written.cells[1].data.content, "print hi");
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn insert_runs_new_code_cells_and_reports_failures_as_content() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let kernel = support::ScriptedKernel::new();
    let state = support::app_state(&workspace, kernel.clone());
    open_notebook(state.clone(), open("run.ipynb")).await?;

    let response = insert_notebook_cells(
        state.clone(),
        InsertNotebookCellsParams {
            cells: vec![
                CellInput::code("print one"),
                CellInput::markdown("notes"),
                CellInput::code("raise KeyError: 'missing'"),
            ],
            insert_position: None,
            noexec: None,
        },
    )
    .await?;

    let execution = response.execution.as_ref().expect("execution report");
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let states: Vec<_> = execution.cells.iter().map(|c| c.state).collect();
    assert_eq!(
        states,
        vec![
            CellTerminalState::Succeeded,
            CellTerminalState::Succeeded,
            CellTerminalState::Failed,
        ]
    );
    assert_eq!(execution.cells[0].outputs, vec!["one\n".to_string()]);
    assert_eq!(execution.cells[2].outputs, vec!["KeyError: 'missing'".to_string()]);
    assert!(!response.is_error());
    assert_eq!(kernel.executed(), vec!["print one", "raise KeyError: 'missing'"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn timed_out_range_reports_partial_results() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let config = workspace.config_with(|cfg| cfg.timeout_seconds = 1);
    let state = support::app_state_with_config(config, support::ScriptedKernel::new());
    open_notebook(state.clone(), open("slow.ipynb")).await?;

    let response = insert_notebook_cells(
        state.clone(),
        InsertNotebookCellsParams {
            cells: vec![
                CellInput::code("print first"),
                CellInput::code("print second"),
                CellInput::code("hang"),
            ],
            insert_position: Some(0),
            noexec: Some(false),
        },
    )
    .await?;

    assert!(response.is_error());
    assert_eq!(response.cell_count, 3);
    let execution = response.execution.as_ref().expect("execution report");
    assert!(execution.timed_out());
    assert_eq!(execution.cells[0].outputs, vec!["first\n".to_string()]);
    assert_eq!(execution.cells[1].outputs, vec!["second\n".to_string()]);
    assert_eq!(execution.cells[2].state, CellTerminalState::Cancelled);
    assert!(execution.summary.contains("timed out after 1s"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn calls_after_a_timeout_run_normally() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let config = workspace.config_with(|cfg| cfg.timeout_seconds = 1);
    let kernel = support::ScriptedKernel::new();
    let state = support::app_state_with_config(config, kernel.clone());
    open_notebook(state.clone(), open("recover.ipynb")).await?;

    let response = insert_notebook_cells(
        state.clone(),
        InsertNotebookCellsParams {
            cells: vec![CellInput::code("print first"), CellInput::code("hang")],
            insert_position: None,
            noexec: None,
        },
    )
    .await?;
    assert!(response.is_error());

    let rerun = execute_notebook_cells(
        state.clone(),
        ExecuteNotebookCellsParams {
            start_index: 0,
            end_index: 1,
        },
    )
    .await?;
    assert!(!rerun.is_error());
    assert_eq!(rerun.execution.status, ExecutionStatus::Completed);
    assert_eq!(rerun.execution.cells[0].outputs, vec!["first\n".to_string()]);

    let modified = modify_notebook_cell_content(
        state.clone(),
        ModifyNotebookCellContentParams {
            cell_index: 1,
            content: "sleep 200\nprint recovered".to_string(),
            noexec: None,
        },
    )
    .await?;
    let execution = modified.execution.expect("execution report");
    assert_eq!(execution.cells[0].state, CellTerminalState::Succeeded);
    assert_eq!(execution.cells[0].outputs, vec!["recovered\n".to_string()]);
    assert_eq!(kernel.executed().len(), 4);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn modify_noexec_clears_stale_error_output() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let mut errored = support::code_cell("1/0");
    errored["execution_count"] = json!(4);
    errored["outputs"] = json!([{
        "output_type": "error",
        "ename": "ZeroDivisionError",
        "evalue": "division by zero",
        "traceback": []
    }]);
    workspace.write_notebook("stale.ipynb", vec![errored, support::code_cell("print 2")]);

    let kernel = support::ScriptedKernel::new();
    let state = support::app_state(&workspace, kernel.clone());
    open_notebook(state.clone(), open("stale.ipynb")).await?;

    let before = get_notebook_cells(state.clone()).await?;
    assert_eq!(
        before.cells[0].outputs,
        vec!["ZeroDivisionError: division by zero".to_string()]
    );

    let response = modify_notebook_cell_content(
        state.clone(),
        ModifyNotebookCellContentParams {
            cell_index: 0,
            content: "x=1".to_string(),
            noexec: Some(true),
        },
    )
    .await?;

    assert!(response.outputs_cleared);
    assert!(response.execution.is_none());
    let after = get_notebook_cells(state.clone()).await?;
    assert_eq!(after.cells[0].content, "x=1");
    assert!(after.cells[0].outputs.is_empty());
    assert_eq!(after.cells[0].execution_count, None);
    assert!(kernel.executed().is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn modify_reruns_code_cell() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    workspace.write_notebook("rerun.ipynb", vec![support::code_cell("print old")]);
    let state = support::app_state(&workspace, support::ScriptedKernel::new());
    open_notebook(state.clone(), open("rerun.ipynb")).await?;

    let response = modify_notebook_cell_content(
        state.clone(),
        ModifyNotebookCellContentParams {
            cell_index: 0,
            content: "print new".to_string(),
            noexec: None,
        },
    )
    .await?;

    let execution = response.execution.expect("execution report");
    assert_eq!(execution.cells[0].outputs, vec!["new\n".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn outputs_are_truncated_per_record() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let config = workspace.config_with(|cfg| cfg.max_output_size = 10);
    let state = support::app_state_with_config(config, support::ScriptedKernel::new());
    open_notebook(state.clone(), open("long.ipynb")).await?;

    let response = insert_notebook_cells(
        state.clone(),
        InsertNotebookCellsParams {
            cells: vec![CellInput::code(format!("print {}", "y".repeat(30)))],
            insert_position: None,
            noexec: None,
        },
    )
    .await?;

    let expected = format!("{}\n... [truncated 21 characters]", "y".repeat(10));
    let execution = response.execution.expect("execution report");
    assert_eq!(execution.cells[0].outputs, vec![expected.clone()]);

    let cells = get_notebook_cells(state.clone()).await?;
    assert_eq!(cells.cells[0].outputs, vec![expected]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn replace_and_execute_use_live_indices() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    workspace.write_notebook(
        "live.ipynb",
        vec![
            support::markdown_cell("intro"),
            support::code_cell("print a"),
            support::code_cell("print b"),
        ],
    );
    let kernel = support::ScriptedKernel::new();
    let state = support::app_state(&workspace, kernel.clone());
    open_notebook(state.clone(), open("live.ipynb")).await?;

    let replaced = replace_notebook_cells(
        state.clone(),
        ReplaceNotebookCellsParams {
            start_index: 1,
            end_index: 3,
            cells: vec![CellInput::code("print z")],
            noexec: None,
        },
    )
    .await?;
    assert_eq!(replaced.cell_count, 2);
    let execution = replaced.execution.expect("execution report");
    assert_eq!(execution.range.start, 1);
    assert_eq!(execution.cells[0].index, 1);
    assert_eq!(execution.cells[0].outputs, vec!["z\n".to_string()]);

    let rerun = execute_notebook_cells(
        state.clone(),
        ExecuteNotebookCellsParams {
            start_index: 0,
            end_index: 2,
        },
    )
    .await?;
    assert_eq!(rerun.execution.cells.len(), 2);
    assert_eq!(rerun.execution.cells[0].cell_type, CellKind::Markdown);
    assert_eq!(kernel.executed(), vec!["print z", "print z"]);

    let err = execute_notebook_cells(
        state.clone(),
        ExecuteNotebookCellsParams {
            start_index: 1,
            end_index: 3,
        },
    )
    .await
    .unwrap_err();
    assert_matches!(
        err.downcast_ref::<RangeError>(),
        Some(RangeError::OutOfBounds { count: 2, .. })
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn negative_and_malformed_params_are_validation_errors() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let state = support::app_state(&workspace, support::ScriptedKernel::new());
    open_notebook(state.clone(), open("v.ipynb")).await?;

    let err = delete_notebook_cells(
        state.clone(),
        DeleteNotebookCellsParams {
            start_index: -1,
            end_index: 1,
        },
    )
    .await
    .unwrap_err();
    let inv = err.downcast_ref::<InvalidParamsError>().expect("invalid params");
    assert_eq!(inv.path(), Some("start_index"));

    let err = insert_notebook_cells(
        state.clone(),
        InsertNotebookCellsParams {
            cells: Vec::new(),
            insert_position: None,
            noexec: None,
        },
    )
    .await
    .unwrap_err();
    assert!(err.downcast_ref::<InvalidParamsError>().is_some());

    let params: InsertNotebookCellsParams = serde_json::from_value(json!({
        "cells": [{"content": "x", "cell_type": "heading"}]
    }))?;
    let err = insert_notebook_cells(state.clone(), params)
        .await
        .unwrap_err();
    let inv = err.downcast_ref::<InvalidParamsError>().expect("invalid params");
    assert_eq!(inv.path(), Some("cells[0].cell_type"));

    assert_eq!(get_notebook_info(state.clone()).await?.cell_count, 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn shrinking_notebook_during_execution_is_detected() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    workspace.write_notebook(
        "shrink.ipynb",
        vec![
            support::code_cell("print 0"),
            support::code_cell("sleep 200"),
            support::code_cell("print 2"),
        ],
    );
    let state = support::app_state(&workspace, support::ScriptedKernel::new());
    open_notebook(state.clone(), open("shrink.ipynb")).await?;

    let deleter = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            delete_notebook_cells(
                state,
                DeleteNotebookCellsParams {
                    start_index: 0,
                    end_index: 2,
                },
            )
            .await
        })
    };

    let err = execute_notebook_cells(
        state.clone(),
        ExecuteNotebookCellsParams {
            start_index: 1,
            end_index: 3,
        },
    )
    .await
    .unwrap_err();
    deleter.await??;

    assert_matches!(
        err.downcast_ref::<RangeError>(),
        Some(RangeError::Shifted { count: 1, .. })
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn reopening_returns_the_same_live_document() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    workspace.write_notebook("a.ipynb", vec![support::code_cell("print a")]);
    workspace.write_notebook("nested/b.ipynb", vec![]);
    let state = support::app_state(&workspace, support::ScriptedKernel::new());

    open_notebook(state.clone(), open("a.ipynb")).await?;
    insert_notebook_cells(
        state.clone(),
        InsertNotebookCellsParams {
            cells: vec![CellInput::markdown("unsaved")],
            insert_position: None,
            noexec: None,
        },
    )
    .await?;

    let listed = list_notebooks(state.clone(), ListNotebooksParams::default()).await?;
    let paths: Vec<_> = listed.notebooks.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(paths, vec!["a.ipynb", "nested/b.ipynb"]);
    assert!(listed.notebooks[0].open);
    assert!(!listed.notebooks[1].open);

    open_notebook(state.clone(), open("nested/b.ipynb")).await?;
    assert_eq!(get_notebook_info(state.clone()).await?.cell_count, 0);

    let reopened = open_notebook(state.clone(), open("a.ipynb")).await?;
    assert!(!reopened.created);
    assert_eq!(reopened.cell_count, 2);
    Ok(())
}
