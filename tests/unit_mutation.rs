use anyhow::Result;
use assert_matches::assert_matches;
use notebook_mcp::config::ExecutionConfig;
use notebook_mcp::errors::RangeError;
use notebook_mcp::model::{CellKind, CellRange, CellSpec};
use notebook_mcp::service::NotebookService;

mod support;

fn contents(service: &NotebookService) -> Vec<String> {
    service
        .cells(&ExecutionConfig::default())
        .cells
        .into_iter()
        .map(|c| c.content)
        .collect()
}

async fn service_with(cells: &[&str]) -> Result<(support::TestWorkspace, NotebookService)> {
    let workspace = support::TestWorkspace::new();
    let kernel = support::ScriptedKernel::new();
    let specs = cells.iter().map(|c| CellSpec::code(*c)).collect();
    let document = support::live_notebook(&workspace, kernel, specs).await?;
    Ok((workspace, NotebookService::new(document)))
}

#[tokio::test(flavor = "current_thread")]
async fn markdown_prepended_to_two_cells() -> Result<()> {
    let (_ws, service) = service_with(&["a", "b"]).await?;

    let response = service
        .insert(
            vec![CellSpec::markdown("# H")],
            Some(0),
            false,
            &ExecutionConfig::default(),
        )
        .await?;

    assert_eq!(response.cell_count, 3);
    assert_eq!(response.inserted, CellRange::new(0, 1));
    assert!(response.execution.is_none());

    let cells = service.cells(&ExecutionConfig::default()).cells;
    assert_eq!(cells[0].cell_type, CellKind::Markdown);
    assert_eq!(cells[0].content, "# H");
    assert!(cells[0].outputs.is_empty());
    assert_eq!(cells[1].content, "a");
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn delete_shifts_later_cells_down() -> Result<()> {
    let (_ws, service) = service_with(&["c0", "c1", "c2", "c3"]).await?;

    let response = service.delete(CellRange::new(1, 3)).await?;

    assert_eq!(response.cell_count, 2);
    assert_eq!(contents(&service), vec!["c0", "c3"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn insert_without_position_appends() -> Result<()> {
    let (_ws, service) = service_with(&["c0", "c1"]).await?;
    let config = ExecutionConfig::default();

    let appended = service
        .insert(vec![CellSpec::code("tail")], None, true, &config)
        .await?;
    let explicit = service
        .insert(vec![CellSpec::code("tail2")], Some(3), true, &config)
        .await?;

    assert_eq!(appended.inserted, CellRange::new(2, 3));
    assert_eq!(explicit.inserted, CellRange::new(3, 4));
    assert_eq!(contents(&service), vec!["c0", "c1", "tail", "tail2"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn replace_places_new_cells_at_start_and_adjusts_count() -> Result<()> {
    let (_ws, service) = service_with(&["c0", "c1", "c2", "c3", "c4"]).await?;

    let response = service
        .replace(
            CellRange::new(1, 4),
            vec![CellSpec::code("n0"), CellSpec::markdown("n1")],
            true,
            &ExecutionConfig::default(),
        )
        .await?;

    assert_eq!(response.replaced, CellRange::new(1, 4));
    assert_eq!(response.inserted, CellRange::new(1, 3));
    assert_eq!(response.cell_count, 5 + 2 - 3);
    assert_eq!(contents(&service), vec!["c0", "n0", "n1", "c4"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn replace_with_no_cells_behaves_like_delete() -> Result<()> {
    let (_ws, service) = service_with(&["c0", "c1", "c2"]).await?;

    let response = service
        .replace(CellRange::new(0, 2), Vec::new(), false, &ExecutionConfig::default())
        .await?;

    assert_eq!(response.inserted, CellRange::new(0, 0));
    assert!(response.execution.is_none());
    assert_eq!(contents(&service), vec!["c2"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn empty_ranges_fail_every_range_operation_without_mutating() -> Result<()> {
    let (_ws, service) = service_with(&["c0", "c1", "c2"]).await?;
    let config = ExecutionConfig::default();
    let empty = CellRange::new(1, 1);

    let err = service
        .replace(empty, vec![CellSpec::code("x")], true, &config)
        .await
        .unwrap_err();
    assert_matches!(err.downcast_ref::<RangeError>(), Some(RangeError::Empty { .. }));

    let err = service.execute(empty, &config).await.unwrap_err();
    assert_matches!(err.downcast_ref::<RangeError>(), Some(RangeError::Empty { .. }));

    let err = service.delete(empty).await.unwrap_err();
    assert_matches!(err.downcast_ref::<RangeError>(), Some(RangeError::Empty { .. }));

    assert_eq!(contents(&service), vec!["c0", "c1", "c2"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn out_of_bounds_requests_are_rejected_before_mutation() -> Result<()> {
    let (_ws, service) = service_with(&["c0", "c1"]).await?;
    let config = ExecutionConfig::default();

    let err = service
        .insert(vec![CellSpec::code("x")], Some(3), true, &config)
        .await
        .unwrap_err();
    assert_matches!(
        err.downcast_ref::<RangeError>(),
        Some(RangeError::Position {
            position: 3,
            count: 2
        })
    );

    let err = service
        .replace(CellRange::new(1, 3), vec![CellSpec::code("x")], true, &config)
        .await
        .unwrap_err();
    assert_matches!(
        err.downcast_ref::<RangeError>(),
        Some(RangeError::OutOfBounds { count: 2, .. })
    );

    let err = service
        .modify(2, "x".to_string(), true, &config)
        .await
        .unwrap_err();
    assert_matches!(
        err.downcast_ref::<RangeError>(),
        Some(RangeError::Index { index: 2, count: 2 })
    );

    assert_eq!(contents(&service), vec!["c0", "c1"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn modify_keeps_kind_and_marks_dirty() -> Result<()> {
    let workspace = support::TestWorkspace::new();
    let kernel = support::ScriptedKernel::new();
    let document = support::live_notebook(
        &workspace,
        kernel.clone(),
        vec![CellSpec::markdown("old"), CellSpec::code("print 1")],
    )
    .await?;
    let service = NotebookService::new(document);

    let response = service
        .modify(0, "new text".to_string(), false, &ExecutionConfig::default())
        .await?;

    assert_eq!(response.cell_type, CellKind::Markdown);
    assert!(response.execution.is_none());
    assert!(!response.outputs_cleared);
    assert!(kernel.executed().is_empty());
    assert!(service.info().dirty);
    assert_eq!(contents(&service), vec!["new text", "print 1"]);
    Ok(())
}
