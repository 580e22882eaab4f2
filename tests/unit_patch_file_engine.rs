use serde_json::json;
use sheetpatch_mcp::patch::model::{Backend, PatchRequest, PatchStatus};
use sheetpatch_mcp::patch::service::PatchOrchestrator;
use std::path::{Path, PathBuf};

mod support;
use support::TestWorkspace;
use support::builders::{CellVal, fill_sparse, fill_table};

fn file_request(path: PathBuf, ops: Vec<serde_json::Value>) -> PatchRequest {
    PatchRequest {
        path,
        ops,
        backend: Backend::File,
        dry_run: false,
        want_inverse_ops: false,
        preflight_formula_check: false,
        default_sheet: None,
        on_conflict: Default::default(),
        out_dir: None,
        out_name: None,
        allow_overwrite: false,
    }
}

fn cell_text(workspace: &TestWorkspace, path: &Path, sheet: &str, cell: &str) -> String {
    let book = workspace.read_workbook(path);
    book.get_sheet_by_name(sheet)
        .expect("sheet")
        .get_cell(cell)
        .map(|c| c.get_value().to_string())
        .unwrap_or_default()
}

#[test]
fn writes_values_formulas_and_new_sheets() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("report.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_sparse(sheet, &[("A1", CellVal::Num(1.0)), ("B1", CellVal::Num(2.0))]);
    });

    let request = file_request(
        input,
        vec![
            json!({"kind": "add_sheet", "sheet": "Notes"}),
            json!({"kind": "set_value", "sheet": "Sheet1", "cell": "A2", "value": "total"}),
            json!({"kind": "set_formula", "sheet": "Sheet1", "cell": "C1", "formula": "=SUM(A1:B1)"}),
        ],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.diff.len(), 3);
    assert!(result.diff.iter().all(|d| d.status == PatchStatus::Applied));

    let out = result.out_path.expect("output path");
    assert_eq!(out.file_name().unwrap().to_string_lossy(), "report_patched.xlsx");
    let book = workspace.read_workbook(&out);
    assert!(book.get_sheet_by_name("Notes").is_some());
    let sheet = book.get_sheet_by_name("Sheet1").unwrap();
    assert_eq!(sheet.get_cell("A2").unwrap().get_value(), "total");
    assert_eq!(sheet.get_cell("C1").unwrap().get_formula(), "SUM(A1:B1)");
}

#[test]
fn failure_mid_batch_writes_nothing() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("data.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_sparse(sheet, &[("A1", CellVal::Text("keep".into()))]);
    });

    let request = file_request(
        input.clone(),
        vec![
            json!({"kind": "set_value", "sheet": "Sheet1", "cell": "A1", "value": "changed"}),
            json!({"kind": "set_value", "sheet": "Missing", "cell": "A1", "value": 1}),
        ],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);

    let error = result.error.expect("expected failure");
    assert_eq!(error.op_index, Some(1));
    assert_eq!(error.error_code.as_deref(), Some("sheet_not_found"));
    assert!(error.message.contains("Missing"));

    assert!(result.out_path.is_none());
    assert!(!workspace.path("data_patched.xlsx").exists());
    assert_eq!(cell_text(&workspace, &input, "Sheet1", "A1"), "keep");
}

#[test]
fn conditional_write_skips_on_mismatch() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("cond.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_sparse(sheet, &[("A1", CellVal::Text("actual".into()))]);
    });

    let request = file_request(
        input,
        vec![
            json!({"kind": "set_value_if", "sheet": "Sheet1", "cell": "A1",
                   "expected": "something else", "value": "new"}),
        ],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);

    assert!(result.error.is_none());
    assert_eq!(result.diff.len(), 1);
    assert_eq!(result.diff[0].status, PatchStatus::Skipped);
    assert!(
        result
            .warnings
            .iter()
            .any(|w| w.contains("condition mismatch"))
    );

    let out = result.out_path.expect("output path");
    assert_eq!(cell_text(&workspace, &out, "Sheet1", "A1"), "actual");
}

#[test]
fn dry_run_reports_diff_without_writing() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("dry.xlsx", |_| {});

    let mut request = file_request(
        input.clone(),
        vec![json!({"kind": "set_value", "sheet": "Sheet1", "cell": "A1", "value": 7})],
    );
    request.dry_run = true;
    let result = PatchOrchestrator::file_only().run_patch(&request);

    assert!(result.error.is_none());
    assert!(result.out_path.is_none());
    assert_eq!(result.diff.len(), 1);
    assert!(!workspace.path("dry_patched.xlsx").exists());
    assert_eq!(cell_text(&workspace, &input, "Sheet1", "A1"), "");
}

#[test]
fn fill_formula_translates_relative_references() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("fill.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_table(
            sheet,
            "A1",
            &["x", "y"],
            &[[1, 10], [2, 20], [3, 30]],
        );
    });

    let request = file_request(
        input,
        vec![json!({"kind": "fill_formula", "sheet": "Sheet1", "range": "C2:C4",
                    "formula": "=A2+B$1"})],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let out = result.out_path.expect("output path");
    let book = workspace.read_workbook(&out);
    let sheet = book.get_sheet_by_name("Sheet1").unwrap();
    assert_eq!(sheet.get_cell("C2").unwrap().get_formula(), "A2+B$1");
    assert_eq!(sheet.get_cell("C3").unwrap().get_formula(), "A3+B$1");
    assert_eq!(sheet.get_cell("C4").unwrap().get_formula(), "A4+B$1");
}

#[test]
fn inverse_ops_undo_cell_writes() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("undo.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_sparse(
            sheet,
            &[("A1", CellVal::Text("original".into())), ("B1", CellVal::Num(5.0))],
        );
    });

    let mut request = file_request(
        input,
        vec![
            json!({"kind": "set_value", "sheet": "Sheet1", "cell": "A1", "value": "patched"}),
            json!({"kind": "set_value", "sheet": "Sheet1", "cell": "B1", "value": 99}),
            json!({"kind": "set_value", "sheet": "Sheet1", "cell": "C1", "value": "added"}),
        ],
    );
    request.want_inverse_ops = true;
    let result = PatchOrchestrator::file_only().run_patch(&request);
    assert!(result.error.is_none());
    assert_eq!(result.inverse_ops.len(), 3);
    let out = result.out_path.expect("output path");

    // Replay the undo script against the patched file.
    let undo_ops: Vec<serde_json::Value> = result
        .inverse_ops
        .iter()
        .map(|op| serde_json::to_value(op).unwrap())
        .collect();
    let mut undo_request = file_request(out, undo_ops);
    undo_request.out_name = Some("restored.xlsx".to_string());
    let undo_result = PatchOrchestrator::file_only().run_patch(&undo_request);
    assert!(undo_result.error.is_none(), "undo failed: {:?}", undo_result.error);

    let restored = undo_result.out_path.expect("restored path");
    assert_eq!(cell_text(&workspace, &restored, "Sheet1", "A1"), "original");
    assert_eq!(cell_text(&workspace, &restored, "Sheet1", "B1"), "5");
    assert_eq!(cell_text(&workspace, &restored, "Sheet1", "C1"), "");
}

#[test]
fn preflight_catches_error_tokens_before_saving() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("scan.xlsx", |_| {});

    let mut request = file_request(
        input,
        vec![json!({"kind": "set_formula", "sheet": "Sheet1", "cell": "A1",
                    "formula": "=SUM(#REF!)"})],
    );
    request.preflight_formula_check = true;
    let result = PatchOrchestrator::file_only().run_patch(&request);

    let error = result.error.expect("expected preflight failure");
    assert_eq!(error.op_index, Some(0));
    assert!(error.message.contains("#REF!"));
    assert!(!workspace.path("scan_patched.xlsx").exists());
}

#[test]
fn merge_into_existing_merge_fails() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("merge.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        sheet.add_merge_cells("A1:B2");
    });

    let request = file_request(
        input,
        vec![json!({"kind": "merge_cells", "sheet": "Sheet1", "range": "B2:C3"})],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);

    let error = result.error.expect("expected merge overlap failure");
    assert!(error.message.contains("overlaps"));
    assert!(!workspace.path("merge_patched.xlsx").exists());
}

#[test]
fn merge_warns_when_values_would_be_hidden() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("hide.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_sparse(
            sheet,
            &[("A1", CellVal::Text("anchor".into())), ("B1", CellVal::Text("hidden".into()))],
        );
    });

    let request = file_request(
        input,
        vec![json!({"kind": "merge_cells", "sheet": "Sheet1", "range": "A1:B1"})],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);

    assert!(result.error.is_none());
    assert!(result.warnings.iter().any(|w| w.contains("B1")));
    let out = result.out_path.expect("output path");
    let book = workspace.read_workbook(&out);
    let merged: Vec<String> = book
        .get_sheet_by_name("Sheet1")
        .unwrap()
        .get_merge_cells()
        .iter()
        .map(|r| r.get_range())
        .collect();
    assert_eq!(merged, vec!["A1:B1".to_string()]);
}

#[test]
fn style_ops_apply_and_report_snapshots() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("style.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_table(sheet, "A1", &["name", "qty"], &[["a", "1"], ["b", "2"]]);
    });

    let mut request = file_request(
        input,
        vec![
            json!({"kind": "set_style", "sheet": "Sheet1", "range": "A1:B1",
                   "bold": true, "fill_color": "#1F4E79", "font_color": "#FFFFFF"}),
            json!({"kind": "set_dimensions", "sheet": "Sheet1",
                   "columns": ["A", "B"], "column_width": 18.0}),
        ],
    );
    request.want_inverse_ops = true;
    let result = PatchOrchestrator::file_only().run_patch(&request);
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    // Design ops produce restore_design_snapshot inverses.
    assert!(
        result
            .inverse_ops
            .iter()
            .all(|op| op.kind_name() == "restore_design_snapshot")
    );

    let out = result.out_path.expect("output path");
    let book = workspace.read_workbook(&out);
    let sheet = book.get_sheet_by_name("Sheet1").unwrap();
    let style = sheet.get_cell("A1").unwrap().get_style();
    assert_eq!(style.get_font().unwrap().get_bold(), &true);
    assert_eq!(
        sheet.get_column_dimension("A").unwrap().get_width(),
        &18.0
    );
}

#[test]
fn set_range_values_writes_matrix_in_order() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("grid.xlsx", |_| {});

    let request = file_request(
        input,
        vec![json!({"kind": "set_range_values", "sheet": "Sheet1", "range": "A1:B2",
                    "values": [["h1", "h2"], [1, 2]]})],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);
    assert!(result.error.is_none());

    let out = result.out_path.expect("output path");
    assert_eq!(cell_text(&workspace, &out, "Sheet1", "A1"), "h1");
    assert_eq!(cell_text(&workspace, &out, "Sheet1", "B1"), "h2");
    assert_eq!(cell_text(&workspace, &out, "Sheet1", "A2"), "1");
    assert_eq!(cell_text(&workspace, &out, "Sheet1", "B2"), "2");
}

#[test]
fn apply_table_style_registers_a_table() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("table.xlsx", |book| {
        let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
        fill_table(sheet, "A1", &["region", "total"], &[["north", "10"], ["south", "20"]]);
    });

    let request = file_request(
        input,
        vec![json!({"kind": "apply_table_style", "sheet": "Sheet1", "range": "A1:B3",
                    "style_name": "TableStyleMedium9", "table_name": "Sales"})],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let out = result.out_path.expect("output path");
    let book = workspace.read_workbook(&out);
    let sheet = book.get_sheet_by_name("Sheet1").unwrap();
    assert_eq!(sheet.get_tables().len(), 1);
    assert_eq!(sheet.get_tables()[0].get_display_name(), "Sales");
}

#[test]
fn create_chart_is_rejected_on_the_file_backend() {
    let workspace = TestWorkspace::new();
    let input = workspace.create_workbook("chart.xlsx", |_| {});

    let request = file_request(
        input,
        vec![json!({"kind": "create_chart", "sheet": "Sheet1", "chart_type": "column",
                    "data_range": "A1:B5", "anchor_cell": "D2"})],
    );
    let result = PatchOrchestrator::file_only().run_patch(&request);

    let error = result.error.expect("expected policy failure");
    assert!(error.message.contains("live"));
    assert_eq!(error.error_code.as_deref(), Some("invalid_parameter"));
}
