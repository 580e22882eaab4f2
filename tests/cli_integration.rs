use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn write_fixture(path: &Path) {
    let mut workbook = umya_spreadsheet::new_file();
    let sheet = workbook
        .get_sheet_by_name_mut("Sheet1")
        .expect("default sheet exists");
    sheet.get_cell_mut("A1").set_value_number(1.0);
    umya_spreadsheet::writer::xlsx::write(&workbook, path).expect("write workbook");
}

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(assert_cmd::cargo::cargo_bin!("sheetpatch-cli"))
        .args(args)
        .output()
        .expect("run sheetpatch-cli")
}

fn parse_stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout utf8");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn cli_ops_lists_the_catalog() {
    let output = run_cli(&["ops"]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    let ops = payload["ops"].as_array().expect("ops array");
    assert!(
        ops.iter()
            .any(|entry| entry["kind"].as_str() == Some("set_value"))
    );
    assert_eq!(payload["count"].as_u64(), Some(ops.len() as u64));
}

#[test]
fn cli_describe_reports_required_fields() {
    let output = run_cli(&["describe", "merge_cells"]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    assert_eq!(payload["kind"].as_str(), Some("merge_cells"));
    let required = payload["required"].as_array().expect("required array");
    assert!(required.iter().any(|f| f.as_str() == Some("sheet")));
    assert_eq!(payload["target"].as_str(), Some("range"));
}

#[test]
fn cli_patch_applies_inline_ops() {
    let tmp = tempdir().expect("tempdir");
    let workbook_path = tmp.path().join("report.xlsx");
    write_fixture(&workbook_path);

    let output = run_cli(&[
        "patch",
        workbook_path.to_str().expect("path utf8"),
        r#"[{"kind": "set_value", "sheet": "Sheet1", "cell": "A1", "value": 42}]"#,
    ]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    assert!(payload["error"].is_null());
    assert_eq!(payload["diff"].as_array().map(Vec::len), Some(1));
    let out_path = payload["out_path"].as_str().expect("out_path");
    assert!(out_path.ends_with("report_patched.xlsx"));
    assert!(Path::new(out_path).exists());
}

#[test]
fn cli_patch_dry_run_writes_no_output() {
    let tmp = tempdir().expect("tempdir");
    let workbook_path = tmp.path().join("dry.xlsx");
    write_fixture(&workbook_path);

    let output = run_cli(&[
        "patch",
        workbook_path.to_str().expect("path utf8"),
        r#"[{"kind": "set_value", "sheet": "Sheet1", "cell": "A1", "value": 2}]"#,
        "--dry-run",
    ]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    assert!(payload["out_path"].is_null());
    assert_eq!(payload["diff"].as_array().map(Vec::len), Some(1));
    assert!(!tmp.path().join("dry_patched.xlsx").exists());
}

#[test]
fn cli_patch_reads_ops_from_file() {
    let tmp = tempdir().expect("tempdir");
    let workbook_path = tmp.path().join("from_file.xlsx");
    write_fixture(&workbook_path);
    let ops_path = tmp.path().join("ops.json");
    std::fs::write(
        &ops_path,
        r#"[{"kind": "set_formula", "sheet": "Sheet1", "cell": "B1", "formula": "=A1*10"}]"#,
    )
    .expect("write ops file");

    let output = run_cli(&[
        "patch",
        workbook_path.to_str().expect("path utf8"),
        &format!("@{}", ops_path.display()),
    ]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    assert!(payload["error"].is_null());
    assert_eq!(
        payload["diff"][0]["op"].as_str(),
        Some("set_formula")
    );
}

#[test]
fn cli_make_creates_a_workbook() {
    let tmp = tempdir().expect("tempdir");
    let target = tmp.path().join("fresh.xlsx");

    let output = run_cli(&[
        "make",
        target.to_str().expect("path utf8"),
        "--sheet-name",
        "Plan",
    ]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);
    assert!(target.exists());

    let book = umya_spreadsheet::reader::xlsx::read(&target).expect("read workbook");
    assert!(book.get_sheet_by_name("Plan").is_some());
}

#[test]
fn cli_rejects_csv_output() {
    let output = run_cli(&["--format", "csv", "ops"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr.clone()).expect("stderr utf8");
    assert!(stderr.contains("csv"), "stderr: {stderr}");
}
