use crate::patch::a1::{self, RangeBounds};
use crate::patch::error::{EngineFailure, PatchOpError};
use crate::patch::formula_scan;
use crate::patch::model::{
    AlignmentSnapshot, BorderSideSnapshot, BordersSnapshot, DesignSnapshot, DiffEntry,
    FillSnapshot, FontSnapshot, FormulaIssue, MergeStateSnapshot, PatchStatus, PatchValue,
};
use crate::patch::op::{HorizontalAlign, PatchOp, VerticalAlign};
use anyhow::Context;
use serde_json::{Value, json};
use std::path::Path;
use umya_spreadsheet::structs::{
    Border, EnumTrait, HorizontalAlignmentValues, Spreadsheet, Style, Table, TableColumn,
    TableStyleInfo, VerticalAlignmentValues, Worksheet,
};

const DEFAULT_COLUMN_WIDTH: f64 = 8.43;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileRunOptions {
    pub want_inverse_ops: bool,
    pub preflight_formula_check: bool,
}

#[derive(Debug, Default)]
pub struct FileEngineOutcome {
    pub diff: Vec<DiffEntry>,
    pub warnings: Vec<String>,
    /// Inverse ops in application order; the orchestrator reverses them.
    pub inverse_ops: Vec<PatchOp>,
    pub formula_issues: Vec<FormulaIssue>,
}

/// Apply all ops against the workbook at `input`, saving to `save_to`
/// only when every op applied or skipped cleanly. `save_to = None` is a
/// dry run: diffs are computed and nothing is persisted.
pub fn apply_ops_to_file(
    input: &Path,
    save_to: Option<&Path>,
    ops: &[PatchOp],
    options: FileRunOptions,
) -> Result<FileEngineOutcome, EngineFailure> {
    let mut book = umya_spreadsheet::reader::xlsx::read(input)
        .with_context(|| format!("failed to read workbook {}", input.display()))?;

    let mut ctx = EngineCtx {
        outcome: FileEngineOutcome::default(),
        written: Vec::new(),
        want_inverse: options.want_inverse_ops,
    };

    for (index, op) in ops.iter().enumerate() {
        apply_op(&mut book, index, op, &mut ctx).map_err(EngineFailure::Op)?;
    }

    for (sheet, cell, text) in &ctx.written {
        ctx.outcome
            .formula_issues
            .extend(formula_scan::scan_cell_text(sheet, cell, text));
    }

    if options.preflight_formula_check
        && formula_scan::has_error_level(&ctx.outcome.formula_issues)
    {
        let issue = ctx
            .outcome
            .formula_issues
            .iter()
            .find(|i| i.level == crate::patch::model::FormulaIssueLevel::Error)
            .cloned()
            .unwrap_or_else(|| unreachable!());
        let origin = find_issue_origin(ops, &issue);
        let (op_index, op) = origin.unwrap_or((0, &ops[0]));
        return Err(EngineFailure::Op(PatchOpError::from_op(
            op_index,
            op,
            format!("Preflight formula check failed: {}", issue.message),
            None,
        )));
    }

    if let Some(path) = save_to {
        save_workbook(&book, path)?;
    }

    Ok(ctx.outcome)
}

/// Stage the save next to the target so a failed write never leaves a
/// truncated output file.
fn save_workbook(book: &Spreadsheet, path: &Path) -> Result<(), EngineFailure> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".sheetpatch-")
        .suffix(".xlsx")
        .tempfile_in(dir)
        .with_context(|| format!("failed to stage output in {}", dir.display()))?;
    umya_spreadsheet::writer::xlsx::write(book, staged.path())
        .with_context(|| format!("failed to write workbook {}", path.display()))?;
    staged
        .persist(path)
        .with_context(|| format!("failed to persist workbook {}", path.display()))?;
    Ok(())
}

/// Locate the op that wrote the cell a preflight issue points at.
fn find_issue_origin<'a>(ops: &'a [PatchOp], issue: &FormulaIssue) -> Option<(usize, &'a PatchOp)> {
    let issue_bounds = a1::target_bounds(&issue.cell).ok()?;
    ops.iter().enumerate().find(|(_, op)| {
        if op.sheet() != issue.sheet {
            return false;
        }
        let locator = op.locator();
        if locator.is_empty() {
            return false;
        }
        a1::target_bounds(&locator)
            .map(|bounds| bounds.overlaps(&issue_bounds))
            .unwrap_or(false)
    })
}

struct EngineCtx {
    outcome: FileEngineOutcome,
    /// (sheet, cell, text) for every formula/value write, scanned later.
    written: Vec<(String, String, String)>,
    want_inverse: bool,
}

impl EngineCtx {
    fn push_diff(&mut self, entry: DiffEntry) {
        self.outcome.diff.push(entry);
    }

    fn warn(&mut self, message: String) {
        self.outcome.warnings.push(message);
    }

    fn record_write(&mut self, sheet: &str, cell: &str, text: &str) {
        self.written
            .push((sheet.to_string(), cell.to_string(), text.to_string()));
    }

    fn push_inverse(&mut self, op: PatchOp) {
        if self.want_inverse {
            self.outcome.inverse_ops.push(op);
        }
    }

    fn push_restore_inverse(&mut self, sheet: &str, snapshot: DesignSnapshot) {
        if self.want_inverse && !snapshot.is_empty() {
            self.outcome.inverse_ops.push(PatchOp::RestoreDesignSnapshot {
                sheet: sheet.to_string(),
                snapshot,
            });
        }
    }
}

fn apply_op(
    book: &mut Spreadsheet,
    index: usize,
    op: &PatchOp,
    ctx: &mut EngineCtx,
) -> Result<(), PatchOpError> {
    let fail = |message: String| PatchOpError::from_op(index, op, message, None);

    match op {
        PatchOp::AddSheet { sheet } => {
            book.new_sheet(sheet.clone())
                .map_err(|e| fail(format!("failed to create sheet '{sheet}': {e}")))?;
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: String::new(),
                before: None,
                after: Some(PatchValue::sheet(sheet.clone())),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
        PatchOp::SetValue { sheet, cell, value } => {
            apply_cell_write(book, index, op, ctx, sheet, cell, CellWrite::Value(value), None)
        }
        PatchOp::SetFormula { sheet, cell, formula } => {
            apply_cell_write(book, index, op, ctx, sheet, cell, CellWrite::Formula(formula), None)
        }
        PatchOp::SetValueIf { sheet, cell, expected, value } => apply_cell_write(
            book,
            index,
            op,
            ctx,
            sheet,
            cell,
            CellWrite::Value(value),
            Some(expected),
        ),
        PatchOp::SetFormulaIf { sheet, cell, expected, formula } => apply_cell_write(
            book,
            index,
            op,
            ctx,
            sheet,
            cell,
            CellWrite::Formula(formula),
            Some(expected),
        ),
        PatchOp::SetRangeValues { sheet, range, values } => {
            let bounds = bounds_or_fail(range, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let mut before_rows = Vec::with_capacity(values.len());
            for (row_offset, row) in values.iter().enumerate() {
                let mut before_row = Vec::with_capacity(row.len());
                for (col_offset, value) in row.iter().enumerate() {
                    let col = bounds.min_col + col_offset as u32;
                    let row_num = bounds.min_row + row_offset as u32;
                    let address = format!("{}{}", a1::column_index_to_label(col), row_num);
                    before_row.push(read_cell_json(worksheet, col, row_num));
                    write_json_value(worksheet, col, row_num, value);
                    ctx.record_write(sheet, &address, &json_display_string(value));
                }
                before_rows.push(before_row);
            }
            if ctx.want_inverse {
                for (row_offset, row) in before_rows.iter().enumerate() {
                    for (col_offset, before) in row.iter().enumerate() {
                        let col = bounds.min_col + col_offset as u32;
                        let row_num = bounds.min_row + row_offset as u32;
                        let address = format!("{}{}", a1::column_index_to_label(col), row_num);
                        ctx.push_inverse(inverse_cell_op(sheet, &address, before));
                    }
                }
            }
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: range.clone(),
                before: Some(PatchValue::value(Value::Array(
                    before_rows.into_iter().map(Value::Array).collect(),
                ))),
                after: Some(PatchValue::value(json!(values))),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
        PatchOp::FillFormula { sheet, range, formula } => {
            let bounds = bounds_or_fail(range, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let mut before_cells = Vec::new();
            for (col, row) in iter_bounds(&bounds) {
                let address = format!("{}{}", a1::column_index_to_label(col), row);
                let translated = translate_formula(
                    formula,
                    i64::from(col) - i64::from(bounds.min_col),
                    i64::from(row) - i64::from(bounds.min_row),
                );
                let before = read_cell_json(worksheet, col, row);
                ctx.push_inverse(inverse_cell_op(sheet, &address, &before));
                before_cells.push(before);
                let body = translated.trim_start_matches('=').to_string();
                worksheet.get_cell_mut((col, row)).set_formula(body);
                ctx.record_write(sheet, &address, &translated);
            }
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: range.clone(),
                before: Some(PatchValue::value(Value::Array(before_cells))),
                after: Some(PatchValue::formula(formula.clone())),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
        PatchOp::SetBold { sheet, bold, .. } => {
            let target = style_target(op, &fail)?;
            let bounds = bounds_or_fail(&target, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let snapshot = snapshot_fonts(worksheet, &bounds);
            for (col, row) in iter_bounds(&bounds) {
                let cell = worksheet.get_cell_mut((col, row));
                let mut style = cell.get_style().clone();
                style.get_font_mut().set_bold(*bold);
                cell.set_style(style);
            }
            finish_design_op(ctx, index, op, sheet, &target, snapshot, json!({"bold": bold}));
            Ok(())
        }
        PatchOp::SetFontSize { sheet, font_size, .. } => {
            let target = style_target(op, &fail)?;
            let bounds = bounds_or_fail(&target, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let snapshot = snapshot_fonts(worksheet, &bounds);
            for (col, row) in iter_bounds(&bounds) {
                let cell = worksheet.get_cell_mut((col, row));
                let mut style = cell.get_style().clone();
                style.get_font_mut().set_size(*font_size);
                cell.set_style(style);
            }
            finish_design_op(
                ctx,
                index,
                op,
                sheet,
                &target,
                snapshot,
                json!({"font_size": font_size}),
            );
            Ok(())
        }
        PatchOp::SetFontColor { sheet, font_color, .. } => {
            let target = style_target(op, &fail)?;
            let bounds = bounds_or_fail(&target, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let snapshot = snapshot_fonts(worksheet, &bounds);
            let argb = argb_from_canonical(font_color);
            for (col, row) in iter_bounds(&bounds) {
                let cell = worksheet.get_cell_mut((col, row));
                let mut style = cell.get_style().clone();
                style.get_font_mut().get_color_mut().set_argb(argb.as_str());
                cell.set_style(style);
            }
            finish_design_op(
                ctx,
                index,
                op,
                sheet,
                &target,
                snapshot,
                json!({"font_color": font_color}),
            );
            Ok(())
        }
        PatchOp::SetFillColor { sheet, fill_color, .. } => {
            let target = style_target(op, &fail)?;
            let bounds = bounds_or_fail(&target, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let snapshot = snapshot_fills(worksheet, &bounds);
            let argb = argb_from_canonical(fill_color);
            for (col, row) in iter_bounds(&bounds) {
                let cell = worksheet.get_cell_mut((col, row));
                let mut style = cell.get_style().clone();
                style.set_background_color(argb.clone());
                cell.set_style(style);
            }
            finish_design_op(
                ctx,
                index,
                op,
                sheet,
                &target,
                snapshot,
                json!({"fill_color": fill_color}),
            );
            Ok(())
        }
        PatchOp::SetDimensions { sheet, rows, row_height, columns, column_width } => {
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let mut snapshot = DesignSnapshot::default();
            if let (Some(rows), Some(height)) = (rows, row_height) {
                for row in rows {
                    let prior = worksheet
                        .get_row_dimension(row)
                        .map(|dim| *dim.get_height());
                    snapshot.row_dimensions.insert(row.to_string(), prior);
                    worksheet.get_row_dimension_mut(row).set_height(*height);
                }
            }
            if let (Some(columns), Some(width)) = (columns, column_width) {
                for label in columns {
                    let col = a1::column_label_to_index(label)
                        .map_err(|e| fail(e.to_string()))?;
                    let prior = worksheet
                        .get_column_dimension_by_number(&col)
                        .map(|dim| *dim.get_width());
                    snapshot.column_dimensions.insert(label.clone(), prior);
                    let dim = worksheet.get_column_dimension_by_number_mut(&col);
                    dim.set_width(*width);
                    dim.set_auto_width(false);
                }
            }
            let after = json!({
                "rows": rows,
                "row_height": row_height,
                "columns": columns,
                "column_width": column_width,
            });
            let snapshot_id = snapshot.stable_id();
            ctx.push_restore_inverse(sheet, snapshot);
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: String::new(),
                before: Some(PatchValue::dimension(json!({"snapshot_id": snapshot_id}))),
                after: Some(PatchValue::dimension(after)),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
        PatchOp::SetAlignment { sheet, horizontal_align, vertical_align, .. } => {
            let target = style_target(op, &fail)?;
            let bounds = bounds_or_fail(&target, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let snapshot = snapshot_alignments(worksheet, &bounds);
            for (col, row) in iter_bounds(&bounds) {
                let cell = worksheet.get_cell_mut((col, row));
                let mut style = cell.get_style().clone();
                apply_alignment(&mut style, *horizontal_align, *vertical_align);
                cell.set_style(style);
            }
            finish_design_op(
                ctx,
                index,
                op,
                sheet,
                &target,
                snapshot,
                json!({
                    "horizontal_align": horizontal_align.map(|h| h.as_str()),
                    "vertical_align": vertical_align.map(|v| v.as_str()),
                }),
            );
            Ok(())
        }
        PatchOp::SetStyle {
            sheet,
            bold,
            font_size,
            font_color,
            fill_color,
            horizontal_align,
            vertical_align,
            ..
        } => {
            let target = style_target(op, &fail)?;
            let bounds = bounds_or_fail(&target, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let mut snapshot = snapshot_fonts(worksheet, &bounds);
            merge_snapshot(&mut snapshot, snapshot_fills(worksheet, &bounds));
            merge_snapshot(&mut snapshot, snapshot_alignments(worksheet, &bounds));
            for (col, row) in iter_bounds(&bounds) {
                let cell = worksheet.get_cell_mut((col, row));
                let mut style = cell.get_style().clone();
                if let Some(bold) = bold {
                    style.get_font_mut().set_bold(*bold);
                }
                if let Some(size) = font_size {
                    style.get_font_mut().set_size(*size);
                }
                if let Some(color) = font_color {
                    let argb = argb_from_canonical(color);
                    style.get_font_mut().get_color_mut().set_argb(argb.as_str());
                }
                if let Some(color) = fill_color {
                    style.set_background_color(argb_from_canonical(color));
                }
                apply_alignment(&mut style, *horizontal_align, *vertical_align);
                cell.set_style(style);
            }
            finish_design_op(
                ctx,
                index,
                op,
                sheet,
                &target,
                snapshot,
                json!({
                    "bold": bold,
                    "font_size": font_size,
                    "font_color": font_color,
                    "fill_color": fill_color,
                    "horizontal_align": horizontal_align.map(|h| h.as_str()),
                    "vertical_align": vertical_align.map(|v| v.as_str()),
                }),
            );
            Ok(())
        }
        PatchOp::DrawGridBorder { sheet, base_cell, row_count, col_count } => {
            let (base_col_label, base_row) =
                a1::split_a1(base_cell).map_err(|e| fail(e.to_string()))?;
            let base_col = a1::column_label_to_index(&base_col_label)
                .map_err(|e| fail(e.to_string()))?;
            let bounds = RangeBounds {
                min_col: base_col,
                max_col: base_col + col_count - 1,
                min_row: base_row,
                max_row: base_row + row_count - 1,
            };
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let snapshot = snapshot_borders(worksheet, &bounds);
            for (col, row) in iter_bounds(&bounds) {
                let cell = worksheet.get_cell_mut((col, row));
                let mut style = cell.get_style().clone();
                let borders = style.get_borders_mut();
                set_thin_black(borders.get_left_border_mut());
                set_thin_black(borders.get_right_border_mut());
                set_thin_black(borders.get_top_border_mut());
                set_thin_black(borders.get_bottom_border_mut());
                cell.set_style(style);
            }
            let locator = format!(
                "{}:{}{}",
                base_cell,
                a1::column_index_to_label(bounds.max_col),
                bounds.max_row
            );
            finish_design_op(
                ctx,
                index,
                op,
                sheet,
                &locator,
                snapshot,
                json!({"border": "thin", "rows": row_count, "cols": col_count}),
            );
            Ok(())
        }
        PatchOp::MergeCells { sheet, range } => {
            let bounds = bounds_or_fail(range, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;

            let existing: Vec<String> = merged_ranges(worksheet);
            for merged in &existing {
                let merged_bounds = bounds_or_fail(merged, &fail)?;
                if merged_bounds.overlaps(&bounds) {
                    return Err(fail(format!(
                        "merge range {range} overlaps existing merged range {merged}"
                    )));
                }
            }

            let mut hidden = Vec::new();
            for (col, row) in iter_bounds(&bounds) {
                if col == bounds.min_col && row == bounds.min_row {
                    continue;
                }
                if let Some(cell) = worksheet.get_cell((col, row))
                    && !cell.get_value().is_empty()
                {
                    hidden.push(format!("{}{}", a1::column_index_to_label(col), row));
                }
            }
            if !hidden.is_empty() {
                ctx.warn(format!(
                    "Merging {range} hides existing values at {}",
                    hidden.join(", ")
                ));
            }

            let snapshot = DesignSnapshot {
                merge_state: Some(MergeStateSnapshot {
                    scope: range.clone(),
                    ranges: Vec::new(),
                }),
                ..Default::default()
            };
            worksheet.add_merge_cells(range.as_str());
            let snapshot_id = snapshot.stable_id();
            ctx.push_restore_inverse(sheet, snapshot);
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: range.clone(),
                before: Some(PatchValue::style(json!({"snapshot_id": snapshot_id}))),
                after: Some(PatchValue::style(json!({"merged": range}))),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
        PatchOp::UnmergeCells { sheet, range } => {
            let bounds = bounds_or_fail(range, &fail)?;
            let worksheet = sheet_mut(book, sheet, &fail)?;

            let mut removed = Vec::new();
            let mut kept = Vec::new();
            for merged in merged_ranges(worksheet) {
                match a1::range_bounds(&merged) {
                    Ok(merged_bounds) if merged_bounds.overlaps(&bounds) => removed.push(merged),
                    _ => kept.push(merged),
                }
            }
            worksheet.get_merge_cells_mut().clear();
            for merged in &kept {
                worksheet.add_merge_cells(merged.as_str());
            }

            let snapshot = DesignSnapshot {
                merge_state: Some(MergeStateSnapshot {
                    scope: range.clone(),
                    ranges: removed.clone(),
                }),
                ..Default::default()
            };
            let snapshot_id = snapshot.stable_id();
            ctx.push_restore_inverse(sheet, snapshot);
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: range.clone(),
                before: Some(PatchValue::style(json!({"snapshot_id": snapshot_id}))),
                after: Some(PatchValue::style(json!({"unmerged": removed}))),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
        PatchOp::AutoFitColumns { sheet, columns, min_width, max_width } => {
            let worksheet = sheet_mut(book, sheet, &fail)?;
            let targets: Vec<u32> = match columns {
                Some(labels) => labels
                    .iter()
                    .map(|label| a1::column_label_to_index(label))
                    .collect::<Result<_, _>>()
                    .map_err(|e| fail(e.to_string()))?,
                None => used_columns(worksheet),
            };

            let mut snapshot = DesignSnapshot::default();
            let mut widths = serde_json::Map::new();
            for col in &targets {
                let label = a1::column_index_to_label(*col);
                let prior = worksheet
                    .get_column_dimension_by_number(col)
                    .map(|dim| *dim.get_width());
                snapshot.column_dimensions.insert(label.clone(), prior);

                let mut width = estimate_column_width(worksheet, *col);
                if let Some(min) = min_width {
                    width = width.max(*min);
                }
                if let Some(max) = max_width {
                    width = width.min(*max);
                }
                let dim = worksheet.get_column_dimension_by_number_mut(col);
                dim.set_width(width);
                dim.set_best_fit(true);
                widths.insert(label, json!(width));
            }
            let snapshot_id = snapshot.stable_id();
            ctx.push_restore_inverse(sheet, snapshot);
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: String::new(),
                before: Some(PatchValue::dimension(json!({"snapshot_id": snapshot_id}))),
                after: Some(PatchValue::dimension(Value::Object(widths))),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
        PatchOp::ApplyTableStyle { sheet, range, style_name, table_name } => {
            apply_table_style(book, index, op, ctx, sheet, range, style_name, table_name.as_deref())
        }
        PatchOp::CreateChart { .. } => Err(fail(
            "create_chart is not supported by the file engine".to_string(),
        )),
        PatchOp::RestoreDesignSnapshot { sheet, snapshot } => {
            let worksheet = sheet_mut(book, sheet, &fail)?;
            restore_snapshot(worksheet, snapshot).map_err(|e| fail(e))?;
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.clone(),
                cell: String::new(),
                before: None,
                after: Some(PatchValue::style(json!({"snapshot_id": snapshot.stable_id()}))),
                status: PatchStatus::Applied,
            });
            Ok(())
        }
    }
}

enum CellWrite<'a> {
    Value(&'a Value),
    Formula(&'a str),
}

#[allow(clippy::too_many_arguments)]
fn apply_cell_write(
    book: &mut Spreadsheet,
    index: usize,
    op: &PatchOp,
    ctx: &mut EngineCtx,
    sheet: &str,
    cell: &str,
    write: CellWrite<'_>,
    expected: Option<&Value>,
) -> Result<(), PatchOpError> {
    let fail = |message: String| PatchOpError::from_op(index, op, message, None);
    let (col_label, row) = a1::split_a1(cell).map_err(|e| fail(e.to_string()))?;
    let col = a1::column_label_to_index(&col_label).map_err(|e| fail(e.to_string()))?;
    let worksheet = sheet_mut(book, sheet, &fail)?;

    let before = read_cell_json(worksheet, col, row);
    let before_value = cell_patch_value(&before);

    if let Some(expected) = expected {
        let current = display_string(worksheet, col, row);
        if current != json_display_string(expected) {
            ctx.warn(format!(
                "Skipped op[{index}] {} at {sheet}!{cell} due to condition mismatch.",
                op.kind_name()
            ));
            ctx.push_diff(DiffEntry {
                op_index: index,
                op: op.kind_name(),
                sheet: sheet.to_string(),
                cell: cell.to_string(),
                before: before_value.clone(),
                after: before_value,
                status: PatchStatus::Skipped,
            });
            return Ok(());
        }
    }

    let (after_value, written_text) = match &write {
        CellWrite::Value(value) => (
            PatchValue::value((*value).clone()),
            json_display_string(value),
        ),
        CellWrite::Formula(formula) => (PatchValue::formula(*formula), (*formula).to_string()),
    };

    // A no-op write is recorded as skipped, without the mismatch warning.
    if before_value.as_ref() == Some(&after_value) {
        ctx.push_diff(DiffEntry {
            op_index: index,
            op: op.kind_name(),
            sheet: sheet.to_string(),
            cell: cell.to_string(),
            before: before_value.clone(),
            after: before_value,
            status: PatchStatus::Skipped,
        });
        return Ok(());
    }

    match write {
        CellWrite::Value(value) => write_json_value(worksheet, col, row, value),
        CellWrite::Formula(formula) => {
            let body = formula.trim_start_matches('=').to_string();
            worksheet.get_cell_mut((col, row)).set_formula(body);
        }
    }
    ctx.record_write(sheet, cell, &written_text);
    ctx.push_inverse(inverse_cell_op(sheet, cell, &before));

    ctx.push_diff(DiffEntry {
        op_index: index,
        op: op.kind_name(),
        sheet: sheet.to_string(),
        cell: cell.to_string(),
        before: before_value,
        after: Some(after_value),
        status: PatchStatus::Applied,
    });
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_table_style(
    book: &mut Spreadsheet,
    index: usize,
    op: &PatchOp,
    ctx: &mut EngineCtx,
    sheet: &str,
    range: &str,
    style_name: &str,
    table_name: Option<&str>,
) -> Result<(), PatchOpError> {
    let fail = |message: String| PatchOpError::from_op(index, op, message, None);
    let bounds = bounds_or_fail(range, &fail)?;

    let mut existing_names: Vec<String> = Vec::new();
    for worksheet in book.get_sheet_collection() {
        for table in worksheet.get_tables() {
            existing_names.push(table.get_display_name().to_string());
        }
    }

    let worksheet = sheet_mut(book, sheet, &fail)?;
    for table in worksheet.get_tables() {
        let area = table.get_area();
        let table_bounds = RangeBounds {
            min_col: *area.0.get_col_num(),
            max_col: *area.1.get_col_num(),
            min_row: *area.0.get_row_num(),
            max_row: *area.1.get_row_num(),
        };
        if table_bounds.overlaps(&bounds) {
            return Err(fail(format!(
                "range {range} intersects existing table '{}'",
                table.get_display_name()
            )));
        }
    }

    let name = match table_name {
        Some(name) => {
            if existing_names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                return Err(fail(format!("table name '{name}' already exists")));
            }
            name.to_string()
        }
        None => next_table_name(&existing_names),
    };

    let anchor = format!("{}{}", a1::column_index_to_label(bounds.min_col), bounds.min_row);
    let end = format!("{}{}", a1::column_index_to_label(bounds.max_col), bounds.max_row);
    let mut table = Table::new(name.as_str(), (anchor.as_str(), end.as_str()));
    for col in bounds.min_col..=bounds.max_col {
        let header = worksheet
            .get_cell((col, bounds.min_row))
            .map(|cell| cell.get_value().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| format!("Column{}", col - bounds.min_col + 1));
        let mut column = TableColumn::default();
        column.set_name(header);
        table.add_column(column);
    }
    let style_info = TableStyleInfo::new(style_name, false, false, true, false);
    table.set_style_info(Some(style_info));
    worksheet.add_table(table);

    ctx.push_diff(DiffEntry {
        op_index: index,
        op: op.kind_name(),
        sheet: sheet.to_string(),
        cell: range.to_string(),
        before: None,
        after: Some(PatchValue::style(json!({
            "table_name": name,
            "style_name": style_name,
            "range": range,
        }))),
        status: PatchStatus::Applied,
    });
    Ok(())
}

fn next_table_name(existing: &[String]) -> String {
    let mut index = existing.len() + 1;
    loop {
        let candidate = format!("Table{index}");
        if !existing.iter().any(|n| n.eq_ignore_ascii_case(&candidate)) {
            return candidate;
        }
        index += 1;
    }
}

fn sheet_mut<'a>(
    book: &'a mut Spreadsheet,
    name: &str,
    fail: &impl Fn(String) -> PatchOpError,
) -> Result<&'a mut Worksheet, PatchOpError> {
    book.get_sheet_by_name_mut(name)
        .ok_or_else(|| fail(format!("Sheet '{name}' not found")))
}

fn bounds_or_fail(
    target: &str,
    fail: &impl Fn(String) -> PatchOpError,
) -> Result<RangeBounds, PatchOpError> {
    a1::target_bounds(target).map_err(|e| fail(e.to_string()))
}

fn style_target(
    op: &PatchOp,
    fail: &impl Fn(String) -> PatchOpError,
) -> Result<String, PatchOpError> {
    op.style_target()
        .map(str::to_string)
        .ok_or_else(|| fail("one of 'cell' or 'range' is required".to_string()))
}

fn iter_bounds(bounds: &RangeBounds) -> impl Iterator<Item = (u32, u32)> + '_ {
    (bounds.min_row..=bounds.max_row)
        .flat_map(move |row| (bounds.min_col..=bounds.max_col).map(move |col| (col, row)))
}

fn merged_ranges(worksheet: &Worksheet) -> Vec<String> {
    worksheet
        .get_merge_cells()
        .iter()
        .map(|range| range.get_range())
        .collect()
}

fn used_columns(worksheet: &Worksheet) -> Vec<u32> {
    let mut columns: Vec<u32> = worksheet
        .get_cell_collection()
        .iter()
        .map(|cell| *cell.get_coordinate().get_col_num())
        .collect();
    columns.sort_unstable();
    columns.dedup();
    columns
}

/// Width heuristic: longest rendered text in the column plus padding,
/// defaulting to the standard column width for empty columns.
fn estimate_column_width(worksheet: &Worksheet, col: u32) -> f64 {
    let mut max_len = 0usize;
    for cell in worksheet.get_cell_collection() {
        if *cell.get_coordinate().get_col_num() != col {
            continue;
        }
        max_len = max_len.max(cell.get_value().chars().count());
    }
    if max_len == 0 {
        DEFAULT_COLUMN_WIDTH
    } else {
        max_len as f64 + 2.0
    }
}

fn display_string(worksheet: &Worksheet, col: u32, row: u32) -> String {
    worksheet
        .get_cell((col, row))
        .map(|cell| cell.get_value().to_string())
        .unwrap_or_default()
}

/// Prior cell content as JSON: null for empty, a formula marker object,
/// or the displayed value (numeric when it parses).
fn read_cell_json(worksheet: &Worksheet, col: u32, row: u32) -> Value {
    let Some(cell) = worksheet.get_cell((col, row)) else {
        return Value::Null;
    };
    let formula = cell.get_formula();
    if !formula.is_empty() {
        return json!({"formula": format!("={formula}")});
    }
    let text = cell.get_value().to_string();
    if text.is_empty() {
        return Value::Null;
    }
    if let Ok(number) = text.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(number) {
            return Value::Number(number);
        }
    }
    Value::String(text)
}

fn cell_patch_value(before: &Value) -> Option<PatchValue> {
    match before {
        Value::Null => None,
        Value::Object(map) => map
            .get("formula")
            .and_then(Value::as_str)
            .map(PatchValue::formula),
        other => Some(PatchValue::value(other.clone())),
    }
}

/// Inverse op for a cell write, from its prior JSON state.
fn inverse_cell_op(sheet: &str, cell: &str, before: &Value) -> PatchOp {
    match before {
        Value::Object(map) => match map.get("formula").and_then(Value::as_str) {
            Some(formula) => PatchOp::SetFormula {
                sheet: sheet.to_string(),
                cell: cell.to_string(),
                formula: formula.to_string(),
            },
            None => PatchOp::SetValue {
                sheet: sheet.to_string(),
                cell: cell.to_string(),
                value: Value::Null,
            },
        },
        other => PatchOp::SetValue {
            sheet: sheet.to_string(),
            cell: cell.to_string(),
            value: other.clone(),
        },
    }
}

fn write_json_value(worksheet: &mut Worksheet, col: u32, row: u32, value: &Value) {
    let cell = worksheet.get_cell_mut((col, row));
    match value {
        Value::Null => {
            cell.set_value("");
        }
        Value::Bool(flag) => {
            cell.set_value_bool(*flag);
        }
        Value::Number(number) => {
            cell.set_value_number(number.as_f64().unwrap_or_default());
        }
        other => {
            let text = match other {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            cell.set_value(text);
        }
    }
}

pub(crate) fn json_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => if *flag { "TRUE" } else { "FALSE" }.to_string(),
        Value::Number(number) => match number.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            Some(f) => f.to_string(),
            None => number.to_string(),
        },
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Shift relative A1 references in a formula by (col_delta, row_delta).
/// `$` locks pin the respective axis, matching host fill behavior.
fn translate_formula(formula: &str, col_delta: i64, row_delta: i64) -> String {
    use once_cell::sync::Lazy;
    use regex::{Captures, Regex};
    static REF_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)([1-9][0-9]*)").expect("regex"));

    REF_RE
        .replace_all(formula, |caps: &Captures<'_>| {
            let col_locked = &caps[1] == "$";
            let row_locked = &caps[3] == "$";
            let col_label = caps[2].to_ascii_uppercase();
            let row: i64 = caps[4].parse().unwrap_or(1);

            let col = match a1::column_label_to_index(&col_label) {
                Ok(col) => i64::from(col),
                Err(_) => return caps[0].to_string(),
            };
            let new_col = if col_locked { col } else { (col + col_delta).max(1) };
            let new_row = if row_locked { row } else { (row + row_delta).max(1) };
            format!(
                "{}{}{}{}",
                if col_locked { "$" } else { "" },
                a1::column_index_to_label(new_col as u32),
                if row_locked { "$" } else { "" },
                new_row
            )
        })
        .to_string()
}

fn set_thin_black(border: &mut Border) {
    border.set_border_style(Border::BORDER_THIN);
    border.get_color_mut().set_argb("FF000000");
}

fn horizontal_from_str(value: &str) -> Option<HorizontalAlignmentValues> {
    match value {
        "left" => Some(HorizontalAlignmentValues::Left),
        "center" => Some(HorizontalAlignmentValues::Center),
        "centerContinuous" => Some(HorizontalAlignmentValues::CenterContinuous),
        "right" => Some(HorizontalAlignmentValues::Right),
        "fill" => Some(HorizontalAlignmentValues::Fill),
        "justify" => Some(HorizontalAlignmentValues::Justify),
        "distributed" => Some(HorizontalAlignmentValues::Distributed),
        "general" => Some(HorizontalAlignmentValues::General),
        _ => None,
    }
}

fn vertical_from_str(value: &str) -> Option<VerticalAlignmentValues> {
    match value {
        "top" => Some(VerticalAlignmentValues::Top),
        "center" => Some(VerticalAlignmentValues::Center),
        "bottom" => Some(VerticalAlignmentValues::Bottom),
        "justify" => Some(VerticalAlignmentValues::Justify),
        "distributed" => Some(VerticalAlignmentValues::Distributed),
        _ => None,
    }
}

fn apply_alignment(
    style: &mut Style,
    horizontal: Option<HorizontalAlign>,
    vertical: Option<VerticalAlign>,
) {
    let alignment = style.get_alignment_mut();
    if let Some(horizontal) = horizontal {
        alignment.set_horizontal(match horizontal {
            HorizontalAlign::Left => HorizontalAlignmentValues::Left,
            HorizontalAlign::Center => HorizontalAlignmentValues::Center,
            HorizontalAlign::Right => HorizontalAlignmentValues::Right,
        });
    }
    if let Some(vertical) = vertical {
        alignment.set_vertical(match vertical {
            VerticalAlign::Top => VerticalAlignmentValues::Top,
            VerticalAlign::Center => VerticalAlignmentValues::Center,
            VerticalAlign::Bottom => VerticalAlignmentValues::Bottom,
        });
    }
}

/// Canonical '#AARRGGBB' to the bare ARGB form umya stores.
fn argb_from_canonical(color: &str) -> String {
    color.trim_start_matches('#').to_string()
}

fn finish_design_op(
    ctx: &mut EngineCtx,
    index: usize,
    op: &PatchOp,
    sheet: &str,
    locator: &str,
    snapshot: DesignSnapshot,
    after: Value,
) {
    let snapshot_id = snapshot.stable_id();
    ctx.push_restore_inverse(sheet, snapshot);
    ctx.push_diff(DiffEntry {
        op_index: index,
        op: op.kind_name(),
        sheet: sheet.to_string(),
        cell: locator.to_string(),
        before: Some(PatchValue::style(json!({"snapshot_id": snapshot_id}))),
        after: Some(PatchValue::style(after)),
        status: PatchStatus::Applied,
    });
}

fn merge_snapshot(target: &mut DesignSnapshot, source: DesignSnapshot) {
    target.borders.extend(source.borders);
    target.fonts.extend(source.fonts);
    target.fills.extend(source.fills);
    target.alignments.extend(source.alignments);
    if target.merge_state.is_none() {
        target.merge_state = source.merge_state;
    }
    target.row_dimensions.extend(source.row_dimensions);
    target.column_dimensions.extend(source.column_dimensions);
}

fn snapshot_fonts(worksheet: &Worksheet, bounds: &RangeBounds) -> DesignSnapshot {
    let mut snapshot = DesignSnapshot::default();
    for (col, row) in iter_bounds(bounds) {
        let address = format!("{}{}", a1::column_index_to_label(col), row);
        let font = worksheet
            .get_cell((col, row))
            .and_then(|cell| cell.get_style().get_font())
            .map(|font| FontSnapshot {
                bold: Some(*font.get_bold()),
                size: Some(*font.get_size()),
                color: Some(font.get_color().get_argb().to_string())
                    .filter(|argb| !argb.is_empty()),
            })
            .unwrap_or_default();
        snapshot.fonts.insert(address, font);
    }
    snapshot
}

fn snapshot_fills(worksheet: &Worksheet, bounds: &RangeBounds) -> DesignSnapshot {
    let mut snapshot = DesignSnapshot::default();
    for (col, row) in iter_bounds(bounds) {
        let address = format!("{}{}", a1::column_index_to_label(col), row);
        let fill = worksheet
            .get_cell((col, row))
            .and_then(|cell| cell.get_style().get_fill())
            .and_then(|fill| fill.get_pattern_fill())
            .map(|pattern| FillSnapshot {
                pattern_type: Some(pattern.get_pattern_type().get_value_string().to_string())
                    .filter(|kind| !kind.eq_ignore_ascii_case("none")),
                foreground_color: pattern
                    .get_foreground_color()
                    .map(|color| color.get_argb().to_string())
                    .filter(|argb| !argb.is_empty()),
            })
            .unwrap_or_default();
        snapshot.fills.insert(address, fill);
    }
    snapshot
}

fn snapshot_alignments(worksheet: &Worksheet, bounds: &RangeBounds) -> DesignSnapshot {
    let mut snapshot = DesignSnapshot::default();
    for (col, row) in iter_bounds(bounds) {
        let address = format!("{}{}", a1::column_index_to_label(col), row);
        let alignment = worksheet
            .get_cell((col, row))
            .and_then(|cell| cell.get_style().get_alignment())
            .map(|alignment| AlignmentSnapshot {
                horizontal: Some(
                    alignment.get_horizontal().get_value_string().to_string(),
                )
                .filter(|value| !value.eq_ignore_ascii_case("general")),
                vertical: Some(alignment.get_vertical().get_value_string().to_string())
                    .filter(|value| !value.eq_ignore_ascii_case("bottom")),
            })
            .unwrap_or_default();
        snapshot.alignments.insert(address, alignment);
    }
    snapshot
}

fn snapshot_borders(worksheet: &Worksheet, bounds: &RangeBounds) -> DesignSnapshot {
    let mut snapshot = DesignSnapshot::default();
    for (col, row) in iter_bounds(bounds) {
        let address = format!("{}{}", a1::column_index_to_label(col), row);
        let borders = worksheet
            .get_cell((col, row))
            .and_then(|cell| cell.get_style().get_borders())
            .map(|borders| BordersSnapshot {
                left: border_side_snapshot(borders.get_left_border()),
                right: border_side_snapshot(borders.get_right_border()),
                top: border_side_snapshot(borders.get_top_border()),
                bottom: border_side_snapshot(borders.get_bottom_border()),
            })
            .unwrap_or_default();
        snapshot.borders.insert(address, borders);
    }
    snapshot
}

fn border_side_snapshot(border: &Border) -> Option<BorderSideSnapshot> {
    let style = border.get_border_style();
    if style.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(BorderSideSnapshot {
        style: Some(style.to_string()),
        color: Some(border.get_color().get_argb().to_string()).filter(|argb| !argb.is_empty()),
    })
}

/// Re-apply a captured snapshot: fonts, fills, alignments, borders,
/// dimensions, and merge membership within the snapshot scope.
fn restore_snapshot(worksheet: &mut Worksheet, snapshot: &DesignSnapshot) -> Result<(), String> {
    for (address, font) in &snapshot.fonts {
        let (col, row) = parse_address(address)?;
        let cell = worksheet.get_cell_mut((col, row));
        let mut style = cell.get_style().clone();
        {
            let target = style.get_font_mut();
            if let Some(bold) = font.bold {
                target.set_bold(bold);
            }
            if let Some(size) = font.size {
                target.set_size(size);
            }
            if let Some(color) = &font.color {
                target.get_color_mut().set_argb(color.as_str());
            }
        }
        cell.set_style(style);
    }
    for (address, fill) in &snapshot.fills {
        let (col, row) = parse_address(address)?;
        let cell = worksheet.get_cell_mut((col, row));
        let mut style = cell.get_style().clone();
        match &fill.foreground_color {
            Some(color) => {
                style.set_background_color(color.clone());
            }
            None => {
                style.set_fill(umya_spreadsheet::structs::Fill::default());
            }
        }
        cell.set_style(style);
    }
    for (address, alignment) in &snapshot.alignments {
        let (col, row) = parse_address(address)?;
        let cell = worksheet.get_cell_mut((col, row));
        let mut style = cell.get_style().clone();
        {
            let target = style.get_alignment_mut();
            target.set_horizontal(
                alignment
                    .horizontal
                    .as_deref()
                    .and_then(horizontal_from_str)
                    .unwrap_or(HorizontalAlignmentValues::General),
            );
            target.set_vertical(
                alignment
                    .vertical
                    .as_deref()
                    .and_then(vertical_from_str)
                    .unwrap_or(VerticalAlignmentValues::Bottom),
            );
        }
        cell.set_style(style);
    }
    for (address, borders) in &snapshot.borders {
        let (col, row) = parse_address(address)?;
        let cell = worksheet.get_cell_mut((col, row));
        let mut style = cell.get_style().clone();
        {
            let target = style.get_borders_mut();
            restore_border_side(target.get_left_border_mut(), borders.left.as_ref());
            restore_border_side(target.get_right_border_mut(), borders.right.as_ref());
            restore_border_side(target.get_top_border_mut(), borders.top.as_ref());
            restore_border_side(target.get_bottom_border_mut(), borders.bottom.as_ref());
        }
        cell.set_style(style);
    }
    for (row, height) in &snapshot.row_dimensions {
        let row: u32 = row
            .parse()
            .map_err(|_| format!("invalid row key '{row}' in snapshot"))?;
        if let Some(height) = height {
            worksheet.get_row_dimension_mut(&row).set_height(*height);
        }
    }
    for (label, width) in &snapshot.column_dimensions {
        let col = a1::column_label_to_index(label).map_err(|e| e.to_string())?;
        if let Some(width) = width {
            worksheet
                .get_column_dimension_by_number_mut(&col)
                .set_width(*width);
        }
    }
    if let Some(merge_state) = &snapshot.merge_state {
        let scope_bounds =
            a1::range_bounds(&merge_state.scope).map_err(|e| e.to_string())?;
        let kept: Vec<String> = merged_ranges(worksheet)
            .into_iter()
            .filter(|merged| {
                a1::range_bounds(merged)
                    .map(|bounds| !bounds.overlaps(&scope_bounds))
                    .unwrap_or(true)
            })
            .collect();
        worksheet.get_merge_cells_mut().clear();
        for merged in kept.iter().chain(merge_state.ranges.iter()) {
            worksheet.add_merge_cells(merged.as_str());
        }
    }
    Ok(())
}

fn restore_border_side(border: &mut Border, snapshot: Option<&BorderSideSnapshot>) {
    match snapshot {
        Some(side) => {
            if let Some(style) = &side.style {
                border.set_border_style(style.clone());
            }
            if let Some(color) = &side.color {
                border.get_color_mut().set_argb(color.as_str());
            }
        }
        None => {
            border.set_border_style(Border::BORDER_NONE);
        }
    }
}

fn parse_address(address: &str) -> Result<(u32, u32), String> {
    let (label, row) = a1::split_a1(address).map_err(|e| e.to_string())?;
    let col = a1::column_label_to_index(&label).map_err(|e| e.to_string())?;
    Ok((col, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_shifts_relative_refs_only() {
        assert_eq!(translate_formula("=A1+B1", 0, 1), "=A2+B2");
        assert_eq!(translate_formula("=$A$1+B1", 0, 3), "=$A$1+B4");
        assert_eq!(translate_formula("=SUM(A1:A5)", 1, 0), "=SUM(B1:B5)");
        assert_eq!(translate_formula("=$A1+A$1", 1, 1), "=$A2+B$1");
    }

    #[test]
    fn json_display_matches_host_rendering() {
        assert_eq!(json_display_string(&json!(42)), "42");
        assert_eq!(json_display_string(&json!(1.5)), "1.5");
        assert_eq!(json_display_string(&json!(true)), "TRUE");
        assert_eq!(json_display_string(&json!("x")), "x");
        assert_eq!(json_display_string(&Value::Null), "");
    }

    #[test]
    fn table_names_skip_taken_slots() {
        let existing = vec!["Table1".to_string(), "table2".to_string()];
        assert_eq!(next_table_name(&existing), "Table3");
        assert_eq!(next_table_name(&[]), "Table1");
    }

    #[test]
    fn inverse_for_empty_cell_clears_it() {
        let inverse = inverse_cell_op("S", "A1", &Value::Null);
        assert_eq!(
            inverse,
            PatchOp::SetValue {
                sheet: "S".to_string(),
                cell: "A1".to_string(),
                value: Value::Null,
            }
        );
    }

    #[test]
    fn inverse_restores_prior_formula() {
        let inverse = inverse_cell_op("S", "A1", &json!({"formula": "=SUM(B1:B2)"}));
        assert_eq!(
            inverse,
            PatchOp::SetFormula {
                sheet: "S".to_string(),
                cell: "A1".to_string(),
                formula: "=SUM(B1:B2)".to_string(),
            }
        );
    }
}
