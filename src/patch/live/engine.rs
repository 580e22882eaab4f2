use crate::patch::a1;
use crate::patch::chart;
use crate::patch::engine_file::json_display_string;
use crate::patch::error::{EngineFailure, PatchOpError};
use crate::patch::live::dispatch::{
    ComValue, Dispatch, DispatchError, DispatchRef, collection_item, member_object,
    resolve_collection,
};
use crate::patch::model::{DiffEntry, PatchStatus, PatchValue};
use crate::patch::op::{HorizontalAlign, PatchOp, VerticalAlign};
use anyhow::anyhow;
use serde_json::{Value, json};
use std::path::Path;
use tracing::debug;

const DEFAULT_CHART_WIDTH: f64 = 360.0;
const DEFAULT_CHART_HEIGHT: f64 = 220.0;

// XlHAlign / XlVAlign
const XL_HALIGN_LEFT: i32 = -4131;
const XL_HALIGN_CENTER: i32 = -4108;
const XL_HALIGN_RIGHT: i32 = -4152;
const XL_VALIGN_TOP: i32 = -4160;
const XL_VALIGN_CENTER: i32 = -4108;
const XL_VALIGN_BOTTOM: i32 = -4107;

// XlBordersIndex: left, top, bottom, right
const BORDER_EDGES: [i32; 4] = [7, 8, 9, 10];
const XL_LINE_CONTINUOUS: i32 = 1;

// XlRowCol
const XL_PLOT_BY_ROWS: i32 = 1;
const XL_PLOT_BY_COLUMNS: i32 = 2;

// XlAxisType
const XL_CATEGORY_AXIS: i32 = 1;
const XL_VALUE_AXIS: i32 = 2;

#[derive(Debug, Default)]
pub struct LiveEngineOutcome {
    pub diff: Vec<DiffEntry>,
    pub warnings: Vec<String>,
}

/// Patch executor speaking to a running spreadsheet host through the
/// late-bound [`Dispatch`] seam. The host owns recalculation and all
/// object semantics; this engine sequences member accesses and maps
/// failures onto per-op errors.
pub struct LiveEngine {
    app: DispatchRef,
}

impl LiveEngine {
    pub fn new(app: DispatchRef) -> Self {
        Self { app }
    }

    /// Open `input`, apply every op, save to `save_to`, close the book.
    /// The workbook is closed without saving when any op fails.
    pub fn run(
        &self,
        input: &Path,
        save_to: &Path,
        ops: &[PatchOp],
    ) -> Result<LiveEngineOutcome, EngineFailure> {
        let workbooks = resolve_collection(&*self.app, "Workbooks")
            .map_err(|e| anyhow!("failed to reach Workbooks: {e}"))?;
        let opened = workbooks
            .call("Open", &[ComValue::str(path_text(input))])
            .map_err(|e| anyhow!("failed to open {}: {e}", input.display()))?;
        let workbook = opened
            .as_obj()
            .ok_or_else(|| anyhow!("Workbooks.Open returned no workbook"))?;

        let mut outcome = LiveEngineOutcome::default();
        for (index, op) in ops.iter().enumerate() {
            if let Err(err) = self.apply_op(&workbook, index, op, &mut outcome) {
                // Discard the half-applied book so the input stays intact.
                let _ = workbook.call("Close", &[ComValue::Bool(false)]);
                return Err(EngineFailure::Op(err));
            }
        }

        workbook
            .call("SaveAs", &[ComValue::str(path_text(save_to))])
            .map_err(|e| anyhow!("failed to save {}: {e}", save_to.display()))?;
        workbook
            .call("Close", &[ComValue::Bool(false)])
            .map_err(|e| anyhow!("failed to close workbook: {e}"))?;
        debug!(ops = ops.len(), out = %save_to.display(), "live apply complete");
        Ok(outcome)
    }

    fn apply_op(
        &self,
        workbook: &DispatchRef,
        index: usize,
        op: &PatchOp,
        outcome: &mut LiveEngineOutcome,
    ) -> Result<(), PatchOpError> {
        let fail = |message: String| PatchOpError::from_op(index, op, message, None);

        match op {
            PatchOp::AddSheet { sheet } => {
                let sheets = resolve_collection(&**workbook, "Worksheets")
                    .map_err(|e| fail(e.message))?;
                let added = sheets.call("Add", &[]).map_err(|e| fail(e.message))?;
                let added = added
                    .as_obj()
                    .ok_or_else(|| fail("Worksheets.Add returned no sheet".to_string()))?;
                added
                    .put("Name", ComValue::str(sheet.clone()))
                    .map_err(|e| fail(format!("failed to name new sheet '{sheet}': {e}")))?;
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    "",
                    None,
                    Some(PatchValue::sheet(sheet.clone())),
                ));
                Ok(())
            }
            PatchOp::SetValue { sheet, cell, value } => {
                self.cell_write(workbook, index, op, outcome, sheet, cell, Write::Value(value), None)
            }
            PatchOp::SetFormula { sheet, cell, formula } => self.cell_write(
                workbook, index, op, outcome, sheet, cell, Write::Formula(formula), None,
            ),
            PatchOp::SetValueIf { sheet, cell, expected, value } => self.cell_write(
                workbook, index, op, outcome, sheet, cell, Write::Value(value), Some(expected),
            ),
            PatchOp::SetFormulaIf { sheet, cell, expected, formula } => self.cell_write(
                workbook, index, op, outcome, sheet, cell, Write::Formula(formula), Some(expected),
            ),
            PatchOp::SetRangeValues { sheet, range, values } => {
                let target = self.sheet_range(workbook, sheet, range, &fail)?;
                let before = target.get("Value", &[]).map(|v| v.to_json()).unwrap_or(Value::Null);
                let rows: Vec<ComValue> = values
                    .iter()
                    .map(|row| ComValue::Array(row.iter().map(ComValue::from_json).collect()))
                    .collect();
                target
                    .put("Value", ComValue::Array(rows))
                    .map_err(|e| fail(e.message))?;
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    range,
                    Some(PatchValue::value(before)),
                    Some(PatchValue::value(json!(values))),
                ));
                Ok(())
            }
            PatchOp::FillFormula { sheet, range, formula } => {
                let target = self.sheet_range(workbook, sheet, range, &fail)?;
                // The host adjusts relative references across the range.
                target
                    .put("Formula", ComValue::str(formula.clone()))
                    .map_err(|e| fail(e.message))?;
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    range,
                    None,
                    Some(PatchValue::formula(formula.clone())),
                ));
                Ok(())
            }
            PatchOp::SetBold { sheet, bold, .. } => {
                let target = self.style_range(workbook, op, &fail)?;
                let font = member_object(&*target, "Font", &[]).map_err(|e| fail(e.message))?;
                font.put("Bold", ComValue::Bool(*bold)).map_err(|e| fail(e.message))?;
                outcome.diff.push(style_diff(index, op, sheet, json!({"bold": bold})));
                Ok(())
            }
            PatchOp::SetFontSize { sheet, font_size, .. } => {
                let target = self.style_range(workbook, op, &fail)?;
                let font = member_object(&*target, "Font", &[]).map_err(|e| fail(e.message))?;
                font.put("Size", ComValue::F64(*font_size)).map_err(|e| fail(e.message))?;
                outcome
                    .diff
                    .push(style_diff(index, op, sheet, json!({"font_size": font_size})));
                Ok(())
            }
            PatchOp::SetFontColor { sheet, font_color, .. } => {
                let target = self.style_range(workbook, op, &fail)?;
                let font = member_object(&*target, "Font", &[]).map_err(|e| fail(e.message))?;
                font.put("Color", ComValue::I32(host_color(font_color)))
                    .map_err(|e| fail(e.message))?;
                outcome
                    .diff
                    .push(style_diff(index, op, sheet, json!({"font_color": font_color})));
                Ok(())
            }
            PatchOp::SetFillColor { sheet, fill_color, .. } => {
                let target = self.style_range(workbook, op, &fail)?;
                let interior =
                    member_object(&*target, "Interior", &[]).map_err(|e| fail(e.message))?;
                interior
                    .put("Color", ComValue::I32(host_color(fill_color)))
                    .map_err(|e| fail(e.message))?;
                outcome
                    .diff
                    .push(style_diff(index, op, sheet, json!({"fill_color": fill_color})));
                Ok(())
            }
            PatchOp::SetDimensions { sheet, rows, row_height, columns, column_width } => {
                let worksheet = self.worksheet(workbook, sheet, &fail)?;
                if let (Some(rows), Some(height)) = (rows, row_height) {
                    for row in rows {
                        let target =
                            member_object(&*worksheet, "Rows", &[ComValue::str(format!("{row}:{row}"))])
                                .map_err(|e| fail(e.message))?;
                        target
                            .put("RowHeight", ComValue::F64(*height))
                            .map_err(|e| fail(e.message))?;
                    }
                }
                if let (Some(columns), Some(width)) = (columns, column_width) {
                    for label in columns {
                        let target = member_object(
                            &*worksheet,
                            "Columns",
                            &[ComValue::str(format!("{label}:{label}"))],
                        )
                        .map_err(|e| fail(e.message))?;
                        target
                            .put("ColumnWidth", ComValue::F64(*width))
                            .map_err(|e| fail(e.message))?;
                    }
                }
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    "",
                    None,
                    Some(PatchValue::dimension(json!({
                        "rows": rows,
                        "row_height": row_height,
                        "columns": columns,
                        "column_width": column_width,
                    }))),
                ));
                Ok(())
            }
            PatchOp::SetAlignment { sheet, horizontal_align, vertical_align, .. } => {
                let target = self.style_range(workbook, op, &fail)?;
                apply_alignment(&*target, *horizontal_align, *vertical_align)
                    .map_err(|e| fail(e.message))?;
                outcome.diff.push(style_diff(
                    index,
                    op,
                    sheet,
                    json!({
                        "horizontal_align": horizontal_align.map(|h| h.as_str()),
                        "vertical_align": vertical_align.map(|v| v.as_str()),
                    }),
                ));
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
                let target = self.style_range(workbook, op, &fail)?;
                if bold.is_some() || font_size.is_some() || font_color.is_some() {
                    let font = member_object(&*target, "Font", &[]).map_err(|e| fail(e.message))?;
                    if let Some(bold) = bold {
                        font.put("Bold", ComValue::Bool(*bold)).map_err(|e| fail(e.message))?;
                    }
                    if let Some(size) = font_size {
                        font.put("Size", ComValue::F64(*size)).map_err(|e| fail(e.message))?;
                    }
                    if let Some(color) = font_color {
                        font.put("Color", ComValue::I32(host_color(color)))
                            .map_err(|e| fail(e.message))?;
                    }
                }
                if let Some(color) = fill_color {
                    let interior =
                        member_object(&*target, "Interior", &[]).map_err(|e| fail(e.message))?;
                    interior
                        .put("Color", ComValue::I32(host_color(color)))
                        .map_err(|e| fail(e.message))?;
                }
                apply_alignment(&*target, *horizontal_align, *vertical_align)
                    .map_err(|e| fail(e.message))?;
                outcome.diff.push(style_diff(
                    index,
                    op,
                    sheet,
                    json!({
                        "bold": bold,
                        "font_size": font_size,
                        "font_color": font_color,
                        "fill_color": fill_color,
                        "horizontal_align": horizontal_align.map(|h| h.as_str()),
                        "vertical_align": vertical_align.map(|v| v.as_str()),
                    }),
                ));
                Ok(())
            }
            PatchOp::DrawGridBorder { sheet, base_cell, row_count, col_count } => {
                let bounds = grid_bounds(base_cell, *row_count, *col_count, &fail)?;
                let range_text = format!(
                    "{}:{}{}",
                    base_cell,
                    a1::column_index_to_label(bounds.max_col),
                    bounds.max_row
                );
                let target = self.sheet_range(workbook, sheet, &range_text, &fail)?;
                for edge in BORDER_EDGES {
                    let border = member_object(&*target, "Borders", &[ComValue::I32(edge)])
                        .map_err(|e| fail(e.message))?;
                    border
                        .put("LineStyle", ComValue::I32(XL_LINE_CONTINUOUS))
                        .map_err(|e| fail(e.message))?;
                    border.put("Color", ComValue::I32(0)).map_err(|e| fail(e.message))?;
                }
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    &range_text,
                    None,
                    Some(PatchValue::style(
                        json!({"border": "thin", "rows": row_count, "cols": col_count}),
                    )),
                ));
                Ok(())
            }
            PatchOp::MergeCells { sheet, range } => {
                let target = self.sheet_range(workbook, sheet, range, &fail)?;
                target.call("Merge", &[]).map_err(|e| fail(e.message))?;
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    range,
                    None,
                    Some(PatchValue::style(json!({"merged": range}))),
                ));
                Ok(())
            }
            PatchOp::UnmergeCells { sheet, range } => {
                let target = self.sheet_range(workbook, sheet, range, &fail)?;
                target.call("UnMerge", &[]).map_err(|e| fail(e.message))?;
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    range,
                    None,
                    Some(PatchValue::style(json!({"unmerged": range}))),
                ));
                Ok(())
            }
            PatchOp::AutoFitColumns { sheet, columns, min_width, max_width } => {
                let worksheet = self.worksheet(workbook, sheet, &fail)?;
                let targets = self.column_targets(&worksheet, columns.as_deref(), &fail)?;
                for target in &targets {
                    target.call("AutoFit", &[]).map_err(|e| fail(e.message))?;
                    if min_width.is_some() || max_width.is_some() {
                        clamp_column_width(&**target, *min_width, *max_width)
                            .map_err(|e| fail(e.message))?;
                    }
                }
                outcome.diff.push(diff_applied(
                    index,
                    op,
                    sheet,
                    "",
                    None,
                    Some(PatchValue::dimension(json!({"auto_fit": columns}))),
                ));
                Ok(())
            }
            PatchOp::ApplyTableStyle { sheet, range, style_name, table_name } => self
                .apply_table_style(
                    workbook,
                    index,
                    op,
                    outcome,
                    sheet,
                    range,
                    style_name,
                    table_name.as_deref(),
                ),
            PatchOp::CreateChart { .. } => {
                self.create_chart(workbook, index, op, outcome)
            }
            PatchOp::RestoreDesignSnapshot { .. } => Err(fail(
                "restore_design_snapshot is not supported by the live engine".to_string(),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn cell_write(
        &self,
        workbook: &DispatchRef,
        index: usize,
        op: &PatchOp,
        outcome: &mut LiveEngineOutcome,
        sheet: &str,
        cell: &str,
        write: Write<'_>,
        expected: Option<&Value>,
    ) -> Result<(), PatchOpError> {
        let fail = |message: String| PatchOpError::from_op(index, op, message, None);
        let target = self.sheet_range(workbook, sheet, cell, &fail)?;

        let current = target.get("Value", &[]).unwrap_or(ComValue::Null);
        let before = match &current {
            ComValue::Null => None,
            other => Some(PatchValue::value(other.to_json())),
        };

        if let Some(expected) = expected {
            if current.display_text() != json_display_string(expected) {
                outcome.warnings.push(format!(
                    "Skipped op[{index}] {} at {sheet}!{cell} due to condition mismatch.",
                    op.kind_name()
                ));
                outcome.diff.push(DiffEntry {
                    op_index: index,
                    op: op.kind_name(),
                    sheet: sheet.to_string(),
                    cell: cell.to_string(),
                    before: before.clone(),
                    after: before,
                    status: PatchStatus::Skipped,
                });
                return Ok(());
            }
        }

        let after = match write {
            Write::Value(value) => {
                target
                    .put("Value", ComValue::from_json(value))
                    .map_err(|e| fail(e.message))?;
                PatchValue::value(value.clone())
            }
            Write::Formula(formula) => {
                target
                    .put("Formula", ComValue::str(formula))
                    .map_err(|e| fail(e.message))?;
                PatchValue::formula(formula)
            }
        };
        outcome
            .diff
            .push(diff_applied(index, op, sheet, cell, before, Some(after)));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_table_style(
        &self,
        workbook: &DispatchRef,
        index: usize,
        op: &PatchOp,
        outcome: &mut LiveEngineOutcome,
        sheet: &str,
        range: &str,
        style_name: &str,
        table_name: Option<&str>,
    ) -> Result<(), PatchOpError> {
        let fail = |message: String| PatchOpError::from_op(index, op, message, None);
        let worksheet = self.worksheet(workbook, sheet, &fail)?;
        let target = self.sheet_range(workbook, sheet, range, &fail)?;
        let list_objects =
            resolve_collection(&*worksheet, "ListObjects").map_err(|e| fail(e.message))?;

        let bounds = a1::range_bounds(range).map_err(|e| fail(e.to_string()))?;
        let count = collection_count(&*list_objects).map_err(|e| fail(e.message))?;
        for i in 1..=count {
            let existing =
                collection_item(&*list_objects, ComValue::I32(i)).map_err(|e| fail(e.message))?;
            let name = existing
                .get("Name", &[])
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            if let Some(requested) = table_name {
                if name.eq_ignore_ascii_case(requested) {
                    return Err(fail(format!("table name '{requested}' already exists")));
                }
            }
            if let Ok(existing_range) = member_object(&*existing, "Range", &[]) {
                if let Some(address) = range_address(&*existing_range) {
                    if let Ok(existing_bounds) = a1::range_bounds(&address) {
                        if existing_bounds.overlaps(&bounds) {
                            return Err(fail(format!(
                                "range {range} intersects existing table '{name}'"
                            )));
                        }
                    }
                }
            }
        }

        let list_object = add_list_object(&*list_objects, &target, range)
            .map_err(|e| fail(e.message))?;
        if let Some(requested) = table_name {
            list_object
                .put("Name", ComValue::str(requested))
                .map_err(|e| fail(format!("failed to name table '{requested}': {e}")))?;
        }

        // Older hosts expose TableStyle2 instead of TableStyle.
        let styled = list_object
            .put("TableStyle", ComValue::str(style_name))
            .or_else(|_| list_object.put("TableStyle2", ComValue::str(style_name)));
        styled.map_err(|e| fail(format!("table style '{style_name}' was rejected: {e}")))?;

        let final_name = list_object
            .get("Name", &[])
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| table_name.map(str::to_string));
        outcome.diff.push(diff_applied(
            index,
            op,
            sheet,
            range,
            None,
            Some(PatchValue::style(json!({
                "table_name": final_name,
                "style_name": style_name,
                "range": range,
            }))),
        ));
        Ok(())
    }

    fn create_chart(
        &self,
        workbook: &DispatchRef,
        index: usize,
        op: &PatchOp,
        outcome: &mut LiveEngineOutcome,
    ) -> Result<(), PatchOpError> {
        let PatchOp::CreateChart {
            sheet,
            chart_type,
            data_range,
            anchor_cell,
            category_range,
            chart_name,
            width,
            height,
            titles_from_data,
            series_from_rows,
            chart_title,
            x_axis_title,
            y_axis_title,
        } = op
        else {
            return Ok(());
        };
        let fail = |message: String| PatchOpError::from_op(index, op, message, None);

        let type_id = chart::resolve_chart_type_id(chart_type).map_err(|e| fail(e.to_string()))?;
        let worksheet = self.worksheet(workbook, sheet, &fail)?;
        let chart_objects =
            member_object(&*worksheet, "ChartObjects", &[]).map_err(|e| fail(e.message))?;

        if let Some(requested) = chart_name {
            let count = collection_count(&*chart_objects).map_err(|e| fail(e.message))?;
            for i in 1..=count {
                let existing = collection_item(&*chart_objects, ComValue::I32(i))
                    .map_err(|e| fail(e.message))?;
                let name = existing
                    .get("Name", &[])
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                if name.eq_ignore_ascii_case(requested) {
                    return Err(fail(format!("chart name '{requested}' already exists")));
                }
            }
        }

        let anchor = self.sheet_range(workbook, sheet, anchor_cell, &fail)?;
        let left = anchor.get("Left", &[]).ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
        let top = anchor.get("Top", &[]).ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
        let width = width.unwrap_or(DEFAULT_CHART_WIDTH);
        let height = height.unwrap_or(DEFAULT_CHART_HEIGHT);

        let holder = chart_objects
            .call(
                "Add",
                &[
                    ComValue::F64(left),
                    ComValue::F64(top),
                    ComValue::F64(width),
                    ComValue::F64(height),
                ],
            )
            .map_err(|e| fail(e.message))?;
        let holder = holder
            .as_obj()
            .ok_or_else(|| fail("ChartObjects.Add returned no object".to_string()))?;
        if let Some(requested) = chart_name {
            holder
                .put("Name", ComValue::str(requested.clone()))
                .map_err(|e| fail(format!("failed to name chart '{requested}': {e}")))?;
        }
        let chart_obj = member_object(&*holder, "Chart", &[]).map_err(|e| fail(e.message))?;
        chart_obj
            .put("ChartType", ComValue::I32(type_id))
            .map_err(|e| fail(e.message))?;

        let plot_by = if *series_from_rows { XL_PLOT_BY_ROWS } else { XL_PLOT_BY_COLUMNS };
        let ranges = data_range.ranges();
        // With several data ranges and no explicit category range, the
        // first range supplies the categories.
        let (categories, series_ranges) = match (category_range, ranges.len()) {
            (Some(cat), _) => (Some(cat.clone()), ranges),
            (None, n) if n >= 2 => (Some(ranges[0].clone()), ranges[1..].to_vec()),
            (None, _) => (None, ranges),
        };

        if categories.is_none() && series_ranges.len() == 1 {
            let source = self.sheet_range(workbook, sheet, &series_ranges[0], &fail)?;
            chart_obj
                .call("SetSourceData", &[ComValue::Obj(source), ComValue::I32(plot_by)])
                .map_err(|e| fail(e.message))?;
        } else {
            let series_collection =
                member_object(&*chart_obj, "SeriesCollection", &[]).map_err(|e| fail(e.message))?;
            let category_obj = match &categories {
                Some(cat) => Some(self.sheet_range(workbook, sheet, cat, &fail)?),
                None => None,
            };
            for (i, series_range) in series_ranges.iter().enumerate() {
                let values = self.sheet_range(workbook, sheet, series_range, &fail)?;
                let series = series_collection
                    .call("NewSeries", &[])
                    .map_err(|e| fail(e.message))?;
                let series = series
                    .as_obj()
                    .ok_or_else(|| fail("NewSeries returned no object".to_string()))?;
                series
                    .put("Values", ComValue::Obj(values))
                    .map_err(|e| fail(e.message))?;
                if let Some(category_obj) = &category_obj {
                    series
                        .put("XValues", ComValue::Obj(category_obj.clone()))
                        .map_err(|e| fail(e.message))?;
                }
                if !titles_from_data {
                    series
                        .put("Name", ComValue::str(format!("Series {}", i + 1)))
                        .map_err(|e| fail(e.message))?;
                }
            }
        }

        if let Some(title) = chart_title {
            chart_obj
                .put("HasTitle", ComValue::Bool(true))
                .map_err(|e| fail(e.message))?;
            let title_obj =
                member_object(&*chart_obj, "ChartTitle", &[]).map_err(|e| fail(e.message))?;
            title_obj
                .put("Text", ComValue::str(title.clone()))
                .map_err(|e| fail(e.message))?;
        }
        set_axis_title(&*chart_obj, XL_CATEGORY_AXIS, x_axis_title.as_deref())
            .map_err(|e| fail(e.message))?;
        set_axis_title(&*chart_obj, XL_VALUE_AXIS, y_axis_title.as_deref())
            .map_err(|e| fail(e.message))?;

        outcome.diff.push(diff_applied(
            index,
            op,
            sheet,
            anchor_cell,
            None,
            Some(PatchValue::chart(json!({
                "chart_type": chart_type,
                "anchor_cell": anchor_cell,
                "chart_name": chart_name,
                "width": width,
                "height": height,
            }))),
        ));
        Ok(())
    }

    fn worksheet(
        &self,
        workbook: &DispatchRef,
        sheet: &str,
        fail: &impl Fn(String) -> PatchOpError,
    ) -> Result<DispatchRef, PatchOpError> {
        let sheets = resolve_collection(&**workbook, "Worksheets").map_err(|e| fail(e.message))?;
        collection_item(&*sheets, ComValue::str(sheet))
            .map_err(|_| fail(format!("Sheet '{sheet}' not found")))
    }

    /// Range object for a possibly sheet-qualified A1 reference.
    fn sheet_range(
        &self,
        workbook: &DispatchRef,
        default_sheet: &str,
        reference: &str,
        fail: &impl Fn(String) -> PatchOpError,
    ) -> Result<DispatchRef, PatchOpError> {
        let (sheet, local) = match reference.rsplit_once('!') {
            Some((qualifier, local)) => {
                let name = qualifier.trim_matches('\'').replace("''", "'");
                (name, local.to_string())
            }
            None => (default_sheet.to_string(), reference.to_string()),
        };
        let worksheet = self.worksheet(workbook, &sheet, fail)?;
        member_object(&*worksheet, "Range", &[ComValue::str(local)])
            .map_err(|e| fail(e.message))
    }

    fn style_range(
        &self,
        workbook: &DispatchRef,
        op: &PatchOp,
        fail: &impl Fn(String) -> PatchOpError,
    ) -> Result<DispatchRef, PatchOpError> {
        let target = op
            .style_target()
            .ok_or_else(|| fail("one of 'cell' or 'range' is required".to_string()))?;
        self.sheet_range(workbook, op.sheet(), target, fail)
    }

    fn column_targets(
        &self,
        worksheet: &DispatchRef,
        columns: Option<&[String]>,
        fail: &impl Fn(String) -> PatchOpError,
    ) -> Result<Vec<DispatchRef>, PatchOpError> {
        match columns {
            Some(labels) => labels
                .iter()
                .map(|label| {
                    member_object(
                        &**worksheet,
                        "Columns",
                        &[ComValue::str(format!("{label}:{label}"))],
                    )
                    .map_err(|e| fail(e.message))
                })
                .collect(),
            None => {
                let used = member_object(&**worksheet, "UsedRange", &[])
                    .map_err(|e| fail(e.message))?;
                let cols = member_object(&*used, "Columns", &[]).map_err(|e| fail(e.message))?;
                let count = collection_count(&*cols).map_err(|e| fail(e.message))?;
                (1..=count)
                    .map(|i| collection_item(&*cols, ComValue::I32(i)).map_err(|e| fail(e.message)))
                    .collect()
            }
        }
    }
}

enum Write<'a> {
    Value(&'a Value),
    Formula(&'a str),
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn diff_applied(
    index: usize,
    op: &PatchOp,
    sheet: &str,
    cell: &str,
    before: Option<PatchValue>,
    after: Option<PatchValue>,
) -> DiffEntry {
    DiffEntry {
        op_index: index,
        op: op.kind_name(),
        sheet: sheet.to_string(),
        cell: cell.to_string(),
        before,
        after,
        status: PatchStatus::Applied,
    }
}

fn style_diff(index: usize, op: &PatchOp, sheet: &str, after: Value) -> DiffEntry {
    diff_applied(
        index,
        op,
        sheet,
        &op.locator(),
        None,
        Some(PatchValue::style(after)),
    )
}

fn grid_bounds(
    base_cell: &str,
    row_count: u32,
    col_count: u32,
    fail: &impl Fn(String) -> PatchOpError,
) -> Result<a1::RangeBounds, PatchOpError> {
    let (label, row) = a1::split_a1(base_cell).map_err(|e| fail(e.to_string()))?;
    let col = a1::column_label_to_index(&label).map_err(|e| fail(e.to_string()))?;
    Ok(a1::RangeBounds {
        min_col: col,
        max_col: col + col_count - 1,
        min_row: row,
        max_row: row + row_count - 1,
    })
}

fn apply_alignment(
    target: &dyn Dispatch,
    horizontal: Option<HorizontalAlign>,
    vertical: Option<VerticalAlign>,
) -> Result<(), DispatchError> {
    if let Some(horizontal) = horizontal {
        let value = match horizontal {
            HorizontalAlign::Left => XL_HALIGN_LEFT,
            HorizontalAlign::Center => XL_HALIGN_CENTER,
            HorizontalAlign::Right => XL_HALIGN_RIGHT,
        };
        target.put("HorizontalAlignment", ComValue::I32(value))?;
    }
    if let Some(vertical) = vertical {
        let value = match vertical {
            VerticalAlign::Top => XL_VALIGN_TOP,
            VerticalAlign::Center => XL_VALIGN_CENTER,
            VerticalAlign::Bottom => XL_VALIGN_BOTTOM,
        };
        target.put("VerticalAlignment", ComValue::I32(value))?;
    }
    Ok(())
}

fn clamp_column_width(
    target: &dyn Dispatch,
    min_width: Option<f64>,
    max_width: Option<f64>,
) -> Result<(), DispatchError> {
    let Some(mut width) = target.get("ColumnWidth", &[]).ok().and_then(|v| v.as_f64()) else {
        return Ok(());
    };
    let fitted = width;
    if let Some(min) = min_width {
        width = width.max(min);
    }
    if let Some(max) = max_width {
        width = width.min(max);
    }
    if (width - fitted).abs() > f64::EPSILON {
        target.put("ColumnWidth", ComValue::F64(width))?;
    }
    Ok(())
}

fn collection_count(collection: &dyn Dispatch) -> Result<i32, DispatchError> {
    let count = collection.get("Count", &[])?;
    count
        .as_i32()
        .ok_or_else(|| DispatchError::new("Count is not numeric"))
}

fn set_axis_title(
    chart: &dyn Dispatch,
    axis_type: i32,
    title: Option<&str>,
) -> Result<(), DispatchError> {
    let Some(title) = title else {
        return Ok(());
    };
    let axis = member_object(chart, "Axes", &[ComValue::I32(axis_type)])?;
    axis.put("HasTitle", ComValue::Bool(true))?;
    let title_obj = member_object(&*axis, "AxisTitle", &[])?;
    title_obj.put("Text", ComValue::str(title))
}

/// ListObjects.Add signature ladder. Host versions disagree on how many
/// arguments the method takes and whether the source is a Range object
/// or an address string; every combination is tried in order.
fn add_list_object(
    list_objects: &dyn Dispatch,
    source_range: &DispatchRef,
    address: &str,
) -> Result<DispatchRef, DispatchError> {
    const XL_SRC_RANGE: i32 = 1;
    const XL_YES: i32 = 1;

    let sources = [
        ComValue::Obj(source_range.clone()),
        ComValue::str(address),
    ];
    let mut last_error = DispatchError::new("ListObjects.Add was never attempted");
    for source in &sources {
        let signatures: [Vec<ComValue>; 6] = [
            vec![
                ComValue::I32(XL_SRC_RANGE),
                source.clone(),
                ComValue::Null,
                ComValue::I32(XL_YES),
            ],
            vec![
                ComValue::I32(XL_SRC_RANGE),
                source.clone(),
                ComValue::Null,
                ComValue::I32(XL_YES),
                ComValue::Null,
            ],
            vec![ComValue::I32(XL_SRC_RANGE), source.clone(), ComValue::I32(XL_YES)],
            vec![ComValue::I32(XL_SRC_RANGE), source.clone()],
            vec![source.clone(), ComValue::Null, ComValue::I32(XL_YES)],
            vec![source.clone()],
        ];
        for args in &signatures {
            match list_objects.call("Add", args) {
                Ok(value) => {
                    if let Some(obj) = value.as_obj() {
                        return Ok(obj);
                    }
                    last_error = DispatchError::new("ListObjects.Add returned no object");
                }
                Err(err) => last_error = err,
            }
        }
    }
    Err(DispatchError::new(format!(
        "ListObjects.Add failed after trying all signatures: {last_error}"
    )))
}

/// Range.Address with a fallback ladder for hosts that reject the full
/// argument list, normalized to a plain local A1 range.
fn range_address(range: &dyn Dispatch) -> Option<String> {
    let ladders: [&[ComValue]; 3] = [
        &[
            ComValue::Bool(false),
            ComValue::Bool(false),
            ComValue::I32(1),
            ComValue::Bool(false),
        ],
        &[ComValue::Bool(false), ComValue::Bool(false)],
        &[],
    ];
    for args in ladders {
        if let Ok(value) = range.get("Address", args) {
            if let Some(text) = value.as_str() {
                return Some(normalize_address(text));
            }
        }
    }
    None
}

/// Strip `$` locks, a leading `=`, and `'[Book]Sheet'!` qualifiers.
fn normalize_address(address: &str) -> String {
    let address = address.trim_start_matches('=');
    let local = match address.rsplit_once('!') {
        Some((_, local)) => local,
        None => address,
    };
    local.replace('$', "")
}

/// `#AARRGGBB` to the BGR-packed integer the host expects.
fn host_color(canonical: &str) -> i32 {
    let hex = canonical.trim_start_matches('#');
    let rgb = if hex.len() == 8 { &hex[2..] } else { hex };
    let r = i32::from_str_radix(&rgb[0..2], 16).unwrap_or(0);
    let g = i32::from_str_radix(&rgb[2..4], 16).unwrap_or(0);
    let b = i32::from_str_radix(&rgb[4..6], 16).unwrap_or(0);
    r + g * 256 + b * 65536
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_color_packs_bgr() {
        assert_eq!(host_color("#FFFF0000"), 0x0000FF);
        assert_eq!(host_color("#FF0000FF"), 0xFF0000);
        assert_eq!(host_color("#FFFFFFFF"), 0xFFFFFF);
        assert_eq!(host_color("#FF000000"), 0);
    }

    #[test]
    fn address_normalization_strips_qualifiers() {
        assert_eq!(normalize_address("$A$1:$B$5"), "A1:B5");
        assert_eq!(normalize_address("='[Book1]Sheet 1'!$A$1:$C$3"), "A1:C3");
        assert_eq!(normalize_address("Sheet1!$D$2"), "D2");
    }
}
