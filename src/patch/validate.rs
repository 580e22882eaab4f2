use crate::patch::a1;
use crate::patch::chart;
use crate::patch::error::{ERR_CHART_TYPE_INVALID, PatchOpError};
use crate::patch::op::PatchOp;
use once_cell::sync::Lazy;
use regex::Regex;

/// Style ops refuse targets larger than this many cells.
pub const MAX_STYLE_TARGET_CELLS: u64 = 10_000;

/// Optional sheet qualifier on chart range references. Quoted names may
/// contain any character with `''` escaping single quotes.
static SHEET_QUALIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:'(?:[^']|'')+'|[^'!\[\]]+)$").expect("regex"));

/// Validate every op against its field contract, normalizing colors and
/// A1 references in place. Fails on the first invalid op.
pub fn validate_ops(ops: &mut [PatchOp]) -> Result<(), PatchOpError> {
    for (index, op) in ops.iter_mut().enumerate() {
        validate_op(index, op)?;
    }
    Ok(())
}

pub fn validate_op(index: usize, op: &mut PatchOp) -> Result<(), PatchOpError> {
    let kind = op.kind_name();
    let sheet = op.sheet().to_string();
    let locator = op.locator();
    let fail = |field: &str, message: String| {
        PatchOpError::validation(index, kind.clone(), sheet.clone(), locator.clone(), field, message)
    };

    if sheet.trim().is_empty() {
        return Err(fail("sheet", "sheet name must not be empty".to_string()));
    }

    match op {
        PatchOp::AddSheet { .. } => {}
        PatchOp::SetValue { cell, .. } | PatchOp::SetValueIf { cell, .. } => {
            normalize_cell_field(cell, "cell", &fail)?;
        }
        PatchOp::SetFormula { cell, formula, .. }
        | PatchOp::SetFormulaIf { cell, formula, .. } => {
            normalize_cell_field(cell, "cell", &fail)?;
            check_formula(formula, &fail)?;
        }
        PatchOp::SetRangeValues { range, values, .. } => {
            normalize_range_field(range, "range", &fail)?;
            check_matrix_shape(range, values, &fail)?;
        }
        PatchOp::FillFormula { range, formula, .. } => {
            normalize_range_field(range, "range", &fail)?;
            check_formula(formula, &fail)?;
            let bounds = a1::range_bounds(range).map_err(|e| fail("range", e.to_string()))?;
            if bounds.rows() > 1 && bounds.cols() > 1 {
                return Err(fail(
                    "range",
                    "fill_formula requires a single-row or single-column range".to_string(),
                ));
            }
        }
        PatchOp::SetBold { cell, range, .. } => {
            check_style_target(cell, range, &fail)?;
        }
        PatchOp::SetFontSize { cell, range, font_size, .. } => {
            check_style_target(cell, range, &fail)?;
            check_positive(*font_size, "font_size", &fail)?;
        }
        PatchOp::SetFontColor { cell, range, font_color, .. } => {
            check_style_target(cell, range, &fail)?;
            *font_color = normalize_hex_color(font_color, "font_color", &fail)?;
        }
        PatchOp::SetFillColor { cell, range, fill_color, .. } => {
            check_style_target(cell, range, &fail)?;
            *fill_color = normalize_hex_color(fill_color, "fill_color", &fail)?;
        }
        PatchOp::SetDimensions { rows, row_height, columns, column_width, .. } => {
            check_dimensions(rows, row_height, columns, column_width, &fail)?;
        }
        PatchOp::SetAlignment { cell, range, horizontal_align, vertical_align, .. } => {
            check_style_target(cell, range, &fail)?;
            if horizontal_align.is_none() && vertical_align.is_none() {
                return Err(fail(
                    "horizontal_align",
                    "set_alignment requires horizontal_align and/or vertical_align".to_string(),
                ));
            }
        }
        PatchOp::SetStyle {
            cell,
            range,
            bold,
            font_size,
            font_color,
            fill_color,
            horizontal_align,
            vertical_align,
            ..
        } => {
            check_style_target(cell, range, &fail)?;
            if bold.is_none()
                && font_size.is_none()
                && font_color.is_none()
                && fill_color.is_none()
                && horizontal_align.is_none()
                && vertical_align.is_none()
            {
                return Err(fail(
                    "bold",
                    "set_style requires at least one style attribute".to_string(),
                ));
            }
            if let Some(size) = font_size {
                check_positive(*size, "font_size", &fail)?;
            }
            if let Some(color) = font_color {
                *color = normalize_hex_color(color, "font_color", &fail)?;
            }
            if let Some(color) = fill_color {
                *color = normalize_hex_color(color, "fill_color", &fail)?;
            }
        }
        PatchOp::DrawGridBorder { base_cell, row_count, col_count, .. } => {
            normalize_cell_field(base_cell, "base_cell", &fail)?;
            if *row_count < 1 {
                return Err(fail("row_count", "row_count must be >= 1".to_string()));
            }
            if *col_count < 1 {
                return Err(fail("col_count", "col_count must be >= 1".to_string()));
            }
            let count = u64::from(*row_count) * u64::from(*col_count);
            if count > MAX_STYLE_TARGET_CELLS {
                return Err(fail(
                    "row_count",
                    format!(
                        "grid covers {count} cells, above the {MAX_STYLE_TARGET_CELLS} cell limit"
                    ),
                ));
            }
        }
        PatchOp::MergeCells { range, .. } => {
            normalize_range_field(range, "range", &fail)?;
            let count = a1::range_cell_count(range).map_err(|e| fail("range", e.to_string()))?;
            if count < 2 {
                return Err(fail(
                    "range",
                    "merge_cells requires a range spanning more than one cell".to_string(),
                ));
            }
        }
        PatchOp::UnmergeCells { range, .. } => {
            normalize_range_field(range, "range", &fail)?;
        }
        PatchOp::AutoFitColumns { columns, min_width, max_width, .. } => {
            if let Some(columns) = columns {
                if columns.is_empty() {
                    return Err(fail("columns", "columns must not be empty".to_string()));
                }
                for label in columns.iter_mut() {
                    let idx = a1::column_label_to_index(label)
                        .map_err(|e| fail("columns", e.to_string()))?;
                    *label = a1::column_index_to_label(idx);
                }
            }
            if let Some(min) = min_width {
                check_positive(*min, "min_width", &fail)?;
            }
            if let Some(max) = max_width {
                check_positive(*max, "max_width", &fail)?;
            }
            if let (Some(min), Some(max)) = (min_width, max_width)
                && min > max
            {
                return Err(fail(
                    "min_width",
                    "min_width must not exceed max_width".to_string(),
                ));
            }
        }
        PatchOp::ApplyTableStyle { range, style_name, table_name, .. } => {
            normalize_range_field(range, "range", &fail)?;
            check_non_empty(style_name, "style_name", &fail)?;
            if let Some(name) = table_name {
                check_non_empty(name, "table_name", &fail)?;
            }
        }
        PatchOp::CreateChart {
            chart_type,
            data_range,
            anchor_cell,
            category_range,
            chart_name,
            width,
            height,
            chart_title,
            x_axis_title,
            y_axis_title,
            ..
        } => {
            chart::normalize_chart_type(chart_type)
                .map_err(|e| fail("chart_type", e.to_string()).with_code(ERR_CHART_TYPE_INVALID))?;
            normalize_cell_field(anchor_cell, "anchor_cell", &fail)?;

            let mut ranges = data_range.ranges();
            if ranges.is_empty() {
                return Err(fail("data_range", "data_range must not be empty".to_string()));
            }
            for range in ranges.iter_mut() {
                *range = normalize_chart_range(range, "data_range", &fail)?;
            }
            *data_range = match ranges.len() {
                1 => crate::patch::op::DataRange::Single(ranges.remove(0)),
                _ => crate::patch::op::DataRange::Many(ranges),
            };
            if let Some(range) = category_range {
                *range = normalize_chart_range(range, "category_range", &fail)?;
            }
            if let Some(name) = chart_name {
                check_non_empty(name, "chart_name", &fail)?;
            }
            if let Some(width) = width {
                check_positive(*width, "width", &fail)?;
            }
            if let Some(height) = height {
                check_positive(*height, "height", &fail)?;
            }
            for (field, title) in [
                ("chart_title", chart_title),
                ("x_axis_title", x_axis_title),
                ("y_axis_title", y_axis_title),
            ] {
                if let Some(title) = title {
                    check_non_empty(title, field, &fail)?;
                }
            }
        }
        PatchOp::RestoreDesignSnapshot { snapshot, .. } => {
            if let Some(merge_state) = &snapshot.merge_state {
                for range in &merge_state.ranges {
                    a1::normalize_range(range).map_err(|e| fail("snapshot", e.to_string()))?;
                }
            }
            for row in snapshot.row_dimensions.keys() {
                if row.parse::<u32>().map(|r| r >= 1) != Ok(true) {
                    return Err(fail(
                        "snapshot",
                        format!("invalid row key '{row}' in snapshot row_dimensions"),
                    ));
                }
            }
            for column in snapshot.column_dimensions.keys() {
                a1::column_label_to_index(column).map_err(|e| fail("snapshot", e.to_string()))?;
            }
        }
    }
    Ok(())
}

fn normalize_cell_field(
    cell: &mut String,
    field: &str,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    let trimmed = cell.trim();
    let (col, row) = a1::split_a1(trimmed).map_err(|e| fail(field, e.to_string()))?;
    *cell = format!("{col}{row}");
    Ok(())
}

fn normalize_range_field(
    range: &mut String,
    field: &str,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    *range = a1::normalize_range(range).map_err(|e| fail(field, e.to_string()))?;
    Ok(())
}

/// Chart ranges may carry a leading '=' and a sheet qualifier; both
/// survive normalization except the '=' marker.
fn normalize_chart_range(
    value: &str,
    field: &str,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<String, PatchOpError> {
    let trimmed = value.trim().trim_start_matches('=').trim();
    if trimmed.is_empty() {
        return Err(fail(field, format!("{field} must not be empty")));
    }
    match trimmed.rsplit_once('!') {
        Some((sheet_part, range_part)) => {
            if !SHEET_QUALIFIER_RE.is_match(sheet_part) {
                return Err(fail(field, format!("Invalid sheet qualifier in {field}: {value}")));
            }
            let normalized = a1::normalize_range(range_part)
                .map_err(|e| fail(field, e.to_string()))?;
            Ok(format!("{sheet_part}!{normalized}"))
        }
        None => {
            let normalized =
                a1::normalize_range(trimmed).map_err(|e| fail(field, e.to_string()))?;
            Ok(normalized)
        }
    }
}

/// Accepts 6- or 8-digit hex, with or without '#'. Canonical form is
/// uppercase '#AARRGGBB' with an FF alpha injected for 6-digit input.
fn normalize_hex_color(
    value: &str,
    field: &str,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<String, PatchOpError> {
    let trimmed = value.trim().trim_start_matches('#');
    let valid_len = trimmed.len() == 6 || trimmed.len() == 8;
    if !valid_len || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(fail(
            field,
            format!("Invalid hex color '{value}' (expected 6 or 8 hex digits)"),
        ));
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper.len() == 6 {
        Ok(format!("#FF{upper}"))
    } else {
        Ok(format!("#{upper}"))
    }
}

fn check_formula(
    formula: &mut String,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    let trimmed = formula.trim();
    if trimmed.is_empty() {
        return Err(fail("formula", "formula must not be empty".to_string()));
    }
    if !trimmed.starts_with('=') {
        return Err(fail(
            "formula",
            "formula must start with '='".to_string(),
        ));
    }
    *formula = trimmed.to_string();
    Ok(())
}

fn check_matrix_shape(
    range: &str,
    values: &[Vec<serde_json::Value>],
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    if values.is_empty() {
        return Err(fail("values", "values must not be empty".to_string()));
    }
    let width = values[0].len();
    if width == 0 {
        return Err(fail("values", "values rows must not be empty".to_string()));
    }
    if values.iter().any(|row| row.len() != width) {
        return Err(fail(
            "values",
            "values must be rectangular (all rows the same length)".to_string(),
        ));
    }
    let bounds = a1::range_bounds(range).map_err(|e| fail("range", e.to_string()))?;
    if bounds.rows() as usize != values.len() || bounds.cols() as usize != width {
        return Err(fail(
            "values",
            format!(
                "values shape {}x{} does not match range {} ({}x{})",
                values.len(),
                width,
                range,
                bounds.rows(),
                bounds.cols()
            ),
        ));
    }
    Ok(())
}

fn check_style_target(
    cell: &mut Option<String>,
    range: &mut Option<String>,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    match (cell.as_mut(), range.as_mut()) {
        (Some(_), Some(_)) => Err(fail(
            "cell",
            "pass exactly one of 'cell' or 'range', not both".to_string(),
        )),
        (None, None) => Err(fail(
            "cell",
            "one of 'cell' or 'range' is required".to_string(),
        )),
        (Some(cell), None) => normalize_cell_field(cell, "cell", fail),
        (None, Some(range)) => {
            normalize_range_field(range, "range", fail)?;
            let count = a1::range_cell_count(range).map_err(|e| fail("range", e.to_string()))?;
            if count > MAX_STYLE_TARGET_CELLS {
                return Err(fail(
                    "range",
                    format!(
                        "style target covers {count} cells, above the {MAX_STYLE_TARGET_CELLS} cell limit"
                    ),
                ));
            }
            Ok(())
        }
    }
}

fn check_dimensions(
    rows: &Option<Vec<u32>>,
    row_height: &Option<f64>,
    columns: &mut Option<Vec<String>>,
    column_width: &Option<f64>,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    let has_rows = rows.is_some() || row_height.is_some();
    let has_columns = columns.is_some() || column_width.is_some();
    if !has_rows && !has_columns {
        return Err(fail(
            "rows",
            "set_dimensions requires rows+row_height and/or columns+column_width".to_string(),
        ));
    }
    if rows.is_some() != row_height.is_some() {
        return Err(fail(
            "row_height",
            "rows and row_height must be provided together".to_string(),
        ));
    }
    if columns.is_some() != column_width.is_some() {
        return Err(fail(
            "column_width",
            "columns and column_width must be provided together".to_string(),
        ));
    }
    if let Some(rows) = rows {
        if rows.is_empty() {
            return Err(fail("rows", "rows must not be empty".to_string()));
        }
        if rows.iter().any(|r| *r < 1) {
            return Err(fail("rows", "row numbers must be >= 1".to_string()));
        }
    }
    if let Some(height) = row_height {
        check_positive(*height, "row_height", fail)?;
    }
    if let Some(columns) = columns {
        if columns.is_empty() {
            return Err(fail("columns", "columns must not be empty".to_string()));
        }
        for label in columns.iter_mut() {
            let idx = a1::column_label_to_index(label).map_err(|e| fail("columns", e.to_string()))?;
            *label = a1::column_index_to_label(idx);
        }
    }
    if let Some(width) = column_width {
        check_positive(*width, "column_width", fail)?;
    }
    Ok(())
}

fn check_positive(
    value: f64,
    field: &str,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(fail(field, format!("{field} must be a positive number")));
    }
    Ok(())
}

fn check_non_empty(
    value: &mut String,
    field: &str,
    fail: &impl Fn(&str, String) -> PatchOpError,
) -> Result<(), PatchOpError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(fail(field, format!("{field} must not be empty")));
    }
    *value = trimmed.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::op::DataRange;
    use serde_json::json;

    fn op(value: serde_json::Value) -> PatchOp {
        serde_json::from_value(value).unwrap()
    }

    fn validate(value: serde_json::Value) -> Result<PatchOp, PatchOpError> {
        let mut parsed = op(value);
        validate_op(0, &mut parsed)?;
        Ok(parsed)
    }

    #[test]
    fn six_digit_fill_color_gains_alpha_and_marker() {
        let validated = validate(json!({
            "kind": "set_fill_color", "sheet": "S", "cell": "a1", "fill_color": "1f4e79"
        }))
        .unwrap();
        assert_matches::assert_matches!(validated, PatchOp::SetFillColor { fill_color, cell, .. } => {
            assert_eq!(fill_color, "#FF1F4E79");
            assert_eq!(cell.as_deref(), Some("A1"));
        });
    }

    #[test]
    fn eight_digit_color_keeps_alpha() {
        let validated = validate(json!({
            "kind": "set_font_color", "sheet": "S", "cell": "A1", "font_color": "#80ff0000"
        }))
        .unwrap();
        assert_matches::assert_matches!(validated, PatchOp::SetFontColor { font_color, .. } => {
            assert_eq!(font_color, "#80FF0000");
        });
    }

    #[test]
    fn bad_color_is_rejected() {
        let err = validate(json!({
            "kind": "set_fill_color", "sheet": "S", "cell": "A1", "fill_color": "#12345"
        }))
        .unwrap_err();
        assert_eq!(err.failed_field.as_deref(), Some("fill_color"));
    }

    #[test]
    fn matrix_shape_mismatch_fails() {
        let err = validate(json!({
            "kind": "set_range_values", "sheet": "S", "range": "A1:B2",
            "values": [[1, 2, 3], [4, 5, 6]]
        }))
        .unwrap_err();
        assert!(err.message.contains("shape 2x3"));
        assert!(err.message.contains("2x2"));
    }

    #[test]
    fn ragged_matrix_fails() {
        let err = validate(json!({
            "kind": "set_range_values", "sheet": "S", "range": "A1:B2",
            "values": [[1, 2], [3]]
        }))
        .unwrap_err();
        assert!(err.message.contains("rectangular"));
    }

    #[test]
    fn formula_must_start_with_equals() {
        let err = validate(json!({
            "kind": "set_formula", "sheet": "S", "cell": "A1", "formula": "SUM(A1:A2)"
        }))
        .unwrap_err();
        assert_eq!(err.failed_field.as_deref(), Some("formula"));
    }

    #[test]
    fn style_target_exclusivity() {
        let err = validate(json!({
            "kind": "set_bold", "sheet": "S", "cell": "A1", "range": "A1:B2"
        }))
        .unwrap_err();
        assert!(err.message.contains("not both"));

        let err = validate(json!({"kind": "set_bold", "sheet": "S"})).unwrap_err();
        assert!(err.message.contains("required"));
    }

    #[test]
    fn oversized_style_target_is_rejected() {
        let err = validate(json!({
            "kind": "set_bold", "sheet": "S", "range": "A1:Z10000"
        }))
        .unwrap_err();
        assert!(err.message.contains("cell limit"));
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let err = validate(json!({
            "kind": "draw_grid_border", "sheet": "S", "base_cell": "A1",
            "row_count": 200, "col_count": 200
        }))
        .unwrap_err();
        assert_eq!(err.failed_field.as_deref(), Some("row_count"));
        assert!(err.message.contains("cell limit"));

        // Counts near u32::MAX must fail validation, not wrap downstream.
        let err = validate(json!({
            "kind": "draw_grid_border", "sheet": "S", "base_cell": "A1",
            "row_count": 4294967295u32, "col_count": 1
        }))
        .unwrap_err();
        assert!(err.message.contains("cell limit"));
    }

    #[test]
    fn merge_needs_multiple_cells() {
        let err = validate(json!({
            "kind": "merge_cells", "sheet": "S", "range": "A1:A1"
        }))
        .unwrap_err();
        assert!(err.message.contains("more than one cell"));
    }

    #[test]
    fn fill_formula_rejects_rectangles() {
        let err = validate(json!({
            "kind": "fill_formula", "sheet": "S", "range": "A1:B5", "formula": "=A1"
        }))
        .unwrap_err();
        assert!(err.message.contains("single-row or single-column"));
    }

    #[test]
    fn chart_ranges_accept_sheet_qualifiers() {
        let validated = validate(json!({
            "kind": "create_chart", "sheet": "S", "chart_type": "donut",
            "data_range": "='My Data'!a1:b5", "anchor_cell": "d2"
        }))
        .unwrap();
        assert_matches::assert_matches!(validated, PatchOp::CreateChart { data_range, anchor_cell, .. } => {
            assert_eq!(data_range, DataRange::Single("'My Data'!A1:B5".to_string()));
            assert_eq!(anchor_cell, "D2");
        });
    }

    #[test]
    fn unknown_chart_type_carries_code() {
        let err = validate(json!({
            "kind": "create_chart", "sheet": "S", "chart_type": "bubble",
            "data_range": "A1:B5", "anchor_cell": "D2"
        }))
        .unwrap_err();
        assert_eq!(err.error_code.as_deref(), Some(ERR_CHART_TYPE_INVALID));
    }

    #[test]
    fn dimensions_require_paired_fields() {
        let err = validate(json!({
            "kind": "set_dimensions", "sheet": "S", "rows": [1, 2]
        }))
        .unwrap_err();
        assert_eq!(err.failed_field.as_deref(), Some("row_height"));

        let validated = validate(json!({
            "kind": "set_dimensions", "sheet": "S", "columns": ["a", "b"], "column_width": 18.0
        }))
        .unwrap();
        assert_matches::assert_matches!(validated, PatchOp::SetDimensions { columns, .. } => {
            assert_eq!(columns.unwrap(), vec!["A", "B"]);
        });
    }

    #[test]
    fn auto_fit_width_bounds_are_ordered() {
        let err = validate(json!({
            "kind": "auto_fit_columns", "sheet": "S", "min_width": 20.0, "max_width": 10.0
        }))
        .unwrap_err();
        assert!(err.message.contains("min_width"));
    }
}
