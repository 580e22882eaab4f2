use crate::patch::model::DesignSnapshot;
use crate::patch::registry::{self, OpSpec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerticalAlign {
    Top,
    Center,
    Bottom,
}

impl HorizontalAlign {
    pub fn as_str(self) -> &'static str {
        match self {
            HorizontalAlign::Left => "left",
            HorizontalAlign::Center => "center",
            HorizontalAlign::Right => "right",
        }
    }
}

impl VerticalAlign {
    pub fn as_str(self) -> &'static str {
        match self {
            VerticalAlign::Top => "top",
            VerticalAlign::Center => "center",
            VerticalAlign::Bottom => "bottom",
        }
    }
}

/// Chart source data: one A1 range (optionally sheet-qualified) or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DataRange {
    Single(String),
    Many(Vec<String>),
}

impl DataRange {
    pub fn ranges(&self) -> Vec<String> {
        match self {
            DataRange::Single(range) => vec![range.clone()],
            DataRange::Many(ranges) => ranges.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PatchOpKind {
    AddSheet,
    SetValue,
    SetFormula,
    SetValueIf,
    SetFormulaIf,
    SetRangeValues,
    FillFormula,
    SetBold,
    SetFontSize,
    SetFontColor,
    SetFillColor,
    SetDimensions,
    SetAlignment,
    SetStyle,
    DrawGridBorder,
    MergeCells,
    UnmergeCells,
    AutoFitColumns,
    ApplyTableStyle,
    CreateChart,
    RestoreDesignSnapshot,
}

fn default_true() -> bool {
    true
}

/// One normalized, typed patch operation. Aliases and the default sheet
/// are resolved before deserialization; see `patch::normalize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchOp {
    AddSheet {
        sheet: String,
    },
    SetValue {
        sheet: String,
        cell: String,
        value: serde_json::Value,
    },
    SetFormula {
        sheet: String,
        cell: String,
        formula: String,
    },
    SetValueIf {
        sheet: String,
        cell: String,
        expected: serde_json::Value,
        value: serde_json::Value,
    },
    SetFormulaIf {
        sheet: String,
        cell: String,
        expected: serde_json::Value,
        formula: String,
    },
    SetRangeValues {
        sheet: String,
        range: String,
        values: Vec<Vec<serde_json::Value>>,
    },
    FillFormula {
        sheet: String,
        range: String,
        formula: String,
    },
    SetBold {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<String>,
        #[serde(default = "default_true")]
        bold: bool,
    },
    SetFontSize {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<String>,
        font_size: f64,
    },
    SetFontColor {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<String>,
        font_color: String,
    },
    SetFillColor {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<String>,
        fill_color: String,
    },
    SetDimensions {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<Vec<u32>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        row_height: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column_width: Option<f64>,
    },
    SetAlignment {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        horizontal_align: Option<HorizontalAlign>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vertical_align: Option<VerticalAlign>,
    },
    SetStyle {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        range: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bold: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_size: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_color: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill_color: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        horizontal_align: Option<HorizontalAlign>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vertical_align: Option<VerticalAlign>,
    },
    DrawGridBorder {
        sheet: String,
        base_cell: String,
        row_count: u32,
        col_count: u32,
    },
    MergeCells {
        sheet: String,
        range: String,
    },
    UnmergeCells {
        sheet: String,
        range: String,
    },
    AutoFitColumns {
        sheet: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_width: Option<f64>,
    },
    ApplyTableStyle {
        sheet: String,
        range: String,
        style_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_name: Option<String>,
    },
    CreateChart {
        sheet: String,
        chart_type: String,
        data_range: DataRange,
        anchor_cell: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category_range: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chart_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<f64>,
        #[serde(default = "default_true")]
        titles_from_data: bool,
        #[serde(default)]
        series_from_rows: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chart_title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x_axis_title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y_axis_title: Option<String>,
    },
    RestoreDesignSnapshot {
        sheet: String,
        snapshot: DesignSnapshot,
    },
}

impl PatchOp {
    pub fn kind(&self) -> PatchOpKind {
        match self {
            PatchOp::AddSheet { .. } => PatchOpKind::AddSheet,
            PatchOp::SetValue { .. } => PatchOpKind::SetValue,
            PatchOp::SetFormula { .. } => PatchOpKind::SetFormula,
            PatchOp::SetValueIf { .. } => PatchOpKind::SetValueIf,
            PatchOp::SetFormulaIf { .. } => PatchOpKind::SetFormulaIf,
            PatchOp::SetRangeValues { .. } => PatchOpKind::SetRangeValues,
            PatchOp::FillFormula { .. } => PatchOpKind::FillFormula,
            PatchOp::SetBold { .. } => PatchOpKind::SetBold,
            PatchOp::SetFontSize { .. } => PatchOpKind::SetFontSize,
            PatchOp::SetFontColor { .. } => PatchOpKind::SetFontColor,
            PatchOp::SetFillColor { .. } => PatchOpKind::SetFillColor,
            PatchOp::SetDimensions { .. } => PatchOpKind::SetDimensions,
            PatchOp::SetAlignment { .. } => PatchOpKind::SetAlignment,
            PatchOp::SetStyle { .. } => PatchOpKind::SetStyle,
            PatchOp::DrawGridBorder { .. } => PatchOpKind::DrawGridBorder,
            PatchOp::MergeCells { .. } => PatchOpKind::MergeCells,
            PatchOp::UnmergeCells { .. } => PatchOpKind::UnmergeCells,
            PatchOp::AutoFitColumns { .. } => PatchOpKind::AutoFitColumns,
            PatchOp::ApplyTableStyle { .. } => PatchOpKind::ApplyTableStyle,
            PatchOp::CreateChart { .. } => PatchOpKind::CreateChart,
            PatchOp::RestoreDesignSnapshot { .. } => PatchOpKind::RestoreDesignSnapshot,
        }
    }

    pub fn kind_name(&self) -> String {
        self.kind().to_string()
    }

    pub fn spec(&self) -> &'static OpSpec {
        // Every enum variant has a registry row; the registry test pins this.
        registry::spec_for(&self.kind_name()).unwrap_or_else(|_| unreachable!())
    }

    pub fn sheet(&self) -> &str {
        match self {
            PatchOp::AddSheet { sheet }
            | PatchOp::SetValue { sheet, .. }
            | PatchOp::SetFormula { sheet, .. }
            | PatchOp::SetValueIf { sheet, .. }
            | PatchOp::SetFormulaIf { sheet, .. }
            | PatchOp::SetRangeValues { sheet, .. }
            | PatchOp::FillFormula { sheet, .. }
            | PatchOp::SetBold { sheet, .. }
            | PatchOp::SetFontSize { sheet, .. }
            | PatchOp::SetFontColor { sheet, .. }
            | PatchOp::SetFillColor { sheet, .. }
            | PatchOp::SetDimensions { sheet, .. }
            | PatchOp::SetAlignment { sheet, .. }
            | PatchOp::SetStyle { sheet, .. }
            | PatchOp::DrawGridBorder { sheet, .. }
            | PatchOp::MergeCells { sheet, .. }
            | PatchOp::UnmergeCells { sheet, .. }
            | PatchOp::AutoFitColumns { sheet, .. }
            | PatchOp::ApplyTableStyle { sheet, .. }
            | PatchOp::CreateChart { sheet, .. }
            | PatchOp::RestoreDesignSnapshot { sheet, .. } => sheet,
        }
    }

    /// Target locator used in diff entries and error context.
    pub fn locator(&self) -> String {
        match self {
            PatchOp::AddSheet { .. }
            | PatchOp::SetDimensions { .. }
            | PatchOp::AutoFitColumns { .. }
            | PatchOp::RestoreDesignSnapshot { .. } => String::new(),
            PatchOp::SetValue { cell, .. }
            | PatchOp::SetFormula { cell, .. }
            | PatchOp::SetValueIf { cell, .. }
            | PatchOp::SetFormulaIf { cell, .. } => cell.clone(),
            PatchOp::SetRangeValues { range, .. }
            | PatchOp::FillFormula { range, .. }
            | PatchOp::MergeCells { range, .. }
            | PatchOp::UnmergeCells { range, .. }
            | PatchOp::ApplyTableStyle { range, .. } => range.clone(),
            PatchOp::SetBold { cell, range, .. }
            | PatchOp::SetFontSize { cell, range, .. }
            | PatchOp::SetFontColor { cell, range, .. }
            | PatchOp::SetFillColor { cell, range, .. }
            | PatchOp::SetAlignment { cell, range, .. }
            | PatchOp::SetStyle { cell, range, .. } => cell
                .clone()
                .or_else(|| range.clone())
                .unwrap_or_default(),
            PatchOp::DrawGridBorder { base_cell, .. } => base_cell.clone(),
            PatchOp::CreateChart { anchor_cell, .. } => anchor_cell.clone(),
        }
    }

    /// Cell-or-range target for style kinds, when present.
    pub fn style_target(&self) -> Option<&str> {
        match self {
            PatchOp::SetBold { cell, range, .. }
            | PatchOp::SetFontSize { cell, range, .. }
            | PatchOp::SetFontColor { cell, range, .. }
            | PatchOp::SetFillColor { cell, range, .. }
            | PatchOp::SetAlignment { cell, range, .. }
            | PatchOp::SetStyle { cell, range, .. } => {
                cell.as_deref().or(range.as_deref())
            }
            _ => None,
        }
    }

    pub fn is_design(&self) -> bool {
        self.spec().design
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_round_trip() {
        let op = PatchOp::SetValue {
            sheet: "Sheet1".to_string(),
            cell: "A1".to_string(),
            value: json!(42),
        };
        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(encoded["kind"], "set_value");
        let decoded: PatchOp = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn kind_names_match_registry() {
        for spec in crate::patch::registry::all_specs() {
            let kind: PatchOpKind = spec.kind.parse().unwrap();
            assert_eq!(kind.to_string(), spec.kind);
        }
    }

    #[test]
    fn chart_defaults_apply() {
        let op: PatchOp = serde_json::from_value(json!({
            "kind": "create_chart",
            "sheet": "S",
            "chart_type": "line",
            "data_range": "A1:B5",
            "anchor_cell": "D2"
        }))
        .unwrap();
        match op {
            PatchOp::CreateChart { titles_from_data, series_from_rows, .. } => {
                assert!(titles_from_data);
                assert!(!series_from_rows);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn data_range_accepts_string_or_list() {
        let single: DataRange = serde_json::from_value(json!("A1:B5")).unwrap();
        assert_eq!(single.ranges(), vec!["A1:B5"]);
        let many: DataRange = serde_json::from_value(json!(["A1:A5", "C1:C5"])).unwrap();
        assert_eq!(many.ranges().len(), 2);
    }
}
