use crate::patch::model::{OpCatalogResponse, OpDescribeResponse, OpSummary};
use anyhow::{Result, bail};
use indexmap::IndexMap;
use once_cell::sync::Lazy;

/// How an operation addresses cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRule {
    /// No cell/range locator at all.
    None,
    /// Exactly `cell`.
    Cell,
    /// Exactly `range`.
    Range,
    /// Exactly one of `cell` or `range`.
    CellOrRange,
    /// `base_cell` + `row_count` + `col_count`, with a `range` shorthand.
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Either engine can run it.
    Any,
    /// Only the live automation engine supports it.
    LiveOnly,
    /// Only the file engine supports it.
    FileOnly,
}

impl Routing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Routing::Any => "any",
            Routing::LiveOnly => "live_only",
            Routing::FileOnly => "file_only",
        }
    }
}

impl TargetRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRule::None => "none",
            TargetRule::Cell => "cell",
            TargetRule::Range => "range",
            TargetRule::CellOrRange => "cell_or_range",
            TargetRule::Grid => "grid",
        }
    }
}

/// Declarative field contract for one operation kind. Single source of
/// truth consumed by the normalizer, the validator, and the
/// list/describe introspection tools.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    pub kind: &'static str,
    pub summary: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub aliases: &'static [(&'static str, &'static str)],
    pub target: TargetRule,
    pub routing: Routing,
    /// Style/dimension/merge ops eligible for design snapshots.
    pub design: bool,
    pub example: &'static str,
}

impl OpSpec {
    /// Every canonical field accepted for this kind, including the tag
    /// and locator fields implied by the target rule.
    pub fn declared_fields(&self) -> Vec<&'static str> {
        let mut fields = vec!["kind"];
        fields.extend_from_slice(self.required);
        fields.extend_from_slice(self.optional);
        match self.target {
            TargetRule::None => {}
            TargetRule::Cell => fields.push("cell"),
            TargetRule::Range => fields.push("range"),
            TargetRule::CellOrRange => {
                fields.push("cell");
                fields.push("range");
            }
            TargetRule::Grid => {
                fields.push("base_cell");
                fields.push("row_count");
                fields.push("col_count");
                fields.push("range");
            }
        }
        if !fields.contains(&"sheet") {
            fields.push("sheet");
        }
        fields
    }

    pub fn accepts_field(&self, name: &str) -> bool {
        self.declared_fields().contains(&name) || self.aliases.iter().any(|(a, _)| *a == name)
    }
}

macro_rules! specs {
    ($(($kind:literal, $summary:literal, req: [$($req:literal),*], opt: [$($opt:literal),*],
        alias: [$(($a:literal, $c:literal)),*], $target:expr, $routing:expr, design: $design:literal,
        example: $example:literal)),* $(,)?) => {
        [$(OpSpec {
            kind: $kind,
            summary: $summary,
            required: &[$($req),*],
            optional: &[$($opt),*],
            aliases: &[$(($a, $c)),*],
            target: $target,
            routing: $routing,
            design: $design,
            example: $example,
        }),*]
    };
}

static OP_SPECS: &[OpSpec] = &specs![
    (
        "add_sheet", "Create a new worksheet",
        req: ["sheet"], opt: [], alias: [("name", "sheet")],
        TargetRule::None, Routing::Any, design: false,
        example: r#"{"kind":"add_sheet","sheet":"Data"}"#
    ),
    (
        "set_value", "Write a literal value into one cell",
        req: ["sheet", "value"], opt: [], alias: [],
        TargetRule::Cell, Routing::Any, design: false,
        example: r#"{"kind":"set_value","sheet":"Sheet1","cell":"A1","value":"hello"}"#
    ),
    (
        "set_formula", "Write a formula into one cell",
        req: ["sheet", "formula"], opt: [], alias: [],
        TargetRule::Cell, Routing::Any, design: false,
        example: r#"{"kind":"set_formula","sheet":"Sheet1","cell":"C1","formula":"=SUM(A1:B1)"}"#
    ),
    (
        "set_value_if", "Write a value only when the current value matches `expected`",
        req: ["sheet", "expected", "value"], opt: [], alias: [],
        TargetRule::Cell, Routing::Any, design: false,
        example: r#"{"kind":"set_value_if","sheet":"Sheet1","cell":"A1","expected":"old","value":"new"}"#
    ),
    (
        "set_formula_if", "Write a formula only when the current value matches `expected`",
        req: ["sheet", "expected", "formula"], opt: [], alias: [],
        TargetRule::Cell, Routing::Any, design: false,
        example: r#"{"kind":"set_formula_if","sheet":"Sheet1","cell":"C1","expected":"0","formula":"=SUM(A:A)"}"#
    ),
    (
        "set_range_values", "Write a rectangular matrix of values into a range",
        req: ["sheet", "values"], opt: [], alias: [],
        TargetRule::Range, Routing::Any, design: false,
        example: r#"{"kind":"set_range_values","sheet":"Sheet1","range":"A1:B2","values":[[1,2],[3,4]]}"#
    ),
    (
        "fill_formula", "Fill a single row or column range with a translated formula",
        req: ["sheet", "formula"], opt: [], alias: [],
        TargetRule::Range, Routing::Any, design: false,
        example: r#"{"kind":"fill_formula","sheet":"Sheet1","range":"C1:C10","formula":"=A1+B1"}"#
    ),
    (
        "set_bold", "Toggle bold on a cell or range",
        req: ["sheet"], opt: ["bold"], alias: [],
        TargetRule::CellOrRange, Routing::Any, design: true,
        example: r#"{"kind":"set_bold","sheet":"Sheet1","range":"A1:D1","bold":true}"#
    ),
    (
        "set_font_size", "Set the font size of a cell or range",
        req: ["sheet", "font_size"], opt: [], alias: [],
        TargetRule::CellOrRange, Routing::Any, design: true,
        example: r#"{"kind":"set_font_size","sheet":"Sheet1","cell":"A1","font_size":14}"#
    ),
    (
        "set_font_color", "Set the font color of a cell or range",
        req: ["sheet", "font_color"], opt: [], alias: [],
        TargetRule::CellOrRange, Routing::Any, design: true,
        example: r##"{"kind":"set_font_color","sheet":"Sheet1","cell":"A1","font_color":"#FF0000"}"##
    ),
    (
        "set_fill_color", "Set the background fill color of a cell or range",
        req: ["sheet", "fill_color"], opt: [], alias: [("color", "fill_color")],
        TargetRule::CellOrRange, Routing::Any, design: true,
        example: r##"{"kind":"set_fill_color","sheet":"Sheet1","range":"A1:D1","fill_color":"#1F4E79"}"##
    ),
    (
        "set_dimensions", "Set row heights and/or column widths",
        req: ["sheet"], opt: ["rows", "row_height", "columns", "column_width"],
        alias: [("row", "rows"), ("col", "columns"), ("column", "columns"),
                ("height", "row_height"), ("width", "column_width")],
        TargetRule::None, Routing::Any, design: true,
        example: r#"{"kind":"set_dimensions","sheet":"Sheet1","columns":["A","B"],"column_width":18}"#
    ),
    (
        "set_alignment", "Set horizontal/vertical alignment on a cell or range",
        req: ["sheet"], opt: ["horizontal_align", "vertical_align"],
        alias: [("horizontal", "horizontal_align"), ("vertical", "vertical_align")],
        TargetRule::CellOrRange, Routing::Any, design: true,
        example: r#"{"kind":"set_alignment","sheet":"Sheet1","range":"A1:D1","horizontal_align":"center"}"#
    ),
    (
        "set_style", "Apply several style attributes to a cell or range in one op",
        req: ["sheet"],
        opt: ["bold", "font_size", "font_color", "fill_color", "horizontal_align", "vertical_align"],
        alias: [],
        TargetRule::CellOrRange, Routing::Any, design: true,
        example: r##"{"kind":"set_style","sheet":"Sheet1","range":"A1:D1","bold":true,"fill_color":"#DDEBF7"}"##
    ),
    (
        "draw_grid_border", "Draw thin borders around every cell of a grid",
        req: ["sheet"], opt: [], alias: [],
        TargetRule::Grid, Routing::Any, design: true,
        example: r#"{"kind":"draw_grid_border","sheet":"Sheet1","base_cell":"A1","row_count":5,"col_count":3}"#
    ),
    (
        "merge_cells", "Merge a multi-cell range",
        req: ["sheet"], opt: [], alias: [],
        TargetRule::Range, Routing::Any, design: true,
        example: r#"{"kind":"merge_cells","sheet":"Sheet1","range":"A1:D1"}"#
    ),
    (
        "unmerge_cells", "Remove merges intersecting a range",
        req: ["sheet"], opt: [], alias: [],
        TargetRule::Range, Routing::Any, design: true,
        example: r#"{"kind":"unmerge_cells","sheet":"Sheet1","range":"A1:D1"}"#
    ),
    (
        "auto_fit_columns", "Size columns to their content",
        req: ["sheet"], opt: ["columns", "min_width", "max_width"], alias: [],
        TargetRule::None, Routing::Any, design: true,
        example: r#"{"kind":"auto_fit_columns","sheet":"Sheet1","columns":["A","B","C"]}"#
    ),
    (
        "apply_table_style", "Create or style a table over a range",
        req: ["sheet", "style_name"], opt: ["table_name"], alias: [],
        TargetRule::Range, Routing::Any, design: true,
        example: r#"{"kind":"apply_table_style","sheet":"Sheet1","range":"A1:D10","style_name":"TableStyleMedium9"}"#
    ),
    (
        "create_chart", "Create a chart anchored at a cell",
        req: ["sheet", "chart_type", "data_range", "anchor_cell"],
        opt: ["category_range", "chart_name", "width", "height", "titles_from_data",
              "series_from_rows", "chart_title", "x_axis_title", "y_axis_title"],
        alias: [],
        TargetRule::None, Routing::LiveOnly, design: false,
        example: r#"{"kind":"create_chart","sheet":"Sheet1","chart_type":"column","data_range":"A1:B5","anchor_cell":"D2"}"#
    ),
    (
        "restore_design_snapshot", "Re-apply a previously captured design snapshot",
        req: ["sheet", "snapshot"], opt: [], alias: [],
        TargetRule::None, Routing::FileOnly, design: true,
        example: r#"{"kind":"restore_design_snapshot","sheet":"Sheet1","snapshot":{}}"#
    ),
];

static OP_SPEC_INDEX: Lazy<IndexMap<&'static str, &'static OpSpec>> =
    Lazy::new(|| OP_SPECS.iter().map(|spec| (spec.kind, spec)).collect());

pub fn all_specs() -> impl Iterator<Item = &'static OpSpec> {
    OP_SPEC_INDEX.values().copied()
}

pub fn spec_for(kind: &str) -> Result<&'static OpSpec> {
    match OP_SPEC_INDEX.get(kind) {
        Some(spec) => Ok(spec),
        None => bail!(
            "unknown operation kind '{}'. Supported kinds: {}",
            kind,
            op_kind_names().join(", ")
        ),
    }
}

pub fn op_kind_names() -> Vec<&'static str> {
    OP_SPEC_INDEX.keys().copied().collect()
}

/// Introspection summary for every op kind, in declaration order.
pub fn catalog() -> OpCatalogResponse {
    let ops: Vec<OpSummary> = all_specs()
        .map(|spec| OpSummary {
            kind: spec.kind.to_string(),
            summary: spec.summary.to_string(),
            routing: spec.routing.as_str().to_string(),
            design: spec.design,
        })
        .collect();
    let count = ops.len();
    OpCatalogResponse { ops, count }
}

pub fn describe(kind: &str) -> Result<OpDescribeResponse> {
    let spec = spec_for(kind)?;
    Ok(OpDescribeResponse {
        kind: spec.kind.to_string(),
        summary: spec.summary.to_string(),
        required: spec.required.iter().map(|s| s.to_string()).collect(),
        optional: spec.optional.iter().map(|s| s.to_string()).collect(),
        aliases: spec
            .aliases
            .iter()
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .collect(),
        target: spec.target.as_str().to_string(),
        routing: spec.routing.as_str().to_string(),
        design: spec.design,
        example: spec.example.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_kinds_once() {
        assert_eq!(OP_SPECS.len(), 21);
        assert_eq!(OP_SPEC_INDEX.len(), 21);
    }

    #[test]
    fn unknown_kind_is_rejected_with_supported_list() {
        let err = spec_for("set_colour").unwrap_err().to_string();
        assert!(err.contains("unknown operation kind"));
        assert!(err.contains("set_fill_color"));
    }

    #[test]
    fn alias_fields_are_accepted() {
        let spec = spec_for("set_dimensions").unwrap();
        assert!(spec.accepts_field("width"));
        assert!(spec.accepts_field("column_width"));
        assert!(!spec.accepts_field("fill_color"));
    }

    #[test]
    fn grid_target_declares_shorthand_range() {
        let spec = spec_for("draw_grid_border").unwrap();
        assert!(spec.accepts_field("range"));
        assert!(spec.accepts_field("base_cell"));
    }

    #[test]
    fn examples_parse_as_json() {
        for spec in all_specs() {
            let value: serde_json::Value = serde_json::from_str(spec.example).unwrap();
            assert_eq!(value["kind"], spec.kind);
        }
    }

    #[test]
    fn color_examples_keep_their_hash_prefix() {
        let spec = spec_for("set_font_color").unwrap();
        let value: serde_json::Value = serde_json::from_str(spec.example).unwrap();
        assert_eq!(value["font_color"], "#FF0000");
        let spec = spec_for("set_fill_color").unwrap();
        let value: serde_json::Value = serde_json::from_str(spec.example).unwrap();
        assert_eq!(value["fill_color"], "#1F4E79");
    }
}
