use crate::patch::op::PatchOp;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Requested execution backend. `auto` lets the selector decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Auto,
    File,
    Live,
}

/// Engine that actually executed a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    File,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    #[default]
    Overwrite,
    Skip,
    Rename,
}

/// A batch patch request. `ops` stay as raw JSON objects until the
/// normalizer has resolved aliases and defaults.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PatchRequest {
    pub path: PathBuf,
    pub ops: Vec<serde_json::Value>,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub want_inverse_ops: bool,
    #[serde(default)]
    pub preflight_formula_check: bool,
    #[serde(default)]
    pub default_sheet: Option<String>,
    #[serde(default)]
    pub on_conflict: OnConflict,
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub out_name: Option<String>,
    /// Permit the resolved output path to replace the input workbook.
    #[serde(default)]
    pub allow_overwrite: bool,
}

/// Seed a fresh workbook, then run an optional patch over it.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MakeRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub ops: Vec<serde_json::Value>,
    #[serde(default)]
    pub default_sheet: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Applied,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatchValueKind {
    Value,
    Formula,
    Sheet,
    Style,
    Dimension,
    Chart,
}

/// Typed before/after value inside a diff entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatchValue {
    pub kind: PatchValueKind,
    pub value: serde_json::Value,
}

impl PatchValue {
    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        Self {
            kind: PatchValueKind::Value,
            value: value.into(),
        }
    }

    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            kind: PatchValueKind::Formula,
            value: serde_json::Value::String(formula.into()),
        }
    }

    pub fn sheet(name: impl Into<String>) -> Self {
        Self {
            kind: PatchValueKind::Sheet,
            value: serde_json::Value::String(name.into()),
        }
    }

    pub fn style(value: impl Into<serde_json::Value>) -> Self {
        Self {
            kind: PatchValueKind::Style,
            value: value.into(),
        }
    }

    pub fn dimension(value: impl Into<serde_json::Value>) -> Self {
        Self {
            kind: PatchValueKind::Dimension,
            value: value.into(),
        }
    }

    pub fn chart(value: impl Into<serde_json::Value>) -> Self {
        Self {
            kind: PatchValueKind::Chart,
            value: value.into(),
        }
    }
}

/// Outcome record for one executed operation, returned in request order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DiffEntry {
    pub op_index: usize,
    pub op: String,
    pub sheet: String,
    pub cell: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<PatchValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<PatchValue>,
    pub status: PatchStatus,
}

/// Populated only when the whole request fails; first failure wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PatchErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_backend_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FormulaIssueLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FormulaIssue {
    pub sheet: String,
    pub cell: String,
    pub code: String,
    pub level: FormulaIssueLevel,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FontSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FillSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlignmentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BorderSideSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BordersSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<BorderSideSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<BorderSideSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<BorderSideSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<BorderSideSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergeStateSnapshot {
    /// Range whose merge membership was captured.
    pub scope: String,
    /// Merged ranges intersecting the scope at capture time.
    pub ranges: Vec<String>,
}

/// Captured prior design state for a target, keyed by cell address (styles)
/// or row number / column label (dimensions). Powers inverse ops and the
/// restore_design_snapshot kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DesignSnapshot {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub borders: BTreeMap<String, BordersSnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fonts: BTreeMap<String, FontSnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fills: BTreeMap<String, FillSnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alignments: BTreeMap<String, AlignmentSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_state: Option<MergeStateSnapshot>,
    /// Row number -> prior height (null means default height).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub row_dimensions: BTreeMap<String, Option<f64>>,
    /// Column label -> prior width (null means default width).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_dimensions: BTreeMap<String, Option<f64>>,
}

impl DesignSnapshot {
    pub fn is_empty(&self) -> bool {
        self.borders.is_empty()
            && self.fonts.is_empty()
            && self.fills.is_empty()
            && self.alignments.is_empty()
            && self.merge_state.is_none()
            && self.row_dimensions.is_empty()
            && self.column_dimensions.is_empty()
    }

    /// Stable short id over the canonical JSON form, used in diff values.
    pub fn stable_id(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let hex = format!("{digest:x}");
        hex.chars().take(12).collect()
    }
}

/// One row of the op catalog returned by `list_patch_ops`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpSummary {
    pub kind: String,
    pub summary: String,
    pub routing: String,
    pub design: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpCatalogResponse {
    pub ops: Vec<OpSummary>,
    pub count: usize,
}

/// Full field contract for one op kind, returned by `describe_patch_op`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OpDescribeResponse {
    pub kind: String,
    pub summary: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    /// Accepted alias -> canonical field pairs.
    pub aliases: Vec<(String, String)>,
    pub target: String,
    pub routing: String,
    pub design: bool,
    pub example: String,
}

/// Final response for a patch or make request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_used: Option<EngineKind>,
    pub diff: Vec<DiffEntry>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inverse_ops: Vec<PatchOp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formula_issues: Vec<FormulaIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PatchErrorDetail>,
    pub completed_at: DateTime<Utc>,
}

impl PatchResult {
    pub fn empty() -> Self {
        Self {
            out_path: None,
            engine_used: None,
            diff: Vec::new(),
            warnings: Vec::new(),
            inverse_ops: Vec::new(),
            formula_issues: Vec::new(),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(error: PatchErrorDetail) -> Self {
        let mut result = Self::empty();
        result.error = Some(error);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_id_is_stable_and_short() {
        let mut snapshot = DesignSnapshot::default();
        snapshot
            .fonts
            .insert("A1".to_string(), FontSnapshot { bold: Some(true), ..Default::default() });
        let first = snapshot.stable_id();
        assert_eq!(first.len(), 12);
        assert_eq!(first, snapshot.stable_id());

        snapshot
            .fonts
            .insert("B1".to_string(), FontSnapshot::default());
        assert_ne!(first, snapshot.stable_id());
    }

    #[test]
    fn empty_snapshot_reports_empty() {
        assert!(DesignSnapshot::default().is_empty());
    }

    #[test]
    fn backend_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Backend::Auto).unwrap(), "\"auto\"");
        assert_eq!(serde_json::to_string(&Backend::Live).unwrap(), "\"live\"");
    }
}
