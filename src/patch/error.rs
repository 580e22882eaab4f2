use crate::patch::model::PatchErrorDetail;
use crate::patch::op::PatchOp;
use crate::patch::registry;
use thiserror::Error;

pub const ERR_INVALID_RANGE: &str = "invalid_range";
pub const ERR_SHEET_NOT_FOUND: &str = "sheet_not_found";
pub const ERR_UNKNOWN_OPERATION_KIND: &str = "unknown_operation_kind";
pub const ERR_CONFLICTING_INPUT: &str = "conflicting_input";
pub const ERR_CHART_TYPE_INVALID: &str = "chart_type_invalid";
pub const ERR_CHART_NAME_CONFLICT: &str = "chart_name_conflict";
pub const ERR_TABLE_NAME_CONFLICT: &str = "table_name_conflict";
pub const ERR_TABLE_RANGE_INTERSECTION: &str = "table_range_intersection";
pub const ERR_TABLE_STYLE_INVALID: &str = "table_style_invalid";
pub const ERR_LIST_OBJECT_ADD_FAILED: &str = "list_object_add_failed";
pub const ERR_COM_API_MISSING: &str = "com_api_missing";
pub const ERR_INVALID_PARAMETER: &str = "invalid_parameter";
pub const ERR_COM_RUNTIME: &str = "com_runtime_error";
pub const ERR_OPERATION_FAILED: &str = "operation_failed";

/// A failed patch operation, enriched with enough context to build the
/// final error detail and to decide on engine fallback.
#[derive(Debug, Clone, Error)]
#[error("ops[{op_index}] {op_kind}: {message}")]
pub struct PatchOpError {
    pub op_index: usize,
    pub op_kind: String,
    pub sheet: String,
    pub cell: String,
    pub message: String,
    pub error_code: Option<String>,
    pub failed_field: Option<String>,
    pub raw_backend_message: Option<String>,
}

impl PatchOpError {
    /// Wrap an engine failure, classifying the message into a structured
    /// code and inferring the failed field where the text allows it.
    pub fn from_op(
        op_index: usize,
        op: &PatchOp,
        message: impl Into<String>,
        raw_backend_message: Option<String>,
    ) -> Self {
        let message = message.into();
        let raw = raw_backend_message.or_else(|| extract_raw_backend_message(&message));
        let (error_code, failed_field) = classify_message(&message, raw.as_deref());
        Self {
            op_index,
            op_kind: op.kind_name(),
            sheet: op.sheet().to_string(),
            cell: op.locator(),
            message,
            error_code: Some(error_code.to_string()),
            failed_field,
            raw_backend_message: raw,
        }
    }

    /// A validation failure with a known offending field.
    pub fn validation(
        op_index: usize,
        op_kind: impl Into<String>,
        sheet: impl Into<String>,
        cell: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            op_index,
            op_kind: op_kind.into(),
            sheet: sheet.into(),
            cell: cell.into(),
            message: message.into(),
            error_code: Some(ERR_INVALID_PARAMETER.to_string()),
            failed_field: Some(field.into()),
            raw_backend_message: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    /// Whether an auto-selected live engine should retry on the file engine.
    /// Only transient runtime-layer failures qualify.
    pub fn is_live_runtime_error(&self) -> bool {
        self.error_code.as_deref() == Some(ERR_COM_RUNTIME) || self.raw_backend_message.is_some()
    }

    pub fn into_detail(self) -> PatchErrorDetail {
        let guidance = self
            .error_code
            .as_deref()
            .and_then(|code| guidance_for(code, &self.op_kind));
        let (hint, expected_fields, example) = match guidance {
            Some(g) => (Some(g.hint), g.expected_fields, g.example),
            None => (None, None, None),
        };
        PatchErrorDetail {
            op_index: Some(self.op_index),
            op: Some(self.op_kind),
            sheet: if self.sheet.is_empty() { None } else { Some(self.sheet) },
            cell: if self.cell.is_empty() { None } else { Some(self.cell) },
            message: self.message,
            error_code: self.error_code,
            failed_field: self.failed_field,
            raw_backend_message: self.raw_backend_message,
            hint,
            expected_fields,
            example,
        }
    }
}

/// Engine-level failure: either a classified per-op error, or a request
/// failure outside any op (workbook read/write, staging).
#[derive(Debug, Error)]
pub enum EngineFailure {
    #[error(transparent)]
    Op(#[from] PatchOpError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineFailure {
    pub fn into_detail(self) -> PatchErrorDetail {
        match self {
            EngineFailure::Op(err) => err.into_detail(),
            EngineFailure::Other(err) => PatchErrorDetail {
                message: format!("{err:#}"),
                error_code: Some(ERR_OPERATION_FAILED.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn is_live_runtime_error(&self) -> bool {
        match self {
            EngineFailure::Op(err) => err.is_live_runtime_error(),
            EngineFailure::Other(_) => false,
        }
    }
}

/// Host automation errors surface hresult codes; treat those markers as
/// evidence of a raw backend message worth preserving.
pub fn extract_raw_backend_message(message: &str) -> Option<String> {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("hresult") || lowered.contains("-2147") {
        Some(message.to_string())
    } else {
        None
    }
}

fn classify_message(message: &str, raw: Option<&str>) -> (&'static str, Option<String>) {
    let lowered = message.to_ascii_lowercase();

    if lowered.contains("unknown operation kind") {
        return (ERR_UNKNOWN_OPERATION_KIND, Some("kind".to_string()));
    }
    if lowered.contains("conflicting values") {
        return (ERR_CONFLICTING_INPUT, None);
    }
    if lowered.contains("unsupported chart_type") {
        return (ERR_CHART_TYPE_INVALID, Some("chart_type".to_string()));
    }
    if lowered.contains("sheet") && lowered.contains("not found") {
        return (ERR_SHEET_NOT_FOUND, Some("sheet".to_string()));
    }
    if lowered.contains("invalid range") || lowered.contains("invalid cell") {
        // The category range produces the same host message as the data
        // range; disambiguate on the contextual token.
        let field = if lowered.contains("category") {
            "category_range"
        } else if lowered.contains("data") {
            "data_range"
        } else {
            "range"
        };
        return (ERR_INVALID_RANGE, Some(field.to_string()));
    }
    if lowered.contains("chart name") && (lowered.contains("exists") || lowered.contains("in use")) {
        return (ERR_CHART_NAME_CONFLICT, Some("chart_name".to_string()));
    }
    if lowered.contains("table name") && (lowered.contains("exists") || lowered.contains("in use")) {
        return (ERR_TABLE_NAME_CONFLICT, Some("table_name".to_string()));
    }
    if lowered.contains("table") && (lowered.contains("intersect") || lowered.contains("overlap")) {
        return (ERR_TABLE_RANGE_INTERSECTION, Some("range".to_string()));
    }
    if lowered.contains("table style") {
        return (ERR_TABLE_STYLE_INVALID, Some("style_name".to_string()));
    }
    if lowered.contains("listobjects.add failed") {
        return (ERR_LIST_OBJECT_ADD_FAILED, Some("range".to_string()));
    }
    if lowered.contains("no member") || lowered.contains("api missing") {
        return (ERR_COM_API_MISSING, None);
    }
    if lowered.contains("invalid parameter") {
        return (ERR_INVALID_PARAMETER, None);
    }
    if raw.is_some() {
        return (ERR_COM_RUNTIME, None);
    }
    (ERR_OPERATION_FAILED, None)
}

struct Guidance {
    hint: String,
    expected_fields: Option<Vec<String>>,
    example: Option<String>,
}

fn guidance_for(code: &str, op_kind: &str) -> Option<Guidance> {
    let spec = registry::spec_for(op_kind).ok();
    let expected_fields = spec.map(|s| {
        s.declared_fields()
            .iter()
            .filter(|f| **f != "kind")
            .map(|f| (*f).to_string())
            .collect::<Vec<_>>()
    });
    let example = spec.map(|s| s.example.to_string());

    let hint = match code {
        ERR_INVALID_RANGE => "Use A1 notation like 'B2' or 'A1:C10'; chart ranges may carry a 'Sheet'! prefix.",
        ERR_SHEET_NOT_FOUND => "Check the sheet name or create it first with add_sheet.",
        ERR_UNKNOWN_OPERATION_KIND => "Use one of the supported op kinds; see list_patch_ops.",
        ERR_CONFLICTING_INPUT => "Pass either the alias or the canonical field, not both with different values.",
        ERR_CHART_TYPE_INVALID => "Pick a supported chart_type such as line, column, bar, pie or doughnut.",
        ERR_CHART_NAME_CONFLICT => "Choose a chart_name not already used on the sheet, or omit it.",
        ERR_TABLE_NAME_CONFLICT => "Choose a table_name not already used in the workbook, or omit it.",
        ERR_TABLE_RANGE_INTERSECTION => "Move the range so it does not overlap an existing table.",
        ERR_TABLE_STYLE_INVALID => "Use a built-in style name like 'TableStyleMedium9'.",
        ERR_LIST_OBJECT_ADD_FAILED => "The host refused every table-creation signature; verify the range and sheet.",
        ERR_COM_API_MISSING => "The live host does not expose the required API; retry with backend 'file' where supported.",
        ERR_INVALID_PARAMETER => "One of the op fields has an invalid value; check the reported field.",
        ERR_COM_RUNTIME => "Transient automation failure; under backend 'auto' the file engine is retried automatically.",
        _ => return None,
    };

    Some(Guidance {
        hint: hint.to_string(),
        expected_fields,
        example,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_op() -> PatchOp {
        serde_json::from_value(json!({
            "kind": "create_chart",
            "sheet": "S",
            "chart_type": "line",
            "data_range": "A1:B5",
            "anchor_cell": "D2"
        }))
        .unwrap()
    }

    #[test]
    fn category_token_routes_failed_field() {
        let err = PatchOpError::from_op(3, &sample_op(), "Invalid range for category axis", None);
        assert_eq!(err.error_code.as_deref(), Some(ERR_INVALID_RANGE));
        assert_eq!(err.failed_field.as_deref(), Some("category_range"));

        let err = PatchOpError::from_op(3, &sample_op(), "Invalid range in data source", None);
        assert_eq!(err.failed_field.as_deref(), Some("data_range"));
    }

    #[test]
    fn hresult_marks_runtime_error() {
        let err = PatchOpError::from_op(
            0,
            &sample_op(),
            "call failed (HRESULT 0x800A03EC, -2146827284)",
            None,
        );
        assert!(err.raw_backend_message.is_some());
        let err = PatchOpError::from_op(0, &sample_op(), "exception code -2147352567", None);
        assert_eq!(err.error_code.as_deref(), Some(ERR_COM_RUNTIME));
        assert!(err.is_live_runtime_error());
    }

    #[test]
    fn detail_carries_guidance() {
        let err = PatchOpError::from_op(1, &sample_op(), "Unsupported chart_type 'bubble'", None);
        let detail = err.into_detail();
        assert_eq!(detail.error_code.as_deref(), Some(ERR_CHART_TYPE_INVALID));
        assert!(detail.hint.unwrap().contains("chart_type"));
        assert!(detail.expected_fields.unwrap().contains(&"data_range".to_string()));
        assert!(detail.example.unwrap().contains("create_chart"));
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = PatchOpError::validation(2, "set_value", "S", "A1", "cell", "Invalid cell reference: A0");
        assert!(!err.is_live_runtime_error());
        assert_eq!(err.failed_field.as_deref(), Some("cell"));
    }
}
