use crate::patch::model::{Backend, MakeRequest, OnConflict, PatchRequest};
use crate::patch::service::PatchOrchestrator;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;

pub struct PatchArgs {
    pub file: PathBuf,
    pub ops: String,
    pub backend: Backend,
    pub dry_run: bool,
    pub want_inverse_ops: bool,
    pub preflight_formula_check: bool,
    pub default_sheet: Option<String>,
    pub on_conflict: OnConflict,
    pub out_dir: Option<PathBuf>,
    pub out_name: Option<String>,
    pub allow_overwrite: bool,
}

pub async fn patch(args: PatchArgs) -> Result<Value> {
    let ops = read_ops(&args.ops)?;
    let request = PatchRequest {
        path: args.file,
        ops,
        backend: args.backend,
        dry_run: args.dry_run,
        want_inverse_ops: args.want_inverse_ops,
        preflight_formula_check: args.preflight_formula_check,
        default_sheet: args.default_sheet,
        on_conflict: args.on_conflict,
        out_dir: args.out_dir,
        out_name: args.out_name,
        allow_overwrite: args.allow_overwrite,
    };
    let result = PatchOrchestrator::file_only().run_patch(&request);
    Ok(serde_json::to_value(result)?)
}

pub async fn make(
    file: PathBuf,
    sheet_name: Option<String>,
    ops: Option<String>,
    default_sheet: Option<String>,
    overwrite: bool,
) -> Result<Value> {
    let ops = match ops {
        Some(spec) => read_ops(&spec)?,
        None => Vec::new(),
    };
    let request = MakeRequest {
        path: file,
        sheet_name,
        ops,
        default_sheet,
        overwrite,
    };
    let result = PatchOrchestrator::file_only().run_make(&request);
    Ok(serde_json::to_value(result)?)
}

/// Ops come inline as a JSON array, or from a file via `@path`.
fn read_ops(spec: &str) -> Result<Vec<Value>> {
    let text = if let Some(path) = spec.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("failed to read ops file {path}"))?
    } else {
        spec.to_string()
    };
    let parsed: Value =
        serde_json::from_str(&text).context("ops must be a JSON array of op objects")?;
    match parsed {
        Value::Array(items) => Ok(items),
        _ => anyhow::bail!("ops must be a JSON array of op objects"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_ops_parse_as_array() {
        let ops = read_ops(r#"[{"kind":"set_value","cell":"A1","value":1}]"#).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0]["kind"], "set_value");
    }

    #[test]
    fn non_array_ops_are_rejected() {
        let err = read_ops(r#"{"kind":"set_value"}"#).unwrap_err();
        assert!(err.to_string().contains("JSON array"));
    }
}
