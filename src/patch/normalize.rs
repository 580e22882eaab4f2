use crate::patch::a1;
use crate::patch::error::{ERR_CONFLICTING_INPUT, ERR_UNKNOWN_OPERATION_KIND, PatchOpError};
use crate::patch::op::PatchOp;
use crate::patch::registry::{self, OpSpec, TargetRule};
use serde_json::{Map, Value};

const GENERIC_EXAMPLE: &str = r#"{"kind":"set_value","sheet":"Sheet1","cell":"A1","value":"hello"}"#;

/// Normalize raw JSON ops into typed `PatchOp`s: alias resolution with
/// conflict detection, grid-border range shorthand expansion, default
/// sheet injection, closed-schema enforcement. Caller input is never
/// mutated.
pub fn normalize_ops(
    raw_ops: &[Value],
    default_sheet: Option<&str>,
) -> Result<Vec<PatchOp>, PatchOpError> {
    raw_ops
        .iter()
        .enumerate()
        .map(|(index, raw)| normalize_op(index, raw, default_sheet))
        .collect()
}

fn normalize_op(
    index: usize,
    raw: &Value,
    default_sheet: Option<&str>,
) -> Result<PatchOp, PatchOpError> {
    let Some(object) = raw.as_object() else {
        return Err(shape_error(
            index,
            "operation must be a JSON object",
            GENERIC_EXAMPLE,
        ));
    };

    let Some(kind) = object.get("kind").and_then(Value::as_str) else {
        return Err(shape_error(
            index,
            "missing string field 'kind'",
            GENERIC_EXAMPLE,
        ));
    };

    let spec = registry::spec_for(kind).map_err(|err| {
        PatchOpError::validation(index, kind, "", "", "kind", err.to_string())
            .with_code(ERR_UNKNOWN_OPERATION_KIND)
    })?;

    let mut fields = object.clone();
    resolve_aliases(index, spec, &mut fields)?;
    if spec.target == TargetRule::Grid {
        expand_grid_range_shorthand(index, spec, &mut fields)?;
    }
    reject_undeclared_fields(index, spec, &fields)?;
    inject_default_sheet(index, spec, &mut fields, default_sheet)?;

    serde_json::from_value(Value::Object(fields)).map_err(|err| {
        shape_error_for_kind(index, spec, &err.to_string())
    })
}

fn resolve_aliases(
    index: usize,
    spec: &OpSpec,
    fields: &mut Map<String, Value>,
) -> Result<(), PatchOpError> {
    for (alias, canonical) in spec.aliases {
        let Some(alias_value) = fields.get(*alias).cloned() else {
            continue;
        };
        if let Some(canonical_value) = fields.get(*canonical) {
            if canonical_value != &alias_value {
                return Err(PatchOpError::validation(
                    index,
                    spec.kind,
                    sheet_hint(fields),
                    "",
                    *canonical,
                    format!(
                        "Conflicting values for '{canonical}' and alias '{alias}'"
                    ),
                )
                .with_code(ERR_CONFLICTING_INPUT));
            }
        } else {
            fields.insert((*canonical).to_string(), alias_value);
        }
        fields.remove(*alias);
    }
    Ok(())
}

/// `draw_grid_border` accepts `range` as shorthand for
/// `base_cell` + `row_count` + `col_count`. Mixing both forms is an error.
fn expand_grid_range_shorthand(
    index: usize,
    spec: &OpSpec,
    fields: &mut Map<String, Value>,
) -> Result<(), PatchOpError> {
    let Some(range_value) = fields.get("range").cloned() else {
        return Ok(());
    };
    let explicit = ["base_cell", "row_count", "col_count"]
        .iter()
        .any(|f| fields.contains_key(*f));
    if explicit {
        return Err(PatchOpError::validation(
            index,
            spec.kind,
            sheet_hint(fields),
            "",
            "range",
            "Pass either 'range' or base_cell/row_count/col_count, not both",
        ));
    }
    let Some(range) = range_value.as_str() else {
        return Err(PatchOpError::validation(
            index,
            spec.kind,
            sheet_hint(fields),
            "",
            "range",
            "'range' must be an A1 range string",
        ));
    };
    let (base_cell, rows, cols) = a1::parse_range_geometry(range).map_err(|err| {
        PatchOpError::validation(index, spec.kind, sheet_hint(fields), "", "range", err.to_string())
    })?;
    fields.remove("range");
    fields.insert("base_cell".to_string(), Value::String(base_cell));
    fields.insert("row_count".to_string(), Value::from(rows));
    fields.insert("col_count".to_string(), Value::from(cols));
    Ok(())
}

fn reject_undeclared_fields(
    index: usize,
    spec: &OpSpec,
    fields: &Map<String, Value>,
) -> Result<(), PatchOpError> {
    let declared = spec.declared_fields();
    for key in fields.keys() {
        if !declared.contains(&key.as_str()) {
            return Err(PatchOpError::validation(
                index,
                spec.kind,
                sheet_hint(fields),
                "",
                key.clone(),
                format!("unexpected field '{}' for {}", key, spec.kind),
            ));
        }
    }
    Ok(())
}

fn inject_default_sheet(
    index: usize,
    spec: &OpSpec,
    fields: &mut Map<String, Value>,
    default_sheet: Option<&str>,
) -> Result<(), PatchOpError> {
    if fields.get("sheet").is_some_and(|v| v.is_string()) {
        return Ok(());
    }
    if spec.kind == "add_sheet" {
        return Err(PatchOpError::validation(
            index,
            spec.kind,
            "",
            "",
            "sheet",
            "add_sheet requires an explicit sheet name",
        ));
    }
    match default_sheet {
        Some(sheet) => {
            fields.insert("sheet".to_string(), Value::String(sheet.to_string()));
            Ok(())
        }
        None => Err(PatchOpError::validation(
            index,
            spec.kind,
            "",
            "",
            "sheet",
            format!(
                "Missing 'sheet' for {} and no default_sheet was provided",
                spec.kind
            ),
        )),
    }
}

fn sheet_hint(fields: &Map<String, Value>) -> String {
    fields
        .get("sheet")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn shape_error(index: usize, reason: &str, example: &str) -> PatchOpError {
    PatchOpError::validation(
        index,
        "",
        "",
        "",
        "kind",
        format!("Invalid patch operation at ops[{index}]: {reason}. Use object form like {example}."),
    )
}

fn shape_error_for_kind(index: usize, spec: &OpSpec, reason: &str) -> PatchOpError {
    PatchOpError::validation(
        index,
        spec.kind,
        "",
        "",
        "",
        format!(
            "Invalid patch operation at ops[{index}]: {reason}. Use object form like {example}.",
            example = spec.example
        ),
    )
}
