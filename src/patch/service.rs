use crate::patch::engine_file::{self, FileRunOptions};
use crate::patch::error::{ERR_INVALID_PARAMETER, EngineFailure, PatchOpError};
use crate::patch::live::dispatch::{DispatchError, DispatchRef};
use crate::patch::live::engine::LiveEngine;
use crate::patch::model::{
    EngineKind, MakeRequest, PatchErrorDetail, PatchRequest, PatchResult,
};
use crate::patch::normalize::normalize_ops;
use crate::patch::op::PatchOp;
use crate::patch::output;
use crate::patch::select::{self, EngineCaps, SelectOptions, Selection};
use crate::patch::validate::validate_ops;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Batches beyond this size still run, but get flagged.
const SOFT_OP_LIMIT: usize = 200;

const DEFAULT_SEED_SHEET: &str = "Sheet1";

/// Connects to the live automation host on demand. Only constructed on
/// platforms where a host can exist; tests supply scripted fakes.
pub trait LiveConnector: Send + Sync {
    fn connect(&self) -> Result<DispatchRef, DispatchError>;
}

/// Front door for patch and make requests: normalization, validation,
/// engine selection, execution, fallback, and output handling.
pub struct PatchOrchestrator {
    caps: EngineCaps,
    live: Option<Arc<dyn LiveConnector>>,
}

impl PatchOrchestrator {
    pub fn new(caps: EngineCaps, live: Option<Arc<dyn LiveConnector>>) -> Self {
        Self { caps, live }
    }

    pub fn file_only() -> Self {
        Self {
            caps: EngineCaps::default(),
            live: None,
        }
    }

    pub fn run_patch(&self, request: &PatchRequest) -> PatchResult {
        if !request.path.exists() {
            return PatchResult::failed(request_error(format!(
                "Workbook not found: {}",
                request.path.display()
            )));
        }

        let ops = match self.prepare_ops(&request.ops, request.default_sheet.as_deref()) {
            Ok(ops) => ops,
            Err(err) => return PatchResult::failed(err.into_detail()),
        };
        if ops.is_empty() {
            let mut result = PatchResult::empty();
            result
                .warnings
                .push("No operations provided; nothing to do.".to_string());
            return result;
        }

        let mut warnings = Vec::new();
        if ops.len() > SOFT_OP_LIMIT {
            warnings.push(format!(
                "Large batch: {} ops in one request; consider splitting it.",
                ops.len()
            ));
        }

        let options = SelectOptions {
            dry_run: request.dry_run,
            want_inverse_ops: request.want_inverse_ops,
            preflight_formula_check: request.preflight_formula_check,
        };
        let selection = match select::select_engine(request.backend, &ops, options, self.caps) {
            Ok(selection) => selection,
            Err(err) => {
                return PatchResult::failed(PatchErrorDetail {
                    message: err.to_string(),
                    error_code: Some(ERR_INVALID_PARAMETER.to_string()),
                    ..Default::default()
                });
            }
        };
        debug!(engine = ?selection.engine, fallback = selection.allow_fallback, "engine selected");

        let out_path = if request.dry_run {
            None
        } else {
            let resolved = output::resolve_output_path(
                &request.path,
                request.out_dir.as_deref(),
                request.out_name.as_deref(),
            );
            match output::apply_conflict_policy(resolved, request.on_conflict) {
                Ok(outcome) => {
                    // The default-derived name may legitimately resolve to the
                    // input for already-suffixed files; only explicit targets
                    // need the opt-in.
                    let explicit_target =
                        request.out_name.is_some() || request.out_dir.is_some();
                    if explicit_target
                        && !request.allow_overwrite
                        && is_same_path(&request.path, &outcome.path)
                    {
                        return PatchResult::failed(request_error(format!(
                            "Refusing to overwrite the input workbook {}; set allow_overwrite or pick a different out_name",
                            request.path.display()
                        )));
                    }
                    if let Some(warning) = &outcome.warning {
                        warnings.push(warning.clone());
                    }
                    if outcome.skip_write {
                        let mut result = PatchResult::empty();
                        result.out_path = Some(outcome.path);
                        result.warnings = warnings;
                        return result;
                    }
                    Some(outcome.path)
                }
                Err(err) => return PatchResult::failed(request_error(format!("{err:#}"))),
            }
        };

        let mut result =
            self.execute(&request.path, out_path.as_deref(), &ops, options, selection, &mut warnings);
        result.warnings = {
            let mut merged = warnings;
            merged.append(&mut result.warnings);
            merged
        };
        if result.error.is_none() {
            result.out_path = out_path;
            info!(
                path = %request.path.display(),
                ops = ops.len(),
                engine = ?result.engine_used,
                dry_run = request.dry_run,
                "patch applied"
            );
        }
        result
    }

    /// Seed a fresh workbook, then apply ops to it in place. Make is a
    /// file-engine feature; live-only ops are rejected during selection.
    pub fn run_make(&self, request: &MakeRequest) -> PatchResult {
        if request.path.exists() && !request.overwrite {
            return PatchResult::failed(request_error(format!(
                "Output already exists: {} (set overwrite to replace it)",
                request.path.display()
            )));
        }
        let sheet_name = request
            .sheet_name
            .clone()
            .unwrap_or_else(|| DEFAULT_SEED_SHEET.to_string());

        if let Err(err) = seed_workbook(&request.path, &sheet_name) {
            return PatchResult::failed(request_error(err));
        }

        if request.ops.is_empty() {
            let mut result = PatchResult::empty();
            result.out_path = Some(request.path.clone());
            result.engine_used = Some(EngineKind::File);
            info!(path = %request.path.display(), sheet = %sheet_name, "workbook created");
            return result;
        }

        let default_sheet = request.default_sheet.clone().unwrap_or(sheet_name);
        let ops = match self.prepare_ops(&request.ops, Some(&default_sheet)) {
            Ok(ops) => ops,
            Err(err) => return PatchResult::failed(err.into_detail()),
        };
        let selection = Selection {
            engine: EngineKind::File,
            allow_fallback: false,
        };
        if let Some(op) = ops.iter().find(|op| op.spec().routing == crate::patch::registry::Routing::LiveOnly) {
            return PatchResult::failed(PatchErrorDetail {
                message: format!("{} is not supported when creating a workbook", op.kind_name()),
                error_code: Some(ERR_INVALID_PARAMETER.to_string()),
                op: Some(op.kind_name()),
                ..Default::default()
            });
        }

        let mut warnings = Vec::new();
        let mut result = self.execute(
            &request.path,
            Some(&request.path),
            &ops,
            SelectOptions::default(),
            selection,
            &mut warnings,
        );
        result.warnings = {
            let mut merged = warnings;
            merged.append(&mut result.warnings);
            merged
        };
        if result.error.is_none() {
            result.out_path = Some(request.path.clone());
            info!(path = %request.path.display(), ops = ops.len(), "workbook created and patched");
        }
        result
    }

    fn prepare_ops(
        &self,
        raw_ops: &[serde_json::Value],
        default_sheet: Option<&str>,
    ) -> Result<Vec<PatchOp>, PatchOpError> {
        let mut ops = normalize_ops(raw_ops, default_sheet)?;
        validate_ops(&mut ops)?;
        Ok(ops)
    }

    fn execute(
        &self,
        input: &Path,
        out_path: Option<&Path>,
        ops: &[PatchOp],
        options: SelectOptions,
        selection: Selection,
        warnings: &mut Vec<String>,
    ) -> PatchResult {
        match selection.engine {
            EngineKind::File => self.run_file_engine(input, out_path, ops, options),
            EngineKind::Live => {
                let Some(save_to) = out_path else {
                    // Selection guarantees live never runs with dry_run set.
                    return PatchResult::failed(request_error(
                        "live engine requires an output path".to_string(),
                    ));
                };
                match self.run_live_engine(input, save_to, ops) {
                    Ok(result) => result,
                    Err(err) if selection.allow_fallback && err.is_live_runtime_error() => {
                        warn!("live engine failed; retrying on the file engine");
                        warnings.push(
                            "Live engine failed with a runtime error; retried on the file engine."
                                .to_string(),
                        );
                        self.run_file_engine(input, out_path, ops, options)
                    }
                    Err(err) => PatchResult::failed(err.into_detail()),
                }
            }
        }
    }

    fn run_file_engine(
        &self,
        input: &Path,
        out_path: Option<&Path>,
        ops: &[PatchOp],
        options: SelectOptions,
    ) -> PatchResult {
        let run_options = FileRunOptions {
            want_inverse_ops: options.want_inverse_ops,
            preflight_formula_check: options.preflight_formula_check,
        };
        let save_to = if options.dry_run { None } else { out_path };
        match engine_file::apply_ops_to_file(input, save_to, ops, run_options) {
            Ok(outcome) => {
                let mut result = PatchResult::empty();
                result.engine_used = Some(EngineKind::File);
                result.diff = outcome.diff;
                result.warnings = outcome.warnings;
                result.formula_issues = outcome.formula_issues;
                result.inverse_ops = outcome.inverse_ops;
                // Undo scripts replay newest-first.
                result.inverse_ops.reverse();
                result
            }
            Err(err) => PatchResult::failed(err.into_detail()),
        }
    }

    fn run_live_engine(
        &self,
        input: &Path,
        save_to: &Path,
        ops: &[PatchOp],
    ) -> Result<PatchResult, EngineFailure> {
        let Some(connector) = &self.live else {
            return Err(EngineFailure::Other(anyhow::anyhow!(
                "live engine selected but no automation host is configured"
            )));
        };
        let app = connector
            .connect()
            .map_err(|e| anyhow::anyhow!("failed to attach to automation host: {e}"))?;
        let outcome = LiveEngine::new(app).run(&absolute(input), &absolute(save_to), ops)?;
        let mut result = PatchResult::empty();
        result.engine_used = Some(EngineKind::Live);
        result.diff = outcome.diff;
        result.warnings = outcome.warnings;
        Ok(result)
    }
}

/// Paths compare after canonicalization where possible; a not-yet-written
/// output falls back to its literal form.
fn is_same_path(a: &Path, b: &Path) -> bool {
    let canon =
        |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    canon(a) == canon(b)
}

/// The automation host resolves relative paths against its own working
/// directory, not ours.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn seed_workbook(path: &Path, sheet_name: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
    }
    let mut book = umya_spreadsheet::new_file();
    if sheet_name != DEFAULT_SEED_SHEET {
        match book.get_sheet_by_name_mut(DEFAULT_SEED_SHEET) {
            Some(sheet) => sheet.set_name(sheet_name),
            None => return Err("seed workbook is missing its default sheet".to_string()),
        };
    }
    umya_spreadsheet::writer::xlsx::write(&book, path)
        .map_err(|e| format!("failed to write workbook {}: {e}", path.display()))
}

fn request_error(message: String) -> PatchErrorDetail {
    PatchErrorDetail {
        message,
        error_code: Some(ERR_INVALID_PARAMETER.to_string()),
        ..Default::default()
    }
}
