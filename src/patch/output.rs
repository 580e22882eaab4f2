use crate::patch::model::OnConflict;
use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

const DEFAULT_SUFFIX: &str = ".xlsx";

/// Resolve the output path for a patch: explicit name, or the
/// `{stem}_patched{suffix}` default next to the input.
pub fn resolve_output_path(
    input_path: &Path,
    out_dir: Option<&Path>,
    out_name: Option<&str>,
) -> PathBuf {
    let target_dir = out_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input_path.parent().unwrap_or(Path::new(".")).to_path_buf());
    target_dir.join(normalize_output_name(input_path, out_name))
}

fn normalize_output_name(input_path: &Path, out_name: Option<&str>) -> String {
    let suffix = input_path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| DEFAULT_SUFFIX.to_string());

    if let Some(name) = out_name {
        let candidate = Path::new(name);
        let file_name = candidate
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        if Path::new(&file_name).extension().is_some() {
            return file_name;
        }
        return format!("{file_name}{suffix}");
    }

    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "workbook".to_string());
    build_patched_default_name(&stem, &suffix)
}

/// Default patched name, without re-stacking `_patched` on repeated runs.
fn build_patched_default_name(stem: &str, suffix: &str) -> String {
    if stem.to_lowercase().ends_with("_patched") {
        format!("{stem}{suffix}")
    } else {
        format!("{stem}_patched{suffix}")
    }
}

/// Outcome of applying the conflict policy to a resolved output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictOutcome {
    pub path: PathBuf,
    pub warning: Option<String>,
    pub skip_write: bool,
}

pub fn apply_conflict_policy(output_path: PathBuf, policy: OnConflict) -> Result<ConflictOutcome> {
    if !output_path.exists() {
        return Ok(ConflictOutcome {
            path: output_path,
            warning: None,
            skip_write: false,
        });
    }
    match policy {
        OnConflict::Overwrite => Ok(ConflictOutcome {
            path: output_path,
            warning: None,
            skip_write: false,
        }),
        OnConflict::Skip => {
            let name = output_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(ConflictOutcome {
                path: output_path,
                warning: Some(format!("Output exists; skipping write: {name}")),
                skip_write: true,
            })
        }
        OnConflict::Rename => {
            let renamed = next_available_path(&output_path)?;
            let name = renamed
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(ConflictOutcome {
                path: renamed,
                warning: Some(format!("Output exists; renamed to: {name}")),
                skip_write: false,
            })
        }
    }
}

/// Next free `{stem}_{n}{suffix}` sibling of `path`.
pub fn next_available_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    for idx in 1..10_000 {
        let candidate = path.with_file_name(format!("{stem}_{idx}{suffix}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    bail!("Failed to resolve unique path for {}", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_name_appends_patched_once() {
        assert_eq!(build_patched_default_name("report", ".xlsx"), "report_patched.xlsx");
        assert_eq!(
            build_patched_default_name("report_patched", ".xlsx"),
            "report_patched.xlsx"
        );
        assert_eq!(
            build_patched_default_name("Report_PATCHED", ".xlsx"),
            "Report_PATCHED.xlsx"
        );
    }

    #[test]
    fn explicit_out_name_gains_extension_when_missing() {
        let input = Path::new("/data/report.xlsx");
        assert_eq!(
            resolve_output_path(input, None, Some("final")),
            PathBuf::from("/data/final.xlsx")
        );
        assert_eq!(
            resolve_output_path(input, None, Some("final.xlsm")),
            PathBuf::from("/data/final.xlsm")
        );
    }

    #[test]
    fn out_dir_overrides_parent() {
        let input = Path::new("/data/report.xlsx");
        assert_eq!(
            resolve_output_path(input, Some(Path::new("/out")), None),
            PathBuf::from("/out/report_patched.xlsx")
        );
    }

    #[test]
    fn skip_policy_flags_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("report_patched.xlsx");
        fs::write(&existing, b"x").unwrap();

        let outcome = apply_conflict_policy(existing.clone(), OnConflict::Skip).unwrap();
        assert!(outcome.skip_write);
        assert!(outcome.warning.unwrap().contains("skipping write"));
        assert_eq!(outcome.path, existing);
    }

    #[test]
    fn rename_policy_probes_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("report_patched.xlsx");
        fs::write(&existing, b"x").unwrap();
        fs::write(dir.path().join("report_patched_1.xlsx"), b"x").unwrap();

        let outcome = apply_conflict_policy(existing, OnConflict::Rename).unwrap();
        assert!(!outcome.skip_write);
        assert_eq!(
            outcome.path.file_name().unwrap().to_string_lossy(),
            "report_patched_2.xlsx"
        );
    }

    #[test]
    fn overwrite_policy_keeps_path() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("report_patched.xlsx");
        fs::write(&existing, b"x").unwrap();
        let outcome = apply_conflict_policy(existing.clone(), OnConflict::Overwrite).unwrap();
        assert_eq!(outcome.path, existing);
        assert!(outcome.warning.is_none());
    }
}
