use crate::patch::model::{Backend, EngineKind};
use crate::patch::op::{PatchOp, PatchOpKind};
use thiserror::Error;

/// Capability snapshot passed into selection so tests can inject it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineCaps {
    pub live_available: bool,
}

/// Probe for the live automation host. The production probe is owned by
/// `AppState`; tests plug in fixed answers.
pub trait LiveProbe: Send + Sync {
    fn live_available(&self) -> bool;

    fn caps(&self) -> EngineCaps {
        EngineCaps {
            live_available: self.live_available(),
        }
    }
}

/// Default probe: the automation host only exists on Windows desktops and
/// must additionally be enabled in configuration.
pub struct ConfiguredLiveProbe {
    enabled: bool,
}

impl ConfiguredLiveProbe {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl LiveProbe for ConfiguredLiveProbe {
    fn live_available(&self) -> bool {
        self.enabled && cfg!(windows)
    }
}

/// Request options the selector cares about.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectOptions {
    pub dry_run: bool,
    pub want_inverse_ops: bool,
    pub preflight_formula_check: bool,
}

impl SelectOptions {
    fn file_only_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.dry_run {
            flags.push("dry_run");
        }
        if self.want_inverse_ops {
            flags.push("want_inverse_ops");
        }
        if self.preflight_formula_check {
            flags.push("preflight_formula_check");
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub engine: EngineKind,
    /// Whether a live runtime failure may retry once on the file engine.
    pub allow_fallback: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("create_chart requires the live automation engine; it is not supported by the file engine")]
    ChartRequiresLive,
    #[error("create_chart requires the live automation engine, which is not available in this environment")]
    LiveUnavailable,
    #[error("{0} requires the file engine; drop the option or use backend 'file' or 'auto'")]
    FileOnlyOptionsWithLive(String),
    #[error("restore_design_snapshot requires the file engine; use backend 'file' or 'auto'")]
    RestoreRequiresFile,
    #[error("create_chart cannot be combined with {0}, which only the file engine supports")]
    ChartWithFileOnlyOptions(String),
}

/// Decide which engine runs the request. Policy rules:
/// - create_chart is live-only, with no fallback.
/// - dry_run / want_inverse_ops / preflight_formula_check and
///   restore_design_snapshot are file-only; `auto` routes to the file
///   engine when they are present.
/// - chart + apply_table_style mixes are permitted and route entirely to
///   the live engine.
/// - under `auto` with the live engine chosen, a later runtime failure may
///   retry once on the file engine unless the op mix requires live.
pub fn select_engine(
    backend: Backend,
    ops: &[PatchOp],
    options: SelectOptions,
    caps: EngineCaps,
) -> Result<Selection, PolicyError> {
    let needs_live = ops.iter().any(|op| op.kind() == PatchOpKind::CreateChart);
    let has_restore = ops
        .iter()
        .any(|op| op.kind() == PatchOpKind::RestoreDesignSnapshot);
    let file_only_flags = options.file_only_flags();
    let needs_file = has_restore || !file_only_flags.is_empty();

    match backend {
        Backend::File => {
            if needs_live {
                return Err(PolicyError::ChartRequiresLive);
            }
            Ok(Selection {
                engine: EngineKind::File,
                allow_fallback: false,
            })
        }
        Backend::Live => {
            if !file_only_flags.is_empty() {
                return Err(PolicyError::FileOnlyOptionsWithLive(
                    file_only_flags.join("/"),
                ));
            }
            if has_restore {
                return Err(PolicyError::RestoreRequiresFile);
            }
            if !caps.live_available {
                return Err(PolicyError::LiveUnavailable);
            }
            Ok(Selection {
                engine: EngineKind::Live,
                allow_fallback: false,
            })
        }
        Backend::Auto => {
            if needs_live && needs_file {
                let reason = if file_only_flags.is_empty() {
                    "restore_design_snapshot".to_string()
                } else {
                    file_only_flags.join("/")
                };
                return Err(PolicyError::ChartWithFileOnlyOptions(reason));
            }
            if needs_file {
                return Ok(Selection {
                    engine: EngineKind::File,
                    allow_fallback: false,
                });
            }
            if caps.live_available {
                return Ok(Selection {
                    engine: EngineKind::Live,
                    allow_fallback: !needs_live,
                });
            }
            if needs_live {
                return Err(PolicyError::LiveUnavailable);
            }
            Ok(Selection {
                engine: EngineKind::File,
                allow_fallback: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(values: Vec<serde_json::Value>) -> Vec<PatchOp> {
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect()
    }

    fn chart_op() -> serde_json::Value {
        json!({"kind": "create_chart", "sheet": "S", "chart_type": "bar",
               "data_range": "A1:B5", "anchor_cell": "D2"})
    }

    fn table_op() -> serde_json::Value {
        json!({"kind": "apply_table_style", "sheet": "S", "range": "A1:B5",
               "style_name": "TableStyleMedium9"})
    }

    fn value_op() -> serde_json::Value {
        json!({"kind": "set_value", "sheet": "S", "cell": "A1", "value": 1})
    }

    const LIVE: EngineCaps = EngineCaps { live_available: true };
    const NO_LIVE: EngineCaps = EngineCaps { live_available: false };

    #[test]
    fn chart_on_file_backend_is_a_policy_error() {
        let err = select_engine(
            Backend::File,
            &ops(vec![chart_op()]),
            SelectOptions::default(),
            LIVE,
        )
        .unwrap_err();
        assert_eq!(err, PolicyError::ChartRequiresLive);
    }

    #[test]
    fn chart_under_auto_without_live_is_a_policy_error() {
        let err = select_engine(
            Backend::Auto,
            &ops(vec![chart_op()]),
            SelectOptions::default(),
            NO_LIVE,
        )
        .unwrap_err();
        assert_eq!(err, PolicyError::LiveUnavailable);
    }

    #[test]
    fn chart_and_table_mix_routes_to_live() {
        let selection = select_engine(
            Backend::Auto,
            &ops(vec![chart_op(), table_op()]),
            SelectOptions::default(),
            LIVE,
        )
        .unwrap();
        assert_eq!(selection.engine, EngineKind::Live);
        assert!(!selection.allow_fallback);

        let err = select_engine(
            Backend::File,
            &ops(vec![chart_op(), table_op()]),
            SelectOptions::default(),
            LIVE,
        )
        .unwrap_err();
        assert_eq!(err, PolicyError::ChartRequiresLive);
    }

    #[test]
    fn file_only_options_route_auto_to_file() {
        let selection = select_engine(
            Backend::Auto,
            &ops(vec![value_op()]),
            SelectOptions { dry_run: true, ..Default::default() },
            LIVE,
        )
        .unwrap();
        assert_eq!(selection.engine, EngineKind::File);
    }

    #[test]
    fn file_only_options_with_explicit_live_fail() {
        let err = select_engine(
            Backend::Live,
            &ops(vec![value_op()]),
            SelectOptions { want_inverse_ops: true, ..Default::default() },
            LIVE,
        )
        .unwrap_err();
        assert_matches::assert_matches!(err, PolicyError::FileOnlyOptionsWithLive(flags) => {
            assert!(flags.contains("want_inverse_ops"));
        });
    }

    #[test]
    fn chart_with_dry_run_is_incompatible() {
        let err = select_engine(
            Backend::Auto,
            &ops(vec![chart_op()]),
            SelectOptions { dry_run: true, ..Default::default() },
            LIVE,
        )
        .unwrap_err();
        assert_matches::assert_matches!(err, PolicyError::ChartWithFileOnlyOptions(_));
    }

    #[test]
    fn auto_prefers_live_with_fallback_when_ops_allow_it() {
        let selection = select_engine(
            Backend::Auto,
            &ops(vec![value_op(), table_op()]),
            SelectOptions::default(),
            LIVE,
        )
        .unwrap();
        assert_eq!(selection.engine, EngineKind::Live);
        assert!(selection.allow_fallback);
    }

    #[test]
    fn auto_without_live_uses_file() {
        let selection = select_engine(
            Backend::Auto,
            &ops(vec![value_op()]),
            SelectOptions::default(),
            NO_LIVE,
        )
        .unwrap();
        assert_eq!(selection.engine, EngineKind::File);
    }

    #[test]
    fn explicit_live_without_capability_fails() {
        let err = select_engine(
            Backend::Live,
            &ops(vec![value_op()]),
            SelectOptions::default(),
            NO_LIVE,
        )
        .unwrap_err();
        assert_eq!(err, PolicyError::LiveUnavailable);
    }
}
