use anyhow::{Result, bail};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Canonical chart kinds supported by the live engine. The numeric ids are
/// the host application's XlChartType constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ChartKind {
    Line,
    Column,
    Bar,
    Area,
    Pie,
    Doughnut,
    Scatter,
    Radar,
}

impl ChartKind {
    pub fn host_type_id(self) -> i32 {
        match self {
            ChartKind::Line => 4,
            ChartKind::Column => 51,
            ChartKind::Bar => 57,
            ChartKind::Area => 1,
            ChartKind::Pie => 5,
            ChartKind::Doughnut => -4120,
            ChartKind::Scatter => -4169,
            ChartKind::Radar => -4151,
        }
    }
}

const CHART_TYPE_ALIASES: &[(&str, ChartKind)] = &[
    ("column_clustered", ChartKind::Column),
    ("bar_clustered", ChartKind::Bar),
    ("xy_scatter", ChartKind::Scatter),
    ("donut", ChartKind::Doughnut),
];

/// Resolve a user-supplied chart type (canonical name or alias) to its
/// canonical kind. Unknown values are an error; there is no fallback type.
pub fn normalize_chart_type(value: &str) -> Result<ChartKind> {
    let candidate = value.trim().to_ascii_lowercase();
    if let Ok(kind) = candidate.parse::<ChartKind>() {
        return Ok(kind);
    }
    if let Some((_, kind)) = CHART_TYPE_ALIASES.iter().find(|(alias, _)| *alias == candidate) {
        return Ok(*kind);
    }
    bail!(
        "Unsupported chart_type '{}'. Supported: {}",
        value,
        supported_chart_types().join(", ")
    );
}

pub fn resolve_chart_type_id(value: &str) -> Result<i32> {
    Ok(normalize_chart_type(value)?.host_type_id())
}

pub fn supported_chart_types() -> Vec<String> {
    ChartKind::iter().map(|kind| kind.to_string()).collect()
}

pub fn chart_type_aliases() -> Vec<(String, String)> {
    CHART_TYPE_ALIASES
        .iter()
        .map(|(alias, kind)| ((*alias).to_string(), kind.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_resolve() {
        assert_eq!(normalize_chart_type("line").unwrap(), ChartKind::Line);
        assert_eq!(resolve_chart_type_id("doughnut").unwrap(), -4120);
        assert_eq!(resolve_chart_type_id("scatter").unwrap(), -4169);
    }

    #[test]
    fn aliases_match_their_canonical_ids() {
        for (alias, canonical) in chart_type_aliases() {
            assert_eq!(
                resolve_chart_type_id(&alias).unwrap(),
                resolve_chart_type_id(&canonical).unwrap(),
                "alias {alias} diverged from {canonical}"
            );
        }
    }

    #[test]
    fn normalization_trims_and_lowercases() {
        assert_eq!(normalize_chart_type("  Donut ").unwrap(), ChartKind::Doughnut);
        assert_eq!(normalize_chart_type("COLUMN_CLUSTERED").unwrap(), ChartKind::Column);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let err = normalize_chart_type("bubble").unwrap_err().to_string();
        assert!(err.contains("Unsupported chart_type"));
        assert!(err.contains("doughnut"));
    }
}
