use crate::patch::model::{FormulaIssue, FormulaIssueLevel};

const ERROR_TOKENS: &[(&str, &str, FormulaIssueLevel)] = &[
    ("#REF!", "ref_error", FormulaIssueLevel::Error),
    ("#NAME?", "name_error", FormulaIssueLevel::Error),
    ("#DIV/0!", "div0_error", FormulaIssueLevel::Error),
    ("#VALUE!", "value_error", FormulaIssueLevel::Error),
    ("#N/A", "na_error", FormulaIssueLevel::Warning),
];

/// Scan one written formula/value text for broken-reference markers.
pub fn scan_cell_text(sheet: &str, cell: &str, text: &str) -> Vec<FormulaIssue> {
    let mut issues = Vec::new();

    if text.starts_with("==") {
        issues.push(FormulaIssue {
            sheet: sheet.to_string(),
            cell: cell.to_string(),
            code: "invalid_token".to_string(),
            level: FormulaIssueLevel::Warning,
            message: format!("Formula at {sheet}!{cell} starts with '==' and will not evaluate"),
        });
    }

    for (token, code, level) in ERROR_TOKENS {
        if text.contains(token) {
            issues.push(FormulaIssue {
                sheet: sheet.to_string(),
                cell: cell.to_string(),
                code: (*code).to_string(),
                level: *level,
                message: format!("Cell {sheet}!{cell} contains {token}"),
            });
        }
    }
    issues
}

pub fn has_error_level(issues: &[FormulaIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == FormulaIssueLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_marker_is_error_level() {
        let issues = scan_cell_text("S", "A1", "=SUM(#REF!)");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "ref_error");
        assert_eq!(issues[0].level, FormulaIssueLevel::Error);
        assert!(has_error_level(&issues));
    }

    #[test]
    fn na_marker_is_warning_level() {
        let issues = scan_cell_text("S", "B2", "#N/A");
        assert_eq!(issues[0].code, "na_error");
        assert_eq!(issues[0].level, FormulaIssueLevel::Warning);
        assert!(!has_error_level(&issues));
    }

    #[test]
    fn double_equals_is_flagged() {
        let issues = scan_cell_text("S", "C3", "==SUM(A1:A2)");
        assert_eq!(issues[0].code, "invalid_token");
    }

    #[test]
    fn clean_formula_yields_nothing() {
        assert!(scan_cell_text("S", "D4", "=SUM(A1:A2)").is_empty());
    }
}
