use anyhow::{Result, bail};
use {once_cell::sync::Lazy, regex::Regex};

static A1_CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{1,3}[1-9][0-9]*$").expect("regex"));
static A1_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{1,3}[1-9][0-9]*:[A-Za-z]{1,3}[1-9][0-9]*$").expect("regex"));
static COLUMN_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{1,3}$").expect("regex"));

pub fn is_cell_ref(value: &str) -> bool {
    A1_CELL_RE.is_match(value)
}

pub fn is_range_ref(value: &str) -> bool {
    A1_RANGE_RE.is_match(value)
}

/// Split A1 notation into a normalized (column label, row index) pair.
pub fn split_a1(value: &str) -> Result<(String, u32)> {
    if !A1_CELL_RE.is_match(value) {
        bail!("Invalid cell reference: {value}");
    }
    let digit_at = value
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(value.len());
    let column = value[..digit_at].to_ascii_uppercase();
    let row: u32 = value[digit_at..].parse()?;
    Ok((column, row))
}

/// Convert an Excel column label (A, Z, AA, ...) to a 1-based index.
pub fn column_label_to_index(label: &str) -> Result<u32> {
    let normalized = label.trim().to_ascii_uppercase();
    if !COLUMN_LABEL_RE.is_match(&normalized) {
        bail!("Invalid column label: {label}");
    }
    let mut index: u32 = 0;
    for c in normalized.bytes() {
        index = index * 26 + u32::from(c - b'A' + 1);
    }
    Ok(index)
}

/// Convert a 1-based column index back to its label.
pub fn column_index_to_label(index: u32) -> String {
    debug_assert!(index >= 1);
    let mut chunks = Vec::new();
    let mut current = index;
    while current > 0 {
        current -= 1;
        chunks.push(char::from(b'A' + (current % 26) as u8));
        current /= 26;
    }
    chunks.iter().rev().collect()
}

/// Validate and uppercase an A1 range string.
pub fn normalize_range(value: &str) -> Result<String> {
    let candidate = value.trim();
    if !A1_RANGE_RE.is_match(candidate) {
        bail!("Invalid range reference: {value}");
    }
    Ok(candidate.to_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBounds {
    pub min_col: u32,
    pub max_col: u32,
    pub min_row: u32,
    pub max_row: u32,
}

impl RangeBounds {
    pub fn rows(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.rows()) * u64::from(self.cols())
    }

    pub fn overlaps(&self, other: &RangeBounds) -> bool {
        self.min_col <= other.max_col
            && self.max_col >= other.min_col
            && self.min_row <= other.max_row
            && self.max_row >= other.min_row
    }
}

/// Bounds of an A1 range, normalizing reversed corners.
pub fn range_bounds(range_ref: &str) -> Result<RangeBounds> {
    let normalized = normalize_range(range_ref)?;
    let (start, end) = normalized.split_once(':').unwrap_or((normalized.as_str(), normalized.as_str()));
    let (start_col, start_row) = split_a1(start)?;
    let (end_col, end_row) = split_a1(end)?;
    let start_col = column_label_to_index(&start_col)?;
    let end_col = column_label_to_index(&end_col)?;
    Ok(RangeBounds {
        min_col: start_col.min(end_col),
        max_col: start_col.max(end_col),
        min_row: start_row.min(end_row),
        max_row: start_row.max(end_row),
    })
}

/// Bounds of a single cell or an A1 range.
pub fn target_bounds(target: &str) -> Result<RangeBounds> {
    if is_cell_ref(target) {
        let (col, row) = split_a1(target)?;
        let col = column_label_to_index(&col)?;
        return Ok(RangeBounds {
            min_col: col,
            max_col: col,
            min_row: row,
            max_row: row,
        });
    }
    range_bounds(target)
}

/// Number of cells covered by an A1 range.
pub fn range_cell_count(range_ref: &str) -> Result<u64> {
    Ok(range_bounds(range_ref)?.cell_count())
}

/// Top-left cell plus (rows, cols) of an A1 range.
pub fn parse_range_geometry(range_ref: &str) -> Result<(String, u32, u32)> {
    let bounds = range_bounds(range_ref)?;
    let anchor = format!("{}{}", column_index_to_label(bounds.min_col), bounds.min_row);
    Ok((anchor, bounds.rows(), bounds.cols()))
}

pub fn ranges_overlap(a: &str, b: &str) -> Result<bool> {
    Ok(range_bounds(a)?.overlaps(&range_bounds(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_a1_normalizes_case() {
        assert_eq!(split_a1("aB12").unwrap(), ("AB".to_string(), 12));
    }

    #[test]
    fn split_a1_rejects_row_zero() {
        assert!(split_a1("A0").is_err());
        assert!(split_a1("A1:B2").is_err());
    }

    #[test]
    fn column_label_round_trip() {
        for (label, index) in [("A", 1), ("Z", 26), ("AA", 27), ("AZ", 52), ("XFD", 16384)] {
            assert_eq!(column_label_to_index(label).unwrap(), index);
            assert_eq!(column_index_to_label(index), label);
        }
    }

    #[test]
    fn normalize_range_uppercases() {
        assert_eq!(normalize_range(" b2:a1 ").unwrap(), "B2:A1");
        assert!(normalize_range("A1").is_err());
    }

    #[test]
    fn geometry_handles_reversed_corners() {
        let (anchor, rows, cols) = parse_range_geometry("C5:A1").unwrap();
        assert_eq!(anchor, "A1");
        assert_eq!(rows, 5);
        assert_eq!(cols, 3);
    }

    #[test]
    fn cell_counts() {
        assert_eq!(range_cell_count("A1:B2").unwrap(), 4);
        assert_eq!(range_cell_count("A1:A1").unwrap(), 1);
    }

    #[test]
    fn overlap_detection() {
        assert!(ranges_overlap("A1:C3", "B2:D4").unwrap());
        assert!(!ranges_overlap("A1:B2", "C3:D4").unwrap());
        assert!(ranges_overlap("A1:A10", "A5:A5").unwrap());
    }
}
