#![allow(dead_code)]
use umya_spreadsheet::Worksheet;

#[derive(Clone, Debug)]
pub enum CellVal {
    Text(String),
    Num(f64),
    Formula(String),
    Empty,
}

impl From<&str> for CellVal {
    fn from(s: &str) -> Self {
        CellVal::Text(s.to_string())
    }
}

impl From<f64> for CellVal {
    fn from(n: f64) -> Self {
        CellVal::Num(n)
    }
}

impl From<i32> for CellVal {
    fn from(n: i32) -> Self {
        CellVal::Num(n as f64)
    }
}

fn col_index(col_letter: &str) -> u32 {
    let mut result = 0u32;
    for c in col_letter.chars() {
        result = result * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    result
}

fn parse_cell_ref(cell_ref: &str) -> (u32, u32) {
    let mut col_part = String::new();
    let mut row_part = String::new();
    for c in cell_ref.chars() {
        if c.is_ascii_alphabetic() {
            col_part.push(c);
        } else {
            row_part.push(c);
        }
    }
    let col = col_index(&col_part);
    let row: u32 = row_part.parse().unwrap_or(1);
    (col, row)
}

fn set_cell(sheet: &mut Worksheet, col: u32, row: u32, val: &CellVal) {
    match val {
        CellVal::Text(s) => {
            sheet.get_cell_mut((col, row)).set_value(s.clone());
        }
        CellVal::Num(n) => {
            sheet.get_cell_mut((col, row)).set_value_number(*n);
        }
        CellVal::Formula(f) => {
            sheet.get_cell_mut((col, row)).set_formula(f.clone());
        }
        CellVal::Empty => {}
    }
}

/// Header row plus data rows starting at `start`, headers bold.
pub fn fill_table<H, R, V>(sheet: &mut Worksheet, start: &str, headers: &[H], rows: &[R])
where
    H: AsRef<str>,
    R: AsRef<[V]>,
    V: Into<CellVal> + Clone,
{
    let (start_col, start_row) = parse_cell_ref(start);

    for (i, header) in headers.iter().enumerate() {
        let col = start_col + i as u32;
        sheet
            .get_cell_mut((col, start_row))
            .set_value(header.as_ref().to_string());
        let style = sheet.get_style_mut((col, start_row));
        style.get_font_mut().set_bold(true);
    }

    for (row_idx, row_data) in rows.iter().enumerate() {
        let row = start_row + 1 + row_idx as u32;
        for (col_idx, val) in row_data.as_ref().iter().enumerate() {
            let col = start_col + col_idx as u32;
            let cell_val: CellVal = val.clone().into();
            set_cell(sheet, col, row, &cell_val);
        }
    }
}

pub fn fill_sparse(sheet: &mut Worksheet, cells: &[(&str, CellVal)]) {
    for (cell_ref, val) in cells {
        let (col, row) = parse_cell_ref(cell_ref);
        set_cell(sheet, col, row, val);
    }
}
