use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use rust_xlsxwriter::Workbook;
use serde::Serialize;
use serde_json::Value;

use crate::error::NklError;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Number(_) => false,
            Cell::Text(text) => text.trim().is_empty(),
        }
    }

    /// Text form used for keys: integral numbers lose their fraction so a
    /// code stored as `1001.0` and one stored as `"1001"` compare equal.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(value) => format_number(*value),
            Cell::Text(text) => text.trim().to_string(),
        }
    }

    /// Like [`Cell::to_text`] but keeps surrounding whitespace; used for free text.
    pub fn to_raw_text(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            other => other.to_text(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Rectangular sheet: a header row and data rows of equal width.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }

    pub fn push_row(&mut self, mut cells: Vec<Cell>) {
        cells.resize(self.columns.len(), Cell::Empty);
        self.rows.push(cells);
    }

    /// Trims and upper-cases every header.
    pub fn normalize_headers(&mut self) {
        for column in &mut self.columns {
            *column = column.trim().to_uppercase();
        }
    }

    /// Stacks tables under the union of their headers, first-seen order.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut merged = Table::new(columns);
        for table in tables {
            let mapping: Vec<Option<usize>> = merged
                .columns
                .iter()
                .map(|column| table.column_index(column))
                .collect();
            for row in table.rows {
                let cells = mapping
                    .iter()
                    .map(|index| {
                        index
                            .and_then(|i| row.get(i).cloned())
                            .unwrap_or(Cell::Empty)
                    })
                    .collect();
                merged.rows.push(cells);
            }
        }
        merged
    }

    /// Builds a table from JSON row objects; headers follow first appearance.
    pub fn from_records(records: &[serde_json::Map<String, Value>]) -> Table {
        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in records {
            for key in record.keys() {
                if !positions.contains_key(key) {
                    positions.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let mut table = Table::new(columns);
        for record in records {
            let mut cells = vec![Cell::Empty; table.columns.len()];
            for (key, value) in record {
                if let Some(&index) = positions.get(key) {
                    cells[index] = json_cell(value);
                }
            }
            table.rows.push(cells);
        }
        table
    }
}

fn json_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Empty,
        Value::Number(number) => number.as_f64().map(Cell::Number).unwrap_or_default(),
        Value::String(text) if text.is_empty() => Cell::Empty,
        Value::String(text) => Cell::Text(text.clone()),
        Value::Bool(flag) => Cell::Text(flag.to_string()),
        other => Cell::Text(other.to_string()),
    }
}

/// Reads the first worksheet; the first row is the header.
pub fn decode_xlsx(bytes: &[u8]) -> Result<Table, NklError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|err| NklError::Sheet(err.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| NklError::Sheet("workbook has no worksheet".to_string()))?
        .map_err(|err| NklError::Sheet(err.to_string()))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Table::default());
    };
    let columns = header
        .iter()
        .map(|data| data_cell(data).to_text())
        .collect::<Vec<_>>();

    let mut table = Table::new(columns);
    for row in rows {
        let cells = row.iter().map(data_cell).collect::<Vec<_>>();
        if cells.iter().all(Cell::is_blank) {
            continue;
        }
        table.push_row(cells);
    }
    Ok(table)
}

fn data_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(value) => Cell::Number(*value as f64),
        Data::Float(value) => Cell::Number(*value),
        Data::String(text) if text.is_empty() => Cell::Empty,
        Data::String(text) => Cell::Text(text.clone()),
        Data::Bool(flag) => Cell::Text(flag.to_string()),
        Data::DateTime(value) => Cell::Number(value.as_f64()),
        Data::DateTimeIso(text) | Data::DurationIso(text) => Cell::Text(text.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

pub fn encode_xlsx(table: &Table) -> Result<Vec<u8>, NklError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in table.columns.iter().enumerate() {
        worksheet
            .write_string(0, column_number(col)?, name)
            .map_err(|err| NklError::Sheet(err.to_string()))?;
    }

    for (row_index, row) in table.rows.iter().enumerate() {
        let row_number = u32::try_from(row_index + 1)
            .map_err(|_| NklError::Sheet("too many rows".to_string()))?;
        for (col, cell) in row.iter().enumerate() {
            let col = column_number(col)?;
            let written = match cell {
                Cell::Empty => continue,
                Cell::Number(value) => worksheet.write_number(row_number, col, *value),
                Cell::Text(text) => worksheet.write_string(row_number, col, text),
            };
            written.map_err(|err| NklError::Sheet(err.to_string()))?;
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|err| NklError::Sheet(err.to_string()))
}

fn column_number(index: usize) -> Result<u16, NklError> {
    u16::try_from(index).map_err(|_| NklError::Sheet("too many columns".to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(Cell::Number(1001.0).to_text(), "1001");
        assert_eq!(Cell::Number(-12.5).to_text(), "-12.5");
        assert_eq!(Cell::text("  A1 ").to_text(), "A1");
    }

    #[test]
    fn concat_unions_columns_in_first_seen_order() {
        let mut left = Table::new(vec!["A".to_string(), "B".to_string()]);
        left.push_row(vec![Cell::text("a1"), Cell::text("b1")]);
        let mut right = Table::new(vec!["C".to_string(), "A".to_string()]);
        right.push_row(vec![Cell::text("c2"), Cell::text("a2")]);

        let merged = Table::concat(vec![left, right]);
        assert_eq!(merged.columns, vec!["A", "B", "C"]);
        assert_eq!(merged.rows[0], vec![Cell::text("a1"), Cell::text("b1"), Cell::Empty]);
        assert_eq!(merged.rows[1], vec![Cell::text("a2"), Cell::Empty, Cell::text("c2")]);
    }

    #[test]
    fn records_become_rows() {
        let records = vec![
            json!({"kdtoko": "T1", "rupiah": -5}),
            json!({"kdtoko": "T2", "plu": "P9", "rupiah": null}),
        ]
        .into_iter()
        .filter_map(|value| value.as_object().cloned())
        .collect::<Vec<_>>();

        let table = Table::from_records(&records);
        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.cell(0, "rupiah"), Some(&Cell::Number(-5.0)));
        assert_eq!(table.cell(0, "plu"), Some(&Cell::Empty));
        assert_eq!(table.cell(1, "plu"), Some(&Cell::text("P9")));
    }

    #[test]
    fn xlsx_keeps_headers_and_cell_kinds() {
        let mut table = Table::new(vec!["KDTOKO".to_string(), "RUPIAH".to_string()]);
        table.push_row(vec![Cell::text("T1"), Cell::Number(-500.0)]);
        table.push_row(vec![Cell::text("T2"), Cell::Empty]);

        let decoded = decode_xlsx(&encode_xlsx(&table).unwrap()).unwrap();
        assert_eq!(decoded.columns, table.columns);
        assert_eq!(decoded.cell(0, "RUPIAH"), Some(&Cell::Number(-500.0)));
        assert_eq!(decoded.cell(1, "KDTOKO"), Some(&Cell::text("T2")));
        assert!(decoded.cell(1, "RUPIAH").map(Cell::is_blank).unwrap_or(true));
    }
}
