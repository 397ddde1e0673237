//! Column type inference over a row sample.
//!
//! Inference walks a lattice: `Null` is below everything, `Integer` widens to
//! `Float`, and any other disagreement falls back to text. Values outside the
//! sample that do not fit the inferred type become null.

use std::collections::HashSet;
use std::sync::Arc;

use deltalake::arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, NullArray, StringArray,
};
use deltalake::arrow::datatypes::{DataType, Field};

/// Number of rows sampled for type inference when not configured.
pub const DEFAULT_SAMPLE_ROWS: usize = 1000;

/// A single decoded cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Classify delimited text. Surrounding whitespace is ignored for typing.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Cell::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Cell::Bool(false);
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Cell::Int(i);
        }
        if looks_numeric(trimmed)
            && let Ok(f) = trimmed.parse::<f64>()
            && f.is_finite()
        {
            return Cell::Float(f);
        }
        Cell::Text(raw.to_string())
    }

    /// Spreadsheet floats with no fractional part are integers.
    pub fn from_float(f: f64) -> Self {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
            Cell::Int(f as i64)
        } else if f.is_finite() {
            Cell::Float(f)
        } else {
            Cell::Text(f.to_string())
        }
    }

    /// Textual form of the value, `None` for empty cells.
    pub fn into_text(self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) => Some(f.to_string()),
            Cell::Text(s) => Some(s),
        }
    }

    fn class(&self) -> Inferred {
        match self {
            Cell::Empty => Inferred::Null,
            Cell::Bool(_) => Inferred::Boolean,
            Cell::Int(_) => Inferred::Integer,
            Cell::Float(_) => Inferred::Float,
            Cell::Text(_) => Inferred::String,
        }
    }
}

/// Rejects `inf`, `nan` and friends that `f64::from_str` accepts.
fn looks_numeric(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
}

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inferred {
    Null,
    Boolean,
    Integer,
    Float,
    String,
}

impl Inferred {
    /// Least upper bound of two inferred types.
    pub fn join(self, other: Inferred) -> Inferred {
        use Inferred::*;
        match (self, other) {
            (Null, x) | (x, Null) => x,
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => String,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Inferred::Null => DataType::Null,
            Inferred::Boolean => DataType::Boolean,
            Inferred::Integer => DataType::Int64,
            Inferred::Float => DataType::Float64,
            Inferred::String => DataType::Utf8,
        }
    }
}

/// Infer a column type from the first `sample` cells.
pub fn infer_cells(cells: &[Cell], sample: usize) -> Inferred {
    cells
        .iter()
        .take(sample)
        .fold(Inferred::Null, |acc, cell| acc.join(cell.class()))
}

/// Build an Arrow column from native cells.
///
/// String columns render every non-empty cell; typed columns null out
/// cells that do not fit.
pub fn build_column(cells: Vec<Cell>, inferred: Inferred) -> ArrayRef {
    match inferred {
        Inferred::Null => Arc::new(NullArray::new(cells.len())),
        Inferred::Boolean => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Cell::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        Inferred::Integer => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Cell::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        Inferred::Float => Arc::new(
            cells
                .iter()
                .map(|c| match c {
                    Cell::Int(i) => Some(*i as f64),
                    Cell::Float(f) => Some(*f),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        Inferred::String => Arc::new(
            cells
                .into_iter()
                .map(Cell::into_text)
                .collect::<StringArray>(),
        ),
    }
}

/// Build an Arrow column from raw delimited text.
///
/// Unlike [`build_column`], string columns keep the original text verbatim.
pub fn build_text_column(raw: Vec<Option<String>>, inferred: Inferred) -> ArrayRef {
    if inferred == Inferred::String {
        let values = raw
            .into_iter()
            .map(|v| v.filter(|s| !s.trim().is_empty()));
        return Arc::new(values.collect::<StringArray>());
    }
    let cells = raw
        .iter()
        .map(|v| v.as_deref().map_or(Cell::Empty, Cell::parse))
        .collect();
    build_column(cells, inferred)
}

/// Nullable field for an inferred column.
pub fn field_for(name: &str, inferred: Inferred) -> Field {
    Field::new(name, inferred.data_type(), true)
}

/// Make header names usable as column names.
///
/// Blank names become `column_<n>` (1-based position); repeated names get a
/// `_<n>` suffix, counting from 1 for the second occurrence.
pub fn unique_headers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut headers = Vec::new();

    for (i, name) in raw.into_iter().enumerate() {
        let trimmed = name.as_ref().trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", i + 1)
        } else {
            trimmed.to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        seen.insert(candidate.clone());
        headers.push(candidate);
    }

    headers
}
