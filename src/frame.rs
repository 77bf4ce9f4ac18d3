//! Tabular query results.
//!
//! A [`Frame`] is the in-memory result of one query: ordered, typed columns
//! and rows of [`Value`] cells. Frames are replaced wholesale on every query;
//! nothing here supports incremental updates.

use polars::prelude::{
    ChunkAgg, ChunkCompareEq, ChunkQuantile, ChunkUnique, ChunkVar, Float64Chunked, NewChunkedArray,
    PlSmallStr, PolarsError, QuantileMethod, StringChunked,
};
use serde::Serialize;
use std::fmt;

/// Logical column type, derived from the remote schema.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
}

impl ColumnKind {
    /// Whether values of this kind can be aggregated numerically.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A single cell.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }

    /// Grouping key used by categorical aggregation and faceting.
    /// `None` for nulls, which are dropped from groups.
    pub fn category_label(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{}", format_float(*x)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Compact float formatting: integral values keep one decimal, others up to
/// six significant decimals with trailing zeros trimmed.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x.fract() == 0.0 && x.abs() < 1e15 {
        return format!("{x:.1}");
    }
    let s = format!("{x:.6}");
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

/// Errors raised by frame operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("row {row} has {got} cells, expected {expected}")]
    RowWidth {
        row: usize,
        got: usize,
        expected: usize,
    },
    #[error("statistics failed: {0}")]
    Stats(String),
}

impl From<PolarsError> for FrameError {
    fn from(err: PolarsError) -> Self {
        Self::Stats(err.to_string())
    }
}

/// Query result: typed columns plus row-major cells.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Frame {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Build a frame, checking that every row matches the column count.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self, FrameError> {
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(FrameError::RowWidth {
                    row: idx,
                    got: row.len(),
                    expected: columns.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, FrameError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| FrameError::UnknownColumn(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Result<&Column, FrameError> {
        self.column_index(name).map(|idx| &self.columns[idx])
    }

    /// Cells of one column, in row order.
    pub fn values(&self, name: &str) -> Result<impl Iterator<Item = &Value> + '_, FrameError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Iterate rows as `(column name, value)` pairs.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &Value)>> + '_ {
        self.rows.iter().map(|row| {
            self.columns
                .iter()
                .map(|c| c.name.as_str())
                .zip(row.iter())
                .collect()
        })
    }

    /// Rows whose `name` cell has the given category label.
    pub fn filter_eq(&self, name: &str, label: &str) -> Result<Frame, FrameError> {
        let idx = self.column_index(name)?;
        let rows = self
            .rows
            .iter()
            .filter(|row| row[idx].category_label().as_deref() == Some(label))
            .cloned()
            .collect();
        Ok(Frame {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Distinct non-null labels of a column in first-seen order.
    pub fn distinct_labels(&self, name: &str) -> Result<Vec<String>, FrameError> {
        let mut seen = Vec::new();
        for value in self.values(name)? {
            if let Some(label) = value.category_label()
                && !seen.contains(&label)
            {
                seen.push(label);
            }
        }
        Ok(seen)
    }

    /// Summary statistics, one output column per input column.
    ///
    /// Numeric columns are summarized with count/mean/std/min/quartiles/max.
    /// When the frame has no numeric columns, every column is summarized with
    /// count/unique/top/freq instead. The summary of an empty selection of
    /// columns is an empty frame.
    pub fn describe(&self) -> Result<Frame, FrameError> {
        let numeric: Vec<&Column> = self.columns.iter().filter(|c| c.kind.is_numeric()).collect();
        if numeric.is_empty() {
            self.describe_categorical()
        } else {
            self.describe_numeric(&numeric)
        }
    }

    fn describe_numeric(&self, numeric: &[&Column]) -> Result<Frame, FrameError> {
        const STATS: [&str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];
        let mut columns = vec![Column::new("", ColumnKind::Text)];
        let mut per_column = Vec::with_capacity(numeric.len());
        for col in numeric {
            columns.push(Column::new(col.name.clone(), ColumnKind::Float));
            let xs: Vec<f64> = self.values(&col.name)?.filter_map(Value::as_f64).collect();
            per_column.push(Summary::of(&xs)?);
        }
        let rows = STATS
            .iter()
            .enumerate()
            .map(|(stat_idx, stat)| {
                let mut row = vec![Value::Text((*stat).to_string())];
                row.extend(per_column.iter().map(|s| s.cell(stat_idx)));
                row
            })
            .collect();
        Ok(Frame { columns, rows })
    }

    fn describe_categorical(&self) -> Result<Frame, FrameError> {
        if self.columns.is_empty() {
            return Ok(Frame::default());
        }
        let mut columns = vec![Column::new("", ColumnKind::Text)];
        let mut stats: Vec<[Value; 4]> = Vec::new();
        for col in &self.columns {
            columns.push(Column::new(col.name.clone(), ColumnKind::Text));
            let labels: Vec<String> = self.values(&col.name)?.filter_map(Value::category_label).collect();
            let ca = StringChunked::from_iter_values(
                PlSmallStr::from_static("labels"),
                labels.iter().map(String::as_str),
            );
            let unique = if labels.is_empty() { 0 } else { ca.n_unique()? };
            // Ties resolve to the first-seen label.
            let mut top: Option<(String, usize)> = None;
            for label in self.distinct_labels(&col.name)? {
                let freq = ca.equal(label.as_str()).sum().unwrap_or(0) as usize;
                if top.as_ref().is_none_or(|(_, best)| freq > *best) {
                    top = Some((label, freq));
                }
            }
            stats.push([
                Value::Int(labels.len() as i64),
                Value::Int(unique as i64),
                top.as_ref().map_or(Value::Null, |(l, _)| Value::Text(l.clone())),
                top.as_ref().map_or(Value::Null, |(_, n)| Value::Int(*n as i64)),
            ]);
        }
        let rows = ["count", "unique", "top", "freq"]
            .iter()
            .enumerate()
            .map(|(stat_idx, stat)| {
                let mut row = vec![Value::Text((*stat).to_string())];
                row.extend(stats.iter().map(|s| s[stat_idx].clone()));
                row
            })
            .collect();
        Ok(Frame { columns, rows })
    }
}

/// Order statistics over a sample.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q1: Option<f64>,
    pub median: Option<f64>,
    pub q3: Option<f64>,
    pub max: Option<f64>,
}

fn series(xs: &[f64]) -> Float64Chunked {
    Float64Chunked::from_slice(PlSmallStr::from_static("values"), xs)
}

impl Summary {
    /// Summarize a sample in any order. Sample standard deviation (n - 1);
    /// quantiles by linear interpolation.
    pub fn of(xs: &[f64]) -> Result<Self, FrameError> {
        let ca = series(xs);
        let count = xs.len();
        let quantile = |q: f64| ca.quantile(q, QuantileMethod::Linear);
        Ok(Self {
            count,
            mean: ca.mean(),
            std: if count > 1 { ca.std(1) } else { None },
            min: ca.min(),
            q1: quantile(0.25)?,
            median: quantile(0.5)?,
            q3: quantile(0.75)?,
            max: ca.max(),
        })
    }

    fn cell(&self, stat_idx: usize) -> Value {
        let v = match stat_idx {
            0 => return Value::Float(self.count as f64),
            1 => self.mean,
            2 => self.std,
            3 => self.min,
            4 => self.q1,
            5 => self.median,
            6 => self.q3,
            _ => self.max,
        };
        v.map_or(Value::Null, Value::Float)
    }
}

/// Linear-interpolated quantile of a sample; `None` when it is empty.
pub fn quantile(xs: &[f64], q: f64) -> Result<Option<f64>, FrameError> {
    Ok(series(xs).quantile(q.clamp(0.0, 1.0), QuantileMethod::Linear)?)
}
