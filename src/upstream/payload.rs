use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::warn;
use crate::error::UpstreamError;
use crate::types::candle::RawCandle;

const ISS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CANDLE_COLUMNS: [&str; 8] = ["open", "close", "high", "low", "value", "volume", "begin", "end"];

/// One named ISS table. Column positions come from `columns`, falling back
/// to the key order of `metadata`.
pub struct IssTable<'a> {
    columns: Vec<&'a str>,
    rows: &'a [Value],
}

impl<'a> IssTable<'a> {
    pub fn from_payload(payload: &'a Value, name: &str) -> Result<Self, UpstreamError> {
        let table = payload.get(name)
            .ok_or_else(|| UpstreamError::payload(format!("missing table {:?}", name)))?;

        let columns: Vec<&str> = match table.get("columns").and_then(Value::as_array) {
            Some(columns) => columns.iter().filter_map(Value::as_str).collect(),
            None => table.get("metadata")
                .and_then(Value::as_object)
                .map(|metadata| metadata.keys().map(String::as_str).collect())
                .ok_or_else(|| UpstreamError::payload(format!("table {:?} has no column layout", name)))?,
        };

        let rows = table.get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| UpstreamError::payload(format!("table {:?} has no data section", name)))?;

        Ok(IssTable { columns, rows })
    }

    pub fn column(&self, name: &str) -> Result<usize, UpstreamError> {
        self.columns.iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| UpstreamError::payload(format!("missing column {:?}", name)))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decode the `candles` table of an ISS candles response, oldest first.
///
/// Rows that do not advance `begin` strictly are dropped so a series always
/// has increasing period starts.
pub fn decode_candles(payload: &Value) -> Result<Vec<RawCandle>, UpstreamError> {
    let table = IssTable::from_payload(payload, "candles")?;

    let mut idx = [0usize; CANDLE_COLUMNS.len()];
    for (slot, name) in idx.iter_mut().zip(CANDLE_COLUMNS) {
        *slot = table.column(name)?;
    }
    let [open, close, high, low, value, volume, begin, end] = idx;

    let mut candles: Vec<RawCandle> = Vec::with_capacity(table.len());
    for (n, row) in table.rows.iter().enumerate() {
        let cells = row.as_array()
            .ok_or_else(|| UpstreamError::payload(format!("row {} is not an array", n)))?;

        let candle = RawCandle {
            open: number(cells, open, n)?,
            close: number(cells, close, n)?,
            high: number(cells, high, n)?,
            low: number(cells, low, n)?,
            value: number(cells, value, n)?,
            volume: count(cells, volume, n)?,
            period_start: timestamp(cells, begin, n)?,
            period_end: timestamp(cells, end, n)?,
        };

        if let Some(last) = candles.last() {
            if candle.period_start <= last.period_start {
                warn!(row = n, begin = %candle.period_start, "dropping out-of-order ISS candle");
                continue;
            }
        }
        candles.push(candle);
    }

    Ok(candles)
}

fn cell<'v>(cells: &'v [Value], idx: usize, row: usize) -> Result<&'v Value, UpstreamError> {
    cells.get(idx)
        .ok_or_else(|| UpstreamError::payload(format!("row {} is missing column {}", row, idx)))
}

fn number(cells: &[Value], idx: usize, row: usize) -> Result<f64, UpstreamError> {
    let value = cell(cells, idx, row)?;
    value.as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| UpstreamError::payload(format!("row {}: expected number, got {}", row, value)))
}

fn count(cells: &[Value], idx: usize, row: usize) -> Result<u64, UpstreamError> {
    let value = cell(cells, idx, row)?;
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        _ => Err(UpstreamError::payload(format!("row {}: expected volume, got {}", row, value))),
    }
}

fn timestamp(cells: &[Value], idx: usize, row: usize) -> Result<DateTime<Utc>, UpstreamError> {
    let value = cell(cells, idx, row)?;
    value.as_str()
        .and_then(|s| NaiveDateTime::parse_from_str(s, ISS_TIME_FORMAT).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| UpstreamError::payload(format!("row {}: expected timestamp, got {}", row, value)))
}
