use duckdb::types::{TimeUnit, Value as DbValue};
use jiff::{civil::DateTime, tz::TimeZone, Timestamp};
use log::debug;
use serde_json::Value;

use crate::{
    db::alvys::tables::{Column, Kind, Source, TableSpec},
    error::IngestError,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Text(String),
    Float(f64),
    Int(i64),
    Timestamp(Timestamp),
}

impl Scalar {
    pub fn to_db(&self) -> DbValue {
        match self {
            Scalar::Null => DbValue::Null,
            Scalar::Text(s) => DbValue::Text(s.clone()),
            Scalar::Float(x) => DbValue::Double(*x),
            Scalar::Int(n) => DbValue::BigInt(*n),
            Scalar::Timestamp(ts) => DbValue::Timestamp(TimeUnit::Microsecond, ts.as_microsecond()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One destination row, values in the order of the table's columns.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatRow {
    pub table: &'static TableSpec,
    pub values: Vec<Scalar>,
}

impl FlatRow {
    pub fn key(&self) -> &str {
        self.values
            .first()
            .and_then(Scalar::as_text)
            .unwrap_or_default()
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.table.position(column).map(|i| &self.values[i])
    }
}

/// Rows destined for one table, plus the count of records that could not be
/// flattened.
#[derive(Debug)]
pub struct TableRows {
    pub table: &'static TableSpec,
    pub rows: Vec<FlatRow>,
    pub skipped: u64,
}

impl TableRows {
    fn new(table: &'static TableSpec) -> Self {
        TableRows {
            table,
            rows: Vec::new(),
            skipped: 0,
        }
    }
}

struct RowContext<'a> {
    parent: Option<(&'a Value, &'a str)>,
    ordinal: usize,
    file_id: &'a str,
}

/// Flatten a batch of records into rows of `spec` and of its child tables.
/// The parent table comes first in the result.
pub fn flatten(spec: &'static TableSpec, records: &[Value], file_id: &str) -> Vec<TableRows> {
    let mut parents = TableRows::new(spec);
    let mut children: Vec<TableRows> = spec.children.iter().map(|c| TableRows::new(c.table)).collect();

    for (i, record) in records.iter().enumerate() {
        let ctx = RowContext {
            parent: None,
            ordinal: i + 1,
            file_id,
        };
        let row = match flatten_row(spec, record, &ctx) {
            Ok(row) => row,
            Err(e) => {
                debug!("{}: skipping record {}: {}", spec.name, i, e);
                parents.skipped += 1;
                continue;
            }
        };
        for (child, out) in spec.children.iter().zip(children.iter_mut()) {
            let items = record.get(child.array).and_then(Value::as_array);
            for (n, item) in items.into_iter().flatten().enumerate() {
                let ctx = RowContext {
                    parent: Some((record, row.key())),
                    ordinal: n + 1,
                    file_id,
                };
                match flatten_row(child.table, item, &ctx) {
                    Ok(child_row) => out.rows.push(child_row),
                    Err(e) => {
                        debug!("{}: skipping {} #{} of {}: {}", child.table.name, child.array, n + 1, row.key(), e);
                        out.skipped += 1;
                    }
                }
            }
        }
        parents.rows.push(row);
    }

    let mut out = vec![parents];
    out.extend(children);
    out
}

fn flatten_row(
    spec: &'static TableSpec,
    record: &Value,
    ctx: &RowContext,
) -> Result<FlatRow, IngestError> {
    if !record.is_object() {
        return Err(IngestError::MalformedRecord(format!(
            "{}: record is not an object",
            spec.name
        )));
    }
    let values: Vec<Scalar> = spec
        .columns
        .iter()
        .map(|column| column_value(column, record, ctx))
        .collect();
    let row = FlatRow {
        table: spec,
        values,
    };
    if row.key().is_empty() {
        return Err(IngestError::MalformedRecord(format!(
            "{}: record has no {}",
            spec.name,
            spec.key().name
        )));
    }
    Ok(row)
}

fn lookup<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .filter(|v| !v.is_null())
}

fn column_value(column: &Column, record: &Value, ctx: &RowContext) -> Scalar {
    let raw = match column.source {
        Source::Path(path) => lookup(record, path),
        Source::FirstOf(paths) => paths.iter().find_map(|p| lookup(record, p)),
        Source::Parent(path) => ctx.parent.and_then(|(p, _)| lookup(p, path)),
        Source::Ordinal => return Scalar::Int(ctx.ordinal as i64),
        Source::PathOrOrdinal(path) => {
            let value = convert(lookup(record, path), column.kind);
            if value != Scalar::Null {
                return value;
            }
            return match ctx.parent {
                Some((_, key)) => convert_text(&format!("{}_{}", key, ctx.ordinal), column.kind),
                None => Scalar::Null,
            };
        }
        Source::FileId => return convert_text(ctx.file_id, column.kind),
    };
    convert(raw, column.kind)
}

fn convert_text(s: &str, kind: Kind) -> Scalar {
    convert(Some(&Value::String(s.to_string())), kind)
}

fn convert(raw: Option<&Value>, kind: Kind) -> Scalar {
    match kind {
        Kind::Text(len) => to_text(raw, len),
        Kind::Code(len) => match raw {
            Some(Value::Object(map)) => to_text(map.get("Code"), len),
            other => to_text(other, len),
        },
        Kind::Float => to_float(raw).map_or(Scalar::Null, Scalar::Float),
        Kind::FloatOrZero => Scalar::Float(to_float(raw).unwrap_or(0.0)),
        Kind::Int => to_float(raw).map_or(Scalar::Null, |x| Scalar::Int(x as i64)),
        Kind::Flag => Scalar::Int(i64::from(to_flag(raw))),
        Kind::Timestamp => raw
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .map_or(Scalar::Null, Scalar::Timestamp),
    }
}

fn to_text(raw: Option<&Value>, len: usize) -> Scalar {
    let s = match raw {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => return Scalar::Null,
    };
    if s.is_empty() {
        return Scalar::Null;
    }
    Scalar::Text(s.chars().take(len).collect())
}

fn to_float(raw: Option<&Value>) -> Option<f64> {
    match raw? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        _ => None,
    }
}

fn to_flag(raw: Option<&Value>) -> bool {
    match raw {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |x| x != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

/// Parse an ISO-8601 timestamp.  Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<Timestamp> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<Timestamp>().ok().or_else(|| {
        s.parse::<DateTime>()
            .ok()
            .and_then(|dt| dt.to_zoned(TimeZone::UTC).ok())
            .map(|z| z.timestamp())
    })
}
