//! Dynamically typed SQLite values and their coercion into destination column types.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, TypeInfo, ValueRef};

use crate::schema::PgColumnType;
use crate::SyncError;

/// Largest number of bind parameters PostgreSQL accepts in one statement.
pub const PG_MAX_BIND_PARAMS: usize = 65_535;

/// A value as SQLite stored it, by storage class.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn from_row(row: &SqliteRow, idx: usize) -> Result<Self, sqlx::Error> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Self::Null);
        }
        let storage = raw.type_info().name().to_ascii_uppercase();
        let value = match storage.as_str() {
            "INTEGER" | "BOOLEAN" => Self::Integer(row.try_get_unchecked(idx)?),
            "REAL" => Self::Real(row.try_get_unchecked(idx)?),
            "BLOB" => Self::Blob(row.try_get_unchecked(idx)?),
            _ => Self::Text(row.try_get_unchecked(idx)?),
        };
        Ok(value)
    }

    pub fn row(row: &SqliteRow, width: usize) -> Result<Vec<Self>, sqlx::Error> {
        (0..width).map(|idx| Self::from_row(row, idx)).collect()
    }
}

/// A value ready to bind against a PostgreSQL column of a known type.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null(PgColumnType),
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// Timestamp literal bound as text and cast in SQL.
    Timestamp(String),
    Bytes(Vec<u8>),
}

pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Parse the timestamp layouts SQLite's date functions produce.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Convert one SQLite value for a destination column.
pub fn coerce(value: SqlValue, ty: PgColumnType, column: &str) -> Result<PgValue, SyncError> {
    let mismatch = |found: &SqlValue| SyncError::Coerce {
        column: column.to_string(),
        target: ty,
        value: format!("{found:?}"),
    };

    let coerced = match (ty, value) {
        (ty, SqlValue::Null) => PgValue::Null(ty),

        (PgColumnType::Text, SqlValue::Text(s)) => PgValue::Text(s),
        (PgColumnType::Text, SqlValue::Integer(i)) => PgValue::Text(i.to_string()),
        (PgColumnType::Text, SqlValue::Real(f)) => PgValue::Text(f.to_string()),
        (PgColumnType::Text, SqlValue::Blob(b)) => match String::from_utf8(b) {
            Ok(text) => PgValue::Text(text),
            Err(err) => return Err(mismatch(&SqlValue::Blob(err.into_bytes()))),
        },

        (PgColumnType::Integer | PgColumnType::BigInt, SqlValue::Integer(i)) => PgValue::Int(i),
        (PgColumnType::Integer | PgColumnType::BigInt, SqlValue::Real(f)) if f.fract() == 0.0 => {
            PgValue::Int(f as i64)
        }
        (PgColumnType::Integer | PgColumnType::BigInt, SqlValue::Text(s)) => match s.trim().parse() {
            Ok(i) => PgValue::Int(i),
            Err(_) => return Err(mismatch(&SqlValue::Text(s))),
        },

        (PgColumnType::DoublePrecision, SqlValue::Real(f)) => PgValue::Float(f),
        (PgColumnType::DoublePrecision, SqlValue::Integer(i)) => PgValue::Float(i as f64),
        (PgColumnType::DoublePrecision, SqlValue::Text(s)) => match s.trim().parse() {
            Ok(f) => PgValue::Float(f),
            Err(_) => return Err(mismatch(&SqlValue::Text(s))),
        },

        (PgColumnType::Boolean, SqlValue::Integer(i)) => PgValue::Bool(i != 0),
        (PgColumnType::Boolean, SqlValue::Text(s)) => match parse_bool(&s) {
            Some(b) => PgValue::Bool(b),
            None => return Err(mismatch(&SqlValue::Text(s))),
        },

        (PgColumnType::Timestamp, SqlValue::Text(s)) => match parse_timestamp(&s) {
            Some(ts) => PgValue::Timestamp(format_timestamp(ts)),
            None => return Err(mismatch(&SqlValue::Text(s))),
        },
        (PgColumnType::Timestamp, SqlValue::Integer(secs)) => {
            match DateTime::from_timestamp(secs, 0) {
                Some(ts) => PgValue::Timestamp(format_timestamp(ts.naive_utc())),
                None => return Err(mismatch(&SqlValue::Integer(secs))),
            }
        }

        (PgColumnType::Bytea, SqlValue::Blob(b)) => PgValue::Bytes(b),
        (PgColumnType::Bytea, SqlValue::Text(s)) => PgValue::Bytes(s.into_bytes()),

        (_, other) => return Err(mismatch(&other)),
    };
    Ok(coerced)
}

/// Rows per INSERT, lowered so `rows * columns` stays within the bind-parameter limit.
pub fn effective_batch_size(requested: usize, columns: usize) -> usize {
    let ceiling = PG_MAX_BIND_PARAMS / columns.max(1);
    requested.clamp(1, ceiling.max(1))
}

/// Push one value into a `VALUES` tuple.
pub fn push_value(builder: &mut Separated<'_, '_, Postgres, &'static str>, value: PgValue) {
    match value {
        PgValue::Null(ty) => {
            match ty {
                PgColumnType::Integer | PgColumnType::BigInt => builder.push_bind(None::<i64>),
                PgColumnType::DoublePrecision => builder.push_bind(None::<f64>),
                PgColumnType::Boolean => builder.push_bind(None::<bool>),
                PgColumnType::Bytea => builder.push_bind(None::<Vec<u8>>),
                PgColumnType::Text | PgColumnType::Timestamp => builder.push_bind(None::<String>),
            };
            if ty == PgColumnType::Timestamp {
                builder.push_unseparated("::timestamp");
            }
        }
        PgValue::Int(i) => {
            builder.push_bind(i);
        }
        PgValue::Float(f) => {
            builder.push_bind(f);
        }
        PgValue::Text(s) => {
            builder.push_bind(s);
        }
        PgValue::Bool(b) => {
            builder.push_bind(b);
        }
        PgValue::Timestamp(s) => {
            builder.push_bind(s);
            builder.push_unseparated("::timestamp");
        }
        PgValue::Bytes(b) => {
            builder.push_bind(b);
        }
    }
}

/// Groups a row stream into fixed-size insert batches.
#[derive(Debug)]
pub struct Batcher<T> {
    size: usize,
    pending: Vec<T>,
}

impl<T> Batcher<T> {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            pending: Vec::with_capacity(size),
        }
    }

    /// Returns a full batch once `size` rows have accumulated.
    pub fn push(&mut self, row: T) -> Option<Vec<T>> {
        self.pending.push(row);
        if self.pending.len() >= self.size {
            Some(std::mem::replace(&mut self.pending, Vec::with_capacity(self.size)))
        } else {
            None
        }
    }

    pub fn finish(self) -> Option<Vec<T>> {
        (!self.pending.is_empty()).then_some(self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_of_1000_cover_1500_rows() {
        let mut batcher = Batcher::new(1000);
        let mut batches = Vec::new();
        for row in 0..1500 {
            if let Some(batch) = batcher.push(row) {
                batches.push(batch);
            }
        }
        batches.extend(batcher.finish());

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1000);
        assert_eq!(batches[1].len(), 500);
        assert_eq!(batches[1][0], 1000);
    }

    #[test]
    fn batch_size_respects_bind_limit() {
        assert_eq!(effective_batch_size(1000, 5), 1000);
        assert_eq!(effective_batch_size(1000, 100), 655);
        assert_eq!(effective_batch_size(0, 3), 1);
        assert_eq!(effective_batch_size(10, 70_000), 1);
    }

    #[test]
    fn integers_carry_into_text_columns_unchanged() {
        assert_eq!(
            coerce(SqlValue::Integer(42), PgColumnType::Text, "juz").unwrap(),
            PgValue::Text("42".into())
        );
        assert_eq!(
            coerce(SqlValue::Text("4a".into()), PgColumnType::Text, "juz").unwrap(),
            PgValue::Text("4a".into())
        );
    }

    #[test]
    fn blobs_enter_text_columns_only_as_valid_utf8() {
        assert_eq!(
            coerce(SqlValue::Blob("بِسْمِ".as_bytes().to_vec()), PgColumnType::Text, "t").unwrap(),
            PgValue::Text("بِسْمِ".into())
        );
        let err = coerce(SqlValue::Blob(vec![0x61, 0xff]), PgColumnType::Text, "t").unwrap_err();
        match err {
            SyncError::Coerce { column, target, value } => {
                assert_eq!(column, "t");
                assert_eq!(target, PgColumnType::Text);
                assert_eq!(value, "Blob([97, 255])");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn typed_targets_convert_or_reject() {
        assert_eq!(coerce(SqlValue::Integer(1), PgColumnType::Boolean, "b").unwrap(), PgValue::Bool(true));
        assert_eq!(
            coerce(SqlValue::Text(" 7 ".into()), PgColumnType::Integer, "n").unwrap(),
            PgValue::Int(7)
        );
        assert_eq!(
            coerce(SqlValue::Text("2024-02-29 10:00:00".into()), PgColumnType::Timestamp, "t").unwrap(),
            PgValue::Timestamp("2024-02-29 10:00:00".into())
        );
        assert_eq!(
            coerce(SqlValue::Null, PgColumnType::Bytea, "b").unwrap(),
            PgValue::Null(PgColumnType::Bytea)
        );
        assert!(matches!(
            coerce(SqlValue::Text("seven".into()), PgColumnType::Integer, "n"),
            Err(SyncError::Coerce { .. })
        ));
    }

    #[test]
    fn timestamps_accept_sqlite_layouts() {
        assert!(parse_timestamp("2024-01-02T03:04:05Z").is_some());
        assert!(parse_timestamp("2024-01-02 03:04:05.123").is_some());
        assert!(parse_timestamp("2024-01-02").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
