//! SQLite schema introspection and translation to PostgreSQL DDL.

use std::fmt;

use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::value::SqlValue;
use crate::SyncError;

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteColumn {
    pub cid: i64,
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgColumnType {
    Integer,
    BigInt,
    DoublePrecision,
    Text,
    Boolean,
    Timestamp,
    Bytea,
}

impl PgColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::DoublePrecision => "DOUBLE PRECISION",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Bytea => "BYTEA",
        }
    }

    /// Map a declared SQLite column type, following SQLite's affinity rules
    /// with a few extra names SQLite itself treats as NUMERIC.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.contains("BOOL") {
            Self::Boolean
        } else if upper.contains("DATE") || upper.contains("TIME") {
            Self::Timestamp
        } else if upper.contains("BIGINT") || upper.contains("INT8") {
            Self::BigInt
        } else if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.contains("BLOB") {
            Self::Bytea
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DECIMAL")
        {
            Self::DoublePrecision
        } else {
            Self::Text
        }
    }

    fn is_integral(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInt)
    }
}

impl fmt::Display for PgColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Destination column after declared types were checked against sampled data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    pub name: String,
    pub pg_type: PgColumnType,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub pk: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub name: String,
    pub columns: Vec<ColumnPlan>,
    pub row_count: i64,
}

impl TablePlan {
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut def = format!("{} {}", quote_ident(&col.name), col.pg_type);
                if col.not_null {
                    def.push_str(" NOT NULL");
                }
                if let Some(default) = col
                    .default_value
                    .as_deref()
                    .and_then(|raw| translate_default(raw, col.pg_type))
                {
                    def.push_str(" DEFAULT ");
                    def.push_str(&default);
                }
                def
            })
            .collect();

        let mut keys: Vec<&ColumnPlan> = self.columns.iter().filter(|c| c.pk > 0).collect();
        keys.sort_by_key(|c| c.pk);
        if !keys.is_empty() {
            let names: Vec<String> = keys.iter().map(|c| quote_ident(&c.name)).collect();
            parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }

        format!("CREATE TABLE {} ({})", quote_ident(&self.name), parts.join(", "))
    }
}

/// Double-quote an identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Refine each column's mapped type using sampled values. A declared integer column
/// holding non-numeric text becomes TEXT; one holding reals becomes DOUBLE PRECISION;
/// one holding values outside the i32 range becomes BIGINT. A text column holding
/// a blob that is not valid UTF-8 becomes BYTEA.
pub fn plan_columns(columns: &[SqliteColumn], samples: &[Vec<SqlValue>]) -> Vec<ColumnPlan> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let declared = PgColumnType::from_declared(&col.declared_type);
            let observed = samples.iter().filter_map(|row| row.get(idx));
            ColumnPlan {
                name: col.name.clone(),
                pg_type: refine(declared, observed),
                not_null: col.not_null,
                default_value: col.default_value.clone(),
                pk: col.pk,
            }
        })
        .collect()
}

fn refine<'a>(declared: PgColumnType, observed: impl Iterator<Item = &'a SqlValue>) -> PgColumnType {
    let mut ty = declared;
    for value in observed {
        ty = match (ty, value) {
            (_, SqlValue::Null) => ty,
            (t, SqlValue::Text(s)) if t.is_integral() && s.trim().parse::<i64>().is_err() => {
                if s.trim().parse::<f64>().is_ok() {
                    PgColumnType::DoublePrecision
                } else {
                    PgColumnType::Text
                }
            }
            (t, SqlValue::Real(_)) if t.is_integral() => PgColumnType::DoublePrecision,
            (PgColumnType::Integer, SqlValue::Integer(i)) if i32::try_from(*i).is_err() => {
                PgColumnType::BigInt
            }
            (PgColumnType::Integer, SqlValue::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) if i32::try_from(i).is_err() => PgColumnType::BigInt,
                _ => ty,
            },
            (PgColumnType::DoublePrecision, SqlValue::Text(s)) if s.trim().parse::<f64>().is_err() => {
                PgColumnType::Text
            }
            (PgColumnType::Boolean, SqlValue::Integer(i)) if !matches!(*i, 0 | 1) => {
                PgColumnType::BigInt
            }
            (PgColumnType::Boolean, SqlValue::Text(s)) if crate::value::parse_bool(s).is_none() => {
                PgColumnType::Text
            }
            (PgColumnType::Timestamp, SqlValue::Text(s))
                if crate::value::parse_timestamp(s).is_none() =>
            {
                PgColumnType::Text
            }
            (PgColumnType::Timestamp, SqlValue::Real(_)) => PgColumnType::Text,
            (PgColumnType::Text, SqlValue::Blob(b)) if std::str::from_utf8(b).is_err() => {
                PgColumnType::Bytea
            }
            (t, SqlValue::Blob(_)) if t != PgColumnType::Bytea && t != PgColumnType::Text => {
                PgColumnType::Bytea
            }
            _ => ty,
        };
    }
    ty
}

/// Translate a SQLite `DEFAULT` expression into one PostgreSQL accepts.
/// Expressions with no portable equivalent are dropped.
pub fn translate_default(raw: &str, ty: PgColumnType) -> Option<String> {
    let trimmed = raw.trim();
    let unwrapped = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed)
        .trim();
    let upper = unwrapped.to_ascii_uppercase();

    if upper == "NULL" {
        return None;
    }
    if matches!(
        upper.as_str(),
        "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME" | "DATETIME('NOW')" | "DATETIME(\"NOW\")"
    ) {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    if ty == PgColumnType::Boolean {
        return match upper.as_str() {
            "1" | "TRUE" => Some("TRUE".to_string()),
            "0" | "FALSE" => Some("FALSE".to_string()),
            _ => None,
        };
    }
    if unwrapped.parse::<f64>().is_ok() {
        return Some(unwrapped.to_string());
    }
    if unwrapped.len() >= 2 && unwrapped.starts_with('\'') && unwrapped.ends_with('\'') {
        return Some(unwrapped.to_string());
    }
    if unwrapped.len() >= 2 && unwrapped.starts_with('"') && unwrapped.ends_with('"') {
        let inner = &unwrapped[1..unwrapped.len() - 1];
        return Some(format!("'{}'", inner.replace('\'', "''")));
    }

    warn!(default = raw, "dropping column default with no postgres equivalent");
    None
}

/// User tables in the SQLite file, excluding its internal `sqlite_%` tables.
pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>, SyncError> {
    let names = sqlx::query_scalar::<_, String>(
        r#"
        SELECT name
        FROM sqlite_master
        WHERE type = 'table'
          AND name NOT LIKE 'sqlite_%'
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub async fn table_info(pool: &SqlitePool, table: &str) -> Result<Vec<SqliteColumn>, SyncError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
        .fetch_all(pool)
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        columns.push(SqliteColumn {
            cid: row.try_get("cid")?,
            name: row.try_get("name")?,
            declared_type: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
            not_null: row.try_get::<i64, _>("notnull")? != 0,
            default_value: row.try_get("dflt_value")?,
            pk: row.try_get("pk")?,
        });
    }
    if columns.is_empty() {
        return Err(SyncError::MissingTable(table.to_string()));
    }
    Ok(columns)
}

pub async fn row_count(pool: &SqlitePool, table: &str) -> Result<i64, SyncError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
        .fetch_one(pool)
        .await?;
    Ok(count)
}
