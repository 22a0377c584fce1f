//! SQL dialects.
//!
//! The renderer asks the dialect for everything that differs between engines:
//! placeholders, the regex operator, the current timestamp, temp table DDL and the
//! column types of staging tables.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use polystore_core::error::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Sqlite,
    Postgres,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Sqlite => write!(f, "sqlite"),
            SqlDialect::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for SqlDialect {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(SqlDialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            other => Err(StoreError::configuration(format!("unknown SQL dialect {other:?}"))),
        }
    }
}

impl SqlDialect {
    /// Placeholder of the `n`th bound parameter, counting from 1.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Sqlite => format!("?{n}"),
            SqlDialect::Postgres => format!("${n}"),
        }
    }

    /// Quotes an identifier that has already been validated.
    pub fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    pub fn regex_operator(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "REGEXP",
            SqlDialect::Postgres => "~",
        }
    }

    /// Current timestamp, in the same text form the value codec writes dates in.
    pub fn now(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            SqlDialect::Postgres => "NOW()",
        }
    }

    /// `LIMIT` clause to put before an `OFFSET` that has no limit of its own.
    pub fn unbounded_limit(&self) -> Option<&'static str> {
        match self {
            SqlDialect::Sqlite => Some("LIMIT -1"),
            SqlDialect::Postgres => None,
        }
    }

    pub fn create_temp_table(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "CREATE TEMP TABLE",
            SqlDialect::Postgres => "CREATE TEMPORARY TABLE",
        }
    }

    /// Suffix making a temp table disappear with the transaction, where supported.
    pub fn temp_table_suffix(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "",
            SqlDialect::Postgres => " ON COMMIT DROP",
        }
    }

    /// Largest number of bound parameters one statement may carry.
    pub fn max_params(&self) -> usize {
        match self {
            SqlDialect::Sqlite => 999,
            SqlDialect::Postgres => 65_535,
        }
    }

    /// Name of a column type in this dialect.
    pub fn type_name(&self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (SqlDialect::Sqlite, ColumnType::Integer) => "INTEGER",
            (SqlDialect::Sqlite, ColumnType::Real) => "REAL",
            (SqlDialect::Sqlite, ColumnType::Numeric) => "NUMERIC",
            (SqlDialect::Sqlite, ColumnType::Text) => "TEXT",
            (SqlDialect::Sqlite, ColumnType::Blob) => "BLOB",
            (SqlDialect::Sqlite, ColumnType::Boolean) => "BOOLEAN",
            (SqlDialect::Sqlite, ColumnType::Timestamp) => "DATETIME",
            (SqlDialect::Postgres, ColumnType::Integer) => "BIGINT",
            (SqlDialect::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (SqlDialect::Postgres, ColumnType::Numeric) => "NUMERIC",
            (SqlDialect::Postgres, ColumnType::Text) => "TEXT",
            (SqlDialect::Postgres, ColumnType::Blob) => "BYTEA",
            (SqlDialect::Postgres, ColumnType::Boolean) => "BOOLEAN",
            (SqlDialect::Postgres, ColumnType::Timestamp) => "TIMESTAMPTZ",
        }
    }
}

/// Engine-neutral column type, derived from a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Numeric,
    Text,
    Blob,
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// Classifies a declared column type. Unknown or missing declarations are `Text`.
    pub fn from_declared(declared: Option<&str>) -> Self {
        let Some(declared) = declared else {
            return ColumnType::Text;
        };
        let upper = declared.to_uppercase();

        if upper.starts_with("BOOL") {
            ColumnType::Boolean
        } else if upper.contains("DATE") || upper.contains("TIME") {
            ColumnType::Timestamp
        } else if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.contains("BLOB") || upper.contains("BYTEA") {
            ColumnType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Real
        } else if upper.contains("NUM") || upper.contains("DEC") {
            ColumnType::Numeric
        } else {
            ColumnType::Text
        }
    }
}
