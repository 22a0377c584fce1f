//! Conversions between BSON values and SQLite values.
//!
//! Object ids are stored as their 24-character hex form and dates as RFC 3339 text with
//! millisecond precision, so both compare correctly as text. Reads restore them from
//! the column name (`_id`) and the declared column type.

use bson::{Binary, Bson, Document, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    Row,
    types::{ToSql, ToSqlOutput, Value, ValueRef},
};

use polystore_core::{
    error::{StoreError, StoreResult},
    query::ID_FIELD,
};

use crate::{ast::SqlValue, dialect::ColumnType};

/// Converts a BSON value into a bound parameter.
///
/// # Errors
///
/// Returns [`StoreError::Translation`] for values without a column representation
/// (documents, arrays, regexes, ...).
pub fn to_sql_value(value: &Bson) -> StoreResult<SqlValue> {
    Ok(match value {
        Bson::Null | Bson::Undefined => SqlValue::Null,
        Bson::Boolean(flag) => SqlValue::Bool(*flag),
        Bson::Int32(number) => SqlValue::Integer(i64::from(*number)),
        Bson::Int64(number) => SqlValue::Integer(*number),
        Bson::Double(number) => SqlValue::Real(*number),
        Bson::String(text) => SqlValue::Text(text.clone()),
        Bson::ObjectId(id) => SqlValue::Text(id.to_hex()),
        Bson::DateTime(at) => SqlValue::Text(format_datetime(at.to_chrono())),
        Bson::Binary(binary) => SqlValue::Blob(binary.bytes.clone()),
        other => {
            return Err(StoreError::translation(format!(
                "{:?} values cannot be stored in a column",
                other.element_type()
            )));
        }
    })
}

pub(crate) fn format_datetime(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(number) => ToSqlOutput::Owned(Value::Integer(*number)),
            SqlValue::Real(number) => ToSqlOutput::Owned(Value::Real(*number)),
            SqlValue::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            SqlValue::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            SqlValue::Bool(flag) => ToSqlOutput::Owned(Value::Integer(i64::from(*flag))),
        })
    }
}

/// Name and declared type of a result column.
#[derive(Debug, Clone)]
pub(crate) struct ScanColumn {
    pub name: String,
    pub column_type: Option<ColumnType>,
}

/// Reads one result row into a document, restoring ids, booleans and dates.
pub(crate) fn scan_row(row: &Row<'_>, columns: &[ScanColumn]) -> rusqlite::Result<Document> {
    let mut document = Document::new();

    for (index, column) in columns.iter().enumerate() {
        let value = match row.get_ref(index)? {
            ValueRef::Null => Bson::Null,
            ValueRef::Integer(number) => match column.column_type {
                Some(ColumnType::Boolean) => Bson::Boolean(number != 0),
                _ => Bson::Int64(number),
            },
            ValueRef::Real(number) => Bson::Double(number),
            ValueRef::Text(bytes) => scan_text(&column.name, column.column_type, &String::from_utf8_lossy(bytes)),
            ValueRef::Blob(bytes) => Bson::Binary(Binary { subtype: BinarySubtype::Generic, bytes: bytes.to_vec() }),
        };

        document.insert(column.name.clone(), value);
    }

    Ok(document)
}

fn scan_text(name: &str, column_type: Option<ColumnType>, text: &str) -> Bson {
    if name == ID_FIELD {
        if let Ok(id) = ObjectId::parse_str(text) {
            return Bson::ObjectId(id);
        }
    }

    if column_type == Some(ColumnType::Timestamp) {
        if let Ok(at) = DateTime::parse_from_rfc3339(text) {
            return Bson::DateTime(bson::DateTime::from_millis(at.timestamp_millis()));
        }
    }

    Bson::String(text.to_string())
}
