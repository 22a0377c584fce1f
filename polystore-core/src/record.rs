//! Records: typed values that live in a collection.
//!
//! This module provides the trait every typed value stored through a
//! [`TypedCollection`](crate::collection::TypedCollection) must implement, and the helpers
//! that convert records to and from the plain field documents the backends work with.

use bson::{Bson, Document, de::deserialize_from_bson, oid::ObjectId, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::{
    error::{StoreError, StoreResult},
    query::ID_FIELD,
};

/// Core trait that all typed records must implement.
///
/// A record is identified by an optional [`ObjectId`] stored under `_id`. Records without
/// an id get one assigned on insert or upsert.
///
/// # Deriving
///
/// With the `macros` feature enabled, `#[derive(Record)]` implements this trait:
///
/// ```ignore
/// use polystore::{Record, bson::oid::ObjectId};
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Record)]
/// #[record(collection = "users")]
/// pub struct User {
///     #[record(id)]
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub name: String,
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns this record's identifier, if it has been assigned one.
    fn id(&self) -> Option<&ObjectId>;

    /// Assigns the record's identifier.
    fn set_id(&mut self, id: ObjectId);

    /// Returns the name of the collection this record belongs to.
    fn collection_name() -> &'static str;
}

/// Extension trait providing conversions between records and field documents.
///
/// This trait is automatically implemented for all types that implement [`Record`].
pub trait RecordExt: Record {
    /// Converts this record to a field document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the record does not serialize to a
    /// document.
    fn to_fields(&self) -> StoreResult<Document>;

    /// Creates a record from a field document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_fields(fields: Document) -> StoreResult<Self>;

    /// Converts this record to a JSON value.
    fn to_json(&self) -> StoreResult<Value>;

    /// Creates a record from a JSON value.
    fn from_json(value: Value) -> StoreResult<Self>;
}

impl<R: Record> RecordExt for R {
    fn to_fields(&self) -> StoreResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(fields) => Ok(fields),
            other => Err(StoreError::Serialization(format!(
                "record serialized to {:?}, expected a document",
                other.element_type()
            ))),
        }
    }

    fn from_fields(fields: Document) -> StoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(fields))?)
    }

    fn to_json(&self) -> StoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> StoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Reads an identifier from a BSON value: an [`ObjectId`] or its 24-character hex form.
pub fn id_from_bson(value: &Bson) -> StoreResult<ObjectId> {
    match value {
        Bson::ObjectId(id) => Ok(*id),
        Bson::String(hex) => ObjectId::parse_str(hex)
            .map_err(|_| StoreError::translation(format!("{hex:?} is not a valid object id"))),
        other => Err(StoreError::translation(format!("{other} is not a valid object id"))),
    }
}

/// Reads the `_id` of a field document, if present.
pub fn document_id(fields: &Document) -> StoreResult<Option<ObjectId>> {
    match fields.get(ID_FIELD) {
        None | Some(Bson::Null) => Ok(None),
        Some(value) => id_from_bson(value).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        body: String,
    }

    impl Record for Note {
        fn id(&self) -> Option<&ObjectId> {
            self.id.as_ref()
        }

        fn set_id(&mut self, id: ObjectId) {
            self.id = Some(id);
        }

        fn collection_name() -> &'static str {
            "notes"
        }
    }

    #[test]
    fn fields_roundtrip_keeps_the_id() {
        let id = ObjectId::new();
        let note = Note { id: Some(id), body: "hello".into() };

        let fields = note.to_fields().unwrap();
        assert_eq!(fields.get_object_id(ID_FIELD).unwrap(), id);
        assert_eq!(Note::from_fields(fields).unwrap(), note);
    }

    #[test]
    fn ids_are_read_from_hex_strings() {
        let id = ObjectId::new();

        assert_eq!(document_id(&doc! { "_id": id.to_hex() }).unwrap(), Some(id));
        assert_eq!(document_id(&doc! { "name": "x" }).unwrap(), None);
        assert!(document_id(&doc! { "_id": "nope" }).is_err());
    }
}
