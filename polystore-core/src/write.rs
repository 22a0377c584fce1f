//! Backend-independent rules of the write operations.
//!
//! Both backends run the same argument checks for bulk updates and build the row an
//! upsert inserts the same way, so the two can only differ in how statements run.

use std::collections::HashSet;

use bson::{Bson, Document, oid::ObjectId};

use crate::{
    error::{StoreError, StoreResult},
    query::{ID_FIELD, Query},
    record::document_id,
    update::UpdateSpec,
};

/// Checks the arguments of a bulk update and parses its optional filter.
///
/// # Errors
///
/// Returns [`StoreError::Validation`] for an empty object list, two objects with the
/// same `_id` or more than one filter document, and any parse error of the filter.
pub fn bulk_update_filter(objects: &[Document], filters: &[Document]) -> StoreResult<Option<Query>> {
    if objects.is_empty() {
        return Err(StoreError::validation("bulk update needs at least one object"));
    }

    let mut seen = HashSet::with_capacity(objects.len());
    for object in objects {
        let Some(id) = document_id(object)? else {
            continue;
        };
        if !seen.insert(id) {
            return Err(StoreError::validation(format!("bulk update lists _id {id} more than once")));
        }
    }

    match filters {
        [] => Ok(None),
        [filter] => {
            let query = Query::parse(filter)?;
            query.ensure_unsharded()?;
            Ok(Some(query))
        }
        _ => Err(StoreError::validation(format!(
            "bulk update accepts at most one filter document, got {}",
            filters.len()
        ))),
    }
}

/// The id a new upserted row gets: the caller's preset id, else the filter's `_id`
/// equality, else a fresh id. A preset id wins over a different filter id.
pub fn upsert_id(preset: Option<ObjectId>, query: &Query) -> StoreResult<ObjectId> {
    if let Some(id) = preset {
        return Ok(id);
    }

    Ok(query.id()?.unwrap_or_else(ObjectId::new))
}

/// Builds the row an upsert inserts when nothing matched: the chosen id, the filter's
/// plain equalities, then the update's `$set` (or legacy) fields.
pub fn upsert_document(id: ObjectId, query: &Query, update: &UpdateSpec) -> Document {
    let mut row = Document::new();
    row.insert(ID_FIELD, id);

    for (field, value) in query.seed().iter().chain(update.seed().iter()) {
        if field != ID_FIELD {
            row.insert(field.clone(), value.clone());
        }
    }

    row
}

/// Re-asserts `id` on a row read back after an upsert.
pub fn assert_id(mut row: Document, id: Option<ObjectId>) -> Document {
    if let Some(id) = id {
        row.insert(ID_FIELD, Bson::ObjectId(id));
    }

    row
}

/// Assigns a fresh `_id` to every document that lacks one and returns the ids in order.
pub fn assign_ids(documents: &mut [Document]) -> StoreResult<Vec<ObjectId>> {
    documents
        .iter_mut()
        .map(|document| match document_id(document)? {
            Some(id) => {
                document.insert(ID_FIELD, id);
                Ok(id)
            }
            None => {
                let id = ObjectId::new();
                document.insert(ID_FIELD, id);
                Ok(id)
            }
        })
        .collect()
}
