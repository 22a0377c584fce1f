//! Filter translation from parsed queries to MongoDB query documents.
//!
//! Most operators map one to one. The case-insensitive operators become anchored or
//! unanchored regexes over the escaped operand, and string `_id` values are turned
//! back into object ids so they match what the store holds.

use bson::{Bson, Document, doc, oid::ObjectId};

use polystore_core::{
    error::{StoreError, StoreResult},
    query::{Expr, FieldOp, ID_FIELD, Query, QueryVisitor, Sort},
};

/// Translates the predicates of `query` into a filter document.
pub fn translate_filter(query: &Query) -> StoreResult<Document> {
    MongoQueryTranslator.visit_expr(&query.filter)
}

/// The `sort` document of a query, `None` when it has no sort keys.
pub fn sort_document(sort: &[Sort]) -> Option<Document> {
    if sort.is_empty() {
        return None;
    }

    Some(
        sort.iter()
            .map(|Sort { field, direction }| (field.clone(), Bson::Int32(direction.as_i32())))
            .collect(),
    )
}

/// Translates parsed query expressions into MongoDB query documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoQueryTranslator;

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> StoreResult<Document> {
        let mut operands = exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .filter(|operand| !matches!(operand, Ok(document) if document.is_empty()))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(match operands.len() {
            0 => Document::new(),
            1 => operands.remove(0),
            _ => doc! { "$and": operands },
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> StoreResult<Document> {
        let operands = exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect::<StoreResult<Vec<_>>>()?;

        if operands.iter().any(Document::is_empty) {
            return Ok(Document::new());
        }

        Ok(doc! { "$or": operands })
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> StoreResult<Document> {
        let value = match field {
            ID_FIELD => restore_ids(value),
            _ => value.clone(),
        };

        let condition = match op {
            FieldOp::Eq => doc! { "$eq": value },
            FieldOp::Ne => doc! { "$ne": value },
            FieldOp::Gt => doc! { "$gt": value },
            FieldOp::Gte => doc! { "$gte": value },
            FieldOp::Lt => doc! { "$lt": value },
            FieldOp::Lte => doc! { "$lte": value },
            FieldOp::In => doc! { "$in": value },
            FieldOp::Nin => doc! { "$nin": value },
            FieldOp::IEq => doc! {
                "$regex": format!("^{}$", regex::escape(text_operand(field, op, &value)?)),
                "$options": "i",
            },
            FieldOp::Text => doc! {
                "$regex": regex::escape(text_operand(field, op, &value)?),
                "$options": "i",
            },
            FieldOp::Regex => doc! { "$regex": text_operand(field, op, &value)? },
        };

        Ok(doc! { field: condition })
    }
}

fn text_operand<'v>(field: &str, op: FieldOp, value: &'v Bson) -> StoreResult<&'v str> {
    value.as_str().ok_or_else(|| {
        StoreError::translation(format!("{} on field {field} expects a string, got {value}", op.key()))
    })
}

/// Hex strings compared against `_id` become object ids.
fn restore_ids(value: &Bson) -> Bson {
    match value {
        Bson::String(text) => ObjectId::parse_str(text).map(Bson::ObjectId).unwrap_or_else(|_| value.clone()),
        Bson::Array(items) => Bson::Array(items.iter().map(restore_ids).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use polystore_core::query::SortDirection;

    use super::*;

    fn translate(filter: Document) -> Document {
        translate_filter(&Query::parse(&filter).unwrap()).unwrap()
    }

    #[test]
    fn reserved_keys_translate_to_an_empty_filter() {
        assert_eq!(translate(doc! { "_limit": 3, "_sort": "a", "_count": true }), doc! {});
    }

    #[test]
    fn conjunctions_and_disjunctions() {
        assert_eq!(translate(doc! { "category": "A" }), doc! { "category": { "$eq": "A" } });
        assert_eq!(
            translate(doc! { "age": { "$gt": 20, "$lt": 50 } }),
            doc! { "$and": [{ "age": { "$gt": 20 } }, { "age": { "$lt": 50 } }] }
        );
        assert_eq!(
            translate(doc! { "$or": [{ "category": "A" }, { "value": 20 }] }),
            doc! { "$or": [{ "category": { "$eq": "A" } }, { "value": { "$eq": 20 } }] }
        );
    }

    #[test]
    fn case_insensitive_operators_escape_their_operand() {
        assert_eq!(
            translate(doc! { "name": { "$i": "a.b" } }),
            doc! { "name": { "$regex": r"^a\.b$", "$options": "i" } }
        );
        assert_eq!(
            translate(doc! { "name": { "$text": "50%+" } }),
            doc! { "name": { "$regex": r"50%\+", "$options": "i" } }
        );
    }

    #[test]
    fn hex_ids_become_object_ids() {
        let id = ObjectId::new();

        assert_eq!(translate(doc! { "_id": id.to_hex() }), doc! { "_id": { "$eq": id } });
        assert_eq!(translate(doc! { "_id": { "$in": [id.to_hex()] } }), doc! { "_id": { "$in": [id] } });
    }

    #[test]
    fn sort_keys_keep_their_order() {
        let sort = vec![
            Sort { field: "b".into(), direction: SortDirection::Desc },
            Sort { field: "a".into(), direction: SortDirection::Asc },
        ];

        assert_eq!(sort_document(&sort), Some(doc! { "b": -1, "a": 1 }));
        assert_eq!(sort_document(&[]), None);
    }
}
