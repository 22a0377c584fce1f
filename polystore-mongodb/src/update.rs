//! Update translation from column instructions to MongoDB update operators.

use bson::{Bson, Document};

use polystore_core::update::{ColumnExpr, UpdateInstruction, UpdateSpec};

/// Translates `update` into an update document, `None` when it has no instructions.
///
/// `$unset` is written as `$set: null` so both backends read back a null value.
pub fn translate_update(update: &UpdateSpec) -> Option<Document> {
    if update.is_empty() {
        return None;
    }

    let mut translated = Document::new();

    for instruction in update.instructions() {
        let (operator, value) = match instruction {
            UpdateInstruction::Set { value, .. } => ("$set", value.clone()),
            UpdateInstruction::SetNull { .. } => ("$set", Bson::Null),
            UpdateInstruction::Expr { expr, .. } => match expr {
                ColumnExpr::Add(operand) => ("$inc", operand.clone()),
                ColumnExpr::Multiply(operand) => ("$mul", operand.clone()),
                ColumnExpr::Least(operand) => ("$min", operand.clone()),
                ColumnExpr::Greatest(operand) => ("$max", operand.clone()),
                ColumnExpr::CurrentTimestamp => ("$currentDate", Bson::Boolean(true)),
            },
        };

        let fields = translated
            .entry(operator.to_string())
            .or_insert_with(|| Bson::Document(Document::new()));
        if let Bson::Document(fields) = fields {
            fields.insert(instruction.field(), value);
        }
    }

    Some(translated)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn instructions_group_by_operator() {
        let spec = UpdateSpec::parse(&doc! {
            "name": "legacy",
            "$inc": { "value": 5 },
            "$unset": { "note": "" },
            "$min": { "low": 1 },
            "$currentDate": { "touched": { "$type": "date" } },
        })
        .unwrap();

        assert_eq!(
            translate_update(&spec),
            Some(doc! {
                "$set": { "name": "legacy", "note": null },
                "$inc": { "value": 5 },
                "$min": { "low": 1 },
                "$currentDate": { "touched": true },
            })
        );
    }

    #[test]
    fn empty_update_translates_to_nothing() {
        assert_eq!(translate_update(&UpdateSpec::parse(&doc! {}).unwrap()), None);
    }
}
