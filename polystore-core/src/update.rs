//! Update documents and the column instructions they compile into.
//!
//! An update document is a mapping from mutation operators (`$set`, `$inc`, `$mul`,
//! `$unset`, `$min`, `$max`, `$currentDate`) to field/value maps. Plain `field: value`
//! entries are accepted as legacy `$set` entries and may be mixed with operators.

use bson::{Bson, Document};

use crate::{
    error::{StoreError, StoreResult},
    query::ID_FIELD,
};

/// Classification of a top-level key of an update document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOperator {
    Set,
    Inc,
    Mul,
    Unset,
    Min,
    Max,
    CurrentDate,
    Unrecognized(String),
}

impl From<&str> for UpdateOperator {
    fn from(key: &str) -> Self {
        match key {
            "$set" => UpdateOperator::Set,
            "$inc" => UpdateOperator::Inc,
            "$mul" => UpdateOperator::Mul,
            "$unset" => UpdateOperator::Unset,
            "$min" => UpdateOperator::Min,
            "$max" => UpdateOperator::Max,
            "$currentDate" => UpdateOperator::CurrentDate,
            other => UpdateOperator::Unrecognized(other.to_string()),
        }
    }
}

/// A value computed by the backend from the column's current value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnExpr {
    /// `col + operand`, a missing value counts as zero.
    Add(Bson),
    /// `col * operand`, a missing value counts as zero.
    Multiply(Bson),
    /// Replace only if the operand is smaller than the current value.
    Least(Bson),
    /// Replace only if the operand is larger than the current value.
    Greatest(Bson),
    /// The backend's current timestamp.
    CurrentTimestamp,
}

/// One column assignment of a compiled update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateInstruction {
    Set { field: String, value: Bson },
    Expr { field: String, expr: ColumnExpr },
    SetNull { field: String },
}

impl UpdateInstruction {
    /// The field this instruction assigns.
    pub fn field(&self) -> &str {
        match self {
            UpdateInstruction::Set { field, .. }
            | UpdateInstruction::Expr { field, .. }
            | UpdateInstruction::SetNull { field } => field,
        }
    }
}

/// A parsed update document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    instructions: Vec<UpdateInstruction>,
    seed: Document,
}

impl UpdateSpec {
    /// Parses an update document into column instructions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Translation`] for unrecognized operators and malformed
    /// operands, and [`StoreError::Validation`] when two instructions target the same
    /// field or an instruction targets `_id`.
    pub fn parse(document: &Document) -> StoreResult<Self> {
        let mut instructions = Vec::new();
        let mut explicit_set = None;
        let mut legacy = Document::new();

        for (key, value) in document {
            if !key.starts_with('$') {
                check_field(key)?;
                legacy.insert(key, value.clone());
                instructions.push(UpdateInstruction::Set { field: key.clone(), value: value.clone() });
                continue;
            }

            let operator = UpdateOperator::from(key.as_str());
            if let UpdateOperator::Unrecognized(key) = operator {
                return Err(StoreError::translation(format!("unsupported update operator {key}")));
            }

            let fields = match value {
                Bson::Document(fields) => fields,
                other => {
                    return Err(StoreError::translation(format!(
                        "{key} expects a document of fields, got {other}"
                    )));
                }
            };

            for (field, operand) in fields {
                check_field(field)?;
                instructions.push(compile_operator(key, &operator, field, operand)?);
            }

            if operator == UpdateOperator::Set {
                explicit_set = Some(fields.clone());
            }
        }

        let mut seen = std::collections::HashSet::new();
        for instruction in &instructions {
            if !seen.insert(instruction.field()) {
                return Err(StoreError::validation(format!(
                    "field {} is updated by more than one operator",
                    instruction.field()
                )));
            }
        }

        Ok(Self { instructions, seed: explicit_set.unwrap_or(legacy) })
    }

    /// Returns `true` when the update assigns nothing; callers treat this as a no-op.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[UpdateInstruction] {
        &self.instructions
    }

    /// Fields a newly inserted upsert row takes from the update: the `$set` entries, or
    /// the plain entries when there is no `$set`.
    pub fn seed(&self) -> &Document {
        &self.seed
    }
}

fn check_field(field: &str) -> StoreResult<()> {
    if field.is_empty() || field.starts_with('$') {
        return Err(StoreError::translation(format!("invalid update field name {field:?}")));
    }

    if field == ID_FIELD {
        return Err(StoreError::validation("the _id field cannot be updated"));
    }

    Ok(())
}

fn compile_operator(
    key: &str,
    operator: &UpdateOperator,
    field: &str,
    operand: &Bson,
) -> StoreResult<UpdateInstruction> {
    let field = field.to_string();
    let malformed = || {
        StoreError::translation(format!("malformed operand for {key} on field {field}: {operand}"))
    };

    Ok(match operator {
        UpdateOperator::Set => UpdateInstruction::Set { field: field.clone(), value: operand.clone() },
        UpdateOperator::Unset => UpdateInstruction::SetNull { field: field.clone() },
        UpdateOperator::Inc | UpdateOperator::Mul => {
            if !matches!(operand, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) {
                return Err(malformed());
            }

            let expr = match operator {
                UpdateOperator::Inc => ColumnExpr::Add(operand.clone()),
                _ => ColumnExpr::Multiply(operand.clone()),
            };
            UpdateInstruction::Expr { field: field.clone(), expr }
        }
        UpdateOperator::Min | UpdateOperator::Max => {
            if matches!(operand, Bson::Null | Bson::Array(_) | Bson::Document(_)) {
                return Err(malformed());
            }

            let expr = match operator {
                UpdateOperator::Min => ColumnExpr::Least(operand.clone()),
                _ => ColumnExpr::Greatest(operand.clone()),
            };
            UpdateInstruction::Expr { field: field.clone(), expr }
        }
        UpdateOperator::CurrentDate => {
            let accepted = match operand {
                Bson::Boolean(true) => true,
                Bson::Document(spec) => matches!(
                    spec.get_str("$type"),
                    Ok("date") | Ok("timestamp")
                ) && spec.len() == 1,
                _ => false,
            };

            if !accepted {
                return Err(malformed());
            }

            UpdateInstruction::Expr { field: field.clone(), expr: ColumnExpr::CurrentTimestamp }
        }
        UpdateOperator::Unrecognized(key) => {
            return Err(StoreError::translation(format!("unsupported update operator {key}")));
        }
    })
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn operators_compile_to_instructions() {
        let spec = UpdateSpec::parse(&doc! {
            "$set": { "name": "x" },
            "$inc": { "value": 5 },
            "$mul": { "price": 1.5 },
            "$unset": { "note": "" },
            "$min": { "low": 3 },
            "$max": { "high": 9 },
            "$currentDate": { "touched": true, "stamp": { "$type": "timestamp" } },
        })
        .unwrap();

        assert_eq!(
            spec.instructions(),
            &[
                UpdateInstruction::Set { field: "name".into(), value: Bson::from("x") },
                UpdateInstruction::Expr { field: "value".into(), expr: ColumnExpr::Add(Bson::Int32(5)) },
                UpdateInstruction::Expr {
                    field: "price".into(),
                    expr: ColumnExpr::Multiply(Bson::Double(1.5)),
                },
                UpdateInstruction::SetNull { field: "note".into() },
                UpdateInstruction::Expr { field: "low".into(), expr: ColumnExpr::Least(Bson::Int32(3)) },
                UpdateInstruction::Expr { field: "high".into(), expr: ColumnExpr::Greatest(Bson::Int32(9)) },
                UpdateInstruction::Expr { field: "touched".into(), expr: ColumnExpr::CurrentTimestamp },
                UpdateInstruction::Expr { field: "stamp".into(), expr: ColumnExpr::CurrentTimestamp },
            ]
        );
        assert_eq!(spec.seed(), &doc! { "name": "x" });
    }

    #[test]
    fn legacy_fields_are_sets_and_seed_the_insert() {
        let spec = UpdateSpec::parse(&doc! { "name": "x", "$inc": { "n": 1 } }).unwrap();

        assert_eq!(spec.instructions().len(), 2);
        assert_eq!(spec.seed(), &doc! { "name": "x" });
    }

    #[test]
    fn explicit_set_wins_the_seed_over_legacy_fields() {
        let spec = UpdateSpec::parse(&doc! { "legacy": 1, "$set": { "name": "x" } }).unwrap();
        assert_eq!(spec.seed(), &doc! { "name": "x" });
    }

    #[test]
    fn empty_update_is_a_no_op() {
        assert!(UpdateSpec::parse(&doc! {}).unwrap().is_empty());
        assert!(UpdateSpec::parse(&doc! { "$set": {} }).unwrap().is_empty());
    }

    #[test]
    fn unknown_operator_is_named_in_the_error() {
        let err = UpdateSpec::parse(&doc! { "$foo": { "a": 1 } }).unwrap_err();

        match err {
            StoreError::Translation(message) => assert!(message.contains("$foo")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_operands_are_rejected() {
        for update in [
            doc! { "$inc": { "n": "one" } },
            doc! { "$set": 1 },
            doc! { "$currentDate": { "t": false } },
            doc! { "$currentDate": { "t": { "$type": "week" } } },
            doc! { "$min": { "n": null } },
        ] {
            assert!(
                matches!(UpdateSpec::parse(&update), Err(StoreError::Translation(_))),
                "{update} should not parse"
            );
        }
    }

    #[test]
    fn conflicting_and_id_updates_are_validation_errors() {
        let err = UpdateSpec::parse(&doc! { "$set": { "n": 1 }, "$inc": { "n": 1 } }).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = UpdateSpec::parse(&doc! { "$set": { "_id": "x" } }).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
