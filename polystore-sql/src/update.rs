//! Update compilation: column instructions to `SET` assignments.

use polystore_core::{
    error::StoreResult,
    update::{ColumnExpr, UpdateInstruction, UpdateSpec},
};

use crate::{
    ast::{Assign, Ident, SqlValue},
    value::to_sql_value,
};

/// Compiles every instruction of `update` into a column assignment.
///
/// An empty result means there is nothing to do.
pub fn compile_assignments(update: &UpdateSpec) -> StoreResult<Vec<(Ident, Assign)>> {
    update
        .instructions()
        .iter()
        .map(|instruction| {
            let column = Ident::new(instruction.field())?;
            let assign = match instruction {
                UpdateInstruction::Set { value, .. } => Assign::Value(to_sql_value(value)?),
                UpdateInstruction::SetNull { .. } => Assign::Value(SqlValue::Null),
                UpdateInstruction::Expr { expr, .. } => match expr {
                    ColumnExpr::Add(operand) => Assign::Add(to_sql_value(operand)?),
                    ColumnExpr::Multiply(operand) => Assign::Multiply(to_sql_value(operand)?),
                    ColumnExpr::Least(operand) => Assign::Least(to_sql_value(operand)?),
                    ColumnExpr::Greatest(operand) => Assign::Greatest(to_sql_value(operand)?),
                    ColumnExpr::CurrentTimestamp => Assign::Now,
                },
            };

            Ok((column, assign))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::{
        ast::{Predicate, Render, Update},
        dialect::SqlDialect,
    };

    #[test]
    fn update_document_to_sql() {
        let spec = UpdateSpec::parse(&doc! {
            "name": "legacy",
            "$inc": { "value": 5 },
            "$unset": { "note": 1 },
            "$max": { "high": 9 },
            "$currentDate": { "touched": true },
        })
        .unwrap();

        let update = Update {
            table: Ident::new("items").unwrap(),
            alias: None,
            assignments: compile_assignments(&spec).unwrap(),
            from: None,
            filter: Predicate::True,
        };
        let fragment = update.to_sql(SqlDialect::Sqlite);

        assert_eq!(
            fragment.sql,
            concat!(
                r#"UPDATE "items" SET "name" = ?1, "value" = COALESCE("value", 0) + ?2, "note" = ?3, "#,
                r#""high" = CASE WHEN "high" IS NULL OR ?4 > "high" THEN ?5 ELSE "high" END, "#,
                r#""touched" = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"#,
            )
        );
        assert_eq!(
            fragment.params,
            vec![
                SqlValue::Text("legacy".into()),
                SqlValue::Integer(5),
                SqlValue::Null,
                SqlValue::Integer(9),
                SqlValue::Integer(9),
            ]
        );
    }

    #[test]
    fn empty_update_has_no_assignments() {
        assert!(compile_assignments(&UpdateSpec::parse(&doc! {}).unwrap()).unwrap().is_empty());
    }
}
