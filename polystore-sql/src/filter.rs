//! Filter compilation: [`Expr`] trees to SQL predicates.

use bson::{Bson, Document};

use polystore_core::{
    error::{StoreError, StoreResult},
    query::{Expr, FieldOp, Query, QueryVisitor},
};

use crate::{
    ast::{ColumnRef, CompareOp, Fragment, Ident, Predicate, Renderer, SqlValue},
    dialect::SqlDialect,
    value::to_sql_value,
};

/// Compiles a filter document into a `WHERE` fragment and its ordered parameters.
///
/// A filter without predicates compiles to an empty fragment.
pub fn compile_filter(filter: &Document, dialect: SqlDialect) -> StoreResult<Fragment> {
    let query = Query::parse(filter)?;
    let predicate = compile_predicate(&query.filter, None)?;

    if predicate.is_true() {
        return Ok(Fragment { sql: String::new(), params: Vec::new() });
    }

    let mut out = Renderer::new(dialect);
    out.predicate(&predicate);
    Ok(out.finish())
}

/// Compiles an expression, qualifying every column with `qualifier` when given.
pub fn compile_predicate(expr: &Expr, qualifier: Option<&Ident>) -> StoreResult<Predicate> {
    PredicateCompiler { qualifier }.visit_expr(expr)
}

/// Walks an [`Expr`] and builds the equivalent [`Predicate`].
///
/// `$ne` and `$nin` also match NULL columns, the way a missing field is "not equal" in a
/// document store.
#[derive(Debug, Clone, Copy)]
pub struct PredicateCompiler<'q> {
    qualifier: Option<&'q Ident>,
}

impl PredicateCompiler<'_> {
    fn column(&self, field: &str) -> StoreResult<ColumnRef> {
        Ok(ColumnRef::qualified(self.qualifier, Ident::new(field)?))
    }
}

impl QueryVisitor for PredicateCompiler<'_> {
    type Output = Predicate;
    type Error = StoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> StoreResult<Predicate> {
        exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect::<StoreResult<Vec<_>>>()
            .map(Predicate::all)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> StoreResult<Predicate> {
        let operands = exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect::<StoreResult<Vec<_>>>()?;

        if operands.iter().any(Predicate::is_true) {
            return Ok(Predicate::True);
        }

        Ok(Predicate::Or(operands))
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> StoreResult<Predicate> {
        let column = self.column(field)?;

        Ok(match op {
            FieldOp::Eq if *value == Bson::Null => Predicate::IsNull { column, negated: false },
            FieldOp::Ne if *value == Bson::Null => Predicate::IsNull { column, negated: true },
            FieldOp::Eq => compare(column, CompareOp::Eq, value)?,
            FieldOp::Ne => Predicate::Or(vec![
                compare(column.clone(), CompareOp::Ne, value)?,
                Predicate::IsNull { column, negated: false },
            ]),
            FieldOp::Gt => compare(column, CompareOp::Gt, value)?,
            FieldOp::Gte => compare(column, CompareOp::Gte, value)?,
            FieldOp::Lt => compare(column, CompareOp::Lt, value)?,
            FieldOp::Lte => compare(column, CompareOp::Lte, value)?,
            FieldOp::In => {
                let (values, has_null) = list_values(value)?;
                let listed = Predicate::InList { column: column.clone(), values, negated: false };

                match has_null {
                    true => Predicate::Or(vec![listed, Predicate::IsNull { column, negated: false }]),
                    false => listed,
                }
            }
            FieldOp::Nin => {
                let (values, has_null) = list_values(value)?;
                let unlisted = Predicate::InList { column: column.clone(), values, negated: true };

                match has_null {
                    true => Predicate::all([unlisted, Predicate::IsNull { column, negated: true }]),
                    false => Predicate::Or(vec![unlisted, Predicate::IsNull { column, negated: false }]),
                }
            }
            FieldOp::IEq => Predicate::LowerEq { column, value: text_operand(field, op, value)?.to_string() },
            FieldOp::Text => Predicate::Like {
                column,
                pattern: format!("%{}%", escape_like(&text_operand(field, op, value)?.to_lowercase())),
            },
            FieldOp::Regex => Predicate::Matches { column, pattern: text_operand(field, op, value)?.to_string() },
        })
    }
}

fn compare(column: ColumnRef, op: CompareOp, value: &Bson) -> StoreResult<Predicate> {
    Ok(Predicate::Compare { column, op, value: to_sql_value(value)? })
}

/// Non-null list members, and whether the list also held a null.
fn list_values(value: &Bson) -> StoreResult<(Vec<SqlValue>, bool)> {
    let Bson::Array(items) = value else {
        return Err(StoreError::translation(format!("expected a list, got {value}")));
    };

    let mut values = Vec::with_capacity(items.len());
    let mut has_null = false;
    for item in items {
        match to_sql_value(item)? {
            SqlValue::Null => has_null = true,
            other => values.push(other),
        }
    }

    Ok((values, has_null))
}

fn text_operand<'v>(field: &str, op: FieldOp, value: &'v Bson) -> StoreResult<&'v str> {
    value.as_str().ok_or_else(|| {
        StoreError::translation(format!("{} on field {field} expects a string, got {value}", op.key()))
    })
}

/// Escapes `LIKE` wildcards with `\`.
pub(crate) fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use bson::{doc, oid::ObjectId};

    use super::*;

    fn sql(filter: Document) -> Fragment {
        compile_filter(&filter, SqlDialect::Sqlite).unwrap()
    }

    #[test]
    fn reserved_keys_compile_to_nothing() {
        let fragment = sql(doc! { "_limit": 1, "_offset": 2, "_sort": "a", "_count": true, "_collection": "x" });
        assert_eq!(fragment, Fragment { sql: String::new(), params: Vec::new() });
    }

    #[test]
    fn operator_documents_expand_to_conjuncts() {
        let fragment = sql(doc! { "age": { "$gt": 20, "$lt": 50 } });

        assert_eq!(fragment.sql, r#"("age" > ?1 AND "age" < ?2)"#);
        assert_eq!(fragment.params, vec![SqlValue::Integer(20), SqlValue::Integer(50)]);
    }

    #[test]
    fn or_elements_are_parenthesized() {
        let fragment = sql(doc! { "$or": [{ "category": "A" }, { "value": 20 }] });
        assert_eq!(fragment.sql, r#"(("category" = ?1) OR ("value" = ?2))"#);
    }

    #[test]
    fn ids_compare_as_hex() {
        let id = ObjectId::new();
        let fragment = sql(doc! { "_id": id });

        assert_eq!(fragment.sql, r#""_id" = ?1"#);
        assert_eq!(fragment.params, vec![SqlValue::Text(id.to_hex())]);
    }

    #[test]
    fn negations_also_match_null() {
        assert_eq!(sql(doc! { "a": { "$ne": 1 } }).sql, r#"(("a" <> ?1) OR ("a" IS NULL))"#);
        assert_eq!(sql(doc! { "a": { "$nin": [1, 2] } }).sql, r#"(("a" NOT IN (?1, ?2)) OR ("a" IS NULL))"#);
        assert_eq!(sql(doc! { "a": { "$nin": [1, null] } }).sql, r#"("a" NOT IN (?1) AND "a" IS NOT NULL)"#);
        assert_eq!(sql(doc! { "a": null }).sql, r#""a" IS NULL"#);
    }

    #[test]
    fn membership_defaults_for_lists() {
        assert_eq!(sql(doc! { "tag": ["a", "b"] }).sql, r#""tag" IN (?1, ?2)"#);
        assert_eq!(sql(doc! { "tag": { "$in": [] } }).sql, "1 = 0");
    }

    #[test]
    fn case_insensitive_operators() {
        assert_eq!(sql(doc! { "name": { "$i": "Bob" } }).sql, r#"LOWER("name") = LOWER(?1)"#);

        let fragment = sql(doc! { "name": { "$text": "50%_Off" } });
        assert_eq!(fragment.sql, r#"LOWER("name") LIKE ?1 ESCAPE '\'"#);
        assert_eq!(fragment.params, vec![SqlValue::Text(r"%50\%\_off%".into())]);

        assert_eq!(
            compile_filter(&doc! { "name": { "$regex": "^b" } }, SqlDialect::Postgres).unwrap().sql,
            r#""name" ~ $1"#
        );
    }

    #[test]
    fn empty_strings_are_skipped() {
        assert_eq!(sql(doc! { "name": "", "age": 3 }).sql, r#""age" = ?1"#);
    }

    #[test]
    fn bad_field_names_and_operators_fail() {
        assert!(matches!(
            compile_filter(&doc! { "a;b": 1 }, SqlDialect::Sqlite),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            compile_filter(&doc! { "a": { "$near": 1 } }, SqlDialect::Sqlite),
            Err(StoreError::Translation(_))
        ));
    }

    #[test]
    fn qualified_columns() {
        let query = Query::parse(&doc! { "value": 1 }).unwrap();
        let target = Ident::new("t").unwrap();

        let predicate = compile_predicate(&query.filter, Some(&target)).unwrap();
        let mut out = Renderer::new(SqlDialect::Sqlite);
        out.predicate(&predicate);
        assert_eq!(out.finish().sql, r#""t"."value" = ?1"#);
    }
}
