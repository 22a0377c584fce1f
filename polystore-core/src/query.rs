//! Filter documents and the typed expression tree they parse into.
//!
//! A filter document maps field names to values, lists or operator documents, plus a set
//! of reserved meta keys (`_limit`, `_offset`, `_sort`, `_count`, `_collection`,
//! `_date_sharding`) that control pagination and routing and never become predicates.
//!
//! ```ignore
//! use bson::doc;
//! use polystore::query::Query;
//!
//! let query = Query::parse(&doc! {
//!     "age": { "$gt": 20, "$lt": 50 },
//!     "$or": [{ "category": "A" }, { "value": 20 }],
//!     "_limit": 10,
//!     "_sort": { "age": -1 },
//! })?;
//! ```
//!
//! Parsing happens once per call and produces an [`Expr`] tree that each backend walks
//! with its own [`QueryVisitor`]: the relational backend renders SQL predicates, the
//! document backend renders native query documents.

use bson::{Bson, Document, oid::ObjectId};

use crate::{
    error::{StoreError, StoreResult},
    record::id_from_bson,
};

/// Name of the identifier field shared by every backend.
pub const ID_FIELD: &str = "_id";

/// Keys of a filter document that carry call options instead of predicates.
pub const RESERVED_KEYS: [&str; 6] = [
    "_limit",
    "_offset",
    "_sort",
    "_count",
    "_collection",
    "_date_sharding",
];

/// Returns `true` if `key` is one of the [`RESERVED_KEYS`].
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Parses a direction that must be exactly `1` or `-1`.
    pub fn from_bson(field: &str, value: &Bson) -> StoreResult<Self> {
        match integer(value) {
            Some(1) => Ok(SortDirection::Asc),
            Some(-1) => Ok(SortDirection::Desc),
            _ => Err(StoreError::translation(format!(
                "sort direction for {field} must be 1 or -1, got {value}"
            ))),
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// `$eq`, and the implicit operator of `field: value`.
    Eq,
    /// `$ne`. Also matches documents where the field is missing or null.
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$in`, and the implicit operator of `field: [..]`.
    In,
    /// `$nin`. Also matches documents where the field is missing or null.
    Nin,
    /// `$i`: case-insensitive equality.
    IEq,
    /// `$text`: case-insensitive substring containment.
    Text,
    /// `$regex`: the backend's native pattern match.
    Regex,
}

impl FieldOp {
    /// The operator key as it appears in a filter document.
    pub fn key(&self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::In => "$in",
            FieldOp::Nin => "$nin",
            FieldOp::IEq => "$i",
            FieldOp::Text => "$text",
            FieldOp::Regex => "$regex",
        }
    }

    fn check_operand(&self, field: &str, operand: &Bson) -> StoreResult<()> {
        let ok = match self {
            FieldOp::Eq | FieldOp::Ne => is_scalar(operand),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                is_scalar(operand) && !matches!(operand, Bson::Null)
            }
            FieldOp::In | FieldOp::Nin => match operand {
                Bson::Array(items) => items.iter().all(is_scalar),
                _ => false,
            },
            FieldOp::IEq | FieldOp::Text | FieldOp::Regex => matches!(operand, Bson::String(_)),
        };

        if ok {
            Ok(())
        } else {
            Err(StoreError::translation(format!(
                "malformed operand for {} on field {field}: {operand}",
                self.key()
            )))
        }
    }
}

/// Boolean combinators allowed as keys of a filter document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logical {
    And,
    Or,
}

/// Classification of a `$`-prefixed key found in a filter document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorKey {
    Comparison(FieldOp),
    Logical(Logical),
    Unrecognized(String),
}

impl From<&str> for OperatorKey {
    fn from(key: &str) -> Self {
        match key {
            "$eq" => OperatorKey::Comparison(FieldOp::Eq),
            "$ne" => OperatorKey::Comparison(FieldOp::Ne),
            "$gt" => OperatorKey::Comparison(FieldOp::Gt),
            "$gte" => OperatorKey::Comparison(FieldOp::Gte),
            "$lt" => OperatorKey::Comparison(FieldOp::Lt),
            "$lte" => OperatorKey::Comparison(FieldOp::Lte),
            "$in" => OperatorKey::Comparison(FieldOp::In),
            "$nin" => OperatorKey::Comparison(FieldOp::Nin),
            "$i" => OperatorKey::Comparison(FieldOp::IEq),
            "$text" => OperatorKey::Comparison(FieldOp::Text),
            "$regex" => OperatorKey::Comparison(FieldOp::Regex),
            "$and" => OperatorKey::Logical(Logical::And),
            "$or" => OperatorKey::Logical(Logical::Or),
            other => OperatorKey::Unrecognized(other.to_string()),
        }
    }
}

/// A filter expression.
///
/// An empty `And` matches everything.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Default for Expr {
    fn default() -> Self {
        Expr::And(Vec::new())
    }
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Expr::Field { field: field.into(), op, value: value.into() }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Returns `true` if the expression places no constraint at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, Expr::And(list) if list.is_empty())
    }

    /// The top-level conjuncts of this expression.
    pub fn conjuncts(&self) -> &[Expr] {
        match self {
            Expr::And(list) => list,
            other => std::slice::from_ref(other),
        }
    }
}

/// How a call asks for date sharding through the `_date_sharding` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardingDirective {
    /// `_date_sharding: false`
    Disabled,
    /// `_date_sharding: true`, use the field configured for the collection.
    CollectionDefault,
    /// `_date_sharding: "field"`
    Field(String),
}

/// A parsed filter document: the predicate tree plus the meta keys that came with it.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Predicates, always rooted at an `And`.
    pub filter: Expr,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Number of documents to skip.
    pub offset: Option<u64>,
    /// Sort keys, in priority order.
    pub sort: Vec<Sort>,
    /// Whether the caller asked for the total match count.
    pub count: bool,
    /// Collection override for this call.
    pub collection: Option<String>,
    /// Date sharding request for this call.
    pub date_sharding: Option<ShardingDirective>,
    seed: Document,
}

impl Query {
    /// Creates a query that matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Parses a filter document.
    ///
    /// Reserved keys are consumed as meta options, `$or`/`$and` recurse, every operator
    /// of an operator document becomes its own conjunct, lists become `$in` tests and an
    /// empty string value places no constraint.
    pub fn parse(document: &Document) -> StoreResult<Self> {
        let mut query = Query::new();
        let mut conjuncts = Vec::new();

        for (key, value) in document {
            if is_reserved_key(key) {
                query.apply_meta(key, value)?;
                continue;
            }

            parse_entry(key, value, &mut conjuncts, Some(&mut query.seed))?;
        }

        query.filter = Expr::And(conjuncts);

        Ok(query)
    }

    /// Returns `true` if the query constrains which documents match.
    pub fn has_predicates(&self) -> bool {
        !self.filter.is_empty()
    }

    /// Plain `field: value` equalities of the top level, the fields an upsert seeds a new
    /// document with.
    pub fn seed(&self) -> &Document {
        &self.seed
    }

    /// The identifier the filter pins with a plain `_id: value` equality, if any.
    pub fn id(&self) -> StoreResult<Option<ObjectId>> {
        self.seed
            .get(ID_FIELD)
            .map(id_from_bson)
            .transpose()
    }

    /// The collection this call targets: the `_collection` override, else `collection`.
    pub fn target<'a>(&'a self, collection: &'a str) -> &'a str {
        self.collection.as_deref().unwrap_or(collection)
    }

    /// Returns `true` if the call asked for date sharding explicitly.
    pub fn requests_sharding(&self) -> bool {
        matches!(
            self.date_sharding,
            Some(ShardingDirective::CollectionDefault) | Some(ShardingDirective::Field(_))
        )
    }

    /// Rejects a filter that requests date sharding on a write path.
    pub fn ensure_unsharded(&self) -> StoreResult<()> {
        if self.requests_sharding() {
            return Err(StoreError::validation(
                "date sharding is read-only and cannot be used to select rows for a write",
            ));
        }

        Ok(())
    }

    fn apply_meta(&mut self, key: &str, value: &Bson) -> StoreResult<()> {
        match key {
            "_limit" => self.limit = Some(non_negative(key, value)?),
            "_offset" => self.offset = Some(non_negative(key, value)?),
            "_sort" => self.sort = parse_sort(value)?,
            "_count" => match value {
                Bson::Boolean(flag) => self.count = *flag,
                other => {
                    return Err(StoreError::translation(format!("_count must be a boolean, got {other}")));
                }
            },
            "_collection" => match value {
                Bson::String(name) if !name.is_empty() => self.collection = Some(name.clone()),
                other => {
                    return Err(StoreError::translation(format!(
                        "_collection must be a non-empty string, got {other}"
                    )));
                }
            },
            "_date_sharding" => {
                self.date_sharding = Some(match value {
                    Bson::Boolean(true) => ShardingDirective::CollectionDefault,
                    Bson::Boolean(false) => ShardingDirective::Disabled,
                    Bson::String(field) if !field.is_empty() => ShardingDirective::Field(field.clone()),
                    other => {
                        return Err(StoreError::translation(format!(
                            "_date_sharding must be a boolean or a field name, got {other}"
                        )));
                    }
                })
            }
            _ => {}
        }

        Ok(())
    }
}

/// Parses a nested filter document (an element of `$or`/`$and`, or a `$match` stage).
///
/// Reserved keys are stripped and ignored.
pub fn parse_expr(document: &Document) -> StoreResult<Expr> {
    let mut conjuncts = Vec::new();

    for (key, value) in document {
        if is_reserved_key(key) {
            continue;
        }

        parse_entry(key, value, &mut conjuncts, None)?;
    }

    Ok(Expr::And(conjuncts))
}

fn parse_entry(
    key: &str,
    value: &Bson,
    conjuncts: &mut Vec<Expr>,
    seed: Option<&mut Document>,
) -> StoreResult<()> {
    if key.starts_with('$') {
        return match OperatorKey::from(key) {
            OperatorKey::Logical(logical) => {
                conjuncts.push(parse_logical(key, logical, value)?);
                Ok(())
            }
            OperatorKey::Comparison(_) => Err(StoreError::translation(format!(
                "operator {key} must be applied to a field"
            ))),
            OperatorKey::Unrecognized(key) => Err(StoreError::translation(format!(
                "unsupported filter operator {key}"
            ))),
        };
    }

    if key.is_empty() {
        return Err(StoreError::translation("filter field names must not be empty"));
    }

    match value {
        Bson::String(text) if text.is_empty() => {}
        Bson::Document(inner) => match classify(key, inner)? {
            true => conjuncts.extend(parse_operators(key, inner)?),
            false => conjuncts.push(Expr::field(key, FieldOp::Eq, value.clone())),
        },
        Bson::Array(_) => {
            FieldOp::In.check_operand(key, value)?;
            conjuncts.push(Expr::field(key, FieldOp::In, value.clone()));
        }
        scalar => {
            if let Some(seed) = seed {
                seed.insert(key, scalar.clone());
            }
            conjuncts.push(Expr::field(key, FieldOp::Eq, scalar.clone()));
        }
    }

    Ok(())
}

fn parse_logical(key: &str, logical: Logical, value: &Bson) -> StoreResult<Expr> {
    let elements = match value {
        Bson::Array(elements) if !elements.is_empty() => elements,
        other => {
            return Err(StoreError::translation(format!(
                "{key} expects a non-empty list of filter documents, got {other}"
            )));
        }
    };

    let children = elements
        .iter()
        .map(|element| match element {
            Bson::Document(document) => parse_expr(document),
            other => Err(StoreError::translation(format!(
                "{key} elements must be filter documents, got {other}"
            ))),
        })
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(match logical {
        Logical::And => Expr::And(children),
        Logical::Or => Expr::Or(children),
    })
}

/// `true` for an operator document, `false` for a literal sub-document.
fn classify(field: &str, inner: &Document) -> StoreResult<bool> {
    if inner.is_empty() {
        return Err(StoreError::translation(format!("empty operator document on field {field}")));
    }

    let operators = inner
        .keys()
        .filter(|key| key.starts_with('$'))
        .count();

    match operators {
        0 => Ok(false),
        n if n == inner.len() => Ok(true),
        _ => Err(StoreError::translation(format!(
            "field {field} mixes operators and plain keys"
        ))),
    }
}

fn parse_operators(field: &str, operators: &Document) -> StoreResult<Vec<Expr>> {
    operators
        .iter()
        .map(|(key, operand)| match OperatorKey::from(key.as_str()) {
            OperatorKey::Comparison(op) => {
                op.check_operand(field, operand)?;
                Ok(Expr::field(field, op, operand.clone()))
            }
            OperatorKey::Logical(_) => Err(StoreError::translation(format!(
                "{key} is not allowed inside the operator document of {field}"
            ))),
            OperatorKey::Unrecognized(key) => Err(StoreError::translation(format!(
                "unsupported filter operator {key} on field {field}"
            ))),
        })
        .collect()
}

fn parse_sort(value: &Bson) -> StoreResult<Vec<Sort>> {
    fn from_name(name: &str) -> StoreResult<Sort> {
        match name.strip_prefix('-') {
            Some(field) if !field.is_empty() => {
                Ok(Sort { field: field.to_string(), direction: SortDirection::Desc })
            }
            None if !name.is_empty() => Ok(Sort { field: name.to_string(), direction: SortDirection::Asc }),
            _ => Err(StoreError::translation(format!("invalid sort key {name:?}"))),
        }
    }

    match value {
        Bson::String(name) => Ok(vec![from_name(name)?]),
        Bson::Array(names) => names
            .iter()
            .map(|name| match name {
                Bson::String(name) => from_name(name),
                other => Err(StoreError::translation(format!("invalid sort key {other}"))),
            })
            .collect(),
        Bson::Document(keys) => keys
            .iter()
            .map(|(field, direction)| {
                Ok(Sort { field: field.clone(), direction: SortDirection::from_bson(field, direction)? })
            })
            .collect(),
        other => Err(StoreError::translation(format!("invalid _sort value {other}"))),
    }
}

fn is_scalar(value: &Bson) -> bool {
    !matches!(value, Bson::Array(_) | Bson::Document(_))
}

/// Integer value of an `Int32`/`Int64`, `None` for every other type.
pub(crate) fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

pub(crate) fn non_negative(key: &str, value: &Bson) -> StoreResult<u64> {
    integer(value)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| StoreError::translation(format!("{key} must be a non-negative integer, got {value}")))
}

/// Fluent construction of a [`Query`] without going through a filter document.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an expression to the filter with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.query.filter = std::mem::take(&mut self.query.filter).and(expr);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks an [`Expr`] tree, producing one backend's representation of it.
pub trait QueryVisitor {
    type Output;
    type Error: Into<StoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Field { field, op, value } => self.visit_field(field, *op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn reserved_keys_never_become_predicates() {
        let query = Query::parse(&doc! {
            "_limit": 5,
            "_offset": 10,
            "_sort": "-age",
            "_count": true,
            "_collection": "people",
            "_date_sharding": "created_at",
        })
        .unwrap();

        assert!(!query.has_predicates());
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, Some(10));
        assert_eq!(query.sort, vec![Sort { field: "age".into(), direction: SortDirection::Desc }]);
        assert!(query.count);
        assert_eq!(query.collection.as_deref(), Some("people"));
        assert_eq!(query.date_sharding, Some(ShardingDirective::Field("created_at".into())));
        assert_eq!(query.target("users"), "people");
        assert_eq!(Query::new().target("users"), "users");
    }

    #[test]
    fn every_operator_becomes_a_conjunct() {
        let query = Query::parse(&doc! { "age": { "$gt": 20, "$lt": 50 } }).unwrap();

        assert_eq!(
            query.filter,
            Expr::And(vec![
                Expr::field("age", FieldOp::Gt, 20),
                Expr::field("age", FieldOp::Lt, 50),
            ])
        );
    }

    #[test]
    fn lists_default_to_membership_and_empty_strings_are_skipped() {
        let query = Query::parse(&doc! { "tag": ["a", "b"], "name": "" }).unwrap();

        assert_eq!(
            query.filter,
            Expr::And(vec![Expr::field("tag", FieldOp::In, vec![Bson::from("a"), Bson::from("b")])])
        );
        assert!(query.seed().is_empty());
    }

    #[test]
    fn logical_groups_recurse() {
        let query = Query::parse(&doc! {
            "$or": [{ "category": "A" }, { "value": 20, "_limit": 3 }],
        })
        .unwrap();

        assert_eq!(
            query.filter,
            Expr::And(vec![Expr::Or(vec![
                Expr::And(vec![Expr::field("category", FieldOp::Eq, "A")]),
                Expr::And(vec![Expr::field("value", FieldOp::Eq, 20)]),
            ])])
        );
        assert_eq!(query.limit, None);
    }

    #[test]
    fn unknown_operators_are_translation_errors() {
        let err = Query::parse(&doc! { "age": { "$between": [1, 2] } }).unwrap_err();
        assert!(matches!(err, StoreError::Translation(_)));

        let err = Query::parse(&doc! { "$nor": [{ "a": 1 }] }).unwrap_err();
        assert!(matches!(err, StoreError::Translation(_)));
    }

    #[test]
    fn logical_keys_are_rejected_inside_operator_documents() {
        let err = Query::parse(&doc! { "age": { "$or": [{ "$gt": 1 }] } }).unwrap_err();
        assert!(matches!(err, StoreError::Translation(_)));
    }

    #[test]
    fn malformed_operands_are_reported() {
        for filter in [
            doc! { "tag": { "$in": "a" } },
            doc! { "name": { "$i": 3 } },
            doc! { "age": { "$gt": null } },
            doc! { "age": { "$gt": [1] } },
            doc! { "$or": [] },
            doc! { "$or": [1] },
            doc! { "_limit": -1 },
            doc! { "_sort": { "age": 2 } },
        ] {
            assert!(
                matches!(Query::parse(&filter), Err(StoreError::Translation(_))),
                "{filter} should not parse"
            );
        }
    }

    #[test]
    fn seed_keeps_plain_equalities_only() {
        let id = ObjectId::new();
        let query = Query::parse(&doc! {
            "_id": id,
            "name": "alice",
            "age": { "$gt": 3 },
            "tags": ["x"],
        })
        .unwrap();

        assert_eq!(query.seed(), &doc! { "_id": id, "name": "alice" });
        assert_eq!(query.id().unwrap(), Some(id));
    }

    #[test]
    fn sharded_filters_are_rejected_for_writes() {
        let query = Query::parse(&doc! { "_date_sharding": true }).unwrap();
        assert!(matches!(query.ensure_unsharded(), Err(StoreError::Validation(_))));

        let query = Query::parse(&doc! { "_date_sharding": false }).unwrap();
        assert!(query.ensure_unsharded().is_ok());
    }
}
