//! A small SQL AST and its renderer.
//!
//! The compilers assemble statements from these types and render them exactly once at
//! the end. Identifiers are validated when an [`Ident`] is built and are the only text
//! interpolated into SQL; every value travels as a bound parameter.

use std::{fmt, sync::LazyLock};

use regex::Regex;

use polystore_core::{
    error::{StoreError, StoreResult},
    query::SortDirection,
};

use crate::dialect::{ColumnType, SqlDialect};

static IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|err| panic!("identifier pattern: {err}"))
});

/// A validated table, column, alias or index name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] unless `name` is a plain identifier
    /// (`[A-Za-z_][A-Za-z0-9_]*`). Dotted field paths such as `address.city` are
    /// rejected too: rows are flat columns, so nested fields are only reachable on the
    /// MongoDB backend.
    pub fn new(name: &str) -> StoreResult<Self> {
        if IDENT.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(StoreError::validation(format!("{name:?} is not a valid SQL identifier")))
        }
    }

    /// Like [`Ident::new`], reporting an empty name as a configuration error.
    pub fn table(name: &str) -> StoreResult<Self> {
        if name.is_empty() {
            return Err(StoreError::configuration("table name must not be empty"));
        }

        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

/// A column, optionally qualified by a table alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<Ident>,
    pub name: Ident,
}

impl ColumnRef {
    pub fn new(name: Ident) -> Self {
        Self { qualifier: None, name }
    }

    pub fn qualified(qualifier: Option<&Ident>, name: Ident) -> Self {
        Self { qualifier: qualifier.cloned(), name }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare { column: ColumnRef, op: CompareOp, value: SqlValue },
    IsNull { column: ColumnRef, negated: bool },
    InList { column: ColumnRef, values: Vec<SqlValue>, negated: bool },
    /// `LOWER(col) = LOWER(?)`
    LowerEq { column: ColumnRef, value: String },
    /// `LOWER(col) LIKE ? ESCAPE '\'` with an already escaped pattern.
    Like { column: ColumnRef, pattern: String },
    /// The dialect's regex match.
    Matches { column: ColumnRef, pattern: String },
    ColumnsEq { left: ColumnRef, right: ColumnRef },
}

impl Predicate {
    /// Conjunction that drops `True` operands and collapses single operands.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
        let mut operands = predicates
            .into_iter()
            .filter(|predicate| *predicate != Predicate::True)
            .collect::<Vec<_>>();

        match operands.len() {
            0 => Predicate::True,
            1 => operands.remove(0),
            _ => Predicate::And(operands),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunc {
    fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Count => "COUNT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConcatItem {
    Column(ColumnRef),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Column { column: ColumnRef, alias: Option<Ident> },
    /// `FUNC(arg) AS alias`, `COUNT(*)` when `arg` is `None`.
    Aggregate { func: AggregateFunc, arg: Option<ColumnRef>, alias: Ident },
    Concat { parts: Vec<ConcatItem>, alias: Ident },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    Table(Ident),
    /// `(SELECT * FROM a UNION ALL SELECT * FROM b) AS alias`
    Union { tables: Vec<Ident>, alias: Ident },
    Subquery { select: Box<Select>, alias: Ident },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Empty means `*`.
    pub items: Vec<SelectItem>,
    pub from: Relation,
    pub filter: Predicate,
    pub group_by: Vec<ColumnRef>,
    pub order_by: Vec<(ColumnRef, SortDirection)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    /// `SELECT * FROM relation`
    pub fn star(from: Relation) -> Self {
        Self {
            items: Vec::new(),
            from,
            filter: Predicate::True,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

/// Right-hand side of a `SET col = ...` assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Assign {
    Value(SqlValue),
    /// `COALESCE(col, 0) + ?`
    Add(SqlValue),
    /// `COALESCE(col, 0) * ?`
    Multiply(SqlValue),
    /// Replace if the column is null or the operand is smaller.
    Least(SqlValue),
    /// Replace if the column is null or the operand is larger.
    Greatest(SqlValue),
    Now,
    /// The staged value where the staged row carries the field, else the column itself.
    Staged { value: ColumnRef, present: ColumnRef },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: Ident,
    pub alias: Option<Ident>,
    pub assignments: Vec<(Ident, Assign)>,
    /// `FROM table AS alias`
    pub from: Option<(Ident, Ident)>,
    pub filter: Predicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: Ident,
    pub columns: Vec<Ident>,
    pub rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTempTable {
    pub name: Ident,
    pub primary_key: Ident,
    pub columns: Vec<(Ident, ColumnType)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub name: Ident,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub name: Ident,
    pub table: Ident,
    pub columns: Vec<(Ident, SortDirection)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropIndex {
    pub name: Ident,
}

/// Rendered SQL and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// A statement that renders to SQL.
pub trait Render {
    fn render(&self, out: &mut Renderer);

    fn to_sql(&self, dialect: SqlDialect) -> Fragment {
        let mut out = Renderer::new(dialect);
        self.render(&mut out);
        out.finish()
    }
}

/// Accumulates SQL text and bound parameters.
#[derive(Debug)]
pub struct Renderer {
    dialect: SqlDialect,
    sql: String,
    params: Vec<SqlValue>,
}

impl Renderer {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect, sql: String::new(), params: Vec::new() }
    }

    pub fn finish(self) -> Fragment {
        Fragment { sql: self.sql, params: self.params }
    }

    fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    fn bind(&mut self, value: SqlValue) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn ident(&mut self, ident: &Ident) {
        let quoted = self.dialect.quote_ident(ident.as_str());
        self.sql.push_str(&quoted);
    }

    fn column(&mut self, column: &ColumnRef) {
        if let Some(qualifier) = &column.qualifier {
            self.ident(qualifier);
            self.push(".");
        }
        self.ident(&column.name);
    }

    fn list<T>(&mut self, items: &[T], separator: &str, mut each: impl FnMut(&mut Self, &T)) {
        for (position, item) in items.iter().enumerate() {
            if position > 0 {
                self.push(separator);
            }
            each(self, item);
        }
    }

    pub fn predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::True => self.push("1 = 1"),
            Predicate::False => self.push("1 = 0"),
            Predicate::And(operands) | Predicate::Or(operands) if operands.is_empty() => {
                let empty = match predicate {
                    Predicate::And(_) => Predicate::True,
                    _ => Predicate::False,
                };
                self.predicate(&empty);
            }
            Predicate::And(operands) if operands.len() == 1 => self.predicate(&operands[0]),
            Predicate::And(operands) => {
                self.push("(");
                self.list(operands, " AND ", |out, operand| out.predicate(operand));
                self.push(")");
            }
            Predicate::Or(operands) => {
                self.push("(");
                self.list(operands, " OR ", |out, operand| {
                    out.push("(");
                    out.predicate(operand);
                    out.push(")");
                });
                self.push(")");
            }
            Predicate::Compare { column, op, value } => {
                self.column(column);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.bind(value.clone());
            }
            Predicate::IsNull { column, negated } => {
                self.column(column);
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Predicate::InList { values, negated, .. } if values.is_empty() => {
                self.predicate(if *negated { &Predicate::True } else { &Predicate::False });
            }
            Predicate::InList { column, values, negated } => {
                self.column(column);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.list(values, ", ", |out, value| out.bind(value.clone()));
                self.push(")");
            }
            Predicate::LowerEq { column, value } => {
                self.push("LOWER(");
                self.column(column);
                self.push(") = LOWER(");
                self.bind(SqlValue::Text(value.clone()));
                self.push(")");
            }
            Predicate::Like { column, pattern } => {
                self.push("LOWER(");
                self.column(column);
                self.push(") LIKE ");
                self.bind(SqlValue::Text(pattern.clone()));
                self.push(" ESCAPE '\\'");
            }
            Predicate::Matches { column, pattern } => {
                self.column(column);
                self.push(" ");
                self.push(self.dialect.regex_operator());
                self.push(" ");
                self.bind(SqlValue::Text(pattern.clone()));
            }
            Predicate::ColumnsEq { left, right } => {
                self.column(left);
                self.push(" = ");
                self.column(right);
            }
        }
    }

    fn where_clause(&mut self, filter: &Predicate) {
        if !filter.is_true() {
            self.push(" WHERE ");
            self.predicate(filter);
        }
    }

    fn relation(&mut self, relation: &Relation) {
        match relation {
            Relation::Table(table) => self.ident(table),
            Relation::Union { tables, alias } => {
                self.push("(");
                self.list(tables, " UNION ALL ", |out, table| {
                    out.push("SELECT * FROM ");
                    out.ident(table);
                });
                self.push(") AS ");
                self.ident(alias);
            }
            Relation::Subquery { select, alias } => {
                self.push("(");
                select.render(self);
                self.push(") AS ");
                self.ident(alias);
            }
        }
    }

    fn select_item(&mut self, item: &SelectItem) {
        match item {
            SelectItem::Column { column, alias } => {
                self.column(column);
                if let Some(alias) = alias {
                    self.push(" AS ");
                    self.ident(alias);
                }
            }
            SelectItem::Aggregate { func, arg, alias } => {
                self.push(func.as_sql());
                self.push("(");
                match arg {
                    Some(column) => self.column(column),
                    None => self.push("*"),
                }
                self.push(") AS ");
                self.ident(alias);
            }
            SelectItem::Concat { parts, alias } => {
                self.push("(");
                self.list(parts, " || ", |out, part| match part {
                    ConcatItem::Column(column) => out.column(column),
                    ConcatItem::Literal(text) => out.bind(SqlValue::Text(text.clone())),
                });
                self.push(") AS ");
                self.ident(alias);
            }
        }
    }

    fn assignment(&mut self, target: &ColumnRef, assign: &Assign) {
        match assign {
            Assign::Value(value) => self.bind(value.clone()),
            Assign::Add(value) | Assign::Multiply(value) => {
                self.push("COALESCE(");
                self.column(target);
                self.push(if matches!(assign, Assign::Add(_)) { ", 0) + " } else { ", 0) * " });
                self.bind(value.clone());
            }
            Assign::Least(value) | Assign::Greatest(value) => {
                self.push("CASE WHEN ");
                self.column(target);
                self.push(" IS NULL OR ");
                self.bind(value.clone());
                self.push(if matches!(assign, Assign::Least(_)) { " < " } else { " > " });
                self.column(target);
                self.push(" THEN ");
                self.bind(value.clone());
                self.push(" ELSE ");
                self.column(target);
                self.push(" END");
            }
            Assign::Now => self.push(self.dialect.now()),
            Assign::Staged { value, present } => {
                self.push("CASE WHEN ");
                self.column(present);
                self.push(" = 1 THEN ");
                self.column(value);
                self.push(" ELSE ");
                self.column(target);
                self.push(" END");
            }
        }
    }
}

impl Render for Select {
    fn render(&self, out: &mut Renderer) {
        out.push("SELECT ");
        if self.items.is_empty() {
            out.push("*");
        } else {
            out.list(&self.items, ", ", |out, item| out.select_item(item));
        }

        out.push(" FROM ");
        out.relation(&self.from);
        out.where_clause(&self.filter);

        if !self.group_by.is_empty() {
            out.push(" GROUP BY ");
            out.list(&self.group_by, ", ", |out, column| out.column(column));
        }

        if !self.order_by.is_empty() {
            out.push(" ORDER BY ");
            out.list(&self.order_by, ", ", |out, (column, direction)| {
                out.column(column);
                out.push(match direction {
                    SortDirection::Asc => " ASC",
                    SortDirection::Desc => " DESC",
                });
            });
        }

        match (self.limit, self.offset) {
            (Some(limit), _) => {
                out.push(" LIMIT ");
                out.bind(SqlValue::Integer(saturating_i64(limit)));
            }
            (None, Some(_)) => {
                if let Some(unbounded) = out.dialect.unbounded_limit() {
                    out.push(" ");
                    out.push(unbounded);
                }
            }
            (None, None) => {}
        }

        if let Some(offset) = self.offset {
            out.push(" OFFSET ");
            out.bind(SqlValue::Integer(saturating_i64(offset)));
        }
    }
}

impl Render for Update {
    fn render(&self, out: &mut Renderer) {
        out.push("UPDATE ");
        out.ident(&self.table);
        if let Some(alias) = &self.alias {
            out.push(" AS ");
            out.ident(alias);
        }

        out.push(" SET ");
        out.list(&self.assignments, ", ", |out, (column, assign)| {
            out.ident(column);
            out.push(" = ");
            let target = ColumnRef::qualified(self.alias.as_ref(), column.clone());
            out.assignment(&target, assign);
        });

        if let Some((table, alias)) = &self.from {
            out.push(" FROM ");
            out.ident(table);
            out.push(" AS ");
            out.ident(alias);
        }

        out.where_clause(&self.filter);
    }
}

impl Render for Insert {
    fn render(&self, out: &mut Renderer) {
        out.push("INSERT INTO ");
        out.ident(&self.table);
        out.push(" (");
        out.list(&self.columns, ", ", |out, column| out.ident(column));
        out.push(") VALUES ");
        out.list(&self.rows, ", ", |out, row| {
            out.push("(");
            out.list(row, ", ", |out, value| out.bind(value.clone()));
            out.push(")");
        });
    }
}

impl Render for CreateTempTable {
    fn render(&self, out: &mut Renderer) {
        out.push(out.dialect.create_temp_table());
        out.push(" ");
        out.ident(&self.name);
        out.push(" (");
        out.ident(&self.primary_key);
        out.push(" TEXT PRIMARY KEY");
        for (column, column_type) in &self.columns {
            out.push(", ");
            out.ident(column);
            out.push(" ");
            out.push(out.dialect.type_name(*column_type));
        }
        out.push(")");
        out.push(out.dialect.temp_table_suffix());
    }
}

impl Render for DropTable {
    fn render(&self, out: &mut Renderer) {
        out.push("DROP TABLE IF EXISTS ");
        out.ident(&self.name);
    }
}

impl Render for CreateIndex {
    fn render(&self, out: &mut Renderer) {
        out.push("CREATE INDEX IF NOT EXISTS ");
        out.ident(&self.name);
        out.push(" ON ");
        out.ident(&self.table);
        out.push(" (");
        out.list(&self.columns, ", ", |out, (column, direction)| {
            out.ident(column);
            out.push(match direction {
                SortDirection::Asc => " ASC",
                SortDirection::Desc => " DESC",
            });
        });
        out.push(")");
    }
}

impl Render for DropIndex {
    fn render(&self, out: &mut Renderer) {
        out.push("DROP INDEX IF EXISTS ");
        out.ident(&self.name);
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
