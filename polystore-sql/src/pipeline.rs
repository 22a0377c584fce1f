//! Aggregation pipeline compilation.
//!
//! Stages fold left to right into one [`Select`]. Each stage writes its clause slot
//! (select list, where, group by, order by, limit/offset); when a stage has to see the
//! output of an earlier grouping, projection or window, the statement built so far
//! becomes a subquery and folding continues on top of it.

use polystore_core::{
    catalog::Catalog,
    error::{StoreError, StoreResult},
    pipeline::{
        Accumulator,
        AccumulatorArg,
        AccumulatorFunc,
        ConcatPart,
        GroupKey,
        GroupSpec,
        Pipeline,
        Projection,
        Stage,
    },
    query::{ID_FIELD, Sort},
};

use crate::{
    ast::{AggregateFunc, ColumnRef, ConcatItem, Ident, Predicate, Relation, Select, SelectItem},
    filter::compile_predicate,
};

/// Compiles `pipeline` over `table`. The catalog supplies the table's columns for
/// exclusion-only projections.
pub fn compile_pipeline(table: &Ident, pipeline: &Pipeline, catalog: &impl Catalog) -> StoreResult<Select> {
    let columns = catalog
        .columns(table.as_str())?
        .into_iter()
        .map(|column| column.name)
        .collect::<Vec<_>>();

    let mut fold = Fold {
        select: Select::star(Relation::Table(table.clone())),
        columns: (!columns.is_empty()).then_some(columns),
        grouped: false,
        shaped: false,
        depth: 0,
    };

    for stage in pipeline.stages() {
        fold.apply(stage)?;
    }

    Ok(fold.select)
}

struct Fold {
    select: Select,
    /// Output columns of `select`, when known.
    columns: Option<Vec<String>>,
    grouped: bool,
    shaped: bool,
    depth: usize,
}

impl Fold {
    fn windowed(&self) -> bool {
        self.select.limit.is_some() || self.select.offset.is_some()
    }

    fn wrap(&mut self) -> StoreResult<()> {
        self.depth += 1;
        let alias = Ident::new(&format!("_stage{}", self.depth))?;
        let inner = std::mem::replace(&mut self.select, Select::star(Relation::Table(alias.clone())));

        self.select.from = Relation::Subquery { select: Box::new(inner), alias };
        self.grouped = false;
        self.shaped = false;

        Ok(())
    }

    fn apply(&mut self, stage: &Stage) -> StoreResult<()> {
        match stage {
            Stage::Match(expr) => {
                if self.grouped || self.shaped || self.windowed() {
                    self.wrap()?;
                }

                let predicate = compile_predicate(expr, None)?;
                let current = std::mem::replace(&mut self.select.filter, Predicate::True);
                self.select.filter = Predicate::all([current, predicate]);
            }
            Stage::Group(spec) => {
                if self.grouped || self.shaped || self.windowed() {
                    self.wrap()?;
                }

                self.group(spec)?;
            }
            Stage::Project(projections) => {
                if self.grouped || self.shaped {
                    self.wrap()?;
                }

                self.project(projections)?;
            }
            Stage::Sort(keys) => {
                if self.windowed() {
                    self.wrap()?;
                }

                self.select.order_by = keys
                    .iter()
                    .map(|Sort { field, direction }| Ok((ColumnRef::new(Ident::new(field)?), *direction)))
                    .collect::<StoreResult<Vec<_>>>()?;
            }
            Stage::Limit(limit) => {
                self.select.limit = Some(match self.select.limit {
                    Some(current) => current.min(*limit),
                    None => *limit,
                });
            }
            Stage::Skip(skip) => {
                if self.select.limit.is_some() {
                    self.wrap()?;
                }

                self.select.offset = Some(self.select.offset.unwrap_or(0) + skip);
            }
        }

        Ok(())
    }

    fn group(&mut self, spec: &GroupSpec) -> StoreResult<()> {
        let mut items = Vec::new();
        let mut group_by = Vec::new();
        let mut names = Vec::new();

        match &spec.key {
            GroupKey::Null => {
                if spec.accumulators.is_empty() {
                    return Err(StoreError::translation("$group with a null _id needs at least one accumulator"));
                }
            }
            GroupKey::Field(field) => {
                let column = ColumnRef::new(Ident::new(field)?);
                items.push(SelectItem::Column { column: column.clone(), alias: Some(Ident::new(ID_FIELD)?) });
                group_by.push(column);
                names.push(ID_FIELD.to_string());
            }
            GroupKey::Compound(keys) => {
                for (name, field) in keys {
                    let column = ColumnRef::new(Ident::new(field)?);
                    items.push(SelectItem::Column { column: column.clone(), alias: Some(Ident::new(name)?) });
                    group_by.push(column);
                    names.push(name.clone());
                }
            }
        }

        for Accumulator { alias, func, arg } in &spec.accumulators {
            items.push(SelectItem::Aggregate {
                func: match func {
                    AccumulatorFunc::Sum => AggregateFunc::Sum,
                    AccumulatorFunc::Avg => AggregateFunc::Avg,
                    AccumulatorFunc::Min => AggregateFunc::Min,
                    AccumulatorFunc::Max => AggregateFunc::Max,
                    AccumulatorFunc::Count => AggregateFunc::Count,
                },
                arg: match arg {
                    AccumulatorArg::All => None,
                    AccumulatorArg::Field(field) => Some(ColumnRef::new(Ident::new(field)?)),
                },
                alias: Ident::new(alias)?,
            });
            names.push(alias.clone());
        }

        self.select.items = items;
        self.select.group_by = group_by;
        self.select.order_by.clear();
        self.columns = Some(names);
        self.grouped = true;

        Ok(())
    }

    fn project(&mut self, projections: &[Projection]) -> StoreResult<()> {
        let mut items = Vec::new();
        let mut names = Vec::new();
        let mut excluded = Vec::new();
        let mut id_excluded = false;

        for projection in projections {
            match projection {
                Projection::Include(field) => {
                    items.push(SelectItem::Column { column: ColumnRef::new(Ident::new(field)?), alias: None });
                    names.push(field.clone());
                }
                Projection::Exclude(field) if field == ID_FIELD => id_excluded = true,
                Projection::Exclude(field) => excluded.push(field.as_str()),
                Projection::Concat { alias, parts } => {
                    let parts = parts
                        .iter()
                        .map(|part| match part {
                            ConcatPart::Field(field) => Ok(ConcatItem::Column(ColumnRef::new(Ident::new(field)?))),
                            ConcatPart::Literal(text) => Ok(ConcatItem::Literal(text.clone())),
                        })
                        .collect::<StoreResult<Vec<_>>>()?;
                    items.push(SelectItem::Concat { parts, alias: Ident::new(alias)? });
                    names.push(alias.clone());
                }
            }
        }

        if !items.is_empty() && !excluded.is_empty() {
            return Err(StoreError::translation("$project cannot mix inclusion and exclusion"));
        }

        if items.is_empty() {
            let Some(columns) = &self.columns else {
                return Err(StoreError::translation(
                    "$project with only exclusions needs the column list of the relation",
                ));
            };

            names = columns
                .iter()
                .filter(|column| !excluded.contains(&column.as_str()))
                .filter(|column| !(id_excluded && column.as_str() == ID_FIELD))
                .cloned()
                .collect();
            items = names
                .iter()
                .map(|name| Ok(SelectItem::Column { column: ColumnRef::new(Ident::new(name)?), alias: None }))
                .collect::<StoreResult<Vec<_>>>()?;
        } else if !id_excluded && !names.iter().any(|name| name == ID_FIELD) && self.has_id() {
            items.insert(0, SelectItem::Column { column: ColumnRef::new(Ident::new(ID_FIELD)?), alias: None });
            names.insert(0, ID_FIELD.to_string());
        }

        if items.is_empty() {
            return Err(StoreError::translation("$project removes every column"));
        }

        self.select.items = items;
        self.columns = Some(names);
        self.shaped = true;

        Ok(())
    }

    fn has_id(&self) -> bool {
        self.columns
            .as_ref()
            .is_none_or(|columns| columns.iter().any(|column| column == ID_FIELD))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bson::{Document, doc};
    use polystore_core::catalog::ColumnInfo;

    use super::*;
    use crate::{ast::Render, dialect::SqlDialect};

    struct Columns(Vec<&'static str>);

    impl Catalog for Columns {
        fn table_exists(&self, _table: &str) -> StoreResult<bool> {
            Ok(true)
        }

        fn columns(&self, _table: &str) -> StoreResult<Vec<ColumnInfo>> {
            Ok(self
                .0
                .iter()
                .map(|name| ColumnInfo { name: name.to_string(), data_type: None })
                .collect())
        }
    }

    fn compile(stages: &[Document]) -> StoreResult<String> {
        let catalog = Columns(vec!["_id", "category", "value", "secret"]);
        let pipeline = Pipeline::parse(stages)?;
        let select = compile_pipeline(&Ident::new("items")?, &pipeline, &catalog)?;
        Ok(select.to_sql(SqlDialect::Sqlite).sql)
    }

    #[test]
    fn match_sort_limit_share_one_statement() {
        assert_eq!(
            compile(&[
                doc! { "$match": { "value": { "$gt": 50 } } },
                doc! { "$match": { "category": "A" } },
                doc! { "$sort": { "value": -1 } },
                doc! { "$skip": 1 },
                doc! { "$limit": 2 },
            ])
            .unwrap(),
            r#"SELECT * FROM "items" WHERE ("value" > ?1 AND "category" = ?2) ORDER BY "value" DESC LIMIT ?3 OFFSET ?4"#
        );
    }

    #[test]
    fn single_key_group_is_exposed_as_id() {
        assert_eq!(
            compile(&[doc! { "$group": { "_id": "$category", "total": { "$sum": "$value" }, "n": { "$sum": 1 } } }])
                .unwrap(),
            r#"SELECT "category" AS "_id", SUM("value") AS "total", COUNT(*) AS "n" FROM "items" GROUP BY "category""#
        );
    }

    #[test]
    fn null_group_has_no_group_by() {
        assert_eq!(
            compile(&[doc! { "$group": { "_id": null, "avg": { "$avg": "$value" } } }]).unwrap(),
            r#"SELECT AVG("value") AS "avg" FROM "items""#
        );
    }

    #[test]
    fn compound_keys_are_flattened() {
        assert_eq!(
            compile(&[doc! { "$group": { "_id": { "cat": "$category", "v": "$value" }, "n": { "$count": {} } } }])
                .unwrap(),
            r#"SELECT "category" AS "cat", "value" AS "v", COUNT(*) AS "n" FROM "items" GROUP BY "category", "value""#
        );
    }

    #[test]
    fn match_after_group_wraps_a_subquery() {
        assert_eq!(
            compile(&[
                doc! { "$group": { "_id": "$category", "total": { "$sum": "$value" } } },
                doc! { "$match": { "total": { "$gte": 100 } } },
                doc! { "$sort": { "total": 1 } },
            ])
            .unwrap(),
            concat!(
                r#"SELECT * FROM (SELECT "category" AS "_id", SUM("value") AS "total" FROM "items" GROUP BY "category") "#,
                r#"AS "_stage1" WHERE "total" >= ?1 ORDER BY "total" ASC"#,
            )
        );
    }

    #[test]
    fn sort_after_limit_wraps_a_subquery() {
        assert_eq!(
            compile(&[doc! { "$limit": 3 }, doc! { "$sort": { "value": 1 } }]).unwrap(),
            r#"SELECT * FROM (SELECT * FROM "items" LIMIT ?1) AS "_stage1" ORDER BY "value" ASC"#
        );
    }

    #[test]
    fn projections() {
        assert_eq!(
            compile(&[doc! { "$project": { "category": 1, "label": { "$concat": ["$category", "-"] } } }]).unwrap(),
            r#"SELECT "_id", "category", ("category" || ?1) AS "label" FROM "items""#
        );
        assert_eq!(
            compile(&[doc! { "$project": { "secret": 0, "_id": 0 } }]).unwrap(),
            r#"SELECT "category", "value" FROM "items""#
        );
        assert!(matches!(
            compile(&[doc! { "$project": { "secret": 0, "value": 1 } }]),
            Err(StoreError::Translation(_))
        ));
    }

    #[test]
    fn exclusion_needs_catalog_columns() {
        let pipeline = Pipeline::parse(&[doc! { "$project": { "secret": 0 } }]).unwrap();
        let unknown: HashSet<String> = HashSet::new();

        assert!(matches!(
            compile_pipeline(&Ident::new("items").unwrap(), &pipeline, &unknown),
            Err(StoreError::Translation(_))
        ));
    }

    #[test]
    fn unsupported_stage_fails_before_compiling() {
        assert!(matches!(compile(&[doc! { "$bar": {} }]), Err(StoreError::Translation(_))));
    }
}
