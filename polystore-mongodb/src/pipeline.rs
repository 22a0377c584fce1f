//! Pipeline translation to MongoDB aggregation stages.
//!
//! The stages are native already; the translation only evens out the result shape so
//! both backends return the same rows: compound group keys are lifted to top-level
//! fields and null group keys are dropped.

use bson::{Bson, Document, doc};

use polystore_core::{
    error::StoreResult,
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
    query::{ID_FIELD, QueryVisitor},
};

use crate::query::{MongoQueryTranslator, sort_document};

pub fn translate_pipeline(pipeline: &Pipeline) -> StoreResult<Vec<Document>> {
    let mut stages = Vec::with_capacity(pipeline.stages().len());

    for stage in pipeline.stages() {
        match stage {
            Stage::Match(expr) => stages.push(doc! { "$match": MongoQueryTranslator.visit_expr(expr)? }),
            Stage::Group(spec) => translate_group(spec, &mut stages),
            Stage::Project(projections) => stages.push(doc! { "$project": translate_projection(projections) }),
            Stage::Sort(keys) => {
                if let Some(sort) = sort_document(keys) {
                    stages.push(doc! { "$sort": sort });
                }
            }
            Stage::Limit(limit) => stages.push(doc! { "$limit": saturating_i64(*limit) }),
            Stage::Skip(skip) => stages.push(doc! { "$skip": saturating_i64(*skip) }),
        }
    }

    Ok(stages)
}

fn translate_group(spec: &GroupSpec, stages: &mut Vec<Document>) {
    let mut group = Document::new();

    group.insert(ID_FIELD, match &spec.key {
        GroupKey::Null => Bson::Null,
        GroupKey::Field(field) => Bson::String(format!("${field}")),
        GroupKey::Compound(keys) => Bson::Document(
            keys.iter()
                .map(|(name, field)| (name.clone(), Bson::String(format!("${field}"))))
                .collect(),
        ),
    });

    for Accumulator { alias, func, arg } in &spec.accumulators {
        let operand = match arg {
            AccumulatorArg::All => Bson::Int32(1),
            AccumulatorArg::Field(field) => Bson::String(format!("${field}")),
        };
        let operator = match func {
            AccumulatorFunc::Sum | AccumulatorFunc::Count => "$sum",
            AccumulatorFunc::Avg => "$avg",
            AccumulatorFunc::Min => "$min",
            AccumulatorFunc::Max => "$max",
        };

        group.insert(alias.clone(), doc! { operator: operand });
    }

    stages.push(doc! { "$group": group });

    match spec.key {
        GroupKey::Field(_) => {}
        GroupKey::Null => stages.push(doc! { "$project": { ID_FIELD: 0 } }),
        GroupKey::Compound(_) => {
            stages.push(doc! { "$replaceWith": { "$mergeObjects": ["$_id", "$$ROOT"] } });
            stages.push(doc! { "$project": { ID_FIELD: 0 } });
        }
    }
}

fn translate_projection(projections: &[Projection]) -> Document {
    projections
        .iter()
        .map(|projection| match projection {
            Projection::Include(field) => (field.clone(), Bson::Int32(1)),
            Projection::Exclude(field) => (field.clone(), Bson::Int32(0)),
            Projection::Concat { alias, parts } => {
                let parts = parts
                    .iter()
                    .map(|part| match part {
                        ConcatPart::Field(field) => Bson::String(format!("${field}")),
                        ConcatPart::Literal(text) => Bson::Document(doc! { "$literal": text }),
                    })
                    .collect::<Vec<_>>();

                (alias.clone(), Bson::Document(doc! { "$concat": parts }))
            }
        })
        .collect()
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use polystore_core::error::StoreError;

    use super::*;

    fn translate(stages: &[Document]) -> StoreResult<Vec<Document>> {
        translate_pipeline(&Pipeline::parse(stages)?)
    }

    #[test]
    fn match_sort_window() {
        assert_eq!(
            translate(&[
                doc! { "$match": { "value": { "$gt": 50 } } },
                doc! { "$sort": { "value": -1 } },
                doc! { "$skip": 1 },
                doc! { "$limit": 2 },
            ])
            .unwrap(),
            vec![
                doc! { "$match": { "value": { "$gt": 50 } } },
                doc! { "$sort": { "value": -1 } },
                doc! { "$skip": 1_i64 },
                doc! { "$limit": 2_i64 },
            ]
        );
    }

    #[test]
    fn group_shapes_match_the_relational_backend() {
        assert_eq!(
            translate(&[doc! { "$group": { "_id": "$category", "n": { "$count": {} } } }]).unwrap(),
            vec![doc! { "$group": { "_id": "$category", "n": { "$sum": 1 } } }]
        );
        assert_eq!(
            translate(&[doc! { "$group": { "_id": null, "avg": { "$avg": "$value" } } }]).unwrap(),
            vec![
                doc! { "$group": { "_id": null, "avg": { "$avg": "$value" } } },
                doc! { "$project": { "_id": 0 } },
            ]
        );
        assert_eq!(
            translate(&[doc! { "$group": { "_id": { "cat": "$category" }, "total": { "$sum": "$value" } } }]).unwrap(),
            vec![
                doc! { "$group": { "_id": { "cat": "$category" }, "total": { "$sum": "$value" } } },
                doc! { "$replaceWith": { "$mergeObjects": ["$_id", "$$ROOT"] } },
                doc! { "$project": { "_id": 0 } },
            ]
        );
    }

    #[test]
    fn concat_literals_are_escaped() {
        assert_eq!(
            translate(&[doc! { "$project": { "label": { "$concat": ["$category", "$"] }, "value": 1 } }]).unwrap(),
            vec![doc! { "$project": { "label": { "$concat": ["$category", { "$literal": "$" }] }, "value": 1 } }]
        );
    }

    #[test]
    fn unsupported_stage_is_rejected() {
        assert!(matches!(translate(&[doc! { "$bar": {} }]), Err(StoreError::Translation(_))));
    }
}
