//! Aggregation pipelines.
//!
//! A pipeline is an ordered list of single-key stage documents. Stages are parsed
//! strictly in order and the first unsupported stage fails the whole pipeline, so a
//! backend never receives a partially understood pipeline.

use bson::{Bson, Document};

use crate::{
    error::{StoreError, StoreResult},
    query::{Expr, Sort, SortDirection, non_negative, parse_expr},
};

/// Classification of a stage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    Match,
    Group,
    Project,
    Sort,
    Limit,
    Skip,
    Unrecognized(String),
}

impl From<&str> for StageKind {
    fn from(key: &str) -> Self {
        match key {
            "$match" => StageKind::Match,
            "$group" => StageKind::Group,
            "$project" => StageKind::Project,
            "$sort" => StageKind::Sort,
            "$limit" => StageKind::Limit,
            "$skip" => StageKind::Skip,
            other => StageKind::Unrecognized(other.to_string()),
        }
    }
}

/// One parsed pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Expr),
    Group(GroupSpec),
    Project(Vec<Projection>),
    Sort(Vec<Sort>),
    Limit(u64),
    Skip(u64),
}

/// Grouping key of a `$group` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// `_id: null`: a single aggregate row, no grouping at all.
    Null,
    /// `_id: "$field"`
    Field(String),
    /// `_id: { name: "$field", ... }`
    Compound(Vec<(String, String)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AccumulatorFunc {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$sum" => Some(AccumulatorFunc::Sum),
            "$avg" => Some(AccumulatorFunc::Avg),
            "$min" => Some(AccumulatorFunc::Min),
            "$max" => Some(AccumulatorFunc::Max),
            "$count" => Some(AccumulatorFunc::Count),
            _ => None,
        }
    }

    /// The operator key as it appears in a pipeline document.
    pub fn key(&self) -> &'static str {
        match self {
            AccumulatorFunc::Sum => "$sum",
            AccumulatorFunc::Avg => "$avg",
            AccumulatorFunc::Min => "$min",
            AccumulatorFunc::Max => "$max",
            AccumulatorFunc::Count => "$count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorArg {
    /// Every row of the group (`$sum: 1`, `$count: {}`).
    All,
    Field(String),
}

/// A named aggregate of a `$group` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    pub alias: String,
    pub func: AccumulatorFunc,
    pub arg: AccumulatorArg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub key: GroupKey,
    pub accumulators: Vec<Accumulator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatPart {
    Field(String),
    Literal(String),
}

/// One entry of a `$project` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Include(String),
    Exclude(String),
    Concat { alias: String, parts: Vec<ConcatPart> },
}

/// A parsed aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parses the stage documents in order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Translation`] on the first stage that is not a single-key
    /// document with a supported key and well-formed body.
    pub fn parse(stages: &[Document]) -> StoreResult<Self> {
        let stages = stages
            .iter()
            .enumerate()
            .map(|(position, stage)| parse_stage(position, stage))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

fn parse_stage(position: usize, stage: &Document) -> StoreResult<Stage> {
    let mut entries = stage.iter();
    let (key, body) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(StoreError::translation(format!(
                "pipeline stage {position} must have exactly one key"
            )));
        }
    };

    match StageKind::from(key.as_str()) {
        StageKind::Match => Ok(Stage::Match(parse_expr(stage_document(key, body)?)?)),
        StageKind::Group => Ok(Stage::Group(parse_group(stage_document(key, body)?)?)),
        StageKind::Project => Ok(Stage::Project(parse_project(stage_document(key, body)?)?)),
        StageKind::Sort => {
            let keys = stage_document(key, body)?;
            if keys.is_empty() {
                return Err(StoreError::translation("$sort needs at least one field"));
            }

            keys.iter()
                .map(|(field, direction)| {
                    Ok(Sort { field: field.clone(), direction: SortDirection::from_bson(field, direction)? })
                })
                .collect::<StoreResult<Vec<_>>>()
                .map(Stage::Sort)
        }
        StageKind::Limit => Ok(Stage::Limit(non_negative(key, body)?)),
        StageKind::Skip => Ok(Stage::Skip(non_negative(key, body)?)),
        StageKind::Unrecognized(key) => Err(StoreError::translation(format!(
            "unsupported pipeline stage {key} at position {position}"
        ))),
    }
}

fn stage_document<'a>(key: &str, body: &'a Bson) -> StoreResult<&'a Document> {
    match body {
        Bson::Document(document) => Ok(document),
        other => Err(StoreError::translation(format!("{key} expects a document, got {other}"))),
    }
}

/// Strips the `$` of a field reference.
fn field_ref(value: &Bson) -> Option<&str> {
    match value {
        Bson::String(reference) => reference
            .strip_prefix('$')
            .filter(|field| !field.is_empty() && !field.starts_with('$')),
        _ => None,
    }
}

fn parse_group(spec: &Document) -> StoreResult<GroupSpec> {
    let key = match spec.get("_id") {
        None => return Err(StoreError::translation("$group requires an _id")),
        Some(Bson::Null) => GroupKey::Null,
        Some(Bson::Document(names)) if !names.is_empty() => GroupKey::Compound(
            names
                .iter()
                .map(|(name, reference)| match field_ref(reference) {
                    Some(field) => Ok((name.clone(), field.to_string())),
                    None => Err(StoreError::translation(format!(
                        "$group key {name} must be a field reference, got {reference}"
                    ))),
                })
                .collect::<StoreResult<Vec<_>>>()?,
        ),
        Some(reference) => match field_ref(reference) {
            Some(field) => GroupKey::Field(field.to_string()),
            None => {
                return Err(StoreError::translation(format!(
                    "$group _id must be null, a field reference or a document of field references, got {reference}"
                )));
            }
        },
    };

    let accumulators = spec
        .iter()
        .filter(|(alias, _)| alias.as_str() != "_id")
        .map(|(alias, body)| parse_accumulator(alias, body))
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(GroupSpec { key, accumulators })
}

fn parse_accumulator(alias: &str, body: &Bson) -> StoreResult<Accumulator> {
    let malformed = || {
        StoreError::translation(format!(
            "$group field {alias} must be a single aggregate such as {{\"$sum\": \"$field\"}}, got {body}"
        ))
    };

    let document = match body {
        Bson::Document(document) if document.len() == 1 => document,
        _ => return Err(malformed()),
    };
    let Some((key, operand)) = document.iter().next() else {
        return Err(malformed());
    };
    let func = AccumulatorFunc::from_key(key).ok_or_else(|| {
        StoreError::translation(format!("unsupported accumulator {key} for {alias}"))
    })?;

    let arg = match (func, operand, field_ref(operand)) {
        (_, _, Some(field)) => AccumulatorArg::Field(field.to_string()),
        (AccumulatorFunc::Sum | AccumulatorFunc::Count, Bson::Int32(1) | Bson::Int64(1), None) => {
            AccumulatorArg::All
        }
        (AccumulatorFunc::Count, Bson::Document(empty), None) if empty.is_empty() => AccumulatorArg::All,
        _ => return Err(malformed()),
    };

    let func = match (func, &arg) {
        (AccumulatorFunc::Sum, AccumulatorArg::All) => AccumulatorFunc::Count,
        (func, _) => func,
    };

    Ok(Accumulator { alias: alias.to_string(), func, arg })
}

fn parse_project(spec: &Document) -> StoreResult<Vec<Projection>> {
    if spec.is_empty() {
        return Err(StoreError::translation("$project needs at least one field"));
    }

    spec.iter()
        .map(|(field, value)| match value {
            Bson::Boolean(true) | Bson::Int32(1) | Bson::Int64(1) => Ok(Projection::Include(field.clone())),
            Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0) => Ok(Projection::Exclude(field.clone())),
            Bson::Document(expression) => parse_concat(field, expression),
            other => Err(StoreError::translation(format!(
                "unsupported projection for {field}: {other}"
            ))),
        })
        .collect()
}

fn parse_concat(alias: &str, expression: &Document) -> StoreResult<Projection> {
    let parts = match (expression.len(), expression.get("$concat")) {
        (1, Some(Bson::Array(parts))) if !parts.is_empty() => parts,
        _ => {
            return Err(StoreError::translation(format!(
                "unsupported projection expression for {alias}: only $concat is supported"
            )));
        }
    };

    let parts = parts
        .iter()
        .map(|part| match (field_ref(part), part) {
            (Some(field), _) => Ok(ConcatPart::Field(field.to_string())),
            (None, Bson::String(literal)) => Ok(ConcatPart::Literal(literal.clone())),
            (None, other) => Err(StoreError::translation(format!(
                "$concat parts must be strings or field references, got {other}"
            ))),
        })
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(Projection::Concat { alias: alias.to_string(), parts })
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::query::FieldOp;

    #[test]
    fn stages_parse_in_order() {
        let pipeline = Pipeline::parse(&[
            doc! { "$match": { "value": { "$gt": 50 } } },
            doc! { "$sort": { "value": -1 } },
            doc! { "$skip": 1 },
            doc! { "$limit": 2 },
        ])
        .unwrap();

        assert_eq!(
            pipeline.stages(),
            &[
                Stage::Match(Expr::And(vec![Expr::field("value", FieldOp::Gt, 50)])),
                Stage::Sort(vec![Sort { field: "value".into(), direction: SortDirection::Desc }]),
                Stage::Skip(1),
                Stage::Limit(2),
            ]
        );
    }

    #[test]
    fn group_keys_and_accumulators() {
        let pipeline = Pipeline::parse(&[doc! { "$group": {
            "_id": { "cat": "$category", "day": "$day" },
            "total": { "$sum": "$value" },
            "rows": { "$sum": 1 },
            "n": { "$count": {} },
            "mean": { "$avg": "$value" },
        } }])
        .unwrap();

        let Stage::Group(group) = &pipeline.stages()[0] else {
            panic!("expected a group stage");
        };

        assert_eq!(
            group.key,
            GroupKey::Compound(vec![
                ("cat".into(), "category".into()),
                ("day".into(), "day".into()),
            ])
        );
        assert_eq!(
            group.accumulators,
            vec![
                Accumulator {
                    alias: "total".into(),
                    func: AccumulatorFunc::Sum,
                    arg: AccumulatorArg::Field("value".into()),
                },
                Accumulator { alias: "rows".into(), func: AccumulatorFunc::Count, arg: AccumulatorArg::All },
                Accumulator { alias: "n".into(), func: AccumulatorFunc::Count, arg: AccumulatorArg::All },
                Accumulator {
                    alias: "mean".into(),
                    func: AccumulatorFunc::Avg,
                    arg: AccumulatorArg::Field("value".into()),
                },
            ]
        );
    }

    #[test]
    fn null_group_key() {
        let pipeline = Pipeline::parse(&[doc! { "$group": { "_id": null, "n": { "$sum": 1 } } }]).unwrap();
        assert!(matches!(&pipeline.stages()[0], Stage::Group(GroupSpec { key: GroupKey::Null, .. })));
    }

    #[test]
    fn projections() {
        let pipeline = Pipeline::parse(&[doc! { "$project": {
            "name": 1,
            "secret": false,
            "label": { "$concat": ["$first", " ", "$last"] },
        } }])
        .unwrap();

        assert_eq!(
            pipeline.stages(),
            &[Stage::Project(vec![
                Projection::Include("name".into()),
                Projection::Exclude("secret".into()),
                Projection::Concat {
                    alias: "label".into(),
                    parts: vec![
                        ConcatPart::Field("first".into()),
                        ConcatPart::Literal(" ".into()),
                        ConcatPart::Field("last".into()),
                    ],
                },
            ])]
        );
    }

    #[test]
    fn unsupported_stage_fails_the_whole_pipeline() {
        let err = Pipeline::parse(&[doc! { "$match": {} }, doc! { "$bar": {} }]).unwrap_err();

        match err {
            StoreError::Translation(message) => assert!(message.contains("$bar")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_stages_are_rejected() {
        for stage in [
            doc! { "$sort": { "value": 0 } },
            doc! { "$limit": 2.5 },
            doc! { "$skip": -1 },
            doc! { "$group": { "n": { "$sum": 1 } } },
            doc! { "$group": { "_id": "category" } },
            doc! { "$group": { "_id": null, "n": { "$sum": 2 } } },
            doc! { "$group": { "_id": null, "n": { "$push": "$a" } } },
            doc! { "$project": { "x": { "$toUpper": "$a" } } },
            doc! { "$match": { "a": 1 }, "$limit": 1 },
        ] {
            assert!(
                matches!(Pipeline::parse(&[stage.clone()]), Err(StoreError::Translation(_))),
                "{stage} should not parse"
            );
        }
    }
}
