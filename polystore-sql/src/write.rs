//! The transactional write engine: inserts, bulk updates, update-all and upsert.
//!
//! Every operation here runs inside exactly one transaction and either commits all of
//! its statements or none of them.

use std::collections::HashMap;

use bson::{Document, oid::ObjectId};
use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use polystore_core::{
    catalog::Catalog,
    context::CallContext,
    error::{StoreError, StoreResult},
    query::{ID_FIELD, Query},
    record::document_id,
    update::UpdateSpec,
    write::{assert_id, assign_ids, upsert_document, upsert_id},
};

use crate::{
    ast::{
        Assign,
        ColumnRef,
        CompareOp,
        CreateTempTable,
        DropTable,
        Ident,
        Insert,
        Predicate,
        Relation,
        Select,
        SelectItem,
        SqlValue,
        Update,
    },
    catalog::SqliteCatalog,
    dialect::ColumnType,
    exec::{Executor, in_transaction},
    filter::compile_predicate,
    update::compile_assignments,
    value::to_sql_value,
};

const TARGET_ALIAS: &str = "t";
const STAGE_ALIAS: &str = "s";

pub(crate) fn insert(
    conn: &mut Connection,
    ctx: &CallContext,
    collection: &str,
    mut documents: Vec<Document>,
) -> StoreResult<Vec<ObjectId>> {
    let table = Ident::table(collection)?;
    let ids = assign_ids(&mut documents)?;
    let statements = documents
        .iter()
        .map(|document| insert_statement(&table, document))
        .collect::<StoreResult<Vec<_>>>()?;

    in_transaction(conn, ctx, "insert", collection, |exec| {
        for statement in &statements {
            exec.execute("insert", statement)?;
        }
        Ok(ids)
    })
}

/// Updates stored rows from `objects`.
///
/// Without a filter every object updates the row with its own `_id`. With a filter the
/// objects are staged into a temporary table and applied in one joined `UPDATE`.
pub(crate) fn bulk_update(
    conn: &mut Connection,
    ctx: &CallContext,
    collection: &str,
    objects: Vec<Document>,
    filter: Option<Query>,
) -> StoreResult<u64> {
    let table = Ident::table(collection)?;

    match filter {
        None => bulk_update_by_id(conn, ctx, &table, &objects),
        Some(query) => bulk_update_staged(conn, ctx, &table, &objects, &query),
    }
}

fn bulk_update_by_id(
    conn: &mut Connection,
    ctx: &CallContext,
    table: &Ident,
    objects: &[Document],
) -> StoreResult<u64> {
    let mut statements = Vec::with_capacity(objects.len());

    for object in objects {
        let Some(id) = document_id(object)? else {
            debug!(collection = table.as_str(), "skipping bulk update object without an _id");
            continue;
        };

        let assignments = object
            .iter()
            .filter(|(field, _)| field.as_str() != ID_FIELD)
            .map(|(field, value)| Ok((Ident::new(field)?, Assign::Value(to_sql_value(value)?))))
            .collect::<StoreResult<Vec<_>>>()?;

        if assignments.is_empty() {
            continue;
        }

        statements.push((id, Update {
            table: table.clone(),
            alias: None,
            assignments,
            from: None,
            filter: id_predicate(None, id)?,
        }));
    }

    in_transaction(conn, ctx, "bulk update", table.as_str(), |exec| {
        let mut affected = 0;

        for (id, statement) in &statements {
            match exec.execute("bulk update", statement)? {
                0 => return Err(StoreError::NotFound(format!("_id {id}"), table.to_string())),
                rows => affected += rows as u64,
            }
        }

        Ok(affected)
    })
}

fn bulk_update_staged(
    conn: &mut Connection,
    ctx: &CallContext,
    table: &Ident,
    objects: &[Document],
    query: &Query,
) -> StoreResult<u64> {
    let mut fields: Vec<Ident> = Vec::new();
    let mut staged = Vec::with_capacity(objects.len());

    for object in objects {
        let Some(id) = document_id(object)? else {
            debug!(collection = table.as_str(), "skipping bulk update object without an _id");
            continue;
        };

        let mut values = HashMap::new();
        for (field, value) in object.iter().filter(|(field, _)| field.as_str() != ID_FIELD) {
            let column = Ident::new(field)?;
            if !fields.contains(&column) {
                fields.push(column.clone());
            }
            values.insert(column, to_sql_value(value)?);
        }

        staged.push((id, values));
    }

    if fields.is_empty() {
        debug!(collection = table.as_str(), "bulk update has no fields to stage");
        return Ok(0);
    }

    // Staged columns are positional: `_vN` holds the value of field N and `_pN` is 1
    // when the object carried field N, so an explicit null still overwrites.
    let slots = (0..fields.len())
        .map(|n| Ok((Ident::new(&format!("_v{n}"))?, Ident::new(&format!("_p{n}"))?)))
        .collect::<StoreResult<Vec<_>>>()?;

    let target = Ident::new(TARGET_ALIAS)?;
    let stage_alias = Ident::new(STAGE_ALIAS)?;
    let stage = Ident::new(&format!("_stage_{}", Uuid::new_v4().simple()))?;
    let filter = compile_predicate(&query.filter, Some(&target))?;

    let rows = staged
        .into_iter()
        .map(|(id, mut values)| {
            let mut row = Vec::with_capacity(fields.len() * 2 + 1);
            row.push(SqlValue::Text(id.to_hex()));
            for field in &fields {
                match values.remove(field) {
                    Some(value) => row.extend([value, SqlValue::Integer(1)]),
                    None => row.extend([SqlValue::Null, SqlValue::Integer(0)]),
                }
            }
            row
        })
        .collect::<Vec<_>>();

    let update = Update {
        table: table.clone(),
        alias: Some(target.clone()),
        assignments: fields
            .iter()
            .zip(&slots)
            .map(|(field, (value, present))| {
                (field.clone(), Assign::Staged {
                    value: ColumnRef::qualified(Some(&stage_alias), value.clone()),
                    present: ColumnRef::qualified(Some(&stage_alias), present.clone()),
                })
            })
            .collect(),
        from: Some((stage.clone(), stage_alias.clone())),
        filter: Predicate::all([
            Predicate::ColumnsEq {
                left: ColumnRef::qualified(Some(&target), Ident::new(ID_FIELD)?),
                right: ColumnRef::qualified(Some(&stage_alias), Ident::new(ID_FIELD)?),
            },
            filter,
        ]),
    };

    in_transaction(conn, ctx, "bulk update", table.as_str(), |exec| {
        let types = column_types(exec, table)?;
        let create = CreateTempTable {
            name: stage.clone(),
            primary_key: Ident::new(ID_FIELD)?,
            columns: fields
                .iter()
                .zip(&slots)
                .flat_map(|(field, (value, present))| {
                    let value_type = types.get(field.as_str()).copied().unwrap_or(ColumnType::Text);
                    [(value.clone(), value_type), (present.clone(), ColumnType::Integer)]
                })
                .collect(),
        };
        exec.execute("bulk update staging", &create)?;

        let mut columns = vec![Ident::new(ID_FIELD)?];
        columns.extend(create.columns.iter().map(|(column, _)| column.clone()));
        let per_chunk = (exec.dialect().max_params() / columns.len()).max(1);

        for chunk in rows.chunks(per_chunk) {
            let insert = Insert { table: stage.clone(), columns: columns.clone(), rows: chunk.to_vec() };
            exec.execute("bulk update staging", &insert)?;
        }

        let affected = exec.execute("bulk update", &update)?;
        exec.execute("bulk update staging", &DropTable { name: stage.clone() })?;

        match affected {
            0 => Err(StoreError::NotFound("bulk update filter".into(), table.to_string())),
            rows => Ok(rows as u64),
        }
    })
}

/// Applies `update` to every row matching `query`.
pub(crate) fn update_all(
    conn: &mut Connection,
    ctx: &CallContext,
    collection: &str,
    query: &Query,
    update: &UpdateSpec,
) -> StoreResult<u64> {
    let table = Ident::table(collection)?;
    let assignments = compile_assignments(update)?;
    let filter = compile_predicate(&query.filter, None)?;

    if assignments.is_empty() {
        debug!(collection, "update has no instructions");
        return Ok(0);
    }

    let statement = Update { table: table.clone(), alias: None, assignments, from: None, filter };

    in_transaction(conn, ctx, "update all", collection, |exec| match exec.execute("update all", &statement)? {
        0 => Err(StoreError::NotFound("update filter".into(), table.to_string())),
        rows => Ok(rows as u64),
    })
}

/// Updates the rows matching `query`, or inserts one built from the filter and the update
/// when none match, and returns the resulting row.
pub(crate) fn upsert(
    conn: &mut Connection,
    ctx: &CallContext,
    collection: &str,
    query: &Query,
    update: &UpdateSpec,
    preset: Option<ObjectId>,
) -> StoreResult<Document> {
    let table = Ident::table(collection)?;
    let assignments = compile_assignments(update)?;
    let filter = compile_predicate(&query.filter, None)?;
    let new_id = upsert_id(preset, query)?;
    let new_row = insert_statement(&table, &upsert_document(new_id, query, update))?;

    in_transaction(conn, ctx, "upsert", collection, |exec| {
        let mut matching = Select::star(Relation::Table(table.clone()));
        matching.items = vec![SelectItem::Column {
            column: ColumnRef::new(Ident::new(ID_FIELD)?),
            alias: None,
        }];
        matching.filter = filter.clone();

        let matched = exec
            .query("upsert", &matching)?
            .iter()
            .filter_map(|row| row.get_object_id(ID_FIELD).ok())
            .collect::<Vec<_>>();

        if let Some(first) = matched.first().copied() {
            if !assignments.is_empty() {
                exec.execute("upsert", &Update {
                    table: table.clone(),
                    alias: None,
                    assignments: assignments.clone(),
                    from: None,
                    filter: filter.clone(),
                })?;
            }

            debug!(collection, matched = matched.len(), "upsert updated existing rows");
            return Ok(assert_id(read_by_id(exec, &table, first)?, preset));
        }

        exec.execute("upsert", &new_row)?;
        if !assignments.is_empty() {
            exec.execute("upsert", &Update {
                table: table.clone(),
                alias: None,
                assignments: assignments.clone(),
                from: None,
                filter: id_predicate(None, new_id)?,
            })?;
        }

        debug!(collection, id = %new_id, "upsert inserted a new row");
        Ok(assert_id(read_by_id(exec, &table, new_id)?, Some(new_id)))
    })
}

fn read_by_id(exec: &Executor<'_>, table: &Ident, id: ObjectId) -> StoreResult<Document> {
    let mut select = Select::star(Relation::Table(table.clone()));
    select.filter = id_predicate(None, id)?;
    select.limit = Some(1);

    exec.query("upsert", &select)?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(format!("_id {id}"), table.to_string()))
}

fn id_predicate(qualifier: Option<&Ident>, id: ObjectId) -> StoreResult<Predicate> {
    Ok(Predicate::Compare {
        column: ColumnRef::qualified(qualifier, Ident::new(ID_FIELD)?),
        op: CompareOp::Eq,
        value: SqlValue::Text(id.to_hex()),
    })
}

fn insert_statement(table: &Ident, document: &Document) -> StoreResult<Insert> {
    let mut columns = Vec::with_capacity(document.len());
    let mut row = Vec::with_capacity(document.len());

    for (field, value) in document {
        columns.push(Ident::new(field)?);
        row.push(to_sql_value(value)?);
    }

    Ok(Insert { table: table.clone(), columns, rows: vec![row] })
}

/// Column types of `table` by name, for typing staged columns.
fn column_types(exec: &Executor<'_>, table: &Ident) -> StoreResult<HashMap<String, ColumnType>> {
    Ok(SqliteCatalog::new(exec.conn())
        .columns(table.as_str())?
        .into_iter()
        .map(|column| {
            let column_type = ColumnType::from_declared(column.data_type.as_deref());
            (column.name, column_type)
        })
        .collect())
}
