//! Identity resolution: natural key -> surrogate key
//!
//! Every lookup and insert runs on the caller's connection, which during a
//! batch is the batch transaction. Lookups therefore see this study's earlier
//! commits and the batch's own inserts, but never another study's
//! uncommitted rows.
//!
//! Uniqueness is enforced by the database, not by this process: `assign`
//! inserts with `ON CONFLICT DO NOTHING` and, when it loses a race, re-reads
//! the winner's key.

use futures::future::BoxFuture;
use gxw_common::types::{AttrValue, KeyPart, NaturalKey, StagedRow, TableId};
use sqlx::any::AnyArguments;
use sqlx::{Any, AnyConnection, Row};
use std::collections::HashMap;

use super::tables::{spec, TableSpec};
use crate::error::{LoadError, LoadResult};

/// Value bound to one placeholder
#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Text(String),
    Int(i64),
    Float(f64),
}

/// Bound parameters for a row, or the table whose row is missing
enum Bound {
    Values(Vec<Bind>),
    Missing(TableId),
}

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

fn bind_all<'q>(mut query: AnyQuery<'q>, binds: &[Bind]) -> AnyQuery<'q> {
    for bind in binds {
        query = match bind {
            Bind::Text(value) => query.bind(value.clone()),
            Bind::Int(value) => query.bind(*value),
            Bind::Float(value) => query.bind(*value),
        };
    }
    query
}

/// Outcome of [`IdentityResolver::assign`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// This call created the row
    Created(i64),
    /// A concurrent writer created it first; this is the winner's key
    Existing(i64),
    /// A referenced dimension row does not exist
    MissingReference(TableId),
}

/// Resolves and assigns surrogate keys for any catalogued table.
///
/// Holds a cache of referenced keys. Create one per attempt of an atomic
/// unit so that a rolled-back attempt cannot leak keys into the next one.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    cache: HashMap<NaturalKey, i64>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surrogate key for `key`, or `None` if no such row is visible.
    ///
    /// A key that references a missing row resolves to `None` as well.
    pub fn resolve<'a>(
        &'a mut self,
        conn: &'a mut AnyConnection,
        key: &'a NaturalKey,
    ) -> BoxFuture<'a, LoadResult<Option<i64>>> {
        Box::pin(async move {
            if let Some(id) = self.cache.get(key) {
                return Ok(Some(*id));
            }

            let binds = match self.bind_key(&mut *conn, key).await? {
                Bound::Values(binds) => binds,
                Bound::Missing(_) => return Ok(None),
            };

            let found = lookup(&mut *conn, spec(key.table), &binds).await?;
            if let Some(id) = found {
                self.cache.insert(key.clone(), id);
            }
            Ok(found)
        })
    }

    /// Insert `row` unless its natural key already exists.
    ///
    /// Never creates a second surrogate key for a natural key: a conflicting
    /// insert returns the existing key instead of an error.
    pub async fn assign(
        &mut self,
        conn: &mut AnyConnection,
        row: &StagedRow,
        run_id: &str,
    ) -> LoadResult<Assignment> {
        let table = spec(row.table());

        let mut binds = match self.bind_key(&mut *conn, &row.key).await? {
            Bound::Values(binds) => binds,
            Bound::Missing(missing) => return Ok(Assignment::MissingReference(missing)),
        };
        let key_len = binds.len();

        match self.bind_attributes(&mut *conn, &row.attributes).await? {
            Bound::Values(values) => binds.extend(values),
            Bound::Missing(missing) => return Ok(Assignment::MissingReference(missing)),
        }
        if table.provenance.is_some() {
            binds.push(Bind::Text(run_id.to_string()));
        }

        let sql = table.insert_sql();
        let inserted = bind_all(sqlx::query(&sql), &binds)
            .fetch_optional(&mut *conn)
            .await?;

        let assignment = match inserted {
            Some(record) => Assignment::Created(record.try_get::<i64, _>(0)?),
            None => match lookup(&mut *conn, table, &binds[..key_len]).await? {
                Some(winner) => Assignment::Existing(winner),
                None => return Err(LoadError::UnresolvedConflict(row.key.to_string())),
            },
        };

        if let Assignment::Created(id) | Assignment::Existing(id) = assignment {
            self.cache.insert(row.key.clone(), id);
        }
        Ok(assignment)
    }

    async fn bind_key(&mut self, conn: &mut AnyConnection, key: &NaturalKey) -> LoadResult<Bound> {
        let mut binds = Vec::with_capacity(key.parts.len());
        for part in &key.parts {
            match part {
                KeyPart::Text(value) => binds.push(Bind::Text(value.clone())),
                KeyPart::Ref(inner) => match self.resolve(&mut *conn, inner).await? {
                    Some(id) => binds.push(Bind::Int(id)),
                    None => return Ok(Bound::Missing(inner.table)),
                },
            }
        }
        Ok(Bound::Values(binds))
    }

    async fn bind_attributes(
        &mut self,
        conn: &mut AnyConnection,
        attributes: &[AttrValue],
    ) -> LoadResult<Bound> {
        let mut binds = Vec::with_capacity(attributes.len());
        for value in attributes {
            match value {
                AttrValue::Text(text) => binds.push(Bind::Text(text.clone())),
                AttrValue::Float(number) => binds.push(Bind::Float(*number)),
                AttrValue::Ref(key) => match self.resolve(&mut *conn, key).await? {
                    Some(id) => binds.push(Bind::Int(id)),
                    None => return Ok(Bound::Missing(key.table)),
                },
            }
        }
        Ok(Bound::Values(binds))
    }
}

async fn lookup(conn: &mut AnyConnection, table: &TableSpec, binds: &[Bind]) -> LoadResult<Option<i64>> {
    let sql = table.lookup_sql();
    let row = bind_all(sqlx::query(&sql), binds)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| r.try_get::<i64, _>(0)).transpose().map_err(LoadError::from)
}
