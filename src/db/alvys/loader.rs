use std::{collections::HashMap, fmt, ops::AddAssign};

use duckdb::{params_from_iter, Connection};
use itertools::Itertools;
use log::info;
use serde_json::Value;

use crate::{
    alvys::entity::Entity,
    db::alvys::{
        archive::ExportArtifact,
        flatten::{flatten, FlatRow, TableRows},
        tables::{table_spec, Kind, TableSpec},
    },
    error::IngestError,
    utils::lib_duckdb::quote_ident,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl AddAssign for LoadSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} skipped",
            self.inserted, self.updated, self.skipped
        )
    }
}

/// Load result of one entity: the total and the split per table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityLoad {
    pub summary: LoadSummary,
    pub tables: Vec<(&'static str, LoadSummary)>,
}

impl AddAssign for EntityLoad {
    fn add_assign(&mut self, other: Self) {
        self.summary += other.summary;
        for (name, summary) in other.tables {
            match self.tables.iter_mut().find(|(n, _)| *n == name) {
                Some((_, s)) => *s += summary,
                None => self.tables.push((name, summary)),
            }
        }
    }
}

/// Schema name for a tenant.  SCACs are short alphanumeric codes; anything
/// else is refused rather than quoted into SQL.
pub fn schema_name(scac: &str) -> Result<String, IngestError> {
    let scac = scac.trim().to_uppercase();
    if scac.is_empty() || !scac.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(IngestError::Config(format!("invalid SCAC {:?}", scac)));
    }
    Ok(scac)
}

fn column_type(kind: Kind) -> &'static str {
    match kind {
        Kind::Text(_) | Kind::Code(_) => "VARCHAR",
        Kind::Float | Kind::FloatOrZero => "DOUBLE",
        Kind::Int | Kind::Flag => "BIGINT",
        Kind::Timestamp => "TIMESTAMP",
    }
}

pub fn create_table_sql(schema: &str, table: &TableSpec) -> String {
    let columns = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let key = if i == 0 { " PRIMARY KEY" } else { "" };
            format!("    {} {}{}", c.name, column_type(c.kind), key)
        })
        .join(",\n");
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (\n{}\n);",
        quote_ident(schema),
        table.name,
        columns
    )
}

/// Upserts flattened records into the tenant's staging tables.
pub struct Loader<'c> {
    conn: &'c mut Connection,
}

impl<'c> Loader<'c> {
    pub fn new(conn: &'c mut Connection) -> Self {
        Loader { conn }
    }

    /// Create the tenant schema and the entity's tables if missing.
    pub fn ensure_tables(&self, scac: &str, entity: Entity) -> Result<(), IngestError> {
        let schema = schema_name(scac)?;
        let mut sql = format!("CREATE SCHEMA IF NOT EXISTS {};\n", quote_ident(&schema));
        for table in table_spec(entity).tables() {
            sql.push_str(&create_table_sql(&schema, table));
            sql.push('\n');
        }
        self.conn
            .execute_batch(&sql)
            .map_err(|source| IngestError::Load {
                table: format!("{}.{}", schema, table_spec(entity).name),
                source,
            })
    }

    pub fn load_artifact(&mut self, artifact: &ExportArtifact) -> Result<EntityLoad, IngestError> {
        self.load(
            &artifact.scac,
            artifact.entity,
            &artifact.records,
            &artifact.file_id,
        )
    }

    /// Flatten and upsert one entity's records in a single transaction.
    /// Either every table of the entity is written or none is.
    pub fn load(
        &mut self,
        scac: &str,
        entity: Entity,
        records: &[Value],
        file_id: &str,
    ) -> Result<EntityLoad, IngestError> {
        let schema = schema_name(scac)?;
        self.ensure_tables(&schema, entity)?;
        let batches = flatten(table_spec(entity), records, file_id);

        let tx = self.conn.transaction()?;
        let mut out = EntityLoad::default();
        for batch in &batches {
            let summary = upsert(&tx, &schema, batch).map_err(|source| IngestError::Load {
                table: format!("{}.{}", schema, batch.table.name),
                source,
            })?;
            out.summary += summary;
            out.tables.push((batch.table.name, summary));
        }
        tx.commit().map_err(|source| IngestError::Load {
            table: format!("{}.{}", schema, table_spec(entity).name),
            source,
        })?;

        for (table, summary) in &out.tables {
            info!("[{}] {}: {} {}", schema, entity, table, summary);
        }
        Ok(out)
    }
}

/// Keep the last occurrence of every key, in first-seen order.
fn dedupe(rows: &[FlatRow]) -> Vec<&FlatRow> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<&FlatRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match position.get(row.key()) {
            Some(&i) => out[i] = row,
            None => {
                position.insert(row.key(), out.len());
                out.push(row);
            }
        }
    }
    out
}

fn upsert(conn: &Connection, schema: &str, batch: &TableRows) -> Result<LoadSummary, duckdb::Error> {
    let table = batch.table;
    let qualified = format!("{}.{}", quote_ident(schema), table.name);
    let mut summary = LoadSummary {
        skipped: batch.skipped,
        ..LoadSummary::default()
    };
    if batch.rows.is_empty() {
        return Ok(summary);
    }

    let names = table.columns.iter().map(|c| c.name).join(", ");
    let placeholders = table.columns.iter().map(|_| "?").join(", ");
    let mut exists = conn.prepare(&format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        qualified,
        table.key().name
    ))?;
    let mut insert = conn.prepare(&format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        qualified, names, placeholders
    ))?;

    for row in dedupe(&batch.rows) {
        let n: i64 = exists.query_row([row.key()], |r| r.get(0))?;
        insert.execute(params_from_iter(row.values.iter().map(|v| v.to_db())))?;
        if n > 0 {
            summary.updated += 1;
        } else {
            summary.inserted += 1;
        }
    }
    Ok(summary)
}
