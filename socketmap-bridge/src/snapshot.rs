//! Keyspace snapshot backend.
//!
//! The document holds one or more keyspaces, each mapping table names to a
//! list of rows:
//!
//! ```json
//! {
//!   "mail": {
//!     "domains": [{ "domain": "example.com", "active": true }],
//!     "access_maps": [{ "sender": "spammer@bad.tld", "action": "REJECT" }]
//!   }
//! }
//! ```
//!
//! Only the configured keyspace is kept. Each table the bridge serves is
//! indexed by its key column at load time; a row without a string key, or two
//! rows sharing a key, make the snapshot invalid. Tables the bridge never
//! queries are ignored. The data never changes after loading, so lookups from
//! many sessions need no locking.

use std::{
    collections::{HashMap, hash_map::Entry},
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};

use crate::{
    backend::{Query, QueryBackend, Scalar},
    tables::TABLES,
};

type Row = Map<String, Value>;

#[derive(Debug)]
struct IndexedTable {
    key_column: &'static str,
    rows: HashMap<String, Row>,
}

impl IndexedTable {
    fn build(table: &str, key_column: &'static str, rows: Vec<Row>) -> Result<Self> {
        let mut indexed = HashMap::with_capacity(rows.len());
        for (position, row) in rows.into_iter().enumerate() {
            let key = match row.get(key_column) {
                Some(Value::String(key)) => key.clone(),
                _ => bail!("row {position} of table {table} has no text {key_column} column"),
            };
            match indexed.entry(key) {
                Entry::Occupied(entry) => {
                    bail!("table {table} has more than one row for {key_column} '{}'", entry.key())
                }
                Entry::Vacant(entry) => {
                    entry.insert(row);
                }
            }
        }

        Ok(Self {
            key_column,
            rows: indexed,
        })
    }
}

#[derive(Debug)]
pub struct SnapshotBackend {
    keyspace: String,
    tables: HashMap<String, IndexedTable>,
}

impl SnapshotBackend {
    pub async fn load(path: &Path, keyspace: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        Self::from_json(&raw, keyspace)
            .with_context(|| format!("failed to load snapshot {}", path.display()))
    }

    pub fn from_json(raw: &str, keyspace: &str) -> Result<Self> {
        let mut keyspaces: HashMap<String, HashMap<String, Vec<Row>>> =
            serde_json::from_str(raw).context("snapshot is not a keyspace document")?;
        let raw_tables = keyspaces
            .remove(keyspace)
            .ok_or_else(|| anyhow!("keyspace '{keyspace}' not found in snapshot"))?;

        let mut tables = HashMap::new();
        for (name, rows) in raw_tables {
            let Some(descriptor) = TABLES.iter().find(|descriptor| descriptor.table == name) else {
                continue;
            };
            let indexed = IndexedTable::build(&name, descriptor.key_column, rows)?;
            tables.insert(name, indexed);
        }

        Ok(Self {
            keyspace: keyspace.to_string(),
            tables,
        })
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn find(&self, query: &Query<'_>) -> Result<Option<Scalar>> {
        let table = self.tables.get(query.table).ok_or_else(|| {
            anyhow!(
                "table {}.{} does not exist",
                self.keyspace,
                query.table
            )
        })?;
        if table.key_column != query.key_column {
            bail!(
                "table {}.{} is keyed by {}, not {}",
                self.keyspace,
                query.table,
                table.key_column,
                query.key_column
            );
        }

        let Some(row) = table.rows.get(query.key) else {
            return Ok(None);
        };

        match row.get(query.result_column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(Scalar::Bool(*flag))),
            Some(Value::String(text)) => Ok(Some(Scalar::Text(text.clone()))),
            Some(other) => bail!(
                "column {}.{} holds unsupported value {other}",
                query.table,
                query.result_column
            ),
        }
    }
}

impl QueryBackend for SnapshotBackend {
    async fn lookup(&self, query: &Query<'_>) -> Result<Option<Scalar>> {
        self.find(query)
    }
}
