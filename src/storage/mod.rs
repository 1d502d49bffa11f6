//!
//! huntflow entity store
//! ---------------------
//! Typed table service consumed by the executor. A table is created from a schema and
//! receives rows through `append`, which is transactional per call: the whole batch is
//! validated first and either lands completely or not at all. Tables are addressed by
//! opaque `TableHandle`s; the store also records relationship edges observed while
//! fetching so later FIND statements can follow them.
//!
//! `MemoryStore` keeps everything in process memory behind a `parking_lot` lock.
//! File persistence for SAVE/LOAD (Parquet, CSV, JSON) lives in `io.rs`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, bail, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::schema::Schema;
use crate::types::{Edge, Entity, EntityTable};

pub mod io;

/// Opaque identifier of a stored table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableHandle(pub u64);

impl std::fmt::Display for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "t{}", self.0) }
}

/// Row filter passed to `query`.
pub type RowPredicate<'a> = &'a (dyn Fn(&Entity) -> bool + Send + Sync);

/// Abstract typed table storage.
pub trait EntityStore: Send + Sync {
    fn create_table(&self, schema: &Schema) -> Result<TableHandle>;

    /// Append rows. Either every row is stored or none is.
    fn append(&self, handle: TableHandle, rows: Vec<Entity>) -> Result<()>;

    /// Rows matching `predicate` (all rows when `None`), in insertion order.
    fn query(&self, handle: TableHandle, predicate: Option<RowPredicate<'_>>) -> Result<Vec<Entity>>;

    fn describe(&self, handle: TableHandle) -> Result<Schema>;

    fn drop_table(&self, handle: TableHandle) -> Result<()>;

    /// Write a table to a durable file. Returns the number of rows written.
    fn persist(&self, handle: TableHandle, target: &Path) -> Result<usize>;

    /// Read a previously persisted table file.
    fn load(&self, source: &Path, entity_type: Option<&str>) -> Result<EntityTable>;

    fn record_edges(&self, edges: &[Edge]) -> Result<()>;

    /// Recorded edges, optionally restricted to one relation.
    fn edges(&self, relation: Option<&str>) -> Result<Vec<Edge>>;

    fn table_count(&self) -> usize;

    /// Whole table as an `EntityTable`.
    fn table(&self, handle: TableHandle) -> Result<EntityTable> {
        let schema = self.describe(handle)?;
        let rows = self.query(handle, None)?;
        Ok(EntityTable::with_schema(schema, rows))
    }

    /// Create a table and fill it in one step; the table is dropped again if the
    /// append fails.
    fn create_with_rows(&self, table: &EntityTable) -> Result<TableHandle> {
        let handle = self.create_table(&table.schema)?;
        if let Err(e) = self.append(handle, table.rows.clone()) {
            let _ = self.drop_table(handle);
            return Err(e);
        }
        Ok(handle)
    }
}

struct StoredTable {
    schema: Schema,
    rows: Vec<Entity>,
    ids: HashSet<String>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<TableHandle, StoredTable>,
    edges: Vec<Edge>,
    edge_keys: HashSet<(String, String, String)>,
}

/// In-process entity store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    next: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

impl EntityStore for MemoryStore {
    fn create_table(&self, schema: &Schema) -> Result<TableHandle> {
        let handle = TableHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        let mut st = self.state.write();
        st.tables.insert(handle, StoredTable { schema: schema.clone(), rows: Vec::new(), ids: HashSet::new() });
        debug!(target: "huntflow::storage", "create_table: handle={} type='{}' attrs={}", handle, schema.entity_type, schema.attributes.len());
        Ok(handle)
    }

    fn append(&self, handle: TableHandle, mut rows: Vec<Entity>) -> Result<()> {
        let mut st = self.state.write();
        let table = st.tables.get_mut(&handle).ok_or_else(|| anyhow!("unknown table {}", handle))?;
        // Validate the whole batch before touching the table
        let mut batch_ids: HashSet<&str> = HashSet::new();
        for r in &rows {
            if r.id.is_empty() {
                bail!("row without identifier in append to {}", handle);
            }
            if table.ids.contains(&r.id) || !batch_ids.insert(r.id.as_str()) {
                bail!("duplicate row identifier '{}' in append to {}", r.id, handle);
            }
            if let Some(extra) = r.attributes.keys().find(|k| !table.schema.has(k)) {
                bail!("attribute '{}' is not part of the schema of {}", extra, handle);
            }
        }
        table.schema.conform(&mut rows);
        let n = rows.len();
        for r in rows {
            table.ids.insert(r.id.clone());
            table.rows.push(r);
        }
        crate::tprintln!("[storage.append] handle={} rows={} total={}", handle, n, table.rows.len());
        Ok(())
    }

    fn query(&self, handle: TableHandle, predicate: Option<RowPredicate<'_>>) -> Result<Vec<Entity>> {
        let st = self.state.read();
        let table = st.tables.get(&handle).ok_or_else(|| anyhow!("unknown table {}", handle))?;
        Ok(match predicate {
            Some(p) => table.rows.iter().filter(|r| p(r)).cloned().collect(),
            None => table.rows.clone(),
        })
    }

    fn describe(&self, handle: TableHandle) -> Result<Schema> {
        let st = self.state.read();
        st.tables.get(&handle).map(|t| t.schema.clone()).ok_or_else(|| anyhow!("unknown table {}", handle))
    }

    fn drop_table(&self, handle: TableHandle) -> Result<()> {
        let mut st = self.state.write();
        if st.tables.remove(&handle).is_some() {
            debug!(target: "huntflow::storage", "drop_table: handle={}", handle);
        }
        Ok(())
    }

    fn persist(&self, handle: TableHandle, target: &Path) -> Result<usize> {
        let table = self.table(handle)?;
        io::write_table(&table, target)?;
        debug!(target: "huntflow::storage", "persist: handle={} rows={} target='{}'", handle, table.len(), target.display());
        Ok(table.len())
    }

    fn load(&self, source: &Path, entity_type: Option<&str>) -> Result<EntityTable> {
        let table = io::read_table(source, entity_type)?;
        debug!(target: "huntflow::storage", "load: source='{}' type='{}' rows={}", source.display(), table.entity_type, table.len());
        Ok(table)
    }

    fn record_edges(&self, edges: &[Edge]) -> Result<()> {
        let mut st = self.state.write();
        for e in edges {
            let key = (e.relation.clone(), e.src.clone(), e.dst.clone());
            if st.edge_keys.insert(key) {
                st.edges.push(e.clone());
            }
        }
        Ok(())
    }

    fn edges(&self, relation: Option<&str>) -> Result<Vec<Edge>> {
        let st = self.state.read();
        Ok(match relation {
            Some(r) => st.edges.iter().filter(|e| e.relation == r).cloned().collect(),
            None => st.edges.clone(),
        })
    }

    fn table_count(&self) -> usize { self.state.read().tables.len() }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod storage_tests;
