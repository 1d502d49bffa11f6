//! SAVE, LOAD and NEW: moving tables between variables and files or inline literals.

use std::path::PathBuf;

use tracing::info;

use super::exec_common::ExecContext;
use crate::config::HuntConfig;
use crate::error::{HuntError, HuntResult};
use crate::storage::io::typed_records;
use crate::types::EntityTable;

/// File path for a SAVE/LOAD target. `file://` is optional; relative paths resolve
/// under the configured store root.
pub fn resolve_target(target: &str, config: &HuntConfig) -> PathBuf {
    let p = PathBuf::from(target.strip_prefix("file://").unwrap_or(target));
    if p.is_absolute() { p } else { config.store_root.join(p) }
}

pub fn exec_save(ctx: &mut ExecContext<'_>, input: Option<&str>, target: &str) -> HuntResult<()> {
    let v = ctx.variable(input)?;
    let path = resolve_target(target, ctx.config);
    let n = ctx.store.persist(v.handle, &path).map_err(HuntError::store)?;
    info!(target: "huntflow::exec", "saved '{}' ({} rows) to '{}'", v.name, n, path.display());
    ctx.tx.notes.push(format!("saved {} rows of '{}' to {}", n, v.name, path.display()));
    Ok(())
}

pub fn exec_load(ctx: &mut ExecContext<'_>, target: &str, entity_type: Option<&str>) -> HuntResult<()> {
    let path = resolve_target(target, ctx.config);
    let table = ctx.store.load(&path, entity_type).map_err(HuntError::store)?;
    let name = ctx.output_name();
    ctx.materialize(&name, table, Vec::new(), vec![path.display().to_string()])
}

/// Inline records. Bare strings become `{"value": ...}` records. Without an explicit
/// type the records' uniform `type` field names it; otherwise the table is generic.
pub fn exec_new(ctx: &mut ExecContext<'_>, entity_type: Option<&str>, records: &[serde_json::Value]) -> HuntResult<()> {
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|r| match r {
            serde_json::Value::String(s) => serde_json::json!({ "value": s }),
            other => other.clone(),
        })
        .collect();
    let (ty, rows) = typed_records(entity_type, &items).map_err(|e| HuntError::semantic(format!("NEW: {:#}", e)))?;
    let name = ctx.output_name();
    ctx.materialize(&name, EntityTable::new(ty, rows), Vec::new(), Vec::new())
}
