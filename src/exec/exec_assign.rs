//! Variable-to-variable statements: plain assignment, the filter/projection form
//! (`v = a WHERE … ATTR …`) and merge (`v = a + b`).

use super::exec_common::{refine, union_rows, ExecContext};
use crate::error::{HuntError, HuntResult};
use crate::schema::{compatible, unify, Schema};
use crate::syntax::Refinement;
use crate::types::{EntityTable, GENERIC_ENTITY_TYPE};
use crate::vars::VarId;

/// `v = a`: bind a new name to the same rows.
pub fn exec_assign(ctx: &mut ExecContext<'_>, input: &str) -> HuntResult<()> {
    let v = ctx.variable(Some(input))?;
    let table = ctx.table_of(v)?;
    let name = ctx.output_name();
    ctx.materialize(&name, table, vec![v.id], Vec::new())
}

pub fn exec_transform(ctx: &mut ExecContext<'_>, input: &str, r: &Refinement) -> HuntResult<()> {
    let v = ctx.variable(Some(input))?;
    let table = ctx.table_of(v)?;
    let mut lineage: Vec<VarId> = vec![v.id];
    let mut r = r.clone();
    if let Some(p) = &r.pattern {
        super::exec_eval::check_type_prefixes(p, v.entity_type())?;
        let (p, refs) = ctx.resolve_pattern(p)?;
        for id in refs {
            if !lineage.contains(&id) {
                lineage.push(id);
            }
        }
        r.pattern = Some(p);
    }
    let out = refine(table, &r, ctx.config)?;
    let name = ctx.output_name();
    ctx.materialize(&name, out, lineage, Vec::new())
}

pub fn exec_merge(ctx: &mut ExecContext<'_>, inputs: &[String]) -> HuntResult<()> {
    let mut tables: Vec<EntityTable> = Vec::with_capacity(inputs.len());
    let mut lineage: Vec<VarId> = Vec::new();
    for name in inputs {
        let v = ctx.variable(Some(name))?;
        if let Some(first) = tables.first() {
            if !compatible(&first.entity_type, v.entity_type()) {
                return Err(HuntError::type_mismatch(format!(
                    "cannot merge '{}' ({}) into '{}' ({})",
                    name,
                    v.entity_type(),
                    inputs[0],
                    first.entity_type
                )));
            }
        }
        tables.push(ctx.table_of(v)?);
        if !lineage.contains(&v.id) {
            lineage.push(v.id);
        }
    }
    let schemas: Vec<Schema> = tables.iter().map(|t| t.schema.clone()).collect();
    let unified = unify(&schemas);
    ctx.tx.warnings.extend(unified.warnings.iter().map(|w| w.to_string()));
    let mut schema = unified.schema;
    // Compatible but distinct types (e.g. file + directory) keep the first concrete one
    if schema.entity_type == GENERIC_ENTITY_TYPE {
        if let Some(t) = tables.iter().find(|t| t.entity_type != GENERIC_ENTITY_TYPE) {
            schema.entity_type = t.entity_type.clone();
        }
    }
    let mut rows = union_rows(&tables);
    schema.conform(&mut rows);
    let name = ctx.output_name();
    ctx.materialize(&name, EntityTable::with_schema(schema, rows), lineage, Vec::new())
}
