//! FIND: follow relationships between entities.
//!
//! Edges come from the store (recorded by earlier fetches), from the built-in reference
//! rules, and from connectors that declare the relation. The pair form keeps the rows of
//! the target variable reached from the source variable; the centered form searches the
//! session's variables of the requested type.

use std::collections::HashSet;

use super::exec_common::{check_pattern_types, rows_with_ids, union_rows, ExecContext};
use super::exec_eval::{check_type_prefixes, CompiledPattern};
use super::relations::{is_builtin, rule_connects, rule_edges, LINKED};
use crate::error::{HuntError, HuntResult};
use crate::federation::{FetchReport, RelationQuery};
use crate::schema::{unify, Schema};
use crate::syntax::{Pattern, TimeSpec};
use crate::types::{Edge, EntityTable, TimeWindow};
use crate::vars::{VarId, Variable};

/// Relation names must be defined somewhere before any lookup is attempted.
fn check_relation_known(ctx: &ExecContext<'_>, relation: &str) -> HuntResult<bool> {
    if is_builtin(relation) || ctx.connectors.declares_relation(relation) {
        return Ok(true);
    }
    let recorded = !ctx.store.edges(Some(relation)).map_err(HuntError::store)?.is_empty();
    if recorded {
        return Ok(false);
    }
    Err(HuntError::semantic(format!("unknown relation '{}'", relation)))
}

fn edge_matches(e: &Edge, relation: &str, window: Option<TimeWindow>) -> bool {
    (relation == LINKED || e.relation == relation)
        && match (window, e.observed_at) {
            (Some(w), Some(t)) => w.contains(&t),
            _ => true,
        }
}

/// All edges of `relation` between `src` and `dst` known to the session, including
/// those the current statement is about to record.
async fn collect_edges(
    ctx: &mut ExecContext<'_>,
    relation: &str,
    src: &EntityTable,
    dst: &EntityTable,
    window: Option<TimeWindow>,
) -> HuntResult<Vec<Edge>> {
    let mut edges: Vec<Edge> = ctx
        .store
        .edges(if relation == LINKED { None } else { Some(relation) })
        .map_err(HuntError::store)?;
    edges.extend(ctx.tx.edges.iter().cloned());
    edges.extend(rule_edges(relation, src, dst));
    let connectors = ctx.connectors.for_relation(relation);
    if !connectors.is_empty() && !src.is_empty() {
        let query = RelationQuery { relation: relation.to_string(), entity_ids: src.ids().into_iter().map(String::from).collect(), window };
        let (found, outcomes) = ctx.federation.fetch_edges(&query, &connectors).await;
        let report = FetchReport { entity_type: dst.entity_type.clone(), outcomes, warnings: Vec::new() };
        for c in report.degraded_connectors() {
            ctx.tx.warnings.push(format!("connector '{}' could not answer relation '{}'; results may be incomplete", c, relation));
        }
        ctx.tx.edges.extend(found.iter().cloned());
        edges.extend(found);
        ctx.tx.report = Some(report);
    }
    edges.retain(|e| edge_matches(e, relation, window));
    Ok(edges)
}

/// Ids in `dst` reached from ids in `src`; `linked` follows edges either way.
fn reached(edges: &[Edge], relation: &str, src: &EntityTable, dst: &EntityTable) -> HashSet<String> {
    let src_ids: HashSet<&str> = src.rows.iter().map(|r| r.id.as_str()).collect();
    let dst_ids: HashSet<&str> = dst.rows.iter().map(|r| r.id.as_str()).collect();
    let mut out = HashSet::new();
    for e in edges {
        if src_ids.contains(e.src.as_str()) && dst_ids.contains(e.dst.as_str()) {
            out.insert(e.dst.clone());
        }
        if relation == LINKED && src_ids.contains(e.dst.as_str()) && dst_ids.contains(e.src.as_str()) {
            out.insert(e.src.clone());
        }
    }
    out
}

/// Types of a rule-only relation must be connectable by some rule.
fn check_types(relation: &str, builtin_only: bool, src: &str, dst: &str) -> HuntResult<()> {
    if builtin_only && !rule_connects(relation, src, dst) {
        return Err(HuntError::type_mismatch(format!("relation '{}' does not connect '{}' to '{}'", relation, src, dst)));
    }
    Ok(())
}

pub async fn exec_find_between(ctx: &mut ExecContext<'_>, relation: &str, from: &str, to: &str, window: &Option<TimeSpec>) -> HuntResult<()> {
    let a = ctx.variable(Some(from))?;
    let b = ctx.variable(Some(to))?;
    let declared = check_relation_known(ctx, relation)?;
    let builtin_only = declared && !ctx.connectors.declares_relation(relation) && ctx.store.edges(Some(relation)).map_err(HuntError::store)?.is_empty();
    check_types(relation, builtin_only && relation != LINKED, a.entity_type(), b.entity_type())?;
    let window = ctx.window(window)?;
    let src = ctx.table_of(a)?;
    let dst = ctx.table_of(b)?;
    let rows = if src.is_empty() || dst.is_empty() {
        Vec::new()
    } else {
        let edges = collect_edges(ctx, relation, &src, &dst, window).await?;
        rows_with_ids(&dst, &reached(&edges, relation, &src, &dst))
    };
    let table = EntityTable::with_schema(dst.schema.clone(), rows);
    let name = ctx.output_name();
    ctx.materialize(&name, table, vec![a.id, b.id], Vec::new())
}

/// Bound variables holding `entity_type`, in binding order.
fn variables_of_type<'a>(ctx: &ExecContext<'a>, entity_type: &str) -> Vec<&'a Variable> {
    let vars: &'a crate::vars::VariableManager = ctx.vars;
    vars.list().into_iter().filter(|v| v.entity_type() == entity_type).collect()
}

#[allow(clippy::too_many_arguments)]
pub async fn exec_find_related(
    ctx: &mut ExecContext<'_>,
    entity_type: &str,
    relation: &str,
    reversed: bool,
    input: &str,
    pattern: Option<&Pattern>,
    window: &Option<TimeSpec>,
    limit: Option<usize>,
) -> HuntResult<()> {
    if limit == Some(0) {
        return Err(HuntError::semantic("LIMIT must be at least 1"));
    }
    let center = ctx.variable(Some(input))?;
    let declared = check_relation_known(ctx, relation)?;
    let builtin_only = declared && !ctx.connectors.declares_relation(relation) && ctx.store.edges(Some(relation)).map_err(HuntError::store)?.is_empty();
    // Without BY the found entities are the edge sources: `FIND process created x`
    let (src_ty, dst_ty) = if reversed { (center.entity_type(), entity_type) } else { (entity_type, center.entity_type()) };
    check_types(relation, builtin_only && relation != LINKED, src_ty, dst_ty)?;
    let (pattern, mut lineage): (Option<Pattern>, Vec<VarId>) = match pattern {
        Some(p) => {
            check_type_prefixes(p, entity_type)?;
            let (p, l) = ctx.resolve_pattern(p)?;
            (Some(p), l)
        }
        None => (None, Vec::new()),
    };
    let compiled = pattern.as_ref().map(CompiledPattern::compile).transpose()?;
    let window = ctx.window(window)?;

    let mut candidates: Vec<EntityTable> = Vec::new();
    for v in variables_of_type(ctx, entity_type) {
        candidates.push(ctx.table_of(v)?);
        if !lineage.contains(&v.id) {
            lineage.push(v.id);
        }
    }
    if !lineage.contains(&center.id) {
        lineage.insert(0, center.id);
    }
    let schemas: Vec<Schema> = candidates.iter().map(|t| t.schema.clone()).collect();
    let mut schema = unify(&schemas).schema;
    schema.entity_type = entity_type.to_string();
    let mut pool_rows = union_rows(&candidates);
    schema.conform(&mut pool_rows);
    let pool = EntityTable::with_schema(schema, pool_rows);
    if let Some(p) = &pattern {
        check_pattern_types(p, &pool.schema)?;
    }

    let center_table = ctx.table_of(center)?;
    let mut rows = if pool.is_empty() || center_table.is_empty() {
        Vec::new()
    } else if reversed {
        let edges = collect_edges(ctx, relation, &center_table, &pool, window).await?;
        rows_with_ids(&pool, &reached(&edges, relation, &center_table, &pool))
    } else {
        let edges = collect_edges(ctx, relation, &pool, &center_table, window).await?;
        // sources of edges into the center
        let flipped: Vec<Edge> = edges.into_iter().map(|e| Edge { relation: e.relation, src: e.dst, dst: e.src, observed_at: e.observed_at }).collect();
        rows_with_ids(&pool, &reached(&flipped, relation, &center_table, &pool))
    };
    if let Some(c) = &compiled {
        rows.retain(|e| c.matches(e));
    }
    if let Some(w) = window {
        rows.retain(|e| w.admits(e, &ctx.config.time_attributes));
    }
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    let table = EntityTable::with_schema(pool.schema.clone(), rows);
    let name = ctx.output_name();
    ctx.materialize(&name, table, lineage, Vec::new())
}
