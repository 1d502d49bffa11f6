//! Shared planning and execution helpers: the per-statement context and transaction,
//! operand resolution, pattern type checks, local refinement (filter, sort, project,
//! page) and materialization of result tables.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::exec_eval::{check_type_prefixes, CompiledPattern};
use crate::analytics::ModuleRegistry;
use crate::config::{HuntConfig, SortOrder};
use crate::display::Display;
use crate::error::{HuntError, HuntResult};
use crate::federation::{Connector, ConnectorCapabilities, ConnectorRegistry, FederationEngine, FetchReport};
use crate::schema::Schema;
use crate::storage::{EntityStore, TableHandle};
use crate::syntax::{CompOp, Comparison, Operand, ParsedStatement, Pattern, Refinement, SortKey, TimeSpec};
use crate::types::{AttrType, Edge, Entity, EntityTable, TimeWindow, Value};
use crate::vars::{Birth, PendingBinding, VarId, Variable, VariableManager};

/// A connector opened while planning a statement (e.g. a `file://` bundle); it joins
/// the session registry only if the statement commits.
pub struct PendingConnector {
    pub name: String,
    pub capabilities: ConnectorCapabilities,
    pub client: Arc<dyn Connector>,
}

/// Everything a statement produces. Nothing here touches the session until commit; on
/// failure the created tables are dropped and the rest is discarded.
#[derive(Default)]
pub struct StatementTx {
    pub created: Vec<TableHandle>,
    pub bindings: Vec<PendingBinding>,
    pub edges: Vec<Edge>,
    pub connectors: Vec<PendingConnector>,
    pub warnings: Vec<String>,
    pub display: Option<Display>,
    pub report: Option<FetchReport>,
    pub notes: Vec<String>,
}

pub struct ExecContext<'a> {
    pub config: &'a HuntConfig,
    pub vars: &'a VariableManager,
    pub store: &'a dyn EntityStore,
    pub connectors: &'a ConnectorRegistry,
    pub modules: &'a ModuleRegistry,
    pub federation: &'a FederationEngine,
    pub statement: &'a ParsedStatement,
    pub now: DateTime<Utc>,
    pub tx: StatementTx,
}

impl<'a> ExecContext<'a> {
    /// Name the statement binds: the assignment target or the default variable.
    pub fn output_name(&self) -> String {
        self.statement.statement.output.clone().unwrap_or_else(|| self.config.default_variable.clone())
    }

    /// Resolve an operand variable; `None` means the default variable.
    pub fn variable(&self, name: Option<&str>) -> HuntResult<&'a Variable> {
        let vars: &'a VariableManager = self.vars;
        vars.resolve(name.unwrap_or(&self.config.default_variable))
    }

    pub fn table_of(&self, var: &Variable) -> HuntResult<EntityTable> {
        let mut t = self.store.table(var.handle).map_err(HuntError::store)?;
        // The variable's schema is authoritative (it survives projections)
        t.schema = var.schema.clone();
        t.entity_type = var.schema.entity_type.clone();
        Ok(t)
    }

    pub fn window(&self, spec: &Option<TimeSpec>) -> HuntResult<Option<TimeWindow>> {
        spec.as_ref().map(|s| s.resolve(self.now, self.config.window_granularity_secs)).transpose()
    }

    pub fn birth(&self, sources: Vec<String>) -> Birth {
        Birth {
            command: self.statement.statement.command.keyword().to_string(),
            statement: self.statement.text.clone(),
            sources,
        }
    }

    /// Replace `var.attr` operands with the distinct values of that attribute. Returns
    /// the rewritten pattern and the variables it read.
    pub fn resolve_pattern(&self, pattern: &Pattern) -> HuntResult<(Pattern, Vec<VarId>)> {
        let mut lineage: Vec<VarId> = Vec::new();
        let resolved = pattern.try_map(&mut |c: &Comparison| -> HuntResult<Comparison> {
            let Operand::Ref { var, attr } = &c.operand else { return Ok(c.clone()) };
            let v = self.vars.resolve(var)?;
            if !v.schema.attributes.is_empty() && !v.schema.has(attr) {
                return Err(HuntError::semantic(format!("variable '{}' has no attribute '{}'", var, attr)));
            }
            let op = match c.op {
                CompOp::Eq | CompOp::In => CompOp::In,
                CompOp::Ne | CompOp::NotIn => CompOp::NotIn,
                other => {
                    return Err(HuntError::semantic(format!("{} cannot take the variable reference {}.{}", other.as_str(), var, attr)));
                }
            };
            let values = self.table_of(v)?.distinct_values(attr);
            if !lineage.contains(&v.id) {
                lineage.push(v.id);
            }
            Ok(Comparison { attr: c.attr.clone(), type_prefix: c.type_prefix.clone(), op, operand: Operand::List(values) })
        })?;
        Ok((resolved, lineage))
    }

    /// Store `table` and queue its binding under `name`.
    pub fn materialize(&mut self, name: &str, table: EntityTable, lineage: Vec<VarId>, sources: Vec<String>) -> HuntResult<()> {
        let handle = self.store.create_with_rows(&table).map_err(HuntError::store)?;
        self.tx.created.push(handle);
        debug!(target: "huntflow::exec", "materialize: name='{}' type='{}' rows={} handle={}", name, table.entity_type, table.len(), handle);
        let birth = self.birth(sources);
        self.tx.bindings.push(PendingBinding {
            name: name.to_string(),
            handle,
            schema: table.schema,
            row_count: table.rows.len(),
            lineage,
            birth,
        });
        Ok(())
    }
}

/// Reject comparisons that can never hold for the attribute's known type: ordering
/// comparisons between a numeric or timestamp attribute and a literal of another kind.
pub fn check_pattern_types(pattern: &Pattern, schema: &Schema) -> HuntResult<()> {
    check_type_prefixes(pattern, &schema.entity_type)?;
    for c in pattern.comparisons() {
        if !matches!(c.op, CompOp::Lt | CompOp::Le | CompOp::Gt | CompOp::Ge) {
            continue;
        }
        let (Some(ty), Operand::Value(v)) = (schema.type_of(&c.attr), &c.operand) else { continue };
        let ok = match ty {
            AttrType::Int | AttrType::Float => v.as_f64().is_some() || v.as_str().map(|s| s.trim().parse::<f64>().is_ok()).unwrap_or(false),
            AttrType::Time => matches!(v, Value::Time(_)) || v.as_str().and_then(crate::types::parse_timestamp).is_some(),
            AttrType::Str => !matches!(v, Value::Bool(_) | Value::List(_)),
            _ => true,
        };
        if !ok {
            return Err(HuntError::type_mismatch(format!("cannot compare {} attribute '{}' with {} {}", ty, c.attr, v.attr_type(), v)));
        }
    }
    Ok(())
}

/// Check that every attribute named in `attrs` exists. Tables whose schema is empty
/// (no rows were ever seen) accept any name.
pub fn check_attributes<'s, I>(schema: &Schema, attrs: I, what: &str) -> HuntResult<()>
where
    I: IntoIterator<Item = &'s str>,
{
    if schema.attributes.is_empty() {
        return Ok(());
    }
    for a in attrs {
        if a != "*" && !schema.has(a) {
            return Err(HuntError::semantic(format!("{}: '{}' has no attribute '{}'", what, schema.entity_type, a)));
        }
    }
    Ok(())
}

/// Stable sort by one attribute. Nulls sort last in both directions; ties keep
/// row-identifier order.
pub fn sort_rows(rows: &mut [Entity], attr: &str, order: SortOrder) {
    rows.sort_by(|a, b| {
        let (va, vb) = (a.value_of(attr), b.value_of(attr));
        let primary = match (va.is_null(), vb.is_null()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => {
                let o = va.cmp_total(&vb);
                if order.is_ascending() { o } else { o.reverse() }
            }
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
}

pub fn sort_order(key: &SortKey, config: &HuntConfig) -> SortOrder { key.order.unwrap_or(config.default_sort_order) }

/// Apply WHERE, SORT BY, OFFSET/LIMIT and ATTR to a table, in that order.
pub fn refine(table: EntityTable, r: &Refinement, config: &HuntConfig) -> HuntResult<EntityTable> {
    let EntityTable { entity_type, mut schema, mut rows } = table;
    if let Some(p) = &r.pattern {
        check_pattern_types(p, &schema)?;
        let attrs: Vec<&str> = p.comparisons().into_iter().map(|c| c.attr.as_str()).collect();
        check_attributes(&schema, attrs, "WHERE")?;
        let compiled = CompiledPattern::compile(p)?;
        rows.retain(|e| compiled.matches(e));
    }
    if let Some(key) = &r.sort {
        check_attributes(&schema, [key.attr.as_str()], "SORT BY")?;
        sort_rows(&mut rows, &key.attr, sort_order(key, config));
    }
    let offset = r.offset.unwrap_or(0);
    if offset > 0 {
        rows = rows.into_iter().skip(offset).collect();
    }
    if let Some(limit) = r.limit {
        rows.truncate(limit);
    }
    if let Some(attrs) = &r.attrs {
        check_attributes(&schema, attrs.iter().map(|s| s.as_str()), "ATTR")?;
        let keep: Vec<String> = attrs.iter().filter(|a| a.as_str() != "id" && a.as_str() != "*").cloned().collect();
        if !attrs.iter().any(|a| a == "*") {
            schema = schema.project(&keep);
            for row in rows.iter_mut() {
                row.attributes.retain(|k, _| keep.contains(k));
            }
        }
    }
    schema.entity_type = entity_type.clone();
    Ok(EntityTable { entity_type, schema, rows })
}

/// Rows whose id is in `ids`, in table order.
pub fn rows_with_ids(table: &EntityTable, ids: &std::collections::HashSet<String>) -> Vec<Entity> {
    table.rows.iter().filter(|r| ids.contains(&r.id)).cloned().collect()
}

/// Key used to match attribute values across tables: numbers compare numerically,
/// everything else by canonical text. Nulls never match.
pub fn match_key(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Int(_) | Value::Float(_) => v.as_f64().map(|f| format!("n:{}", f)),
        other => Some(format!("{:?}:{}", other.attr_type(), other.render())),
    }
}

/// Union of rows by id, first occurrence wins and later ones fill its nulls.
pub fn union_rows(tables: &[EntityTable]) -> Vec<Entity> {
    let mut out: Vec<Entity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for t in tables {
        for r in &t.rows {
            match index.get(&r.id) {
                Some(&i) => out[i].absorb(r),
                None => {
                    index.insert(r.id.clone(), out.len());
                    out.push(r.clone());
                }
            }
        }
    }
    out
}
