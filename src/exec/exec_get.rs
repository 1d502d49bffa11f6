//! GET: fetch entities of one type by pattern from connectors, bundle files or bound
//! variables.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::exec_common::{check_pattern_types, union_rows, ExecContext, PendingConnector};
use super::exec_eval::{check_type_prefixes, CompiledPattern};
use crate::error::{HuntError, HuntResult};
use crate::federation::{BundleConnector, ConnectorQuery, RegisteredConnector};
use crate::schema::{unify, Schema};
use crate::syntax::{Pattern, Source, TimeSpec};
use crate::types::{EntityTable, TimeWindow};
use crate::vars::{VarId, Variable};

/// Resolved `FROM` list.
#[derive(Default)]
struct Sources<'a> {
    connectors: Vec<RegisteredConnector>,
    variables: Vec<&'a Variable>,
}

fn bundle_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.trim_start_matches("file://"))
}

fn resolve_sources<'a>(ctx: &mut ExecContext<'a>, entity_type: &str, sources: &[Source]) -> HuntResult<Sources<'a>> {
    let mut out = Sources::default();
    if sources.is_empty() {
        out.connectors = ctx.connectors.for_type(entity_type);
        let pending = ctx.tx.connectors.iter().filter(|c| c.capabilities.supports(entity_type));
        out.connectors.extend(pending.map(|c| RegisteredConnector { name: c.name.clone(), capabilities: c.capabilities.clone(), client: Arc::clone(&c.client) }));
        return Ok(out);
    }
    for src in sources {
        match src {
            Source::Uri(uri) => {
                let registered = ctx.connectors.get(uri).cloned().or_else(|| {
                    let (_, rest) = uri.split_once("://")?;
                    ctx.connectors.get(rest).cloned()
                });
                let connector = match registered {
                    Some(c) => c,
                    None if uri.starts_with("file://") => open_bundle(ctx, uri)?,
                    None => return Err(HuntError::semantic(format!("unknown data source '{}'", uri))),
                };
                out.connectors.push(connector);
            }
            Source::Name(name) => {
                if let Some(c) = ctx.connectors.get(name) {
                    out.connectors.push(c.clone());
                } else if ctx.vars.contains(name) {
                    let v = ctx.variable(Some(name))?;
                    if v.entity_type() != entity_type {
                        return Err(HuntError::type_mismatch(format!(
                            "variable '{}' holds '{}', not '{}'",
                            name,
                            v.entity_type(),
                            entity_type
                        )));
                    }
                    out.variables.push(v);
                } else {
                    return Err(HuntError::semantic(format!("unknown data source '{}': not a connector or a variable", name)));
                }
            }
        }
    }
    for c in &out.connectors {
        if !c.capabilities.supports(entity_type) {
            return Err(HuntError::no_connector(format!("connector '{}' does not support entity type '{}'", c.name, entity_type)));
        }
    }
    Ok(out)
}

/// Open a `file://` bundle as an ad-hoc connector for this statement.
fn open_bundle(ctx: &mut ExecContext<'_>, uri: &str) -> HuntResult<RegisteredConnector> {
    if let Some(p) = ctx.tx.connectors.iter().find(|c| c.name == uri) {
        return Ok(RegisteredConnector { name: p.name.clone(), capabilities: p.capabilities.clone(), client: Arc::clone(&p.client) });
    }
    let bundle = BundleConnector::open(&bundle_path(uri))
        .map_err(|e| HuntError::semantic(format!("cannot open data source '{}': {:#}", uri, e)))?
        .with_time_attributes(ctx.config.time_attributes.clone());
    let capabilities = bundle.capabilities();
    let client: Arc<dyn crate::federation::Connector> = Arc::new(bundle);
    ctx.tx.connectors.push(PendingConnector { name: uri.to_string(), capabilities: capabilities.clone(), client: Arc::clone(&client) });
    debug!(target: "huntflow::exec", "opened bundle source '{}'", uri);
    Ok(RegisteredConnector { name: uri.to_string(), capabilities, client })
}

pub async fn exec_get(
    ctx: &mut ExecContext<'_>,
    entity_type: &str,
    sources: &[Source],
    pattern: Option<&Pattern>,
    window: &Option<TimeSpec>,
    limit: Option<usize>,
) -> HuntResult<()> {
    if limit == Some(0) {
        return Err(HuntError::semantic("LIMIT must be at least 1"));
    }
    let resolved = resolve_sources(ctx, entity_type, sources)?;
    let (pattern, mut lineage): (Option<Pattern>, Vec<VarId>) = match pattern {
        Some(p) => {
            check_type_prefixes(p, entity_type)?;
            let (p, l) = ctx.resolve_pattern(p)?;
            (Some(p), l)
        }
        None => (None, Vec::new()),
    };
    let compiled = pattern.as_ref().map(CompiledPattern::compile).transpose()?;
    let window: Option<TimeWindow> = ctx.window(window)?;

    let mut parts: Vec<EntityTable> = Vec::new();
    let mut source_names: Vec<String> = Vec::new();
    for v in &resolved.variables {
        let table = ctx.table_of(v)?;
        if let Some(p) = &pattern {
            check_pattern_types(p, &table.schema)?;
        }
        let rows = table
            .rows
            .into_iter()
            .filter(|e| compiled.as_ref().map(|c| c.matches(e)).unwrap_or(true))
            .filter(|e| window.map(|w| w.admits(e, &ctx.config.time_attributes)).unwrap_or(true))
            .collect();
        parts.push(EntityTable::with_schema(table.schema, rows));
        if !lineage.contains(&v.id) {
            lineage.push(v.id);
        }
        source_names.push(v.name.clone());
    }

    if !resolved.connectors.is_empty() || resolved.variables.is_empty() {
        let query = ConnectorQuery { entity_type: entity_type.to_string(), pattern: pattern.clone(), window, limit };
        let fetched = ctx.federation.fetch(&query, &resolved.connectors).await?;
        ctx.tx.warnings.extend(fetched.report.warnings.iter().cloned());
        ctx.tx.edges.extend(fetched.edges);
        source_names.extend(resolved.connectors.iter().map(|c| c.name.clone()));
        ctx.tx.report = Some(fetched.report);
        parts.push(fetched.table);
    }

    let table = if parts.len() == 1 {
        parts.remove(0)
    } else {
        let schemas: Vec<Schema> = parts.iter().map(|p| p.schema.clone()).collect();
        let unified = unify(&schemas);
        ctx.tx.warnings.extend(unified.warnings.iter().map(|w| w.to_string()));
        let mut schema = unified.schema;
        schema.entity_type = entity_type.to_string();
        let mut rows = union_rows(&parts);
        schema.conform(&mut rows);
        EntityTable::with_schema(schema, rows)
    };
    let mut table = table;
    if let Some(limit) = limit {
        table.rows.truncate(limit);
    }
    table.entity_type = entity_type.to_string();
    table.schema.entity_type = entity_type.to_string();
    let name = ctx.output_name();
    ctx.materialize(&name, table, lineage, source_names)
}
