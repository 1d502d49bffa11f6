//! APPLY: run an analytics module over one or more variables and bind its outputs.

use std::collections::BTreeMap;

use super::exec_common::ExecContext;
use crate::analytics::invoke;
use crate::error::{HuntError, HuntResult};
use crate::types::{EntityTable, Value};
use crate::vars::VarId;

/// Names the outputs bind to. With an assignment the first output takes the target
/// name and the rest `target_<output>`; without one, outputs replace their inputs in
/// order and any extra output binds under its own name.
pub fn output_names(target: Option<&str>, inputs: &[String], outputs: &[String]) -> Vec<String> {
    outputs
        .iter()
        .enumerate()
        .map(|(i, out)| match target {
            Some(t) if i == 0 => t.to_string(),
            Some(t) => format!("{}_{}", t, out),
            None => inputs.get(i).cloned().unwrap_or_else(|| out.clone()),
        })
        .collect()
}

pub async fn exec_apply(ctx: &mut ExecContext<'_>, module: &str, inputs: &[String], params: &[(String, Value)]) -> HuntResult<()> {
    let registered = ctx.modules.get(module).ok_or_else(|| HuntError::semantic(format!("unknown analytics module '{}'", module)))?;
    let mut tables: Vec<(String, EntityTable)> = Vec::with_capacity(inputs.len());
    let mut lineage: Vec<VarId> = Vec::new();
    for name in inputs {
        let v = ctx.variable(Some(name))?;
        tables.push((name.clone(), ctx.table_of(v)?));
        if !lineage.contains(&v.id) {
            lineage.push(v.id);
        }
    }
    let params: BTreeMap<String, Value> = params.iter().cloned().collect();
    let invocation = invoke(registered, tables, params, ctx.config.analytics_timeout()).await?;

    let declared: Vec<String> = invocation.outputs.iter().map(|(spec, _)| spec.name.clone()).collect();
    let names = output_names(ctx.statement.statement.output.as_deref(), inputs, &declared);
    ctx.tx.notes.push(format!("module '{}' finished in {} ms", module, invocation.elapsed.as_millis()));
    for (name, (_, table)) in names.iter().zip(invocation.outputs) {
        ctx.materialize(name, table, lineage.clone(), vec![format!("module:{}", module)])?;
    }
    Ok(())
}
