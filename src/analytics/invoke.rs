//! Running a module: input checks before launch, bounded execution on a blocking
//! thread, output validation after.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::module::{AnalyticsInput, CancelFlag, OutputSpec, RegisteredModule};
use crate::error::{HuntError, HuntResult};
use crate::types::{EntityTable, Value, GENERIC_ENTITY_TYPE};

/// Validated module result: one table per declared output, in declaration order.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub module: String,
    pub outputs: Vec<(OutputSpec, EntityTable)>,
    pub elapsed: Duration,
}

/// Check `inputs` against the module's requirement, run it under `timeout` (or the
/// module's own), and validate the returned tables. Schema problems fail with
/// `SchemaMismatch` before the executor is called; everything after launch fails with
/// `Analytics`.
pub async fn invoke(
    module: &RegisteredModule,
    inputs: Vec<(String, EntityTable)>,
    params: BTreeMap<String, Value>,
    timeout: Duration,
) -> HuntResult<Invocation> {
    let desc = &module.descriptor;
    desc.input.check_arity(&desc.name, inputs.len())?;
    for (var, table) in &inputs {
        desc.input.check(&desc.name, var, &table.schema)?;
    }

    let timeout = desc.timeout.unwrap_or(timeout);
    let cancel = CancelFlag::new();
    let executor = module.executor.clone();
    let input = AnalyticsInput { tables: inputs, params };
    let flag = cancel.clone();
    let started = Instant::now();
    debug!(target: "huntflow::analytics", "invoke: module='{}' inputs={} timeout_ms={}", desc.name, input.tables.len(), timeout.as_millis());
    let task = tokio::task::spawn_blocking(move || executor.execute(&input, &flag));

    let output = match tokio::time::timeout(timeout, task).await {
        Err(_) => {
            cancel.cancel();
            warn!(target: "huntflow::analytics", "module '{}' timed out after {} ms", desc.name, timeout.as_millis());
            return Err(HuntError::analytics(&desc.name, format!("timed out after {} ms", timeout.as_millis())));
        }
        Ok(Err(join)) => return Err(HuntError::analytics(&desc.name, format!("executor aborted: {}", join))),
        Ok(Ok(Err(e))) => return Err(HuntError::analytics(&desc.name, format!("{:#}", e))),
        Ok(Ok(Ok(out))) => out,
    };

    let mut produced = output.tables;
    let mut outputs = Vec::with_capacity(desc.outputs.len());
    for spec in &desc.outputs {
        let mut table = produced
            .remove(&spec.name)
            .ok_or_else(|| HuntError::analytics(&desc.name, format!("declared output '{}' was not produced", spec.name)))?;
        if let Some(ty) = &spec.entity_type {
            if table.entity_type == GENERIC_ENTITY_TYPE {
                table.entity_type = ty.clone();
                table.schema.entity_type = ty.clone();
            } else if &table.entity_type != ty {
                return Err(HuntError::analytics(
                    &desc.name,
                    format!("output '{}' holds '{}' but '{}' was declared", spec.name, table.entity_type, ty),
                ));
            }
        }
        if let Some(missing) = spec.required_attributes.iter().find(|a| !table.schema.has(a)) {
            return Err(HuntError::analytics(&desc.name, format!("output '{}' lacks required attribute '{}'", spec.name, missing)));
        }
        outputs.push((spec.clone(), table));
    }
    if !produced.is_empty() {
        let extra: Vec<String> = produced.into_keys().collect();
        debug!(target: "huntflow::analytics", "module '{}' returned undeclared outputs {:?}; ignored", desc.name, extra);
    }
    Ok(Invocation { module: desc.name.clone(), outputs, elapsed: started.elapsed() })
}
