//! Module descriptors, the executor contract and the module registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::error::{HuntError, HuntResult};
use crate::schema::Schema;
use crate::types::{AttrType, EntityTable, Value};

/// Raised by the caller when the invocation deadline passes. Executors doing long work
/// should poll it and stop early.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst) }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// What the executor receives: owned copies of the input tables keyed by variable name,
/// in operand order, plus the `WITH` parameters.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsInput {
    pub tables: Vec<(String, EntityTable)>,
    pub params: BTreeMap<String, Value>,
}

/// Tables produced by a module, keyed by declared output name.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsOutput {
    pub tables: BTreeMap<String, EntityTable>,
}

impl AnalyticsOutput {
    pub fn with(mut self, name: impl Into<String>, table: EntityTable) -> Self {
        self.tables.insert(name.into(), table);
        self
    }
}

/// Synchronous module execution. The isolation mechanism (in-process, subprocess,
/// container) lives behind this trait; the caller imposes the timeout.
pub trait AnalyticsExecutor: Send + Sync {
    fn execute(&self, input: &AnalyticsInput, cancel: &CancelFlag) -> Result<AnalyticsOutput>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputRequirement {
    /// Number of input variables; 0 accepts any non-empty list.
    pub arity: usize,
    /// Accepted entity types, or any when `None`.
    pub entity_types: Option<Vec<String>>,
    /// Attributes every input must carry, optionally with a required type.
    pub required_attributes: Vec<(String, Option<AttrType>)>,
}

impl Default for InputRequirement {
    fn default() -> Self { Self { arity: 1, entity_types: None, required_attributes: Vec::new() } }
}

impl InputRequirement {
    pub fn any() -> Self { Self { arity: 0, ..Default::default() } }

    pub fn of_type(entity_type: &str) -> Self { Self { entity_types: Some(vec![entity_type.to_string()]), ..Default::default() } }

    pub fn requiring(mut self, attr: &str, ty: Option<AttrType>) -> Self {
        self.required_attributes.push((attr.to_string(), ty));
        self
    }

    pub fn check_arity(&self, module: &str, count: usize) -> HuntResult<()> {
        if count == 0 || (self.arity != 0 && count != self.arity) {
            let want = if self.arity == 0 { "at least 1".to_string() } else { self.arity.to_string() };
            return Err(HuntError::schema_mismatch(format!("module '{}' takes {} input variable(s), got {}", module, want, count)));
        }
        Ok(())
    }

    /// Check one input variable's schema.
    pub fn check(&self, module: &str, variable: &str, schema: &Schema) -> HuntResult<()> {
        if let Some(types) = &self.entity_types {
            if !types.iter().any(|t| t == &schema.entity_type) {
                return Err(HuntError::schema_mismatch(format!(
                    "module '{}' accepts {} but '{}' holds '{}'",
                    module,
                    types.join(", "),
                    variable,
                    schema.entity_type
                )));
            }
        }
        for (attr, want) in &self.required_attributes {
            let have = match schema.type_of(attr) {
                Some(t) => t,
                None => {
                    return Err(HuntError::schema_mismatch(format!("module '{}' requires attribute '{}' missing from '{}'", module, attr, variable)));
                }
            };
            if let Some(want) = want {
                let ok = have == *want || have == AttrType::Null || (*want == AttrType::Float && have == AttrType::Int);
                if !ok {
                    return Err(HuntError::schema_mismatch(format!(
                        "module '{}' requires '{}' as {} but '{}' has {}",
                        module, attr, want, variable, have
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSpec {
    pub name: String,
    /// Entity type given to the output table when the module leaves it generic.
    pub entity_type: Option<String>,
    pub required_attributes: Vec<String>,
}

impl OutputSpec {
    pub fn named(name: &str) -> Self { Self { name: name.to_string(), entity_type: None, required_attributes: Vec::new() } }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub input: InputRequirement,
    pub outputs: Vec<OutputSpec>,
    /// Overrides the session's analytics timeout.
    pub timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct RegisteredModule {
    pub descriptor: ModuleDescriptor,
    pub executor: Arc<dyn AnalyticsExecutor>,
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, RegisteredModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, descriptor: ModuleDescriptor, executor: Arc<dyn AnalyticsExecutor>) {
        self.modules.insert(descriptor.name.clone(), RegisteredModule { descriptor, executor });
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModule> { self.modules.get(name) }

    pub fn names(&self) -> Vec<String> { self.modules.keys().cloned().collect() }

    pub fn len(&self) -> usize { self.modules.len() }

    pub fn is_empty(&self) -> bool { self.modules.is_empty() }

    pub fn clear(&mut self) -> usize {
        let n = self.modules.len();
        self.modules.clear();
        n
    }
}
