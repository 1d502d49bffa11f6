//! One investigation: variables, the entity store, registered connectors and analytics
//! modules, and the federation cache. Statements run strictly one after another; each
//! commits as a unit or leaves the session untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::{AnalyticsExecutor, InputRequirement, ModuleDescriptor, ModuleRegistry, OutputSpec};
use crate::config::HuntConfig;
use crate::display::Display;
use crate::error::{HuntError, HuntResult, StatementFailure};
use crate::exec::{self, ExecContext, StatementTx};
use crate::federation::{Connector, ConnectorCapabilities, ConnectorRegistry, FederationEngine, FetchReport};
use crate::storage::{EntityStore, MemoryStore};
use crate::syntax::{parse_batch, ParsedStatement};
use crate::types::EntityTable;
use crate::vars::{Variable, VariableManager, VariableSummary};

/// What a successful statement produced.
#[derive(Debug, Clone, Serialize)]
pub struct StatementOutcome {
    pub statement: String,
    pub line: usize,
    pub command: String,
    /// Variables bound by this statement.
    pub bound: Vec<VariableSummary>,
    pub display: Option<Display>,
    pub report: Option<FetchReport>,
    pub warnings: Vec<String>,
    /// Execution summary lines (empty when summaries are disabled).
    pub summary: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub variables_released: usize,
    pub tables_dropped: usize,
    pub cache_entries_discarded: usize,
    pub connectors_released: usize,
    pub modules_released: usize,
}

pub struct Session {
    id: Uuid,
    config: HuntConfig,
    vars: VariableManager,
    store: Arc<dyn EntityStore>,
    connectors: ConnectorRegistry,
    modules: ModuleRegistry,
    federation: FederationEngine,
}

impl Session {
    pub fn new(config: HuntConfig) -> Result<Self> {
        Ok(Self::with_store(config, Arc::new(MemoryStore::new())))
    }

    pub fn with_store(config: HuntConfig, store: Arc<dyn EntityStore>) -> Self {
        let federation = FederationEngine::new(&config);
        let id = Uuid::new_v4();
        debug!(target: "huntflow::session", "new session {}", id);
        Self { id, config, vars: VariableManager::new(), store, connectors: ConnectorRegistry::new(), modules: ModuleRegistry::new(), federation }
    }

    pub fn id(&self) -> Uuid { self.id }

    pub fn config(&self) -> &HuntConfig { &self.config }

    pub fn federation(&self) -> &FederationEngine { &self.federation }

    pub fn register_connector(&mut self, name: &str, capabilities: ConnectorCapabilities, client: Arc<dyn Connector>) {
        info!(target: "huntflow::session", "registered connector '{}' for {:?}", name, capabilities.entity_types);
        self.connectors.register(name, capabilities, client);
    }

    pub fn register_module(&mut self, name: &str, input: InputRequirement, outputs: Vec<OutputSpec>, executor: Arc<dyn AnalyticsExecutor>) {
        let descriptor = ModuleDescriptor { name: name.to_string(), input, outputs, timeout: None };
        self.register_module_descriptor(descriptor, executor);
    }

    /// Register a module from a full descriptor, including its own timeout.
    pub fn register_module_descriptor(&mut self, descriptor: ModuleDescriptor, executor: Arc<dyn AnalyticsExecutor>) {
        info!(
            target: "huntflow::session",
            "registered analytics module '{}' ({} outputs, timeout {:?})",
            descriptor.name,
            descriptor.outputs.len(),
            descriptor.timeout
        );
        self.modules.register(descriptor, executor);
    }

    /// Run every statement in `source` in order. Each entry is the outcome of one
    /// statement; with `halt_on_error` the batch stops after the first failure.
    pub async fn execute(&mut self, source: &str) -> Vec<Result<StatementOutcome, StatementFailure>> {
        let mut results = Vec::new();
        for parsed in parse_batch(source) {
            let r = match parsed {
                Ok(stmt) => self.run_statement(&stmt).await.map_err(|error| StatementFailure { statement: stmt.text.clone(), line: stmt.line, error }),
                Err(f) => Err(f),
            };
            let failed = r.is_err();
            if let Err(f) = &r {
                warn!(target: "huntflow::session", "statement at line {} failed: {}", f.line, f.error);
            }
            results.push(r);
            if failed && self.config.halt_on_error {
                break;
            }
        }
        results
    }

    async fn run_statement(&mut self, stmt: &ParsedStatement) -> HuntResult<StatementOutcome> {
        let (result, tx) = {
            let mut ctx = ExecContext {
                config: &self.config,
                vars: &self.vars,
                store: &*self.store,
                connectors: &self.connectors,
                modules: &self.modules,
                federation: &self.federation,
                statement: stmt,
                now: Utc::now(),
                tx: StatementTx::default(),
            };
            let r = exec::execute(&mut ctx).await;
            (r, ctx.tx)
        };
        match result {
            Ok(()) => self.commit(stmt, tx),
            Err(e) => {
                self.rollback(&tx);
                Err(e)
            }
        }
    }

    fn rollback(&self, tx: &StatementTx) {
        for h in &tx.created {
            if let Err(e) = self.store.drop_table(*h) {
                warn!(target: "huntflow::session", "rollback could not drop table {}: {:#}", h, e);
            }
        }
    }

    fn commit(&mut self, stmt: &ParsedStatement, tx: StatementTx) -> HuntResult<StatementOutcome> {
        if let Err(e) = self.store.record_edges(&tx.edges) {
            self.rollback(&tx);
            return Err(HuntError::store(format!("{:#}", e)));
        }
        let StatementTx { bindings, connectors, warnings, display, report, notes, .. } = tx;
        let mut bound = Vec::with_capacity(bindings.len());
        for b in bindings {
            let v = self.vars.bind(b)?;
            bound.push(VariableSummary::from(v));
        }
        for c in connectors {
            self.connectors.register(c.name, c.capabilities, c.client);
        }
        self.collect_garbage();

        let mut summary = Vec::new();
        if self.config.show_execution_summary {
            for b in &bound {
                summary.push(format!("{}: {} ({} rows)", b.name, b.entity_type, b.row_count));
            }
            if let Some(r) = &report {
                summary.extend(r.coverage_lines());
            }
            summary.extend(notes);
        }
        Ok(StatementOutcome {
            statement: stmt.text.clone(),
            line: stmt.line,
            command: stmt.statement.command.keyword().to_string(),
            bound,
            display,
            report,
            warnings,
            summary,
        })
    }

    /// Drop nodes no bound name can reach, along with their tables.
    fn collect_garbage(&mut self) -> usize {
        let dead = self.vars.collect_garbage();
        let mut dropped = 0;
        for v in dead {
            if self.vars.handle_in_use(v.handle) {
                continue;
            }
            match self.store.drop_table(v.handle) {
                Ok(()) => dropped += 1,
                Err(e) => warn!(target: "huntflow::session", "could not drop table {} of '{}': {:#}", v.handle, v.name, e),
            }
        }
        if dropped > 0 {
            debug!(target: "huntflow::session", "gc dropped {} tables", dropped);
        }
        dropped
    }

    pub fn list_variables(&self) -> Vec<VariableSummary> { self.vars.summaries() }

    pub fn variable(&self, name: &str) -> HuntResult<&Variable> { self.vars.resolve(name) }

    /// Rows of a bound variable.
    pub fn table(&self, name: &str) -> HuntResult<EntityTable> {
        let v = self.vars.resolve(name)?;
        let mut t = self.store.table(v.handle).map_err(HuntError::store)?;
        t.schema = v.schema.clone();
        t.entity_type = v.schema.entity_type.clone();
        Ok(t)
    }

    pub fn dependents(&self, name: &str) -> HuntResult<BTreeSet<String>> { self.vars.dependents(name) }

    /// Names of the ancestors of `name`, nearest first.
    pub fn lineage(&self, name: &str) -> HuntResult<Vec<String>> {
        Ok(self.vars.lineage(name)?.into_iter().map(|v| v.name.clone()).collect())
    }

    /// Whether the variable dependency graph is free of cycles.
    pub fn is_acyclic(&self) -> bool { self.vars.is_acyclic() }

    /// Release everything the session holds. Tables written by SAVE stay on disk.
    pub fn close(&mut self) -> HuntResult<CloseReport> {
        let released = self.vars.clear();
        let mut report = CloseReport { variables_released: released.len(), ..Default::default() };
        let handles: BTreeSet<_> = released.iter().map(|v| v.handle).collect();
        for h in handles {
            self.store.drop_table(h).map_err(HuntError::store)?;
            report.tables_dropped += 1;
        }
        report.cache_entries_discarded = self.federation.cache().clear();
        report.connectors_released = self.connectors.clear();
        report.modules_released = self.modules.clear();
        info!(target: "huntflow::session", "closed session {}: {:?}", self.id, report);
        Ok(report)
    }
}
