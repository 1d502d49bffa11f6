//! Variable table and lineage graph.
//!
//! Every binding creates a new node; a name always points at its latest node. Lineage
//! edges only point at nodes that existed before the new node was created, so the graph
//! is acyclic by construction. Rebinding a name never mutates older nodes: they stay
//! reachable through the lineage of variables derived from them until garbage collection.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{HuntError, HuntResult};
use crate::schema::Schema;
use crate::storage::TableHandle;

pub type VarId = u64;

/// How a variable came to be.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Birth {
    /// Command keyword (GET, FIND, ...).
    pub command: String,
    /// Statement text.
    pub statement: String,
    /// Connectors or files the rows were fetched from.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub handle: TableHandle,
    pub schema: Schema,
    pub row_count: usize,
    /// Nodes this variable was derived from, in operand order.
    pub lineage: Vec<VarId>,
    pub birth: Birth,
    pub created_at: DateTime<Utc>,
}

impl Variable {
    pub fn entity_type(&self) -> &str { &self.schema.entity_type }
}

/// Name-level summary for hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSummary {
    pub name: String,
    pub entity_type: String,
    pub row_count: usize,
    pub attributes: Vec<String>,
    pub command: String,
}

impl From<&Variable> for VariableSummary {
    fn from(v: &Variable) -> Self {
        Self {
            name: v.name.clone(),
            entity_type: v.schema.entity_type.clone(),
            row_count: v.row_count,
            attributes: v.schema.names().into_iter().map(|s| s.to_string()).collect(),
            command: v.birth.command.clone(),
        }
    }
}

/// A binding request collected during a statement and applied at commit.
#[derive(Debug, Clone)]
pub struct PendingBinding {
    pub name: String,
    pub handle: TableHandle,
    pub schema: Schema,
    pub row_count: usize,
    pub lineage: Vec<VarId>,
    pub birth: Birth,
}

#[derive(Debug, Default)]
pub struct VariableManager {
    nodes: HashMap<VarId, Variable>,
    names: BTreeMap<String, VarId>,
    next_id: VarId,
}

impl VariableManager {
    pub fn new() -> Self { Self::default() }

    /// Bind `name` to a new node. Lineage must reference existing nodes.
    pub fn bind(&mut self, pending: PendingBinding) -> HuntResult<&Variable> {
        for parent in &pending.lineage {
            if !self.nodes.contains_key(parent) {
                return Err(HuntError::internal(format!("lineage references unknown variable node {}", parent)));
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        let var = Variable {
            id,
            name: pending.name.clone(),
            handle: pending.handle,
            schema: pending.schema,
            row_count: pending.row_count,
            lineage: pending.lineage,
            birth: pending.birth,
            created_at: Utc::now(),
        };
        self.nodes.insert(id, var);
        self.names.insert(pending.name, id);
        self.nodes.get(&id).ok_or_else(|| HuntError::internal("variable node vanished after insert"))
    }

    pub fn resolve(&self, name: &str) -> HuntResult<&Variable> {
        self.names
            .get(name)
            .and_then(|id| self.nodes.get(id))
            .ok_or_else(|| HuntError::undefined(name))
    }

    pub fn contains(&self, name: &str) -> bool { self.names.contains_key(name) }

    pub fn node(&self, id: VarId) -> Option<&Variable> { self.nodes.get(&id) }

    /// Currently bound variables in binding order.
    pub fn list(&self) -> Vec<&Variable> {
        let mut v: Vec<&Variable> = self.names.values().filter_map(|id| self.nodes.get(id)).collect();
        v.sort_by_key(|x| x.id);
        v
    }

    pub fn summaries(&self) -> Vec<VariableSummary> { self.list().into_iter().map(VariableSummary::from).collect() }

    /// Ancestors of the current node of `name`, nearest first (breadth-first).
    pub fn lineage(&self, name: &str) -> HuntResult<Vec<&Variable>> {
        let root = self.resolve(name)?;
        let mut seen: BTreeSet<VarId> = BTreeSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<VarId> = root.lineage.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) { continue; }
            if let Some(node) = self.nodes.get(&id) {
                out.push(node);
                queue.extend(node.lineage.iter().copied());
            }
        }
        Ok(out)
    }

    /// Names of currently bound variables derived (directly or transitively) from the
    /// current node of `name`.
    pub fn dependents(&self, name: &str) -> HuntResult<BTreeSet<String>> {
        let target = self.resolve(name)?.id;
        let mut out = BTreeSet::new();
        for (n, id) in &self.names {
            if *id == target { continue; }
            if self.descends_from(*id, target) {
                out.insert(n.clone());
            }
        }
        Ok(out)
    }

    fn descends_from(&self, start: VarId, target: VarId) -> bool {
        let mut stack: Vec<VarId> = self.nodes.get(&start).map(|n| n.lineage.clone()).unwrap_or_default();
        let mut seen: BTreeSet<VarId> = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if id == target { return true; }
            if !seen.insert(id) { continue; }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.lineage.iter().copied());
            }
        }
        false
    }

    /// True when every lineage edge points at an older node, which rules out cycles.
    pub fn is_acyclic(&self) -> bool {
        self.nodes.values().all(|n| n.lineage.iter().all(|p| *p < n.id))
    }

    /// Remove nodes no longer reachable from any bound name. Returns the removed nodes so
    /// their tables can be dropped.
    pub fn collect_garbage(&mut self) -> Vec<Variable> {
        let mut live: BTreeSet<VarId> = BTreeSet::new();
        let mut stack: Vec<VarId> = self.names.values().copied().collect();
        while let Some(id) = stack.pop() {
            if !live.insert(id) { continue; }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.lineage.iter().copied());
            }
        }
        let dead: Vec<VarId> = self.nodes.keys().copied().filter(|id| !live.contains(id)).collect();
        dead.into_iter().filter_map(|id| self.nodes.remove(&id)).collect()
    }

    /// Drop every binding and node.
    pub fn clear(&mut self) -> Vec<Variable> {
        self.names.clear();
        let mut all: Vec<Variable> = self.nodes.drain().map(|(_, v)| v).collect();
        all.sort_by_key(|v| v.id);
        all
    }

    /// Number of nodes, bound or only reachable through lineage.
    pub fn node_count(&self) -> usize { self.nodes.len() }

    /// Whether a table handle is still referenced by any node.
    pub fn handle_in_use(&self, handle: TableHandle) -> bool { self.nodes.values().any(|n| n.handle == handle) }
}

#[cfg(test)]
#[path = "vars_tests.rs"]
mod tests;
