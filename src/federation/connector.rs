//! Connector contract. A connector answers pattern queries for the entity types it
//! declares and, optionally, relationship queries for the relations it declares. The
//! protocol spoken to the data source is the connector's own business.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::syntax::Pattern;
use crate::types::{Edge, Entity, TimeWindow};

/// One pattern query sent to a connector. Variable references in the pattern are
/// already resolved to literal value lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorQuery {
    pub entity_type: String,
    pub pattern: Option<Pattern>,
    pub window: Option<TimeWindow>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorResponse {
    pub entities: Vec<Entity>,
    /// Relationships observed alongside the entities, by entity id.
    pub edges: Vec<Edge>,
}

/// Edges of `relation` touching any of `entity_ids`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationQuery {
    pub relation: String,
    pub entity_ids: Vec<String>,
    pub window: Option<TimeWindow>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn query(&self, query: &ConnectorQuery) -> Result<ConnectorResponse>;

    async fn relations(&self, _query: &RelationQuery) -> Result<Vec<Edge>> { Ok(Vec::new()) }
}

/// Why a connector contributed nothing to a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ConnectorIssue {
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("{0}")]
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectorCapabilities {
    pub entity_types: Vec<String>,
    pub relations: Vec<String>,
    /// Overrides the session's connector timeout.
    pub timeout: Option<Duration>,
}

impl ConnectorCapabilities {
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { entity_types: types.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    pub fn with_relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations = relations.into_iter().map(|r| r.into().to_ascii_lowercase()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn supports(&self, entity_type: &str) -> bool { self.entity_types.iter().any(|t| t == entity_type) }

    pub fn supports_relation(&self, relation: &str) -> bool {
        self.relations.iter().any(|r| r == relation || relation == "linked")
    }
}

#[derive(Clone)]
pub struct RegisteredConnector {
    pub name: String,
    pub capabilities: ConnectorCapabilities,
    pub client: Arc<dyn Connector>,
}

impl std::fmt::Debug for RegisteredConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredConnector").field("name", &self.name).field("capabilities", &self.capabilities).finish()
    }
}

/// Named connectors of one session. Lookups return connectors in name order so fetch
/// results merge deterministically.
#[derive(Debug, Default)]
pub struct ConnectorRegistry {
    entries: BTreeMap<String, RegisteredConnector>,
}

impl ConnectorRegistry {
    pub fn new() -> Self { Self::default() }

    /// Register (or replace) a connector.
    pub fn register(&mut self, name: impl Into<String>, capabilities: ConnectorCapabilities, client: Arc<dyn Connector>) {
        let name = name.into();
        self.entries.insert(name.clone(), RegisteredConnector { name, capabilities, client });
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredConnector> { self.entries.get(name) }

    pub fn contains(&self, name: &str) -> bool { self.entries.contains_key(name) }

    pub fn for_type(&self, entity_type: &str) -> Vec<RegisteredConnector> {
        self.entries.values().filter(|c| c.capabilities.supports(entity_type)).cloned().collect()
    }

    pub fn for_relation(&self, relation: &str) -> Vec<RegisteredConnector> {
        self.entries.values().filter(|c| c.capabilities.supports_relation(relation)).cloned().collect()
    }

    /// Whether any connector declares `relation` by name.
    pub fn declares_relation(&self, relation: &str) -> bool {
        self.entries.values().any(|c| c.capabilities.relations.iter().any(|r| r == relation))
    }

    pub fn names(&self) -> Vec<String> { self.entries.keys().cloned().collect() }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}
