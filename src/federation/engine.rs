//! Concurrent fetch over several connectors.
//!
//! One task per applicable connector, bounded by a semaphore, each under its own
//! timeout. A connector that times out or fails is recorded as degraded coverage and
//! the fetch carries on with the others. Results are filtered by the pattern and window,
//! merged by natural entity key and unified to one schema.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::cache::{CacheKey, CacheOrigin, FetchCache};
use super::connector::{ConnectorIssue, ConnectorQuery, ConnectorResponse, RegisteredConnector, RelationQuery};
use crate::config::HuntConfig;
use crate::error::{HuntError, HuntResult};
use crate::exec::exec_eval::CompiledPattern;
use crate::schema::{unify, Schema};
use crate::types::{Edge, Entity, EntityTable};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "issue", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok(CacheOrigin),
    Degraded(ConnectorIssue),
}

/// Per-connector result of one fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorOutcome {
    pub connector: String,
    pub status: OutcomeStatus,
    /// Entities this connector contributed after filtering.
    pub entities: usize,
}

impl ConnectorOutcome {
    pub fn is_degraded(&self) -> bool { matches!(self.status, OutcomeStatus::Degraded(_)) }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchReport {
    pub entity_type: String,
    pub outcomes: Vec<ConnectorOutcome>,
    pub warnings: Vec<String>,
}

impl FetchReport {
    /// True when at least one connector contributed nothing because it failed.
    pub fn degraded(&self) -> bool { self.outcomes.iter().any(|o| o.is_degraded()) }

    pub fn degraded_connectors(&self) -> Vec<&str> {
        self.outcomes.iter().filter(|o| o.is_degraded()).map(|o| o.connector.as_str()).collect()
    }

    /// Number of connector requests actually issued by this fetch.
    pub fn requests_issued(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Ok(CacheOrigin::Fetched) | OutcomeStatus::Degraded(_)))
            .count()
    }

    /// One line per connector for execution summaries.
    pub fn coverage_lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                OutcomeStatus::Ok(CacheOrigin::Fetched) => format!("{}: {} entities", o.connector, o.entities),
                OutcomeStatus::Ok(CacheOrigin::Cached) => format!("{}: {} entities (cached)", o.connector, o.entities),
                OutcomeStatus::Ok(CacheOrigin::Shared) => format!("{}: {} entities (shared fetch)", o.connector, o.entities),
                OutcomeStatus::Degraded(issue) => format!("{}: degraded ({})", o.connector, issue),
            })
            .collect()
    }
}

/// Merged result of a fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub table: EntityTable,
    pub edges: Vec<Edge>,
    pub report: FetchReport,
}

pub struct FederationEngine {
    cache: FetchCache,
    permits: Arc<Semaphore>,
    default_timeout: Duration,
    time_attributes: Vec<String>,
}

impl FederationEngine {
    pub fn new(config: &HuntConfig) -> Self {
        Self {
            cache: FetchCache::new(config.cache_ttl(), config.cache_max_entries),
            permits: Arc::new(Semaphore::new(config.max_parallel_connectors.max(1))),
            default_timeout: config.connector_timeout(),
            time_attributes: config.time_attributes.clone(),
        }
    }

    pub fn cache(&self) -> &FetchCache { &self.cache }

    fn timeout_for(&self, c: &RegisteredConnector) -> Duration { c.capabilities.timeout.unwrap_or(self.default_timeout) }

    /// Fetch `query` from every connector in `connectors` and merge the results.
    /// Fails only when `connectors` is empty; individual connector failures are reported
    /// as degraded coverage.
    pub async fn fetch(&self, query: &ConnectorQuery, connectors: &[RegisteredConnector]) -> HuntResult<Fetched> {
        if connectors.is_empty() {
            return Err(HuntError::no_connector(format!("no registered connector supports entity type '{}'", query.entity_type)));
        }
        let compiled = match &query.pattern {
            Some(p) => Some(CompiledPattern::compile(p)?),
            None => None,
        };
        debug!(target: "huntflow::federation", "fetch: type='{}' connectors={} pattern={}", query.entity_type, connectors.len(),
            query.pattern.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "*".into()));

        let tasks = connectors.iter().map(|c| self.fetch_one(c, query));
        let results = join_all(tasks).await;

        let mut report = FetchReport { entity_type: query.entity_type.clone(), ..Default::default() };
        let mut schemas: Vec<Schema> = Vec::new();
        let mut merged = Merge::new(&query.entity_type);
        let mut edges: Vec<Edge> = Vec::new();
        let mut edge_keys: HashSet<(String, String, String)> = HashSet::new();

        for (c, (result, origin)) in connectors.iter().zip(results) {
            match result {
                Ok(response) => {
                    let kept: Vec<Entity> = response
                        .entities
                        .iter()
                        .filter(|e| compiled.as_ref().map(|p| p.matches(e)).unwrap_or(true))
                        .filter(|e| query.window.map(|w| w.admits(e, &self.time_attributes)).unwrap_or(true))
                        .cloned()
                        .collect();
                    report.outcomes.push(ConnectorOutcome { connector: c.name.clone(), status: OutcomeStatus::Ok(origin), entities: kept.len() });
                    if !kept.is_empty() {
                        schemas.push(Schema::infer(&query.entity_type, &kept));
                    }
                    for e in kept {
                        merged.push(e);
                    }
                    for e in response.edges.iter() {
                        if edge_keys.insert((e.relation.clone(), e.src.clone(), e.dst.clone())) {
                            edges.push(e.clone());
                        }
                    }
                }
                Err(issue) => {
                    warn!(target: "huntflow::federation", "connector '{}' degraded for type '{}': {}", c.name, query.entity_type, issue);
                    report.warnings.push(format!("connector '{}' {}; results may be incomplete", c.name, issue));
                    report.outcomes.push(ConnectorOutcome { connector: c.name.clone(), status: OutcomeStatus::Degraded(issue), entities: 0 });
                }
            }
        }

        let unified = unify(&schemas);
        let mut schema = unified.schema;
        schema.entity_type = query.entity_type.clone();
        report.warnings.extend(unified.warnings.iter().map(|w| w.to_string()));
        let mut rows = merged.finish();
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        schema.conform(&mut rows);
        debug!(target: "huntflow::federation", "fetch done: type='{}' rows={} degraded={}", query.entity_type, rows.len(), report.degraded());
        Ok(Fetched { table: EntityTable::with_schema(schema, rows), edges, report })
    }

    async fn fetch_one(&self, c: &RegisteredConnector, query: &ConnectorQuery) -> (Result<Arc<ConnectorResponse>, ConnectorIssue>, CacheOrigin) {
        let key = CacheKey::new(&c.name, query);
        let client = Arc::clone(&c.client);
        let permits = Arc::clone(&self.permits);
        let timeout = self.timeout_for(c);
        let owned = query.clone();
        let name = c.name.clone();
        self.cache
            .get_or_fetch(key, move || async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return Err(ConnectorIssue::Error(format!("connector slot unavailable: {}", e))),
                };
                crate::tprintln!("[federation.fetch_one] connector='{}' type='{}'", name, owned.entity_type);
                match tokio::time::timeout(timeout, client.query(&owned)).await {
                    Ok(Ok(response)) => Ok(Arc::new(response)),
                    Ok(Err(e)) => Err(ConnectorIssue::Error(format!("{:#}", e))),
                    Err(_) => Err(ConnectorIssue::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))),
                }
            })
            .await
    }

    /// Ask connectors that declare `query.relation` for edges. Not cached.
    pub async fn fetch_edges(&self, query: &RelationQuery, connectors: &[RegisteredConnector]) -> (Vec<Edge>, Vec<ConnectorOutcome>) {
        let tasks = connectors.iter().map(|c| {
            let client = Arc::clone(&c.client);
            let permits = Arc::clone(&self.permits);
            let timeout = self.timeout_for(c);
            async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return Err(ConnectorIssue::Error(format!("connector slot unavailable: {}", e))),
                };
                match tokio::time::timeout(timeout, client.relations(query)).await {
                    Ok(Ok(edges)) => Ok(edges),
                    Ok(Err(e)) => Err(ConnectorIssue::Error(format!("{:#}", e))),
                    Err(_) => Err(ConnectorIssue::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))),
                }
            }
        });
        let results = join_all(tasks).await;
        let mut edges = Vec::new();
        let mut outcomes = Vec::new();
        for (c, r) in connectors.iter().zip(results) {
            match r {
                Ok(found) => {
                    outcomes.push(ConnectorOutcome { connector: c.name.clone(), status: OutcomeStatus::Ok(CacheOrigin::Fetched), entities: found.len() });
                    edges.extend(found.into_iter().filter(|e| e.relation == query.relation || query.relation == "linked"));
                }
                Err(issue) => {
                    warn!(target: "huntflow::federation", "connector '{}' degraded for relation '{}': {}", c.name, query.relation, issue);
                    outcomes.push(ConnectorOutcome { connector: c.name.clone(), status: OutcomeStatus::Degraded(issue), entities: 0 });
                }
            }
        }
        (edges, outcomes)
    }
}

/// Order-preserving merge keyed by natural entity key and by row id.
struct Merge<'a> {
    entity_type: &'a str,
    rows: Vec<Entity>,
    by_key: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl<'a> Merge<'a> {
    fn new(entity_type: &'a str) -> Self {
        Self { entity_type, rows: Vec::new(), by_key: HashMap::new(), by_id: HashMap::new() }
    }

    fn push(&mut self, e: Entity) {
        let key = e.dedup_key(self.entity_type);
        let existing = self.by_key.get(&key).or_else(|| self.by_id.get(&e.id)).copied();
        match existing {
            Some(i) => self.rows[i].absorb(&e),
            None => {
                let i = self.rows.len();
                self.by_key.insert(key, i);
                self.by_id.insert(e.id.clone(), i);
                self.rows.push(e);
            }
        }
    }

    fn finish(self) -> Vec<Entity> { self.rows }
}
