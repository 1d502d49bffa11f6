//! Connector over a local JSON bundle file.
//!
//! Accepted layouts:
//! - `{"entities": {"<type>": [ {..}, .. ], ..}, "edges": [ {"relation", "src", "dst"}, .. ]}`
//! - a STIX-style bundle: `{"type": "bundle", "objects": [ {"type": .., "id": .., ..}, .. ]}`
//!   where `relationship` objects become edges;
//! - a plain array of objects, each carrying a `type` attribute.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::connector::{Connector, ConnectorCapabilities, ConnectorQuery, ConnectorResponse, RelationQuery};
use crate::config::HuntConfig;
use crate::exec::exec_eval::CompiledPattern;
use crate::storage::io::records_to_entities;
use crate::types::{parse_timestamp, Edge, Entity};

#[derive(Debug, Clone)]
pub struct BundleConnector {
    tables: BTreeMap<String, Vec<Entity>>,
    edges: Vec<Edge>,
    time_attributes: Vec<String>,
}

impl Default for BundleConnector {
    fn default() -> Self {
        Self { tables: BTreeMap::new(), edges: Vec::new(), time_attributes: HuntConfig::default().time_attributes }
    }
}

impl BundleConnector {
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading bundle '{}'", path.display()))?;
        let doc: serde_json::Value = serde_json::from_str(&text).with_context(|| format!("parsing bundle '{}'", path.display()))?;
        let b = Self::from_json(&doc)?;
        debug!(target: "huntflow::federation", "bundle '{}': types={:?} edges={}", path.display(), b.tables.keys().collect::<Vec<_>>(), b.edges.len());
        Ok(b)
    }

    pub fn from_json(doc: &serde_json::Value) -> Result<Self> {
        let mut b = BundleConnector::default();
        match doc {
            serde_json::Value::Object(map) if map.contains_key("entities") => {
                let entities = map
                    .get("entities")
                    .and_then(|e| e.as_object())
                    .context("'entities' must map entity types to record arrays")?;
                for (ty, records) in entities {
                    let items = records.as_array().with_context(|| format!("records of '{}' must be an array", ty))?;
                    b.add(ty, &records_to_entities(ty, items)?);
                }
                if let Some(edges) = map.get("edges") {
                    let edges: Vec<Edge> = serde_json::from_value(edges.clone()).context("invalid 'edges' list")?;
                    b.edges.extend(edges.into_iter().map(|mut e| {
                        e.relation = e.relation.to_ascii_lowercase();
                        e
                    }));
                }
            }
            serde_json::Value::Object(map) if map.get("type").and_then(|t| t.as_str()) == Some("bundle") => {
                let objects = map.get("objects").and_then(|o| o.as_array()).context("bundle without 'objects'")?;
                b.add_objects(objects)?;
            }
            serde_json::Value::Array(objects) => b.add_objects(objects)?,
            _ => bail!("unrecognised bundle layout"),
        }
        Ok(b)
    }

    fn add(&mut self, entity_type: &str, rows: &[Entity]) {
        let table = self.tables.entry(entity_type.to_string()).or_default();
        table.extend(rows.iter().cloned());
    }

    fn add_objects(&mut self, objects: &[serde_json::Value]) -> Result<()> {
        for (i, obj) in objects.iter().enumerate() {
            let map = obj.as_object().with_context(|| format!("object {} is not a JSON object", i))?;
            let ty = map.get("type").and_then(|t| t.as_str()).with_context(|| format!("object {} has no 'type'", i))?;
            if ty == "relationship" {
                let field = |k: &str| map.get(k).and_then(|v| v.as_str()).map(|s| s.to_string());
                let (Some(relation), Some(src), Some(dst)) = (field("relationship_type"), field("source_ref"), field("target_ref")) else {
                    bail!("relationship object {} needs relationship_type, source_ref and target_ref", i);
                };
                let observed_at = field("start_time").or_else(|| field("created")).and_then(|t| parse_timestamp(&t));
                self.edges.push(Edge { relation: relation.to_ascii_lowercase(), src, dst, observed_at });
                continue;
            }
            let mut record = map.clone();
            record.remove("type");
            let rows = records_to_entities(ty, &[serde_json::Value::Object(record)])?;
            self.add(ty, &rows);
        }
        Ok(())
    }

    /// Attributes checked against a query's time window.
    pub fn with_time_attributes(mut self, attrs: Vec<String>) -> Self {
        self.time_attributes = attrs;
        self
    }

    /// Capabilities derived from the bundle content.
    pub fn capabilities(&self) -> ConnectorCapabilities {
        let mut relations: Vec<String> = Vec::new();
        for e in &self.edges {
            if !relations.contains(&e.relation) {
                relations.push(e.relation.clone());
            }
        }
        ConnectorCapabilities::for_types(self.tables.keys().cloned()).with_relations(relations)
    }

    pub fn entity_count(&self) -> usize { self.tables.values().map(|t| t.len()).sum() }
}

#[async_trait]
impl Connector for BundleConnector {
    async fn query(&self, query: &ConnectorQuery) -> Result<ConnectorResponse> {
        let rows = match self.tables.get(&query.entity_type) {
            Some(rows) => rows,
            None => return Ok(ConnectorResponse::default()),
        };
        let compiled = match &query.pattern {
            Some(p) => Some(CompiledPattern::compile(p).map_err(|e| anyhow::anyhow!(e.to_string()))?),
            None => None,
        };
        // window before limit, so LIMIT counts only rows the window admits
        let mut entities: Vec<Entity> = rows
            .iter()
            .filter(|e| compiled.as_ref().map(|p| p.matches(e)).unwrap_or(true))
            .filter(|e| query.window.map(|w| w.admits(e, &self.time_attributes)).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            entities.truncate(limit);
        }
        let ids: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        let edges = self.edges.iter().filter(|e| ids.contains(e.src.as_str()) || ids.contains(e.dst.as_str())).cloned().collect();
        Ok(ConnectorResponse { entities, edges })
    }

    async fn relations(&self, query: &RelationQuery) -> Result<Vec<Edge>> {
        let ids: HashSet<&str> = query.entity_ids.iter().map(|s| s.as_str()).collect();
        Ok(self
            .edges
            .iter()
            .filter(|e| query.relation == "linked" || e.relation == query.relation)
            .filter(|e| ids.contains(e.src.as_str()) || ids.contains(e.dst.as_str()))
            .filter(|e| match (query.window, e.observed_at) {
                (Some(w), Some(t)) => w.contains(&t),
                _ => true,
            })
            .cloned()
            .collect())
    }
}
