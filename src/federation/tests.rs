use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::*;
use crate::config::HuntConfig;
use crate::error::HuntError;
use crate::types::{Entity, Value};

struct Scripted {
    rows: Vec<Entity>,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(rows: Vec<Entity>) -> Arc<Self> { Arc::new(Self { rows, delay: Duration::ZERO, fail: false, calls: AtomicUsize::new(0) }) }
    fn slow(rows: Vec<Entity>, delay: Duration) -> Arc<Self> { Arc::new(Self { rows, delay, fail: false, calls: AtomicUsize::new(0) }) }
    fn failing() -> Arc<Self> { Arc::new(Self { rows: vec![], delay: Duration::ZERO, fail: true, calls: AtomicUsize::new(0) }) }
    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Connector for Scripted {
    async fn query(&self, _query: &ConnectorQuery) -> Result<ConnectorResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            bail!("backend refused the query");
        }
        Ok(ConnectorResponse { entities: self.rows.clone(), edges: vec![] })
    }
}

fn proc(pid: i64, name: &str, extra: Option<(&str, Value)>) -> Entity {
    let mut attrs = BTreeMap::new();
    attrs.insert("pid".to_string(), Value::Int(pid));
    attrs.insert("name".to_string(), Value::Str(name.to_string()));
    if let Some((k, v)) = extra {
        attrs.insert(k.to_string(), v);
    }
    Entity::from_record("process", attrs)
}

fn query(pattern: Option<&str>) -> ConnectorQuery {
    ConnectorQuery {
        entity_type: "process".into(),
        pattern: pattern.map(|p| crate::syntax::parse_pattern(p).unwrap()),
        window: None,
        limit: None,
    }
}

fn registry(entries: Vec<(&str, Arc<Scripted>, Option<Duration>)>) -> ConnectorRegistry {
    let mut reg = ConnectorRegistry::new();
    for (name, c, timeout) in entries {
        let mut caps = ConnectorCapabilities::for_types(["process"]);
        if let Some(t) = timeout {
            caps = caps.with_timeout(t);
        }
        reg.register(name, caps, c);
    }
    reg
}

#[tokio::test]
async fn one_connector_timing_out_degrades_but_keeps_the_other() {
    let fast = Scripted::new(vec![proc(4, "cmd.exe", None)]);
    let slow = Scripted::slow(vec![proc(8, "evil.exe", None)], Duration::from_millis(500));
    let reg = registry(vec![("edr", fast, None), ("siem", slow, Some(Duration::from_millis(30)))]);
    let engine = FederationEngine::new(&HuntConfig::default());
    let got = engine.fetch(&query(None), &reg.for_type("process")).await.unwrap();
    assert_eq!(got.table.len(), 1);
    assert_eq!(got.table.rows[0].get("name"), &Value::Str("cmd.exe".into()));
    assert!(got.report.degraded());
    assert_eq!(got.report.degraded_connectors(), vec!["siem"]);
    assert!(matches!(got.report.outcomes[1].status, OutcomeStatus::Degraded(ConnectorIssue::Timeout(30))));
    assert!(got.report.warnings.iter().any(|w| w.contains("siem")));
}

#[tokio::test]
async fn only_connector_failing_is_an_empty_degraded_result() {
    let reg = registry(vec![("edr", Scripted::failing(), None)]);
    let engine = FederationEngine::new(&HuntConfig::default());
    let got = engine.fetch(&query(None), &reg.for_type("process")).await.unwrap();
    assert!(got.table.is_empty());
    assert!(got.report.degraded());
}

#[tokio::test]
async fn no_connector_is_a_hard_failure() {
    let engine = FederationEngine::new(&HuntConfig::default());
    let err = engine.fetch(&query(None), &[]).await.unwrap_err();
    assert!(matches!(err, HuntError::NoApplicableConnector { .. }));
}

#[tokio::test]
async fn concurrent_identical_fetches_issue_one_request() {
    let c = Scripted::slow(vec![proc(4, "cmd.exe", None)], Duration::from_millis(40));
    let reg = registry(vec![("edr", Arc::clone(&c), None)]);
    let engine = FederationEngine::new(&HuntConfig::default());
    let connectors = reg.for_type("process");
    let q1 = query(Some("name = 'cmd.exe' AND pid = 4"));
    let q2 = query(Some("pid = 4 AND name = 'cmd.exe'"));
    let (a, b) = futures::join!(engine.fetch(&q1, &connectors), engine.fetch(&q2, &connectors));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(c.calls(), 1);
    assert_eq!(a.table.ids(), b.table.ids());
    let origins: Vec<OutcomeStatus> = vec![a.report.outcomes[0].status.clone(), b.report.outcomes[0].status.clone()];
    assert!(origins.contains(&OutcomeStatus::Ok(CacheOrigin::Fetched)));
    assert!(origins.contains(&OutcomeStatus::Ok(CacheOrigin::Shared)));

    // A live entry answers without a new request
    let again = engine.fetch(&q1, &connectors).await.unwrap();
    assert_eq!(c.calls(), 1);
    assert_eq!(again.report.requests_issued(), 0);
    assert_eq!(again.table.ids(), a.table.ids());
}

#[tokio::test]
async fn results_are_filtered_merged_and_unified() {
    let a = Scripted::new(vec![proc(4, "cmd.exe", Some(("user", Value::Str("bob".into())))), proc(9, "x.exe", None)]);
    let b = Scripted::new(vec![proc(4, "cmd.exe", Some(("session", Value::Int(2)))), proc(5, "cmd.exe", Some(("user", Value::Int(7))))]);
    let reg = registry(vec![("a", a, None), ("b", b, None)]);
    let engine = FederationEngine::new(&HuntConfig::default());
    let got = engine.fetch(&query(Some("name = 'cmd.exe'")), &reg.for_type("process")).await.unwrap();
    // pid 4 seen twice, merged into one row carrying both sources' attributes
    assert_eq!(got.table.len(), 2);
    let first = &got.table.rows[0];
    assert_eq!(first.get("user"), &Value::Str("bob".into()));
    assert_eq!(first.get("session"), &Value::Int(2));
    // attribute only on one row is null-filled on the other
    assert!(got.table.rows[1].attributes.contains_key("session"));
    assert!(got.table.rows[1].get("session").is_null());
    assert_eq!(got.table.schema.type_of("user"), Some(crate::types::AttrType::Untyped));
    assert!(got.report.warnings.iter().any(|w| w.contains("'user'")));
}

#[tokio::test]
async fn bundle_connector_answers_stix_objects_and_relations() {
    let doc = serde_json::json!({
        "type": "bundle",
        "objects": [
            {"type": "process", "id": "process--1", "pid": 4, "name": "cmd.exe"},
            {"type": "file", "id": "file--1", "name": "a.exe"},
            {"type": "relationship", "relationship_type": "Accessed", "source_ref": "process--1", "target_ref": "file--1"}
        ]
    });
    let b = BundleConnector::from_json(&doc).unwrap();
    assert_eq!(b.entity_count(), 2);
    let caps = b.capabilities();
    assert!(caps.supports("file") && caps.supports("process"));
    assert!(caps.supports_relation("accessed"));

    let resp = b.query(&query(Some("pid > 1"))).await.unwrap();
    assert_eq!(resp.entities.len(), 1);
    assert_eq!(resp.entities[0].id, "process--1");
    assert_eq!(resp.edges.len(), 1);

    let edges = b
        .relations(&RelationQuery { relation: "accessed".into(), entity_ids: vec!["file--1".into()], window: None })
        .await
        .unwrap();
    assert_eq!(edges[0].src, "process--1");
}

#[test]
fn bundle_rejects_unknown_layout() {
    assert!(BundleConnector::from_json(&serde_json::json!(42)).is_err());
    assert!(BundleConnector::from_json(&serde_json::json!([{"pid": 1}])).is_err());
}

#[tokio::test]
async fn bundle_applies_the_window_before_the_limit() {
    let doc = serde_json::json!({
        "entities": {
            "process": [
                {"id": "p1", "name": "a", "first_observed": "2020-01-01T00:00:00Z"},
                {"id": "p2", "name": "b", "first_observed": "2020-01-02T00:00:00Z"},
                {"id": "p3", "name": "c", "first_observed": "2021-05-06T12:00:00Z"}
            ]
        }
    });
    let b = BundleConnector::from_json(&doc).unwrap();
    let ts = |s: &str| crate::types::parse_timestamp(s).unwrap();
    let window = crate::types::TimeWindow { start: ts("2021-05-06T00:00:00Z"), stop: ts("2021-05-07T00:00:00Z") };
    let q = ConnectorQuery { entity_type: "process".into(), pattern: None, window: Some(window), limit: Some(1) };
    let resp = b.query(&q).await.unwrap();
    assert_eq!(resp.entities.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["p3"]);

    let blind = BundleConnector::from_json(&doc).unwrap().with_time_attributes(vec![]);
    assert_eq!(blind.query(&q).await.unwrap().entities[0].id, "p1");
}
