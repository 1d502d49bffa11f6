// End-to-end checks of a hunting session: federation through connectors, cache reuse,
// relationship finding, analytics invocation and statement atomicity.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;

use huntflow::analytics::{AnalyticsExecutor, AnalyticsInput, AnalyticsOutput, CancelFlag, InputRequirement, ModuleDescriptor, OutputSpec};
use huntflow::federation::{
    Connector, ConnectorCapabilities, ConnectorQuery, ConnectorRegistry, ConnectorResponse, FederationEngine, OutcomeStatus,
};
use huntflow::types::{AttrType, Entity, EntityTable, Value};
use huntflow::{HuntConfig, HuntError, Session, StatementOutcome};

/// Serves fixed tables per entity type, optionally after a delay, and counts requests.
struct Source {
    tables: BTreeMap<String, Vec<Entity>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl Source {
    fn new(tables: Vec<(&str, Vec<Entity>)>) -> Arc<Self> {
        Arc::new(Self { tables: tables.into_iter().map(|(k, v)| (k.to_string(), v)).collect(), delay: Duration::ZERO, calls: AtomicUsize::new(0) })
    }

    fn slow(tables: Vec<(&str, Vec<Entity>)>, delay: Duration) -> Arc<Self> {
        let mut s = Self::new(tables);
        if let Some(inner) = Arc::get_mut(&mut s) {
            inner.delay = delay;
        }
        s
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Connector for Source {
    async fn query(&self, query: &ConnectorQuery) -> Result<ConnectorResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ConnectorResponse { entities: self.tables.get(&query.entity_type).cloned().unwrap_or_default(), edges: vec![] })
    }
}

fn entity(id: &str, attrs: Vec<(&str, Value)>) -> Entity {
    Entity::new(id, attrs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn host_data() -> Vec<(&'static str, Vec<Entity>)> {
    vec![
        (
            "process",
            vec![
                entity("p1", vec![("name", "cmd.exe".into()), ("pid", Value::Int(4)), ("accessed_refs", Value::List(vec!["f1".into()]))]),
                entity("p2", vec![("name", "svchost.exe".into()), ("pid", Value::Int(8)), ("accessed_refs", Value::List(vec!["f2".into()]))]),
            ],
        ),
        (
            "file",
            vec![
                entity("f1", vec![("path", "C:\\tmp\\drop.exe".into())]),
                entity("f2", vec![("path", "C:\\Windows\\svc.exe".into())]),
                entity("f3", vec![("path", "C:\\notes.txt".into())]),
            ],
        ),
    ]
}

async fn run(s: &mut Session, src: &str) -> Vec<StatementOutcome> {
    s.execute(src).await.into_iter().map(|r| r.unwrap_or_else(|f| panic!("{}", f))).collect()
}

fn ids(s: &Session, name: &str) -> Vec<String> { s.table(name).unwrap().rows.into_iter().map(|r| r.id).collect() }

#[tokio::test]
async fn accessed_files_are_a_subset_of_the_fetched_files() {
    let mut s = Session::new(HuntConfig::default()).unwrap();
    s.register_connector("src1", ConnectorCapabilities::for_types(["process", "file"]), Source::new(host_data()));
    run(
        &mut s,
        "a = GET process FROM src1 WHERE name = 'cmd.exe'
         b = GET file FROM src1 WHERE path LIKE '%.exe'
         c = FIND accessed BETWEEN a AND b",
    )
    .await;
    assert_eq!(ids(&s, "b"), vec!["f1", "f2"]);
    let c = ids(&s, "c");
    assert_eq!(c, vec!["f1"]);
    assert!(c.iter().all(|id| ids(&s, "b").contains(id)));

    run(&mut s, "a = GET process FROM src1 WHERE name = 'nothing.exe'\nc = FIND accessed BETWEEN a AND b").await;
    assert!(s.table("c").unwrap().is_empty());
    assert!(s.is_acyclic());
}

#[tokio::test]
async fn repeated_fetch_is_served_from_cache() {
    let src = Source::new(host_data());
    let mut s = Session::new(HuntConfig::default()).unwrap();
    s.register_connector("src1", ConnectorCapabilities::for_types(["process", "file"]), src.clone());
    let first = run(&mut s, "x = GET process WHERE pid > 1").await;
    assert_eq!(src.calls(), 1);
    let before = s.table("x").unwrap().rows;
    let second = run(&mut s, "x = GET process WHERE pid > 1").await;
    assert_eq!(src.calls(), 1);
    assert_eq!(s.table("x").unwrap().rows, before);
    assert_eq!(first[0].report.as_ref().unwrap().requests_issued(), 1);
    assert_eq!(second[0].report.as_ref().unwrap().requests_issued(), 0);
}

#[tokio::test]
async fn concurrent_identical_fetches_share_one_request() {
    let src = Source::slow(host_data(), Duration::from_millis(50));
    let mut reg = ConnectorRegistry::new();
    reg.register("src1", ConnectorCapabilities::for_types(["process"]), src.clone());
    let engine = FederationEngine::new(&HuntConfig::default());
    let connectors = reg.for_type("process");
    let q = ConnectorQuery { entity_type: "process".into(), pattern: None, window: None, limit: None };
    let (a, b) = futures::join!(engine.fetch(&q, &connectors), engine.fetch(&q, &connectors));
    assert_eq!(src.calls(), 1);
    assert_eq!(a.unwrap().table.rows, b.unwrap().table.rows);
}

#[tokio::test]
async fn a_late_connector_degrades_coverage_without_failing() {
    let fast = Source::new(host_data());
    let late = Source::slow(vec![("process", vec![entity("p9", vec![("name", "late.exe".into())])])], Duration::from_millis(400));
    let mut s = Session::new(HuntConfig::default()).unwrap();
    s.register_connector("edr", ConnectorCapabilities::for_types(["process"]), fast);
    s.register_connector("siem", ConnectorCapabilities::for_types(["process"]).with_timeout(Duration::from_millis(20)), late.clone());
    let out = run(&mut s, "p = GET process").await;
    assert_eq!(ids(&s, "p"), vec!["p1", "p2"]);
    let report = out[0].report.as_ref().unwrap();
    assert!(report.degraded());
    assert_eq!(report.degraded_connectors(), vec!["siem"]);
    assert!(!out[0].warnings.is_empty());

    // the only source for a type answering late is degraded coverage, not a failure
    let mut s = Session::new(HuntConfig::default()).unwrap();
    s.register_connector("siem", ConnectorCapabilities::for_types(["process"]).with_timeout(Duration::from_millis(20)), late);
    let out = run(&mut s, "p = GET process").await;
    assert!(s.table("p").unwrap().is_empty());
    assert!(matches!(out[0].report.as_ref().unwrap().outcomes[0].status, OutcomeStatus::Degraded(_)));

    // while no source at all is a hard error
    let res = s.execute("f = GET file").await;
    assert!(matches!(res[0].as_ref().unwrap_err().error, HuntError::NoApplicableConnector { .. }));
}

struct Tagger {
    calls: AtomicUsize,
}

impl AnalyticsExecutor for Tagger {
    fn execute(&self, input: &AnalyticsInput, _cancel: &CancelFlag) -> Result<AnalyticsOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_, table) = &input.tables[0];
        let rows = table
            .rows
            .iter()
            .map(|r| {
                let mut r = r.clone();
                r.attributes.insert("suspicious".into(), Value::Bool(r.get("name") == &Value::Str("cmd.exe".into())));
                r
            })
            .collect();
        Ok(AnalyticsOutput::default().with("tagged", EntityTable::new(table.entity_type.clone(), rows)))
    }
}

#[tokio::test]
async fn analytics_checks_schema_before_running() {
    let tagger = Arc::new(Tagger { calls: AtomicUsize::new(0) });
    let mut s = Session::new(HuntConfig::default()).unwrap();
    s.register_connector("src1", ConnectorCapabilities::for_types(["process", "file"]), Source::new(host_data()));
    s.register_module(
        "tag",
        InputRequirement::of_type("process").requiring("name", Some(AttrType::Str)),
        vec![OutputSpec { name: "tagged".into(), entity_type: None, required_attributes: vec!["suspicious".into()] }],
        tagger.clone(),
    );
    run(&mut s, "p = GET process\nf = GET file").await;
    let before = s.list_variables();
    let res = s.execute("t = APPLY tag ON f").await;
    assert!(matches!(res[0].as_ref().unwrap_err().error, HuntError::SchemaMismatch { .. }));
    assert_eq!(tagger.calls.load(Ordering::SeqCst), 0);
    assert_eq!(s.list_variables(), before);

    run(&mut s, "t = APPLY tag ON p").await;
    assert_eq!(tagger.calls.load(Ordering::SeqCst), 1);
    let t = s.table("t").unwrap();
    assert_eq!(t.entity_type, "process");
    assert_eq!(t.rows[0].get("suspicious"), &Value::Bool(true));
    assert_eq!(s.lineage("t").unwrap(), vec!["p".to_string()]);

    // without an assignment the output replaces the input variable
    run(&mut s, "APPLY tag ON p").await;
    assert!(s.table("p").unwrap().schema.has("suspicious"));
    assert!(s.is_acyclic());
}

/// Works for `delay` (giving up early once cancelled), then fails or echoes its input.
struct Stall {
    delay: Duration,
    fail: bool,
    finished: AtomicUsize,
}

impl Stall {
    fn new(delay: Duration, fail: bool) -> Arc<Self> { Arc::new(Self { delay, fail, finished: AtomicUsize::new(0) }) }
}

impl AnalyticsExecutor for Stall {
    fn execute(&self, input: &AnalyticsInput, cancel: &CancelFlag) -> Result<AnalyticsOutput> {
        let started = Instant::now();
        while started.elapsed() < self.delay {
            if cancel.is_cancelled() {
                bail!("cancelled");
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        if self.fail {
            bail!("model file missing");
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        let (_, table) = &input.tables[0];
        Ok(AnalyticsOutput::default().with("out", table.clone()))
    }
}

fn descriptor(name: &str, timeout: Option<Duration>) -> ModuleDescriptor {
    ModuleDescriptor { name: name.into(), input: InputRequirement::of_type("process"), outputs: vec![OutputSpec::named("out")], timeout }
}

#[tokio::test]
async fn failed_analytics_bind_nothing_and_the_batch_goes_on() {
    let mut s = Session::new(HuntConfig::default()).unwrap();
    s.register_connector("src1", ConnectorCapabilities::for_types(["process"]), Source::new(host_data()));
    let slow = Stall::new(Duration::from_secs(2), false);
    s.register_module_descriptor(descriptor("slow", Some(Duration::from_millis(30))), slow.clone());
    s.register_module("broken", InputRequirement::of_type("process"), vec![OutputSpec::named("out")], Stall::new(Duration::ZERO, true));
    run(&mut s, "p = GET process").await;
    let before = s.list_variables();

    let started = Instant::now();
    let res = s.execute("t = APPLY slow ON p
q = p WHERE pid > 4").await;
    assert!(started.elapsed() < Duration::from_secs(2));
    match &res[0].as_ref().unwrap_err().error {
        HuntError::Analytics { module, message } => {
            assert_eq!(module, "slow");
            assert!(message.contains("timed out"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(s.variable("t").is_err());
    assert_eq!(slow.finished.load(Ordering::SeqCst), 0);
    assert_eq!(res[1].as_ref().unwrap().bound[0].name, "q");
    assert_eq!(ids(&s, "q"), vec!["p2"]);

    let res = s.execute("u = APPLY broken ON p").await;
    assert!(matches!(res[0].as_ref().unwrap_err().error, HuntError::Analytics { .. }));
    assert!(s.variable("u").is_err());
    let after: Vec<String> = s.list_variables().into_iter().map(|v| v.name).collect();
    let mut expected: Vec<String> = before.into_iter().map(|v| v.name).collect();
    expected.push("q".into());
    assert_eq!(after, expected);
}

#[tokio::test]
async fn module_timeout_overrides_the_session_default() {
    let config = HuntConfig { analytics_timeout_ms: 20, ..HuntConfig::default() };
    let mut s = Session::new(config).unwrap();
    s.register_connector("src1", ConnectorCapabilities::for_types(["process"]), Source::new(host_data()));
    let patient = Stall::new(Duration::from_millis(80), false);
    s.register_module_descriptor(descriptor("patient", Some(Duration::from_secs(5))), patient.clone());
    s.register_module("hasty", InputRequirement::of_type("process"), vec![OutputSpec::named("out")], Stall::new(Duration::from_millis(80), false));
    run(&mut s, "p = GET process").await;

    run(&mut s, "t = APPLY patient ON p").await;
    assert_eq!(patient.finished.load(Ordering::SeqCst), 1);
    assert_eq!(s.table("t").unwrap().len(), 2);

    let res = s.execute("h = APPLY hasty ON p").await;
    assert!(matches!(res[0].as_ref().unwrap_err().error, HuntError::Analytics { .. }));
}

#[tokio::test]
async fn close_releases_everything() {
    let mut s = Session::new(HuntConfig::default()).unwrap();
    s.register_connector("src1", ConnectorCapabilities::for_types(["process", "file"]), Source::new(host_data()));
    run(&mut s, "a = GET process\nb = GET file\nc = FIND accessed BETWEEN a AND b").await;
    let report = s.close().unwrap();
    assert_eq!(report.variables_released, 3);
    assert_eq!(report.tables_dropped, 3);
    assert_eq!(report.cache_entries_discarded, 2);
    assert_eq!(report.connectors_released, 1);
    assert!(s.list_variables().is_empty());
}
