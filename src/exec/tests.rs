// Statement-level tests for the executor, driven through a session with inline data.

use crate::display::Display;
use crate::error::HuntError;
use crate::session::{Session, StatementOutcome};
use crate::types::Value;
use crate::HuntConfig;

use super::exec_apply::output_names;
use super::exec_persist::resolve_target;

const PROCS: &str = r#"a = NEW process [
    {"id": "1", "name": "cmd", "pid": 1},
    {"id": "2", "name": "cmd", "pid": 2},
    {"id": "3", "name": "sh", "pid": 5}
]"#;

fn session() -> Session { Session::new(HuntConfig::default()).unwrap() }

async fn run(s: &mut Session, src: &str) -> Vec<StatementOutcome> {
    s.execute(src).await.into_iter().map(|r| r.unwrap_or_else(|f| panic!("{}", f))).collect()
}

async fn fail(s: &mut Session, src: &str) -> HuntError {
    let mut out = s.execute(src).await;
    assert_eq!(out.len(), 1, "expected a single statement");
    match out.remove(0) {
        Ok(o) => panic!("statement succeeded: {}", o.statement),
        Err(f) => f.error,
    }
}

fn ids(s: &Session, name: &str) -> Vec<String> { s.table(name).unwrap().rows.into_iter().map(|r| r.id).collect() }

#[tokio::test]
async fn join_by_attribute_fills_from_right() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, r#"b = NEW process [{"id": "q", "pid": 2, "user": "bob"}]"#).await;
    run(&mut s, "j = JOIN a, b BY pid").await;
    let j = s.table("j").unwrap();
    assert_eq!(j.len(), 1);
    assert_eq!(j.rows[0].id, "2");
    assert_eq!(j.rows[0].get("user"), &Value::Str("bob".into()));
    assert_eq!(s.lineage("j").unwrap(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn join_of_incompatible_types_changes_nothing() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, r#"f = NEW file [{"id": "f1", "name": "a.exe"}]"#).await;
    let before = s.list_variables();
    let err = fail(&mut s, "j = JOIN a, f").await;
    assert!(matches!(err, HuntError::TypeMismatch { .. }), "{:?}", err);
    assert_eq!(s.list_variables(), before);
}

#[tokio::test]
async fn group_counts_and_sums() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, "g = GROUP a BY name WITH COUNT(*), SUM(pid)").await;
    let g = s.table("g").unwrap();
    assert_eq!(g.entity_type, "process");
    assert_eq!(g.len(), 2);
    let cmd = &g.rows[0];
    assert_eq!(cmd.get("name"), &Value::Str("cmd".into()));
    assert_eq!(cmd.get("count"), &Value::Int(2));
    assert_eq!(cmd.get("sum_pid"), &Value::Int(3));
    assert!(cmd.id.starts_with("group--"));

    run(&mut s, "c = GROUP a BY name").await;
    assert_eq!(s.table("c").unwrap().rows[1].get("count"), &Value::Int(1));
}

#[tokio::test]
async fn sum_over_text_is_a_type_mismatch() {
    let mut s = session();
    run(&mut s, PROCS).await;
    let err = fail(&mut s, "g = GROUP a BY pid WITH SUM(name)").await;
    assert!(matches!(err, HuntError::TypeMismatch { .. }));
}

#[tokio::test]
async fn sort_defaults_to_descending() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, "s = SORT a BY pid").await;
    assert_eq!(ids(&s, "s"), vec!["3", "2", "1"]);
    run(&mut s, "s = SORT a BY pid ASC").await;
    assert_eq!(ids(&s, "s"), vec!["1", "2", "3"]);
    let err = fail(&mut s, "s = SORT a BY nope").await;
    assert!(matches!(err, HuntError::Semantic { .. }));
}

#[tokio::test]
async fn variable_references_resolve_to_value_lists() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, r#"b = NEW process [{"id": "x", "name": "cmd"}]"#).await;
    run(&mut s, "c = a WHERE name = b.name ATTR name SORT BY pid ASC").await;
    let c = s.table("c").unwrap();
    assert_eq!(c.rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["1", "2"]);
    assert!(c.rows[0].get("pid").is_null());
    let lineage = s.lineage("c").unwrap();
    assert!(lineage.contains(&"a".to_string()) && lineage.contains(&"b".to_string()));
    assert_eq!(s.dependents("b").unwrap().into_iter().collect::<Vec<_>>(), vec!["c".to_string()]);
}

#[tokio::test]
async fn merge_unions_by_id() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, r#"b = NEW process [{"id": "3", "user": "root"}, {"id": "9", "name": "init"}]"#).await;
    run(&mut s, "m = a + b").await;
    let m = s.table("m").unwrap();
    assert_eq!(m.len(), 4);
    let sh = m.rows.iter().find(|r| r.id == "3").unwrap();
    assert_eq!(sh.get("user"), &Value::Str("root".into()));
    assert_eq!(sh.get("name"), &Value::Str("sh".into()));
}

#[tokio::test]
async fn find_between_follows_reference_attributes() {
    let mut s = session();
    run(
        &mut s,
        r#"a = NEW process [{"id": "p1", "name": "cmd.exe", "accessed_refs": ["f1"]}]
        b = NEW file [{"id": "f1", "name": "a.exe"}, {"id": "f2", "name": "b.exe"}]
        c = FIND accessed BETWEEN a AND b"#,
    )
    .await;
    assert_eq!(ids(&s, "c"), vec!["f1"]);
    assert_eq!(s.variable("c").unwrap().entity_type(), "file");

    run(&mut s, "e = a WHERE name = 'nothing'\nd = FIND accessed BETWEEN e AND b").await;
    assert!(s.table("d").unwrap().is_empty());
}

#[tokio::test]
async fn find_rejects_unknown_relations() {
    let mut s = session();
    run(&mut s, PROCS).await;
    let err = fail(&mut s, "c = FIND teleported BETWEEN a AND a").await;
    assert!(matches!(err, HuntError::Semantic { .. }), "{:?}", err);
}

#[tokio::test]
async fn find_related_in_both_directions() {
    let mut s = session();
    run(
        &mut s,
        r#"procs = NEW process [{"id": "p1", "name": "explorer"}, {"id": "p2", "name": "cmd", "parent_ref": "p1"}]
        root = procs WHERE name = 'explorer'
        kid = procs WHERE name = 'cmd'
        children = FIND process created BY root
        parents = FIND process created kid"#,
    )
    .await;
    assert_eq!(ids(&s, "children"), vec!["p2"]);
    assert_eq!(ids(&s, "parents"), vec!["p1"]);
}

#[tokio::test]
async fn get_from_variable_filters_locally() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, "b = GET process FROM a WHERE pid > 1").await;
    assert_eq!(ids(&s, "b"), vec!["2", "3"]);
    let err = fail(&mut s, "c = GET file FROM a").await;
    assert!(matches!(err, HuntError::TypeMismatch { .. }));
    let err = fail(&mut s, "c = GET file WHERE name = 'x'").await;
    assert!(matches!(err, HuntError::NoApplicableConnector { .. }));
}

#[tokio::test]
async fn disp_puts_id_first_and_collapses_duplicates() {
    let mut s = session();
    run(&mut s, PROCS).await;
    let out = run(&mut s, "DISP a ATTR name").await;
    match out[0].display.as_ref().unwrap() {
        Display::Table { columns, rows } => {
            assert_eq!(columns, &vec!["name".to_string()]);
            assert_eq!(rows.len(), 2);
        }
        other => panic!("unexpected display {:?}", other),
    }
    let out = run(&mut s, "DISP a SORT BY pid ASC LIMIT 1").await;
    match out[0].display.as_ref().unwrap() {
        Display::Table { columns, rows } => {
            assert_eq!(columns[0], "id");
            assert_eq!(rows, &vec![vec![Value::Str("1".into()), Value::Str("cmd".into()), Value::Int(1)]]);
        }
        other => panic!("unexpected display {:?}", other),
    }
    assert!(out[0].bound.is_empty());
}

#[tokio::test]
async fn info_lists_type_count_and_lineage() {
    let mut s = session();
    run(&mut s, PROCS).await;
    run(&mut s, "b = a WHERE pid > 1").await;
    let out = run(&mut s, "INFO b").await;
    let Some(Display::Info { entries }) = &out[0].display else { panic!("expected info") };
    let get = |k: &str| entries.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone()).unwrap();
    assert_eq!(get("entity type"), "process");
    assert_eq!(get("entities"), "2");
    assert!(get("lineage").starts_with("a (NEW)"));
}

#[tokio::test]
async fn save_and_load_round_trip_under_store_root() {
    let tmp = tempfile::tempdir().unwrap();
    let config = HuntConfig { store_root: tmp.path().to_path_buf(), ..HuntConfig::default() };
    let mut s = Session::new(config).unwrap();
    run(&mut s, PROCS).await;
    run(&mut s, "SAVE a TO 'hunt/procs.json'\nl = LOAD 'hunt/procs.json'").await;
    assert!(tmp.path().join("hunt/procs.json").exists());
    let l = s.table("l").unwrap();
    assert_eq!(l.entity_type, "process");
    assert_eq!(l.len(), 3);
}

#[tokio::test]
async fn failed_statement_does_not_stop_the_batch() {
    let mut s = session();
    let out = s.execute(&format!("{}\nx = SORT missing BY pid\ny = a", PROCS)).await;
    assert_eq!(out.len(), 3);
    assert!(matches!(out[1].as_ref().unwrap_err().error, HuntError::UndefinedVariable { .. }));
    assert!(out[2].is_ok());

    let config = HuntConfig { halt_on_error: true, ..HuntConfig::default() };
    let mut s = Session::new(config).unwrap();
    let out = s.execute("x = SORT missing BY pid\ny = NEW [\"a\"]").await;
    assert_eq!(out.len(), 1);
    assert!(s.list_variables().is_empty());
}

#[test]
fn apply_output_naming() {
    let inputs = vec!["a".to_string(), "b".to_string()];
    let outputs = vec!["scored".to_string(), "alerts".to_string(), "extra".to_string()];
    assert_eq!(output_names(Some("v"), &inputs, &outputs), vec!["v", "v_alerts", "v_extra"]);
    assert_eq!(output_names(None, &inputs, &outputs), vec!["a", "b", "extra"]);
}

#[test]
fn save_targets_resolve_under_store_root() {
    let cfg = HuntConfig { store_root: "/data".into(), ..HuntConfig::default() };
    assert_eq!(resolve_target("x.parquet", &cfg), std::path::PathBuf::from("/data/x.parquet"));
    assert_eq!(resolve_target("file:///tmp/x.csv", &cfg), std::path::PathBuf::from("/tmp/x.csv"));
}

#[tokio::test]
async fn new_takes_the_type_named_by_its_records() {
    let mut s = session();
    run(&mut s, r#"p = NEW [{"type": "process", "name": "cmd.exe", "pid": 4}, {"type": "process", "name": "sh", "pid": 7}]"#).await;
    let p = s.table("p").unwrap();
    assert_eq!(p.entity_type, "process");
    assert!(!p.schema.has("type"));
    run(&mut s, r#"q = NEW [{"name": "x"}]"#).await;
    assert_eq!(s.table("q").unwrap().entity_type, "record");

    let err = fail(&mut s, r#"m = NEW [{"type": "process", "name": "a"}, {"type": "file", "name": "b"}]"#).await;
    assert!(matches!(err, HuntError::Semantic { .. }), "{:?}", err);
}

#[tokio::test]
async fn duplicate_records_collapse_into_one_row() {
    let mut s = session();
    run(&mut s, r#"d = NEW process [{"name": "cmd.exe", "pid": 4}, {"name": "cmd.exe", "pid": 4}]"#).await;
    assert_eq!(s.table("d").unwrap().len(), 1);
    run(&mut s, r#"e = NEW process [{"id": "p1", "name": "cmd.exe"}, {"id": "p1", "pid": 4}]"#).await;
    let e = s.table("e").unwrap();
    assert_eq!(e.len(), 1);
    assert_eq!(e.rows[0].get("pid"), &Value::Int(4));
    assert_eq!(e.rows[0].get("name"), &Value::Str("cmd.exe".into()));
}

#[tokio::test]
async fn load_infers_type_and_absorbs_duplicates() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("procs.json"),
        r#"[{"type": "process", "id": "p1", "name": "reg.exe"}, {"type": "process", "id": "p1", "name": "reg.exe"}, {"type": "process", "id": "p2", "name": "cmd.exe"}]"#,
    )
    .unwrap();
    let config = HuntConfig { store_root: tmp.path().to_path_buf(), ..HuntConfig::default() };
    let mut s = Session::new(config).unwrap();
    run(&mut s, "v = LOAD 'procs.json'").await;
    let v = s.table("v").unwrap();
    assert_eq!(v.entity_type, "process");
    assert_eq!(ids(&s, "v"), vec!["p1", "p2"]);
}
