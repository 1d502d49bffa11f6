use super::*;
use crate::types::Value;

fn proc(id: &str, pid: i64, name: &str) -> Entity {
    let mut attrs = std::collections::BTreeMap::new();
    attrs.insert("pid".to_string(), Value::Int(pid));
    attrs.insert("name".to_string(), Value::Str(name.to_string()));
    Entity::new(id, attrs)
}

fn sample() -> EntityTable {
    EntityTable::new("process", vec![proc("p1", 4, "cmd.exe"), proc("p2", 8, "explorer.exe")])
}

#[test]
fn append_is_all_or_nothing() {
    let store = MemoryStore::new();
    let t = sample();
    let h = store.create_table(&t.schema).unwrap();
    store.append(h, t.rows.clone()).unwrap();
    // second batch contains one new row and one duplicate id: nothing may land
    let err = store.append(h, vec![proc("p3", 9, "x"), proc("p1", 4, "cmd.exe")]).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
    assert_eq!(store.query(h, None).unwrap().len(), 2);
}

#[test]
fn append_rejects_unknown_attributes() {
    let store = MemoryStore::new();
    let h = store.create_table(&sample().schema).unwrap();
    let mut bad = proc("p9", 1, "a");
    bad.attributes.insert("unexpected".into(), Value::Int(1));
    assert!(store.append(h, vec![bad]).is_err());
    assert!(store.query(h, None).unwrap().is_empty());
}

#[test]
fn query_with_predicate_and_describe() {
    let store = MemoryStore::new();
    let h = store.create_with_rows(&sample()).unwrap();
    let pred = |e: &Entity| matches!(e.get("pid"), Value::Int(p) if *p > 5);
    let rows = store.query(h, Some(&pred)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "p2");
    assert_eq!(store.describe(h).unwrap().entity_type, "process");
    store.drop_table(h).unwrap();
    assert!(store.describe(h).is_err());
}

#[test]
fn edges_are_deduplicated() {
    let store = MemoryStore::new();
    let e = Edge { relation: "created".into(), src: "a".into(), dst: "b".into(), observed_at: None };
    store.record_edges(&[e.clone(), e.clone()]).unwrap();
    assert_eq!(store.edges(Some("created")).unwrap().len(), 1);
    assert!(store.edges(Some("loaded")).unwrap().is_empty());
}

#[test]
fn persist_and_load_parquet_csv_json() {
    let tmp = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    let h = store.create_with_rows(&sample()).unwrap();
    for file in ["procs.parquet", "procs.csv", "procs.json"] {
        let path = tmp.path().join(file);
        assert_eq!(store.persist(h, &path).unwrap(), 2);
        let back = store.load(&path, None).unwrap();
        assert_eq!(back.entity_type, "process", "{}", file);
        assert_eq!(back.len(), 2, "{}", file);
        assert_eq!(back.rows[0].id, "p1", "{}", file);
        assert_eq!(back.rows[1].get("pid"), &Value::Int(8), "{}", file);
        assert_eq!(back.rows[0].get("name"), &Value::Str("cmd.exe".into()), "{}", file);
    }
}

#[test]
fn load_plain_json_records_with_type_override() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("ips.json");
    std::fs::write(&path, r#"[{"value": "10.0.0.1"}, {"value": "10.0.0.2"}]"#).unwrap();
    let store = MemoryStore::new();
    let t = store.load(&path, Some("ipv4-addr")).unwrap();
    assert_eq!(t.entity_type, "ipv4-addr");
    assert_eq!(t.len(), 2);
    assert!(t.rows[0].id.starts_with("ipv4-addr--"));
    assert!(store.load(&tmp.path().join("missing.json"), None).is_err());
}
