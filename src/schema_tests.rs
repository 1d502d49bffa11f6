use super::*;

fn schema(ty: &str, attrs: &[(&str, AttrType)]) -> Schema {
    Schema::new(ty, attrs.iter().map(|(n, t)| Attribute { name: n.to_string(), ty: *t }).collect())
}

#[test]
fn unify_is_superset_in_first_seen_order() {
    let a = schema("process", &[("pid", AttrType::Int), ("name", AttrType::Str)]);
    let b = schema("process", &[("name", AttrType::Str), ("command_line", AttrType::Str)]);
    let u = unify(&[a, b]);
    assert_eq!(u.schema.entity_type, "process");
    assert_eq!(u.schema.names(), vec!["pid", "name", "command_line"]);
    assert!(u.warnings.is_empty());
}

#[test]
fn int_and_float_widen_without_warning() {
    let a = schema("network-traffic", &[("bytes", AttrType::Int)]);
    let b = schema("network-traffic", &[("bytes", AttrType::Float)]);
    let u = unify(&[a, b]);
    assert_eq!(u.schema.type_of("bytes"), Some(AttrType::Float));
    assert!(u.warnings.is_empty());
}

#[test]
fn null_yields_to_other_type() {
    let a = schema("file", &[("size", AttrType::Null)]);
    let b = schema("file", &[("size", AttrType::Int)]);
    assert_eq!(unify(&[a, b]).schema.type_of("size"), Some(AttrType::Int));
}

#[test]
fn conflicting_types_become_untyped_with_warning() {
    let a = schema("process", &[("pid", AttrType::Int)]);
    let b = schema("process", &[("pid", AttrType::Str)]);
    let u = unify(&[a, b]);
    assert_eq!(u.schema.type_of("pid"), Some(AttrType::Untyped));
    assert_eq!(u.warnings.len(), 1);
    assert_eq!(u.warnings[0].attribute, "pid");
    assert_eq!(u.warnings[0].types, vec![AttrType::Int, AttrType::Str]);
}

#[test]
fn mixed_entity_types_unify_to_record() {
    let a = schema("process", &[("pid", AttrType::Int)]);
    let b = schema("file", &[("name", AttrType::Str)]);
    let u = unify(&[a, b]);
    assert_eq!(u.schema.entity_type, GENERIC_ENTITY_TYPE);
    assert_eq!(u.schema.names(), vec!["pid", "name"]);
}

#[test]
fn compatibility_groups() {
    assert!(compatible("process", "process"));
    assert!(compatible("ipv4-addr", "domain-name"));
    assert!(compatible("file", "directory"));
    assert!(compatible("record", "process"));
    assert!(!compatible("process", "file"));
    assert!(!compatible("ipv4-addr", "file"));
}

#[test]
fn infer_marks_in_table_conflicts_untyped() {
    let rows = vec![
        Entity::new("a", [("x".to_string(), Value::Int(1))].into_iter().collect()),
        Entity::new("b", [("x".to_string(), Value::Str("one".into())), ("y".to_string(), Value::Null)].into_iter().collect()),
    ];
    let s = Schema::infer("record", &rows);
    assert_eq!(s.type_of("x"), Some(AttrType::Untyped));
    assert_eq!(s.type_of("y"), Some(AttrType::Null));
    assert_eq!(s.type_of("id"), Some(AttrType::Str));
}

#[test]
fn conform_fills_missing_with_null() {
    let s = schema("process", &[("pid", AttrType::Int), ("name", AttrType::Str)]);
    let mut rows = vec![Entity::new("p1", [("pid".to_string(), Value::Int(4))].into_iter().collect())];
    s.conform(&mut rows);
    assert_eq!(rows[0].attributes.get("name"), Some(&Value::Null));
}
