//! Built-in relationship rules. A rule derives edges from reference attributes: either
//! the source entity holds the target's id (`SourceRef`) or the target holds the
//! source's id (`TargetRef`). Reference attributes may hold one id or a list of ids.

use std::collections::HashSet;

use crate::schema::compatible;
use crate::types::{Edge, Entity, EntityTable, Value};

/// Relation matching every relation in either direction.
pub const LINKED: &str = "linked";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSide {
    SourceRef(&'static str),
    TargetRef(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationRule {
    pub src_type: &'static str,
    pub relation: &'static str,
    pub dst_type: &'static str,
    pub side: RefSide,
}

const fn rule(src_type: &'static str, relation: &'static str, dst_type: &'static str, side: RefSide) -> RelationRule {
    RelationRule { src_type, relation, dst_type, side }
}

pub static RULES: &[RelationRule] = &[
    rule("process", "created", "network-traffic", RefSide::SourceRef("opened_connection_refs")),
    rule("process", "created", "process", RefSide::TargetRef("parent_ref")),
    rule("process", "loaded", "file", RefSide::SourceRef("binary_ref")),
    rule("process", "accessed", "file", RefSide::SourceRef("accessed_refs")),
    rule("network-traffic", "created", "ipv4-addr", RefSide::SourceRef("src_ref")),
    rule("network-traffic", "accepted", "ipv4-addr", RefSide::SourceRef("dst_ref")),
    rule("user-account", "owned", "process", RefSide::TargetRef("creator_user_ref")),
    rule("directory", "contained", "file", RefSide::TargetRef("parent_directory_ref")),
];

/// Whether a built-in rule (or the generic `linked`) defines `relation`.
pub fn is_builtin(relation: &str) -> bool { relation == LINKED || RULES.iter().any(|r| r.relation == relation) }

/// Whether any rule for `relation` can connect entities of `src` type to `dst` type.
pub fn rule_connects(relation: &str, src: &str, dst: &str) -> bool {
    RULES.iter().any(|r| {
        (relation == LINKED || r.relation == relation)
            && ((compatible(r.src_type, src) && compatible(r.dst_type, dst))
                || (relation == LINKED && compatible(r.src_type, dst) && compatible(r.dst_type, src)))
    })
}

fn ref_ids(v: &Value) -> Vec<&str> {
    match v {
        Value::Str(s) => vec![s.as_str()],
        Value::List(items) => items.iter().filter_map(|i| i.as_str()).collect(),
        _ => Vec::new(),
    }
}

fn edges_from_refs(rule: &RelationRule, src: &[Entity], dst: &[Entity], out: &mut Vec<Edge>) {
    let edge = |s: &str, d: &str| Edge { relation: rule.relation.to_string(), src: s.to_string(), dst: d.to_string(), observed_at: None };
    match rule.side {
        RefSide::SourceRef(attr) => {
            let dst_ids: HashSet<&str> = dst.iter().map(|e| e.id.as_str()).collect();
            for s in src {
                for id in ref_ids(s.get(attr)) {
                    if dst_ids.contains(id) {
                        out.push(edge(&s.id, id));
                    }
                }
            }
        }
        RefSide::TargetRef(attr) => {
            let src_ids: HashSet<&str> = src.iter().map(|e| e.id.as_str()).collect();
            for d in dst {
                for id in ref_ids(d.get(attr)) {
                    if src_ids.contains(id) {
                        out.push(edge(id, &d.id));
                    }
                }
            }
        }
    }
}

/// Edges from `src` entities to `dst` entities derived by the rules for `relation`.
/// For `linked`, rules are applied in both directions and edges keep their own
/// relation names.
pub fn rule_edges(relation: &str, src: &EntityTable, dst: &EntityTable) -> Vec<Edge> {
    let mut out = Vec::new();
    for r in RULES {
        if relation != LINKED && r.relation != relation {
            continue;
        }
        if compatible(r.src_type, &src.entity_type) && compatible(r.dst_type, &dst.entity_type) {
            edges_from_refs(r, &src.rows, &dst.rows, &mut out);
        }
        if relation == LINKED && compatible(r.src_type, &dst.entity_type) && compatible(r.dst_type, &src.entity_type) {
            edges_from_refs(r, &dst.rows, &src.rows, &mut out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ent(id: &str, attrs: &[(&str, Value)]) -> Entity {
        Entity::new(id, attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<BTreeMap<_, _>>())
    }

    #[test]
    fn source_and_target_refs_produce_edges() {
        let procs = EntityTable::new(
            "process",
            vec![
                ent("p1", &[("accessed_refs", Value::List(vec!["f1".into(), "f9".into()]))]),
                ent("p2", &[("parent_ref", "p1".into())]),
            ],
        );
        let files = EntityTable::new("file", vec![ent("f1", &[("name", "a.exe".into())])]);
        let accessed = rule_edges("accessed", &procs, &files);
        assert_eq!(accessed.len(), 1);
        assert_eq!((accessed[0].src.as_str(), accessed[0].dst.as_str()), ("p1", "f1"));
        let children = rule_edges("created", &procs, &procs);
        assert_eq!((children[0].src.as_str(), children[0].dst.as_str()), ("p1", "p2"));
    }

    #[test]
    fn linked_applies_rules_in_both_directions() {
        let procs = EntityTable::new("process", vec![ent("p1", &[("binary_ref", "f1".into())])]);
        let files = EntityTable::new("file", vec![ent("f1", &[])]);
        assert_eq!(rule_edges(LINKED, &files, &procs).len(), 1);
        assert!(rule_connects(LINKED, "file", "process"));
        assert!(!rule_connects("loaded", "file", "process"));
        assert!(is_builtin("created") && !is_builtin("teleported"));
    }
}
