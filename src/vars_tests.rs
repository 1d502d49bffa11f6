use super::*;

fn pending(name: &str, handle: u64, lineage: Vec<VarId>) -> PendingBinding {
    PendingBinding {
        name: name.to_string(),
        handle: TableHandle(handle),
        schema: Schema::empty("process"),
        row_count: 0,
        lineage,
        birth: Birth { command: "GET".into(), ..Default::default() },
    }
}

#[test]
fn resolve_unknown_is_undefined_variable() {
    let vm = VariableManager::new();
    assert_eq!(vm.resolve("nope").unwrap_err(), HuntError::undefined("nope"));
}

#[test]
fn rebinding_creates_new_node_and_keeps_old_lineage() {
    let mut vm = VariableManager::new();
    let a0 = vm.bind(pending("a", 1, vec![])).unwrap().id;
    let b = vm.bind(pending("b", 2, vec![a0])).unwrap().id;
    let a1 = vm.bind(pending("a", 3, vec![a0])).unwrap().id;
    assert_ne!(a0, a1);
    assert_eq!(vm.resolve("a").unwrap().id, a1);
    // b still derives from the superseded node
    assert_eq!(vm.node(b).unwrap().lineage, vec![a0]);
    assert!(vm.node(a0).is_some());
    assert!(vm.is_acyclic());
}

#[test]
fn dependents_are_transitive_and_follow_current_node() {
    let mut vm = VariableManager::new();
    let a = vm.bind(pending("a", 1, vec![])).unwrap().id;
    let b = vm.bind(pending("b", 2, vec![a])).unwrap().id;
    vm.bind(pending("c", 3, vec![b])).unwrap();
    vm.bind(pending("d", 4, vec![])).unwrap();
    let deps = vm.dependents("a").unwrap();
    assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["b".to_string(), "c".to_string()]);
    // After rebinding, the new node of `a` has no dependents yet
    vm.bind(pending("a", 5, vec![])).unwrap();
    assert!(vm.dependents("a").unwrap().is_empty());
}

#[test]
fn lineage_is_breadth_first_without_duplicates() {
    let mut vm = VariableManager::new();
    let a = vm.bind(pending("a", 1, vec![])).unwrap().id;
    let b = vm.bind(pending("b", 2, vec![a])).unwrap().id;
    vm.bind(pending("c", 3, vec![b, a])).unwrap();
    let names: Vec<String> = vm.lineage("c").unwrap().iter().map(|v| v.name.clone()).collect();
    assert_eq!(names, vec!["b", "a"]);
}

#[test]
fn bind_rejects_unknown_lineage() {
    let mut vm = VariableManager::new();
    assert!(vm.bind(pending("a", 1, vec![42])).is_err());
    assert!(!vm.contains("a"));
}

#[test]
fn garbage_collection_drops_unreachable_nodes_only() {
    let mut vm = VariableManager::new();
    let a0 = vm.bind(pending("a", 1, vec![])).unwrap().id;
    vm.bind(pending("b", 2, vec![a0])).unwrap();
    let x0 = vm.bind(pending("x", 3, vec![])).unwrap().id;
    vm.bind(pending("a", 4, vec![])).unwrap();
    vm.bind(pending("x", 5, vec![])).unwrap();
    let removed = vm.collect_garbage();
    let ids: Vec<VarId> = removed.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![x0]);
    assert!(vm.node(a0).is_some());
    assert!(!vm.handle_in_use(TableHandle(3)));
    assert_eq!(vm.list().len(), 3);
}
