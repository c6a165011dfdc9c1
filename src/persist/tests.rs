use super::*;
use crate::adapter::MemoryAdapter;
use crate::item::class::tests::sample_schema;
use crate::item::graph::tests::sample_registry;
use crate::item::{ItemClass, ItemClassBuilder, Norewrite};
use crate::schema::{ModelSchema, Schema};
use crate::scope::{ClassOverrides, Scope};
use crate::value::{FieldKind, Value};

fn registry(classes: impl IntoIterator<Item = ItemClassBuilder>) -> Arc<ClassRegistry> {
    let mut registry = ClassRegistry::new(sample_schema());
    for class in classes {
        registry.register(class).unwrap();
    }
    Arc::new(registry)
}

fn one() -> ItemClassBuilder {
    ItemClass::builder("One", "one")
        .creators([["f_integer"]])
        .getters([["f_integer"]])
}

fn two() -> ItemClassBuilder {
    ItemClass::builder("Two", "two")
        .creators([["f_integer"]])
        .getters([["f_integer"]])
}

fn persister(registry: &Arc<ClassRegistry>) -> Persister<MemoryAdapter> {
    Persister::new(MemoryAdapter::new(sample_schema()), registry.clone()).unwrap()
}

fn value(persister: &Persister<MemoryAdapter>, model: &str, id: u64, field: &str) -> Value {
    persister.adapter().row(model, id).unwrap().values[field].clone()
}

fn lookup_sizes(persister: &Persister<MemoryAdapter>) -> Vec<usize> {
    persister.adapter().get_calls().iter().map(|(_, n)| *n).collect()
}

#[test]
fn test_persist_twice_is_idempotent() {
    let registry = sample_registry();
    let mut persister = persister(&registry);

    for round in 0..2 {
        let mut graph = persister.graph();
        let bulk = graph.new_bulk(&registry.class("One").unwrap());
        for i in 1..=3 {
            graph.gen_item(bulk, [("f_integer", Value::Int(i)), ("f_string", Value::from("a"))]).unwrap();
        }
        let persisted = persister.persist(&mut graph, bulk).unwrap();

        assert_eq!(persisted.len(), 3);
        if round == 0 {
            assert_eq!(persisted.stats().created, 3);
        } else {
            assert_eq!(persisted.stats().created, 0);
            assert_eq!(persisted.stats().matched, 3);
            assert_eq!(persisted.stats().updated, 0);
        }
    }
    assert_eq!(persister.adapter().len("one"), 3);
}

#[test]
fn test_merged_items_share_one_row() {
    let registry = sample_registry();
    let mut persister = persister(&registry);
    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    graph.gen_item(bulk, [("f_integer", 7)]).unwrap();
    graph.gen_item(bulk, [("f_integer", 7)]).unwrap();

    let persisted = persister.persist(&mut graph, bulk).unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persister.adapter().len("one"), 1);
}

#[test]
fn test_matched_row_gets_new_field_values() {
    let registry = registry([one()]);
    let mut persister = persister(&registry);
    let id = persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(5)), ("f_text", Value::from("old"))])
        .unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 5).unwrap();
    graph.set(item, "f_text", "a").unwrap();
    let persisted = persister.persist(&mut graph, item).unwrap();

    assert_eq!(persister.adapter().len("one"), 1);
    assert_eq!(value(&persister, "one", id, "f_text"), Value::from("a"));
    assert_eq!(persisted.stats().updated, 1);
    assert_eq!(persisted.rows_for(item).unwrap()[0].value("f_text"), Some(&Value::from("a")));
}

#[test]
fn test_protect_field_only_fills_empty_values() {
    let registry = registry([one().norewrite("f_text", Norewrite::Protect)]);
    let mut persister = persister(&registry);
    let kept = persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(1)), ("f_text", Value::from("x"))])
        .unwrap();
    let empty = persister.adapter_mut().insert("one", [("f_integer", 2)]).unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    graph.gen_item(bulk, [("f_integer", Value::Int(1)), ("f_text", Value::from("y"))]).unwrap();
    graph.gen_item(bulk, [("f_integer", Value::Int(2)), ("f_text", Value::from("y"))]).unwrap();
    persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(value(&persister, "one", kept, "f_text"), Value::from("x"));
    assert_eq!(value(&persister, "one", empty, "f_text"), Value::from("y"));
}

#[test]
fn test_protect_field_keeps_empty_string() {
    let registry = registry([one().norewrite("f_text", Norewrite::Protect)]);
    let mut persister = persister(&registry);
    let row = persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(1)), ("f_text", Value::from(""))])
        .unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    graph.set(item, "f_text", "overwritten").unwrap();
    persister.persist(&mut graph, item).unwrap();

    assert_eq!(value(&persister, "one", row, "f_text"), Value::from(""));
}

#[test]
fn test_require_new_field_only_written_on_create() {
    let registry = registry([one().norewrite("f_string", Norewrite::RequireNew)]);
    let mut persister = persister(&registry);
    let existing = persister.adapter_mut().insert("one", [("f_integer", 1)]).unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    graph.gen_item(bulk, [("f_integer", Value::Int(1)), ("f_string", Value::from("new"))]).unwrap();
    let created = graph.gen_item(bulk, [("f_integer", Value::Int(3)), ("f_string", Value::from("new"))]).unwrap();
    let persisted = persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(value(&persister, "one", existing, "f_string"), Value::Null);
    let row = &persisted.rows_for(created).unwrap()[0];
    assert_eq!(value(&persister, "one", row.id, "f_string"), Value::from("new"));
}

#[test]
fn test_absent_nullable_values_are_cleared() {
    let registry = registry([one().nullables(["f_text", "two_x_1"]), two()]);
    let mut persister = persister(&registry);
    let adapter = persister.adapter_mut();
    let row = adapter
        .insert(
            "one",
            [
                ("f_integer", Value::Int(1)),
                ("f_text", Value::from("x")),
                ("f_string", Value::from("s")),
            ],
        )
        .unwrap();
    let target = adapter.insert("two", [("f_integer", 1)]).unwrap();
    adapter.connect("one", "two_x_1", row, target).unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    persister.persist(&mut graph, item).unwrap();

    let stored = persister.adapter().row("one", row).unwrap();
    assert_eq!(stored.value("f_text"), Some(&Value::Null));
    assert_eq!(stored.value("f_string"), Some(&Value::from("s")));
    assert_eq!(stored.link("two_x_1"), None);
}

#[test]
fn test_explicit_null_is_written_to_non_nullable_field() {
    let registry = registry([one()]);
    let mut persister = persister(&registry);
    let row = persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(1)), ("f_string", Value::from("s"))])
        .unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    graph.set(item, "f_string", Value::Null).unwrap();
    persister.persist(&mut graph, item).unwrap();

    assert_eq!(value(&persister, "one", row, "f_string"), Value::Null);
}

#[test]
fn test_item_matching_two_rows_fails_without_writing() {
    let registry = registry([ItemClass::builder("One", "one").getters([["f_integer"], ["f_string"]])]);
    let mut persister = persister(&registry);
    persister.adapter_mut().insert("one", [("f_integer", 1)]).unwrap();
    persister.adapter_mut().insert("one", [("f_string", "a")]).unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    graph.set(item, "f_string", "a").unwrap();
    graph.set(item, "f_text", "t").unwrap();
    let err = persister.persist(&mut graph, item).unwrap_err();

    assert!(matches!(err, Error::MultipleModelsMatch { ref model, .. } if model == "one"));
    assert_eq!(persister.adapter().len("one"), 2);
    assert!(persister.adapter().rows("one").iter().all(|r| r.value("f_text") == Some(&Value::Null)));
}

#[test]
fn test_two_items_matching_one_row_fails() {
    let registry = registry([ItemClass::builder("One", "one").getters([["f_integer"], ["f_string"]])]);
    let mut persister = persister(&registry);
    persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(1)), ("f_string", Value::from("a"))])
        .unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    graph.gen_item(bulk, [("f_integer", 1)]).unwrap();
    graph.gen_item(bulk, [("f_string", "a")]).unwrap();
    let err = persister.persist(&mut graph, bulk).unwrap_err();

    assert!(matches!(err, Error::MultipleItemsMatch { .. }));
}

#[test]
fn test_shared_row_is_reported_before_multiple_rows() {
    let registry = registry([ItemClass::builder("One", "one").getters([["f_integer"], ["f_string"]])]);
    let mut persister = persister(&registry);
    persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(10)), ("f_string", Value::from("a"))])
        .unwrap();
    persister.adapter_mut().insert("one", [("f_integer", 20)]).unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    graph.gen_item(bulk, [("f_integer", 10)]).unwrap();
    graph.gen_item(bulk, [("f_integer", Value::Int(20)), ("f_string", Value::from("a"))]).unwrap();
    let err = persister.persist(&mut graph, bulk).unwrap_err();

    assert!(matches!(err, Error::MultipleItemsMatch { .. }));
}

#[test]
fn test_allow_multi_update_writes_every_match() {
    let registry = registry([ItemClass::builder("One", "one")
        .getters([["f_string"]])
        .allow_multi_update(true)]);
    let mut persister = persister(&registry);
    persister.adapter_mut().insert("one", [("f_string", "a")]).unwrap();
    persister.adapter_mut().insert("one", [("f_string", "a")]).unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_string", "a").unwrap();
    graph.set(item, "f_text", "t").unwrap();
    let persisted = persister.persist(&mut graph, item).unwrap();

    assert_eq!(persisted.rows_for(item).unwrap().len(), 2);
    assert_eq!(persisted.stats().updated, 2);
    assert!(persister.adapter().rows("one").iter().all(|r| r.value("f_text") == Some(&Value::from("t"))));
}

#[test]
fn test_lookups_are_chunked_by_class_batch_size() {
    let registry = registry([one().batch_size(3)]);
    let mut persister = persister(&registry);
    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    for i in 0..10 {
        graph.gen_item(bulk, [("f_integer", i)]).unwrap();
    }
    let persisted = persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(lookup_sizes(&persister), vec![3, 3, 3, 1]);
    assert_eq!(persisted.stats().lookups, 4);
    assert_eq!(persisted.stats().created, 10);
}

#[test]
fn test_lookups_fall_back_to_persister_batch_size() {
    let registry = registry([one()]);
    let mut persister = persister(&registry).with_settings(PersistSettings {
        batch_size: Some(4),
        ..PersistSettings::default()
    });
    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    for i in 0..10 {
        graph.gen_item(bulk, [("f_integer", i)]).unwrap();
    }
    persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(lookup_sizes(&persister), vec![4, 4, 2]);
}

#[test]
fn test_fast_insert_skips_lookup() {
    let registry = registry([one().fast_insert(true)]);
    let mut persister = persister(&registry);
    persister.adapter_mut().insert("one", [("f_integer", 1)]).unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    let persisted = persister.persist(&mut graph, item).unwrap();

    assert_eq!(persisted.stats().lookups, 0);
    assert_eq!(persister.adapter().len("one"), 2);
}

#[test]
fn test_get_only_neither_creates_nor_updates() {
    let registry = registry([one().get_only_mode(true)]);
    let mut persister = persister(&registry);
    let row = persister.adapter_mut().insert("one", [("f_integer", 1)]).unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    let found = graph.gen_item(bulk, [("f_integer", Value::Int(1)), ("f_text", Value::from("t"))]).unwrap();
    let missing = graph.gen_item(bulk, [("f_integer", 2)]).unwrap();
    let persisted = persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(persisted.rows_for(found).unwrap()[0].id, row);
    assert_eq!(persisted.skipped(), &[missing]);
    assert_eq!(value(&persister, "one", row, "f_text"), Value::Null);
    assert_eq!(persister.adapter().len("one"), 1);
}

#[test]
fn test_update_only_with_item_override() {
    let registry = registry([one().update_only_mode(true)]);
    let mut persister = persister(&registry);
    let row = persister.adapter_mut().insert("one", [("f_integer", 1)]).unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    graph.gen_item(bulk, [("f_integer", Value::Int(1)), ("f_text", Value::from("new"))]).unwrap();
    let missing = graph.gen_item(bulk, [("f_integer", 2)]).unwrap();
    let forced = graph.gen_item(bulk, [("f_integer", 3)]).unwrap();
    graph.set_update_only(forced, Some(false)).unwrap();
    let persisted = persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(value(&persister, "one", row, "f_text"), Value::from("new"));
    assert_eq!(persisted.skipped(), &[missing]);
    assert!(persisted.rows_for(forced).is_some());
    assert_eq!(persister.adapter().len("one"), 2);
}

fn seed_two_x_x(persister: &mut Persister<MemoryAdapter>) -> u64 {
    let adapter = persister.adapter_mut();
    let row = adapter.insert("one", [("f_integer", 1)]).unwrap();
    for i in 1..=2 {
        let member = adapter.insert("two", [("f_integer", i)]).unwrap();
        adapter.connect("one", "two_x_x", row, member).unwrap();
    }
    row
}

fn persist_two_new_members(persister: &mut Persister<MemoryAdapter>) {
    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    let members = graph.bulk_of(item, "two_x_x").unwrap();
    graph.gen_item(members, [("f_integer", 3)]).unwrap();
    graph.gen_item(members, [("f_integer", 4)]).unwrap();
    persister.persist(&mut graph, item).unwrap();
}

#[test]
fn test_x_to_many_appends_by_default() {
    let registry = registry([one(), two()]);
    let mut persister = persister(&registry);
    let row = seed_two_x_x(&mut persister);

    persist_two_new_members(&mut persister);
    assert_eq!(persister.adapter().linked_ids("one", row, "two_x_x").unwrap().len(), 4);
}

#[test]
fn test_x_to_many_replace() {
    let registry = registry([one().replace_x_to_many("two_x_x", true), two()]);
    let mut persister = persister(&registry);
    let row = seed_two_x_x(&mut persister);

    persist_two_new_members(&mut persister);
    let linked = persister.adapter().linked_ids("one", row, "two_x_x").unwrap();
    let values: Vec<Value> = linked.iter().map(|id| value(&persister, "two", *id, "f_integer")).collect();
    assert_eq!(values, vec![Value::Int(3), Value::Int(4)]);
}

#[test]
fn test_unref_drops_members_of_supplied_partitions() {
    let registry = registry([one().unref_x_to_many("two_1_x", ["f_string"]), two()]);
    let mut persister = persister(&registry);
    let adapter = persister.adapter_mut();
    let row = adapter.insert("one", [("f_integer", 1)]).unwrap();
    let mut members = Vec::new();
    for (i, source) in [(1, "src1"), (2, "src1"), (3, "src2")] {
        let member = adapter
            .insert("two", [("f_integer", Value::Int(i)), ("f_string", Value::from(source))])
            .unwrap();
        adapter.connect("one", "two_1_x", row, member).unwrap();
        members.push(member);
    }

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    let bulk = graph.bulk_of(item, "two_1_x").unwrap();
    graph.gen_item(bulk, [("f_integer", Value::Int(1)), ("f_string", Value::from("src1"))]).unwrap();
    persister.persist(&mut graph, item).unwrap();

    let linked = persister.adapter().linked_ids("one", row, "two_1_x").unwrap();
    assert_eq!(linked, vec![members[0], members[2]]);
    assert_eq!(persister.adapter().len("two"), 3);
}

#[test]
fn test_protect_relation_keeps_existing_link() {
    let registry = registry([one().norewrite("two_x_1", Norewrite::Protect), two()]);
    let mut persister = persister(&registry);
    let adapter = persister.adapter_mut();
    let linked = adapter.insert("one", [("f_integer", 1)]).unwrap();
    let unlinked = adapter.insert("one", [("f_integer", 2)]).unwrap();
    let old_target = adapter.insert("two", [("f_integer", 1)]).unwrap();
    adapter.connect("one", "two_x_1", linked, old_target).unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    let a = graph.gen_item(bulk, [("f_integer", 1)]).unwrap();
    let b = graph.gen_item(bulk, [("f_integer", 2)]).unwrap();
    let x = graph.new_item_of("Two").unwrap();
    graph.set(x, "f_integer", 10).unwrap();
    let y = graph.new_item_of("Two").unwrap();
    graph.set(y, "f_integer", 11).unwrap();
    graph.link(a, "two_x_1", x).unwrap();
    graph.link(b, "two_x_1", y).unwrap();
    let persisted = persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(persisted.stats().created, 2);
    let adapter = persister.adapter();
    assert_eq!(adapter.row("one", linked).unwrap().link("two_x_1"), Some(&old_target));
    let new_target = adapter.rows("two").iter().find(|r| r.value("f_integer") == Some(&Value::Int(11))).unwrap().id;
    assert_eq!(adapter.row("one", unlinked).unwrap().link("two_x_1"), Some(&new_target));
}

#[test]
fn test_require_new_creator_relation_blocks_create() {
    let registry = registry([
        one(),
        ItemClass::builder("Two", "two")
            .creators([["one_x_1"]])
            .getters([["f_integer"]])
            .norewrite("one_x_1", Norewrite::RequireNew),
    ]);
    let mut persister = persister(&registry);
    persister.adapter_mut().insert("one", [("f_integer", 1)]).unwrap();

    for (parent, created) in [(1, false), (2, true)] {
        let mut graph = persister.graph();
        let owner = graph.new_item_of("One").unwrap();
        graph.set(owner, "f_integer", parent).unwrap();
        let child = graph.new_item_of("Two").unwrap();
        graph.set(child, "f_integer", 5).unwrap();
        graph.link(child, "one_x_1", owner).unwrap();
        let persisted = persister.persist(&mut graph, child).unwrap();

        assert_eq!(persisted.rows_for(child).is_some(), created);
        if !created {
            assert_eq!(persisted.skipped(), &[child]);
        }
    }

    let adapter = persister.adapter();
    assert_eq!(adapter.len("two"), 1);
    let child = &adapter.rows("two")[0];
    let owner = adapter.rows("one").iter().find(|r| r.value("f_integer") == Some(&Value::Int(2))).unwrap().id;
    assert_eq!(child.link("one_x_1"), Some(&owner));
}

#[test]
fn test_getter_cycle_is_broken_by_forced_round() {
    let registry = registry([
        ItemClass::builder("One", "one")
            .creators([["f_integer"]])
            .getters([["f_integer", "two_1_1"]]),
        ItemClass::builder("Two", "two")
            .creators([["f_integer"]])
            .getters([["f_integer", "one_1_1"]]),
    ]);
    let mut persister = persister(&registry);
    let mut graph = persister.graph();
    let a = graph.new_item_of("One").unwrap();
    graph.set(a, "f_integer", 1).unwrap();
    let b = graph.new_item_of("Two").unwrap();
    graph.set(b, "f_integer", 2).unwrap();
    graph.link(a, "two_1_1", b).unwrap();

    let persisted = persister.persist(&mut graph, a).unwrap();
    assert_eq!(persisted.stats().forced_rounds, 1);
    assert_eq!(persisted.stats().created, 2);

    let adapter = persister.adapter();
    let target = adapter.rows("two")[0].id;
    let row = adapter.row("one", persisted.rows_for(a).unwrap()[0].id).unwrap();
    assert_eq!(row.link("two_1_1"), Some(&target));
}

#[test]
fn test_deleter_runs_on_persist() {
    let registry = registry([one()
        .deleter_selectors(["f_string"])
        .deleter_execute_on_persist(true)]);
    let mut persister = persister(&registry);
    let adapter = persister.adapter_mut();
    let kept = adapter.insert("one", [("f_integer", Value::Int(1)), ("f_string", Value::from("src"))]).unwrap();
    let stale = adapter.insert("one", [("f_integer", Value::Int(2)), ("f_string", Value::from("src"))]).unwrap();
    let other = adapter.insert("one", [("f_integer", Value::Int(3)), ("f_string", Value::from("other"))]).unwrap();

    let mut graph = persister.graph();
    let bulk = graph.new_bulk(&registry.class("One").unwrap());
    graph.gen_item(bulk, [("f_integer", Value::Int(1)), ("f_string", Value::from("src"))]).unwrap();
    graph.gen_item(bulk, [("f_integer", Value::Int(4)), ("f_string", Value::from("src"))]).unwrap();
    let persisted = persister.persist(&mut graph, bulk).unwrap();

    assert_eq!(persisted.stats().deleted, 1);
    let adapter = persister.adapter();
    assert!(adapter.row("one", stale).is_none());
    assert!(adapter.row("one", kept).is_some());
    assert!(adapter.row("one", other).is_some());
    assert_eq!(adapter.len("one"), 3);
    assert!(persister.deleters().pending().is_empty());
}

#[test]
fn test_deleter_waits_for_explicit_execute() {
    let registry = registry([one().deleter_selectors(["f_string"])]);
    let mut persister = persister(&registry);
    persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(2)), ("f_string", Value::from("src"))])
        .unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item_of("One").unwrap();
    graph.set(item, "f_integer", 1).unwrap();
    graph.set(item, "f_string", "src").unwrap();
    persister.persist(&mut graph, item).unwrap();

    assert_eq!(persister.deleters().pending(), vec!["One".to_string()]);
    assert_eq!(persister.execute_deleter("One").unwrap(), 1);
    assert_eq!(persister.adapter().len("one"), 1);
    assert!(persister.execute_scope_deleter("nope").is_err());
}

#[test]
fn test_deleter_of_unfed_class_is_a_noop() {
    let registry = registry([one().deleter_selectors(["f_string"])]);
    let mut persister = persister(&registry);
    persister.adapter_mut().insert("one", [("f_string", "src")]).unwrap();

    assert_eq!(persister.execute_deleter("One").unwrap(), 0);
    assert_eq!(persister.adapter().len("one"), 1);
    assert!(matches!(persister.execute_deleter("Missing"), Err(Error::UnknownClass(_))));
}

#[test]
fn test_scoped_class_uses_its_own_getters() {
    let mut registry = ClassRegistry::new(sample_schema());
    registry.register(one()).unwrap();
    registry
        .add_scope(Scope::new("s1").with("One", ClassOverrides::new().getters([["f_string"]])))
        .unwrap();
    let registry = Arc::new(registry);
    let mut persister = persister(&registry);
    let row = persister
        .adapter_mut()
        .insert("one", [("f_integer", Value::Int(1)), ("f_string", Value::from("key"))])
        .unwrap();

    let mut graph = persister.graph();
    let item = graph.new_item(&registry.scoped("s1", "One").unwrap());
    graph.set(item, "f_integer", 9).unwrap();
    graph.set(item, "f_string", "key").unwrap();
    let persisted = persister.persist(&mut graph, item).unwrap();

    assert_eq!(persisted.rows_for(item).unwrap()[0].id, row);
    assert_eq!(value(&persister, "one", row, "f_integer"), Value::Int(9));
}

#[test]
fn test_graph_from_other_registry_rejected() {
    let mut persister = persister(&sample_registry());
    let mut graph = ItemGraph::new(sample_registry());
    let item = graph.new_item_of("One").unwrap();
    assert!(matches!(persister.persist(&mut graph, item), Err(Error::InvalidSchema(_))));
}

#[test]
fn test_adapter_schema_mismatch_rejected() {
    let schema = Schema::from_models([
        ModelSchema::new("one").field("f_integer", FieldKind::Integer),
        ModelSchema::new("two").field("f_integer", FieldKind::Integer),
    ])
    .unwrap();
    let result = Persister::new(MemoryAdapter::new(schema), sample_registry());
    assert!(result.is_err());
}
