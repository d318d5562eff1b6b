mod fixtures;

use chrono::NaiveDate;
use fixtures::{
    Gadget, ModelA, ModelB, ModelC, Status, Widget, WidgetFactory, factory_calls, new_a, seed,
    session,
};
use tablebind::prelude::*;
use tablebind::{AnyModelRef, Connection};

#[test]
fn inserted_row_round_trips_field_for_field() {
    let (session, _) = session();
    let born = NaiveDate::from_ymd_opt(1990, 5, 17).expect("valid date");
    let a = session
        .create(ModelA {
            name: "test".into(),
            age: 10,
            born: Some(born),
            status: Status::Active,
            ..ModelA::default()
        })
        .expect("create");
    assert!(session.save(&a).expect("save"));
    let id = a.id().expect("id assigned");
    assert!(id > 0);
    assert_eq!(a.borrow().model_a_id, Some(id));

    session.clear_instances(None);
    let again = session.get::<ModelA>(id).expect("get");
    assert!(!again.ptr_eq(&a));
    let again = again.borrow();
    assert_eq!(again.model_a_id, Some(id));
    assert_eq!(again.name, "test");
    assert_eq!(again.age, 10);
    assert!(!again.verified);
    assert_eq!(again.born, Some(born));
    assert_eq!(again.status, Status::Active);
}

#[test]
fn get_returns_the_registered_instance() {
    let (session, conn) = session();
    let a = new_a(&session, "one");
    let id = a.id().expect("id");

    let first = session.get::<ModelA>(id).expect("get");
    let second = session.get::<ModelA>(id).expect("get");
    assert!(first.ptr_eq(&a));
    assert!(second.ptr_eq(&first));

    session.clear_instances(None);
    conn.clear();
    let third = session.get::<ModelA>(id).expect("get");
    let fourth = session.get::<ModelA>(id).expect("get");
    assert!(third.ptr_eq(&fourth));
    assert!(!third.ptr_eq(&a));
    assert_eq!(conn.count("SELECT"), 1);
}

#[test]
fn missing_rows_are_not_found() {
    let (session, _) = session();
    let err = session.get::<ModelA>(404).expect_err("no such row");
    assert!(err.is_not_found());
    assert!(!session.is_registered::<ModelA>(404));
}

#[test]
fn exists_checks_the_table_without_hydrating() {
    let (session, _) = session();
    let id = new_a(&session, "present").id().expect("id");
    session.clear_instances(None);

    assert!(session.exists::<ModelA>(id).expect("exists"));
    assert!(!session.exists::<ModelA>(id + 1).expect("exists"));
    assert!(!session.is_registered::<ModelA>(id));
}

#[test]
fn unknown_enum_backings_fail_non_nullable_fields() {
    let (session, _) = session();
    seed(
        &session,
        &["INSERT INTO modelsA (model_a_id, name, status) VALUES (7, 'odd', 'archived')"],
    );

    match session.get::<ModelA>(7).expect_err("unknown status") {
        Error::Type(err) => {
            assert_eq!(err.expected, "Status");
            assert_eq!(err.column.as_deref(), Some("status"));
        }
        other => panic!("expected a type error, got {other:?}"),
    }
    assert!(!session.is_registered::<ModelA>(7));
}

#[test]
fn to_one_relation_without_a_key_is_empty() {
    let (session, _) = session();
    seed(
        &session,
        &["INSERT INTO modelsB (model_b_id, description, model_a_id) VALUES (1, 'orphan', NULL)"],
    );
    let b = session.get::<ModelB>(1).expect("get");
    assert_eq!(b.borrow().description, "orphan");
    assert!(b.borrow().parent.is_loaded());
    assert!(b.borrow().parent.get().is_none());
}

#[test]
fn eager_relations_load_with_their_owner() {
    let (session, conn) = session();
    let a = new_a(&session, "parent");
    let a_id = a.id().expect("id");
    seed(
        &session,
        &[&format!("INSERT INTO modelsB (model_b_id, description, model_a_id) \
                    VALUES (1, 'child', {a_id})")],
    );

    conn.clear();
    let b = session.get::<ModelB>(1).expect("get");
    let b = b.borrow();
    let parent = b.parent.get().expect("parent loaded eagerly");
    assert!(parent.ptr_eq(&a));
    // the parent was already registered, so only the child row was selected
    assert_eq!(conn.count("SELECT"), 1);
}

#[test]
fn lazy_relations_load_on_first_access() {
    let (session, conn) = session();
    let a = new_a(&session, "owner");
    let a_id = a.id().expect("id");
    seed(
        &session,
        &[&format!("INSERT INTO modelsC (model_c_id, title, model_a_id) \
                    VALUES (1, 'lazy', {a_id})")],
    );
    session.clear_instances(None);
    conn.clear();

    let c = session.get::<ModelC>(1).expect("get");
    assert!(!c.borrow().owner.is_loaded());
    assert!(!session.has_changed(&c, "owner").expect("has_changed"));
    assert_eq!(conn.count("SELECT"), 1);

    let owner = session
        .related::<ModelC, ModelA>(&c, "owner")
        .expect("load owner")
        .expect("owner exists");
    assert_eq!(owner.borrow().name, "owner");
    assert!(c.borrow().owner.is_loaded());
    assert!(!session.has_changed(&c, "owner").expect("has_changed"));
    assert_eq!(conn.count("SELECT"), 2);

    // loaded once
    session.related::<ModelC, ModelA>(&c, "owner").expect("load owner");
    assert_eq!(conn.count("SELECT"), 2);
}

#[test]
fn one_to_many_loads_children_by_foreign_key() {
    let (session, _) = session();
    let a = new_a(&session, "parent");
    let a_id = a.id().expect("id");
    seed(
        &session,
        &[
            &format!("INSERT INTO modelsB (model_b_id, description, model_a_id) \
                      VALUES (1, 'x', {a_id})"),
            &format!("INSERT INTO modelsB (model_b_id, description, model_a_id) \
                      VALUES (2, 'y', {a_id})"),
            "INSERT INTO modelsB (model_b_id, description, model_a_id) VALUES (3, 'z', NULL)",
        ],
    );
    session.clear_instances(None);

    let a = session.get::<ModelA>(a_id).expect("get");
    assert!(!a.borrow().children.is_loaded());
    let children = session
        .related_many::<ModelA, ModelB>(&a, "children")
        .expect("children");
    let mut ids = children.ids();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    // each child's eager parent is the owner instance itself
    for child in children.iter() {
        assert!(child.borrow().parent.get().expect("parent").ptr_eq(&a));
    }
}

#[test]
fn factory_methods_replace_query_loading() {
    let (session, _) = session();
    let a = new_a(&session, "owner");
    let a_id = a.id().expect("id");
    seed(
        &session,
        &[
            &format!("INSERT INTO modelsC (model_c_id, title, model_a_id) \
                      VALUES (1, 'one', {a_id})"),
            &format!("INSERT INTO modelsC (model_c_id, title, model_a_id) \
                      VALUES (2, 'two', {a_id})"),
            "INSERT INTO modelsC (model_c_id, title, model_a_id) VALUES (3, 'three', NULL)",
        ],
    );

    let c = session.get::<ModelC>(1).expect("get");
    let siblings = session
        .related_many::<ModelC, ModelC>(&c, "siblings")
        .expect("siblings");
    assert_eq!(siblings.ids(), vec![2]);
}

#[test]
fn relations_to_factory_bound_types_use_the_factory() {
    let (session, _) = session();
    session.register_factory("widgets", WidgetFactory);
    seed(&session, &["INSERT INTO gadgets (gadget_id, widget_id) VALUES (1, 7)"]);

    let gadget = session.get::<Gadget>(1).expect("get");
    let gadget = gadget.borrow();
    let widget = gadget.widget.get().expect("widget loaded eagerly");
    assert_eq!(widget.borrow().label, "w-7");
    assert_eq!(widget.id(), Some(7));
    assert_eq!(factory_calls(), 1);
}

#[test]
fn unregistered_factories_are_configuration_errors() {
    let (session, _) = session();
    seed(&session, &["INSERT INTO gadgets (gadget_id, widget_id) VALUES (1, 7)"]);
    let err = session.get::<Gadget>(1).expect_err("factory missing");
    assert!(err.is_config());
}

#[test]
fn get_all_goes_through_the_factory_when_bound() {
    let (session, _) = session();
    session.register_factory("widgets", WidgetFactory);
    let widgets = session.get_all::<Widget>().expect("get_all");
    assert_eq!(widgets.ids(), vec![1, 2, 3]);
    assert_eq!(widgets.map(|w| w.label.clone()), vec!["w-1", "w-2", "w-3"]);

    new_a(&session, "x");
    new_a(&session, "y");
    assert_eq!(session.get_all::<ModelA>().expect("get_all").len(), 2);
}

#[test]
fn fetch_rereads_the_row_on_refresh() {
    let (session, _) = session();
    let a = new_a(&session, "before");
    let id = a.id().expect("id");
    session
        .connection()
        .execute(
            "UPDATE modelsA SET name = ?1 WHERE model_a_id = ?2",
            &[Value::from("after"), Value::BigInt(id)],
        )
        .expect("update behind the session's back");

    // no stored row yet for an inserted instance, so this selects
    session.fetch(&a, false).expect("fetch");
    assert_eq!(a.borrow().name, "after");
    assert!(!session.has_changed(&a, "name").expect("has_changed"));

    session
        .connection()
        .execute("UPDATE modelsA SET name = 'again'", &[])
        .expect("update");
    session.fetch(&a, false).expect("fetch from stored row");
    assert_eq!(a.borrow().name, "after");
    session.fetch(&a, true).expect("refresh");
    assert_eq!(a.borrow().name, "again");
}

#[test]
fn collections_refuse_unsaved_and_foreign_models() {
    let (session, _) = session();
    let mut collection = ModelCollection::<ModelB>::new();

    let unsaved = ModelRef::new(ModelB::default());
    assert!(collection.add(unsaved).is_err());

    let a = new_a(&session, "saved");
    let erased: AnyModelRef = a.erase();
    assert!(collection.add_any(&erased).is_err());
    assert!(collection.is_empty());
}
