//! End-to-end integrity properties of the catalog and constraint engine.

use std::sync::{mpsc, Arc, Barrier};
use std::thread;

use relcat_core::{
    AbortHandle, BulkLoader, Catalog, ColumnDef, DataType, DeleteBehavior, EngineConfig, Error,
    ErrorKind, ForeignKeyTarget, NewConstraint, ObjectRef, Predicate, QualifiedName, Value, ViewQuery,
};

fn qn(name: &str) -> QualifiedName {
    QualifiedName::new("public", name)
}

fn people() -> Catalog {
    let catalog = Catalog::default();
    catalog
        .create_table(
            "people",
            vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("name", DataType::Text).not_null(),
            ],
        )
        .unwrap();
    catalog
}

#[test]
fn test_duplicate_primary_key_leaves_count_unchanged() {
    let catalog = people();
    catalog
        .insert("people", vec![Value::Int(1), Value::text("ada")])
        .unwrap();
    let err = catalog
        .insert("people", vec![Value::Int(1), Value::text("grace")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniquenessViolation);
    assert_eq!(catalog.row_count("people").unwrap(), 1);
}

#[test]
fn test_view_column_set_frozen_and_stale_per_column() {
    let catalog = people();
    catalog
        .insert("people", vec![Value::Int(1), Value::text("ada")])
        .unwrap();
    catalog
        .create_view("everyone", ViewQuery::select_all_from("people"))
        .unwrap();

    catalog
        .alter_table_add_column("people", ColumnDef::new("age", DataType::Integer), None)
        .unwrap();
    let rs = catalog.read_view("everyone").unwrap();
    assert_eq!(rs.columns, vec!["id", "name"]);

    catalog.alter_table_drop_column("people", "name").unwrap();
    match catalog.read_view("everyone") {
        Err(Error::StaleViewBinding { column, .. }) => assert_eq!(column, "name"),
        other => panic!("expected a stale binding, got {other:?}"),
    }
    let ids = catalog.read_view_columns("everyone", &["id"]).unwrap();
    assert_eq!(ids.rows, vec![vec![Value::Int(1)]]);
}

#[test]
fn test_view_observes_writes_immediately() {
    let catalog = people();
    catalog
        .create_view("everyone", ViewQuery::select_all_from("people"))
        .unwrap();
    assert!(catalog.read_view("everyone").unwrap().is_empty());
    catalog
        .insert("people", vec![Value::Int(7), Value::text("lin")])
        .unwrap();
    assert_eq!(catalog.read_view("everyone").unwrap().len(), 1);
}

#[test]
fn test_drop_table_restrict_and_cascade() {
    let catalog = people();
    catalog
        .create_table(
            "pets",
            vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("owner", DataType::Integer)
                    .references(ForeignKeyTarget::primary_key_of("people")),
            ],
        )
        .unwrap();
    catalog
        .create_table("unrelated", vec![ColumnDef::new("x", DataType::Integer)])
        .unwrap();
    catalog
        .create_view("names", ViewQuery::source("people").column("name"))
        .unwrap();
    catalog
        .create_view("name_list", ViewQuery::select_all_from("names"))
        .unwrap();

    let err = catalog.drop_table("people", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyExists);
    assert!(catalog.has_table("people"));

    let removed = catalog.drop_table("people", true).unwrap();
    assert!(removed.contains(&ObjectRef::view(qn("names"))));
    assert!(removed.contains(&ObjectRef::view(qn("name_list"))));
    assert!(removed.contains(&ObjectRef::constraint(qn("pets"), "pets_owner_fkey")));
    assert_eq!(removed.last(), Some(&ObjectRef::table(qn("people"))));
    assert_eq!(removed.len(), 4);

    // Referencing table survives with only its foreign key gone.
    assert!(catalog.has_table("pets"));
    assert!(catalog.has_table("unrelated"));
    let constraints = catalog.list_constraints("pets").unwrap();
    assert_eq!(constraints.len(), 1);
    assert_eq!(constraints[0].name, "pets_pkey");
    assert_eq!(catalog.dependency_graph().edge_count(), 0);
}

#[test]
fn test_deleted_key_never_resurrected() {
    let catalog = Catalog::default();
    catalog
        .create_table(
            "tickets",
            vec![
                ColumnDef::new("id", DataType::Serial).primary_key(),
                ColumnDef::new("title", DataType::Text),
            ],
        )
        .unwrap();
    for title in ["a", "b", "c"] {
        catalog
            .insert_columns("tickets", &["title"], vec![Value::text(title)])
            .unwrap();
    }
    catalog
        .delete_where("tickets", &[Predicate::equals("id", 3)])
        .unwrap();

    let row = catalog
        .insert_columns("tickets", &["title"], vec![Value::text("d")])
        .unwrap();
    assert_eq!(row[0], Value::Int(4));

    // Explicitly reusing the deleted key is allowed, but only once.
    catalog
        .insert("tickets", vec![Value::Int(3), Value::text("again")])
        .unwrap();
    let err = catalog
        .insert("tickets", vec![Value::Int(3), Value::text("twice")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniquenessViolation);
    let threes = catalog
        .scan("tickets", &[Predicate::equals("id", 3)])
        .unwrap();
    assert_eq!(threes.len(), 1);
}

#[test]
fn test_foreign_key_into_unique_column() {
    let catalog = Catalog::default();
    catalog
        .create_table("codes", vec![ColumnDef::new("x", DataType::Text).unique()])
        .unwrap();
    catalog.insert("codes", vec![Value::text("a")]).unwrap();
    catalog.insert("codes", vec![Value::text("b")]).unwrap();
    catalog
        .create_table_with(
            "uses",
            vec![ColumnDef::new("code", DataType::Text)],
            vec![NewConstraint::foreign_key(
                ["code"],
                ForeignKeyTarget::columns_of("codes", ["x"]),
            )],
        )
        .unwrap();

    let err = catalog.insert("uses", vec![Value::text("c")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
    catalog.insert("uses", vec![Value::text("a")]).unwrap();
    assert_eq!(catalog.row_count("uses").unwrap(), 1);
}

#[test]
fn test_bulk_load_null_at_row_501_commits_nothing() {
    let catalog = people();
    let rows = (1..=1000i64).map(|i| {
        let name = if i == 501 {
            Value::Null
        } else {
            Value::text(format!("person {}", i))
        };
        vec![Value::Int(i), name]
    });

    let err = BulkLoader::new(&catalog)
        .load("people", rows, &AbortHandle::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NullConstraintViolation);
    assert_eq!(catalog.row_count("people").unwrap(), 0);
}

#[test]
fn test_concurrent_inserts_of_same_primary_key() {
    let catalog = Arc::new(people());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let catalog = Arc::clone(&catalog);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                catalog.insert("people", vec![Value::Int(42), Value::text(name)])
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(failure.kind(), ErrorKind::UniquenessViolation);
    assert_eq!(catalog.row_count("people").unwrap(), 1);
}

#[test]
fn test_cascade_delete_through_two_levels() {
    let catalog = people();
    catalog
        .create_table(
            "orders",
            vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("buyer", DataType::Integer).references(
                    ForeignKeyTarget::primary_key_of("people").with_on_delete(DeleteBehavior::Cascade),
                ),
            ],
        )
        .unwrap();
    catalog
        .create_table(
            "lines",
            vec![
                ColumnDef::new("order_id", DataType::Integer).references(
                    ForeignKeyTarget::primary_key_of("orders").with_on_delete(DeleteBehavior::Cascade),
                ),
                ColumnDef::new("sku", DataType::Text),
            ],
        )
        .unwrap();
    catalog
        .insert("people", vec![Value::Int(1), Value::text("ada")])
        .unwrap();
    catalog
        .insert("people", vec![Value::Int(2), Value::text("bo")])
        .unwrap();
    catalog.insert("orders", vec![Value::Int(10), Value::Int(1)]).unwrap();
    catalog.insert("orders", vec![Value::Int(20), Value::Int(2)]).unwrap();
    catalog
        .insert("lines", vec![Value::Int(10), Value::text("x")])
        .unwrap();
    catalog
        .insert("lines", vec![Value::Int(10), Value::text("y")])
        .unwrap();
    catalog
        .insert("lines", vec![Value::Int(20), Value::text("z")])
        .unwrap();

    let outcome = catalog
        .delete_where("people", &[Predicate::equals("id", 1)])
        .unwrap();
    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.cascaded, 3);
    assert_eq!(catalog.row_count("orders").unwrap(), 1);
    assert_eq!(catalog.row_count("lines").unwrap(), 1);
}

#[test]
fn test_restrict_delete_is_all_or_nothing() {
    let catalog = people();
    catalog
        .create_table(
            "notes",
            vec![ColumnDef::new("author", DataType::Integer)
                .references(ForeignKeyTarget::primary_key_of("people"))],
        )
        .unwrap();
    catalog
        .insert("people", vec![Value::Int(1), Value::text("ada")])
        .unwrap();
    catalog
        .insert("people", vec![Value::Int(2), Value::text("bo")])
        .unwrap();
    catalog.insert("notes", vec![Value::Int(2)]).unwrap();

    let err = catalog.delete_where("people", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
    assert_eq!(catalog.row_count("people").unwrap(), 2);
}

#[test]
fn test_drop_all_resets_catalog() {
    let catalog = people();
    catalog
        .create_view("everyone", ViewQuery::select_all_from("people"))
        .unwrap();
    catalog.drop_all();
    assert!(catalog.list_tables().is_empty());
    assert!(catalog.list_views().is_empty());
    catalog
        .create_table("people", vec![ColumnDef::new("id", DataType::Integer)])
        .unwrap();
}

#[test]
fn test_parent_delete_racing_child_insert() {
    for _ in 0..20 {
        let catalog = Arc::new(people());
        catalog
            .create_table(
                "notes",
                vec![ColumnDef::new("author", DataType::Integer)
                    .references(ForeignKeyTarget::primary_key_of("people"))],
            )
            .unwrap();
        catalog
            .insert("people", vec![Value::Int(1), Value::text("ada")])
            .unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let deleter = {
            let catalog = Arc::clone(&catalog);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                catalog
                    .delete_where("people", &[Predicate::equals("id", 1)])
                    .map(|_| ())
            })
        };
        let inserter = {
            let catalog = Arc::clone(&catalog);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                catalog.insert("notes", vec![Value::Int(1)]).map(|_| ())
            })
        };
        let deleted = deleter.join().unwrap();
        let inserted = inserter.join().unwrap();

        // Exactly one side wins, and the loser sees a foreign key violation.
        assert_ne!(deleted.is_ok(), inserted.is_ok());
        let loser = deleted.err().or(inserted.err()).unwrap();
        assert_eq!(loser.kind(), ErrorKind::ForeignKeyViolation);

        let parents = catalog.row_count("people").unwrap();
        let children = catalog.row_count("notes").unwrap();
        assert_eq!(parents, children, "no orphaned note may survive");
    }
}

#[test]
fn test_abort_from_another_thread_mid_load() {
    let config = EngineConfig::new()
        .with_bulk_batch_size(100)
        .with_abort_check_interval(10);
    let catalog = Catalog::new(config).unwrap();
    catalog
        .create_table(
            "readings",
            vec![ColumnDef::new("id", DataType::Integer).primary_key()],
        )
        .unwrap();

    let handle = AbortHandle::new();
    let (reached_tx, reached_rx) = mpsc::channel::<()>();
    let (aborted_tx, aborted_rx) = mpsc::channel::<()>();
    let aborter = {
        let handle = handle.clone();
        thread::spawn(move || {
            reached_rx.recv().unwrap();
            handle.abort();
            aborted_tx.send(()).unwrap();
        })
    };

    // Row 150 sits in the second batch; the first one has committed by then.
    let rows = (0..1000i64).map(move |i| {
        if i == 150 {
            reached_tx.send(()).unwrap();
            aborted_rx.recv().unwrap();
        }
        vec![Value::Int(i)]
    });
    let err = BulkLoader::new(&catalog)
        .load("readings", rows, &handle)
        .unwrap_err();
    aborter.join().unwrap();

    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(matches!(err, Error::Aborted { rows_committed: 100 }));
    assert_eq!(catalog.row_count("readings").unwrap(), 100);
}
