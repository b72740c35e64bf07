//! Durability: flush, reopen, and recovery behavior over the file store.

use lattice::{Database, DatabaseConfig, LatticeError};
use lattice_types::{
    ColumnInfo, Constraint, ConstraintBody, IndexKey, ObjectName, SqlType, TableInfo, Value,
};

fn person_info() -> TableInfo {
    TableInfo::new(
        ObjectName::new("app", "person"),
        vec![
            ColumnInfo::new("id", SqlType::Integer).not_null(),
            ColumnInfo::new("name", SqlType::Text),
        ],
    )
    .with_constraints(vec![Constraint::new(
        "person_pk",
        ConstraintBody::PrimaryKey {
            columns: vec!["id".into()],
        },
    )])
}

#[test]
fn create_commit_reopen_sees_rows_and_clock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lattice.db");
    let name = ObjectName::new("app", "person");

    let committed = {
        let db = Database::create(&path, DatabaseConfig::default()).unwrap();
        let mut s = db.session("admin");
        s.begin_transaction().unwrap();
        s.create_table(person_info()).unwrap();
        s.commit().unwrap();

        s.begin_transaction().unwrap();
        s.insert_row(&name, vec![Value::Integer(1), Value::text("ada")])
            .unwrap();
        s.insert_row(&name, vec![Value::Integer(2), Value::text("bob")])
            .unwrap();
        let committed = s.commit().unwrap();
        db.close().unwrap();
        committed
    };

    let db = Database::open(&path, DatabaseConfig::default()).unwrap();
    assert_eq!(db.current_commit_id(), committed);

    let mut s = db.session("admin");
    s.begin_transaction().unwrap();
    let view = s.get_table(&name).unwrap();
    assert_eq!(view.row_count(), 2);

    // Indexes are rebuilt and answer lookups after reopen.
    let key = IndexKey::from_values(&[&Value::Integer(2)]);
    let hits = view.rows_with_key(&["id".into()], &key).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(view.read_row(hits[0]).unwrap()[1], Value::text("bob"));
    s.rollback().unwrap();
}

#[test]
fn table_ids_stay_monotonic_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lattice.db");

    let first_id = {
        let db = Database::create(&path, DatabaseConfig::default()).unwrap();
        let mut s = db.session("admin");
        s.begin_transaction().unwrap();
        let id = s.create_table(person_info()).unwrap();
        s.commit().unwrap();
        db.close().unwrap();
        id
    };

    let db = Database::open(&path, DatabaseConfig::default()).unwrap();
    let mut s = db.session("admin");
    s.begin_transaction().unwrap();
    let second_id = s
        .create_table(TableInfo::new(
            ObjectName::new("app", "orders"),
            vec![ColumnInfo::new("id", SqlType::Integer)],
        ))
        .unwrap();
    s.commit().unwrap();
    assert!(second_id > first_id);
}

#[test]
fn uncommitted_work_does_not_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lattice.db");
    let name = ObjectName::new("app", "person");

    {
        let db = Database::create(&path, DatabaseConfig::default()).unwrap();
        let mut s = db.session("admin");
        s.begin_transaction().unwrap();
        s.create_table(person_info()).unwrap();
        s.commit().unwrap();

        // Open transaction with staged work; never committed.
        s.begin_transaction().unwrap();
        s.insert_row(&name, vec![Value::Integer(1), Value::text("ghost")])
            .unwrap();
        // Session drop rolls back; database drop flushes.
    }

    let db = Database::open(&path, DatabaseConfig::default()).unwrap();
    let mut s = db.session("admin");
    s.begin_transaction().unwrap();
    assert_eq!(s.get_table(&name).unwrap().row_count(), 0);
    s.rollback().unwrap();
}

#[test]
fn dropped_table_stays_dropped_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lattice.db");
    let name = ObjectName::new("app", "person");

    {
        let db = Database::create(&path, DatabaseConfig::default()).unwrap();
        let mut s = db.session("admin");
        s.begin_transaction().unwrap();
        s.create_table(person_info()).unwrap();
        s.commit().unwrap();
        s.begin_transaction().unwrap();
        s.drop_table(&name).unwrap();
        s.commit().unwrap();
        db.close().unwrap();
    }

    let db = Database::open(&path, DatabaseConfig::default()).unwrap();
    let mut s = db.session("admin");
    s.begin_transaction().unwrap();
    assert!(matches!(
        s.get_table(&name),
        Err(LatticeError::NotFound { .. })
    ));
    s.rollback().unwrap();
}

#[test]
fn open_rejects_a_non_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk");
    std::fs::write(&path, b"not a database at all").unwrap();
    let err = Database::open(&path, DatabaseConfig::default()).unwrap_err();
    assert!(err.is_corruption());
}
