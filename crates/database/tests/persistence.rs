use std::sync::Arc;
use std::thread;

use catalog::{Column, ColumnType};
use common::{Config, DbError, ObjectName};
use database::Database;
use tempfile::tempdir;

fn name(s: &str) -> ObjectName {
    ObjectName::new(s).unwrap()
}

fn config_at(base: &std::path::Path) -> Config {
    Config::builder()
        .base_dir(base.to_path_buf())
        .page_size(64)
        .page_cache_slots(8)
        .dir_cache_slots(4)
        .busy_retries(16)
        .build()
}

fn columns() -> Vec<Column> {
    vec![
        Column::new("id", ColumnType::Int, 8).unwrap(),
        Column::new("login", ColumnType::Text, 8).unwrap(),
    ]
}

#[test]
fn rows_survive_close_and_reopen() {
    let dir = tempdir().unwrap();

    let db = Database::create(config_at(dir.path()), name("mydb")).unwrap();
    db.create_table(name("users"), columns(), 0).unwrap();
    for i in 0..20 {
        let id = format!("{i}");
        let login = format!("user{i}");
        db.append_row(name("users"), &[id.as_bytes(), login.as_bytes()])
            .unwrap();
    }
    db.delete_row(name("users"), 7).unwrap();
    db.close().unwrap();

    let db = Database::open(config_at(dir.path()), name("mydb")).unwrap();
    assert_eq!(db.table_names(), vec![name("users")]);
    assert_eq!(db.row_count(name("users")).unwrap(), 20);
    assert_eq!(
        db.read_row(name("users"), 19).unwrap(),
        vec![b"19".to_vec(), b"user19".to_vec()]
    );
    assert!(matches!(
        db.read_row(name("users"), 7),
        Err(DbError::NotFound(_))
    ));
}

#[test]
fn sync_makes_rows_visible_to_a_second_handle() {
    let dir = tempdir().unwrap();

    let writer = Database::create(config_at(dir.path()), name("mydb")).unwrap();
    writer.create_table(name("users"), columns(), 0).unwrap();
    writer
        .append_row(name("users"), &[b"1", b"alice"])
        .unwrap();
    writer.sync().unwrap();

    // A fresh handle over the same base directory observes the flushed
    // state without the writer closing.
    let reader = Database::open(config_at(dir.path()), name("mydb")).unwrap();
    assert_eq!(
        reader.read_row(name("users"), 0).unwrap(),
        vec![b"1".to_vec(), b"alice".to_vec()]
    );
}

#[test]
fn flush_then_load_observes_the_write() {
    let dir = tempdir().unwrap();

    let db = Database::create(config_at(dir.path()), name("mydb")).unwrap();
    db.create_table(name("users"), columns(), 0).unwrap();
    db.append_row(name("users"), &[b"1", b"alice"]).unwrap();
    db.sync().unwrap();
    db.update_row(name("users"), 0, &[b"2", b"bob"]).unwrap();
    db.sync().unwrap();

    assert_eq!(
        db.read_row(name("users"), 0).unwrap(),
        vec![b"2".to_vec(), b"bob".to_vec()]
    );
}

#[test]
fn concurrent_appends_are_all_stored() {
    let dir = tempdir().unwrap();

    let db = Arc::new(Database::create(config_at(dir.path()), name("mydb")).unwrap());
    db.create_table(name("users"), columns(), 0).unwrap();

    let mut workers = Vec::new();
    for worker in 0..4 {
        let db = Arc::clone(&db);
        workers.push(thread::spawn(move || {
            for i in 0..5 {
                let id = format!("{worker}{i}");
                let login = format!("w{worker}r{i}");
                db.append_row(name("users"), &[id.as_bytes(), login.as_bytes()])
                    .unwrap();
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(db.row_count(name("users")).unwrap(), 20);
    for worker in 0..4 {
        for i in 0..5 {
            let id = format!("{worker}{i}");
            let login = format!("w{worker}r{i}");
            let found = db
                .find_row(name("users"), &[id.as_bytes(), login.as_bytes()])
                .unwrap();
            assert!(found.is_some(), "row {id} missing after concurrent append");
        }
    }
}

#[test]
fn multiple_tables_keep_their_rows_apart() {
    let dir = tempdir().unwrap();

    let db = Database::create(config_at(dir.path()), name("mydb")).unwrap();
    db.create_table(name("users"), columns(), 0).unwrap();
    db.create_table(name("orders"), columns(), 0).unwrap();

    db.append_row(name("users"), &[b"1", b"alice"]).unwrap();
    db.append_row(name("orders"), &[b"100", b"book"]).unwrap();
    db.append_row(name("orders"), &[b"101", b"lamp"]).unwrap();

    assert_eq!(db.row_count(name("users")).unwrap(), 1);
    assert_eq!(db.row_count(name("orders")).unwrap(), 2);
    assert_eq!(
        db.read_row(name("orders"), 1).unwrap(),
        vec![b"101".to_vec(), b"lamp".to_vec()]
    );
}
