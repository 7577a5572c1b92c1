#![allow(missing_docs)]

use std::fs;

use penumbra::admin::{self, VerifyLevel};
use penumbra::{
    fields, PenumbraError, RecordId, Result, Store, StoreConfig, Synchronous, TypeSchema, Value,
    ValueKind,
};
use tempfile::{tempdir, TempDir};

fn item_type() -> TypeSchema {
    TypeSchema::new("Item")
        .field("number", ValueKind::String)
        .field("rank", ValueKind::Int)
        .field("label", ValueKind::String)
        .index("number")
}

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig::new(dir.path().join("durable.penumbra"))
        .page_size(1024)
        .with_type(item_type())
        .with_type(TypeSchema::new("Owner").field("item", ValueKind::Id))
}

fn numbers(store: &Store) -> Result<Vec<String>> {
    Ok(store
        .read("Item")?
        .into_iter()
        .filter_map(|record| record.get("number").and_then(Value::as_str).map(str::to_owned))
        .collect())
}

#[test]
fn committed_records_survive_reopen_in_insert_order() -> Result<()> {
    let dir = tempdir()?;
    let mut ids = Vec::new();
    {
        let store = Store::open(config(&dir))?;
        for batch in 0..3i64 {
            let batch_ids = store.write(|txn| {
                let mut out = Vec::new();
                for n in 0..40i64 {
                    let number = (batch * 40 + n).to_string();
                    out.push(txn.insert(
                        "Item",
                        fields([("number", Value::from(number)), ("rank", Value::from(n))]),
                    )?);
                }
                Ok(out)
            })?;
            ids.extend(batch_ids);
        }
        let owner = store.write(|txn| txn.insert("Owner", fields([("item", ids[7])])))?;
        assert_eq!(owner, RecordId(121));
        assert_eq!(store.version().0, 5);
    }

    let store = Store::open(config(&dir))?;
    assert_eq!(store.version().0, 5, "reopen without schema changes commits nothing");
    let expected: Vec<String> = (0..120).map(|n| n.to_string()).collect();
    assert_eq!(numbers(&store)?, expected);
    let read_ids: Vec<RecordId> = store.read("Item")?.iter().map(|r| r.id).collect();
    assert_eq!(read_ids, ids);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let owner = store.read("Owner")?;
    assert_eq!(owner.len(), 1);
    assert_eq!(owner[0].get("item"), Some(&Value::Id(ids[7])));
    assert_eq!(
        store.find_equal("Item", "number", &Value::from("77"))?,
        vec![ids[77]]
    );
    Ok(())
}

#[test]
fn large_bodies_round_trip_through_overflow_pages() -> Result<()> {
    let dir = tempdir()?;
    let label = "x".repeat(20_000);
    let id = {
        let store = Store::open(config(&dir))?;
        store.write(|txn| {
            txn.insert(
                "Item",
                fields([("number", Value::from("big")), ("label", Value::from(label.as_str()))]),
            )
        })?
    };

    let store = Store::open(config(&dir))?;
    let record = store.get(id)?.expect("record present");
    assert_eq!(record.get("label").and_then(Value::as_str), Some(label.as_str()));
    assert_eq!(store.find_equal("Item", "number", &Value::from("big"))?, vec![id]);

    store.write(|txn| txn.delete(id))?;
    assert!(store.get(id)?.is_none());
    let report = admin::verify(&store, VerifyLevel::Full).expect("verify");
    assert!(report.success, "{:?}", report.findings);
    Ok(())
}

#[test]
fn empty_commit_leaves_file_untouched() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(config(&dir))?;
    store.write(|txn| txn.insert("Item", fields([("number", "1")])).map(|_| ()))?;
    let version = store.version();
    let len = fs::metadata(store.path())?.len();
    let before = fs::read(store.path())?;

    store.write(|_| Ok(()))?;
    let mut txn = store.begin_write()?;
    let _ = txn.find_equal("Item", "number", &Value::from("1"))?;
    txn.commit()?;

    assert_eq!(store.version(), version);
    assert_eq!(fs::metadata(store.path())?.len(), len);
    assert_eq!(fs::read(store.path())?, before);
    Ok(())
}

#[test]
fn delete_all_empties_records_and_indexes() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(config(&dir))?;
    store.write(|txn| {
        for n in 0..300 {
            txn.insert("Item", fields([("number", n.to_string())]))?;
        }
        Ok(())
    })?;
    let removed = store.delete_all()?;
    assert_eq!(removed, 300);
    assert_eq!(store.count("Item")?, 0);
    assert!(store.read("Item")?.is_empty());
    assert!(store.find_equal("Item", "number", &Value::from("5"))?.is_empty());
    {
        let read = store.begin_read();
        assert_eq!(read.record_count(), 0);
        assert_eq!(read.index_entries(), 0);
    }

    let fresh = store.write(|txn| txn.insert("Item", fields([("number", "5")])))?;
    assert_eq!(fresh, RecordId(301), "ids are not reused after delete_all");
    assert_eq!(store.find_equal("Item", "number", &Value::from("5"))?, vec![fresh]);
    drop(store);

    let store = Store::open(config(&dir))?;
    assert_eq!(store.count("Item")?, 1);
    Ok(())
}

#[test]
fn reopen_reconciles_declared_indexes() -> Result<()> {
    let dir = tempdir()?;
    let unindexed = StoreConfig::new(dir.path().join("reconcile.penumbra")).with_type(
        TypeSchema::new("Item")
            .field("number", ValueKind::String)
            .field("rank", ValueKind::Int),
    );
    {
        let store = Store::open(unindexed.clone())?;
        store.write(|txn| {
            for n in 0..200i64 {
                txn.insert(
                    "Item",
                    fields([("number", Value::from(n.to_string())), ("rank", Value::from(n % 10))]),
                )?;
            }
            Ok(())
        })?;
        assert!(!store.explain("Item", "rank")?.uses_index());
        assert_eq!(store.begin_read().index_entries(), 0);
    }

    let indexed = StoreConfig::new(dir.path().join("reconcile.penumbra")).with_type(
        TypeSchema::new("Item")
            .field("number", ValueKind::String)
            .field("rank", ValueKind::Int)
            .index("rank"),
    );
    {
        let store = Store::open(indexed)?;
        assert!(store.explain("Item", "rank")?.uses_index());
        assert_eq!(store.begin_read().index_entries(), 200);
        let hits = store.find_equal("Item", "rank", &Value::from(3))?;
        assert_eq!(hits.len(), 20);
        let report = admin::verify(&store, VerifyLevel::Full).expect("verify");
        assert!(report.success, "{:?}", report.findings);
    }

    let store = Store::open(unindexed)?;
    assert_eq!(store.begin_read().index_entries(), 0, "undeclared index is dropped");
    assert_eq!(store.find_equal("Item", "rank", &Value::from(3))?.len(), 20);
    Ok(())
}

#[test]
fn toml_configuration_opens_a_store() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("store.toml");
    fs::write(
        &file,
        r#"
path = "from-toml.penumbra"
synchronous = "off"
page_size = 2048

[[type]]
name = "Item"
fields = [{ name = "number", kind = "string" }]
indexes = ["number"]
"#,
    )?;
    let config = StoreConfig::load(&file)?;
    assert_eq!(config.path, dir.path().join("from-toml.penumbra"));
    assert_eq!(config.synchronous, Synchronous::Off);

    let store = Store::open(config)?;
    assert_eq!(store.page_size(), 2048);
    store.write(|txn| txn.insert("Item", fields([("number", "9")])).map(|_| ()))?;
    assert!(store.path().exists());
    assert_eq!(store.count("Item")?, 1);
    Ok(())
}

#[test]
fn invalid_configurations_are_rejected_at_open() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("bad.penumbra");
    let cases = [
        StoreConfig::new(&path).with_type(
            TypeSchema::new("Item")
                .field("number", ValueKind::String)
                .index("missing"),
        ),
        StoreConfig::new(&path)
            .with_type(TypeSchema::new("Item"))
            .with_type(TypeSchema::new("Item")),
        StoreConfig::new(&path).with_type(TypeSchema::new("")),
        StoreConfig::new(&path).page_size(1000),
    ];
    for config in cases {
        match Store::open(config) {
            Err(PenumbraError::InvalidConfiguration(_)) => {}
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }
    assert!(!path.exists(), "rejected configs never create the file");
}

#[test]
fn page_size_of_existing_file_wins() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = Store::open(config(&dir))?;
        store.write(|txn| txn.insert("Item", fields([("number", "1")])).map(|_| ()))?;
    }
    let store = Store::open(config(&dir).page_size(4096))?;
    assert_eq!(store.page_size(), 1024);
    assert_eq!(store.count("Item")?, 1);
    Ok(())
}
