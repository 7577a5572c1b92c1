#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use penumbra::{
    fields, PenumbraError, Record, RecordId, Result, Store, StoreConfig, TxnState, TypeSchema,
    Value, ValueKind,
};
use tempfile::{tempdir, TempDir};

fn open(dir: &TempDir) -> Result<Store> {
    Store::open(
        StoreConfig::new(dir.path().join("isolation.penumbra"))
            .page_size(1024)
            .with_type(
                TypeSchema::new("Item")
                    .field("number", ValueKind::String)
                    .field("batch", ValueKind::Int)
                    .index("number")
                    .index("batch"),
            ),
    )
}

fn seed(store: &Store, batch: i64, count: i64) -> Result<Vec<RecordId>> {
    store.write(|txn| {
        let mut ids = Vec::new();
        for n in 0..count {
            ids.push(txn.insert(
                "Item",
                fields([
                    ("number", Value::from(format!("{batch}-{n}"))),
                    ("batch", Value::from(batch)),
                ]),
            )?);
        }
        Ok(ids)
    })
}

#[test]
fn reader_keeps_its_snapshot_across_commits() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let ids = seed(&store, 0, 100)?;

    let reader = store.begin_read();
    let before: Vec<Record> = reader.scan_all("Item")?.collect::<Result<_>>()?;
    let version = reader.version();

    let barrier = Arc::new(Barrier::new(2));
    let handle = {
        let barrier = barrier.clone();
        thread::spawn(move || -> Result<Vec<Record>> {
            barrier.wait();
            // writer has committed by now
            barrier.wait();
            let hits = reader.find_equal("Item", "batch", &Value::from(0))?;
            assert_eq!(hits.len(), 100);
            assert!(reader.find_equal("Item", "batch", &Value::from(1))?.is_empty());
            assert_eq!(reader.version(), version);
            let records = reader.scan_all("Item")?.collect::<Result<Vec<_>>>()?;
            Ok(records)
        })
    };

    barrier.wait();
    store.write(|txn| {
        for id in &ids[..50] {
            txn.delete(*id)?;
        }
        for id in &ids[50..60] {
            txn.update(
                *id,
                fields([("number", Value::from("changed")), ("batch", Value::from(9))]),
            )?;
        }
        Ok(())
    })?;
    seed(&store, 1, 100)?;
    barrier.wait();

    let seen = handle.join().expect("reader thread")?;
    assert_eq!(seen, before, "snapshot contents are stable");
    assert_eq!(store.count("Item")?, 150);
    assert_eq!(store.find_equal("Item", "batch", &Value::from(9))?.len(), 10);
    Ok(())
}

#[test]
fn concurrent_readers_only_see_whole_commits() -> Result<()> {
    const BATCHES: i64 = 40;
    const PER_BATCH: i64 = 25;

    let dir = tempdir()?;
    let store = open(&dir)?;
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let done = done.clone();
            thread::spawn(move || -> Result<u64> {
                let mut observed = 0;
                while !done.load(Ordering::Acquire) {
                    let read = store.begin_read();
                    let count = read.count("Item")?;
                    assert_eq!(count % PER_BATCH as u64, 0, "partial commit visible");
                    assert_eq!(read.record_count(), count);
                    let batches = count as i64 / PER_BATCH;
                    if batches > 0 {
                        let last = batches - 1;
                        let hits = read.find_equal("Item", "batch", &Value::from(last))?;
                        assert_eq!(hits.len() as i64, PER_BATCH);
                    }
                    assert!(read
                        .find_equal("Item", "batch", &Value::from(batches))?
                        .is_empty());
                    observed += 1;
                }
                Ok(observed)
            })
        })
        .collect();

    for batch in 0..BATCHES {
        seed(&store, batch, PER_BATCH)?;
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        let observed = reader.join().expect("reader thread")?;
        assert!(observed > 0);
    }
    assert_eq!(store.count("Item")?, (BATCHES * PER_BATCH) as u64);
    assert_eq!(store.lock_snapshot().readers, 0);
    Ok(())
}

#[test]
fn long_reader_survives_page_recycling() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    seed(&store, 0, 200)?;
    let pinned = store.begin_read();
    let expected: Vec<Record> = pinned.scan_all("Item")?.collect::<Result<_>>()?;

    // churn: delete and re-insert everything several times so freed pages
    // become candidates for reuse
    for round in 1..6 {
        store.delete_all()?;
        seed(&store, round, 200)?;
    }
    let (_, pending) = store.free_pages();
    assert!(pending > 0, "pages freed after the pinned version stay pending");

    let again: Vec<Record> = pinned.scan_all("Item")?.collect::<Result<_>>()?;
    assert_eq!(again, expected);
    assert_eq!(pinned.find_equal("Item", "number", &Value::from("0-17"))?.len(), 1);
    drop(pinned);

    seed(&store, 99, 1)?;
    let (reclaimable, _) = store.free_pages();
    assert!(reclaimable > 0, "released pages become reusable once the reader is gone");
    Ok(())
}

#[test]
fn writer_slot_is_exclusive_across_threads() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let mut txn = store.begin_write()?;
    txn.insert("Item", fields([("number", "held")]))?;

    let other = store.clone();
    let result = thread::spawn(move || other.begin_write().map(|_| ()))
        .join()
        .expect("writer thread");
    assert!(matches!(result, Err(PenumbraError::AlreadyWriting)));
    assert!(store.lock_snapshot().writer);

    txn.commit()?;
    assert!(!store.lock_snapshot().writer);
    let other = store.clone();
    thread::spawn(move || -> Result<()> {
        other.write(|txn| txn.insert("Item", fields([("number", "next")])).map(|_| ()))
    })
    .join()
    .expect("writer thread")?;
    assert_eq!(store.count("Item")?, 2);
    Ok(())
}

#[test]
fn finished_transaction_reports_no_active_transaction() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;

    let mut txn = store.begin_write()?;
    txn.commit()?;
    assert_eq!(txn.state(), TxnState::Committed);
    assert!(matches!(
        txn.insert("Item", fields([("number", "late")])),
        Err(PenumbraError::NoActiveTransaction)
    ));

    let mut txn = store.begin_write()?;
    txn.abort();
    assert!(matches!(txn.delete_all(), Err(PenumbraError::NoActiveTransaction)));
    assert!(matches!(txn.commit(), Err(PenumbraError::NoActiveTransaction)));
    Ok(())
}
