#![allow(missing_docs)]

use std::collections::BTreeMap;

use penumbra::{
    fields, QueryStrategy, RecordId, Result, Store, StoreConfig, Synchronous, TypeSchema, Value,
    ValueKind,
};
use proptest::prelude::*;
use tempfile::{tempdir, TempDir};

fn item_store(dir: &TempDir) -> Result<Store> {
    Store::open(
        StoreConfig::new(dir.path().join("query.penumbra"))
            .page_size(1024)
            .synchronous(Synchronous::Off)
            .with_type(
                TypeSchema::new("Item")
                    .field("number", ValueKind::String)
                    .field("rank", ValueKind::Int)
                    .field("owner", ValueKind::Id)
                    .field("note", ValueKind::String)
                    .index("number")
                    .index("rank")
                    .index("owner"),
            )
            .with_type(
                TypeSchema::new("Other")
                    .field("number", ValueKind::String)
                    .index("number"),
            ),
    )
}

fn both_paths(store: &Store, field: &str, value: &Value) -> Result<(Vec<RecordId>, Vec<RecordId>)> {
    let read = store.begin_read();
    let indexed = read.find_equal_with("Item", field, value, QueryStrategy::Auto)?;
    let scanned = read.find_equal_with("Item", field, value, QueryStrategy::FullScan)?;
    Ok((indexed, scanned))
}

#[test]
fn hundred_thousand_numbers_agree_on_both_paths() -> Result<()> {
    let dir = tempdir()?;
    let store = Store::open(
        StoreConfig::benchmark(dir.path().join("bulk.penumbra")).with_type(
            TypeSchema::new("Item")
                .field("number", ValueKind::String)
                .index("number"),
        ),
    )?;
    store.write(|txn| {
        for n in 1..=100_000u32 {
            txn.insert("Item", fields([("number", n.to_string())]))?;
        }
        Ok(())
    })?;
    assert_eq!(store.count("Item")?, 100_000);
    assert!(store.explain("Item", "number")?.uses_index());

    let target = Value::from("42");
    let indexed = store.find_equal("Item", "number", &target)?;
    let scanned = store.find_equal_with("Item", "number", &target, QueryStrategy::FullScan)?;
    assert_eq!(indexed, vec![RecordId(42)]);
    assert_eq!(indexed, scanned);
    let record = store.get(indexed[0])?.expect("record 42");
    assert_eq!(record.get("number"), Some(&target));

    for missing in ["0", "100001", "042", ""] {
        let value = Value::from(missing);
        assert!(store.find_equal("Item", "number", &value)?.is_empty());
        assert!(store
            .find_equal_with("Item", "number", &value, QueryStrategy::FullScan)?
            .is_empty());
    }
    Ok(())
}

#[test]
fn absent_fields_match_nothing_on_either_path() -> Result<()> {
    let dir = tempdir()?;
    let store = item_store(&dir)?;
    store.write(|txn| {
        txn.insert("Item", fields([("note", "no number")]))?;
        txn.insert("Item", fields([("number", "")]))?;
        txn.insert("Other", fields([("number", "")]))?;
        Ok(())
    })?;
    let (indexed, scanned) = both_paths(&store, "number", &Value::from(""))?;
    assert_eq!(indexed, vec![RecordId(2)]);
    assert_eq!(indexed, scanned, "other types never leak into results");

    let (indexed, scanned) = both_paths(&store, "note", &Value::from("no number"))?;
    assert_eq!(indexed, vec![RecordId(1)]);
    assert_eq!(indexed, scanned);
    Ok(())
}

#[derive(Clone, Debug)]
enum Op {
    Insert { number: u8, rank: i8, owner: Option<u8> },
    Update { slot: usize, number: u8, rank: i8 },
    Delete { slot: usize },
    Commit,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..12, -3i8..3, proptest::option::of(0u8..4))
            .prop_map(|(number, rank, owner)| Op::Insert { number, rank, owner }),
        2 => (any::<usize>(), 0u8..12, -3i8..3)
            .prop_map(|(slot, number, rank)| Op::Update { slot, number, rank }),
        2 => any::<usize>().prop_map(|slot| Op::Delete { slot }),
        1 => Just(Op::Commit),
    ]
}

fn body(number: u8, rank: i8, owner: Option<u8>) -> penumbra::Fields {
    let mut body = fields([
        ("number", Value::from(format!("n{number}"))),
        ("rank", Value::from(i64::from(rank))),
    ]);
    if let Some(owner) = owner {
        body.insert("owner".into(), Value::Id(RecordId(u64::from(owner) + 1)));
    }
    body
}

fn apply(store: &Store, ops: &[Op]) -> Result<BTreeMap<RecordId, penumbra::Fields>> {
    let mut txn = store.begin_write()?;
    let mut staged: BTreeMap<RecordId, penumbra::Fields> = BTreeMap::new();
    for op in ops {
        match op {
            Op::Insert { number, rank, owner } => {
                let fields = body(*number, *rank, *owner);
                let id = txn.insert("Item", fields.clone())?;
                staged.insert(id, fields);
            }
            Op::Update { slot, number, rank } => {
                if staged.is_empty() {
                    continue;
                }
                let id = *staged.keys().nth(slot % staged.len()).expect("slot in range");
                let fields = body(*number, *rank, None);
                assert!(txn.update(id, fields.clone())?);
                staged.insert(id, fields);
            }
            Op::Delete { slot } => {
                if staged.is_empty() {
                    continue;
                }
                let id = *staged.keys().nth(slot % staged.len()).expect("slot in range");
                assert!(txn.delete(id)?);
                staged.remove(&id);
            }
            Op::Commit => {
                txn.commit()?;
                txn = store.begin_write()?;
            }
        }
    }
    txn.commit()?;
    Ok(staged)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn index_and_scan_agree_after_random_workloads(
        ops in proptest::collection::vec(op_strategy(), 1..120)
    ) {
        let dir = tempdir().unwrap();
        let store = item_store(&dir).unwrap();
        let model = apply(&store, &ops).unwrap();

        for number in 0u8..12 {
            let value = Value::from(format!("n{number}"));
            let (indexed, scanned) = both_paths(&store, "number", &value).unwrap();
            let expected: Vec<RecordId> = model
                .iter()
                .filter(|(_, f)| f.get("number") == Some(&value))
                .map(|(id, _)| *id)
                .collect();
            prop_assert_eq!(&indexed, &scanned);
            prop_assert_eq!(&indexed, &expected);
        }
        for rank in -3i64..3 {
            let (indexed, scanned) = both_paths(&store, "rank", &Value::from(rank)).unwrap();
            prop_assert_eq!(indexed, scanned);
        }
        for owner in 1u64..=4 {
            let value = Value::Id(RecordId(owner));
            let (indexed, scanned) = both_paths(&store, "owner", &value).unwrap();
            prop_assert_eq!(indexed, scanned);
        }

        let read = store.begin_read();
        prop_assert_eq!(read.record_count(), model.len() as u64);
        prop_assert_eq!(read.count("Item").unwrap(), model.len() as u64);
        let owners = model.values().filter(|f| f.contains_key("owner")).count() as u64;
        prop_assert_eq!(read.index_entries(), 2 * model.len() as u64 + owners);
    }
}
