#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use penumbra::{fields, Store, StoreConfig, Value};
use serde_json::Value as Json;
use tempfile::TempDir;

const CONFIG: &str = r#"
path = "cli.penumbra"
page_size = 1024

[[type]]
name = "Item"
fields = [
    { name = "number", kind = "string" },
    { name = "rank", kind = "int" },
]
indexes = ["number"]
"#;

fn setup(seed: bool) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let config_path = dir.path().join("store.toml");
    fs::write(&config_path, CONFIG).expect("write config");
    if seed {
        seed_items(&config_path);
    }
    (dir, config_path)
}

fn seed_items(config_path: &Path) {
    let store = Store::open(StoreConfig::load(config_path).expect("load config")).expect("open");
    store
        .write(|txn| {
            for n in 1..=250i64 {
                txn.insert(
                    "Item",
                    fields([("number", Value::from(n.to_string())), ("rank", Value::from(n % 5))]),
                )?;
            }
            Ok(())
        })
        .expect("seed items");
}

fn json_output(config_path: &Path, args: &[&str]) -> Json {
    let output = cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(config_path)
        .args(["--format", "json"])
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}

#[test]
fn stats_reports_counts_as_json() {
    let (_dir, config_path) = setup(true);
    let report = json_output(&config_path, &["stats"]);
    assert_eq!(report["snapshot"]["record_count"], 250);
    assert_eq!(report["snapshot"]["index_entries"], 250);
    assert_eq!(report["pager"]["page_size"], 1024);
    assert_eq!(report["types"][0]["name"], "Item");
    assert_eq!(report["types"][0]["records"], 250);
    assert_eq!(report["types"][0]["indexes"][0], "number");
    assert_eq!(report["locks"]["readers"], 0);
}

#[test]
fn verify_full_succeeds_on_a_healthy_store() {
    let (_dir, config_path) = setup(true);
    let report = json_output(&config_path, &["verify", "--level", "full"]);
    assert_eq!(report["success"], true);
    assert_eq!(report["counts"]["records_found"], 250);
    assert_eq!(report["counts"]["index_entries"], 250);

    cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config_path)
        .args(["--quiet", "verify", "--level", "fast"])
        .assert()
        .success();
}

#[test]
fn find_uses_index_and_full_scan_alike() {
    let (_dir, config_path) = setup(true);
    let indexed = json_output(&config_path, &["find", "Item", "number", "42"]);
    assert_eq!(indexed["plan"]["path"], "index_lookup");
    assert_eq!(indexed["ids"], serde_json::json!([42]));

    let scanned = json_output(&config_path, &["find", "Item", "number", "42", "--full-scan"]);
    assert_eq!(scanned["plan"]["path"], "full_scan");
    assert_eq!(scanned["ids"], indexed["ids"]);

    let by_rank = json_output(&config_path, &["find", "Item", "rank", "3", "--records"]);
    assert_eq!(by_rank["plan"]["path"], "full_scan");
    assert_eq!(by_rank["ids"].as_array().map(Vec::len), Some(50));
    assert_eq!(by_rank["records"][0]["fields"]["rank"], 3);
}

#[test]
fn scan_honours_limit() {
    let (_dir, config_path) = setup(true);
    let report = json_output(&config_path, &["scan", "Item", "--limit", "10"]);
    assert_eq!(report["total"], 250);
    assert_eq!(report["records"].as_array().map(Vec::len), Some(10));
    assert_eq!(report["records"][0]["id"], 1);
    assert_eq!(report["records"][0]["type"], "Item");
}

#[test]
fn init_creates_the_store_and_admin_commands_need_one() {
    let (dir, config_path) = setup(false);
    cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config_path)
        .arg("stats")
        .assert()
        .failure()
        .code(1);
    assert!(!dir.path().join("cli.penumbra").exists());

    let report = json_output(&config_path, &["init"]);
    assert_eq!(report["indexes"], 1);
    assert!(dir.path().join("cli.penumbra").exists());

    let stats = json_output(&config_path, &["stats"]);
    assert_eq!(stats["snapshot"]["record_count"], 0);
}

#[test]
fn bad_arguments_are_reported() {
    let (_dir, config_path) = setup(true);
    cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config_path)
        .args(["find", "Item", "rank", "not-a-number"])
        .assert()
        .failure()
        .code(1);
    cargo_bin_cmd!("penumbra")
        .arg("--config")
        .arg(&config_path)
        .args(["scan", "Missing"])
        .assert()
        .failure()
        .code(1);
}
