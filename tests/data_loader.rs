use census_loader_bench::benches::data_loader::{run, DataLoaderArgs};
use census_loader_bench::block_spec::parse_block_specs;
use census_loader_bench::dataset::{generate_dataset, write_dataset, GenerateConfig};
use census_loader_bench::harness::{BenchConfig, EpochConfig, Profile};
use census_loader_bench::loader::{BatchLayout, Method, Shuffle};
use census_loader_bench::store::{open_store, TableFormat};
use census_loader_bench::{EpochError, Error};
use std::path::Path;
use tempfile::tempdir;

fn write_cells(dir: &Path) -> std::path::PathBuf {
    let ds = generate_dataset(&GenerateConfig {
        rows: 300,
        cols: 48,
        density: 0.1,
        seed: 11,
    });
    let path = dir.join("cells.clb");
    write_dataset(&path, &ds).unwrap();
    path
}

fn args(dataset: std::path::PathBuf, store: Option<(TableFormat, std::path::PathBuf)>) -> DataLoaderArgs {
    DataLoaderArgs {
        dataset,
        methods: vec![Method::Dense, Method::Csr],
        block_specs: parse_block_specs(&["100", "2x50"]).unwrap(),
        batch_size: 64,
        num_epochs: 2,
        shuffle: Shuffle::Chunk,
        epoch: EpochConfig {
            gc_freq: Some(2),
            ..Default::default()
        },
        layout: BatchLayout::Keyed("x".to_string()),
        tags: vec![("run".to_string(), "ci".to_string())],
        store,
        probe_ec2: false,
    }
}

fn cfg() -> BenchConfig {
    BenchConfig {
        profile: Profile::Quick,
        seed: 5,
    }
}

#[test]
fn test_rows_per_epoch_and_config() {
    let dir = tempdir().unwrap();
    let out = run(&cfg(), &args(write_cells(dir.path()), None)).unwrap();

    // 2 methods x 2 specs x 2 epochs
    assert_eq!(out.rows.len(), 8);
    assert_eq!(out.measurements.len(), 8);
    assert_eq!(out.table_rows, None);

    for row in &out.rows {
        // First batch is discarded as warm-up: 300 - 64 rows timed.
        assert_eq!(row["n_rows"].as_u64(), Some(236));
        assert_eq!(row["n_cols"].as_u64(), Some(48));
        assert_eq!(row["run"], "ci");
        assert_eq!(row["batch_size"].as_u64(), Some(64));
    }
    let methods: Vec<&str> = out.rows.iter().map(|r| r["method"].as_str().unwrap()).collect();
    assert_eq!(methods, vec!["dense", "dense", "dense", "dense", "csr", "csr", "csr", "csr"]);
    let epochs: Vec<u64> = out.rows.iter().map(|r| r["epoch"].as_u64().unwrap()).collect();
    assert_eq!(epochs, vec![0, 1, 0, 1, 0, 1, 0, 1]);
}

#[test]
fn test_columnar_store_accumulates_runs() {
    let dir = tempdir().unwrap();
    let dataset = write_cells(dir.path());
    let table = dir.path().join("stats").join("epochs.json");
    let store = Some((TableFormat::Columnar, table.clone()));

    let first = run(&cfg(), &args(dataset.clone(), store.clone())).unwrap();
    assert_eq!(first.table_rows, Some(8));
    let second = run(&cfg(), &args(dataset, store)).unwrap();
    assert_eq!(second.table_rows, Some(16));

    let rows = open_store(TableFormat::Columnar, &table)
        .unwrap()
        .read_table()
        .unwrap()
        .unwrap();
    assert_eq!(rows.len(), 16);
    assert_eq!(rows[0]["run_start"], first.rows[0]["run_start"]);
    assert_eq!(rows[8]["run_start"], second.rows[0]["run_start"]);
    assert!(rows[8]["run_start"].as_str() >= rows[7]["start"].as_str());
}

#[test]
fn test_each_epoch_row_has_its_own_start() {
    let dir = tempdir().unwrap();
    let out = run(&cfg(), &args(write_cells(dir.path()), None)).unwrap();

    let run_start = out.rows[0]["run_start"].as_str().unwrap();
    let starts: Vec<&str> = out.rows.iter().map(|r| r["start"].as_str().unwrap()).collect();
    assert!(out.rows.iter().all(|r| r["run_start"] == run_start));
    assert!(starts[0] >= run_start);
    assert!(starts.windows(2).all(|w| w[0] <= w[1]), "{starts:?}");
}

#[test]
fn test_zero_epochs_rejected() {
    let dir = tempdir().unwrap();
    let table = dir.path().join("epochs.db");
    let mut a = args(write_cells(dir.path()), Some((TableFormat::Sqlite, table.clone())));
    a.num_epochs = 0;
    assert!(matches!(run(&cfg(), &a), Err(Error::ZeroEpochs)));
    assert!(!table.exists());
}

#[test]
fn test_sqlite_store_roundtrips_rows() {
    let dir = tempdir().unwrap();
    let dataset = write_cells(dir.path());
    let db = dir.path().join("epochs.db");

    let out = run(&cfg(), &args(dataset, Some((TableFormat::Sqlite, db.clone())))).unwrap();
    assert_eq!(out.table_rows, Some(8));

    let rows = open_store(TableFormat::Sqlite, &db)
        .unwrap()
        .read_table()
        .unwrap()
        .unwrap();
    assert_eq!(rows.len(), 8);
    assert_eq!(rows[3]["method"], "dense");
    assert_eq!(rows[4]["method"], "csr");
}

#[test]
fn test_zero_batch_size_rejected_before_loading() {
    let mut a = args("missing.clb".into(), None);
    a.batch_size = 0;
    assert!(matches!(
        run(&cfg(), &a),
        Err(Error::Epoch(EpochError::ZeroBatchSize))
    ));
}

#[test]
fn test_max_batches_caps_rows() {
    let dir = tempdir().unwrap();
    let mut a = args(write_cells(dir.path()), None);
    a.epoch.max_batches = Some(2);
    let out = run(&cfg(), &a).unwrap();
    assert!(out.rows.iter().all(|r| r["n_rows"].as_u64() == Some(128)));
    assert!(out.rows.iter().all(|r| r["n_batches"].as_u64() == Some(2)));
}
