use anyhow::Context;
use census_loader_bench::benches;
use census_loader_bench::block_spec::parse_block_specs;
use census_loader_bench::dataset::{self, GenerateConfig};
use census_loader_bench::harness::{BenchConfig, EpochConfig, Profile};
use census_loader_bench::host;
use census_loader_bench::loader::{BatchLayout, Method, Shuffle};
use census_loader_bench::logging;
use census_loader_bench::schema::{parse_tags, BenchReport, RunMeta};
use census_loader_bench::store::TableFormat;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Quick,
    Full,
}

impl From<ProfileArg> for Profile {
    fn from(v: ProfileArg) -> Self {
        match v {
            ProfileArg::Quick => Profile::Quick,
            ProfileArg::Full => Profile::Full,
        }
    }
}

const DEFAULT_STATS_DIR: &str = "stats";

#[derive(Subcommand, Debug)]
enum Command {
    /// Time epochs of batches through each representation and block spec.
    DataLoader {
        /// Dataset file written by `generate-dataset`.
        #[arg(value_name = "URI")]
        uri: PathBuf,

        #[arg(short, long, default_value_t = 1024)]
        batch_size: u64,

        /// Block specs: `<chunks>x<chunk_size>`, `<block_size>/<chunks>` or
        /// `<block_size>/[<start>,<stop>]`. Repeatable and comma-separated.
        #[arg(short = 'B', long = "block-specs", value_name = "SPEC", default_value = "10000")]
        block_specs: Vec<String>,

        /// Representation(s): dense|coo|csr. Repeatable and comma-separated.
        #[arg(short, long = "method", value_name = "METHOD", value_delimiter = ',', default_value = "dense")]
        methods: Vec<String>,

        #[arg(short = 'e', long, default_value_t = 1)]
        num_epochs: u32,

        /// Collect every N batches; 0 disables.
        #[arg(short, long, default_value_t = 10)]
        gc_freq: u64,

        #[arg(short = 'M', long)]
        max_batches: Option<u64>,

        /// Don't move batches to the device.
        #[arg(short = 'C', long, default_value_t = false)]
        no_materialize: bool,

        /// Time the first batch too, instead of discarding it as warm-up.
        #[arg(short = 'W', long, default_value_t = false)]
        keep_first_batch: bool,

        /// 1x: chunk shuffle, 2x: global shuffle.
        #[arg(short, long, action = ArgAction::Count)]
        shuffle: u8,

        /// Emit `[x, obs]` sequences instead of `{"x": ...}` mappings.
        #[arg(long, default_value_t = false)]
        positional: bool,

        /// Table to append epoch rows to; defaults to stats/epochs.{db,json}.
        #[arg(short, long, value_name = "PATH")]
        db_path: Option<PathBuf>,

        /// Don't persist rows.
        #[arg(short = 'D', long, default_value_t = false)]
        no_db: bool,

        #[arg(short = 'F', long, value_enum, default_value_t = TableFormat::Sqlite)]
        table_format: TableFormat,

        /// <key>=<value> pairs attached to every persisted row.
        #[arg(short, long = "tag", value_name = "KEY=VALUE", action = ArgAction::Append)]
        tags: Vec<String>,

        /// Skip the EC2 instance metadata lookup.
        #[arg(long, default_value_t = false)]
        no_ec2: bool,

        #[arg(long, default_value_t = false)]
        progress: bool,
    },

    /// Read the dataset chunk by chunk into each representation.
    Read {
        #[arg(value_name = "URI")]
        uri: PathBuf,

        #[arg(short, long, default_value_t = 10_000)]
        chunk: u64,

        /// 1x: chunk shuffle, 2x: global shuffle.
        #[arg(short, long, action = ArgAction::Count)]
        shuffle: u8,

        #[arg(short, long = "method", value_name = "METHOD", value_delimiter = ',', default_value = "dense,coo,csr")]
        methods: Vec<String>,
    },

    /// Generate a deterministic sparse count matrix for the benchmarks.
    GenerateDataset {
        /// Number of cells (rows).
        #[arg(long, short = 'n', default_value_t = 100_000)]
        rows: u64,

        /// Number of genes (columns).
        #[arg(long, short = 'v', default_value_t = 2_000)]
        cols: u64,

        /// Expected fraction of non-zero entries per row.
        #[arg(long, default_value_t = 0.05)]
        density: f64,

        /// Output directory for the generated dataset.
        #[arg(long, short = 'o', value_name = "DIR", default_value = "data")]
        output: PathBuf,

        /// Random seed for deterministic generation.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Show metadata for a generated dataset file.
    DatasetInfo {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(name = "census-loader-bench")]
#[command(about = "Data-loading throughput benchmarks for sparse single-cell matrices (JSON output)")]
struct Args {
    #[arg(long, value_enum, default_value_t = ProfileArg::Quick, global = true)]
    profile: ProfileArg,

    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    /// Where to write the JSON report. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

fn parse_methods(names: &[String]) -> census_loader_bench::Result<Vec<Method>> {
    names.iter().map(|n| n.parse()).collect()
}

/// Format a count as a human-readable suffix (10k, 100k, 1m, etc.)
fn format_count(count: u64) -> String {
    match count {
        n if n >= 1_000_000 && n % 1_000_000 == 0 => format!("{}m", n / 1_000_000),
        n if n >= 1_000 && n % 1_000 == 0 => format!("{}k", n / 1_000),
        n => n.to_string(),
    }
}

fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let args = Args::parse();
    let cfg = BenchConfig {
        profile: args.profile.into(),
        seed: args.seed,
    };

    let measurements = match args.cmd {
        Command::DataLoader {
            uri,
            batch_size,
            block_specs,
            methods,
            num_epochs,
            gc_freq,
            max_batches,
            no_materialize,
            keep_first_batch,
            shuffle,
            positional,
            db_path,
            no_db,
            table_format,
            tags,
            no_ec2,
            progress,
        } => {
            // Configuration errors surface here, before any timed work.
            let block_specs = parse_block_specs(&block_specs)?;
            let methods = parse_methods(&methods)?;
            let tags = parse_tags(&tags)?;

            let store = (!no_db).then(|| {
                let path = db_path.unwrap_or_else(|| {
                    let ext = match table_format {
                        TableFormat::Sqlite => "db",
                        TableFormat::Columnar => "json",
                    };
                    PathBuf::from(DEFAULT_STATS_DIR).join(format!("epochs.{ext}"))
                });
                (table_format, path)
            });

            let dl_args = benches::data_loader::DataLoaderArgs {
                dataset: uri,
                methods,
                block_specs,
                batch_size,
                num_epochs,
                shuffle: Shuffle::from_count(shuffle),
                epoch: EpochConfig {
                    exclude_first_batch: !keep_first_batch,
                    gc_freq: Some(gc_freq),
                    max_batches,
                    materialize: !no_materialize,
                    progress,
                    ..Default::default()
                },
                layout: if positional {
                    BatchLayout::Positional
                } else {
                    BatchLayout::Keyed("x".to_string())
                },
                tags,
                store,
                probe_ec2: !no_ec2,
            };
            let output = benches::data_loader::run(&cfg, &dl_args)?;
            if let Some(total) = output.table_rows {
                info!(table_rows = total, "results table updated");
            }
            output.measurements
        }
        Command::Read {
            uri,
            chunk,
            shuffle,
            methods,
        } => {
            let read_args = benches::read::ReadArgs {
                dataset: uri,
                chunk,
                shuffle: Shuffle::from_count(shuffle),
                methods: parse_methods(&methods)?,
            };
            benches::read::run(&cfg, &read_args)?
        }
        Command::GenerateDataset {
            rows,
            cols,
            density,
            output,
            seed,
        } => {
            let gen_config = GenerateConfig {
                rows,
                cols,
                density,
                seed,
            };
            fs::create_dir_all(&output)
                .with_context(|| format!("creating {}", output.display()))?;
            let filename = format!("cells_{}x{}_seed{}.clb", format_count(rows), cols, seed);
            let filepath = output.join(&filename);

            info!(rows, cols, density, seed, "generating dataset");
            let start = std::time::Instant::now();
            let data = dataset::generate_dataset(&gen_config);
            dataset::write_dataset(&filepath, &data)?;
            let elapsed = start.elapsed();

            let file_size = fs::metadata(&filepath)?.len();
            info!(
                path = %filepath.display(),
                nnz = data.nnz(),
                size_mb = file_size as f64 / 1_048_576.0,
                elapsed_s = elapsed.as_secs_f64(),
                rows_per_s = rows as f64 / elapsed.as_secs_f64(),
                "dataset saved"
            );
            eprintln!("{}", filepath.display());

            // Skip normal JSON report for generate-dataset
            return Ok(());
        }
        Command::DatasetInfo { path } => {
            let meta = dataset::read_dataset_meta(&path)?;
            eprintln!("Dataset: {}", path.display());
            eprintln!("  Rows: {}", meta.n_rows);
            eprintln!("  Cols: {}", meta.n_cols);
            eprintln!(
                "  Non-zero: {} ({:.2}% density)",
                meta.nnz,
                meta.nnz as f64 / (meta.n_rows.max(1) * meta.n_cols.max(1)) as f64 * 100.0
            );
            eprintln!("  Seed: {}", meta.seed);

            let file_size = fs::metadata(&path)?.len();
            eprintln!("  File size: {:.2} MB", file_size as f64 / 1_048_576.0);

            // Skip normal JSON report
            return Ok(());
        }
    };

    let report = BenchReport {
        run: RunMeta {
            schema_version: 1,
            bench_version: env!("CARGO_PKG_VERSION").to_string(),
            profile: cfg.profile.as_str().to_string(),
            seed: cfg.seed,
            timestamp_utc: host::now_utc_rfc3339(),
            git_sha: host::git_sha().map(|s| s.chars().take(12).collect()),
        },
        measurements,
    };

    let json = serde_json::to_string_pretty(&report)?;
    if let Some(out) = args.out {
        fs::write(&out, json).with_context(|| format!("writing {}", out.display()))?;
    } else {
        println!("{json}");
    }

    Ok(())
}
