//! Binary entry point for the Penumbra administrative CLI.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use penumbra::{
    admin::{self, open_store, VerifyLevel},
    query, QueryPlan, QueryStrategy, Record, Store, StoreConfig, Synchronous, Value,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ui::{format_bytes, format_duration, Status, Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "penumbra",
    version,
    about = "Administrative CLI for Penumbra object stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        short = 'c',
        env = "PENUMBRA_CONFIG",
        value_name = "FILE",
        help = "TOML store configuration (path, page size, types and indexes)"
    )]
    config: PathBuf,

    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ThemeArg::Auto,
        help = "Color theme for text output"
    )]
    theme: ThemeArg,

    #[arg(long, short, global = true, help = "Plain output without icons or spinners")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, help = "Override page cache size (pages)")]
    cache_pages: Option<usize>,

    #[arg(long, value_enum, help = "Synchronous mode override")]
    synchronous: Option<SynchronousArg>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Create the store file if missing and register declared indexes")]
    Init,

    #[command(about = "Show snapshot counters, tree shapes and per-type counts")]
    Stats,

    #[command(about = "Check page checksums and record/index consistency")]
    Verify {
        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Full)]
        level: VerifyLevelArg,
    },

    #[command(about = "List every record of a type")]
    Scan {
        #[arg(value_name = "TYPE")]
        type_name: String,

        #[arg(long, help = "Stop after this many records")]
        limit: Option<usize>,
    },

    #[command(about = "Find records of a type whose field equals a value")]
    Find {
        #[arg(value_name = "TYPE")]
        type_name: String,

        #[arg(value_name = "FIELD")]
        field: String,

        #[arg(value_name = "VALUE")]
        value: String,

        #[arg(long, help = "Ignore the index and scan the type's records")]
        full_scan: bool,

        #[arg(long, help = "Print matching records instead of ids only")]
        records: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ThemeArg {
    Auto,
    Light,
    Dark,
    Plain,
}

impl From<ThemeArg> for Theme {
    fn from(theme: ThemeArg) -> Self {
        match theme {
            ThemeArg::Auto => Theme::Auto,
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Plain => Theme::Plain,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SynchronousArg {
    Full,
    Off,
}

impl From<SynchronousArg> for Synchronous {
    fn from(mode: SynchronousArg) -> Self {
        match mode {
            SynchronousArg::Full => Synchronous::Full,
            SynchronousArg::Off => Synchronous::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

#[derive(Serialize)]
struct InitReport {
    path: String,
    version: u64,
    indexes: usize,
}

#[derive(Serialize)]
struct ScanReport {
    #[serde(rename = "type")]
    type_name: String,
    total: u64,
    records: Vec<Record>,
}

#[derive(Serialize)]
struct FindReport {
    plan: QueryPlan,
    value: Value,
    ids: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<Vec<Record>>,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("PENUMBRA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let ui = Ui::new(cli.theme.into(), cli.quiet);

    match cli.command {
        Command::Init => {
            let store = Store::open(config)?;
            let report = InitReport {
                path: store.path().display().to_string(),
                version: store.version().0,
                indexes: store.schema().declared_indexes().len(),
            };
            emit(cli.format, &report, || {
                ui.status(Status::Ok, &format!(
                    "store ready at {} (version {}, {} indexes)",
                    report.path, report.version, report.indexes
                ))
            })?;
        }
        Command::Stats => {
            let store = open_store(&config)?;
            let report = admin::stats(&store)?;
            emit(cli.format, &report, || print_stats_text(&ui, &report))?;
        }
        Command::Verify { level } => {
            let store = open_store(&config)?;
            let task = ui.task(format!("verifying ({level:?})"));
            let report = admin::verify(&store, level.into())?;
            let elapsed = task.finish();
            emit(cli.format, &report, || {
                print_verify_text(&ui, &report);
                ui.status(Status::Note, &format!("checked in {}", format_duration(elapsed)));
            })?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Scan { type_name, limit } => {
            let store = open_store(&config)?;
            let read = store.begin_read();
            let total = read.count(&type_name)?;
            let mut records = Vec::new();
            for record in read.scan_all(&type_name)?.take(limit.unwrap_or(usize::MAX)) {
                records.push(record?);
            }
            let report = ScanReport {
                type_name,
                total,
                records,
            };
            emit(cli.format, &report, || print_scan_text(&ui, &report))?;
        }
        Command::Find {
            type_name,
            field,
            value,
            full_scan,
            records,
        } => {
            let store = open_store(&config)?;
            let kind = store.schema().type_info(&type_name)?.field_kind(&field)?;
            let value = Value::parse(kind, &value).ok_or_else(|| {
                admin::AdminError::Message(format!("`{value}` is not a valid {kind} value"))
            })?;
            let strategy = if full_scan {
                QueryStrategy::FullScan
            } else {
                QueryStrategy::Auto
            };

            let read = store.begin_read();
            let plan = query::plan(store.schema(), &type_name, &field, strategy)?;
            let ids = read.find_equal_with(&type_name, &field, &value, strategy)?;
            let bodies = if records {
                let mut out = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(record) = read.get(*id)? {
                        out.push(record);
                    }
                }
                Some(out)
            } else {
                None
            };
            let report = FindReport {
                plan,
                value,
                ids: ids.iter().map(|id| id.0).collect(),
                records: bodies,
            };
            emit(cli.format, &report, || print_find_text(&ui, &report))?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<StoreConfig, Box<dyn Error>> {
    let mut config = StoreConfig::load(&cli.config)?;
    if let Some(cache_pages) = cli.open.cache_pages {
        config.cache_pages = cache_pages;
    }
    if let Some(mode) = cli.open.synchronous {
        config.synchronous = mode.into();
    }
    Ok(config)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_stats_text(ui: &Ui, report: &admin::StatsReport) {
    let snapshot = &report.snapshot;
    ui.pairs(
        "Snapshot",
        [
            ("version", snapshot.version.to_string()),
            ("records", snapshot.record_count.to_string()),
            ("index entries", snapshot.index_entries.to_string()),
            ("next record id", snapshot.next_record_id.to_string()),
            ("next page", snapshot.next_page.to_string()),
        ],
    );
    ui.gap();

    let pager = &report.pager;
    ui.pairs(
        "Pager",
        [
            ("page size", pager.page_size.to_string()),
            ("cache hits", pager.counters.hits.to_string()),
            ("cache misses", pager.counters.misses.to_string()),
            ("page writes", pager.counters.page_writes.to_string()),
            ("syncs", pager.counters.syncs.to_string()),
        ],
    );
    ui.gap();

    let trees = &report.trees;
    ui.pairs(
        "Trees",
        [
            ("records", trees.records),
            ("extents", trees.extents),
            ("index", trees.index),
            ("catalog", trees.catalog),
        ]
        .into_iter()
        .map(|(name, shape)| {
            (
                name,
                format!(
                    "depth={} leaves={} internal={} entries={}",
                    shape.depth, shape.leaf_pages, shape.internal_pages, shape.entries
                ),
            )
        }),
    );
    ui.gap();

    ui.pairs(
        "Space",
        [
            ("reclaimable pages", report.free_pages.reclaimable.to_string()),
            ("pending pages", report.free_pages.pending.to_string()),
            ("file size", format_bytes(report.filesystem.size_bytes)),
            ("path", report.filesystem.path.clone()),
        ],
    );
    ui.gap();

    ui.bullets(
        "Types",
        report.types.iter().map(|ty| {
            if ty.indexes.is_empty() {
                format!("{}: {} records", ty.name, ty.records)
            } else {
                format!(
                    "{}: {} records, indexed on {}",
                    ty.name,
                    ty.records,
                    ty.indexes.join(", ")
                )
            }
        }),
    );
}

fn print_verify_text(ui: &Ui, report: &admin::VerifyReport) {
    ui.pairs(
        "Verify",
        [
            ("level", format!("{:?}", report.level)),
            ("version", report.version.to_string()),
            ("pages walked", report.counts.pages_walked.to_string()),
            ("records", report.counts.records_found.to_string()),
            ("extent entries", report.counts.extent_entries.to_string()),
            ("index entries", report.counts.index_entries.to_string()),
        ],
    );
    ui.bullets(
        "Findings",
        report
            .findings
            .iter()
            .map(|finding| format!("{:?}: {}", finding.severity, finding.message)),
    );
    if report.success {
        ui.status(Status::Ok, "store is consistent");
    } else {
        ui.status(Status::Problem, "verification failed");
    }
}

fn print_scan_text(ui: &Ui, report: &ScanReport) {
    ui.bullets(
        &format!("{} ({} records)", report.type_name, report.total),
        report.records.iter().map(describe_record),
    );
    if (report.records.len() as u64) < report.total {
        ui.status(Status::Note, &format!(
            "showing {} of {} records",
            report.records.len(),
            report.total
        ));
    }
}

fn print_find_text(ui: &Ui, report: &FindReport) {
    ui.status(Status::Note, &format!("{}", report.plan));
    match &report.records {
        Some(records) => ui.bullets("Matches", records.iter().map(describe_record)),
        None => ui.bullets("Matches", report.ids.iter().map(|id| format!("#{id}"))),
    }
    ui.status(Status::Note, &format!("{} matching records", report.ids.len()));
}

fn describe_record(record: &Record) -> String {
    let fields: Vec<String> = record
        .fields
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!("#{} {}", record.id, fields.join(" "))
}
