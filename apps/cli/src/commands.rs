//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use parcelpipe_core::{IngestOptions, ProgressReporter, SourceReport, run_ingest};
use parcelpipe_crawler::{Crawler, PropertyType};
use parcelpipe_shared::{
    AppConfig, LoadMode, database_url, init_config, load_config, regions,
};
use parcelpipe_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// parcelpipe — public real-estate registry ingestion.
#[derive(Parser)]
#[command(
    name = "parcelpipe",
    version,
    about = "Normalize public real-estate registry sources into a PNU-keyed PostGIS store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Load mode flag.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ModeArg {
    /// Merge into existing rows (default).
    Upsert,
    /// Destructive full reload of each target table.
    Truncate,
}

impl From<ModeArg> for LoadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Upsert => LoadMode::Upsert,
            ModeArg::Truncate => LoadMode::Truncate,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest one or more sources into the store.
    Ingest {
        /// Source identifiers (repeatable; see `parcelpipe sources`).
        #[arg(short, long = "source", required = true)]
        sources: Vec<String>,

        /// Explicit input files (defaults to discovery under the data root).
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Region filter: administrative-code prefix or province name
        /// (repeatable).
        #[arg(short, long = "region")]
        regions: Vec<String>,

        /// Load mode.
        #[arg(short, long, default_value = "upsert")]
        mode: ModeArg,
    },

    /// Download transaction spreadsheets from the public portal.
    Crawl {
        /// Start date (YYYY-MM-DD, default: one year ago).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD, default: today).
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Property type codes (A B C D G, default: all).
        #[arg(long = "types", num_args = 1..)]
        types: Vec<String>,

        /// Sales only (skip rentals).
        #[arg(long)]
        sale_only: bool,

        /// Delay between downloads in milliseconds (overrides config).
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Test mode: current month, apartments, sales only.
        #[arg(long)]
        test: bool,
    },

    /// List registered source identifiers in dependency order.
    Sources,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "parcelpipe=info",
        1 => "parcelpipe=debug",
        _ => "parcelpipe=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest {
            sources,
            files,
            regions,
            mode,
        } => cmd_ingest(sources, files, regions, mode.into()).await,
        Command::Crawl {
            start,
            end,
            types,
            sale_only,
            delay_ms,
            test,
        } => cmd_crawl(start, end, types, sale_only, delay_ms, test).await,
        Command::Sources => cmd_sources(),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

async fn cmd_ingest(
    sources: Vec<String>,
    files: Vec<PathBuf>,
    region_tokens: Vec<String>,
    mode: LoadMode,
) -> Result<()> {
    let config = load_config()?;

    let region_prefixes: Vec<String> = region_tokens
        .iter()
        .map(|token| {
            regions::resolve_region_prefix(token)
                .ok_or_else(|| eyre!("unknown region: {token}"))
        })
        .collect::<Result<_>>()?;

    let url = database_url(&config)?;
    let storage = Storage::connect(&url).await?;

    let options = IngestOptions {
        sources,
        files,
        region_prefixes,
        mode,
        data_root: expand_home(&config.data.root),
        error_samples: config.loader.error_samples,
    };

    info!(sources = options.sources.len(), mode = ?mode, "starting ingest");

    let reporter = CliProgress::new();
    let reports = run_ingest(&options, &storage, &reporter).await?;
    reporter.finish();

    println!();
    println!("  {:<24} {:>10} {:>10} {:>9} {:>9} {:>7}", "source", "read", "loaded", "skipped", "filtered", "errors");
    for report in &reports {
        println!(
            "  {:<24} {:>10} {:>10} {:>9} {:>9} {:>7}",
            report.source, report.read, report.loaded, report.skipped, report.filtered,
            report.errors
        );
        for sample in &report.error_samples {
            println!("      ! {sample}");
        }
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Crawl
// ---------------------------------------------------------------------------

async fn cmd_crawl(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    type_codes: Vec<String>,
    sale_only: bool,
    delay_ms: Option<u64>,
    test: bool,
) -> Result<()> {
    let config = load_config()?;
    let mut crawler_config = config.crawler.clone();
    if let Some(delay) = delay_ms {
        crawler_config.delay_ms = delay;
    }

    let today = Utc::now().date_naive();
    let (start, end, types, sale_only) = if test {
        // Test mode keeps scope tiny: the current month, one type, sales.
        let month_start = today.with_day(1).expect("first of month");
        (month_start, today, vec![PropertyType::Apartment], true)
    } else {
        let end = end.unwrap_or(today);
        let start = start.unwrap_or(end - Duration::days(364));
        let types = if type_codes.is_empty() {
            PropertyType::ALL.to_vec()
        } else {
            type_codes
                .iter()
                .map(|code| {
                    PropertyType::from_code(code)
                        .ok_or_else(|| eyre!("unknown property type code: {code} (use A B C D G)"))
                })
                .collect::<Result<_>>()?
        };
        (start, end, types, sale_only)
    };

    if end < start {
        return Err(eyre!("end date {end} is before start date {start}"));
    }

    let output_dir = {
        let configured = PathBuf::from(&crawler_config.output_dir);
        if configured.is_absolute() {
            configured
        } else {
            expand_home(&config.data.root).join(configured)
        }
    };

    info!(%start, %end, types = types.len(), sale_only, "starting crawl");
    println!("  range:  {start} ~ {end}");
    println!("  types:  {}", types.iter().map(|t| t.code()).collect::<Vec<_>>().join(" "));
    println!("  output: {}", output_dir.display());

    let crawler = Crawler::new(crawler_config)?;
    let report = crawler.run(start, end, &types, sale_only, &output_dir).await?;

    println!();
    println!("  completed: {}", report.completed());
    println!("  skipped:   {} (already downloaded)", report.skipped_existing());
    println!("  no data:   {}", report.no_data());
    if report.quota_hit {
        println!(
            "  aborted:   {} (daily quota exhausted — re-run tomorrow; existing files are skipped)",
            report.aborted()
        );
    }
    let failed = report.failed();
    for (name, reason) in &failed {
        println!("  failed:    {name}: {reason}");
    }
    println!();

    if !failed.is_empty() {
        return Err(eyre!("{} chunk(s) failed", failed.len()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sources / config
// ---------------------------------------------------------------------------

fn cmd_sources() -> Result<()> {
    use parcelpipe_processors::SourceProcessor as _;

    println!();
    for processor in parcelpipe_processors::registry() {
        println!("  {:<24} {}", processor.name(), processor.description());
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("  wrote {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn source_started(&self, source: &str, files: usize) {
        self.spinner.set_message(format!("{source}: {files} file(s)"));
    }

    fn file_started(&self, source: &str, file: &str, index: usize, total: usize) {
        self.spinner
            .set_message(format!("{source}: [{index}/{total}] {file}"));
    }

    fn source_finished(&self, report: &SourceReport) {
        self.spinner.println(format!(
            "  {} — read {}, loaded {}, skipped {}, filtered {}, errors {}",
            report.source, report.read, report.loaded, report.skipped, report.filtered,
            report.errors
        ));
    }
}
