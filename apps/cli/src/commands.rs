//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docassembler_core::{
    DiscrepancyReport, JsonDocumentSink, ProgressReporter, RenderStage, ResolutionPlan,
    RunReport, SharedCatalog, apply_resolutions, load_catalog, run_provider, save_catalog,
};
use docassembler_shared::{
    AppConfig, LoadDepth, LoadStatus, ProviderSpec, RunConfig, expand_home, init_config,
    load_config,
};
use docassembler_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

/// Database file created under the output directory when `--db` is not given.
const DEFAULT_DB_NAME: &str = "docassembler.db";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// DocAssembler: turn provider websites into catalogued, formatted documents.
#[derive(Parser)]
#[command(
    name = "docassembler",
    version,
    about = "Read provider indexes, reconcile them with the catalog, and extract formatted documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
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

/// How far a run goes.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum DepthArg {
    /// Retrieve every observed document.
    Full,
    /// Retrieve only the first newly discovered document.
    One,
    /// Read and reconcile indexes without retrieving documents.
    Index,
    /// Load and validate specifications only.
    Top,
}

impl From<DepthArg> for LoadDepth {
    fn from(depth: DepthArg) -> Self {
        match depth {
            DepthArg::Full => LoadDepth::Full,
            DepthArg::One => LoadDepth::OneDocument,
            DepthArg::Index => LoadDepth::IndexOnly,
            DepthArg::Top => LoadDepth::TopLevel,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run provider specifications against the catalog.
    Run {
        /// Provider specification file (repeatable). Defaults to the
        /// `[[providers]]` registry in the config file.
        #[arg(short, long)]
        spec: Vec<PathBuf>,

        /// Load depth (defaults to the configured one).
        #[arg(short, long)]
        depth: Option<DepthArg>,

        /// Catalog database (defaults to `<out>/docassembler.db`).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output directory for cache and documents.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List catalogued documents.
    List {
        /// Catalog database.
        #[arg(long)]
        db: PathBuf,
    },

    /// Show index discrepancies and optionally apply a resolution plan.
    Resolve {
        /// Provider specification file (repeatable).
        #[arg(short, long, required = true)]
        spec: Vec<PathBuf>,

        /// Catalog database.
        #[arg(long)]
        db: PathBuf,

        /// Resolution plan (TOML). Without it the report is only printed.
        #[arg(long)]
        plan: Option<PathBuf>,
    },

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
        0 => "docassembler=info",
        1 => "docassembler=debug",
        _ => "docassembler=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            spec,
            depth,
            db,
            out,
        } => cmd_run(&spec, depth, db.as_deref(), out.as_deref()).await,
        Command::List { db } => cmd_list(&db).await,
        Command::Resolve { spec, db, plan } => cmd_resolve(&spec, &db, plan.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

/// Load every specification; a spec that fails to load is skipped.
fn load_specs(paths: &[PathBuf], config: &AppConfig) -> Result<Vec<ProviderSpec>> {
    let paths: Vec<PathBuf> = if paths.is_empty() {
        config
            .providers
            .iter()
            .map(|p| expand_home(&p.spec_path))
            .collect()
    } else {
        paths.to_vec()
    };
    if paths.is_empty() {
        return Err(eyre!(
            "no provider specifications given: pass --spec or add [[providers]] to the config"
        ));
    }

    let mut specs = Vec::new();
    for path in &paths {
        match ProviderSpec::load(path) {
            Ok(spec) => specs.push(spec),
            Err(e) => {
                error!(path = %path.display(), error = %e, "skipping provider");
                eprintln!("  ! {}: {e}", path.display());
            }
        }
    }
    if specs.is_empty() {
        return Err(eyre!("none of the provider specifications could be loaded"));
    }
    Ok(specs)
}

fn provider_names(specs: &[ProviderSpec]) -> Vec<&str> {
    specs.iter().map(|s| s.provider.name.as_str()).collect()
}

async fn open_catalog(db: &Path, specs: &[ProviderSpec]) -> Result<(Storage, SharedCatalog)> {
    if let Some(parent) = db.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("cannot create '{}': {e}", parent.display()))?;
    }
    let storage = Storage::open(db).await?;
    let (catalog, summary) = load_catalog(&storage, &provider_names(specs)).await?;
    for (doc_id, reason) in &summary.skipped {
        warn!(doc_id, reason = %reason, "stored document not loaded");
    }
    Ok((storage, Arc::new(Mutex::new(catalog))))
}

/// Run every provider, logging (not propagating) per-provider failures.
async fn run_all(
    specs: &[ProviderSpec],
    catalog: &SharedCatalog,
    run_config: &RunConfig,
    render: &RenderStage,
) -> Vec<RunReport> {
    let mut reports = Vec::new();
    for spec in specs {
        let progress = Arc::new(CliProgress::new());
        let result = run_provider(
            spec,
            catalog.clone(),
            run_config,
            render.clone(),
            progress.clone(),
        )
        .await;
        progress.finish();

        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(provider = %spec.provider.name, error = %e, "provider run failed");
                eprintln!("  ! {}: {e}", spec.provider.name);
            }
        }
    }
    reports
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    spec_paths: &[PathBuf],
    depth: Option<DepthArg>,
    db: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let config = load_config()?;
    let specs = load_specs(spec_paths, &config)?;

    let mut run_config = RunConfig::from(&config);
    if let Some(depth) = depth {
        run_config.load_depth = depth.into();
    }
    if let Some(out) = out {
        run_config.output_dir = out.to_path_buf();
    }
    let db_path = db
        .map(Path::to_path_buf)
        .unwrap_or_else(|| run_config.output_dir.join(DEFAULT_DB_NAME));

    info!(
        providers = specs.len(),
        depth = ?run_config.load_depth,
        out = %run_config.output_dir.display(),
        db = %db_path.display(),
        "starting run"
    );

    let (storage, catalog) = open_catalog(&db_path, &specs).await?;
    let sink = Arc::new(JsonDocumentSink::new(run_config.output_dir.join("documents")));
    let render = RenderStage::new(sink.clone(), run_config.pool_size);

    let reports = run_all(&specs, &catalog, &run_config, &render).await;
    for report in &reports {
        print_run_report(report);
    }

    let saved = save_catalog(&storage, &mut *catalog.lock().await).await?;
    println!(
        "  Catalog: {} saved, {} awaiting review, {} removed",
        saved.saved, saved.pending, saved.removed
    );
    for (guid, reason) in &saved.failures {
        println!("    ! {guid}: {reason}");
    }
    println!("  Documents: {}", sink.dir().display());
    println!();

    Ok(())
}

async fn cmd_list(db: &Path) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let documents = storage.load_documents().await?;
    let synonyms = storage.load_synonyms().await?;

    info!(db = %db.display(), count = documents.len(), "listing documents");

    if documents.is_empty() {
        println!("No documents catalogued.");
        return Ok(());
    }

    println!(
        "{:<6} {:<5} {:<16} {:<20} {:<40} URL",
        "ID", "ON", "PROVIDER", "BUNDLE", "TITLE"
    );
    for doc in &documents {
        let count = synonyms.iter().filter(|s| s.doc_id == doc.doc_id).count();
        let title = if count > 0 {
            format!("{} (+{count})", doc.title)
        } else {
            doc.title.clone()
        };
        println!(
            "{:<6} {:<5} {:<16} {:<20} {:<40} {}",
            doc.doc_id,
            if doc.enabled { "yes" } else { "no" },
            doc.provider,
            doc.bundle,
            title,
            doc.url
        );
    }
    println!();
    println!("  {} documents", documents.len());

    Ok(())
}

async fn cmd_resolve(spec_paths: &[PathBuf], db: &Path, plan: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let specs = load_specs(spec_paths, &config)?;

    // Parse the plan before any network work so a bad plan fails fast.
    let plan = match plan {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| eyre!("cannot read plan '{}': {e}", path.display()))?;
            Some(ResolutionPlan::from_toml_str(&content)?)
        }
        None => None,
    };

    let mut run_config = RunConfig::from(&config);
    run_config.load_depth = LoadDepth::IndexOnly;

    let (storage, catalog) = open_catalog(db, &specs).await?;
    // Index-only runs never render.
    let sink = Arc::new(JsonDocumentSink::new(run_config.output_dir.join("documents")));
    let render = RenderStage::new(sink, 1);

    let reports: Vec<DiscrepancyReport> = run_all(&specs, &catalog, &run_config, &render)
        .await
        .into_iter()
        .flat_map(|r| r.discrepancies)
        .collect();

    for report in &reports {
        print_discrepancies(report);
    }

    let Some(plan) = plan else {
        if reports.iter().all(DiscrepancyReport::is_empty) {
            println!("  Catalog and indexes agree.");
        } else {
            println!("  Pass --plan <file> to apply resolutions.");
        }
        return Ok(());
    };

    let resolutions = plan.expand(&reports);
    let mut catalog = catalog.lock().await;
    let outcomes = apply_resolutions(&mut catalog, &resolutions);

    println!("  Resolutions:");
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("    ok  {:?}", outcome.resolution),
            Err(e) => println!("    !!  {:?}: {e}", outcome.resolution),
        }
    }
    let applied = outcomes.iter().filter(|o| o.is_ok()).count();

    let saved = save_catalog(&storage, &mut catalog).await?;
    println!();
    println!(
        "  Applied {applied}/{} resolutions; {} saved, {} removed",
        outcomes.len(),
        saved.saved,
        saved.removed
    );
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_run_report(report: &RunReport) {
    println!();
    println!("  Provider: {} ({:?})", report.provider, report.depth);
    for bundle in &report.bundles {
        match &bundle.error {
            Some(e) => println!("    {:<24} index failed: {e}", bundle.bundle),
            None => println!(
                "    {:<24} {} listed, {} new, {} matched, {} repeated",
                bundle.bundle, bundle.candidates, bundle.new, bundle.matched, bundle.duplicates
            ),
        }
    }

    if !report.documents.is_empty() {
        println!(
            "    Documents: {} loaded, {} parse errors, {} fetch errors, {} removed upstream",
            report.count(LoadStatus::LoadedSuccessfully),
            report.count(LoadStatus::ParseError),
            report.count(LoadStatus::FetchError),
            report.count(LoadStatus::RemovedByContentProvider),
        );
        for doc in report.documents.iter().filter(|d| d.error.is_some()) {
            println!(
                "      {} {}: {}",
                doc.status,
                doc.url,
                doc.error.as_deref().unwrap_or_default()
            );
        }
    }

    for discrepancy in report.discrepancies.iter().filter(|d| !d.is_empty()) {
        print_discrepancies(discrepancy);
    }
    println!("    Time: {:.1}s", report.elapsed.as_secs_f64());
}

fn print_discrepancies(report: &DiscrepancyReport) {
    if report.is_empty() {
        return;
    }
    println!();
    println!("  Discrepancies in {} / {}", report.provider, report.bundle);
    for item in &report.unmatched_new {
        println!("    new       {}  {}", item.url, item.title);
    }
    for item in &report.unmatched_existing {
        let marker = if report.missing.iter().any(|m| m.guid == item.guid) {
            "missing"
        } else {
            "unmatched"
        };
        println!("    {marker:<9} {}  {}", item.url, item.title);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using indicatif spinners/bars.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn documents_scheduled(&self, total: usize) {
        if total == 0 {
            return;
        }
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
    }

    fn document_done(&self, url: &Url, status: LoadStatus) {
        self.bar.inc(1);
        self.bar.set_message(format!("{status} {url}"));
    }

    fn done(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}
