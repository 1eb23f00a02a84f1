//! End-to-end provider run: spec → index → catalog → retrieval → extraction → render.
//!
//! Each document retrieval runs as its own task. The [`FetchScheduler`]
//! decides when each task starts; the catalog is shared between tasks behind
//! a mutex that is never held across an await point.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use docassembler_crawler::{CachePolicy, FetchScheduler, Fetched, Fetcher, ScheduledJob};
use docassembler_discovery::{ResolveOptions, resolve_bundle};
use docassembler_extract::{ExtractedDocument, Source, extract_document, validate_spec};
use docassembler_shared::{
    DocAssemblerError, DocumentRule, EntryId, LoadDepth, LoadStatus, ProviderSpec, Result,
    RunConfig, SourceKind,
};

use crate::catalog::{Catalog, Observation};
use crate::reconcile::DiscrepancyReport;
use crate::render::{DocumentMeta, RenderStage};

/// A catalog shared by concurrent document tasks.
pub type SharedCatalog = Arc<Mutex<Catalog>>;

// ---------------------------------------------------------------------------
// Progress & report
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the number of scheduled documents is known.
    fn documents_scheduled(&self, total: usize);
    /// Called when a document reaches a terminal state.
    fn document_done(&self, url: &Url, status: LoadStatus);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn documents_scheduled(&self, _total: usize) {}
    fn document_done(&self, _url: &Url, _status: LoadStatus) {}
    fn done(&self, _report: &RunReport) {}
}

/// Per-bundle index outcome.
#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub bundle: String,
    pub candidates: usize,
    pub new: usize,
    pub matched: usize,
    pub duplicates: usize,
    /// Set when the bundle's index could not be resolved.
    pub error: Option<String>,
}

/// Final state of one scheduled document.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub guid: EntryId,
    pub url: Url,
    pub status: LoadStatus,
    pub issues: usize,
    pub error: Option<String>,
}

/// Result of [`run_provider`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub provider: String,
    pub depth: LoadDepth,
    pub bundles: Vec<BundleSummary>,
    pub discrepancies: Vec<DiscrepancyReport>,
    pub documents: Vec<DocumentOutcome>,
    pub elapsed: std::time::Duration,
}

impl RunReport {
    /// Scheduled documents that ended in `status`.
    pub fn count(&self, status: LoadStatus) -> usize {
        self.documents.iter().filter(|d| d.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Document jobs
// ---------------------------------------------------------------------------

/// One document retrieval handed to the scheduler.
#[derive(Debug, Clone)]
struct DocumentJob {
    guid: EntryId,
    url: Url,
    rule: Arc<DocumentRule>,
    meta: DocumentMeta,
}

impl ScheduledJob for DocumentJob {
    fn url(&self) -> &Url {
        &self.url
    }

    fn kind(&self) -> SourceKind {
        self.rule.format
    }
}

/// Everything a document task needs besides its job.
#[derive(Clone)]
struct TaskContext {
    catalog: SharedCatalog,
    fetcher: Fetcher,
    render: RenderStage,
    footer: String,
    progress: Arc<dyn ProgressReporter>,
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Run one provider specification against the catalog.
///
/// A specification error fails this provider only. A bundle whose index
/// cannot be read is reported and skipped. Document failures end in their
/// terminal states and never stop other documents.
#[instrument(skip_all, fields(provider = %spec.provider.name, depth = ?config.load_depth))]
pub async fn run_provider(
    spec: &ProviderSpec,
    catalog: SharedCatalog,
    config: &RunConfig,
    render: RenderStage,
    progress: Arc<dyn ProgressReporter>,
) -> Result<RunReport> {
    let start = Instant::now();
    let provider = &spec.provider;

    progress.phase("Validating specification");
    validate_spec(spec)?;

    let mut report = RunReport {
        provider: provider.name.clone(),
        depth: config.load_depth,
        bundles: Vec::new(),
        discrepancies: Vec::new(),
        documents: Vec::new(),
        elapsed: Default::default(),
    };

    if config.load_depth == LoadDepth::TopLevel {
        info!("specification loaded, stopping at top level");
        report.elapsed = start.elapsed();
        progress.done(&report);
        return Ok(report);
    }

    let fetcher = Fetcher::new(config)?;
    let resolve_opts = ResolveOptions::from(config);
    let mut jobs = Vec::new();

    for bundle in &provider.bundles {
        progress.phase(&format!("Reading index: {}", bundle.name));

        let index = match resolve_bundle(&fetcher, provider, bundle, &resolve_opts).await {
            Ok(index) => index,
            Err(e) => {
                warn!(bundle = %bundle.name, error = %e, "bundle index failed");
                report.bundles.push(BundleSummary {
                    bundle: bundle.name.clone(),
                    candidates: 0,
                    new: 0,
                    matched: 0,
                    duplicates: 0,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        let mut summary = BundleSummary {
            bundle: bundle.name.clone(),
            candidates: index.candidates.len(),
            new: 0,
            matched: 0,
            duplicates: 0,
            error: None,
        };

        let mut catalog_guard = catalog.lock().await;
        for candidate in &index.candidates {
            let observation = catalog_guard.observe(&provider.name, candidate);
            match observation {
                Observation::New(_) => summary.new += 1,
                Observation::Matched(_) => summary.matched += 1,
                Observation::Duplicate(_) => {
                    summary.duplicates += 1;
                    continue;
                }
            }

            if !wants_retrieval(config.load_depth, observation, &jobs) {
                continue;
            }
            let Some(rule) = bundle.documents.get(candidate.rule_index) else {
                continue;
            };
            if let Some(job) = schedule(&mut catalog_guard, observation.id(), rule, config)? {
                jobs.push(job);
            }
        }

        report.discrepancies.push(DiscrepancyReport::build(
            &catalog_guard,
            &provider.name,
            &bundle.name,
            index.failed_pages.is_empty(),
        ));
        drop(catalog_guard);

        info!(
            bundle = %bundle.name,
            new = summary.new,
            matched = summary.matched,
            duplicates = summary.duplicates,
            "bundle reconciled"
        );
        report.bundles.push(summary);
    }

    progress.documents_scheduled(jobs.len());
    if !jobs.is_empty() {
        progress.phase("Retrieving documents");

        let date = Utc::now().format("%-d %B %Y").to_string();
        let ctx = TaskContext {
            catalog: catalog.clone(),
            fetcher: fetcher.clone(),
            render,
            footer: config.document.render_disclaimer(&provider.name, &date),
            progress: progress.clone(),
        };

        let scheduler = FetchScheduler::new(config.min_fetch_interval);
        report.documents = scheduler
            .run(&fetcher, jobs, |job| process_document(ctx.clone(), job))
            .await;
    }

    report.elapsed = start.elapsed();
    info!(
        documents = report.documents.len(),
        loaded = report.count(LoadStatus::LoadedSuccessfully),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "provider run complete"
    );
    progress.done(&report);
    Ok(report)
}

/// Whether an observation at `depth` should be retrieved.
fn wants_retrieval(depth: LoadDepth, observation: Observation, jobs: &[DocumentJob]) -> bool {
    match depth {
        LoadDepth::Full => true,
        LoadDepth::OneDocument => matches!(observation, Observation::New(_)) && jobs.is_empty(),
        LoadDepth::IndexOnly | LoadDepth::TopLevel => false,
    }
}

/// Move an observed entry to `Waiting` and build its job.
fn schedule(
    catalog: &mut Catalog,
    guid: EntryId,
    rule: &DocumentRule,
    config: &RunConfig,
) -> Result<Option<DocumentJob>> {
    let Some(entry) = catalog.get(guid) else {
        return Ok(None);
    };
    if !entry.status.can_transition_to(LoadStatus::Waiting) {
        return Ok(None);
    }

    let meta = DocumentMeta {
        guid,
        file_name: entry.file_name.clone(),
        title: entry.title.clone(),
        document_title: None,
        url: entry.url.clone(),
        provider: entry.provider.clone(),
        bundle: entry.bundle.clone(),
        synonyms: entry.synonyms.values().cloned().collect(),
        font_family: config.font_family.clone(),
    };
    let job = DocumentJob {
        guid,
        url: entry.url.clone(),
        rule: Arc::new(rule.clone()),
        meta,
    };

    catalog.transition(guid, LoadStatus::Waiting)?;
    Ok(Some(job))
}

// ---------------------------------------------------------------------------
// Document task
// ---------------------------------------------------------------------------

/// Retrieve, extract and render one document, recording each step.
async fn process_document(ctx: TaskContext, job: DocumentJob) -> DocumentOutcome {
    let result = retrieve_and_extract(&ctx, &job).await;

    let (intended, issues, error) = match result {
        Ok(issues) => (LoadStatus::LoadedSuccessfully, issues, None),
        Err((status, e)) => (status, 0, Some(e.to_string())),
    };

    // Report what the catalog holds; a rejected transition keeps the old status.
    let status = match ctx.catalog.lock().await.get(job.guid) {
        Some(entry) => entry.status,
        None => intended,
    };
    if status != intended {
        warn!(url = %job.url, %status, %intended, "document did not reach its outcome status");
    }

    ctx.progress.document_done(&job.url, status);
    DocumentOutcome {
        guid: job.guid,
        url: job.url,
        status,
        issues,
        error,
    }
}

type StepResult<T> = std::result::Result<T, (LoadStatus, DocAssemblerError)>;

async fn retrieve_and_extract(ctx: &TaskContext, job: &DocumentJob) -> StepResult<usize> {
    let fail = |status: LoadStatus| move |e: DocAssemblerError| (status, e);

    set_status(ctx, job.guid, LoadStatus::Retrieving)
        .await
        .map_err(fail(LoadStatus::FetchError))?;

    let fetched = match ctx.fetcher.fetch(&job.url, job.rule.format, CachePolicy::PreferCache).await {
        Ok(fetched) => fetched,
        Err(e) => {
            let status = if e.is_not_found() {
                LoadStatus::RemovedByContentProvider
            } else {
                LoadStatus::FetchError
            };
            warn!(url = %job.url, error = %e, %status, "retrieval failed");
            settle(ctx, job, status).await;
            return Err((status, e));
        }
    };

    record_download(&mut *ctx.catalog.lock().await, job.guid, &fetched)
        .map_err(fail(LoadStatus::ParseError))?;

    let extracted = extract(&job.rule, &fetched.body, &job.url, &ctx.footer);
    let doc = match extracted {
        Ok(doc) => doc,
        Err(e) => {
            warn!(url = %job.url, error = %e, "extraction failed");
            settle(ctx, job, LoadStatus::ParseError).await;
            return Err((LoadStatus::ParseError, e));
        }
    };

    let mut meta = job.meta.clone();
    {
        let mut catalog = ctx.catalog.lock().await;
        for synonym in &doc.synonyms {
            catalog
                .add_synonym(job.guid, synonym)
                .map_err(fail(LoadStatus::ParseError))?;
        }
        catalog
            .set_parse_issues(job.guid, doc.content.issues.clone())
            .map_err(fail(LoadStatus::ParseError))?;
        if let Some(entry) = catalog.get(job.guid) {
            meta.synonyms = entry.synonyms.values().cloned().collect();
        }
    }
    meta.document_title = doc.title.clone();

    if let Err(e) = ctx.render.render(&meta, &doc.content).await {
        warn!(url = %job.url, error = %e, "render failed");
        settle(ctx, job, LoadStatus::ParseError).await;
        return Err((LoadStatus::ParseError, e));
    }

    set_status(ctx, job.guid, LoadStatus::LoadedSuccessfully)
        .await
        .map_err(fail(LoadStatus::ParseError))?;
    debug!(url = %job.url, issues = doc.content.issues.len(), "document loaded");
    Ok(doc.content.issues.len())
}

fn record_download(catalog: &mut Catalog, guid: EntryId, fetched: &Fetched) -> Result<()> {
    catalog.transition(guid, LoadStatus::Downloaded)?;
    catalog.record_retrieval(guid, fetched.cached_at, !fetched.from_cache)?;
    catalog.transition(guid, LoadStatus::Parsing)
}

/// Parse and extract synchronously so no parsed tree lives across an await.
fn extract(rule: &DocumentRule, body: &str, url: &Url, footer: &str) -> Result<ExtractedDocument> {
    let source = Source::parse(rule.format, body)?;
    let footer = (!footer.is_empty()).then_some(footer);
    extract_document(rule, &source, url, footer)
}

async fn set_status(ctx: &TaskContext, guid: EntryId, status: LoadStatus) -> Result<()> {
    ctx.catalog.lock().await.transition(guid, status)
}

/// Move a failed document to its terminal status, logging a rejected move.
async fn settle(ctx: &TaskContext, job: &DocumentJob, status: LoadStatus) {
    if let Err(e) = set_status(ctx, job.guid, status).await {
        warn!(url = %job.url, %status, error = %e, "status change rejected");
    }
}
