//! Core orchestration and domain logic for DocAssembler.
//!
//! This crate owns the document catalog and ties discovery, retrieval,
//! extraction and rendering together into a provider run (`run_provider`).
//! It also moves the catalog to and from the store and applies manual
//! reconciliation decisions.

pub mod catalog;
pub mod persist;
pub mod pipeline;
pub mod reconcile;
pub mod render;

pub use catalog::{Catalog, CatalogEntry, EntryOrigin, Observation};
pub use persist::{LoadSummary, SaveSummary, load_catalog, save_catalog};
pub use pipeline::{
    BundleSummary, DocumentOutcome, ProgressReporter, RunReport, SharedCatalog, SilentProgress,
    run_provider,
};
pub use reconcile::{
    DiscrepancyItem, DiscrepancyReport, Resolution, ResolutionOutcome, ResolutionPlan,
    apply_resolutions,
};
pub use render::{DocumentMeta, DocumentSink, JsonDocumentSink, MemorySink, RenderStage, RenderedDocument};
