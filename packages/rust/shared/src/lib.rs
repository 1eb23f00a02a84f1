//! Shared types, error model, and configuration for DocAssembler.
//!
//! This crate is the foundation depended on by all other DocAssembler crates.
//! It provides:
//! - [`DocAssemblerError`]: the unified error type
//! - Provider specifications ([`ProviderSpec`], [`Bundle`], [`DocumentRule`], [`ContentRule`])
//! - Catalog value types ([`LoadStatus`], [`IndexCandidate`], [`FormattingSpan`], [`ParseIssue`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod spec;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, DocumentConfig, FetchConfig, IndexConfig, LoadDepth,
    ProviderRegistryEntry, RenderConfig, RunConfig, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from,
};
pub use error::{DocAssemblerError, Result};
pub use spec::{Align, Bundle, ContentProvider, ContentRule, DocumentRule, ProviderSpec, SourceKind};
pub use types::{
    CatalogRow, EntryId, FormattingSpan, IndexCandidate, LoadStatus, ParseIssue, ParseIssueRow,
    SpanKind, SynonymRow, url_key,
};
