//! Retrieval plumbing for DocAssembler.
//!
//! This crate provides:
//! - [`fetch`]: HTTP retrieval with an on-disk cache
//! - [`scheduler`]: paces network-bound task starts, lets cached work through
//! - [`gate`]: bounds concurrent renders and orders render-stage access

pub mod fetch;
pub mod gate;
pub mod scheduler;

pub use fetch::{CachePolicy, Fetched, Fetcher, url_hash};
pub use gate::{RenderGate, RenderPermit};
pub use scheduler::{FetchScheduler, ScheduledJob};
