//! Fetch scheduler.
//!
//! Work is split into tasks whose resource is already cached and tasks that
//! must hit the network. Cached tasks start immediately, back to back.
//! Network-bound tasks start one at a time, at least `min_interval` apart, so
//! the origin is never hammered. The scheduler controls when a task starts,
//! not how many run at once.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use docassembler_shared::SourceKind;

use crate::fetch::Fetcher;

/// A unit of work the scheduler can place.
pub trait ScheduledJob {
    /// Resource the job retrieves.
    fn url(&self) -> &Url;
    /// Kind of that resource, which selects its cache file.
    fn kind(&self) -> SourceKind;
}

/// Paces task starts against the retrieval cache.
#[derive(Debug, Clone)]
pub struct FetchScheduler {
    min_interval: Duration,
}

impl FetchScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Start every job via `start` and wait for all of them.
    ///
    /// Results come back in the order the jobs were given. A task that panics
    /// is logged and contributes no result.
    pub async fn run<J, F, Fut, R>(&self, fetcher: &Fetcher, jobs: Vec<J>, mut start: F) -> Vec<R>
    where
        J: ScheduledJob,
        F: FnMut(J) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let (cached, network): (Vec<_>, Vec<_>) = jobs
            .into_iter()
            .enumerate()
            .partition(|(_, job)| fetcher.is_cached(job.url(), job.kind()));

        info!(
            cached = cached.len(),
            network = network.len(),
            interval_ms = self.min_interval.as_millis() as u64,
            "scheduling retrieval"
        );

        let mut set = JoinSet::new();

        for (idx, job) in cached {
            let task = start(job);
            set.spawn(async move { (idx, task.await) });
        }

        let mut last_network_start: Option<Instant> = None;
        for (idx, job) in network {
            // Another task may have cached this resource in the meantime.
            if !fetcher.is_cached(job.url(), job.kind()) {
                if let Some(last) = last_network_start {
                    tokio::time::sleep_until(last + self.min_interval).await;
                }
                last_network_start = Some(Instant::now());
            }
            debug!(url = %job.url(), "starting retrieval");
            let task = start(job);
            set.spawn(async move { (idx, task.await) });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "scheduled task failed to complete"),
            }
        }

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, r)| r).collect()
    }
}
