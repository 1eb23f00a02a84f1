//! Discrepancy reports and manual resolutions.
//!
//! After a bundle's index has been observed, everything the crawl could not
//! settle on its own is gathered into a [`DiscrepancyReport`]: new web
//! discoveries awaiting a decision, and persisted entries the index no longer
//! links to. Nothing here is decided automatically; an operator supplies
//! [`Resolution`]s, usually as a plan file, and [`apply_resolutions`] carries
//! them out one by one.
//!
//! Resolutions name entries by URL. Fresh discoveries receive a new GUID on
//! every run, so a URL is the only handle a plan written between runs can
//! rely on.

use serde::{Deserialize, Serialize};
use url::Url;

use docassembler_shared::{DocAssemblerError, EntryId, LoadStatus, Result};

use crate::catalog::{Catalog, CatalogEntry};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One entry listed in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscrepancyItem {
    pub guid: EntryId,
    pub title: String,
    pub url: Url,
}

impl From<&CatalogEntry> for DiscrepancyItem {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            guid: entry.guid,
            title: entry.title.clone(),
            url: entry.url.clone(),
        }
    }
}

/// Unsettled entries of one provider bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscrepancyReport {
    pub provider: String,
    pub bundle: String,
    /// Web discoveries with no persisted counterpart.
    pub unmatched_new: Vec<DiscrepancyItem>,
    /// Persisted entries not re-observed; candidates for pairing with new ones.
    pub unmatched_existing: Vec<DiscrepancyItem>,
    /// The unmatched persisted residue of a complete crawl, offered as a
    /// batch. Empty when part of the index could not be read.
    pub missing: Vec<DiscrepancyItem>,
}

impl DiscrepancyReport {
    /// Collect the discrepancies of `provider`/`bundle`.
    ///
    /// `complete` says whether every index page of the bundle was read.
    pub fn build(catalog: &Catalog, provider: &str, bundle: &str, complete: bool) -> Self {
        let in_bundle = |e: &&CatalogEntry| e.provider == provider && e.bundle == bundle;

        let unmatched_new: Vec<_> = catalog
            .entries()
            .filter(in_bundle)
            .filter(|e| e.pending_review)
            .map(DiscrepancyItem::from)
            .collect();
        let unmatched_existing: Vec<_> = catalog
            .entries()
            .filter(in_bundle)
            .filter(|e| e.status == LoadStatus::DatabaseEntry)
            .map(DiscrepancyItem::from)
            .collect();
        let missing = if complete {
            unmatched_existing.clone()
        } else {
            Vec::new()
        };

        Self {
            provider: provider.to_string(),
            bundle: bundle.to_string(),
            unmatched_new,
            unmatched_existing,
            missing,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.unmatched_new.is_empty() && self.unmatched_existing.is_empty()
    }

    /// A Delete resolution for every missing entry.
    pub fn delete_missing(&self) -> Vec<Resolution> {
        self.missing
            .iter()
            .map(|item| Resolution::Delete {
                url: item.url.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Resolutions
// ---------------------------------------------------------------------------

/// A manual decision about one discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Resolution {
    /// `existing` absorbs the entry at `new` and takes over its URL and title.
    Merge { existing: Url, new: Url },
    /// Promote a new discovery to an enabled catalog member.
    AcceptNew { url: Url },
    /// Keep the entry but mark it ignored and disabled.
    Ignore { url: Url },
    /// Disable the entry and remove it from the store.
    Delete { url: Url },
}

/// A resolutions file.
///
/// ```toml
/// delete_missing = true
///
/// [[resolution]]
/// action = "merge"
/// existing = "https://example.org/old-asthma"
/// new = "https://example.org/asthma"
///
/// [[resolution]]
/// action = "accept-new"
/// url = "https://example.org/croup"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    /// Append [`DiscrepancyReport::delete_missing`] for every report.
    #[serde(default)]
    pub delete_missing: bool,
    #[serde(default, rename = "resolution")]
    pub resolutions: Vec<Resolution>,
}

impl ResolutionPlan {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DocAssemblerError::validation(format!("invalid resolution plan: {e}")))
    }

    /// The plan's resolutions followed by any batch deletions it asks for.
    pub fn expand(&self, reports: &[DiscrepancyReport]) -> Vec<Resolution> {
        let mut all = self.resolutions.clone();
        if self.delete_missing {
            all.extend(reports.iter().flat_map(DiscrepancyReport::delete_missing));
        }
        all
    }
}

/// How one resolution went.
#[derive(Debug)]
pub struct ResolutionOutcome {
    pub resolution: Resolution,
    pub result: Result<()>,
}

impl ResolutionOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Apply resolutions in order.
///
/// Each resolution succeeds or fails on its own; a failure leaves the catalog
/// as the previous resolutions left it.
pub fn apply_resolutions(catalog: &mut Catalog, resolutions: &[Resolution]) -> Vec<ResolutionOutcome> {
    resolutions
        .iter()
        .map(|resolution| {
            let result = apply(catalog, resolution);
            match &result {
                Ok(()) => tracing::info!(?resolution, "resolution applied"),
                Err(e) => tracing::warn!(?resolution, error = %e, "resolution failed"),
            }
            ResolutionOutcome {
                resolution: resolution.clone(),
                result,
            }
        })
        .collect()
}

fn apply(catalog: &mut Catalog, resolution: &Resolution) -> Result<()> {
    match resolution {
        Resolution::Merge { existing, new } => {
            let existing = lookup(catalog, existing)?;
            let new = lookup(catalog, new)?;
            catalog.merge(existing, new)
        }
        Resolution::AcceptNew { url } => catalog.accept_new(lookup(catalog, url)?),
        Resolution::Ignore { url } => catalog.ignore(lookup(catalog, url)?),
        Resolution::Delete { url } => catalog.delete(lookup(catalog, url)?),
    }
}

fn lookup(catalog: &Catalog, url: &Url) -> Result<EntryId> {
    catalog
        .find(url)
        .ok_or_else(|| DocAssemblerError::catalog(format!("no catalog entry for {url}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docassembler_shared::{CatalogRow, IndexCandidate};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn stored(doc_id: i64, link: &str) -> CatalogRow {
        CatalogRow {
            file_name: format!("doc-{doc_id}"),
            doc_id,
            lang_doc_id: doc_id,
            language_id: 1,
            title: format!("Stored {doc_id}"),
            url: link.into(),
            enabled: true,
            provider: "KHI".into(),
            bundle: "Fact sheets".into(),
            guid: EntryId::new(),
            last_review: None,
            manual_intervention: false,
            cache_date: None,
            content_update_date: None,
        }
    }

    fn discover(catalog: &mut Catalog, link: &str, title: &str) -> EntryId {
        catalog
            .observe(
                "KHI",
                &IndexCandidate {
                    url: url(link),
                    title: title.into(),
                    synonym: None,
                    postfix: None,
                    bundle: "Fact sheets".into(),
                    rule_index: 0,
                },
            )
            .id()
    }

    /// One matched, one renamed and one vanished stored entry, plus two discoveries.
    fn crawled() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert_loaded(stored(1, "https://example.org/kept")).unwrap();
        catalog.insert_loaded(stored(2, "https://example.org/old-asthma")).unwrap();
        catalog.insert_loaded(stored(3, "https://example.org/vanished")).unwrap();

        discover(&mut catalog, "https://example.org/kept", "Kept");
        discover(&mut catalog, "https://example.org/asthma", "Asthma");
        discover(&mut catalog, "https://example.org/croup", "Croup");
        catalog
    }

    #[test]
    fn report_lists_new_and_unmatched() {
        let catalog = crawled();
        let report = DiscrepancyReport::build(&catalog, "KHI", "Fact sheets", true);

        let new: Vec<_> = report.unmatched_new.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(new, vec!["Asthma", "Croup"]);
        let existing: Vec<_> = report.unmatched_existing.iter().map(|i| i.url.path()).collect();
        assert_eq!(existing, vec!["/old-asthma", "/vanished"]);
        assert_eq!(report.missing, report.unmatched_existing);
        assert!(!report.is_empty());
    }

    #[test]
    fn incomplete_crawl_reports_no_missing_batch() {
        let catalog = crawled();
        let report = DiscrepancyReport::build(&catalog, "KHI", "Fact sheets", false);
        assert!(report.missing.is_empty());
        assert!(report.delete_missing().is_empty());
        assert_eq!(report.unmatched_existing.len(), 2);
    }

    #[test]
    fn other_bundles_are_not_reported() {
        let catalog = crawled();
        let report = DiscrepancyReport::build(&catalog, "KHI", "Leaflets", true);
        assert!(report.is_empty());
    }

    #[test]
    fn resolutions_apply_in_order_and_independently() {
        let mut catalog = crawled();
        let resolutions = vec![
            Resolution::Merge {
                existing: url("https://example.org/old-asthma"),
                new: url("https://example.org/asthma"),
            },
            Resolution::AcceptNew {
                url: url("https://example.org/croup"),
            },
            Resolution::Ignore {
                url: url("https://example.org/not-there"),
            },
            Resolution::Delete {
                url: url("https://example.org/vanished"),
            },
        ];

        let outcomes = apply_resolutions(&mut catalog, &resolutions);
        let ok: Vec<_> = outcomes.iter().map(ResolutionOutcome::is_ok).collect();
        assert_eq!(ok, vec![true, true, false, true]);

        let report = DiscrepancyReport::build(&catalog, "KHI", "Fact sheets", true);
        assert!(report.is_empty());
        let merged = catalog.find(&url("https://example.org/asthma")).unwrap();
        assert_eq!(catalog.get(merged).unwrap().doc_id, 2);
        assert_eq!(catalog.take_retired().len(), 1);
    }

    #[test]
    fn delete_missing_covers_the_batch() {
        let mut catalog = crawled();
        let report = DiscrepancyReport::build(&catalog, "KHI", "Fact sheets", true);
        let outcomes = apply_resolutions(&mut catalog, &report.delete_missing());
        assert!(outcomes.iter().all(ResolutionOutcome::is_ok));
        assert_eq!(catalog.retired().len(), 2);
    }

    #[test]
    fn plan_parses_from_toml_and_expands() {
        let plan = ResolutionPlan::from_toml_str(
            r#"
            delete_missing = true

            [[resolution]]
            action = "merge"
            existing = "https://example.org/old-asthma"
            new = "https://example.org/asthma"

            [[resolution]]
            action = "accept-new"
            url = "https://example.org/croup"
            "#,
        )
        .unwrap();
        assert_eq!(plan.resolutions.len(), 2);

        // Merging first takes old-asthma out of the missing batch.
        let mut catalog = crawled();
        let first = apply_resolutions(&mut catalog, &plan.resolutions);
        assert!(first.iter().all(ResolutionOutcome::is_ok));
        let report = DiscrepancyReport::build(&catalog, "KHI", "Fact sheets", true);
        let all = plan.expand(std::slice::from_ref(&report));
        assert_eq!(all.len(), 3);
        assert_eq!(
            all[2],
            Resolution::Delete {
                url: url("https://example.org/vanished")
            }
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = ResolutionPlan::from_toml_str(
            r#"
            [[resolution]]
            action = "rename"
            url = "https://example.org/a"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DocAssemblerError::Validation { .. }));
    }
}
