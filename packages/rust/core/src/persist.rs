//! Moving the catalog to and from the store.
//!
//! Loading is lenient: a row that cannot join the catalog is skipped and
//! reported. Saving is per entry: each entry's row, synonyms and parse issues
//! are written on their own, and one entry failing does not stop the rest.

use tracing::{info, instrument, warn};

use docassembler_shared::{EntryId, Result};
use docassembler_storage::Storage;

use crate::catalog::Catalog;

/// What [`load_catalog`] did.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: usize,
    /// `(doc_id, reason)` for rows left out of the catalog.
    pub skipped: Vec<(i64, String)>,
}

/// What [`save_catalog`] did.
#[derive(Debug, Default)]
pub struct SaveSummary {
    pub saved: usize,
    /// Pending discoveries, which are not persisted.
    pub pending: usize,
    pub removed: usize,
    pub failures: Vec<(EntryId, String)>,
}

/// Build a catalog from the store, keeping only rows of `providers`.
#[instrument(skip_all, fields(providers = providers.len()))]
pub async fn load_catalog(storage: &Storage, providers: &[&str]) -> Result<(Catalog, LoadSummary)> {
    let mut catalog = Catalog::new();
    let mut summary = LoadSummary::default();

    for row in storage.load_documents().await? {
        let doc_id = row.doc_id;
        // Rows left out still own their ids in the store.
        catalog.reserve_stored_ids(doc_id, row.lang_doc_id);
        if !providers.contains(&row.provider.as_str()) {
            summary
                .skipped
                .push((doc_id, format!("provider `{}` is not loaded", row.provider)));
            continue;
        }
        match catalog.insert_loaded(row) {
            Ok(_) => summary.loaded += 1,
            Err(e) => {
                warn!(doc_id, error = %e, "skipping stored document");
                summary.skipped.push((doc_id, e.to_string()));
            }
        }
    }

    let skipped: Vec<i64> = summary.skipped.iter().map(|(id, _)| *id).collect();

    for row in storage.load_synonyms().await? {
        catalog.reserve_synonym_id(row.synonym_id);
        if skipped.contains(&row.doc_id) {
            continue;
        }
        let doc_id = row.doc_id;
        if let Err(e) = catalog.insert_loaded_synonym(row) {
            warn!(doc_id, error = %e, "orphaned synonym row");
        }
    }

    for row in storage.load_parse_issues().await? {
        if skipped.contains(&row.doc_id) {
            continue;
        }
        let doc_id = row.doc_id;
        if let Err(e) = catalog.insert_loaded_issue(row) {
            warn!(doc_id, error = %e, "orphaned parse issue row");
        }
    }

    info!(
        loaded = summary.loaded,
        skipped = summary.skipped.len(),
        "catalog loaded"
    );
    Ok((catalog, summary))
}

/// Write the catalog back to the store.
///
/// Retired entries are deleted first, so synonyms they handed over on a merge
/// can be stored under their new owner. Each remaining entry's row, synonyms
/// and parse issues are then rewritten; pending discoveries are left out.
/// Rows of documents outside the catalog are never touched.
#[instrument(skip_all, fields(entries = catalog.len()))]
pub async fn save_catalog(storage: &Storage, catalog: &mut Catalog) -> Result<SaveSummary> {
    let mut summary = SaveSummary::default();

    for entry in catalog.take_retired() {
        match storage.delete_document(entry.doc_id).await {
            Ok(()) => summary.removed += 1,
            Err(e) => {
                warn!(guid = %entry.guid, doc_id = entry.doc_id, error = %e, "failed to remove entry");
                summary.failures.push((entry.guid, e.to_string()));
            }
        }
    }

    for entry in catalog.entries() {
        if entry.pending_review {
            summary.pending += 1;
            continue;
        }

        let saved = async {
            storage.upsert_document(&entry.to_row()).await?;
            storage
                .replace_synonyms(entry.doc_id, &entry.synonym_rows())
                .await?;
            storage
                .replace_parse_issues(entry.doc_id, &entry.parse_issue_rows())
                .await
        }
        .await;

        match saved {
            Ok(()) => summary.saved += 1,
            Err(e) => {
                warn!(guid = %entry.guid, doc_id = entry.doc_id, error = %e, "failed to save entry");
                summary.failures.push((entry.guid, e.to_string()));
            }
        }
    }

    info!(
        saved = summary.saved,
        removed = summary.removed,
        pending = summary.pending,
        failures = summary.failures.len(),
        "catalog saved"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docassembler_shared::{
        CatalogRow, IndexCandidate, LoadStatus, ParseIssue, ParseIssueRow, SynonymRow,
    };
    use url::Url;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("da_core_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn row(doc_id: i64, provider: &str, url: &str) -> CatalogRow {
        CatalogRow {
            file_name: format!("doc-{doc_id}"),
            doc_id,
            lang_doc_id: doc_id,
            language_id: 1,
            title: format!("Stored {doc_id}"),
            url: url.into(),
            enabled: true,
            provider: provider.into(),
            bundle: "Fact sheets".into(),
            guid: EntryId::new(),
            last_review: None,
            manual_intervention: false,
            cache_date: None,
            content_update_date: None,
        }
    }

    #[tokio::test]
    async fn load_skips_foreign_providers_and_duplicates() {
        let storage = test_storage().await;
        storage.upsert_document(&row(1, "KHI", "https://example.org/a")).await.unwrap();
        storage.upsert_document(&row(2, "Other", "https://other.org/b")).await.unwrap();
        storage.upsert_document(&row(3, "KHI", "http://EXAMPLE.org/a")).await.unwrap();
        storage
            .replace_synonyms(
                1,
                &[SynonymRow {
                    doc_id: 1,
                    synonym_id: 4,
                    text: "Alpha".into(),
                }],
            )
            .await
            .unwrap();

        let (mut catalog, summary) = load_catalog(&storage, &["KHI"]).await.unwrap();
        assert_eq!(summary.loaded, 1);
        let skipped: Vec<_> = summary.skipped.iter().map(|(id, _)| *id).collect();
        assert_eq!(skipped, vec![2, 3]);

        let entry = catalog.entries().next().unwrap();
        assert_eq!(entry.status, LoadStatus::DatabaseEntry);
        assert_eq!(entry.synonyms.get(&4).map(String::as_str), Some("Alpha"));
        assert_eq!(catalog.allocate_synonym_id(), 5);
        // Skipped rows keep their ids.
        assert_eq!(catalog.allocate_doc_id(), 4);
    }

    #[tokio::test]
    async fn saving_one_provider_leaves_other_providers_intact() {
        let storage = test_storage().await;
        storage.upsert_document(&row(1, "KHI", "https://example.org/a")).await.unwrap();
        let other = row(2, "Other", "https://other.org/b");
        storage.upsert_document(&other).await.unwrap();
        storage
            .replace_synonyms(
                2,
                &[SynonymRow {
                    doc_id: 2,
                    synonym_id: 1,
                    text: "OtherSyn".into(),
                }],
            )
            .await
            .unwrap();
        storage
            .replace_parse_issues(
                2,
                &[ParseIssueRow {
                    doc_id: 2,
                    location: 7,
                    description: "Unhandled tag: blink".into(),
                }],
            )
            .await
            .unwrap();

        let (mut catalog, _) = load_catalog(&storage, &["KHI"]).await.unwrap();
        let new = catalog
            .observe(
                "KHI",
                &IndexCandidate {
                    url: Url::parse("https://example.org/new").unwrap(),
                    title: "New".into(),
                    synonym: Some("NewSyn".into()),
                    postfix: None,
                    bundle: "Fact sheets".into(),
                    rule_index: 0,
                },
            )
            .id();
        catalog.accept_new(new).unwrap();

        let summary = save_catalog(&storage, &mut catalog).await.unwrap();
        assert_eq!(summary.saved, 2);
        assert!(summary.failures.is_empty());

        let docs = storage.load_documents().await.unwrap();
        assert_eq!(docs.len(), 3);
        let kept = docs.iter().find(|d| d.doc_id == 2).unwrap();
        assert_eq!(kept.provider, "Other");
        assert_eq!(kept.guid, other.guid);
        let added = docs.iter().find(|d| d.url == "https://example.org/new").unwrap();
        assert_eq!(added.doc_id, 3);

        let synonyms = storage.load_synonyms().await.unwrap();
        assert!(synonyms.contains(&SynonymRow {
            doc_id: 2,
            synonym_id: 1,
            text: "OtherSyn".into(),
        }));
        assert!(synonyms.contains(&SynonymRow {
            doc_id: 3,
            synonym_id: 2,
            text: "NewSyn".into(),
        }));

        let issues = storage.load_parse_issues().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].doc_id, 2);
    }

    #[tokio::test]
    async fn save_round_trips_and_skips_pending() {
        let storage = test_storage().await;
        storage.upsert_document(&row(1, "KHI", "https://example.org/a")).await.unwrap();
        storage.upsert_document(&row(2, "KHI", "https://example.org/gone")).await.unwrap();

        let (mut catalog, _) = load_catalog(&storage, &["KHI"]).await.unwrap();
        let a = catalog.find(&Url::parse("https://example.org/a").unwrap()).unwrap();
        let gone = catalog.find(&Url::parse("https://example.org/gone").unwrap()).unwrap();
        catalog.add_synonym(a, "Alpha").unwrap();
        catalog
            .set_parse_issues(a, vec![ParseIssue::new(3, "Unhandled tag: marquee")])
            .unwrap();
        catalog.delete(gone).unwrap();
        catalog.observe(
            "KHI",
            &IndexCandidate {
                url: Url::parse("https://example.org/new").unwrap(),
                title: "New".into(),
                synonym: None,
                postfix: None,
                bundle: "Fact sheets".into(),
                rule_index: 0,
            },
        );

        let summary = save_catalog(&storage, &mut catalog).await.unwrap();
        assert_eq!(summary.saved, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.removed, 1);
        assert!(summary.failures.is_empty());
        assert!(catalog.retired().is_empty());

        let docs = storage.load_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, 1);
        let synonyms = storage.load_synonyms().await.unwrap();
        assert_eq!(synonyms.len(), 1);
        assert_eq!(synonyms[0].text, "Alpha");
        let issues = storage.load_parse_issues().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location, 3);
    }
}
