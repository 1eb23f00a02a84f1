//! libSQL storage layer for the document catalog.
//!
//! The [`Storage`] struct wraps a local libSQL database holding catalog rows,
//! their synonyms and their outstanding parse issues.
//!
//! **Access rules:**
//! - `run` and `resolve`: read-write via [`Storage::open`]
//! - `list`: read-only via [`Storage::open_readonly`]
//!
//! Every write is a single statement or a short per-document batch; nothing
//! spans documents, so one failing entry never rolls back another.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};

use docassembler_shared::{
    CatalogRow, DocAssemblerError, EntryId, ParseIssueRow, Result, SynonymRow,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocAssemblerError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(DocAssemblerError::Storage(format!(
                "no catalog database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DocAssemblerError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DocAssemblerError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document rows
    // -----------------------------------------------------------------------

    /// All catalog rows, ordered by document id.
    pub async fn load_documents(&self) -> Result<Vec<CatalogRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT file_name, doc_id, lang_doc_id, language_id, title, url, enabled,
                        provider, bundle, guid, last_review, manual_intervention,
                        cache_date, content_update_date
                 FROM documents ORDER BY doc_id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_catalog_row(&row)?);
        }
        Ok(results)
    }

    /// Insert or update a catalog row, keyed by document id.
    ///
    /// A stored row with the same document id but another GUID belongs to a
    /// different document and is never overwritten.
    pub async fn upsert_document(&self, doc: &CatalogRow) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "INSERT INTO documents (file_name, doc_id, lang_doc_id, language_id, title, url,
                                        enabled, provider, bundle, guid, last_review,
                                        manual_intervention, cache_date, content_update_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(doc_id) DO UPDATE SET
                   file_name = excluded.file_name,
                   lang_doc_id = excluded.lang_doc_id,
                   language_id = excluded.language_id,
                   title = excluded.title,
                   url = excluded.url,
                   enabled = excluded.enabled,
                   provider = excluded.provider,
                   bundle = excluded.bundle,
                   guid = excluded.guid,
                   last_review = excluded.last_review,
                   manual_intervention = excluded.manual_intervention,
                   cache_date = excluded.cache_date,
                   content_update_date = excluded.content_update_date
                 WHERE documents.guid = excluded.guid",
                params![
                    doc.file_name.as_str(),
                    doc.doc_id,
                    doc.lang_doc_id,
                    doc.language_id,
                    doc.title.as_str(),
                    doc.url.as_str(),
                    i64::from(doc.enabled),
                    doc.provider.as_str(),
                    doc.bundle.as_str(),
                    doc.guid.to_string(),
                    doc.last_review.map(|d| d.to_rfc3339()),
                    i64::from(doc.manual_intervention),
                    doc.cache_date.map(|d| d.to_rfc3339()),
                    doc.content_update_date.map(|d| d.to_rfc3339()),
                ],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(DocAssemblerError::Storage(format!(
                "document id {} belongs to another document",
                doc.doc_id
            )));
        }
        Ok(())
    }

    /// Remove a document and everything hanging off it.
    pub async fn delete_document(&self, doc_id: i64) -> Result<()> {
        self.check_writable()?;
        for sql in [
            "DELETE FROM synonyms WHERE doc_id = ?1",
            "DELETE FROM parse_issues WHERE doc_id = ?1",
            "DELETE FROM documents WHERE doc_id = ?1",
        ] {
            self.conn
                .execute(sql, params![doc_id])
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Synonym rows
    // -----------------------------------------------------------------------

    /// All synonym rows, ordered by synonym id.
    pub async fn load_synonyms(&self) -> Result<Vec<SynonymRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc_id, synonym_id, text FROM synonyms ORDER BY synonym_id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(SynonymRow {
                doc_id: row.get(0).map_err(db_err)?,
                synonym_id: row.get(1).map_err(db_err)?,
                text: row.get(2).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    /// Replace the synonym set of one document.
    ///
    /// Merges move synonyms between documents, so the set is rewritten rather
    /// than appended. A synonym id still held by another document is an error;
    /// delete superseded documents first.
    pub async fn replace_synonyms(&self, doc_id: i64, synonyms: &[SynonymRow]) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM synonyms WHERE doc_id = ?1", params![doc_id])
            .await
            .map_err(db_err)?;

        for synonym in synonyms {
            let inserted = self
                .conn
                .execute(
                    "INSERT INTO synonyms (synonym_id, doc_id, text) VALUES (?1, ?2, ?3)
                     ON CONFLICT(synonym_id) DO NOTHING",
                    params![synonym.synonym_id, doc_id, synonym.text.as_str()],
                )
                .await
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(DocAssemblerError::Storage(format!(
                    "synonym id {} belongs to another document",
                    synonym.synonym_id
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Parse issue rows
    // -----------------------------------------------------------------------

    /// All parse-issue rows, grouped by document.
    pub async fn load_parse_issues(&self) -> Result<Vec<ParseIssueRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc_id, location, description FROM parse_issues ORDER BY doc_id, id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(ParseIssueRow {
                doc_id: row.get(0).map_err(db_err)?,
                location: row.get(1).map_err(db_err)?,
                description: row.get(2).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    /// Replace the parse issues of one document.
    pub async fn replace_parse_issues(&self, doc_id: i64, issues: &[ParseIssueRow]) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM parse_issues WHERE doc_id = ?1", params![doc_id])
            .await
            .map_err(db_err)?;

        for issue in issues {
            self.conn
                .execute(
                    "INSERT INTO parse_issues (doc_id, location, description) VALUES (?1, ?2, ?3)",
                    params![doc_id, issue.location, issue.description.as_str()],
                )
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

fn db_err(e: libsql::Error) -> DocAssemblerError {
    DocAssemblerError::Storage(e.to_string())
}

fn parse_date(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .filter(|s| !s.is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DocAssemblerError::Storage(format!("invalid {column} `{s}`: {e}")))
        })
        .transpose()
}

/// Convert a database row to a [`CatalogRow`].
fn row_to_catalog_row(row: &libsql::Row) -> Result<CatalogRow> {
    let guid: String = row.get(9).map_err(db_err)?;
    Ok(CatalogRow {
        file_name: row.get(0).map_err(db_err)?,
        doc_id: row.get(1).map_err(db_err)?,
        lang_doc_id: row.get(2).map_err(db_err)?,
        language_id: row.get(3).map_err(db_err)?,
        title: row.get(4).map_err(db_err)?,
        url: row.get(5).map_err(db_err)?,
        enabled: row.get::<i64>(6).map_err(db_err)? != 0,
        provider: row.get(7).map_err(db_err)?,
        bundle: row.get(8).map_err(db_err)?,
        guid: guid
            .parse::<EntryId>()
            .map_err(|e| DocAssemblerError::Storage(format!("invalid guid `{guid}`: {e}")))?,
        last_review: parse_date("last_review", row.get::<String>(10).ok())?,
        manual_intervention: row.get::<i64>(11).map_err(db_err)? != 0,
        cache_date: parse_date("cache_date", row.get::<String>(12).ok())?,
        content_update_date: parse_date("content_update_date", row.get::<String>(13).ok())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("da_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn row(doc_id: i64, url: &str) -> CatalogRow {
        CatalogRow {
            file_name: format!("doc-{doc_id}"),
            doc_id,
            lang_doc_id: doc_id + 1000,
            language_id: 1,
            title: format!("Document {doc_id}"),
            url: url.into(),
            enabled: true,
            provider: "Kids Health Info".into(),
            bundle: "Fact sheets".into(),
            guid: EntryId::new(),
            last_review: None,
            manual_intervention: false,
            cache_date: Some(Utc::now()),
            content_update_date: None,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("da_test_{}.db", Uuid::now_v7()));
        let first = Storage::open(&tmp).await.expect("first open");
        drop(first);
        let second = Storage::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn document_upsert_and_load() {
        let storage = test_storage().await;
        let original = row(1, "https://example.org/asthma");
        storage.upsert_document(&original).await.expect("insert");

        let updated = CatalogRow {
            title: "Asthma - KHI".into(),
            enabled: false,
            manual_intervention: true,
            ..original.clone()
        };
        storage.upsert_document(&updated).await.expect("update");
        storage
            .upsert_document(&row(2, "https://example.org/croup"))
            .await
            .unwrap();

        let loaded = storage.load_documents().await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].title, "Asthma - KHI");
        assert!(!loaded[0].enabled);
        assert!(loaded[0].manual_intervention);
        assert_eq!(loaded[0].guid, original.guid);
        assert_eq!(loaded[0].last_review, None);
        assert_eq!(
            loaded[0].cache_date.map(|d| d.timestamp()),
            original.cache_date.map(|d| d.timestamp())
        );
    }

    #[tokio::test]
    async fn synonyms_are_replaced_per_document() {
        let storage = test_storage().await;
        storage.upsert_document(&row(1, "https://example.org/a")).await.unwrap();

        let syn = |id: i64, text: &str| SynonymRow {
            doc_id: 1,
            synonym_id: id,
            text: text.into(),
        };
        storage
            .replace_synonyms(1, &[syn(10, "Wheezing"), syn(11, "Reactive airway")])
            .await
            .unwrap();
        storage.replace_synonyms(1, &[syn(10, "Wheezing")]).await.unwrap();

        let loaded = storage.load_synonyms().await.unwrap();
        assert_eq!(loaded, vec![syn(10, "Wheezing")]);
    }

    #[tokio::test]
    async fn parse_issues_are_replaced_per_document() {
        let storage = test_storage().await;
        let issue = |doc_id: i64, location: i64| ParseIssueRow {
            doc_id,
            location,
            description: "Table found, manual review needed".into(),
        };

        storage.replace_parse_issues(1, &[issue(1, 5), issue(1, 9)]).await.unwrap();
        storage.replace_parse_issues(2, &[issue(2, 0)]).await.unwrap();
        assert_eq!(storage.load_parse_issues().await.unwrap().len(), 3);

        storage.replace_parse_issues(1, &[]).await.unwrap();
        assert_eq!(storage.load_parse_issues().await.unwrap(), vec![issue(2, 0)]);
    }

    #[tokio::test]
    async fn foreign_ids_are_not_overwritten() {
        let storage = test_storage().await;
        let owner = row(1, "https://example.org/asthma");
        storage.upsert_document(&owner).await.unwrap();
        storage
            .replace_synonyms(
                1,
                &[SynonymRow {
                    doc_id: 1,
                    synonym_id: 3,
                    text: "Wheezing".into(),
                }],
            )
            .await
            .unwrap();

        let intruder = row(1, "https://example.org/croup");
        assert!(storage.upsert_document(&intruder).await.is_err());
        let err = storage
            .replace_synonyms(
                2,
                &[SynonymRow {
                    doc_id: 2,
                    synonym_id: 3,
                    text: "Barking cough".into(),
                }],
            )
            .await;
        assert!(err.is_err());

        let docs = storage.load_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].guid, owner.guid);
        assert_eq!(docs[0].url, owner.url);
        let synonyms = storage.load_synonyms().await.unwrap();
        assert_eq!(synonyms.len(), 1);
        assert_eq!(synonyms[0].doc_id, 1);
    }

    #[tokio::test]
    async fn delete_removes_dependent_rows() {
        let storage = test_storage().await;
        storage.upsert_document(&row(1, "https://example.org/a")).await.unwrap();
        storage
            .replace_synonyms(
                1,
                &[SynonymRow {
                    doc_id: 1,
                    synonym_id: 1,
                    text: "A".into(),
                }],
            )
            .await
            .unwrap();

        storage.delete_document(1).await.unwrap();
        assert!(storage.load_documents().await.unwrap().is_empty());
        assert!(storage.load_synonyms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("da_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_document(&row(1, "https://example.org/a")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.load_documents().await.unwrap().len(), 1);
        let result = ro.upsert_document(&row(2, "https://example.org/b")).await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("da_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
