//! SQL migration definitions for the DocAssembler catalog database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: documents, synonyms, parse_issues",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per catalog entry
CREATE TABLE IF NOT EXISTS documents (
    doc_id              INTEGER PRIMARY KEY,
    file_name           TEXT NOT NULL,
    lang_doc_id         INTEGER NOT NULL,
    language_id         INTEGER NOT NULL,
    title               TEXT NOT NULL,
    url                 TEXT NOT NULL,
    enabled             INTEGER NOT NULL DEFAULT 1,
    provider            TEXT NOT NULL,
    bundle              TEXT NOT NULL,
    guid                TEXT NOT NULL UNIQUE,
    last_review         TEXT,
    manual_intervention INTEGER NOT NULL DEFAULT 0,
    cache_date          TEXT,
    content_update_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_documents_provider ON documents(provider, bundle);

-- Alternative names, keyed by a catalog-wide synonym id
CREATE TABLE IF NOT EXISTS synonyms (
    synonym_id INTEGER PRIMARY KEY,
    doc_id     INTEGER NOT NULL,
    text       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_synonyms_doc ON synonyms(doc_id);

-- Non-fatal extraction problems awaiting manual review
CREATE TABLE IF NOT EXISTS parse_issues (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id      INTEGER NOT NULL,
    location    INTEGER NOT NULL,
    description TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_parse_issues_doc ON parse_issues(doc_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_ascend_from_one() {
        let migrations = all_migrations();
        for (i, migration) in migrations.iter().enumerate() {
            assert_eq!(migration.version as usize, i + 1);
            assert!(migration.sql.contains("schema_migrations"));
        }
    }
}
