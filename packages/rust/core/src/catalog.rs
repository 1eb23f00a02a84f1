//! The document catalog: identity, canonical-URL index and lifecycle.
//!
//! Every document known to a run lives here exactly once, keyed by a stable
//! [`EntryId`]. A second index maps the canonical URL key (see [`url_key`])
//! to the entry, so re-discovery over `http`/`https` or with different letter
//! case lands on the same entry.
//!
//! The catalog is an explicit value passed to whoever needs it; concurrent
//! tasks share it behind a `tokio::sync::Mutex`. Id counters live on it and
//! are seeded from the largest ids loaded from the store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use url::Url;

use docassembler_shared::{
    CatalogRow, DocAssemblerError, EntryId, IndexCandidate, LoadStatus, ParseIssue,
    ParseIssueRow, Result, SynonymRow, url_key,
};

/// Language assigned to newly discovered documents.
pub const DEFAULT_LANGUAGE_ID: i64 = 1;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Where an entry first came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryOrigin {
    /// Loaded from the persisted store.
    Store,
    /// First seen in a web index during this run.
    WebIndex,
}

/// One document's identity-bearing record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub guid: EntryId,
    pub doc_id: i64,
    pub lang_doc_id: i64,
    pub language_id: i64,
    pub file_name: String,
    pub url: Url,
    pub title: String,
    pub enabled: bool,
    pub provider: String,
    pub bundle: String,
    /// Document rule that matched this entry's link in the current run.
    pub rule_index: Option<usize>,
    /// Synonym id to text; append-only, unique by text.
    pub synonyms: BTreeMap<i64, String>,
    pub status: LoadStatus,
    pub origin: EntryOrigin,
    /// A web discovery waiting for a manual decision; never persisted.
    pub pending_review: bool,
    pub parse_issues: Vec<ParseIssue>,
    pub last_review: Option<DateTime<Utc>>,
    pub manual_intervention: bool,
    pub cache_date: Option<DateTime<Utc>>,
    pub content_update_date: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    /// Canonical key of the entry's current URL.
    pub fn key(&self) -> String {
        url_key(&self.url)
    }

    pub fn has_synonym(&self, text: &str) -> bool {
        self.synonyms.values().any(|s| s == text)
    }

    /// Persisted form of the entry.
    pub fn to_row(&self) -> CatalogRow {
        CatalogRow {
            file_name: self.file_name.clone(),
            doc_id: self.doc_id,
            lang_doc_id: self.lang_doc_id,
            language_id: self.language_id,
            title: self.title.clone(),
            url: self.url.to_string(),
            enabled: self.enabled,
            provider: self.provider.clone(),
            bundle: self.bundle.clone(),
            guid: self.guid,
            last_review: self.last_review,
            manual_intervention: self.manual_intervention,
            cache_date: self.cache_date,
            content_update_date: self.content_update_date,
        }
    }

    pub fn synonym_rows(&self) -> Vec<SynonymRow> {
        self.synonyms
            .iter()
            .map(|(&synonym_id, text)| SynonymRow {
                doc_id: self.doc_id,
                synonym_id,
                text: text.clone(),
            })
            .collect()
    }

    pub fn parse_issue_rows(&self) -> Vec<ParseIssueRow> {
        self.parse_issues
            .iter()
            .map(|issue| ParseIssueRow {
                doc_id: self.doc_id,
                location: issue.location as i64,
                description: issue.description.clone(),
            })
            .collect()
    }
}

/// What observing an index candidate did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No entry had this URL; a `NewFromWebIndex` entry was created.
    New(EntryId),
    /// A persisted entry was seen for the first time this run.
    Matched(EntryId),
    /// The entry was already observed this run (or is past observation).
    Duplicate(EntryId),
}

impl Observation {
    pub fn id(self) -> EntryId {
        match self {
            Self::New(id) | Self::Matched(id) | Self::Duplicate(id) => id,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The active set of catalog entries for one session.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<EntryId, CatalogEntry>,
    order: Vec<EntryId>,
    by_key: HashMap<String, EntryId>,
    /// Entries dropped from the active catalog that the store still holds.
    retired: Vec<CatalogEntry>,
    next_doc_id: i64,
    next_lang_doc_id: i64,
    next_synonym_id: i64,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            next_doc_id: 1,
            next_lang_doc_id: 1,
            next_synonym_id: 1,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: EntryId) -> Option<&CatalogEntry> {
        self.entries.get(&id)
    }

    /// Entry id currently indexed under `url`'s canonical key.
    pub fn find(&self, url: &Url) -> Option<EntryId> {
        self.by_key.get(&url_key(url)).copied()
    }

    /// Active entries, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    /// Entries removed from the active catalog but not yet from the store.
    pub fn retired(&self) -> &[CatalogEntry] {
        &self.retired
    }

    pub fn take_retired(&mut self) -> Vec<CatalogEntry> {
        std::mem::take(&mut self.retired)
    }

    fn entry_mut(&mut self, id: EntryId) -> Result<&mut CatalogEntry> {
        self.entries
            .get_mut(&id)
            .ok_or_else(|| DocAssemblerError::catalog(format!("no catalog entry {id}")))
    }

    // -----------------------------------------------------------------------
    // Id generation
    // -----------------------------------------------------------------------

    pub fn allocate_doc_id(&mut self) -> i64 {
        let id = self.next_doc_id;
        self.next_doc_id += 1;
        id
    }

    pub fn allocate_lang_doc_id(&mut self) -> i64 {
        let id = self.next_lang_doc_id;
        self.next_lang_doc_id += 1;
        id
    }

    pub fn allocate_synonym_id(&mut self) -> i64 {
        let id = self.next_synonym_id;
        self.next_synonym_id += 1;
        id
    }

    /// Keep the ids of a stored row from being handed out again, whether or
    /// not the row joins the catalog.
    pub fn reserve_stored_ids(&mut self, doc_id: i64, lang_doc_id: i64) {
        self.next_doc_id = self.next_doc_id.max(doc_id + 1);
        self.next_lang_doc_id = self.next_lang_doc_id.max(lang_doc_id + 1);
    }

    pub fn reserve_synonym_id(&mut self, synonym_id: i64) {
        self.next_synonym_id = self.next_synonym_id.max(synonym_id + 1);
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Add a persisted row as a `DatabaseEntry`.
    ///
    /// Fails when the row's URL is invalid or its canonical key is already
    /// taken by another entry.
    pub fn insert_loaded(&mut self, row: CatalogRow) -> Result<EntryId> {
        let url = Url::parse(&row.url).map_err(|e| {
            DocAssemblerError::catalog(format!("document {} has invalid url `{}`: {e}", row.doc_id, row.url))
        })?;
        let key = url_key(&url);
        if let Some(existing) = self.by_key.get(&key) {
            return Err(DocAssemblerError::catalog(format!(
                "document {} duplicates the url of entry {existing}: {url}",
                row.doc_id
            )));
        }
        if self.entries.contains_key(&row.guid) {
            return Err(DocAssemblerError::catalog(format!(
                "document {} reuses guid {}",
                row.doc_id, row.guid
            )));
        }

        self.reserve_stored_ids(row.doc_id, row.lang_doc_id);

        let entry = CatalogEntry {
            guid: row.guid,
            doc_id: row.doc_id,
            lang_doc_id: row.lang_doc_id,
            language_id: row.language_id,
            file_name: row.file_name,
            url,
            title: row.title,
            enabled: row.enabled,
            provider: row.provider,
            bundle: row.bundle,
            rule_index: None,
            synonyms: BTreeMap::new(),
            status: LoadStatus::DatabaseEntry,
            origin: EntryOrigin::Store,
            pending_review: false,
            parse_issues: Vec::new(),
            last_review: row.last_review,
            manual_intervention: row.manual_intervention,
            cache_date: row.cache_date,
            content_update_date: row.content_update_date,
        };
        Ok(self.insert(key, entry))
    }

    /// Attach a persisted synonym to the entry with `row.doc_id`.
    pub fn insert_loaded_synonym(&mut self, row: SynonymRow) -> Result<()> {
        self.reserve_synonym_id(row.synonym_id);
        let entry = self.entry_by_doc_id(row.doc_id)?;
        if !entry.has_synonym(&row.text) {
            entry.synonyms.insert(row.synonym_id, row.text);
        }
        Ok(())
    }

    /// Attach a persisted parse issue to the entry with `row.doc_id`.
    pub fn insert_loaded_issue(&mut self, row: ParseIssueRow) -> Result<()> {
        let entry = self.entry_by_doc_id(row.doc_id)?;
        entry
            .parse_issues
            .push(ParseIssue::new(row.location.max(0) as usize, row.description));
        Ok(())
    }

    fn entry_by_doc_id(&mut self, doc_id: i64) -> Result<&mut CatalogEntry> {
        self.entries
            .values_mut()
            .find(|e| e.doc_id == doc_id)
            .ok_or_else(|| DocAssemblerError::catalog(format!("no catalog entry with document id {doc_id}")))
    }

    fn insert(&mut self, key: String, entry: CatalogEntry) -> EntryId {
        let id = entry.guid;
        self.by_key.insert(key, id);
        self.order.push(id);
        self.entries.insert(id, entry);
        id
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Reconcile one index candidate against the catalog.
    ///
    /// Candidates are never deduplicated before they reach here; repeats
    /// come back as [`Observation::Duplicate`] and only contribute synonyms.
    pub fn observe(&mut self, provider: &str, candidate: &IndexCandidate) -> Observation {
        let key = url_key(&candidate.url);

        let Some(&id) = self.by_key.get(&key) else {
            let id = self.create_discovered(provider, candidate, key);
            debug!(%id, url = %candidate.url, "new document in web index");
            return Observation::New(id);
        };

        let synonym = candidate.synonym.as_deref();
        let synonym_id = match synonym {
            Some(text) if self.entries.get(&id).is_some_and(|e| !e.has_synonym(text)) => {
                Some(self.allocate_synonym_id())
            }
            _ => None,
        };

        let Some(entry) = self.entries.get_mut(&id) else {
            return Observation::Duplicate(id);
        };
        if let (Some(synonym_id), Some(text)) = (synonym_id, synonym) {
            entry.synonyms.insert(synonym_id, text.to_string());
        }

        if entry.status != LoadStatus::DatabaseEntry {
            return Observation::Duplicate(id);
        }

        entry.status = LoadStatus::DatabaseAndIndexMatched;
        entry.rule_index = Some(candidate.rule_index);
        if entry.url != candidate.url {
            debug!(%id, from = %entry.url, to = %candidate.url, "url drift on matched entry");
            entry.url = candidate.url.clone();
        }
        Observation::Matched(id)
    }

    fn create_discovered(&mut self, provider: &str, candidate: &IndexCandidate, key: String) -> EntryId {
        let doc_id = self.allocate_doc_id();
        let lang_doc_id = self.allocate_lang_doc_id();
        let title = candidate.display_title();

        let mut synonyms = BTreeMap::new();
        if let Some(text) = candidate.synonym.as_deref() {
            synonyms.insert(self.allocate_synonym_id(), text.to_string());
        }

        let entry = CatalogEntry {
            guid: EntryId::new(),
            doc_id,
            lang_doc_id,
            language_id: DEFAULT_LANGUAGE_ID,
            file_name: file_name_for(&title, doc_id),
            url: candidate.url.clone(),
            title,
            enabled: false,
            provider: provider.to_string(),
            bundle: candidate.bundle.clone(),
            rule_index: Some(candidate.rule_index),
            synonyms,
            status: LoadStatus::NewFromWebIndex,
            origin: EntryOrigin::WebIndex,
            pending_review: true,
            parse_issues: Vec::new(),
            last_review: None,
            manual_intervention: false,
            cache_date: None,
            content_update_date: None,
        };
        self.insert(key, entry)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Move an entry along the lifecycle; illegal moves are catalog errors.
    pub fn transition(&mut self, id: EntryId, next: LoadStatus) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if !entry.status.can_transition_to(next) {
            return Err(DocAssemblerError::catalog(format!(
                "entry {id} cannot move from {} to {next}",
                entry.status
            )));
        }
        debug!(%id, from = %entry.status, to = %next, "status change");
        entry.status = next;
        Ok(())
    }

    /// Add a synonym unless the entry already has that text.
    pub fn add_synonym(&mut self, id: EntryId, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() || self.entry_mut(id)?.has_synonym(text) {
            return Ok(false);
        }
        let synonym_id = self.allocate_synonym_id();
        self.entry_mut(id)?.synonyms.insert(synonym_id, text.to_string());
        Ok(true)
    }

    /// Record a retrieval: the cache timestamp and, for network copies, a
    /// content update.
    pub fn record_retrieval(
        &mut self,
        id: EntryId,
        cached_at: DateTime<Utc>,
        from_network: bool,
    ) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.cache_date = Some(cached_at);
        if from_network {
            entry.content_update_date = Some(cached_at);
        }
        Ok(())
    }

    /// Replace an entry's outstanding parse issues.
    pub fn set_parse_issues(&mut self, id: EntryId, issues: Vec<ParseIssue>) -> Result<()> {
        self.entry_mut(id)?.parse_issues = issues;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Manual reconciliation
    // -----------------------------------------------------------------------

    /// Fold `superseded` into `existing`.
    ///
    /// `existing` keeps its identity and ids and takes the superseded entry's
    /// URL, title and any synonyms it lacks. The superseded entry leaves the
    /// active catalog and the key index.
    pub fn merge(&mut self, existing: EntryId, superseded: EntryId) -> Result<()> {
        if existing == superseded {
            return Err(DocAssemblerError::catalog(format!("cannot merge entry {existing} into itself")));
        }
        for id in [existing, superseded] {
            let entry = self
                .entries
                .get(&id)
                .ok_or_else(|| DocAssemblerError::catalog(format!("no catalog entry {id}")))?;
            if entry.status.is_in_flight() {
                return Err(DocAssemblerError::catalog(format!(
                    "entry {id} is {} and cannot be merged",
                    entry.status
                )));
            }
        }

        let gone = self.remove(superseded)?;
        let old_key = self.entry_mut(existing)?.key();
        self.by_key.remove(&old_key);

        let unseen: Vec<String> = {
            let target = self.entry_mut(existing)?;
            gone.synonyms
                .values()
                .filter(|text| !target.has_synonym(text))
                .cloned()
                .collect()
        };
        let ids: Vec<i64> = unseen.iter().map(|_| self.allocate_synonym_id()).collect();

        let target = self.entry_mut(existing)?;
        target.url = gone.url.clone();
        target.title = gone.title.clone();
        target.rule_index = gone.rule_index.or(target.rule_index);
        target.synonyms.extend(ids.into_iter().zip(unseen));
        target.status = LoadStatus::DatabaseAndIndexMatched;
        target.pending_review = false;
        target.manual_intervention = true;
        let new_key = target.key();
        self.by_key.insert(new_key, existing);

        debug!(%existing, %superseded, url = %gone.url, "merged entries");
        if gone.origin == EntryOrigin::Store {
            self.retired.push(gone);
        }
        Ok(())
    }

    /// Promote a pending web discovery to an enabled catalog member.
    pub fn accept_new(&mut self, id: EntryId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if !entry.pending_review {
            return Err(DocAssemblerError::catalog(format!(
                "entry {id} is not a pending discovery"
            )));
        }
        entry.pending_review = false;
        entry.enabled = true;
        Ok(())
    }

    /// Mark an entry `DocumentIgnored` and disable it.
    pub fn ignore(&mut self, id: EntryId) -> Result<()> {
        self.transition(id, LoadStatus::DocumentIgnored)?;
        let entry = self.entry_mut(id)?;
        entry.enabled = false;
        entry.pending_review = false;
        entry.manual_intervention = true;
        Ok(())
    }

    /// Mark an entry removed, disable it and schedule it for store removal.
    pub fn delete(&mut self, id: EntryId) -> Result<()> {
        self.transition(id, LoadStatus::RemovedByContentProvider)?;
        let mut entry = self.remove(id)?;
        entry.enabled = false;
        entry.pending_review = false;
        if entry.origin == EntryOrigin::Store {
            self.retired.push(entry);
        }
        Ok(())
    }

    fn remove(&mut self, id: EntryId) -> Result<CatalogEntry> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or_else(|| DocAssemblerError::catalog(format!("no catalog entry {id}")))?;
        self.order.retain(|e| *e != id);
        let key = entry.key();
        if self.by_key.get(&key) == Some(&id) {
            self.by_key.remove(&key);
        }
        Ok(entry)
    }
}

/// Store file name for a new document: the title reduced to a safe slug,
/// suffixed with the doc id so equal titles never share a file.
pub fn file_name_for(title: &str, doc_id: i64) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        format!("document-{doc_id}")
    } else {
        format!("{slug}-{doc_id}")
    }
}
