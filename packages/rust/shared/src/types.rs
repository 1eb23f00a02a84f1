//! Core domain types shared by the extraction, catalog and storage crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EntryId
// ---------------------------------------------------------------------------

/// Stable GUID identity of a catalog entry; survives URL drift and renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Generate a new identity for a freshly discovered document.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Canonical URL key
// ---------------------------------------------------------------------------

/// Dictionary key for a document URL: scheme prefix stripped, lower-cased.
///
/// `http://Example.org/A` and `https://example.org/a` share a key.
pub fn url_key(url: &Url) -> String {
    let s = url.as_str();
    let rest = s.split_once("://").map_or(s, |(_, rest)| rest);
    rest.to_lowercase()
}

// ---------------------------------------------------------------------------
// LoadStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadStatus {
    /// Loaded from the persisted store, not yet seen in a crawl.
    DatabaseEntry,
    /// First discovered in a web index during this run.
    NewFromWebIndex,
    /// Persisted entry re-observed in the web index.
    DatabaseAndIndexMatched,
    /// Admitted to the fetch schedule.
    Waiting,
    Retrieving,
    Downloaded,
    /// Transport failure other than "not found"; terminal.
    FetchError,
    Parsing,
    /// Extraction aborted; terminal.
    ParseError,
    LoadedSuccessfully,
    /// Manually ignored; terminal.
    DocumentIgnored,
    /// Upstream reported the document gone, or manually deleted; terminal.
    RemovedByContentProvider,
}

impl LoadStatus {
    /// Whether the state ends the entry's lifecycle for this run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FetchError
                | Self::ParseError
                | Self::LoadedSuccessfully
                | Self::DocumentIgnored
                | Self::RemovedByContentProvider
        )
    }

    /// Whether retrieval or extraction is currently under way.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Waiting | Self::Retrieving | Self::Downloaded | Self::Parsing
        )
    }

    /// Forward-only transition table. Merge and reset bypass it explicitly.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LoadStatus::*;

        match (self, next) {
            (DatabaseEntry, DatabaseAndIndexMatched) => true,
            (DatabaseEntry | NewFromWebIndex | DatabaseAndIndexMatched, Waiting) => true,
            (Waiting, Retrieving) => true,
            (Retrieving, Downloaded | FetchError | RemovedByContentProvider) => true,
            (Downloaded, Parsing) => true,
            (Parsing, LoadedSuccessfully | ParseError) => true,
            // Manual decisions apply to anything not currently being worked on.
            (from, DocumentIgnored | RemovedByContentProvider) => {
                !from.is_in_flight() && from != next
            }
            _ => false,
        }
    }

    /// Stable name, used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DatabaseEntry => "DatabaseEntry",
            Self::NewFromWebIndex => "NewFromWebIndex",
            Self::DatabaseAndIndexMatched => "DatabaseAndIndexMatched",
            Self::Waiting => "Waiting",
            Self::Retrieving => "Retrieving",
            Self::Downloaded => "Downloaded",
            Self::FetchError => "FetchError",
            Self::Parsing => "Parsing",
            Self::ParseError => "ParseError",
            Self::LoadedSuccessfully => "LoadedSuccessfully",
            Self::DocumentIgnored => "DocumentIgnored",
            Self::RemovedByContentProvider => "RemovedByContentProvider",
        }
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Extraction value types
// ---------------------------------------------------------------------------

/// A non-fatal extraction problem, annotated for manual review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssue {
    /// Cursor offset (bytes into the document text) where the issue arose.
    pub location: usize,
    pub description: String,
}

impl ParseIssue {
    pub fn new(location: usize, description: impl Into<String>) -> Self {
        Self {
            location,
            description: description.into(),
        }
    }
}

/// Formatting applied by a [`FormattingSpan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Bold,
    Italic,
    Underline,
    Subscript,
    Superscript,
    Highlight,
}

/// Half-open `[start, end)` byte range over a document's text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattingSpan {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl FormattingSpan {
    pub fn new(start: usize, end: usize, kind: SpanKind) -> Self {
        debug_assert!(start <= end, "span start {start} after end {end}");
        Self { start, end, kind }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

// ---------------------------------------------------------------------------
// IndexCandidate
// ---------------------------------------------------------------------------

/// A document reference discovered on an index page, not yet reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCandidate {
    /// Absolute document URL.
    pub url: Url,
    /// Title after synonym splitting, before the bundle postfix.
    pub title: String,
    /// Synonym split out of the raw link text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonym: Option<String>,
    /// Bundle postfix appended to the display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postfix: Option<String>,
    /// Bundle the candidate was found in.
    pub bundle: String,
    /// Position of the matching document rule within the bundle.
    pub rule_index: usize,
}

impl IndexCandidate {
    /// Title with the bundle postfix applied.
    pub fn display_title(&self) -> String {
        match self.postfix.as_deref() {
            Some(postfix) if !postfix.is_empty() => format!("{} - {postfix}", self.title),
            _ => self.title.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted rows
// ---------------------------------------------------------------------------

/// One persisted catalog row, as exchanged with the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub file_name: String,
    pub doc_id: i64,
    pub lang_doc_id: i64,
    pub language_id: i64,
    pub title: String,
    pub url: String,
    pub enabled: bool,
    pub provider: String,
    pub bundle: String,
    pub guid: EntryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review: Option<DateTime<Utc>>,
    pub manual_intervention: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_update_date: Option<DateTime<Utc>>,
}

/// A persisted synonym: owning document id, synonym id, text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymRow {
    pub doc_id: i64,
    pub synonym_id: i64,
    pub text: String,
}

/// A persisted parse issue for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseIssueRow {
    pub doc_id: i64,
    pub location: i64,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_roundtrip() {
        let id = EntryId::new();
        let parsed: EntryId = id.to_string().parse().expect("parse EntryId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn url_key_ignores_scheme_and_case() {
        let a = Url::parse("http://www.Example.org/KidsInfo/Asthma").unwrap();
        let b = Url::parse("https://www.example.org/kidsinfo/asthma").unwrap();
        assert_eq!(url_key(&a), url_key(&b));
        assert_eq!(url_key(&a), "www.example.org/kidsinfo/asthma");
    }

    #[test]
    fn url_key_keeps_distinct_documents_apart() {
        let a = Url::parse("https://example.org/a?id=1").unwrap();
        let b = Url::parse("https://example.org/a?id=2").unwrap();
        assert_ne!(url_key(&a), url_key(&b));
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        use LoadStatus::*;
        assert!(DatabaseEntry.can_transition_to(DatabaseAndIndexMatched));
        assert!(Waiting.can_transition_to(Retrieving));
        assert!(Retrieving.can_transition_to(RemovedByContentProvider));
        assert!(Parsing.can_transition_to(ParseError));

        assert!(!DatabaseAndIndexMatched.can_transition_to(DatabaseEntry));
        assert!(!LoadedSuccessfully.can_transition_to(Waiting));
        assert!(!NewFromWebIndex.can_transition_to(DatabaseAndIndexMatched));
        assert!(!Parsing.can_transition_to(DocumentIgnored));
        assert!(!FetchError.can_transition_to(Retrieving));
    }

    #[test]
    fn manual_decisions_allowed_when_idle() {
        use LoadStatus::*;
        assert!(NewFromWebIndex.can_transition_to(DocumentIgnored));
        assert!(DatabaseEntry.can_transition_to(RemovedByContentProvider));
        assert!(LoadedSuccessfully.can_transition_to(DocumentIgnored));
        assert!(!DocumentIgnored.can_transition_to(DocumentIgnored));
    }

    #[test]
    fn display_title_applies_postfix() {
        let mut candidate = IndexCandidate {
            url: Url::parse("https://example.org/asthma").unwrap(),
            title: "Asthma".into(),
            synonym: Some("Wheezing".into()),
            postfix: Some("KHI".into()),
            bundle: "Fact sheets".into(),
            rule_index: 0,
        };
        assert_eq!(candidate.display_title(), "Asthma - KHI");

        candidate.postfix = None;
        assert_eq!(candidate.display_title(), "Asthma");
    }
}
