//! Document sinks and the render stage.
//!
//! A [`DocumentSink`] receives each finished document as create, append and
//! finalize calls. The [`RenderStage`] decides when those calls happen: at
//! most `pool_size` documents render at once, creation and finalisation run
//! exclusively, and appends share the stage with other appends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use docassembler_crawler::RenderGate;
use docassembler_extract::RichText;
use docassembler_shared::{DocAssemblerError, EntryId, FormattingSpan, ParseIssue, Result};

// ---------------------------------------------------------------------------
// Sink interface
// ---------------------------------------------------------------------------

/// Identity and presentation settings of a document being rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMeta {
    pub guid: EntryId,
    pub file_name: String,
    /// Catalog title (index title plus bundle postfix).
    pub title: String,
    /// Title taken from the document itself, when a Title rule matched.
    pub document_title: Option<String>,
    pub url: Url,
    pub provider: String,
    pub bundle: String,
    pub synonyms: Vec<String>,
    pub font_family: String,
}

/// Write-only destination for rendered documents.
///
/// Calls for one document arrive as `create`, one or more `append`, then
/// `finalize`. Calls for different documents may interleave.
pub trait DocumentSink: Send + Sync {
    fn create(&self, meta: &DocumentMeta) -> Result<()>;
    fn append(&self, guid: EntryId, content: &RichText) -> Result<()>;
    /// Finish the document; returns where it was written, if anywhere.
    fn finalize(&self, guid: EntryId) -> Result<Option<PathBuf>>;
}

/// A fully assembled document as handed over by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    pub meta: DocumentMeta,
    pub content: RichText,
}

impl RenderedDocument {
    fn new(meta: DocumentMeta) -> Self {
        Self {
            meta,
            content: RichText::default(),
        }
    }

    /// Append `content`, shifting its offsets past what is already here.
    fn extend(&mut self, content: &RichText) {
        let base = self.content.text.len();
        self.content.text.push_str(&content.text);
        self.content
            .events
            .extend(content.events.iter().map(|e| e.shifted(base)));
        self.content.spans.extend(content.spans.iter().map(|s| {
            FormattingSpan::new(s.start + base, s.end + base, s.kind)
        }));
        self.content.issues.extend(
            content
                .issues
                .iter()
                .map(|i| ParseIssue::new(i.location + base, i.description.clone())),
        );
    }
}

/// Documents between `create` and `finalize`.
#[derive(Debug, Default)]
struct Pending {
    docs: Mutex<HashMap<EntryId, RenderedDocument>>,
}

impl Pending {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<EntryId, RenderedDocument>>> {
        self.docs
            .lock()
            .map_err(|_| DocAssemblerError::Render("sink state poisoned".into()))
    }

    fn create(&self, meta: &DocumentMeta) -> Result<()> {
        let mut docs = self.lock()?;
        if docs.contains_key(&meta.guid) {
            return Err(DocAssemblerError::Render(format!(
                "document {} is already open",
                meta.guid
            )));
        }
        docs.insert(meta.guid, RenderedDocument::new(meta.clone()));
        Ok(())
    }

    fn append(&self, guid: EntryId, content: &RichText) -> Result<()> {
        let mut docs = self.lock()?;
        let doc = docs
            .get_mut(&guid)
            .ok_or_else(|| DocAssemblerError::Render(format!("document {guid} is not open")))?;
        doc.extend(content);
        Ok(())
    }

    fn take(&self, guid: EntryId) -> Result<RenderedDocument> {
        self.lock()?
            .remove(&guid)
            .ok_or_else(|| DocAssemblerError::Render(format!("document {guid} is not open")))
    }
}

// ---------------------------------------------------------------------------
// JSON file sink
// ---------------------------------------------------------------------------

/// Writes each document to `<dir>/<guid>.json`.
#[derive(Debug)]
pub struct JsonDocumentSink {
    dir: PathBuf,
    pending: Pending,
}

impl JsonDocumentSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Pending::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, guid: EntryId) -> PathBuf {
        self.dir.join(format!("{guid}.json"))
    }
}

impl DocumentSink for JsonDocumentSink {
    fn create(&self, meta: &DocumentMeta) -> Result<()> {
        self.pending.create(meta)
    }

    fn append(&self, guid: EntryId, content: &RichText) -> Result<()> {
        self.pending.append(guid, content)
    }

    fn finalize(&self, guid: EntryId) -> Result<Option<PathBuf>> {
        let doc = self.pending.take(guid)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| DocAssemblerError::io(&self.dir, e))?;

        let path = self.path_for(guid);
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| DocAssemblerError::Render(format!("failed to serialize {guid}: {e}")))?;
        std::fs::write(&path, json).map_err(|e| DocAssemblerError::io(&path, e))?;

        debug!(path = %path.display(), "document written");
        Ok(Some(path))
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Keeps finished documents in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pending: Pending,
    finished: Mutex<Vec<RenderedDocument>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished documents, in finalisation order.
    pub fn documents(&self) -> Vec<RenderedDocument> {
        self.finished
            .lock()
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }
}

impl DocumentSink for MemorySink {
    fn create(&self, meta: &DocumentMeta) -> Result<()> {
        self.pending.create(meta)
    }

    fn append(&self, guid: EntryId, content: &RichText) -> Result<()> {
        self.pending.append(guid, content)
    }

    fn finalize(&self, guid: EntryId) -> Result<Option<PathBuf>> {
        let doc = self.pending.take(guid)?;
        self.finished
            .lock()
            .map_err(|_| DocAssemblerError::Render("sink state poisoned".into()))?
            .push(doc);
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Render stage
// ---------------------------------------------------------------------------

/// Admission-controlled access to a sink.
#[derive(Clone)]
pub struct RenderStage {
    gate: RenderGate,
    sink: Arc<dyn DocumentSink>,
}

impl RenderStage {
    pub fn new(sink: Arc<dyn DocumentSink>, pool_size: usize) -> Self {
        Self {
            gate: RenderGate::new(pool_size),
            sink,
        }
    }

    pub fn gate(&self) -> &RenderGate {
        &self.gate
    }

    /// Render one document, waiting for a free slot first.
    #[instrument(skip_all, fields(guid = %meta.guid))]
    pub async fn render(&self, meta: &DocumentMeta, content: &RichText) -> Result<Option<PathBuf>> {
        let _permit = self.gate.admit().await?;

        {
            let _exclusive = self.gate.exclusive().await;
            self.sink.create(meta)?;
        }
        {
            let _shared = self.gate.shared().await;
            self.sink.append(meta.guid, content)?;
        }
        let _exclusive = self.gate.exclusive().await;
        self.sink.finalize(meta.guid)
    }
}

impl std::fmt::Debug for RenderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStage")
            .field("pool_size", &self.gate.pool_size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docassembler_extract::{ParagraphStyle, RichTextBuilder};
    use docassembler_shared::SpanKind;
    use uuid::Uuid;

    fn meta(title: &str) -> DocumentMeta {
        DocumentMeta {
            guid: EntryId::new(),
            file_name: title.to_lowercase(),
            title: title.into(),
            document_title: Some(title.into()),
            url: Url::parse("https://example.org/doc").unwrap(),
            provider: "KHI".into(),
            bundle: "Fact sheets".into(),
            synonyms: vec![],
            font_family: "Calibri".into(),
        }
    }

    fn content(text: &str) -> RichText {
        let mut out = RichTextBuilder::new();
        out.new_paragraph(ParagraphStyle::Normal);
        let start = out.cursor();
        out.append_text(text);
        out.push_span(FormattingSpan::new(start, out.cursor(), SpanKind::Bold));
        out.finish()
    }

    #[tokio::test]
    async fn memory_sink_collects_finished_documents() {
        let sink = Arc::new(MemorySink::new());
        let stage = RenderStage::new(sink.clone(), 2);

        let meta = meta("Asthma");
        let written = stage.render(&meta, &content("Breathe")).await.unwrap();
        assert!(written.is_none());

        let docs = sink.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta, meta);
        assert!(docs[0].content.text.contains("Breathe"));
    }

    #[tokio::test]
    async fn appends_shift_offsets() {
        let sink = MemorySink::new();
        let meta = meta("Croup");
        sink.create(&meta).unwrap();
        let first = content("One");
        sink.append(meta.guid, &first).unwrap();
        sink.append(meta.guid, &content("Two")).unwrap();
        sink.finalize(meta.guid).unwrap();

        let doc = &sink.documents()[0];
        let bold: Vec<_> = doc.content.spans_of(SpanKind::Bold).collect();
        assert_eq!(bold.len(), 2);
        assert_eq!(doc.content.span_text(bold[1]), "Two");
        assert!(bold[1].start >= first.text.len());
    }

    #[test]
    fn sink_rejects_out_of_order_calls() {
        let sink = MemorySink::new();
        let meta = meta("Eczema");
        assert!(sink.append(meta.guid, &content("x")).is_err());
        sink.create(&meta).unwrap();
        assert!(sink.create(&meta).is_err());
        assert!(sink.finalize(EntryId::new()).is_err());
    }

    #[tokio::test]
    async fn json_sink_writes_one_file_per_document() {
        let dir = std::env::temp_dir().join(format!("da-sink-test-{}", Uuid::now_v7()));
        let sink = Arc::new(JsonDocumentSink::new(&dir));
        let stage = RenderStage::new(sink.clone(), 1);

        let meta = meta("Fever");
        let path = stage.render(&meta, &content("Hot")).await.unwrap().unwrap();
        assert_eq!(path, sink.path_for(meta.guid));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["meta"]["title"], "Fever");
        assert_eq!(written["meta"]["font_family"], "Calibri");
        assert!(written["content"]["text"].as_str().unwrap().contains("Hot"));
    }

    #[tokio::test]
    async fn concurrent_renders_all_complete() {
        let sink = Arc::new(MemorySink::new());
        let stage = RenderStage::new(sink.clone(), 2);

        let mut handles = Vec::new();
        for i in 0..5 {
            let stage = stage.clone();
            handles.push(tokio::spawn(async move {
                let meta = meta(&format!("Doc {i}"));
                stage.render(&meta, &content("body")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(sink.documents().len(), 5);
        assert_eq!(stage.gate().available(), 2);
    }
}
