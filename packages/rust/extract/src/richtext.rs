//! Rich-text range model.
//!
//! Extraction writes into one forward-growing text buffer. Structure
//! (paragraphs, line breaks, images, lists, links) is recorded as an ordered
//! event stream, and formatting as [`FormattingSpan`]s addressed by byte
//! offsets into the buffer. The cursor only ever moves forward.

use serde::{Deserialize, Serialize};

use docassembler_shared::{Align, FormattingSpan, ParseIssue, SpanKind};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Named paragraph style.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ParagraphStyle {
    #[default]
    Normal,
    /// Heading level 1..=3.
    Heading(u8),
    Quote,
    /// Any other style name, passed through to the sink.
    Named(String),
}

impl ParagraphStyle {
    /// Map a style name from a provider specification.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("normal") {
            return Self::Normal;
        }
        if name.eq_ignore_ascii_case("quote") {
            return Self::Quote;
        }
        if let Some(level) = name
            .strip_prefix("Heading ")
            .and_then(|l| l.trim().parse::<u8>().ok())
        {
            return Self::Heading(level);
        }
        Self::Named(name.to_string())
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, Self::Heading(_))
    }
}

impl std::fmt::Display for ParagraphStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Heading(level) => write!(f, "Heading {level}"),
            Self::Quote => f.write_str("Quote"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl From<String> for ParagraphStyle {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ParagraphStyle> for String {
    fn from(style: ParagraphStyle) -> Self {
        style.to_string()
    }
}

/// List flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Bulleted,
    Numbered,
}

/// One structural event, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    /// A new paragraph starts at `at`.
    Paragraph { at: usize, style: ParagraphStyle },
    /// A line break inside the current paragraph; the next line starts at `at`.
    LineBreak { at: usize },
    /// Text run `[start, end)`.
    Text { start: usize, end: usize },
    /// Image reference at `at`.
    Image {
        at: usize,
        url: String,
        align: Align,
    },
    /// Hyperlink over `[start, end)`.
    Link {
        start: usize,
        end: usize,
        url: String,
    },
    ListStart { at: usize, kind: ListKind },
    ListEnd { at: usize },
}

impl ContentEvent {
    /// The same event with every offset moved forward by `by`.
    pub fn shifted(&self, by: usize) -> Self {
        let mut event = self.clone();
        match &mut event {
            Self::Paragraph { at, .. }
            | Self::LineBreak { at }
            | Self::Image { at, .. }
            | Self::ListStart { at, .. }
            | Self::ListEnd { at } => *at += by,
            Self::Text { start, end } | Self::Link { start, end, .. } => {
                *start += by;
                *end += by;
            }
        }
        event
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates text, events, spans and issues for one document.
#[derive(Debug, Default)]
pub struct RichTextBuilder {
    text: String,
    events: Vec<ContentEvent>,
    spans: Vec<FormattingSpan>,
    issues: Vec<ParseIssue>,
}

impl RichTextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current end of the buffer.
    pub fn cursor(&self) -> usize {
        self.text.len()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Start a paragraph; returns the offset where its content begins.
    pub fn new_paragraph(&mut self, style: ParagraphStyle) -> usize {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        let at = self.cursor();
        self.events.push(ContentEvent::Paragraph { at, style });
        at
    }

    /// Break the line; returns the offset where the next line begins.
    pub fn line_break(&mut self) -> usize {
        self.text.push('\n');
        let at = self.cursor();
        self.events.push(ContentEvent::LineBreak { at });
        at
    }

    /// Append a text run; adjacent runs are merged.
    pub fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let start = self.cursor();
        self.text.push_str(text);
        let end = self.cursor();

        if let Some(ContentEvent::Text { end: last_end, .. }) = self.events.last_mut() {
            if *last_end == start {
                *last_end = end;
                return;
            }
        }
        self.events.push(ContentEvent::Text { start, end });
    }

    /// New paragraph in a heading style holding `text`.
    pub fn heading(&mut self, level: u8, text: &str) {
        self.new_paragraph(ParagraphStyle::Heading(level));
        self.append_text(text);
    }

    pub fn image(&mut self, url: impl Into<String>, align: Align) {
        let at = self.cursor();
        self.events.push(ContentEvent::Image {
            at,
            url: url.into(),
            align,
        });
    }

    /// Append `text` as a hyperlink to `url`.
    pub fn link(&mut self, url: &str, text: &str) {
        let start = self.cursor();
        self.append_text(text);
        self.events.push(ContentEvent::Link {
            start,
            end: self.cursor(),
            url: url.to_string(),
        });
    }

    pub fn list_start(&mut self, kind: ListKind) {
        let at = self.cursor();
        self.events.push(ContentEvent::ListStart { at, kind });
    }

    pub fn list_end(&mut self) {
        let at = self.cursor();
        self.events.push(ContentEvent::ListEnd { at });
    }

    pub fn push_span(&mut self, span: FormattingSpan) {
        debug_assert!(span.end <= self.cursor());
        self.spans.push(span);
    }

    /// Record a non-fatal issue at the cursor.
    pub fn issue(&mut self, description: impl Into<String>) {
        let location = self.cursor();
        self.issues.push(ParseIssue::new(location, description));
    }

    pub fn issues(&self) -> &[ParseIssue] {
        &self.issues
    }

    /// Close the buffer, normalizing spans.
    pub fn finish(self) -> RichText {
        RichText {
            text: self.text,
            events: self.events,
            spans: normalize_spans(self.spans),
            issues: self.issues,
        }
    }
}

/// Drop empty spans, then merge overlaps within each kind.
fn normalize_spans(mut spans: Vec<FormattingSpan>) -> Vec<FormattingSpan> {
    spans.retain(|s| !s.is_empty());
    spans.sort_by_key(|s| (s.kind, s.start, s.end));

    let mut merged: Vec<FormattingSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if last.kind == span.kind && span.start < last.end => {
                last.end = last.end.max(span.end);
            }
            _ => merged.push(span),
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Finished document content
// ---------------------------------------------------------------------------

/// Immutable extraction output for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichText {
    pub text: String,
    pub events: Vec<ContentEvent>,
    /// Non-overlapping within each kind, sorted by kind then start.
    pub spans: Vec<FormattingSpan>,
    pub issues: Vec<ParseIssue>,
}

impl RichText {
    /// Spans of one kind, in buffer order.
    pub fn spans_of(&self, kind: SpanKind) -> impl Iterator<Item = &FormattingSpan> {
        self.spans.iter().filter(move |s| s.kind == kind)
    }

    /// Combined subscript and superscript spans.
    pub fn script_spans(&self) -> impl Iterator<Item = &FormattingSpan> {
        self.spans
            .iter()
            .filter(|s| matches!(s.kind, SpanKind::Subscript | SpanKind::Superscript))
    }

    /// Text covered by a span.
    pub fn span_text(&self, span: &FormattingSpan) -> &str {
        &self.text[span.range()]
    }

    /// Each paragraph's style and text, in order.
    pub fn paragraphs(&self) -> Vec<(&ParagraphStyle, &str)> {
        let starts: Vec<(usize, &ParagraphStyle)> = self
            .events
            .iter()
            .filter_map(|e| match e {
                ContentEvent::Paragraph { at, style } => Some((*at, style)),
                _ => None,
            })
            .collect();

        starts
            .iter()
            .enumerate()
            .map(|(i, (at, style))| {
                let end = starts
                    .get(i + 1)
                    .map_or(self.text.len(), |(next, _)| next.saturating_sub(1).max(*at));
                (*style, &self.text[*at..end])
            })
            .collect()
    }

    /// Texts of heading paragraphs.
    pub fn headings(&self) -> Vec<&str> {
        self.paragraphs()
            .into_iter()
            .filter(|(style, _)| style.is_heading())
            .map(|(_, text)| text)
            .collect()
    }

    /// Image URLs, in order.
    pub fn images(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ContentEvent::Image { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Link URLs, in order.
    pub fn links(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ContentEvent::Link { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_paragraph_has_no_leading_break() {
        let mut b = RichTextBuilder::new();
        assert_eq!(b.new_paragraph(ParagraphStyle::Heading(1)), 0);
        b.append_text("Asthma");
        let at = b.new_paragraph(ParagraphStyle::Normal);
        assert_eq!(at, 7);
        b.append_text("Body");

        let rt = b.finish();
        assert_eq!(rt.text, "Asthma\nBody");
        let paragraphs = rt.paragraphs();
        assert_eq!(paragraphs[0], (&ParagraphStyle::Heading(1), "Asthma"));
        assert_eq!(paragraphs[1], (&ParagraphStyle::Normal, "Body"));
    }

    #[test]
    fn adjacent_text_runs_merge() {
        let mut b = RichTextBuilder::new();
        b.append_text("Hello ");
        b.append_text("world");
        let rt = b.finish();
        assert_eq!(rt.events, vec![ContentEvent::Text { start: 0, end: 11 }]);
    }

    #[test]
    fn shifted_moves_every_offset() {
        let link = ContentEvent::Link {
            start: 2,
            end: 5,
            url: "https://example.org".into(),
        };
        assert_eq!(
            link.shifted(10),
            ContentEvent::Link {
                start: 12,
                end: 15,
                url: "https://example.org".into(),
            }
        );
        assert_eq!(
            ContentEvent::ListEnd { at: 0 }.shifted(3),
            ContentEvent::ListEnd { at: 3 }
        );
    }

    #[test]
    fn spans_are_normalized_per_kind() {
        let mut b = RichTextBuilder::new();
        b.append_text("0123456789");
        b.push_span(FormattingSpan::new(5, 8, SpanKind::Bold));
        b.push_span(FormattingSpan::new(0, 3, SpanKind::Bold));
        b.push_span(FormattingSpan::new(2, 6, SpanKind::Bold));
        b.push_span(FormattingSpan::new(4, 4, SpanKind::Italic));
        b.push_span(FormattingSpan::new(1, 2, SpanKind::Italic));

        let rt = b.finish();
        let bold: Vec<_> = rt.spans_of(SpanKind::Bold).map(|s| s.range()).collect();
        assert_eq!(bold, vec![0..8]);
        let italic: Vec<_> = rt.spans_of(SpanKind::Italic).map(|s| s.range()).collect();
        assert_eq!(italic, vec![1..2]);
    }

    #[test]
    fn script_spans_combine_sub_and_sup() {
        let mut b = RichTextBuilder::new();
        b.append_text("H2O x2");
        b.push_span(FormattingSpan::new(1, 2, SpanKind::Subscript));
        b.push_span(FormattingSpan::new(5, 6, SpanKind::Superscript));
        let rt = b.finish();
        assert_eq!(rt.script_spans().count(), 2);
    }

    #[test]
    fn issues_record_cursor() {
        let mut b = RichTextBuilder::new();
        b.append_text("abc");
        b.issue("Unhandled tag marquee");
        assert_eq!(b.issues()[0].location, 3);
    }

    #[test]
    fn style_names_roundtrip() {
        for name in ["Normal", "Heading 2", "Quote", "Subtle Emphasis"] {
            assert_eq!(ParagraphStyle::from_name(name).to_string(), name);
        }
        let json = serde_json::to_string(&ParagraphStyle::Heading(1)).unwrap();
        assert_eq!(json, "\"Heading 1\"");
    }
}
