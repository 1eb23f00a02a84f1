//! Document content extractor.
//!
//! Applies a document rule tree to one fetched resource. HTML and JSON
//! sources share the same rule kinds; only the selector language differs.

use ego_tree::NodeRef;
use scraper::Html;
use scraper::node::Node;
use serde_json::Value;
use url::Url;

use docassembler_shared::{Align, ContentRule, DocAssemblerError, DocumentRule, Result, SourceKind};

use crate::richtext::{ParagraphStyle, RichText, RichTextBuilder};
use crate::selector::{JsonPath, PathExpr, attribute, decode_text, normalize_whitespace, text_content, value_text};
use crate::walker::{WalkOptions, walk};

/// Style of the attribution footer paragraph.
pub const FOOTER_STYLE: &str = "Subtle Emphasis";

/// A parsed resource, tagged by source kind.
#[derive(Debug)]
pub enum Source {
    Html(Html),
    Json(Value),
}

impl Source {
    /// Parse a fetched body according to its declared kind.
    pub fn parse(kind: SourceKind, body: &str) -> Result<Self> {
        match kind {
            SourceKind::Html => Ok(Self::Html(Html::parse_document(body))),
            SourceKind::Json => serde_json::from_str(body)
                .map(Self::Json)
                .map_err(|e| DocAssemblerError::parse(format!("invalid JSON document: {e}"))),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Html(_) => SourceKind::Html,
            Self::Json(_) => SourceKind::Json,
        }
    }
}

/// Everything extracted from one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Title from the Title rule, if it matched.
    pub title: Option<String>,
    pub synonyms: Vec<String>,
    pub content: RichText,
}

/// Apply `rule` to `source`.
///
/// `url` is the document's own address; relative image links resolve against
/// it and it closes the footer. `footer` is the rendered attribution text,
/// omitted when `None`.
///
/// Returns [`DocAssemblerError::Parse`] when a required Content rule finds no
/// node; nothing extracted up to that point is returned.
pub fn extract_document(
    rule: &DocumentRule,
    source: &Source,
    url: &Url,
    footer: Option<&str>,
) -> Result<ExtractedDocument> {
    let mut ctx = Extraction {
        url,
        out: RichTextBuilder::new(),
        title: None,
        synonyms: Vec::new(),
    };

    match source {
        Source::Html(html) => ctx.apply_html(&rule.rules, html.tree.root())?,
        Source::Json(value) => ctx.apply_json(&rule.rules, value)?,
    }

    if let Some(footer) = footer {
        ctx.out
            .new_paragraph(ParagraphStyle::Named(FOOTER_STYLE.to_string()));
        ctx.out.append_text(footer);
        ctx.out.new_paragraph(ParagraphStyle::Normal);
        ctx.out.link(url.as_str(), url.as_str());
    }

    let content = ctx.out.finish();
    if !content.issues.is_empty() {
        tracing::debug!(%url, issues = content.issues.len(), "document has parse issues");
    }

    Ok(ExtractedDocument {
        title: ctx.title,
        synonyms: ctx.synonyms,
        content,
    })
}

struct Extraction<'u> {
    url: &'u Url,
    out: RichTextBuilder,
    title: Option<String>,
    synonyms: Vec<String>,
}

impl Extraction<'_> {
    fn add_title(&mut self, raw: &str) {
        let title = normalize_whitespace(raw);
        if title.is_empty() {
            return;
        }
        self.out.heading(1, &title);
        self.title = Some(title);
    }

    fn add_image(&mut self, src: &str, align: Align) {
        let src = src.trim();
        if src.is_empty() {
            return;
        }
        let resolved = self
            .url
            .join(src)
            .map_or_else(|_| src.to_string(), String::from);
        self.out.new_paragraph(ParagraphStyle::Normal);
        self.out.image(resolved, align);
    }

    fn add_synonym(&mut self, raw: &str) {
        let synonym = normalize_whitespace(raw);
        if !synonym.is_empty() {
            self.synonyms.push(synonym);
        }
    }

    fn missing_content(&self, select: &str, required: bool) -> Result<()> {
        if required {
            tracing::warn!(url = %self.url, select, "required content not found");
            return Err(DocAssemblerError::parse(format!(
                "required content `{select}` not found in {}",
                self.url
            )));
        }
        tracing::debug!(url = %self.url, select, "optional content not found");
        Ok(())
    }

    // ---- HTML ----

    fn apply_html(&mut self, rules: &[ContentRule], context: NodeRef<'_, Node>) -> Result<()> {
        for rule in rules {
            match rule {
                ContentRule::Title { select } => {
                    if let Some(node) = PathExpr::parse(select)?.select_first(context) {
                        self.add_title(&text_content(node));
                    }
                }
                ContentRule::Image { select, align } => {
                    if let Some(node) = PathExpr::parse(select)?.select_first(context) {
                        let src = attribute(node, "src").unwrap_or_default();
                        self.add_image(src, *align);
                    }
                }
                ContentRule::Synonym { select } => {
                    for node in PathExpr::parse(select)?.select(context) {
                        self.add_synonym(&text_content(node));
                    }
                }
                ContentRule::Content {
                    select,
                    style,
                    ignore_divs,
                    required,
                } => match PathExpr::parse(select)?.select_first(context) {
                    Some(node) => {
                        let style = style
                            .as_deref()
                            .map(ParagraphStyle::from_name)
                            .unwrap_or_default();
                        self.out.new_paragraph(style);
                        let base_url = Some(self.url);
                        walk(
                            node,
                            &mut self.out,
                            &WalkOptions {
                                ignore_divs: *ignore_divs,
                                base_url,
                            },
                        );
                    }
                    None => self.missing_content(select, *required)?,
                },
                ContentRule::Node { select, rules } => {
                    if let Some(node) = PathExpr::parse(select)?.select_first(context) {
                        self.apply_html(rules, node)?;
                    }
                }
                ContentRule::Unknown => {}
            }
        }
        Ok(())
    }

    // ---- JSON ----

    fn apply_json(&mut self, rules: &[ContentRule], context: &Value) -> Result<()> {
        for rule in rules {
            match rule {
                ContentRule::Title { select } => {
                    if let Some(text) = JsonPath::parse(select)?
                        .select_first(context)
                        .and_then(value_text)
                    {
                        self.add_title(&decode_text(&text));
                    }
                }
                ContentRule::Image { select, align } => {
                    if let Some(src) = JsonPath::parse(select)?
                        .select_first(context)
                        .and_then(value_text)
                    {
                        self.add_image(&src, *align);
                    }
                }
                ContentRule::Synonym { select } => {
                    for value in JsonPath::parse(select)?.select(context) {
                        match value {
                            Value::Array(items) => {
                                for text in items.iter().filter_map(value_text) {
                                    self.add_synonym(&decode_text(&text));
                                }
                            }
                            other => {
                                if let Some(text) = value_text(other) {
                                    self.add_synonym(&decode_text(&text));
                                }
                            }
                        }
                    }
                }
                ContentRule::Content {
                    select,
                    style,
                    ignore_divs,
                    required,
                } => match JsonPath::parse(select)?
                    .select_first(context)
                    .and_then(value_text)
                {
                    Some(markup) => {
                        let style = style
                            .as_deref()
                            .map(ParagraphStyle::from_name)
                            .unwrap_or_default();
                        self.out.new_paragraph(style);
                        let fragment = Html::parse_fragment(&markup);
                        let base_url = Some(self.url);
                        walk(
                            *fragment.root_element(),
                            &mut self.out,
                            &WalkOptions {
                                ignore_divs: *ignore_divs,
                                base_url,
                            },
                        );
                    }
                    None => self.missing_content(select, *required)?,
                },
                ContentRule::Node { select, rules } => {
                    if let Some(node) = JsonPath::parse(select)?.select_first(context) {
                        self.apply_json(rules, node)?;
                    }
                }
                ContentRule::Unknown => {}
            }
        }
        Ok(())
    }
}
