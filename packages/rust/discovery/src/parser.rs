//! Index page parsing.
//!
//! A bundle's document rules are compiled once into an [`IndexRules`] value
//! and applied to each fetched index page. Parsing is synchronous and works on
//! owned output so no parsed tree is held across an await point.

use regex::Regex;
use serde_json::Value;
use url::Url;

use docassembler_extract::Source;
use docassembler_extract::selector::{
    JsonPath, PathExpr, attribute, normalize_whitespace, text_content, value_text,
};
use docassembler_shared::{Bundle, DocAssemblerError, IndexCandidate, Result, SourceKind};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What one index page yielded.
#[derive(Debug, Default)]
pub(crate) struct IndexPage {
    /// Sub-index pages to fetch next, in source order.
    pub sub_links: Vec<Url>,
    /// Document candidates, in rule order then source order.
    pub candidates: Vec<IndexCandidate>,
}

/// Compiled selectors and patterns of one bundle.
#[derive(Debug)]
pub(crate) struct IndexRules {
    bundle: String,
    postfix: Option<String>,
    format: SourceKind,
    sub_index: Option<Selector>,
    documents: Vec<DocumentLinks>,
}

#[derive(Debug)]
enum Selector {
    Html(PathExpr),
    Json(JsonPath),
}

#[derive(Debug)]
struct DocumentLinks {
    links: Selector,
    index_title: Option<PathExpr>,
    title_json: Option<JsonPath>,
    url_pattern: Option<Regex>,
    synonym: Option<Regex>,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

impl IndexRules {
    /// Compile every selector of `bundle`.
    pub fn compile(bundle: &Bundle) -> Result<Self> {
        let context =
            |e: DocAssemblerError| DocAssemblerError::spec(format!("bundle `{}`: {e}", bundle.name));

        let sub_index = bundle
            .sub_index_xpath
            .as_deref()
            .map(|expr| compile_selector(bundle.format, expr))
            .transpose()
            .map_err(context)?;

        let documents = bundle
            .documents
            .iter()
            .map(|rule| {
                let links = match bundle.format {
                    SourceKind::Html => rule.url_xpath.as_deref(),
                    SourceKind::Json => rule.url_json_path.as_deref(),
                }
                .ok_or_else(|| DocAssemblerError::spec("document rule has no link selector"))
                .and_then(|expr| compile_selector(bundle.format, expr))?;

                Ok(DocumentLinks {
                    links,
                    index_title: rule.index_title_xpath.as_deref().map(PathExpr::parse).transpose()?,
                    title_json: rule.title_json_path.as_deref().map(JsonPath::parse).transpose()?,
                    url_pattern: rule.url_reg_exp.as_deref().map(compile_regex).transpose()?,
                    synonym: rule.synonym_reg_exp.as_deref().map(compile_regex).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map_err(context)?;

        Ok(Self {
            bundle: bundle.name.clone(),
            postfix: bundle.postfix.clone(),
            format: bundle.format,
            sub_index,
            documents,
        })
    }

    pub fn format(&self) -> SourceKind {
        self.format
    }

    pub fn has_sub_index(&self) -> bool {
        self.sub_index.is_some()
    }

    // -----------------------------------------------------------------------
    // Page parsing
    // -----------------------------------------------------------------------

    /// Parse one index page.
    ///
    /// With `expand` set and a sub-index selector present, only sub-index
    /// links are collected (resolved against `page_url`). Otherwise document
    /// rules run and their links resolve against `base_url`.
    pub fn parse_page(
        &self,
        body: &str,
        page_url: &Url,
        base_url: &Url,
        expand: bool,
    ) -> Result<IndexPage> {
        let source = Source::parse(self.format, body)?;
        let mut page = IndexPage::default();

        if let (true, Some(selector)) = (expand, &self.sub_index) {
            page.sub_links = link_values(selector, &source)
                .into_iter()
                .filter_map(|href| resolve(page_url, &href))
                .collect();
            return Ok(page);
        }

        for (rule_index, rule) in self.documents.iter().enumerate() {
            let found = match &source {
                Source::Html(html) => rule.html_links(html.tree.root()),
                Source::Json(value) => rule.json_links(value),
            };
            for (href, raw_title) in found {
                let Some(url) = resolve(base_url, &href) else {
                    continue;
                };
                let (title, synonym) = split_synonym(&raw_title, rule.synonym.as_ref());
                page.candidates.push(IndexCandidate {
                    url,
                    title,
                    synonym,
                    postfix: self.postfix.clone(),
                    bundle: self.bundle.clone(),
                    rule_index,
                });
            }
        }

        Ok(page)
    }
}

impl DocumentLinks {
    /// `(href, raw title)` for every link node on a markup index.
    fn html_links(&self, root: ego_tree::NodeRef<'_, scraper::Node>) -> Vec<(String, String)> {
        let Selector::Html(links) = &self.links else {
            return Vec::new();
        };

        links
            .select(root)
            .into_iter()
            .filter_map(|node| {
                let Some(href) = attribute(node, "href") else {
                    tracing::debug!(selector = %links.as_str(), "matched node has no href");
                    return None;
                };
                let mut title = normalize_whitespace(&text_content(node));
                if let Some(inner) = &self.index_title {
                    if let Some(title_node) = inner.select_first(node) {
                        title = normalize_whitespace(&text_content(title_node));
                    }
                }
                Some((href.to_string(), title))
            })
            .collect()
    }

    /// `(href, raw title)` for every matched value on a JSON index.
    fn json_links(&self, root: &Value) -> Vec<(String, String)> {
        let Selector::Json(links) = &self.links else {
            return Vec::new();
        };

        links
            .select(root)
            .into_iter()
            .filter_map(|node| {
                let raw = value_text(node).or_else(|| {
                    self.url_pattern.as_ref().map(|_| node.to_string())
                })?;
                let href = match &self.url_pattern {
                    Some(pattern) => {
                        let caps = pattern.captures(&raw)?;
                        caps.name("url").or_else(|| caps.get(0))?.as_str().to_string()
                    }
                    None => raw.clone(),
                };
                let title = self
                    .title_json
                    .as_ref()
                    .and_then(|path| path.select_first(node))
                    .and_then(value_text)
                    .unwrap_or(raw);
                Some((href, normalize_whitespace(&title)))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn compile_selector(format: SourceKind, expr: &str) -> Result<Selector> {
    match format {
        SourceKind::Html => PathExpr::parse(expr).map(Selector::Html),
        SourceKind::Json => JsonPath::parse(expr).map(Selector::Json),
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| DocAssemblerError::spec(format!("invalid regex `{pattern}`: {e}")))
}

/// Link targets selected by a sub-index selector.
fn link_values(selector: &Selector, source: &Source) -> Vec<String> {
    match (selector, source) {
        (Selector::Html(expr), Source::Html(html)) => expr
            .select(html.tree.root())
            .into_iter()
            .filter_map(|node| attribute(node, "href").map(str::to_string))
            .collect(),
        (Selector::Json(path), Source::Json(value)) => {
            path.select(value).into_iter().filter_map(value_text).collect()
        }
        _ => Vec::new(),
    }
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match base.join(href) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!(%base, href, error = %e, "skipping unresolvable link");
            None
        }
    }
}

/// Split a raw index title into `(title, synonym)`.
///
/// A non-matching pattern leaves the title untouched and yields no synonym.
pub(crate) fn split_synonym(raw: &str, pattern: Option<&Regex>) -> (String, Option<String>) {
    let caps = pattern.and_then(|re| re.captures(raw));
    let Some(caps) = caps else {
        return (raw.to_string(), None);
    };

    let title = caps.name("title").map(|m| m.as_str().trim());
    let synonym = caps
        .name("synonym")
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty());

    match title {
        Some(title) if !title.is_empty() => (title.to_string(), synonym.map(str::to_string)),
        _ => (raw.to_string(), None),
    }
}
