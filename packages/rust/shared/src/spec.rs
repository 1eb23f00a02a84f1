//! Declarative provider specifications.
//!
//! A provider specification describes how to crawl one content provider:
//! where its index lives, which index links are documents, and which parts
//! of each document become headings, images, synonyms and formatted content.
//!
//! Specifications are TOML (or JSON) documents:
//!
//! ```toml
//! [provider]
//! name = "Kids Health Info"
//! url = "https://www.example.org/"
//!
//! [[provider.bundle]]
//! name = "Fact sheets"
//! url = "kidsinfo/factsheets"
//! postfix = "KHI"
//!
//! [[provider.bundle.document]]
//! urlXPath = "//a[@class='doc']"
//! synonymRegExp = '(?<title>.+) \((?<synonym>.+)\)'
//!
//! [[provider.bundle.document.rule]]
//! kind = "Title"
//! nodeXPath = "//h1"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DocAssemblerError, Result};

/// Root of a provider specification file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// The single content provider described by this file.
    pub provider: ContentProvider,
}

/// A content provider: a named origin with one or more bundles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentProvider {
    /// Provider name, also stored on every catalog row.
    pub name: String,
    /// Base URL; bundle and document links are resolved against it.
    pub url: Url,
    /// Bundles of documents offered by this provider.
    #[serde(default, rename = "bundle")]
    pub bundles: Vec<Bundle>,
}

/// Whether a resource is a markup tree or a JSON tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Html,
    Json,
}

impl SourceKind {
    /// File extension used for cached copies of this kind of resource.
    pub fn cache_extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

/// A named grouping of documents with a shared index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    /// Bundle name, stored on every catalog row.
    pub name: String,
    /// Index location, relative to the provider URL.
    pub url: String,
    /// Selects links to sub-index pages; each is fetched and treated as an index.
    #[serde(default, rename = "subIndexXPath", skip_serializing_if = "Option::is_none")]
    pub sub_index_xpath: Option<String>,
    /// Appended to every discovered title as ` - {postfix}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postfix: Option<String>,
    /// Format of the index resource.
    #[serde(default)]
    pub format: SourceKind,
    /// Document rules applied to every index page.
    #[serde(default, rename = "document")]
    pub documents: Vec<DocumentRule>,
}

/// Identifies document links on an index and describes how to extract them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRule {
    /// Path expression selecting link nodes on a markup index.
    #[serde(default, rename = "urlXPath", skip_serializing_if = "Option::is_none")]
    pub url_xpath: Option<String>,
    /// JSON path selecting link values (or objects) on a JSON index.
    #[serde(default, rename = "urlJsonPath", skip_serializing_if = "Option::is_none")]
    pub url_json_path: Option<String>,
    /// Value-extraction regex for JSON link values; group `url` or the whole match.
    #[serde(default, rename = "urlRegExp", skip_serializing_if = "Option::is_none")]
    pub url_reg_exp: Option<String>,
    /// JSON path, relative to the matched node, yielding the raw title.
    #[serde(default, rename = "titleJsonPath", skip_serializing_if = "Option::is_none")]
    pub title_json_path: Option<String>,
    /// Path expression, relative to the link node, yielding a more precise title.
    #[serde(default, rename = "indexTitleXPath", skip_serializing_if = "Option::is_none")]
    pub index_title_xpath: Option<String>,
    /// Regex with named groups `title` and `synonym` splitting the raw title.
    #[serde(default, rename = "synonymRegExp", skip_serializing_if = "Option::is_none")]
    pub synonym_reg_exp: Option<String>,
    /// Format of the document resources this rule links to.
    #[serde(default)]
    pub format: SourceKind,
    /// Extraction rules applied to each fetched document, in order.
    #[serde(default, rename = "rule")]
    pub rules: Vec<ContentRule>,
}

/// Image placement relative to the surrounding text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    #[serde(alias = "left")]
    Inline,
    Right,
}

/// One extraction rule inside a document rule tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ContentRule {
    /// Selects the document title; emitted as a level-1 heading.
    Title {
        #[serde(alias = "nodeXPath")]
        select: String,
    },
    /// Selects an image node (its `src`), or an image URL value in JSON.
    Image {
        #[serde(alias = "urlXPath")]
        select: String,
        #[serde(default)]
        align: Align,
    },
    /// Selects zero or more synonym nodes.
    Synonym {
        #[serde(alias = "nodesXPath")]
        select: String,
    },
    /// Selects a content root and walks it into a formatted block.
    Content {
        #[serde(alias = "nodeXPath")]
        select: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<String>,
        #[serde(default, rename = "ignoreDivs")]
        ignore_divs: bool,
        #[serde(default)]
        required: bool,
    },
    /// Selects a sub-node and applies nested rules relative to it.
    Node {
        #[serde(alias = "nodeXPath")]
        select: String,
        #[serde(default, rename = "rule")]
        rules: Vec<ContentRule>,
    },
    /// Any rule kind this version does not know; ignored during extraction.
    #[serde(other)]
    Unknown,
}

impl ProviderSpec {
    /// Parse a TOML provider specification.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DocAssemblerError::spec(e.to_string()))
    }

    /// Parse a JSON provider specification.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| DocAssemblerError::spec(e.to_string()))
    }

    /// Load a specification file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DocAssemblerError::io(path, e))?;
        let spec = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
        .map_err(|e| DocAssemblerError::spec(format!("{}: {e}", path.display())))?;

        tracing::debug!(
            path = %path.display(),
            provider = %spec.provider.name,
            bundles = spec.provider.bundles.len(),
            "loaded provider specification"
        );
        Ok(spec)
    }

    /// Look up a bundle by name.
    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.provider.bundles.iter().find(|b| b.name == name)
    }
}

impl ContentProvider {
    /// Absolute URL of a bundle's index.
    pub fn bundle_url(&self, bundle: &Bundle) -> Result<Url> {
        self.url.join(&bundle.url).map_err(|e| {
            DocAssemblerError::spec(format!(
                "bundle `{}` has an invalid url `{}`: {e}",
                bundle.name, bundle.url
            ))
        })
    }
}
