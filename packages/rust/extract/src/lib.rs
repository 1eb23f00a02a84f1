//! Specification-driven content extraction for DocAssembler.
//!
//! - [`selector`]: path expressions over HTML and JSON trees
//! - [`richtext`]: the text buffer, structural events and formatting spans
//! - [`walker`]: the recursive HTML walker that fills a [`RichTextBuilder`]
//! - [`document`]: applies a document rule tree to one fetched resource
//! - [`validate`]: compiles every selector and regex of a specification up front

pub mod document;
pub mod richtext;
pub mod selector;
pub mod validate;
pub mod walker;

pub use document::{ExtractedDocument, FOOTER_STYLE, Source, extract_document};
pub use richtext::{ContentEvent, ListKind, ParagraphStyle, RichText, RichTextBuilder};
pub use selector::{JsonPath, PathExpr};
pub use validate::validate_spec;
pub use walker::{WalkOptions, video_reference, walk};
