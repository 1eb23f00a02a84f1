//! Selector languages used by provider specifications.
//!
//! - [`PathExpr`]: path expressions over HTML trees (`urlXPath`, `nodeXPath`, ...)
//! - [`JsonPath`]: paths over JSON trees (`urlJsonPath`, `titleJsonPath`, ...)

pub mod jsonpath;
pub mod xpath;

pub use jsonpath::{JsonPath, value_text};
pub use xpath::{PathExpr, attribute, decode_text, normalize_whitespace, text_content};
