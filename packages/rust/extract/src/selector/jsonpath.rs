//! A JSON-path subset for structured-data indexes and documents.
//!
//! Supports `$`, `.key`, `['key']`, `[n]` (negative counts from the end),
//! `[*]`, `.*` and recursive `..key`. A path without a leading `$` is relative
//! to the value it is evaluated against (`name.first`).

use docassembler_shared::{DocAssemblerError, Result};
use serde_json::Value;

/// A compiled JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
    Descendant(String),
}

impl JsonPath {
    /// Compile a path.
    pub fn parse(expr: &str) -> Result<Self> {
        let source = expr.trim();
        let fail = |msg: &str| DocAssemblerError::selector(source, msg);

        if source.is_empty() {
            return Err(fail("empty expression"));
        }

        let owned;
        let mut rest = match source.strip_prefix('$') {
            Some(rest) => rest,
            None if source.starts_with('[') || source.starts_with('.') => source,
            None => {
                owned = format!(".{source}");
                owned.as_str()
            }
        };

        let mut segments = Vec::new();
        while !rest.is_empty() {
            if let Some(r) = rest.strip_prefix("..") {
                let (name, r) = take_name(r);
                if name.is_empty() {
                    return Err(fail("`..` must be followed by a key"));
                }
                segments.push(Segment::Descendant(name.to_string()));
                rest = r;
            } else if let Some(r) = rest.strip_prefix('.') {
                if let Some(r) = r.strip_prefix('*') {
                    segments.push(Segment::Wildcard);
                    rest = r;
                    continue;
                }
                let (name, r) = take_name(r);
                if name.is_empty() {
                    return Err(fail("`.` must be followed by a key"));
                }
                segments.push(Segment::Key(name.to_string()));
                rest = r;
            } else if rest.starts_with('[') {
                let close = rest.find(']').ok_or_else(|| fail("unclosed `[`"))?;
                segments.push(parse_bracket(rest[1..close].trim()).map_err(|m| fail(&m))?);
                rest = &rest[close + 1..];
            } else {
                return Err(fail(&format!("unexpected `{rest}`")));
            }
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The expression text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against a value; matches are returned in traversal order.
    pub fn select<'v>(&self, value: &'v Value) -> Vec<&'v Value> {
        let mut current = vec![value];
        for segment in &self.segments {
            let mut next = Vec::new();
            for v in current {
                match segment {
                    Segment::Key(key) => next.extend(v.get(key.as_str())),
                    Segment::Index(i) => {
                        if let Value::Array(items) = v {
                            let len = items.len() as i64;
                            let idx = if *i < 0 { len + i } else { *i };
                            if (0..len).contains(&idx) {
                                next.push(&items[idx as usize]);
                            }
                        }
                    }
                    Segment::Wildcard => match v {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                    Segment::Descendant(key) => collect_descendants(v, key, &mut next),
                }
            }
            current = next;
        }
        current
    }

    /// First match, if any.
    pub fn select_first<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.select(value).into_iter().next()
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Scalar text of a value; `None` for null, arrays and objects.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn take_name(s: &str) -> (&str, &str) {
    let end = s.find(['.', '[']).unwrap_or(s.len());
    (&s[..end], &s[end..])
}

fn parse_bracket(inner: &str) -> std::result::Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Ok(i) = inner.parse::<i64>() {
        return Ok(Segment::Index(i));
    }
    let quoted = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
    quoted
        .map(|key| Segment::Key(key.to_string()))
        .ok_or_else(|| format!("unsupported subscript `[{inner}]`"))
}

fn collect_descendants<'v>(value: &'v Value, key: &str, out: &mut Vec<&'v Value>) {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                out.push(found);
            }
            for child in map.values() {
                collect_descendants(child, key, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_descendants(child, key, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> Value {
        json!({
            "items": [
                {"name": "Asthma", "link": {"href": "/docs/asthma"}},
                {"name": "Croup", "link": {"href": "/docs/croup"}},
            ],
            "meta": {"count": 2, "tags": ["a", "b"]}
        })
    }

    #[test]
    fn walks_keys_and_wildcards() {
        let v = index();
        let names: Vec<_> = JsonPath::parse("$.items[*].name")
            .unwrap()
            .select(&v)
            .into_iter()
            .filter_map(value_text)
            .collect();
        assert_eq!(names, vec!["Asthma", "Croup"]);
    }

    #[test]
    fn indexes_and_quoted_keys() {
        let v = index();
        let last = JsonPath::parse("$['items'][-1].link.href").unwrap();
        assert_eq!(last.select_first(&v), Some(&json!("/docs/croup")));

        let out_of_range = JsonPath::parse("$.items[5]").unwrap();
        assert!(out_of_range.select(&v).is_empty());
    }

    #[test]
    fn relative_paths_without_root() {
        let item = json!({"name": "Eczema", "link": {"href": "/docs/eczema"}});
        let href = JsonPath::parse("link.href").unwrap();
        assert_eq!(
            href.select_first(&item).and_then(value_text).as_deref(),
            Some("/docs/eczema")
        );
    }

    #[test]
    fn recursive_descent() {
        let v = index();
        let hrefs = JsonPath::parse("$..href").unwrap().select(&v);
        assert_eq!(hrefs.len(), 2);
    }

    #[test]
    fn scalar_text() {
        assert_eq!(value_text(&json!(2)), Some("2".into()));
        assert_eq!(value_text(&json!(null)), None);
        assert_eq!(value_text(&json!(["a"])), None);
    }

    #[test]
    fn malformed_paths_are_selector_errors() {
        for expr in ["", "$.", "$..", "$[abc]", "$.items[0", "$x"] {
            assert!(
                matches!(
                    JsonPath::parse(expr),
                    Err(DocAssemblerError::Selector { .. })
                ),
                "{expr}"
            );
        }
    }
}
