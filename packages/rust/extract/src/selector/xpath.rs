//! A path-expression subset evaluated over parsed HTML trees.
//!
//! Supported syntax:
//! - absolute (`/html/body`), descendant (`//a`) and relative (`.//img`, `h1`) paths
//! - name tests, `*`, `text()`, `node()`, `.` and `..`
//! - predicates: `[n]`, `[last()]`, `[@a]`, `[@a='v']`, `[@a!='v']`,
//!   `[contains(@a,'v')]`, `[starts-with(@a,'v')]`, `[text()='v']` and `[not(...)]`
//!
//! Results are deduplicated and returned in document order.

use std::collections::{HashMap, HashSet};

use docassembler_shared::{DocAssemblerError, Result};
use ego_tree::{NodeId, NodeRef};
use scraper::ElementRef;
use scraper::node::Node;

type ParseResult<T> = std::result::Result<T, String>;

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    DescendantOrSelf,
    Child {
        test: NodeTest,
        predicates: Vec<Predicate>,
    },
    SelfNode {
        predicates: Vec<Predicate>,
    },
    Parent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    AnyElement,
    Text,
    AnyNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Attr(String),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    Exists(Operand),
    Equals(Operand, String),
    NotEquals(Operand, String),
    Contains(Operand, String),
    StartsWith(Operand, String),
    Not(Box<Predicate>),
}

impl PathExpr {
    /// Compile an expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let source = expr.trim();
        let fail = |msg: String| DocAssemblerError::selector(source, msg);

        if source.is_empty() {
            return Err(fail("empty expression".into()));
        }

        let segments = split_segments(source).map_err(fail)?;
        let absolute = segments.first().is_some_and(|s| s.is_empty());
        let body = if absolute { &segments[1..] } else { &segments[..] };

        // A lone `/` addresses the document root.
        if absolute && body.len() == 1 && body[0].is_empty() {
            return Ok(Self {
                source: source.to_string(),
                absolute,
                steps: Vec::new(),
            });
        }

        let mut steps = Vec::with_capacity(body.len());
        for (i, segment) in body.iter().enumerate() {
            if segment.is_empty() {
                if i + 1 == body.len() {
                    return Err(fail("expression ends with `/`".into()));
                }
                if matches!(steps.last(), Some(Step::DescendantOrSelf)) {
                    return Err(fail("unexpected `///`".into()));
                }
                steps.push(Step::DescendantOrSelf);
                continue;
            }
            steps.push(parse_step(segment).map_err(fail)?);
        }

        Ok(Self {
            source: source.to_string(),
            absolute,
            steps,
        })
    }

    /// The expression text as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against a context node; absolute paths start at the tree root.
    pub fn select<'a>(&self, context: NodeRef<'a, Node>) -> Vec<NodeRef<'a, Node>> {
        let root = tree_root(context);
        let order = document_order(root);
        let mut current = vec![if self.absolute { root } else { context }];

        for step in &self.steps {
            let mut next = Vec::new();
            for node in &current {
                apply_step(step, *node, &mut next);
            }
            current = dedup_in_order(next, &order);
            if current.is_empty() {
                break;
            }
        }

        current
    }

    /// First match in document order.
    pub fn select_first<'a>(&self, context: NodeRef<'a, Node>) -> Option<NodeRef<'a, Node>> {
        self.select(context).into_iter().next()
    }

    /// Matches that are elements.
    pub fn select_elements<'a>(&self, context: NodeRef<'a, Node>) -> Vec<ElementRef<'a>> {
        self.select(context)
            .into_iter()
            .filter_map(ElementRef::wrap)
            .collect()
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Node helpers
// ---------------------------------------------------------------------------

/// Concatenated text of a node and its descendants.
pub fn text_content(node: NodeRef<'_, Node>) -> String {
    node.descendants()
        .filter_map(|n| n.value().as_text().map(|t| &**t))
        .collect()
}

/// Text of a markup fragment with character references resolved the way
/// the HTML parser resolves them in page text.
pub fn decode_text(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let fragment = scraper::Html::parse_fragment(raw);
    text_content(*fragment.root_element())
}

/// Attribute value of an element node.
pub fn attribute<'a>(node: NodeRef<'a, Node>, name: &str) -> Option<&'a str> {
    node.value().as_element()?.attr(name)
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tree_root(node: NodeRef<'_, Node>) -> NodeRef<'_, Node> {
    node.ancestors().last().unwrap_or(node)
}

fn document_order(root: NodeRef<'_, Node>) -> HashMap<NodeId, usize> {
    root.descendants()
        .enumerate()
        .map(|(i, n)| (n.id(), i))
        .collect()
}

fn dedup_in_order<'a>(
    nodes: Vec<NodeRef<'a, Node>>,
    order: &HashMap<NodeId, usize>,
) -> Vec<NodeRef<'a, Node>> {
    let mut seen = HashSet::new();
    let mut unique: Vec<_> = nodes.into_iter().filter(|n| seen.insert(n.id())).collect();
    unique.sort_by_key(|n| order.get(&n.id()).copied().unwrap_or(usize::MAX));
    unique
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn apply_step<'a>(step: &Step, node: NodeRef<'a, Node>, out: &mut Vec<NodeRef<'a, Node>>) {
    match step {
        Step::DescendantOrSelf => out.extend(node.descendants()),
        Step::Parent => out.extend(node.parent()),
        Step::SelfNode { predicates } => out.extend(filter_predicates(vec![node], predicates)),
        Step::Child { test, predicates } => {
            let matched: Vec<_> = node.children().filter(|c| test.matches(*c)).collect();
            out.extend(filter_predicates(matched, predicates));
        }
    }
}

fn filter_predicates<'a>(
    mut nodes: Vec<NodeRef<'a, Node>>,
    predicates: &[Predicate],
) -> Vec<NodeRef<'a, Node>> {
    for predicate in predicates {
        let size = nodes.len();
        nodes = nodes
            .into_iter()
            .enumerate()
            .filter(|(i, n)| predicate.accepts(*n, i + 1, size))
            .map(|(_, n)| n)
            .collect();
    }
    nodes
}

impl NodeTest {
    fn matches(&self, node: NodeRef<'_, Node>) -> bool {
        match self {
            Self::Name(name) => node
                .value()
                .as_element()
                .is_some_and(|e| e.name().eq_ignore_ascii_case(name)),
            Self::AnyElement => node.value().is_element(),
            Self::Text => node.value().is_text(),
            Self::AnyNode => true,
        }
    }
}

impl Operand {
    fn value(&self, node: NodeRef<'_, Node>) -> Option<String> {
        match self {
            Self::Attr(name) => attribute(node, name).map(str::to_string),
            Self::Text => {
                let text = text_content(node);
                Some(text.trim().to_string())
            }
        }
    }
}

impl Predicate {
    fn accepts(&self, node: NodeRef<'_, Node>, position: usize, size: usize) -> bool {
        match self {
            Self::Position(n) => position == *n,
            Self::Last => position == size,
            Self::Exists(Operand::Text) => {
                Operand::Text.value(node).is_some_and(|s| !s.is_empty())
            }
            Self::Exists(op) => op.value(node).is_some(),
            Self::Equals(op, v) => op.value(node).is_some_and(|s| s == *v),
            Self::NotEquals(op, v) => op.value(node).is_some_and(|s| s != *v),
            Self::Contains(op, v) => op.value(node).is_some_and(|s| s.contains(v.as_str())),
            Self::StartsWith(op, v) => op.value(node).is_some_and(|s| s.starts_with(v.as_str())),
            Self::Not(inner) => !inner.accepts(node, position, size),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split on `/` outside predicates and string literals.
fn split_segments(expr: &str) -> ParseResult<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in expr.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced `]`".to_string())?;
            }
            (None, '/') if depth == 0 => {
                segments.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".into());
    }
    if depth != 0 {
        return Err("unclosed predicate".into());
    }
    segments.push(&expr[start..]);
    Ok(segments)
}

fn parse_step(segment: &str) -> ParseResult<Step> {
    let (head, rest) = match segment.find('[') {
        Some(i) => segment.split_at(i),
        None => (segment, ""),
    };
    let predicates = parse_predicates(rest)?;

    let test = match head.trim() {
        "." => return Ok(Step::SelfNode { predicates }),
        ".." if predicates.is_empty() => return Ok(Step::Parent),
        ".." => return Err("predicates on `..` are not supported".into()),
        "*" => NodeTest::AnyElement,
        "text()" => NodeTest::Text,
        "node()" => NodeTest::AnyNode,
        name if is_name(name) => NodeTest::Name(name.to_ascii_lowercase()),
        other => return Err(format!("unsupported step `{other}`")),
    };

    Ok(Step::Child { test, predicates })
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && !s.contains("::")
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

fn parse_predicates(mut rest: &str) -> ParseResult<Vec<Predicate>> {
    let mut predicates = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(predicates);
        }
        if !rest.starts_with('[') {
            return Err(format!("unexpected `{rest}` after step"));
        }
        let close = matching_bracket(rest)?;
        predicates.push(parse_predicate(rest[1..close].trim())?);
        rest = &rest[close + 1..];
    }
}

fn matching_bracket(s: &str) -> ParseResult<usize> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err("unclosed predicate".into())
}

fn parse_predicate(p: &str) -> ParseResult<Predicate> {
    if p.is_empty() {
        return Err("empty predicate".into());
    }
    if let Ok(n) = p.parse::<usize>() {
        return match n {
            0 => Err("positions start at 1".into()),
            n => Ok(Predicate::Position(n)),
        };
    }
    if p == "last()" {
        return Ok(Predicate::Last);
    }
    if let Some(inner) = call_args(p, "not") {
        return Ok(Predicate::Not(Box::new(parse_predicate(inner.trim())?)));
    }
    if let Some(args) = call_args(p, "contains") {
        let (op, literal) = two_args(args)?;
        return Ok(Predicate::Contains(op, literal));
    }
    if let Some(args) = call_args(p, "starts-with") {
        let (op, literal) = two_args(args)?;
        return Ok(Predicate::StartsWith(op, literal));
    }
    if let Some((lhs, rhs)) = split_outside_quotes(p, "!=") {
        return Ok(Predicate::NotEquals(parse_operand(lhs)?, parse_literal(rhs)?));
    }
    if let Some((lhs, rhs)) = split_outside_quotes(p, "=") {
        return Ok(Predicate::Equals(parse_operand(lhs)?, parse_literal(rhs)?));
    }
    Ok(Predicate::Exists(parse_operand(p)?))
}

fn call_args<'s>(p: &'s str, name: &str) -> Option<&'s str> {
    p.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn two_args(args: &str) -> ParseResult<(Operand, String)> {
    let (lhs, rhs) = split_outside_quotes(args, ",")
        .ok_or_else(|| format!("expected two arguments in `{args}`"))?;
    Ok((parse_operand(lhs)?, parse_literal(rhs)?))
}

fn split_outside_quotes<'s>(p: &'s str, op: &str) -> Option<(&'s str, &'s str)> {
    let mut quote: Option<char> = None;
    for (i, c) in p.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if p[i..].starts_with(op) => {
                return Some((p[..i].trim(), p[i + op.len()..].trim()));
            }
            None => {}
        }
    }
    None
}

fn parse_operand(s: &str) -> ParseResult<Operand> {
    match s.trim() {
        "." | "text()" => Ok(Operand::Text),
        attr if attr.starts_with('@') && is_name(&attr[1..]) => {
            Ok(Operand::Attr(attr[1..].to_ascii_lowercase()))
        }
        other => Err(format!("unsupported operand `{other}`")),
    }
}

fn parse_literal(s: &str) -> ParseResult<String> {
    let s = s.trim();
    let mut chars = s.chars();
    match (chars.next(), chars.next_back()) {
        (Some(open), Some(close)) if open == close && (open == '\'' || open == '"') => {
            Ok(s[1..s.len() - 1].to_string())
        }
        _ => Err(format!("expected a quoted string, found `{s}`")),
    }
}
