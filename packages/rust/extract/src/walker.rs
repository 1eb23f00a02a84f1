//! Recursive tree walker.
//!
//! Depth-first, two-phase (open/close) visit of an HTML subtree that writes
//! text, structure and formatting spans into a [`RichTextBuilder`].
//!
//! Paragraph and line breaks are requested lazily through the `want_*` flags
//! and only materialise when the next text arrives, so consecutive closing
//! tags collapse into a single break. Walker state is a plain value threaded
//! through the recursion; nothing is shared between walks.

use std::sync::LazyLock;

use ego_tree::NodeRef;
use regex::Regex;
use scraper::node::{Element, Node};
use url::Url;

use docassembler_shared::{Align, FormattingSpan, SpanKind};

use crate::richtext::{ListKind, ParagraphStyle, RichTextBuilder};

/// Options for one walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions<'u> {
    /// Skip `div` elements that are direct children of the walk root.
    pub ignore_divs: bool,
    /// Base for resolving relative image URLs.
    pub base_url: Option<&'u Url>,
}

#[derive(Debug, Clone, Copy, Default)]
struct WalkState {
    want_new_paragraph: bool,
    want_new_line: bool,
    in_highlight: bool,
    /// Offset of the most recent paragraph or line start since a style opened.
    latest_block_start: Option<usize>,
    in_list: bool,
}

/// Walk `root` and its subtree into `out`.
pub fn walk(root: NodeRef<'_, Node>, out: &mut RichTextBuilder, options: &WalkOptions<'_>) {
    visit(root, WalkState::default(), out, options, true);
}

fn visit(
    node: NodeRef<'_, Node>,
    mut state: WalkState,
    out: &mut RichTextBuilder,
    options: &WalkOptions<'_>,
    is_root: bool,
) -> WalkState {
    match node.value() {
        Node::Element(element) => visit_element(node, element, state, out, options, is_root),
        Node::Text(text) => {
            trim_and_add_text(text, &mut state, out);
            state
        }
        Node::Comment(_) => state,
        Node::Document | Node::Fragment => visit_children(node, state, out, options, is_root),
        Node::Doctype(_) => {
            out.issue("Unhandled node type doctype");
            state
        }
        Node::ProcessingInstruction(_) => {
            out.issue("Unhandled node type processing instruction");
            state
        }
    }
}

fn visit_children(
    node: NodeRef<'_, Node>,
    mut state: WalkState,
    out: &mut RichTextBuilder,
    options: &WalkOptions<'_>,
    is_root: bool,
) -> WalkState {
    for child in node.children() {
        if is_root && options.ignore_divs && is_element_named(child, "div") {
            continue;
        }
        state = visit(child, state, out, options, false);
    }
    state
}

fn visit_element(
    node: NodeRef<'_, Node>,
    element: &Element,
    mut state: WalkState,
    out: &mut RichTextBuilder,
    options: &WalkOptions<'_>,
    is_root: bool,
) -> WalkState {
    let name = element.name();
    let mut opened_list = false;
    let mut style: Option<(SpanKind, usize)> = None;

    // ---- open ----
    match name {
        "h1" => new_paragraph(ParagraphStyle::Heading(1), &mut state, out),
        "h2" => new_paragraph(ParagraphStyle::Heading(2), &mut state, out),
        "h3" | "h4" | "h5" | "h6" => new_paragraph(ParagraphStyle::Heading(3), &mut state, out),
        "blockquote" => new_paragraph(ParagraphStyle::Quote, &mut state, out),
        "p" | "br" => {
            if element.attr("class").is_some_and(|c| c.contains("highlighted")) {
                state.in_highlight = true;
            }
        }
        "ul" | "ol" => {
            if !state.in_list && has_list_items(node) {
                new_paragraph(ParagraphStyle::Normal, &mut state, out);
                out.list_start(if name == "ol" {
                    ListKind::Numbered
                } else {
                    ListKind::Bulleted
                });
                state.in_list = true;
                opened_list = true;
            }
        }
        "b" | "strong" | "i" | "em" | "u" | "sub" | "sup" => {
            let kind = match name {
                "b" | "strong" => SpanKind::Bold,
                "i" | "em" => SpanKind::Italic,
                "u" => SpanKind::Underline,
                "sub" => SpanKind::Subscript,
                _ => SpanKind::Superscript,
            };
            style = Some((kind, out.cursor()));
            state.latest_block_start = None;
        }
        "img" => {
            if let Some(src) = element.attr("src").map(str::trim).filter(|s| !s.is_empty()) {
                new_paragraph(ParagraphStyle::Normal, &mut state, out);
                out.image(resolve_url(src, options.base_url), Align::Inline);
                state.want_new_paragraph = true;
            }
        }
        "iframe" => {
            let src = element.attr("src").unwrap_or_default();
            match video_reference(src) {
                Some(reference) => {
                    new_paragraph(ParagraphStyle::Heading(3), &mut state, out);
                    out.append_text("View Video");
                    new_paragraph(ParagraphStyle::Normal, &mut state, out);
                    out.link(&reference, &reference);
                    state.want_new_paragraph = true;
                }
                None => {
                    tracing::debug!(src, "unrecognised embedded media");
                    out.issue(format!("Unrecognised embedded media: {src}"));
                }
            }
            return state;
        }
        "del" | "s" | "strike" => return state,
        // Recognised, but raw script and style text is never content.
        "script" | "style" | "noscript" | "template" | "head" => return state,
        "table" => out.issue("Table found, manual review needed"),
        "a" | "span" | "li" | "div" | "tbody" | "thead" | "tfoot" | "tr" | "td" | "th"
        | "caption" | "address" | "section" | "article" | "header" | "footer" | "main"
        | "aside" | "nav" | "figure" | "figcaption" | "font" | "small" | "center" | "abbr"
        | "cite" | "html" | "body" => {}
        other => {
            tracing::debug!(tag = other, "unhandled tag");
            out.issue(format!("Unhandled tag {other}"));
        }
    }

    state = visit_children(node, state, out, options, is_root);

    // ---- close ----
    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" => {
            state.want_new_paragraph = true;
        }
        "ul" | "ol" if opened_list => {
            out.list_end();
            state.in_list = false;
            state.want_new_paragraph = true;
        }
        "br" | "li" | "div" | "p" => {
            state.want_new_line = true;
            state.in_highlight = false;
        }
        _ => {}
    }

    if let Some((kind, start)) = style {
        close_span(kind, start, &state, out);
    }

    state
}

/// Record a style span ending at the cursor.
///
/// When a block boundary follows the nominal start with only whitespace in
/// between, the span starts at the boundary instead.
fn close_span(kind: SpanKind, start: usize, state: &WalkState, out: &mut RichTextBuilder) {
    let end = out.cursor();
    let start = match state.latest_block_start {
        Some(boundary)
            if start < boundary
                && boundary <= end
                && out.text()[start..boundary].trim().is_empty() =>
        {
            boundary
        }
        _ => start,
    };

    out.push_span(FormattingSpan::new(start, end, kind));
    if state.in_highlight {
        out.push_span(FormattingSpan::new(start, end, SpanKind::Highlight));
    }
}

// ---------------------------------------------------------------------------
// Text insertion
// ---------------------------------------------------------------------------

fn new_paragraph(style: ParagraphStyle, state: &mut WalkState, out: &mut RichTextBuilder) {
    let at = out.new_paragraph(style);
    state.latest_block_start = Some(at);
    state.want_new_paragraph = false;
    state.want_new_line = false;
}

fn add_text(text: &str, state: &mut WalkState, out: &mut RichTextBuilder) {
    if state.want_new_paragraph {
        new_paragraph(ParagraphStyle::Normal, state, out);
    } else if state.want_new_line {
        let at = out.line_break();
        state.latest_block_start = Some(at);
        state.want_new_line = false;
    }
    out.append_text(text);
}

/// Normalise control whitespace, then keep a single separating space on
/// either side where the source had whitespace.
fn trim_and_add_text(raw: &str, state: &mut WalkState, out: &mut RichTextBuilder) {
    let text: String = raw
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .collect();

    let trimmed_start = text.trim_start();
    if trimmed_start.is_empty() {
        return;
    }

    let mut piece = String::with_capacity(text.len());
    let at_line_start = out.text().is_empty() || out.text().ends_with(['\n', ' ']);
    if trimmed_start.len() < text.len()
        && !state.want_new_line
        && !state.want_new_paragraph
        && !at_line_start
    {
        piece.push(' ');
    }

    let core = trimmed_start.trim_end();
    piece.push_str(core);
    if core.len() < trimmed_start.len() {
        piece.push(' ');
    }

    add_text(&piece, state, out);
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_element_named(node: NodeRef<'_, Node>, name: &str) -> bool {
    node.value().as_element().is_some_and(|e| e.name() == name)
}

fn has_list_items(node: NodeRef<'_, Node>) -> bool {
    node.children().any(|c| is_element_named(c, "li"))
}

fn resolve_url(reference: &str, base: Option<&Url>) -> String {
    match Url::parse(reference) {
        Ok(url) => url.into(),
        Err(_) => base
            .and_then(|b| b.join(reference).ok())
            .map_or_else(|| reference.to_string(), Into::into),
    }
}

/// Canonical watch URL for an embedded video player URL.
pub fn video_reference(src: &str) -> Option<String> {
    static YOUTUBE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"^(?:https?:)?//(?:www\.)?(?:youtube(?:-nocookie)?\.com/embed/|youtu\.be/)(?<id>[A-Za-z0-9_-]+)",
        )
        .expect("valid regex")
    });
    static VIMEO_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:https?:)?//player\.vimeo\.com/video/(?<id>\d+)").expect("valid regex")
    });

    let src = src.trim();
    if let Some(caps) = YOUTUBE_RE.captures(src) {
        return Some(format!("https://www.youtube.com/watch?v={}", &caps["id"]));
    }
    if let Some(caps) = VIMEO_RE.captures(src) {
        return Some(format!("https://vimeo.com/{}", &caps["id"]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::richtext::{ContentEvent, RichText};
    use scraper::Html;

    fn walk_fragment(html: &str) -> RichText {
        walk_with(html, WalkOptions::default())
    }

    fn walk_with(html: &str, options: WalkOptions<'_>) -> RichText {
        let fragment = Html::parse_fragment(html);
        let mut out = RichTextBuilder::new();
        out.new_paragraph(ParagraphStyle::Normal);
        walk(*fragment.root_element(), &mut out, &options);
        out.finish()
    }

    fn list_starts(rt: &RichText) -> usize {
        rt.events
            .iter()
            .filter(|e| matches!(e, ContentEvent::ListStart { .. }))
            .count()
    }

    #[test]
    fn paragraphs_collapse_into_single_breaks() {
        let rt = walk_fragment("<p>One</p><p>Two</p><div><p>Three</p></div>");
        assert_eq!(rt.text, "One\nTwo\nThree");
        assert!(rt.issues.is_empty());
    }

    #[test]
    fn whitespace_between_inline_runs_is_kept_once() {
        let rt = walk_fragment("<p>Take  <b>two</b>\n tablets\tdaily</p>");
        assert_eq!(rt.text, "Take two tablets daily");
        let bold: Vec<_> = rt.spans_of(SpanKind::Bold).map(|s| rt.span_text(s)).collect();
        assert_eq!(bold, vec!["two"]);
    }

    #[test]
    fn headings_open_styled_paragraphs() {
        let rt = walk_fragment("<h2>Causes</h2><p>Viruses.</p><h4>More</h4>text");
        let paragraphs = rt.paragraphs();
        assert!(paragraphs.contains(&(&ParagraphStyle::Heading(2), "Causes")));
        assert!(paragraphs.contains(&(&ParagraphStyle::Normal, "Viruses.")));
        assert!(paragraphs.contains(&(&ParagraphStyle::Heading(3), "More")));
        assert_eq!(rt.headings(), vec!["Causes", "More"]);
    }

    #[test]
    fn empty_list_is_a_no_op() {
        let rt = walk_fragment("<ul></ul><p>After</p>");
        assert_eq!(list_starts(&rt), 0);
        assert!(rt.issues.is_empty());
        assert_eq!(rt.text, "After");
    }

    #[test]
    fn lists_open_once_and_ignore_nesting() {
        let rt = walk_fragment(
            "<ol><li>First</li><li>Second<ul><li>Inner</li></ul></li></ol><p>Done</p>",
        );
        assert_eq!(list_starts(&rt), 1);
        assert!(rt.events.contains(&ContentEvent::ListStart {
            at: 0,
            kind: ListKind::Numbered
        }));
        assert!(rt.events.iter().any(|e| matches!(e, ContentEvent::ListEnd { .. })));
        assert!(rt.text.starts_with("First\nSecond"));
        assert!(rt.text.ends_with("Done"));
    }

    #[test]
    fn youtube_iframe_becomes_view_video_heading() {
        let rt = walk_fragment(
            r#"<p>Watch:</p><iframe src="https://www.youtube.com/embed/abc123?rel=0"></iframe>"#,
        );
        assert_eq!(rt.headings(), vec!["View Video"]);
        assert_eq!(rt.links(), vec!["https://www.youtube.com/watch?v=abc123"]);
        assert!(rt.issues.is_empty());
    }

    #[test]
    fn unknown_iframe_is_an_issue_without_heading() {
        let rt = walk_fragment(r#"<iframe src="https://maps.example.com/embed?q=1"></iframe>"#);
        assert!(rt.headings().is_empty());
        assert_eq!(rt.issues.len(), 1);
        assert!(rt.issues[0].description.contains("maps.example.com"));
    }

    #[test]
    fn video_reference_shapes() {
        assert_eq!(
            video_reference("//www.youtube-nocookie.com/embed/X_y-9").as_deref(),
            Some("https://www.youtube.com/watch?v=X_y-9")
        );
        assert_eq!(
            video_reference("https://youtu.be/abc").as_deref(),
            Some("https://www.youtube.com/watch?v=abc")
        );
        assert_eq!(
            video_reference("https://player.vimeo.com/video/42?title=0").as_deref(),
            Some("https://vimeo.com/42")
        );
        assert_eq!(video_reference("https://example.com/video/1"), None);
    }

    #[test]
    fn struck_text_is_skipped() {
        let rt = walk_fragment("<p>Keep <del>old dose</del><s>x</s>new dose</p>");
        assert_eq!(rt.text, "Keep new dose");
    }

    #[test]
    fn tables_are_flagged_but_walked() {
        let rt = walk_fragment("<table><tr><td>Cell</td></tr></table>");
        assert_eq!(rt.text, "Cell");
        assert_eq!(rt.issues.len(), 1);
        assert!(rt.issues[0].description.contains("manual review"));
    }

    #[test]
    fn unhandled_tags_are_issues_and_children_still_visited() {
        let rt = walk_fragment("<p>Before <marquee>moving</marquee> after</p>");
        assert_eq!(rt.text, "Before moving after");
        assert_eq!(rt.issues.len(), 1);
        assert_eq!(rt.issues[0].description, "Unhandled tag marquee");
        assert_eq!(rt.issues[0].location, "Before ".len());
    }

    #[test]
    fn images_resolve_and_force_paragraph() {
        let base = Url::parse("https://example.org/kids/asthma").unwrap();
        let rt = walk_with(
            r#"<p>Intro<img src="/img/inhaler.png">Spacer use</p>"#,
            WalkOptions {
                ignore_divs: false,
                base_url: Some(&base),
            },
        );
        assert_eq!(rt.images(), vec!["https://example.org/img/inhaler.png"]);
        assert_eq!(rt.text, "Intro\n\nSpacer use");
    }

    #[test]
    fn ignore_divs_skips_top_level_divs_only() {
        let html = "<section><p>Keep</p><div>Drop</div></section>";
        let fragment = Html::parse_fragment(html);
        let section = fragment
            .root_element()
            .children()
            .find(|c| is_element_named(*c, "section"))
            .unwrap();

        let mut out = RichTextBuilder::new();
        walk(
            section,
            &mut out,
            &WalkOptions {
                ignore_divs: true,
                base_url: None,
            },
        );
        assert_eq!(out.finish().text, "Keep");
    }

    #[test]
    fn spans_end_at_close_cursor() {
        let rt = walk_fragment("<p>a <i>b <u>c</u></i> d<sup>2</sup></p>");
        for span in &rt.spans {
            assert!(span.start <= span.end);
        }
        let italic: Vec<_> = rt.spans_of(SpanKind::Italic).map(|s| rt.span_text(s)).collect();
        assert_eq!(italic, vec!["b c"]);
        let sup: Vec<_> = rt.script_spans().map(|s| rt.span_text(s)).collect();
        assert_eq!(sup, vec!["2"]);
    }

    #[test]
    fn span_start_clamps_to_following_block_boundary() {
        // Bold opens at the end of "First", then a paragraph break precedes its text.
        let rt = walk_fragment("<p>First</p><b><p>Second</p></b>");
        assert_eq!(rt.text, "First\nSecond");
        let bold: Vec<_> = rt.spans_of(SpanKind::Bold).map(|s| rt.span_text(s)).collect();
        assert_eq!(bold, vec!["Second"]);
    }

    #[test]
    fn span_keeps_start_when_text_precedes_boundary() {
        let rt = walk_fragment("<b>Bold<br>still bold</b>");
        let bold: Vec<_> = rt.spans_of(SpanKind::Bold).map(|s| rt.span_text(s)).collect();
        assert_eq!(bold, vec!["Bold\nstill bold"]);
    }

    #[test]
    fn highlighted_paragraph_duplicates_spans() {
        let rt = walk_fragment(r#"<p class="highlighted box"><strong>Call 111</strong> now</p><p><b>later</b></p>"#);
        let highlight: Vec<_> = rt
            .spans_of(SpanKind::Highlight)
            .map(|s| rt.span_text(s))
            .collect();
        assert_eq!(highlight, vec!["Call 111"]);
        assert_eq!(rt.spans_of(SpanKind::Bold).count(), 2);
    }

    #[test]
    fn walk_is_deterministic() {
        let html = "<h1>T</h1><ul><li><b>a</b></li><li>b</li></ul><table></table>";
        assert_eq!(walk_fragment(html), walk_fragment(html));
    }
}
