//! Mutable DOM operations on chapter pages.
//!
//! Pages are parsed into an rcdom tree so decorations can be removed, glyphs remapped,
//! and image references rewritten in place. Output is serialized as XHTML: void
//! elements self-close, text and attributes are escaped, and scripts, style blocks,
//! comments and inline event handlers are dropped.

use super::error::ScraperError;
use super::glyph::{remap_text, GlyphMapper, UnmappedGlyph};
use html5ever::interface::{Attribute, QualName};
use html5ever::parse_document;
use html5ever::tendril::{format_tendril, StrTendril, TendrilSink};
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Raw-text and inert elements. Their text is not entity-decoded when the output is
/// parsed again, so it cannot be written as escaped XHTML.
const DROPPED_ELEMENTS: [&str; 4] = ["script", "noscript", "style", "template"];

/// Attributes that carry the real image location on lazily loaded images, in
/// preference order.
pub const IMAGE_SOURCE_ATTRS: [&str; 2] = ["data-src", "src"];

/// Simple selector understood by the DOM helpers: `#id`, `.class`, or a tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMatch<'a> {
    Id(&'a str),
    Class(&'a str),
    Tag(&'a str),
}

impl<'a> NodeMatch<'a> {
    pub fn parse(selector: &'a str) -> Self {
        if let Some(id) = selector.strip_prefix('#') {
            NodeMatch::Id(id)
        } else if let Some(class) = selector.strip_prefix('.') {
            NodeMatch::Class(class)
        } else {
            NodeMatch::Tag(selector)
        }
    }

    pub fn matches(&self, node: &Handle) -> bool {
        match self {
            NodeMatch::Tag(tag) => node_name(node).is_some_and(|n| n.eq_ignore_ascii_case(tag)),
            NodeMatch::Id(id) => get_attr(node, "id").is_some_and(|v| v == *id),
            NodeMatch::Class(class) => get_attr(node, "class")
                .is_some_and(|v| v.split_ascii_whitespace().any(|c| c == *class)),
        }
    }
}

pub fn parse_html(html: &str, url: &str) -> Result<RcDom, ScraperError> {
    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())
        .map_err(|e| ScraperError::parse("page", url, e.to_string()))
}

/// Parse a fragment and return its tree together with the `<body>` holding it.
pub fn parse_fragment(html: &str) -> Result<(RcDom, Handle), ScraperError> {
    let dom = parse_html(html, "fragment")?;
    let body = find_first(&dom.document, &NodeMatch::Tag("body"))
        .ok_or_else(|| ScraperError::parse("fragment", "fragment", "no body element"))?;
    Ok((dom, body))
}

pub fn node_name(node: &Handle) -> Option<&str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

pub fn get_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == attr_name)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

/// Set `attr_name` to `value`, or remove it when `value` is None.
pub fn set_attr(node: &Handle, attr_name: &str, value: Option<&str>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        match value {
            None => attrs.retain(|a| &*a.name.local != attr_name),
            Some(value) => {
                if let Some(existing) = attrs.iter_mut().find(|a| &*a.name.local == attr_name) {
                    existing.value = StrTendril::from_slice(value);
                } else {
                    attrs.push(Attribute {
                        name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                        value: format_tendril!("{}", value),
                    });
                }
            }
        }
    }
}

/// First node in document order matching `pattern`.
pub fn find_first(node: &Handle, pattern: &NodeMatch<'_>) -> Option<Handle> {
    if pattern.matches(node) {
        return Some(node.clone());
    }
    node.children
        .borrow()
        .iter()
        .find_map(|child| find_first(child, pattern))
}

/// Every node matching `pattern`, in document order.
pub fn find_all(node: &Handle, pattern: &NodeMatch<'_>) -> Vec<Handle> {
    let mut found = Vec::new();
    collect(node, pattern, &mut found);
    found
}

fn collect(node: &Handle, pattern: &NodeMatch<'_>, found: &mut Vec<Handle>) {
    if pattern.matches(node) {
        found.push(node.clone());
    }
    for child in node.children.borrow().iter() {
        collect(child, pattern, found);
    }
}

/// Remove every descendant of `node` matching any of `patterns`, with its subtree.
pub fn strip(node: &Handle, patterns: &[NodeMatch<'_>]) {
    node.children
        .borrow_mut()
        .retain(|child| !patterns.iter().any(|p| p.matches(child)));
    let children: Vec<Handle> = node.children.borrow().clone();
    for child in &children {
        strip(child, patterns);
    }
}

/// Concatenated, trimmed text of `node`'s subtree.
pub fn text_content(node: &Handle) -> String {
    fn walk(node: &Handle, out: &mut String) {
        if let NodeData::Text { contents } = &node.data {
            out.push_str(&contents.borrow());
        }
        for child in node.children.borrow().iter() {
            walk(child, out);
        }
    }
    let mut out = String::new();
    walk(node, &mut out);
    out.trim().to_string()
}

/// Remap every text node under `node` through `mapper`.
pub fn remap_subtree(node: &Handle, mapper: &dyn GlyphMapper, policy: UnmappedGlyph) {
    if let NodeData::Text { contents } = &node.data {
        let remapped = remap_text(&contents.borrow(), mapper, policy);
        *contents.borrow_mut() = StrTendril::from_slice(&remapped);
    }
    for child in node.children.borrow().iter() {
        remap_subtree(child, mapper, policy);
    }
}

/// Source URL of an image node: the lazy-load attribute first, then `src`.
/// Blank values are ignored.
pub fn image_source(node: &Handle) -> Option<String> {
    IMAGE_SOURCE_ATTRS
        .iter()
        .filter_map(|attr| get_attr(node, attr))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Every `<img>` under `node`, in document order.
pub fn images(node: &Handle) -> Vec<Handle> {
    find_all(node, &NodeMatch::Tag("img"))
}

/// Detach `target` from its parent.
pub fn remove_node(target: &Handle) {
    let parent = target.parent.take();
    if let Some(parent) = parent.as_ref().and_then(|weak| weak.upgrade()) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !std::rc::Rc::ptr_eq(child, target));
    }
}

/// XHTML serialization of `node`'s children.
pub fn inner_xhtml(node: &Handle) -> String {
    let mut out = String::new();
    for child in node.children.borrow().iter() {
        write_node(child, &mut out);
    }
    out
}

/// XHTML serialization of `node` itself.
pub fn outer_xhtml(node: &Handle) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => escape_into(&contents.borrow(), false, out),
        NodeData::Element { name, attrs, .. } => {
            let tag = name.local.as_ref();
            if DROPPED_ELEMENTS.contains(&tag) {
                return;
            }
            out.push('<');
            out.push_str(tag);
            for attr in attrs.borrow().iter() {
                let attr_name = attr.name.local.as_ref();
                if attr_name.starts_with("on") {
                    continue;
                }
                out.push(' ');
                out.push_str(attr_name);
                out.push_str("=\"");
                escape_into(&attr.value, true, out);
                out.push('"');
            }
            if VOID_ELEMENTS.contains(&tag) {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in node.children.borrow().iter() {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        NodeData::Document => {
            for child in node.children.borrow().iter() {
                write_node(child, out);
            }
        }
        _ => {}
    }
}

fn escape_into(s: &str, attribute: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&#160;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(html: &str) -> (RcDom, Handle) {
        parse_fragment(html).unwrap()
    }

    #[test]
    fn strip_removes_matching_subtrees() {
        let (_dom, body) = body_of(
            r#"<div id="acontent"><p>a</p><div class="cgo">ad<p>x</p></div><center>nav</center><p>b</p><ins class="adsbygoogle google-auto-placed"></ins></div>"#,
        );
        strip(
            &body,
            &[
                NodeMatch::parse(".cgo"),
                NodeMatch::parse("center"),
                NodeMatch::parse(".google-auto-placed"),
            ],
        );
        assert_eq!(inner_xhtml(&body), r#"<div id="acontent"><p>a</p><p>b</p></div>"#);
    }

    #[test]
    fn serializer_emits_xhtml() {
        let (_dom, body) = body_of(
            "<p onclick=\"x()\">a&nbsp;&amp;<br>b</p><img src=\"a.jpg\" alt='1\"2'><script>bad()</script><!-- c -->",
        );
        assert_eq!(
            inner_xhtml(&body),
            r#"<p>a&#160;&amp;<br/>b</p><img src="a.jpg" alt="1&quot;2"/>"#
        );
    }

    #[test]
    fn style_blocks_are_dropped_and_output_is_stable() {
        let html = "<style>a > b</style><p>x &gt; y</p><style>#acontent > p{color:red}</style>";
        let (_dom, body) = body_of(html);
        let once = inner_xhtml(&body);
        assert_eq!(once, "<p>x &gt; y</p>");

        let (_dom, again) = body_of(&once);
        assert_eq!(inner_xhtml(&again), once);
    }

    #[test]
    fn image_source_prefers_lazy_attribute() {
        let (_dom, body) = body_of(
            r#"<img class="imagecontent lazyload" data-src="https://img.test/1.jpg" src="/loading.gif"><img src="https://img.test/2.png"><img data-src="  ">"#,
        );
        let sources: Vec<Option<String>> = images(&body).iter().map(image_source).collect();
        assert_eq!(
            sources,
            vec![
                Some("https://img.test/1.jpg".to_string()),
                Some("https://img.test/2.png".to_string()),
                None
            ]
        );
    }

    #[test]
    fn set_attr_adds_replaces_and_removes() {
        let (_dom, body) = body_of(r#"<img class="lazy" data-src="u">"#);
        let img = &images(&body)[0];
        set_attr(img, "src", Some("a.jpg"));
        set_attr(img, "data-src", None);
        set_attr(img, "class", Some("pic"));
        assert_eq!(outer_xhtml(img), r#"<img class="pic" src="a.jpg"/>"#);
    }

    #[test]
    fn remap_touches_only_text() {
        let (_dom, body) = body_of(r#"<p class="ab">ab<span>b</span></p>"#);
        let swap = |c: char| match c {
            'a' => Some('b'),
            'b' => Some('a'),
            _ => None,
        };
        remap_subtree(&body, &swap, UnmappedGlyph::Drop);
        assert_eq!(inner_xhtml(&body), r#"<p class="ab">ba<span>a</span></p>"#);
    }

    #[test]
    fn find_and_text_by_id() {
        let (dom, _) = body_of(r#"<h1 id="atitle"> 第一章 <small>(1/3)</small></h1>"#);
        let title = find_first(&dom.document, &NodeMatch::parse("#atitle")).unwrap();
        assert_eq!(text_content(&title), "第一章 (1/3)");
    }

    #[test]
    fn remove_node_detaches_from_parent() {
        let (_dom, body) = body_of(r#"<p>a<img src="x">b</p>"#);
        let img = images(&body).remove(0);
        remove_node(&img);
        assert_eq!(inner_xhtml(&body), "<p>ab</p>");
    }
}
