//! Declarative field extraction from parsed pages.
//!
//! Adapters describe what they want as a list of [FieldSpec]s (name, selector, and
//! whether the text, an attribute, or every match is wanted) and get a [Fields] map
//! back. Missing optional fields read as empty; missing required ones fail with a
//! parse error naming the field.

use super::error::ScraperError;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

/// What to read from the elements a selector matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Trimmed text of the first match.
    Text,
    /// Attribute of the first match.
    Attr(&'static str),
    /// Trimmed text of every match, in document order.
    AllText,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub selector: &'static str,
    pub field: Field,
    pub required: bool,
}

impl FieldSpec {
    pub const fn text(name: &'static str, selector: &'static str) -> Self {
        Self {
            name,
            selector,
            field: Field::Text,
            required: false,
        }
    }

    pub const fn attr(name: &'static str, selector: &'static str, attr: &'static str) -> Self {
        Self {
            name,
            selector,
            field: Field::Attr(attr),
            required: false,
        }
    }

    pub const fn all_text(name: &'static str, selector: &'static str) -> Self {
        Self {
            name,
            selector,
            field: Field::AllText,
            required: false,
        }
    }

    pub const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }
}

/// Extracted values keyed by field name.
#[derive(Debug, Default, Clone)]
pub struct Fields {
    values: HashMap<&'static str, Vec<String>>,
}

impl Fields {
    /// First value of `name`, or "" when nothing matched.
    pub fn text(&self, name: &str) -> &str {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Every value of `name`, in document order.
    pub fn list(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Anchor text and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub href: String,
}

pub(crate) fn parse_selector(s: &str) -> Result<Selector, ScraperError> {
    Selector::parse(s).map_err(|e| ScraperError::Selector {
        selector: s.to_string(),
        reason: e.to_string(),
    })
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Apply `specs` to `doc`. `url` only labels errors.
pub fn extract(doc: &Html, url: &str, specs: &[FieldSpec]) -> Result<Fields, ScraperError> {
    let mut fields = Fields::default();
    for spec in specs {
        let selector = parse_selector(spec.selector)?;
        let mut matches = doc.select(&selector);
        let values: Vec<String> = match spec.field {
            Field::Text => matches.next().map(|el| element_text(&el)).into_iter().collect(),
            Field::Attr(attr) => matches
                .next()
                .and_then(|el| el.value().attr(attr).map(|v| v.trim().to_string()))
                .into_iter()
                .collect(),
            Field::AllText => matches.map(|el| element_text(&el)).collect(),
        };
        if spec.required && values.iter().all(|v| v.is_empty()) {
            return Err(ScraperError::parse(
                "page",
                url,
                format!("missing {} ({})", spec.name, spec.selector),
            ));
        }
        fields.values.insert(spec.name, values);
    }
    Ok(fields)
}

/// Every link matched by `selector`, in document order. Anchors without an href are
/// skipped.
pub fn extract_links(doc: &Html, selector: &str) -> Result<Vec<Link>, ScraperError> {
    let selector = parse_selector(selector)?;
    Ok(doc
        .select(&selector)
        .filter_map(|a| {
            a.value().attr("href").map(|href| Link {
                text: element_text(&a),
                href: href.trim().to_string(),
            })
        })
        .collect())
}

/// Numeric capture `group` of `pattern` in `haystack`.
pub fn capture_id(pattern: &Regex, haystack: &str, group: usize) -> Option<u32> {
    pattern
        .captures(haystack)
        .and_then(|c| c.get(group))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <h1 class="book-title"> 一个标题 </h1>
        <div class="book-summary"><content>简介</content></div>
        <div class="authorname"><a href="/a/1">作者</a></div>
        <div class="illname"><a href="/a/2">画师</a></div>
        <img class="book-cover" src="https://img.test/c.jpg">
        <ul>
          <li class="chapter-li jsChapter"><a href="/novel/7/100.html">第一章</a></li>
          <li class="chapter-li jsChapter"><a href="/novel/7/101.html">第二章</a></li>
          <li class="chapter-li jsChapter"><a>无链接</a></li>
        </ul>
    </body></html>"#;

    #[test]
    fn extracts_text_attr_and_lists() {
        let doc = Html::parse_document(PAGE);
        let fields = extract(
            &doc,
            "https://example.test",
            &[
                FieldSpec::text("title", ".book-title").required(),
                FieldSpec::text("summary", ".book-summary>content"),
                FieldSpec::all_text("authors", ".authorname>a, .illname>a"),
                FieldSpec::attr("cover", ".book-cover", "src"),
                FieldSpec::text("missing", ".nope"),
            ],
        )
        .unwrap();
        assert_eq!(fields.text("title"), "一个标题");
        assert_eq!(fields.text("summary"), "简介");
        assert_eq!(fields.list("authors"), ["作者", "画师"]);
        assert_eq!(fields.text("cover"), "https://img.test/c.jpg");
        assert_eq!(fields.text("missing"), "");
        assert!(fields.list("missing").is_empty());
    }

    #[test]
    fn missing_required_field_is_parse_error() {
        let doc = Html::parse_document("<html><body></body></html>");
        let err = extract(&doc, "u", &[FieldSpec::text("title", ".book-title").required()])
            .unwrap_err();
        assert!(matches!(err, ScraperError::Parse { .. }));
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn links_keep_document_order_and_skip_missing_href() {
        let doc = Html::parse_document(PAGE);
        let links = extract_links(&doc, ".chapter-li.jsChapter a").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].text, "第一章");
        assert_eq!(links[1].href, "/novel/7/101.html");
    }

    #[test]
    fn capture_id_reads_numeric_group() {
        let re = Regex::new(r"/novel/(\d+)/(\d+)\.html").unwrap();
        assert_eq!(capture_id(&re, "/novel/7/101.html", 2), Some(101));
        assert_eq!(capture_id(&re, "/novel/7/vol_3.html", 2), None);
    }

    #[test]
    fn invalid_selector_is_reported() {
        assert!(matches!(
            parse_selector("[[["),
            Err(ScraperError::Selector { .. })
        ));
    }
}
