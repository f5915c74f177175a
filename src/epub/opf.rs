//! Package documents: the root descriptor, NCX, and the XHTML pages.

use super::EpubError;
use crate::model::{ManifestItem, Volume};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Manifest in insertion order with unique ids.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    items: Vec<ManifestItem>,
    ids: HashSet<String>,
}

impl ManifestBuilder {
    pub fn push(&mut self, item: ManifestItem) -> Result<(), EpubError> {
        if !self.ids.insert(item.id.clone()) {
            return Err(EpubError::DuplicateManifestId { id: item.id });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn items(&self) -> &[ManifestItem] {
        &self.items
    }

    /// Ids of the document entries, in manifest order.
    pub fn spine(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| item.media_type == XHTML_MEDIA_TYPE)
            .map(|item| item.id.as_str())
            .collect()
    }
}

/// Metadata written to the root descriptor.
pub struct OpfMetadata<'a> {
    pub volume: &'a Volume,
    pub identifier: &'a str,
    pub language: &'a str,
    pub modified: DateTime<Utc>,
    pub has_cover_image: bool,
}

pub fn render_opf(meta: &OpfMetadata<'_>, manifest: &ManifestBuilder) -> String {
    let volume = meta.volume;
    let mut metadata = String::new();
    metadata.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&volume.title)
    ));
    metadata.push_str(&format!(
        "    <dc:identifier id=\"book-id\">urn:uuid:{}</dc:identifier>\n",
        xml_escape(meta.identifier)
    ));
    metadata.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(meta.language)
    ));
    if !volume.description.is_empty() {
        metadata.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            xml_escape(&volume.description)
        ));
    }
    for author in &volume.authors {
        metadata.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            xml_escape(author)
        ));
    }
    if meta.has_cover_image {
        metadata.push_str("    <meta name=\"cover\" content=\"cover\"/>\n");
    }
    metadata.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        meta.modified.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    if !volume.novel_title.is_empty() {
        metadata.push_str(&format!(
            "    <meta name=\"calibre:series\" content=\"{}\"/>\n",
            xml_escape(&volume.novel_title)
        ));
        metadata.push_str(&format!(
            "    <meta name=\"calibre:series_index\" content=\"{}\"/>\n",
            volume.series_index
        ));
    }

    let mut items = String::new();
    for item in manifest.items() {
        let properties = item
            .properties
            .as_deref()
            .map(|p| format!(" properties=\"{}\"", xml_escape(p)))
            .unwrap_or_default();
        items.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
            xml_escape(&item.id),
            xml_escape(&item.href),
            xml_escape(&item.media_type),
            properties
        ));
    }

    let mut spine = String::new();
    for id in manifest.spine() {
        spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", xml_escape(id)));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
{}  </metadata>
  <manifest>
{}  </manifest>
  <spine toc="ncx">
{}  </spine>
</package>
"#,
        metadata, items, spine
    )
}

/// Entry of the navigation map; `href` is relative to the package root descriptor.
pub struct NavEntry {
    pub label: String,
    pub href: String,
}

pub fn render_ncx(identifier: &str, title: &str, entries: &[NavEntry]) -> String {
    let mut nav_points = String::new();
    for (i, entry) in entries.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{}" playOrder="{}">
      <navLabel><text>{}</text></navLabel>
      <content src="{}"/>
    </navPoint>
"#,
            i + 1,
            i + 1,
            xml_escape(&entry.label),
            xml_escape(&entry.href)
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="urn:uuid:{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(identifier),
        xml_escape(title),
        nav_points
    )
}

/// XHTML page wrapping `body`, which must already be well-formed markup.
pub fn render_page(title: &str, language: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="../Styles/style.css"/>
</head>
<body>
<div>
{body}
</div>
</body>
</html>
"#,
        lang = xml_escape(language),
        title = xml_escape(title),
        body = body
    )
}

pub fn chapter_body(title: &str, html: &str) -> String {
    format!("<h1>{}</h1>\n{}", xml_escape(title), html)
}

/// Contents page body; `entries` hrefs are relative to the Text directory.
pub fn contents_body(label: &str, entries: &[NavEntry]) -> String {
    let mut body = format!(
        "<h1>{}</h1>\n<nav epub:type=\"toc\" id=\"toc\">\n<ol>\n",
        xml_escape(label)
    );
    for entry in entries {
        body.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            xml_escape(&entry.href),
            xml_escape(&entry.label)
        ));
    }
    body.push_str("</ol>\n</nav>");
    body
}

pub fn cover_image_body(href: &str, alt: &str) -> String {
    format!(
        r#"<div style="text-align: center;">
  <img src="{}" alt="{}" style="max-width: 100%; height: auto;"/>
</div>"#,
        xml_escape(href),
        xml_escape(alt)
    )
}

pub fn title_only_body(title: &str, authors: &[String]) -> String {
    format!(
        r#"<div style="text-align: center; margin-top: 3em;">
  <h1>{}</h1>
  <p style="text-indent: 0;">{}</p>
</div>"#,
        xml_escape(title),
        xml_escape(&authors.join(" / "))
    )
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
