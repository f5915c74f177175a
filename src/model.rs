//! Content model shared by the source adapter, the cache, and the packagers.
//!
//! A [Novel] owns its [Volume]s, a volume owns its [Chapter]s, and a chapter owns its
//! accumulated [ChapterContent]. Image payloads are keyed by their content-addressed
//! filename so identical references collapse to one entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A serialized work: identity, metadata, and its volumes in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Novel {
    pub id: u32,
    pub title: String,
    pub description: String,
    pub authors: Vec<String>,
    pub volumes: Vec<Volume>,
}

/// One packaging unit. `series_index` is the 1-based position of the volume in the
/// novel's catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: u32,
    pub novel_id: u32,
    pub novel_title: String,
    pub series_index: u32,
    pub title: String,
    pub description: String,
    pub authors: Vec<String>,
    pub url: String,
    pub cover_url: String,
    /// Raw cover bytes; empty when no cover was fetched.
    #[serde(with = "base64_bytes", default)]
    pub cover: Vec<u8>,
    pub chapters: Vec<Chapter>,
}

impl Volume {
    /// Total number of images held by all chapters.
    pub fn image_count(&self) -> usize {
        self.chapters.iter().map(|c| c.content.images.len()).sum()
    }
}

/// A chapter of a volume. Its content starts empty and grows page by page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: u32,
    pub novel_id: u32,
    pub volume_id: u32,
    pub title: String,
    pub url: String,
    pub content: ChapterContent,
}

impl Chapter {
    pub fn new(novel_id: u32, volume_id: u32, id: u32, url: impl Into<String>) -> Self {
        Self {
            id,
            novel_id,
            volume_id,
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Chapter body as an XHTML fragment plus the images it references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub html: String,
    #[serde(with = "base64_image_map", default)]
    pub images: BTreeMap<String, Vec<u8>>,
}

impl ChapterContent {
    /// Append one page's fragment after everything fetched so far.
    pub fn append_fragment(&mut self, fragment: &str) {
        self.html.push_str(fragment);
    }

    /// Record image bytes under their content-addressed name. The first payload stored
    /// for a name is kept.
    pub fn insert_image(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.images.entry(name.into()).or_insert(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.html.trim().is_empty() && self.images.is_empty()
    }
}

/// Entry of the package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn new(id: impl Into<String>, href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = Some(properties.into());
        self
    }
}

/// Adapter-supplied file placed in the package (fonts, auxiliary styles).
/// `path` is relative to the package content directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraFile {
    pub path: String,
    pub data: Vec<u8>,
    pub manifest_item: ManifestItem,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_image_map {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        images: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(images.len()))?;
        for (name, bytes) in images {
            map.serialize_entry(name, &STANDARD.encode(bytes))?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(name, data)| {
                STANDARD
                    .decode(data.as_bytes())
                    .map(|bytes| (name, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
