//! Cover selection for a volume.

use crate::model::{Chapter, Volume};
use crate::scraper::dom;
use crate::scraper::image_extension;

/// Chapter-title words marking an illustration or frontispiece section.
pub const ILLUSTRATION_MARKERS: [&str; 5] = ["插图", "插畫", "插画", "口絵", "口绘"];

/// Cover the package ends up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverOutcome {
    /// No image available; the cover page shows title and authors.
    TitleOnly,
    /// `ext` has no leading dot and `jpeg` is normalized to `jpg`.
    Image { data: Vec<u8>, ext: String },
}

pub fn is_illustration(title: &str) -> bool {
    ILLUSTRATION_MARKERS.iter().any(|m| title.contains(m))
}

/// Pick the cover: the first image of an illustration chapter, then the first image
/// of the first chapter holding any, then the volume's own cover.
pub fn select_cover(volume: &Volume) -> CoverOutcome {
    let picked = volume
        .chapters
        .iter()
        .filter(|ch| is_illustration(&ch.title))
        .find_map(pick_from_chapter)
        .or_else(|| {
            volume
                .chapters
                .iter()
                .filter(|ch| !ch.content.images.is_empty())
                .find_map(pick_from_chapter)
        });
    if let Some((name, data)) = picked {
        return CoverOutcome::Image {
            data: data.to_vec(),
            ext: normalized_ext(name),
        };
    }
    if !volume.cover.is_empty() {
        return CoverOutcome::Image {
            data: volume.cover.clone(),
            ext: normalized_ext(&volume.cover_url),
        };
    }
    CoverOutcome::TitleOnly
}

/// First stored image in HTML order, else the first stored image by filename.
fn pick_from_chapter(chapter: &Chapter) -> Option<(&str, &[u8])> {
    let images = &chapter.content.images;
    if let Ok((_dom, body)) = dom::parse_fragment(&chapter.content.html) {
        for img in dom::images(&body) {
            let Some(src) = dom::image_source(&img) else {
                continue;
            };
            let base = basename(&src);
            let hit = images
                .iter()
                .find(|(name, data)| basename(name) == base && !data.is_empty());
            if let Some((name, data)) = hit {
                return Some((name.as_str(), data.as_slice()));
            }
        }
    }
    images
        .iter()
        .find(|(_, data)| !data.is_empty())
        .map(|(name, data)| (name.as_str(), data.as_slice()))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn normalized_ext(source: &str) -> String {
    let ext = image_extension(source).trim_start_matches('.').to_ascii_lowercase();
    match ext.as_str() {
        "" | "jpeg" => "jpg".to_string(),
        _ => ext,
    }
}

/// Media type for an image extension, with or without the leading dot.
pub fn media_type_for(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "image/jpeg",
    }
}
