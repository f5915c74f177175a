//! EPUB packaging. Writes a fetched [Volume] as a package tree on disk (container,
//! root descriptor, NCX, cover, contents, chapters, images, styles) and archives it.

mod archive;
mod cover;
mod opf;

pub use archive::{archive_path, pack_directory, MIMETYPE};
pub use cover::{is_illustration, media_type_for, select_cover, CoverOutcome, ILLUSTRATION_MARKERS};

use crate::model::{ExtraFile, ManifestItem, Volume};
use crate::scraper::dom;
use chrono::{DateTime, Utc};
use opf::{ManifestBuilder, NavEntry, OpfMetadata, XHTML_MEDIA_TYPE};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from the package assembler. Maps to CLI exit code 3.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: volume title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: volume has no chapters.")]
    NoChapters,

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write EPUB: manifest id {id} is used twice")]
    DuplicateManifestId { id: String },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Language and fixed labels of the generated pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOptions {
    pub language: String,
    pub cover_label: String,
    pub contents_label: String,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_string(),
            cover_label: "封面".to_string(),
            contents_label: "目录".to_string(),
        }
    }
}

/// Identity and timestamp written into the package. Two packages built from the
/// same volume with the same stamp are byte-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageStamp {
    pub identifier: Uuid,
    pub modified: DateTime<Utc>,
}

impl PackageStamp {
    pub fn fresh() -> Self {
        Self {
            identifier: Uuid::new_v4(),
            modified: Utc::now(),
        }
    }
}

/// Replace characters that are invalid in file names (`<>:"/\|?*` and control
/// characters) with `_` and trim surrounding whitespace.
pub fn clean_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Package directory for `volume` under `output_dir`.
pub fn package_dir(output_dir: &Path, volume: &Volume) -> PathBuf {
    output_dir.join(clean_name(&volume.title))
}

/// Assemble `volume` under `output_dir/<clean title>/` and archive it next to that
/// directory. Returns the archive path.
pub fn write_volume(
    volume: &Volume,
    output_dir: &Path,
    style_css: &str,
    extra_files: &[ExtraFile],
    options: &PackageOptions,
) -> Result<PathBuf, EpubError> {
    write_volume_stamped(
        volume,
        output_dir,
        style_css,
        extra_files,
        options,
        &PackageStamp::fresh(),
    )
}

/// [write_volume] with a caller-chosen identity and timestamp.
pub fn write_volume_stamped(
    volume: &Volume,
    output_dir: &Path,
    style_css: &str,
    extra_files: &[ExtraFile],
    options: &PackageOptions,
    stamp: &PackageStamp,
) -> Result<PathBuf, EpubError> {
    validate_volume(volume)?;
    let dir = package_dir(output_dir, volume);
    prepare_dir(&dir)?;
    let oebps = dir.join("OEBPS");
    let lang = options.language.as_str();

    let cover = select_cover(volume);
    let mut manifest = ManifestBuilder::default();
    manifest.push(ManifestItem::new("cover.xhtml", "Text/cover.xhtml", XHTML_MEDIA_TYPE))?;
    manifest.push(
        ManifestItem::new("contents.xhtml", "Text/contents.xhtml", XHTML_MEDIA_TYPE)
            .with_properties("nav"),
    )?;

    let cover_body = match &cover {
        CoverOutcome::Image { data, ext } => {
            let name = format!("cover.{}", ext);
            write_file(&oebps.join("Images").join(&name), data)?;
            manifest.push(
                ManifestItem::new("cover", format!("Images/{}", name), media_type_for(ext))
                    .with_properties("cover-image"),
            )?;
            opf::cover_image_body(&format!("../Images/{}", name), &options.cover_label)
        }
        CoverOutcome::TitleOnly => opf::title_only_body(&volume.title, &volume.authors),
    };
    write_file(
        &oebps.join("Text/cover.xhtml"),
        opf::render_page(&options.cover_label, lang, &cover_body).as_bytes(),
    )?;

    let mut chapter_entries = Vec::with_capacity(volume.chapters.len());
    for (i, chapter) in volume.chapters.iter().enumerate() {
        let stem = format!("chapter-{:03}", i + 1);
        let images = &chapter.content.images;
        for (name, data) in images {
            write_file(&oebps.join("Images").join(&stem).join(name), data)?;
        }
        let html = rewrite_image_paths(&chapter.content.html, &stem, images);
        let page = opf::render_page(&chapter.title, lang, &opf::chapter_body(&chapter.title, &html));
        write_file(&oebps.join("Text").join(format!("{}.xhtml", stem)), page.as_bytes())?;

        manifest.push(ManifestItem::new(
            format!("{}.xhtml", stem),
            format!("Text/{}.xhtml", stem),
            XHTML_MEDIA_TYPE,
        ))?;
        for name in images.keys() {
            manifest.push(ManifestItem::new(
                format!("{}-{}", stem, name),
                format!("Images/{}/{}", stem, name),
                media_type_for(name.rsplit('.').next().unwrap_or_default()),
            ))?;
        }
        debug!(chapter = %chapter.title, images = images.len(), "chapter written");
        chapter_entries.push(NavEntry {
            label: chapter.title.clone(),
            href: format!("{}.xhtml", stem),
        });
    }

    write_file(
        &oebps.join("Text/contents.xhtml"),
        opf::render_page(
            &options.contents_label,
            lang,
            &opf::contents_body(&options.contents_label, &chapter_entries),
        )
        .as_bytes(),
    )?;

    write_file(&oebps.join("Styles/style.css"), style_css.as_bytes())?;
    manifest.push(ManifestItem::new("style", "Styles/style.css", "text/css"))?;
    for extra in extra_files {
        write_file(&oebps.join(&extra.path), &extra.data)?;
        manifest.push(extra.manifest_item.clone())?;
    }

    let identifier = stamp.identifier.to_string();
    let mut nav = vec![
        NavEntry {
            label: options.cover_label.clone(),
            href: "Text/cover.xhtml".to_string(),
        },
        NavEntry {
            label: options.contents_label.clone(),
            href: "Text/contents.xhtml".to_string(),
        },
    ];
    nav.extend(chapter_entries.into_iter().map(|e| NavEntry {
        label: e.label,
        href: format!("Text/{}", e.href),
    }));
    write_file(
        &oebps.join("toc.ncx"),
        opf::render_ncx(&identifier, &volume.title, &nav).as_bytes(),
    )?;
    manifest.push(ManifestItem::new("ncx", "toc.ncx", "application/x-dtbncx+xml"))?;

    let meta = OpfMetadata {
        volume,
        identifier: &identifier,
        language: lang,
        modified: stamp.modified,
        has_cover_image: matches!(cover, CoverOutcome::Image { .. }),
    };
    write_file(
        &oebps.join("content.opf"),
        opf::render_opf(&meta, &manifest).as_bytes(),
    )?;
    write_file(
        &dir.join("META-INF/container.xml"),
        opf::CONTAINER_XML.as_bytes(),
    )?;
    write_file(&dir.join("mimetype"), MIMETYPE)?;

    let archive = pack_directory(&dir)?;
    info!(
        volume = %volume.title,
        chapters = volume.chapters.len(),
        images = volume.image_count(),
        path = %archive.display(),
        "volume packaged"
    );
    Ok(archive)
}

fn validate_volume(volume: &Volume) -> Result<(), EpubError> {
    if volume.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if volume.chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }
    Ok(())
}

/// Remove any previous content at `dir` and recreate it empty.
fn prepare_dir(dir: &Path) -> Result<(), EpubError> {
    let io_err = |source| EpubError::Io {
        path: dir.to_path_buf(),
        source,
    };
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(io_err)?;
    }
    fs::create_dir_all(dir).map_err(io_err)
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), EpubError> {
    let io_err = |source| EpubError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, data).map_err(io_err)
}

/// Point every image stored for the chapter at its package path. The fragment is
/// re-serialized as XHTML.
fn rewrite_image_paths(html: &str, stem: &str, images: &BTreeMap<String, Vec<u8>>) -> String {
    let (_dom, body) = match dom::parse_fragment(html) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "chapter fragment kept as fetched");
            return html.to_string();
        }
    };
    for img in dom::images(&body) {
        let Some(src) = dom::image_source(&img) else {
            continue;
        };
        let name = src.rsplit('/').next().unwrap_or(&src);
        if images.contains_key(name) {
            let href = format!("../Images/{}/{}", stem, name);
            dom::set_attr(&img, "src", Some(&href));
            dom::set_attr(&img, "data-src", None);
        }
    }
    dom::inner_xhtml(&body)
}
