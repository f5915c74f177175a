//! Plain-text export of a volume: one `.txt` file per chapter, images dropped.

use crate::epub::clean_name;
use crate::model::Volume;
use scraper::{ElementRef, Html, Node};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const BLOCK_ELEMENTS: [&str; 12] = [
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "section", "hr",
];

/// Output written by the download commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Epub,
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "epub" => Ok(OutputFormat::Epub),
            "text" | "txt" => Ok(OutputFormat::Text),
            _ => Err(format!(
                "Invalid --format value: '{}'. Use epub or text.",
                s
            )),
        }
    }
}

/// Errors from the text writer.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Cannot write: volume title is empty.")]
    EmptyTitle,

    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Chapter body as plain text: paragraphs and line breaks become newlines, images
/// and markup are dropped, blank runs collapse.
pub(crate) fn body_to_plain_text(body: &str) -> String {
    let fragment = Html::parse_fragment(body);
    let mut raw = String::new();
    collect_text(fragment.root_element(), &mut raw);
    let mut out = String::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) => match e.name() {
                "img" | "script" | "style" => {}
                "br" => out.push('\n'),
                name => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let block = BLOCK_ELEMENTS.contains(&name);
                    if block {
                        out.push('\n');
                    }
                    collect_text(child_el, out);
                    if block {
                        out.push('\n');
                    }
                }
            },
            _ => {}
        }
    }
}

/// Write every chapter of `volume` to `output_dir/<clean title>/NNN-<chapter>.txt`,
/// numbered from 1 in volume order. The directory is recreated. Returns its path.
pub fn write_text(volume: &Volume, output_dir: &Path) -> Result<PathBuf, FormatError> {
    if volume.title.trim().is_empty() {
        return Err(FormatError::EmptyTitle);
    }
    let dir = output_dir.join(clean_name(&volume.title));
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| FormatError::Io { path, source }
    };
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
    }
    fs::create_dir_all(&dir).map_err(io_err(&dir))?;

    for (i, chapter) in volume.chapters.iter().enumerate() {
        let path = dir.join(format!("{:03}-{}.txt", i + 1, clean_name(&chapter.title)));
        let mut text = format!("{}\n\n", chapter.title);
        text.push_str(&body_to_plain_text(&chapter.content.html));
        fs::write(&path, text).map_err(io_err(&path))?;
    }
    info!(volume = %volume.title, chapters = volume.chapters.len(), path = %dir.display(), "text written");
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Chapter;
    use tempfile::TempDir;

    fn volume() -> Volume {
        let mut first = Chapter::new(1, 1, 10, "u");
        first.title = "第一章".into();
        first
            .content
            .append_fragment(r#"<p>First paragraph.</p><p><img src="a.jpg" alt="x"/></p><p>Second<br/>line</p>"#);
        let mut second = Chapter::new(1, 1, 11, "u");
        second.title = "第二章: 下".into();
        second.content.append_fragment("<div>Only</div>");
        Volume {
            title: "第一卷".into(),
            chapters: vec![first, second],
            ..Volume::default()
        }
    }

    #[test]
    fn writes_numbered_files_without_markup() {
        let tmp = TempDir::new().unwrap();
        let dir = write_text(&volume(), tmp.path()).unwrap();
        assert_eq!(dir, tmp.path().join("第一卷"));
        let first = fs::read_to_string(dir.join("001-第一章.txt")).unwrap();
        assert_eq!(first, "第一章\n\nFirst paragraph.\nSecond\nline\n");
        assert!(!first.contains('<'));
        assert!(dir.join("002-第二章_ 下.txt").exists());
    }

    #[test]
    fn rewrite_clears_previous_files() {
        let tmp = TempDir::new().unwrap();
        let dir = write_text(&volume(), tmp.path()).unwrap();
        fs::write(dir.join("stale.txt"), "x").unwrap();
        write_text(&volume(), tmp.path()).unwrap();
        assert!(!dir.join("stale.txt").exists());
    }

    #[test]
    fn rejects_empty_title() {
        let tmp = TempDir::new().unwrap();
        let mut v = volume();
        v.title.clear();
        assert!(matches!(write_text(&v, tmp.path()), Err(FormatError::EmptyTitle)));
    }

    #[test]
    fn parse_format_all() {
        assert_eq!("epub".parse::<OutputFormat>().unwrap(), OutputFormat::Epub);
        assert_eq!("TXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("pdf".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn plain_text_of_bare_text() {
        assert_eq!(body_to_plain_text("No tags here."), "No tags here.\n");
        assert_eq!(body_to_plain_text("   \n  "), "");
    }
}
