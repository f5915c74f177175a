//! Archive an assembled package tree into a single `.epub` file.

use super::EpubError;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub const MIMETYPE: &[u8] = b"application/epub+zip";

/// Bookkeeping files that may sit in a package tree but never belong in the archive.
const EXCLUDED: [&str; 2] = ["mimetype", "volume.json"];

/// Archive path for a package tree: the directory path with `.epub` appended.
pub fn archive_path(dir: &Path) -> PathBuf {
    let mut name = OsString::from(dir.components().as_path().as_os_str());
    name.push(".epub");
    PathBuf::from(name)
}

/// Pack `dir` into `{dir}.epub`. The mimetype entry comes first and is stored; every
/// other file follows deflated, in sorted path order, with `/` separators.
pub fn pack_directory(dir: &Path) -> Result<PathBuf, EpubError> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let out_path = archive_path(dir);
    let file = File::create(&out_path).map_err(|e| EpubError::Io {
        path: out_path.clone(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE)?;

    for (name, path) in &files {
        let data = fs::read(path).map_err(|e| EpubError::Io {
            path: path.clone(),
            source: e,
        })?;
        zip.start_file(name.as_str(), deflated)?;
        zip.write_all(&data)?;
    }
    zip.finish()?;
    info!(path = %out_path.display(), entries = files.len() + 1, "package archived");
    Ok(out_path)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), EpubError> {
    let entries = fs::read_dir(dir).map_err(|e| EpubError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| EpubError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if EXCLUDED.contains(&name.as_str()) || name.ends_with("/volume.json") {
            continue;
        }
        out.push((name, path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::read::ZipArchive;

    #[test]
    fn mimetype_first_and_stored() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("book");
        fs::create_dir_all(dir.join("OEBPS/Text")).unwrap();
        fs::write(dir.join("mimetype"), MIMETYPE).unwrap();
        fs::write(dir.join("OEBPS/Text/a.xhtml"), "<html/>").unwrap();
        fs::write(dir.join("volume.json"), "{}").unwrap();

        let out = pack_directory(&dir).unwrap();
        assert_eq!(out, tmp.path().join("book.epub"));

        let mut zip = ZipArchive::new(File::open(&out).unwrap()).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert_eq!(names.len(), 2);
        assert!(!names.iter().any(|n| n.ends_with("volume.json")));

        let mut first = zip.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        let mut body = String::new();
        first.read_to_string(&mut body).unwrap();
        assert_eq!(body, "application/epub+zip");
        drop(first);

        let second = zip.by_index(1).unwrap();
        assert_eq!(second.name(), "OEBPS/Text/a.xhtml");
        assert_eq!(second.compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn archive_path_ignores_trailing_separator() {
        assert_eq!(
            archive_path(Path::new("out/第一卷/")),
            PathBuf::from("out/第一卷.epub")
        );
        assert_eq!(
            archive_path(Path::new("out/v1.5")),
            PathBuf::from("out/v1.5.epub")
        );
    }
}
