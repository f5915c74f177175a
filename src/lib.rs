//! bilidown: downloader for bilinovel light novels that repackages each volume as an
//! EPUB (or plain text).

pub mod cache;
pub mod cli;
pub mod config;
pub mod epub;
pub mod formats;
pub mod model;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use epub::{pack_directory, write_volume, EpubError, PackageOptions, PackageStamp};
pub use formats::{write_text, FormatError, OutputFormat};
pub use model::{Chapter, ChapterContent, Novel, Volume};
pub use scraper::{
    open_source, FetchClient, NovelSource, ScraperError, Session, SessionConfig, SourceKind,
};
