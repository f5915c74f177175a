//! CLI parsing and orchestration. Parses args, runs the source adapter, then packages
//! volumes as EPUB or text. Maps errors to exit codes.

use crate::cache::{self, CacheError};
use crate::config::{self, Config, ConfigError};
use crate::epub::{pack_directory, write_volume, EpubError, PackageOptions};
use crate::formats::{write_text, FormatError, OutputFormat};
use crate::model::Volume;
use crate::scraper::{
    open_source, ChapterProgress, NovelSource, ScraperError, Session, SessionConfig, SourceKind,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_OUTPUT_DIR: &str = "./novels";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Cache(#[from] CacheError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Config(_) => 1,
            CliRunError::Scraper(
                ScraperError::UnknownSource { .. } | ScraperError::GlyphMap { .. },
            ) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::Epub(_) | CliRunError::Format(_) | CliRunError::Cache(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "bilidown")]
#[command(about = "Download light novels from bilinovel and package each volume as EPUB")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, concurrency, retry_count, retry_backoff_secs, timeout_secs, page_delay_ms, max_pages, render_timeout_secs, chrome_path, glyph_map, unmapped_glyph, text_only, language) are read from ./bilidown.toml or the user config directory. CLI flags override config."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Print verbose error chain.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log every page and image fetch.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Suppress the chapter progress bar.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a novel or a volume.
    Download {
        #[command(subcommand)]
        target: DownloadTarget,
    },
    /// List the volumes of a novel without fetching chapters.
    List {
        #[arg(short = 'n', long)]
        novel_id: u32,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Pack an assembled package directory into an .epub next to it.
    Pack {
        #[arg(short = 'd', long)]
        dir_path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum DownloadTarget {
    /// Download every volume of a novel.
    Novel {
        #[arg(short = 'n', long)]
        novel_id: u32,

        #[command(flatten)]
        fetch: FetchArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Download a single volume.
    Volume {
        #[arg(short = 'n', long)]
        novel_id: u32,

        #[arg(short = 'v', long)]
        volume_id: u32,

        #[command(flatten)]
        fetch: FetchArgs,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// Flags that shape the download session.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct FetchArgs {
    /// Site to read from.
    #[arg(long, default_value = "bilinovel", value_parser = parse_source)]
    pub source: SourceKind,

    /// Maximum requests in flight (overrides config; default 10).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// JSON glyph table for the substituted font (overrides config).
    #[arg(long)]
    pub glyph_map: Option<PathBuf>,

    /// Chromium executable used for rendering (overrides config).
    #[arg(long)]
    pub chrome: Option<PathBuf>,

    /// Drop images from chapter content instead of downloading them.
    #[arg(long)]
    pub text_only: bool,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Output directory. Default: config output_dir, else ./novels.
    #[arg(short = 'o', long)]
    pub output_path: Option<PathBuf>,

    /// Output format: epub or text.
    #[arg(long, default_value = "epub", value_parser = parse_format)]
    pub format: OutputFormat,

    /// Refetch even when a cached copy of the volume exists.
    #[arg(long)]
    pub no_cache: bool,
}

fn parse_source(s: &str) -> Result<SourceKind, String> {
    s.parse::<SourceKind>().map_err(|e| e.to_string())
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}

/// Session settings: config values overridden by present flags.
fn session_config(config: &Config, fetch: &FetchArgs) -> SessionConfig {
    let mut session = config.session_config();
    if let Some(n) = fetch.concurrency {
        session.concurrency = n.max(1);
    }
    if let Some(ua) = &fetch.user_agent {
        session.user_agent = Some(ua.clone());
    }
    if let Some(path) = &fetch.glyph_map {
        session.glyph_map = Some(path.clone());
    }
    if let Some(path) = &fetch.chrome {
        session.chrome_path = Some(path.clone());
    }
    if fetch.text_only {
        session.text_only = true;
    }
    session
}

fn output_dir(config: &Config, output: &OutputArgs) -> PathBuf {
    output
        .output_path
        .clone()
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

async fn open(
    config: &Config,
    fetch: &FetchArgs,
    progress: Option<&Arc<ProgressBar>>,
) -> Result<Box<dyn NovelSource>, CliRunError> {
    let mut session = Session::open(session_config(config, fetch)).await?;
    if let Some(bar) = progress {
        session = session.with_progress(chapter_progress(bar.clone()));
    }
    Ok(open_source(fetch.source, session))
}

/// Bar over the chapters of the volume being fetched. Hidden under `--quiet`.
fn progress_bar(quiet: bool) -> Arc<ProgressBar> {
    if quiet {
        return Arc::new(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    Arc::new(bar)
}

fn chapter_progress(bar: Arc<ProgressBar>) -> ChapterProgress {
    Arc::new(move |done: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
        bar.set_message(format!("Fetching chapter {}/{}", done, total));
    })
}

/// Close `source`, then return `result`. A failed run keeps its own error; a close
/// failure is reported only when the run succeeded.
async fn finish<T>(
    source: Box<dyn NovelSource>,
    result: Result<T, CliRunError>,
) -> Result<T, CliRunError> {
    let closed = source.close().await;
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "session close failed");
            }
            Err(e)
        }
    }
}

/// Print the volumes of a novel in catalog order.
async fn list(source: &dyn NovelSource, novel_id: u32) -> Result<(), CliRunError> {
    let novel = source.get_novel(novel_id, true).await?;
    println!("{} ({})", novel.title, novel.authors.join(", "));
    for volume in &novel.volumes {
        println!("{:>3}  {:>6}  {}", volume.series_index, volume.id, volume.title);
    }
    Ok(())
}

/// The volume from the cache when allowed and present, else fetched and cached.
async fn acquire_volume(
    source: &dyn NovelSource,
    novel_id: u32,
    volume_id: u32,
    dir: &Path,
    no_cache: bool,
) -> Result<Volume, CliRunError> {
    if !no_cache {
        if let Some(volume) = cache::load_volume(dir, novel_id, volume_id)? {
            info!(novel_id, volume_id, title = %volume.title, "using cached volume");
            return Ok(volume);
        }
    }
    let volume = source.get_volume(novel_id, volume_id, false).await?;
    cache::save_volume(dir, &volume)?;
    Ok(volume)
}

fn write_output(
    source: &dyn NovelSource,
    volume: &Volume,
    dir: &Path,
    format: OutputFormat,
    package: &PackageOptions,
) -> Result<PathBuf, CliRunError> {
    let path = match format {
        OutputFormat::Epub => write_volume(
            volume,
            dir,
            source.style_css(),
            &source.extra_files(),
            package,
        )?,
        OutputFormat::Text => write_text(volume, dir)?,
    };
    Ok(path)
}

async fn download(
    source: &dyn NovelSource,
    novel_id: u32,
    volume_ids: &[u32],
    output: &OutputArgs,
    config: &Config,
    progress: &ProgressBar,
) -> Result<(), CliRunError> {
    let dir = output_dir(config, output);
    let package = config.package_options();
    for &volume_id in volume_ids {
        progress.reset();
        progress.enable_steady_tick(Duration::from_millis(80));
        let volume = acquire_volume(source, novel_id, volume_id, &dir, output.no_cache).await;
        progress.finish_and_clear();
        let volume = volume?;
        let path = write_output(source, &volume, &dir, output.format, &package)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}

/// Read the catalog without chapters, then download each volume in catalog order.
async fn download_novel(
    source: &dyn NovelSource,
    novel_id: u32,
    output: &OutputArgs,
    config: &Config,
    progress: &ProgressBar,
) -> Result<(), CliRunError> {
    let novel = source.get_novel(novel_id, true).await?;
    info!(title = %novel.title, volumes = novel.volumes.len(), "novel catalog read");
    let ids: Vec<u32> = novel.volumes.iter().map(|v| v.id).collect();
    download(source, novel_id, &ids, output, config, progress).await
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub async fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config()?.unwrap_or_default();

    match &args.command {
        Command::Pack { dir_path } => {
            if !dir_path.is_dir() {
                return Err(CliRunError::InvalidInput(format!(
                    "Cannot pack: {} is not a directory.",
                    dir_path.display()
                )));
            }
            let path = pack_directory(dir_path)?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        }
        Command::List { novel_id, fetch } => {
            let source = open(&config, fetch, None).await?;
            let result = list(source.as_ref(), *novel_id).await;
            finish(source, result).await
        }
        Command::Download {
            target:
                DownloadTarget::Volume {
                    novel_id,
                    volume_id,
                    fetch,
                    output,
                },
        } => {
            let progress = progress_bar(args.quiet);
            let source = open(&config, fetch, Some(&progress)).await?;
            let result = download(
                source.as_ref(),
                *novel_id,
                &[*volume_id],
                output,
                &config,
                &progress,
            )
            .await;
            finish(source, result).await
        }
        Command::Download {
            target:
                DownloadTarget::Novel {
                    novel_id,
                    fetch,
                    output,
                },
        } => {
            let progress = progress_bar(args.quiet);
            let source = open(&config, fetch, Some(&progress)).await?;
            let result =
                download_novel(source.as_ref(), *novel_id, output, &config, &progress).await;
            finish(source, result).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::UnmappedGlyph;

    #[test]
    fn parses_download_volume() {
        let args = Args::try_parse_from([
            "bilidown", "download", "volume", "-n", "2013", "-v", "77", "--text-only", "-o",
            "out", "--format", "txt",
        ])
        .unwrap();
        match args.command {
            Command::Download {
                target:
                    DownloadTarget::Volume {
                        novel_id,
                        volume_id,
                        fetch,
                        output,
                    },
            } => {
                assert_eq!((novel_id, volume_id), (2013, 77));
                assert!(fetch.text_only);
                assert_eq!(fetch.source, SourceKind::Bilinovel);
                assert_eq!(output.output_path, Some(PathBuf::from("out")));
                assert_eq!(output.format, OutputFormat::Text);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["bilidown", "list", "-n", "1", "--verbose", "--debug"]).unwrap();
        assert!(args.verbose && args.debug);
        assert!(!args.quiet);
    }

    #[test]
    fn chapter_progress_tracks_latest_volume() {
        let bar = progress_bar(true);
        let report = chapter_progress(bar.clone());
        report(1, 4);
        report(3, 4);
        assert_eq!((bar.position(), bar.length()), (3, Some(4)));
        bar.reset();
        report(1, 2);
        assert_eq!((bar.position(), bar.length()), (1, Some(2)));
    }

    #[test]
    fn rejects_unknown_source() {
        let err = Args::try_parse_from(["bilidown", "list", "-n", "1", "--source", "other"]);
        assert!(err.is_err());
    }

    #[test]
    fn flags_override_config() {
        let config: Config = toml::from_str(
            r#"
            concurrency = 4
            user_agent = "FromConfig/1.0"
            unmapped_glyph = "keep"
            "#,
        )
        .unwrap();
        let fetch = FetchArgs {
            concurrency: Some(2),
            text_only: true,
            ..FetchArgs::default()
        };
        let session = session_config(&config, &fetch);
        assert_eq!(session.concurrency, 2);
        assert_eq!(session.user_agent.as_deref(), Some("FromConfig/1.0"));
        assert_eq!(session.unmapped_glyph, UnmappedGlyph::Keep);
        assert!(session.text_only);
    }

    #[test]
    fn output_dir_precedence() {
        let config: Config = toml::from_str(r#"output_dir = "cfg""#).unwrap();
        let mut output = OutputArgs::default();
        assert_eq!(output_dir(&config, &output), PathBuf::from("cfg"));
        output.output_path = Some(PathBuf::from("flag"));
        assert_eq!(output_dir(&config, &output), PathBuf::from("flag"));
        assert_eq!(
            output_dir(&Config::default(), &OutputArgs::default()),
            PathBuf::from(DEFAULT_OUTPUT_DIR)
        );
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Scraper(ScraperError::UnknownSource { name: "x".into() }).exit_code(),
            1
        );
        assert_eq!(
            CliRunError::Scraper(ScraperError::VolumeNotFound {
                novel_id: 1,
                volume_id: 2
            })
            .exit_code(),
            2
        );
        assert_eq!(CliRunError::Epub(EpubError::EmptyTitle).exit_code(), 3);
        assert_eq!(CliRunError::Format(FormatError::EmptyTitle).exit_code(), 3);
    }
}
