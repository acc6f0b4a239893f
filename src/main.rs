use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use popsync::{
    ArchiveLayout, ArchiveStatus, ArchiveStore, ContentFetcher, EpisodeArchiver, FeedFetcher,
    FileStationClient, JsonDirectoryStore, LocalDirectoryStore, MetadataExtractor, NoopReporter,
    ProgressEvent, ProgressReporter, ReqwestClient, SharedProgressReporter, SyncConfig,
    SyncController, SyncReport, WordPressFetcher,
};

// Emoji with fallback for terminals without Unicode support
static RADIO: Emoji<'_, '_> = Emoji("📻 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static UPLOAD: Emoji<'_, '_> = Emoji("📤 ", "[^] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

const DEFAULT_WORDPRESS_SITE: &str =
    "https://public-api.wordpress.com/rest/v1.2/sites/popcastingpop.com";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceKind {
    /// WordPress.com REST posts API, paginated
    Wordpress,
    /// Podcast RSS feed, read as a single page
    Rss,
}

/// Harvest new episodes, extract their playlists and archive their audio
#[derive(Parser, Debug)]
#[command(name = "popsync")]
#[command(about = "Harvest new episodes, extract their playlists and archive their audio")]
#[command(version)]
struct Args {
    /// Where entries are read from
    #[arg(long, value_enum, default_value = "wordpress", env = "POPSYNC_SOURCE")]
    source: SourceKind,

    /// WordPress.com site endpoint
    #[arg(long, default_value = DEFAULT_WORDPRESS_SITE, env = "POPSYNC_WORDPRESS_SITE")]
    wordpress_site: String,

    /// RSS feed URL or path to a local RSS file (with --source rss)
    #[arg(long, env = "POPSYNC_FEED")]
    feed: Option<String>,

    /// Directory holding one JSON record per episode
    #[arg(long, default_value = "episodes", env = "POPSYNC_STORE_DIR")]
    store_dir: PathBuf,

    /// Archive into a local directory instead of a Synology NAS
    #[arg(long, env = "POPSYNC_ARCHIVE_DIR", conflicts_with = "synology_host")]
    archive_dir: Option<PathBuf>,

    /// Synology NAS host name
    #[arg(long, env = "SYNOLOGY_HOST")]
    synology_host: Option<String>,

    #[arg(long, default_value = "5000", env = "SYNOLOGY_PORT")]
    synology_port: u16,

    #[arg(long, env = "SYNOLOGY_USER")]
    synology_user: Option<String>,

    #[arg(long, env = "SYNOLOGY_PASS", hide_env_values = true)]
    synology_pass: Option<String>,

    /// Accept self-signed NAS certificates
    #[arg(long)]
    insecure: bool,

    /// Folder that receives the audio files
    #[arg(long, default_value = "/popcasting_marilyn/mp3", env = "POPSYNC_ARCHIVE_PREFIX")]
    archive_prefix: String,

    /// Show name as it precedes the episode number in titles
    #[arg(long, default_value = "Popcasting", env = "POPSYNC_SHOW")]
    show: String,

    /// Directory for temporary downloads (default: system temp dir)
    #[arg(long, env = "POPSYNC_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Maximum number of pages to fetch
    #[arg(long, default_value = "10")]
    max_pages: u32,

    /// Entries per page
    #[arg(long, default_value = "20")]
    page_size: u32,

    /// Maximum number of episodes processed concurrently
    #[arg(short = 'c', long, default_value = "4")]
    workers: usize,

    /// Attempts per network operation
    #[arg(long, default_value = "3")]
    attempts: u32,

    /// Per-attempt limit for audio download and upload, in seconds
    #[arg(long, default_value = "900")]
    transfer_timeout: u64,

    /// List candidates and their playlists without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn config(&self) -> SyncConfig {
        SyncConfig {
            show: self.show.clone(),
            page_size: self.page_size,
            max_pages: self.max_pages,
            workers: self.workers,
            dry_run: self.dry_run,
            layout: ArchiveLayout {
                prefix: self.archive_prefix.clone(),
                show: self.show.to_lowercase(),
                ..ArchiveLayout::default()
            },
            ..SyncConfig::default()
        }
        .with_attempts(self.attempts)
        .with_transfer_timeout(Duration::from_secs(self.transfer_timeout))
    }
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<u32, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, sequence: u32) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(bar) = bars.get(&sequence) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(sequence, bar.clone());
        bar
    }

    fn finish_bar(&self, sequence: u32) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = bars.remove(&sequence) {
            bar.finish_and_clear();
        }
    }

    fn clear_bars(&self) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for (_, bar) in bars.drain() {
            bar.finish_and_clear();
        }
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingPage { page } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching page {}", page.to_string().cyan()));
            }

            ProgressEvent::PageFetched {
                page,
                entries,
                candidates,
            } => {
                self.main_bar.set_message(format!(
                    "{SEARCH}Page {} • {} entries, {} to process",
                    page.to_string().cyan(),
                    entries.to_string().cyan(),
                    candidates.to_string().yellow()
                ));
            }

            ProgressEvent::CandidatesCollected { boundary, total } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}Last known #{} • {} episodes to process",
                    boundary.to_string().bold().green(),
                    total.to_string().yellow()
                ));
            }

            ProgressEvent::EpisodeStarting {
                sequence,
                title,
                index,
                total,
                ..
            } => {
                let bar = self.get_or_create_bar(sequence);
                bar.set_position(0);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (index + 1).to_string().cyan(),
                    total.to_string().cyan(),
                    truncate_title(&title, 40)
                ));
            }

            ProgressEvent::DownloadStarting {
                sequence,
                content_length,
            } => {
                let bar = self.get_or_create_bar(sequence);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
            }

            ProgressEvent::DownloadProgress {
                sequence,
                bytes_downloaded,
                total_bytes,
            } => {
                let bar = self.get_or_create_bar(sequence);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::Uploading {
                sequence,
                remote_path,
            } => {
                let bar = self.get_or_create_bar(sequence);
                bar.set_message(format!("{UPLOAD}{}", truncate_title(&remote_path, 40)));
            }

            ProgressEvent::EpisodeArchived { sequence, .. }
            | ProgressEvent::EpisodeAlreadyArchived { sequence } => {
                let bar = self.get_or_create_bar(sequence);
                bar.set_message(format!("{SUCCESS}#{}", sequence.to_string().green()));
                self.finish_bar(sequence);
            }

            ProgressEvent::EpisodeFailed { sequence, error } => {
                let bar = self.get_or_create_bar(sequence);
                bar.abandon_with_message(format!(
                    "{FAILURE}#{} - {}",
                    sequence.to_string().red(),
                    truncate_title(&error, 60).red()
                ));
                self.bars
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&sequence);
            }

            ProgressEvent::SyncCompleted {
                succeeded,
                failed,
                skipped,
                cancelled,
            } => {
                self.clear_bars();
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} succeeded, {} skipped, {} cancelled, {} failed",
                    "Sync complete:".bold().green(),
                    succeeded.to_string().green().bold(),
                    skipped.to_string().yellow(),
                    cancelled.to_string().yellow(),
                    if failed > 0 {
                        failed.to_string().red().bold()
                    } else {
                        failed.to_string().green()
                    }
                );
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("popsync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_dry_run(report: &SyncReport) {
    println!("\n{}", "Would process:".bold());
    for outcome in &report.outcomes {
        let episode = &outcome.episode;
        println!(
            "  {} {} ({} tracks, {} links)",
            format!("#{}", episode.sequence).cyan(),
            episode.title,
            episode.playlist.len(),
            episode.extra_links.len()
        );
        for track in &episode.playlist {
            println!("      {:>2}. {} · {}", track.position, track.artist, track.title.dimmed());
        }
        for warning in &outcome.warnings {
            println!("      {}", warning.to_string().yellow());
        }
    }
}

fn print_failures(report: &SyncReport) {
    if report.failed == 0 && report.page_errors.is_empty() {
        return;
    }

    println!("\n{}", "Failed:".red().bold());
    for (page, error) in &report.page_errors {
        println!(
            "  {}{} - {}",
            CROSS,
            format!("page {page}").yellow(),
            error.to_string().dimmed()
        );
    }
    for (outcome, error) in report.failures() {
        println!(
            "  {}{} - {}",
            CROSS,
            outcome.episode.label().yellow(),
            error.to_string().dimmed()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            RADIO,
            "popsync".bold().magenta(),
            "- Episode Archiver".dimmed()
        );
    }

    let config = args.config();

    let client = ReqwestClient::new(config.connect_timeout).context("Failed to build HTTP client")?;

    let fetcher: Arc<dyn ContentFetcher> = match args.source {
        SourceKind::Wordpress => Arc::new(
            WordPressFetcher::new(
                client.clone(),
                &args.wordpress_site,
                config.page_size,
                config.fetch_retry,
            )
            .context("Invalid WordPress site URL")?,
        ),
        SourceKind::Rss => {
            let Some(feed) = args.feed.as_deref() else {
                bail!("--feed is required with --source rss");
            };
            Arc::new(FeedFetcher::new(client.clone(), feed, config.fetch_retry))
        }
    };

    let store = Arc::new(
        JsonDirectoryStore::open(&args.store_dir)
            .await
            .with_context(|| format!("Failed to open store {}", args.store_dir.display()))?,
    );

    let scratch_root = args
        .scratch_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("popsync"));

    let reporter: SharedProgressReporter = if args.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let mut file_station = None;
    let archiver: Arc<dyn EpisodeArchiver> = if let Some(dir) = &args.archive_dir {
        Arc::new(
            ArchiveStore::new(
                client.clone(),
                LocalDirectoryStore::new(dir),
                config.layout.clone(),
                &scratch_root,
            )
            .with_retries(config.archive_retries)
            .with_reporter(reporter.clone()),
        )
    } else {
        let (Some(host), Some(user), Some(pass)) = (
            args.synology_host.as_deref(),
            args.synology_user.as_deref(),
            args.synology_pass.as_deref(),
        ) else {
            bail!("Either --archive-dir or SYNOLOGY_HOST, SYNOLOGY_USER and SYNOLOGY_PASS must be set");
        };

        let nas_http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(args.insecure)
            .build()
            .context("Failed to build NAS HTTP client")?;
        let nas = Arc::new(
            FileStationClient::new(
                nas_http,
                &FileStationClient::base_url_for(host, args.synology_port),
                user,
                pass,
            )
            .context("Invalid Synology host")?,
        );
        file_station = Some(nas.clone());

        Arc::new(
            ArchiveStore::new(client.clone(), nas, config.layout.clone(), &scratch_root)
                .with_retries(config.archive_retries)
                .with_reporter(reporter.clone()),
        )
    };

    let extractor = MetadataExtractor::new(&config.show).context("Invalid show name")?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted: finishing episodes in progress...");
            on_ctrl_c.cancel();
        }
    });

    let controller = SyncController::new(fetcher, store, archiver, extractor, config.sync_options())
        .with_reporter(reporter)
        .with_cancellation(cancel);

    let result = controller.sync(config.max_pages).await;

    if let Some(nas) = file_station {
        nas.logout().await;
    }

    let report = result.context("Failed to sync episodes")?;

    if !args.quiet {
        if args.dry_run {
            print_dry_run(&report);
        }
        print_failures(&report);

        let archived = report
            .outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(ArchiveStatus::Archived { .. })))
            .count();
        if archived > 0 {
            println!(
                "\n{FOLDER}Archived {} new files to {}\n",
                archived.to_string().green(),
                config.layout.prefix.cyan()
            );
        }
    }

    if report.failed > 0 && report.succeeded == 0 {
        std::process::exit(1);
    }

    Ok(())
}
