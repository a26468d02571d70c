// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use podcatalog::{
    CatalogStore, ClientHub, Config, Episode, Event, EventReporter, FanoutReporter, Library,
    LogReporter, NoopPlayer, NoopReporter, OriginClient, RemoteServer, ReqwestClient,
    SharedEventReporter, SharedHttpClient, SharedPlayer, StaticNetwork, SyncEngine, SyncError,
    SyncOptions,
};

// Emoji with fallback for terminals without Unicode support
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static BROOM: Emoji<'_, '_> = Emoji("🧹 ", "[-] ");

/// Podcast catalog with origin sync and a remote control server
#[derive(Parser, Debug)]
#[command(name = "podcatalog")]
#[command(version)]
struct Args {
    /// Config file (default: ~/.config/podcatalog/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Library folder, overriding the config
    #[arg(short, long, global = true)]
    library: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve remote control clients and sync on a fixed interval
    Serve,

    /// Poll the origin once and download what is due
    Sync {
        /// Sync even on a metered network
        #[arg(short, long)]
        force: bool,

        /// Maximum number of episodes to download
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Poll, then download just this episode
        #[arg(long, value_name = "IDENT")]
        only: Option<String>,
    },

    /// Print the catalog in display order
    List {
        #[arg(long)]
        json: bool,
    },

    /// Delete finished episodes not marked to keep
    DeleteFinished,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn bars(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_or_create_bar(&self, ident: &str) -> ProgressBar {
        let mut bars = self.bars();

        if let Some(bar) = bars.get(ident) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .map(|style| style.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(ident.to_string(), bar.clone());
        bar
    }

    fn finish(&self) {
        self.main_bar.finish_and_clear();
    }
}

impl EventReporter for IndicatifReporter {
    fn report(&self, event: Event) {
        match event {
            Event::PartialFilesCleanedUp { count } => {
                let _ = self
                    .multi
                    .println(format!("{BROOM}Cleaned up {count} partial downloads"));
            }

            Event::PollStarted => {
                self.main_bar
                    .set_message(format!("{SEARCH}Polling origin for tracks"));
            }

            Event::PollFinished { on_server } => {
                let message = match on_server {
                    Some(count) => format!(
                        "{HEADPHONES}{} tracks on server",
                        count.to_string().cyan()
                    ),
                    None => format!("{FAILURE}{}", "Poll failed".red()),
                };
                self.main_bar.set_message(message);
            }

            Event::DownloadStarting {
                ident,
                index,
                total,
                title,
                ..
            } => {
                let bar = self.get_or_create_bar(&ident);
                bar.set_position(0);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    index.to_string().cyan(),
                    total.to_string().cyan(),
                    truncate_title(&title, 40)
                ));
            }

            Event::DownloadProgress {
                ident,
                bytes_downloaded,
                total_bytes,
            } => {
                let bar = self.get_or_create_bar(&ident);
                bar.set_length(total_bytes);
                bar.set_position(bytes_downloaded);
            }

            Event::DownloadFinished {
                ident,
                expected,
                received,
            } => {
                let Some(bar) = self.bars().remove(&ident) else {
                    return;
                };
                if received == expected {
                    bar.set_position(received);
                    bar.finish_with_message(format!("{SUCCESS}{}", ident.green()));
                } else {
                    bar.abandon_with_message(format!(
                        "{FAILURE}{} - {} of {} bytes",
                        ident.red(),
                        received,
                        expected
                    ));
                }
            }

            Event::Notice { message } => {
                let _ = self.multi.println(message.yellow().to_string());
            }

            _ => {}
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let head: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// `h:mm:ss`, or `m:ss` under an hour
fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

fn format_when(when: i64) -> String {
    DateTime::from_timestamp(when, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn init_logging(command: &Commands) {
    let default_filter = match command {
        Commands::Serve => "info,podcatalog=debug",
        _ => "warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_engine(
    config: &Config,
    store: Arc<CatalogStore>,
    player: SharedPlayer,
) -> Result<SyncEngine> {
    let endpoint = config
        .origin
        .endpoint
        .clone()
        .context("origin.endpoint is not configured")?;
    let http: SharedHttpClient = Arc::new(
        ReqwestClient::new(config.poll_timeout(), config.download_read_timeout())
            .context("Failed to create HTTP client")?,
    );

    Ok(SyncEngine::new(
        store,
        OriginClient::new(http, endpoint, config.origin.secret.clone()),
        player,
        Arc::new(StaticNetwork {
            metered: config.sync.metered,
        }),
        config.sync_policy(),
    ))
}

async fn serve(config: &Config, library: Library) -> Result<()> {
    let hub = ClientHub::shared();
    let reporter = FanoutReporter::new()
        .with(hub.clone())
        .with(LogReporter::shared())
        .shared();
    let store = Arc::new(CatalogStore::load(library, reporter).context("Failed to load library")?);
    info!(
        "Loaded {} tracks, {} remaining",
        store.len(),
        format_ms(store.remaining_seconds() * 1000)
    );

    let player = NoopPlayer::shared();
    let engine = Arc::new(build_engine(config, store.clone(), player.clone())?);
    let server = Arc::new(RemoteServer::new(
        config.remote_settings(),
        hub,
        engine.clone(),
        player,
    ));
    let listener = server.bind().await?;
    let server_task = tokio::spawn(server.serve(listener));

    let mut ticker = tokio::time::interval(config.sync_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    match engine.run(&SyncOptions::default()).await {
                        Ok(result) => debug!("Scheduled sync: {:?}", result),
                        Err(SyncError::AlreadyRunning) => debug!("Sync already running"),
                        Err(e) => warn!("Scheduled sync failed: {}", e),
                    }
                });
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
        }
    }

    server_task.abort();
    store.save_snapshot().context("Failed to write snapshot")?;
    Ok(())
}

async fn sync(
    config: &Config,
    library: Library,
    options: SyncOptions,
    quiet: bool,
) -> Result<()> {
    let progress = (!quiet).then(|| Arc::new(IndicatifReporter::new()));
    let reporter: SharedEventReporter = match &progress {
        Some(progress) => progress.clone(),
        None => NoopReporter::shared(),
    };

    let store = Arc::new(CatalogStore::load(library, reporter).context("Failed to load library")?);
    let engine = build_engine(config, store.clone(), NoopPlayer::shared())?;
    let result = engine.run(&options).await.context("Sync failed");
    if let Some(progress) = &progress {
        progress.finish();
    }
    let result = result?;
    store.save_snapshot().context("Failed to write snapshot")?;

    if quiet {
        return Ok(());
    }

    if result.skipped {
        println!(
            "{}",
            "Network is metered, nothing synced (use --force)".yellow()
        );
        return Ok(());
    }

    let on_server = result
        .on_server
        .map_or_else(|| "?".to_string(), |n| n.to_string());
    println!(
        "\n{PARTY}{} {} new, {} of {} downloaded, {} on server",
        "Sync complete:".bold().green(),
        result.new_episodes.to_string().yellow(),
        result.downloaded.len().to_string().green().bold(),
        result.attempted.to_string().cyan(),
        on_server
    );

    if result.attempted > 0 && result.downloaded.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn list(library: Library, json: bool) -> Result<()> {
    let store = CatalogStore::load(library, NoopReporter::shared())
        .context("Failed to load library")?;
    let episodes: Vec<Episode> = store.episodes();

    if json {
        println!("{}", serde_json::to_string_pretty(&episodes)?);
        return Ok(());
    }

    let selected = store.selected().map(|e| e.ident);
    for episode in &episodes {
        let cursor = if selected.as_deref() == Some(episode.ident.as_str()) {
            ">".green().bold()
        } else {
            " ".normal()
        };
        let state = if !episode.downloaded {
            "remote".dimmed()
        } else if episode.is_finished() {
            "done".green()
        } else {
            "".normal()
        };
        println!(
            "{} {:<6} {} {} / {} {} {} {} {}",
            cursor,
            episode.priority.cyan(),
            truncate_title(&episode.title, 50).bold(),
            format_ms(episode.current_ms),
            format_ms(episode.duration_ms),
            episode.artist.dimmed(),
            format_when(episode.downloaded_at).dimmed(),
            episode.emoji.as_deref().unwrap_or(""),
            state
        );
    }

    println!(
        "\n{HEADPHONES}{} tracks, {} remaining",
        episodes.len().to_string().cyan(),
        format_ms(store.remaining_seconds() * 1000).cyan()
    );
    Ok(())
}

fn delete_finished(library: Library, quiet: bool) -> Result<()> {
    let store = CatalogStore::load(library, NoopReporter::shared())
        .context("Failed to load library")?;
    let count = store
        .delete_finished()
        .context("Failed to delete finished tracks")?;
    if !quiet {
        println!("{BROOM}Deleted {} finished tracks", count.to_string().cyan());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.command);

    let mut config = Config::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(dir) = args.library {
        config.library.dir = dir;
    }
    let library = Library::open(&config.library.dir).with_context(|| {
        format!(
            "Failed to open library {}",
            config.library.dir.display()
        )
    })?;

    match args.command {
        Commands::Serve => serve(&config, library).await,
        Commands::Sync { force, limit, only } => {
            let options = SyncOptions {
                force,
                limit,
                only_ident: only,
                then_start: false,
            };
            sync(&config, library, options, args.quiet).await
        }
        Commands::List { json } => list(library, json),
        Commands::DeleteFinished => delete_finished(library, args.quiet),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ms_switches_to_hours() {
        assert_eq!(format_ms(0), "0:00");
        assert_eq!(format_ms(61_999), "1:01");
        assert_eq!(format_ms(3_600_000 + 5_000), "1:00:05");
    }

    #[test]
    fn truncate_title_counts_chars() {
        assert_eq!(truncate_title("short", 10), "short");
        assert_eq!(truncate_title("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn cli_parses_subcommands() {
        let args = Args::parse_from(["podcatalog", "sync", "--force", "-n", "2"]);
        assert!(matches!(
            args.command,
            Commands::Sync {
                force: true,
                limit: Some(2),
                only: None
            }
        ));

        let args = Args::parse_from(["podcatalog", "list", "--json", "-l", "/tmp/lib"]);
        assert!(matches!(args.command, Commands::List { json: true }));
        assert_eq!(args.library, Some(PathBuf::from("/tmp/lib")));
    }
}
