use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};

use pocketplay::audio::{CpalBackend, PlaybackEngine};
use pocketplay::audio_store::AudioStore;
use pocketplay::config::Config;
use pocketplay::config_persistence::{
    default_config_path, default_database_path, load_or_create_config, preferences_path_beside,
    PreferencesFile,
};
use pocketplay::error::StoreError;
use pocketplay::format::{format_duration, format_file_size};
use pocketplay::intake::Intake;
use pocketplay::library::Library;
use pocketplay::media_file_discovery::collect_audio_files_from_dropped_paths;
use pocketplay::metadata::MetadataExtractor;
use pocketplay::player_controller::{restored_volume, PlayerController};
use pocketplay::playlist::Playlist;
use pocketplay::protocol::{IncomingFile, RepeatMode};
use pocketplay::state::{PlayerState, PlayerStateStore};

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(author, version, about = "Offline music library and player", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import audio files or folders into the library
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List stored tracks
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete a track by id
    Remove { id: String },
    /// Delete every stored track
    Clear,
    /// Show storage usage against the quota
    Quota,
    /// Play the library, or only the given ids in order
    Play {
        ids: Vec<String>,
        #[arg(long, default_value = "off")]
        repeat: RepeatMode,
        #[arg(long)]
        shuffle: bool,
    },
    /// Show or set the saved volume (0.0 to 1.0)
    Volume { value: Option<f32> },
}

struct AppPaths {
    database: PathBuf,
    preferences: PreferencesFile,
}

fn resolve_paths(config: &Config, config_path: &Path) -> Result<AppPaths, Box<dyn std::error::Error>> {
    let database = config
        .store
        .database_path
        .clone()
        .or_else(default_database_path)
        .ok_or("could not resolve a data directory for the library database")?;
    Ok(AppPaths {
        database,
        preferences: PreferencesFile::new(preferences_path_beside(config_path)),
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    let config_path = cli
        .config
        .or_else(default_config_path)
        .ok_or("could not resolve a config directory")?;
    let config = load_or_create_config(&config_path)?;
    let paths = resolve_paths(&config, &config_path)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config, paths))
}

async fn open_library(config: &Config, database: &Path) -> Result<Library, StoreError> {
    let library = Library::new(
        AudioStore::open(database, &config.store),
        Intake::new(MetadataExtractor::new(config)),
    );
    library.open().await?;
    Ok(library)
}

async fn run(
    command: Commands,
    config: Config,
    paths: AppPaths,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Volume { value } => volume_command(value, &config, &paths.preferences)?,
        Commands::Import { paths: inputs } => {
            let library = open_library(&config, &paths.database).await?;
            import_command(&library, &inputs).await?
        }
        Commands::List { json } => {
            let library = open_library(&config, &paths.database).await?;
            list_command(&library, json).await?
        }
        Commands::Remove { id } => {
            let library = open_library(&config, &paths.database).await?;
            library.remove(&id).await?;
            println!("Removed {id}");
        }
        Commands::Clear => {
            let library = open_library(&config, &paths.database).await?;
            library.clear().await?;
            println!("Library cleared");
        }
        Commands::Quota => {
            let library = open_library(&config, &paths.database).await?;
            let estimate = library.storage_estimate().await;
            println!(
                "{} of {} used ({:.1}%)",
                format_file_size(estimate.usage),
                format_file_size(estimate.quota),
                estimate.percentage
            );
        }
        Commands::Play {
            ids,
            repeat,
            shuffle,
        } => {
            let library = open_library(&config, &paths.database).await?;
            library.reload().await?;
            play_command(&library, &config, paths.preferences, ids, repeat, shuffle).await?
        }
    }
    Ok(())
}

fn volume_command(
    value: Option<f32>,
    config: &Config,
    preferences: &PreferencesFile,
) -> Result<(), Box<dyn std::error::Error>> {
    match value {
        Some(volume) => {
            let mut state = PlayerState::default();
            state.set_volume(volume);
            preferences.save_volume(state.volume)?;
            println!("Volume set to {:.2}", state.volume);
        }
        None => {
            let volume = restored_volume(Some(preferences), config.playback.default_volume);
            println!("Volume {:.2}", volume);
        }
    }
    Ok(())
}

async fn import_command(
    library: &Library,
    inputs: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for path in collect_audio_files_from_dropped_paths(inputs) {
        match IncomingFile::from_path(&path) {
            Ok(file) => files.push(file),
            Err(err) => warn!("Import: could not read {}: {}", path.display(), err),
        }
    }
    if files.is_empty() {
        println!("No supported audio files found");
        return Ok(());
    }

    let report = library.import(files).await?;
    for summary in &report.added {
        println!(
            "Added {}  {} - {}  ({})",
            summary.id,
            summary.title,
            summary.artist,
            format_duration(f64::from(summary.duration))
        );
    }
    for name in &report.degraded {
        println!("Imported with fallback metadata: {name}");
    }
    for failure in &report.failed {
        println!("Failed to save {}: {}", failure.file_name, failure.error);
    }
    for name in report.excluded.iter().chain(&report.dropped) {
        println!("Skipped {name}");
    }
    Ok(())
}

async fn list_command(library: &Library, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let summaries = library.summaries().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    if summaries.is_empty() {
        println!("Library is empty");
        return Ok(());
    }
    for summary in summaries {
        println!(
            "{}  {} - {} [{}]  {}  {}",
            summary.id,
            summary.title,
            summary.artist,
            summary.album,
            format_duration(f64::from(summary.duration)),
            format_file_size(summary.size)
        );
    }
    Ok(())
}

async fn play_command(
    library: &Library,
    config: &Config,
    preferences: PreferencesFile,
    ids: Vec<String>,
    repeat: RepeatMode,
    shuffle: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !ids.is_empty() {
        library.audio_list().update(|list| {
            let selected = ids
                .iter()
                .filter_map(|id| {
                    let found = list.find(id).cloned();
                    if found.is_none() {
                        warn!("Play: no track with id {}", id);
                    }
                    found
                })
                .collect();
            list.set_all(selected);
        });
    }
    if library.audio_list().snapshot().audios.is_empty() {
        println!("Nothing to play");
        return Ok(());
    }

    let playback_config = config.playback.clone();
    let engine = PlaybackEngine::new(Box::new(move |events| {
        CpalBackend::new(&playback_config, events)
    }));
    let volume = restored_volume(Some(&preferences), config.playback.default_volume);
    let player_state = PlayerStateStore::new(PlayerState::with_volume(volume));
    let mut controller = PlayerController::new(
        engine,
        Playlist::new(),
        library.audio_list().clone(),
        player_state,
        Some(preferences),
    );
    controller.set_repeat(repeat);
    if shuffle {
        controller.toggle_shuffle();
    }
    controller.toggle_play().await?;

    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut announced: Option<String> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Play: interrupted");
                break;
            }
            _ = ticker.tick() => {
                controller.pump().await;
                let current = controller.current_id().map(str::to_string);
                if current != announced {
                    if let Some(record) = current
                        .as_deref()
                        .and_then(|id| library.audio_list().snapshot().find(id).cloned())
                    {
                        println!(
                            "Now playing: {} - {} ({})",
                            record.title,
                            record.artist,
                            format_duration(f64::from(record.duration))
                        );
                    }
                    announced = current;
                }
                if controller.is_finished() {
                    break;
                }
            }
        }
    }

    controller.shutdown();
    Ok(())
}
