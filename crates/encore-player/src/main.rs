//! Encore Player - headless command-line front end for the playback engine
//!
//! Wires the engine to:
//! 1. A YAML config (`~/.config/encore/player.yaml`)
//! 2. A persistent settings file holding queue, modes and DSP chain
//! 3. The built-in local WAV provider and effects
//! 4. An output sink (simulated clock, or the audio device with
//!    `--features device-output`)
//!
//! Commands are read line by line from stdin; type `help` for the list.
//!
//! ## Command line flags
//!
//! - `--config <path>`: use another config file
//! - `--library <path>`: override the library folder

mod commands;
mod config;
mod effects;
mod library;
mod output;
mod provider;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use encore_core::catalog::MemoryCatalog;
use encore_core::config::{default_config_path, load_config};
use encore_core::engine::{EngineBuilder, PlaybackEngine, PlaybackObserver};
use encore_core::provider::{Endpoint, ProviderConnection, ProviderRegistry};
use encore_core::store::YamlStore;
use encore_core::{ProviderId, TrackRef};

use commands::{execute, parse, Flow};
use config::PlayerConfig;
use effects::register_builtin_effects;
use library::{LocalLibrary, LOCAL_PROVIDER};
use output::Output;
use provider::LocalWavProvider;

/// Prints playback events as they happen
struct ConsoleObserver;

impl PlaybackObserver for ConsoleObserver {
    fn on_song_started(&self, buffering: bool, track: &TrackRef) {
        if !buffering {
            println!("▶ {}", track.track_id);
        }
    }

    fn on_playback_pause(&self) {
        println!("⏸ paused");
    }

    fn on_playback_resume(&self) {
        println!("▶ resumed");
    }
}

/// Everything that has to live while the player runs
struct Player {
    engine: PlaybackEngine,
    library: Arc<LocalLibrary>,
    local: Arc<LocalWavProvider>,
    output: Output,
}

impl Player {
    fn start(config: &PlayerConfig) -> Result<Self> {
        let store = YamlStore::open(&config.state_path)
            .with_context(|| format!("Failed to open state file {:?}", config.state_path))?;

        let library = match LocalLibrary::scan(&config.library_path) {
            Ok(library) => library,
            Err(e) => {
                log::warn!("{:#}, starting with an empty library", e);
                LocalLibrary::default()
            }
        };
        let library = Arc::new(library);
        let catalog = Arc::new(MemoryCatalog::new());
        library.populate(&catalog);

        let registry = Arc::new(ProviderRegistry::new());
        let local = LocalWavProvider::spawn(Arc::clone(&library), config.output.prefetch_delay_ms)?;
        registry.register(ProviderConnection::new(
            ProviderId::new(LOCAL_PROVIDER),
            "Local files",
            Endpoint::Source(local.clone()),
        ));
        register_builtin_effects(&registry);

        let output = Output::open(&config.output, &config.engine)?;
        let engine = EngineBuilder::new(registry, catalog)
            .config(config.engine.clone())
            .store(Arc::new(store))
            .sink(output.sink())
            .build()
            .context("Failed to start the playback engine")?;

        Ok(Self {
            engine,
            library,
            local,
            output,
        })
    }

    /// Read commands until `quit` or end of input
    fn run(&self, input: impl BufRead, interactive: bool) -> Result<()> {
        prompt(interactive);
        for line in input.lines() {
            let line = line.context("Failed to read command")?;
            match parse(&line) {
                Ok(Some(command)) => match execute(command, &self.engine, &self.library) {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("error: {:#}", e),
                },
                Ok(None) => {}
                Err(e) => eprintln!("{:#}", e),
            }
            prompt(interactive);
        }
        Ok(())
    }

    fn shutdown(self) -> Result<()> {
        self.engine.shutdown()?;
        self.local.shutdown();
        self.output.close();
        Ok(())
    }
}

fn prompt(interactive: bool) {
    if interactive {
        print!("encore> ");
        let _ = std::io::stdout().flush();
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<PathBuf> {
    args.windows(2)
        .find(|pair| pair[0] == flag)
        .map(|pair| PathBuf::from(&pair[1]))
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("encore-player starting up");

    let config_path =
        flag_value(&args, "--config").unwrap_or_else(|| default_config_path("player.yaml"));
    let mut config: PlayerConfig = load_config(&config_path);
    if let Some(library_path) = flag_value(&args, "--library") {
        config.library_path = library_path;
    }

    let player = Player::start(&config)?;
    println!(
        "Encore Player: {} tracks in {:?}. Type 'help' for commands.",
        player.library.len(),
        config.library_path
    );
    player.engine.add_observer(Arc::new(ConsoleObserver));

    let stdin = std::io::stdin();
    let result = player.run(stdin.lock(), true);
    player.shutdown()?;
    log::info!("encore-player stopped");
    result
}
