//! Sítio Music CLI - The `sitio-music` command.
//!
//! A stand-in for the game UI around the music engine:
//!
//! - `states`: print the state table, resolved for a difficulty and streak
//! - `simulate`: replay a game session in simulated time against the memory backend
//! - `render`: replay a game session into an OSC score (or a bundle with samples)
//! - `play`: drive a live synthesis server over OSC until Ctrl-C
//! - `init` / `config-path`: manage the configuration file

mod session;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use directories::ProjectDirs;
use session::{GameEvent, GameSession};
use signal_hook::consts::{SIGINT, SIGTERM};
use sitio_music_core::selector::resolve;
use sitio_music_core::{
    Difficulty, EngineConfig, EngineEvent, MemoryBackend, MusicEngine, MusicStateName, OscBackend,
    PlaybackContext, ScoreBackend,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sítio Music - procedural accompaniment for the memory game
#[derive(Parser, Debug)]
#[command(name = "sitio-music")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reactive Brazilian-folk music engine for the Sítio memory game", long_about = None)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that override configuration file values.
#[derive(ClapArgs, Debug, Clone, Default)]
struct Overrides {
    /// Humanization seed
    #[arg(long)]
    seed: Option<u64>,

    /// Lookahead window in milliseconds
    #[arg(long, value_name = "MS")]
    lookahead_ms: Option<u64>,

    /// Directory with sampled instruments (<dir>/<instrument>/<note>.wav)
    #[arg(long, value_name = "DIR")]
    soundfonts: Option<PathBuf>,

    /// Root of the major scale
    #[arg(long, value_name = "NOTE")]
    scale_root: Option<String>,
}

/// Options shared by the simulated session commands.
#[derive(ClapArgs, Debug, Clone)]
struct SessionArgs {
    /// Pairs on the board
    #[arg(long, default_value_t = 6)]
    pairs: u32,

    /// Game difficulty (easy, medium, hard)
    #[arg(long, default_value = "medium")]
    difficulty: Difficulty,

    /// Game events, e.g. "flip flip match flip flip miss" (defaults to a full game)
    #[arg(long)]
    script: Option<String>,

    /// Seconds between game events
    #[arg(long, default_value_t = 3.0)]
    step: f64,

    /// Seconds of music after the last event
    #[arg(long, default_value_t = 18.0)]
    tail: f64,

    #[command(flatten)]
    overrides: Overrides,
}

impl SessionArgs {
    fn script(&self) -> Result<Vec<GameEvent>> {
        match &self.script {
            Some(text) => GameEvent::parse_script(text).map_err(anyhow::Error::msg),
            None => Ok(GameEvent::default_script(self.pairs)),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the music state table
    States {
        /// Resolve tempos for this difficulty
        #[arg(long)]
        difficulty: Option<Difficulty>,

        /// Resolve tempos for this match streak
        #[arg(long)]
        streak: Option<u32>,
    },

    /// Replay a game session and print what the engine did
    Simulate {
        #[command(flatten)]
        session: SessionArgs,

        /// Print every note sent
        #[arg(long)]
        notes: bool,
    },

    /// Replay a game session into an OSC score file
    Render {
        #[command(flatten)]
        session: SessionArgs,

        /// Output file
        #[arg(short, long, default_value = "session.osc")]
        output: PathBuf,

        /// Write a tar bundle with the score and the referenced samples
        #[arg(long)]
        bundle: bool,
    },

    /// Play live on a synthesis server until Ctrl-C
    Play {
        /// Music state to play
        #[arg(default_value = "exploration")]
        state: String,

        /// Synthesis server address (host:port)
        #[arg(long)]
        addr: Option<String>,

        /// Game difficulty
        #[arg(long)]
        difficulty: Option<Difficulty>,

        /// Match streak
        #[arg(long)]
        streak: Option<u32>,

        /// Layer the melody motif on top
        #[arg(long)]
        motif: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Write a commented default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration file location
    ConfigPath,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match args.command {
        Commands::States { difficulty, streak } => {
            print_states(&PlaybackContext { difficulty, streak });
            Ok(())
        }
        Commands::Simulate { session, notes } => {
            let config = load_config(&config_path, &session.overrides)?;
            simulate(config, &session, notes)
        }
        Commands::Render {
            session,
            output,
            bundle,
        } => {
            let config = load_config(&config_path, &session.overrides)?;
            render(config, &session, &output, bundle)
        }
        Commands::Play {
            state,
            addr,
            difficulty,
            streak,
            motif,
            overrides,
        } => {
            let mut config = load_config(&config_path, &overrides)?;
            if let Some(addr) = addr {
                config.osc_addr = addr;
            }
            play(config, &state, PlaybackContext { difficulty, streak }, motif)
        }
        Commands::Init { force } => init_config(&config_path, force),
        Commands::ConfigPath => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

/// `<config dir>/sitio-music/config.toml`.
fn default_config_path() -> Result<PathBuf> {
    ProjectDirs::from("", "", "sitio-music")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .context("Could not determine config directory")
}

/// Load the config file (defaults when absent) and apply CLI overrides.
fn load_config(path: &Path, overrides: &Overrides) -> Result<EngineConfig> {
    let mut config = if path.exists() {
        EngineConfig::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?
    } else {
        log::debug!("[CLI] No config at {}, using defaults", path.display());
        EngineConfig::default()
    };
    apply_overrides(&mut config, overrides);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn apply_overrides(config: &mut EngineConfig, overrides: &Overrides) {
    if let Some(seed) = overrides.seed {
        config.seed = seed;
    }
    if let Some(ms) = overrides.lookahead_ms {
        config.lookahead_ms = ms;
    }
    if let Some(dir) = &overrides.soundfonts {
        config.soundfont_dir = Some(dir.clone());
    }
    if let Some(root) = &overrides.scale_root {
        config.scale_root = root.clone();
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, EngineConfig::template())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn print_states(context: &PlaybackContext) {
    println!(
        "{:<12} {:>9} {:>6} {:<10} {:>6}  {:<32} progression",
        "state", "range", "tempo", "feel", "swing", "layers"
    );
    for name in MusicStateName::ALL {
        let state = resolve(name, context);
        let layers: Vec<&str> = state.layers.iter().map(|l| l.as_str()).collect();
        let progression: Vec<&str> = state.progression.iter().map(|d| d.token()).collect();
        println!(
            "{:<12} {:>4}-{:<4} {:>6} {:<10} {:>6.2}  {:<32} {}",
            name.as_str(),
            state.tempo_range.0,
            state.tempo_range.1,
            state.tempo,
            state.feel.to_string(),
            state.swing,
            layers.join(","),
            progression.join(" ")
        );
    }
}

fn describe(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::SetupCompleted(report) => Some(format!(
            "setup: provider {}, context {:?}, samples loaded {:?}{}",
            report.provider,
            report.context,
            report.samples_loaded,
            if report.is_degraded() { " (degraded)" } else { "" }
        )),
        EngineEvent::StateChanged { from, to, tempo } => {
            Some(format!("state: {} -> {} at {} BPM", from, to, tempo))
        }
        EngineEvent::TempoNudged {
            phrase,
            delta_bpm,
            beat,
        } => Some(format!(
            "phrase {}: tempo nudged {:+.1} BPM at beat {:.1}",
            phrase, delta_bpm, beat
        )),
        EngineEvent::Stopped => Some("stopped".to_string()),
        EngineEvent::MusicToggled(enabled) => Some(format!("music enabled: {}", enabled)),
        EngineEvent::BackendFailure(reason) => Some(format!("backend failure: {}", reason)),
        _ => None,
    }
}

fn simulate(config: EngineConfig, args: &SessionArgs, show_notes: bool) -> Result<()> {
    let script = args.script()?;
    let mut engine = MusicEngine::new(MemoryBackend::new(), config);
    let events = engine.subscribe();
    let mut session = GameSession::new(args.pairs, args.difficulty);

    let start = Instant::now();
    let end = session::run_script(
        &mut engine,
        &mut session,
        &script,
        start,
        args.step,
        args.tail,
    );
    engine.shutdown(end);

    for event in events.try_iter() {
        if let Some(line) = describe(&event) {
            println!("{}", line);
        }
    }

    if show_notes {
        for note in engine.backend().notes() {
            let pitches: Vec<String> = note.pitches.iter().map(|p| p.to_string()).collect();
            println!(
                "{:>8.3}s  beat {:>7.2}  {:<18} {:<12} vel {:.2}  dur {:.2}s",
                note.at.saturating_duration_since(start).as_secs_f64(),
                note.beat,
                note.voice.name(),
                pitches.join(" "),
                note.velocity,
                note.duration_secs
            );
        }
    }

    let stats = engine.stats();
    println!();
    println!("Events played: {}", script.len());
    println!("Pairs left:    {}", session.pairs_left());
    println!(
        "Loops:         {} created, {} disposed",
        stats.loops_created, stats.loops_disposed
    );
    println!(
        "Parts:         {} created, {} disposed",
        stats.parts_created, stats.parts_disposed
    );
    println!(
        "Notes:         {} sent, {} failed",
        stats.notes_sent, stats.notes_failed
    );
    println!("Effects:       {}", stats.effects_played);
    Ok(())
}

fn render(config: EngineConfig, args: &SessionArgs, output: &Path, bundle: bool) -> Result<()> {
    let script = args.script()?;
    let start = Instant::now();
    let mut engine = MusicEngine::new(ScoreBackend::new(start), config);
    let mut session = GameSession::new(args.pairs, args.difficulty);

    log::info!("[CLI] Rendering {} game events to {}", script.len(), output.display());
    let end = session::run_script(
        &mut engine,
        &mut session,
        &script,
        start,
        args.step,
        args.tail,
    );
    engine.shutdown(end);
    let stats = engine.stats();

    let mut backend = engine.into_backend();
    let writer = backend.writer_mut();
    if bundle {
        writer
            .write_bundle(output)
            .with_context(|| format!("Failed to write bundle: {}", output.display()))?;
    } else {
        writer
            .write_to_file(output)
            .with_context(|| format!("Failed to write score: {}", output.display()))?;
    }

    println!(
        "Wrote {} ({} events, {:.1}s, {} notes)",
        output.display(),
        writer.event_count(),
        writer.duration(),
        stats.notes_sent
    );
    Ok(())
}

fn play(config: EngineConfig, state: &str, context: PlaybackContext, motif: bool) -> Result<()> {
    let backend = OscBackend::connect(&config.osc_addr, config.latency.clone())
        .with_context(|| format!("Failed to connect to {}", config.osc_addr))?;
    log::info!("[CLI] Sending to {}", config.osc_addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))
        .context("Failed to register SIGINT handler")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))
        .context("Failed to register SIGTERM handler")?;

    let mut engine = MusicEngine::new(backend, config);
    let events = engine.subscribe();

    let now = Instant::now();
    if engine.start_named(state, &context, now).is_none() {
        log::warn!("[CLI] Music is disabled in the configuration");
        return Ok(());
    }
    if motif {
        engine.play_melody_motif(now);
    }
    log::info!("[CLI] Playing (Ctrl+C to stop)");

    while !shutdown.load(Ordering::Relaxed) {
        engine.pump(Instant::now());
        for event in events.try_iter() {
            if let Some(line) = describe(&event) {
                log::info!("[CLI] {}", line);
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    log::info!("[CLI] Interrupted, stopping");
    engine.shutdown(Instant::now());
    let stats = engine.stats();
    log::info!(
        "[CLI] {} notes sent, {} failed",
        stats.notes_sent,
        stats.notes_failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "seed = 7\nlookahead_ms = 100\n").unwrap();

        let overrides = Overrides {
            seed: Some(42),
            ..Overrides::default()
        };
        let config = load_config(&path, &overrides).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.lookahead_ms, 100);
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml"), &Overrides::default()).unwrap();
        assert_eq!(config.lookahead_ms, EngineConfig::default().lookahead_ms);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init_config(&path, false).unwrap();
        assert!(EngineConfig::load_from(&path).is_ok());
        assert!(init_config(&path, false).is_err());
        assert!(init_config(&path, true).is_ok());
    }

    #[test]
    fn test_render_writes_score() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("game.osc");
        let args = SessionArgs {
            pairs: 3,
            difficulty: Difficulty::Easy,
            script: None,
            step: 1.0,
            tail: 2.0,
            overrides: Overrides::default(),
        };
        render(EngineConfig::default(), &args, &output, false).unwrap();
        assert!(fs::metadata(&output).unwrap().len() > 0);
    }

    #[test]
    fn test_cli_parses() {
        let args = Args::try_parse_from([
            "sitio-music",
            "simulate",
            "--pairs",
            "4",
            "--difficulty",
            "hard",
            "--seed",
            "9",
        ])
        .unwrap();
        match args.command {
            Commands::Simulate { session, .. } => {
                assert_eq!(session.pairs, 4);
                assert_eq!(session.difficulty, Difficulty::Hard);
                assert_eq!(session.overrides.seed, Some(9));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
