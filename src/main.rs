mod app;
mod audio;
mod command;
mod fx;
mod midi;
mod project;
mod sequencer;
mod settings;
mod synth;
mod voice;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use app::{App, AppConfig};
use audio::Engine;
use command::CommandSource;
use project::renderer::{export_wav, ExportMode};
use project::{FileStore, ParameterStore};

/// Quartet - 4 voice paraphonic synthesizer and step sequencer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding patches, banks and settings
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Mode>,
}

/// Where the engine starts
#[derive(clap::Args, Debug, Default)]
struct Startup {
    /// Patch to load from the store
    #[arg(long)]
    patch: Option<String>,

    /// Sequence bank to load from the store
    #[arg(long)]
    bank: Option<String>,

    /// Tempo, overriding the bank's
    #[arg(long)]
    bpm: Option<u32>,

    /// Start the sequencer
    #[arg(long)]
    start: bool,

    /// Enable the arpeggiator
    #[arg(long)]
    arp: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Play live on the default audio device (default)
    Play {
        #[command(flatten)]
        startup: Startup,

        /// MIDI input port (name substring)
        #[arg(long)]
        midi_in: Option<String>,

        /// MIDI output port (name substring)
        #[arg(long)]
        midi_out: Option<String>,

        /// Quit after this many seconds
        #[arg(long)]
        seconds: Option<f32>,
    },
    /// Render the sequencer to a 16-bit mono WAV file
    Render {
        /// Output file
        #[arg(default_value = "quartet.wav")]
        output: PathBuf,

        #[command(flatten)]
        startup: Startup,

        /// Length in seconds instead of whole loops
        #[arg(long)]
        seconds: Option<f32>,

        /// Passes through the current sequence
        #[arg(long, default_value = "1")]
        loops: u32,
    },
    /// List MIDI input and output ports
    ListMidi,
    /// Print a stored patch as JSON
    DumpPatch {
        name: String,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    use simplelog::*;

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
        .context("Failed to initialize logger")?;
    Ok(())
}

fn store_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.store {
        Some(dir) => Ok(dir.clone()),
        None => FileStore::default_dir().context("No config directory found, pass --store"),
    }
}

fn config(store: PathBuf, startup: Startup) -> AppConfig {
    AppConfig {
        store,
        patch: startup.patch,
        bank: startup.bank,
        bpm: startup.bpm,
        start: startup.start,
        arp: startup.arp,
        ..AppConfig::default()
    }
}

fn render(config: AppConfig, output: PathBuf, mode: ExportMode) -> Result<()> {
    let store = FileStore::new(&config.store);
    let mut engine = Engine::new(app::load_settings(&store));
    for cmd in app::startup_commands(&store, &config) {
        engine.handle_command(cmd, CommandSource::Host);
    }
    let result = export_wav(&mut engine, mode, &output)?;
    println!(
        "Wrote {} ({:.1}s, {} samples)",
        output.display(),
        result.duration_secs,
        result.samples
    );
    Ok(())
}

fn list_midi() -> Result<()> {
    println!("MIDI inputs:");
    for name in midi::bridge::input_ports()? {
        println!("  {}", name);
    }
    println!("MIDI outputs:");
    for name in midi::bridge::output_ports()? {
        println!("  {}", name);
    }
    Ok(())
}

fn dump_patch(store: PathBuf, name: &str) -> Result<()> {
    let store = FileStore::new(store);
    let Some(data) = store.load_patch(name)? else {
        bail!("Patch '{}' is too short to decode", name);
    };
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    let store = store_dir(&cli)?;

    match cli.command {
        None => {
            let mut app = App::new(config(store, Startup::default()))?;
            app.run()
        }
        Some(Mode::Play { startup, midi_in, midi_out, seconds }) => {
            let mut app = App::new(AppConfig {
                midi_in,
                midi_out,
                seconds,
                ..config(store, startup)
            })?;
            app.run()
        }
        Some(Mode::Render { output, startup, seconds, loops }) => {
            // Nothing plays unless the sequencer runs
            let config = AppConfig { start: true, ..config(store, startup) };
            let mode = match seconds {
                Some(s) => ExportMode::Duration(s),
                None => ExportMode::Loops(loops),
            };
            render(config, output, mode)
        }
        Some(Mode::ListMidi) => list_midi(),
        Some(Mode::DumpPatch { name }) => dump_patch(store, &name),
    }
}
