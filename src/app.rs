use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

use crate::audio::AudioEngine;
use crate::command::{Command, CommandBus, CommandSender, CommandSource};
use crate::midi::bridge::MidiBridge;
use crate::midi::to_midi_note;
use crate::project::{FileStore, ParameterStore};
use crate::settings::{Settings, ThruMode};
use crate::synth::note_name;

/// Host loop period (~60 Hz, the rate the audio thread publishes at)
const FRAME: Duration = Duration::from_millis(16);

const HELP: &str = "\
  play | stop            start or stop the sequencer
  bpm <n>                set the tempo
  down <key> | up <key>  press or release panel key 0-12
  arp on | arp off       toggle the arpeggiator
  seq <n>                select sequence 1-8
  volume <n>             master volume 0-1023
  load patch|bank <name>
  save patch|bank <name> | save settings
  status                 print the engine status as JSON
  {\"SetParam\":[\"FilterCutoff\",200]}  any command as JSON
  quit";

/// Startup options shared by live play and offline render
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub store: PathBuf,
    pub patch: Option<String>,
    pub bank: Option<String>,
    pub bpm: Option<u32>,
    pub midi_in: Option<String>,
    pub midi_out: Option<String>,
    pub seconds: Option<f32>,
    pub start: bool,
    pub arp: bool,
}

/// Settings from the store, or the defaults when the store can't provide them
pub fn load_settings(store: &dyn ParameterStore) -> Settings {
    match store.load_settings() {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            log::warn!("Settings record unusable, using defaults");
            Settings::default()
        }
        Err(e) => {
            log::warn!("Could not load settings, using defaults: {:#}", e);
            Settings::default()
        }
    }
}

/// Commands that bring a fresh engine to the configured starting point.
/// Records that fail to load are skipped with a warning.
pub fn startup_commands(store: &dyn ParameterStore, config: &AppConfig) -> Vec<Command> {
    let mut commands = Vec::new();
    if let Some(name) = &config.patch {
        match store.load_patch(name) {
            Ok(Some(data)) => commands.push(Command::LoadPatch(Box::new(data))),
            Ok(None) => log::warn!("Patch '{}' is not usable, keeping defaults", name),
            Err(e) => log::warn!("Could not load patch '{}': {:#}", name, e),
        }
    }
    if let Some(name) = &config.bank {
        match store.load_bank(name) {
            Ok(Some(bank)) => commands.push(Command::LoadBank(Box::new(bank))),
            Ok(None) => log::warn!("Bank '{}' is not usable, keeping defaults", name),
            Err(e) => log::warn!("Could not load bank '{}': {:#}", name, e),
        }
    }
    if let Some(bpm) = config.bpm {
        commands.push(Command::SetBpm(bpm));
    }
    if config.arp {
        commands.push(Command::SetArpEnabled(true));
    }
    if config.start {
        commands.push(Command::ToggleSequencer);
    }
    commands
}

/// One line of console input
#[derive(Debug)]
enum Input {
    Send(Command, CommandSource),
    Play,
    Stop,
    LoadPatch(String),
    LoadBank(String),
    SavePatch(String),
    SaveBank(String),
    SaveSettings,
    Status,
    List,
    Help,
    Quit,
}

fn number<T: FromStr>(word: &str) -> Result<T, String> {
    word.parse()
        .map_err(|_| format!("'{}' is not a valid number", word))
}

fn parse_line(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.starts_with('{') || line.starts_with('"') {
        return serde_json::from_str::<Command>(line)
            .map(|cmd| Input::Send(cmd, CommandSource::Host))
            .map_err(|e| format!("Bad command: {}", e));
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    let input = match words.as_slice() {
        ["play"] => Input::Play,
        ["stop"] => Input::Stop,
        ["bpm", n] => Input::Send(Command::SetBpm(number(n)?), CommandSource::Host),
        ["down", k] => Input::Send(Command::KeyDown(number(k)?), CommandSource::Panel),
        ["up", k] => Input::Send(Command::KeyUp(number(k)?), CommandSource::Panel),
        ["arp", "on"] => Input::Send(Command::SetArpEnabled(true), CommandSource::Panel),
        ["arp", "off"] => Input::Send(Command::SetArpEnabled(false), CommandSource::Panel),
        ["seq", n] => {
            let n: usize = number(n)?;
            Input::Send(
                Command::SelectSequence(n.saturating_sub(1)),
                CommandSource::Panel,
            )
        }
        ["volume", n] => Input::Send(Command::SetMasterVolume(number(n)?), CommandSource::Host),
        ["load", "patch", name] => Input::LoadPatch(name.to_string()),
        ["load", "bank", name] => Input::LoadBank(name.to_string()),
        ["save", "patch", name] => Input::SavePatch(name.to_string()),
        ["save", "bank", name] => Input::SaveBank(name.to_string()),
        ["save", "settings"] => Input::SaveSettings,
        ["status"] => Input::Status,
        ["list"] | ["ls"] => Input::List,
        ["help"] | ["?"] => Input::Help,
        ["quit"] | ["q"] | ["exit"] => Input::Quit,
        _ => return Err(format!("Unknown command '{}', try 'help'", line)),
    };
    Ok(input)
}

/// Read stdin lines on their own thread so the host loop never blocks on them
fn spawn_console() -> Receiver<String> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Live instrument: audio stream, MIDI ports and the console
pub struct App {
    audio: AudioEngine,
    bridge: MidiBridge,
    commands: CommandSender,
    store: FileStore,
    seconds: Option<f32>,
    should_quit: bool,
    receiving_clock: bool,
    thru: ThruMode,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let store = FileStore::new(&config.store);
        let settings = load_settings(&store);

        let bus = CommandBus::new();
        let commands = bus.sender();
        let audio = AudioEngine::new(bus.receiver(), settings)?;

        let mut bridge = MidiBridge::new(settings.thru);
        if let Some(name) = &config.midi_out {
            bridge.connect_output(name)?;
        }
        if let Some(name) = &config.midi_in {
            bridge.connect_input(name, commands.clone())?;
        }
        if !bridge.has_output() {
            log::info!("No MIDI output connected, engine MIDI is discarded");
        }

        for cmd in startup_commands(&store, &config) {
            commands.send(cmd, CommandSource::Host);
        }

        Ok(Self {
            audio,
            bridge,
            commands,
            store,
            seconds: config.seconds,
            should_quit: false,
            receiving_clock: false,
            thru: settings.thru,
        })
    }

    /// Run until `quit` or the configured duration runs out
    pub fn run(&mut self) -> Result<()> {
        let mut console = Some(spawn_console());
        let started = Instant::now();
        println!("quartet ready, type 'help' for commands");

        while !self.should_quit {
            match console.as_ref().map(|rx| rx.recv_timeout(FRAME)) {
                Some(Ok(line)) => self.handle_line(&line),
                Some(Err(RecvTimeoutError::Timeout)) => {}
                Some(Err(RecvTimeoutError::Disconnected)) => {
                    log::debug!("Console closed");
                    console = None;
                }
                None => std::thread::sleep(FRAME),
            }

            self.pump();

            if let Some(limit) = self.seconds {
                if started.elapsed().as_secs_f32() >= limit {
                    self.should_quit = true;
                }
            }
        }
        Ok(())
    }

    /// Forward engine output to the MIDI port and report what changed
    fn pump(&mut self) {
        for msg in self.audio.midi_out.try_iter() {
            self.bridge.send(msg);
        }

        let transport = &self.audio.transport;
        let receiving = transport.receiving_clock.load(Ordering::Relaxed);
        if receiving != self.receiving_clock {
            if receiving {
                log::info!(
                    "MIDI clock acquired ({} BPM)",
                    transport.bpm.load(Ordering::Relaxed)
                );
            } else {
                log::info!("MIDI clock lost");
            }
            self.receiving_clock = receiving;
        }

        let dropped = transport.midi_dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("Dropped {} outgoing MIDI messages", dropped);
        }
        let echoes = transport.echoes_dropped.swap(0, Ordering::Relaxed);
        if echoes > 0 {
            log::warn!("Dropped {} panel key echoes", echoes);
        }

        let thru = self.audio.state.read().settings.thru;
        if thru != self.thru {
            self.bridge.set_thru(thru);
            self.thru = thru;
        }
    }

    fn dispatch(&self, cmd: Command, source: CommandSource) {
        if cmd.is_loggable() {
            log::debug!("{}", cmd.description());
        }
        self.commands.send(cmd, source);
    }

    fn set_running(&self, running: bool) {
        if self.audio.state.read().status.running != running {
            self.dispatch(Command::ToggleSequencer, CommandSource::Host);
        }
    }

    fn list(&self) {
        match (self.store.patches(), self.store.banks()) {
            (Ok(patches), Ok(banks)) => {
                println!("Patches: {}", patches.join(" "));
                println!("Banks: {}", banks.join(" "));
            }
            (Err(e), _) | (_, Err(e)) => println!("Store unavailable: {:#}", e),
        }
        let filled: Vec<String> = self
            .audio
            .state
            .read()
            .bank
            .sequences
            .iter()
            .enumerate()
            .filter(|(_, seq)| seq.has_content())
            .map(|(i, _)| (i + 1).to_string())
            .collect();
        println!("Sequences with notes: {}", filled.join(" "));
    }

    fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match parse_line(line) {
            Ok(input) => self.apply(input),
            Err(e) => println!("{}", e),
        }
    }

    fn apply(&mut self, input: Input) {
        match input {
            Input::Send(cmd, source) => self.dispatch(cmd, source),
            Input::Play => self.set_running(true),
            Input::Stop => self.set_running(false),
            Input::LoadPatch(name) => match self.store.load_patch(&name) {
                Ok(Some(data)) => self.dispatch(Command::LoadPatch(Box::new(data)), CommandSource::Host),
                Ok(None) => println!("Patch '{}' is not usable", name),
                Err(e) => println!("Load failed: {:#}", e),
            },
            Input::LoadBank(name) => match self.store.load_bank(&name) {
                Ok(Some(bank)) => self.dispatch(Command::LoadBank(Box::new(bank)), CommandSource::Host),
                Ok(None) => println!("Bank '{}' is not usable", name),
                Err(e) => println!("Load failed: {:#}", e),
            },
            Input::SavePatch(name) => {
                let data = self.audio.state.read().patch.clone();
                report_save(self.store.save_patch(&name, &data), &name);
            }
            Input::SaveBank(name) => {
                let bank = self.audio.state.read().bank.clone();
                report_save(self.store.save_bank(&name, &bank), &name);
            }
            Input::SaveSettings => {
                let settings = self.audio.state.read().settings;
                report_save(self.store.save_settings(&settings), "settings");
            }
            Input::Status => {
                let status = self.audio.state.read().status;
                match serde_json::to_string(&status) {
                    Ok(json) => println!("{}", json),
                    Err(e) => log::warn!("Could not encode status: {}", e),
                }
                let sounding: Vec<String> = status
                    .voices
                    .iter()
                    .flatten()
                    .map(|&n| note_name(to_midi_note(n)))
                    .collect();
                println!("Sounding: {}", sounding.join(" "));
            }
            Input::List => self.list(),
            Input::Help => println!("{}", HELP),
            Input::Quit => self.should_quit = true,
        }
    }
}

fn report_save(result: Result<()>, name: &str) {
    match result {
        Ok(()) => println!("Saved {}", name),
        Err(e) => println!("Save failed: {:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::PatchData;
    use crate::sequencer::SequenceBank;
    use crate::synth::ParamId;

    #[test]
    fn console_words() {
        assert!(matches!(parse_line("play"), Ok(Input::Play)));
        assert!(matches!(
            parse_line("  bpm 140 "),
            Ok(Input::Send(Command::SetBpm(140), CommandSource::Host))
        ));
        assert!(matches!(
            parse_line("down 4"),
            Ok(Input::Send(Command::KeyDown(4), CommandSource::Panel))
        ));
        assert!(matches!(
            parse_line("seq 3"),
            Ok(Input::Send(Command::SelectSequence(2), CommandSource::Panel))
        ));
        assert!(matches!(parse_line("save patch lead"), Ok(Input::SavePatch(ref n)) if n == "lead"));
        assert!(matches!(parse_line("q"), Ok(Input::Quit)));
    }

    #[test]
    fn console_json_and_errors() {
        assert!(matches!(
            parse_line(r#"{"SetParam":["FilterCutoff",200]}"#),
            Ok(Input::Send(Command::SetParam(ParamId::FilterCutoff, 200), CommandSource::Host))
        ));
        assert!(matches!(
            parse_line(r#""ToggleSequencer""#),
            Ok(Input::Send(Command::ToggleSequencer, _))
        ));
        assert!(parse_line("bpm fast").is_err());
        assert!(parse_line("down -1").is_err());
        assert!(parse_line("dance").is_err());
        assert!(parse_line("{not json").is_err());
    }

    #[test]
    fn startup_loads_records_then_transport() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_patch("pad", &PatchData::default()).unwrap();
        store.save_bank("set", &SequenceBank::new()).unwrap();

        let config = AppConfig {
            store: dir.path().to_path_buf(),
            patch: Some("pad".into()),
            bank: Some("set".into()),
            bpm: Some(100),
            start: true,
            ..AppConfig::default()
        };
        let cmds = startup_commands(&store, &config);
        assert_eq!(cmds.len(), 4);
        assert!(matches!(cmds[0], Command::LoadPatch(_)));
        assert!(matches!(cmds[1], Command::LoadBank(_)));
        assert!(matches!(cmds[2], Command::SetBpm(100)));
        assert!(matches!(cmds[3], Command::ToggleSequencer));
    }

    #[test]
    fn missing_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let config = AppConfig {
            patch: Some("nowhere".into()),
            arp: true,
            ..AppConfig::default()
        };
        let cmds = startup_commands(&store, &config);
        assert_eq!(cmds.len(), 1);
        assert!(matches!(cmds[0], Command::SetArpEnabled(true)));
        assert_eq!(load_settings(&store), Settings::default());
    }
}
