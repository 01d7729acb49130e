use serde::{Deserialize, Serialize};

use crate::midi::MidiEvent;
use crate::project::PatchData;
use crate::sequencer::{ArpStepMode, BankMode, PlayMode, SequenceBank, SequenceParam};
use crate::settings::Settings;
use crate::synth::ParamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandSource {
    /// Front-panel keys and controls
    Panel,
    /// Decoded MIDI input
    Midi,
    /// Host side: CLI, store loads, scripted input
    Host,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    // Keyboard
    KeyDown(usize),
    KeyUp(usize),
    #[serde(skip)]
    Midi(MidiEvent),

    // Transport
    ToggleSequencer,
    SetBpm(u32),

    // Arpeggiator
    SetArpEnabled(bool),
    SetArpDivision(i32),
    SetArpNoteTicks(i32),
    SetArpForward(bool),
    SetArpStepMode(ArpStepMode),
    SetArpOctaves(i32),

    // Sequence bank
    SetPlayMode(PlayMode),
    SelectSequence(usize),
    CopySequence { src: usize, dst: usize },
    ClearSequence(usize),
    SetBankMode(BankMode),
    SetSequenceParam { sequence: usize, param: SequenceParam, value: i32 },

    // Step editing
    CaptureStep { sequence: usize, step: usize },
    SetStep { sequence: usize, step: usize, notes: Vec<i32>, velocity: u8 },
    ClearStep { sequence: usize, step: usize },
    ToggleTie { sequence: usize, step: usize },
    ToggleMute { sequence: usize, step: usize },

    // Synth
    SetParam(ParamId, i32),
    SetUserTable { slot: usize, samples: Vec<i32> },

    // Instrument settings
    SetSettings(Settings),
    SetMasterVolume(i32),

    // Store loads
    #[serde(skip)]
    LoadPatch(Box<PatchData>),
    #[serde(skip)]
    LoadBank(Box<SequenceBank>),
}

impl Command {
    /// Returns true if this command is worth a debug log line.
    /// Key and MIDI traffic is far too chatty.
    pub fn is_loggable(&self) -> bool {
        !matches!(
            self,
            Command::KeyDown(_) | Command::KeyUp(_) | Command::Midi(_)
        )
    }

    /// Human-readable description of the command
    pub fn description(&self) -> String {
        match self {
            Command::KeyDown(k) => format!("Key {} down", k),
            Command::KeyUp(k) => format!("Key {} up", k),
            Command::Midi(ev) => format!("MIDI {:?}", ev),
            Command::ToggleSequencer => "Toggle sequencer".to_string(),
            Command::SetBpm(bpm) => format!("Set BPM to {}", bpm),
            Command::SetArpEnabled(on) => {
                format!("Arpeggiator {}", if *on { "on" } else { "off" })
            }
            Command::SetArpDivision(d) => format!("Set arp division to {}", d),
            Command::SetArpNoteTicks(t) => format!("Set arp gate to {} ticks", t),
            Command::SetArpForward(fwd) => {
                format!("Set arp direction to {}", if *fwd { "forward" } else { "backward" })
            }
            Command::SetArpStepMode(mode) => format!("Set arp step to {}", mode.name()),
            Command::SetArpOctaves(o) => format!("Set arp range to {} octaves", o),
            Command::SetPlayMode(mode) => format!("Set play mode to {}", mode.name()),
            Command::SelectSequence(s) => format!("Select sequence {}", s + 1),
            Command::CopySequence { src, dst } => {
                format!("Copy sequence {} to {}", src + 1, dst + 1)
            }
            Command::ClearSequence(s) => format!("Clear sequence {}", s + 1),
            Command::SetBankMode(mode) => format!("Set bank mode to {}", mode.name()),
            Command::SetSequenceParam { sequence, param, value } => {
                format!("Set sequence {} {} to {}", sequence + 1, param.name(), value)
            }
            Command::CaptureStep { sequence, step } => {
                format!("Capture held notes into sequence {} step {}", sequence + 1, step + 1)
            }
            Command::SetStep { sequence, step, notes, velocity } => {
                format!(
                    "Set sequence {} step {} to {:?} vel {}",
                    sequence + 1,
                    step + 1,
                    notes,
                    velocity
                )
            }
            Command::ClearStep { sequence, step } => {
                format!("Clear sequence {} step {}", sequence + 1, step + 1)
            }
            Command::ToggleTie { sequence, step } => {
                format!("Toggle tie on sequence {} step {}", sequence + 1, step + 1)
            }
            Command::ToggleMute { sequence, step } => {
                format!("Toggle mute on sequence {} step {}", sequence + 1, step + 1)
            }
            Command::SetParam(param, value) => format!("Set {} to {}", param.name(), value),
            Command::SetUserTable { slot, samples } => {
                format!("Load user table {} ({} samples)", slot + 1, samples.len())
            }
            Command::SetSettings(_) => "Apply settings".to_string(),
            Command::SetMasterVolume(v) => format!("Set master volume to {}", v),
            Command::LoadPatch(_) => "Load patch".to_string(),
            Command::LoadBank(_) => "Load sequence bank".to_string(),
        }
    }
}
