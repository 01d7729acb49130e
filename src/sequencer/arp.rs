use rand::Rng;
use serde::{Deserialize, Serialize};

/// Held notes the arpeggiator tracks
pub const ARP_NOTES: usize = 10;
/// Step length in 96-PPQ ticks: quarter down to 32nd
pub const ARP_DIVISIONS: [u32; 6] = [96, 48, 32, 24, 16, 12];
pub const MIN_NOTE_TICKS: u32 = 2;
pub const MAX_NOTE_TICKS: u32 = 95;

/// How the position moves through the sorted notes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArpStepMode {
    Random,
    /// Fixed jump of 1, 2 or 3
    Step(usize),
    TwoForwardOneBack,
}

impl ArpStepMode {
    pub fn from_index(i: i32) -> Self {
        match i {
            i if i <= 0 => ArpStepMode::Random,
            1..=3 => ArpStepMode::Step(i as usize),
            _ => ArpStepMode::TwoForwardOneBack,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            ArpStepMode::Random => 0,
            ArpStepMode::Step(n) => n.clamp(1, 3) as i32,
            ArpStepMode::TwoForwardOneBack => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArpStepMode::Random => "random",
            ArpStepMode::Step(1) => "+1",
            ArpStepMode::Step(2) => "+2",
            ArpStepMode::Step(_) => "+3",
            ArpStepMode::TwoForwardOneBack => "2 fwd 1 back",
        }
    }
}

/// User-facing arpeggiator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpSettings {
    pub enabled: bool,
    /// Index into ARP_DIVISIONS
    pub division: usize,
    /// Gate length in clock ticks
    pub note_ticks: u32,
    pub forward: bool,
    pub step_mode: ArpStepMode,
    /// 1-4
    pub octaves: u32,
}

impl Default for ArpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            division: 3,
            note_ticks: 12,
            forward: true,
            step_mode: ArpStepMode::Step(1),
            octaves: 1,
        }
    }
}

impl ArpSettings {
    pub fn division_ticks(&self) -> u32 {
        ARP_DIVISIONS[self.division.min(ARP_DIVISIONS.len() - 1)]
    }

    pub fn set_division(&mut self, division: i32) {
        self.division = division.clamp(0, ARP_DIVISIONS.len() as i32 - 1) as usize;
    }

    pub fn set_note_ticks(&mut self, ticks: i32) {
        self.note_ticks = ticks.clamp(MIN_NOTE_TICKS as i32, MAX_NOTE_TICKS as i32) as u32;
    }

    pub fn set_octaves(&mut self, octaves: i32) {
        self.octaves = octaves.clamp(1, 4) as u32;
    }
}

/// "2 forward, 1 back" walker
#[derive(Debug, Clone, Copy, Default)]
struct Zigzag {
    restart: bool,
    back: bool,
    last_len: usize,
}

impl Zigzag {
    fn next(&mut self, position: usize, len: usize) -> usize {
        if self.last_len != len {
            self.restart = true;
            self.last_len = len;
        }
        if self.restart {
            self.restart = false;
            self.back = false;
            return 0;
        }
        if !self.back {
            self.back = true;
            if position + 2 < len {
                position + 2
            } else {
                self.restart = true;
                len - 1
            }
        } else {
            self.back = false;
            if position + 1 == len {
                self.restart = true;
            }
            position.saturating_sub(1)
        }
    }
}

/// Held-note list, sorted view and stepping position
#[derive(Debug, Clone)]
pub struct Arpeggiator {
    pub settings: ArpSettings,
    raw: [i32; ARP_NOTES],
    raw_len: usize,
    sorted: [i32; ARP_NOTES],
    position: usize,
    octave: u32,
    zigzag: Zigzag,
    release_pulse: Option<u32>,
    released: bool,
    /// Source of the held notes decides how they are ordered
    midi: bool,
}

impl Arpeggiator {
    pub fn new() -> Self {
        Self {
            settings: ArpSettings::default(),
            raw: [0; ARP_NOTES],
            raw_len: 0,
            sorted: [0; ARP_NOTES],
            position: 0,
            octave: 0,
            zigzag: Zigzag::default(),
            release_pulse: None,
            released: true,
            midi: false,
        }
    }

    pub fn len(&self) -> usize {
        self.raw_len
    }

    pub fn is_empty(&self) -> bool {
        self.raw_len == 0
    }

    pub fn held(&self) -> &[i32] {
        &self.raw[..self.raw_len]
    }

    pub fn sorted(&self) -> &[i32] {
        &self.sorted[..self.raw_len]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn octave(&self) -> u32 {
        self.octave
    }

    pub fn release_pulse(&self) -> Option<u32> {
        self.release_pulse
    }

    /// Switch between panel ordering and MIDI pitch ordering; clears held notes
    pub fn set_midi(&mut self, midi: bool) {
        self.midi = midi;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.raw_len = 0;
        self.position = 0;
        self.sort();
    }

    /// Add a held note. Panel keys are kept in key order; MIDI notes in
    /// arrival order. Full lists and duplicates are ignored.
    pub fn note_on(&mut self, note: i32) {
        if self.raw_len >= ARP_NOTES || self.held().contains(&note) {
            return;
        }
        let at = if self.midi {
            self.raw_len
        } else {
            self.held().iter().position(|&n| n > note).unwrap_or(self.raw_len)
        };
        self.raw.copy_within(at..self.raw_len, at + 1);
        self.raw[at] = note;
        self.raw_len += 1;
        self.sort();
    }

    pub fn note_off(&mut self, note: i32) {
        if let Some(at) = self.held().iter().position(|&n| n == note) {
            self.raw.copy_within(at + 1..self.raw_len, at);
            self.raw_len -= 1;
            if self.position >= self.raw_len {
                self.position = 0;
            }
            self.sort();
        }
    }

    /// Rebuild the stepping order from the held notes
    pub fn sort(&mut self) {
        let len = self.raw_len;
        self.sorted[..len].copy_from_slice(&self.raw[..len]);
        // MIDI notes are always pitch ordered; direction only reverses panel order
        if self.midi {
            self.sorted[..len].sort_unstable();
        } else if !self.settings.forward {
            self.sorted[..len].reverse();
        }
    }

    /// Advance to the next note. Returns the note to play, or None when
    /// nothing is held.
    pub fn step<R: Rng>(&mut self, pulse: u32, rng: &mut R) -> Option<i32> {
        let len = self.raw_len;
        if len == 0 {
            self.zigzag.last_len = 0;
            return None;
        }
        if self.position == 0 {
            self.octave = if self.octave + 1 < self.settings.octaves { self.octave + 1 } else { 0 };
        }
        self.position = match self.settings.step_mode {
            ArpStepMode::Step(n) => (self.position + n.clamp(1, 3)) % len,
            ArpStepMode::Random => rng.gen_range(0..len),
            ArpStepMode::TwoForwardOneBack => self.zigzag.next(self.position, len),
        }
        .min(len - 1);

        let cycle = self.settings.division_ticks() * 2;
        self.release_pulse = Some((pulse + self.settings.note_ticks) % cycle);
        self.released = false;
        Some(self.sorted[self.position] + self.octave as i32 * 12)
    }

    /// Returns true when the gate for the current note closes on `pulse`
    pub fn release_due(&mut self, pulse: u32) -> bool {
        if self.released || self.release_pulse != Some(pulse) {
            return false;
        }
        self.released = true;
        true
    }
}

impl Default for Arpeggiator {
    fn default() -> Self {
        Self::new()
    }
}
