use rand::Rng;
use serde::{Deserialize, Serialize};

pub const STEPS: usize = 16;
pub const SEQ_VOICES: usize = 4;
pub const CONTROLLERS: usize = 4;
pub const NUM_SEQUENCES: usize = 8;

/// Step length in 96-PPQ clock ticks: 8th, 16th, 16th triplet, 32nd
pub const SEQ_DIVISIONS: [u32; 4] = [48, 24, 16, 12];
pub const DEFAULT_DIVISION: usize = 1;

/// Stored note range, as semitone offsets from middle C
pub const NOTE_MIN: i32 = -60;
pub const NOTE_MAX: i32 = 67;
/// Controller slots are opaque; this marks an unused one
pub const CONTROLLER_UNSET: i32 = 255;

/// Per-sequence setting addressable from the command bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceParam {
    Length,       // 1-16
    NoteDuration, // 0-1023
    Division,     // index into SEQ_DIVISIONS
    Transpose,    // -36..=36
    Swing,        // 0-1023
    Bpm,          // 20-320
}

impl SequenceParam {
    pub fn name(&self) -> &'static str {
        match self {
            SequenceParam::Length => "Length",
            SequenceParam::NoteDuration => "Note Duration",
            SequenceParam::Division => "Division",
            SequenceParam::Transpose => "Transpose",
            SequenceParam::Swing => "Swing",
            SequenceParam::Bpm => "BPM",
        }
    }
}

/// How the next sequence is cued when the current one wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankMode {
    None,
    Loop2,
    Loop4,
    Loop8,
    Random,
}

impl BankMode {
    pub fn name(&self) -> &'static str {
        match self {
            BankMode::None => "off",
            BankMode::Loop2 => "loop 2",
            BankMode::Loop4 => "loop 4",
            BankMode::Loop8 => "loop 8",
            BankMode::Random => "random",
        }
    }

    pub fn from_index(i: i32) -> Self {
        match i {
            1 => BankMode::Loop2,
            2 => BankMode::Loop4,
            3 => BankMode::Loop8,
            4 => BankMode::Random,
            _ => BankMode::None,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            BankMode::None => 0,
            BankMode::Loop2 => 1,
            BankMode::Loop4 => 2,
            BankMode::Loop8 => 3,
            BankMode::Random => 4,
        }
    }

    /// Sequence to cue after `current`, or None to stay put
    pub fn next<R: Rng>(self, current: usize, rng: &mut R) -> Option<usize> {
        let current = current.min(NUM_SEQUENCES - 1);
        match self {
            BankMode::None => None,
            BankMode::Loop2 => Some(current ^ 1),
            BankMode::Loop4 => Some((current & !3) | ((current + 1) & 3)),
            BankMode::Loop8 => Some((current + 1) % NUM_SEQUENCES),
            BankMode::Random => {
                // Pick among the other seven
                let pick = rng.gen_range(0..NUM_SEQUENCES - 1);
                Some(if pick >= current { pick + 1 } else { pick })
            }
        }
    }
}

/// One 16-step, 4-voice pattern with its playback settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// notes[voice][step]; None is a rest
    pub notes: [[Option<i32>; STEPS]; SEQ_VOICES],
    pub tie: [bool; STEPS],
    pub mute: [bool; STEPS],
    pub velocity: [u8; STEPS],
    pub control_num: [i32; CONTROLLERS],
    pub control_value: [[i32; STEPS]; CONTROLLERS],
    /// 0-1023, mapped onto the step length
    pub note_duration: i32,
    /// Index into SEQ_DIVISIONS
    pub division: usize,
    /// 1-16
    pub length: usize,
    /// -36..=36 semitones
    pub transpose: i32,
    /// 0-1023
    pub swing: i32,
    pub bpm: u32,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            notes: [[None; STEPS]; SEQ_VOICES],
            tie: [false; STEPS],
            mute: [false; STEPS],
            velocity: [127; STEPS],
            control_num: [CONTROLLER_UNSET; CONTROLLERS],
            control_value: [[CONTROLLER_UNSET; STEPS]; CONTROLLERS],
            note_duration: 1023,
            division: DEFAULT_DIVISION,
            length: STEPS,
            transpose: 0,
            swing: 0,
            bpm: 120,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Step length in clock ticks
    pub fn division_ticks(&self) -> u32 {
        SEQ_DIVISIONS[self.division.min(SEQ_DIVISIONS.len() - 1)]
    }

    /// Store the notes of one step (up to four, extra slots become rests)
    pub fn set_step(&mut self, step: usize, notes: &[i32], velocity: u8) {
        if step >= STEPS {
            return;
        }
        for voice in 0..SEQ_VOICES {
            self.notes[voice][step] = notes
                .get(voice)
                .map(|n| (*n).clamp(NOTE_MIN, NOTE_MAX));
        }
        self.velocity[step] = velocity.min(127);
        self.tie[step] = false;
        self.mute[step] = false;
    }

    pub fn clear_step(&mut self, step: usize) {
        if step >= STEPS {
            return;
        }
        for voice in 0..SEQ_VOICES {
            self.notes[voice][step] = None;
        }
        self.tie[step] = false;
        self.mute[step] = false;
        self.velocity[step] = 127;
        for c in 0..CONTROLLERS {
            self.control_value[c][step] = CONTROLLER_UNSET;
        }
    }

    pub fn toggle_tie(&mut self, step: usize) -> bool {
        if step >= STEPS {
            return false;
        }
        self.tie[step] = !self.tie[step];
        self.tie[step]
    }

    pub fn toggle_mute(&mut self, step: usize) -> bool {
        if step >= STEPS {
            return false;
        }
        self.mute[step] = !self.mute[step];
        self.mute[step]
    }

    pub fn set_length(&mut self, length: i32) {
        self.length = length.clamp(1, STEPS as i32) as usize;
    }

    pub fn set_note_duration(&mut self, duration: i32) {
        self.note_duration = duration.clamp(0, 1023);
    }

    pub fn set_division(&mut self, division: i32) {
        self.division = division.clamp(0, SEQ_DIVISIONS.len() as i32 - 1) as usize;
    }

    pub fn set_transpose(&mut self, transpose: i32) {
        self.transpose = transpose.clamp(-36, 36);
    }

    pub fn set_swing(&mut self, swing: i32) {
        self.swing = swing.clamp(0, 1023);
    }

    pub fn set_bpm(&mut self, bpm: i32) {
        self.bpm = bpm.clamp(20, 320) as u32;
    }

    pub fn set(&mut self, param: SequenceParam, value: i32) {
        match param {
            SequenceParam::Length => self.set_length(value),
            SequenceParam::NoteDuration => self.set_note_duration(value),
            SequenceParam::Division => self.set_division(value),
            SequenceParam::Transpose => self.set_transpose(value),
            SequenceParam::Swing => self.set_swing(value),
            SequenceParam::Bpm => self.set_bpm(value),
        }
    }

    /// Returns true if any step holds a note
    pub fn has_content(&self) -> bool {
        self.notes.iter().any(|v| v.iter().any(|n| n.is_some()))
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

/// The eight stored sequences plus the global cue mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceBank {
    pub sequences: [Sequence; NUM_SEQUENCES],
    pub mode: BankMode,
}

impl SequenceBank {
    pub fn new() -> Self {
        Self {
            sequences: std::array::from_fn(|_| Sequence::new()),
            mode: BankMode::None,
        }
    }

    pub fn get(&self, index: usize) -> &Sequence {
        &self.sequences[index.min(NUM_SEQUENCES - 1)]
    }

    /// `None` for an index outside the bank
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Sequence> {
        self.sequences.get_mut(index)
    }

    pub fn copy(&mut self, src: usize, dst: usize) {
        if src >= NUM_SEQUENCES || dst >= NUM_SEQUENCES || src == dst {
            return;
        }
        self.sequences[dst] = self.sequences[src].clone();
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(seq) = self.get_mut(index) {
            seq.clear();
        }
    }
}

impl Default for SequenceBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn bank_cue_modes() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(BankMode::None.next(3, &mut rng), None);
        assert_eq!(BankMode::Loop2.next(4, &mut rng), Some(5));
        assert_eq!(BankMode::Loop2.next(5, &mut rng), Some(4));
        assert_eq!(BankMode::Loop4.next(2, &mut rng), Some(3));
        assert_eq!(BankMode::Loop4.next(3, &mut rng), Some(0));
        assert_eq!(BankMode::Loop4.next(6, &mut rng), Some(7));
        assert_eq!(BankMode::Loop4.next(7, &mut rng), Some(4));
        assert_eq!(BankMode::Loop8.next(7, &mut rng), Some(0));
        for current in 0..NUM_SEQUENCES {
            for _ in 0..50 {
                let next = BankMode::Random.next(current, &mut rng).unwrap();
                assert_ne!(next, current);
                assert!(next < NUM_SEQUENCES);
            }
        }
    }

    #[test]
    fn set_step_clamps_and_clears_flags() {
        let mut seq = Sequence::new();
        seq.toggle_tie(2);
        seq.toggle_mute(2);
        seq.set_step(2, &[0, 100, -100], 200);
        assert_eq!(seq.notes[0][2], Some(0));
        assert_eq!(seq.notes[1][2], Some(NOTE_MAX));
        assert_eq!(seq.notes[2][2], Some(NOTE_MIN));
        assert_eq!(seq.notes[3][2], None);
        assert_eq!(seq.velocity[2], 127);
        assert!(!seq.tie[2] && !seq.mute[2]);
        assert!(seq.has_content());

        seq.clear_step(2);
        assert!(!seq.has_content());
    }

    #[test]
    fn settings_are_clamped() {
        let mut seq = Sequence::new();
        seq.set_length(0);
        assert_eq!(seq.length, 1);
        seq.set_division(9);
        assert_eq!(seq.division_ticks(), 12);
        seq.set_transpose(-99);
        assert_eq!(seq.transpose, -36);
        seq.set_bpm(1000);
        assert_eq!(seq.bpm, 320);
    }

    #[test]
    fn copy_and_clear() {
        let mut bank = SequenceBank::new();
        bank.sequences[0].set_step(0, &[5], 90);
        bank.sequences[0].swing = 300;
        bank.copy(0, 6);
        assert_eq!(bank.get(6), bank.get(0));
        bank.clear(0);
        assert_eq!(bank.get(0), &Sequence::new());
        assert_eq!(bank.get(6).swing, 300);
    }

    #[test]
    fn indices_past_the_bank_touch_nothing() {
        let mut bank = SequenceBank::new();
        bank.sequences[7].set_step(0, &[2], 90);
        assert!(bank.get_mut(NUM_SEQUENCES).is_none());
        bank.clear(99);
        bank.copy(7, 12);
        assert!(bank.sequences[7].has_content());
    }
}
