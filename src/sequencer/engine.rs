use rand::Rng;
use serde::{Deserialize, Serialize};

use super::pattern::{Sequence, SequenceBank, NUM_SEQUENCES, SEQ_VOICES};
use crate::synth::params::map_range;

/// Step advance policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayMode {
    Forward,
    Reverse,
    Pendulum,
    RandomInterval,
    Drunk,
    Random,
}

impl PlayMode {
    pub const ALL: [PlayMode; 6] = [
        PlayMode::Forward,
        PlayMode::Reverse,
        PlayMode::Pendulum,
        PlayMode::RandomInterval,
        PlayMode::Drunk,
        PlayMode::Random,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PlayMode::Forward => "forward",
            PlayMode::Reverse => "reverse",
            PlayMode::Pendulum => "pendulum",
            PlayMode::RandomInterval => "rnd interval",
            PlayMode::Drunk => "drunk",
            PlayMode::Random => "random",
        }
    }

    pub fn from_index(i: i32) -> Self {
        Self::ALL[i.clamp(0, Self::ALL.len() as i32 - 1) as usize]
    }

    pub fn index(self) -> i32 {
        Self::ALL.iter().position(|m| *m == self).unwrap_or(0) as i32
    }
}

/// Voice assignment produced by one sequencer step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepNotes {
    pub voices: [Option<i32>; SEQ_VOICES],
    /// Voices to silence on the next attack
    pub mute: [bool; SEQ_VOICES],
    /// Set when the step sounds a note; carries the step velocity
    pub trigger: Option<u8>,
    /// Mono rest: voices above the lead keep whatever they held
    pub hold_upper: bool,
}

/// Transport and step-advance state for the sequence bank
#[derive(Debug, Clone)]
pub struct SequencerEngine {
    running: bool,
    step: usize,
    current: usize,
    selected: usize,
    play_mode: PlayMode,
    increment: i32,
    swing_ticks: u32,
    release_pulse: Option<u32>,
    released: bool,
}

impl SequencerEngine {
    pub fn new() -> Self {
        Self {
            running: false,
            step: 0,
            current: 0,
            selected: 0,
            play_mode: PlayMode::Forward,
            increment: 1,
            swing_ticks: 0,
            release_pulse: None,
            released: true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn play_mode(&self) -> PlayMode {
        self.play_mode
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        self.play_mode = mode;
    }

    pub fn release_pulse(&self) -> Option<u32> {
        self.release_pulse
    }

    /// Start or stop playback, rewinding to step 0 either way
    pub fn set_running(&mut self, running: bool) {
        self.running = running;
        self.step = 0;
        if !running {
            self.release_pulse = None;
            self.released = true;
        }
    }

    /// Choose a sequence. While stopped it becomes current at once,
    /// otherwise it is cued for the next wrap to step 0.
    pub fn select(&mut self, index: usize) {
        let index = index.min(NUM_SEQUENCES - 1);
        self.selected = index;
        if !self.running {
            self.current = index;
        }
    }

    /// Let the bank mode pick the sequence that follows the current one
    pub fn cue_next<R: Rng>(&mut self, bank: &SequenceBank, rng: &mut R) {
        if let Some(next) = bank.mode.next(self.current, rng) {
            self.selected = next;
        }
    }

    /// Recompute swing on the first (long) subdivision of each pair and
    /// report whether a step falls on `pulse`.
    pub fn step_due(&mut self, pulse: u32, seq: &Sequence) -> bool {
        let division = seq.division_ticks();
        if pulse < division {
            self.swing_ticks = map_range(seq.swing as i64, 0, 1023, 0, (division / 2) as i64) as u32;
        }
        pulse == 0 || pulse == division + self.swing_ticks
    }

    /// Check the scheduled release against `pulse`. Returns Some(true) when
    /// the envelope still has to be released, Some(false) when only the MIDI
    /// note-offs are due, None when nothing fires.
    pub fn release_due(&mut self, pulse: u32) -> Option<bool> {
        if self.release_pulse != Some(pulse) {
            return None;
        }
        self.release_pulse = None;
        let envelope = !self.released;
        self.released = true;
        Some(envelope)
    }

    /// Step index that follows the current one, wrapped into the pattern
    pub fn following_step(&self, length: usize) -> usize {
        let length = length.max(1) as i32;
        let increment = if self.increment == 0 { 1 } else { self.increment };
        (self.step as i32 + increment).rem_euclid(length) as usize
    }

    fn roll_increment<R: Rng>(&mut self, length: usize, rng: &mut R) {
        let random_interval = |rng: &mut R| {
            if length > 1 {
                rng.gen_range(1..length) as i32
            } else {
                1
            }
        };
        match self.play_mode {
            PlayMode::Forward => self.increment = 1,
            PlayMode::Reverse => self.increment = -1,
            PlayMode::Pendulum => {
                if self.step == 0 {
                    self.increment = 1;
                } else if self.step + 1 == length {
                    self.increment = -1;
                }
            }
            PlayMode::RandomInterval => {
                if self.step == 0 {
                    self.increment = random_interval(rng);
                }
            }
            PlayMode::Drunk => self.increment = if rng.gen_bool(0.5) { 1 } else { -1 },
            PlayMode::Random => self.increment = random_interval(rng),
        }
    }

    fn schedule_release(&mut self, pulse: u32, seq: &Sequence) {
        let division = seq.division_ticks();
        let duration = map_range(seq.note_duration as i64, 0, 1023, 4, division as i64 - 1) as u32;
        self.release_pulse = Some((pulse + duration) % (division * 2));
    }

    /// Play the current step and advance.
    ///
    /// `unison` is Some(extra voices) in mono mode. Returns the voice
    /// assignment when the step is neither muted nor tied.
    pub fn next_step<R: Rng>(
        &mut self,
        bank: &SequenceBank,
        pulse: u32,
        unison: Option<usize>,
        rng: &mut R,
    ) -> Option<StepNotes> {
        if self.step == 0 && self.current != self.selected {
            self.current = self.selected;
            self.cue_next(bank, rng);
        }
        let seq = bank.get(self.current);
        let length = seq.length.clamp(1, seq.tie.len());
        if self.step >= length {
            self.step = 0;
        }
        self.roll_increment(length, rng);

        let step = self.step;
        let next_tied = seq.tie[self.following_step(length)];
        let mut notes = None;

        if !seq.mute[step] && !seq.tie[step] {
            let note = |voice: usize| seq.notes[voice][step].map(|n| n + seq.transpose);
            let mut voices = [None; SEQ_VOICES];
            let mut mute = [false; SEQ_VOICES];
            let mut hold_upper = false;
            match unison {
                None => {
                    for (v, slot) in voices.iter_mut().enumerate() {
                        *slot = note(v);
                        mute[v] = slot.is_none();
                    }
                }
                Some(_) if note(0).is_none() => {
                    mute[0] = true;
                    hold_upper = true;
                }
                Some(extra) => {
                    let lead = note(0);
                    for (v, slot) in voices.iter_mut().enumerate() {
                        *slot = if v <= extra { lead } else { None };
                        mute[v] = slot.is_none();
                    }
                }
            }

            if !next_tied {
                self.schedule_release(pulse, seq);
            }
            let trigger = voices.iter().any(|v| v.is_some()).then_some(seq.velocity[step]);
            if trigger.is_some() {
                self.released = false;
            }
            notes = Some(StepNotes { voices, mute, trigger, hold_upper });
        }

        // A tie run releases once, at its last tied step
        if seq.tie[step] && !next_tied {
            self.schedule_release(pulse, seq);
        }

        if seq.mute[step] {
            if self.release_pulse.is_some() {
                self.release_pulse = Some((pulse + 1) % (seq.division_ticks() * 2));
            }
        }

        self.step = self.following_step(length);
        notes
    }
}

impl Default for SequencerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bank_with(seq: Sequence) -> SequenceBank {
        let mut bank = SequenceBank::new();
        bank.sequences[0] = seq;
        bank
    }

    fn running() -> SequencerEngine {
        let mut engine = SequencerEngine::new();
        engine.set_running(true);
        engine
    }

    #[test]
    fn next_step_stays_in_range_for_every_mode() {
        let mut rng = StdRng::seed_from_u64(42);
        for mode in PlayMode::ALL {
            for length in 1..=16 {
                let mut seq = Sequence::new();
                seq.set_length(length);
                let bank = bank_with(seq);
                let mut engine = running();
                engine.set_play_mode(mode);
                for _ in 0..200 {
                    engine.next_step(&bank, 0, None, &mut rng);
                    assert!(engine.step() < length as usize, "{:?} len {}", mode, length);
                }
            }
        }
    }

    #[test]
    fn pendulum_flips_at_both_ends() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_length(4);
        let bank = bank_with(seq);
        let mut engine = running();
        engine.set_play_mode(PlayMode::Pendulum);
        let mut steps = vec![engine.step()];
        for _ in 0..8 {
            engine.next_step(&bank, 0, None, &mut rng);
            steps.push(engine.step());
        }
        assert_eq!(steps, vec![0, 1, 2, 3, 2, 1, 0, 1, 2]);
    }

    #[test]
    fn reverse_wraps_to_last_step() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_length(5);
        let bank = bank_with(seq);
        let mut engine = running();
        engine.set_play_mode(PlayMode::Reverse);
        engine.next_step(&bank, 0, None, &mut rng);
        assert_eq!(engine.step(), 4);
    }

    #[test]
    fn plain_step_assigns_transposed_voices() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_step(0, &[0, 4], 100);
        seq.set_transpose(2);
        let bank = bank_with(seq);
        let mut engine = running();
        let notes = engine.next_step(&bank, 0, None, &mut rng).unwrap();
        assert_eq!(notes.voices, [Some(2), Some(6), None, None]);
        assert_eq!(notes.mute, [false, false, true, true]);
        assert_eq!(notes.trigger, Some(100));
        // 16ths: duration 1023 maps to 23 ticks
        assert_eq!(engine.release_pulse(), Some(23));
    }

    #[test]
    fn mono_step_fills_unison_voices() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_step(0, &[7, 9, 11], 90);
        let bank = bank_with(seq);
        let mut engine = running();
        let notes = engine.next_step(&bank, 0, Some(1), &mut rng).unwrap();
        assert_eq!(notes.voices, [Some(7), Some(7), None, None]);
        assert!(!notes.hold_upper);
    }

    #[test]
    fn mono_rest_leaves_upper_voices_alone() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_step(1, &[5], 90);
        let bank = bank_with(seq);
        let mut engine = running();
        let notes = engine.next_step(&bank, 0, Some(2), &mut rng).unwrap();
        assert_eq!(notes.trigger, None);
        assert_eq!(notes.mute, [true, false, false, false]);
        assert!(notes.hold_upper);
    }

    #[test]
    fn rest_step_mutes_without_trigger() {
        let mut rng = StdRng::seed_from_u64(1);
        let bank = bank_with(Sequence::new());
        let mut engine = running();
        let notes = engine.next_step(&bank, 0, None, &mut rng).unwrap();
        assert_eq!(notes.trigger, None);
        assert_eq!(notes.mute, [true; 4]);
    }

    #[test]
    fn tie_run_schedules_one_release_from_last_tied_step() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_step(0, &[0], 127);
        seq.toggle_tie(1);
        let bank = bank_with(seq);
        let mut engine = running();

        // Step 0 is followed by a tie: nothing scheduled yet
        engine.next_step(&bank, 0, None, &mut rng);
        assert_eq!(engine.release_pulse(), None);

        // Step 1 (tied) is followed by an untied step: release from here
        let notes = engine.next_step(&bank, 24, None, &mut rng);
        assert!(notes.is_none());
        assert_eq!(engine.release_pulse(), Some((24 + 23) % 48));

        assert_eq!(engine.release_due(47), Some(true));
        assert_eq!(engine.release_due(47), None);
    }

    #[test]
    fn muted_step_pushes_pending_release_one_pulse() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_step(0, &[0], 127);
        seq.set_note_duration(0);
        seq.toggle_mute(1);
        let bank = bank_with(seq);
        let mut engine = running();

        engine.next_step(&bank, 0, None, &mut rng);
        assert_eq!(engine.release_pulse(), Some(4));
        engine.next_step(&bank, 2, None, &mut rng);
        assert_eq!(engine.release_pulse(), Some(3));
    }

    #[test]
    fn muted_step_without_pending_release_schedules_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.toggle_mute(0);
        let bank = bank_with(seq);
        let mut engine = running();
        assert!(engine.next_step(&bank, 0, None, &mut rng).is_none());
        assert_eq!(engine.release_pulse(), None);
    }

    #[test]
    fn rest_step_release_only_sends_offs() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seq = Sequence::new();
        seq.set_step(0, &[0], 127);
        let bank = bank_with(seq);
        let mut engine = running();
        engine.next_step(&bank, 0, None, &mut rng);
        assert_eq!(engine.release_due(23), Some(true));

        engine.next_step(&bank, 24, None, &mut rng);
        // Step 1 is a rest: release fires for the MIDI offs only
        assert_eq!(engine.release_due(47), Some(false));
    }

    #[test]
    fn swing_delays_second_subdivision() {
        let mut engine = running();
        let mut seq = Sequence::new();
        seq.set_swing(1023);
        assert!(engine.step_due(0, &seq));
        assert!(!engine.step_due(24, &seq));
        assert!(engine.step_due(36, &seq));
        seq.set_swing(0);
        engine.step_due(0, &seq);
        assert!(engine.step_due(24, &seq));
    }

    #[test]
    fn selected_sequence_switches_on_wrap_and_cues_next() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut bank = SequenceBank::new();
        bank.sequences[0].set_length(2);
        bank.mode = crate::sequencer::pattern::BankMode::Loop4;
        let mut engine = running();
        engine.select(2);
        assert_eq!(engine.current(), 0);
        engine.next_step(&bank, 0, None, &mut rng);
        assert_eq!(engine.current(), 2);
        assert_eq!(engine.selected(), 3);
    }

    #[test]
    fn select_while_stopped_is_immediate() {
        let mut engine = SequencerEngine::new();
        engine.select(5);
        assert_eq!(engine.current(), 5);
        engine.select(99);
        assert_eq!(engine.current(), 7);
    }
}
