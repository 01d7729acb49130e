use serde::{Deserialize, Serialize};

use crate::synth::{MonoMode, VOICES};

/// Front-panel keys, one octave C to C
pub const PANEL_KEYS: usize = 13;
/// Notes remembered for mono note priority
pub const HELD_NOTES: usize = 10;

/// Where played notes come from; switching clears everything held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteSource {
    Panel,
    Midi,
}

/// What the envelope has to do after a note event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoteResponse {
    pub trigger: bool,
    pub release: bool,
}

impl NoteResponse {
    fn trigger() -> Self {
        Self {
            trigger: true,
            release: false,
        }
    }

    fn release() -> Self {
        Self {
            trigger: false,
            release: true,
        }
    }
}

/// Notes captured from what is currently held, for step entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Captured {
    notes: [i32; VOICES],
    len: usize,
}

impl Captured {
    pub fn notes(&self) -> &[i32] {
        &self.notes[..self.len]
    }
}

/// Voice slots and note-priority bookkeeping
#[derive(Debug, Clone)]
pub struct VoiceAllocator {
    voices: [Option<i32>; VOICES],
    sounding: [bool; VOICES],
    mute_on_trigger: [bool; VOICES],
    /// Mono priority list in arrival order
    held: [i32; HELD_NOTES],
    held_len: usize,
    pressed: [bool; PANEL_KEYS],
    source: NoteSource,
    last_velocity: u8,
}

impl VoiceAllocator {
    pub fn new() -> Self {
        Self {
            voices: [None; VOICES],
            sounding: [false; VOICES],
            mute_on_trigger: [false; VOICES],
            held: [0; HELD_NOTES],
            held_len: 0,
            pressed: [false; PANEL_KEYS],
            source: NoteSource::Panel,
            last_velocity: 127,
        }
    }

    pub fn voices(&self) -> &[Option<i32>; VOICES] {
        &self.voices
    }

    pub fn sounding(&self) -> &[bool; VOICES] {
        &self.sounding
    }

    pub fn mute_on_trigger(&self) -> &[bool; VOICES] {
        &self.mute_on_trigger
    }

    pub fn source(&self) -> NoteSource {
        self.source
    }

    pub fn last_velocity(&self) -> u8 {
        self.last_velocity
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }

    /// Change the note source. Returns true if it changed, in which case
    /// every voice and held note has been dropped.
    pub fn set_source(&mut self, source: NoteSource) -> bool {
        if self.source == source {
            return false;
        }
        self.source = source;
        self.clear();
        self.pressed = [false; PANEL_KEYS];
        true
    }

    /// Drop all voice assignments and held notes
    pub fn clear(&mut self) {
        self.voices = [None; VOICES];
        self.held_len = 0;
    }

    /// Remember the state of a front-panel key
    pub fn set_pressed(&mut self, key: usize, down: bool) {
        if let Some(p) = self.pressed.get_mut(key) {
            *p = down;
        }
    }

    pub fn note_on(&mut self, note: i32, velocity: u8, mode: MonoMode, unison: usize) -> NoteResponse {
        if velocity == 0 {
            return self.note_off(note, mode, unison);
        }
        self.last_velocity = velocity.min(127);
        match mode {
            MonoMode::Paraphonic => self.para_on(note),
            _ => self.mono_on(note, mode, unison),
        }
    }

    pub fn note_off(&mut self, note: i32, mode: MonoMode, unison: usize) -> NoteResponse {
        match mode {
            MonoMode::Paraphonic => self.para_off(note),
            _ => self.mono_off(note, mode, unison),
        }
    }

    fn para_on(&mut self, note: i32) -> NoteResponse {
        if self.voices.contains(&Some(note)) {
            return NoteResponse::default();
        }
        let active = self.active_voices();
        let Some(free) = self.voices.iter().position(|v| v.is_none()) else {
            return NoteResponse::default();
        };
        self.voices[free] = Some(note);
        if active == 0 {
            // First note of a new chord silences whatever is left over
            for (i, m) in self.mute_on_trigger.iter_mut().enumerate() {
                if i != free {
                    *m = true;
                }
            }
        }
        NoteResponse::trigger()
    }

    fn para_off(&mut self, note: i32) -> NoteResponse {
        let mut freed = false;
        for v in self.voices.iter_mut() {
            if *v == Some(note) {
                *v = None;
                freed = true;
            }
        }
        if freed && self.active_voices() == 0 {
            NoteResponse::release()
        } else {
            NoteResponse::default()
        }
    }

    fn priority_note(&self, mode: MonoMode) -> Option<i32> {
        let held = &self.held[..self.held_len];
        match mode {
            MonoMode::Highest => held.iter().copied().max(),
            MonoMode::Lowest => held.iter().copied().min(),
            _ => held.last().copied(),
        }
    }

    fn set_lead(&mut self, note: Option<i32>, unison: usize) {
        for (i, v) in self.voices.iter_mut().enumerate() {
            if i <= unison.min(VOICES - 1) {
                *v = note;
            }
        }
    }

    fn mono_on(&mut self, note: i32, mode: MonoMode, unison: usize) -> NoteResponse {
        if self.voices[0].is_none() {
            self.held_len = 0;
        }
        if self.held_len == HELD_NOTES {
            self.held.copy_within(1.., 0);
            self.held_len -= 1;
        }
        self.held[self.held_len] = note;
        self.held_len += 1;

        let lead = self.priority_note(mode);
        if mode != MonoMode::Last && self.voices[0] == lead {
            return NoteResponse::default();
        }
        self.set_lead(lead, unison);
        NoteResponse::trigger()
    }

    fn mono_off(&mut self, note: i32, mode: MonoMode, unison: usize) -> NoteResponse {
        let mut kept = 0;
        for i in 0..self.held_len {
            if self.held[i] != note {
                self.held[kept] = self.held[i];
                kept += 1;
            }
        }
        self.held_len = kept;

        match self.priority_note(mode) {
            Some(lead) if self.voices[0] == Some(lead) => NoteResponse::default(),
            Some(lead) => {
                self.set_lead(Some(lead), unison);
                NoteResponse::trigger()
            }
            None => {
                self.voices = [None; VOICES];
                NoteResponse::release()
            }
        }
    }

    /// Take an assignment from the sequencer or arpeggiator
    pub fn assign(&mut self, voices: [Option<i32>; VOICES], mute: [bool; VOICES]) {
        self.voices = voices;
        for (m, new) in self.mute_on_trigger.iter_mut().zip(mute) {
            *m |= new;
        }
    }

    /// Voices with a note are sounding once their pitch is applied
    pub fn mark_sounding(&mut self) {
        for (s, v) in self.sounding.iter_mut().zip(self.voices) {
            if v.is_some() {
                *s = true;
            }
        }
    }

    /// Attack start: silence the voices flagged on the previous trigger
    pub fn apply_mutes(&mut self) {
        for (s, m) in self.sounding.iter_mut().zip(self.mute_on_trigger.iter_mut()) {
            if *m {
                *s = false;
                *m = false;
            }
        }
    }

    /// Release finished: nothing sounds and nothing stays assigned
    pub fn finish(&mut self) {
        self.sounding = [false; VOICES];
        self.clear();
    }

    /// Notes for step entry: pressed panel keys in key order, or the
    /// currently assigned voices for MIDI input. None when nothing is held.
    pub fn capture(&self) -> Option<Captured> {
        let mut notes = [0; VOICES];
        let mut len = 0;
        let mut push = |n: i32| {
            if len < VOICES {
                notes[len] = n;
                len += 1;
            }
        };
        match self.source {
            NoteSource::Panel => self
                .pressed
                .iter()
                .enumerate()
                .filter(|(_, p)| **p)
                .for_each(|(k, _)| push(k as i32)),
            NoteSource::Midi => self.voices.iter().flatten().for_each(|&n| push(n)),
        }
        (len > 0).then_some(Captured { notes, len })
    }
}

impl Default for VoiceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARA: MonoMode = MonoMode::Paraphonic;

    #[test]
    fn three_keys_fill_voices_in_press_order() {
        let mut alloc = VoiceAllocator::new();
        assert!(alloc.note_on(0, 100, PARA, 0).trigger);
        assert!(alloc.note_on(4, 100, PARA, 0).trigger);
        assert!(alloc.note_on(7, 100, PARA, 0).trigger);
        assert_eq!(alloc.voices(), &[Some(0), Some(4), Some(7), None]);

        let r = alloc.note_off(4, PARA, 0);
        assert_eq!(r, NoteResponse::default());
        assert_eq!(alloc.voices(), &[Some(0), None, Some(7), None]);

        // Freed slot is reused first
        alloc.note_on(12, 100, PARA, 0);
        assert_eq!(alloc.voices(), &[Some(0), Some(12), Some(7), None]);
    }

    #[test]
    fn first_voice_mutes_the_others() {
        let mut alloc = VoiceAllocator::new();
        alloc.note_on(3, 100, PARA, 0);
        assert_eq!(alloc.mute_on_trigger(), &[false, true, true, true]);
        alloc.mark_sounding();
        alloc.apply_mutes();
        assert_eq!(alloc.sounding(), &[true, false, false, false]);
        assert_eq!(alloc.mute_on_trigger(), &[false; 4]);
    }

    #[test]
    fn last_key_up_releases() {
        let mut alloc = VoiceAllocator::new();
        alloc.note_on(0, 100, PARA, 0);
        alloc.note_on(2, 100, PARA, 0);
        assert!(!alloc.note_off(0, PARA, 0).release);
        assert!(alloc.note_off(2, PARA, 0).release);
        // Unknown note does not release again
        assert!(!alloc.note_off(2, PARA, 0).release);
    }

    #[test]
    fn fifth_note_and_duplicates_are_ignored() {
        let mut alloc = VoiceAllocator::new();
        for n in 0..4 {
            alloc.note_on(n, 100, PARA, 0);
        }
        assert!(!alloc.note_on(9, 100, PARA, 0).trigger);
        alloc.note_off(2, PARA, 0);
        assert!(!alloc.note_on(1, 100, PARA, 0).trigger);
        assert_eq!(alloc.voices(), &[Some(0), Some(1), None, Some(3)]);
    }

    #[test]
    fn zero_velocity_is_note_off() {
        let mut alloc = VoiceAllocator::new();
        alloc.note_on(5, 100, PARA, 0);
        assert!(alloc.note_on(5, 0, PARA, 0).release);
        assert_eq!(alloc.active_voices(), 0);
    }

    #[test]
    fn highest_priority_recovers_on_release() {
        let m = MonoMode::Highest;
        let mut alloc = VoiceAllocator::new();
        assert!(alloc.note_on(0, 100, m, 0).trigger);
        assert!(alloc.note_on(7, 100, m, 0).trigger);
        // Lower note does not steal
        assert!(!alloc.note_on(4, 100, m, 0).trigger);
        assert_eq!(alloc.voices()[0], Some(7));
        assert!(alloc.note_off(7, m, 0).trigger);
        assert_eq!(alloc.voices()[0], Some(4));
        assert!(!alloc.note_off(0, m, 0).trigger);
        assert!(alloc.note_off(4, m, 0).release);
        assert_eq!(alloc.voices(), &[None; 4]);
    }

    #[test]
    fn lowest_priority_with_unison() {
        let m = MonoMode::Lowest;
        let mut alloc = VoiceAllocator::new();
        alloc.note_on(5, 100, m, 2);
        assert_eq!(alloc.voices(), &[Some(5), Some(5), Some(5), None]);
        alloc.note_on(2, 100, m, 2);
        assert_eq!(alloc.voices(), &[Some(2), Some(2), Some(2), None]);
        alloc.note_off(2, m, 2);
        assert_eq!(alloc.voices()[2], Some(5));
    }

    #[test]
    fn last_priority_returns_to_previous_note() {
        let m = MonoMode::Last;
        let mut alloc = VoiceAllocator::new();
        alloc.note_on(0, 100, m, 0);
        alloc.note_on(9, 100, m, 0);
        alloc.note_on(4, 100, m, 0);
        assert_eq!(alloc.voices()[0], Some(4));
        alloc.note_off(4, m, 0);
        assert_eq!(alloc.voices()[0], Some(9));
        alloc.note_off(0, m, 0);
        assert_eq!(alloc.voices()[0], Some(9));
    }

    #[test]
    fn held_list_drops_oldest_when_full() {
        let m = MonoMode::Last;
        let mut alloc = VoiceAllocator::new();
        for n in 0..12 {
            alloc.note_on(n, 100, m, 0);
        }
        for n in (2..12).rev() {
            alloc.note_off(n, m, 0);
        }
        assert_eq!(alloc.voices()[0], None);
    }

    #[test]
    fn source_switch_clears_everything() {
        let mut alloc = VoiceAllocator::new();
        alloc.note_on(0, 100, PARA, 0);
        assert!(!alloc.set_source(NoteSource::Panel));
        assert!(alloc.set_source(NoteSource::Midi));
        assert_eq!(alloc.active_voices(), 0);
    }

    #[test]
    fn capture_from_panel_and_midi() {
        let mut alloc = VoiceAllocator::new();
        assert_eq!(alloc.capture(), None);
        for key in [12, 0, 4, 7, 9] {
            alloc.set_pressed(key, true);
        }
        assert_eq!(alloc.capture().unwrap().notes(), &[0, 4, 7, 9]);

        alloc.set_source(NoteSource::Midi);
        assert_eq!(alloc.capture(), None);
        alloc.note_on(-3, 90, PARA, 0);
        alloc.note_on(10, 90, PARA, 0);
        alloc.note_off(-3, PARA, 0);
        assert_eq!(alloc.capture().unwrap().notes(), &[10]);
        assert_eq!(alloc.last_velocity(), 90);
    }

    #[test]
    fn finish_clears_sounding_and_voices() {
        let mut alloc = VoiceAllocator::new();
        alloc.note_on(0, 100, PARA, 0);
        alloc.mark_sounding();
        alloc.finish();
        assert_eq!(alloc.sounding(), &[false; 4]);
        assert_eq!(alloc.voices(), &[None; 4]);
    }
}
