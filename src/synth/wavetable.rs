use serde::{Deserialize, Serialize};

use super::params::midi_to_freq;
use crate::audio::SAMPLE_RATE;

/// Samples per wavetable cycle
pub const WAVE_SAMPLES: usize = 600;
/// Largest value in the unsigned 12-bit sample domain
pub const SAMPLE_MAX: i32 = 4095;
/// Midpoint of the 12-bit domain (silence)
pub const SILENCE: i32 = 2048;
/// Size of the 12-bit lookup tables (volume, waveshaper, gain)
pub const LOOKUP_SIZE: usize = 4096;

/// Phase accumulator fraction bits; the integer part indexes the wavetable
pub const PHASE_SHIFT: u32 = 20;
/// One full cycle in accumulator units
pub const CYCLE_FIXED: u32 = (WAVE_SAMPLES as u32) << PHASE_SHIFT;
/// Ceiling for any phase increment
pub const MAX_INCREMENT: u32 = 178_954_880;
/// Number of entries in the note increment table
pub const NOTE_COUNT: usize = 128;

/// Pulse width offset limit, in table samples either side of the midpoint
pub const PULSE_WIDTH_LIMIT: i32 = (WAVE_SAMPLES as i32 / 2) - 10;

pub type WaveTable = [u16; WAVE_SAMPLES];

/// Wave selection for an oscillator engine (and for the LFO, minus noise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveShape {
    Sine,
    Triangle,
    Saw,
    Square,
    User1,
    User2,
    User3,
    Noise,
}

impl WaveShape {
    pub fn name(&self) -> &'static str {
        match self {
            WaveShape::Sine => "sine",
            WaveShape::Triangle => "triangle",
            WaveShape::Saw => "saw",
            WaveShape::Square => "square",
            WaveShape::User1 => "user1",
            WaveShape::User2 => "user2",
            WaveShape::User3 => "user3",
            WaveShape::Noise => "noise",
        }
    }

    /// Out-of-range indices fall back to triangle, the power-on shape
    pub fn from_index(i: i32) -> Self {
        match i {
            0 => WaveShape::Sine,
            1 => WaveShape::Triangle,
            2 => WaveShape::Saw,
            3 => WaveShape::Square,
            4 => WaveShape::User1,
            5 => WaveShape::User2,
            6 => WaveShape::User3,
            7 => WaveShape::Noise,
            _ => WaveShape::Triangle,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            WaveShape::Sine => 0,
            WaveShape::Triangle => 1,
            WaveShape::Saw => 2,
            WaveShape::Square => 3,
            WaveShape::User1 => 4,
            WaveShape::User2 => 5,
            WaveShape::User3 => 6,
            WaveShape::Noise => 7,
        }
    }
}

/// Precomputed single-cycle tables plus the note-to-increment table.
///
/// Every table holds unsigned 12-bit samples centred on [`SILENCE`].
pub struct Wavetables {
    sine: WaveTable,
    triangle: WaveTable,
    saw: WaveTable,
    square: WaveTable,
    user: [WaveTable; 3],
    pulse_width: Option<i32>,
    note_increments: [u32; NOTE_COUNT],
}

impl Wavetables {
    pub fn new() -> Self {
        let mut tables = Self {
            sine: sine_table(),
            triangle: triangle_table(),
            saw: saw_table(),
            square: [0; WAVE_SAMPLES],
            user: [[SILENCE as u16; WAVE_SAMPLES]; 3],
            pulse_width: None,
            note_increments: note_table(SAMPLE_RATE as f32),
        };
        tables.set_pulse_width(0);
        tables
    }

    /// Borrow the phase table for a shape. Noise has none: the mixer
    /// substitutes random samples instead of reading a table.
    pub fn table(&self, shape: WaveShape) -> Option<&WaveTable> {
        match shape {
            WaveShape::Sine => Some(&self.sine),
            WaveShape::Triangle => Some(&self.triangle),
            WaveShape::Saw => Some(&self.saw),
            WaveShape::Square => Some(&self.square),
            WaveShape::User1 => Some(&self.user[0]),
            WaveShape::User2 => Some(&self.user[1]),
            WaveShape::User3 => Some(&self.user[2]),
            WaveShape::Noise => None,
        }
    }

    /// Rebuild the square table for a pulse width offset. No-op when unchanged.
    pub fn set_pulse_width(&mut self, pw: i32) {
        let pw = pw.clamp(-PULSE_WIDTH_LIMIT, PULSE_WIDTH_LIMIT);
        if self.pulse_width == Some(pw) {
            return;
        }
        let edge = WAVE_SAMPLES as i32 / 2 + pw;
        for (i, sample) in self.square.iter_mut().enumerate() {
            *sample = if (i as i32) <= edge { 0 } else { SAMPLE_MAX as u16 };
        }
        self.pulse_width = Some(pw);
    }

    pub fn pulse_width(&self) -> i32 {
        self.pulse_width.unwrap_or(0)
    }

    pub fn user_tables(&self) -> &[WaveTable; 3] {
        &self.user
    }

    /// Replace a user table, clamping every sample into the 12-bit domain
    pub fn set_user_table(&mut self, slot: usize, samples: &[i32]) {
        if slot >= self.user.len() {
            return;
        }
        for (dst, src) in self.user[slot].iter_mut().zip(samples.iter()) {
            *dst = (*src).clamp(0, SAMPLE_MAX) as u16;
        }
    }

    /// Copy all three user tables at once (patch load)
    pub fn set_user_tables(&mut self, tables: &[WaveTable; 3]) {
        for (dst, src) in self.user.iter_mut().zip(tables.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = (*s).min(SAMPLE_MAX as u16);
            }
        }
    }

    /// Phase increment for a note index, clamped into the table range
    pub fn note_increment(&self, note: i32) -> u32 {
        self.note_increments[note.clamp(0, NOTE_COUNT as i32 - 1) as usize]
    }
}

impl Default for Wavetables {
    fn default() -> Self {
        Self::new()
    }
}

fn sine_table() -> WaveTable {
    let mut t = [0u16; WAVE_SAMPLES];
    for (i, s) in t.iter_mut().enumerate() {
        let phase = std::f64::consts::TAU / WAVE_SAMPLES as f64 * i as f64;
        *s = ((1.0 + phase.sin()) * SAMPLE_MAX as f64 / 2.0) as u16;
    }
    t
}

fn triangle_table() -> WaveTable {
    let half = WAVE_SAMPLES / 2;
    let mut t = [0u16; WAVE_SAMPLES];
    for (i, s) in t.iter_mut().enumerate() {
        let rising = if i < half { i } else { WAVE_SAMPLES - i };
        *s = (SAMPLE_MAX as usize * rising / half) as u16;
    }
    t
}

fn saw_table() -> WaveTable {
    let mut t = [0u16; WAVE_SAMPLES];
    for (i, s) in t.iter_mut().enumerate() {
        *s = (SAMPLE_MAX as usize * i / WAVE_SAMPLES) as u16;
    }
    t
}

/// Phase increment per MIDI note so that one table cycle lasts one period
fn note_table(sample_rate: f32) -> [u32; NOTE_COUNT] {
    let ticks_per_cycle = CYCLE_FIXED as f64 / sample_rate as f64;
    let mut t = [0u32; NOTE_COUNT];
    for (note, inc) in t.iter_mut().enumerate() {
        let freq = midi_to_freq(note as u8) as f64;
        *inc = ((freq * ticks_per_cycle) as u32).min(MAX_INCREMENT);
    }
    t
}

/// Per-engine volume lookup: maps a 12-bit sample to its scaled value
pub fn volume_table(volume: i32) -> [u16; LOOKUP_SIZE] {
    let volume = volume.clamp(0, 1023);
    let mut t = [0u16; LOOKUP_SIZE];
    for (i, s) in t.iter_mut().enumerate() {
        *s = ((((i as i32 - SILENCE) * volume) >> 10) + SILENCE) as u16;
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_stay_in_12_bit_range() {
        let w = Wavetables::new();
        for shape in [WaveShape::Sine, WaveShape::Triangle, WaveShape::Saw, WaveShape::Square] {
            let t = w.table(shape).unwrap();
            assert!(t.iter().all(|&s| s as i32 <= SAMPLE_MAX));
        }
        assert!(w.table(WaveShape::Noise).is_none());
    }

    #[test]
    fn square_edge_follows_pulse_width() {
        let mut w = Wavetables::new();
        w.set_pulse_width(100);
        let sq = w.table(WaveShape::Square).unwrap();
        assert_eq!(sq[400], 0);
        assert_eq!(sq[401], 4095);

        // Clamped to the limit
        w.set_pulse_width(10_000);
        assert_eq!(w.pulse_width(), PULSE_WIDTH_LIMIT);
    }

    #[test]
    fn note_increments_rise_and_respect_ceiling() {
        let w = Wavetables::new();
        assert!(w.note_increment(61) > w.note_increment(60));
        assert!(w.note_increment(127) <= MAX_INCREMENT);
        // A4 at 44.1kHz: 440 * 600 / 44100 samples per tick, in 20-bit fixed point
        let expected = (440.0 * (CYCLE_FIXED as f64) / 44100.0) as u32;
        assert_eq!(w.note_increment(69), expected);
        assert_eq!(w.note_increment(-5), w.note_increment(0));
    }

    #[test]
    fn user_tables_are_clamped() {
        let mut w = Wavetables::new();
        w.set_user_table(1, &[-20, 5000, 100]);
        let t = w.table(WaveShape::User2).unwrap();
        assert_eq!(&t[..3], &[0, 4095, 100]);
        assert_eq!(t[3], SILENCE as u16);
    }

    #[test]
    fn volume_table_scales_around_centre() {
        let t = volume_table(512);
        assert_eq!(t[2048], 2048);
        assert_eq!(t[4095], 2048 + 1023);
        assert_eq!(t[0], 2048 - 1024);
        assert_eq!(volume_table(0)[4095], 2048);
    }
}
