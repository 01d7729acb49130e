use super::params::map_range;
use super::wavetable::{WaveTable, Wavetables, CYCLE_FIXED, MAX_INCREMENT, PHASE_SHIFT, SILENCE};

/// Voice slots shared by both oscillator engines
pub const VOICES: usize = 4;
/// Two engines of four phase accumulators each
pub const OSCILLATORS: usize = VOICES * 2;

/// One fixed-point phase accumulator
#[derive(Clone, Copy, Debug, Default)]
pub struct Oscillator {
    phase: u32,
    increment: u32,
}

impl Oscillator {
    /// Advance by one sample, wrapping modulo one table cycle. Returns the table index.
    #[inline]
    pub fn advance(&mut self) -> usize {
        self.phase += self.increment;
        if self.phase >= CYCLE_FIXED {
            self.phase -= CYCLE_FIXED;
        }
        (self.phase >> PHASE_SHIFT) as usize
    }

    pub fn set_increment(&mut self, increment: u32) {
        self.increment = increment.min(MAX_INCREMENT);
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }
}

/// Everything besides the voice notes that feeds a pitch computation
#[derive(Clone, Copy, Debug)]
pub struct PitchContext {
    /// Effective octave per engine (after LFO octave modulation)
    pub octave: [i32; 2],
    /// Engine 1 transpose in semitones
    pub osc1_semitones: i32,
    /// Engine 2 fine offset in increment units
    pub osc2_fine: i32,
    /// Summed LFO + envelope + velocity detune per engine, in increment units
    pub detune: [i32; 2],
    /// Per-voice increment spread for mono unison, if active
    pub unison_spread: Option<u32>,
    pub portamento_ms: u32,
}

/// Start and end of the current portamento glide in engine milliseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Glide {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Glide {
    pub fn starting_at(now_ms: u64, portamento_ms: u32) -> Self {
        Self {
            start_ms: now_ms,
            end_ms: now_ms + portamento_ms as u64,
        }
    }
}

/// The eight accumulators plus the glide bookkeeping that feeds them.
///
/// Oscillators `0..4` belong to engine 1 and `4..8` to engine 2; oscillator
/// `i` plays voice `i % 4`.
pub struct OscillatorBank {
    oscillators: [Oscillator; OSCILLATORS],
    source: [u32; OSCILLATORS],
    target: [u32; OSCILLATORS],
}

impl OscillatorBank {
    pub fn new() -> Self {
        Self {
            oscillators: [Oscillator::default(); OSCILLATORS],
            source: [0; OSCILLATORS],
            target: [0; OSCILLATORS],
        }
    }

    pub fn oscillator(&self, i: usize) -> &Oscillator {
        &self.oscillators[i % OSCILLATORS]
    }

    /// Recompute every phase increment from the voice notes.
    ///
    /// Voices without a note keep their previous target so a releasing
    /// note holds its pitch.
    pub fn assign(
        &mut self,
        voices: &[Option<i32>; VOICES],
        tables: &Wavetables,
        ctx: &PitchContext,
        glide: Glide,
        now_ms: u64,
    ) {
        for i in 0..OSCILLATORS {
            let Some(note) = voices[i % VOICES] else {
                continue;
            };
            self.target[i] = if i < VOICES {
                tables.note_increment(note + ctx.octave[0] * 12 + ctx.osc1_semitones)
            } else {
                let base = tables.note_increment(note + ctx.octave[1] * 12) as i64;
                (base + ctx.osc2_fine as i64).clamp(0, MAX_INCREMENT as i64) as u32
            };
        }

        let gliding = ctx.portamento_ms > 0 && now_ms < glide.end_ms;
        for i in 0..OSCILLATORS {
            let current = if gliding {
                map_range(
                    now_ms as i64,
                    glide.start_ms as i64,
                    glide.end_ms as i64,
                    self.source[i] as i64,
                    self.target[i] as i64,
                )
            } else {
                self.source[i] = self.target[i];
                self.target[i] as i64
            };

            let spread = ctx
                .unison_spread
                .map(|s| s as i64 * (i % VOICES) as i64)
                .unwrap_or(0);
            let detune = ctx.detune[i / VOICES] as i64;
            let inc = (current + spread + detune).clamp(0, MAX_INCREMENT as i64);
            self.oscillators[i].set_increment(inc as u32);
        }
    }

    /// Advance all accumulators and return each engine's averaged sample.
    ///
    /// An engine without a table (noise) still advances its phases; its
    /// sample is replaced downstream.
    #[inline]
    pub fn next(&mut self, tables: [Option<&WaveTable>; 2], sounding: &[bool; VOICES]) -> [i32; 2] {
        let mut sums = [0i32; 2];
        for (i, osc) in self.oscillators.iter_mut().enumerate() {
            let index = osc.advance();
            let engine = i / VOICES;
            sums[engine] += match tables[engine] {
                Some(table) if sounding[i % VOICES] => table[index] as i32,
                _ => SILENCE,
            };
        }
        [sums[0] / VOICES as i32, sums[1] / VOICES as i32]
    }
}

impl Default for OscillatorBank {
    fn default() -> Self {
        Self::new()
    }
}
