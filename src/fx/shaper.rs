use serde::{Deserialize, Serialize};

use crate::synth::wavetable::{LOOKUP_SIZE, SAMPLE_MAX, SILENCE};

/// Static transfer curve applied before the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaperKind {
    Off,
    /// y = (1 + k) x / (1 + k |x|)
    SoftClip,
    /// y = x (|x| + a) / (x^2 + (a - 1) |x| + 1)
    Fold,
}

impl ShaperKind {
    pub fn name(&self) -> &'static str {
        match self {
            ShaperKind::Off => "off",
            ShaperKind::SoftClip => "soft",
            ShaperKind::Fold => "fold",
        }
    }

    pub fn from_index(i: i32) -> Self {
        match i {
            1 => ShaperKind::SoftClip,
            2 => ShaperKind::Fold,
            _ => ShaperKind::Off,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            ShaperKind::Off => 0,
            ShaperKind::SoftClip => 1,
            ShaperKind::Fold => 2,
        }
    }
}

fn to_unit(i: usize) -> f32 {
    (i as f32 - SILENCE as f32) / SILENCE as f32
}

fn from_unit(y: f32) -> u16 {
    (y * SILENCE as f32 + SILENCE as f32).clamp(0.0, SAMPLE_MAX as f32) as u16
}

/// Waveshaper lookup table, rebuilt off the audio path whenever its
/// parameters change.
pub struct Waveshaper {
    table: Box<[u16; LOOKUP_SIZE]>,
}

impl Waveshaper {
    pub fn new() -> Self {
        let mut shaper = Self {
            table: Box::new([0; LOOKUP_SIZE]),
        };
        shaper.rebuild(ShaperKind::Off, 0, 0);
        shaper
    }

    /// `amount1` (0-1023) drives the soft clipper, `amount2` (1-10) the fold curve
    pub fn rebuild(&mut self, kind: ShaperKind, amount1: i32, amount2: i32) {
        match kind {
            ShaperKind::Off => {
                for (i, s) in self.table.iter_mut().enumerate() {
                    *s = i as u16;
                }
            }
            ShaperKind::SoftClip => {
                let amount = amount1.clamp(0, 1023) as f32 / 1024.0;
                let k = 2.0 * amount / (1.0 - amount);
                for (i, s) in self.table.iter_mut().enumerate() {
                    let x = to_unit(i);
                    *s = from_unit((1.0 + k) * x / (1.0 + k * x.abs()));
                }
            }
            ShaperKind::Fold => {
                let a = amount2.clamp(1, 10) as f32;
                for (i, s) in self.table.iter_mut().enumerate() {
                    let x = to_unit(i);
                    *s = from_unit(x * (x.abs() + a) / (x * x + (a - 1.0) * x.abs() + 1.0));
                }
            }
        }
    }

    #[inline]
    pub fn process(&self, input: i32) -> i32 {
        self.table[input.clamp(0, SAMPLE_MAX) as usize] as i32
    }
}

impl Default for Waveshaper {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear gain with hard clipping, as a lookup table
pub struct GainTable {
    table: Box<[u16; LOOKUP_SIZE]>,
}

impl GainTable {
    pub fn new() -> Self {
        let mut gain = Self {
            table: Box::new([0; LOOKUP_SIZE]),
        };
        gain.rebuild(0);
        gain
    }

    /// `amount` 0-1023 maps to a gain factor of 1.0-2.0
    pub fn rebuild(&mut self, amount: i32) {
        let factor = 1.0 + amount.clamp(0, 1023) as f32 / 1024.0;
        for (i, s) in self.table.iter_mut().enumerate() {
            let v = (i as f32 - SILENCE as f32) * factor + SILENCE as f32;
            *s = v.clamp(0.0, SAMPLE_MAX as f32) as u16;
        }
    }

    #[inline]
    pub fn process(&self, input: i32) -> i32 {
        self.table[input.clamp(0, SAMPLE_MAX) as usize] as i32
    }
}

impl Default for GainTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit reduction: clear `bits` low bits of the centred sample
#[inline]
pub fn bit_munch(sample: i32, bits: u32) -> i32 {
    let bits = bits.min(11);
    (((sample - SILENCE) >> bits) << bits) + SILENCE
}
