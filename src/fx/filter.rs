use serde::{Deserialize, Serialize};

use crate::synth::wavetable::SILENCE;

/// Fixed-point fraction bits for filter coefficients
const FX_SHIFT: u32 = 8;
/// 1.0 in the coefficient domain
const SHIFTED_ONE: i32 = 1 << FX_SHIFT;
/// Integrator register bound; keeps an unstable setting from overflowing
const REGISTER_LIMIT: i32 = 1 << 20;

/// Filter type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    LowPass,
    BandPass,
    HighPass,
}

impl FilterMode {
    pub fn name(&self) -> &'static str {
        match self {
            FilterMode::LowPass => "LP",
            FilterMode::BandPass => "BP",
            FilterMode::HighPass => "HP",
        }
    }

    pub fn from_index(i: i32) -> Self {
        match i {
            1 => FilterMode::BandPass,
            2 => FilterMode::HighPass,
            _ => FilterMode::LowPass,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            FilterMode::LowPass => 0,
            FilterMode::BandPass => 1,
            FilterMode::HighPass => 2,
        }
    }
}

#[inline]
fn fxmul(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) >> FX_SHIFT) as i32
}

/// State Variable Filter (2-pole SVF) in 8-bit fixed point.
///
/// Input and output are unsigned 12-bit samples; the integrators run on the
/// signal re-centred around zero.
pub struct SvfFilter {
    mode: FilterMode,
    bypass: bool,
    cutoff: i32,
    resonance: i32,
    feedback: i32,
    // Integrator states
    low0: i32,
    low1: i32,
}

impl SvfFilter {
    pub fn new() -> Self {
        let mut f = Self {
            mode: FilterMode::LowPass,
            bypass: false,
            cutoff: 255,
            resonance: 210,
            feedback: 0,
            low0: 0,
            low1: 0,
        };
        f.update_feedback();
        f
    }

    fn update_feedback(&mut self) {
        self.feedback = self.resonance + fxmul(self.resonance, SHIFTED_ONE - self.cutoff / 128);
    }

    pub fn set_cutoff(&mut self, cutoff: i32) {
        self.cutoff = cutoff.clamp(0, 255);
        self.update_feedback();
    }

    pub fn set_resonance(&mut self, resonance: i32) {
        self.resonance = resonance.clamp(0, 255);
        self.update_feedback();
    }

    pub fn set_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    pub fn cutoff(&self) -> i32 {
        self.cutoff
    }

    pub fn feedback(&self) -> i32 {
        self.feedback
    }

    pub fn process(&mut self, input: i32) -> i32 {
        if self.bypass {
            return input;
        }
        let mut x = input - SILENCE;
        if self.mode == FilterMode::LowPass {
            // headroom for the resonant peak
            x >>= 1;
        }
        let hp = x - self.low0;
        let bp = self.low0 - self.low1;
        self.low0 = (self.low0 + fxmul(self.cutoff, hp + fxmul(self.feedback, bp)))
            .clamp(-REGISTER_LIMIT, REGISTER_LIMIT);
        self.low1 = (self.low1 + fxmul(self.cutoff, self.low0 - self.low1))
            .clamp(-REGISTER_LIMIT, REGISTER_LIMIT);

        let out = match self.mode {
            FilterMode::LowPass => self.low1,
            FilterMode::BandPass => bp,
            FilterMode::HighPass => hp,
        };
        out + SILENCE
    }
}

impl Default for SvfFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle(f: &mut SvfFilter, input: i32, n: usize) -> i32 {
        let mut out = 0;
        for _ in 0..n {
            out = f.process(input);
        }
        out
    }

    #[test]
    fn feedback_follows_resonance_and_cutoff() {
        let mut f = SvfFilter::new();
        f.set_resonance(0);
        assert_eq!(f.feedback(), 0);
        f.set_resonance(100);
        f.set_cutoff(100);
        // 100 + 100 * 256 / 256
        assert_eq!(f.feedback(), 200);
        f.set_cutoff(200);
        // cutoff / 128 == 1
        assert_eq!(f.feedback(), 100 + (100 * 255 >> 8));
    }

    #[test]
    fn bypass_passes_input_through() {
        let mut f = SvfFilter::new();
        f.set_bypass(true);
        assert_eq!(f.process(1234), 1234);
    }

    #[test]
    fn lowpass_settles_to_attenuated_dc() {
        let mut f = SvfFilter::new();
        f.set_resonance(0);
        f.set_cutoff(255);
        let out = settle(&mut f, 3048, 2000);
        // 1000 above centre, halved for headroom
        assert!((out - (2048 + 500)).abs() <= 4, "out = {}", out);
    }

    #[test]
    fn zero_cutoff_holds_registers() {
        let mut f = SvfFilter::new();
        f.set_resonance(0);
        f.set_cutoff(0);
        assert_eq!(settle(&mut f, 4000, 100), 2048);
    }

    #[test]
    fn highpass_and_bandpass_reject_dc() {
        for mode in [FilterMode::HighPass, FilterMode::BandPass] {
            let mut f = SvfFilter::new();
            f.set_mode(mode);
            f.set_resonance(0);
            f.set_cutoff(128);
            let out = settle(&mut f, 3000, 4000);
            assert!((out - 2048).abs() <= 4, "{:?} out = {}", mode, out);
        }
    }

    #[test]
    fn highpass_first_sample_is_input_minus_register() {
        let mut f = SvfFilter::new();
        f.set_mode(FilterMode::HighPass);
        // Registers start at zero, so the first HP tap is the centred input
        assert_eq!(f.process(2548), 2548);
    }
}
