use rand::Rng;

use crate::fx::{bit_munch, GainTable, ShaperKind, SvfFilter, Waveshaper};
use crate::synth::wavetable::{volume_table, LOOKUP_SIZE, SAMPLE_MAX, SILENCE};

/// Full scale for every 0-1023 amplitude factor in the chain
const UNITY: i32 = 1023;
const RAMP_STEP: i32 = 5;

/// Scale a 12-bit sample around the silence point by a 0-1023 factor
#[inline]
fn scale(sample: i32, factor: i32) -> i32 {
    (((sample - SILENCE) * factor) >> 10) + SILENCE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RampState {
    Idle,
    Down,
    Up,
}

/// Output fade used to hide patch and bank loads
#[derive(Debug, Clone, Copy)]
pub struct LoadRamp {
    factor: i32,
    state: RampState,
}

impl LoadRamp {
    pub fn new() -> Self {
        Self {
            factor: UNITY,
            state: RampState::Idle,
        }
    }

    pub fn factor(&self) -> i32 {
        self.factor
    }

    pub fn is_active(&self) -> bool {
        self.state != RampState::Idle
    }

    /// Start fading out; a fade-in in progress turns around
    pub fn begin(&mut self) {
        self.state = RampState::Down;
    }

    /// One control tick. Returns true on the tick the output reaches
    /// silence; the caller applies the load then and the ramp climbs back.
    pub fn tick(&mut self) -> bool {
        match self.state {
            RampState::Idle => false,
            RampState::Down => {
                self.factor = if self.factor > RAMP_STEP { self.factor - RAMP_STEP } else { 0 };
                if self.factor == 0 {
                    self.state = RampState::Up;
                    return true;
                }
                false
            }
            RampState::Up => {
                self.factor = if self.factor < UNITY - RAMP_STEP { self.factor + RAMP_STEP } else { UNITY };
                if self.factor == UNITY {
                    self.state = RampState::Idle;
                }
                false
            }
        }
    }
}

impl Default for LoadRamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-sample modulation the mixer needs from the rest of the engine
#[derive(Debug, Clone, Copy)]
pub struct MixInput {
    /// Averaged oscillator output per engine
    pub raw: [i32; 2],
    /// Engines set to noise read a random volume-table index instead
    pub noise: [bool; 2],
    pub envelope: i32,
    pub lfo_amp: i32,
    pub velocity_amp: i32,
}

/// Everything after the oscillators: volume lookups, bit reduction,
/// amplitude modulation, shaper, filter, gain, load fade and master volume.
pub struct Mixer {
    volume: [Box<[u16; LOOKUP_SIZE]>; 2],
    volume_level: [i32; 2],
    shaper: Waveshaper,
    gain: GainTable,
    pub filter: SvfFilter,
    pub ramp: LoadRamp,
    bits: u32,
    master_volume: i32,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            volume: [Box::new(volume_table(UNITY)), Box::new(volume_table(UNITY))],
            volume_level: [UNITY; 2],
            shaper: Waveshaper::new(),
            gain: GainTable::new(),
            filter: SvfFilter::new(),
            ramp: LoadRamp::new(),
            bits: 0,
            master_volume: UNITY,
        }
    }

    /// Rebuild an engine's volume table; no-op when unchanged
    pub fn set_volume(&mut self, engine: usize, volume: i32) {
        let engine = engine.min(1);
        let volume = volume.clamp(0, UNITY);
        if self.volume_level[engine] != volume {
            *self.volume[engine] = volume_table(volume);
            self.volume_level[engine] = volume;
        }
    }

    pub fn set_shaper(&mut self, kind: ShaperKind, amount1: i32, amount2: i32) {
        self.shaper.rebuild(kind, amount1, amount2);
    }

    pub fn set_gain(&mut self, amount: i32) {
        self.gain.rebuild(amount);
    }

    pub fn set_bit_muncher(&mut self, bits: u32) {
        self.bits = bits.min(11);
    }

    pub fn set_master_volume(&mut self, volume: i32) {
        self.master_volume = volume.clamp(0, UNITY);
    }

    pub fn master_volume(&self) -> i32 {
        self.master_volume
    }

    /// Mix one output sample in the unsigned 12-bit domain
    #[inline]
    pub fn render<R: Rng>(&mut self, input: &MixInput, rng: &mut R) -> i32 {
        let mut volumed = [0i32; 2];
        for (engine, out) in volumed.iter_mut().enumerate() {
            let index = if input.noise[engine] {
                rng.gen_range(0..LOOKUP_SIZE)
            } else {
                input.raw[engine].clamp(0, SAMPLE_MAX) as usize
            };
            *out = self.volume[engine][index] as i32;
        }

        let mix = (volumed[0] + volumed[1]) >> 1;
        let munched = bit_munch(mix, self.bits);
        let enveloped = scale(munched, input.envelope);
        let lfo = scale(enveloped, input.lfo_amp);
        let velocity = scale(lfo, UNITY - input.velocity_amp);
        let shaped = self.shaper.process(velocity);
        let filtered = self.filter.process(shaped).clamp(0, SAMPLE_MAX);
        let gained = self.gain.process(filtered);
        let faded = scale(gained, self.ramp.factor());
        scale(faded, self.master_volume)
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}
