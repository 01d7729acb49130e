use serde::{Deserialize, Serialize};

use super::wavetable::{WaveShape, PULSE_WIDTH_LIMIT};
use crate::fx::{FilterMode, ShaperKind};

/// Convert MIDI note number to frequency in Hz
/// A4 (69) = 440 Hz
pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0f32.powf((note as f32 - 69.0) / 12.0)
}

/// Note name from MIDI note number (e.g., 60 -> "C4", 61 -> "C#4")
pub fn note_name(note: u8) -> String {
    let names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", names[note as usize % 12], octave)
}

/// Integer linear map with truncation toward zero, tolerant of an empty input range
pub fn map_range(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    if in_max == in_min {
        return out_min;
    }
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Note-priority policy for voice allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonoMode {
    Paraphonic,
    Highest,
    Lowest,
    Last,
}

impl MonoMode {
    pub fn from_index(i: i32) -> Self {
        match i {
            1 => MonoMode::Highest,
            2 => MonoMode::Lowest,
            3 => MonoMode::Last,
            _ => MonoMode::Paraphonic,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            MonoMode::Paraphonic => 0,
            MonoMode::Highest => 1,
            MonoMode::Lowest => 2,
            MonoMode::Last => 3,
        }
    }

    pub fn is_mono(self) -> bool {
        self != MonoMode::Paraphonic
    }
}

/// One oscillator engine (four phase accumulators share these settings).
///
/// `detune` differs per engine: engine 1 transposes in semitones, engine 2
/// adds a fine offset in phase-increment units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscParams {
    pub wave: WaveShape,
    pub octave: i32, // 1-9, default 5 (note offset 0 = middle C)
    pub volume: i32, // 0-1023
    pub detune: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub cutoff: i32,    // 0-255
    pub resonance: i32, // 0-255
    pub mode: FilterMode,
    pub bypass: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    pub attack_ms: u32,
    pub decay_ms: u32,
    pub sustain: i32, // 0-1023
    pub release_ms: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LfoParams {
    pub shape: WaveShape,
    /// LFO ticks per table step (1-1024, lower is faster)
    pub rate: u32,
    pub low_range: bool,
    pub retrigger: bool,
    pub sync: bool,
    pub sync_division: usize, // index into SYNC_TICKS
}

/// Modulation matrix: source x destination depths, 0 disables a route
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModDepths {
    pub lfo_osc1_detune: i32,
    pub lfo_osc2_detune: i32,
    pub lfo_osc1_octave: i32,
    pub lfo_osc2_octave: i32,
    pub lfo_cutoff: i32,
    pub lfo_amp: i32,
    pub lfo_pw: i32,
    pub env_osc1_pitch: i32,
    pub env_osc2_pitch: i32,
    pub env_cutoff: i32,
    pub env_lfo_rate: i32,
    pub vel_osc1_detune: i32,
    pub vel_osc2_detune: i32,
    pub vel_cutoff: i32,
    pub vel_amp: i32,
    pub vel_pw: i32,
    pub vel_lfo_rate: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShaperParams {
    pub kind: ShaperKind,
    pub amount1: i32, // 0-1023
    pub amount2: i32, // 1-10
}

/// Complete synth patch (everything a PatchRecord stores except user tables)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub osc: [OscParams; 2],
    pub pulse_width: i32,
    pub filter: FilterParams,
    pub envelope: EnvelopeParams,
    pub lfo: LfoParams,
    pub mods: ModDepths,
    pub shaper: ShaperParams,
    pub gain: i32,        // 0-1023, gain factor 1 + gain/1024
    pub bit_muncher: u32, // low bits removed, 0-11
    pub portamento_ms: u32,
    pub mono_mode: MonoMode,
    pub unison: usize, // extra voices doubling voice 0, 0-3
    pub uni_spread: u32,
}

impl Default for Patch {
    fn default() -> Self {
        let osc = OscParams {
            wave: WaveShape::Triangle,
            octave: 5,
            volume: 1023,
            detune: 0,
        };
        Self {
            osc: [osc, osc],
            pulse_width: 0,
            filter: FilterParams {
                cutoff: 255,
                resonance: 210,
                mode: FilterMode::LowPass,
                bypass: false,
            },
            envelope: EnvelopeParams {
                attack_ms: 5,
                decay_ms: 200,
                sustain: 800,
                release_ms: 300,
            },
            lfo: LfoParams {
                shape: WaveShape::Sine,
                rate: 512,
                low_range: false,
                retrigger: false,
                sync: false,
                sync_division: 1,
            },
            mods: ModDepths::default(),
            shaper: ShaperParams {
                kind: ShaperKind::Off,
                amount1: 0,
                amount2: 1,
            },
            gain: 0,
            bit_muncher: 0,
            portamento_ms: 0,
            mono_mode: MonoMode::Paraphonic,
            unison: 0,
            uni_spread: UNI_SPREAD_MIN,
        }
    }
}

pub const UNI_SPREAD_MIN: u32 = 10_000;
pub const UNI_SPREAD_MAX: u32 = 60_000;
pub const MAX_ENVELOPE_MS: u32 = 1023;
pub const MAX_OSC2_FINE_DETUNE: i32 = 100_000;

/// Addressable synth parameter. Each variant documents its clamp range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamId {
    OscWave(usize),   // WaveShape index 0-7
    OscOctave(usize), // 1-9
    OscVolume(usize), // 0-1023
    OscDetune(usize), // osc 1: -24..=24 semitones, osc 2: 0..=100000
    PulseWidth,       // -290..=290
    FilterCutoff,     // 0-255
    FilterResonance,  // 0-255
    FilterMode,       // 0 LP, 1 BP, 2 HP
    FilterBypass,     // 0/1
    Attack,           // 1-1023 ms
    Decay,            // 1-1023 ms
    Sustain,          // 0-1023
    Release,          // 1-1023 ms
    LfoShape,         // 0-6
    /// Raw knob position: high range 0-1023, low range 0-63
    LfoRateKnob,
    LfoLowRange,
    LfoRetrigger,
    LfoSync,
    LfoSyncDivision, // 0-4
    LfoOsc1Detune,
    LfoOsc2Detune,
    LfoOsc1Octave, // 0-4
    LfoOsc2Octave, // 0-4
    LfoCutoff,     // 0-4095
    LfoAmp,
    LfoPw,
    EnvOsc1Pitch, // -1023..=1023
    EnvOsc2Pitch, // -1023..=1023
    EnvCutoff,    // -1023..=1023
    EnvLfoRate,
    VelOsc1Detune, // -1023..=1023
    VelOsc2Detune, // -1023..=1023
    VelCutoff,
    VelAmp,
    VelPw, // 0-290
    VelLfoRate,
    ShaperType,    // 0-2
    ShaperAmount1, // 0-1023
    ShaperAmount2, // 1-10
    Gain,          // 0-1023
    BitMuncher,    // 0-11
    Portamento,    // 0-255 ms
    MonoMode,      // 0-3
    Unison,        // 0-3
    UniSpread,     // 10000-60000
}

impl ParamId {
    /// Human-readable parameter name
    pub fn name(&self) -> &'static str {
        match self {
            ParamId::OscWave(_) => "Wave",
            ParamId::OscOctave(_) => "Octave",
            ParamId::OscVolume(_) => "Volume",
            ParamId::OscDetune(_) => "Detune",
            ParamId::PulseWidth => "Pulse Width",
            ParamId::FilterCutoff => "Cutoff",
            ParamId::FilterResonance => "Resonance",
            ParamId::FilterMode => "Filter Type",
            ParamId::FilterBypass => "Filter Bypass",
            ParamId::Attack => "Attack",
            ParamId::Decay => "Decay",
            ParamId::Sustain => "Sustain",
            ParamId::Release => "Release",
            ParamId::LfoShape => "LFO Shape",
            ParamId::LfoRateKnob => "LFO Rate",
            ParamId::LfoLowRange => "LFO Low Range",
            ParamId::LfoRetrigger => "LFO Retrigger",
            ParamId::LfoSync => "LFO Sync",
            ParamId::LfoSyncDivision => "LFO Sync Div",
            ParamId::LfoOsc1Detune => "LFO>Osc1 Pitch",
            ParamId::LfoOsc2Detune => "LFO>Osc2 Pitch",
            ParamId::LfoOsc1Octave => "LFO>Osc1 Octave",
            ParamId::LfoOsc2Octave => "LFO>Osc2 Octave",
            ParamId::LfoCutoff => "LFO>Cutoff",
            ParamId::LfoAmp => "LFO>Amp",
            ParamId::LfoPw => "LFO>PW",
            ParamId::EnvOsc1Pitch => "Env>Osc1 Pitch",
            ParamId::EnvOsc2Pitch => "Env>Osc2 Pitch",
            ParamId::EnvCutoff => "Env>Cutoff",
            ParamId::EnvLfoRate => "Env>LFO Rate",
            ParamId::VelOsc1Detune => "Vel>Osc1 Pitch",
            ParamId::VelOsc2Detune => "Vel>Osc2 Pitch",
            ParamId::VelCutoff => "Vel>Cutoff",
            ParamId::VelAmp => "Vel>Amp",
            ParamId::VelPw => "Vel>PW",
            ParamId::VelLfoRate => "Vel>LFO Rate",
            ParamId::ShaperType => "Shaper",
            ParamId::ShaperAmount1 => "Shaper Amt 1",
            ParamId::ShaperAmount2 => "Shaper Amt 2",
            ParamId::Gain => "Gain",
            ParamId::BitMuncher => "Bit Muncher",
            ParamId::Portamento => "Portamento",
            ParamId::MonoMode => "Mono Mode",
            ParamId::Unison => "Unison",
            ParamId::UniSpread => "Spread",
        }
    }
}

impl Patch {
    /// Store a clamped parameter value. Returns false for an unknown oscillator index.
    pub fn set(&mut self, param: ParamId, value: i32) -> bool {
        let depth = |v: i32| v.clamp(0, 1023);
        match param {
            ParamId::OscWave(i) | ParamId::OscOctave(i) | ParamId::OscVolume(i) | ParamId::OscDetune(i)
                if i > 1 =>
            {
                return false;
            }
            ParamId::OscWave(i) => self.osc[i].wave = WaveShape::from_index(value),
            ParamId::OscOctave(i) => self.osc[i].octave = value.clamp(1, 9),
            ParamId::OscVolume(i) => self.osc[i].volume = depth(value),
            ParamId::OscDetune(0) => self.osc[0].detune = value.clamp(-24, 24),
            ParamId::OscDetune(i) => self.osc[i].detune = value.clamp(0, MAX_OSC2_FINE_DETUNE),
            ParamId::PulseWidth => {
                self.pulse_width = value.clamp(-PULSE_WIDTH_LIMIT, PULSE_WIDTH_LIMIT)
            }
            ParamId::FilterCutoff => self.filter.cutoff = value.clamp(0, 255),
            ParamId::FilterResonance => self.filter.resonance = value.clamp(0, 255),
            ParamId::FilterMode => self.filter.mode = FilterMode::from_index(value),
            ParamId::FilterBypass => self.filter.bypass = value != 0,
            ParamId::Attack => self.envelope.attack_ms = clamp_ms(value),
            ParamId::Decay => self.envelope.decay_ms = clamp_ms(value),
            ParamId::Sustain => self.envelope.sustain = depth(value),
            ParamId::Release => self.envelope.release_ms = clamp_ms(value),
            ParamId::LfoShape => {
                self.lfo.shape = match WaveShape::from_index(value) {
                    WaveShape::Noise => WaveShape::User3,
                    shape => shape,
                }
            }
            ParamId::LfoRateKnob => {
                self.lfo.rate = if self.lfo.low_range {
                    (64 - value.clamp(0, 63)) as u32
                } else {
                    (1024 - value.clamp(0, 1023)) as u32
                }
            }
            ParamId::LfoLowRange => {
                self.lfo.low_range = value != 0;
                if self.lfo.low_range {
                    self.lfo.rate = self.lfo.rate.min(31);
                }
            }
            ParamId::LfoRetrigger => self.lfo.retrigger = value != 0,
            ParamId::LfoSync => self.lfo.sync = value != 0,
            ParamId::LfoSyncDivision => self.lfo.sync_division = value.clamp(0, 4) as usize,
            ParamId::LfoOsc1Detune => self.mods.lfo_osc1_detune = depth(value),
            ParamId::LfoOsc2Detune => self.mods.lfo_osc2_detune = depth(value),
            ParamId::LfoOsc1Octave => self.mods.lfo_osc1_octave = value.clamp(0, 4),
            ParamId::LfoOsc2Octave => self.mods.lfo_osc2_octave = value.clamp(0, 4),
            ParamId::LfoCutoff => self.mods.lfo_cutoff = value.clamp(0, 4095),
            ParamId::LfoAmp => self.mods.lfo_amp = depth(value),
            ParamId::LfoPw => self.mods.lfo_pw = depth(value),
            ParamId::EnvOsc1Pitch => self.mods.env_osc1_pitch = bipolar(value),
            ParamId::EnvOsc2Pitch => self.mods.env_osc2_pitch = bipolar(value),
            ParamId::EnvCutoff => self.mods.env_cutoff = bipolar(value),
            ParamId::EnvLfoRate => self.mods.env_lfo_rate = depth(value),
            ParamId::VelOsc1Detune => self.mods.vel_osc1_detune = bipolar(value),
            ParamId::VelOsc2Detune => self.mods.vel_osc2_detune = bipolar(value),
            ParamId::VelCutoff => self.mods.vel_cutoff = depth(value),
            ParamId::VelAmp => self.mods.vel_amp = depth(value),
            ParamId::VelPw => self.mods.vel_pw = value.clamp(0, PULSE_WIDTH_LIMIT),
            ParamId::VelLfoRate => self.mods.vel_lfo_rate = depth(value),
            ParamId::ShaperType => self.shaper.kind = ShaperKind::from_index(value),
            ParamId::ShaperAmount1 => self.shaper.amount1 = depth(value),
            ParamId::ShaperAmount2 => self.shaper.amount2 = value.clamp(1, 10),
            ParamId::Gain => self.gain = depth(value),
            ParamId::BitMuncher => self.bit_muncher = value.clamp(0, 11) as u32,
            ParamId::Portamento => self.portamento_ms = value.clamp(0, 255) as u32,
            ParamId::MonoMode => self.mono_mode = MonoMode::from_index(value),
            ParamId::Unison => self.unison = value.clamp(0, 3) as usize,
            ParamId::UniSpread => {
                self.uni_spread = (value.max(0) as u32).clamp(UNI_SPREAD_MIN, UNI_SPREAD_MAX)
            }
        }
        true
    }

    /// Current value of a parameter in the units `set` takes
    pub fn get(&self, param: ParamId) -> i32 {
        let flag = |b: bool| b as i32;
        let osc = |i: usize| &self.osc[i.min(1)];
        match param {
            ParamId::OscWave(i) => osc(i).wave.index(),
            ParamId::OscOctave(i) => osc(i).octave,
            ParamId::OscVolume(i) => osc(i).volume,
            ParamId::OscDetune(i) => osc(i).detune,
            ParamId::PulseWidth => self.pulse_width,
            ParamId::FilterCutoff => self.filter.cutoff,
            ParamId::FilterResonance => self.filter.resonance,
            ParamId::FilterMode => self.filter.mode.index(),
            ParamId::FilterBypass => flag(self.filter.bypass),
            ParamId::Attack => self.envelope.attack_ms as i32,
            ParamId::Decay => self.envelope.decay_ms as i32,
            ParamId::Sustain => self.envelope.sustain,
            ParamId::Release => self.envelope.release_ms as i32,
            ParamId::LfoShape => self.lfo.shape.index(),
            ParamId::LfoRateKnob => {
                let top = if self.lfo.low_range { 64 } else { 1024 };
                (top - self.lfo.rate as i32).max(0)
            }
            ParamId::LfoLowRange => flag(self.lfo.low_range),
            ParamId::LfoRetrigger => flag(self.lfo.retrigger),
            ParamId::LfoSync => flag(self.lfo.sync),
            ParamId::LfoSyncDivision => self.lfo.sync_division as i32,
            ParamId::LfoOsc1Detune => self.mods.lfo_osc1_detune,
            ParamId::LfoOsc2Detune => self.mods.lfo_osc2_detune,
            ParamId::LfoOsc1Octave => self.mods.lfo_osc1_octave,
            ParamId::LfoOsc2Octave => self.mods.lfo_osc2_octave,
            ParamId::LfoCutoff => self.mods.lfo_cutoff,
            ParamId::LfoAmp => self.mods.lfo_amp,
            ParamId::LfoPw => self.mods.lfo_pw,
            ParamId::EnvOsc1Pitch => self.mods.env_osc1_pitch,
            ParamId::EnvOsc2Pitch => self.mods.env_osc2_pitch,
            ParamId::EnvCutoff => self.mods.env_cutoff,
            ParamId::EnvLfoRate => self.mods.env_lfo_rate,
            ParamId::VelOsc1Detune => self.mods.vel_osc1_detune,
            ParamId::VelOsc2Detune => self.mods.vel_osc2_detune,
            ParamId::VelCutoff => self.mods.vel_cutoff,
            ParamId::VelAmp => self.mods.vel_amp,
            ParamId::VelPw => self.mods.vel_pw,
            ParamId::VelLfoRate => self.mods.vel_lfo_rate,
            ParamId::ShaperType => self.shaper.kind.index(),
            ParamId::ShaperAmount1 => self.shaper.amount1,
            ParamId::ShaperAmount2 => self.shaper.amount2,
            ParamId::Gain => self.gain,
            ParamId::BitMuncher => self.bit_muncher as i32,
            ParamId::Portamento => self.portamento_ms as i32,
            ParamId::MonoMode => self.mono_mode.index(),
            ParamId::Unison => self.unison as i32,
            ParamId::UniSpread => self.uni_spread as i32,
        }
    }
}

/// Segment times never reach zero; the ramps divide by them
fn clamp_ms(value: i32) -> u32 {
    value.clamp(1, MAX_ENVELOPE_MS as i32) as u32
}

fn bipolar(value: i32) -> i32 {
    value.clamp(-1023, 1023)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_range_matches_integer_interpolation() {
        assert_eq!(map_range(512, 0, 1023, 0, 100), 50);
        assert_eq!(map_range(0, 0, 127, 300, 0), 300);
        assert_eq!(map_range(127, 0, 127, 300, 0), 0);
        assert_eq!(map_range(5, 3, 3, 7, 9), 7);
    }

    #[test]
    fn set_clamps_out_of_range_values() {
        let mut p = Patch::default();
        assert!(p.set(ParamId::FilterCutoff, 900));
        assert_eq!(p.filter.cutoff, 255);
        p.set(ParamId::OscOctave(1), -3);
        assert_eq!(p.osc[1].octave, 1);
        p.set(ParamId::BitMuncher, 40);
        assert_eq!(p.bit_muncher, 11);
        p.set(ParamId::UniSpread, 0);
        assert_eq!(p.uni_spread, UNI_SPREAD_MIN);
        assert!(!p.set(ParamId::OscVolume(2), 10));
    }

    #[test]
    fn lfo_rate_knob_depends_on_range() {
        let mut p = Patch::default();
        p.set(ParamId::LfoRateKnob, 1023);
        assert_eq!(p.lfo.rate, 1);
        p.set(ParamId::LfoRateKnob, 0);
        assert_eq!(p.lfo.rate, 1024);
        p.set(ParamId::LfoLowRange, 1);
        assert_eq!(p.lfo.rate, 31);
        p.set(ParamId::LfoRateKnob, 63);
        assert_eq!(p.lfo.rate, 1);
    }

    #[test]
    fn lfo_shape_never_selects_noise() {
        let mut p = Patch::default();
        p.set(ParamId::LfoShape, 7);
        assert_eq!(p.lfo.shape, WaveShape::User3);
    }

    #[test]
    fn note_name_formats_octave() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(61), "C#4");
        assert!((midi_to_freq(69) - 440.0).abs() < 0.01);
    }
}
