pub mod envelope;
pub mod lfo;
pub mod oscillator;
pub mod params;
pub mod velocity;
pub mod wavetable;

pub use envelope::{Envelope, EnvelopeEvent, EnvelopeMod, Stage};
pub use lfo::{Lfo, LfoMod, LFO_TICK_HZ, SYNC_TICKS};
pub use oscillator::{Glide, OscillatorBank, PitchContext, OSCILLATORS, VOICES};
pub use params::{map_range, note_name, MonoMode, ParamId, Patch};
pub use velocity::VelocityMod;
pub use wavetable::{volume_table, WaveShape, WaveTable, Wavetables};
