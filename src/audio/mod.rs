pub mod context;
pub mod engine;
pub mod mixer;
pub mod scheduler;

pub use context::{Engine, Status};
pub use engine::{AudioEngine, SharedState};

use crate::synth::wavetable::SILENCE;

/// Engine sample rate; every timing constant assumes it
pub const SAMPLE_RATE: u32 = 44_100;

/// Unsigned 12-bit engine sample to a float in -1.0..1.0
#[inline]
pub fn to_f32(sample: i32) -> f32 {
    (sample - SILENCE) as f32 / SILENCE as f32
}

/// Unsigned 12-bit engine sample to signed 16-bit PCM
#[inline]
pub fn to_i16(sample: i32) -> i16 {
    ((sample - SILENCE) << 4).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_conversion_is_centred() {
        assert_eq!(to_f32(SILENCE), 0.0);
        assert_eq!(to_i16(SILENCE), 0);
        assert!(to_f32(4095) > 0.99);
        assert_eq!(to_f32(0), -1.0);
        assert_eq!(to_i16(0), -32768);
        assert_eq!(to_i16(4095), 32752);
    }
}
