use super::params::{map_range, ModDepths};

/// Per-note modulation derived from note-on velocity.
///
/// Amplitude is queued in `pending_amp` and only takes effect when the
/// envelope actually starts its attack, so a fading note keeps its level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VelocityMod {
    pub osc1_detune: i32,
    pub osc2_detune: i32,
    pub cutoff: i32,
    /// Attenuation 0-1023 in effect for the sounding note
    pub amp: i32,
    pub pending_amp: i32,
    pub pulse_width: i32,
    /// How far the LFO rate is pulled toward its fastest setting
    pub lfo_rate_pull: u32,
}

impl VelocityMod {
    /// Recompute every delta for a new note. Depth 0 disables a route.
    pub fn set_velocity(&mut self, velocity: u8, mods: &ModDepths) {
        let v = velocity.min(127) as i64;
        self.osc1_detune = (v as i32 * mods.vel_osc1_detune) << 6;
        self.osc2_detune = (v as i32 * mods.vel_osc2_detune) << 6;
        self.cutoff = map_range(v, 0, 127, 0, (mods.vel_cutoff >> 2) as i64) as i32;
        self.pending_amp = map_range(v, 0, 127, mods.vel_amp as i64, 0) as i32;
        self.pulse_width = map_range(v, 0, 127, 0, mods.vel_pw as i64) as i32;
        self.lfo_rate_pull = map_range(mods.vel_lfo_rate as i64, 0, 1023, 0, v) as u32;
    }

    /// Move the queued amplitude into effect (attack start)
    pub fn apply_amp(&mut self) {
        self.amp = self.pending_amp;
    }

    /// LFO rate after the velocity pull, bounded to `rate`
    pub fn lfo_rate(&self, rate: u32) -> u32 {
        rate.saturating_sub(self.lfo_rate_pull).clamp(1, rate.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_depths_are_no_ops() {
        let mut v = VelocityMod::default();
        v.set_velocity(127, &ModDepths::default());
        v.apply_amp();
        assert_eq!(v, VelocityMod::default());
        assert_eq!(v.lfo_rate(300), 300);
    }

    #[test]
    fn depths_scale_linearly_with_velocity() {
        let mods = ModDepths {
            vel_osc1_detune: -10,
            vel_cutoff: 400,
            vel_amp: 800,
            vel_pw: 200,
            vel_lfo_rate: 1023,
            ..ModDepths::default()
        };
        let mut v = VelocityMod::default();
        v.set_velocity(127, &mods);
        assert_eq!(v.osc1_detune, (127 * -10) << 6);
        assert_eq!(v.cutoff, 100);
        // Loud notes are not attenuated, and the amp waits for the attack
        assert_eq!(v.pending_amp, 0);
        assert_eq!(v.pulse_width, 200);
        assert_eq!(v.lfo_rate(300), 173);
        assert_eq!(v.lfo_rate(50), 1);

        v.set_velocity(0, &mods);
        assert_eq!(v.pending_amp, 800);
        assert_eq!(v.amp, 0);
        v.apply_amp();
        assert_eq!(v.amp, 800);
    }

    #[test]
    fn velocity_is_clamped() {
        let mods = ModDepths {
            vel_pw: 100,
            ..ModDepths::default()
        };
        let mut v = VelocityMod::default();
        v.set_velocity(255, &mods);
        assert_eq!(v.pulse_width, 100);
    }
}
