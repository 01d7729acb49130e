use serde::{Deserialize, Serialize};

use super::params::{map_range, EnvelopeParams, ModDepths};

/// Peak amplitude
pub const ENV_MAX: i32 = 1023;
/// A retrigger fades the amplitude down to this level before the attack starts
const ANTI_CLICK_THRESHOLD: i32 = 10;
const ANTI_CLICK_STEP: i32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Attack => "attack",
            Stage::Decay => "decay",
            Stage::Sustain => "sustain",
            Stage::Release => "release",
        }
    }
}

/// Something the owner of the envelope has to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeEvent {
    /// The anti-click fade finished and the attack began
    AttackStarted,
    /// The release reached zero
    Finished,
}

/// Modulation contributions derived from the current amplitude
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeMod {
    pub osc1_pitch: i32,
    pub osc2_pitch: i32,
    pub cutoff: i32,
    /// Overrides the user LFO rate while the envelope-to-rate route is active
    pub lfo_rate: Option<u32>,
}

/// Single shared ADSR with time-proportional linear segments
#[derive(Debug, Clone)]
pub struct Envelope {
    stage: Stage,
    trigger_pending: bool,
    amplitude: i32,
    segment_start_ms: u64,
    /// Level each ramp starts from (attack and release)
    start_level: i32,
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            stage: Stage::Idle,
            trigger_pending: false,
            amplitude: 0,
            segment_start_ms: 0,
            start_level: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn amplitude(&self) -> i32 {
        self.amplitude
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    pub fn trigger_pending(&self) -> bool {
        self.trigger_pending
    }

    /// Request a new attack. Takes effect on the next `update`, after the
    /// amplitude has faded below the click threshold.
    pub fn trigger(&mut self) {
        self.trigger_pending = true;
    }

    /// Enter release from any active stage. A trigger still fading out
    /// becomes a release from the faded level.
    pub fn release(&mut self, now_ms: u64) {
        if self.trigger_pending {
            self.trigger_pending = false;
            self.begin_release(now_ms);
            return;
        }
        if matches!(self.stage, Stage::Attack | Stage::Decay | Stage::Sustain) {
            self.begin_release(now_ms);
        }
    }

    fn begin_release(&mut self, now_ms: u64) {
        self.stage = Stage::Release;
        self.segment_start_ms = now_ms;
        self.start_level = self.amplitude;
    }

    pub fn update(&mut self, now_ms: u64, params: &EnvelopeParams) -> Option<EnvelopeEvent> {
        let mut event = None;
        if self.trigger_pending {
            self.stage = Stage::Idle;
            if self.amplitude > ANTI_CLICK_THRESHOLD {
                self.amplitude -= ANTI_CLICK_STEP;
                return None;
            }
            self.trigger_pending = false;
            self.stage = Stage::Attack;
            self.segment_start_ms = now_ms;
            self.start_level = self.amplitude;
            event = Some(EnvelopeEvent::AttackStarted);
        }

        let elapsed = now_ms.saturating_sub(self.segment_start_ms) as i64;
        match self.stage {
            Stage::Idle => {}
            Stage::Attack => {
                let attack = params.attack_ms as i64;
                if elapsed > attack {
                    self.stage = Stage::Decay;
                    self.segment_start_ms = now_ms;
                } else {
                    self.amplitude =
                        map_range(elapsed, 0, attack, self.start_level as i64, ENV_MAX as i64) as i32;
                }
            }
            Stage::Decay => {
                let decay = params.decay_ms as i64;
                if elapsed > decay {
                    self.stage = Stage::Sustain;
                    self.amplitude = params.sustain;
                } else {
                    self.amplitude =
                        map_range(elapsed, 0, decay, ENV_MAX as i64, params.sustain as i64) as i32;
                }
            }
            Stage::Sustain => self.amplitude = params.sustain,
            Stage::Release => {
                let release = params.release_ms as i64;
                if elapsed > release {
                    self.stage = Stage::Idle;
                    self.amplitude = 0;
                    event = Some(EnvelopeEvent::Finished);
                } else {
                    self.amplitude =
                        map_range(elapsed, 0, release, self.start_level as i64, 0).max(0) as i32;
                }
            }
        }
        event
    }

    /// Pitch, cutoff and LFO-rate contributions for the current amplitude
    pub fn modulation(&self, mods: &ModDepths, user_lfo_rate: u32) -> EnvelopeMod {
        if self.stage == Stage::Idle {
            return EnvelopeMod::default();
        }
        let amp = self.amplitude;
        let lfo_rate = (mods.env_lfo_rate > 10).then(|| {
            map_range(amp as i64, 0, ENV_MAX as i64, mods.env_lfo_rate as i64, user_lfo_rate as i64)
                .max(1) as u32
        });
        EnvelopeMod {
            osc1_pitch: (amp * mods.env_osc1_pitch) << 4,
            osc2_pitch: (amp * mods.env_osc2_pitch) << 4,
            cutoff: (amp * mods.env_cutoff) >> 12,
            lfo_rate,
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
