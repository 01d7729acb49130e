use super::params::{map_range, ModDepths};
use super::wavetable::{WaveTable, SILENCE, WAVE_SAMPLES};

/// LFO task rate in Hz
pub const LFO_TICK_HZ: u32 = 22_000;
/// Microseconds per LFO tick, rounded as the sync target formula expects
const LFO_TICK_US: u64 = 45;
/// Clock ticks per LFO cycle for each sync division: 8th, quarter, half, whole, double whole
pub const SYNC_TICKS: [u32; 5] = [48, 96, 192, 384, 768];

const ARROW_TICKS: u32 = 2_200;
const ARROW_FRAMES: u8 = 10;
const BLINK_TICKS: u32 = 11_000;
const REFRESH_TICKS: u32 = 2_200;

/// Offsets produced each time the LFO table advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfoMod {
    pub osc1_detune: i32,
    pub osc2_detune: i32,
    /// Centred cutoff offset, added to base + envelope + velocity cutoff
    pub cutoff: i32,
    /// Amplitude factor 0-1023
    pub amp: i32,
    /// Pulse width offset, or None to follow the user setting
    pub pulse_width: Option<i32>,
    /// Octave offset per engine
    pub octave: [i32; 2],
}

impl Default for LfoMod {
    fn default() -> Self {
        Self {
            osc1_detune: 0,
            osc2_detune: 0,
            cutoff: 0,
            amp: 1023,
            pulse_width: None,
            octave: [0, 0],
        }
    }
}

/// Smaller multiplier below a depth of 200 so shallow pitch modulation stays subtle
fn detune(centred: i32, factor: i32) -> i32 {
    if factor < 200 {
        (centred * factor) << 1
    } else {
        (centred * factor) << 2
    }
}

impl LfoMod {
    /// Derive every modulation offset from one LFO table sample
    pub fn derive(sample: i32, mods: &ModDepths) -> Self {
        let centred = sample - SILENCE;
        let octave = |depth: i32| map_range(sample as i64, 0, 4095, -depth as i64, depth as i64) as i32;
        Self {
            osc1_detune: detune(centred, mods.lfo_osc1_detune),
            osc2_detune: detune(centred, mods.lfo_osc2_detune),
            cutoff: (centred * mods.lfo_cutoff) >> 14,
            amp: 1023 - (((sample >> 2) * mods.lfo_amp) >> 10),
            pulse_width: (mods.lfo_pw > 10).then(|| (centred * mods.lfo_pw) >> 13),
            octave: [octave(mods.lfo_osc1_octave), octave(mods.lfo_osc2_octave)],
        }
    }
}

/// Low-frequency oscillator plus the UI animation counters that share its tick
#[derive(Debug, Clone)]
pub struct Lfo {
    index: usize,
    sample: i32,
    counter: u32,
    sync_counter: u32,
    sync_target: u32,
    /// Eighth notes per synced LFO cycle
    eighths_per_cycle: u32,
    eighth_counter: u32,

    arrow_counter: u32,
    arrow_frame: u8,
    blink_counter: u32,
    blink: bool,
    refresh_counter: u32,
    refresh_due: bool,
}

impl Lfo {
    pub fn new() -> Self {
        Self {
            index: 0,
            sample: SILENCE,
            counter: 0,
            sync_counter: 0,
            sync_target: 1,
            eighths_per_cycle: 1,
            eighth_counter: 0,
            arrow_counter: 0,
            arrow_frame: 0,
            blink_counter: 0,
            blink: false,
            refresh_counter: 0,
            refresh_due: false,
        }
    }

    /// One LFO task tick. Returns the new table sample when the LFO advanced.
    ///
    /// `rate` is the number of ticks per table step in free-running mode.
    pub fn tick(&mut self, table: &WaveTable, rate: u32, synced: bool) -> Option<i32> {
        self.tick_ui();

        let due = if synced {
            self.sync_counter += 1;
            self.sync_counter >= self.sync_target
        } else {
            self.counter += 1;
            self.counter >= rate
        };
        if !due {
            return None;
        }

        self.sample = table[self.index] as i32;
        self.index = (self.index + 1) % WAVE_SAMPLES;
        if synced {
            self.sync_counter = 0;
        } else {
            self.counter = 0;
        }
        Some(self.sample)
    }

    fn tick_ui(&mut self) {
        self.arrow_counter += 1;
        if self.arrow_counter >= ARROW_TICKS {
            self.arrow_counter = 0;
            self.arrow_frame = (self.arrow_frame + 1) % ARROW_FRAMES;
        }
        self.blink_counter += 1;
        if self.blink_counter >= BLINK_TICKS {
            self.blink_counter = 0;
            self.blink = !self.blink;
        }
        self.refresh_counter += 1;
        if self.refresh_counter >= REFRESH_TICKS {
            self.refresh_counter = 0;
            self.refresh_due = true;
        }
    }

    /// Recompute the sync target from the clock tick period
    pub fn set_sync(&mut self, period_us: u32, division: usize) {
        let ticks = SYNC_TICKS[division.min(SYNC_TICKS.len() - 1)];
        let target = period_us as u64 * ticks as u64 / WAVE_SAMPLES as u64 / LFO_TICK_US;
        self.sync_target = target.max(1) as u32;
        self.eighths_per_cycle = ticks / 48;
    }

    pub fn sync_target(&self) -> u32 {
        self.sync_target
    }

    /// Called at every eighth-note boundary while synced; re-phases the
    /// LFO once per cycle.
    pub fn on_eighth(&mut self) {
        self.eighth_counter += 1;
        if self.eighth_counter >= self.eighths_per_cycle {
            self.eighth_counter = 0;
            self.sync_counter = 0;
            self.index = 0;
        }
    }

    pub fn reset_eighths(&mut self) {
        self.eighth_counter = 0;
    }

    pub fn retrigger(&mut self) {
        self.index = 0;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sample(&self) -> i32 {
        self.sample
    }

    pub fn arrow_frame(&self) -> u8 {
        self.arrow_frame
    }

    pub fn blink(&self) -> bool {
        self.blink
    }

    pub fn refresh_due(&self) -> bool {
        self.refresh_due
    }

    /// Clear and return the display-refresh flag
    pub fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.refresh_due)
    }
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new()
    }
}
