/// Internal clock resolution
pub const PPQ: u32 = 96;
/// Internal ticks per outgoing 24-PPQ MIDI clock pulse
pub const MIDI_CLOCK_DIVIDER: u32 = PPQ / 24;
pub const MIN_BPM: u32 = 20;
pub const MAX_BPM: u32 = 320;

/// External clock is considered lost after this much silence
const CLOCK_TIMEOUT_US: u64 = 300_000;
/// Incoming 24-PPQ pulses per eighth note
const IN_PULSES_PER_EIGHTH: u32 = 12;
const ESTIMATE_SLOTS: usize = 24;
const MIN_ESTIMATES: usize = 5;

/// Clock tick period in microseconds
pub fn period_for_bpm(bpm: u32) -> u32 {
    60_000_000 / bpm.clamp(MIN_BPM, MAX_BPM) / PPQ
}

/// 96-PPQ pulse counter, free running from the BPM or slaved to MIDI clock.
///
/// The pulse counter runs over one pair of subdivisions (`0..2 * division`)
/// and counts eighths on each wrap. While an external clock is present the
/// counter never wraps by itself; incoming pulses re-align it every eighth.
pub struct Clock {
    bpm: u32,
    period_us: u32,
    pulse: u32,
    eighth: u32,
    division: u32,
    out_counter: u32,

    receiving: bool,
    just_started: bool,
    in_pulse: u32,
    last_in_us: u64,
    estimates: [u32; ESTIMATE_SLOTS],
    estimate_count: usize,
}

impl Clock {
    pub fn new(bpm: u32) -> Self {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        Self {
            bpm,
            period_us: period_for_bpm(bpm),
            pulse: 0,
            eighth: 0,
            division: 24,
            out_counter: 0,
            receiving: false,
            just_started: false,
            in_pulse: 0,
            last_in_us: 0,
            estimates: [0; ESTIMATE_SLOTS],
            estimate_count: 0,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    /// Set the tempo and recompute the tick period. Returns true if it changed.
    pub fn set_bpm(&mut self, bpm: u32) -> bool {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        if bpm == self.bpm {
            return false;
        }
        self.bpm = bpm;
        self.period_us = period_for_bpm(bpm);
        true
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    pub fn pulse(&self) -> u32 {
        self.pulse
    }

    pub fn eighth(&self) -> u32 {
        self.eighth
    }

    pub fn division(&self) -> u32 {
        self.division
    }

    pub fn set_division(&mut self, ticks: u32) {
        self.division = ticks.max(1);
    }

    pub fn receiving(&self) -> bool {
        self.receiving
    }

    /// Returns true on the ticks that should emit a MIDI clock pulse
    pub fn tick_out(&mut self) -> bool {
        let due = self.out_counter == 0;
        self.out_counter = (self.out_counter + 1) % MIDI_CLOCK_DIVIDER;
        due
    }

    /// Move to the next pulse. Returns true when an eighth boundary wrapped.
    pub fn advance(&mut self) -> bool {
        let last = self.division * 2 - 1;
        if self.receiving {
            // Wait for the next incoming eighth to re-align
            if self.pulse < last {
                self.pulse += 1;
            }
            return false;
        }
        if self.pulse < last {
            self.pulse += 1;
            false
        } else {
            self.pulse = 0;
            self.eighth = self.eighth.wrapping_add(1);
            true
        }
    }

    pub fn rewind(&mut self) {
        self.pulse = 0;
        self.eighth = 0;
    }

    /// MIDI Start: rewind and skip the re-align on the very first pulse
    pub fn external_start(&mut self) {
        self.rewind();
        self.in_pulse = 0;
        self.just_started = true;
    }

    /// Handle one incoming 24-PPQ clock pulse. Returns the newly published
    /// BPM when the estimate changed.
    pub fn external_pulse(&mut self, now_us: u64) -> Option<u32> {
        self.receiving = true;

        if self.in_pulse % IN_PULSES_PER_EIGHTH == 0 && !self.just_started {
            self.pulse = 0;
            self.eighth = self.eighth.wrapping_add(1);
        } else {
            self.just_started = false;
        }

        if self.in_pulse != 0 {
            let interval = now_us.saturating_sub(self.last_in_us).max(1);
            let estimate = 60_000_000 / (interval * 24);
            self.estimates[self.in_pulse as usize % ESTIMATE_SLOTS] = estimate.min(u32::MAX as u64) as u32;
            self.estimate_count = (self.estimate_count + 1).min(ESTIMATE_SLOTS);
        }
        self.in_pulse = self.in_pulse.wrapping_add(1);
        self.last_in_us = now_us;

        if self.estimate_count < MIN_ESTIMATES {
            return None;
        }
        let filled = self.filled_estimates();
        let sum: u64 = filled.iter().map(|&e| e as u64).sum();
        // The raw mean reads one BPM low
        let bpm = (sum / filled.len() as u64) as u32 + 1;
        self.set_bpm(bpm).then_some(self.bpm)
    }

    /// Slots written so far; once the ring is full that is all of them
    fn filled_estimates(&self) -> &[u32] {
        if self.estimate_count >= ESTIMATE_SLOTS {
            &self.estimates
        } else {
            // Slot 0 is first written by pulse 24, so early samples sit in 1..=count
            &self.estimates[1..=self.estimate_count]
        }
    }

    /// Drop external sync after a period of silence. Returns true when sync was lost
    /// by this call.
    pub fn check_timeout(&mut self, now_us: u64) -> bool {
        if self.receiving && now_us.saturating_sub(self.last_in_us) > CLOCK_TIMEOUT_US {
            self.receiving = false;
            self.in_pulse = 0;
            self.estimate_count = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_matches_bpm_over_full_range() {
        for bpm in MIN_BPM..=MAX_BPM {
            let mut clock = Clock::new(120);
            clock.set_bpm(bpm);
            assert_eq!(clock.period_us(), 60_000_000 / bpm / 96);
        }
        assert_eq!(period_for_bpm(120), 5208);
        assert_eq!(period_for_bpm(5), period_for_bpm(MIN_BPM));
    }

    #[test]
    fn free_running_pair_of_eighth_subdivisions() {
        let mut clock = Clock::new(120);
        clock.set_division(48);
        let mut wraps = 0;
        for _ in 0..96 {
            if clock.advance() {
                wraps += 1;
            }
        }
        assert_eq!(wraps, 1);
        assert_eq!(clock.eighth(), 1);
        assert_eq!(clock.pulse(), 0);
    }

    #[test]
    fn midi_clock_out_every_fourth_tick() {
        let mut clock = Clock::new(120);
        let pulses: Vec<bool> = (0..8).map(|_| clock.tick_out()).collect();
        assert_eq!(pulses, vec![true, false, false, false, true, false, false, false]);
    }

    #[test]
    fn external_clock_holds_then_realigns() {
        let mut clock = Clock::new(120);
        clock.set_division(24);
        clock.external_start();
        // First pulse after Start does not re-align
        clock.external_pulse(0);
        assert_eq!(clock.eighth(), 0);
        for _ in 0..100 {
            clock.advance();
        }
        assert_eq!(clock.pulse(), 47);
        assert_eq!(clock.eighth(), 0);

        for i in 1..12 {
            clock.external_pulse(i * 20_833);
        }
        assert_eq!(clock.eighth(), 0);
        clock.external_pulse(12 * 20_833);
        assert_eq!(clock.eighth(), 1);
        assert_eq!(clock.pulse(), 0);
    }

    #[test]
    fn bpm_estimate_keeps_plus_one_correction() {
        let mut clock = Clock::new(100);
        let interval = 60_000_000 / (120 * 24);
        let mut published = None;
        for i in 0..5u64 {
            assert_eq!(clock.external_pulse(i * interval), None);
        }
        for i in 5..30u64 {
            if let Some(bpm) = clock.external_pulse(i * interval) {
                published = Some(bpm);
            }
        }
        assert_eq!(published, Some(121));
        assert_eq!(clock.bpm(), 121);
        assert_eq!(clock.period_us(), period_for_bpm(121));
    }

    #[test]
    fn sync_lost_after_silence() {
        let mut clock = Clock::new(120);
        clock.external_pulse(1_000);
        assert!(clock.receiving());
        assert!(!clock.check_timeout(250_000));
        assert!(clock.check_timeout(301_001));
        assert!(!clock.receiving());
        // Free running again without touching the pulse position
        let pulse = clock.pulse();
        clock.advance();
        assert_eq!(clock.pulse(), pulse + 1);
    }
}
