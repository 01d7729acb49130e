use super::SAMPLE_RATE;
use crate::synth::LFO_TICK_HZ;

/// Control-rate work (envelope, portamento, load fade) runs at 1 kHz
pub const CONTROL_TICK_HZ: u32 = 1_000;

const US_PER_SECOND: u64 = 1_000_000;

/// Which of the slower tasks are due on a given audio sample.
/// LFO work always runs before clock work when both fall on one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Due {
    pub lfo: bool,
    pub clock: bool,
    pub control: bool,
}

/// Derives the LFO, clock and control task rates from the audio sample
/// count with integer accumulators, so nothing drifts against the audio.
#[derive(Debug, Clone)]
pub struct Scheduler {
    lfo_acc: u32,
    /// Elapsed time in microsecond-samples (µs × sample rate)
    clock_acc: u64,
    control_acc: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            lfo_acc: 0,
            clock_acc: 0,
            control_acc: 0,
        }
    }

    /// Advance one audio sample. `clock_period_us` is read every call so
    /// tempo changes take effect on the next tick.
    #[inline]
    pub fn advance(&mut self, clock_period_us: u32) -> Due {
        let mut due = Due::default();

        self.lfo_acc += LFO_TICK_HZ;
        if self.lfo_acc >= SAMPLE_RATE {
            self.lfo_acc -= SAMPLE_RATE;
            due.lfo = true;
        }

        self.clock_acc += US_PER_SECOND;
        let period = clock_period_us.max(1) as u64 * SAMPLE_RATE as u64;
        if self.clock_acc >= period {
            // A sudden tempo jump never queues a burst of ticks
            self.clock_acc = (self.clock_acc - period).min(period - 1);
            due.clock = true;
        }

        self.control_acc += CONTROL_TICK_HZ;
        if self.control_acc >= SAMPLE_RATE {
            self.control_acc -= SAMPLE_RATE;
            due.control = true;
        }

        due
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::period_for_bpm;

    fn count(seconds: u32, period_us: u32) -> (u32, u32, u32) {
        let mut s = Scheduler::new();
        let (mut lfo, mut clock, mut control) = (0, 0, 0);
        for _ in 0..SAMPLE_RATE * seconds {
            let due = s.advance(period_us);
            lfo += due.lfo as u32;
            clock += due.clock as u32;
            control += due.control as u32;
        }
        (lfo, clock, control)
    }

    #[test]
    fn task_rates_follow_the_sample_clock() {
        let (lfo, clock, control) = count(1, period_for_bpm(120));
        assert_eq!(lfo, LFO_TICK_HZ);
        assert_eq!(control, CONTROL_TICK_HZ);
        // 120 BPM at 96 PPQ is 192 ticks a second; the period rounds down
        assert!((192..=194).contains(&clock), "got {}", clock);
    }

    #[test]
    fn clock_follows_tempo() {
        let (_, slow, _) = count(2, period_for_bpm(60));
        let (_, fast, _) = count(2, period_for_bpm(240));
        assert!((192..=194).contains(&slow), "got {}", slow);
        assert!((768..=772).contains(&fast), "got {}", fast);
    }
}
