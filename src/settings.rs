use serde::{Deserialize, Serialize};

use crate::sequencer::NUM_SEQUENCES;

/// MIDI clock relationship with the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    None,
    /// Emit 24-PPQ clock plus Start/Stop
    Send,
    /// Follow incoming clock and Start/Stop
    Receive,
}

impl SyncMode {
    pub fn from_index(i: i32) -> Self {
        match i {
            1 => SyncMode::Send,
            2 => SyncMode::Receive,
            _ => SyncMode::None,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            SyncMode::None => 0,
            SyncMode::Send => 1,
            SyncMode::Receive => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncMode::None => "none",
            SyncMode::Send => "send",
            SyncMode::Receive => "receive",
        }
    }
}

/// What incoming MIDI is echoed to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThruMode {
    Off,
    Full,
    /// Only clock, start and stop
    Realtime,
}

impl ThruMode {
    pub fn from_index(i: i32) -> Self {
        match i {
            1 => ThruMode::Full,
            2 => ThruMode::Realtime,
            _ => ThruMode::Off,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            ThruMode::Off => 0,
            ThruMode::Full => 1,
            ThruMode::Realtime => 2,
        }
    }
}

/// Instrument-wide preferences, persisted separately from patches and banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub midi_out: bool,
    /// 1-16
    pub midi_channel: u8,
    pub thru: ThruMode,
    pub sync: SyncMode,
    /// Echo front-panel keys as MIDI notes
    pub keys_out: bool,
    /// Velocity used for front-panel keys, 0-127
    pub key_velocity: u8,
    /// Send the trigger note when a sequence is picked on the panel
    pub trigger_out: bool,
    pub trigger_channel: u8,
    /// Incoming notes on the trigger channel that select sequences 0-7
    pub triggers: [u8; NUM_SEQUENCES],
    /// 0-1023
    pub master_volume: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            midi_out: true,
            midi_channel: 1,
            thru: ThruMode::Off,
            sync: SyncMode::None,
            keys_out: false,
            key_velocity: 127,
            trigger_out: false,
            trigger_channel: 1,
            triggers: std::array::from_fn(|i| 36 + i as u8),
            master_volume: 1023,
        }
    }
}

impl Settings {
    /// Clamp every field into range
    pub fn sanitized(mut self) -> Self {
        self.midi_channel = self.midi_channel.clamp(1, 16);
        self.trigger_channel = self.trigger_channel.clamp(1, 16);
        self.key_velocity = self.key_velocity.min(127);
        for t in self.triggers.iter_mut() {
            *t = (*t).min(127);
        }
        self.master_volume = self.master_volume.clamp(0, 1023);
        self
    }

    /// Sequence selected by a note on the trigger channel, if any.
    /// Later slots win when two share a note.
    pub fn trigger_for(&self, channel: u8, note: u8) -> Option<usize> {
        if channel != self.trigger_channel {
            return None;
        }
        self.triggers.iter().rposition(|&t| t == note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_clamps_ranges() {
        let s = Settings {
            midi_channel: 0,
            trigger_channel: 40,
            key_velocity: 200,
            master_volume: 5000,
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(s.midi_channel, 1);
        assert_eq!(s.trigger_channel, 16);
        assert_eq!(s.key_velocity, 127);
        assert_eq!(s.master_volume, 1023);
    }

    #[test]
    fn trigger_lookup() {
        let mut s = Settings::default();
        s.trigger_channel = 10;
        assert_eq!(s.trigger_for(10, 38), Some(2));
        assert_eq!(s.trigger_for(1, 38), None);
        assert_eq!(s.trigger_for(10, 20), None);
        s.triggers[5] = 38;
        assert_eq!(s.trigger_for(10, 38), Some(5));
    }

    #[test]
    fn mode_indices() {
        assert_eq!(SyncMode::from_index(2), SyncMode::Receive);
        assert_eq!(SyncMode::from_index(9), SyncMode::None);
        assert_eq!(ThruMode::from_index(ThruMode::Realtime.index()), ThruMode::Realtime);
    }
}
