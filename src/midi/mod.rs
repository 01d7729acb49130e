pub mod bridge;

use crate::synth::VOICES;

/// Semitone offset 0 sits on MIDI middle C
pub const NOTE_OFFSET: i32 = 60;
const KEY_ECHO_SLOTS: usize = 16;

/// Convert a voice note to a MIDI note number, clamped into 0..=127
pub fn to_midi_note(note: i32) -> u8 {
    (note + NOTE_OFFSET).clamp(0, 127) as u8
}

pub fn from_midi_note(note: u8) -> i32 {
    note as i32 - NOTE_OFFSET
}

/// Decoded incoming MIDI message. Channels are 1-16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    Clock,
    Start,
    Continue,
    Stop,
}

impl MidiEvent {
    /// Decode one complete message; anything the core does not use is None
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        match status {
            0xF8 => return Some(MidiEvent::Clock),
            0xFA => return Some(MidiEvent::Start),
            0xFB => return Some(MidiEvent::Continue),
            0xFC => return Some(MidiEvent::Stop),
            _ => {}
        }
        let channel = (status & 0x0F) + 1;
        let note = *bytes.get(1)? & 0x7F;
        let velocity = *bytes.get(2)? & 0x7F;
        match status & 0xF0 {
            0x90 => Some(MidiEvent::NoteOn { channel, note, velocity }),
            0x80 => Some(MidiEvent::NoteOff { channel, note, velocity }),
            _ => None,
        }
    }

    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiEvent::NoteOn { channel, .. } | MidiEvent::NoteOff { channel, .. } => Some(*channel),
            _ => None,
        }
    }
}

/// Outgoing MIDI message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    Clock,
    Start,
    Stop,
}

impl MidiMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let status = |kind: u8, channel: u8| kind | (channel.clamp(1, 16) - 1);
        match *self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![status(0x90, channel), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![status(0x80, channel), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::Clock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Stop => vec![0xFC],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyEcho {
    note: i32,
    velocity: u8,
    on: bool,
}

/// Pending MIDI egress raised by the timing tasks and sent later from the
/// host side. Note events are named flags so at most one arpeggiator event,
/// one batch of sequencer note-ons and one batch of note-offs wait at a time.
#[derive(Debug, Clone)]
pub struct Outbox {
    arp_note_on: Option<i32>,
    arp_note_off: bool,
    arp_sounding: Option<i32>,

    seq_notes: [Option<i32>; VOICES],
    seq_velocity: u8,
    seq_note_ons: bool,
    seq_note_offs: bool,
    seq_sounding: [Option<i32>; VOICES],

    clock_pulses: u32,
    start: bool,
    stop: bool,
    /// (note, channel) announcing a sequence change
    trigger: Option<(u8, u8)>,

    keys: [Option<KeyEcho>; KEY_ECHO_SLOTS],
    dropped: u32,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            arp_note_on: None,
            arp_note_off: false,
            arp_sounding: None,
            seq_notes: [None; VOICES],
            seq_velocity: 127,
            seq_note_ons: false,
            seq_note_offs: false,
            seq_sounding: [None; VOICES],
            clock_pulses: 0,
            start: false,
            stop: false,
            trigger: None,
            keys: [None; KEY_ECHO_SLOTS],
            dropped: 0,
        }
    }

    pub fn arp_note_on(&mut self, note: i32) {
        self.arp_note_on = Some(note);
    }

    pub fn arp_note_off(&mut self) {
        self.arp_note_off = true;
    }

    pub fn seq_note_ons(&mut self, notes: [Option<i32>; VOICES], velocity: u8) {
        self.seq_notes = notes;
        self.seq_velocity = velocity;
        self.seq_note_ons = true;
    }

    pub fn seq_note_offs(&mut self) {
        self.seq_note_offs = true;
    }

    pub fn clock_pulse(&mut self) {
        self.clock_pulses += 1;
    }

    pub fn start(&mut self) {
        self.start = true;
        self.stop = false;
    }

    pub fn stop(&mut self) {
        self.stop = true;
        self.start = false;
    }

    pub fn sequence_trigger(&mut self, note: u8, channel: u8) {
        self.trigger = Some((note, channel));
    }

    /// Echo a panel key. Returns false if the echo queue is full.
    pub fn key(&mut self, note: i32, velocity: u8, on: bool) -> bool {
        match self.keys.iter_mut().find(|k| k.is_none()) {
            Some(slot) => {
                *slot = Some(KeyEcho { note, velocity, on });
                true
            }
            None => {
                self.dropped += 1;
                false
            }
        }
    }

    /// Key echoes lost to a full queue since the last call
    pub fn take_dropped(&mut self) -> u32 {
        std::mem::take(&mut self.dropped)
    }

    pub fn is_empty(&self) -> bool {
        self.arp_note_on.is_none()
            && !self.arp_note_off
            && !self.seq_note_ons
            && !self.seq_note_offs
            && self.clock_pulses == 0
            && !self.start
            && !self.stop
            && self.trigger.is_none()
            && self.keys.iter().all(|k| k.is_none())
    }

    /// Send everything pending. Realtime messages go first; of the note
    /// events only the highest-priority one is handled per call.
    pub fn drain<F: FnMut(MidiMessage)>(&mut self, channel: u8, mut send: F) {
        if std::mem::take(&mut self.start) {
            send(MidiMessage::Start);
        }
        for _ in 0..std::mem::take(&mut self.clock_pulses) {
            send(MidiMessage::Clock);
        }
        if std::mem::take(&mut self.stop) {
            send(MidiMessage::Stop);
        }
        if let Some((note, channel)) = self.trigger.take() {
            send(MidiMessage::NoteOn {
                channel,
                note,
                velocity: 127,
            });
        }

        let on = |note: i32, velocity: u8| MidiMessage::NoteOn {
            channel,
            note: to_midi_note(note),
            velocity,
        };
        let off = |note: i32| MidiMessage::NoteOff {
            channel,
            note: to_midi_note(note),
            velocity: 127,
        };

        for slot in self.keys.iter_mut() {
            if let Some(k) = slot.take() {
                send(if k.on { on(k.note, k.velocity) } else { off(k.note) });
            }
        }

        if let Some(note) = self.arp_note_on.take() {
            if let Some(previous) = self.arp_sounding {
                send(off(previous));
            }
            send(on(note, 127));
            self.arp_sounding = Some(note);
        } else if std::mem::take(&mut self.arp_note_off) {
            if let Some(previous) = self.arp_sounding.take() {
                send(off(previous));
            }
        } else if std::mem::take(&mut self.seq_note_ons) {
            for (sounding, next) in self.seq_sounding.iter_mut().zip(self.seq_notes) {
                let Some(note) = next else { continue };
                if let Some(previous) = sounding.take() {
                    send(off(previous));
                }
                send(on(note, self.seq_velocity));
                *sounding = Some(note);
            }
        } else if std::mem::take(&mut self.seq_note_offs) {
            for sounding in self.seq_sounding.iter_mut() {
                if let Some(previous) = sounding.take() {
                    send(off(previous));
                }
            }
        }
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(outbox: &mut Outbox) -> Vec<MidiMessage> {
        let mut sent = Vec::new();
        outbox.drain(1, |m| sent.push(m));
        sent
    }

    fn on(note: u8, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn { channel: 1, note, velocity }
    }

    fn off(note: u8) -> MidiMessage {
        MidiMessage::NoteOff { channel: 1, note, velocity: 127 }
    }

    #[test]
    fn parse_notes_and_realtime() {
        assert_eq!(
            MidiEvent::parse(&[0x92, 60, 100]),
            Some(MidiEvent::NoteOn { channel: 3, note: 60, velocity: 100 })
        );
        assert_eq!(
            MidiEvent::parse(&[0x80, 61, 0]),
            Some(MidiEvent::NoteOff { channel: 1, note: 61, velocity: 0 })
        );
        assert_eq!(MidiEvent::parse(&[0xF8]), Some(MidiEvent::Clock));
        assert_eq!(MidiEvent::parse(&[0xFC]), Some(MidiEvent::Stop));
        assert_eq!(MidiEvent::parse(&[0xB0, 7, 100]), None);
        assert_eq!(MidiEvent::parse(&[0x90, 60]), None);
        assert_eq!(MidiEvent::parse(&[]), None);
    }

    #[test]
    fn encode_uses_zero_based_channel() {
        let m = MidiMessage::NoteOn { channel: 10, note: 64, velocity: 90 };
        assert_eq!(m.to_bytes(), vec![0x99, 64, 90]);
        assert_eq!(MidiMessage::Clock.to_bytes(), vec![0xF8]);
    }

    #[test]
    fn arp_note_replaces_previous() {
        let mut outbox = Outbox::new();
        outbox.arp_note_on(0);
        assert_eq!(drain(&mut outbox), vec![on(60, 127)]);
        outbox.arp_note_on(12);
        assert_eq!(drain(&mut outbox), vec![off(60), on(72, 127)]);
        outbox.arp_note_off();
        assert_eq!(drain(&mut outbox), vec![off(72)]);
        assert!(outbox.is_empty());
    }

    #[test]
    fn seq_batches_track_sounding_notes() {
        let mut outbox = Outbox::new();
        outbox.seq_note_ons([Some(0), Some(4), None, None], 80);
        assert_eq!(drain(&mut outbox), vec![on(60, 80), on(64, 80)]);
        outbox.seq_note_ons([Some(2), None, None, None], 90);
        assert_eq!(drain(&mut outbox), vec![off(60), on(62, 90)]);
        outbox.seq_note_offs();
        assert_eq!(drain(&mut outbox), vec![off(62), off(64)]);
    }

    #[test]
    fn one_note_batch_per_drain() {
        let mut outbox = Outbox::new();
        outbox.seq_note_ons([Some(0), None, None, None], 100);
        outbox.seq_note_offs();
        outbox.clock_pulse();
        outbox.clock_pulse();
        assert_eq!(
            drain(&mut outbox),
            vec![MidiMessage::Clock, MidiMessage::Clock, on(60, 100)]
        );
        assert_eq!(drain(&mut outbox), vec![off(60)]);
    }

    #[test]
    fn key_echo_overflow_is_counted() {
        let mut outbox = Outbox::new();
        for i in 0..KEY_ECHO_SLOTS as i32 {
            assert!(outbox.key(i, 100, true));
        }
        assert!(!outbox.key(99, 100, true));
        assert_eq!(outbox.take_dropped(), 1);
        assert_eq!(drain(&mut outbox).len(), KEY_ECHO_SLOTS);
    }

    #[test]
    fn sequence_trigger_uses_its_own_channel() {
        let mut outbox = Outbox::new();
        outbox.sequence_trigger(38, 10);
        assert_eq!(
            drain(&mut outbox),
            vec![MidiMessage::NoteOn { channel: 10, note: 38, velocity: 127 }]
        );
    }

    #[test]
    fn notes_clamp_into_midi_range() {
        assert_eq!(to_midi_note(100), 127);
        assert_eq!(to_midi_note(-80), 0);
        assert_eq!(from_midi_note(60), 0);
    }
}
