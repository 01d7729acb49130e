//! Fixed-shape parameter records, stored as little-endian 32-bit fields.
//!
//! A record shorter than its shape decodes to `None`: the caller keeps
//! whatever it already has.

use crate::sequencer::{
    BankMode, SequenceBank, CONTROLLERS, NUM_SEQUENCES, SEQ_VOICES, STEPS,
};
use crate::settings::{Settings, SyncMode, ThruMode};
use crate::synth::wavetable::{SAMPLE_MAX, WAVE_SAMPLES};
use crate::synth::{ParamId, Patch, WaveTable};

use super::PatchData;

pub const PATCH_FIELDS: usize = 1900;
pub const BANK_FIELDS: usize = 1600;
pub const SETTINGS_FIELDS: usize = 100;

const LFO_RATE_FIELD: usize = 18;
const USER_TABLE_FIELDS: [usize; 3] = [100, 700, 1300];

/// Patch fields whose stored value is exactly what `Patch::set` takes
const PATCH_PARAMS: [(usize, ParamId); 48] = [
    (0, ParamId::OscWave(0)),
    (1, ParamId::OscOctave(0)),
    (2, ParamId::OscVolume(0)),
    (3, ParamId::OscDetune(0)),
    (4, ParamId::PulseWidth),
    (5, ParamId::OscWave(1)),
    (6, ParamId::OscOctave(1)),
    (7, ParamId::OscVolume(1)),
    (8, ParamId::OscDetune(1)),
    (9, ParamId::FilterCutoff),
    (10, ParamId::FilterResonance),
    (11, ParamId::FilterMode),
    (12, ParamId::FilterBypass),
    (13, ParamId::Attack),
    (14, ParamId::Decay),
    (15, ParamId::Sustain),
    (16, ParamId::Release),
    (17, ParamId::LfoShape),
    (19, ParamId::LfoLowRange),
    (20, ParamId::LfoRetrigger),
    (21, ParamId::LfoOsc1Detune),
    (22, ParamId::LfoOsc2Detune),
    (23, ParamId::LfoOsc1Octave),
    (24, ParamId::LfoOsc2Octave),
    (25, ParamId::LfoCutoff),
    (26, ParamId::LfoAmp),
    (27, ParamId::LfoPw),
    (28, ParamId::EnvOsc1Pitch),
    (29, ParamId::EnvOsc2Pitch),
    (30, ParamId::EnvCutoff),
    (31, ParamId::EnvLfoRate),
    (32, ParamId::ShaperType),
    (33, ParamId::ShaperAmount1),
    (34, ParamId::ShaperAmount2),
    (35, ParamId::Gain),
    (36, ParamId::BitMuncher),
    (37, ParamId::Portamento),
    (38, ParamId::MonoMode),
    (39, ParamId::Unison),
    (40, ParamId::UniSpread),
    // Reserved in older records, so those load with velocity routes off
    (41, ParamId::VelOsc1Detune),
    (42, ParamId::VelOsc2Detune),
    (43, ParamId::VelCutoff),
    (44, ParamId::VelAmp),
    (45, ParamId::VelPw),
    (46, ParamId::VelLfoRate),
    (47, ParamId::LfoSync),
    (48, ParamId::LfoSyncDivision),
];

// Bank layout, per sequence
const SEQ_STRIDE: usize = 186;
const TIE_OFFSET: usize = 64;
const MUTE_OFFSET: usize = 80;
const VELOCITY_OFFSET: usize = 96;
const CONTROL_NUM_OFFSET: usize = 112;
const CONTROL_VALUE_OFFSET: usize = 116;
const NOTE_DURATION_OFFSET: usize = 180;
const DIVISION_OFFSET: usize = 181;
const LENGTH_OFFSET: usize = 182;
const TRANSPOSE_OFFSET: usize = 183;
const SWING_OFFSET: usize = 184;
const BPM_OFFSET: usize = 185;
const BANK_MODE_FIELD: usize = SEQ_STRIDE * NUM_SEQUENCES;
const REST: i32 = 255;

// Settings layout
const MIDI_OUT: usize = 0;
const MIDI_CHANNEL: usize = 2;
const THRU: usize = 3;
const SYNC: usize = 4;
const KEYS_OUT: usize = 5;
const KEY_VELOCITY: usize = 6;
const TRIGGER_OUT: usize = 9;
const TRIGGER_CHANNEL: usize = 10;
const TRIGGERS: usize = 11;
const MASTER_VOLUME: usize = 19;
/// Stored master volume meaning "explicitly zero"; 0 on disk means never saved
const VOLUME_ZERO: i32 = 1025;

pub fn to_bytes(fields: &[i32]) -> Vec<u8> {
    fields.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode `count` fields, or None when the data is short.
/// Trailing bytes beyond the shape are ignored.
pub fn from_bytes(bytes: &[u8], count: usize) -> Option<Vec<i32>> {
    if bytes.len() < count * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .take(count)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

pub fn encode_patch(data: &PatchData) -> Vec<i32> {
    let mut fields = vec![0; PATCH_FIELDS];
    let patch = &data.patch;
    for (index, param) in PATCH_PARAMS {
        fields[index] = patch.get(param);
    }
    fields[LFO_RATE_FIELD] = patch.lfo.rate as i32;
    for (table, start) in data.user_tables.iter().zip(USER_TABLE_FIELDS) {
        for (field, sample) in fields[start..start + WAVE_SAMPLES].iter_mut().zip(table) {
            *field = *sample as i32;
        }
    }
    fields
}

pub fn decode_patch(fields: &[i32]) -> Option<PatchData> {
    if fields.len() < PATCH_FIELDS {
        return None;
    }
    let mut patch = Patch::default();
    for (index, param) in PATCH_PARAMS {
        patch.set(param, fields[index]);
    }
    let slowest = if patch.lfo.low_range { 64 } else { 1024 };
    patch.lfo.rate = fields[LFO_RATE_FIELD].clamp(1, slowest) as u32;

    let mut user_tables: [WaveTable; 3] = [[0; WAVE_SAMPLES]; 3];
    for (table, start) in user_tables.iter_mut().zip(USER_TABLE_FIELDS) {
        for (sample, field) in table.iter_mut().zip(&fields[start..start + WAVE_SAMPLES]) {
            *sample = (*field).clamp(0, SAMPLE_MAX) as u16;
        }
    }
    Some(PatchData { patch, user_tables })
}

pub fn encode_bank(bank: &SequenceBank) -> Vec<i32> {
    let mut fields = vec![0; BANK_FIELDS];
    for (i, seq) in bank.sequences.iter().enumerate() {
        let base = i * SEQ_STRIDE;
        for voice in 0..SEQ_VOICES {
            for step in 0..STEPS {
                fields[base + voice * STEPS + step] = seq.notes[voice][step].unwrap_or(REST);
            }
        }
        for step in 0..STEPS {
            fields[base + TIE_OFFSET + step] = seq.tie[step] as i32;
            fields[base + MUTE_OFFSET + step] = seq.mute[step] as i32;
            fields[base + VELOCITY_OFFSET + step] = seq.velocity[step] as i32;
        }
        for c in 0..CONTROLLERS {
            fields[base + CONTROL_NUM_OFFSET + c] = seq.control_num[c];
            let values = base + CONTROL_VALUE_OFFSET + c * STEPS;
            fields[values..values + STEPS].copy_from_slice(&seq.control_value[c]);
        }
        fields[base + NOTE_DURATION_OFFSET] = seq.note_duration;
        fields[base + DIVISION_OFFSET] = seq.division as i32;
        fields[base + LENGTH_OFFSET] = seq.length as i32;
        fields[base + TRANSPOSE_OFFSET] = seq.transpose;
        fields[base + SWING_OFFSET] = seq.swing;
        fields[base + BPM_OFFSET] = seq.bpm as i32;
    }
    fields[BANK_MODE_FIELD] = bank.mode.index();
    fields
}

pub fn decode_bank(fields: &[i32]) -> Option<SequenceBank> {
    if fields.len() < BANK_FIELDS {
        return None;
    }
    let mut bank = SequenceBank::new();
    for (i, seq) in bank.sequences.iter_mut().enumerate() {
        let base = i * SEQ_STRIDE;
        for step in 0..STEPS {
            let notes: [i32; SEQ_VOICES] =
                std::array::from_fn(|voice| fields[base + voice * STEPS + step]);
            let velocity = fields[base + VELOCITY_OFFSET + step].clamp(0, 127) as u8;
            seq.set_step(step, &notes, velocity);
            // set_step clamps every slot, so put the rests back
            for (voice, note) in notes.iter().enumerate() {
                if *note == REST {
                    seq.notes[voice][step] = None;
                }
            }
            seq.tie[step] = fields[base + TIE_OFFSET + step] != 0;
            seq.mute[step] = fields[base + MUTE_OFFSET + step] != 0;
        }
        for c in 0..CONTROLLERS {
            seq.control_num[c] = fields[base + CONTROL_NUM_OFFSET + c].clamp(0, 255);
            let values = base + CONTROL_VALUE_OFFSET + c * STEPS;
            for (slot, v) in seq.control_value[c].iter_mut().zip(&fields[values..values + STEPS]) {
                *slot = (*v).clamp(0, 255);
            }
        }
        seq.set_note_duration(fields[base + NOTE_DURATION_OFFSET]);
        seq.set_division(fields[base + DIVISION_OFFSET]);
        seq.set_length(fields[base + LENGTH_OFFSET]);
        seq.set_transpose(fields[base + TRANSPOSE_OFFSET]);
        seq.set_swing(fields[base + SWING_OFFSET]);
        seq.set_bpm(fields[base + BPM_OFFSET]);
    }
    bank.mode = BankMode::from_index(fields[BANK_MODE_FIELD]);
    Some(bank)
}

pub fn encode_settings(settings: &Settings) -> Vec<i32> {
    let mut fields = vec![0; SETTINGS_FIELDS];
    fields[MIDI_OUT] = settings.midi_out as i32;
    fields[MIDI_CHANNEL] = settings.midi_channel as i32;
    fields[THRU] = settings.thru.index();
    fields[SYNC] = settings.sync.index();
    fields[KEYS_OUT] = settings.keys_out as i32;
    fields[KEY_VELOCITY] = settings.key_velocity as i32;
    fields[TRIGGER_OUT] = settings.trigger_out as i32;
    fields[TRIGGER_CHANNEL] = settings.trigger_channel as i32;
    for (i, t) in settings.triggers.iter().enumerate() {
        fields[TRIGGERS + i] = *t as i32;
    }
    fields[MASTER_VOLUME] = match settings.master_volume {
        0 => VOLUME_ZERO,
        v => v,
    };
    fields
}

pub fn decode_settings(fields: &[i32]) -> Option<Settings> {
    if fields.len() < SETTINGS_FIELDS {
        return None;
    }
    let mut settings = Settings {
        midi_out: fields[MIDI_OUT] != 0,
        midi_channel: fields[MIDI_CHANNEL].clamp(1, 16) as u8,
        thru: ThruMode::from_index(fields[THRU]),
        sync: SyncMode::from_index(fields[SYNC]),
        keys_out: fields[KEYS_OUT] != 0,
        key_velocity: fields[KEY_VELOCITY].clamp(0, 127) as u8,
        trigger_out: fields[TRIGGER_OUT] != 0,
        trigger_channel: match fields[TRIGGER_CHANNEL] {
            0 => 1,
            ch => ch.clamp(1, 16) as u8,
        },
        master_volume: match fields[MASTER_VOLUME] {
            0 => 1023,
            VOLUME_ZERO => 0,
            v => v.clamp(0, 1023),
        },
        ..Settings::default()
    };
    for (i, t) in settings.triggers.iter_mut().enumerate() {
        *t = fields[TRIGGERS + i].clamp(0, 127) as u8;
    }
    Some(settings)
}
