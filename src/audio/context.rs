use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use super::mixer::{MixInput, Mixer};
use super::scheduler::Scheduler;
use super::SAMPLE_RATE;
use crate::command::{Command, CommandSource};
use crate::midi::{from_midi_note, MidiEvent, MidiMessage, Outbox};
use crate::project::PatchData;
use crate::sequencer::{Arpeggiator, Clock, SequenceBank, SequencerEngine};
use crate::settings::{Settings, SyncMode};
use crate::synth::{
    Envelope, EnvelopeEvent, EnvelopeMod, Glide, Lfo, LfoMod, ParamId, Patch, PitchContext,
    OscillatorBank, Stage, VelocityMod, WaveShape, Wavetables, VOICES,
};
use crate::voice::{NoteResponse, NoteSource, VoiceAllocator, PANEL_KEYS};

/// Snapshot of the engine published to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub bpm: u32,
    pub running: bool,
    pub arp: bool,
    pub current: usize,
    pub selected: usize,
    pub step: usize,
    pub stage: Stage,
    pub voices: [Option<i32>; VOICES],
    pub receiving_clock: bool,
    pub led: bool,
    pub arrow_frame: u8,
    pub blink: bool,
    pub refresh_due: bool,
    pub loading: bool,
}

/// The whole instrument: every piece of synth, sequencer and MIDI state,
/// driven through four task entry points and `handle_command`.
///
/// Nothing here allocates or blocks after construction; the host runs it
/// from the audio callback.
pub struct Engine {
    patch: Patch,
    settings: Settings,
    bank: SequenceBank,

    tables: Wavetables,
    oscillators: OscillatorBank,
    envelope: Envelope,
    env_mod: EnvelopeMod,
    lfo: Lfo,
    lfo_mod: LfoMod,
    velocity: VelocityMod,
    mixer: Mixer,

    voices: VoiceAllocator,
    clock: Clock,
    sequencer: SequencerEngine,
    arp: Arpeggiator,
    outbox: Outbox,

    scheduler: Scheduler,
    rng: StdRng,
    samples: u64,
    glide: Glide,
    /// Effective octave per engine after LFO octave modulation
    octave: [i32; 2],
    /// LFO rate after envelope modulation, before velocity pull
    lfo_rate: u32,
    /// Panel keys play the voices only while neither arp nor sequencer runs
    sound_keys: bool,
    led: bool,
    pending_patch: Option<Box<PatchData>>,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self::with_seed(settings, rand::random())
    }

    /// Deterministic noise and random play modes
    pub fn with_seed(settings: Settings, seed: u64) -> Self {
        let patch = Patch::default();
        let settings = settings.sanitized();
        let mut engine = Self {
            patch,
            settings,
            bank: SequenceBank::new(),
            tables: Wavetables::new(),
            oscillators: OscillatorBank::new(),
            envelope: Envelope::new(),
            env_mod: EnvelopeMod::default(),
            lfo: Lfo::new(),
            lfo_mod: LfoMod::default(),
            velocity: VelocityMod::default(),
            mixer: Mixer::new(),
            voices: VoiceAllocator::new(),
            clock: Clock::new(120),
            sequencer: SequencerEngine::new(),
            arp: Arpeggiator::new(),
            outbox: Outbox::new(),
            scheduler: Scheduler::new(),
            rng: StdRng::seed_from_u64(seed),
            samples: 0,
            glide: Glide::default(),
            octave: [patch.osc[0].octave, patch.osc[1].octave],
            lfo_rate: patch.lfo.rate,
            sound_keys: true,
            led: false,
            pending_patch: None,
        };
        engine.apply_patch();
        engine.mixer.set_master_volume(engine.settings.master_volume);
        engine
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bank(&self) -> &SequenceBank {
        &self.bank
    }

    pub fn voices(&self) -> &VoiceAllocator {
        &self.voices
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn sequencer(&self) -> &SequencerEngine {
        &self.sequencer
    }

    pub fn arp(&self) -> &Arpeggiator {
        &self.arp
    }

    /// Current patch plus user tables, as the store saves them
    pub fn patch_data(&self) -> PatchData {
        PatchData {
            patch: self.patch,
            user_tables: *self.tables.user_tables(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.samples * 1_000_000 / SAMPLE_RATE as u64
    }

    pub fn now_ms(&self) -> u64 {
        self.samples * 1_000 / SAMPLE_RATE as u64
    }

    pub fn status(&mut self) -> Status {
        Status {
            bpm: self.clock.bpm(),
            running: self.sequencer.is_running(),
            arp: self.arp.settings.enabled,
            current: self.sequencer.current(),
            selected: self.sequencer.selected(),
            step: self.sequencer.step(),
            stage: self.envelope.stage(),
            voices: *self.voices.voices(),
            receiving_clock: self.clock.receiving(),
            led: self.led,
            arrow_frame: self.lfo.arrow_frame(),
            blink: self.lfo.blink(),
            refresh_due: self.lfo.take_refresh(),
            loading: self.mixer.ramp.is_active(),
        }
    }

    /// Send pending MIDI output
    pub fn drain_midi<F: FnMut(MidiMessage)>(&mut self, send: F) {
        if !self.outbox.is_empty() {
            self.outbox.drain(self.settings.midi_channel, send);
        }
    }

    /// Panel key echoes lost to a full queue since the last call
    pub fn take_dropped_echoes(&mut self) -> u32 {
        self.outbox.take_dropped()
    }

    // ---------------------------------------------------------------
    // Task entry points
    // ---------------------------------------------------------------

    /// One output sample with every slower task that falls due on it
    pub fn next_sample(&mut self) -> i32 {
        let due = self.scheduler.advance(self.clock.period_us());
        if due.lfo {
            self.lfo_tick();
        }
        if due.clock {
            self.clock_tick();
        }
        if due.control {
            self.control_tick();
        }
        self.audio_tick()
    }

    /// Oscillators through the mixer: one unsigned 12-bit sample
    #[inline]
    pub fn audio_tick(&mut self) -> i32 {
        self.samples += 1;
        let shapes = [self.patch.osc[0].wave, self.patch.osc[1].wave];
        let tables = [self.tables.table(shapes[0]), self.tables.table(shapes[1])];
        let raw = self.oscillators.next(tables, self.voices.sounding());
        let input = MixInput {
            raw,
            noise: [shapes[0] == WaveShape::Noise, shapes[1] == WaveShape::Noise],
            envelope: self.envelope.amplitude(),
            lfo_amp: self.lfo_mod.amp,
            velocity_amp: self.velocity.amp,
        };
        self.mixer.render(&input, &mut self.rng)
    }

    pub fn lfo_tick(&mut self) {
        let rate = self.velocity.lfo_rate(self.lfo_rate);
        let table = self
            .tables
            .table(self.patch.lfo.shape)
            .or_else(|| self.tables.table(WaveShape::Sine));
        let Some(table) = table else {
            return;
        };
        let Some(sample) = self.lfo.tick(table, rate, self.patch.lfo.sync) else {
            return;
        };
        self.lfo_mod = LfoMod::derive(sample, &self.patch.mods);
        self.update_cutoff();
        if !self.envelope.is_idle() {
            self.update_octaves();
            self.assign_pitches();
        }
    }

    /// One 96-PPQ clock tick: LFO eighth sync, MIDI clock out, then
    /// whichever of arpeggiator, sequencer or free play is active.
    pub fn clock_tick(&mut self) {
        let pulse = self.clock.pulse();
        if pulse == 0 && self.patch.lfo.sync {
            self.lfo.on_eighth();
        }
        if self.clock.tick_out() && self.settings.sync == SyncMode::Send {
            self.outbox.clock_pulse();
        }

        self.led = false;
        if self.arp.settings.enabled {
            self.sound_keys = false;
            self.led = pulse < 12;
            let division = self.arp.settings.division_ticks();
            self.clock.set_division(division);
            if pulse % division == 0 {
                self.arp_step(pulse);
            } else if self.arp.release_due(pulse) {
                self.release_envelope();
                if self.settings.midi_out {
                    self.outbox.arp_note_off();
                }
            }
        } else if self.sequencer.is_running() {
            self.sound_keys = false;
            self.led = pulse < 12 && self.clock.eighth() % 2 == 0;
            let seq = self.bank.get(self.sequencer.current());
            self.clock.set_division(seq.division_ticks());
            if self.sequencer.step_due(pulse, seq) {
                self.seq_step(pulse);
            }
            if let Some(envelope) = self.sequencer.release_due(pulse) {
                if self.settings.midi_out {
                    self.outbox.seq_note_offs();
                }
                if envelope {
                    self.release_envelope();
                }
            }
        } else if !self.sound_keys {
            self.sound_keys = true;
            self.release_envelope();
        }

        self.clock.advance();
    }

    /// 1 kHz housekeeping: envelope, glide, cutoff and pulse width, the
    /// load fade and external clock loss.
    pub fn control_tick(&mut self) {
        let now = self.now_ms();
        if self.envelope.trigger_pending() {
            self.glide = Glide::starting_at(now, self.patch.portamento_ms);
        }
        match self.envelope.update(now, &self.patch.envelope) {
            Some(EnvelopeEvent::AttackStarted) => {
                self.voices.apply_mutes();
                self.velocity.apply_amp();
            }
            Some(EnvelopeEvent::Finished) => self.voices.finish(),
            None => {}
        }
        self.env_mod = self.envelope.modulation(&self.patch.mods, self.patch.lfo.rate);
        self.lfo_rate = self.env_mod.lfo_rate.unwrap_or(self.patch.lfo.rate);
        if !self.envelope.is_idle() {
            self.assign_pitches();
        }
        self.update_cutoff();

        let pw = self.lfo_mod.pulse_width.unwrap_or(self.patch.pulse_width) + self.velocity.pulse_width;
        self.tables.set_pulse_width(pw);

        if self.mixer.ramp.tick() {
            if let Some(data) = self.pending_patch.take() {
                self.load_patch(&data);
            }
        }

        let now_us = self.now_us();
        self.clock.check_timeout(now_us);
    }

    // ---------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------

    pub fn handle_command(&mut self, cmd: Command, source: CommandSource) {
        match cmd {
            Command::KeyDown(key) => self.key_down(key),
            Command::KeyUp(key) => self.key_up(key),
            Command::Midi(event) => self.handle_midi(event),

            Command::ToggleSequencer => {
                let running = !self.sequencer.is_running();
                self.set_running(running);
            }
            Command::SetBpm(bpm) => self.set_bpm(bpm),

            Command::SetArpEnabled(on) => self.arp.settings.enabled = on,
            Command::SetArpDivision(d) => self.arp.settings.set_division(d),
            Command::SetArpNoteTicks(t) => self.arp.settings.set_note_ticks(t),
            Command::SetArpForward(fwd) => {
                self.arp.settings.forward = fwd;
                self.arp.sort();
            }
            Command::SetArpStepMode(mode) => self.arp.settings.step_mode = mode,
            Command::SetArpOctaves(o) => self.arp.settings.set_octaves(o),

            Command::SetPlayMode(mode) => self.sequencer.set_play_mode(mode),
            Command::SelectSequence(index) => {
                self.select_sequence(index);
                if source == CommandSource::Panel && self.settings.trigger_out {
                    let index = self.sequencer.selected();
                    self.outbox
                        .sequence_trigger(self.settings.triggers[index], self.settings.trigger_channel);
                }
            }
            Command::CopySequence { src, dst } => self.bank.copy(src, dst),
            Command::ClearSequence(index) => self.bank.clear(index),
            Command::SetBankMode(mode) => self.bank.mode = mode,
            Command::SetSequenceParam { sequence, param, value } => {
                if let Some(seq) = self.bank.get_mut(sequence) {
                    seq.set(param, value);
                }
            }

            Command::CaptureStep { sequence, step } => {
                let velocity = match self.voices.source() {
                    NoteSource::Panel => self.settings.key_velocity,
                    NoteSource::Midi => self.voices.last_velocity(),
                };
                if let (Some(seq), Some(captured)) =
                    (self.bank.get_mut(sequence), self.voices.capture())
                {
                    seq.set_step(step, captured.notes(), velocity);
                }
            }
            Command::SetStep { sequence, step, notes, velocity } => {
                if let Some(seq) = self.bank.get_mut(sequence) {
                    seq.set_step(step, &notes, velocity);
                }
            }
            Command::ClearStep { sequence, step } => {
                if let Some(seq) = self.bank.get_mut(sequence) {
                    seq.clear_step(step);
                }
            }
            Command::ToggleTie { sequence, step } => {
                if let Some(seq) = self.bank.get_mut(sequence) {
                    seq.toggle_tie(step);
                }
            }
            Command::ToggleMute { sequence, step } => {
                if let Some(seq) = self.bank.get_mut(sequence) {
                    seq.toggle_mute(step);
                }
            }

            Command::SetParam(param, value) => self.set_param(param, value),
            Command::SetUserTable { slot, samples } => self.tables.set_user_table(slot, &samples),

            Command::SetSettings(settings) => {
                self.settings = settings.sanitized();
                self.mixer.set_master_volume(self.settings.master_volume);
            }
            Command::SetMasterVolume(volume) => {
                self.settings.master_volume = volume.clamp(0, 1023);
                self.mixer.set_master_volume(self.settings.master_volume);
            }

            Command::LoadPatch(data) => {
                self.pending_patch = Some(data);
                self.mixer.ramp.begin();
            }
            Command::LoadBank(bank) => {
                self.bank = *bank;
                if !self.sequencer.is_running() {
                    self.recall_sequence_bpm();
                }
            }
        }
    }

    fn handle_midi(&mut self, event: MidiEvent) {
        let now_us = self.now_us();
        let receive = self.settings.sync == SyncMode::Receive;
        match event {
            MidiEvent::NoteOn { channel, note, velocity } => {
                self.midi_note(channel, note, velocity);
                if velocity > 0 {
                    if let Some(index) = self.settings.trigger_for(channel, note) {
                        self.select_sequence(index);
                    }
                }
            }
            MidiEvent::NoteOff { channel, note, .. } => self.midi_note(channel, note, 0),
            MidiEvent::Clock if receive => {
                if self.clock.external_pulse(now_us).is_some() {
                    self.refresh_lfo_sync();
                }
            }
            MidiEvent::Start if receive => {
                self.sequencer.set_running(true);
                self.clock.external_start();
                self.lfo.reset_eighths();
                self.sequencer.cue_next(&self.bank, &mut self.rng);
            }
            MidiEvent::Stop if receive => {
                self.sequencer.set_running(false);
                self.clock.rewind();
                if self.settings.midi_out {
                    self.outbox.seq_note_offs();
                }
                self.release_envelope();
            }
            _ => {}
        }
    }

    /// Note on (velocity > 0) or off on the MIDI channel
    fn midi_note(&mut self, channel: u8, note: u8, velocity: u8) {
        if channel != self.settings.midi_channel {
            return;
        }
        if velocity > 0 {
            self.switch_source(NoteSource::Midi);
        } else if self.voices.source() != NoteSource::Midi {
            return;
        }
        let note = from_midi_note(note);
        if self.arp.settings.enabled {
            if velocity > 0 {
                self.arp.note_on(note);
            } else {
                self.arp.note_off(note);
            }
            return;
        }
        let response = if velocity > 0 {
            self.voices.note_on(note, velocity, self.patch.mono_mode, self.patch.unison)
        } else {
            self.voices.note_off(note, self.patch.mono_mode, self.patch.unison)
        };
        self.respond(response, velocity);
    }

    fn key_down(&mut self, key: usize) {
        if key >= PANEL_KEYS {
            return;
        }
        self.switch_source(NoteSource::Panel);
        self.voices.set_pressed(key, true);
        let note = key as i32;
        if self.arp.settings.enabled {
            self.arp.note_on(note);
            return;
        }
        if !self.sound_keys {
            return;
        }
        let velocity = self.settings.key_velocity.max(1);
        let response = self
            .voices
            .note_on(note, velocity, self.patch.mono_mode, self.patch.unison);
        self.respond(response, velocity);
        if self.settings.midi_out && self.settings.keys_out {
            self.outbox.key(note, velocity, true);
        }
    }

    fn key_up(&mut self, key: usize) {
        if key >= PANEL_KEYS {
            return;
        }
        self.voices.set_pressed(key, false);
        if self.voices.source() != NoteSource::Panel {
            return;
        }
        let note = key as i32;
        if self.arp.settings.enabled {
            self.arp.note_off(note);
            return;
        }
        if !self.sound_keys {
            return;
        }
        let response = self
            .voices
            .note_off(note, self.patch.mono_mode, self.patch.unison);
        self.respond(response, self.settings.key_velocity);
        if self.settings.midi_out && self.settings.keys_out {
            self.outbox.key(note, self.settings.key_velocity, false);
        }
    }

    /// Switching between panel and MIDI input drops everything held
    fn switch_source(&mut self, source: NoteSource) {
        if self.voices.set_source(source) {
            self.arp.set_midi(source == NoteSource::Midi);
            self.release_envelope();
        }
    }

    fn respond(&mut self, response: NoteResponse, velocity: u8) {
        if response.trigger {
            self.trigger();
            self.velocity.set_velocity(velocity, &self.patch.mods);
        }
        if response.release {
            self.release_envelope();
        }
    }

    fn trigger(&mut self) {
        self.envelope.trigger();
        if self.patch.lfo.retrigger {
            self.lfo.retrigger();
        }
    }

    fn release_envelope(&mut self) {
        let now = self.now_ms();
        self.envelope.release(now);
    }

    fn arp_step(&mut self, pulse: u32) {
        let Some(note) = self.arp.step(pulse, &mut self.rng) else {
            // Nothing held: the release tail belongs to no note
            self.voices.assign([None; VOICES], [false; VOICES]);
            return;
        };
        let lead = if self.patch.mono_mode.is_mono() { self.patch.unison } else { 0 };
        let mut voices = [None; VOICES];
        let mut mute = [false; VOICES];
        for (v, (slot, m)) in voices.iter_mut().zip(mute.iter_mut()).enumerate() {
            if v <= lead {
                *slot = Some(note);
            } else {
                *m = true;
            }
        }
        self.voices.assign(voices, mute);
        self.trigger();
        if self.settings.midi_out {
            self.outbox.arp_note_on(note);
        }
    }

    fn seq_step(&mut self, pulse: u32) {
        let unison = self.patch.mono_mode.is_mono().then_some(self.patch.unison);
        let Some(step) = self.sequencer.next_step(&self.bank, pulse, unison, &mut self.rng) else {
            return;
        };
        let mut voices = step.voices;
        if step.hold_upper {
            voices[1..].copy_from_slice(&self.voices.voices()[1..]);
        }
        self.voices.assign(voices, step.mute);
        if let Some(velocity) = step.trigger {
            self.trigger();
            self.velocity.set_velocity(velocity, &self.patch.mods);
        }
        if self.settings.midi_out {
            self.outbox
                .seq_note_ons(step.voices, step.trigger.unwrap_or(127));
        }
    }

    fn set_running(&mut self, running: bool) {
        self.sequencer.set_running(running);
        self.clock.external_start();
        self.lfo.reset_eighths();
        let send = self.settings.sync == SyncMode::Send;
        if running {
            self.sequencer.cue_next(&self.bank, &mut self.rng);
            if send {
                self.outbox.start();
            }
        } else {
            if self.settings.midi_out {
                self.outbox.seq_note_offs();
            }
            self.release_envelope();
            if send {
                self.outbox.stop();
            }
        }
    }

    fn select_sequence(&mut self, index: usize) {
        self.sequencer.select(index);
        if !self.sequencer.is_running() {
            self.recall_sequence_bpm();
        }
    }

    fn recall_sequence_bpm(&mut self) {
        let bpm = self.bank.get(self.sequencer.current()).bpm;
        self.set_bpm(bpm);
    }

    fn set_bpm(&mut self, bpm: u32) {
        if self.clock.set_bpm(bpm) {
            self.refresh_lfo_sync();
        }
    }

    fn refresh_lfo_sync(&mut self) {
        self.lfo.set_sync(self.clock.period_us(), self.patch.lfo.sync_division);
    }

    // ---------------------------------------------------------------
    // Patch plumbing
    // ---------------------------------------------------------------

    fn set_param(&mut self, param: ParamId, value: i32) {
        if !self.patch.set(param, value) {
            return;
        }
        match param {
            ParamId::OscVolume(i) => self.mixer.set_volume(i, self.patch.osc[i].volume),
            ParamId::OscOctave(_) => self.update_octaves(),
            ParamId::FilterResonance => self.mixer.filter.set_resonance(self.patch.filter.resonance),
            ParamId::FilterMode => self.mixer.filter.set_mode(self.patch.filter.mode),
            ParamId::FilterBypass => self.mixer.filter.set_bypass(self.patch.filter.bypass),
            ParamId::ShaperType | ParamId::ShaperAmount1 | ParamId::ShaperAmount2 => {
                let s = self.patch.shaper;
                self.mixer.set_shaper(s.kind, s.amount1, s.amount2);
            }
            ParamId::Gain => self.mixer.set_gain(self.patch.gain),
            ParamId::BitMuncher => self.mixer.set_bit_muncher(self.patch.bit_muncher),
            ParamId::LfoSync | ParamId::LfoSyncDivision => self.refresh_lfo_sync(),
            ParamId::LfoRateKnob | ParamId::LfoLowRange => self.lfo_rate = self.patch.lfo.rate,
            // Everything else is read live by the tick paths
            _ => {}
        }
    }

    fn load_patch(&mut self, data: &PatchData) {
        self.patch = data.patch;
        self.tables.set_user_tables(&data.user_tables);
        self.lfo_rate = self.patch.lfo.rate;
        self.apply_patch();
    }

    /// Push every derived table and setting from the patch
    fn apply_patch(&mut self) {
        let p = self.patch;
        self.mixer.set_volume(0, p.osc[0].volume);
        self.mixer.set_volume(1, p.osc[1].volume);
        self.mixer.filter.set_cutoff(p.filter.cutoff);
        self.mixer.filter.set_resonance(p.filter.resonance);
        self.mixer.filter.set_mode(p.filter.mode);
        self.mixer.filter.set_bypass(p.filter.bypass);
        self.mixer.set_shaper(p.shaper.kind, p.shaper.amount1, p.shaper.amount2);
        self.mixer.set_gain(p.gain);
        self.mixer.set_bit_muncher(p.bit_muncher);
        self.tables.set_pulse_width(p.pulse_width);
        self.update_octaves();
        self.refresh_lfo_sync();
    }

    fn update_octaves(&mut self) {
        for (engine, octave) in self.octave.iter_mut().enumerate() {
            *octave = (self.patch.osc[engine].octave + self.lfo_mod.octave[engine]).clamp(1, 9);
        }
    }

    fn update_cutoff(&mut self) {
        let cutoff = self.patch.filter.cutoff + self.lfo_mod.cutoff + self.env_mod.cutoff + self.velocity.cutoff;
        self.mixer.filter.set_cutoff(cutoff.clamp(0, 255));
    }

    /// Recompute every oscillator increment from the voices and modulation
    fn assign_pitches(&mut self) {
        let now = self.now_ms();
        let unison = self.patch.mono_mode.is_mono() && self.patch.unison > 0;
        let ctx = PitchContext {
            octave: self.octave,
            osc1_semitones: self.patch.osc[0].detune,
            osc2_fine: self.patch.osc[1].detune,
            detune: [
                self.lfo_mod.osc1_detune + self.env_mod.osc1_pitch + self.velocity.osc1_detune,
                self.lfo_mod.osc2_detune + self.env_mod.osc2_pitch + self.velocity.osc2_detune,
            ],
            unison_spread: unison.then_some(self.patch.uni_spread),
            portamento_ms: self.patch.portamento_ms,
        };
        self.oscillators
            .assign(self.voices.voices(), &self.tables, &ctx, self.glide, now);
        self.voices.mark_sounding();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{BankMode, PlayMode, SequenceParam};
    use crate::settings::ThruMode;
    use crate::synth::MonoMode;

    fn engine() -> Engine {
        Engine::with_seed(Settings::default(), 42)
    }

    fn host(engine: &mut Engine, cmd: Command) {
        engine.handle_command(cmd, CommandSource::Host);
    }

    fn run_control(engine: &mut Engine, ms: u32) {
        for _ in 0..ms {
            // 44.1 samples per millisecond; keep the time base honest
            for _ in 0..44 {
                engine.audio_tick();
            }
            engine.control_tick();
        }
    }

    fn midi(engine: &mut Engine, bytes: &[u8]) {
        if let Some(ev) = MidiEvent::parse(bytes) {
            engine.handle_command(Command::Midi(ev), CommandSource::Midi);
        }
    }

    #[test]
    fn free_clock_counts_one_eighth_per_96_ticks() {
        let mut e = engine();
        host(&mut e, Command::SetSequenceParam { sequence: 0, param: SequenceParam::Division, value: 0 });
        host(&mut e, Command::ToggleSequencer);
        for _ in 0..96 {
            e.clock_tick();
        }
        assert_eq!(e.clock().pulse(), 0);
        assert_eq!(e.clock().eighth(), 1);
    }

    #[test]
    fn three_keys_paraphonic_then_release_middle() {
        let mut e = engine();
        for key in [0, 4, 7] {
            host(&mut e, Command::KeyDown(key));
        }
        assert_eq!(*e.voices().voices(), [Some(0), Some(4), Some(7), None]);
        host(&mut e, Command::KeyUp(4));
        assert_eq!(*e.voices().voices(), [Some(0), None, Some(7), None]);
        assert!(e.envelope().trigger_pending() || !e.envelope().is_idle());
    }

    #[test]
    fn key_press_reaches_attack_and_sounds() {
        let mut e = engine();
        host(&mut e, Command::KeyDown(0));
        run_control(&mut e, 20);
        assert_ne!(e.envelope().stage(), Stage::Idle);
        assert!(e.voices().sounding()[0]);
        assert!(!e.voices().sounding()[1]);

        host(&mut e, Command::KeyUp(0));
        assert_eq!(e.envelope().stage(), Stage::Release);
        run_control(&mut e, 400);
        assert!(e.envelope().is_idle());
        assert_eq!(*e.voices().sounding(), [false; VOICES]);
        assert_eq!(e.voices().active_voices(), 0);
    }

    #[test]
    fn midi_note_switches_source_and_clears_panel_notes() {
        let mut e = engine();
        host(&mut e, Command::KeyDown(2));
        midi(&mut e, &[0x90, 64, 100]);
        assert_eq!(e.voices().source(), NoteSource::Midi);
        assert_eq!(*e.voices().voices(), [Some(4), None, None, None]);
        // wrong channel is ignored
        midi(&mut e, &[0x91, 67, 100]);
        assert_eq!(e.voices().active_voices(), 1);
        midi(&mut e, &[0x90, 64, 0]);
        assert_eq!(e.voices().active_voices(), 0);
    }

    #[test]
    fn sequencer_plays_steps_and_sends_midi() {
        let mut e = engine();
        host(&mut e, Command::SetStep { sequence: 0, step: 0, notes: vec![0, 7], velocity: 100 });
        host(&mut e, Command::SetStep { sequence: 0, step: 1, notes: vec![5], velocity: 90 });
        host(&mut e, Command::SetSequenceParam { sequence: 0, param: SequenceParam::Length, value: 2 });
        host(&mut e, Command::ToggleSequencer);

        e.clock_tick();
        assert_eq!(*e.voices().voices(), [Some(0), Some(7), None, None]);
        assert!(e.envelope().trigger_pending());
        let mut sent = Vec::new();
        e.drain_midi(|m| sent.push(m));
        assert_eq!(
            sent,
            vec![
                MidiMessage::NoteOn { channel: 1, note: 60, velocity: 100 },
                MidiMessage::NoteOn { channel: 1, note: 67, velocity: 100 },
            ]
        );

        // step 1 falls on the second 16th (24 ticks, no swing)
        for _ in 1..24 {
            e.clock_tick();
        }
        assert_eq!(e.sequencer().step(), 1);
        e.clock_tick();
        assert_eq!(e.voices().voices()[0], Some(5));
        assert_eq!(e.sequencer().step(), 0);
    }

    #[test]
    fn mono_rest_keeps_unison_voices() {
        let mut e = engine();
        host(&mut e, Command::SetParam(ParamId::MonoMode, MonoMode::Highest.index()));
        host(&mut e, Command::SetParam(ParamId::Unison, 1));
        host(&mut e, Command::SetStep { sequence: 0, step: 0, notes: vec![4], velocity: 100 });
        host(&mut e, Command::SetSequenceParam { sequence: 0, param: SequenceParam::Length, value: 2 });
        host(&mut e, Command::ToggleSequencer);

        e.clock_tick();
        assert_eq!(*e.voices().voices(), [Some(4), Some(4), None, None]);
        for _ in 0..24 {
            e.clock_tick();
        }
        assert_eq!(e.sequencer().step(), 0);
        assert_eq!(*e.voices().voices(), [None, Some(4), None, None]);
    }

    #[test]
    fn panel_keys_are_silent_while_sequencer_runs() {
        let mut e = engine();
        host(&mut e, Command::ToggleSequencer);
        e.clock_tick();
        host(&mut e, Command::KeyDown(3));
        assert_eq!(e.voices().active_voices(), 0);
        // but they can still be captured into a step
        host(&mut e, Command::CaptureStep { sequence: 2, step: 5 });
        assert_eq!(e.bank().get(2).notes[0][5], Some(3));
    }

    #[test]
    fn stopping_releases_once_in_free_play() {
        let mut e = engine();
        host(&mut e, Command::SetStep { sequence: 0, step: 0, notes: vec![0], velocity: 127 });
        host(&mut e, Command::ToggleSequencer);
        e.clock_tick();
        run_control(&mut e, 10);
        host(&mut e, Command::ToggleSequencer);
        assert_eq!(e.envelope().stage(), Stage::Release);
        assert!(!e.sequencer().is_running());
    }

    #[test]
    fn arp_steps_through_held_keys() {
        let mut e = engine();
        host(&mut e, Command::SetArpEnabled(true));
        host(&mut e, Command::SetArpDivision(5)); // 12 ticks
        e.clock_tick();
        for key in [0, 4, 7] {
            host(&mut e, Command::KeyDown(key));
        }
        let mut played = Vec::new();
        for _ in 0..36 {
            e.clock_tick();
            played.push(e.voices().voices()[0]);
        }
        assert!(played.contains(&Some(4)));
        assert!(played.contains(&Some(7)));
        assert_eq!(e.voices().voices()[1], None);
        assert!(e.voices().mute_on_trigger()[1]);
    }

    #[test]
    fn arp_frees_voices_once_keys_are_released() {
        let mut e = engine();
        host(&mut e, Command::SetArpEnabled(true));
        host(&mut e, Command::SetArpDivision(5)); // 12 ticks
        e.clock_tick();
        host(&mut e, Command::KeyDown(4));
        for _ in 0..12 {
            e.clock_tick();
        }
        assert_eq!(e.voices().voices()[0], Some(4));

        host(&mut e, Command::KeyUp(4));
        for _ in 0..12 {
            e.clock_tick();
        }
        assert_eq!(*e.voices().voices(), [None; VOICES]);
    }

    #[test]
    fn trigger_channel_selects_sequence() {
        let mut e = engine();
        let mut settings = Settings::default();
        settings.trigger_channel = 10;
        host(&mut e, Command::SetSettings(settings));
        midi(&mut e, &[0x99, 38, 100]);
        assert_eq!(e.sequencer().current(), 2);

        host(&mut e, Command::ToggleSequencer);
        midi(&mut e, &[0x99, 40, 100]);
        assert_eq!(e.sequencer().current(), 2);
        assert_eq!(e.sequencer().selected(), 4);
    }

    #[test]
    fn panel_select_sends_trigger_when_enabled() {
        let mut e = engine();
        let settings = Settings { trigger_out: true, trigger_channel: 10, ..Settings::default() };
        host(&mut e, Command::SetSettings(settings));
        e.handle_command(Command::SelectSequence(1), CommandSource::Panel);
        let mut sent = Vec::new();
        e.drain_midi(|m| sent.push(m));
        assert_eq!(sent, vec![MidiMessage::NoteOn { channel: 10, note: 37, velocity: 127 }]);
    }

    #[test]
    fn send_sync_emits_start_and_24ppq_clock() {
        let mut e = engine();
        let settings = Settings { sync: SyncMode::Send, thru: ThruMode::Off, ..Settings::default() };
        host(&mut e, Command::SetSettings(settings));
        host(&mut e, Command::ToggleSequencer);
        for _ in 0..96 {
            e.clock_tick();
        }
        let mut sent = Vec::new();
        e.drain_midi(|m| sent.push(m));
        assert_eq!(sent[0], MidiMessage::Start);
        assert_eq!(sent.iter().filter(|m| **m == MidiMessage::Clock).count(), 24);
    }

    #[test]
    fn receive_sync_follows_start_and_clock() {
        let mut e = engine();
        let settings = Settings { sync: SyncMode::Receive, ..Settings::default() };
        host(&mut e, Command::SetSettings(settings));
        midi(&mut e, &[0xFA]);
        assert!(e.sequencer().is_running());
        // 24 pulses at 140 BPM: 60e6 / 140 / 24 = 17857 µs apart
        for _ in 0..24 {
            midi(&mut e, &[0xF8]);
            for _ in 0..788 {
                e.audio_tick();
            }
        }
        assert!(e.clock().receiving());
        assert!((138..=143).contains(&e.clock().bpm()), "got {}", e.clock().bpm());
        midi(&mut e, &[0xFC]);
        assert!(!e.sequencer().is_running());
        // silence for more than 300 ms drops sync
        run_control(&mut e, 400);
        assert!(!e.clock().receiving());
    }

    #[test]
    fn patch_load_waits_for_the_fade() {
        let mut e = engine();
        let mut data = e.patch_data();
        data.patch.filter.resonance = 12;
        data.user_tables[0][0] = 4095;
        host(&mut e, Command::LoadPatch(Box::new(data)));
        assert_eq!(e.patch().filter.resonance, 210);
        run_control(&mut e, 205);
        assert_eq!(e.patch().filter.resonance, 12);
        assert_eq!(e.patch_data().user_tables[0][0], 4095);
        assert!(e.status().loading);
        run_control(&mut e, 205);
        assert!(!e.status().loading);
    }

    #[test]
    fn bank_load_recalls_tempo_when_stopped() {
        let mut e = engine();
        let mut bank = SequenceBank::new();
        bank.sequences[0].set_bpm(95);
        bank.mode = BankMode::Loop2;
        host(&mut e, Command::LoadBank(Box::new(bank)));
        assert_eq!(e.clock().bpm(), 95);
        assert_eq!(e.bank().mode, BankMode::Loop2);
    }

    #[test]
    fn edits_outside_the_bank_are_ignored() {
        let mut e = engine();
        host(&mut e, Command::SetStep { sequence: 7, step: 0, notes: vec![3], velocity: 80 });
        let before = e.bank().sequences[7].clone();

        host(&mut e, Command::ClearSequence(99));
        host(&mut e, Command::SetStep { sequence: 42, step: 0, notes: vec![9], velocity: 20 });
        host(&mut e, Command::ClearStep { sequence: 8, step: 0 });
        host(&mut e, Command::ToggleTie { sequence: 8, step: 1 });
        host(&mut e, Command::ToggleMute { sequence: 8, step: 0 });
        host(
            &mut e,
            Command::SetSequenceParam { sequence: 8, param: SequenceParam::Length, value: 4 },
        );
        host(&mut e, Command::KeyDown(4));
        host(&mut e, Command::CaptureStep { sequence: 8, step: 0 });

        assert_eq!(e.bank().sequences[7], before);
        assert_eq!(e.bank().sequences[7].notes[0][0], Some(3));
    }

    #[test]
    fn mono_last_note_with_unison() {
        let mut e = engine();
        host(&mut e, Command::SetParam(ParamId::MonoMode, MonoMode::Last.index()));
        host(&mut e, Command::SetParam(ParamId::Unison, 2));
        host(&mut e, Command::KeyDown(0));
        host(&mut e, Command::KeyDown(5));
        assert_eq!(*e.voices().voices(), [Some(5), Some(5), Some(5), None]);
        host(&mut e, Command::KeyUp(5));
        assert_eq!(e.voices().voices()[0], Some(0));
    }

    #[test]
    fn audio_stays_in_range_while_playing() {
        let mut e = engine();
        host(&mut e, Command::SetParam(ParamId::OscWave(1), WaveShape::Noise.index()));
        host(&mut e, Command::SetParam(ParamId::Gain, 1023));
        host(&mut e, Command::SetPlayMode(PlayMode::Random));
        for step in 0..16 {
            host(&mut e, Command::SetStep { sequence: 0, step, notes: vec![step as i32 - 8, 12], velocity: 100 });
        }
        host(&mut e, Command::ToggleSequencer);
        for _ in 0..SAMPLE_RATE {
            let s = e.next_sample();
            assert!((0..=4095).contains(&s));
        }
        assert!(e.status().running);
    }
}
