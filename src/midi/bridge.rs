use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;

use super::{MidiEvent, MidiMessage};
use crate::command::{Command, CommandSender, CommandSource};
use crate::settings::ThruMode;

const CLIENT_NAME: &str = "quartet";

/// Whether incoming bytes are echoed to the output under a thru mode
pub fn thru_passes(mode: ThruMode, bytes: &[u8]) -> bool {
    match mode {
        ThruMode::Off => false,
        ThruMode::Full => true,
        ThruMode::Realtime => bytes.first().is_some_and(|&status| status >= 0xF8),
    }
}

pub fn input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new(CLIENT_NAME).context("Failed to open MIDI input")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

pub fn output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME).context("Failed to open MIDI output")?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

type SharedOutput = Arc<Mutex<Option<MidiOutputConnection>>>;

/// Host side of the MIDI boundary: decodes input into engine commands,
/// sends the engine's output and handles thru.
pub struct MidiBridge {
    input: Option<MidiInputConnection<()>>,
    output: SharedOutput,
    thru: Arc<AtomicU8>,
}

impl MidiBridge {
    pub fn new(thru: ThruMode) -> Self {
        Self {
            input: None,
            output: Arc::new(Mutex::new(None)),
            thru: Arc::new(AtomicU8::new(thru.index() as u8)),
        }
    }

    pub fn set_thru(&self, mode: ThruMode) {
        self.thru.store(mode.index() as u8, Ordering::Relaxed);
    }

    pub fn has_output(&self) -> bool {
        self.output.lock().is_some()
    }

    /// Connect the first input port whose name contains `name`.
    /// Returns the full port name.
    pub fn connect_input(&mut self, name: &str, commands: CommandSender) -> Result<String> {
        let midi_in = MidiInput::new(CLIENT_NAME).context("Failed to open MIDI input")?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).is_ok_and(|n| n.contains(name)))
            .with_context(|| format!("MIDI input '{}' not found", name))?;
        let port_name = midi_in
            .port_name(&port)
            .unwrap_or_else(|_| name.to_string());

        let output = self.output.clone();
        let thru = self.thru.clone();
        let connection = midi_in
            .connect(
                &port,
                "quartet-input",
                move |_stamp, bytes, _| {
                    let mode = ThruMode::from_index(thru.load(Ordering::Relaxed) as i32);
                    if thru_passes(mode, bytes) {
                        if let Some(out) = output.lock().as_mut() {
                            let _ = out.send(bytes);
                        }
                    }
                    if let Some(event) = MidiEvent::parse(bytes) {
                        commands.send(Command::Midi(event), CommandSource::Midi);
                    }
                },
                (),
            )
            .map_err(|e| anyhow!("Failed to connect MIDI input '{}': {}", port_name, e))?;

        if let Some(old) = self.input.replace(connection) {
            old.close();
        }
        log::info!("MIDI in: {}", port_name);
        Ok(port_name)
    }

    /// Connect the first output port whose name contains `name`
    pub fn connect_output(&mut self, name: &str) -> Result<String> {
        let midi_out = MidiOutput::new(CLIENT_NAME).context("Failed to open MIDI output")?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|p| midi_out.port_name(p).is_ok_and(|n| n.contains(name)))
            .with_context(|| format!("MIDI output '{}' not found", name))?;
        let port_name = midi_out
            .port_name(&port)
            .unwrap_or_else(|_| name.to_string());

        let connection = midi_out
            .connect(&port, "quartet-output")
            .map_err(|e| anyhow!("Failed to connect MIDI output '{}': {}", port_name, e))?;
        if let Some(old) = self.output.lock().replace(connection) {
            old.close();
        }
        log::info!("MIDI out: {}", port_name);
        Ok(port_name)
    }

    /// Send one message. Returns false when no output is connected or the
    /// port refused it.
    pub fn send(&self, msg: MidiMessage) -> bool {
        match self.output.lock().as_mut() {
            Some(out) => match out.send(&msg.to_bytes()) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("MIDI send failed: {}", e);
                    false
                }
            },
            None => false,
        }
    }
}

impl Drop for MidiBridge {
    fn drop(&mut self) {
        if let Some(input) = self.input.take() {
            input.close();
        }
        if let Some(output) = self.output.lock().take() {
            output.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thru_modes() {
        let note = [0x90, 60, 100];
        let clock = [0xF8];
        assert!(!thru_passes(ThruMode::Off, &clock));
        assert!(thru_passes(ThruMode::Full, &note));
        assert!(thru_passes(ThruMode::Realtime, &clock));
        assert!(thru_passes(ThruMode::Realtime, &[0xFA]));
        assert!(!thru_passes(ThruMode::Realtime, &note));
        assert!(!thru_passes(ThruMode::Realtime, &[]));
    }
}
