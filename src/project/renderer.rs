use std::path::Path;

use anyhow::{Context, Result};

use crate::audio::{to_i16, Engine, SAMPLE_RATE};
use crate::command::{Command, CommandSource};

/// Release time left after the sequencer stops
const TAIL_SECONDS: f32 = 1.0;

/// How long to render
pub enum ExportMode {
    /// Fixed length in seconds
    Duration(f32),
    /// Passes through the current sequence at its own tempo and length
    Loops(u32),
}

/// Result of an export operation
pub struct ExportResult {
    pub duration_secs: f32,
    pub samples: usize,
}

/// Length of one pass through the current sequence
fn sequence_seconds(engine: &Engine) -> f32 {
    let seq = engine.bank().get(engine.sequencer().current());
    let ticks = seq.length as u64 * seq.division_ticks() as u64;
    (ticks * engine.clock().period_us() as u64) as f32 / 1_000_000.0
}

/// Run the engine without a device. The sequencer is stopped for the tail
/// so the last notes can release.
pub fn render(engine: &mut Engine, mode: &ExportMode) -> Vec<i16> {
    let content = match mode {
        ExportMode::Duration(seconds) => seconds.max(0.0),
        ExportMode::Loops(n) => sequence_seconds(engine) * *n as f32,
    };
    let content_samples = (content * SAMPLE_RATE as f32) as usize;
    let tail_samples = (TAIL_SECONDS * SAMPLE_RATE as f32) as usize;

    let mut output = Vec::with_capacity(content_samples + tail_samples);
    for _ in 0..content_samples {
        output.push(to_i16(engine.next_sample()));
    }
    if engine.sequencer().is_running() {
        engine.handle_command(Command::ToggleSequencer, CommandSource::Host);
    }
    if engine.arp().settings.enabled {
        engine.handle_command(Command::SetArpEnabled(false), CommandSource::Host);
    }
    for _ in 0..tail_samples {
        output.push(to_i16(engine.next_sample()));
    }
    // Nothing listens to MIDI offline
    engine.drain_midi(|_| {});
    output
}

/// Render and export audio as a 16-bit mono WAV file
pub fn export_wav(engine: &mut Engine, mode: ExportMode, path: &Path) -> Result<ExportResult> {
    let samples = render(engine, &mode);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;

    for s in &samples {
        writer.write_sample(*s)?;
    }

    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {}", path.display()))?;

    Ok(ExportResult {
        duration_secs: samples.len() as f32 / SAMPLE_RATE as f32,
        samples: samples.len(),
    })
}
