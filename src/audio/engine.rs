use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;

use super::context::{Engine, Status};
use super::{to_f32, SAMPLE_RATE};
use crate::command::CommandReceiver;
use crate::midi::MidiMessage;
use crate::project::PatchData;
use crate::sequencer::SequenceBank;
use crate::settings::Settings;

/// Outgoing MIDI messages waiting for the host to send them
const MIDI_OUT_CAPACITY: usize = 512;

/// Shared state between the audio thread and the host loop
#[derive(Clone)]
pub struct SharedState {
    pub status: Status,
    pub patch: PatchData,
    pub bank: SequenceBank,
    pub settings: Settings,
}

impl SharedState {
    fn capture(engine: &mut Engine) -> Self {
        Self {
            status: engine.status(),
            patch: engine.patch_data(),
            bank: engine.bank().clone(),
            settings: *engine.settings(),
        }
    }

    fn refresh(&mut self, engine: &mut Engine) {
        self.status = engine.status();
        self.patch = engine.patch_data();
        self.bank.clone_from(engine.bank());
        self.settings = *engine.settings();
    }
}

/// Values the host polls often enough that a lock is not worth it
#[derive(Default)]
pub struct Transport {
    pub bpm: AtomicU32,
    pub receiving_clock: AtomicBool,
    /// MIDI messages dropped because the host fell behind
    pub midi_dropped: AtomicU32,
    /// Panel key echoes the engine could not queue
    pub echoes_dropped: AtomicU32,
}

/// Audio output stream running the engine
pub struct AudioEngine {
    _stream: Stream,
    pub state: Arc<RwLock<SharedState>>,
    pub transport: Arc<Transport>,
    pub midi_out: Receiver<MidiMessage>,
}

impl AudioEngine {
    /// Open the default output device and start the engine on it
    pub fn new(command_rx: CommandReceiver, settings: Settings) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("No output device available")?;
        log::info!(
            "Audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let config = Self::pick_config(&device)?;
        let mut engine = Engine::new(settings);
        let state = Arc::new(RwLock::new(SharedState::capture(&mut engine)));
        let transport = Arc::new(Transport::default());
        let (midi_tx, midi_rx) = bounded(MIDI_OUT_CAPACITY);

        let shared = Shared {
            state: state.clone(),
            transport: transport.clone(),
            midi_tx,
        };
        let stream = match config.sample_format() {
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), command_rx, engine, shared)?
            }
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), command_rx, engine, shared)?
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), command_rx, engine, shared)?
            }
            format => anyhow::bail!("Unsupported sample format: {:?}", format),
        };

        stream.play().context("Failed to start audio stream")?;

        Ok(Self {
            _stream: stream,
            state,
            transport,
            midi_out: midi_rx,
        })
    }

    /// The engine's timing assumes 44.1 kHz. Ask for it, and fall back to
    /// the device default (with shifted pitch and tempo) if it is refused.
    fn pick_config(device: &Device) -> Result<SupportedStreamConfig> {
        let wanted = device
            .supported_output_configs()
            .context("Failed to query output configurations")?
            .find(|range| {
                range.min_sample_rate().0 <= SAMPLE_RATE && range.max_sample_rate().0 >= SAMPLE_RATE
            })
            .map(|range| range.with_sample_rate(SampleRate(SAMPLE_RATE)));
        match wanted {
            Some(config) => Ok(config),
            None => {
                let config = device
                    .default_output_config()
                    .context("No default output configuration")?;
                log::warn!(
                    "Device does not offer {} Hz, running at {} Hz; pitch and tempo will be off",
                    SAMPLE_RATE,
                    config.sample_rate().0
                );
                Ok(config)
            }
        }
    }

    /// Build the audio stream for a specific sample format
    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        command_rx: CommandReceiver,
        mut engine: Engine,
        shared: Shared,
    ) -> Result<Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;

        // For periodic state sync, ~60 times per second
        let mut sync_counter = 0usize;
        let sync_interval = (config.sample_rate.0 / 60) as usize;

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                while let Some((cmd, source)) = command_rx.try_recv() {
                    engine.handle_command(cmd, source);
                }

                for frame in data.chunks_mut(channels) {
                    let sample = T::from_sample(to_f32(engine.next_sample()));
                    for out in frame.iter_mut() {
                        *out = sample;
                    }

                    sync_counter += 1;
                    if sync_counter >= sync_interval {
                        sync_counter = 0;
                        shared.publish(&mut engine);
                    }
                }

                engine.drain_midi(|msg| shared.send_midi(msg));
            },
            |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }
}

/// Everything the audio callback writes back to the host
struct Shared {
    state: Arc<RwLock<SharedState>>,
    transport: Arc<Transport>,
    midi_tx: Sender<MidiMessage>,
}

impl Shared {
    fn publish(&self, engine: &mut Engine) {
        let t = &self.transport;
        t.bpm.store(engine.clock().bpm(), Ordering::Relaxed);
        t.receiving_clock
            .store(engine.clock().receiving(), Ordering::Relaxed);
        let lost = engine.take_dropped_echoes();
        if lost > 0 {
            t.echoes_dropped.fetch_add(lost, Ordering::Relaxed);
        }
        // Skip this round rather than wait on a reader
        if let Some(mut state) = self.state.try_write() {
            state.refresh(engine);
        }
    }

    fn send_midi(&self, msg: MidiMessage) {
        if self.midi_tx.try_send(msg).is_err() {
            self.transport.midi_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
