//! Clip playback to the system speakers via cpal.

use super::decode::{decode_to_mono, resample_linear};
use super::{PlaybackAdapter, PlaybackCallback, PlaybackOutcome, codes};
use crate::config::AudioConfig;
use crate::error::{MemorizerError, Result};
use crate::schedule::MediaRef;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handles shared with the playback thread of the current clip.
struct ActivePlay {
    stop: Arc<AtomicBool>,
    gain: Arc<AtomicU32>,
}

/// Plays one clip at a time on a dedicated thread.
///
/// The clip is decoded, resampled to the configured output rate and pushed
/// through a mono cpal output stream. Stopping sets a flag; the thread then
/// tears the stream down and drops the completion callback unused.
pub struct CpalPlayback {
    output_device: Option<String>,
    volume: f32,
    duck_volume: f32,
    sample_rate: u32,
    active: Option<ActivePlay>,
}

impl CpalPlayback {
    #[must_use]
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            output_device: config.output_device.clone(),
            volume: config.volume,
            duck_volume: config.duck_volume,
            sample_rate: config.output_sample_rate,
            active: None,
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| MemorizerError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl PlaybackAdapter for CpalPlayback {
    fn validate(&self, media: &MediaRef) -> Result<()> {
        let path = media.as_path();
        if !path.is_file() {
            return Err(MemorizerError::InvalidInput(format!(
                "clip not found: {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn play(&mut self, media: &MediaRef, on_finish: PlaybackCallback) -> Result<()> {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let gain = Arc::new(AtomicU32::new(self.volume.to_bits()));
        let job = PlayJob {
            path: media.as_path().to_path_buf(),
            output_device: self.output_device.clone(),
            sample_rate: self.sample_rate,
            stop: Arc::clone(&stop),
            gain: Arc::clone(&gain),
        };

        std::thread::Builder::new()
            .name("memorizer-playback".to_owned())
            .spawn(move || {
                let stop = Arc::clone(&job.stop);
                let outcome = job.run();
                if stop.load(Ordering::Acquire) {
                    debug!("playback stopped before completion; callback dropped");
                    return;
                }
                on_finish(outcome);
            })
            .map_err(|e| MemorizerError::Audio(format!("failed to spawn playback thread: {e}")))?;

        info!(item = %media, "playback started");
        self.active = Some(ActivePlay { stop, gain });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::Release);
            debug!("playback stop requested");
        }
    }

    fn set_ducked(&mut self, ducked: bool) {
        let level = if ducked { self.duck_volume } else { self.volume };
        if let Some(active) = &self.active {
            active.gain.store(level.to_bits(), Ordering::Relaxed);
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PlayJob {
    path: std::path::PathBuf,
    output_device: Option<String>,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    gain: Arc<AtomicU32>,
}

/// Progress through the decoded clip, shared with the audio callback.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

impl PlayJob {
    fn run(self) -> PlaybackOutcome {
        let (samples, source_rate) = match decode_to_mono(&self.path) {
            Ok(decoded) => decoded,
            Err(e) => return PlaybackOutcome::failed(codes::DECODE, e.to_string()),
        };
        let samples = resample_linear(&samples, source_rate, self.sample_rate);

        let device = match open_device(self.output_device.as_deref()) {
            Ok(device) => device,
            Err(e) => return PlaybackOutcome::failed(codes::DEVICE, e.to_string()),
        };

        match self.stream_to(&device, samples) {
            Ok(()) => PlaybackOutcome::Completed,
            Err(e) => PlaybackOutcome::failed(codes::STREAM, e.to_string()),
        }
    }

    fn stream_to(&self, device: &cpal::Device, samples: Vec<f32>) -> Result<()> {
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples,
            position: 0,
            finished: false,
        }));
        let buffer_clone = Arc::clone(&buffer);
        let gain = Arc::clone(&self.gain);
        let failed = Arc::new(AtomicBool::new(false));
        let failed_clone = Arc::clone(&failed);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    let level = f32::from_bits(gain.load(Ordering::Relaxed));

                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position] * level;
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                    failed_clone.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| MemorizerError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| MemorizerError::Audio(format!("failed to start output stream: {e}")))?;

        loop {
            std::thread::sleep(POLL_INTERVAL);
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            if failed.load(Ordering::Acquire) {
                return Err(MemorizerError::Audio("output stream failed".into()));
            }
            let buf = buffer
                .lock()
                .map_err(|e| MemorizerError::Audio(format!("playback buffer lock poisoned: {e}")))?;
            if buf.finished {
                break;
            }
        }

        drop(stream);
        Ok(())
    }
}

fn open_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    let device = if let Some(name) = name {
        host.output_devices()
            .map_err(|e| MemorizerError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| MemorizerError::Audio(format!("output device '{name}' not found")))?
    } else {
        host.default_output_device()
            .ok_or_else(|| MemorizerError::Audio("no default output device".into()))?
    };

    match device.description() {
        Ok(desc) => debug!("using output device: {}", desc.name()),
        Err(e) => warn!("output device has no description: {e}"),
    }
    Ok(device)
}
