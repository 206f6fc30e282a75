//! Microphone implementations.
//!
//! - [`MemoryMicrophone`]: replays a fixed audio unit, split into chunks
//! - [`FileMicrophone`]: replays an audio file from disk
//! - `CpalMicrophone`: a live input device, the default or a named one (`microphone` feature)

use crate::client::recorder::{Capture, CaptureDevice, Microphone};
use crate::error::{ClientError, ClientResult};
use std::path::PathBuf;
use tokio::sync::mpsc;

const REPLAY_CHUNK_BYTES: usize = 4096;

/// Nothing to stop for pre-recorded sources.
struct Replay;

impl CaptureDevice for Replay {
    fn release(self: Box<Self>) {}
}

fn replay(bytes: &[u8]) -> Capture {
    let (tx, rx) = mpsc::unbounded_channel();
    for chunk in bytes.chunks(REPLAY_CHUNK_BYTES) {
        let _ = tx.send(chunk.to_vec());
    }
    Capture {
        chunks: rx,
        pcm: None,
        device: Box::new(Replay),
    }
}

/// Replays the same bytes on every recording.
#[derive(Debug, Clone)]
pub struct MemoryMicrophone {
    audio: Vec<u8>,
    denied: bool,
}

impl MemoryMicrophone {
    pub fn new(audio: Vec<u8>) -> Self {
        Self {
            audio,
            denied: false,
        }
    }

    /// A microphone that always refuses access.
    pub fn denied() -> Self {
        Self {
            audio: Vec::new(),
            denied: true,
        }
    }
}

impl Microphone for MemoryMicrophone {
    fn open(&mut self) -> ClientResult<Capture> {
        if self.denied {
            return Err(ClientError::PermissionDenied(
                "microphone access refused".to_string(),
            ));
        }
        Ok(replay(&self.audio))
    }
}

/// Reads an audio file each time a recording starts.
#[derive(Debug, Clone)]
pub struct FileMicrophone {
    path: PathBuf,
}

impl FileMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Microphone for FileMicrophone {
    fn open(&mut self) -> ClientResult<Capture> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            ClientError::PermissionDenied(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(replay(&bytes))
    }
}

#[cfg(feature = "microphone")]
pub use self::device::CpalMicrophone;

#[cfg(feature = "microphone")]
mod device {
    use super::*;
    use crate::audio::processor::{f32_to_i16, i16_to_le_bytes, PcmSpec};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{info, warn};

    struct LiveStream {
        stream: cpal::Stream,
    }

    impl CaptureDevice for LiveStream {
        fn release(self: Box<Self>) {
            if let Err(err) = self.stream.pause() {
                warn!("Failed to pause input stream: {}", err);
            }
        }
    }

    /// A live input device captured as mono 16-bit PCM. Without a name the host's
    /// default input device is used.
    #[derive(Debug)]
    pub struct CpalMicrophone {
        device_name: Option<String>,
    }

    impl CpalMicrophone {
        pub fn new(device_name: Option<String>) -> Self {
            Self { device_name }
        }

        fn device(&self) -> ClientResult<cpal::Device> {
            let host = cpal::default_host();
            let denied = |msg: String| ClientError::PermissionDenied(msg);

            match &self.device_name {
                Some(name) => host
                    .input_devices()
                    .map_err(|e| denied(format!("failed to list devices: {}", e)))?
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or_else(|| denied(format!("device '{}' not found", name))),
                None => host
                    .default_input_device()
                    .ok_or_else(|| denied("no default input device".to_string())),
            }
        }
    }

    impl Microphone for CpalMicrophone {
        fn open(&mut self) -> ClientResult<Capture> {
            let denied = |msg: String| ClientError::PermissionDenied(msg);
            let device = self.device()?;
            let supported = device
                .default_input_config()
                .map_err(|e| denied(format!("no input config: {}", e)))?;
            if supported.sample_format() != cpal::SampleFormat::F32 {
                return Err(denied(format!(
                    "unsupported sample format {:?}",
                    supported.sample_format()
                )));
            }

            let config: cpal::StreamConfig = supported.into();
            let channels = config.channels as usize;
            let spec = PcmSpec {
                sample_rate: config.sample_rate.0,
                channels: 1,
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // Downmix to mono
                        let mono: Vec<f32> = if channels > 1 {
                            data.chunks(channels)
                                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                                .collect()
                        } else {
                            data.to_vec()
                        };
                        let _ = tx.send(i16_to_le_bytes(&f32_to_i16(&mono)));
                    },
                    |err| warn!("Input stream error: {}", err),
                    None,
                )
                .map_err(|e| denied(format!("failed to open input stream: {}", e)))?;
            stream
                .play()
                .map_err(|e| denied(format!("failed to start input stream: {}", e)))?;

            info!(
                device = %device.name().unwrap_or_else(|_| "unknown".into()),
                sample_rate = spec.sample_rate,
                "Microphone open"
            );

            Ok(Capture {
                chunks: rx,
                pcm: Some(spec),
                device: Box::new(LiveStream { stream }),
            })
        }
    }
}
