//! CPAL-based capture backend
//!
//! The stream lives on a dedicated thread because CPAL streams are not
//! `Send`; it is dropped (and the device released) when the shutdown
//! channel fires. Device samples are normalized to interleaved i16 PCM
//! frames; no DSP is applied, the source is forwarded as captured.

use crate::config::CaptureConfig;
use crate::domain::media::{MediaFrame, MediaSource, SourceKind};
use crate::domain::shared::error::CaptureError;
use crate::infrastructure::capture::AudioCapture;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SupportedStreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

// Device names that mirror system output rather than a microphone.
const LOOPBACK_MARKERS: &[&str] = &[
    "monitor",
    "loopback",
    "stereo mix",
    "what u hear",
    "blackhole",
    "soundflower",
    "vb-audio",
    "virtual",
];

fn is_loopback_name(name: &str) -> bool {
    let name = name.to_lowercase();
    LOOPBACK_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Captures system audio through the default CPAL host.
pub struct CpalAudioCapture {
    config: CaptureConfig,
}

impl CpalAudioCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Pick a stream config for the device, preferring the advisory
    /// quality target and falling back to whatever the device offers.
    fn select_config(&self, device: &Device) -> Result<SupportedStreamConfig, CaptureError> {
        if let Ok(configs) = device.supported_input_configs() {
            for config in configs {
                if config.channels() == self.config.channels
                    && config.min_sample_rate().0 <= self.config.sample_rate
                    && config.max_sample_rate().0 >= self.config.sample_rate
                {
                    return Ok(config.with_sample_rate(cpal::SampleRate(self.config.sample_rate)));
                }
            }
        }
        device
            .default_input_config()
            .map_err(|e| CaptureError::NoAudioTrack(e.to_string()))
    }

    async fn open_device(
        &self,
        device: Device,
        kind: SourceKind,
    ) -> Result<MediaSource, CaptureError> {
        let label = device.name().unwrap_or_else(|_| "unknown device".to_string());
        let supported = self.select_config(&device)?;
        if supported.channels() == 0 {
            return Err(CaptureError::NoAudioTrack(format!(
                "device {label} exposes no audio channels"
            )));
        }

        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;

        let (frame_tx, frame_rx) = mpsc::channel(4096);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();

        let thread_label = label.clone();
        std::thread::spawn(move || {
            let build_result = match sample_format {
                SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<i16> = data
                            .iter()
                            .map(|&sample| (sample * i16::MAX as f32) as i16)
                            .collect();
                        let frame = MediaFrame::from_pcm_i16(&samples, sample_rate, channels);
                        if frame_tx.try_send(frame).is_err() {
                            debug!("capture frame dropped, consumer is behind");
                        }
                    },
                    |err| error!(error = %err, "audio capture stream error"),
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let frame = MediaFrame::from_pcm_i16(data, sample_rate, channels);
                        if frame_tx.try_send(frame).is_err() {
                            debug!("capture frame dropped, consumer is behind");
                        }
                    },
                    |err| error!(error = %err, "audio capture stream error"),
                    None,
                ),
                other => {
                    let _ = ready_tx.send(Err(CaptureError::NoAudioTrack(format!(
                        "unsupported sample format {other:?}"
                    ))));
                    return;
                }
            };

            let stream = match build_result {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_build_error(e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::PermissionDenied(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            info!(device = %thread_label, "audio capture started");

            // Hold the stream until the session releases the source.
            let _ = shutdown_rx.blocking_recv();
            drop(stream);
            info!(device = %thread_label, "audio capture stopped");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(MediaSource::new(label, kind, frame_rx, shutdown_tx)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Unsupported(
                "capture thread exited before the stream started".to_string(),
            )),
        }
    }
}

#[async_trait]
impl AudioCapture for CpalAudioCapture {
    async fn capture_system_audio(&self) -> Result<MediaSource, CaptureError> {
        let host = cpal::default_host();

        let devices: Vec<Device> = host
            .input_devices()
            .map_err(|e| CaptureError::Unsupported(e.to_string()))?
            .collect();
        if devices.is_empty() {
            return Err(CaptureError::Unsupported(
                "no audio capture devices available".to_string(),
            ));
        }

        // Primary path: a device mirroring system output.
        let mut loopback_error = None;
        for device in devices {
            let name = device.name().unwrap_or_default();
            if !is_loopback_name(&name) {
                continue;
            }
            match self.open_device(device, SourceKind::SystemLoopback).await {
                Ok(source) => return Ok(source),
                Err(e) => {
                    warn!(device = %name, error = %e, "loopback capture failed, will fall back");
                    loopback_error.get_or_insert(e);
                }
            }
        }

        // Fallback: the default microphone.
        let Some(microphone) = host.default_input_device() else {
            return Err(loopback_error.unwrap_or_else(|| {
                CaptureError::Unsupported("no default input device".to_string())
            }));
        };
        match self.open_device(microphone, SourceKind::Microphone).await {
            Ok(source) => Ok(source),
            // The primary path's failure takes priority in the report.
            Err(mic_error) => Err(loopback_error.unwrap_or(mic_error)),
        }
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> CaptureError {
    match e {
        // A denied OS capture permission usually surfaces as the device
        // having vanished.
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::PermissionDenied("capture device not available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => {
            CaptureError::NoAudioTrack(e.to_string())
        }
        other => CaptureError::PermissionDenied(other.to_string()),
    }
}
