//! Audio capture pump.
//!
//! Capture runs on a dedicated OS thread (NOT a tokio task) so frame pacing
//! never competes with async network work; frames cross into the
//! orchestration context through an mpsc channel. The underlying device is
//! modeled by the `FrameSource` trait; real deployments plug a
//! device-backed source, tests and demos use the bundled ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;

use crate::audio::frame::AudioFrame;
use crate::config::AudioConfig;
use crate::error::CaptureError;

/// Blocking producer of fixed-duration frames.
///
/// `next_frame` is expected to pace itself at the device's frame cadence
/// (a real source blocks on the hardware read).
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> Result<AudioFrame, CaptureError>;
}

/// The capture device is exclusively owned by one active session.
static DEVICE_IN_USE: AtomicBool = AtomicBool::new(false);

pub struct AudioCapture {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Start pumping frames from `source` into the returned channel.
    ///
    /// Fails with `DeviceBusy` if another capture is already active in
    /// this process.
    pub fn start<S: FrameSource>(
        source: S,
        channel_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<AudioFrame>), CaptureError> {
        if DEVICE_IN_USE.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::DeviceBusy);
        }

        let (tx, rx) = mpsc::channel(channel_capacity);
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || capture_loop(source, tx, &running))
                .map_err(|e| {
                    DEVICE_IN_USE.store(false, Ordering::SeqCst);
                    CaptureError::SourceFailed(e.to_string())
                })?
        };

        log::info!("Audio capture started");
        Ok((
            Self {
                running,
                handle: Some(handle),
            },
            rx,
        ))
    }

    /// Signal the pump to stop and wait for the thread to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            DEVICE_IN_USE.store(false, Ordering::SeqCst);
            log::info!("Audio capture stopped");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(mut source: impl FrameSource, tx: mpsc::Sender<AudioFrame>, running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        match source.next_frame() {
            Ok(frame) => {
                if tx.blocking_send(frame).is_err() {
                    log::warn!("Frame receiver dropped, stopping capture");
                    break;
                }
            }
            Err(e) => {
                log::error!("Capture source error: {}", e);
                break;
            }
        }
    }
}

/// Paced source producing silent frames; stands in for a device in demos.
pub struct SilenceSource {
    config: AudioConfig,
    timestamp_ms: u64,
}

impl SilenceSource {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            timestamp_ms: 0,
        }
    }
}

impl FrameSource for SilenceSource {
    fn next_frame(&mut self) -> Result<AudioFrame, CaptureError> {
        let duration_ms = self.config.frame_duration_ms;
        thread::sleep(std::time::Duration::from_millis(duration_ms));
        let samples_per_frame =
            (self.config.sample_rate as u64 * duration_ms / 1000) as usize * self.config.channels as usize;
        let frame = AudioFrame {
            samples: vec![0i16; samples_per_frame],
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            timestamp_ms: self.timestamp_ms,
            duration_ms,
        };
        self.timestamp_ms += duration_ms;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        produced: u64,
        config: AudioConfig,
    }

    impl FrameSource for CountingSource {
        fn next_frame(&mut self) -> Result<AudioFrame, CaptureError> {
            thread::sleep(std::time::Duration::from_millis(1));
            let ts = self.produced * self.config.frame_duration_ms;
            self.produced += 1;
            Ok(AudioFrame {
                samples: vec![0; 320],
                sample_rate: self.config.sample_rate,
                channels: 1,
                timestamp_ms: ts,
                duration_ms: self.config.frame_duration_ms,
            })
        }
    }

    #[tokio::test]
    async fn pumps_frames_and_enforces_exclusive_device() {
        let cfg = AudioConfig::default();
        let (mut capture, mut rx) = AudioCapture::start(
            CountingSource {
                produced: 0,
                config: cfg,
            },
            16,
        )
        .unwrap();

        // Second concurrent capture must be refused.
        let busy = AudioCapture::start(SilenceSource::new(cfg), 16);
        assert!(matches!(busy, Err(CaptureError::DeviceBusy)));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.timestamp_ms, 0);
        assert_eq!(second.timestamp_ms, cfg.frame_duration_ms);

        capture.stop();

        // Device is released after stop; a new session may capture.
        let (mut again, _rx) = AudioCapture::start(SilenceSource::new(cfg), 16).unwrap();
        again.stop();
    }
}
