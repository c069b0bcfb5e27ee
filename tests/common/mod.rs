//! Shared test fixtures: scripted transports, recording sinks, and
//! scenario-driving helpers for the turn-taking engine.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use viva_engine::audio::{AudioFrame, PlaybackSink};
use viva_engine::config::Config;
use viva_engine::error::{ConnectError, PlaybackError, TransportError};
use viva_engine::session::Speaker;
use viva_engine::transport::{
    ConnState, Transport, TransportEvent, TransportHealth, TransportKind,
};

/// Shared view into a `MockTransport`, kept by the test while the engine
/// owns the transport itself.
#[derive(Clone, Default)]
pub struct MockHandle {
    /// Timestamps of frames that actually reached the "remote agent"
    /// (forwarding enabled at send time).
    pub forwarded_frames: Arc<Mutex<Vec<u64>>>,
    pub interrupts: Arc<AtomicU32>,
    pub disconnects: Arc<AtomicU32>,
    pub forwarding: Arc<AtomicBool>,
    event_tx: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl MockHandle {
    /// Inject an inbound event, as if the remote side sent it.
    pub async fn emit(&self, event: TransportEvent) {
        let tx = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .expect("transport not connected");
        tx.send(event).await.expect("engine dropped event channel");
    }

    pub async fn emit_delta(&self, speaker: Speaker, text: &str) {
        self.emit(TransportEvent::TranscriptDelta {
            speaker,
            text: text.to_string(),
        })
        .await;
    }

    pub fn connected(&self) -> bool {
        self.event_tx.lock().unwrap().is_some()
    }

    pub fn forwarded_count(&self) -> usize {
        self.forwarded_frames.lock().unwrap().len()
    }
}

pub struct MockTransport {
    kind: TransportKind,
    connect_ok: bool,
    handle: MockHandle,
}

impl MockTransport {
    pub fn new(kind: TransportKind, connect_ok: bool) -> (Self, MockHandle) {
        let handle = MockHandle::default();
        (
            Self {
                kind,
                connect_ok,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, ConnectError> {
        if !self.connect_ok {
            return Err(ConnectError::Timeout {
                kind: self.kind,
                timeout_ms: 1,
            });
        }
        let (tx, rx) = mpsc::channel(256);
        *self.handle.event_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<(), TransportError> {
        if self.handle.forwarding.load(Ordering::SeqCst) {
            self.handle
                .forwarded_frames
                .lock()
                .unwrap()
                .push(frame.timestamp_ms);
        }
        Ok(())
    }

    fn set_mic_forwarding(&mut self, enabled: bool) {
        self.handle.forwarding.store(enabled, Ordering::SeqCst);
    }

    fn mic_forwarding(&self) -> bool {
        self.handle.forwarding.load(Ordering::SeqCst)
    }

    async fn interrupt_response(&mut self) -> Result<(), TransportError> {
        self.handle.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn health(&self) -> TransportHealth {
        TransportHealth::new(ConnState::Open)
    }

    async fn disconnect(&mut self) {
        self.handle.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.handle.event_tx.lock().unwrap() = None;
        self.handle.forwarding.store(false, Ordering::SeqCst);
    }
}

/// Playback/render sink that records what became audible.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    pub stops: Arc<AtomicU32>,
}

impl RecordingSink {
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for RecordingSink {
    fn write_chunk(&mut self, pcm: &[u8]) -> Result<(), PlaybackError> {
        self.chunks.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test config: production defaults minus the network collaborators.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.collaborators.summary_url = String::new();
    config.collaborators.scoring_url = String::new();
    config
}

/// Constant-amplitude frame well above the VAD start threshold.
pub fn speech_frame(timestamp_ms: u64) -> AudioFrame {
    frame_with_level(0.05, timestamp_ms)
}

/// Near-silent frame below the VAD stop threshold.
pub fn silence_frame(timestamp_ms: u64) -> AudioFrame {
    frame_with_level(0.001, timestamp_ms)
}

pub fn frame_with_level(level: f32, timestamp_ms: u64) -> AudioFrame {
    let amplitude = (level * i16::MAX as f32) as i16;
    AudioFrame {
        samples: vec![amplitude; 320],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms,
        duration_ms: 20,
    }
}

/// Let the engine task drain everything that is currently ready.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Wait (in real time) for a condition driven by a worker thread.
pub fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("condition not reached within 2s");
}

pub fn chunk(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(data)
}

// ======================== Engine harness ========================

use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;
use viva_engine::audio::PlaybackQueue;
use viva_engine::engine::{EngineNotice, InterviewEngine};
use viva_engine::session::SessionReport;
use viva_engine::transport::FailoverManager;

/// A running engine wired to scripted transports and recording sinks,
/// with a simulated capture clock.
pub struct Harness {
    pub session_id: Uuid,
    pub primary: MockHandle,
    pub fallback: MockHandle,
    pub queue_sink: RecordingSink,
    pub direct_sink: RecordingSink,
    pub frames_tx: mpsc::Sender<AudioFrame>,
    pub shutdown_tx: mpsc::Sender<()>,
    pub notices: mpsc::UnboundedReceiver<EngineNotice>,
    pub task: JoinHandle<SessionReport>,
    /// Capture-clock position in ms; frame timestamps and tokio time
    /// advance together.
    pub clock_ms: u64,
}

impl Harness {
    pub async fn start(primary_ok: bool, fallback_ok: bool) -> Self {
        Self::start_with_config(primary_ok, fallback_ok, test_config()).await
    }

    pub async fn start_with_config(primary_ok: bool, fallback_ok: bool, config: Config) -> Self {
        let (primary, primary_handle) = MockTransport::new(TransportKind::Primary, primary_ok);
        let (fallback, fallback_handle) = MockTransport::new(TransportKind::Fallback, fallback_ok);
        let transports = FailoverManager::new(Box::new(primary), Box::new(fallback));

        let queue_sink = RecordingSink::default();
        let playback = PlaybackQueue::start(queue_sink.clone()).expect("playback thread");
        let direct_sink = RecordingSink::default();

        let (notice_tx, notices) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(512);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let session_id = Uuid::new_v4();
        let engine = InterviewEngine::new(
            config,
            session_id,
            transports,
            playback,
            Box::new(direct_sink.clone()),
            notice_tx,
        );
        let task = tokio::spawn(engine.run(frames_rx, shutdown_rx));
        settle().await;

        Self {
            session_id,
            primary: primary_handle,
            fallback: fallback_handle,
            queue_sink,
            direct_sink,
            frames_tx,
            shutdown_tx,
            notices,
            task,
            clock_ms: 0,
        }
    }

    /// The handle of whichever transport is currently connected.
    pub fn active(&self) -> &MockHandle {
        if self.fallback.connected() {
            &self.fallback
        } else {
            &self.primary
        }
    }

    pub async fn feed_speech(&mut self, duration_ms: u64) {
        self.feed(duration_ms, true).await;
    }

    pub async fn feed_silence(&mut self, duration_ms: u64) {
        self.feed(duration_ms, false).await;
    }

    async fn feed(&mut self, duration_ms: u64, speech: bool) {
        let step = 20;
        let mut elapsed = 0;
        while elapsed < duration_ms {
            let frame = if speech {
                speech_frame(self.clock_ms)
            } else {
                silence_frame(self.clock_ms)
            };
            self.frames_tx.send(frame).await.expect("engine gone");
            settle().await;
            tokio::time::advance(Duration::from_millis(step)).await;
            self.clock_ms += step;
            elapsed += step;
        }
        settle().await;
    }

    /// Advance time without producing frames.
    pub async fn idle(&mut self, duration_ms: u64) {
        tokio::time::advance(Duration::from_millis(duration_ms)).await;
        self.clock_ms += duration_ms;
        settle().await;
    }

    /// Script one full agent response on the given transport handle.
    pub async fn agent_response(&self, handle: &MockHandle, text: &str) {
        handle.emit(TransportEvent::ResponseStarted).await;
        handle.emit_delta(Speaker::Agent, text).await;
        handle.emit(TransportEvent::ResponseFinished).await;
        settle().await;
    }

    pub fn drain_notices(&mut self) -> Vec<EngineNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            // The volume meter floods the stream and is cosmetic.
            if !matches!(notice, EngineNotice::VolumeLevel(_)) {
                out.push(notice);
            }
        }
        out
    }

    /// End the session from the user side and collect the report.
    pub async fn end(self) -> SessionReport {
        let _ = self.shutdown_tx.send(()).await;
        self.task.await.expect("engine panicked")
    }

    /// Collect the report from a session that ended on its own.
    pub async fn report(self) -> SessionReport {
        self.task.await.expect("engine panicked")
    }
}
