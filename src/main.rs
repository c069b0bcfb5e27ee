use std::sync::Arc;
use std::sync::Mutex;

use tokio::signal;
use tokio::sync::mpsc;
use uuid::Uuid;

use viva_engine::audio::{AudioCapture, PlaybackQueue, PlaybackSink, SilenceSource};
use viva_engine::config::Config;
use viva_engine::engine::{EngineNotice, InterviewEngine};
use viva_engine::error::PlaybackError;
use viva_engine::transport::{FailoverManager, RealtimeTransport, RelayTransport};

/// Stand-in output device: counts rendered bytes. Deployments plug a
/// device-backed sink here.
#[derive(Clone, Default)]
struct NullSink {
    rendered: Arc<Mutex<u64>>,
}

impl PlaybackSink for NullSink {
    fn write_chunk(&mut self, pcm: &[u8]) -> Result<(), PlaybackError> {
        *self.rendered.lock().unwrap() += pcm.len() as u64;
        Ok(())
    }

    fn stop(&mut self) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Config path from argv, defaults otherwise.
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let session_id = Uuid::new_v4();
    println!("Interview session {} starting", session_id);

    // Two transports, primary first; the failover policy owns the choice.
    let primary = RealtimeTransport::new(config.primary.clone(), config.audio, session_id);
    let fallback = RelayTransport::new(config.fallback.clone(), config.audio);
    let transports = FailoverManager::new(Box::new(primary), Box::new(fallback));

    let playback = PlaybackQueue::start(NullSink::default())?;
    let direct_out = Box::new(NullSink::default());

    // Capture on its own thread; frames cross into the engine's context
    // over this channel.
    let (mut capture, frames) = AudioCapture::start(SilenceSource::new(config.audio), 64)?;

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    // Surface degraded-mode and termination notices on stdout.
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            match notice {
                EngineNotice::DegradedMode(kind) => {
                    println!("! Running in degraded mode on {} transport", kind);
                }
                EngineNotice::StateChanged(state) => {
                    log::info!("State: {:?}", state);
                }
                EngineNotice::QuestionAdvanced(index) => {
                    println!("Question {}", index);
                }
                EngineNotice::SessionEnded(reason) => {
                    println!("Session ended: {:?}", reason);
                }
                _ => {}
            }
        }
    });

    let engine = InterviewEngine::new(
        config,
        session_id,
        transports,
        playback,
        direct_out,
        notice_tx,
    );
    let engine_task = tokio::spawn(engine.run(frames, shutdown_rx));

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("Received Ctrl+C, ending session...");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let report = engine_task.await?;
    capture.stop();

    println!(
        "Transcript: {} items across {} question(s), {} follow-up(s), {:.1}s{}",
        report.transcript.len(),
        report.questions_asked,
        report.follow_ups_total,
        report.duration_ms as f64 / 1000.0,
        if report.degraded { " (degraded)" } else { "" },
    );

    Ok(())
}
