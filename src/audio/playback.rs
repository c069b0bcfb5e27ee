//! Ordered, cancellable playback of synthesized speech.
//!
//! The fallback path hands agent speech chunks to this queue in arrival
//! order; a dedicated worker thread (NOT a tokio task, to keep rendering
//! off the orchestration context) writes them back-to-back to a
//! `PlaybackSink`. Barge-in calls `cancel()`, which discards everything
//! queued so far and halts the sink within one chunk boundary.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::PlaybackError;

/// Where decoded agent speech ends up (audio device, test recorder).
pub trait PlaybackSink: Send + 'static {
    fn write_chunk(&mut self, pcm: &[u8]) -> Result<(), PlaybackError>;

    /// Halt whatever is currently being rendered.
    fn stop(&mut self);
}

pub struct PlaybackQueue {
    tx: Option<mpsc::UnboundedSender<(u64, Bytes)>>,
    generation: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    sink: Arc<Mutex<dyn PlaybackSink>>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackQueue {
    pub fn start<S: PlaybackSink>(sink: S) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<(u64, Bytes)>();
        let generation = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let sink: Arc<Mutex<dyn PlaybackSink>> = Arc::new(Mutex::new(sink));

        let handle = {
            let generation = generation.clone();
            let running = running.clone();
            let sink = sink.clone();
            thread::Builder::new()
                .name("playback-queue".into())
                .spawn(move || play_loop(rx, &generation, &running, &sink))?
        };

        Ok(Self {
            tx: Some(tx),
            generation,
            running,
            sink,
            handle: Some(handle),
        })
    }

    /// Append a chunk. Chunks play strictly in enqueue order.
    pub fn enqueue(&self, chunk: Bytes) -> Result<(), PlaybackError> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.tx
            .as_ref()
            .ok_or(PlaybackError::QueueClosed)?
            .send((generation, chunk))
            .map_err(|_| PlaybackError::QueueClosed)
    }

    /// Barge-in: discard every queued chunk and halt the sink.
    ///
    /// Chunks enqueued before this call are skipped by the worker; the
    /// chunk currently being written finishes at its own boundary.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sink) = self.sink.lock() {
            sink.stop();
        }
        log::debug!("Playback queue cancelled");
    }

    /// Stop the worker and wait for it to finish.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.tx.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn play_loop(
    mut rx: mpsc::UnboundedReceiver<(u64, Bytes)>,
    generation: &AtomicU64,
    running: &AtomicBool,
    sink: &Mutex<dyn PlaybackSink>,
) {
    log::info!("Playback queue started");

    while running.load(Ordering::Relaxed) {
        match rx.blocking_recv() {
            Some((chunk_generation, chunk)) => {
                // Chunks stamped before the last cancel are stale.
                if chunk_generation < generation.load(Ordering::SeqCst) {
                    continue;
                }
                let Ok(mut sink) = sink.lock() else { break };
                if let Err(e) = sink.write_chunk(&chunk) {
                    // Skip the affected chunk, keep the queue alive.
                    log::error!("Playback chunk failed, skipping: {}", e);
                }
            }
            None => {
                log::info!("Playback channel closed");
                break;
            }
        }
    }

    log::info!("Playback queue stopped");
}
