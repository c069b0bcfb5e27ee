//! Fallback transport: socket streaming to the speech relay.
//!
//! Streams raw PCM frames to a remote speech-to-text collaborator and
//! receives incremental transcript text plus synthesized agent speech
//! chunks. One JSON handshake declaring codec, sample rate, and language
//! precedes any audio. Latency on this path is roughly double the primary
//! path's; activating it is always surfaced as degraded mode, never as a
//! silent equal.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio::AudioFrame;
use crate::config::{AudioConfig, FallbackConfig};
use crate::error::{ConnectError, TransportError};
use crate::protocol::{
    EVENT_RESPONSE_FINISHED, EVENT_RESPONSE_STARTED, EVENT_TRANSCRIPT_DELTA, RelayHandshake,
    RelayServerMessage,
};
use crate::transport::{ConnState, Transport, TransportEvent, TransportHealth, TransportKind};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct RelayTransport {
    config: FallbackConfig,
    audio: AudioConfig,
    forwarding: Arc<AtomicBool>,
    health: Arc<StdMutex<TransportHealth>>,
    writer: Option<WsSink>,
    reader_task: Option<JoinHandle<()>>,
}

impl RelayTransport {
    pub fn new(config: FallbackConfig, audio: AudioConfig) -> Self {
        Self {
            config,
            audio,
            forwarding: Arc::new(AtomicBool::new(false)),
            health: Arc::new(StdMutex::new(TransportHealth::new(ConnState::Connecting))),
            writer: None,
            reader_task: None,
        }
    }

    fn set_state(&self, state: ConnState) {
        if let Ok(mut health) = self.health.lock() {
            health.state = state;
            health.last_activity = Instant::now();
        }
    }

    async fn open_channel(&mut self) -> Result<mpsc::Receiver<TransportEvent>, ConnectError> {
        let kind = TransportKind::Fallback;

        log::info!("Connecting to speech relay at {}...", self.config.ws_url);
        let (ws_stream, _) =
            connect_async(self.config.ws_url.as_str())
                .await
                .map_err(|e| ConnectError::Io {
                    kind,
                    source: e.into(),
                })?;

        let (mut write, read) = ws_stream.split();

        // Metadata handshake goes out before the first audio frame.
        let handshake = RelayHandshake::new(self.audio.sample_rate, &self.config.language_hint);
        let handshake_json =
            serde_json::to_string(&handshake).map_err(|e| ConnectError::Handshake {
                kind,
                reason: e.to_string(),
            })?;
        write
            .send(Message::Text(handshake_json.into()))
            .await
            .map_err(|e| ConnectError::Handshake {
                kind,
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(256);
        let health = self.health.clone();
        self.reader_task = Some(tokio::spawn(read_loop(read, tx, health)));
        self.writer = Some(write);

        log::info!("Speech relay transport open");
        Ok(rx)
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, ConnectError> {
        self.set_state(ConnState::Connecting);
        let timeout_ms = self.config.connect_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.open_channel()).await {
            Ok(Ok(rx)) => {
                // The relay path is never a silent equal to the realtime
                // path: health reads degraded while it is the active one.
                self.set_state(ConnState::Degraded);
                Ok(rx)
            }
            Ok(Err(e)) => {
                self.set_state(ConnState::Failed);
                Err(e)
            }
            Err(_) => {
                self.set_state(ConnState::Failed);
                Err(ConnectError::Timeout {
                    kind: TransportKind::Fallback,
                    timeout_ms,
                })
            }
        }
    }

    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<(), TransportError> {
        // Forwarding off stops transmission: frames are dropped, not
        // buffered.
        if !self.forwarding.load(Ordering::Relaxed) {
            return Ok(());
        }
        let writer = self.writer.as_mut().ok_or(TransportError::SendFailed {
            kind: TransportKind::Fallback,
            reason: "not connected".to_string(),
        })?;
        writer
            .send(Message::Binary(frame.to_wire_bytes()))
            .await
            .map_err(|e| TransportError::SendFailed {
                kind: TransportKind::Fallback,
                reason: e.to_string(),
            })
    }

    fn set_mic_forwarding(&mut self, enabled: bool) {
        self.forwarding.store(enabled, Ordering::Relaxed);
    }

    fn mic_forwarding(&self) -> bool {
        self.forwarding.load(Ordering::Relaxed)
    }

    async fn interrupt_response(&mut self) -> Result<(), TransportError> {
        // Barge-in on this path is local: the engine cancels the playback
        // queue. Nothing to tell the relay.
        Ok(())
    }

    fn health(&self) -> TransportHealth {
        self.health
            .lock()
            .map(|h| *h)
            .unwrap_or(TransportHealth::new(ConnState::Failed))
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.send(Message::Close(None)).await;
        }
        self.forwarding.store(false, Ordering::Relaxed);
        self.set_state(ConnState::Failed);
        log::info!("Speech relay transport torn down");
    }
}

async fn read_loop(
    mut read: WsSource,
    tx: mpsc::Sender<TransportEvent>,
    health: Arc<StdMutex<TransportHealth>>,
) {
    let touch = |state: Option<ConnState>| {
        if let Ok(mut h) = health.lock() {
            h.last_activity = Instant::now();
            if let Some(s) = state {
                h.state = s;
            }
        }
    };

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                touch(None);
                match serde_json::from_str::<RelayServerMessage>(&text) {
                    Ok(message) => {
                        if let Some(event) = map_relay_message(message) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("Dropping malformed relay message: {}", e);
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                // Synthesized agent speech, in send order.
                touch(None);
                let event = TransportEvent::AgentAudio(Bytes::from(data.to_vec()));
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                log::warn!("Relay closed connection: {:?}", frame);
                touch(Some(ConnState::Failed));
                let _ = tx
                    .send(TransportEvent::Dropped("relay closed connection".to_string()))
                    .await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                touch(Some(ConnState::Failed));
                let _ = tx.send(TransportEvent::Dropped(e.to_string())).await;
                return;
            }
        }
    }

    touch(Some(ConnState::Failed));
    let _ = tx
        .send(TransportEvent::Dropped("connection closed".to_string()))
        .await;
}

fn map_relay_message(message: RelayServerMessage) -> Option<TransportEvent> {
    match message.msg_type.as_str() {
        EVENT_RESPONSE_STARTED => Some(TransportEvent::ResponseStarted),
        EVENT_RESPONSE_FINISHED => Some(TransportEvent::ResponseFinished),
        EVENT_TRANSCRIPT_DELTA => match (message.speaker, message.text) {
            (Some(speaker), Some(text)) => Some(TransportEvent::TranscriptDelta { speaker, text }),
            _ => {
                log::warn!("Dropping transcript delta without speaker or text");
                None
            }
        },
        other => {
            log::debug!("Unhandled relay message type: {}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Speaker;

    #[test]
    fn maps_relay_delta() {
        let delta: RelayServerMessage = serde_json::from_str(
            r#"{"type":"transcript.delta","speaker":"candidate","text":"so my background is"}"#,
        )
        .unwrap();
        match map_relay_message(delta) {
            Some(TransportEvent::TranscriptDelta { speaker, text }) => {
                assert_eq!(speaker, Speaker::Candidate);
                assert_eq!(text, "so my background is");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn lifecycle_markers_map_to_events() {
        let started: RelayServerMessage =
            serde_json::from_str(r#"{"type":"response.started"}"#).unwrap();
        let finished: RelayServerMessage =
            serde_json::from_str(r#"{"type":"response.finished"}"#).unwrap();
        assert!(matches!(
            map_relay_message(started),
            Some(TransportEvent::ResponseStarted)
        ));
        assert!(matches!(
            map_relay_message(finished),
            Some(TransportEvent::ResponseFinished)
        ));
    }
}
