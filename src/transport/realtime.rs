//! Primary transport: the low-latency realtime agent connection.
//!
//! Authenticates with a short-lived credential from the token collaborator,
//! then holds one duplex websocket: outbound PCM frames (gated by the
//! microphone-forwarding flag), inbound JSON agent events and binary agent
//! speech. The engine renders this path's audio directly; the playback
//! queue is a fallback-path component.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use crate::audio::AudioFrame;
use crate::collaborators;
use crate::config::{AudioConfig, PrimaryConfig};
use crate::error::{ConnectError, TransportError};
use crate::protocol::{
    AudioParams, EVENT_RESPONSE_FINISHED, EVENT_RESPONSE_STARTED, EVENT_TRANSCRIPT_DELTA,
    RealtimeServerMessage, ResponseInterrupt, SessionInit,
};
use crate::transport::{ConnState, Transport, TransportEvent, TransportHealth, TransportKind};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct RealtimeTransport {
    config: PrimaryConfig,
    audio: AudioConfig,
    session_id: Uuid,
    http: Client,
    forwarding: Arc<AtomicBool>,
    health: Arc<StdMutex<TransportHealth>>,
    writer: Option<WsSink>,
    reader_task: Option<JoinHandle<()>>,
}

impl RealtimeTransport {
    pub fn new(config: PrimaryConfig, audio: AudioConfig, session_id: Uuid) -> Self {
        Self {
            config,
            audio,
            session_id,
            http: Client::new(),
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
        let kind = TransportKind::Primary;

        // Token failure counts as a primary connect failure.
        let token =
            collaborators::fetch_realtime_token(&self.http, &self.config.token_url, self.session_id)
                .await?;

        let url = Url::parse(&self.config.ws_url).map_err(|e| ConnectError::Io {
            kind,
            source: e.into(),
        })?;
        let host = url.host_str().unwrap_or("interview.local");

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.config.ws_url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Authorization", format!("Bearer {}", token))
            .header("Session-Id", self.session_id.to_string())
            .header("Protocol-Version", "1")
            .body(())
            .map_err(|e| ConnectError::Io {
                kind,
                source: e.into(),
            })?;

        log::info!("Connecting to realtime agent at {}...", self.config.ws_url);
        let (ws_stream, _) = connect_async(request).await.map_err(|e| ConnectError::Io {
            kind,
            source: e.into(),
        })?;

        let (mut write, read) = ws_stream.split();

        // Announce audio parameters before any frame.
        let init = SessionInit {
            msg_type: "session.init".to_string(),
            version: 1,
            audio_params: AudioParams {
                format: "pcm_s16le".to_string(),
                sample_rate: self.audio.sample_rate,
                channels: self.audio.channels,
                frame_duration: self.audio.frame_duration_ms,
            },
        };
        let init_json = serde_json::to_string(&init).map_err(|e| ConnectError::Handshake {
            kind,
            reason: e.to_string(),
        })?;
        write
            .send(Message::Text(init_json.into()))
            .await
            .map_err(|e| ConnectError::Handshake {
                kind,
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(256);
        let health = self.health.clone();
        self.reader_task = Some(tokio::spawn(read_loop(read, tx, health)));
        self.writer = Some(write);

        log::info!("Realtime transport open (session {})", self.session_id);
        Ok(rx)
    }
}

#[async_trait]
impl Transport for RealtimeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Primary
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, ConnectError> {
        self.set_state(ConnState::Connecting);
        let timeout_ms = self.config.connect_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.open_channel()).await {
            Ok(Ok(rx)) => {
                self.set_state(ConnState::Open);
                Ok(rx)
            }
            Ok(Err(e)) => {
                self.set_state(ConnState::Failed);
                Err(e)
            }
            Err(_) => {
                self.set_state(ConnState::Failed);
                Err(ConnectError::Timeout {
                    kind: TransportKind::Primary,
                    timeout_ms,
                })
            }
        }
    }

    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<(), TransportError> {
        // Forwarding off: the agent must not hear the candidate. Frames
        // are dropped, never buffered.
        if !self.forwarding.load(Ordering::Relaxed) {
            return Ok(());
        }
        let writer = self.writer.as_mut().ok_or(TransportError::SendFailed {
            kind: TransportKind::Primary,
            reason: "not connected".to_string(),
        })?;
        writer
            .send(Message::Binary(frame.to_wire_bytes()))
            .await
            .map_err(|e| TransportError::SendFailed {
                kind: TransportKind::Primary,
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
        let writer = self.writer.as_mut().ok_or(TransportError::SendFailed {
            kind: TransportKind::Primary,
            reason: "not connected".to_string(),
        })?;
        let interrupt = serde_json::to_string(&ResponseInterrupt::new()).expect("static message");
        writer
            .send(Message::Text(interrupt.into()))
            .await
            .map_err(|e| TransportError::SendFailed {
                kind: TransportKind::Primary,
                reason: e.to_string(),
            })
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
        log::info!("Realtime transport torn down");
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
                match serde_json::from_str::<RealtimeServerMessage>(&text) {
                    Ok(message) => {
                        if let Some(event) = map_server_message(message) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // Drop the single unit, keep the session alive.
                        log::warn!("Dropping malformed realtime message: {}", e);
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                touch(None);
                let event = TransportEvent::AgentAudio(Bytes::from(data.to_vec()));
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                log::warn!("Realtime server closed connection: {:?}", frame);
                touch(Some(ConnState::Failed));
                let _ = tx
                    .send(TransportEvent::Dropped("server closed connection".to_string()))
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

fn map_server_message(message: RealtimeServerMessage) -> Option<TransportEvent> {
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
        "error" => {
            log::warn!(
                "Realtime server error: {}",
                message.message.as_deref().unwrap_or("unspecified")
            );
            None
        }
        other => {
            log::debug!("Unhandled realtime message type: {}", other);
            None
        }
    }
}
