//! Transport abstraction for the interview engine.
//!
//! Two structurally different paths, the low-latency realtime connection
//! and the socket-streaming speech relay, implement one capability
//! contract, so the turn-taking engine never branches on transport
//! internals and failover is a substitution.

mod failover;
mod realtime;
mod relay;

pub use failover::FailoverManager;
pub use realtime::RealtimeTransport;
pub use relay::RelayTransport;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio::AudioFrame;
use crate::error::{ConnectError, TransportError};
use crate::session::Speaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Primary,
    Fallback,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Primary => write!(f, "primary"),
            TransportKind::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Degraded,
    Failed,
}

/// Connectivity snapshot driving failover decisions. Not persisted.
#[derive(Debug, Clone, Copy)]
pub struct TransportHealth {
    pub state: ConnState,
    pub last_activity: Instant,
}

impl TransportHealth {
    pub fn new(state: ConnState) -> Self {
        Self {
            state,
            last_activity: Instant::now(),
        }
    }
}

/// Inbound traffic, delivered to the engine in strict arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Incremental transcript text attributed to one party.
    TranscriptDelta { speaker: Speaker, text: String },
    /// The agent began producing a response.
    ResponseStarted,
    /// The agent finished its response.
    ResponseFinished,
    /// Agent speech audio (rendered directly on the primary path, queued
    /// on the fallback path).
    AgentAudio(Bytes),
    /// Mid-session connection loss.
    Dropped(String),
}

/// Capability contract both transports implement.
///
/// `connect` resolves once the transport is open and returns the event
/// receiver; all failures surface as `ConnectError` on that call, never as
/// an unhandled error somewhere downstream; the failover policy must be
/// able to treat them as a normal branch.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, ConnectError>;

    /// Forward one captured frame. A no-op (frame dropped, not buffered)
    /// while microphone forwarding is disabled.
    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<(), TransportError>;

    /// Gate whether captured audio reaches the remote agent, without
    /// tearing down the connection.
    fn set_mic_forwarding(&mut self, enabled: bool);

    fn mic_forwarding(&self) -> bool;

    /// Barge-in: instruct the remote side to stop the in-flight response.
    async fn interrupt_response(&mut self) -> Result<(), TransportError>;

    fn health(&self) -> TransportHealth;

    /// Full teardown: release the connection and stop the reader task.
    async fn disconnect(&mut self);
}
