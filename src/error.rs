//! Error taxonomy for the interview engine.
//!
//! The failover policy branches on error kind, so the transport seams carry
//! typed errors rather than `anyhow`. Application-level code (binary,
//! collaborators) still uses `anyhow::Result`.

use crate::transport::TransportKind;

/// A transport never reached open state within its connect timeout.
///
/// First occurrence triggers failover, not session death.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("{kind} transport did not open within {timeout_ms}ms")]
    Timeout { kind: TransportKind, timeout_ms: u64 },

    #[error("token issuance failed: {0}")]
    Token(String),

    #[error("{kind} handshake rejected: {reason}")]
    Handshake { kind: TransportKind, reason: String },

    #[error("{kind} connect failed: {source}")]
    Io {
        kind: TransportKind,
        #[source]
        source: anyhow::Error,
    },
}

/// Runtime failure on an already-open transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Mid-session connection loss. Triggers failover, state preserved.
    #[error("{kind} transport dropped: {reason}")]
    Dropped { kind: TransportKind, reason: String },

    #[error("send on {kind} transport failed: {reason}")]
    SendFailed { kind: TransportKind, reason: String },
}

/// Second failover attempt, or both transports failing at session start.
/// Ends the session immediately with whatever transcript exists.
#[derive(Debug, thiserror::Error)]
pub enum FatalTransportError {
    #[error("both transports failed to connect (primary: {primary}, fallback: {fallback})")]
    NoTransportAvailable {
        primary: ConnectError,
        fallback: ConnectError,
    },

    #[error("transport failed after failover budget was spent: {0}")]
    FailoverExhausted(String),
}

/// A single synthesized-speech chunk could not be rendered.
/// The affected chunk is skipped; the queue continues.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("playback sink rejected chunk: {0}")]
    SinkFailed(String),

    #[error("playback queue is closed")]
    QueueClosed,
}

/// Audio capture failures.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The capture device is exclusively owned; a second concurrent
    /// session may not capture.
    #[error("capture device is already owned by an active session")]
    DeviceBusy,

    #[error("frame source failed: {0}")]
    SourceFailed(String),
}
