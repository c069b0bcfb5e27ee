//! Transport selection and the one-shot failover switch.
//!
//! The primary path is tried first at session start. A connect failure or
//! a runtime drop triggers exactly one session-state-preserving switch to
//! the other path; session state (gate, transcript, question index) lives
//! in the engine and never moves. A second failure is fatal.

use tokio::sync::mpsc;

use crate::error::{ConnectError, FatalTransportError};
use crate::transport::{Transport, TransportEvent, TransportKind};

pub struct FailoverManager {
    active: Box<dyn Transport>,
    standby: Option<Box<dyn Transport>>,
    failovers_used: u8,
}

impl FailoverManager {
    pub fn new(primary: Box<dyn Transport>, fallback: Box<dyn Transport>) -> Self {
        Self {
            active: primary,
            standby: Some(fallback),
            failovers_used: 0,
        }
    }

    /// Connect at session start: primary first, fallback on its connect
    /// failure. Both failing is fatal.
    pub async fn connect_initial(
        &mut self,
    ) -> Result<mpsc::Receiver<TransportEvent>, FatalTransportError> {
        let primary_err: ConnectError = match self.active.connect().await {
            Ok(rx) => {
                log::info!("Session starting on {} transport", self.active.kind());
                return Ok(rx);
            }
            Err(e) => e,
        };

        log::warn!(
            "Primary connect failed: {}. Activating fallback (degraded mode)...",
            primary_err
        );
        self.active.disconnect().await;

        let mut fallback = self
            .standby
            .take()
            .expect("fallback present before first failover");
        match fallback.connect().await {
            Ok(rx) => {
                self.active = fallback;
                self.failovers_used = 1;
                log::info!("Session starting on {} transport", self.active.kind());
                Ok(rx)
            }
            Err(fallback_err) => Err(FatalTransportError::NoTransportAvailable {
                primary: primary_err,
                fallback: fallback_err,
            }),
        }
    }

    /// One-shot switch after a runtime failure on the active transport.
    pub async fn fail_over(
        &mut self,
        reason: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>, FatalTransportError> {
        // Tear the failed transport down fully either way.
        self.active.disconnect().await;

        if self.failovers_used >= 1 {
            return Err(FatalTransportError::FailoverExhausted(reason.to_string()));
        }
        self.failovers_used = 1;

        let Some(mut next) = self.standby.take() else {
            return Err(FatalTransportError::FailoverExhausted(reason.to_string()));
        };

        log::warn!(
            "{} transport failed ({}). Switching to {} (degraded mode)...",
            self.active.kind(),
            reason,
            next.kind()
        );

        match next.connect().await {
            Ok(rx) => {
                self.active = next;
                log::info!("Failover complete, session continues on {}", self.active.kind());
                Ok(rx)
            }
            Err(e) => Err(FatalTransportError::FailoverExhausted(format!(
                "{} (after: {})",
                e, reason
            ))),
        }
    }

    pub fn active_mut(&mut self) -> &mut dyn Transport {
        self.active.as_mut()
    }

    pub fn active_kind(&self) -> TransportKind {
        self.active.kind()
    }

    /// True once the session runs on the fallback path.
    pub fn degraded(&self) -> bool {
        self.active.kind() == TransportKind::Fallback
    }

    pub fn failovers_used(&self) -> u8 {
        self.failovers_used
    }

    /// Orderly teardown of whatever is still connected.
    pub async fn shutdown(&mut self) {
        self.active.disconnect().await;
        if let Some(mut standby) = self.standby.take() {
            standby.disconnect().await;
        }
    }
}
