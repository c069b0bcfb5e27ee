//! viva-engine - real-time turn-taking core for duplex voice interviews.
//!
//! Decides who may speak moment to moment: when the remote agent's
//! response may reach the candidate, how a spoken turn is measured and
//! closed, and how the session survives loss of its primary transport.

pub mod audio;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::Config;
pub use engine::{EngineNotice, GateState, InterviewEngine, TurnState};
pub use session::{EndReason, Session, SessionReport, Speaker, TranscriptItem};
