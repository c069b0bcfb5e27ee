//! Runtime configuration.
//!
//! Loaded from a TOML file through the `config` crate. Every section has
//! defaults so the engine can run without a file present (useful in tests
//! and demos).

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub vad: VadConfig,
    pub audio: AudioConfig,
    pub primary: PrimaryConfig,
    pub fallback: FallbackConfig,
    pub collaborators: CollaboratorConfig,
}

/// Turn-taking and session limits.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard session limit; the timer overrides all other transitions.
    pub max_duration_secs: u64,
    /// Interview length in questions.
    pub max_questions: u8,
    /// Follow-ups the agent may ask per question before the next boundary.
    pub max_follow_ups: u8,
    /// Minimum continuous answer time before the agent may respond.
    pub min_answer_ms: u64,
    /// Silence window that closes an utterance for transcription.
    pub silence_threshold_ms: u64,
    /// Marker the agent embeds in its transcript to close a question.
    pub question_boundary_marker: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 1200,
            max_questions: 8,
            max_follow_ups: 2,
            min_answer_ms: 5000,
            silence_threshold_ms: 2000,
            question_boundary_marker: "[NEXT_QUESTION]".to_string(),
        }
    }
}

/// Voice activity detection thresholds.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct VadConfig {
    /// Normalized RMS level at which audio starts counting as speech.
    pub start_threshold: f32,
    /// Lower stop level so the detector does not chatter at the boundary.
    pub stop_threshold: f32,
    /// Dips below the stop threshold shorter than this do not end speech.
    pub hang_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            start_threshold: 0.02,
            stop_threshold: 0.01,
            hang_ms: 300,
        }
    }
}

/// Capture format carried by both wire paths.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Capture frame duration in ms (10-20ms).
    pub frame_duration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_duration_ms: 20,
        }
    }
}

/// Low-latency realtime agent connection.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PrimaryConfig {
    /// Token collaborator endpoint issuing short-lived credentials.
    pub token_url: String,
    pub ws_url: String,
    pub connect_timeout_ms: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            token_url: "https://interview.local/api/realtime/token".to_string(),
            ws_url: "wss://interview.local/realtime".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

/// Socket-streaming speech relay used when the primary path is unavailable.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FallbackConfig {
    pub ws_url: String,
    pub connect_timeout_ms: u64,
    pub language_hint: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://interview.local/speech-relay".to_string(),
            connect_timeout_ms: 8000,
            language_hint: "en".to_string(),
        }
    }
}

/// Post-session collaborators. Fire-and-forget relative to the engine.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub summary_url: String,
    pub scoring_url: String,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            summary_url: "https://interview.local/api/summary".to_string(),
            scoring_url: "https://interview.local/api/scoring".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_gate_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.session.max_duration_secs, 1200);
        assert_eq!(cfg.session.max_questions, 8);
        assert_eq!(cfg.session.max_follow_ups, 2);
        assert_eq!(cfg.session.min_answer_ms, 5000);
        assert_eq!(cfg.session.silence_threshold_ms, 2000);
    }

    #[test]
    fn vad_stop_is_below_start() {
        let vad = VadConfig::default();
        assert!(vad.stop_threshold < vad.start_threshold);
        assert_eq!(vad.hang_ms, 300);
    }
}
