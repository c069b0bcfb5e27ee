//! Session data: transcript history, question accounting, final report.
//!
//! The `Session` is owned exclusively by the turn-taking engine for its
//! lifetime; nothing else writes it. At session end it is folded into a
//! `SessionReport` for the summary and scoring collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Candidate,
    Agent,
}

/// One finalized utterance. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptItem {
    pub speaker: Speaker,
    pub text: String,
    /// Offsets in ms from session start.
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    /// Which transport produced this item.
    pub origin: TransportKind,
}

/// Current question position. Mutated only by the engine when it sees a
/// question-boundary marker in the agent transcript.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Question {
    pub index: u8,
    pub asked_at_ms: u64,
    pub follow_ups: u8,
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub active_transport: TransportKind,
    pub question: Question,
    pub transcript: Vec<TranscriptItem>,
    pub follow_ups_total: u32,
    pub terminal: bool,
}

impl Session {
    pub fn new(id: Uuid, active_transport: TransportKind) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            active_transport,
            question: Question {
                index: 1,
                asked_at_ms: 0,
                follow_ups: 0,
            },
            transcript: Vec::new(),
            follow_ups_total: 0,
            terminal: false,
        }
    }

    pub fn push_item(&mut self, item: TranscriptItem) {
        self.transcript.push(item);
    }

    /// Count a follow-up against the current question, saturating at the
    /// per-question budget.
    pub fn record_follow_up(&mut self, max_follow_ups: u8) {
        if self.question.follow_ups < max_follow_ups {
            self.question.follow_ups += 1;
            self.follow_ups_total += 1;
        }
    }

    /// Close the current question. Returns `false` when the interview has
    /// run out of questions.
    pub fn advance_question(&mut self, now_ms: u64, max_questions: u8) -> bool {
        if self.question.index >= max_questions {
            return false;
        }
        self.question = Question {
            index: self.question.index + 1,
            asked_at_ms: now_ms,
            follow_ups: 0,
        };
        true
    }
}

/// Why the session reached `SessionComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Hard 1200s limit.
    TimeLimit,
    /// All questions asked and closed.
    QuestionsExhausted,
    /// Explicit end by the user.
    Ended,
    /// Second transport failure; transcript is partial.
    FatalTransport,
}

/// Handed to the summary and scoring collaborators after the session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub end_reason: EndReason,
    pub questions_asked: u8,
    pub follow_ups_total: u32,
    /// True when the session ran (partly) on the fallback transport.
    pub degraded: bool,
    /// True when the transcript is known to be incomplete.
    pub partial: bool,
    pub transcript: Vec<TranscriptItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_ups_saturate_at_budget() {
        let mut session = Session::new(Uuid::new_v4(), TransportKind::Primary);
        session.record_follow_up(2);
        session.record_follow_up(2);
        session.record_follow_up(2);
        assert_eq!(session.question.follow_ups, 2);
        assert_eq!(session.follow_ups_total, 2);
    }

    #[test]
    fn question_advance_resets_follow_ups_and_exhausts() {
        let mut session = Session::new(Uuid::new_v4(), TransportKind::Primary);
        session.record_follow_up(2);

        assert!(session.advance_question(30_000, 8));
        assert_eq!(session.question.index, 2);
        assert_eq!(session.question.follow_ups, 0);
        assert_eq!(session.question.asked_at_ms, 30_000);

        for _ in 3..=8 {
            assert!(session.advance_question(40_000, 8));
        }
        assert_eq!(session.question.index, 8);
        assert!(!session.advance_question(50_000, 8));
        assert_eq!(session.question.index, 8);
    }

    #[test]
    fn transcript_is_append_only_in_order() {
        let mut session = Session::new(Uuid::new_v4(), TransportKind::Fallback);
        session.push_item(TranscriptItem {
            speaker: Speaker::Agent,
            text: "Tell me about yourself.".into(),
            started_at_ms: 100,
            ended_at_ms: 2000,
            origin: TransportKind::Fallback,
        });
        session.push_item(TranscriptItem {
            speaker: Speaker::Candidate,
            text: "I build storage engines.".into(),
            started_at_ms: 2500,
            ended_at_ms: 8000,
            origin: TransportKind::Fallback,
        });
        assert_eq!(session.transcript.len(), 2);
        assert_eq!(session.transcript[0].speaker, Speaker::Agent);
        assert_eq!(session.transcript[1].speaker, Speaker::Candidate);
    }
}
