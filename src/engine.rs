//! The turn-taking state machine.
//!
//! One logical actor owns the session, the gate, and the question
//! accounting, and is the only writer. Every external input (capture
//! frames, VAD edges, transport events, timer expiries) arrives as a
//! discrete message processed in strict arrival order inside a single
//! `select!` loop. The session timer arm is polled first (biased) so the
//! hard time limit overrides every other transition.

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::{AudioFrame, PlaybackQueue, PlaybackSink, VadEvent, VoiceActivityDetector};
use crate::collaborators;
use crate::config::Config;
use crate::session::{EndReason, Session, SessionReport, Speaker, TranscriptItem};
use crate::transport::{FailoverManager, TransportEvent, TransportKind};

/// Turn-taking states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for the agent to ask (the interview opens with a question).
    AwaitingQuestion,
    /// The candidate holds the floor.
    ListeningForAnswer,
    /// The gate is open; the agent may respond at any moment.
    ResponsePending,
    /// The agent holds the floor.
    AgentSpeaking,
    /// Terminal.
    SessionComplete,
}

/// The single mutable record the engine revolves around. Reset at the
/// start of every new turn; never shared outside the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateState {
    pub answer_started_at: Option<Instant>,
    pub silence_started_at: Option<Instant>,
    /// Whether the agent may produce a response this turn.
    pub allow_response: bool,
    /// Whether candidate audio is currently reachable by the agent.
    /// Authoritative: frames are not forwarded while this is false.
    pub mic_send_enabled: bool,
    pub agent_speaking: bool,
}

/// Observer stream: state changes, gating decisions, degraded-mode flags,
/// the volume meter. Cosmetic consumers (UI) and tests both attach here.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotice {
    StateChanged(TurnState),
    GateOpened,
    /// A `response.started` arrived before the gate opened and was
    /// discarded.
    ResponseSuppressed,
    BargeIn,
    DegradedMode(TransportKind),
    QuestionAdvanced(u8),
    UtteranceClosed(Speaker),
    VolumeLevel(f32),
    SessionEnded(EndReason),
}

struct PendingUtterance {
    text: String,
    started_at_ms: u64,
}

type EventsRx = mpsc::Receiver<TransportEvent>;

pub struct InterviewEngine {
    config: Config,
    session: Session,
    state: TurnState,
    gate: GateState,
    transports: FailoverManager,
    playback: PlaybackQueue,
    /// Direct render path for primary-path agent audio; the playback
    /// queue is a fallback-path component.
    direct_out: Box<dyn PlaybackSink>,
    vad: VoiceActivityDetector,
    notices: mpsc::UnboundedSender<EngineNotice>,

    started_at: Instant,
    session_deadline: Instant,
    gate_deadline: Option<Instant>,
    /// Gate deadline elapsed during a VAD dip; opening is deferred until
    /// the dip resolves one way or the other.
    gate_open_pending: bool,
    silence_deadline: Option<Instant>,
    /// Whether the VAD has confirmed speech this turn. When the answer was
    /// seeded purely by a transcript token, the gate trusts the timer.
    speech_seen_by_vad: bool,

    pending_candidate: Option<PendingUtterance>,
    pending_agent: Option<PendingUtterance>,
    /// Cleared once the opening question has been asked; the first agent
    /// response is the ask, not a follow-up or boundary.
    awaiting_first_question: bool,
    end_reason: Option<EndReason>,
}

impl InterviewEngine {
    pub fn new(
        config: Config,
        session_id: Uuid,
        transports: FailoverManager,
        playback: PlaybackQueue,
        direct_out: Box<dyn PlaybackSink>,
        notices: mpsc::UnboundedSender<EngineNotice>,
    ) -> Self {
        let started_at = Instant::now();
        let session_deadline = started_at + Duration::from_secs(config.session.max_duration_secs);
        let vad = VoiceActivityDetector::new(config.vad);
        let session = Session::new(session_id, TransportKind::Primary);
        Self {
            config,
            session,
            state: TurnState::AwaitingQuestion,
            gate: GateState::default(),
            transports,
            playback,
            direct_out,
            vad,
            notices,
            started_at,
            session_deadline,
            gate_deadline: None,
            gate_open_pending: false,
            silence_deadline: None,
            speech_seen_by_vad: false,
            pending_candidate: None,
            pending_agent: None,
            awaiting_first_question: true,
            end_reason: None,
        }
    }

    /// Drive the session to completion and return the report.
    ///
    /// `frames` is the capture channel; `shutdown` ends the session on
    /// user action. Both transports, the playback queue, and all timers
    /// are torn down before this returns, whatever the end reason.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<AudioFrame>,
        mut shutdown: mpsc::Receiver<()>,
    ) -> SessionReport {
        let mut events: EventsRx = match self.transports.connect_initial().await {
            Ok(rx) => rx,
            Err(e) => {
                log::error!("No transport available: {}", e);
                self.finalize(EndReason::FatalTransport).await;
                return self.finish();
            }
        };
        let mut shutdown_open = true;

        self.session.active_transport = self.transports.active_kind();
        if self.transports.degraded() {
            self.notify(EngineNotice::DegradedMode(TransportKind::Fallback));
        }
        self.notify(EngineNotice::StateChanged(self.state));
        log::info!(
            "Interview session {} started on {} transport",
            self.session.id,
            self.transports.active_kind()
        );

        while self.state != TurnState::SessionComplete {
            tokio::select! {
                biased;

                // The hard limit overrides everything else.
                _ = tokio::time::sleep_until(self.session_deadline) => {
                    log::info!("Session time limit reached");
                    self.finalize(EndReason::TimeLimit).await;
                }

                maybe_stop = shutdown.recv(), if shutdown_open => {
                    match maybe_stop {
                        Some(()) => {
                            log::info!("Session ended by user");
                            self.finalize(EndReason::Ended).await;
                        }
                        None => shutdown_open = false,
                    }
                }

                _ = sleep_opt(self.gate_deadline), if self.gate_deadline.is_some() => {
                    self.on_gate_deadline();
                }

                _ = sleep_opt(self.silence_deadline), if self.silence_deadline.is_some() => {
                    self.on_silence_deadline();
                }

                maybe_event = events.recv() => {
                    let outcome = match maybe_event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => self.handle_transport_failure("event channel closed").await,
                    };
                    if let Some(rx) = outcome {
                        events = rx;
                    }
                }

                maybe_frame = frames.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            if let Some(rx) = self.handle_frame(frame).await {
                                events = rx;
                            }
                        }
                        None => {
                            log::warn!("Capture channel closed");
                            self.finalize(EndReason::Ended).await;
                        }
                    }
                }
            }
        }

        self.finish()
    }

    /// Build the report and hand it to the summary/scoring collaborators.
    /// Delivery is fire-and-forget: no collaborator failure can reach the
    /// (already terminal) state machine.
    fn finish(self) -> SessionReport {
        let collab_config = self.config.collaborators.clone();
        let report = self.into_report();
        collaborators::deliver_report(&collab_config, report.clone());
        report
    }

    // ======================== Frame path ========================

    /// VAD classification, the deferred gate check, then forwarding;
    /// frames reach the transport only while the mic gate is open.
    async fn handle_frame(&mut self, frame: AudioFrame) -> Option<EventsRx> {
        if let Some(edge) = self.vad.process(&frame) {
            self.handle_vad_event(edge).await;
        }
        self.notify(EngineNotice::VolumeLevel(self.vad.level()));

        if self.gate_open_pending
            && self.state == TurnState::ListeningForAnswer
            && self.vad.is_in_speech()
            && !self.vad.is_dipping()
        {
            self.open_gate();
        }

        if self.gate.mic_send_enabled && self.state != TurnState::SessionComplete {
            if let Err(e) = self.transports.active_mut().send_frame(&frame).await {
                log::warn!("Frame send failed: {}", e);
                return self.handle_transport_failure(&e.to_string()).await;
            }
        }
        None
    }

    async fn handle_vad_event(&mut self, edge: VadEvent) {
        match edge {
            VadEvent::SpeechStarted => match self.state {
                TurnState::ListeningForAnswer | TurnState::ResponsePending => {
                    self.speech_seen_by_vad = true;
                    self.silence_deadline = None;
                    self.gate.silence_started_at = None;
                    if !self.gate.allow_response && self.gate.answer_started_at.is_none() {
                        self.seed_answer_start();
                    }
                }
                TurnState::AgentSpeaking => {
                    self.barge_in().await;
                }
                _ => {}
            },
            VadEvent::SpeechStopped => {
                if matches!(
                    self.state,
                    TurnState::ListeningForAnswer | TurnState::ResponsePending
                ) {
                    // The stop edge trails actual speech end by the VAD
                    // hang window; the silence clock starts back there.
                    let now = Instant::now();
                    self.gate.silence_started_at = Some(now);
                    let remaining = self
                        .config
                        .session
                        .silence_threshold_ms
                        .saturating_sub(self.config.vad.hang_ms);
                    self.silence_deadline = Some(now + Duration::from_millis(remaining));

                    // A real stop breaks answer continuity: the minimum-
                    // answer clock only counts continuous speech, so an
                    // unopened gate re-arms and the next onset re-seeds it.
                    if !self.gate.allow_response {
                        self.gate.answer_started_at = None;
                        self.gate_deadline = None;
                        self.gate_open_pending = false;
                    }
                }
            }
        }
    }

    fn seed_answer_start(&mut self) {
        let now = Instant::now();
        self.gate.answer_started_at = Some(now);
        self.gate_deadline =
            Some(now + Duration::from_millis(self.config.session.min_answer_ms));
        self.gate_open_pending = false;
        log::debug!("Answer started (question {})", self.session.question.index);
    }

    // ======================== Timer expiries ========================

    /// The minimum-answer timer elapsed. Open the gate only if the
    /// candidate is still tracked as speaking; during a dip the decision
    /// is deferred to the frame path.
    fn on_gate_deadline(&mut self) {
        self.gate_deadline = None;
        if self.state != TurnState::ListeningForAnswer || self.gate.answer_started_at.is_none() {
            return;
        }
        if !self.speech_seen_by_vad {
            // Seeded by a transcript token only; trust the timer.
            self.open_gate();
            return;
        }
        // A stop edge would have cancelled this deadline, so the VAD is
        // still tracking speech; a dip defers the decision to the frame
        // path until it resolves.
        if self.vad.is_dipping() {
            self.gate_open_pending = true;
        } else if self.vad.is_in_speech() {
            self.open_gate();
        }
    }

    fn open_gate(&mut self) {
        self.gate.allow_response = true;
        self.gate_open_pending = false;
        self.gate_deadline = None;
        self.set_mic_forwarding(true);
        self.set_state(TurnState::ResponsePending);
        self.notify(EngineNotice::GateOpened);
        log::info!(
            "Gate opened for question {}, agent may respond",
            self.session.question.index
        );
    }

    /// Silence window elapsed: the utterance is closed for transcription.
    /// If the gate never opened, the answer attempt is abandoned and the
    /// next speech onset re-seeds it.
    fn on_silence_deadline(&mut self) {
        self.silence_deadline = None;
        if !matches!(
            self.state,
            TurnState::ListeningForAnswer | TurnState::ResponsePending
        ) {
            return;
        }

        self.close_candidate_utterance();
        self.gate.silence_started_at = None;
        if !self.gate.allow_response {
            self.gate.answer_started_at = None;
            self.gate_deadline = None;
            self.gate_open_pending = false;
            self.speech_seen_by_vad = false;
            log::debug!("Utterance closed before the gate opened; gate re-armed");
        }
    }

    // ======================== Transport events ========================

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Option<EventsRx> {
        match event {
            TransportEvent::TranscriptDelta { speaker, text } => {
                self.on_transcript_delta(speaker, text);
                None
            }
            TransportEvent::ResponseStarted => {
                self.on_response_started();
                None
            }
            TransportEvent::ResponseFinished => {
                self.on_response_finished().await;
                None
            }
            TransportEvent::AgentAudio(chunk) => {
                self.on_agent_audio(chunk);
                None
            }
            TransportEvent::Dropped(reason) => self.handle_transport_failure(&reason).await,
        }
    }

    fn on_transcript_delta(&mut self, speaker: Speaker, text: String) {
        let now_ms = self.now_ms();
        let pending = match speaker {
            Speaker::Candidate => &mut self.pending_candidate,
            Speaker::Agent => &mut self.pending_agent,
        };
        match pending {
            Some(utterance) => utterance.text.push_str(&text),
            None => {
                *pending = Some(PendingUtterance {
                    text,
                    started_at_ms: now_ms,
                });
            }
        }

        // A candidate transcript token can seed the answer clock before
        // the VAD edge arrives.
        if speaker == Speaker::Candidate
            && self.state == TurnState::ListeningForAnswer
            && self.gate.answer_started_at.is_none()
        {
            self.seed_answer_start();
        }
    }

    fn on_response_started(&mut self) {
        match self.state {
            // The interview opens with the agent asking; no gate applies.
            TurnState::AwaitingQuestion => {
                self.gate.agent_speaking = true;
                self.set_state(TurnState::AgentSpeaking);
            }
            TurnState::ResponsePending if self.gate.allow_response => {
                self.gate.agent_speaking = true;
                self.set_state(TurnState::AgentSpeaking);
            }
            TurnState::ListeningForAnswer | TurnState::ResponsePending => {
                // The anti-interruption guarantee: the agent's attempt to
                // speak before the gate opens is discarded.
                self.notify(EngineNotice::ResponseSuppressed);
                log::info!("Suppressed agent response (gate closed)");
            }
            _ => {}
        }
    }

    async fn on_response_finished(&mut self) {
        match self.state {
            TurnState::AwaitingQuestion => {
                // Shouldn't happen (finish without start); tolerate.
                self.awaiting_first_question = false;
                self.session.question.asked_at_ms = self.now_ms();
                self.enter_listening();
            }
            TurnState::AgentSpeaking => {
                let first_question = self.awaiting_first_question;
                let had_marker = self.close_agent_utterance();
                self.gate.agent_speaking = false;

                if first_question {
                    self.awaiting_first_question = false;
                    self.session.question.asked_at_ms = self.now_ms();
                } else if had_marker {
                    let now_ms = self.now_ms();
                    if !self
                        .session
                        .advance_question(now_ms, self.config.session.max_questions)
                    {
                        log::info!("All questions asked; session complete");
                        self.finalize(EndReason::QuestionsExhausted).await;
                        return;
                    }
                    self.notify(EngineNotice::QuestionAdvanced(self.session.question.index));
                    log::info!("Advanced to question {}", self.session.question.index);
                } else {
                    self.session
                        .record_follow_up(self.config.session.max_follow_ups);
                    log::info!(
                        "Follow-up {} on question {}",
                        self.session.question.follow_ups,
                        self.session.question.index
                    );
                }

                self.enter_listening();
            }
            _ => {}
        }
    }

    fn on_agent_audio(&mut self, chunk: bytes::Bytes) {
        // Audio outside AgentSpeaking belongs to a suppressed or stale
        // response and must never become audible.
        if self.state != TurnState::AgentSpeaking {
            return;
        }
        if self.transports.active_kind() == TransportKind::Fallback {
            if let Err(e) = self.playback.enqueue(chunk) {
                log::error!("Playback enqueue failed: {}", e);
            }
        } else if let Err(e) = self.direct_out.write_chunk(&chunk) {
            log::error!("Direct render failed, skipping chunk: {}", e);
        }
    }

    // ======================== Barge-in ========================

    async fn barge_in(&mut self) {
        log::info!("Barge-in: candidate speech during agent response");
        self.notify(EngineNotice::BargeIn);

        // Halt agent audio on whichever path renders it.
        if self.transports.active_kind() == TransportKind::Fallback {
            self.playback.cancel();
        } else {
            self.direct_out.stop();
            if let Err(e) = self.transports.active_mut().interrupt_response().await {
                log::warn!("Interrupt send failed: {}", e);
            }
        }

        // The interrupted response never finished: no follow-up or
        // boundary accounting, but what was said stays on the record.
        self.close_agent_utterance();
        self.gate.agent_speaking = false;

        self.enter_listening();
        // Fresh gate, seeded from this speech onset.
        self.speech_seen_by_vad = true;
        self.seed_answer_start();
    }

    // ======================== Failure path ========================

    async fn handle_transport_failure(&mut self, reason: &str) -> Option<EventsRx> {
        if self.state == TurnState::SessionComplete {
            return None;
        }
        match self.transports.fail_over(reason).await {
            Ok(rx) => {
                // Same GateState, same transcript, same question index;
                // only the pipe changed.
                self.session.active_transport = self.transports.active_kind();
                self.transports
                    .active_mut()
                    .set_mic_forwarding(self.gate.mic_send_enabled);
                self.notify(EngineNotice::DegradedMode(self.transports.active_kind()));
                Some(rx)
            }
            Err(e) => {
                log::error!("Fatal transport error: {}", e);
                self.finalize(EndReason::FatalTransport).await;
                None
            }
        }
    }

    // ======================== Transitions & teardown ========================

    /// Enter `ListeningForAnswer` with the gate fully reset.
    fn enter_listening(&mut self) {
        self.gate = GateState::default();
        self.set_mic_forwarding(false);
        self.gate_deadline = None;
        self.gate_open_pending = false;
        self.silence_deadline = None;
        self.speech_seen_by_vad = false;
        self.set_state(TurnState::ListeningForAnswer);
    }

    fn set_mic_forwarding(&mut self, enabled: bool) {
        self.gate.mic_send_enabled = enabled;
        self.transports.active_mut().set_mic_forwarding(enabled);
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            self.state = state;
            self.notify(EngineNotice::StateChanged(state));
        }
    }

    /// Terminal transition: flush the transcript, cancel every timer,
    /// stop playback, and tear both transports down before returning.
    /// Partial cleanup is a defect, not a degraded state.
    async fn finalize(&mut self, reason: EndReason) {
        if self.state == TurnState::SessionComplete {
            return;
        }
        self.close_candidate_utterance();
        self.close_agent_utterance();
        self.gate_deadline = None;
        self.silence_deadline = None;
        self.gate_open_pending = false;
        self.gate.allow_response = false;
        self.gate.mic_send_enabled = false;

        self.playback.cancel();
        self.direct_out.stop();
        self.transports.shutdown().await;

        self.session.terminal = true;
        self.end_reason = Some(reason.clone());
        self.set_state(TurnState::SessionComplete);
        self.notify(EngineNotice::SessionEnded(reason.clone()));
        log::info!("Session {} complete: {:?}", self.session.id, reason);
    }

    // ======================== Transcript helpers ========================

    fn close_candidate_utterance(&mut self) {
        if let Some(pending) = self.pending_candidate.take() {
            let item = TranscriptItem {
                speaker: Speaker::Candidate,
                text: pending.text,
                started_at_ms: pending.started_at_ms,
                ended_at_ms: self.now_ms(),
                origin: self.transports.active_kind(),
            };
            self.session.push_item(item);
            self.notify(EngineNotice::UtteranceClosed(Speaker::Candidate));
        }
    }

    /// Finalize the agent's utterance; returns whether it carried the
    /// question-boundary marker (which is stripped from the record).
    fn close_agent_utterance(&mut self) -> bool {
        let Some(pending) = self.pending_agent.take() else {
            return false;
        };
        let marker = &self.config.session.question_boundary_marker;
        let had_marker = pending.text.contains(marker.as_str());
        let text = pending.text.replace(marker.as_str(), "");
        let item = TranscriptItem {
            speaker: Speaker::Agent,
            text: text.trim().to_string(),
            started_at_ms: pending.started_at_ms,
            ended_at_ms: self.now_ms(),
            origin: self.transports.active_kind(),
        };
        self.session.push_item(item);
        self.notify(EngineNotice::UtteranceClosed(Speaker::Agent));
        had_marker
    }

    // ======================== Misc ========================

    fn now_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn notify(&self, notice: EngineNotice) {
        let _ = self.notices.send(notice);
    }

    fn into_report(self) -> SessionReport {
        SessionReport {
            session_id: self.session.id,
            started_at: self.session.started_at,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
            end_reason: self.end_reason.unwrap_or(EndReason::Ended),
            questions_asked: self.session.question.index,
            follow_ups_total: self.session.follow_ups_total,
            degraded: self.transports.failovers_used() > 0,
            partial: matches!(self.end_reason, Some(EndReason::FatalTransport)),
            transcript: self.session.transcript,
        }
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
