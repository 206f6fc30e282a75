//! # Session Orchestrator
//!
//! Drives Transcribe → Respond → Synthesize for every audio unit of one session and
//! emits the results in order.
//!
//! ## Ordering Guarantees:
//! - Units are processed strictly one at a time, in arrival order. The worker owns the
//!   receiving end of the session's input channel, so there is nothing to interleave.
//! - Per unit the client sees `transcription`, `response`, `audio`, or a prefix of that
//!   sequence followed by exactly one `error`.
//! - Failed stages are not retried and earlier messages are never retracted.
//!
//! ## History:
//! The user turn is appended as soon as the transcript is emitted. The Responder is
//! given the history as it was *before* that append, together with the new text.

use crate::error::{PipelineStage, StageFailure};
use crate::protocol::WireMessage;
use crate::providers::{with_timeout, ProviderSet};
use crate::session::history::Turn;
use crate::session::registry::{SessionRegistry, UnitReport};
use crate::session::Session;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where the orchestrator delivers its messages.
///
/// Implemented by the WebSocket actor's address in production and by a plain channel
/// in tests and in-process clients.
pub trait MessageSink: Send + 'static {
    /// Deliver one message. Returns `false` if the peer is gone.
    fn deliver(&self, message: WireMessage) -> bool;

    fn is_closed(&self) -> bool;
}

impl MessageSink for mpsc::UnboundedSender<WireMessage> {
    fn deliver(&self, message: WireMessage) -> bool {
        self.send(message).is_ok()
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

/// Work queued for a session, in the order the socket received it.
#[derive(Debug)]
pub enum SessionInput {
    /// One complete audio unit.
    Unit(Vec<u8>),
    /// A unit refused before processing (e.g. too large). Becomes a single `error`.
    Reject(String),
}

pub struct SessionOrchestrator<S: MessageSink> {
    session: Session,
    providers: ProviderSet,
    registry: Arc<SessionRegistry>,
    sink: S,
    stage_timeout: Duration,
}

impl<S: MessageSink> SessionOrchestrator<S> {
    pub fn new(
        session: Session,
        providers: ProviderSet,
        registry: Arc<SessionRegistry>,
        sink: S,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            session,
            providers,
            registry,
            sink,
            stage_timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Process queued inputs until the sender side is dropped.
    ///
    /// Units still queued after the client has gone are skipped; a unit already being
    /// processed always runs to completion or failure.
    pub async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<SessionInput>) {
        info!(session_id = %self.session.id, agent = %self.session.agent.name, "Pipeline worker started");

        while let Some(input) = inputs.recv().await {
            match input {
                SessionInput::Unit(audio) => {
                    if self.sink.is_closed() {
                        debug!(session_id = %self.session.id, bytes = audio.len(), "Client gone, skipping queued unit");
                        continue;
                    }
                    self.process_unit(audio).await;
                }
                SessionInput::Reject(reason) => {
                    warn!(session_id = %self.session.id, "Audio unit rejected: {}", reason);
                    self.emit(WireMessage::error(reason));
                    self.registry
                        .report(&self.session.id, UnitReport::Rejected, self.session.history.len());
                }
            }
        }

        info!(session_id = %self.session.id, "Pipeline worker stopped");
    }

    /// Run the full pipeline for one audio unit.
    pub async fn process_unit(&mut self, audio: Vec<u8>) -> UnitReport {
        let started = Instant::now();
        self.session.touch();
        debug!(session_id = %self.session.id, bytes = audio.len(), "Processing audio unit");

        let report = match self.run_pipeline(&audio).await {
            Ok(()) => {
                info!(
                    session_id = %self.session.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Audio unit completed"
                );
                UnitReport::Completed
            }
            Err(failure) => {
                warn!(
                    session_id = %self.session.id,
                    stage = %failure.stage,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Pipeline stage failed: {}",
                    failure.source
                );
                self.emit(WireMessage::error(failure.to_string()));
                UnitReport::Failed(failure.stage)
            }
        };

        self.registry
            .report(&self.session.id, report, self.session.history.len());
        report
    }

    async fn run_pipeline(&mut self, audio: &[u8]) -> Result<(), StageFailure> {
        let transcript = with_timeout(self.stage_timeout, self.providers.transcriber.transcribe(audio))
            .await
            .map_err(|e| StageFailure::new(PipelineStage::Transcribe, e))?;
        self.emit(WireMessage::transcription(transcript.clone()));

        let reply = if transcript.trim().is_empty() {
            debug!(session_id = %self.session.id, "Empty transcript, using canned reply");
            self.session.agent.empty_input_reply.clone()
        } else {
            let prior = self.session.history.snapshot();
            self.session.history.push(Turn::user(transcript.clone()));

            let reply = with_timeout(
                self.stage_timeout,
                self.providers
                    .responder
                    .respond(&self.session.agent, &prior, &transcript),
            )
            .await
            .map_err(|e| StageFailure::new(PipelineStage::Respond, e))?;

            self.session.history.push(Turn::assistant(reply.clone()));
            reply
        };
        self.emit(WireMessage::response(reply.clone()));

        let speech = with_timeout(
            self.stage_timeout,
            self.providers
                .synthesizer
                .synthesize(&reply, self.session.agent.voice.as_deref()),
        )
        .await
        .map_err(|e| StageFailure::new(PipelineStage::Synthesize, e))?;
        self.emit(WireMessage::audio(&speech));

        Ok(())
    }

    fn emit(&self, message: WireMessage) {
        let kind = message.kind();
        if !self.sink.deliver(message) {
            debug!(session_id = %self.session.id, kind, "Client gone, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentProfile, DEFAULT_EMPTY_INPUT_REPLY};
    use crate::providers::testing::*;
    use crate::providers::{Responder, Synthesizer, Transcriber};
    use crate::session::history::Role;

    fn profile() -> AgentProfile {
        AgentProfile {
            name: "default".to_string(),
            system_prompt: "You are a helpful AI assistant.".to_string(),
            temperature: None,
            voice: None,
            empty_input_reply: DEFAULT_EMPTY_INPUT_REPLY.to_string(),
        }
    }

    struct Harness {
        orchestrator: SessionOrchestrator<mpsc::UnboundedSender<WireMessage>>,
        messages: mpsc::UnboundedReceiver<WireMessage>,
        responder: Arc<EchoResponder>,
        registry: Arc<SessionRegistry>,
    }

    fn harness(
        transcriber: impl Transcriber + 'static,
        responder: EchoResponder,
        synthesizer: impl Synthesizer + 'static,
        capacity: usize,
    ) -> Harness {
        let responder = Arc::new(responder);
        let providers = ProviderSet::new(
            Arc::new(transcriber),
            responder.clone() as Arc<dyn Responder>,
            Arc::new(synthesizer),
        );
        let registry = Arc::new(SessionRegistry::new(8));
        let id = registry.register("default").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = SessionOrchestrator::new(
            Session::new(id, profile(), capacity),
            providers,
            registry.clone(),
            tx,
            Duration::from_secs(5),
        );
        Harness {
            orchestrator,
            messages: rx,
            responder,
            registry,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WireMessage>) -> Vec<WireMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn kinds(messages: &[WireMessage]) -> Vec<&'static str> {
        messages.iter().map(|m| m.kind()).collect()
    }

    #[tokio::test]
    async fn test_sequential_units_yield_ordered_triples() {
        let mut h = harness(
            ScriptedTranscriber::with_script(vec![Ok("one"), Ok("two"), Ok("three")], ""),
            EchoResponder::default(),
            FixedSynthesizer { len: 16, fail: false },
            20,
        );

        for _ in 0..3 {
            let report = h.orchestrator.process_unit(vec![1, 2, 3]).await;
            assert_eq!(report, UnitReport::Completed);
        }

        let messages = drain(&mut h.messages);
        assert_eq!(
            kinds(&messages),
            vec![
                "transcription", "response", "audio",
                "transcription", "response", "audio",
                "transcription", "response", "audio",
            ]
        );
        assert_eq!(messages[3], WireMessage::transcription("two"));
        assert_eq!(messages[4], WireMessage::response("reply to two"));
        assert_eq!(messages[5].decode_audio().unwrap().unwrap().len(), 16);
        assert_eq!(h.orchestrator.session().history.len(), 6);
    }

    #[tokio::test]
    async fn test_responder_sees_history_without_current_turn() {
        let mut h = harness(
            ScriptedTranscriber::with_script(vec![Ok("first"), Ok("second")], ""),
            EchoResponder::default(),
            FixedSynthesizer { len: 4, fail: false },
            20,
        );

        h.orchestrator.process_unit(vec![0]).await;
        h.orchestrator.process_unit(vec![0]).await;

        let seen = h.responder.seen_histories.lock().clone();
        assert!(seen[0].is_empty());
        assert_eq!(
            seen[1],
            vec![Turn::user("first"), Turn::assistant("reply to first")]
        );
    }

    #[tokio::test]
    async fn test_transcriber_failure_emits_single_error_and_session_continues() {
        let mut h = harness(
            ScriptedTranscriber::with_script(vec![Err("decoder crashed")], "again"),
            EchoResponder::default(),
            FixedSynthesizer { len: 4, fail: false },
            20,
        );

        let report = h.orchestrator.process_unit(vec![1]).await;
        assert_eq!(report, UnitReport::Failed(PipelineStage::Transcribe));
        let messages = drain(&mut h.messages);
        assert_eq!(kinds(&messages), vec!["error"]);
        assert!(h.orchestrator.session().history.is_empty());

        assert_eq!(h.orchestrator.process_unit(vec![1]).await, UnitReport::Completed);
        assert_eq!(kinds(&drain(&mut h.messages)), vec!["transcription", "response", "audio"]);
    }

    #[tokio::test]
    async fn test_responder_failure_stops_after_transcription() {
        let mut h = harness(
            ScriptedTranscriber::always("hello"),
            EchoResponder {
                fail: true,
                ..Default::default()
            },
            FixedSynthesizer { len: 4, fail: false },
            20,
        );

        let report = h.orchestrator.process_unit(vec![1]).await;
        assert_eq!(report, UnitReport::Failed(PipelineStage::Respond));

        let messages = drain(&mut h.messages);
        assert_eq!(kinds(&messages), vec!["transcription", "error"]);
        match &messages[1] {
            WireMessage::Error { message } => assert!(message.starts_with("Response generation failed")),
            other => panic!("unexpected {:?}", other),
        }

        let history = h.orchestrator.session().history.snapshot();
        assert_eq!(history, vec![Turn::user("hello")]);
        assert_eq!(h.registry.totals().respond_failures, 1);
    }

    #[tokio::test]
    async fn test_synthesizer_failure_keeps_earlier_messages() {
        let mut h = harness(
            ScriptedTranscriber::always("hello"),
            EchoResponder::default(),
            FixedSynthesizer { len: 4, fail: true },
            20,
        );

        let report = h.orchestrator.process_unit(vec![1]).await;
        assert_eq!(report, UnitReport::Failed(PipelineStage::Synthesize));
        assert_eq!(
            kinds(&drain(&mut h.messages)),
            vec!["transcription", "response", "error"]
        );
        assert_eq!(h.orchestrator.session().history.len(), 2);
    }

    #[tokio::test]
    async fn test_blank_transcript_uses_canned_reply() {
        let mut h = harness(
            ScriptedTranscriber::always("   "),
            EchoResponder::default(),
            FixedSynthesizer { len: 4, fail: false },
            20,
        );

        assert_eq!(h.orchestrator.process_unit(vec![1]).await, UnitReport::Completed);
        let messages = drain(&mut h.messages);
        assert_eq!(kinds(&messages), vec!["transcription", "response", "audio"]);
        assert_eq!(messages[1], WireMessage::response(DEFAULT_EMPTY_INPUT_REPLY));
        assert!(h.responder.seen_histories.lock().is_empty());
        assert!(h.orchestrator.session().history.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_bounded_with_fifo_eviction() {
        let mut h = harness(
            ScriptedTranscriber::with_script(vec![Ok("a"), Ok("b"), Ok("c")], ""),
            EchoResponder::default(),
            FixedSynthesizer { len: 1, fail: false },
            3,
        );

        for _ in 0..3 {
            h.orchestrator.process_unit(vec![1]).await;
        }

        let history = h.orchestrator.session().history.snapshot();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], Turn::assistant("reply to b"));
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].text, "reply to c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stage_times_out() {
        let mut transcriber = ScriptedTranscriber::always("late");
        transcriber.delay = Duration::from_secs(30);
        let mut h = harness(
            transcriber,
            EchoResponder::default(),
            FixedSynthesizer { len: 1, fail: false },
            20,
        );
        h.orchestrator.stage_timeout = Duration::from_secs(1);

        let report = h.orchestrator.process_unit(vec![1]).await;
        assert_eq!(report, UnitReport::Failed(PipelineStage::Transcribe));
        match drain(&mut h.messages).as_slice() {
            [WireMessage::Error { message }] => assert!(message.contains("timed out")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_processes_inputs_fifo_including_rejections() {
        let h = harness(
            ScriptedTranscriber::with_script(vec![Ok("one"), Ok("two")], ""),
            EchoResponder::default(),
            FixedSynthesizer { len: 2, fail: false },
            20,
        );
        let mut messages = h.messages;
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SessionInput::Unit(vec![1])).unwrap();
        tx.send(SessionInput::Reject("Audio unit too large".to_string())).unwrap();
        tx.send(SessionInput::Unit(vec![2])).unwrap();
        drop(tx);

        h.orchestrator.run(rx).await;

        let received = drain(&mut messages);
        assert_eq!(
            kinds(&received),
            vec!["transcription", "response", "audio", "error", "transcription", "response", "audio"]
        );
        assert_eq!(received[4], WireMessage::transcription("two"));
        assert_eq!(h.registry.totals().units_rejected, 1);
    }

    #[tokio::test]
    async fn test_run_skips_queued_units_after_client_leaves() {
        let h = harness(
            ScriptedTranscriber::always("hello"),
            EchoResponder::default(),
            FixedSynthesizer { len: 2, fail: false },
            20,
        );
        drop(h.messages);
        let responder = h.responder.clone();
        let registry = h.registry.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SessionInput::Unit(vec![1])).unwrap();
        tx.send(SessionInput::Unit(vec![2])).unwrap();
        drop(tx);

        h.orchestrator.run(rx).await;

        assert!(responder.seen_histories.lock().is_empty());
        assert_eq!(registry.totals().units_completed, 0);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_history() {
        let mut a = harness(
            ScriptedTranscriber::always("from a"),
            EchoResponder::default(),
            FixedSynthesizer { len: 1, fail: false },
            20,
        );
        let mut b = harness(
            ScriptedTranscriber::always("from b"),
            EchoResponder::default(),
            FixedSynthesizer { len: 1, fail: false },
            20,
        );

        a.orchestrator.process_unit(vec![1]).await;
        b.orchestrator.process_unit(vec![1]).await;
        a.orchestrator.process_unit(vec![1]).await;

        assert_eq!(a.orchestrator.session().history.len(), 4);
        assert_eq!(b.orchestrator.session().history.len(), 2);
        assert!(b
            .orchestrator
            .session()
            .history
            .iter()
            .all(|turn| !turn.text.contains("from a")));
        assert_eq!(kinds(&drain(&mut b.messages)), vec!["transcription", "response", "audio"]);
    }
}
