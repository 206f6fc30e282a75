//! # Voice Client
//!
//! The client half of a voice session: one connection, one recorder and one state
//! machine, owned together by a [`VoiceClient`] and driven by its caller.
//!
//! ## Key Components:
//! - **connection**: WebSocket with fixed-delay reconnect
//! - **dispatch**: classifies incoming frames
//! - **recorder** / **microphone**: one bounded recording per start/stop cycle
//! - **state_machine**: idle / listening / speaking / withholding
//! - **playback**: where reply audio ends up
//! - **log**: the user-facing activity log
//! - **talk**: the interactive `talk` command built on all of the above
//!
//! The caller owns the event loop: it forwards every [`ClientEvent`] to
//! [`VoiceClient::handle_event`] and calls [`VoiceClient::toggle_record`] when the
//! user presses record.

pub mod connection;
pub mod dispatch;
pub mod log;
pub mod microphone;
pub mod playback;
pub mod recorder;
pub mod state_machine;
pub mod talk;

pub use connection::{ClientEvent, ConnectionManager, ConnectionSettings, ConnectionState};
pub use log::{ActivityLog, LogEntry, Severity};
pub use microphone::{FileMicrophone, MemoryMicrophone};
pub use playback::{AudioSink, DirectorySink, NullSink};
pub use recorder::{Microphone, RecordingController};
pub use state_machine::{ClientState, IgnoreReason, SessionStateMachine, ToggleDecision, Transition};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::WireMessage;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything needed to build a client for one agent.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connection: ConnectionSettings,
    pub return_to_idle: Duration,
    pub max_recording_bytes: usize,
}

impl ClientOptions {
    pub fn from_config(config: &ClientConfig, agent: &str) -> Self {
        Self {
            connection: ConnectionSettings {
                url: config.session_url(agent),
                max_reconnect_attempts: config.max_reconnect_attempts,
                reconnect_delay: config.reconnect_delay(),
            },
            return_to_idle: config.return_to_idle(),
            max_recording_bytes: config.max_recording_bytes,
        }
    }
}

/// What a record toggle did.
#[derive(Debug)]
pub enum ToggleOutcome {
    Started,
    Sent { bytes: usize },
    /// The recording stopped but captured nothing; nothing was sent.
    Empty,
    Ignored(IgnoreReason),
    Failed(ClientError),
}

pub struct VoiceClient<M: Microphone, P: AudioSink> {
    connection: ConnectionManager,
    recorder: RecordingController<M>,
    machine: SessionStateMachine,
    log: ActivityLog,
    playback: P,
}

impl<M: Microphone, P: AudioSink> VoiceClient<M, P> {
    pub fn new(
        options: ClientOptions,
        microphone: M,
        playback: P,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (connection, events) = ConnectionManager::new(options.connection);
        let client = Self {
            connection,
            recorder: RecordingController::new(microphone, options.max_recording_bytes),
            machine: SessionStateMachine::new(options.return_to_idle),
            log: ActivityLog::new(),
            playback,
        };
        (client, events)
    }

    pub fn state(&self) -> ClientState {
        self.machine.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn machine(&self) -> &SessionStateMachine {
        &self.machine
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn playback(&self) -> &P {
        &self.playback
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.machine.is_awaiting_reply()
    }

    /// Start connecting and wait up to `timeout` for the socket to open.
    pub async fn connect(&mut self, timeout: Duration) -> ClientResult<()> {
        self.log.info(format!("Connecting to {}", self.connection.url()));
        self.connection.connect();
        self.connection.wait_open(timeout).await
    }

    pub async fn reconnect(&mut self) {
        self.log.info("Reconnecting");
        self.connection.reconnect().await;
    }

    /// Abandon any recording and close the connection.
    pub async fn shutdown(&mut self) {
        self.recorder.cancel();
        self.machine.reset();
        self.connection.disconnect().await;
        self.log.info("Disconnected");
    }

    /// Move captured chunks into the recording buffer. Call periodically while listening.
    pub fn pump_recording(&mut self) -> usize {
        self.recorder.pump()
    }

    /// The user pressed record.
    pub fn toggle_record(&mut self) -> ToggleOutcome {
        let open = self.connection.state() == ConnectionState::Open;

        match self.machine.toggle(open) {
            ToggleDecision::StartRecording => match self.recorder.start() {
                Ok(_) => {
                    self.log.info("Listening...");
                    ToggleOutcome::Started
                }
                Err(err) => {
                    self.machine.permission_denied();
                    self.log.error(err.to_string());
                    ToggleOutcome::Failed(err)
                }
            },
            ToggleDecision::StopAndSend => self.finish_recording(),
            ToggleDecision::Ignored(reason) => {
                let message = match reason {
                    IgnoreReason::NotConnected => "Not connected; recording is unavailable".to_string(),
                    IgnoreReason::Busy(state) => format!("Recording is disabled while {}", state),
                    IgnoreReason::AwaitingReply => "Still waiting for the last reply".to_string(),
                };
                self.log.warn(message);
                ToggleOutcome::Ignored(reason)
            }
        }
    }

    fn finish_recording(&mut self) -> ToggleOutcome {
        let unit = match self.recorder.stop() {
            Ok(Some(unit)) if !unit.is_empty() => unit,
            Ok(_) => {
                self.log.warn("Nothing was recorded");
                return ToggleOutcome::Empty;
            }
            Err(err) => {
                self.log.error(err.to_string());
                return ToggleOutcome::Failed(err);
            }
        };

        let bytes = unit.len();
        match self.connection.send(unit) {
            Ok(()) => {
                self.machine.unit_sent();
                self.log.info(format!("Sent {} bytes of audio", bytes));
                ToggleOutcome::Sent { bytes }
            }
            Err(err) => {
                self.log.warn(format!("Recording discarded: {}", err));
                ToggleOutcome::Failed(err)
            }
        }
    }

    /// Apply one event from the connection.
    pub fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connection(ConnectionState::Open) => {
                self.log.info(format!("Connected to {}", self.connection.url()));
            }
            ClientEvent::Connection(ConnectionState::Closed) => {
                if self.recorder.cancel() {
                    self.log.warn("Recording abandoned: connection closed");
                }
                self.machine.connection_lost();
                self.log.warn("Connection closed");
            }
            ClientEvent::Connection(_) => {}
            ClientEvent::Reconnecting { attempt, delay } => {
                self.log.warn(format!(
                    "Reconnecting in {}ms (attempt {})",
                    delay.as_millis(),
                    attempt
                ));
            }
            ClientEvent::ReconnectExhausted { attempts } => {
                self.log.error(format!(
                    "Disconnected after {} reconnect attempts; reconnect manually",
                    attempts
                ));
            }
            ClientEvent::Message(message) => self.handle_message(message),
            ClientEvent::RawAudio(bytes) => self.play(&bytes),
            ClientEvent::Malformed(reason) => {
                self.log.warn(ClientError::MalformedMessage(reason).to_string());
            }
        }
    }

    fn handle_message(&mut self, message: WireMessage) {
        match message {
            WireMessage::Transcription { text } => self.log.info(format!("You: {}", text)),
            WireMessage::Response { text } => {
                self.abandon_recording("reply arrived");
                self.machine.response_received();
                self.log.info(format!("Agent: {}", text));
            }
            WireMessage::Audio { .. } => match message.decode_audio() {
                Some(Ok(bytes)) => self.play(&bytes),
                _ => {
                    self.machine.audio_received();
                    let err = ClientError::MalformedMessage("audio payload is not base64".to_string());
                    self.log.warn(err.to_string());
                }
            },
            WireMessage::Error { message } => {
                self.abandon_recording("server reported an error");
                self.machine.error_received();
                self.log.error(message);
            }
            WireMessage::Status { message } => self.log.info(message),
        }
    }

    fn abandon_recording(&mut self, why: &str) {
        if self.recorder.cancel() {
            self.log.warn(format!("Recording abandoned: {}", why));
        }
    }

    fn play(&mut self, audio: &[u8]) {
        self.machine.audio_received();
        match self.playback.play(audio) {
            Ok(Some(path)) => self.log.info(format!("Reply audio saved to {}", path.display())),
            Ok(None) => self.log.info(format!("Reply audio received ({} bytes)", audio.len())),
            Err(err) => self.log.error(format!("Could not play reply audio: {}", err)),
        }
    }
}
