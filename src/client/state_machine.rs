//! # Client Session State Machine
//!
//! ```text
//! idle ──toggle (open)──▶ listening ──toggle──▶ idle (unit sent)
//!                            │
//!                            └─permission denied─▶ withholding
//! any ──response──▶ speaking      any ──error──▶ withholding
//! speaking / withholding ──(return delay)──▶ idle
//! ```
//!
//! Speaking and withholding return to idle on their own after a fixed delay. Each of
//! those timers is a task owned by the machine; any newer transition aborts it, and a
//! generation counter stops a timer that already woke from applying a stale return.
//!
//! A new recording cannot start until the reply to the previous unit has finished
//! arriving (its audio or an error), even once the state is back to idle.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Idle,
    Listening,
    Speaking,
    Withholding,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Idle => "idle",
            ClientState::Listening => "listening",
            ClientState::Speaking => "speaking",
            ClientState::Withholding => "withholding",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    ToggleRecord,
    PermissionDenied,
    ResponseReceived,
    ErrorReceived,
    AutoReturn,
    ConnectionLost,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ClientState,
    pub to: ClientState,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotConnected,
    /// Speaking or withholding.
    Busy(ClientState),
    /// The previous unit's reply has not finished arriving.
    AwaitingReply,
}

/// Result of a record toggle. The caller performs the side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleDecision {
    StartRecording,
    StopAndSend,
    Ignored(IgnoreReason),
}

struct Inner {
    state: ClientState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    awaiting_reply: bool,
}

#[derive(Clone)]
pub struct SessionStateMachine {
    inner: Arc<Mutex<Inner>>,
    transitions: broadcast::Sender<Transition>,
    return_delay: Duration,
}

impl SessionStateMachine {
    pub fn new(return_delay: Duration) -> Self {
        let (transitions, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ClientState::Idle,
                generation: 0,
                timer: None,
                awaiting_reply: false,
            })),
            transitions,
            return_delay,
        }
    }

    pub fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.inner.lock().awaiting_reply
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// The user pressed record.
    pub fn toggle(&self, connection_open: bool) -> ToggleDecision {
        let mut inner = self.inner.lock();
        let current = inner.state;
        match current {
            ClientState::Idle if !connection_open => {
                ToggleDecision::Ignored(IgnoreReason::NotConnected)
            }
            ClientState::Idle if inner.awaiting_reply => {
                ToggleDecision::Ignored(IgnoreReason::AwaitingReply)
            }
            ClientState::Idle => {
                self.apply(&mut inner, ClientState::Listening, Trigger::ToggleRecord);
                ToggleDecision::StartRecording
            }
            ClientState::Listening => {
                self.apply(&mut inner, ClientState::Idle, Trigger::ToggleRecord);
                ToggleDecision::StopAndSend
            }
            busy @ (ClientState::Speaking | ClientState::Withholding) => {
                debug!(state = %busy, "Toggle ignored");
                ToggleDecision::Ignored(IgnoreReason::Busy(busy))
            }
        }
    }

    /// The unit from the last toggle went out; hold further recordings until its reply lands.
    pub fn unit_sent(&self) {
        self.inner.lock().awaiting_reply = true;
    }

    /// The microphone could not be opened. Only meaningful while listening.
    pub fn permission_denied(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ClientState::Listening {
            self.apply(&mut inner, ClientState::Withholding, Trigger::PermissionDenied);
        }
    }

    pub fn response_received(&self) {
        let mut inner = self.inner.lock();
        self.apply(&mut inner, ClientState::Speaking, Trigger::ResponseReceived);
    }

    /// Reply audio arrived: the unit's pipeline run is complete.
    pub fn audio_received(&self) {
        self.inner.lock().awaiting_reply = false;
    }

    pub fn error_received(&self) {
        let mut inner = self.inner.lock();
        inner.awaiting_reply = false;
        self.apply(&mut inner, ClientState::Withholding, Trigger::ErrorReceived);
    }

    /// The connection dropped. A recording in progress is abandoned and any reply
    /// still owed by the old session will never arrive.
    pub fn connection_lost(&self) {
        let mut inner = self.inner.lock();
        inner.awaiting_reply = false;
        if inner.state == ClientState::Listening {
            self.apply(&mut inner, ClientState::Idle, Trigger::ConnectionLost);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.awaiting_reply = false;
        if inner.state != ClientState::Idle || inner.timer.is_some() {
            self.apply(&mut inner, ClientState::Idle, Trigger::Reset);
        }
    }

    fn apply(&self, inner: &mut Inner, to: ClientState, trigger: Trigger) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        if matches!(to, ClientState::Speaking | ClientState::Withholding) {
            inner.timer = Some(self.schedule_return(inner.generation, to));
        }

        debug!(from = %from, to = %to, trigger = ?trigger, "Client state transition");
        let _ = self.transitions.send(Transition { from, to, trigger });
    }

    fn schedule_return(&self, generation: u64, armed_in: ClientState) -> JoinHandle<()> {
        let machine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(machine.return_delay).await;
            let mut inner = machine.inner.lock();
            if inner.generation == generation && inner.state == armed_in {
                // Drop our own handle first so `apply` does not abort the running task.
                inner.timer = None;
                machine.apply(&mut inner, ClientState::Idle, Trigger::AutoReturn);
            }
        })
    }
}
