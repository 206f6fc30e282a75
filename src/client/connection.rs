//! # Connection Manager
//!
//! Owns the client's WebSocket to one session endpoint.
//!
//! ## Lifecycle:
//! - `connect()` starts a supervisor task that opens the socket and keeps it open.
//! - When the socket closes for any reason other than `disconnect()`, the supervisor
//!   waits a fixed delay and tries again, up to `max_reconnect_attempts` times. A
//!   successful open resets the counter.
//! - After the last attempt the manager stays `Closed` until `connect()` or
//!   `reconnect()` is called; both start again with a fresh counter.
//! - `disconnect()` cancels the supervisor, including any pending retry.
//!
//! Incoming frames and lifecycle changes are reported on the event channel returned
//! by [`ConnectionManager::new`].

use crate::client::dispatch::{decode_binary, decode_text, Inbound};
use crate::error::{ClientError, ClientResult};
use crate::protocol::WireMessage;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// Everything the connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connection(ConnectionState),
    /// A retry is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// No retries left; the connection stays closed.
    ReconnectExhausted { attempts: u32 },
    Message(WireMessage),
    RawAudio(Vec<u8>),
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

/// State shared between the manager and its supervisor task.
struct Shared {
    settings: ConnectionSettings,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ClientEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    attempts: AtomicU32,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Connection state changed");
            let _ = self.events.send(ClientEvent::Connection(next));
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// How an open socket ended.
enum Ending {
    /// `disconnect()` was called.
    Local,
    /// Anything else: server close, network error, end of stream.
    Lost(String),
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    supervisor: Option<(CancellationToken, JoinHandle<()>)>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Self {
            shared: Arc::new(Shared {
                settings,
                state,
                events,
                outbound: Mutex::new(None),
                attempts: AtomicU32::new(0),
            }),
            supervisor: None,
        };
        (manager, rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> &str {
        &self.shared.settings.url
    }

    fn supervisor_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Start connecting with a fresh attempt counter. Does nothing if a supervisor is
    /// already running.
    pub fn connect(&mut self) {
        if self.supervisor_running() {
            return;
        }

        self.shared.attempts.store(0, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(self.shared.clone(), cancel.clone()));
        self.supervisor = Some((cancel, handle));
    }

    /// Manual reconnect: drop the current connection, reset the counter, start over.
    pub async fn reconnect(&mut self) {
        self.stop_supervisor().await;
        self.shared.attempts.store(0, Ordering::SeqCst);
        info!(url = %self.shared.settings.url, "Manual reconnect requested");
        self.connect();
    }

    /// Close the connection and cancel any pending retry.
    pub async fn disconnect(&mut self) {
        self.stop_supervisor().await;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn stop_supervisor(&mut self) {
        if let Some((cancel, handle)) = self.supervisor.take() {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!("Connection supervisor ended abnormally: {}", err);
            }
        }
        self.shared.outbound.lock().take();
    }

    /// Send one audio unit as a single binary frame.
    pub fn send(&self, bytes: Vec<u8>) -> ClientResult<()> {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let outbound = self.shared.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.send(bytes).map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Wait until the connection is open, or fail once the supervisor gives up.
    pub async fn wait_open(&self, timeout: Duration) -> ClientResult<()> {
        let mut rx = self.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() == ConnectionState::Open {
                    return Ok(());
                }
                if !self.supervisor_running() {
                    return Err(ClientError::ConnectionLost(format!(
                        "could not connect to {}",
                        self.shared.settings.url
                    )));
                }
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Err(ClientError::ConnectionLost("connection manager dropped".to_string()));
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionLost(format!(
                "timed out connecting to {}",
                self.shared.settings.url
            ))),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.supervisor.take() {
            cancel.cancel();
        }
    }
}

/// Connect, pump, and retry with a fixed delay until cancelled or out of attempts.
async fn supervise(shared: Arc<Shared>, cancel: CancellationToken) {
    let settings = shared.settings.clone();

    loop {
        shared.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(settings.url.as_str()) => result,
        };

        match connected {
            Ok((stream, _)) => {
                shared.attempts.store(0, Ordering::SeqCst);
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                *shared.outbound.lock() = Some(out_tx);
                info!(url = %settings.url, "Connected");
                shared.set_state(ConnectionState::Open);

                let ending = pump(stream, out_rx, &shared, &cancel).await;
                shared.outbound.lock().take();
                shared.set_state(ConnectionState::Closed);

                match ending {
                    Ending::Local => break,
                    Ending::Lost(reason) => warn!(url = %settings.url, "Connection lost: {}", reason),
                }
            }
            Err(err) => {
                warn!(url = %settings.url, "Connection failed: {}", err);
                shared.set_state(ConnectionState::Closed);
            }
        }

        let made = shared.attempts.load(Ordering::SeqCst);
        if made >= settings.max_reconnect_attempts {
            warn!(attempts = made, "Reconnect attempts exhausted");
            shared.emit(ClientEvent::ReconnectExhausted { attempts: made });
            break;
        }

        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        shared.emit(ClientEvent::Reconnecting {
            attempt,
            delay: settings.reconnect_delay,
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn pump(
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: &Shared,
    cancel: &CancellationToken,
) -> Ending {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                })
                .await;
                return Ending::Local;
            }
            unit = outbound.recv() => match unit {
                Some(bytes) => {
                    let len = bytes.len();
                    if let Err(err) = sink.send(Message::binary(bytes)).await {
                        return Ending::Lost(format!("send failed: {}", err));
                    }
                    debug!(bytes = len, "Audio unit sent");
                }
                None => return Ending::Lost("outbound queue closed".to_string()),
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(shared, decode_text(text.as_str())),
                Some(Ok(Message::Binary(bytes))) => dispatch(shared, decode_binary(Vec::from(bytes))),
                Some(Ok(Message::Close(frame))) => {
                    return Ending::Lost(format!("server closed the connection ({:?})", frame));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Ending::Lost(err.to_string()),
                None => return Ending::Lost("stream ended".to_string()),
            },
        }
    }
}

fn dispatch(shared: &Shared, inbound: Inbound) {
    match inbound {
        Inbound::Structured(message) => shared.emit(ClientEvent::Message(message)),
        Inbound::RawAudio(bytes) => shared.emit(ClientEvent::RawAudio(bytes)),
        Inbound::Unparseable(reason) => {
            warn!("Discarding malformed frame: {}", reason);
            shared.emit(ClientEvent::Malformed(reason));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::spawn_server;
    use super::*;
    use std::net::TcpListener;

    /// A local port with nothing listening on it.
    fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("ws://127.0.0.1:{}/ws/default", port)
    }

    fn settings(url: String, max: u32, delay_ms: u64) -> ConnectionSettings {
        ConnectionSettings {
            url,
            max_reconnect_attempts: max,
            reconnect_delay: Duration::from_millis(delay_ms),
        }
    }

    async fn collect_until_exhausted(
        rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    ) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("event channel closed");
            let done = matches!(event, ClientEvent::ReconnectExhausted { .. });
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_send_before_connect_is_not_connected() {
        let (manager, _rx) = ConnectionManager::new(settings(refused_url(), 0, 10));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(manager.send(vec![1, 2, 3]), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_retries_exactly_max_times_then_stops() {
        let (mut manager, mut rx) = ConnectionManager::new(settings(refused_url(), 3, 10));
        manager.connect();

        let events = collect_until_exhausted(&mut rx).await;
        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Reconnecting { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(events.last(), Some(&ClientEvent::ReconnectExhausted { attempts: 3 }));

        // Nothing further is scheduled.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.send(vec![0]).is_err());
        assert!(manager.wait_open(Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_manual_reconnect_resets_counter() {
        let (mut manager, mut rx) = ConnectionManager::new(settings(refused_url(), 2, 10));
        manager.connect();
        collect_until_exhausted(&mut rx).await;
        assert_eq!(manager.attempts(), 2);

        manager.reconnect().await;
        let events = collect_until_exhausted(&mut rx).await;
        let first_retry = events.iter().find_map(|e| match e {
            ClientEvent::Reconnecting { attempt, .. } => Some(*attempt),
            _ => None,
        });
        assert_eq!(first_retry, Some(1));
    }

    #[tokio::test]
    async fn test_connect_after_exhaustion_starts_a_fresh_count() {
        let (mut manager, mut rx) = ConnectionManager::new(settings(refused_url(), 2, 10));
        manager.connect();
        collect_until_exhausted(&mut rx).await;
        assert_eq!(manager.attempts(), 2);

        manager.connect();
        let events = collect_until_exhausted(&mut rx).await;
        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Reconnecting { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(events.last(), Some(&ClientEvent::ReconnectExhausted { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_successful_open_resets_attempt_counter() {
        // Two sessions are accepted and closed by the server, then the port goes dark.
        let url = spawn_server(2, true).await;
        let delay = Duration::from_millis(50);
        let (mut manager, mut rx) = ConnectionManager::new(settings(url, 2, 50));
        manager.connect();

        let lifecycle: Vec<ClientEvent> = collect_until_exhausted(&mut rx)
            .await
            .into_iter()
            .filter(|e| *e != ClientEvent::Connection(ConnectionState::Connecting))
            .collect();

        let open = ClientEvent::Connection(ConnectionState::Open);
        let closed = ClientEvent::Connection(ConnectionState::Closed);
        let retry = |attempt| ClientEvent::Reconnecting { attempt, delay };
        assert_eq!(
            lifecycle,
            vec![
                open.clone(),
                closed.clone(),
                retry(1),
                open,
                closed.clone(),
                retry(1),
                closed.clone(),
                retry(2),
                closed,
                ClientEvent::ReconnectExhausted { attempts: 2 },
            ]
        );
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_retry() {
        let (mut manager, mut rx) = ConnectionManager::new(settings(refused_url(), 5, 60_000));
        manager.connect();

        // Wait for the first retry to be scheduled; its delay is a minute.
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, ClientEvent::Reconnecting { .. }) {
                break;
            }
        }

        tokio::time::timeout(Duration::from_secs(2), manager.disconnect())
            .await
            .expect("disconnect should not wait for the retry delay");
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, ClientEvent::Reconnecting { .. }));
        }
    }
}
