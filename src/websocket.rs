//! # Session WebSocket Handler
//!
//! Clients connect to `/ws/{agent}` and exchange audio and results for one session.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the agent name in the path selects the persona; the server
//!    registers a session (or refuses with 503 when full) and sends a `status` notice
//! 2. **Audio Units**: every binary message is one complete recording. A message sent
//!    as several frames is reassembled before it is queued
//! 3. **Results**: JSON text frames (`transcription`, `response`, `audio`, `error`)
//! 4. **Liveness**: protocol pings every heartbeat interval; silent peers and idle
//!    sessions are closed
//!
//! ## Actor Model:
//! Each connection is an independent actor. It does no pipeline work itself: binary
//! frames are queued on a channel consumed by the session's orchestrator task, which
//! sends results back through the actor's address.

use crate::config::SessionConfig;
use crate::error::AppError;
use crate::protocol::WireMessage;
use crate::providers::ProviderSet;
use crate::session::{MessageSink, Session, SessionInput, SessionOrchestrator, SessionRegistry};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Extra room on top of `max_unit_bytes` so oversized units still arrive as a frame
/// we can reject politely instead of a protocol error.
const FRAME_HEADROOM: usize = 64 * 1024;

/// Everything needed to start the pipeline worker once the actor has an address.
struct WorkerSeed {
    session: Session,
    providers: ProviderSet,
    stage_timeout: Duration,
}

/// A binary message whose frames are still arriving.
#[derive(Default)]
struct PartialUnit {
    data: Vec<u8>,
    received: usize,
    /// Text messages are reassembled only to be skipped.
    text: bool,
}

/// WebSocket actor for one voice session.
pub struct SessionSocket {
    session_id: String,
    agent: String,
    registry: Arc<SessionRegistry>,
    seed: Option<WorkerSeed>,
    inputs: Option<mpsc::UnboundedSender<SessionInput>>,
    max_unit_bytes: usize,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    idle_timeout: Duration,
    last_heartbeat: Instant,
    last_unit: Instant,
    partial: Option<PartialUnit>,
}

impl SessionSocket {
    pub fn new(
        session: Session,
        providers: ProviderSet,
        registry: Arc<SessionRegistry>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            agent: session.agent.name.clone(),
            registry,
            seed: Some(WorkerSeed {
                session,
                providers,
                stage_timeout: config.stage_timeout(),
            }),
            inputs: None,
            max_unit_bytes: config.max_unit_bytes,
            heartbeat_interval: config.heartbeat_interval(),
            client_timeout: config.client_timeout(),
            idle_timeout: config.idle_timeout(),
            last_heartbeat: Instant::now(),
            last_unit: Instant::now(),
            partial: None,
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &WireMessage) {
        match message.to_json() {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session_id, "Failed to serialize {} message: {}", message.kind(), err),
        }
    }

    fn start_worker(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(seed) = self.seed.take() else {
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = SessionOrchestrator::new(
            seed.session,
            seed.providers,
            self.registry.clone(),
            ctx.address(),
            seed.stage_timeout,
        );
        tokio::spawn(orchestrator.run(rx));
        self.inputs = Some(tx);
    }

    /// Queue one complete binary message for the pipeline.
    fn handle_audio_unit(&mut self, data: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        if data.is_empty() {
            warn!(session_id = %self.session_id, "Discarding empty audio unit");
            return;
        }

        if data.len() > self.max_unit_bytes {
            let reject = self.oversized(data.len());
            self.queue(reject, ctx);
            return;
        }

        self.last_unit = Instant::now();
        self.registry.touch(&self.session_id);
        debug!(session_id = %self.session_id, bytes = data.len(), "Audio unit queued");
        self.queue(SessionInput::Unit(data), ctx);
    }

    fn oversized(&self, bytes: usize) -> SessionInput {
        SessionInput::Reject(format!(
            "Audio unit too large: {} bytes (limit {})",
            bytes, self.max_unit_bytes
        ))
    }

    /// Collect the frames of a fragmented message. Bytes past `max_unit_bytes` are
    /// counted but not kept.
    fn handle_fragment(&mut self, item: actix_http::ws::Item, ctx: &mut ws::WebsocketContext<Self>) {
        let text = matches!(item, actix_http::ws::Item::FirstText(_));
        let (bytes, last) = match item {
            actix_http::ws::Item::FirstBinary(bytes) | actix_http::ws::Item::FirstText(bytes) => {
                if self.partial.is_some() {
                    warn!(session_id = %self.session_id, "New fragmented message before the last one finished; discarding the old one");
                }
                self.partial = Some(PartialUnit {
                    text,
                    ..PartialUnit::default()
                });
                (bytes, false)
            }
            actix_http::ws::Item::Continue(bytes) => (bytes, false),
            actix_http::ws::Item::Last(bytes) => (bytes, true),
        };

        let max_unit_bytes = self.max_unit_bytes;
        let Some(partial) = self.partial.as_mut() else {
            warn!(session_id = %self.session_id, "Continuation frame without a first frame; ignoring");
            return;
        };

        partial.received += bytes.len();
        if !partial.text && partial.received <= max_unit_bytes {
            partial.data.extend_from_slice(&bytes);
        } else {
            partial.data = Vec::new();
        }

        if !last {
            return;
        }

        let Some(partial) = self.partial.take() else {
            return;
        };
        if partial.text {
            warn!(session_id = %self.session_id, bytes = partial.received, "Ignoring fragmented text message; audio units must be binary");
        } else if partial.received > max_unit_bytes {
            let reject = self.oversized(partial.received);
            self.queue(reject, ctx);
        } else {
            self.handle_audio_unit(partial.data, ctx);
        }
    }

    fn queue(&self, input: SessionInput, ctx: &mut ws::WebsocketContext<Self>) {
        let delivered = self
            .inputs
            .as_ref()
            .map(|tx| tx.send(input).is_ok())
            .unwrap_or(false);

        if !delivered {
            error!(session_id = %self.session_id, "Pipeline worker is gone, closing connection");
            ctx.stop();
        }
    }

    fn check_liveness(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.last_heartbeat.elapsed() > self.client_timeout {
            warn!(session_id = %self.session_id, "WebSocket heartbeat timeout, closing connection");
            ctx.stop();
            return;
        }

        if self.last_unit.elapsed() > self.idle_timeout {
            info!(session_id = %self.session_id, "Session idle, closing connection");
            self.send_message(
                ctx,
                &WireMessage::status(format!(
                    "Session closed after {} seconds without audio",
                    self.idle_timeout.as_secs()
                )),
            );
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Normal,
                description: Some("idle timeout".to_string()),
            }));
            ctx.stop();
            return;
        }

        ctx.ping(b"");
    }
}

/// A result from the orchestrator, to be written to the socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub WireMessage);

impl Actor for SessionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, agent = %self.agent, "WebSocket session started");

        self.start_worker(ctx);
        self.send_message(
            ctx,
            &WireMessage::status(format!("Connected to {}. Ready to assist!", self.agent)),
        );

        ctx.run_interval(self.heartbeat_interval, |act, ctx| act.check_liveness(ctx));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Dropping the sender lets the worker drain and exit.
        self.inputs.take();
        self.registry.remove(&self.session_id);
        info!(session_id = %self.session_id, "WebSocket session stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_audio_unit(data.to_vec(), ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                warn!(session_id = %self.session_id, chars = text.len(), "Ignoring text frame; audio units must be binary");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, "WebSocket closed by client: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(item)) => {
                self.last_heartbeat = Instant::now();
                self.handle_fragment(item, ctx);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Deliver> for SessionSocket {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        self.send_message(ctx, &msg.0);
    }
}

impl MessageSink for Addr<SessionSocket> {
    fn deliver(&self, message: WireMessage) -> bool {
        if !self.connected() {
            return false;
        }
        self.do_send(Deliver(message));
        true
    }

    fn is_closed(&self) -> bool {
        !self.connected()
    }
}

/// WebSocket endpoint handler for `/ws/{agent}`.
///
/// ## HTTP to WebSocket Upgrade:
/// Resolves the agent profile, reserves a session slot, then hands the connection to
/// a [`SessionSocket`] actor. The slot is released again if the handshake fails.
pub async fn session_websocket(
    req: HttpRequest,
    stream: web::Payload,
    agent: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let agent = agent.into_inner();
    info!(agent = %agent, peer = ?req.connection_info().peer_addr(), "New WebSocket connection request");

    let profile = state.agents.load(&agent)?;
    let config = state.get_config();
    let session_id = state.registry.register(&agent)?;

    let session = Session::new(session_id.clone(), profile, config.session.history_capacity);
    let actor = SessionSocket::new(
        session,
        state.providers.clone(),
        state.registry.clone(),
        &config.session,
    );

    ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(config.session.max_unit_bytes + FRAME_HEADROOM)
        .start()
        .map_err(|err| {
            state.registry.remove(&session_id);
            AppError::BadRequest(format!("WebSocket handshake failed: {}", err))
        })
}
