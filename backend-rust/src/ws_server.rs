//! # ws_server
//!
//! WebSocket fallback transport. Controllers that cannot reach the UDP hub
//! (captive networks, browsers) connect here with sub-protocol `wesquash` and
//! send JSON messages tagged by `"type"`.
//!
//! Per connection:
//!   - `welcome` on open
//!   - `sensor` / `calibrate` forwarded to the pipeline as [`InputEvent`]s
//!   - `ping` answered with `pong` carrying the same timestamp
//!   - server `ping` every 5s; the client's `pong` gives an RTT for the logs
//!
//! Bad JSON is logged and skipped. Only a closed socket ends a connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};
use wesquash_types::messages::DEVICE_PHONE;
use wesquash_types::{WsMessage, WS_SUBPROTOCOL};

use crate::config::WsConfig;
use crate::state::{forward, InputEvent, PeerRef};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ─── Shared state ────────────────────────────────────────────────────────────

#[derive(Clone)]
struct WsState {
    events: mpsc::Sender<InputEvent>,
    next_id: Arc<AtomicU32>,
    live: Arc<AtomicUsize>,
    max_connections: usize,
    ping_interval: Duration,
}

/// Held for the lifetime of one socket; frees the slot on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WsState {
    fn try_acquire(&self) -> Option<ConnectionSlot> {
        let max = self.max_connections;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| ConnectionSlot(self.live.clone()))
    }
}

// ─── Message handling ────────────────────────────────────────────────────────

/// Turn one text frame into pipeline events. Returns a reply for the client, if any.
async fn handle_text(peer: PeerRef, text: &str, events: &mpsc::Sender<InputEvent>) -> Option<WsMessage> {
    let msg = match WsMessage::from_json(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("WS server: bad message from {peer}: {e}");
            return None;
        }
    };

    let event = match msg {
        WsMessage::Sensor(sensor) => {
            if sensor.device != DEVICE_PHONE {
                warn!("WS server: unsupported device {:?} from {peer}", sensor.device);
                return None;
            }
            InputEvent::Sample { peer, sample: sensor.to_sample() }
        }
        WsMessage::Calibrate { .. } => {
            info!("WS server: calibration command from {peer}");
            InputEvent::Calibrate { peer }
        }
        WsMessage::Ping { timestamp } => return Some(WsMessage::Pong { timestamp }),
        WsMessage::Pong { timestamp } => {
            debug!("WS server: {peer} rtt {}ms", now_ms() - timestamp);
            return None;
        }
        WsMessage::Welcome { .. } => {
            debug!("WS server: ignoring welcome from {peer}");
            return None;
        }
    };
    forward(events, event).await;
    None
}

async fn send(socket: &mut WebSocket, msg: &WsMessage) -> bool {
    socket.send(Message::Text(msg.to_json())).await.is_ok()
}

// ─── Connection ──────────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<WsState>,
) -> Response {
    let Some(slot) = state.try_acquire() else {
        warn!("WS server: rejecting {addr}, {} connections live", state.max_connections);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };
    ws.protocols([WS_SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, addr, state, slot))
}

async fn handle_socket(mut socket: WebSocket, addr: SocketAddr, state: WsState, _slot: ConnectionSlot) {
    let peer = PeerRef::ws(state.next_id.fetch_add(1, Ordering::Relaxed));
    info!("🔌 WS controller {peer} connected from {addr}");
    forward(&state.events, InputEvent::PeerJoined { peer, addr }).await;

    let welcome = WsMessage::Welcome { message: format!("connected as {peer}") };
    if send(&mut socket, &welcome).await {
        let start = tokio::time::Instant::now() + state.ping_interval;
        let mut ping = tokio::time::interval_at(start, state.ping_interval);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    if !send(&mut socket, &WsMessage::Ping { timestamp: now_ms() }).await {
                        break;
                    }
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text(peer, &text, &state.events).await {
                            if !send(&mut socket, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => debug!("WS server: binary frame from {peer} ignored"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WS server: {peer} socket error: {e}");
                        break;
                    }
                },
            }
        }
    }

    info!("WS controller {peer} disconnected");
    forward(&state.events, InputEvent::PeerLeft { peer }).await;
}

// ─── Server ──────────────────────────────────────────────────────────────────

pub struct WsServer {
    listener: TcpListener,
    app: Router,
}

impl WsServer {
    pub async fn bind(config: &WsConfig, events: mpsc::Sender<InputEvent>) -> std::io::Result<Self> {
        let state = WsState {
            events,
            next_id: Arc::new(AtomicU32::new(1)),
            live: Arc::new(AtomicUsize::new(0)),
            max_connections: config.max_connections,
            ping_interval: config.ping_interval,
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .layer(cors);

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.ws_port))).await?;
        info!("🌐 WS fallback listening on {}", listener.local_addr()?);
        Ok(Self { listener, app })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) {
        let service = self.app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(self.listener, service).await {
            error!("WS server stopped: {e}");
        }
    }
}
