//! # ws_channel
//!
//! Fallback transport: JSON text frames over a WebSocket with sub-protocol
//! `wesquash`.
//!
//! A background task owns the socket; the [`WsChannel`] handle talks to it over
//! channels and reads its state from a `watch`. The task:
//!   1. Connects with a 10s timeout (expiry counts as a failed attempt)
//!   2. Pings every 5s; the echoed pong gives `latency_ms`
//!   3. Forwards every non-ping/pong message to the handle's inbox
//!   4. On an unexpected close, retries with jittered exponential backoff until
//!      `max_attempts`, then parks in `Error`
//!
//! `disconnect()` flips a manual flag that cancels any pending retry. `Error` is
//! terminal until the caller connects again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use wesquash_types::{WsMessage, WS_SUBPROTOCOL};

use crate::backoff::Backoff;
use crate::config::WebSocketConfig;
use crate::connection::{ChannelStatus, ConnectionState, TransportMode};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frames buffered while the socket is busy; beyond this `send` reports false.
const OUTBOUND_QUEUE: usize = 32;
const INBOUND_QUEUE: usize = 64;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug)]
enum Control {
    Connect(String),
    Disconnect,
    Foreground,
}

// ── Handle ────────────────────────────────────────────────────────────────────

pub struct WsChannel {
    control: mpsc::UnboundedSender<Control>,
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<WsMessage>,
    status: watch::Receiver<ChannelStatus>,
    manual: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WsChannel {
    /// Spawn the connection task. Must be called inside a Tokio runtime.
    pub fn spawn(config: &WebSocketConfig) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (status_tx, status_rx) = watch::channel(ChannelStatus::idle(TransportMode::Fallback));
        let manual = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            connect_timeout: config.connect_timeout(),
            ping_interval: config.ping_interval(),
            backoff: config.backoff(),
            control: control_rx,
            outbound: outbound_rx,
            inbound: inbound_tx,
            status: status_tx,
            manual: manual.clone(),
            rng: StdRng::from_entropy(),
        };

        Self {
            control: control_tx,
            outbound: outbound_tx,
            inbound: inbound_rx,
            status: status_rx,
            manual,
            task: tokio::spawn(driver.run()),
        }
    }

    pub fn connect(&self, url: &str) {
        self.manual.store(false, Ordering::Release);
        let _ = self.control.send(Control::Connect(url.to_string()));
    }

    pub fn disconnect(&self) {
        self.manual.store(true, Ordering::Release);
        let _ = self.control.send(Control::Disconnect);
    }

    /// The host regained foreground execution; a silently dropped socket is
    /// reconnected right away.
    pub fn on_foreground(&self) {
        let _ = self.control.send(Control::Foreground);
    }

    /// Queue one message. False unless the channel is open and has room.
    pub fn send(&self, msg: &WsMessage) -> bool {
        if !self.status.borrow().is_open() {
            return false;
        }
        self.outbound.try_send(msg.to_json()).is_ok()
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Drain application messages received since the last call.
    pub fn poll(&mut self) -> Vec<WsMessage> {
        std::iter::from_fn(|| self.inbound.try_recv().ok()).collect()
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Driver task ───────────────────────────────────────────────────────────────

/// Why a connected session ended.
enum SessionEnd {
    Manual,
    Dropped,
    Redirect(String),
    Shutdown,
}

/// What to do after a failed attempt or dropped session.
enum Next {
    Retry,
    Stop,
    Redirect(String),
    Shutdown,
}

struct Driver {
    connect_timeout: Duration,
    ping_interval: Duration,
    backoff: Backoff,
    control: mpsc::UnboundedReceiver<Control>,
    outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<WsMessage>,
    status: watch::Sender<ChannelStatus>,
    manual: Arc<AtomicBool>,
    rng: StdRng,
}

impl Driver {
    fn set_state(&self, state: ConnectionState, attempt: u32) {
        self.status.send_modify(|s| {
            s.state = state;
            s.reconnect_attempt = attempt;
            if state != ConnectionState::Open {
                s.latency_ms = None;
            }
        });
    }

    async fn run(mut self) {
        let mut last_url: Option<String> = None;
        loop {
            // Parked: Idle, Closed or Error. Wait for a reason to connect.
            let url = match self.control.recv().await {
                None => return,
                Some(Control::Connect(url)) => url,
                Some(Control::Foreground) => {
                    let state = self.status.borrow().state;
                    let dropped = matches!(state, ConnectionState::Closed | ConnectionState::Error);
                    match &last_url {
                        Some(url) if dropped && !self.manual.load(Ordering::Acquire) => {
                            info!("WS channel: foregrounded while {state:?}, reconnecting");
                            url.clone()
                        }
                        _ => continue,
                    }
                }
                Some(Control::Disconnect) => {
                    self.set_state(ConnectionState::Closed, 0);
                    continue;
                }
            };
            last_url = Some(url.clone());
            if let Some(redirect) = self.connect_loop(url).await {
                last_url = Some(redirect);
            }
        }
    }

    /// Connect and stay connected until a manual disconnect, shutdown or
    /// exhausted retries. Returns the last URL if a mid-session connect changed it.
    async fn connect_loop(&mut self, mut url: String) -> Option<String> {
        let mut attempt = 0u32;
        let mut redirected = None;
        loop {
            self.set_state(ConnectionState::Connecting, attempt);
            info!("WS channel: connecting to {url} (attempt {})", attempt + 1);

            let next = match self.open(&url).await {
                Ok(Some(socket)) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Open, 0);
                    info!("✅ WS channel open: {url}");
                    let end = self.session(socket).await;
                    // Refuse new frames before dropping the ones queued for the dead socket.
                    self.set_state(ConnectionState::Closed, 0);
                    self.discard_outbound();
                    match end {
                        SessionEnd::Manual => Next::Stop,
                        SessionEnd::Dropped => Next::Retry,
                        SessionEnd::Redirect(u) => Next::Redirect(u),
                        SessionEnd::Shutdown => Next::Shutdown,
                    }
                }
                // Cancelled by a control message while connecting.
                Ok(None) => Next::Stop,
                Err(next) => next,
            };

            match next {
                Next::Stop | Next::Shutdown => {
                    self.set_state(ConnectionState::Closed, 0);
                    return redirected;
                }
                Next::Redirect(u) => {
                    url = u.clone();
                    redirected = Some(u);
                    attempt = 0;
                    continue;
                }
                Next::Retry => {}
            }

            if self.manual.load(Ordering::Acquire) {
                self.set_state(ConnectionState::Closed, 0);
                return redirected;
            }
            if self.backoff.exhausted(attempt) {
                warn!("WS channel: giving up after {attempt} reconnect attempts");
                self.set_state(ConnectionState::Error, attempt);
                return redirected;
            }

            let delay = self.backoff.delay(attempt, &mut self.rng);
            attempt += 1;
            self.set_state(ConnectionState::Closed, attempt);
            info!(
                "WS channel: reconnect {attempt}/{} in {:.1}s",
                self.backoff.max_attempts,
                delay.as_secs_f32()
            );

            match self.wait(delay).await {
                Next::Retry => {}
                Next::Redirect(u) => {
                    url = u.clone();
                    redirected = Some(u);
                    attempt = 0;
                }
                Next::Stop | Next::Shutdown => {
                    self.set_state(ConnectionState::Closed, 0);
                    return redirected;
                }
            }
        }
    }

    /// Sleep out a backoff delay while still honouring control messages.
    async fn wait(&mut self, delay: Duration) -> Next {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Next::Retry,
                ctl = self.control.recv() => match ctl {
                    None => return Next::Shutdown,
                    Some(Control::Disconnect) => return Next::Stop,
                    Some(Control::Connect(url)) => return Next::Redirect(url),
                    // Skip the rest of the delay.
                    Some(Control::Foreground) => return Next::Retry,
                },
            }
        }
    }

    /// One connection attempt. `Ok(None)` means a control message cancelled it.
    async fn open(&mut self, url: &str) -> Result<Option<Socket>, Next> {
        let mut request = match url.into_client_request() {
            Ok(r) => r,
            Err(e) => {
                warn!("WS channel: bad url {url}: {e}");
                return Err(Next::Stop);
            }
        };
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(WS_SUBPROTOCOL));

        let attempt = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request));
        tokio::pin!(attempt);
        loop {
            tokio::select! {
                res = &mut attempt => return match res {
                    Ok(Ok((socket, _))) => {
                        if self.manual.load(Ordering::Acquire) {
                            return Ok(None);
                        }
                        Ok(Some(socket))
                    }
                    Ok(Err(e)) => {
                        warn!("WS channel: connect failed: {e}");
                        Err(Next::Retry)
                    }
                    Err(_) => {
                        warn!("WS channel: connect timed out after {:?}", self.connect_timeout);
                        Err(Next::Retry)
                    }
                },
                ctl = self.control.recv() => match ctl {
                    None => return Err(Next::Shutdown),
                    Some(Control::Disconnect) => return Ok(None),
                    Some(Control::Connect(url)) => return Err(Next::Redirect(url)),
                    Some(Control::Foreground) => {}
                },
            }
        }
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut source) = socket.split();
        let start = tokio::time::Instant::now() + self.ping_interval;
        let mut ping = tokio::time::interval_at(start, self.ping_interval);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let msg = WsMessage::Ping { timestamp: now_ms() }.to_json();
                    if let Err(e) = sink.send(Message::Text(msg)).await {
                        warn!("WS channel: ping failed: {e}");
                        return SessionEnd::Dropped;
                    }
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = self.receive(&text) {
                            if sink.send(Message::Text(reply.to_json())).await.is_err() {
                                return SessionEnd::Dropped;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("WS channel: server closed ({frame:?})");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WS channel: socket error: {e}");
                        return SessionEnd::Dropped;
                    }
                    None => return SessionEnd::Dropped,
                },
                Some(text) = self.outbound.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("WS channel: send failed: {e}");
                        return SessionEnd::Dropped;
                    }
                }
                ctl = self.control.recv() => match ctl {
                    None => return SessionEnd::Shutdown,
                    Some(Control::Disconnect) => {
                        // Best effort; the close handshake is not awaited.
                        let _ = sink.send(Message::Close(None)).await;
                        info!("WS channel disconnected");
                        return SessionEnd::Manual;
                    }
                    Some(Control::Connect(url)) => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Redirect(url);
                    }
                    Some(Control::Foreground) => {}
                },
            }
        }
    }

    /// Frames queued for a finished session are never sent on the next one.
    fn discard_outbound(&mut self) -> usize {
        let mut dropped = 0;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("WS channel: discarded {dropped} unsent frames");
        }
        dropped
    }

    /// Handle one text frame. Returns a reply to send back, if any.
    fn receive(&mut self, text: &str) -> Option<WsMessage> {
        let msg = match WsMessage::from_json(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("WS channel: bad message: {e}");
                return None;
            }
        };
        match msg {
            WsMessage::Pong { timestamp } => {
                let rtt = (now_ms() - timestamp).max(0) as f64;
                self.status.send_modify(|s| s.latency_ms = Some(rtt));
                None
            }
            WsMessage::Ping { timestamp } => Some(WsMessage::Pong { timestamp }),
            other => {
                if let Err(e) = self.inbound.try_send(other) {
                    debug!("WS channel: inbox full, message dropped: {e}");
                }
                None
            }
        }
    }
}
