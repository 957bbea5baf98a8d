//! Connection Manager
//!
//! Owns the single WebSocket to the messaging backend and hides drops from
//! the rest of the engine: keepalive ping/pong with a watchdog, reconnect
//! with exponential backoff and jitter, and a bounded outbound queue that
//! is retained across reconnects rather than silently dropped.

use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{KeepaliveConfig, ReconnectConfig, SyncConfig};
use crate::error::EngineError;
use crate::protocol::{ClientEvent, Envelope};

/// Connection lifecycle. Owned by the connection task, published via watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
}

/// Events flowing from the connection task to the engine.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// The connection transitioned to Open.
    Up,
    /// The connection was lost; a reconnect is pending unless shut down.
    Down,
    /// A decoded inbound frame. Keepalive PONGs are consumed before this.
    Inbound(Envelope),
}

/// Handle to the connection task.
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound_tx: mpsc::Sender<Envelope>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Enqueue an outbound event. The queue buffers while the connection
    /// is down and is drained in order once it is open again; a full
    /// queue fails the enqueue instead of blocking the engine.
    pub(crate) fn enqueue(&self, event: &ClientEvent) -> Result<(), EngineError> {
        self.outbound_tx
            .try_send(event.to_envelope())
            .map_err(|_| EngineError::QueueFull)
    }

    /// Explicit teardown; suppresses the auto-reconnect for this close.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
impl ConnectionHandle {
    /// Handle wired to in-test channels, with no connection task behind it.
    pub(crate) fn test_pair(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<Envelope>,
        watch::Sender<ConnectionState>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Open);
        let handle = Self {
            outbound_tx,
            state_rx,
            cancel: CancellationToken::new(),
        };
        (handle, outbound_rx, state_tx)
    }
}

/// Spawn the connection task. `link_tx` feeds the engine loop.
pub(crate) fn spawn_connection(
    config: &SyncConfig,
    link_tx: mpsc::Sender<LinkEvent>,
) -> ConnectionHandle {
    let (outbound_tx, outbound_rx) = mpsc::channel(config.engine.outbound_queue);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let cancel = CancellationToken::new();

    tokio::spawn(run_connection(
        config.ws_url.clone(),
        config.keepalive,
        config.reconnect,
        outbound_rx,
        link_tx,
        state_tx,
        cancel.clone(),
    ));

    ConnectionHandle {
        outbound_tx,
        state_rx,
        cancel,
    }
}

async fn run_connection(
    ws_url: String,
    keepalive: KeepaliveConfig,
    reconnect: ReconnectConfig,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    link_tx: mpsc::Sender<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut delay = reconnect.initial_delay;
    let mut first_attempt = true;
    // Frame taken off the queue but not yet written when the socket died.
    let mut carryover: Option<Envelope> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let _ = state_tx.send(if first_attempt {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            res = connect_async(&ws_url) => res,
        };

        match connected {
            Ok((stream, _)) => {
                info!("Connection open: {}", ws_url);
                delay = reconnect.initial_delay;
                let _ = state_tx.send(ConnectionState::Open);
                let _ = link_tx.send(LinkEvent::Up).await;

                let end = run_session(
                    stream,
                    &keepalive,
                    &mut outbound_rx,
                    &mut carryover,
                    &link_tx,
                    &cancel,
                )
                .await;
                let _ = link_tx.send(LinkEvent::Down).await;
                if matches!(end, SessionEnd::Shutdown) {
                    break;
                }
                warn!("Connection lost, retrying in ~{:?}", delay);
            }
            Err(e) => {
                warn!("Connect failed: {} (retry in ~{:?})", e, delay);
            }
        }

        first_attempt = false;
        let _ = state_tx.send(ConnectionState::Reconnecting);
        let wait = with_jitter(delay, reconnect.jitter);
        delay = next_delay(delay, &reconnect);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(wait) => {}
        }
    }

    let _ = state_tx.send(ConnectionState::Disconnected);
    debug!("Connection task stopped");
}

enum SessionEnd {
    /// Network close, socket error, or watchdog — reconnect.
    Closed,
    /// Explicit disconnect or all handles dropped — stop for good.
    Shutdown,
}

async fn run_session(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    keepalive: &KeepaliveConfig,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    carryover: &mut Option<Envelope>,
    link_tx: &mpsc::Sender<LinkEvent>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut ws_write, mut ws_read) = stream.split();

    // Flush the frame that was in flight when the previous socket died.
    if let Some(env) = carryover.take() {
        let text = env.encode();
        if ws_write
            .send(tungstenite::Message::Text(text.into()))
            .await
            .is_err()
        {
            *carryover = Some(env);
            return SessionEnd::Closed;
        }
    }

    let mut ping_timer = time::interval_at(Instant::now() + keepalive.interval, keepalive.interval);
    // Armed after each ping; cleared by the matching PONG. While the
    // session is down no timer exists at all, so keepalive provably does
    // not run during the reconnect gap.
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let watchdog = async move {
            match pong_deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            _ = ping_timer.tick() => {
                let ping = ClientEvent::Ping.to_envelope().encode();
                if ws_write.send(tungstenite::Message::Text(ping.into())).await.is_err() {
                    return SessionEnd::Closed;
                }
                pong_deadline = Some(Instant::now() + keepalive.watchdog);
            }
            _ = watchdog => {
                warn!("Pong watchdog fired, forcing close");
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                return SessionEnd::Closed;
            }
            maybe = outbound_rx.recv() => {
                let Some(env) = maybe else {
                    // Every handle is gone; nothing can ever be sent again.
                    return SessionEnd::Shutdown;
                };
                let text = env.encode();
                if ws_write.send(tungstenite::Message::Text(text.into())).await.is_err() {
                    *carryover = Some(env);
                    return SessionEnd::Closed;
                }
            }
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match Envelope::decode(&text) {
                            Ok(env) if env.event == "PONG" => {
                                pong_deadline = None;
                            }
                            Ok(env) => {
                                let _ = link_tx.send(LinkEvent::Inbound(env)).await;
                            }
                            Err(e) => debug!("Undecodable frame: {}", e),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        info!("Server closed connection");
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Socket error: {}", e);
                        return SessionEnd::Closed;
                    }
                }
            }
        }
    }
}

/// Exponential growth capped at the configured ceiling.
fn next_delay(current: std::time::Duration, cfg: &ReconnectConfig) -> std::time::Duration {
    (current * 2).min(cfg.max_delay)
}

/// Spread retries out so a fleet of clients does not hammer a recovering
/// backend in lockstep.
fn with_jitter(delay: std::time::Duration, jitter: f64) -> std::time::Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = rand::rng().random_range(1.0 - jitter..=1.0 + jitter);
    delay.mul_f64(factor)
}
