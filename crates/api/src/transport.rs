//! Streaming transport: one websocket per subscriber.
//!
//! After the upgrade the connection subscribes to the caller's events and runs
//! until the first of:
//!
//! - the read loop fails or the peer closes (reads only keep the connection
//!   alive; a silence longer than `ping_period * 3 / 2` is a dead peer);
//! - the write loop fails (ping or event write, each bounded by [`WRITE_TIMEOUT`]);
//! - the subscription ends (stream closed);
//! - process shutdown.
//!
//! Unexpected failures close with `1011`, everything else with `1000`. The
//! close frame is sent once, best-effort.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parley_core::UserId;
use parley_events::{EventStream, StreamError, Subscription};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::adapters::{AdaptError, EventAdapter};
use crate::middleware::WS_PROTOCOL;

pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest frame accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 14 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("subscribe on event stream: {0}")]
    Subscribe(#[from] StreamError),

    #[error("read: {0}")]
    Read(#[source] axum::Error),

    #[error("no frame from peer within {0:?}")]
    PongTimeout(Duration),

    #[error("adapt event: {0}")]
    Adapt(#[from] AdaptError),

    #[error("write: {0}")]
    Write(#[source] axum::Error),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Upgraded,
    /// Re-entered after every successful keepalive.
    Streaming,
    Closing,
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Ending {
    PeerClosed,
    SubscriptionEnded,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub ping_period: Duration,
}

impl TransportSettings {
    pub fn pong_wait(&self) -> Duration {
        self.ping_period * 3 / 2
    }
}

struct Connection {
    user_id: UserId,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    fn new(user_id: UserId) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self { user_id, state }
    }

    fn enter(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            trace!(user_id = %self.user_id, ?prev, ?next, "ws state");
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Serves websocket subscribers of one audience.
pub struct StreamHandler {
    stream: Arc<dyn EventStream>,
    adapter: Arc<dyn EventAdapter>,
    settings: TransportSettings,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StreamHandler {
    pub fn new(
        stream: Arc<dyn EventStream>,
        adapter: Arc<dyn EventAdapter>,
        settings: TransportSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream,
            adapter,
            settings,
            shutdown,
        }
    }

    /// Upgrade the request and stream `user_id`'s events over it.
    pub fn serve(self: Arc<Self>, ws: WebSocketUpgrade, user_id: UserId) -> Response {
        let conn = Connection::new(user_id);
        ws.protocols([WS_PROTOCOL])
            .max_message_size(MAX_MESSAGE_SIZE)
            .on_upgrade(move |socket| async move {
                conn.enter(ConnectionState::Upgraded);
                self.run(conn, socket).await;
            })
    }

    async fn run(&self, conn: Connection, socket: WebSocket) {
        let (mut sink, mut source) = socket.split();

        // Child of shutdown; cancelled on exit so the subscription is dropped.
        let sub_token = self.shutdown.child_token();
        let mut sub = match self.stream.subscribe(conn.user_id, sub_token.clone()) {
            Ok(sub) => sub,
            Err(e) => {
                error!(user_id = %conn.user_id, error = %e, "ws subscribe failed");
                self.close(&conn, &mut sink, close_code::ERROR).await;
                return;
            }
        };
        conn.enter(ConnectionState::Streaming);
        info!(user_id = %conn.user_id, "ws connected");

        let outcome = tokio::select! {
            r = self.read_loop(&mut source) => r,
            r = self.write_loop(&conn, &mut sink, &mut sub) => r,
            _ = self.shutdown.cancelled() => Ok(Ending::Shutdown),
        };
        sub_token.cancel();
        conn.enter(ConnectionState::Closing);

        let code = match outcome {
            Ok(ending) => {
                debug!(user_id = %conn.user_id, ?ending, "ws ending");
                close_code::NORMAL
            }
            Err(e) => {
                error!(user_id = %conn.user_id, error = %e, "ws unexpected error");
                close_code::ERROR
            }
        };
        self.close(&conn, &mut sink, code).await;
        info!(user_id = %conn.user_id, code, "ws disconnected");
    }

    /// Drain incoming frames. Pongs, and any other frame, prove liveness.
    async fn read_loop(
        &self,
        source: &mut SplitStream<WebSocket>,
    ) -> Result<Ending, TransportError> {
        let pong_wait = self.settings.pong_wait();
        loop {
            match timeout(pong_wait, source.next()).await {
                Err(_) => return Err(TransportError::PongTimeout(pong_wait)),
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(Ending::PeerClosed),
                Ok(Some(Err(e))) => return Err(TransportError::Read(e)),
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    async fn write_loop(
        &self,
        conn: &Connection,
        sink: &mut SplitSink<WebSocket, Message>,
        sub: &mut Subscription,
    ) -> Result<Ending, TransportError> {
        let mut ping = tokio::time::interval(self.settings.ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    write(sink, Message::Ping(Vec::new())).await?;
                    conn.enter(ConnectionState::Streaming);
                }
                event = sub.recv() => {
                    let Some(event) = event else {
                        return Ok(Ending::SubscriptionEnded);
                    };
                    let adapted = self.adapter.adapt(&event)?;
                    write(sink, Message::Text(adapted.to_string())).await?;
                }
            }
        }
    }

    async fn close(
        &self,
        conn: &Connection,
        sink: &mut SplitSink<WebSocket, Message>,
        code: u16,
    ) {
        if conn.state() == ConnectionState::Closed {
            return;
        }
        let reason = if code == close_code::NORMAL { "bye" } else { "internal error" };
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        }));
        if let Err(e) = write(sink, frame).await {
            warn!(user_id = %conn.user_id, error = %e, "ws close frame not sent");
        }
        conn.enter(ConnectionState::Closed);
    }
}

async fn write(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
) -> Result<(), TransportError> {
    match timeout(WRITE_TIMEOUT, sink.send(message)).await {
        Err(_) => Err(TransportError::WriteTimeout(WRITE_TIMEOUT)),
        Ok(Err(e)) => Err(TransportError::Write(e)),
        Ok(Ok(())) => Ok(()),
    }
}
