use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::ws::registry::{ConnectionRegistry, OutboundReceiver, SessionHandle};

/// How long the write loop gets to flush its close frame once the read loop
/// has ended, before it is aborted.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Server ping cadence.
    pub ping_interval: Duration,
    /// A session with no inbound frame (pongs included) for this long is closed.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Run one authenticated session until the peer goes away.
///
/// Splits the socket into two loops:
/// - Write loop: owns the sink, drains the outbound queue, sends pings
/// - Read loop: only watches for close, errors and idleness
///
/// Whichever loop ends first ends the session. The session is unregistered on
/// every exit path, which closes its queue so the write loop sends a close
/// frame and stops.
pub async fn run_session(
    socket: WebSocket,
    registry: ConnectionRegistry,
    user_id: String,
    config: SessionConfig,
) {
    let (ws_sender, ws_receiver) = socket.split();
    let (handle, rx) = registry.register(&user_id);

    tracing::info!(
        user_id = %user_id,
        session_id = handle.id,
        "Session started"
    );

    let mut writer = tokio::spawn(write_loop(ws_sender, rx, config.ping_interval));

    let writer_done = tokio::select! {
        _ = read_loop(ws_receiver, &handle, config.idle_timeout) => false,
        _ = &mut writer => {
            tracing::debug!(session_id = handle.id, "Write loop ended first");
            true
        }
    };

    registry.unregister(&handle);

    if !writer_done && timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await.is_err() {
        tracing::warn!(session_id = handle.id, "Write loop stuck on shutdown, aborting");
        writer.abort();
    }

    tracing::info!(
        user_id = %user_id,
        session_id = handle.id,
        remaining = registry.session_count(&user_id),
        "Session stopped"
    );
}

async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    handle: &SessionHandle,
    idle_timeout: Duration,
) {
    loop {
        match timeout(idle_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                tracing::info!(
                    user_id = %handle.user_id,
                    reason = ?frame,
                    "Client initiated close"
                );
                break;
            }
            Ok(Some(Ok(_))) => {
                // Inbound frames carry no commands; they only prove liveness
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(
                    user_id = %handle.user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            Ok(None) => {
                tracing::info!(user_id = %handle.user_id, "WebSocket stream ended");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    user_id = %handle.user_id,
                    idle_secs = idle_timeout.as_secs(),
                    "Session idle, closing"
                );
                break;
            }
        }
    }
}

async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: OutboundReceiver,
    ping_interval: Duration,
) {
    let mut ping_timer = interval(ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(msg) => {
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Unregistered: queue closed
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "Session closed".into(),
                        })))
                        .await;
                    let _ = ws_sender.close().await;
                    break;
                }
            },
            _ = ping_timer.tick() => {
                if ws_sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
