//! WebSocket session lifecycle: one authenticated client from upgrade
//! through disconnect.

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use parley_core::{ConnectionId, ErrorCode, Payload, UserId};

use super::inbound::{SessionContext, handle_frame};
use crate::config::ServerConfig;
use crate::hub::HubHandle;
use crate::metrics::{FRAMES_ERROR_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL};
use crate::server::Services;

/// Run a session for an authenticated client.
///
/// 1. Registers a fresh connection and its outbound queue with the hub
/// 2. Spawns the write loop draining that queue, with periodic pings
/// 3. Reads frames inline until the socket closes, errors, goes quiet
///    past the pong timeout, or the write loop ends
/// 4. Unregisters, then gives the write loop `write_timeout` to finish
///
/// A frame that has started processing always runs to completion, even if
/// the write loop has already gone.
#[instrument(skip_all, fields(user_id = %user))]
pub async fn run_ws_session(
    socket: WebSocket,
    user: UserId,
    hub: HubHandle,
    services: Services,
    config: ServerConfig,
) {
    let conn = ConnectionId::generate();
    let (tx, rx) = mpsc::channel::<Payload>(config.queue_capacity);
    if hub.register(user.clone(), conn.clone(), tx).await.is_err() {
        debug!("hub stopped before registration");
        return;
    }

    let started = Instant::now();
    info!(conn_id = %conn, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let (ws_tx, ws_rx) = socket.split();
    let writer_done = CancellationToken::new();
    let mut writer = tokio::spawn(write_loop(ws_tx, rx, config.clone(), writer_done.clone()));

    let ctx = SessionContext {
        user,
        conn: conn.clone(),
        hub: hub.clone(),
        services,
        private_routing: config.private_routing,
    };
    read_loop(ws_rx, &ctx, &config, &writer_done).await;

    // Dropping the registry's sender closes the queue, which ends the
    // write loop with a Close frame if it is still running.
    let _ = hub.unregister(conn.clone()).await;
    match timeout(config.write_timeout, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(conn_id = %conn, error = %e, "write loop failed"),
        Err(_) => {
            debug!(conn_id = %conn, "write loop did not finish, aborting");
            writer.abort();
        }
    }

    info!(conn_id = %conn, "client disconnected");
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    ctx: &SessionContext,
    config: &ServerConfig,
    writer_done: &CancellationToken,
) {
    loop {
        // Only the wait for the next frame races the write loop; frame
        // handling below is never interrupted.
        let next = tokio::select! {
            biased;
            () = writer_done.cancelled() => {
                debug!("write loop ended; stop reading");
                break;
            }
            next = timeout(config.pong_timeout, ws_rx.next()) => next,
        };
        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "socket read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(timeout = ?config.pong_timeout, "client unresponsive, disconnecting");
                break;
            }
        };

        let text = match msg {
            Message::Text(ref t) => t.as_str(),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    s
                } else {
                    debug!(len = data.len(), "non-UTF-8 binary frame");
                    counter!(FRAMES_ERROR_TOTAL, "code" => ErrorCode::InvalidJson.as_str())
                        .increment(1);
                    if ctx
                        .hub
                        .deliver_to_connection(ctx.conn.clone(), ErrorCode::InvalidJson.payload())
                        .await
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
            }
            // Any frame, pongs included, has already extended the deadline.
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        };

        if handle_frame(ctx, text).await.is_err() {
            debug!("hub stopped; ending session");
            break;
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Payload>,
    config: ServerConfig,
    done: CancellationToken,
) {
    let _done = done.drop_guard();
    let mut ping = tokio::time::interval(config.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    let _ = ping.tick().await;

    loop {
        let frame = tokio::select! {
            next = rx.recv() => match next {
                Some(payload) => Message::Text(payload.to_string().into()),
                None => {
                    // Queue closed: unregistered, evicted, or shutting down.
                    let _ = timeout(config.write_timeout, ws_tx.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new().into()),
        };

        match timeout(config.write_timeout, ws_tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "socket write failed");
                break;
            }
            Err(_) => {
                warn!(timeout = ?config.write_timeout, "socket write timed out");
                break;
            }
        }
    }
    // A peer that stopped reading would block the close handshake forever.
    let _ = timeout(config.write_timeout, ws_tx.close()).await;
}
