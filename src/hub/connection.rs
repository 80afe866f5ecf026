use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::hub::registry::{ClientHandle, ConnectionState, Registry};

enum Exit {
    Drained,
    WriteFailed,
}

/// Sole writer for one connection.
///
/// Forwards frames from the send queue to the transport in order and sends a
/// ping every ping interval, whether or not other frames went out: the
/// peer's pongs are what keep its liveness fresh, busy or not. Every write is
/// bounded by the write timeout. When the queue closes the loop sends a close
/// frame; on any exit the connection is unregistered and the transport closed.
pub async fn write_loop<S>(
    registry: Registry,
    handle: ClientHandle,
    mut queue: mpsc::Receiver<WsMessage>,
    mut sink: S,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let ping_every = registry.settings().ping_interval();
    let write_timeout = registry.settings().write_timeout();

    let mut heartbeat = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = heartbeat.tick() => {
                if !write(&mut sink, WsMessage::Ping(Vec::new().into()), write_timeout, &handle).await {
                    break Exit::WriteFailed;
                }
            }
            frame = queue.recv() => {
                let Some(frame) = frame else {
                    break Exit::Drained;
                };
                if !write(&mut sink, frame, write_timeout, &handle).await {
                    break Exit::WriteFailed;
                }
            }
        }
    };

    registry.unsubscribe(&handle);
    handle.advance(ConnectionState::Draining);

    if let Exit::Drained = exit {
        // The peer may already have closed its side; a failed close frame is expected then.
        if let Ok(Err(err)) = timeout(write_timeout, sink.send(WsMessage::Close(None))).await {
            debug!(client_id = %handle.id(), error = %err, "close frame not sent");
        }
    }
    if let Ok(Err(err)) = timeout(write_timeout, sink.close()).await {
        debug!(client_id = %handle.id(), error = %err, "error closing websocket");
    }

    handle.advance(ConnectionState::Closed);
    debug!(client_id = %handle.id(), "write loop finished");
}

async fn write<S>(sink: &mut S, frame: WsMessage, limit: Duration, handle: &ClientHandle) -> bool
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    match timeout(limit, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(client_id = %handle.id(), error = %err, "error writing message");
            false
        }
        Err(_) => {
            warn!(client_id = %handle.id(), ?limit, "write deadline exceeded");
            false
        }
    }
}
