use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::Message as WsMessage;

use crate::hub::registry::{ClientId, Registry};
use crate::utils::Result;

/// Accepts WebSocket subscribers on `listener` until `cancel` fires.
///
/// Only upgrades on `path` are accepted; anything else is answered with 404.
/// Each accepted connection gets its own reader task, which treats any
/// inbound frame as a liveness signal and otherwise ignores the content.
pub async fn serve(
    listener: TcpListener,
    registry: Registry,
    path: String,
    cancel: CancellationToken,
) -> Result<()> {
    match listener.local_addr() {
        Ok(addr) => info!("websocket hub listening on ws://{addr}{path}"),
        Err(err) => warn!(error = %err, "websocket hub listening on unknown address"),
    }

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(err) => {
                    warn!(error = %err, "failed to accept tcp connection");
                    continue;
                }
            },
        };

        let registry = registry.clone();
        let path = path.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            handle_connection(stream, registry, path, cancel).await;
        });
    }

    info!("websocket hub stopped accepting connections");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    registry: Registry,
    path: String,
    cancel: CancellationToken,
) {
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let id = stream
        .peer_addr()
        .map(ClientId::from_addr)
        .unwrap_or_else(|_| ClientId::generated());

    let ws_stream = match accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(client_id = %id, error = %err, "websocket upgrade failed");
            return;
        }
    };

    let (sink, mut inbound) = ws_stream.split();
    let (handle, mut writer) = registry.connect(id, sink);
    let mut writer_done = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            finished = &mut writer => {
                if let Err(err) = finished {
                    error!(client_id = %handle.id(), error = %err, "write loop task panicked");
                }
                writer_done = true;
                break;
            }
            frame = inbound.next() => match frame {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => handle.touch(),
                Some(Err(err)) => {
                    debug!(client_id = %handle.id(), error = %err, "websocket read failed");
                    break;
                }
            },
        }
    }

    registry.unsubscribe(&handle);
    if !writer_done {
        if let Err(err) = writer.await {
            error!(client_id = %handle.id(), error = %err, "write loop task panicked");
        }
    }
}
