//! Websocket endpoint streaming live updates for one device.
//!
//! A client connects to `/ws/{device_id}`, gets a greeting, then receives
//! every update routed to that device as a text frame. Frames sent by the
//! client are ignored; they only tell us the connection is still there.
//! A newer connection for the same device takes over and the older one is
//! closed.
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info};

use crate::router::EventRouter;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(router): State<Arc<EventRouter>>,
) -> Response {
    ws.on_upgrade(move |socket: WebSocket| {
        let (outgoing, incoming) = socket.split();
        serve_subscriber(router, device_id, outgoing, incoming)
    })
}

/// Pump updates for `device_id` to the client until either side goes away.
pub async fn serve_subscriber<O, I>(
    router: Arc<EventRouter>,
    device_id: String,
    mut outgoing: O,
    mut incoming: I,
) where
    O: Sink<Message> + Unpin,
    I: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    info!(device_id = %device_id, "accepted subscriber");
    let greeting = format!("Listening for notifications for: {}", device_id);
    if outgoing.send(Message::Text(greeting)).await.is_err() {
        return;
    }

    let mut subscription = router.connect(&device_id);

    loop {
        tokio::select! {
            update = subscription.updates.recv() => match update {
                Some(payload) => {
                    if outgoing.send(Message::Text(payload)).await.is_err() {
                        debug!(device_id = %device_id, "failed to write to subscriber");
                        break;
                    }
                }
                None => {
                    // Replaced by a newer connection for the same device. The old
                    // socket is closed instead of being left open with no updates.
                    debug!(device_id = %device_id, "subscriber replaced by a newer connection");
                    drop(outgoing.send(Message::Close(None)).await);
                    break;
                }
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(device_id = %device_id, "subscriber connection error: {}", e);
                    break;
                }
            },
        }
    }

    // Stop routing to this connection before it is dropped.
    router.release(&device_id, subscription.id);
    info!(device_id = %device_id, "subscriber disconnected");
}
