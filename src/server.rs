// SPDX-License-Identifier: AGPL-3.0-or-later

//! The HTTP + WebSocket surface: a landing page, a static asset directory, and the `/ws`
//! upgrade that hands a connection off to a [`ClientSession`].

use std::path::PathBuf;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::client::ClientSession;
use crate::message::{self, Decoded, ServerMessage};
use crate::registry::RoomRegistry;

/// Build the top-level filter tree: `/` serves the landing page, `/static/*` serves assets out
/// of `static_dir`, and `/ws` upgrades to a collaborative session.
pub fn routes(
    registry: Arc<RoomRegistry>,
    static_dir: PathBuf,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let index = warp::path::end().and(warp::fs::file(static_dir.join("index.html")));

    let assets = warp::path("static").and(warp::fs::dir(static_dir));

    let registry = warp::any().map(move || registry.clone());
    let ws = warp::path("ws")
        .and(warp::ws())
        .and(registry)
        .map(|ws: warp::ws::Ws, registry: Arc<RoomRegistry>| {
            ws.on_upgrade(move |socket| handle_connection(socket, registry))
        });

    index.or(assets).or(ws)
}

/// Drive one WebSocket connection end to end: mint a client id, spawn a dedicated writer task
/// that owns the outbound half of the socket, and dispatch inbound frames to a [`ClientSession`]
/// until the socket closes.
async fn handle_connection(socket: WebSocket, registry: Arc<RoomRegistry>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(client = %writer_id, %err, "failed to encode outgoing message");
                    continue;
                }
            };
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut session = ClientSession::new(client_id.clone(), registry, outbox);
    debug!(client = %client_id, "connection established");

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(client = %client_id, %err, "websocket read error, closing connection");
                break;
            }
        };

        if frame.is_close() {
            break;
        }
        let Ok(text) = frame.to_str() else {
            continue;
        };

        match message::decode(text) {
            Decoded::Join(payload) => session.handle_join(payload.room_id),
            Decoded::Operation(payload) => match payload.operation.try_into() {
                Ok(op) => session.handle_operation(op, payload.revision),
                Err(err) => warn!(client = %client_id, %err, "dropping malformed operation"),
            },
            Decoded::Selection(payload) => match payload.selection.into_selection() {
                Some(selection) => session.handle_selection(selection, payload.revision),
                None => warn!(client = %client_id, "dropping malformed selection"),
            },
            Decoded::Unknown(kind) => {
                warn!(client = %client_id, kind, "dropping frame of unknown type");
            }
            Decoded::Malformed(reason) => {
                warn!(client = %client_id, reason, "dropping malformed frame");
            }
        }
    }

    // Dropping the session runs its `Drop` impl, which leaves any joined room and notifies
    // the remaining occupants. Dropping `outbox` (inside `session`) lets the writer task drain
    // whatever is left and exit.
    drop(session);
    info!(client = %client_id, "connection closed");
    let _ = writer.await;
}
