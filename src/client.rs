// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-connection state machine: `Connected` (no room yet) -> `Joined` (attached to a
//! document) -> dropped, on transport close. Frames for a single connection are always
//! processed one at a time by its own task, so this type needs no internal locking of its own;
//! all synchronization happens inside [`RoomRegistry`] and [`DocumentSession`].

use std::sync::Arc;

use tracing::warn;

use tokio::sync::mpsc;

use crate::document::{ClientId, DocumentSession};
use crate::message::ServerMessage;
use crate::ot::Operation;
use crate::registry::RoomRegistry;
use crate::selection::Selection;

enum Room {
    None,
    Joined {
        id: String,
        doc: Arc<DocumentSession>,
    },
}

pub struct ClientSession {
    id: ClientId,
    registry: Arc<RoomRegistry>,
    outbox: mpsc::UnboundedSender<ServerMessage>,
    room: Room,
}

impl ClientSession {
    #[must_use]
    pub fn new(
        id: ClientId,
        registry: Arc<RoomRegistry>,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            registry,
            outbox,
            room: Room::None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.outbox.send(message);
    }

    fn send_error(&self, reason: impl Into<String>) {
        self.send(ServerMessage::Error(reason.into()));
    }

    /// Join `room_id` (minting a fresh room id if none was given), leaving any room this
    /// connection was already in first.
    pub fn handle_join(&mut self, room_id: Option<String>) {
        if matches!(self.room, Room::Joined { .. }) {
            self.leave();
        }

        let room_id = room_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let doc = self
            .registry
            .join(&room_id, self.id.clone(), self.outbox.clone());
        let (state, revision) = doc.snapshot();

        self.send(ServerMessage::JoinedRoom {
            client_id: self.id.clone(),
            room_id: room_id.clone(),
            state,
            revision,
        });

        self.room = Room::Joined { id: room_id, doc };
    }

    /// Rebase and apply `op`. Requires an active room; any commit failure is reported back to
    /// this connection as an `error` message rather than mutating document state.
    pub fn handle_operation(&mut self, op: Operation, revision: usize) {
        let Room::Joined { doc, .. } = &self.room else {
            self.send_error("not in a room");
            return;
        };

        if let Err(err) = doc.commit_operation(&self.id, revision, op) {
            warn!(client = %self.id, %err, "operation rejected");
            self.send_error(format!("failed to apply operation: {err}"));
        }
    }

    /// Rebase `selection` and broadcast it. Requires an active room.
    pub fn handle_selection(&mut self, selection: Selection, revision: usize) {
        let Room::Joined { doc, .. } = &self.room else {
            self.send_error("not in a room");
            return;
        };

        doc.commit_selection(&self.id, revision, selection);
    }

    /// Leave the current room, if any, notifying the remaining occupants.
    pub fn leave(&mut self) {
        if let Room::Joined { id, doc } = std::mem::replace(&mut self.room, Room::None) {
            let empty = self.registry.leave(&id, &self.id);
            if !empty {
                doc.broadcast(
                    ServerMessage::ClientDisconnected {
                        client_id: self.id.clone(),
                    },
                    &self.id,
                );
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.leave();
    }
}
