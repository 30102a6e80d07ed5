// SPDX-License-Identifier: AGPL-3.0-or-later

//! The server-wide map from room id to [`DocumentSession`].
//!
//! Joining and leaving a room both take the registry's write lock for their entire critical
//! section, including the roster mutation on the document itself. This closes the race where a
//! client could join a room at the exact moment its last occupant's disconnect is deleting it:
//! since both operations serialize on the same lock, a join can never observe a room between
//! "about to be removed" and "removed", and a removal can never discard a room a join just
//! resurrected. The lock order is registry before document, and this module is the one place a
//! document's own lock is taken while the registry lock is held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::document::{ClientId, DocumentSession};
use crate::message::ServerMessage;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<DocumentSession>>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the document for `room_id`, creating it if this is the first client to ask for
    /// it, and registers `client` as one of its occupants.
    pub fn join(
        &self,
        room_id: &str,
        client: ClientId,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) -> Arc<DocumentSession> {
        let mut rooms = self.rooms.write();
        let doc = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(DocumentSession::new(room_id)))
            .clone();
        doc.add_client(client, outbox);
        doc
    }

    /// Removes `client` from `room_id`'s roster, deleting the room if that was its last
    /// occupant. Returns whether the document is now empty (and therefore gone from the
    /// registry).
    pub fn leave(&self, room_id: &str, client: &str) -> bool {
        let mut rooms = self.rooms.write();
        let Some(doc) = rooms.get(room_id) else {
            return true;
        };
        let empty = doc.remove_client(client);
        if empty {
            rooms.remove(room_id);
        }
        empty
    }

    #[must_use]
    #[cfg(test)]
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outbox() -> mpsc::UnboundedSender<ServerMessage> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn join_creates_a_room_on_first_use() {
        let registry = RoomRegistry::new();
        let doc = registry.join("room-1", "alice".to_string(), outbox());
        assert_eq!(doc.id(), "room-1");
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn join_reuses_an_existing_room() {
        let registry = RoomRegistry::new();
        let first = registry.join("room-1", "alice".to_string(), outbox());
        let second = registry.join("room-1", "bob".to_string(), outbox());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn last_leave_removes_the_room() {
        let registry = RoomRegistry::new();
        registry.join("room-1", "alice".to_string(), outbox());
        let empty = registry.leave("room-1", "alice");
        assert!(empty);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn leave_with_remaining_occupants_keeps_the_room() {
        let registry = RoomRegistry::new();
        registry.join("room-1", "alice".to_string(), outbox());
        registry.join("room-1", "bob".to_string(), outbox());
        let empty = registry.leave("room-1", "alice");
        assert!(!empty);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn leaving_an_unknown_room_is_a_no_op() {
        let registry = RoomRegistry::new();
        assert!(registry.leave("ghost-room", "alice"));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn rooms_are_independent() {
        let registry = RoomRegistry::new();
        registry.join("room-1", "alice".to_string(), outbox());
        registry.join("room-2", "bob".to_string(), outbox());
        assert_eq!(registry.room_count(), 2);
        registry.leave("room-1", "alice");
        assert_eq!(registry.room_count(), 1);
    }
}
