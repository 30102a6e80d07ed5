// SPDX-License-Identifier: AGPL-3.0-or-later

//! A single collaboratively-edited document: its text, revision history and connected clients,
//! all protected by one lock so that a commit can never observe history, revision and text out
//! of step with each other.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::message::ServerMessage;
use crate::ot::{transform, Operation, OperationData, OtError};
use crate::selection::{transform_selection, Selection};

pub type ClientId = String;
type Outbox = mpsc::UnboundedSender<ServerMessage>;

struct State {
    text: String,
    revision: usize,
    history: Vec<Operation>,
    clients: HashMap<ClientId, Outbox>,
}

/// Everything the server tracks about one room's document.
///
/// `state`, `revision` and `history` are conceptually one value: they are all behind the same
/// [`RwLock`], so a reader always sees a consistent `(text, revision, history[..revision])`
/// triple. Commits are computed and acknowledged while holding the write lock; the actual
/// socket writes happen later, on each client's own writer task, once the corresponding message
/// has been pushed onto that client's outbox. This keeps the lock's critical section limited to
/// in-memory work.
pub struct DocumentSession {
    id: String,
    state: RwLock<State>,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("could not rebase the operation against intervening history: {0}")]
    Rebase(#[source] OtError),
    #[error("could not apply the operation to the document: {0}")]
    Apply(#[source] OtError),
    #[error("revision {0} is ahead of the document's history")]
    FutureRevision(usize),
}

impl DocumentSession {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(State {
                text: String::new(),
                revision: 0,
                history: Vec::new(),
                clients: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_client(&self, id: ClientId, outbox: Outbox) {
        self.state.write().clients.insert(id, outbox);
    }

    /// Removes a client from the roster, returning whether the document is now empty.
    pub fn remove_client(&self, id: &str) -> bool {
        let mut state = self.state.write();
        state.clients.remove(id);
        state.clients.is_empty()
    }

    /// The current text and revision, for a client that just joined.
    #[must_use]
    pub fn snapshot(&self) -> (String, usize) {
        let state = self.state.read();
        (state.text.clone(), state.revision)
    }

    pub fn broadcast(&self, message: ServerMessage, exclude: &str) {
        let state = self.state.read();
        for (id, outbox) in &state.clients {
            if id == exclude {
                continue;
            }
            if outbox.send(message.clone()).is_err() {
                warn!(client = %id, "dropping broadcast: client's writer task is gone");
            }
        }
    }

    /// Rebase `op` (submitted by `author` against `base_revision`) through any history committed
    /// since, apply it, and notify clients.
    ///
    /// On success, `author` always receives an `ack-operation` (even if the rebased operation
    /// turned out to be a no-op, in which case nothing is appended to history and nobody else is
    /// notified), and every other client in the room receives the rebased `remote-operation`.
    /// On error, nothing is mutated and no message is sent; the caller is responsible for
    /// telling the author what went wrong.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::FutureRevision`] if `base_revision` is beyond the document's
    /// current history, [`CommitError::Rebase`] if transforming against intervening history
    /// fails, and [`CommitError::Apply`] if the rebased operation doesn't cleanly apply to the
    /// current text.
    pub fn commit_operation(
        &self,
        author: &str,
        base_revision: usize,
        mut op: Operation,
    ) -> Result<(), CommitError> {
        let mut state = self.state.write();

        if base_revision > state.history.len() {
            return Err(CommitError::FutureRevision(base_revision));
        }

        for historical in &state.history[base_revision..] {
            let (_, op_prime) = transform(historical, &op).map_err(CommitError::Rebase)?;
            op = op_prime;
        }

        if op.is_noop() {
            let revision = state.revision;
            send(&state.clients, author, ServerMessage::AckOperation { revision });
            return Ok(());
        }

        let new_text = op.apply(&state.text).map_err(CommitError::Apply)?;
        state.text = new_text;
        state.history.push(op.clone());
        state.revision += 1;
        let revision = state.revision;

        send(&state.clients, author, ServerMessage::AckOperation { revision });

        let operation_data = OperationData::from(&op);
        for (id, outbox) in &state.clients {
            if id == author {
                continue;
            }
            let message = ServerMessage::RemoteOperation {
                operation: operation_data.clone(),
                revision,
            };
            if outbox.send(message).is_err() {
                warn!(client = %id, "dropping remote-operation: client's writer task is gone");
            }
        }

        Ok(())
    }

    /// Rebase `selection` through history committed since `base_revision` and broadcast it to
    /// every other client. Selections are never stored: each broadcast only ever reflects the
    /// sender's latest cursor position.
    pub fn commit_selection(&self, author: &str, base_revision: usize, selection: Selection) {
        let state = self.state.read();

        let base_revision = base_revision.min(state.history.len());
        let selection = state.history[base_revision..]
            .iter()
            .fold(selection, |selection, op| transform_selection(selection, op));
        let revision = state.revision;

        for (id, outbox) in &state.clients {
            if id == author {
                continue;
            }
            let message = ServerMessage::RemoteSelection {
                client_id: author.to_string(),
                selection: selection.into(),
                revision,
            };
            if outbox.send(message).is_err() {
                warn!(client = %id, "dropping remote-selection: client's writer task is gone");
            }
        }
    }
}

fn send(clients: &HashMap<ClientId, Outbox>, id: &str, message: ServerMessage) {
    if let Some(outbox) = clients.get(id) {
        if outbox.send(message).is_err() {
            warn!(client = %id, "dropping message: client's writer task is gone");
        }
    }
}
