// SPDX-License-Identifier: AGPL-3.0-or-later

//! The JSON wire envelope shared by every message exchanged over the WebSocket connection:
//! `{"type": "...", "payload": ...}`. Decoding is deliberately permissive at this layer —
//! an unrecognized `type`, or a payload that doesn't match the shape its `type` implies, is
//! reported back to the caller as [`Decoded::Unknown`]/[`Decoded::Malformed`] rather than as an
//! error, so that a single bad frame never tears down the connection.

use serde::{Deserialize, Serialize};

use crate::ot::OperationData;
use crate::selection::Selection;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationPayload {
    pub operation: OperationData,
    pub revision: usize,
}

/// The wire shape of a [`Selection`]: plain integers, validated into character offsets by
/// [`WireSelection::into_selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSelection {
    pub anchor: i64,
    pub head: i64,
}

impl WireSelection {
    #[must_use]
    pub fn into_selection(self) -> Option<Selection> {
        Some(Selection {
            anchor: usize::try_from(self.anchor).ok()?,
            head: usize::try_from(self.head).ok()?,
        })
    }
}

impl From<Selection> for WireSelection {
    fn from(selection: Selection) -> Self {
        Self {
            anchor: selection.anchor as i64,
            head: selection.head as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
    /// Present on the wire for compatibility with older clients; the server always
    /// attributes a selection to the connection that sent it, never to this field.
    #[serde(default)]
    #[allow(dead_code)]
    pub client_id: Option<String>,
    pub selection: WireSelection,
    pub revision: usize,
}

/// The outcome of decoding one inbound text frame.
pub enum Decoded {
    Join(JoinPayload),
    Operation(OperationPayload),
    Selection(SelectionPayload),
    /// The envelope parsed, but its `type` isn't one the server understands.
    Unknown(String),
    /// The frame wasn't a valid envelope, or its payload didn't match its `type`.
    Malformed(String),
}

#[must_use]
pub fn decode(raw: &str) -> Decoded {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => return Decoded::Malformed(err.to_string()),
    };

    match envelope.kind.as_str() {
        "join" => {
            if envelope.payload.is_null() {
                Decoded::Join(JoinPayload::default())
            } else {
                serde_json::from_value(envelope.payload)
                    .map(Decoded::Join)
                    .unwrap_or_else(|err| Decoded::Malformed(err.to_string()))
            }
        }
        "operation" => serde_json::from_value(envelope.payload)
            .map(Decoded::Operation)
            .unwrap_or_else(|err| Decoded::Malformed(err.to_string())),
        "selection" => serde_json::from_value(envelope.payload)
            .map(Decoded::Selection)
            .unwrap_or_else(|err| Decoded::Malformed(err.to_string())),
        other => Decoded::Unknown(other.to_string()),
    }
}

/// Every message the server ever sends to a client, tagged the same way as inbound messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    JoinedRoom {
        client_id: String,
        room_id: String,
        state: String,
        revision: usize,
    },
    AckOperation {
        revision: usize,
    },
    RemoteOperation {
        operation: OperationData,
        revision: usize,
    },
    RemoteSelection {
        client_id: String,
        selection: WireSelection,
        revision: usize,
    },
    ClientDisconnected {
        client_id: String,
    },
    Error(String),
}
