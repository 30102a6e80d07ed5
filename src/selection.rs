// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rebasing a cursor or selection through an [`Operation`](crate::ot::Operation).

use serde::{Deserialize, Serialize};

use crate::ot::{Atom, Operation};

/// A caret (`anchor == head`) or a range selection, expressed as character offsets into the
/// document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: usize,
    pub head: usize,
}

impl Selection {
    #[must_use]
    pub fn caret(at: usize) -> Self {
        Self { anchor: at, head: at }
    }
}

/// Move a single offset forward through `op`: retained characters shift it, inserted text
/// pushes it forward, and deleted text pulls it back (clamped so it never passes the start of
/// the deleted span). The walk stops as soon as the offset has been fully accounted for.
fn transform_index(index: usize, op: &Operation) -> usize {
    let mut index = index as isize;
    let mut new_index = index;

    for atom in op.ops() {
        match atom {
            Atom::Retain(n) => index -= *n as isize,
            Atom::Insert(text) => new_index += text.chars().count() as isize,
            Atom::Delete(n) => {
                new_index -= index.min(*n as isize);
                index -= *n as isize;
            }
        }
        if index < 0 {
            break;
        }
    }

    new_index.max(0) as usize
}

/// Rebase `selection` through `op`. A caret is transformed once and mirrored to both fields;
/// a range selection transforms its anchor and head independently, since an edit can move them
/// by different amounts.
#[must_use]
pub fn transform_selection(selection: Selection, op: &Operation) -> Selection {
    if selection.anchor == selection.head {
        let at = transform_index(selection.anchor, op);
        Selection { anchor: at, head: at }
    } else {
        Selection {
            anchor: transform_index(selection.anchor, op),
            head: transform_index(selection.head, op),
        }
    }
}
