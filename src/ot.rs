// SPDX-License-Identifier: AGPL-3.0-or-later

//! A small operational-transformation engine over plain UTF-8 text.
//!
//! An [`Operation`] is a sequence of [`Atom`]s (`Retain`, `Insert`, `Delete`) that together
//! describe an edit to a document of a known length, producing a document of another known
//! length. Operations are always kept in canonical form: adjacent atoms of the same kind are
//! merged, and an `Insert` immediately preceding a `Delete` is always reordered ahead of it.
//! This means two operations built from the same edits compare equal regardless of the order
//! individual `retain`/`insert`/`delete` calls were made in.
//!
//! [`transform`] is the heart of the engine. Given two operations `a` and `b` that were both
//! produced against the same base document, it produces `(a', b')` such that applying `a` then
//! `b'` yields the same document as applying `b` then `a'` (the TP1 convergence property). When
//! both operations insert text at the same position, the transform is not symmetric: the
//! operation whose `client_id` is greater has its insertion placed first. This makes the choice
//! deterministic across every participant rebasing the same pair of operations, which is what
//! lets a document session apply operations from many clients without ever needing to agree out
//! of band on tie-breaking.
//!
//! Code unit positions (`Retain`/`Delete` counts, and the lengths used everywhere else) count
//! Unicode scalar values (`char`), not bytes, so that operations never land in the middle of a
//! multi-byte character.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single step of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// Leave the next `n` characters of the input unchanged.
    Retain(usize),
    /// Insert literal text at the current position.
    Insert(String),
    /// Remove the next `n` characters of the input.
    Delete(usize),
}

/// An edit to a document, expressed as a sequence of [`Atom`]s.
///
/// `base_length` and `target_length` are invariants derived from the atoms, not independent
/// fields: they are recomputed as atoms are appended via [`Operation::retain`],
/// [`Operation::insert`] and [`Operation::delete`], and are never set directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    ops: Vec<Atom>,
    base_length: usize,
    target_length: usize,
    client_id: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OtError {
    #[error("operation expects an input of length {expected}, but the document has length {actual}")]
    BaseLengthMismatch { expected: usize, actual: usize },
    #[error("operation retains more characters than are left in the input")]
    RetainOverrun,
    #[error("operation did not consume the entire input")]
    IncompleteOperation,
    #[error("cannot transform operations built against different base lengths ({a} vs {b})")]
    TransformBaseMismatch { a: usize, b: usize },
    #[error("cannot transform: the first operation is too short for the second")]
    TooShort,
    #[error("cannot transform: the first operation is too long for the second")]
    TooLong,
}

impl Operation {
    #[must_use]
    pub fn new(client_id: i64) -> Self {
        Self {
            ops: Vec::new(),
            base_length: 0,
            target_length: 0,
            client_id,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    #[must_use]
    pub fn base_length(&self) -> usize {
        self.base_length
    }

    #[must_use]
    pub fn target_length(&self) -> usize {
        self.target_length
    }

    #[must_use]
    pub fn ops(&self) -> &[Atom] {
        &self.ops
    }

    /// An operation is a no-op if applying it changes nothing: only `Retain` atoms, or none at
    /// all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.ops
            .iter()
            .all(|atom| matches!(atom, Atom::Retain(_)))
    }

    /// Append a `Retain(n)`, merging into a trailing `Retain` if there is one.
    pub fn retain(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_length += n;
        self.target_length += n;
        if let Some(Atom::Retain(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(Atom::Retain(n));
        }
        self
    }

    /// Append a `Delete(n)`, merging into a trailing `Delete` if there is one.
    pub fn delete(&mut self, n: usize) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_length += n;
        if let Some(Atom::Delete(last)) = self.ops.last_mut() {
            *last += n;
        } else {
            self.ops.push(Atom::Delete(n));
        }
        self
    }

    /// Append an `Insert(text)`.
    ///
    /// Merges into a trailing `Insert` if there is one. If the operation currently ends with a
    /// `Delete`, the insert is placed immediately *before* it instead (merging into an `Insert`
    /// that already precedes that `Delete`, if present), so that `Insert` atoms never trail a
    /// `Delete` in canonical form.
    pub fn insert(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        self.target_length += text.chars().count();

        let len = self.ops.len();
        if len > 0 {
            if let Atom::Insert(existing) = &mut self.ops[len - 1] {
                existing.push_str(text);
                return self;
            }
            if matches!(self.ops[len - 1], Atom::Delete(_)) {
                if len >= 2 {
                    if let Atom::Insert(existing) = &mut self.ops[len - 2] {
                        existing.push_str(text);
                        return self;
                    }
                }
                self.ops.insert(len - 1, Atom::Insert(text.to_string()));
                return self;
            }
        }
        self.ops.push(Atom::Insert(text.to_string()));
        self
    }

    /// Apply this operation to `input`, producing the resulting document.
    ///
    /// # Errors
    ///
    /// Returns [`OtError::BaseLengthMismatch`] if `input`'s length doesn't match
    /// `base_length`, [`OtError::RetainOverrun`] if a `Retain` runs past the end of `input`, and
    /// [`OtError::IncompleteOperation`] if the operation doesn't consume all of `input`.
    pub fn apply(&self, input: &str) -> Result<String, OtError> {
        let chars: Vec<char> = input.chars().collect();
        if chars.len() != self.base_length {
            return Err(OtError::BaseLengthMismatch {
                expected: self.base_length,
                actual: chars.len(),
            });
        }

        let mut output = String::with_capacity(self.target_length);
        let mut cursor = 0usize;
        for atom in &self.ops {
            match atom {
                Atom::Retain(n) => {
                    let end = cursor + n;
                    if end > chars.len() {
                        return Err(OtError::RetainOverrun);
                    }
                    output.extend(&chars[cursor..end]);
                    cursor = end;
                }
                Atom::Insert(text) => output.push_str(text),
                Atom::Delete(n) => cursor += n,
            }
        }

        if cursor != chars.len() {
            return Err(OtError::IncompleteOperation);
        }
        Ok(output)
    }
}

/// Transform `a` and `b`, two operations built against documents of the same `base_length`
/// (typically concurrent edits from different clients rebased to the same revision), into a
/// pair `(a', b')` such that `b'` applies cleanly after `a`, and `a'` applies cleanly after
/// `b`, and both paths produce the same resulting document.
///
/// When both operations insert at the same position, the operation with the greater
/// `client_id` is ordered first; this is the deterministic tie-break that lets every
/// participant agree on a single outcome without further coordination.
///
/// # Errors
///
/// Returns [`OtError::TransformBaseMismatch`] if `a.base_length() != b.base_length()`, and
/// [`OtError::TooShort`]/[`OtError::TooLong`] if the two operations' non-insert atoms don't
/// cover the same base length (an invariant violation that should never occur for well-formed
/// operations).
pub fn transform(a: &Operation, b: &Operation) -> Result<(Operation, Operation), OtError> {
    if a.base_length != b.base_length {
        return Err(OtError::TransformBaseMismatch {
            a: a.base_length,
            b: b.base_length,
        });
    }

    let mut a_prime = Operation::new(a.client_id);
    let mut b_prime = Operation::new(b.client_id);

    let mut iter_a = a.ops.iter();
    let mut iter_b = b.ops.iter();
    let mut next_a = iter_a.next().cloned();
    let mut next_b = iter_b.next().cloned();

    loop {
        let a_is_insert = matches!(next_a, Some(Atom::Insert(_)));
        let b_is_insert = matches!(next_b, Some(Atom::Insert(_)));

        if let Some(Atom::Insert(text)) = &next_a {
            if !b_is_insert || a.client_id > b.client_id {
                let len = text.chars().count();
                a_prime.insert(text);
                b_prime.retain(len);
                next_a = iter_a.next().cloned();
                continue;
            }
        }
        if let Some(Atom::Insert(text)) = &next_b {
            let len = text.chars().count();
            a_prime.retain(len);
            b_prime.insert(text);
            next_b = iter_b.next().cloned();
            continue;
        }

        debug_assert!(!a_is_insert && !b_is_insert);

        match (next_a, next_b) {
            (None, None) => break,
            (None, Some(_)) => return Err(OtError::TooShort),
            (Some(_), None) => return Err(OtError::TooLong),
            (Some(Atom::Retain(ra)), Some(Atom::Retain(rb))) => {
                let m = ra.min(rb);
                a_prime.retain(m);
                b_prime.retain(m);
                next_a = remainder(Atom::Retain(ra), m, &mut iter_a);
                next_b = remainder(Atom::Retain(rb), m, &mut iter_b);
            }
            (Some(Atom::Delete(da)), Some(Atom::Delete(db))) => {
                let m = da.min(db);
                next_a = remainder(Atom::Delete(da), m, &mut iter_a);
                next_b = remainder(Atom::Delete(db), m, &mut iter_b);
            }
            (Some(Atom::Retain(ra)), Some(Atom::Delete(db))) => {
                let m = ra.min(db);
                b_prime.delete(m);
                next_a = remainder(Atom::Retain(ra), m, &mut iter_a);
                next_b = remainder(Atom::Delete(db), m, &mut iter_b);
            }
            (Some(Atom::Delete(da)), Some(Atom::Retain(rb))) => {
                let m = da.min(rb);
                a_prime.delete(m);
                next_a = remainder(Atom::Delete(da), m, &mut iter_a);
                next_b = remainder(Atom::Retain(rb), m, &mut iter_b);
            }
            // Both inserts were already handled above, and one of {Retain, Delete} x
            // {Retain, Delete} is exhaustive for the remaining four combinations.
            (Some(Atom::Insert(_)), _) | (_, Some(Atom::Insert(_))) => unreachable!(),
        }
    }

    Ok((a_prime, b_prime))
}

/// Consume `n` units of `atom` (a `Retain` or `Delete`) and return what's left: either the
/// same kind of atom with a reduced count, or the iterator's next atom if `atom` was fully
/// consumed.
fn remainder(atom: Atom, n: usize, iter: &mut std::slice::Iter<'_, Atom>) -> Option<Atom> {
    let remaining = match atom {
        Atom::Retain(count) => count - n,
        Atom::Delete(count) => count - n,
        Atom::Insert(_) => unreachable!("remainder is only called for Retain/Delete"),
    };
    if remaining > 0 {
        Some(match atom {
            Atom::Retain(_) => Atom::Retain(remaining),
            Atom::Delete(_) => Atom::Delete(remaining),
            Atom::Insert(_) => unreachable!(),
        })
    } else {
        iter.next().cloned()
    }
}

/// The wire representation of an atom: a positive integer retains, a negative integer
/// deletes `abs(n)` characters, and a string inserts itself. This mirrors the heterogeneous
/// JSON array used on the wire (`ops: [int | string, ...]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum WireAtom {
    Number(i64),
    Text(String),
}

/// The JSON wire format of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationData {
    pub cid: i64,
    pub ops: Vec<serde_json::Value>,
    pub base: usize,
    pub target: usize,
}

impl From<&Operation> for OperationData {
    fn from(op: &Operation) -> Self {
        let ops = op
            .ops
            .iter()
            .map(|atom| {
                let wire = match atom {
                    Atom::Retain(n) => WireAtom::Number(*n as i64),
                    Atom::Delete(n) => WireAtom::Number(-(*n as i64)),
                    Atom::Insert(text) => WireAtom::Text(text.clone()),
                };
                serde_json::to_value(wire).expect("WireAtom always serializes")
            })
            .collect();
        Self {
            cid: op.client_id,
            ops,
            base: op.base_length,
            target: op.target_length,
        }
    }
}

impl From<Operation> for OperationData {
    fn from(op: Operation) -> Self {
        Self::from(&op)
    }
}

/// Reconstructs an [`Operation`] from its wire form via the same builder methods used
/// everywhere else, so the result is always in canonical form. Zero-valued integers are
/// dropped silently, matching an `Insert("")`/`Retain(0)`/`Delete(0)` no-op. Elements that are
/// neither an integer nor a string are rejected.
impl TryFrom<OperationData> for Operation {
    type Error = serde_json::Error;

    fn try_from(data: OperationData) -> Result<Self, Self::Error> {
        let mut op = Operation::new(data.cid);
        for value in data.ops {
            let atom: WireAtom = serde_json::from_value(value)?;
            match atom {
                WireAtom::Number(n) if n > 0 => {
                    op.retain(n as usize);
                }
                WireAtom::Number(n) if n < 0 => {
                    op.delete((-n) as usize);
                }
                WireAtom::Number(_) => {}
                WireAtom::Text(text) => {
                    op.insert(&text);
                }
            }
        }
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    mod builders {
        use super::*;

        #[test]
        fn merges_adjacent_retains() {
            let mut op = Operation::new(0);
            op.retain(3).retain(2);
            assert_eq!(op.ops(), &[Atom::Retain(5)]);
            assert_eq!(op.base_length(), 5);
            assert_eq!(op.target_length(), 5);
        }

        #[test]
        fn merges_adjacent_inserts() {
            let mut op = Operation::new(0);
            op.insert("hel").insert("lo");
            assert_eq!(op.ops(), &[Atom::Insert("hello".to_string())]);
            assert_eq!(op.target_length(), 5);
        }

        #[test]
        fn merges_adjacent_deletes() {
            let mut op = Operation::new(0);
            op.delete(2).delete(3);
            assert_eq!(op.ops(), &[Atom::Delete(5)]);
            assert_eq!(op.base_length(), 5);
        }

        #[test]
        fn insert_after_delete_is_reordered_before_it() {
            let mut op = Operation::new(0);
            op.delete(2).insert("x");
            assert_eq!(
                op.ops(),
                &[Atom::Insert("x".to_string()), Atom::Delete(2)]
            );
        }

        #[test]
        fn insert_after_delete_merges_into_existing_insert() {
            let mut op = Operation::new(0);
            op.insert("a").delete(2).insert("b");
            assert_eq!(
                op.ops(),
                &[Atom::Insert("ab".to_string()), Atom::Delete(2)]
            );
        }

        #[test]
        fn zero_length_atoms_are_no_ops() {
            let mut op = Operation::new(0);
            op.retain(0).insert("").delete(0);
            assert_eq!(op.ops(), &[] as &[Atom]);
        }

        #[test]
        fn is_noop_for_retain_only_operations() {
            let mut op = Operation::new(0);
            op.retain(5);
            assert!(op.is_noop());
            op.insert("x");
            assert!(!op.is_noop());
        }
    }

    mod apply {
        use super::*;

        #[test]
        fn retains_inserts_and_deletes() {
            let mut op = Operation::new(0);
            op.retain(2).insert("XY").delete(1).retain(2);
            assert_eq!(op.apply("hello").unwrap(), "heXYlo");
        }

        #[test]
        fn rejects_base_length_mismatch() {
            let mut op = Operation::new(0);
            op.retain(5);
            assert_eq!(
                op.apply("hi"),
                Err(OtError::BaseLengthMismatch {
                    expected: 5,
                    actual: 2
                })
            );
        }

        #[test]
        fn rejects_retain_overrun() {
            let mut op = Operation::new(0);
            op.ops.push(Atom::Retain(10));
            op.base_length = 5;
            assert_eq!(op.apply("hello"), Err(OtError::RetainOverrun));
        }

        #[test]
        fn counts_characters_not_bytes() {
            let mut op = Operation::new(0);
            op.retain(1).delete(1).retain(1);
            assert_eq!(op.apply("a\u{1F600}b").unwrap(), "ab");
        }
    }

    mod transform_convergence {
        use super::*;

        fn insert_at(client_id: i64, base_len: usize, pos: usize, text: &str) -> Operation {
            let mut op = Operation::new(client_id);
            op.retain(pos).insert(text).retain(base_len - pos);
            op
        }

        #[test]
        fn concurrent_inserts_at_same_position_converge() {
            let a = insert_at(1, 5, 2, "AA");
            let b = insert_at(2, 5, 2, "BB");

            let (a_prime, b_prime) = transform(&a, &b).unwrap();

            let via_a_first = a.apply("hello").unwrap();
            let via_a_first = b_prime.apply(&via_a_first).unwrap();

            let via_b_first = b.apply("hello").unwrap();
            let via_b_first = a_prime.apply(&via_b_first).unwrap();

            assert_eq!(via_a_first, via_b_first);
        }

        #[test]
        fn higher_client_id_insert_goes_first_on_tie() {
            let a = insert_at(5, 3, 1, "A");
            let b = insert_at(1, 3, 1, "B");

            let (_a_prime, b_prime) = transform(&a, &b).unwrap();
            let result = a.apply("xyz").unwrap();
            let result = b_prime.apply(&result).unwrap();
            assert_eq!(result, "xAByz");
        }

        #[test]
        fn delete_versus_insert_converge() {
            let mut delete_op = Operation::new(1);
            delete_op.retain(1).delete(2).retain(2);

            let mut insert_op = Operation::new(2);
            insert_op.retain(4).insert("Z").retain(1);

            let (delete_prime, insert_prime) = transform(&delete_op, &insert_op).unwrap();

            let via_delete_first = delete_op.apply("hello").unwrap();
            let via_delete_first = insert_prime.apply(&via_delete_first).unwrap();

            let via_insert_first = insert_op.apply("hello").unwrap();
            let via_insert_first = delete_prime.apply(&via_insert_first).unwrap();

            assert_eq!(via_delete_first, via_insert_first);
        }

        #[test]
        fn rejects_mismatched_base_lengths() {
            let mut a = Operation::new(0);
            a.retain(3);
            let mut b = Operation::new(0);
            b.retain(5);
            assert_eq!(
                transform(&a, &b),
                Err(OtError::TransformBaseMismatch { a: 3, b: 5 })
            );
        }
    }

    mod wire_format {
        use super::*;

        #[test]
        fn round_trips_through_json() {
            let mut op = Operation::new(7);
            op.retain(2).insert("hi").delete(3).retain(1);

            let data = OperationData::from(&op);
            let json = serde_json::to_string(&data).unwrap();
            let parsed: OperationData = serde_json::from_str(&json).unwrap();
            let restored = Operation::try_from(parsed).unwrap();

            assert_eq!(restored, op);
        }

        #[test]
        fn serializes_atoms_as_heterogeneous_array() {
            let mut op = Operation::new(1);
            op.retain(2).insert("hi").delete(3);
            let data = OperationData::from(&op);
            let json = serde_json::to_value(&data).unwrap();
            assert_eq!(json["ops"], serde_json::json!([2, "hi", -3]));
            assert_eq!(json["cid"], 1);
            assert_eq!(json["base"], 5);
            assert_eq!(json["target"], 4);
        }

        #[test]
        fn drops_zero_valued_atoms_silently() {
            let data = OperationData {
                cid: 0,
                ops: vec![serde_json::json!(0), serde_json::json!("")],
                base: 0,
                target: 0,
            };
            let op = Operation::try_from(data).unwrap();
            assert!(op.ops().is_empty());
        }

        #[test]
        fn rejects_atoms_that_are_neither_int_nor_string() {
            let data = OperationData {
                cid: 0,
                ops: vec![serde_json::json!(null)],
                base: 0,
                target: 0,
            };
            assert!(Operation::try_from(data).is_err());
        }
    }
}
