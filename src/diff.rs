//! Structural diff/patch over JSON documents with identity-tracked array elements.
//!
//! Object and array structure is diffed recursively; string leaves get a compact
//! char-level diff via `similar`; everything else that differs is replaced wholesale.
//! Array elements are matched by [`object_hash`] rather than by position, so
//! reordering or inserting into the middle of an array doesn't blow away every
//! element after the change.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::{ChangeTag, TextDiff};

use crate::document::Document;

/// A single character-level change within a string leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextOp {
    Equal(String),
    Delete(String),
    Insert(String),
}

/// Per-key changes to a JSON object: keys present in `set` are inserted or
/// recursively patched, keys in `removed` are deleted. A key never appears in both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ObjectDelta {
    pub set: BTreeMap<String, Delta>,
    pub removed: BTreeSet<String>,
}

/// One step of an array edit script, in the order needed to rebuild the target
/// array from the source array left to right. `Keep` and `Update` each consume one
/// source element; `Remove` consumes one source element and emits nothing; `Insert`
/// consumes no source element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayOp {
    Keep,
    Remove,
    Insert(Value),
    Update(Box<Delta>),
}

/// A structural delta between two JSON documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    /// `a` and `b` are structurally equal.
    Empty,
    /// Wholesale replacement, used for scalar changes, type changes, and new object keys.
    Set(Value),
    /// Char-level diff between two string leaves.
    Text(Vec<TextOp>),
    /// Recursive diff over a JSON object's keys.
    Object(ObjectDelta),
    /// Identity-tracked edit script over a JSON array.
    Array(Vec<ArrayOp>),
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        matches!(self, Delta::Empty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchError {
    /// The document being patched isn't shaped the way the delta expects
    /// (e.g. an `Object` delta applied to a non-object document).
    TypeMismatch,
    /// An `Array` delta's `Keep`/`Update` step ran past the end of the source array.
    InvalidPosition,
    /// A delta references an object key that doesn't exist and isn't a `Set`
    /// (can only happen with a hand-constructed or corrupted delta from the wire).
    InvalidEdit,
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::TypeMismatch => write!(f, "document shape does not match delta"),
            PatchError::InvalidPosition => write!(f, "array delta references an out-of-range element"),
            PatchError::InvalidEdit => write!(f, "delta references a missing key with no replacement value"),
        }
    }
}

impl std::error::Error for PatchError {}

/// Returns the identity key used to match an array element across two documents.
///
/// An object's `id` field wins, then `_id`, then a canonical serialization of the
/// whole value. Because `serde_json::Value`'s default (non-`preserve_order`) map
/// representation sorts keys, `serde_json::to_string` of a `Value` is already
/// canonical.
pub fn object_hash(value: &Value) -> String {
    if let Value::Object(map) = value {
        if let Some(id) = map.get("id") {
            return canonical(id);
        }
        if let Some(id) = map.get("_id") {
            return canonical(id);
        }
    }
    canonical(value)
}

fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

type HashFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Diff/patch engine, configured at construction with an array-identity hash function.
#[derive(Clone)]
pub struct DiffEngine {
    object_hash: HashFn,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    pub fn new() -> Self {
        Self {
            object_hash: Arc::new(object_hash),
        }
    }

    /// Construct an engine with a custom array-element identity function.
    pub fn with_object_hash(f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        Self {
            object_hash: Arc::new(f),
        }
    }

    pub fn deep_copy(&self, doc: &Document) -> Document {
        crate::document::deep_copy(doc)
    }

    /// Computes a delta such that `patch(a, diff(a, b)) == b`.
    pub fn diff(&self, a: &Value, b: &Value) -> Delta {
        if a == b {
            return Delta::Empty;
        }
        match (a, b) {
            (Value::Object(ma), Value::Object(mb)) => self.diff_object(ma, mb),
            (Value::Array(va), Value::Array(vb)) => self.diff_array(va, vb),
            (Value::String(sa), Value::String(sb)) => Delta::Text(diff_text(sa, sb)),
            _ => Delta::Set(b.clone()),
        }
    }

    fn diff_object(&self, a: &Map<String, Value>, b: &Map<String, Value>) -> Delta {
        let mut set = BTreeMap::new();
        let mut removed = BTreeSet::new();

        for (key, a_value) in a {
            match b.get(key) {
                Some(b_value) => {
                    let d = self.diff(a_value, b_value);
                    if !d.is_empty() {
                        set.insert(key.clone(), d);
                    }
                }
                None => {
                    removed.insert(key.clone());
                }
            }
        }
        for (key, b_value) in b {
            if !a.contains_key(key) {
                set.insert(key.clone(), Delta::Set(b_value.clone()));
            }
        }

        if set.is_empty() && removed.is_empty() {
            Delta::Empty
        } else {
            Delta::Object(ObjectDelta { set, removed })
        }
    }

    fn diff_array(&self, a: &[Value], b: &[Value]) -> Delta {
        let ha: Vec<String> = a.iter().map(|v| (self.object_hash)(v)).collect();
        let hb: Vec<String> = b.iter().map(|v| (self.object_hash)(v)).collect();
        let matched = lcs_pairs(&ha, &hb);

        let mut ops = Vec::new();
        let mut changed = false;
        let (mut ai, mut bi) = (0usize, 0usize);

        for (mai, mbi) in matched {
            while ai < mai {
                ops.push(ArrayOp::Remove);
                changed = true;
                ai += 1;
            }
            while bi < mbi {
                ops.push(ArrayOp::Insert(b[bi].clone()));
                changed = true;
                bi += 1;
            }
            let d = self.diff(&a[ai], &b[bi]);
            if d.is_empty() {
                ops.push(ArrayOp::Keep);
            } else {
                ops.push(ArrayOp::Update(Box::new(d)));
                changed = true;
            }
            ai += 1;
            bi += 1;
        }
        while ai < a.len() {
            ops.push(ArrayOp::Remove);
            changed = true;
            ai += 1;
        }
        while bi < b.len() {
            ops.push(ArrayOp::Insert(b[bi].clone()));
            changed = true;
            bi += 1;
        }

        if changed {
            Delta::Array(ops)
        } else {
            Delta::Empty
        }
    }

    /// Applies `delta` to `doc`, returning the patched document. Never mutates `delta`,
    /// so the same delta reference can be replayed against more than one document
    /// (the shadow copy and the server copy) without re-diffing.
    pub fn patch(&self, doc: &Document, delta: &Delta) -> Result<Document, PatchError> {
        match delta {
            Delta::Empty => Ok(doc.clone()),
            Delta::Set(value) => Ok(value.clone()),
            Delta::Text(ops) => {
                if !doc.is_string() {
                    return Err(PatchError::TypeMismatch);
                }
                Ok(Value::String(apply_text_ops(ops)))
            }
            Delta::Object(od) => {
                let map = doc.as_object().ok_or(PatchError::TypeMismatch)?;
                let mut result = map.clone();
                for key in &od.removed {
                    result.remove(key);
                }
                for (key, d) in &od.set {
                    match result.get(key) {
                        Some(existing) => {
                            let patched = self.patch(existing, d)?;
                            result.insert(key.clone(), patched);
                        }
                        None => match d {
                            Delta::Set(value) => {
                                result.insert(key.clone(), value.clone());
                            }
                            _ => return Err(PatchError::InvalidEdit),
                        },
                    }
                }
                Ok(Value::Object(result))
            }
            Delta::Array(ops) => {
                let arr = doc.as_array().ok_or(PatchError::TypeMismatch)?;
                let mut result = Vec::with_capacity(ops.len());
                let mut i = 0usize;
                for op in ops {
                    match op {
                        ArrayOp::Keep => {
                            result.push(arr.get(i).cloned().ok_or(PatchError::InvalidPosition)?);
                            i += 1;
                        }
                        ArrayOp::Remove => {
                            if i >= arr.len() {
                                return Err(PatchError::InvalidPosition);
                            }
                            i += 1;
                        }
                        ArrayOp::Insert(value) => {
                            result.push(value.clone());
                        }
                        ArrayOp::Update(d) => {
                            let base = arr.get(i).ok_or(PatchError::InvalidPosition)?;
                            result.push(self.patch(base, d)?);
                            i += 1;
                        }
                    }
                }
                Ok(Value::Array(result))
            }
        }
    }
}

/// Longest-common-subsequence alignment between two hash sequences, returning
/// matched `(index_in_a, index_in_b)` pairs in increasing order of both indices.
fn lcs_pairs(ha: &[String], hb: &[String]) -> Vec<(usize, usize)> {
    let n = ha.len();
    let m = hb.len();
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if ha[i] == hb[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if ha[i] == hb[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

fn diff_text(a: &str, b: &str) -> Vec<TextOp> {
    let text_diff = TextDiff::from_chars(a, b);
    let mut ops: Vec<TextOp> = Vec::new();
    for change in text_diff.iter_all_changes() {
        let value = change.value().to_string();
        match (change.tag(), ops.last_mut()) {
            (ChangeTag::Equal, Some(TextOp::Equal(s))) => s.push_str(&value),
            (ChangeTag::Delete, Some(TextOp::Delete(s))) => s.push_str(&value),
            (ChangeTag::Insert, Some(TextOp::Insert(s))) => s.push_str(&value),
            (ChangeTag::Equal, _) => ops.push(TextOp::Equal(value)),
            (ChangeTag::Delete, _) => ops.push(TextOp::Delete(value)),
            (ChangeTag::Insert, _) => ops.push(TextOp::Insert(value)),
        }
    }
    ops
}

fn apply_text_ops(ops: &[TextOp]) -> String {
    let mut out = String::new();
    for op in ops {
        match op {
            TextOp::Equal(s) | TextOp::Insert(s) => out.push_str(s),
            TextOp::Delete(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_of_equal_values_is_empty() {
        let engine = DiffEngine::new();
        let a = json!({"text": "hello", "n": 1});
        assert!(engine.diff(&a, &a).is_empty());
    }

    #[test]
    fn scalar_round_trip() {
        let engine = DiffEngine::new();
        let a = json!(1);
        let b = json!(2);
        let delta = engine.diff(&a, &b);
        assert_eq!(engine.patch(&a, &delta).unwrap(), b);
    }

    #[test]
    fn string_round_trip() {
        let engine = DiffEngine::new();
        let a = json!("hello world");
        let b = json!("hello beautiful world");
        let delta = engine.diff(&a, &b);
        assert!(matches!(delta, Delta::Text(_)));
        assert_eq!(engine.patch(&a, &delta).unwrap(), b);
    }

    #[test]
    fn object_round_trip_add_remove_change() {
        let engine = DiffEngine::new();
        let a = json!({"text": "hello", "keep": true, "drop_me": 1});
        let b = json!({"text": "hello world", "keep": true, "added": "new"});
        let delta = engine.diff(&a, &b);
        assert_eq!(engine.patch(&a, &delta).unwrap(), b);
    }

    #[test]
    fn array_identity_tracks_reorder_and_insert() {
        let engine = DiffEngine::new();
        let a = json!([
            {"id": 1, "text": "one"},
            {"id": 2, "text": "two"},
            {"id": 3, "text": "three"},
        ]);
        let b = json!([
            {"id": 1, "text": "one"},
            {"id": 4, "text": "four"},
            {"id": 2, "text": "two, modified"},
            {"id": 3, "text": "three"},
        ]);
        let delta = engine.diff(&a, &b);
        assert_eq!(engine.patch(&a, &delta).unwrap(), b);

        if let Delta::Array(ops) = &delta {
            let inserts = ops.iter().filter(|o| matches!(o, ArrayOp::Insert(_))).count();
            let removes = ops.iter().filter(|o| matches!(o, ArrayOp::Remove)).count();
            assert_eq!(inserts, 1);
            assert_eq!(removes, 0);
        } else {
            panic!("expected an array delta");
        }
    }

    #[test]
    fn array_element_removed_by_identity() {
        let engine = DiffEngine::new();
        let a = json!([{"id": 1}, {"id": 2}, {"id": 3}]);
        let b = json!([{"id": 1}, {"id": 3}]);
        let delta = engine.diff(&a, &b);
        assert_eq!(engine.patch(&a, &delta).unwrap(), b);
    }

    #[test]
    fn identical_arrays_diff_to_empty() {
        let engine = DiffEngine::new();
        let a = json!([1, 2, 3]);
        let b = json!([1, 2, 3]);
        assert!(engine.diff(&a, &b).is_empty());
    }

    #[test]
    fn object_hash_prefers_id_then_underscore_id_then_canonical() {
        assert_eq!(object_hash(&json!({"id": 5, "x": 1})), object_hash(&json!({"id": 5, "x": 2})));
        assert_ne!(
            object_hash(&json!({"_id": "a", "x": 1})),
            object_hash(&json!({"_id": "b", "x": 1}))
        );
        assert_eq!(object_hash(&json!({"x": 1})), object_hash(&json!({"x": 1})));
    }

    proptest::proptest! {
        #[test]
        fn round_trip_arbitrary_json(a in arb_json(3), b in arb_json(3)) {
            let engine = DiffEngine::new();
            let delta = engine.diff(&a, &b);
            let patched = engine.patch(&a, &delta).unwrap();
            proptest::prop_assert_eq!(patched, b);
        }

        #[test]
        fn diff_of_self_is_always_empty(v in arb_json(3)) {
            let engine = DiffEngine::new();
            proptest::prop_assert!(engine.diff(&v, &v).is_empty());
        }
    }

    fn arb_json(depth: u32) -> impl proptest::strategy::Strategy<Value = Value> {
        use proptest::prelude::*;
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (0i32..100).prop_map(|n| json!(n)),
            "[a-z]{0,5}".prop_map(Value::String),
        ];
        leaf.prop_recursive(depth, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }
}
