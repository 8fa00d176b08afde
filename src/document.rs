//! The document type synchronized by the core.
//!
//! No schema is imposed here: a `Document` is any JSON value a room's clients agree to
//! exchange. Structure (objects, arrays, scalars) only matters to [`crate::diff`].

use serde_json::Value;

/// An arbitrary JSON-typed document. The core never inspects the shape beyond what
/// [`crate::diff::DiffEngine`] needs to compute and apply deltas.
pub type Document = Value;

/// A value-independent copy of a document.
///
/// `serde_json::Value::clone` already performs a deep copy (it owns all of its data),
/// so this exists mainly to give the operation a name and make call sites
/// self-documenting.
pub fn deep_copy(doc: &Document) -> Document {
    doc.clone()
}
