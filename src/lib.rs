//! A red-black-tree-backed piece table for editable text buffers.
//!
//! The buffer holds an ordered sequence of immutable "original" chunks plus
//! one append-only mutable buffer, and represents the document as a tree of
//! [`piece::Piece`]s (contiguous slices of one buffer or the other). Edits
//! never rewrite existing bytes: `insert` appends new text and splices a
//! piece referencing it into the tree; `delete` retracts or splits the
//! pieces it touches. The tree is augmented (`size_left`, `lf_left`) so byte
//! offset and line/column queries both run in O(log N) rather than O(N).
//!
//! Start at [`piece_tree::PieceTree`], the orchestrator that ties the rest
//! of the modules together.

pub mod buffer_store;
pub mod eol;
pub mod error;
pub mod line_starts;
pub mod piece;
pub mod piece_tree;
pub mod rb_tree;
pub mod search_cache;
pub mod snapshot;

pub use eol::Eol;
pub use error::BufferError;
pub use piece_tree::{PieceTree, Position};
pub use snapshot::Snapshot;
