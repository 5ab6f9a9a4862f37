//! # Vellum Document
//!
//! The vector document tree that the reconciliation engine edits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ editor: CmdRepo + per-path RepoNodes        │
//! └─────────────────────────────────────────────┘
//!                     ↓ DocumentTree hooks
//! ┌─────────────────────────────────────────────┐
//! │ document: shape arena + collections + text  │
//! │  - scalar properties (last writer wins)     │
//! │  - named collections ordered by slots       │
//! │  - shape hierarchy ordered by slots         │
//! │  - rich text with realized-effect records   │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ renderer / layout (read-only snapshots)     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The document never resolves conflicts. It only answers "what is at this
//! path" and applies the hooks it is asked to apply.

mod document;
mod error;
mod path;
mod position;
mod shape;
mod text;
mod tree;

pub use document::{Document, ROOT_ID, SHAPES_SELECTOR, TEXT_SELECTOR};
pub use error::DocumentError;
pub use path::{OpPath, PATH_SEPARATOR};
pub use position::{PositionKey, Slot, SPECULATIVE_ORDER};
pub use shape::{CollectionItem, PlacedShape, Placement, Shape, ShapeData, ShapeId, ShapeKind};
pub use text::{runs_len, AttrChange, AttrMap, AttrTarget, RichText, TextRun, PARAGRAPH_END};
pub use tree::{DocResult, DocumentTree};

// Re-export the value type used for properties and payloads
pub use serde_json::Value;
