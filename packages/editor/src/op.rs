//! # Ops
//!
//! The atomic unit of change. An op addresses one document-tree location by
//! path and carries a payload whose variant decides which node strategy owns
//! it.
//!
//! ## Op semantics
//!
//! ### IdSet
//! - Scalar assignment, last writer (in server order) wins
//! - `None` clears the value
//!
//! ### CrdtArray
//! - Relocates an item of a named collection by stable id
//! - `to = None` removes the item, `data` inlines it the first time it is seen
//!
//! ### CrdtTree
//! - Reparents/reorders a shape, `to = None` detaches it
//! - `data` inlines a subtree the first time the shape is seen
//! - Never creates a cycle
//!
//! ### Text
//! - A sequence of positional primitives, transformed against concurrent
//!   edits before being applied

use serde::{Deserialize, Serialize};
use vellum_document::{
    runs_len, AttrTarget, OpPath, PositionKey, ShapeData, ShapeId, TextRun, Value, ROOT_ID, SHAPES_SELECTOR,
};

pub type OpId = String;

/// Node strategy an op (or registry node) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Intermediate registry nodes only.
    None,
    IdSet,
    CrdtArray,
    CrdtTree,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMove {
    pub item: String,
    #[serde(default)]
    pub to: Option<PositionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSlot {
    pub parent: ShapeId,
    pub key: PositionKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeMove {
    pub shape: ShapeId,
    #[serde(default)]
    pub to: Option<TreeSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ShapeData>,
}

/// Positional text primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TextOp {
    Insert {
        start: usize,
        runs: Vec<TextRun>,
    },
    Remove {
        start: usize,
        len: usize,
    },
    Attr {
        start: usize,
        len: usize,
        target: AttrTarget,
        key: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

impl TextOp {
    pub fn insert(start: usize, text: &str) -> Self {
        TextOp::Insert {
            start,
            runs: vec![TextRun::plain(text)],
        }
    }

    pub fn remove(start: usize, len: usize) -> Self {
        TextOp::Remove { start, len }
    }

    pub fn span_attr(start: usize, len: usize, key: &str, value: Option<Value>) -> Self {
        TextOp::Attr {
            start,
            len,
            target: AttrTarget::Span,
            key: key.to_string(),
            value,
        }
    }

    pub fn para_attr(start: usize, len: usize, key: &str, value: Option<Value>) -> Self {
        TextOp::Attr {
            start,
            len,
            target: AttrTarget::Para,
            key: key.to_string(),
            value,
        }
    }

    pub fn start(&self) -> usize {
        match self {
            TextOp::Insert { start, .. } | TextOp::Remove { start, .. } | TextOp::Attr { start, .. } => {
                *start
            }
        }
    }

    /// Characters inserted, removed or formatted.
    pub fn len(&self) -> usize {
        match self {
            TextOp::Insert { runs, .. } => runs_len(runs),
            TextOp::Remove { len, .. } | TextOp::Attr { len, .. } => *len,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OpPayload {
    IdSet {
        #[serde(default)]
        value: Option<Value>,
    },
    CrdtArray(ArrayMove),
    CrdtTree(TreeMove),
    Text(Vec<TextOp>),
}

impl OpPayload {
    pub fn kind(&self) -> OpKind {
        match self {
            OpPayload::IdSet { .. } => OpKind::IdSet,
            OpPayload::CrdtArray(_) => OpKind::CrdtArray,
            OpPayload::CrdtTree(_) => OpKind::CrdtTree,
            OpPayload::Text(_) => OpKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub id: OpId,
    pub path: OpPath,
    /// Server version of the owning command, `None` while speculative.
    #[serde(default)]
    pub order: Option<u64>,
    pub payload: OpPayload,
}

impl Op {
    pub fn new(id: impl Into<OpId>, path: OpPath, payload: OpPayload) -> Self {
        Self {
            id: id.into(),
            path,
            order: None,
            payload,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.payload.kind()
    }

    /// Path of the node that reconciles this op. There is one shape
    /// hierarchy, so every tree move lands on the same node whichever
    /// `[page, "shapes"]` path it was addressed through.
    pub fn node_path(&self) -> OpPath {
        match self.payload {
            OpPayload::CrdtTree(_) => hierarchy_path(),
            _ => self.path.clone(),
        }
    }

    /// Text primitives of a text op (empty for other kinds).
    pub fn text_ops(&self) -> &[TextOp] {
        match &self.payload {
            OpPayload::Text(ops) => ops,
            _ => &[],
        }
    }
}

/// Path of the node owning the whole shape hierarchy.
pub fn hierarchy_path() -> OpPath {
    OpPath::new([ROOT_ID, SHAPES_SELECTOR])
}
