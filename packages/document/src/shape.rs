use crate::position::{PositionKey, Slot};
use crate::text::RichText;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type ShapeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Document,
    Page,
    Group,
    Frame,
    Rect,
    Ellipse,
    Path,
    Text,
    Image,
}

/// Where a shape sits in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub parent: ShapeId,
    pub slot: Slot,
}

/// An element of a named collection (fills, borders, shadows, pages ...).
///
/// The id is stable across moves; only the slot changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionItem {
    pub id: String,
    pub slot: Slot,
    #[serde(default)]
    pub data: Value,
}

/// A shape stored in the document arena.
///
/// Parent/child relations are ids resolved through the arena, never owned
/// references. A shape without a placement is detached: it is not part of the
/// visible tree but keeps its subtree so that it can be re-attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub id: ShapeId,
    pub kind: ShapeKind,
    pub name: String,
    pub placement: Option<Placement>,
    /// Child ids ordered by `(slot, id)`.
    pub children: Vec<ShapeId>,
    pub props: BTreeMap<String, Value>,
    pub collections: BTreeMap<String, Vec<CollectionItem>>,
    pub text: Option<RichText>,
}

impl Shape {
    pub fn new(id: impl Into<ShapeId>, kind: ShapeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: String::new(),
            placement: None,
            children: Vec::new(),
            props: BTreeMap::new(),
            collections: BTreeMap::new(),
            text: if kind == ShapeKind::Text {
                Some(RichText::new())
            } else {
                None
            },
        }
    }

    pub fn parent(&self) -> Option<&str> {
        self.placement.as_ref().map(|p| p.parent.as_str())
    }
}

/// Inline, serializable form of a shape subtree.
///
/// Carried by tree-move ops that create shapes, and used for snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeData {
    pub id: ShapeId,
    pub kind: ShapeKind,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub collections: BTreeMap<String, Vec<CollectionItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<RichText>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlacedShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedShape {
    pub key: PositionKey,
    pub shape: ShapeData,
}

impl ShapeData {
    pub fn new(id: impl Into<ShapeId>, kind: ShapeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: String::new(),
            props: BTreeMap::new(),
            collections: BTreeMap::new(),
            text: if kind == ShapeKind::Text {
                Some(RichText::new())
            } else {
                None
            },
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    pub fn with_text(mut self, text: RichText) -> Self {
        self.text = Some(text);
        self
    }

    pub fn with_child(mut self, key: PositionKey, shape: ShapeData) -> Self {
        self.children.push(PlacedShape { key, shape });
        self
    }
}
