//! # Document arena
//!
//! In-memory vector document: an arena of shapes indexed by id, with the
//! hierarchy expressed as parent placements and ordered child id lists.
//!
//! ## Lifecycle
//!
//! ```text
//! new/attach → hooks (via DocumentTree) → snapshot
//! ```
//!
//! Shapes are never dropped from the arena. Deleting a shape detaches it,
//! which keeps its subtree around for an exact undo.

use crate::error::DocumentError;
use crate::path::OpPath;
use crate::position::{PositionKey, Slot};
use crate::shape::{CollectionItem, PlacedShape, Placement, Shape, ShapeData, ShapeId, ShapeKind};
use crate::text::{AttrChange, AttrTarget, RichText, TextRun};
use crate::tree::{DocResult, DocumentTree};
use serde_json::Value;
use std::collections::BTreeMap;

/// Id of the document root shape.
pub const ROOT_ID: &str = "doc";

/// Selector addressing the text body of a shape.
pub const TEXT_SELECTOR: &str = "text";

/// Selector addressing the shape hierarchy below a shape.
pub const SHAPES_SELECTOR: &str = "shapes";

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    shapes: BTreeMap<ShapeId, Shape>,
}

impl Document {
    /// Create an empty document holding only the root.
    pub fn new() -> Self {
        let mut shapes = BTreeMap::new();
        shapes.insert(ROOT_ID.to_string(), Shape::new(ROOT_ID, ShapeKind::Document));
        Self { shapes }
    }

    /// Import `data` and attach it under `parent` with a committed slot.
    ///
    /// Used to seed identical initial content on every replica.
    pub fn attach(&mut self, data: &ShapeData, parent: &str, key: PositionKey) -> DocResult<()> {
        self.import_shape(data)?;
        self.place_shape(
            &data.id,
            Some(Placement {
                parent: parent.to_string(),
                slot: Slot::new(key, 0),
            }),
        )?;
        Ok(())
    }

    pub fn get_shape(&self, id: &str) -> Option<&Shape> {
        self.shapes.get(id)
    }

    /// Child ids of `id` in sibling order.
    pub fn children(&self, id: &str) -> Vec<ShapeId> {
        self.shapes
            .get(id)
            .map(|s| s.children.clone())
            .unwrap_or_default()
    }

    pub fn text(&self, id: &str) -> Option<&RichText> {
        self.shapes.get(id).and_then(|s| s.text.as_ref())
    }

    pub fn prop(&self, id: &str, field: &str) -> Option<&Value> {
        self.shapes.get(id).and_then(|s| s.props.get(field))
    }

    pub fn collection(&self, id: &str, name: &str) -> &[CollectionItem] {
        self.shapes
            .get(id)
            .and_then(|s| s.collections.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the shape is reachable from the root.
    pub fn is_attached(&self, id: &str) -> bool {
        self.is_ancestor(ROOT_ID, id)
    }

    /// Inline form of a shape and its current subtree.
    pub fn export_shape(&self, id: &str) -> Option<ShapeData> {
        let shape = self.shapes.get(id)?;
        let children = shape
            .children
            .iter()
            .filter_map(|child_id| {
                let child = self.shapes.get(child_id)?;
                let key = child.placement.as_ref()?.slot.key.clone();
                Some(PlacedShape {
                    key,
                    shape: self.export_shape(child_id)?,
                })
            })
            .collect();

        Some(ShapeData {
            id: shape.id.clone(),
            kind: shape.kind,
            name: shape.name.clone(),
            props: shape.props.clone(),
            collections: shape
                .collections
                .iter()
                .filter(|(_, items)| !items.is_empty())
                .map(|(name, items)| (name.clone(), items.clone()))
                .collect(),
            text: shape.text.clone(),
            children,
        })
    }

    /// Visible document state, suitable for comparing replicas.
    pub fn snapshot(&self) -> ShapeData {
        self.export_shape(ROOT_ID)
            .unwrap_or_else(|| ShapeData::new(ROOT_ID, ShapeKind::Document))
    }

    fn shape_at(&self, path: &OpPath) -> DocResult<&Shape> {
        let id = path
            .head()
            .ok_or_else(|| DocumentError::InvalidPath(path.key()))?;
        self.shapes
            .get(id)
            .ok_or_else(|| DocumentError::TargetNotFound(path.key()))
    }

    fn shape_at_mut(&mut self, path: &OpPath) -> DocResult<&mut Shape> {
        let id = path
            .head()
            .ok_or_else(|| DocumentError::InvalidPath(path.key()))?;
        self.shapes
            .get_mut(id)
            .ok_or_else(|| DocumentError::TargetNotFound(path.key()))
    }

    fn text_at_mut(&mut self, path: &OpPath) -> DocResult<&mut RichText> {
        if path.rest() != [TEXT_SELECTOR] {
            return Err(DocumentError::InvalidPath(path.key()));
        }
        let key = path.key();
        self.shape_at_mut(path)?
            .text
            .as_mut()
            .ok_or(DocumentError::NotText(key))
    }

    fn sort_children(&mut self, parent: &str) {
        let Some(parent_shape) = self.shapes.get(parent) else {
            return;
        };
        let mut keyed: Vec<(Slot, ShapeId)> = parent_shape
            .children
            .iter()
            .filter_map(|id| {
                let slot = self.shapes.get(id)?.placement.as_ref()?.slot.clone();
                Some((slot, id.clone()))
            })
            .collect();
        keyed.sort();
        if let Some(parent_shape) = self.shapes.get_mut(parent) {
            parent_shape.children = keyed.into_iter().map(|(_, id)| id).collect();
        }
    }

    fn import_subtree(&mut self, data: &ShapeData, placement: Option<Placement>) {
        if !self.shapes.contains_key(&data.id) {
            let mut shape = Shape::new(data.id.clone(), data.kind);
            shape.name = data.name.clone();
            shape.props = data.props.clone();
            shape.collections = data.collections.clone();
            for items in shape.collections.values_mut() {
                sort_items(items);
            }
            if data.text.is_some() {
                shape.text = data.text.clone();
            }
            shape.placement = placement.clone();
            self.shapes.insert(data.id.clone(), shape);
            tracing::debug!("[Document] Imported shape {} ({:?})", data.id, data.kind);

            if let Some(placement) = placement {
                if let Some(parent) = self.shapes.get_mut(&placement.parent) {
                    parent.children.push(data.id.clone());
                }
                self.sort_children(&placement.parent);
            }
        }

        for child in &data.children {
            self.import_subtree(
                &child.shape,
                Some(Placement {
                    parent: data.id.clone(),
                    slot: Slot::new(child.key.clone(), 0),
                }),
            );
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn field_key(path: &OpPath) -> DocResult<String> {
    if path.rest().is_empty() {
        return Err(DocumentError::InvalidPath(path.key()));
    }
    Ok(path.rest().join("."))
}

/// `[shape, collection, item, field...]` addresses a field of a collection
/// item. Such a path never falls back to a shape prop, so a write to an item
/// that is gone fails the same way on every replica.
fn item_field(path: &OpPath) -> Option<(&str, &str, String)> {
    match path.rest() {
        [collection, item_id, field @ ..] if !field.is_empty() => {
            Some((collection.as_str(), item_id.as_str(), field.join(".")))
        }
        _ => None,
    }
}

fn find_item<'a>(shape: &'a Shape, path: &OpPath, collection: &str, item_id: &str) -> DocResult<&'a CollectionItem> {
    shape
        .collections
        .get(collection)
        .and_then(|items| items.iter().find(|i| i.id == item_id))
        .ok_or_else(|| DocumentError::TargetNotFound(path.key()))
}

fn collection_name(path: &OpPath) -> DocResult<&str> {
    match path.rest() {
        [name] => Ok(name.as_str()),
        _ => Err(DocumentError::InvalidPath(path.key())),
    }
}

fn sort_items(items: &mut [CollectionItem]) {
    items.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.id.cmp(&b.id)));
}

impl DocumentTree for Document {
    fn has_target(&self, path: &OpPath) -> bool {
        let Ok(shape) = self.shape_at(path) else {
            return false;
        };
        match item_field(path) {
            Some((collection, item_id, _)) => find_item(shape, path, collection, item_id).is_ok(),
            None => true,
        }
    }

    fn get_value(&self, path: &OpPath) -> DocResult<Option<Value>> {
        let shape = self.shape_at(path)?;
        if let Some((collection, item_id, field)) = item_field(path) {
            let item = find_item(shape, path, collection, item_id)?;
            return Ok(item.data.get(&field).cloned());
        }
        let field = field_key(path)?;
        Ok(shape.props.get(&field).cloned())
    }

    fn set_value(&mut self, path: &OpPath, value: Option<Value>) -> DocResult<Option<Value>> {
        let key = path.key();
        let target = item_field(path);
        let shape = self.shape_at_mut(path)?;
        if let Some((collection, item_id, field)) = target {
            let item = shape
                .collections
                .get_mut(collection)
                .and_then(|items| items.iter_mut().find(|i| i.id == item_id))
                .ok_or_else(|| DocumentError::TargetNotFound(key.clone()))?;
            if !item.data.is_object() {
                item.data = Value::Object(Default::default());
            }
            let Some(fields) = item.data.as_object_mut() else {
                return Err(DocumentError::InvalidPath(key));
            };
            return Ok(match value {
                Some(v) => fields.insert(field, v),
                None => fields.remove(&field),
            });
        }
        let field = field_key(path)?;
        Ok(match value {
            Some(v) => shape.props.insert(field, v),
            None => shape.props.remove(&field),
        })
    }

    fn item(&self, path: &OpPath, item_id: &str) -> DocResult<Option<CollectionItem>> {
        let name = collection_name(path)?;
        Ok(self
            .shape_at(path)?
            .collections
            .get(name)
            .and_then(|items| items.iter().find(|i| i.id == item_id))
            .cloned())
    }

    fn put_item(&mut self, path: &OpPath, item: CollectionItem) -> DocResult<Option<CollectionItem>> {
        let name = collection_name(path)?.to_string();
        let items = self.shape_at_mut(path)?.collections.entry(name).or_default();
        let prior = items
            .iter()
            .position(|i| i.id == item.id)
            .map(|index| items.remove(index));
        items.push(item);
        sort_items(items);
        Ok(prior)
    }

    fn take_item(&mut self, path: &OpPath, item_id: &str) -> DocResult<Option<CollectionItem>> {
        let name = collection_name(path)?.to_string();
        let shape = self.shape_at_mut(path)?;
        let Some(items) = shape.collections.get_mut(&name) else {
            return Ok(None);
        };
        Ok(items
            .iter()
            .position(|i| i.id == item_id)
            .map(|index| items.remove(index)))
    }

    fn set_item_order(&mut self, path: &OpPath, item_id: &str, order: u64) -> DocResult<()> {
        let name = collection_name(path)?.to_string();
        let shape = self.shape_at_mut(path)?;
        if let Some(items) = shape.collections.get_mut(&name) {
            if let Some(item) = items.iter_mut().find(|i| i.id == item_id) {
                item.slot.order = order;
            }
            sort_items(items);
        }
        Ok(())
    }

    fn has_shape(&self, id: &str) -> bool {
        self.shapes.contains_key(id)
    }

    fn import_shape(&mut self, data: &ShapeData) -> DocResult<()> {
        self.import_subtree(data, None);
        Ok(())
    }

    fn placement(&self, id: &str) -> Option<Placement> {
        self.shapes.get(id).and_then(|s| s.placement.clone())
    }

    fn place_shape(&mut self, id: &str, placement: Option<Placement>) -> DocResult<Option<Placement>> {
        if !self.shapes.contains_key(id) {
            return Err(DocumentError::ShapeNotFound(id.to_string()));
        }
        if let Some(target) = &placement {
            if !self.shapes.contains_key(&target.parent) {
                return Err(DocumentError::ParentNotFound(target.parent.clone()));
            }
            if self.is_ancestor(id, &target.parent) {
                return Err(DocumentError::CycleDetected {
                    shape: id.to_string(),
                    parent: target.parent.clone(),
                });
            }
        }

        let prior = self
            .shapes
            .get_mut(id)
            .and_then(|shape| shape.placement.take());
        if let Some(old) = &prior {
            if let Some(parent) = self.shapes.get_mut(&old.parent) {
                parent.children.retain(|c| c != id);
            }
        }

        if let Some(target) = placement {
            let parent_id = target.parent.clone();
            if let Some(shape) = self.shapes.get_mut(id) {
                shape.placement = Some(target);
            }
            if let Some(parent) = self.shapes.get_mut(&parent_id) {
                parent.children.push(id.to_string());
            }
            self.sort_children(&parent_id);
        }

        Ok(prior)
    }

    fn set_shape_order(&mut self, id: &str, order: u64) -> DocResult<()> {
        let shape = self
            .shapes
            .get_mut(id)
            .ok_or_else(|| DocumentError::ShapeNotFound(id.to_string()))?;
        let Some(placement) = shape.placement.as_mut() else {
            return Ok(());
        };
        placement.slot.order = order;
        let parent = placement.parent.clone();
        self.sort_children(&parent);
        Ok(())
    }

    fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut current = Some(id);
        // parent chains are acyclic; the bound only guards against corruption
        for _ in 0..=self.shapes.len() {
            let Some(cur) = current else {
                return false;
            };
            if cur == ancestor {
                return true;
            }
            current = self.shapes.get(cur).and_then(|s| s.parent());
        }
        false
    }

    fn text_len(&self, path: &OpPath) -> DocResult<usize> {
        let key = path.key();
        self.shape_at(path)?
            .text
            .as_ref()
            .map(RichText::len)
            .ok_or(DocumentError::NotText(key))
    }

    fn text_insert(&mut self, path: &OpPath, start: usize, runs: &[TextRun]) -> DocResult<usize> {
        Ok(self.text_at_mut(path)?.insert(start, runs))
    }

    fn text_remove(&mut self, path: &OpPath, start: usize, len: usize) -> DocResult<(usize, Vec<TextRun>)> {
        Ok(self.text_at_mut(path)?.remove(start, len))
    }

    fn text_format(
        &mut self,
        path: &OpPath,
        start: usize,
        len: usize,
        target: AttrTarget,
        key: &str,
        value: Option<&Value>,
    ) -> DocResult<Vec<AttrChange>> {
        Ok(self.text_at_mut(path)?.format(start, len, target, key, value))
    }
}
