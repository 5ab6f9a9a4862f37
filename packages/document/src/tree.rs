//! # Document tree hooks
//!
//! The reconciliation engine never interprets document semantics; it only
//! addresses targets by path and invokes the hooks below. The trait is object
//! safe so node strategies can work on `&mut dyn DocumentTree`.

use crate::error::DocumentError;
use crate::path::OpPath;
use crate::shape::{CollectionItem, Placement, ShapeData};
use crate::text::{AttrChange, AttrTarget, TextRun};
use serde_json::Value;

pub type DocResult<T> = Result<T, DocumentError>;

pub trait DocumentTree {
    /// Whether `path` resolves to an existing target.
    fn has_target(&self, path: &OpPath) -> bool;

    // Scalar properties

    fn get_value(&self, path: &OpPath) -> DocResult<Option<Value>>;

    /// Assign (or clear) a scalar, returning the prior value.
    fn set_value(&mut self, path: &OpPath, value: Option<Value>) -> DocResult<Option<Value>>;

    // Named collections

    fn item(&self, path: &OpPath, item_id: &str) -> DocResult<Option<CollectionItem>>;

    /// Insert or relocate an item, returning its prior state.
    fn put_item(&mut self, path: &OpPath, item: CollectionItem) -> DocResult<Option<CollectionItem>>;

    /// Remove an item, returning it.
    fn take_item(&mut self, path: &OpPath, item_id: &str) -> DocResult<Option<CollectionItem>>;

    fn set_item_order(&mut self, path: &OpPath, item_id: &str, order: u64) -> DocResult<()>;

    // Shape hierarchy

    fn has_shape(&self, id: &str) -> bool;

    /// Materialize an inline subtree. Shapes that already exist are kept as
    /// they are. The imported root stays detached.
    fn import_shape(&mut self, data: &ShapeData) -> DocResult<()>;

    fn placement(&self, id: &str) -> Option<Placement>;

    /// Attach (or detach, with `None`) a shape, returning its prior placement.
    fn place_shape(&mut self, id: &str, placement: Option<Placement>) -> DocResult<Option<Placement>>;

    fn set_shape_order(&mut self, id: &str, order: u64) -> DocResult<()>;

    /// Whether `ancestor` is `id` itself or one of its ancestors.
    fn is_ancestor(&self, ancestor: &str, id: &str) -> bool;

    // Rich text

    fn text_len(&self, path: &OpPath) -> DocResult<usize>;

    fn text_insert(&mut self, path: &OpPath, start: usize, runs: &[TextRun]) -> DocResult<usize>;

    fn text_remove(&mut self, path: &OpPath, start: usize, len: usize) -> DocResult<(usize, Vec<TextRun>)>;

    fn text_format(
        &mut self,
        path: &OpPath,
        start: usize,
        len: usize,
        target: AttrTarget,
        key: &str,
        value: Option<&Value>,
    ) -> DocResult<Vec<AttrChange>>;
}
