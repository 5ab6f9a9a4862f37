//! Shape hierarchy: reparent and reorder by shape id. Detaching keeps the
//! shape in the arena so any later undo can reattach it exactly.

use super::crdt::Strategy;
use super::Entry;
use crate::errors::RepoResult;
use crate::op::{Op, OpKind, OpPayload, TreeMove, TreeSlot};
use vellum_document::{DocumentError, DocumentTree, OpPath, Placement, Slot, ROOT_ID};

#[derive(Debug)]
pub(crate) struct TreeStrategy;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TreeRecord {
    Skipped,
    Moved { prior: Option<Placement> },
}

fn move_of(op: &Op) -> Option<&TreeMove> {
    match &op.payload {
        OpPayload::CrdtTree(mv) => Some(mv),
        _ => None,
    }
}

/// A move addressed through `[page, "shapes"]` stays inside that page.
fn check_scope(doc: &dyn DocumentTree, op: &Op, mv: &TreeMove) -> Result<(), DocumentError> {
    let Some(scope) = op.path.head().filter(|head| *head != ROOT_ID) else {
        return Ok(());
    };
    let placed_outside = doc
        .placement(&mv.shape)
        .map(|_| !doc.is_ancestor(scope, &mv.shape))
        .unwrap_or(false);
    let target_outside = mv
        .to
        .as_ref()
        .map(|to| !doc.is_ancestor(scope, &to.parent))
        .unwrap_or(false);
    if placed_outside || target_outside {
        return Err(DocumentError::OutsideScope {
            shape: mv.shape.clone(),
            parent: mv.to.as_ref().map(|to| to.parent.clone()).unwrap_or_default(),
            scope: scope.to_string(),
        });
    }
    Ok(())
}

impl Strategy for TreeStrategy {
    type Record = TreeRecord;

    const KIND: OpKind = OpKind::CrdtTree;

    fn apply(doc: &mut dyn DocumentTree, _path: &OpPath, op: &Op, order: u64) -> Result<TreeRecord, DocumentError> {
        let Some(mv) = move_of(op) else {
            return Ok(TreeRecord::Skipped);
        };
        check_scope(doc, op, mv)?;
        if !doc.has_shape(&mv.shape) {
            match &mv.data {
                Some(data) => doc.import_shape(data)?,
                None => return Err(DocumentError::ShapeNotFound(mv.shape.clone())),
            }
        }
        let placement = mv.to.as_ref().map(|to| Placement {
            parent: to.parent.clone(),
            slot: Slot::new(to.key.clone(), order),
        });
        let prior = doc.place_shape(&mv.shape, placement)?;
        Ok(TreeRecord::Moved { prior })
    }

    fn revert(doc: &mut dyn DocumentTree, _path: &OpPath, op: &Op, record: &TreeRecord) -> Result<(), DocumentError> {
        if let (Some(mv), TreeRecord::Moved { prior }) = (move_of(op), record) {
            doc.place_shape(&mv.shape, prior.clone())?;
        }
        Ok(())
    }

    fn skipped() -> TreeRecord {
        TreeRecord::Skipped
    }

    fn is_effective(record: &TreeRecord) -> bool {
        matches!(record, TreeRecord::Moved { .. })
    }

    fn target(op: &Op) -> &str {
        move_of(op).map(|mv| mv.shape.as_str()).unwrap_or_default()
    }

    fn invert(op: &Op, record: &TreeRecord) -> Option<OpPayload> {
        let (mv, TreeRecord::Moved { prior }) = (move_of(op)?, record) else {
            return None;
        };
        Some(OpPayload::CrdtTree(TreeMove {
            shape: mv.shape.clone(),
            to: prior.as_ref().map(|placement| TreeSlot {
                parent: placement.parent.clone(),
                key: placement.slot.key.clone(),
            }),
            data: None,
        }))
    }

    fn settle(
        doc: &mut dyn DocumentTree,
        _path: &OpPath,
        entry: &Entry<TreeRecord>,
        version: u64,
        later: &mut [&mut Entry<TreeRecord>],
    ) -> RepoResult<()> {
        let (Some(mv), Some(TreeRecord::Moved { .. })) = (move_of(&entry.op), &entry.record) else {
            return Ok(());
        };
        if mv.to.is_none() {
            return Ok(());
        }

        for next in later.iter_mut() {
            if move_of(&next.op).map(|m| m.shape != mv.shape).unwrap_or(true) {
                continue;
            }
            if let Some(TreeRecord::Moved { prior }) = &mut next.record {
                if let Some(placement) = prior {
                    placement.slot.order = version;
                }
                return Ok(());
            }
        }
        doc.set_shape_order(&mv.shape, version)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cmd::Cmd;
    use crate::errors::RepoError;
    use crate::node::{build_node, Incoming, RepoNode};
    use crate::op::{Op, OpKind, OpPayload, TreeMove, TreeSlot};
    use vellum_document::{
        Document, DocumentError, DocumentTree, OpPath, PositionKey, ShapeData, ShapeKind, ROOT_ID,
    };

    fn shapes() -> OpPath {
        OpPath::new(["page", "shapes"])
    }

    fn doc() -> Document {
        let mut doc = Document::new();
        let page = ShapeData::new("page", ShapeKind::Page)
            .with_child(PositionKey::from_digits(vec![10]), ShapeData::new("a", ShapeKind::Frame))
            .with_child(PositionKey::from_digits(vec![20]), ShapeData::new("b", ShapeKind::Frame));
        doc.attach(&page, ROOT_ID, PositionKey::first()).unwrap();
        doc
    }

    fn mv(id: &str, shape: &str, parent: Option<&str>, key: u16) -> Op {
        Op::new(
            id,
            shapes(),
            OpPayload::CrdtTree(TreeMove {
                shape: shape.to_string(),
                to: parent.map(|p| TreeSlot {
                    parent: p.to_string(),
                    key: PositionKey::from_digits(vec![key]),
                }),
                data: None,
            }),
        )
    }

    fn remote(id: &str, version: u64, op: Op) -> Cmd {
        let mut cmd = Cmd::new(id, "bob", vec![op]);
        cmd.version = Some(version);
        cmd
    }

    #[test]
    fn test_local_cycle_is_rejected() {
        let mut doc = doc();
        let mut node = build_node(&shapes(), OpKind::CrdtTree).unwrap();
        node.apply_local(&mut doc, "me-1", "me", &[mv("me-2", "a", Some("b"), 1)])
            .unwrap();

        let err = node
            .apply_local(&mut doc, "me-3", "me", &[mv("me-4", "b", Some("a"), 1)])
            .unwrap_err();
        assert!(matches!(err, RepoError::Document(DocumentError::CycleDetected { .. })));
        assert_eq!(node.local_len(), 1);
    }

    #[test]
    fn test_concurrent_cross_moves_demote_the_later_one() {
        let mut doc = doc();
        let mut node = build_node(&shapes(), OpKind::CrdtTree).unwrap();
        // local: a under b, remote (earlier in server order): b under a
        node.apply_local(&mut doc, "me-1", "me", &[mv("me-2", "a", Some("b"), 1)])
            .unwrap();

        let cmd = remote("bob-1", 1, mv("o1", "b", Some("a"), 1));
        node.receive(&mut doc, &[Incoming { cmd: &cmd, op: &cmd.ops[0] }]).unwrap();

        assert_eq!(doc.children("a"), vec!["b"]);
        assert_eq!(doc.placement("a").unwrap().parent, "page");
        assert!(doc.is_attached("b"));
    }

    #[test]
    fn test_inline_import_then_delete_keeps_arena() {
        let mut doc = doc();
        let mut node = build_node(&shapes(), OpKind::CrdtTree).unwrap();
        let mut create = mv("me-2", "c", Some("page"), 30);
        if let OpPayload::CrdtTree(tree_move) = &mut create.payload {
            tree_move.data = Some(ShapeData::new("c", ShapeKind::Ellipse));
        }
        node.apply_local(&mut doc, "me-1", "me", &[create]).unwrap();
        assert_eq!(doc.children("page"), vec!["a", "b", "c"]);

        node.apply_local(&mut doc, "me-3", "me", &[mv("me-4", "c", None, 0)]).unwrap();
        assert!(doc.has_shape("c"));
        assert!(!doc.is_attached("c"));

        node.undo_local(&mut doc, "me-3", true).unwrap();
        assert_eq!(doc.children("page"), vec!["a", "b", "c"]);
        node.redo_local(&mut doc, "me-3").unwrap();
        assert_eq!(doc.children("page"), vec!["a", "b"]);
    }

    #[test]
    fn test_same_slot_siblings_settle_by_version() {
        let mut doc = doc();
        let mut node = build_node(&shapes(), OpKind::CrdtTree).unwrap();
        node.apply_local(&mut doc, "me-1", "me", &[mv("me-2", "a", Some("page"), 50)])
            .unwrap();
        let cmd = remote("bob-1", 1, mv("o1", "b", Some("page"), 50));
        node.receive(&mut doc, &[Incoming { cmd: &cmd, op: &cmd.ops[0] }]).unwrap();
        assert_eq!(doc.children("page"), vec!["b", "a"]);

        let mut echo = Cmd::new("me-1", "me", vec![mv("me-2", "a", Some("page"), 50)]);
        echo.version = Some(2);
        node.commit(&mut doc, &echo, &[&echo.ops[0]]).unwrap();
        assert_eq!(doc.children("page"), vec!["b", "a"]);
        assert_eq!(doc.placement("a").unwrap().slot.order, 2);
    }

    #[test]
    fn test_page_addressed_moves_stay_on_the_page() {
        let mut doc = doc();
        let hierarchy = OpPath::new([ROOT_ID, "shapes"]);
        let mut node = build_node(&hierarchy, OpKind::CrdtTree).unwrap();

        let err = node
            .apply_local(&mut doc, "me-1", "me", &[mv("me-2", "a", Some(ROOT_ID), 5)])
            .unwrap_err();
        assert!(matches!(err, RepoError::Document(DocumentError::OutsideScope { .. })));

        // through the root path the page can be left, after which the page
        // path no longer reaches the shape
        let mut escape = mv("o1", "a", Some(ROOT_ID), 5);
        escape.path = hierarchy;
        let left = remote("bob-1", 1, escape);
        let back = remote("bob-2", 2, mv("o2", "a", Some("b"), 1));
        node.receive(
            &mut doc,
            &[
                Incoming { cmd: &left, op: &left.ops[0] },
                Incoming { cmd: &back, op: &back.ops[0] },
            ],
        )
        .unwrap();
        assert_eq!(doc.placement("a").unwrap().parent, ROOT_ID);
        assert!(doc.children("b").is_empty());
        assert_eq!(node.committed_len(), 2);
    }
}
