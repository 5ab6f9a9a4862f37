//! Named collections (fills, strokes, effects): items move by stable id to a
//! position key. Committed items sort by `(key, version, id)`; speculative
//! ones sort after every committed item with the same key.

use super::crdt::Strategy;
use super::Entry;
use crate::errors::RepoResult;
use crate::op::{ArrayMove, Op, OpKind, OpPayload};
use vellum_document::{CollectionItem, DocumentError, DocumentTree, OpPath, Slot, Value};

#[derive(Debug)]
pub(crate) struct ArrayStrategy;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ArrayRecord {
    Skipped,
    Moved { prior: Option<CollectionItem> },
}

fn move_of(op: &Op) -> Option<&ArrayMove> {
    match &op.payload {
        OpPayload::CrdtArray(mv) => Some(mv),
        _ => None,
    }
}

impl Strategy for ArrayStrategy {
    type Record = ArrayRecord;

    const KIND: OpKind = OpKind::CrdtArray;

    fn apply(doc: &mut dyn DocumentTree, path: &OpPath, op: &Op, order: u64) -> Result<ArrayRecord, DocumentError> {
        let Some(mv) = move_of(op) else {
            return Ok(ArrayRecord::Skipped);
        };
        let prior = match &mv.to {
            Some(key) => {
                let current = doc.item(path, &mv.item)?;
                let data = current
                    .map(|item| item.data)
                    .or_else(|| mv.data.clone())
                    .unwrap_or(Value::Null);
                doc.put_item(
                    path,
                    CollectionItem {
                        id: mv.item.clone(),
                        slot: Slot::new(key.clone(), order),
                        data,
                    },
                )?
            }
            None => doc.take_item(path, &mv.item)?,
        };
        Ok(ArrayRecord::Moved { prior })
    }

    fn revert(doc: &mut dyn DocumentTree, path: &OpPath, op: &Op, record: &ArrayRecord) -> Result<(), DocumentError> {
        let (Some(mv), ArrayRecord::Moved { prior }) = (move_of(op), record) else {
            return Ok(());
        };
        match prior {
            Some(item) => {
                doc.put_item(path, item.clone())?;
            }
            None => {
                doc.take_item(path, &mv.item)?;
            }
        }
        Ok(())
    }

    fn skipped() -> ArrayRecord {
        ArrayRecord::Skipped
    }

    fn is_effective(record: &ArrayRecord) -> bool {
        matches!(record, ArrayRecord::Moved { .. })
    }

    fn target(op: &Op) -> &str {
        move_of(op).map(|mv| mv.item.as_str()).unwrap_or_default()
    }

    fn invert(op: &Op, record: &ArrayRecord) -> Option<OpPayload> {
        let (mv, ArrayRecord::Moved { prior }) = (move_of(op)?, record) else {
            return None;
        };
        Some(OpPayload::CrdtArray(ArrayMove {
            item: mv.item.clone(),
            to: prior.as_ref().map(|item| item.slot.key.clone()),
            data: prior.as_ref().map(|item| item.data.clone()),
        }))
    }

    fn settle(
        doc: &mut dyn DocumentTree,
        path: &OpPath,
        entry: &Entry<ArrayRecord>,
        version: u64,
        later: &mut [&mut Entry<ArrayRecord>],
    ) -> RepoResult<()> {
        let (Some(mv), Some(ArrayRecord::Moved { .. })) = (move_of(&entry.op), &entry.record) else {
            return Ok(());
        };
        if mv.to.is_none() {
            return Ok(());
        }

        // A later local move of the same item captured this placement as its
        // prior; patch it there so reverting it restores the settled slot.
        for next in later.iter_mut() {
            if move_of(&next.op).map(|m| m.item != mv.item).unwrap_or(true) {
                continue;
            }
            if let Some(ArrayRecord::Moved { prior }) = &mut next.record {
                if let Some(item) = prior {
                    item.slot.order = version;
                }
                return Ok(());
            }
        }
        doc.set_item_order(path, &mv.item, version)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cmd::Cmd;
    use crate::node::{build_node, Incoming, RepoNode};
    use crate::op::{ArrayMove, Op, OpKind, OpPayload};
    use serde_json::json;
    use vellum_document::{Document, OpPath, PositionKey, ShapeData, ShapeKind, ROOT_ID};

    fn fills() -> OpPath {
        OpPath::new(["rect", "fills"])
    }

    fn doc() -> Document {
        let mut doc = Document::new();
        doc.attach(&ShapeData::new("rect", ShapeKind::Rect), ROOT_ID, PositionKey::first())
            .unwrap();
        doc
    }

    fn put(id: &str, item: &str, key: u16) -> Op {
        Op::new(
            id,
            fills(),
            OpPayload::CrdtArray(ArrayMove {
                item: item.to_string(),
                to: Some(PositionKey::from_digits(vec![key])),
                data: Some(json!({ "color": item })),
            }),
        )
    }

    fn ids(doc: &Document) -> Vec<String> {
        doc.collection("rect", "fills").iter().map(|i| i.id.clone()).collect()
    }

    #[test]
    fn test_equal_keys_order_by_version_then_local_last() {
        let mut doc = doc();
        let mut node = build_node(&fills(), OpKind::CrdtArray).unwrap();

        node.apply_local(&mut doc, "me-1", "me", &[put("me-2", "mine", 5)]).unwrap();

        let mut cmd = Cmd::new("bob-1", "bob", vec![put("o1", "theirs", 5)]);
        cmd.version = Some(1);
        node.receive(&mut doc, &[Incoming { cmd: &cmd, op: &cmd.ops[0] }]).unwrap();
        assert_eq!(ids(&doc), vec!["theirs", "mine"]);

        let mut echo = Cmd::new("me-1", "me", vec![put("me-2", "mine", 5)]);
        echo.version = Some(2);
        node.commit(&mut doc, &echo, &[&echo.ops[0]]).unwrap();
        assert_eq!(ids(&doc), vec!["theirs", "mine"]);
        assert_eq!(doc.collection("rect", "fills")[1].slot.order, 2);
    }

    #[test]
    fn test_commit_patches_prior_of_later_local_move() {
        let mut doc = doc();
        let mut node = build_node(&fills(), OpKind::CrdtArray).unwrap();
        node.apply_local(&mut doc, "me-1", "me", &[put("me-2", "a", 5)]).unwrap();
        node.apply_local(&mut doc, "me-3", "me", &[put("me-4", "a", 9)]).unwrap();

        let mut echo = Cmd::new("me-1", "me", vec![put("me-2", "a", 5)]);
        echo.version = Some(1);
        node.commit(&mut doc, &echo, &[&echo.ops[0]]).unwrap();

        node.undo_local(&mut doc, "me-3", false).unwrap();
        let item = &doc.collection("rect", "fills")[0];
        assert_eq!(item.slot.key, PositionKey::from_digits(vec![5]));
        assert_eq!(item.slot.order, 1);
    }

    #[test]
    fn test_remove_and_invert_restores_data() {
        let mut doc = doc();
        let mut node = build_node(&fills(), OpKind::CrdtArray).unwrap();
        node.apply_local(&mut doc, "me-1", "me", &[put("me-2", "a", 5)]).unwrap();
        let remove = Op::new(
            "me-4",
            fills(),
            OpPayload::CrdtArray(ArrayMove {
                item: "a".to_string(),
                to: None,
                data: None,
            }),
        );
        node.apply_local(&mut doc, "me-3", "me", &[remove]).unwrap();
        assert!(ids(&doc).is_empty());

        let inverse = node.invert("me-3").unwrap();
        match &inverse[0] {
            OpPayload::CrdtArray(mv) => {
                assert_eq!(mv.to, Some(PositionKey::from_digits(vec![5])));
                assert_eq!(mv.data, Some(json!({ "color": "a" })));
            }
            other => panic!("unexpected inverse {:?}", other),
        }
    }
}
