//! # Text node
//!
//! Rich text is positional, so concurrent edits are rebased by
//! transformation rather than replayed by identity.
//!
//! Every committed entry is stored in its canonical form: the op as it
//! applies right after the previous committed entry. A foreign op arrives in
//! the form its author submitted, generated against the author's view at
//! `base_version` plus the author's own still-unacknowledged ops. Replaying
//! the author's rebasing of that queue against the committed entries in
//! `(base_version, version)` yields the same canonical form on every replica.

use super::{kind_mismatch, Entry, Incoming, NodeLog, RepoNode};
use crate::cmd::Cmd;
use crate::errors::{RepoError, RepoResult};
use crate::op::{Op, OpId, OpKind, OpPayload, TextOp};
use crate::ot::{self, TextEffect};
use std::collections::{HashMap, VecDeque};
use vellum_document::{DocumentTree, OpPath};

type Effects = Vec<TextEffect>;

#[derive(Debug)]
pub(crate) struct TextNode {
    path: OpPath,
    log: NodeLog<Effects>,
    /// Submitted form of every committed op, by op id.
    submitted: HashMap<OpId, Vec<TextOp>>,
}

fn set_prims(op: &mut Op, prims: Vec<TextOp>) {
    op.payload = OpPayload::Text(prims);
}

impl TextNode {
    pub fn new(path: OpPath) -> Self {
        Self {
            path,
            log: NodeLog::default(),
            submitted: HashMap::new(),
        }
    }

    fn check_kind(&self, op: &Op) -> RepoResult<()> {
        if op.kind() != OpKind::Text {
            return Err(kind_mismatch(&self.path, OpKind::Text, op));
        }
        Ok(())
    }

    fn apply_lenient(doc: &mut dyn DocumentTree, path: &OpPath, entry: &Entry<Effects>) -> Effects {
        match ot::apply_ops(doc, path, entry.op.text_ops()) {
            Ok(effects) => effects,
            Err(e) => {
                tracing::warn!("[TextNode] Op {} at {} has no effect: {}", entry.op.id, path, e);
                Vec::new()
            }
        }
    }

    fn revert_entry(doc: &mut dyn DocumentTree, path: &OpPath, entry: &mut Entry<Effects>) -> RepoResult<()> {
        if let Some(effects) = entry.record.take() {
            ot::revert_ops(doc, path, &effects)?;
        }
        Ok(())
    }

    /// Rewrite a foreign op into the form it takes right after the last
    /// committed entry.
    fn canonicalize(&self, incoming: &Incoming<'_>) -> Vec<TextOp> {
        let author = &incoming.cmd.client_id;
        let base = incoming.cmd.base_version;
        let concurrent = || self.log.ops.iter().filter(move |e| e.order() > base);

        // the author's own queue at submission time, oldest first
        let mut queue: VecDeque<Vec<TextOp>> = concurrent()
            .filter(|e| &e.author == author)
            .map(|e| {
                self.submitted
                    .get(&e.op.id)
                    .cloned()
                    .unwrap_or_else(|| e.op.text_ops().to_vec())
            })
            .collect();

        let mut op = incoming.op.text_ops().to_vec();
        for entry in concurrent() {
            if &entry.author == author {
                queue.pop_front();
                continue;
            }
            let mut committed = entry.op.text_ops().to_vec();
            for queued in queue.iter_mut() {
                let (rebased, passed) = ot::transform_pair(queued, &committed, true);
                *queued = rebased;
                committed = passed;
            }
            op = ot::transform_seq(&op, &committed, true);
        }
        op
    }

    /// Rebase speculative and undone entries past a newly committed op.
    fn rebase_pending(&mut self, committed: &[TextOp]) {
        let mut committed = committed.to_vec();
        let pending = self
            .log
            .localops
            .iter_mut()
            .chain(self.log.undone.iter_mut().rev().flatten());
        for entry in pending {
            let (rebased, passed) = ot::transform_pair(entry.op.text_ops(), &committed, true);
            set_prims(&mut entry.op, rebased);
            committed = passed;
        }
    }
}

impl RepoNode for TextNode {
    fn kind(&self) -> OpKind {
        OpKind::Text
    }

    fn path(&self) -> &OpPath {
        &self.path
    }

    fn local_len(&self) -> usize {
        self.log.localops.len()
    }

    fn committed_len(&self) -> usize {
        self.log.ops.len()
    }

    fn local_op(&self, op_id: &str) -> Option<&Op> {
        self.log.local_op(op_id)
    }

    fn apply_local(
        &mut self,
        doc: &mut dyn DocumentTree,
        cmd_id: &str,
        author: &str,
        ops: &[Op],
    ) -> RepoResult<()> {
        for op in ops {
            self.check_kind(op)?;
            let len = doc.text_len(&self.path)?;
            ot::validate(len, op.text_ops()).map_err(|reason| RepoError::InvalidOp {
                op_id: op.id.clone(),
                reason,
            })?;

            let mut entry = Entry::local(op.clone(), cmd_id, author);
            entry.op.order = None;
            entry.record = Some(ot::apply_ops(doc, &self.path, op.text_ops())?);
            self.log.localops.push(entry);
        }
        Ok(())
    }

    fn truncate_local(&mut self, doc: &mut dyn DocumentTree, len: usize) -> RepoResult<()> {
        while self.log.localops.len() > len {
            if let Some(mut entry) = self.log.localops.pop() {
                Self::revert_entry(doc, &self.path, &mut entry)?;
            }
        }
        Ok(())
    }

    fn undo_local(&mut self, doc: &mut dyn DocumentTree, cmd_id: &str, keep: bool) -> RepoResult<()> {
        let mut group = self.log.take_local_tail(cmd_id);
        for entry in group.iter_mut().rev() {
            Self::revert_entry(doc, &self.path, entry)?;
        }
        if keep && !group.is_empty() {
            self.log.undone.push(group);
        }
        Ok(())
    }

    fn redo_local(&mut self, doc: &mut dyn DocumentTree, cmd_id: &str) -> RepoResult<()> {
        let group = self.log.take_undone(&self.path, cmd_id)?;
        for mut entry in group {
            entry.record = Some(Self::apply_lenient(doc, &self.path, &entry));
            self.log.localops.push(entry);
        }
        Ok(())
    }

    fn clear_undone(&mut self) {
        self.log.undone.clear();
    }

    fn receive(&mut self, doc: &mut dyn DocumentTree, incoming: &[Incoming<'_>]) -> RepoResult<()> {
        for item in incoming {
            self.check_kind(item.op)?;
        }

        for entry in self.log.localops.iter_mut().rev() {
            Self::revert_entry(doc, &self.path, entry)?;
        }

        for item in incoming {
            let canonical = self.canonicalize(item);
            let mut entry = Entry::committed(item);
            set_prims(&mut entry.op, canonical.clone());
            entry.record = Some(Self::apply_lenient(doc, &self.path, &entry));
            self.rebase_pending(&canonical);
            self.submitted
                .insert(item.op.id.clone(), item.op.text_ops().to_vec());
            self.log.ops.push(entry);
        }

        for entry in self.log.localops.iter_mut() {
            entry.record = Some(Self::apply_lenient(doc, &self.path, entry));
        }
        Ok(())
    }

    fn commit(&mut self, _doc: &mut dyn DocumentTree, cmd: &Cmd, ops: &[&Op]) -> RepoResult<()> {
        let version = cmd
            .version
            .ok_or_else(|| RepoError::InvalidCmd(format!("{} has no version", cmd.id)))?;
        let taken = self.log.take_local_head(&self.path, &cmd.id, ops)?;

        // the rebased local form already is the canonical one
        for (mut entry, echoed) in taken.into_iter().zip(ops) {
            entry.op.order = Some(version);
            entry.base_version = cmd.base_version;
            self.submitted
                .insert(entry.op.id.clone(), echoed.text_ops().to_vec());
            self.log.ops.push(entry);
        }
        Ok(())
    }

    fn invert(&self, cmd_id: &str) -> RepoResult<Vec<OpPayload>> {
        let Some(range) = self.log.cmd_range(cmd_id) else {
            return Ok(Vec::new());
        };
        let applied: Vec<&Entry<Effects>> = self.log.applied().collect();

        let mut inverse: Vec<TextOp> = applied[range.clone()]
            .iter()
            .rev()
            .flat_map(|entry| entry.record.as_deref().map(ot::invert_effects).unwrap_or_default())
            .collect();
        for later in &applied[range.end..] {
            inverse = ot::transform_seq(&inverse, later.op.text_ops(), true);
        }

        if inverse.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![OpPayload::Text(inverse)])
    }

    fn roll(&mut self, doc: &mut dyn DocumentTree, from: u64, to: u64) -> RepoResult<()> {
        let path = &self.path;
        if to < from {
            for entry in self.log.applied_mut().rev() {
                let order = entry.order();
                if order > to && order <= from {
                    Self::revert_entry(doc, path, entry)?;
                }
            }
        } else {
            for entry in self.log.applied_mut() {
                let order = entry.order();
                if order > from && order <= to {
                    entry.record = Some(Self::apply_lenient(doc, path, entry));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::build_node;
    use vellum_document::{Document, PositionKey, RichText, ShapeData, ShapeKind, ROOT_ID};

    fn path() -> OpPath {
        OpPath::new(["t", "text"])
    }

    fn doc(content: &str) -> Document {
        let mut doc = Document::new();
        doc.attach(
            &ShapeData::new("t", ShapeKind::Text).with_text(RichText::from_plain(content)),
            ROOT_ID,
            PositionKey::first(),
        )
        .unwrap();
        doc
    }

    fn text_op(id: &str, prims: Vec<TextOp>) -> Op {
        Op::new(id, path(), OpPayload::Text(prims))
    }

    fn remote(id: &str, author: &str, base: u64, version: u64, prims: Vec<TextOp>) -> Cmd {
        let mut cmd = Cmd::new(id, author, vec![text_op(&format!("{}-op", id), prims)]);
        cmd.base_version = base;
        cmd.version = Some(version);
        cmd
    }

    fn plain(doc: &Document) -> String {
        doc.text("t").unwrap().to_plain()
    }

    #[test]
    fn test_pending_insert_rebases_past_earlier_remote_insert() {
        // local X at 3, then remote "YZ" at 1 sequenced first: X ends up at 5
        let mut doc = doc("abcdefg\n");
        let mut node = build_node(&path(), OpKind::Text).unwrap();
        node.apply_local(&mut doc, "me-1", "me", &[text_op("me-2", vec![TextOp::insert(3, "X")])])
            .unwrap();
        assert_eq!(plain(&doc), "abcXdefg\n");

        let cmd = remote("bob-1", "bob", 0, 1, vec![TextOp::insert(1, "YZ")]);
        node.receive(&mut doc, &[Incoming { cmd: &cmd, op: &cmd.ops[0] }]).unwrap();

        assert_eq!(plain(&doc), "aYZbcXdefg\n");
        assert_eq!(node.local_op("me-2").unwrap().text_ops(), &[TextOp::insert(5, "X")]);
    }

    #[test]
    fn test_foreign_op_is_canonicalized_against_concurrent_commits() {
        // bob typed at 3 without having seen carol's insert at 0
        let mut doc = doc("abcdef\n");
        let mut node = build_node(&path(), OpKind::Text).unwrap();
        let carol = remote("carol-1", "carol", 0, 1, vec![TextOp::insert(0, ">>")]);
        let bob = remote("bob-1", "bob", 0, 2, vec![TextOp::insert(3, "!")]);

        node.receive(&mut doc, &[Incoming { cmd: &carol, op: &carol.ops[0] }]).unwrap();
        node.receive(&mut doc, &[Incoming { cmd: &bob, op: &bob.ops[0] }]).unwrap();

        assert_eq!(plain(&doc), ">>abc!def\n");
    }

    #[test]
    fn test_author_queue_is_replayed_during_canonicalization() {
        // bob submitted two ops at base 0; carol's op was sequenced between them
        let mut doc = doc("abcdef\n");
        let mut node = build_node(&path(), OpKind::Text).unwrap();
        let bob_first = remote("bob-1", "bob", 0, 1, vec![TextOp::insert(2, "12")]);
        let carol = remote("carol-1", "carol", 0, 2, vec![TextOp::remove(0, 3)]);
        // generated by bob after his own first insert: "ab12cdef"
        let bob_second = remote("bob-2", "bob", 0, 3, vec![TextOp::insert(6, "Z")]);

        for cmd in [&bob_first, &carol, &bob_second] {
            node.receive(&mut doc, &[Incoming { cmd, op: &cmd.ops[0] }]).unwrap();
        }

        // carol removed "ab" and one char past bob's insert point ("c")
        assert_eq!(plain(&doc), "12dZef\n");
    }

    #[test]
    fn test_undone_group_is_rebased_and_redone_in_place() {
        let mut doc = doc("hello\n");
        let mut node = build_node(&path(), OpKind::Text).unwrap();
        node.apply_local(&mut doc, "me-1", "me", &[text_op("me-2", vec![TextOp::insert(5, "!")])])
            .unwrap();
        node.undo_local(&mut doc, "me-1", true).unwrap();
        assert_eq!(plain(&doc), "hello\n");

        let cmd = remote("bob-1", "bob", 0, 1, vec![TextOp::insert(0, "oh, ")]);
        node.receive(&mut doc, &[Incoming { cmd: &cmd, op: &cmd.ops[0] }]).unwrap();
        node.redo_local(&mut doc, "me-1").unwrap();

        assert_eq!(plain(&doc), "oh, hello!\n");
    }

    #[test]
    fn test_invert_transforms_past_later_edits() {
        let mut doc = doc("world\n");
        let mut node = build_node(&path(), OpKind::Text).unwrap();
        let first = remote("bob-1", "bob", 0, 1, vec![TextOp::insert(5, "!")]);
        let second = remote("carol-1", "carol", 1, 2, vec![TextOp::insert(0, "hello ")]);
        node.receive(&mut doc, &[Incoming { cmd: &first, op: &first.ops[0] }]).unwrap();
        node.receive(&mut doc, &[Incoming { cmd: &second, op: &second.ops[0] }]).unwrap();

        let inverse = node.invert("bob-1").unwrap();
        assert_eq!(inverse, vec![OpPayload::Text(vec![TextOp::remove(11, 1)])]);
    }

    #[test]
    fn test_out_of_range_local_op_is_rejected() {
        let mut doc = doc("ab\n");
        let mut node = build_node(&path(), OpKind::Text).unwrap();
        let err = node
            .apply_local(&mut doc, "me-1", "me", &[text_op("me-2", vec![TextOp::remove(1, 5)])])
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidOp { .. }));
        assert_eq!(plain(&doc), "ab\n");
    }
}
