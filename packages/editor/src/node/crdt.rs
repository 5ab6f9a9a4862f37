//! # Identity-addressed nodes
//!
//! Scalars, collection items and shape placements address their target by
//! stable id, so concurrent ops never need positional transformation. The
//! node keeps the document equal to "committed ops in server order, then
//! local ops" by undoing local entries, applying the remote ones and
//! redoing the local ones on top.

use super::{kind_mismatch, Entry, Incoming, NodeLog, RepoNode};
use crate::cmd::Cmd;
use crate::errors::{RepoError, RepoResult};
use crate::op::{Op, OpKind, OpPayload};
use std::fmt;
use std::marker::PhantomData;
use vellum_document::{DocumentError, DocumentTree, OpPath};

/// Per-kind semantics plugged into [`CrdtNode`].
pub(crate) trait Strategy: fmt::Debug + 'static {
    type Record: Clone + fmt::Debug + 'static;

    const KIND: OpKind;

    /// Apply `op` with the given order, returning what it changed.
    fn apply(doc: &mut dyn DocumentTree, path: &OpPath, op: &Op, order: u64) -> Result<Self::Record, DocumentError>;

    fn revert(doc: &mut dyn DocumentTree, path: &OpPath, op: &Op, record: &Self::Record) -> Result<(), DocumentError>;

    /// Record of an op that had no effect.
    fn skipped() -> Self::Record;

    fn is_effective(record: &Self::Record) -> bool;

    /// Identity a later op on the same target supersedes.
    fn target(op: &Op) -> &str;

    fn invert(op: &Op, record: &Self::Record) -> Option<OpPayload>;

    /// Apply committed entries when nothing local sits on top of them.
    fn absorb(doc: &mut dyn DocumentTree, path: &OpPath, entries: &mut [Entry<Self::Record>]) -> RepoResult<()> {
        for entry in entries {
            entry.record = Some(apply_lenient::<Self>(doc, path, entry));
        }
        Ok(())
    }

    /// Fix up the document once a speculative entry learns its version.
    /// `later` holds the speculative entries applied after it.
    fn settle(
        _doc: &mut dyn DocumentTree,
        _path: &OpPath,
        _entry: &Entry<Self::Record>,
        _version: u64,
        _later: &mut [&mut Entry<Self::Record>],
    ) -> RepoResult<()> {
        Ok(())
    }
}

/// Apply a committed (or rebased) entry. Ops whose target is gone or that
/// would corrupt the tree become no-ops, identically on every replica.
pub(crate) fn apply_lenient<S: Strategy + ?Sized>(
    doc: &mut dyn DocumentTree,
    path: &OpPath,
    entry: &Entry<S::Record>,
) -> S::Record {
    match S::apply(doc, path, &entry.op, entry.order()) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!("[CrdtNode] Op {} at {} has no effect: {}", entry.op.id, path, e);
            S::skipped()
        }
    }
}

#[derive(Debug)]
pub(crate) struct CrdtNode<S: Strategy> {
    path: OpPath,
    log: NodeLog<S::Record>,
    _strategy: PhantomData<S>,
}

impl<S: Strategy> CrdtNode<S> {
    pub fn new(path: OpPath) -> Self {
        Self {
            path,
            log: NodeLog::default(),
            _strategy: PhantomData,
        }
    }

    fn check_kind(&self, op: &Op) -> RepoResult<()> {
        if op.kind() != S::KIND {
            return Err(kind_mismatch(&self.path, S::KIND, op));
        }
        Ok(())
    }

    fn revert_entry(doc: &mut dyn DocumentTree, path: &OpPath, entry: &mut Entry<S::Record>) -> RepoResult<()> {
        if let Some(record) = entry.record.take() {
            S::revert(doc, path, &entry.op, &record)?;
        }
        Ok(())
    }

    fn revert_locals(&mut self, doc: &mut dyn DocumentTree) -> RepoResult<()> {
        for entry in self.log.localops.iter_mut().rev() {
            Self::revert_entry(doc, &self.path, entry)?;
        }
        Ok(())
    }

    fn reapply_locals(&mut self, doc: &mut dyn DocumentTree) {
        for entry in self.log.localops.iter_mut() {
            entry.record = Some(apply_lenient::<S>(doc, &self.path, entry));
        }
    }
}

impl<S: Strategy> RepoNode for CrdtNode<S> {
    fn kind(&self) -> OpKind {
        S::KIND
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
            let mut entry = Entry::local(op.clone(), cmd_id, author);
            entry.op.order = None;
            let record = S::apply(doc, &self.path, &entry.op, entry.order())?;
            entry.record = Some(record);
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
            entry.record = Some(apply_lenient::<S>(doc, &self.path, &entry));
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
        let mut entries: Vec<Entry<S::Record>> = incoming.iter().map(Entry::committed).collect();

        if self.log.localops.is_empty() {
            S::absorb(doc, &self.path, &mut entries)?;
        } else {
            self.revert_locals(doc)?;
            for entry in entries.iter_mut() {
                entry.record = Some(apply_lenient::<S>(doc, &self.path, entry));
            }
            self.reapply_locals(doc);
        }

        self.log.ops.extend(entries);
        Ok(())
    }

    fn commit(&mut self, doc: &mut dyn DocumentTree, cmd: &Cmd, ops: &[&Op]) -> RepoResult<()> {
        let version = cmd
            .version
            .ok_or_else(|| RepoError::InvalidCmd(format!("{} has no version", cmd.id)))?;
        let mut taken = self.log.take_local_head(&self.path, &cmd.id, ops)?;

        for i in 0..taken.len() {
            let (head, tail) = taken.split_at_mut(i + 1);
            let entry = &mut head[i];
            entry.op.order = Some(version);
            entry.base_version = cmd.base_version;
            let mut later: Vec<&mut Entry<S::Record>> =
                tail.iter_mut().chain(self.log.localops.iter_mut()).collect();
            S::settle(doc, &self.path, entry, version, &mut later)?;
        }

        self.log.ops.extend(taken);
        Ok(())
    }

    fn invert(&self, cmd_id: &str) -> RepoResult<Vec<OpPayload>> {
        let Some(range) = self.log.cmd_range(cmd_id) else {
            return Ok(Vec::new());
        };
        let applied: Vec<&Entry<S::Record>> = self.log.applied().collect();

        let mut payloads = Vec::new();
        for entry in applied[range.clone()].iter().rev() {
            let Some(record) = &entry.record else {
                continue;
            };
            let superseded = applied[range.end..].iter().any(|later| {
                later.cmd_id != cmd_id
                    && S::target(&later.op) == S::target(&entry.op)
                    && later.record.as_ref().map(S::is_effective).unwrap_or(false)
            });
            if superseded {
                tracing::debug!("[CrdtNode] {} at {} was superseded, not undoing", entry.op.id, self.path);
                continue;
            }
            if let Some(payload) = S::invert(&entry.op, record) {
                payloads.push(payload);
            }
        }
        Ok(payloads)
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
                    entry.record = Some(apply_lenient::<S>(doc, path, entry));
                }
            }
        }
        Ok(())
    }
}
