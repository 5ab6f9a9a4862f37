//! # Repo nodes
//!
//! One node per op path. A node owns the history of that path and knows how
//! to reconcile local speculation with the server order.
//!
//! ## Queues
//!
//! - `ops`: committed entries in server order, with their realized effect
//! - `localops`: speculative entries of this replica, applied on top
//! - `undone`: groups taken off `localops` by a cheap local undo (top last)
//!
//! Every applied entry carries a record of what it actually changed so it
//! can be reverted exactly.

mod array;
mod crdt;
mod id_set;
mod text;
mod tree;

use crate::cmd::{Cmd, CmdId};
use crate::errors::{RepoError, RepoResult};
use crate::op::{Op, OpKind, OpPayload};
use std::fmt;
use vellum_document::{DocumentTree, OpPath, SPECULATIVE_ORDER};

use array::ArrayStrategy;
use crdt::CrdtNode;
use id_set::IdSetStrategy;
use text::TextNode;
use tree::TreeStrategy;

/// A committed op delivered to a node, together with the cmd it came from.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub cmd: &'a Cmd,
    pub op: &'a Op,
}

pub trait RepoNode: fmt::Debug {
    fn kind(&self) -> OpKind;

    fn path(&self) -> &OpPath;

    /// Number of speculative entries.
    fn local_len(&self) -> usize;

    fn committed_len(&self) -> usize;

    /// Current (possibly rebased) form of a speculative op.
    fn local_op(&self, op_id: &str) -> Option<&Op>;

    /// Apply freshly posted ops speculatively. Invalid ops are rejected.
    fn apply_local(
        &mut self,
        doc: &mut dyn DocumentTree,
        cmd_id: &str,
        author: &str,
        ops: &[Op],
    ) -> RepoResult<()>;

    /// Revert and drop speculative entries beyond `len`.
    fn truncate_local(&mut self, doc: &mut dyn DocumentTree, len: usize) -> RepoResult<()>;

    /// Revert the trailing speculative entries of `cmd_id`, keeping them for a
    /// later [`RepoNode::redo_local`] when `keep` is set.
    fn undo_local(&mut self, doc: &mut dyn DocumentTree, cmd_id: &str, keep: bool) -> RepoResult<()>;

    fn redo_local(&mut self, doc: &mut dyn DocumentTree, cmd_id: &str) -> RepoResult<()>;

    fn clear_undone(&mut self);

    /// Integrate committed foreign ops, in server order.
    fn receive(&mut self, doc: &mut dyn DocumentTree, incoming: &[Incoming<'_>]) -> RepoResult<()>;

    /// Acknowledge the oldest speculative entries, which must be `ops` of the
    /// echoed `cmd`.
    fn commit(&mut self, doc: &mut dyn DocumentTree, cmd: &Cmd, ops: &[&Op]) -> RepoResult<()>;

    /// Payloads that revert the realized effect of `cmd_id` on this path, in
    /// application order, expressed against the current state.
    fn invert(&self, cmd_id: &str) -> RepoResult<Vec<OpPayload>>;

    /// Revert entries whose version is in `(to, from]`, or reapply those in
    /// `(from, to]`. Speculative entries count as the newest version.
    fn roll(&mut self, doc: &mut dyn DocumentTree, from: u64, to: u64) -> RepoResult<()>;
}

/// Applied op plus its realized effect.
#[derive(Debug, Clone)]
pub(crate) struct Entry<R> {
    pub op: Op,
    pub cmd_id: CmdId,
    pub author: String,
    pub base_version: u64,
    /// `None` while the entry is not applied (undone).
    pub record: Option<R>,
}

impl<R> Entry<R> {
    pub fn local(op: Op, cmd_id: &str, author: &str) -> Self {
        Self {
            op,
            cmd_id: cmd_id.to_string(),
            author: author.to_string(),
            base_version: 0,
            record: None,
        }
    }

    pub fn committed(incoming: &Incoming<'_>) -> Self {
        let mut op = incoming.op.clone();
        op.order = incoming.cmd.version;
        Self {
            op,
            cmd_id: incoming.cmd.id.clone(),
            author: incoming.cmd.client_id.clone(),
            base_version: incoming.cmd.base_version,
            record: None,
        }
    }

    /// Order used when placing the entry in the document.
    pub fn order(&self) -> u64 {
        self.op.order.unwrap_or(SPECULATIVE_ORDER)
    }
}

#[derive(Debug)]
pub(crate) struct NodeLog<R> {
    pub ops: Vec<Entry<R>>,
    pub localops: Vec<Entry<R>>,
    pub undone: Vec<Vec<Entry<R>>>,
}

impl<R> Default for NodeLog<R> {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            localops: Vec::new(),
            undone: Vec::new(),
        }
    }
}

impl<R> NodeLog<R> {
    /// Take the trailing speculative entries belonging to `cmd_id`.
    pub fn take_local_tail(&mut self, cmd_id: &str) -> Vec<Entry<R>> {
        let keep = self
            .localops
            .iter()
            .rposition(|e| e.cmd_id != cmd_id)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.localops.split_off(keep)
    }

    /// Take the oldest speculative entries, checking they are exactly `ops`.
    pub fn take_local_head(&mut self, path: &OpPath, cmd_id: &str, ops: &[&Op]) -> RepoResult<Vec<Entry<R>>> {
        for (i, op) in ops.iter().enumerate() {
            let found = self.localops.get(i);
            if found.map(|e| e.op.id != op.id || e.cmd_id != cmd_id).unwrap_or(true) {
                return Err(RepoError::OpMismatch {
                    path: path.key(),
                    expected: op.id.clone(),
                    found: found.map(|e| e.op.id.clone()),
                });
            }
        }
        Ok(self.localops.drain(..ops.len()).collect())
    }

    pub fn take_undone(&mut self, path: &OpPath, cmd_id: &str) -> RepoResult<Vec<Entry<R>>> {
        match self.undone.last() {
            Some(group) if group.first().map(|e| e.cmd_id == cmd_id).unwrap_or(false) => {
                Ok(self.undone.pop().unwrap_or_default())
            }
            top => Err(RepoError::OpMismatch {
                path: path.key(),
                expected: cmd_id.to_string(),
                found: top.and_then(|g| g.first()).map(|e| e.cmd_id.clone()),
            }),
        }
    }

    pub fn local_op(&self, op_id: &str) -> Option<&Op> {
        self.localops.iter().find(|e| e.op.id == op_id).map(|e| &e.op)
    }

    /// All applied entries in application order.
    pub fn applied(&self) -> impl DoubleEndedIterator<Item = &Entry<R>> {
        self.ops.iter().chain(self.localops.iter())
    }

    pub fn applied_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut Entry<R>> {
        self.ops.iter_mut().chain(self.localops.iter_mut())
    }

    /// Index range of the entries of `cmd_id` within [`NodeLog::applied`].
    pub fn cmd_range(&self, cmd_id: &str) -> Option<std::ops::Range<usize>> {
        let first = self.applied().position(|e| e.cmd_id == cmd_id)?;
        let len = self.applied().skip(first).take_while(|e| e.cmd_id == cmd_id).count();
        Some(first..first + len)
    }
}

pub(crate) fn kind_mismatch(path: &OpPath, existing: OpKind, op: &Op) -> RepoError {
    RepoError::NodeTypeMismatch {
        path: path.key(),
        existing,
        incoming: op.kind(),
    }
}

/// Build the node owning ops of `kind`. Intermediate nodes own nothing.
pub fn build_node(path: &OpPath, kind: OpKind) -> Option<Box<dyn RepoNode>> {
    match kind {
        OpKind::None => None,
        OpKind::IdSet => Some(Box::new(CrdtNode::<IdSetStrategy>::new(path.clone()))),
        OpKind::CrdtArray => Some(Box::new(CrdtNode::<ArrayStrategy>::new(path.clone()))),
        OpKind::CrdtTree => Some(Box::new(CrdtNode::<TreeStrategy>::new(path.clone()))),
        OpKind::Text => Some(Box::new(TextNode::new(path.clone()))),
    }
}
