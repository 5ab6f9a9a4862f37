//! # Local undo history
//!
//! Cheap undo only covers cmds that never left this replica. Undoing one
//! reverts it in place and parks it here; redoing reapplies it on top of
//! whatever arrived from the server meanwhile.
//!
//! - Undo moves the newest local cmd onto the redo stack
//! - Redo moves it back to the local queue
//! - Posting a new cmd (or discarding one) clears the redo stack

use crate::cmd::{Cmd, CmdId};
use crate::selection::Selection;

/// Outcome of an undo or redo.
#[derive(Debug, Clone, PartialEq)]
pub struct Undone {
    pub cmd_id: CmdId,
    /// Selection the UI should show afterwards.
    pub selection: Option<Selection>,
}

#[derive(Debug, Default)]
pub struct RedoStack {
    /// Undone cmds (most recently undone last)
    cmds: Vec<Cmd>,
}

impl RedoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmd: Cmd) {
        self.cmds.push(cmd);
    }

    pub fn pop(&mut self) -> Option<Cmd> {
        self.cmds.pop()
    }

    pub fn can_redo(&self) -> bool {
        !self.cmds.is_empty()
    }

    pub fn clear(&mut self) {
        self.cmds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redo_stack_is_lifo() {
        let mut stack = RedoStack::new();
        assert!(!stack.can_redo());

        stack.push(Cmd::new("a-1", "a", vec![]).with_description("Move"));
        stack.push(Cmd::new("a-2", "a", vec![]).with_description("Type"));
        assert!(stack.can_redo());

        assert_eq!(stack.pop().unwrap().description.as_deref(), Some("Type"));
        stack.clear();
        assert!(stack.pop().is_none());
    }
}
