//! # Transport
//!
//! The repo only ever hands batches to a [`Transport`]; delivery of the
//! ordered stream back goes through [`crate::CmdRepo::receive`]. The
//! [`Sequencer`] is an in-memory stand-in for the server that totally orders
//! submissions.

use crate::cmd::{Cmd, CmdId};
use std::collections::HashSet;

pub trait Transport {
    /// Hand a batch of cmds to the server. Resends pass the same batch again.
    fn submit(&mut self, cmds: &[Cmd]);
}

/// Transport that keeps submitted batches until drained.
#[derive(Debug, Default)]
pub struct Outbox {
    batches: Vec<Vec<Cmd>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<Vec<Cmd>> {
        std::mem::take(&mut self.batches)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }
}

impl Transport for Outbox {
    fn submit(&mut self, cmds: &[Cmd]) {
        self.batches.push(cmds.to_vec());
    }
}

/// Assigns consecutive versions to submitted cmds.
///
/// Submission is idempotent by cmd id so resends never duplicate a cmd.
#[derive(Debug, Default)]
pub struct Sequencer {
    log: Vec<Cmd>,
    seen: HashSet<CmdId>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence a batch, returning the versions of the cmds that were new.
    pub fn submit(&mut self, cmds: &[Cmd]) -> Vec<u64> {
        let mut assigned = Vec::new();
        for cmd in cmds {
            if !self.seen.insert(cmd.id.clone()) {
                tracing::debug!("[Sequencer] Ignoring duplicate {}", cmd.id);
                continue;
            }
            let version = self.log.len() as u64 + 1;
            let mut sequenced = cmd.clone();
            sequenced.version = Some(version);
            for op in &mut sequenced.ops {
                op.order = Some(version);
            }
            self.log.push(sequenced);
            assigned.push(version);
        }
        assigned
    }

    /// Cmds with a version above `version`, in order.
    pub fn since(&self, version: u64) -> Vec<Cmd> {
        let start = (version as usize).min(self.log.len());
        self.log[start..].to_vec()
    }

    pub fn version(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn log(&self) -> &[Cmd] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequencer_is_idempotent() {
        let mut server = Sequencer::new();
        let a = Cmd::new("a-1", "a", vec![]);
        let b = Cmd::new("b-1", "b", vec![]);

        assert_eq!(server.submit(&[a.clone()]), vec![1]);
        assert_eq!(server.submit(&[a, b]), vec![2]);
        assert_eq!(server.version(), 2);

        let tail = server.since(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, "b-1");
        assert_eq!(tail[0].version, Some(2));
        assert!(server.since(9).is_empty());
    }

    #[test]
    fn test_outbox_drains_batches() {
        let mut outbox = Outbox::new();
        outbox.submit(&[Cmd::new("a-1", "a", vec![])]);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.drain()[0][0].id, "a-1");
        assert!(outbox.is_empty());
    }
}
