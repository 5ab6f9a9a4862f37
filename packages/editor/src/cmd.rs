//! # Commands
//!
//! A cmd is an ordered group of ops authored together: the unit of
//! submission, acknowledgement and undo.
//!
//! ## Lifecycle
//!
//! ```text
//! post → local → posting (submitted, awaiting echo) → cmds (committed)
//! ```
//!
//! Foreign cmds go straight from the receive queue into `cmds`.

use crate::op::Op;
use crate::selection::{Selection, SelectionUpdater};
use serde::{Deserialize, Serialize};

pub type CmdId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cmd {
    pub id: CmdId,
    /// Author replica.
    pub client_id: String,
    /// Last committed version the author had applied when submitting.
    #[serde(default)]
    pub base_version: u64,
    /// Server-assigned version, present once sequenced.
    #[serde(default)]
    pub version: Option<u64>,
    pub ops: Vec<Op>,
    /// Creation time in milliseconds.
    #[serde(default)]
    pub time: i64,
    /// How long the cmd stays local before it may be submitted.
    #[serde(default)]
    pub delay_ms: u64,
    /// Whether a following mergeable cmd may fold into this one.
    #[serde(default)]
    pub mergeable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Selection captured before the cmd ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_selection: Option<Selection>,
    #[serde(default)]
    pub selection_updater: SelectionUpdater,
    /// The cmd this one undoes, for cmds created by a general undo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverts: Option<CmdId>,
}

impl Cmd {
    pub fn new(id: impl Into<CmdId>, client_id: impl Into<String>, ops: Vec<Op>) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            base_version: 0,
            version: None,
            ops,
            time: 0,
            delay_ms: 0,
            mergeable: false,
            description: None,
            saved_selection: None,
            selection_updater: SelectionUpdater::None,
            reverts: None,
        }
    }

    pub fn at(mut self, time: i64) -> Self {
        self.time = time;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn mergeable(mut self) -> Self {
        self.mergeable = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.saved_selection = Some(selection);
        self
    }

    pub fn with_updater(mut self, updater: SelectionUpdater) -> Self {
        self.selection_updater = updater;
        self
    }

    pub fn is_committed(&self) -> bool {
        self.version.is_some()
    }

    /// Earliest time the cmd may leave the local queue.
    pub fn ready_at(&self) -> i64 {
        self.time.saturating_add(self.delay_ms as i64)
    }
}

/// Sequential id generator scoped to one replica.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    seed: String,
    count: u64,
}

impl IdGenerator {
    pub fn from_seed(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            count: 0,
        }
    }

    /// Generate next sequential ID
    pub fn new_id(&mut self) -> String {
        self.count += 1;
        format!("{}-{}", self.seed, self.count)
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }
}
