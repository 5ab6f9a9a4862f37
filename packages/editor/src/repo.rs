//! # Command repository
//!
//! One replica of a collaboratively edited document.
//!
//! ## Flow
//!
//! ```text
//! post(cmd) ──► local ──► posting ──► transport.submit
//!                              ▲
//! receive(cmds) ──► pending ───┴──► echo: commit   ─┐
//!                              └──► foreign: nodes ─┴─► cmds
//! ```
//!
//! - Local cmds apply to the document immediately and stay speculative until
//!   their echo comes back with a version
//! - One batch is in flight at a time; the next leaves once the previous one
//!   is acknowledged and nothing received is still unprocessed
//! - After every step the document equals "committed cmds in server order,
//!   then speculative cmds in local order"

use crate::cmd::{Cmd, CmdId, IdGenerator};
use crate::config::{Clock, RepoConfig, SystemClock};
use crate::errors::{RepoError, RepoResult};
use crate::node::{Incoming, RepoNode};
use crate::op::{Op, OpPayload};
use crate::registry::NodeRegistry;
use crate::selection::SelectionUpdater;
use crate::transport::Transport;
use crate::undo::{RedoStack, Undone};
use std::collections::{HashMap, VecDeque};
use vellum_document::{DocumentTree, OpPath, SPECULATIVE_ORDER};

/// Rolling to this version includes speculative cmds.
const LIVE: u64 = SPECULATIVE_ORDER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Live,
    /// An integrity violation was detected; the replica must be reloaded.
    Desynced(String),
}

pub struct CmdRepo<D: DocumentTree, T: Transport> {
    client_id: String,
    config: RepoConfig,
    clock: Box<dyn Clock>,
    ids: IdGenerator,
    document: D,
    transport: T,
    nodes: NodeRegistry,

    /// Committed cmds in server order
    cmds: Vec<Cmd>,
    /// Received but not yet integrated
    pending: VecDeque<Cmd>,
    /// Submitted batch awaiting its echo
    posting: VecDeque<Cmd>,
    posted_at: i64,
    resends: u32,
    /// Speculative cmds not yet submitted
    local: VecDeque<Cmd>,
    redo: RedoStack,
    /// Local cmds posted since the last receive; bounds cheap undo
    fresh_local: usize,

    version: u64,
    view: Option<u64>,
    state: SessionState,
}

impl<D: DocumentTree, T: Transport> CmdRepo<D, T> {
    pub fn new(client_id: impl Into<String>, document: D, transport: T) -> Self {
        Self::with_config(client_id, document, transport, RepoConfig::default())
    }

    pub fn with_config(client_id: impl Into<String>, document: D, transport: T, config: RepoConfig) -> Self {
        let client_id = client_id.into();
        Self {
            ids: IdGenerator::from_seed(client_id.clone()),
            client_id,
            config,
            clock: Box::new(SystemClock),
            document,
            transport,
            nodes: NodeRegistry::new(),
            cmds: Vec::new(),
            pending: VecDeque::new(),
            posting: VecDeque::new(),
            posted_at: 0,
            resends: 0,
            local: VecDeque::new(),
            redo: RedoStack::new(),
            fresh_local: 0,
            version: 0,
            view: None,
            state: SessionState::Live,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Join a session whose document already reflects `version`.
    pub fn starting_at(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Last integrated server version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Last server version received, integrated or not.
    pub fn last_known_version(&self) -> u64 {
        self.pending
            .back()
            .and_then(|cmd| cmd.version)
            .unwrap_or(self.version)
    }

    /// Version shown while browsing history.
    pub fn viewed_version(&self) -> Option<u64> {
        self.view
    }

    pub fn committed(&self) -> &[Cmd] {
        &self.cmds
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn posting(&self) -> impl Iterator<Item = &Cmd> {
        self.posting.iter()
    }

    pub fn local(&self) -> impl Iterator<Item = &Cmd> {
        self.local.iter()
    }

    /// Whether every local edit has been acknowledged.
    pub fn is_settled(&self) -> bool {
        self.local.is_empty() && self.posting.is_empty() && self.pending.is_empty()
    }

    /// Create a cmd authored by this replica, with fresh cmd and op ids.
    pub fn build_cmd<I>(&mut self, ops: I) -> Cmd
    where
        I: IntoIterator<Item = (OpPath, OpPayload)>,
    {
        let cmd_id = self.ids.new_id();
        let ops: Vec<Op> = ops
            .into_iter()
            .map(|(path, payload)| Op::new(self.ids.new_id(), path, payload))
            .collect();
        Cmd::new(cmd_id, self.client_id.clone(), ops).at(self.clock.now_ms())
    }

    pub fn find_cmd(&self, cmd_id: &str) -> Option<&Cmd> {
        self.cmds
            .iter()
            .chain(self.posting.iter())
            .chain(self.local.iter())
            .find(|cmd| cmd.id == cmd_id)
    }

    // ----- posting -----

    /// Apply a locally authored cmd speculatively and queue it for
    /// submission. Returns the id the edit is tracked under, which is the
    /// previous cmd's id when the cmd was merged into it.
    pub fn post(&mut self, cmd: Cmd) -> RepoResult<CmdId> {
        self.ensure_writable()?;
        if cmd.ops.is_empty() {
            return Err(RepoError::InvalidCmd(format!("{} has no ops", cmd.id)));
        }
        if cmd.version.is_some() || cmd.ops.iter().any(|op| op.order.is_some()) {
            return Err(RepoError::InvalidCmd(format!("{} is already sequenced", cmd.id)));
        }
        if self.find_cmd(&cmd.id).is_some() {
            return Err(RepoError::InvalidCmd(format!("{} was already posted", cmd.id)));
        }

        let merge_into = self.merge_target(&cmd);
        let owner = merge_into.clone().unwrap_or_else(|| cmd.id.clone());
        self.apply_speculative(&owner, &cmd.ops)?;
        self.clear_redo();

        match merge_into {
            Some(_) => {
                if let Some(last) = self.local.back_mut() {
                    tracing::debug!("[CmdRepo] Merged {} into {}", cmd.id, last.id);
                    last.ops.extend(cmd.ops);
                    last.time = cmd.time;
                }
            }
            None => {
                tracing::debug!("[CmdRepo] Posted {} ({} ops)", cmd.id, cmd.ops.len());
                self.local.push_back(cmd);
                self.fresh_local += 1;
            }
        }

        self.process_cmds()?;
        Ok(owner)
    }

    fn merge_target(&self, cmd: &Cmd) -> Option<CmdId> {
        if !cmd.mergeable || self.fresh_local == 0 {
            return None;
        }
        let last = self.local.back()?;
        let within_window = cmd.time.saturating_sub(last.time) <= self.config.merge_window_ms as i64;
        let same_targets = cmd
            .ops
            .iter()
            .all(|op| last.ops.iter().any(|prev| prev.path == op.path));
        (last.mergeable && last.reverts.is_none() && within_window && same_targets).then(|| last.id.clone())
    }

    /// Apply ops on their nodes. Either every op applies or none does.
    fn apply_speculative(&mut self, owner: &str, ops: &[Op]) -> RepoResult<()> {
        let mut applied: Vec<(usize, usize)> = Vec::new();

        for (path, group) in group_by_path(ops) {
            let index = match self.nodes.get_or_build(&path, group[0].kind()) {
                Ok(index) => index,
                Err(e) => {
                    self.rollback_speculative(&applied);
                    return Err(self.fail(e));
                }
            };
            let Some(node) = self.nodes.node_mut(index) else {
                self.rollback_speculative(&applied);
                return Err(RepoError::InvalidCmd(format!("{} has no owning node", path)));
            };

            let before = node.local_len();
            let owned: Vec<Op> = group.into_iter().cloned().collect();
            if let Err(e) = node.apply_local(&mut self.document, owner, &self.client_id, &owned) {
                if let Err(undo_err) = node.truncate_local(&mut self.document, before) {
                    tracing::error!("[CmdRepo] Failed to roll back {}: {}", path, undo_err);
                }
                self.rollback_speculative(&applied);
                tracing::warn!("[CmdRepo] Rejected {}: {}", owner, e);
                return Err(self.fail(e));
            }
            applied.push((index, before));
        }
        Ok(())
    }

    fn rollback_speculative(&mut self, applied: &[(usize, usize)]) {
        for &(index, len) in applied.iter().rev() {
            if let Some(node) = self.nodes.node_mut(index) {
                if let Err(e) = node.truncate_local(&mut self.document, len) {
                    tracing::error!("[CmdRepo] Failed to roll back {}: {}", node.path(), e);
                }
            }
        }
    }

    // ----- receiving -----

    /// Accept the next contiguous run of the server stream.
    ///
    /// A batch that does not continue exactly where the last one ended is
    /// rejected and leaves the repo untouched.
    pub fn receive(&mut self, cmds: Vec<Cmd>) -> RepoResult<()> {
        self.ensure_live()?;
        if cmds.is_empty() {
            return Ok(());
        }

        let expected = self.last_known_version() + 1;
        for (offset, cmd) in cmds.iter().enumerate() {
            let want = expected + offset as u64;
            if cmd.version != Some(want) {
                tracing::warn!(
                    "[CmdRepo] Version gap: expected {}, got {:?} ({})",
                    want,
                    cmd.version,
                    cmd.id
                );
                return Err(RepoError::VersionGap {
                    expected: want,
                    got: cmd.version,
                });
            }
        }

        tracing::debug!(
            "[CmdRepo] Received versions {}..={}",
            expected,
            expected + cmds.len() as u64 - 1
        );
        self.fresh_local = 0;
        self.pending.extend(cmds);
        self.process_cmds()
    }

    /// Integrate pending cmds, then submit local ones if nothing is in flight.
    pub fn process_cmds(&mut self) -> RepoResult<()> {
        self.ensure_live()?;
        if self.view.is_some() {
            return Ok(());
        }

        while let Some(front) = self.pending.front() {
            let is_echo = self
                .posting
                .front()
                .map(|posted| posted.id == front.id)
                .unwrap_or(false);
            if is_echo {
                let (Some(echo), Some(posted)) = (self.pending.pop_front(), self.posting.pop_front()) else {
                    break;
                };
                self.process_posted(echo, posted)?;
                continue;
            }

            if front.client_id == self.client_id {
                let err = RepoError::AckMismatch {
                    expected: self.posting.front().map(|cmd| cmd.id.clone()),
                    got: front.id.clone(),
                };
                return Err(self.fail(err));
            }

            let mut run = Vec::new();
            while let Some(front) = self.pending.front() {
                if front.client_id == self.client_id {
                    break;
                }
                if let Some(cmd) = self.pending.pop_front() {
                    run.push(cmd);
                }
            }
            self.process_remote(run)?;
        }

        self.flush_local()
    }

    fn process_posted(&mut self, echo: Cmd, posted: Cmd) -> RepoResult<()> {
        let same_ops = echo.ops.len() == posted.ops.len()
            && echo.ops.iter().zip(&posted.ops).all(|(a, b)| a.id == b.id);
        let Some(version) = echo.version.filter(|_| same_ops) else {
            let err = RepoError::AckMismatch {
                expected: Some(posted.id),
                got: echo.id,
            };
            return Err(self.fail(err));
        };

        let mut cmd = echo;
        for op in &mut cmd.ops {
            op.order = Some(version);
        }

        for (path, group) in group_by_path(&cmd.ops) {
            let result = match self.nodes.index_of(&path).and_then(|i| self.nodes.node_mut(i)) {
                Some(node) => node.commit(&mut self.document, &cmd, &group),
                None => Err(RepoError::OpMismatch {
                    path: path.key(),
                    expected: group[0].id.clone(),
                    found: None,
                }),
            };
            result.map_err(|e| self.fail(e))?;
        }

        self.version = version;
        if self.posting.is_empty() {
            self.resends = 0;
        }
        tracing::info!("[CmdRepo] {} acknowledged at version {}", cmd.id, version);
        self.cmds.push(cmd);
        Ok(())
    }

    fn process_remote(&mut self, mut run: Vec<Cmd>) -> RepoResult<()> {
        let Some(last_version) = run.last().and_then(|cmd| cmd.version) else {
            return Ok(());
        };
        for cmd in &mut run {
            let version = cmd.version;
            for op in &mut cmd.ops {
                op.order = version;
            }
        }

        // ops of every cmd in the run, grouped by path in first-seen order
        let mut groups: Vec<(OpPath, Vec<Incoming<'_>>)> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for cmd in &run {
            for op in &cmd.ops {
                let path = op.node_path();
                let slot = *by_key.entry(path.key()).or_insert_with(|| {
                    groups.push((path, Vec::new()));
                    groups.len() - 1
                });
                groups[slot].1.push(Incoming { cmd, op });
            }
        }

        for (path, incoming) in &groups {
            let index = match self.nodes.get_or_build(path, incoming[0].op.kind()) {
                Ok(index) => index,
                Err(e) => return Err(self.fail(e)),
            };
            let result = match self.nodes.node_mut(index) {
                Some(node) => node.receive(&mut self.document, incoming),
                None => Ok(()),
            };
            result.map_err(|e| self.fail(e))?;
        }

        tracing::info!(
            "[CmdRepo] Integrated {} remote cmds up to version {}",
            run.len(),
            last_version
        );
        self.version = last_version;
        self.cmds.extend(run);
        Ok(())
    }

    fn flush_local(&mut self) -> RepoResult<()> {
        if !self.posting.is_empty() || !self.pending.is_empty() || self.view.is_some() {
            return Ok(());
        }

        let now = self.clock.now_ms();
        let mut batch = Vec::new();
        while batch.len() < self.config.max_batch.max(1) {
            if !self.local.front().map(|cmd| cmd.ready_at() <= now).unwrap_or(false) {
                break;
            }
            let Some(mut cmd) = self.local.pop_front() else {
                break;
            };
            cmd.base_version = self.version;
            for op in &mut cmd.ops {
                let current = self.nodes.find(&op.node_path()).and_then(|node| node.local_op(&op.id));
                if let Some(current) = current {
                    op.payload = current.payload.clone();
                }
            }
            batch.push(cmd);
        }
        if batch.is_empty() {
            return Ok(());
        }

        self.fresh_local = self.fresh_local.min(self.local.len());
        self.posted_at = now;
        self.resends = 0;
        tracing::info!(
            "[CmdRepo] Submitting {} cmds at base version {}",
            batch.len(),
            self.version
        );
        self.transport.submit(&batch);
        self.posting = batch.into();
        Ok(())
    }

    /// Drive time-based work: submit cmds whose delay elapsed and resend an
    /// unacknowledged batch with exponential backoff.
    pub fn tick(&mut self) -> RepoResult<()> {
        self.process_cmds()?;
        let Some(head) = self.posting.front() else {
            return Ok(());
        };

        let now = self.clock.now_ms();
        let wait = self.config.backoff_ms(self.resends) as i64;
        if now.saturating_sub(self.posted_at) < wait {
            return Ok(());
        }
        if let Some(max) = self.config.max_resend_attempts {
            if self.resends >= max {
                return Err(RepoError::SubmitTimeout {
                    cmd_id: head.id.clone(),
                    attempts: self.resends,
                });
            }
        }

        self.resends += 1;
        self.posted_at = now;
        tracing::warn!(
            "[CmdRepo] No acknowledgement for {} after {}ms, resending (attempt {})",
            head.id,
            wait,
            self.resends
        );
        let batch: Vec<Cmd> = self.posting.iter().cloned().collect();
        self.transport.submit(&batch);
        Ok(())
    }

    // ----- local undo -----

    pub fn can_undo_local(&self) -> bool {
        self.state == SessionState::Live && self.view.is_none() && self.fresh_local > 0 && !self.local.is_empty()
    }

    pub fn can_redo_local(&self) -> bool {
        self.state == SessionState::Live && self.view.is_none() && self.redo.can_redo()
    }

    /// How many local cmds can currently be undone in place.
    pub fn can_transact_undo_count(&self) -> usize {
        if self.view.is_some() {
            return 0;
        }
        self.fresh_local.min(self.local.len())
    }

    /// Revert the newest unsubmitted cmd in place, keeping it for redo.
    pub fn undo_local(&mut self) -> RepoResult<Option<Undone>> {
        self.ensure_writable()?;
        if !self.can_undo_local() {
            return Ok(None);
        }
        let Some(cmd) = self.local.pop_back() else {
            return Ok(None);
        };
        self.revert_local(&cmd, true)?;
        self.fresh_local -= 1;

        tracing::info!("[CmdRepo] Undid {} locally", cmd.id);
        let undone = Undone {
            cmd_id: cmd.id.clone(),
            selection: cmd.saved_selection.clone(),
        };
        self.redo.push(cmd);
        Ok(Some(undone))
    }

    /// Reapply the most recently undone local cmd.
    pub fn redo_local(&mut self) -> RepoResult<Option<Undone>> {
        self.ensure_writable()?;
        let Some(cmd) = self.redo.pop() else {
            return Ok(None);
        };
        for (path, _) in group_by_path(&cmd.ops) {
            let result = match self.nodes.index_of(&path).and_then(|i| self.nodes.node_mut(i)) {
                Some(node) => node.redo_local(&mut self.document, &cmd.id),
                None => Ok(()),
            };
            result.map_err(|e| self.fail(e))?;
        }

        tracing::info!("[CmdRepo] Redid {} locally", cmd.id);
        let undone = Undone {
            cmd_id: cmd.id.clone(),
            selection: cmd.selection_updater.after(&cmd),
        };
        self.local.push_back(cmd);
        self.fresh_local += 1;
        self.process_cmds()?;
        Ok(Some(undone))
    }

    /// Drop the newest unsubmitted cmd without keeping a redo record.
    pub fn discard_local(&mut self) -> RepoResult<Option<CmdId>> {
        self.ensure_writable()?;
        if !self.can_undo_local() {
            return Ok(None);
        }
        let Some(cmd) = self.local.pop_back() else {
            return Ok(None);
        };
        self.clear_redo();
        self.revert_local(&cmd, false)?;
        self.fresh_local -= 1;
        tracing::info!("[CmdRepo] Discarded {}", cmd.id);
        Ok(Some(cmd.id))
    }

    fn revert_local(&mut self, cmd: &Cmd, keep: bool) -> RepoResult<()> {
        for (path, _) in group_by_path(&cmd.ops).into_iter().rev() {
            let result = match self.nodes.index_of(&path).and_then(|i| self.nodes.node_mut(i)) {
                Some(node) => node.undo_local(&mut self.document, &cmd.id, keep),
                None => Ok(()),
            };
            result.map_err(|e| self.fail(e))?;
        }
        Ok(())
    }

    fn clear_redo(&mut self) {
        if !self.redo.can_redo() {
            return;
        }
        self.redo.clear();
        for node in self.nodes.nodes_mut() {
            node.clear_undone();
        }
    }

    // ----- general undo -----

    /// Undo any cmd by posting a new cmd that reverts its effect against
    /// the current state. Effects later cmds overwrote are left alone.
    /// Returns `None` when nothing is left to revert.
    pub fn undo(&mut self, cmd_id: &str) -> RepoResult<Option<Undone>> {
        self.ensure_writable()?;
        let target = self
            .find_cmd(cmd_id)
            .cloned()
            .ok_or_else(|| RepoError::UnknownCmd(cmd_id.to_string()))?;

        let mut ops = Vec::new();
        for (path, _) in group_by_path(&target.ops).into_iter().rev() {
            if !self.document.has_target(&path) {
                tracing::debug!("[CmdRepo] {} is gone, not undoing it for {}", path, cmd_id);
                continue;
            }
            let Some(node) = self.nodes.find(&path) else {
                continue;
            };
            for payload in node.invert(cmd_id)? {
                ops.push((path.clone(), payload));
            }
        }
        if ops.is_empty() {
            tracing::info!("[CmdRepo] Nothing left to undo for {}", cmd_id);
            return Ok(None);
        }

        let mut inverse = self.build_cmd(ops);
        inverse.reverts = Some(target.id.clone());
        inverse.description = target.description.as_ref().map(|d| format!("Undo {}", d));
        inverse.saved_selection = target.selection_updater.after(&target);
        inverse.selection_updater = SelectionUpdater::Fixed(target.saved_selection.clone());

        let inverse_id = self.post(inverse)?;
        tracing::info!("[CmdRepo] Posted {} to undo {}", inverse_id, cmd_id);
        Ok(Some(Undone {
            cmd_id: inverse_id,
            selection: target.saved_selection,
        }))
    }

    /// Redo a cmd undone by [`CmdRepo::undo`], given the undoing cmd.
    pub fn redo(&mut self, undo_cmd_id: &str) -> RepoResult<Option<Undone>> {
        let cmd = self
            .find_cmd(undo_cmd_id)
            .ok_or_else(|| RepoError::UnknownCmd(undo_cmd_id.to_string()))?;
        if cmd.reverts.is_none() {
            return Err(RepoError::NotAnUndo(undo_cmd_id.to_string()));
        }
        self.undo(undo_cmd_id)
    }

    // ----- history -----

    /// Show the document as it was at `version`. Local editing and
    /// integration of received cmds are suspended until
    /// [`CmdRepo::roll_to_latest`].
    pub fn roll_to_version(&mut self, version: u64) -> RepoResult<()> {
        self.ensure_live()?;
        if version > self.version {
            return Err(RepoError::UnknownVersion(version));
        }
        let from = self.view.unwrap_or(LIVE);
        if from == version {
            return Ok(());
        }
        self.roll(from, version)?;
        self.view = Some(version);
        tracing::info!("[CmdRepo] Showing version {}", version);
        Ok(())
    }

    pub fn roll_to_latest(&mut self) -> RepoResult<()> {
        self.ensure_live()?;
        let Some(from) = self.view else {
            return Ok(());
        };
        self.roll(from, LIVE)?;
        self.view = None;
        tracing::info!("[CmdRepo] Back to live version {}", self.version);
        self.process_cmds()
    }

    fn roll(&mut self, from: u64, to: u64) -> RepoResult<()> {
        let mut failure = None;
        {
            let nodes: Vec<&mut Box<dyn RepoNode>> = if to < from {
                self.nodes.nodes_mut().rev().collect()
            } else {
                self.nodes.nodes_mut().collect()
            };
            for node in nodes {
                if let Err(e) = node.roll(&mut self.document, from, to) {
                    failure = Some(e);
                    break;
                }
            }
        }
        match failure {
            Some(e) => Err(self.fail(e)),
            None => Ok(()),
        }
    }

    // ----- state -----

    fn ensure_live(&self) -> RepoResult<()> {
        match &self.state {
            SessionState::Live => Ok(()),
            SessionState::Desynced(reason) => Err(RepoError::Desynced(reason.clone())),
        }
    }

    fn ensure_writable(&self) -> RepoResult<()> {
        self.ensure_live()?;
        match self.view {
            Some(version) => Err(RepoError::HistoricalView(version)),
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: RepoError) -> RepoError {
        if error.is_integrity() && self.state == SessionState::Live {
            tracing::error!("[CmdRepo] {} is out of sync: {}", self.client_id, error);
            self.state = SessionState::Desynced(error.to_string());
        }
        error
    }
}

/// Ops grouped by owning node, groups in order of first appearance.
fn group_by_path<'a>(ops: impl IntoIterator<Item = &'a Op>) -> Vec<(OpPath, Vec<&'a Op>)> {
    let mut groups: Vec<(OpPath, Vec<&'a Op>)> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for op in ops {
        let path = op.node_path();
        match by_key.get(&path.key()) {
            Some(&slot) => groups[slot].1.push(op),
            None => {
                by_key.insert(path.key(), groups.len());
                groups.push((path, vec![op]));
            }
        }
    }
    groups
}
