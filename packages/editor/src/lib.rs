//! # Vellum Editor
//!
//! Collaborative reconciliation engine for the vellum document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ CmdRepo: one replica                        │
//! │  - local / posting / pending / cmds queues  │
//! │  - version gate + acknowledgement checks    │
//! │  - undo, redo and history rollback          │
//! └─────────────────────────────────────────────┘
//!                     ↓ ops grouped by path
//! ┌─────────────────────────────────────────────┐
//! │ RepoNode per path                           │
//! │  - IdSet: last writer wins                  │
//! │  - CrdtArray / CrdtTree: keyed slots        │
//! │  - Text: operational transformation         │
//! └─────────────────────────────────────────────┘
//!                     ↓ DocumentTree hooks
//! ┌─────────────────────────────────────────────┐
//! │ vellum-document                             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Server order is the truth**: every replica ends on committed cmds in
//!    version order, with its own speculative cmds on top
//! 2. **Optimistic clients**: local edits show immediately and are rebased
//!    when foreign cmds arrive
//! 3. **Exact revert**: nodes record what each op actually changed
//! 4. **Skip, never fail**: a committed op that no longer applies becomes a
//!    no-op on every replica alike
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vellum_editor::{CmdRepo, OpPayload, Outbox};
//! use vellum_document::{Document, OpPath};
//!
//! let mut repo = CmdRepo::new("client-1", Document::new(), Outbox::new());
//!
//! // Apply an edit optimistically
//! let cmd = repo.build_cmd([(
//!     OpPath::new(["rect-1", "x"]),
//!     OpPayload::IdSet { value: Some(42.into()) },
//! )]);
//! repo.post(cmd)?;
//!
//! // Feed the server stream back in
//! repo.receive(cmds_from_server)?;
//! ```

mod cmd;
mod config;
mod errors;
mod node;
mod op;
pub mod ot;
mod registry;
mod repo;
mod selection;
mod transport;
mod undo;

pub use cmd::{Cmd, CmdId, IdGenerator};
pub use config::{Clock, ManualClock, RepoConfig, SystemClock};
pub use errors::{RepoError, RepoResult};
pub use node::{Incoming, RepoNode};
pub use op::{ArrayMove, Op, OpId, OpKind, OpPayload, TextOp, TreeMove, TreeSlot};
pub use registry::NodeRegistry;
pub use repo::{CmdRepo, SessionState};
pub use selection::{Selection, SelectionUpdater, TextSelection};
pub use transport::{Outbox, Sequencer, Transport};
pub use undo::{RedoStack, Undone};

// Re-export document types for convenience
pub use vellum_document::{Document, DocumentTree, OpPath};
