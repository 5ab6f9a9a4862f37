//! Scalar properties: last writer in server order wins.

use super::crdt::{apply_lenient, Strategy};
use super::Entry;
use crate::errors::RepoResult;
use crate::op::{Op, OpKind, OpPayload};
use vellum_document::{DocumentError, DocumentTree, OpPath, Value};

#[derive(Debug)]
pub(crate) struct IdSetStrategy;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IdSetRecord {
    Skipped,
    Set { prior: Option<Value> },
}

fn value_of(op: &Op) -> Option<Value> {
    match &op.payload {
        OpPayload::IdSet { value } => value.clone(),
        _ => None,
    }
}

impl Strategy for IdSetStrategy {
    type Record = IdSetRecord;

    const KIND: OpKind = OpKind::IdSet;

    fn apply(doc: &mut dyn DocumentTree, path: &OpPath, op: &Op, _order: u64) -> Result<IdSetRecord, DocumentError> {
        let prior = doc.set_value(path, value_of(op))?;
        Ok(IdSetRecord::Set { prior })
    }

    /// A collection item can be taken away by its array node while a value
    /// written into it is still recorded here. The value left with the item.
    fn revert(doc: &mut dyn DocumentTree, path: &OpPath, op: &Op, record: &IdSetRecord) -> Result<(), DocumentError> {
        let IdSetRecord::Set { prior } = record else {
            return Ok(());
        };
        match doc.set_value(path, prior.clone()) {
            Ok(_) => Ok(()),
            Err(e) if e.is_missing_target() => {
                tracing::debug!("[IdSetNode] Nothing to revert for {} at {}: {}", op.id, path, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn skipped() -> IdSetRecord {
        IdSetRecord::Skipped
    }

    fn is_effective(record: &IdSetRecord) -> bool {
        matches!(record, IdSetRecord::Set { .. })
    }

    fn target(_op: &Op) -> &str {
        ""
    }

    fn invert(_op: &Op, record: &IdSetRecord) -> Option<OpPayload> {
        match record {
            IdSetRecord::Skipped => None,
            IdSetRecord::Set { prior } => Some(OpPayload::IdSet { value: prior.clone() }),
        }
    }

    /// Only the final value of an uncontended batch is written; the
    /// intermediate records are derived from the values in between.
    fn absorb(doc: &mut dyn DocumentTree, path: &OpPath, entries: &mut [Entry<IdSetRecord>]) -> RepoResult<()> {
        let Some(last) = entries.last() else {
            return Ok(());
        };
        let final_value = value_of(&last.op);

        let mut prior = match doc.get_value(path) {
            Ok(value) => value,
            Err(_) => {
                for entry in entries.iter_mut() {
                    entry.record = Some(apply_lenient::<Self>(doc, path, entry));
                }
                return Ok(());
            }
        };

        for entry in entries.iter_mut() {
            let value = value_of(&entry.op);
            entry.record = Some(IdSetRecord::Set {
                prior: std::mem::replace(&mut prior, value),
            });
        }
        doc.set_value(path, final_value)?;
        Ok(())
    }
}
