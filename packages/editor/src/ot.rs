//! # Text transformation
//!
//! Positional text primitives are rebased with inclusion transformation.
//! `transform(op, against, against_first)` rewrites `op` so it applies after
//! `against`, where both were generated from the same text. `against_first`
//! says which of the two sorts first in the total order; it breaks ties
//! between inserts at the same position and decides which attribute write
//! wins on overlap.
//!
//! For any `a`, `b` generated from the same text:
//!
//! ```text
//! apply(apply(s, b), transform(a, b, f)) == apply(apply(s, a), transform(b, a, !f))
//! ```

use crate::op::TextOp;
use vellum_document::{runs_len, AttrChange, AttrTarget, DocumentError, DocumentTree, OpPath, TextRun};

/// Realized effect of one text primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum TextEffect {
    Inserted {
        start: usize,
        len: usize,
    },
    Removed {
        start: usize,
        runs: Vec<TextRun>,
    },
    Formatted {
        target: AttrTarget,
        key: String,
        changes: Vec<AttrChange>,
    },
}

pub fn transform(op: &TextOp, against: &TextOp, against_first: bool) -> Vec<TextOp> {
    if op.is_noop() {
        return Vec::new();
    }
    if against.is_noop() {
        return vec![op.clone()];
    }
    let rebased = match against {
        TextOp::Insert { start, .. } => past_insert(op, *start, against.len(), against_first),
        TextOp::Remove { start, len } => vec![past_remove(op, *start, *len)],
        TextOp::Attr {
            start,
            len,
            target,
            key,
            ..
        } => past_attr(op, *start, *len, *target, key, against_first),
    };
    rebased.into_iter().filter(|o| !o.is_noop()).collect()
}

/// Transform two sequences generated from the same text against each other.
/// Returns `(ops', against')`.
pub fn transform_pair(ops: &[TextOp], against: &[TextOp], against_first: bool) -> (Vec<TextOp>, Vec<TextOp>) {
    if ops.is_empty() || against.is_empty() {
        return (ops.to_vec(), against.to_vec());
    }
    if ops.len() == 1 && against.len() == 1 {
        return (
            transform(&ops[0], &against[0], against_first),
            transform(&against[0], &ops[0], !against_first),
        );
    }
    if ops.len() > 1 {
        let (mut head, against) = transform_pair(&ops[..1], against, against_first);
        let (tail, against) = transform_pair(&ops[1..], &against, against_first);
        head.extend(tail);
        (head, against)
    } else {
        let (ops, mut head) = transform_pair(ops, &against[..1], against_first);
        let (ops, tail) = transform_pair(&ops, &against[1..], against_first);
        head.extend(tail);
        (ops, head)
    }
}

pub fn transform_seq(ops: &[TextOp], against: &[TextOp], against_first: bool) -> Vec<TextOp> {
    transform_pair(ops, against, against_first).0
}

fn with_start(op: &TextOp, start: usize) -> TextOp {
    let mut op = op.clone();
    match &mut op {
        TextOp::Insert { start: s, .. } | TextOp::Remove { start: s, .. } | TextOp::Attr { start: s, .. } => {
            *s = start
        }
    }
    op
}

fn with_window(op: &TextOp, start: usize, len: usize) -> TextOp {
    let mut op = with_start(op, start);
    if let TextOp::Remove { len: l, .. } | TextOp::Attr { len: l, .. } = &mut op {
        *l = len;
    }
    op
}

fn past_insert(op: &TextOp, at: usize, inserted: usize, against_first: bool) -> Vec<TextOp> {
    match op {
        TextOp::Insert { start, .. } => {
            let shift = at < *start || (at == *start && against_first);
            vec![with_start(op, if shift { start.saturating_add(inserted) } else { *start })]
        }
        TextOp::Remove { start, len } | TextOp::Attr { start, len, .. } => {
            let (s, e) = (*start, start.saturating_add(*len));
            if at <= s {
                vec![with_window(op, s.saturating_add(inserted), *len)]
            } else if at >= e {
                vec![op.clone()]
            } else {
                // split around the inserted span, which must survive
                let right_start = match op {
                    TextOp::Remove { .. } => s.saturating_add(inserted),
                    _ => at.saturating_add(inserted),
                };
                vec![with_window(op, s, at - s), with_window(op, right_start, e - at)]
            }
        }
    }
}

fn past_remove(op: &TextOp, at: usize, removed: usize) -> TextOp {
    let end = at.saturating_add(removed);
    let map = |x: usize| {
        if x <= at {
            x
        } else if x >= end {
            x - removed
        } else {
            at
        }
    };
    match op {
        TextOp::Insert { start, .. } => with_start(op, map(*start)),
        TextOp::Remove { start, len } | TextOp::Attr { start, len, .. } => {
            let e = start.saturating_add(*len);
            let overlap = e.min(end).saturating_sub((*start).max(at));
            with_window(op, map(*start), len - overlap)
        }
    }
}

fn past_attr(
    op: &TextOp,
    at: usize,
    len: usize,
    target: AttrTarget,
    key: &str,
    against_first: bool,
) -> Vec<TextOp> {
    match op {
        TextOp::Attr {
            start,
            len: op_len,
            target: op_target,
            key: op_key,
            ..
        } if !against_first && *op_target == target && op_key == key => {
            // the later write owns the overlap
            let (s, e) = (*start, start.saturating_add(*op_len));
            let end = at.saturating_add(len);
            let mut pieces = Vec::new();
            if s < at {
                pieces.push(with_window(op, s, e.min(at) - s));
            }
            if e > end {
                let right = s.max(end);
                pieces.push(with_window(op, right, e - right));
            }
            pieces
        }
        _ => vec![op.clone()],
    }
}

/// Check that `ops` fit a text of length `len` when applied in sequence.
pub fn validate(mut len: usize, ops: &[TextOp]) -> Result<(), String> {
    for op in ops {
        match op {
            TextOp::Insert { start, .. } => {
                if *start > len {
                    return Err(format!("insert at {} past end {}", start, len));
                }
                len = len.saturating_add(op.len());
            }
            TextOp::Remove { start, len: n } => {
                if start.saturating_add(*n) > len {
                    return Err(format!("remove {}+{} past end {}", start, n, len));
                }
                len -= n;
            }
            TextOp::Attr { start, len: n, .. } => {
                if start.saturating_add(*n) > len {
                    return Err(format!("format {}+{} past end {}", start, n, len));
                }
            }
        }
    }
    Ok(())
}

/// Apply primitives in order. On failure the ones already applied are
/// reverted before the error is returned.
pub fn apply_ops(doc: &mut dyn DocumentTree, path: &OpPath, ops: &[TextOp]) -> Result<Vec<TextEffect>, DocumentError> {
    let mut effects = Vec::with_capacity(ops.len());
    for op in ops {
        match apply_one(doc, path, op) {
            Ok(effect) => effects.push(effect),
            Err(e) => {
                revert_ops(doc, path, &effects)?;
                return Err(e);
            }
        }
    }
    Ok(effects)
}

fn apply_one(doc: &mut dyn DocumentTree, path: &OpPath, op: &TextOp) -> Result<TextEffect, DocumentError> {
    Ok(match op {
        TextOp::Insert { start, runs } => TextEffect::Inserted {
            start: doc.text_insert(path, *start, runs)?,
            len: runs_len(runs),
        },
        TextOp::Remove { start, len } => {
            let (start, runs) = doc.text_remove(path, *start, *len)?;
            TextEffect::Removed { start, runs }
        }
        TextOp::Attr {
            start,
            len,
            target,
            key,
            value,
        } => TextEffect::Formatted {
            target: *target,
            key: key.clone(),
            changes: doc.text_format(path, *start, *len, *target, key, value.as_ref())?,
        },
    })
}

pub fn revert_ops(doc: &mut dyn DocumentTree, path: &OpPath, effects: &[TextEffect]) -> Result<(), DocumentError> {
    for effect in effects.iter().rev() {
        match effect {
            TextEffect::Inserted { start, len } => {
                doc.text_remove(path, *start, *len)?;
            }
            TextEffect::Removed { start, runs } => {
                doc.text_insert(path, *start, runs)?;
            }
            TextEffect::Formatted { target, key, changes } => {
                for change in changes {
                    doc.text_format(path, change.start, change.len, *target, key, change.prior.as_ref())?;
                }
            }
        }
    }
    Ok(())
}

/// Primitives that undo `effects`, valid right after they were applied.
pub fn invert_effects(effects: &[TextEffect]) -> Vec<TextOp> {
    let mut inverse = Vec::new();
    for effect in effects.iter().rev() {
        match effect {
            TextEffect::Inserted { start, len } => inverse.push(TextOp::Remove {
                start: *start,
                len: *len,
            }),
            TextEffect::Removed { start, runs } => inverse.push(TextOp::Insert {
                start: *start,
                runs: runs.clone(),
            }),
            TextEffect::Formatted { target, key, changes } => {
                inverse.extend(changes.iter().map(|change| TextOp::Attr {
                    start: change.start,
                    len: change.len,
                    target: *target,
                    key: key.clone(),
                    value: change.prior.clone(),
                }))
            }
        }
    }
    inverse.retain(|op| !op.is_noop());
    inverse
}
