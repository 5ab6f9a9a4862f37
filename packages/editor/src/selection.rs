//! Selection state carried by cmds so undo/redo can put the user back where
//! they were.

use crate::cmd::Cmd;
use crate::op::{OpPayload, TextOp};
use serde::{Deserialize, Serialize};
use vellum_document::ShapeId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSelection {
    pub shape: ShapeId,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub shapes: Vec<ShapeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextSelection>,
}

impl Selection {
    pub fn shapes<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ShapeId>,
    {
        Self {
            shapes: ids.into_iter().map(Into::into).collect(),
            text: None,
        }
    }

    pub fn caret(shape: impl Into<ShapeId>, at: usize) -> Self {
        let shape = shape.into();
        Self {
            shapes: vec![shape.clone()],
            text: Some(TextSelection {
                shape,
                start: at,
                end: at,
            }),
        }
    }
}

/// Computes the selection to show after a cmd is (re)applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "selection")]
pub enum SelectionUpdater {
    #[default]
    None,
    /// Put back the selection saved before the cmd.
    Restore,
    /// Place the caret after the last text primitive.
    FollowText,
    /// Select every shape the cmd touched.
    SelectShapes,
    /// Always this selection.
    Fixed(Option<Selection>),
}

impl SelectionUpdater {
    pub fn after(&self, cmd: &Cmd) -> Option<Selection> {
        match self {
            SelectionUpdater::None => None,
            SelectionUpdater::Restore => cmd.saved_selection.clone(),
            SelectionUpdater::Fixed(selection) => selection.clone(),
            SelectionUpdater::FollowText => cmd.ops.iter().rev().find_map(|op| {
                let shape = op.path.head()?;
                let last = op.text_ops().last()?;
                let (start, end) = match last {
                    TextOp::Insert { start, .. } => (start + last.len(), start + last.len()),
                    TextOp::Remove { start, .. } => (*start, *start),
                    TextOp::Attr { start, len, .. } => (*start, start + len),
                };
                Some(Selection {
                    shapes: vec![shape.to_string()],
                    text: Some(TextSelection {
                        shape: shape.to_string(),
                        start,
                        end,
                    }),
                })
            }),
            SelectionUpdater::SelectShapes => {
                let mut shapes: Vec<ShapeId> = Vec::new();
                for op in &cmd.ops {
                    let id = match &op.payload {
                        OpPayload::CrdtTree(mv) if mv.to.is_none() => continue,
                        OpPayload::CrdtTree(mv) => mv.shape.clone(),
                        _ => match op.path.head() {
                            Some(head) => head.to_string(),
                            None => continue,
                        },
                    };
                    if !shapes.contains(&id) {
                        shapes.push(id);
                    }
                }
                Some(Selection::shapes(shapes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;
    use vellum_document::OpPath;

    #[test]
    fn test_follow_text_places_caret_after_insert() {
        let cmd = Cmd::new(
            "a-1",
            "a",
            vec![Op::new(
                "a-2",
                OpPath::new(["label", "text"]),
                OpPayload::Text(vec![TextOp::insert(4, "abc")]),
            )],
        );

        let selection = SelectionUpdater::FollowText.after(&cmd).unwrap();
        assert_eq!(selection, Selection::caret("label", 7));
    }

    #[test]
    fn test_restore_returns_saved_selection() {
        let cmd = Cmd::new("a-1", "a", vec![]).with_selection(Selection::shapes(["rect-1"]));
        assert_eq!(
            SelectionUpdater::Restore.after(&cmd),
            Some(Selection::shapes(["rect-1"]))
        );
        assert_eq!(SelectionUpdater::None.after(&cmd), None);
    }
}
