//! Property tests: replicas converge under arbitrary interleavings of edits,
//! submissions and deliveries, and text transformation commutes pairwise.

mod common;

use common::*;
use proptest::prelude::*;
use proptest::test_runner::Config;
use serde_json::json;
use vellum_document::PositionKey;
use vellum_editor::{ot, ArrayMove, CmdRepo, OpPath, OpPayload, Outbox, TextOp, TreeMove, TreeSlot};

const CLIENTS: usize = 3;
const SHAPES: [&str; 3] = ["a", "b", "rect"];
const PARENTS: [&str; 5] = ["page", "a", "b", "rect", "doc"];
const FILLS: [&str; 3] = ["fill-1", "fill-2", "fill-3"];

#[derive(Debug, Clone)]
enum Edit {
    Type { at: usize, text: String },
    Erase { at: usize, len: usize },
    Bold { at: usize, len: usize, on: bool },
    Set(i64),
    Move { shape: usize, parent: usize, key: u16, on_page: bool },
    Delete { shape: usize, on_page: bool },
    Fill { item: usize, key: u16 },
    Unfill { item: usize },
    Recolor { item: usize, color: u8 },
}

#[derive(Debug, Clone)]
enum Step {
    Edit { client: usize, edit: Edit },
    Upload(usize),
    Deliver(usize),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (0usize..40, "[a-z]{1,3}").prop_map(|(at, text)| Edit::Type { at, text }),
        2 => (0usize..40, 1usize..4).prop_map(|(at, len)| Edit::Erase { at, len }),
        1 => (0usize..40, 1usize..6, any::<bool>()).prop_map(|(at, len, on)| Edit::Bold { at, len, on }),
        1 => (0i64..100).prop_map(Edit::Set),
        2 => hierarchy_edit(),
        2 => fill_edit(),
    ]
}

fn hierarchy_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (0usize..3, 0usize..5, 0u16..50, any::<bool>())
            .prop_map(|(shape, parent, key, on_page)| Edit::Move { shape, parent, key, on_page }),
        1 => (0usize..3, any::<bool>()).prop_map(|(shape, on_page)| Edit::Delete { shape, on_page }),
    ]
}

fn fill_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        2 => (0usize..3, 0u16..40).prop_map(|(item, key)| Edit::Fill { item, key }),
        1 => (0usize..3).prop_map(|item| Edit::Unfill { item }),
        3 => (0usize..3, any::<u8>()).prop_map(|(item, color)| Edit::Recolor { item, color }),
    ]
}

/// Edits whose inverses compose back to the original text.
fn typing() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (0usize..40, "[a-z]{1,3}").prop_map(|(at, text)| Edit::Type { at, text }),
        1 => (0usize..40, 1usize..6, any::<bool>()).prop_map(|(at, len, on)| Edit::Bold { at, len, on }),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    steps_of(edit())
}

fn steps_of(edits: impl Strategy<Value = Edit>) -> impl Strategy<Value = Step> {
    prop_oneof![
        5 => (0..CLIENTS, edits).prop_map(|(client, edit)| Step::Edit { client, edit }),
        2 => (0..CLIENTS).prop_map(Step::Upload),
        2 => (0..CLIENTS).prop_map(Step::Deliver),
    ]
}

/// Turn a generated edit into a payload valid for the replica's current text.
fn payload(edit: &Edit, text_len: usize) -> Option<(OpPath, OpPayload)> {
    // the trailing paragraph end is never touched
    let content = text_len.saturating_sub(1);
    let range = |at: usize, len: usize| {
        (content > 0).then(|| {
            let start = at % content;
            (start, len.min(content - start))
        })
    };

    match edit {
        Edit::Type { at, text } => Some(type_text(at % (content + 1), text)),
        Edit::Erase { at, len } => range(*at, *len).map(|(start, len)| erase(start, len)),
        Edit::Bold { at, len, on } => range(*at, *len).map(|(start, len)| {
            (
                label_path(),
                OpPayload::Text(vec![TextOp::span_attr(start, len, "bold", Some(json!(on)))]),
            )
        }),
        Edit::Set(value) => Some(set("x", *value)),
        Edit::Move {
            shape,
            parent,
            key,
            on_page,
        } => Some((
            tree_path(*on_page),
            OpPayload::CrdtTree(TreeMove {
                shape: SHAPES[*shape].to_string(),
                to: Some(TreeSlot {
                    parent: PARENTS[*parent].to_string(),
                    key: PositionKey::from_digits(vec![*key]),
                }),
                data: None,
            }),
        )),
        Edit::Delete { shape, on_page } => Some((
            tree_path(*on_page),
            OpPayload::CrdtTree(TreeMove {
                shape: SHAPES[*shape].to_string(),
                to: None,
                data: None,
            }),
        )),
        Edit::Fill { item, key } => Some((
            fills_path(),
            OpPayload::CrdtArray(ArrayMove {
                item: FILLS[*item].to_string(),
                to: Some(PositionKey::from_digits(vec![*key])),
                data: Some(json!({ "color": "white" })),
            }),
        )),
        Edit::Unfill { item } => Some((
            fills_path(),
            OpPayload::CrdtArray(ArrayMove {
                item: FILLS[*item].to_string(),
                to: None,
                data: None,
            }),
        )),
        Edit::Recolor { item, color } => Some(fill_field(FILLS[*item], "color", &format!("#{:02x}", color))),
    }
}

fn tree_path(on_page: bool) -> OpPath {
    if on_page {
        page_shapes_path()
    } else {
        shapes_path()
    }
}

/// Run `steps`, settle, and check every replica and a late joiner agree.
fn check_convergence(steps: &[Step]) -> Result<(), TestCaseError> {
    let mut hub = Hub::new(&["alice", "bob", "carol"]);
    for step in steps {
        run_step(&mut hub, step)?;
    }
    hub.sync();
    hub.assert_converged();

    // a late joiner replaying the log lands on the same document
    let mut observer = CmdRepo::new("observer", seed_doc(), Outbox::new());
    observer.receive(hub.server.since(0)).unwrap();
    prop_assert_eq!(observer.document().snapshot(), hub.replicas[0].document().snapshot());
    Ok(())
}

fn run_step(hub: &mut Hub, step: &Step) -> Result<(), TestCaseError> {
    match step {
        Step::Upload(client) => hub.upload(*client),
        Step::Deliver(client) => hub.deliver(*client),
        Step::Edit { client, edit } => {
            let replica = &mut hub.replicas[*client];
            let text_len = replica.document().text("label").map(|t| t.len()).unwrap_or(0);
            let Some(op) = payload(edit, text_len) else {
                return Ok(());
            };
            let cmd = replica.build_cmd([op]);
            // moves into a descendant are rejected locally, which is fine
            if let Err(e) = replica.post(cmd) {
                prop_assert!(!e.is_integrity(), "integrity violation: {}", e);
            }
        }
    }
    Ok(())
}

/// A text op valid at `len`, with the length after applying it.
fn text_op(kind: u8, a: usize, b: usize, on: bool, len: usize) -> (TextOp, usize) {
    let content = len - 1;
    match kind % 3 {
        0 => (TextOp::insert(a % len, &"xyz"[..1 + b % 3]), len + 1 + b % 3),
        1 if content > 0 => {
            let start = a % content;
            let n = (1 + b % 4).min(content - start);
            (TextOp::remove(start, n), len - n)
        }
        _ if content > 0 => {
            let start = a % content;
            let n = (1 + b % 6).min(content - start);
            (TextOp::span_attr(start, n, "bold", Some(json!(on))), len)
        }
        _ => (TextOp::insert(0, "q"), len + 1),
    }
}

fn text_seq(raw: &[(u8, usize, usize, bool)], mut len: usize) -> Vec<TextOp> {
    let mut ops = Vec::new();
    for &(kind, a, b, on) in raw {
        let (op, next) = text_op(kind, a, b, on, len);
        ops.push(op);
        len = next;
    }
    ops
}

fn apply_text(ops_first: &[TextOp], ops_then: &[TextOp]) -> vellum_document::RichText {
    let mut doc = seed_doc();
    ot::apply_ops(&mut doc, &label_path(), ops_first).unwrap();
    ot::apply_ops(&mut doc, &label_path(), ops_then).unwrap();
    doc.text("label").cloned().unwrap_or_default()
}

proptest! {
    #![proptest_config(Config::with_cases(64))]

    #[test]
    fn prop_replicas_converge(steps in prop::collection::vec(step(), 1..40)) {
        check_convergence(&steps)?;
    }

    #[test]
    fn prop_fill_fields_and_fill_moves_converge(steps in prop::collection::vec(steps_of(fill_edit()), 1..30)) {
        check_convergence(&steps)?;
    }

    #[test]
    fn prop_moves_through_page_and_root_converge(steps in prop::collection::vec(steps_of(hierarchy_edit()), 1..30)) {
        check_convergence(&steps)?;
    }

    #[test]
    fn prop_text_transform_commutes(
        a in prop::collection::vec((any::<u8>(), 0usize..40, 0usize..8, any::<bool>()), 1..4),
        b in prop::collection::vec((any::<u8>(), 0usize..40, 0usize..8, any::<bool>()), 1..4),
        b_first in any::<bool>(),
    ) {
        let base_len = "Hello world\n".chars().count();
        let a = text_seq(&a, base_len);
        let b = text_seq(&b, base_len);

        let (a_past_b, b_past_a) = ot::transform_pair(&a, &b, b_first);
        prop_assert_eq!(apply_text(&b, &a_past_b), apply_text(&a, &b_past_a));
    }

    #[test]
    fn prop_undo_restores_typing(edits in prop::collection::vec(typing(), 1..12)) {
        let mut hub = Hub::new(&["alice"]);
        let original = hub.replicas[0].document().snapshot();
        let mut posted = Vec::new();
        for edit in &edits {
            let text_len = hub.replicas[0].document().text("label").map(|t| t.len()).unwrap_or(0);
            let Some(op) = payload(edit, text_len) else { continue };
            let replica = &mut hub.replicas[0];
            let cmd = replica.build_cmd([op]);
            if let Ok(id) = replica.post(cmd) {
                posted.push(id);
            }
            hub.sync();
        }

        for id in posted.iter().rev() {
            hub.replicas[0].undo(id).unwrap();
            hub.sync();
        }
        prop_assert_eq!(hub.replicas[0].document().snapshot(), original);
    }
}
