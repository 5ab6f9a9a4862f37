//! Shared fixtures: a seeded document and a hub that routes batches between
//! replicas through an in-memory sequencer.

#![allow(dead_code)]

use serde_json::json;
use std::collections::BTreeMap;
use vellum_document::{
    CollectionItem, Document, PositionKey, RichText, ShapeData, ShapeKind, Slot, ROOT_ID, TEXT_SELECTOR,
};
use vellum_editor::{CmdRepo, ManualClock, OpPath, OpPayload, Outbox, RepoConfig, Sequencer, TextOp};

pub type Replica = CmdRepo<Document, Outbox>;

/// Page with two frames, a rect carrying props and fills, and a text label.
pub fn seed_doc() -> Document {
    let mut rect = ShapeData::new("rect", ShapeKind::Rect)
        .with_prop("x", json!(0))
        .with_prop("y", json!(0));
    let mut collections = BTreeMap::new();
    collections.insert(
        "fills".to_string(),
        vec![CollectionItem {
            id: "fill-1".to_string(),
            slot: Slot::new(PositionKey::from_digits(vec![10]), 0),
            data: json!({ "color": "red" }),
        }],
    );
    rect.collections = collections;

    let page = ShapeData::new("page", ShapeKind::Page)
        .with_child(PositionKey::from_digits(vec![10]), ShapeData::new("a", ShapeKind::Frame))
        .with_child(PositionKey::from_digits(vec![20]), ShapeData::new("b", ShapeKind::Frame))
        .with_child(PositionKey::from_digits(vec![30]), rect)
        .with_child(
            PositionKey::from_digits(vec![40]),
            ShapeData::new("label", ShapeKind::Text).with_text(RichText::from_plain("Hello world\n")),
        );

    let mut doc = Document::new();
    doc.attach(&page, ROOT_ID, PositionKey::first())
        .expect("seed document");
    doc
}

pub fn prop_path(field: &str) -> OpPath {
    OpPath::new(["rect", field])
}

pub fn label_path() -> OpPath {
    OpPath::new(["label", TEXT_SELECTOR])
}

pub fn fills_path() -> OpPath {
    OpPath::new(["rect", "fills"])
}

pub fn shapes_path() -> OpPath {
    OpPath::new([ROOT_ID, "shapes"])
}

/// Hierarchy of the seed page only.
pub fn page_shapes_path() -> OpPath {
    OpPath::new(["page", "shapes"])
}

pub fn fill_field(item: &str, field: &str, value: &str) -> (OpPath, OpPayload) {
    (
        OpPath::new(["rect", "fills", item, field]),
        OpPayload::IdSet {
            value: Some(json!(value)),
        },
    )
}

pub fn set(field: &str, value: i64) -> (OpPath, OpPayload) {
    (
        prop_path(field),
        OpPayload::IdSet {
            value: Some(json!(value)),
        },
    )
}

pub fn type_text(start: usize, text: &str) -> (OpPath, OpPayload) {
    (label_path(), OpPayload::Text(vec![TextOp::insert(start, text)]))
}

pub fn erase(start: usize, len: usize) -> (OpPath, OpPayload) {
    (label_path(), OpPayload::Text(vec![TextOp::remove(start, len)]))
}

pub struct Hub {
    pub clock: ManualClock,
    pub server: Sequencer,
    pub replicas: Vec<Replica>,
}

impl Hub {
    pub fn new(clients: &[&str]) -> Self {
        Self::with_config(clients, RepoConfig::default())
    }

    pub fn with_config(clients: &[&str], config: RepoConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let clock = ManualClock::new(1_000);
        let replicas = clients
            .iter()
            .map(|client| {
                CmdRepo::with_config(*client, seed_doc(), Outbox::new(), config.clone()).with_clock(clock.clone())
            })
            .collect();
        Self {
            clock,
            server: Sequencer::new(),
            replicas,
        }
    }

    /// Build and post a cmd on replica `index`.
    pub fn post<I>(&mut self, index: usize, ops: I) -> String
    where
        I: IntoIterator<Item = (OpPath, OpPayload)>,
    {
        let replica = &mut self.replicas[index];
        let cmd = replica.build_cmd(ops);
        replica.post(cmd).expect("post")
    }

    /// Hand what replica `index` submitted to the server.
    pub fn upload(&mut self, index: usize) {
        for batch in self.replicas[index].transport_mut().drain() {
            self.server.submit(&batch);
        }
    }

    pub fn upload_all(&mut self) {
        for index in 0..self.replicas.len() {
            self.upload(index);
        }
    }

    /// Send replica `index` everything sequenced that it has not seen.
    pub fn deliver(&mut self, index: usize) {
        let replica = &mut self.replicas[index];
        let missing = self.server.since(replica.last_known_version());
        replica.receive(missing).expect("receive");
    }

    pub fn deliver_all(&mut self) {
        for index in 0..self.replicas.len() {
            self.deliver(index);
        }
    }

    /// Exchange batches until every replica is settled.
    pub fn sync(&mut self) {
        for _ in 0..64 {
            self.upload_all();
            self.deliver_all();
            let done = self
                .replicas
                .iter()
                .all(|replica| replica.is_settled() && replica.version() == self.server.version());
            if done {
                return;
            }
            self.clock.advance(1_000);
            for replica in &mut self.replicas {
                replica.tick().expect("tick");
            }
        }
        panic!("replicas did not settle");
    }

    pub fn text(&self, index: usize) -> String {
        self.replicas[index]
            .document()
            .text("label")
            .map(|text| text.to_plain())
            .unwrap_or_default()
    }

    pub fn assert_converged(&self) {
        let expected = self.replicas[0].document().snapshot();
        for replica in &self.replicas[1..] {
            assert_eq!(
                replica.document().snapshot(),
                expected,
                "{} diverged from {}",
                replica.client_id(),
                self.replicas[0].client_id()
            );
        }
    }
}
