//! # Node registry
//!
//! Maps op paths to the repo nodes that own them. Nodes live in an arena and
//! refer to their parent and children by index; every prefix of a
//! registered path exists as an intermediate entry so the hierarchy can be
//! walked top-down.

use crate::errors::{RepoError, RepoResult};
use crate::node::{build_node, RepoNode};
use crate::op::OpKind;
use std::collections::HashMap;
use vellum_document::OpPath;

#[derive(Debug)]
struct RegistryEntry {
    path: OpPath,
    kind: OpKind,
    parent: Option<usize>,
    children: Vec<usize>,
    node: Option<Box<dyn RepoNode>>,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    entries: Vec<RegistryEntry>,
    index: HashMap<String, usize>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node for `path`, creating it (and any missing ancestors)
    /// on first use. A path keeps the kind it was first used with.
    pub fn get_or_build(&mut self, path: &OpPath, kind: OpKind) -> RepoResult<usize> {
        if let Some(&index) = self.index.get(&path.key()) {
            let entry = &mut self.entries[index];
            if entry.kind == kind || kind == OpKind::None {
                return Ok(index);
            }
            if entry.kind == OpKind::None {
                entry.kind = kind;
                entry.node = build_node(path, kind);
                tracing::debug!("[NodeRegistry] Upgraded {} to {:?}", path, kind);
                return Ok(index);
            }
            return Err(RepoError::NodeTypeMismatch {
                path: path.key(),
                existing: entry.kind,
                incoming: kind,
            });
        }

        let parent = if path.len() > 1 {
            Some(self.get_or_build(&path.prefix(path.len() - 1), OpKind::None)?)
        } else {
            None
        };

        let index = self.entries.len();
        self.entries.push(RegistryEntry {
            path: path.clone(),
            kind,
            parent,
            children: Vec::new(),
            node: build_node(path, kind),
        });
        if let Some(parent) = parent {
            self.entries[parent].children.push(index);
        }
        self.index.insert(path.key(), index);
        tracing::debug!("[NodeRegistry] Registered {} as {:?}", path, kind);
        Ok(index)
    }

    pub fn index_of(&self, path: &OpPath) -> Option<usize> {
        self.index.get(&path.key()).copied()
    }

    pub fn node(&self, index: usize) -> Option<&dyn RepoNode> {
        self.entries.get(index)?.node.as_deref()
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut (dyn RepoNode + 'static)> {
        self.entries.get_mut(index)?.node.as_deref_mut()
    }

    /// Node that owns `path`, if one was built.
    pub fn find(&self, path: &OpPath) -> Option<&dyn RepoNode> {
        self.node(self.index_of(path)?)
    }

    /// Every registered path with its kind and depth, parents before their
    /// children.
    pub fn outline(&self) -> Vec<(usize, &OpPath, OpKind)> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut stack: Vec<(usize, usize)> = self
            .entries
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, entry)| entry.parent.is_none())
            .map(|(index, _)| (0, index))
            .collect();
        while let Some((depth, index)) = stack.pop() {
            let entry = &self.entries[index];
            out.push((depth, &entry.path, entry.kind));
            stack.extend(entry.children.iter().rev().map(|&child| (depth + 1, child)));
        }
        out
    }

    /// Every typed node, in registration order.
    pub fn nodes_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut Box<dyn RepoNode>> {
        self.entries.iter_mut().filter_map(|entry| entry.node.as_mut())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediates_are_created_and_upgraded() {
        let mut registry = NodeRegistry::new();
        let fill_color = OpPath::new(["rect", "fills", "fill-1", "color"]);
        registry.get_or_build(&fill_color, OpKind::IdSet).unwrap();

        let fills = OpPath::new(["rect", "fills"]);
        assert!(registry.find(&fills).is_none());
        assert_eq!(registry.len(), 4);

        registry.get_or_build(&fills, OpKind::CrdtArray).unwrap();
        assert_eq!(registry.find(&fills).unwrap().kind(), OpKind::CrdtArray);
        registry
            .get_or_build(&OpPath::new(["label", "text"]), OpKind::Text)
            .unwrap();

        let outline: Vec<(usize, String, OpKind)> = registry
            .outline()
            .into_iter()
            .map(|(depth, path, kind)| (depth, path.key(), kind))
            .collect();
        assert_eq!(
            outline,
            vec![
                (0, "rect".to_string(), OpKind::None),
                (1, "rect/fills".to_string(), OpKind::CrdtArray),
                (2, "rect/fills/fill-1".to_string(), OpKind::None),
                (3, "rect/fills/fill-1/color".to_string(), OpKind::IdSet),
                (0, "label".to_string(), OpKind::None),
                (1, "label/text".to_string(), OpKind::Text),
            ]
        );
    }

    #[test]
    fn test_kind_mismatch_is_reported() {
        let mut registry = NodeRegistry::new();
        let text = OpPath::new(["label", "text"]);
        registry.get_or_build(&text, OpKind::Text).unwrap();

        let err = registry.get_or_build(&text, OpKind::IdSet).unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(
            registry.get_or_build(&OpPath::new(["label"]), OpKind::None).unwrap(),
            0
        );
    }
}
