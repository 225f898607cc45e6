//! port.rs
//! Input/output slots of a stage: peer connections plus the held data root.

use super::AlgorithmId;
use crate::information::{InfoKey, Information};
use crate::node::{NodeId, NodeRegistry, NodeTypeId};
use crate::object::Object;
use crate::value::Value;
use smallvec::SmallVec;

const DATA_ROOT_NAME: &str = "port_data";
const EXPORT_ROOT_NAME: &str = "port_export";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Input,
    Output,
}

/// Address of a port inside a `Pipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId {
    pub algorithm: AlgorithmId,
    pub direction: Direction,
    pub index: usize,
}

impl PortId {
    pub fn input(algorithm: AlgorithmId, index: usize) -> Self {
        Self { algorithm, direction: Direction::Input, index }
    }

    pub fn output(algorithm: AlgorithmId, index: usize) -> Self {
        Self { algorithm, direction: Direction::Output, index }
    }

    pub fn is_output(&self) -> bool { self.direction == Direction::Output }
}

#[derive(Debug, Clone)]
pub struct Port {
    id: PortId,
    object: Object,
    information: Information,
    connections: SmallVec<[PortId; 1]>,
    data: Option<NodeId>,
}

impl Port {
    pub(crate) fn new(id: PortId) -> Self {
        Self {
            id,
            object: Object::new(),
            information: Information::new(),
            connections: SmallVec::new(),
            data: None,
        }
    }

    pub fn id(&self) -> PortId { self.id }
    pub fn index(&self) -> usize { self.id.index }
    pub fn algorithm(&self) -> AlgorithmId { self.id.algorithm }

    pub fn timestamp(&self) -> u64 { self.object.timestamp() }
    pub fn modified(&mut self) { self.object.modified(); }

    // --- Information ---

    pub fn information(&self) -> &Information { &self.information }

    pub fn information_value(&self, key: &str, default: Value) -> Value {
        self.information.value_or(key, default)
    }

    /// An invalid value removes the key. Stamps the port on change.
    pub fn set_information(&mut self, key: &str, value: Value) -> bool {
        let changed = self.information.write(key, value);
        if changed {
            self.modified();
        }
        changed
    }

    pub fn info<K: InfoKey>(&self) -> K::Type { self.information.get::<K>() }

    pub fn set_info<K: InfoKey>(&mut self, value: K::Type) -> bool {
        self.set_information(K::NAME, value.into())
    }

    // --- Connections ---

    pub fn connections(&self) -> &[PortId] { &self.connections }

    pub fn connection(&self, index: usize) -> Option<PortId> {
        let found = self.connections.get(index).copied();
        if found.is_none() {
            tracing::error!("Requested connection {} outside of the current range of {:?}", index, self.id);
        }
        found
    }

    /// Replaces every connection by `port`, or removes them all with `None`.
    pub fn set_connection(&mut self, port: Option<PortId>) -> bool {
        if let Some(port) = port {
            if self.connections.as_slice() == [port] { return false; }
        } else if self.connections.is_empty() {
            return false;
        }
        self.connections.clear();
        self.connections.extend(port);
        self.modified();
        true
    }

    pub fn add_connection(&mut self, port: PortId) -> bool {
        if self.connections.contains(&port) { return false; }
        self.connections.push(port);
        self.modified();
        true
    }

    pub fn remove_connection(&mut self, port: PortId) -> bool {
        let Some(pos) = self.connections.iter().position(|c| *c == port) else { return false };
        self.connections.remove(pos);
        self.modified();
        true
    }

    pub fn clear_connections(&mut self) -> bool {
        if self.connections.is_empty() { return false; }
        self.connections.clear();
        self.modified();
        true
    }

    // --- Data ---

    /// Root node whose children are the held slices.
    pub fn data(&self) -> Option<NodeId> { self.data }

    pub fn data_at(&self, nodes: &NodeRegistry, index: usize) -> Option<NodeId> {
        self.data.and_then(|root| nodes.children(root).get(index).copied())
    }

    /// `data_at`, restricted to slices castable to `type_id`.
    pub fn data_as(&self, nodes: &NodeRegistry, index: usize, type_id: NodeTypeId) -> Option<NodeId> {
        self.data_at(nodes, index).filter(|n| nodes.is_castable(*n, type_id))
    }

    pub fn slice_count(&self, nodes: &NodeRegistry) -> usize {
        self.data.map_or(0, |root| nodes.children(root).len())
    }

    /// Makes `data` the held slices, in order. Holding the same set again is
    /// a no-op. Previous slices left without any other owner are deleted.
    pub fn hold_data(&mut self, nodes: &mut NodeRegistry, data: &[NodeId]) {
        let mut incoming: Vec<NodeId> = Vec::with_capacity(data.len());
        for &node in data {
            if !nodes.contains(node) {
                tracing::warn!("Ignoring unknown node {:?} held by {:?}", node, self.id);
            } else if !incoming.contains(&node) {
                incoming.push(node);
            }
        }

        let root = match self.data.filter(|r| nodes.contains(*r)) {
            Some(root) => root,
            None => {
                let root = nodes.create(DATA_ROOT_NAME);
                self.data = Some(root);
                root
            }
        };

        let current = nodes.children(root).to_vec();
        if current.len() == incoming.len() && current.iter().all(|c| incoming.contains(c)) {
            return;
        }

        // Detach everything before attaching, so that slices kept across the
        // swap are never seen without an owner.
        for &child in &current {
            nodes.remove_child(root, child);
        }
        for &node in &incoming {
            nodes.append_child(root, node);
        }
        for child in current {
            if !nodes.has_parents(child) {
                nodes.destroy(child);
            }
        }
        self.modified();
    }

    pub fn hold_node(&mut self, nodes: &mut NodeRegistry, node: NodeId) {
        self.hold_data(nodes, &[node]);
    }

    /// Fresh root sharing (not copying) the held slices. The caller owns it
    /// and releases it with `NodeRegistry::destroy`.
    pub fn export_data(&self, nodes: &mut NodeRegistry) -> NodeId {
        let export = nodes.create(EXPORT_ROOT_NAME);
        if let Some(root) = self.data {
            for child in nodes.children(root).to_vec() {
                nodes.append_parent(child, export);
            }
        }
        export
    }

    /// Deletes the data root, and with it every slice nobody else shares.
    pub(crate) fn release_data(&mut self, nodes: &mut NodeRegistry) {
        if let Some(root) = self.data.take() {
            nodes.destroy(root);
        }
    }
}
