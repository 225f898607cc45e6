//! registry.rs
//! Arena of nodes forming a multi-parent DAG.
//!
//! Every node is shared by its parents: detaching a node from its last parent
//! through `clear`/`destroy` deletes it, plain `remove_child` never does.
//! Slots are never reused, so a stale `NodeId` simply resolves to nothing.

use super::kind::{Basic, NodeKind, NodeTypeId};
use super::query::ChildQuery;
use crate::object::Object;
use crate::value::Value;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

#[derive(Debug, Clone)]
struct NodeEntry {
    object: Object,
    name: String,
    description: String,
    properties: HashMap<String, Value>,
    // Most nodes have one parent, exported data has two.
    parents: SmallVec<[NodeId; 2]>,
    children: Vec<NodeId>,
    kind: Box<dyn NodeKind>,
}

impl NodeEntry {
    fn new(name: String, kind: Box<dyn NodeKind>) -> Self {
        Self {
            object: Object::new(),
            name,
            description: String::new(),
            properties: HashMap::new(),
            parents: SmallVec::new(),
            children: Vec::new(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    slots: Vec<Option<NodeEntry>>,
}

impl NodeRegistry {
    pub fn new() -> Self { Self::default() }

    /// Number of live nodes.
    pub fn len(&self) -> usize { self.slots.iter().filter(|s| s.is_some()).count() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn contains(&self, id: NodeId) -> bool { self.entry(id).is_some() }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().enumerate().filter(|(_, s)| s.is_some()).map(|(i, _)| NodeId::new(i))
    }

    #[inline(always)]
    fn entry(&self, id: NodeId) -> Option<&NodeEntry> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    #[inline(always)]
    fn entry_mut(&mut self, id: NodeId) -> Option<&mut NodeEntry> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn label(&self, id: NodeId) -> &str {
        self.entry(id).map_or("<unknown>", |e| e.name.as_str())
    }

    fn push(&mut self, entry: NodeEntry) -> NodeId {
        let id = NodeId::new(self.slots.len());
        self.slots.push(Some(entry));
        id
    }

    // --- Creation ---

    pub fn create(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeEntry::new(name.into(), Box::new(Basic)))
    }

    pub fn create_with<K: NodeKind + 'static>(&mut self, name: impl Into<String>, kind: K, parent: Option<NodeId>) -> NodeId {
        self.create_boxed(name, Box::new(kind), parent)
    }

    pub fn create_boxed(&mut self, name: impl Into<String>, kind: Box<dyn NodeKind>, parent: Option<NodeId>) -> NodeId {
        let id = self.push(NodeEntry::new(name.into(), kind));
        if let Some(parent) = parent {
            self.append_child(parent, id);
        }
        id
    }

    /// Creates `count` basic nodes named `prefix_0`, `prefix_1`, ... The
    /// numbering starts at 0.
    pub fn create_many(&mut self, prefix: &str, count: usize, parent: Option<NodeId>) -> Vec<NodeId> {
        (0..count)
            .map(|i| self.create_with(format!("{}_{}", prefix, i), Basic, parent))
            .collect()
    }

    // --- State ---

    pub fn timestamp(&self, id: NodeId) -> u64 {
        self.entry(id).map_or(0, |e| e.object.timestamp())
    }

    /// Stamps the node and every transitive ancestor.
    pub fn modified(&mut self, id: NodeId) {
        let mut stack = vec![id];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) { continue; }
            if let Some(entry) = self.entry_mut(current) {
                entry.object.modified();
                stack.extend(entry.parents.iter().copied());
            }
        }
    }

    pub fn name(&self, id: NodeId) -> Option<&str> { self.entry(id).map(|e| e.name.as_str()) }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> bool {
        let name = name.into();
        let Some(entry) = self.entry_mut(id) else { return false };
        if entry.name == name { return false; }
        entry.name = name;
        self.modified(id);
        true
    }

    pub fn description(&self, id: NodeId) -> Option<&str> { self.entry(id).map(|e| e.description.as_str()) }

    /// Descriptions are informative only and do not stamp the node.
    pub fn set_description(&mut self, id: NodeId, description: impl Into<String>) -> bool {
        let description = description.into();
        let Some(entry) = self.entry_mut(id) else { return false };
        if entry.description == description { return false; }
        entry.description = description;
        true
    }

    /// Built-in fields first, then the kind's static properties, then the
    /// dynamic map. Missing keys yield `Value::Invalid`.
    pub fn property(&self, id: NodeId, key: &str) -> Value {
        let Some(entry) = self.entry(id) else { return Value::Invalid };
        match key {
            "name" => Value::Text(entry.name.clone()),
            "description" => Value::Text(entry.description.clone()),
            _ => entry
                .kind
                .static_property(key)
                .or_else(|| entry.properties.get(key).cloned())
                .unwrap_or_default(),
        }
    }

    /// Writes a property. An invalid value removes a dynamic key. Returns
    /// whether the effective value changed; any change stamps the node.
    pub fn set_property(&mut self, id: NodeId, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        match key {
            "name" => return self.set_name(id, value.cast::<String>().unwrap_or_default()),
            "description" => return self.set_description(id, value.cast::<String>().unwrap_or_default()),
            _ => {}
        }
        let Some(entry) = self.entry_mut(id) else {
            tracing::warn!("Cannot set property '{}' on unknown node {:?}", key, id);
            return false;
        };
        let changed = match entry.kind.set_static_property(key, &value) {
            Some(changed) => changed,
            None if value.is_valid() => match entry.properties.get(key) {
                Some(current) if *current == value => false,
                _ => {
                    entry.properties.insert(key.to_string(), value);
                    true
                }
            },
            None => entry.properties.remove(key).is_some(),
        };
        if changed {
            self.modified(id);
        }
        changed
    }

    // --- Typing ---

    pub fn node_type(&self, id: NodeId) -> Option<NodeTypeId> { self.entry(id).map(|e| e.kind.node_type()) }

    pub fn is_castable(&self, id: NodeId, type_id: NodeTypeId) -> bool {
        self.entry(id).map_or(false, |e| e.kind.is_castable(type_id))
    }

    pub fn kind(&self, id: NodeId) -> Option<&dyn NodeKind> { Some(&*self.entry(id)?.kind) }

    pub fn downcast<T: NodeKind + 'static>(&self, id: NodeId) -> Option<&T> {
        self.kind(id)?.as_any().downcast_ref::<T>()
    }

    /// Mutates the typed payload in place. The node is stamped when `edit`
    /// reports a change. `None` if the node is missing or of another kind.
    pub fn update_kind<T, F>(&mut self, id: NodeId, edit: F) -> Option<bool>
    where
        T: NodeKind + 'static,
        F: FnOnce(&mut T) -> bool,
    {
        let kind = &mut *self.entry_mut(id)?.kind;
        let changed = edit(kind.as_any_mut().downcast_mut::<T>()?);
        if changed {
            self.modified(id);
        }
        Some(changed)
    }

    // --- Topology ---

    pub fn parents(&self, id: NodeId) -> &[NodeId] { self.entry(id).map(|e| e.parents.as_slice()).unwrap_or(&[]) }
    pub fn children(&self, id: NodeId) -> &[NodeId] { self.entry(id).map(|e| e.children.as_slice()).unwrap_or(&[]) }
    pub fn has_parents(&self, id: NodeId) -> bool { !self.parents(id).is_empty() }
    pub fn has_children(&self, id: NodeId) -> bool { !self.children(id).is_empty() }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        let found = self.children(id).get(index).copied();
        if found.is_none() {
            tracing::error!("Child index {} out of range for node '{}'", index, self.label(id));
        }
        found
    }

    /// True when `to` is `from` or one of its descendants.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to { return true; }
            if seen.insert(current) {
                stack.extend_from_slice(self.children(current));
            }
        }
        false
    }

    fn link(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.contains(parent) || !self.contains(child) {
            tracing::warn!("Cannot link unknown nodes {:?} -> {:?}", parent, child);
            return false;
        }
        if self.parents(child).contains(&parent) {
            tracing::warn!("The parent '{}' was already attached to the node '{}'", self.label(parent), self.label(child));
            return false;
        }
        if self.reaches(child, parent) {
            tracing::warn!("Attaching '{}' under '{}' would create a cycle", self.label(child), self.label(parent));
            return false;
        }
        if let Some(entry) = self.entry_mut(child) {
            entry.parents.push(parent);
        }
        if let Some(entry) = self.entry_mut(parent) {
            entry.children.push(child);
        }
        true
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) -> bool {
        let Some(entry) = self.entry_mut(child) else { return false };
        let before = entry.parents.len();
        entry.parents.retain(|p| *p != parent);
        if entry.parents.len() == before { return false; }
        if let Some(entry) = self.entry_mut(parent) {
            entry.children.retain(|c| *c != child);
        }
        true
    }

    /// Appends `child` under `parent` and stamps the parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.link(parent, child) { return false; }
        self.modified(parent);
        true
    }

    /// Adds `parent` to `child`'s parents and stamps the new parent.
    pub fn append_parent(&mut self, child: NodeId, parent: NodeId) -> bool {
        self.append_child(parent, child)
    }

    /// Detaches without deleting, even if `child` is left without parents.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.unlink(parent, child) { return false; }
        self.modified(parent);
        true
    }

    pub fn remove_parent(&mut self, child: NodeId, parent: NodeId) -> bool {
        self.remove_child(parent, child)
    }

    /// Swaps `current` for `substitute`. `current` is deleted if it has no
    /// other parent; `substitute` is appended last.
    pub fn replace_child(&mut self, parent: NodeId, current: Option<NodeId>, substitute: NodeId) -> bool {
        if current == Some(substitute) { return false; }
        if let Some(current) = current {
            if self.remove_child(parent, current) && !self.has_parents(current) {
                self.destroy(current);
            }
        }
        self.append_child(parent, substitute)
    }

    // --- Lifetime ---

    /// Drops properties and every link. Children left without parents are
    /// deleted recursively. No-op on an already empty node.
    pub fn clear(&mut self, id: NodeId) {
        let Some(entry) = self.entry_mut(id) else { return };
        if entry.parents.is_empty() && entry.children.is_empty() && entry.properties.is_empty() {
            return;
        }
        entry.properties.clear();
        let children = std::mem::take(&mut entry.children);
        self.release(id, children);

        // Stamp while still attached so that former ancestors see the change.
        self.modified(id);
        let parents = self.entry_mut(id).map(|e| std::mem::take(&mut e.parents)).unwrap_or_default();
        for parent in parents {
            if let Some(entry) = self.entry_mut(parent) {
                entry.children.retain(|c| *c != id);
            }
        }
    }

    /// `clear` followed by removal of the slot.
    pub fn destroy(&mut self, id: NodeId) {
        self.clear(id);
        if let Some(slot) = self.slots.get_mut(id.index()) {
            *slot = None;
        }
    }

    /// Detaches `children` from `owner` and deletes the ones left orphaned.
    pub(crate) fn release(&mut self, owner: NodeId, children: Vec<NodeId>) {
        let mut orphans = Vec::new();
        for child in children {
            self.detach_parent(child, owner, &mut orphans);
        }
        while let Some(orphan) = orphans.pop() {
            let Some(entry) = self.slots.get_mut(orphan.index()).and_then(Option::take) else { continue };
            for child in entry.children {
                self.detach_parent(child, orphan, &mut orphans);
            }
        }
    }

    fn detach_parent(&mut self, child: NodeId, parent: NodeId, orphans: &mut Vec<NodeId>) {
        if let Some(entry) = self.entry_mut(child) {
            entry.parents.retain(|p| *p != parent);
            if entry.parents.is_empty() {
                orphans.push(child);
            }
        }
    }

    /// Deep copy of `id` and its descendants, attached under `parent` once
    /// complete. Timestamps are not copied.
    pub fn clone_node(&mut self, id: NodeId, parent: Option<NodeId>) -> Option<NodeId> {
        let (copy, children) = {
            let source = self.entry(id)?;
            let mut copy = NodeEntry::new(source.name.clone(), source.kind.clone());
            copy.description = source.description.clone();
            copy.properties = source.properties.clone();
            (copy, source.children.clone())
        };
        let new_id = self.push(copy);
        for child in children {
            self.clone_node(child, Some(new_id));
        }
        if let Some(parent) = parent {
            self.append_parent(new_id, parent);
        }
        Some(new_id)
    }

    // --- Lookup ---

    fn matches(&self, id: NodeId, query: &ChildQuery) -> bool {
        let Some(entry) = self.entry(id) else { return false };
        entry.kind.is_castable(query.type_id)
            && query.accepts_name(&entry.name)
            && query.properties.iter().all(|(key, value)| self.property(id, key) == *value)
    }

    /// First match among direct children, then depth-first among descendants.
    pub fn find_child(&self, root: NodeId, query: &ChildQuery) -> Option<NodeId> {
        let children = self.children(root);
        if let Some(hit) = children.iter().copied().find(|c| self.matches(*c, query)) {
            return Some(hit);
        }
        if !query.recursive { return None; }
        children.iter().find_map(|c| self.find_child(*c, query))
    }

    pub fn find_children(&self, root: NodeId, query: &ChildQuery) -> Vec<NodeId> {
        let mut found = Vec::new();
        self.collect(root, query, &mut found);
        found
    }

    fn collect(&self, root: NodeId, query: &ChildQuery, found: &mut Vec<NodeId>) {
        let children = self.children(root);
        for &child in children {
            if self.matches(child, query) && !found.contains(&child) {
                found.push(child);
            }
        }
        if query.recursive {
            for &child in children {
                self.collect(child, query, found);
            }
        }
    }

    /// First path from `root` down to `target`, both included. Empty when
    /// `target` is not a descendant of `root`.
    pub fn retrieve_path(&self, root: NodeId, target: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        if self.path_into(root, target, &mut path) { path } else { Vec::new() }
    }

    fn path_into(&self, current: NodeId, target: NodeId, path: &mut Vec<NodeId>) -> bool {
        let children = self.children(current);
        if children.contains(&target) {
            path.extend([current, target]);
            return true;
        }
        for &child in children {
            let mut tail = Vec::new();
            if self.path_into(child, target, &mut tail) {
                path.push(current);
                path.append(&mut tail);
                return true;
            }
        }
        false
    }
}
