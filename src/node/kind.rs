//! kind.rs
//! Runtime typing of nodes. A node carries a boxed `NodeKind` payload which
//! decides what the node can be cast to and which static properties it owns.

use crate::value::Value;
use dyn_clone::DynClone;
use std::any::Any;
use std::fmt;

/// Identifier of a node type. Each kind declares its own constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeTypeId(pub &'static str);

impl NodeTypeId {
    /// Type every node is castable to.
    pub const NODE: Self = Self("Node");

    pub fn name(&self) -> &'static str { self.0 }
}

impl fmt::Display for NodeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.0) }
}

/// Downcasting helper for trait objects.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }
}

/// Payload of a node.
///
/// A derived kind overrides `node_type` and extends `is_castable` with its own
/// type so that lookups by any level of the chain succeed:
///
/// ```
/// use pipewright::node::{NodeKind, NodeTypeId};
///
/// #[derive(Debug, Clone)]
/// struct Marker;
///
/// impl Marker { const TYPE: NodeTypeId = NodeTypeId("Marker"); }
///
/// impl NodeKind for Marker {
///     fn node_type(&self) -> NodeTypeId { Self::TYPE }
/// }
///
/// assert!(Marker.is_castable(Marker::TYPE));
/// assert!(Marker.is_castable(NodeTypeId::NODE));
/// ```
pub trait NodeKind: AsAny + DynClone + fmt::Debug {
    fn node_type(&self) -> NodeTypeId { NodeTypeId::NODE }

    fn is_castable(&self, id: NodeTypeId) -> bool {
        id == NodeTypeId::NODE || id == self.node_type()
    }

    /// Static property lookup. `None` when the kind does not own `key`.
    fn static_property(&self, _key: &str) -> Option<Value> { None }

    /// Static property write. `None` when the kind does not own `key`,
    /// otherwise whether the stored value changed.
    fn set_static_property(&mut self, _key: &str, _value: &Value) -> Option<bool> { None }
}

dyn_clone::clone_trait_object!(NodeKind);

/// Plain node without payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Basic;

impl NodeKind for Basic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Counter {
        count: i64,
    }

    impl Counter {
        const TYPE: NodeTypeId = NodeTypeId("Counter");
    }

    impl NodeKind for Counter {
        fn node_type(&self) -> NodeTypeId { Self::TYPE }

        fn static_property(&self, key: &str) -> Option<Value> {
            (key == "count").then(|| Value::Int(self.count))
        }

        fn set_static_property(&mut self, key: &str, value: &Value) -> Option<bool> {
            if key != "count" { return None; }
            let next = value.cast::<i64>().unwrap_or_default();
            let changed = next != self.count;
            self.count = next;
            Some(changed)
        }
    }

    #[derive(Debug, Clone, Default)]
    struct LabelledCounter {
        base: Counter,
    }

    impl LabelledCounter {
        const TYPE: NodeTypeId = NodeTypeId("LabelledCounter");
    }

    impl NodeKind for LabelledCounter {
        fn node_type(&self) -> NodeTypeId { Self::TYPE }
        fn is_castable(&self, id: NodeTypeId) -> bool {
            id == Self::TYPE || self.base.is_castable(id)
        }
    }

    #[test]
    fn test_basic_is_only_a_node() {
        assert!(Basic.is_castable(NodeTypeId::NODE));
        assert!(!Basic.is_castable(Counter::TYPE));
    }

    #[test]
    fn test_castable_chain() {
        let kind = LabelledCounter::default();
        assert!(kind.is_castable(LabelledCounter::TYPE));
        assert!(kind.is_castable(Counter::TYPE));
        assert!(kind.is_castable(NodeTypeId::NODE));
        assert!(!Counter::default().is_castable(LabelledCounter::TYPE));
    }

    #[test]
    fn test_static_property_roundtrip() {
        let mut kind = Counter::default();
        assert_eq!(kind.set_static_property("count", &Value::Int(3)), Some(true));
        assert_eq!(kind.set_static_property("count", &Value::Int(3)), Some(false));
        assert_eq!(kind.static_property("count"), Some(Value::Int(3)));
        assert_eq!(kind.static_property("other"), None);
        assert_eq!(kind.set_static_property("other", &Value::Int(1)), None);
    }

    #[test]
    fn test_boxed_kind_clones_deeply() {
        let mut original: Box<dyn NodeKind> = Box::new(Counter { count: 5 });
        let copy = original.clone();
        original.set_static_property("count", &Value::Int(9));
        assert_eq!(copy.static_property("count"), Some(Value::Int(5)));

        let kind: &dyn NodeKind = &*copy;
        assert!(kind.as_any().downcast_ref::<Counter>().is_some());
    }
}
