//! factory.rs
//! Source stage producing a single named node of a fixed kind.

use super::{Algorithm, Port, StageSetup};
use crate::information::OutputDataTypeid;
use crate::node::{Basic, NodeId, NodeKind, NodeRegistry};

/// No input, one output. Data already held on the output is kept as long
/// as it is castable to the prototype's type.
#[derive(Debug)]
pub struct DataFactory {
    name: String,
    prototype: Box<dyn NodeKind>,
}

impl DataFactory {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(name, Basic)
    }

    pub fn with_kind<K: NodeKind + 'static>(name: impl Into<String>, prototype: K) -> Self {
        Self { name: name.into(), prototype: Box::new(prototype) }
    }

    pub fn name(&self) -> &str { &self.name }
}

impl Algorithm for DataFactory {
    fn configure(&self, setup: &mut StageSetup) {
        setup.set_inputs_number(0);
        setup.set_outputs_number(1);
    }

    fn fill_output_information(&self, port: &mut Port) -> bool {
        port.set_info::<OutputDataTypeid>(self.prototype.node_type());
        true
    }

    fn create_output_data(&self, _port: usize, nodes: &mut NodeRegistry) -> Option<NodeId> {
        Some(nodes.create_boxed(self.name.clone(), dyn_clone::clone_box(&*self.prototype), None))
    }
}
