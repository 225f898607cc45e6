//! Demand-driven pipeline: stages (algorithms) linked through ports, with
//! their data cached in a shared `NodeRegistry`.
pub mod algorithm;
pub mod executive;
pub mod factory;
pub mod policy;
pub mod port;

pub use algorithm::{Algorithm, StageSetup, UpdateContext};
pub use executive::Executive;
pub use factory::DataFactory;
pub use policy::{ExecutivePolicy, RevisitPolicy};
pub use port::{Direction, Port, PortId};

use crate::error::{PipelineError, PipelineResult};
use crate::information::{InfoKey, Information, ManageInputDataPerSlice};
use crate::node::{NodeId, NodeRegistry, NodeTypeId};
use crate::object::Object;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AlgorithmId(pub u32);

impl AlgorithmId {
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

#[derive(Debug)]
pub(crate) struct Stage {
    pub(crate) object: Object,
    pub(crate) algorithm: Box<dyn Algorithm>,
    pub(crate) information: Information,
    pub(crate) inputs: Vec<Port>,
    pub(crate) outputs: Vec<Port>,
    pub(crate) executive: Option<Executive>,
}

impl Stage {
    /// Output ports feeding this stage, in input then connection order.
    pub(crate) fn upstream_ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inputs.iter().flat_map(|p| p.connections().iter().copied())
    }

    pub(crate) fn executive_timestamp(&self) -> u64 {
        self.executive.as_ref().map_or(0, Executive::timestamp)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.executive.as_ref().map_or(false, Executive::is_running)
    }

    fn port(&self, id: PortId) -> Option<&Port> {
        match id.direction {
            Direction::Input => self.inputs.get(id.index),
            Direction::Output => self.outputs.get(id.index),
        }
    }

    fn port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        match id.direction {
            Direction::Input => self.inputs.get_mut(id.index),
            Direction::Output => self.outputs.get_mut(id.index),
        }
    }
}

#[derive(Debug, Default)]
pub struct Pipeline {
    pub(crate) nodes: NodeRegistry,
    stages: Vec<Option<Stage>>,
    policy: ExecutivePolicy,
}

impl Pipeline {
    pub fn new() -> Self { Self::default() }

    pub fn with_policy(policy: ExecutivePolicy) -> Self {
        Self { policy, ..Self::default() }
    }

    pub fn policy(&self) -> ExecutivePolicy { self.policy }

    pub fn nodes(&self) -> &NodeRegistry { &self.nodes }
    pub fn nodes_mut(&mut self) -> &mut NodeRegistry { &mut self.nodes }

    /// Tears every stage down and hands back the node arena, so exported
    /// data outlives the pipeline.
    pub fn into_nodes(mut self) -> NodeRegistry {
        let ids: Vec<AlgorithmId> = self.algorithm_ids().collect();
        for id in ids {
            self.remove_algorithm(id);
        }
        self.nodes
    }

    // --- Stages ---

    pub(crate) fn stage(&self, id: AlgorithmId) -> PipelineResult<&Stage> {
        self.stages.get(id.index()).and_then(Option::as_ref).ok_or(PipelineError::UnknownAlgorithm(id))
    }

    pub(crate) fn stage_mut(&mut self, id: AlgorithmId) -> PipelineResult<&mut Stage> {
        self.stages.get_mut(id.index()).and_then(Option::as_mut).ok_or(PipelineError::UnknownAlgorithm(id))
    }

    /// Mutable stage alongside the node arena.
    pub(crate) fn split(&mut self, id: AlgorithmId) -> PipelineResult<(&mut Stage, &mut NodeRegistry)> {
        let stage = self.stages.get_mut(id.index()).and_then(Option::as_mut).ok_or(PipelineError::UnknownAlgorithm(id))?;
        Ok((stage, &mut self.nodes))
    }

    pub fn contains(&self, id: AlgorithmId) -> bool { self.stage(id).is_ok() }

    pub fn algorithm_ids(&self) -> impl Iterator<Item = AlgorithmId> + '_ {
        self.stages.iter().enumerate().filter(|(_, s)| s.is_some()).map(|(i, _)| AlgorithmId::new(i))
    }

    /// Registers a stage. Its port counts and initial information come from
    /// `Algorithm::configure`.
    pub fn add_algorithm<A: Algorithm + 'static>(&mut self, algorithm: A) -> AlgorithmId {
        let id = AlgorithmId::new(self.stages.len());
        let mut setup = StageSetup::default();
        algorithm.configure(&mut setup);

        let mut information = setup.information;
        if !information.contains(ManageInputDataPerSlice::NAME) {
            information.set::<ManageInputDataPerSlice>(true);
        }
        self.stages.push(Some(Stage {
            object: Object::new(),
            algorithm: Box::new(algorithm),
            information,
            inputs: Vec::new(),
            outputs: Vec::new(),
            executive: None,
        }));
        self.set_inputs_number(id, setup.inputs);
        self.set_outputs_number(id, setup.outputs);
        id
    }

    /// Destroys a stage: every peer forgets its ports and held data roots are
    /// deleted together with the slices nobody else shares.
    pub fn remove_algorithm(&mut self, id: AlgorithmId) -> bool {
        let Some(mut stage) = self.stages.get_mut(id.index()).and_then(Option::take) else {
            return false;
        };
        for port in stage.inputs.iter().chain(stage.outputs.iter()) {
            for &peer in port.connections() {
                if let Some(peer_port) = self.port_mut(peer) {
                    peer_port.remove_connection(port.id());
                }
            }
        }
        for port in stage.inputs.iter_mut().chain(stage.outputs.iter_mut()) {
            port.release_data(&mut self.nodes);
        }
        tracing::debug!("Removed algorithm {:?}", id);
        true
    }

    pub fn algorithm<T: Algorithm + 'static>(&self, id: AlgorithmId) -> Option<&T> {
        let algorithm: &dyn Algorithm = &*self.stage(id).ok()?.algorithm;
        algorithm.as_any().downcast_ref::<T>()
    }

    /// Edits the concrete algorithm. Returning `true` from `edit` marks the
    /// stage as modified.
    pub fn configure<T, F>(&mut self, id: AlgorithmId, edit: F) -> Option<bool>
    where
        T: Algorithm + 'static,
        F: FnOnce(&mut T) -> bool,
    {
        let stage = self.stage_mut(id).ok()?;
        let changed = edit(stage.algorithm.as_mut().as_any_mut().downcast_mut::<T>()?);
        if changed {
            stage.object.modified();
        }
        Some(changed)
    }

    pub fn timestamp(&self, id: AlgorithmId) -> u64 {
        self.stage(id).map_or(0, |s| s.object.timestamp())
    }

    pub fn mark_modified(&mut self, id: AlgorithmId) {
        if let Ok(stage) = self.stage_mut(id) {
            stage.object.modified();
        }
    }

    // --- Algorithm information ---

    pub fn information(&self, id: AlgorithmId, key: &str, default: Value) -> Value {
        self.stage(id).map_or(default.clone(), |s| s.information.value_or(key, default))
    }

    pub fn set_information(&mut self, id: AlgorithmId, key: &str, value: Value) -> bool {
        let Ok(stage) = self.stage_mut(id) else { return false };
        let changed = stage.information.write(key, value);
        if changed {
            stage.object.modified();
        }
        changed
    }

    pub fn info<K: InfoKey>(&self, id: AlgorithmId) -> K::Type {
        self.stage(id).map_or_else(|_| K::default(), |s| s.information.get::<K>())
    }

    pub fn set_info<K: InfoKey>(&mut self, id: AlgorithmId, value: K::Type) -> bool {
        self.set_information(id, K::NAME, value.into())
    }

    // --- Ports ---

    pub fn inputs_number(&self, id: AlgorithmId) -> usize { self.stage(id).map_or(0, |s| s.inputs.len()) }
    pub fn outputs_number(&self, id: AlgorithmId) -> usize { self.stage(id).map_or(0, |s| s.outputs.len()) }

    /// Grows the input ports. Existing ports keep their connections.
    pub fn set_inputs_number(&mut self, id: AlgorithmId, count: usize) {
        self.resize_ports(id, Direction::Input, count);
    }

    pub fn set_outputs_number(&mut self, id: AlgorithmId, count: usize) {
        self.resize_ports(id, Direction::Output, count);
    }

    fn resize_ports(&mut self, id: AlgorithmId, direction: Direction, count: usize) {
        let Ok(stage) = self.stage_mut(id) else { return };
        let ports = match direction {
            Direction::Input => &mut stage.inputs,
            Direction::Output => &mut stage.outputs,
        };
        if ports.len() == count { return; }
        if count < ports.len() {
            tracing::warn!("Shrinking {:?} ports of {:?} from {} to {} is not supported", direction, id, ports.len(), count);
            return;
        }
        for index in ports.len()..count {
            ports.push(Port::new(PortId { algorithm: id, direction, index }));
        }
        stage.object.modified();
    }

    pub fn port(&self, id: PortId) -> Option<&Port> { self.stage(id.algorithm).ok()?.port(id) }
    pub fn port_mut(&mut self, id: PortId) -> Option<&mut Port> { self.stage_mut(id.algorithm).ok()?.port_mut(id) }

    pub fn output(&self, id: AlgorithmId, port: usize) -> Option<PortId> {
        let found = self.port(PortId::output(id, port)).map(Port::id);
        if found.is_none() {
            tracing::error!("Requested output {} outside of the ports of {:?}", port, id);
        }
        found
    }

    fn input_port(&self, id: AlgorithmId, port: usize) -> Option<&Port> {
        let found = self.port(PortId::input(id, port));
        if found.is_none() {
            tracing::error!("Requested input {} outside of the ports of {:?}", port, id);
        }
        found
    }

    /// Upstream output connected to `connection` of input `port`.
    pub fn input(&self, id: AlgorithmId, port: usize, connection: usize) -> Option<PortId> {
        self.input_port(id, port)?.connection(connection)
    }

    pub fn inputs(&self, id: AlgorithmId, port: usize) -> Vec<PortId> {
        self.input_port(id, port).map(|p| p.connections().to_vec()).unwrap_or_default()
    }

    fn check_upstream(&self, upstream: PortId) -> PipelineResult<()> {
        if !upstream.is_output() {
            return Err(PipelineError::NotAnOutput { port: upstream });
        }
        self.port(upstream).map(|_| ()).ok_or(PipelineError::UnknownPort(upstream))
    }

    /// Connects input `port` to `upstream` only, or disconnects it with `None`.
    pub fn set_input(&mut self, id: AlgorithmId, port: usize, upstream: Option<PortId>) {
        let Some(previous) = self.input_port(id, port).map(|p| p.connections().to_vec()) else { return };
        if let Some(upstream) = upstream {
            if let Err(e) = self.check_upstream(upstream) {
                tracing::warn!("{}", e);
                return;
            }
        }
        let input = PortId::input(id, port);
        for old in previous.into_iter().filter(|old| Some(*old) != upstream) {
            if let Some(peer) = self.port_mut(old) {
                peer.remove_connection(input);
            }
        }
        if let Some(internal) = self.port_mut(input) {
            internal.set_connection(upstream);
        }
        if let Some(peer) = upstream.and_then(|u| self.port_mut(u)) {
            peer.add_connection(input);
        }
    }

    /// Appends `upstream` to the connections of input `port`.
    pub fn add_input(&mut self, id: AlgorithmId, port: usize, upstream: PortId) {
        if self.input_port(id, port).is_none() { return; }
        if let Err(e) = self.check_upstream(upstream) {
            tracing::warn!("{}", e);
            return;
        }
        let input = PortId::input(id, port);
        if let Some(internal) = self.port_mut(input) {
            internal.add_connection(upstream);
        }
        if let Some(peer) = self.port_mut(upstream) {
            peer.add_connection(input);
        }
    }

    pub fn remove_input(&mut self, id: AlgorithmId, port: usize, upstream: PortId) {
        if self.input_port(id, port).is_none() { return; }
        let input = PortId::input(id, port);
        if let Some(internal) = self.port_mut(input) {
            internal.remove_connection(upstream);
        }
        if let Some(peer) = self.port_mut(upstream) {
            peer.remove_connection(input);
        }
    }

    pub fn remove_input_at(&mut self, id: AlgorithmId, port: usize, connection: usize) {
        if let Some(upstream) = self.input(id, port, connection) {
            self.remove_input(id, port, upstream);
        }
    }

    /// Disconnects every input port of the stage, on both sides.
    pub fn clear_inputs(&mut self, id: AlgorithmId) {
        for port in 0..self.inputs_number(id) {
            self.set_input(id, port, None);
        }
    }

    // --- Port data ---

    pub fn hold_data(&mut self, port: PortId, data: &[NodeId]) {
        let Ok((stage, nodes)) = self.split(port.algorithm) else { return };
        match stage.port_mut(port) {
            Some(p) => p.hold_data(nodes, data),
            None => tracing::error!("{}", PipelineError::UnknownPort(port)),
        }
    }

    pub fn hold_node(&mut self, port: PortId, node: NodeId) { self.hold_data(port, &[node]); }

    pub fn port_data(&self, port: PortId) -> Option<NodeId> { self.port(port)?.data() }

    pub fn data_at(&self, port: PortId, index: usize) -> Option<NodeId> {
        self.port(port)?.data_at(&self.nodes, index)
    }

    pub fn data_as(&self, port: PortId, index: usize, type_id: NodeTypeId) -> Option<NodeId> {
        self.port(port)?.data_as(&self.nodes, index, type_id)
    }

    /// See `Port::export_data`.
    pub fn export_data(&mut self, port: PortId) -> Option<NodeId> {
        let (stage, nodes) = self.split(port.algorithm).ok()?;
        Some(stage.port(port)?.export_data(nodes))
    }

    /// Newest of the port and of its held data root.
    pub(crate) fn source_timestamp(&self, port: PortId) -> u64 {
        self.port(port).map_or(0, |p| {
            let data = p.data().map_or(0, |root| self.nodes.timestamp(root));
            p.timestamp().max(data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::information::InputIsOptional;

    #[derive(Debug, Default)]
    struct Passthrough {
        gain: i64,
    }

    impl Algorithm for Passthrough {
        fn configure(&self, setup: &mut StageSetup) {
            setup.set_inputs_number(1);
            setup.set_outputs_number(1);
        }
    }

    fn chain() -> (Pipeline, AlgorithmId, AlgorithmId) {
        let mut p = Pipeline::new();
        let a = p.add_algorithm(Passthrough::default());
        let b = p.add_algorithm(Passthrough::default());
        let out = p.output(a, 0).unwrap();
        p.set_input(b, 0, Some(out));
        (p, a, b)
    }

    #[test]
    fn test_add_algorithm_applies_setup() {
        let mut p = Pipeline::new();
        let a = p.add_algorithm(Passthrough::default());
        assert_eq!(p.inputs_number(a), 1);
        assert_eq!(p.outputs_number(a), 1);
        assert!(p.info::<ManageInputDataPerSlice>(a));
        assert!(p.timestamp(a) > 0);
    }

    #[test]
    fn test_ports_only_grow() {
        let mut p = Pipeline::new();
        let a = p.add_algorithm(Passthrough::default());
        let ts = p.timestamp(a);
        p.set_inputs_number(a, 3);
        assert_eq!(p.inputs_number(a), 3);
        assert!(p.timestamp(a) > ts);

        let ts = p.timestamp(a);
        p.set_inputs_number(a, 1);
        assert_eq!(p.inputs_number(a), 3);
        assert_eq!(p.timestamp(a), ts);
    }

    #[test]
    fn test_connections_are_bidirectional() {
        let (p, a, b) = chain();
        let out = PortId::output(a, 0);
        assert_eq!(p.input(b, 0, 0), Some(out));
        assert_eq!(p.inputs(b, 0), vec![out]);
        assert_eq!(p.port(out).unwrap().connections(), &[PortId::input(b, 0)]);
        assert_eq!(p.input(b, 0, 1), None);
        assert_eq!(p.input(b, 4, 0), None);
    }

    #[test]
    fn test_set_input_severs_previous_upstream() {
        let (mut p, a, b) = chain();
        let c = p.add_algorithm(Passthrough::default());
        p.set_input(b, 0, Some(PortId::output(c, 0)));
        assert!(p.port(PortId::output(a, 0)).unwrap().connections().is_empty());
        assert_eq!(p.inputs(b, 0), vec![PortId::output(c, 0)]);

        p.set_input(b, 0, None);
        assert!(p.inputs(b, 0).is_empty());
        assert!(p.port(PortId::output(c, 0)).unwrap().connections().is_empty());
    }

    #[test]
    fn test_set_input_rejects_input_ports() {
        let (mut p, a, b) = chain();
        p.set_input(b, 0, Some(PortId::input(a, 0)));
        assert_eq!(p.inputs(b, 0), vec![PortId::output(a, 0)]);
    }

    #[test]
    fn test_add_and_remove_inputs() {
        let (mut p, a, b) = chain();
        let c = p.add_algorithm(Passthrough::default());
        p.add_input(b, 0, PortId::output(c, 0));
        p.add_input(b, 0, PortId::output(c, 0));
        assert_eq!(p.inputs(b, 0), vec![PortId::output(a, 0), PortId::output(c, 0)]);

        p.remove_input_at(b, 0, 0);
        assert_eq!(p.inputs(b, 0), vec![PortId::output(c, 0)]);
        assert!(p.port(PortId::output(a, 0)).unwrap().connections().is_empty());

        p.remove_input(b, 0, PortId::output(c, 0));
        assert!(p.inputs(b, 0).is_empty());
    }

    #[test]
    fn test_clear_inputs() {
        let (mut p, a, b) = chain();
        p.clear_inputs(b);
        assert!(p.inputs(b, 0).is_empty());
        assert!(p.port(PortId::output(a, 0)).unwrap().connections().is_empty());
    }

    #[test]
    fn test_remove_algorithm_severs_peers() {
        let (mut p, a, b) = chain();
        assert!(p.remove_algorithm(a));
        assert!(!p.contains(a));
        assert!(p.inputs(b, 0).is_empty());
        assert!(!p.remove_algorithm(a));
        assert_eq!(p.algorithm_ids().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn test_configure_marks_modified_on_change() {
        let (mut p, a, _) = chain();
        let ts = p.timestamp(a);
        assert_eq!(p.configure::<Passthrough, _>(a, |alg| { alg.gain = 2; true }), Some(true));
        assert!(p.timestamp(a) > ts);
        let ts = p.timestamp(a);
        assert_eq!(p.configure::<Passthrough, _>(a, |_| false), Some(false));
        assert_eq!(p.timestamp(a), ts);
        assert_eq!(p.algorithm::<Passthrough>(a).map(|alg| alg.gain), Some(2));
        assert_eq!(p.configure::<DataFactory, _>(a, |_| true), None);
    }

    #[test]
    fn test_algorithm_information() {
        let (mut p, a, _) = chain();
        let ts = p.timestamp(a);
        assert!(p.set_information(a, "threshold", Value::Float(0.5)));
        assert!(p.timestamp(a) > ts);
        assert!(!p.set_information(a, "threshold", Value::Float(0.5)));
        assert_eq!(p.information(a, "threshold", Value::Invalid), Value::Float(0.5));
        assert_eq!(p.information(a, "missing", Value::Int(1)), Value::Int(1));
        assert!(p.set_info::<ManageInputDataPerSlice>(a, false));
        assert!(!p.info::<ManageInputDataPerSlice>(a));
    }

    #[test]
    fn test_port_information_through_pipeline() {
        let (mut p, _, b) = chain();
        let input = PortId::input(b, 0);
        p.port_mut(input).unwrap().set_info::<InputIsOptional>(true);
        assert!(p.port(input).unwrap().info::<InputIsOptional>());
    }

    #[test]
    fn test_hold_and_export_data() {
        let (mut p, a, _) = chain();
        let out = PortId::output(a, 0);
        let node = p.nodes_mut().create("payload");
        p.hold_node(out, node);
        assert_eq!(p.data_at(out, 0), Some(node));
        assert_eq!(p.data_as(out, 0, NodeTypeId::NODE), Some(node));

        let export = p.export_data(out).unwrap();
        p.remove_algorithm(a);
        assert_eq!(p.nodes().parents(node), &[export]);

        let nodes = p.into_nodes();
        assert!(nodes.contains(node));
    }

    #[test]
    fn test_source_timestamp_tracks_data() {
        let (mut p, a, _) = chain();
        let out = PortId::output(a, 0);
        let node = p.nodes_mut().create("payload");
        p.hold_node(out, node);
        let before = p.source_timestamp(out);
        p.nodes_mut().set_property(node, "value", 3);
        assert!(p.source_timestamp(out) > before);
    }
}
