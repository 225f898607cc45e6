//! algorithm.rs
//! Stage behaviour and the three-phase request protocol.
//!
//! A request carries up to three flags, executed in this order:
//! 1. `CreateOutputData`: every output port holds data of its declared type.
//! 2. `CheckInputConsistency`: every input is connected (unless optional) to
//!    created upstream data of the required type.
//! 3. `UpdateOutputData`: if anything upstream or the stage itself changed,
//!    inputs and outputs are sliced and handed to the update hooks.

use super::{AlgorithmId, Executive, Pipeline, Port, PortId, Stage};
use crate::error::{Outcome, PipelineError, PipelineResult};
use crate::information::{
    CheckInputConsistency, CreateOutputData, InfoKey, Information, InformationFilled, InputDataRequiredTypeid,
    InputIsOptional, ManageInputDataPerSlice, OutputDataCreated, OutputDataTypeid, UpdateOutputData,
};
use crate::node::{AsAny, NodeId, NodeRegistry};
use crate::value::Value;
use std::fmt;

/// Port counts and initial information declared by an algorithm when it is
/// added to a pipeline.
#[derive(Debug, Clone, Default)]
pub struct StageSetup {
    pub(crate) inputs: usize,
    pub(crate) outputs: usize,
    pub(crate) information: Information,
}

impl StageSetup {
    pub fn set_inputs_number(&mut self, count: usize) { self.inputs = count; }
    pub fn set_outputs_number(&mut self, count: usize) { self.outputs = count; }

    pub fn set_information(&mut self, key: &str, value: Value) { self.information.write(key, value); }

    pub fn set_info<K: InfoKey>(&mut self, value: K::Type) { self.information.set::<K>(value); }
}

/// What the update hooks may touch while a stage runs.
pub struct UpdateContext<'a> {
    pub algorithm: AlgorithmId,
    pub information: &'a Information,
    pub nodes: &'a mut NodeRegistry,
}

/// A processing stage. Every hook has a default, so an algorithm only
/// overrides what it needs.
pub trait Algorithm: AsAny + fmt::Debug {
    fn configure(&self, _setup: &mut StageSetup) {}

    /// Declares requirements on an input port (e.g. `InputDataRequiredTypeid`).
    fn fill_input_information(&self, _port: &mut Port) -> bool { true }

    /// Declares what an output port produces (e.g. `OutputDataTypeid`).
    fn fill_output_information(&self, _port: &mut Port) -> bool { true }

    /// New, unattached node for output `port`. It must be castable to the
    /// port's `OutputDataTypeid`.
    fn create_output_data(&self, _port: usize, _nodes: &mut NodeRegistry) -> Option<NodeId> { None }

    /// Whole-batch update. `inputs[slice][port]` is `None` when the input
    /// holds nothing; `outputs[slice][port]` always exists. Algorithms that
    /// clear `ManageInputDataPerSlice` must override this.
    fn update_output_batch(
        &mut self,
        ctx: &mut UpdateContext<'_>,
        inputs: &[Vec<Option<NodeId>>],
        outputs: &[Vec<NodeId>],
    ) -> bool {
        if !ctx.information.get::<ManageInputDataPerSlice>() {
            tracing::error!("{}", PipelineError::BatchHookMissing(ctx.algorithm));
            return false;
        }
        if inputs.len() != outputs.len() {
            tracing::error!("Input and output slice counts differ ({} vs {}). Update aborted.", inputs.len(), outputs.len());
            return false;
        }
        let mut ok = true;
        for (ins, outs) in inputs.iter().zip(outputs) {
            ok &= self.update_output_data(ctx.nodes, ins, outs);
        }
        ok
    }

    /// Single-slice update.
    fn update_output_data(&mut self, _nodes: &mut NodeRegistry, _inputs: &[Option<NodeId>], _outputs: &[NodeId]) -> bool {
        true
    }
}

impl Pipeline {
    /// Runs the phases flagged in `request` on this stage only.
    pub fn process_request(&mut self, id: AlgorithmId, request: &Information) -> Outcome {
        self.try_process_request(id, request).into()
    }

    pub(crate) fn try_process_request(&mut self, id: AlgorithmId, request: &Information) -> PipelineResult<()> {
        if request.get::<CreateOutputData>() {
            self.create_outputs(id)?;
        }
        if request.get::<CheckInputConsistency>() {
            for index in 0..self.stage(id)?.inputs.len() {
                self.check_input_consistency(id, index)?;
            }
        }
        if request.get::<UpdateOutputData>() {
            self.update_outputs(id)?;
        }
        Ok(())
    }

    /// Memoized `fill_output_information` of the owner of `port`.
    fn fill_output(&mut self, port: PortId) -> PipelineResult<()> {
        let Stage { algorithm, outputs, .. } = self.stage_mut(port.algorithm)?;
        let target = outputs.get_mut(port.index).ok_or(PipelineError::UnknownPort(port))?;
        if target.info::<InformationFilled>() {
            return Ok(());
        }
        if !algorithm.fill_output_information(target) {
            return Err(PipelineError::InformationNotFilled(port));
        }
        target.set_info::<InformationFilled>(true);
        Ok(())
    }

    fn create_outputs(&mut self, id: AlgorithmId) -> PipelineResult<()> {
        for index in 0..self.stage(id)?.outputs.len() {
            let port_id = PortId::output(id, index);
            self.fill_output(port_id)?;

            let (Stage { algorithm, outputs, .. }, nodes) = self.split(id)?;
            let port = &mut outputs[index];
            if port.info::<OutputDataCreated>() {
                continue;
            }
            let expected = port.info::<OutputDataTypeid>();
            let usable = port.data_at(nodes, 0).map_or(false, |d| nodes.is_castable(d, expected));
            if !usable {
                match algorithm.create_output_data(index, nodes) {
                    Some(node) if nodes.is_castable(node, expected) => port.hold_node(nodes, node),
                    created => {
                        if let Some(node) = created {
                            nodes.destroy(node);
                        }
                        return Err(PipelineError::OutputNotCreated { port: port_id, expected });
                    }
                }
            }
            port.set_info::<OutputDataCreated>(true);
        }
        Ok(())
    }

    fn check_input_consistency(&mut self, id: AlgorithmId, index: usize) -> PipelineResult<()> {
        let port_id = PortId::input(id, index);
        let (optional, required, connections) = {
            let Stage { algorithm, inputs, .. } = self.stage_mut(id)?;
            let port = inputs.get_mut(index).ok_or(PipelineError::UnknownPort(port_id))?;
            if !port.info::<InformationFilled>() {
                if !algorithm.fill_input_information(port) {
                    return Err(PipelineError::InformationNotFilled(port_id));
                }
                port.set_info::<InformationFilled>(true);
            }
            (port.info::<InputIsOptional>(), port.info::<InputDataRequiredTypeid>(), port.connections().to_vec())
        };

        if !optional && connections.is_empty() {
            return Err(PipelineError::MissingInput { port: port_id });
        }
        for upstream in connections {
            self.fill_output(upstream)
                .map_err(|_| PipelineError::UpstreamNotFilled { port: port_id, upstream })?;
            let peer = self.port(upstream).ok_or(PipelineError::UnknownPort(upstream))?;
            if !peer.info::<OutputDataCreated>() {
                return Err(PipelineError::UpstreamNotCreated { port: port_id, upstream });
            }
            let root = peer.data().ok_or(PipelineError::UpstreamWithoutData { upstream })?;
            if let Some(&node) = self.nodes.children(root).iter().find(|n| !self.nodes.is_castable(**n, required)) {
                return Err(PipelineError::IncompatibleInput { port: port_id, node, expected: required });
            }
        }
        Ok(())
    }

    /// An input (or its data) is newer than the stage, or the stage is newer
    /// than its executive.
    fn update_needed(&self, id: AlgorithmId) -> PipelineResult<bool> {
        let stage = self.stage(id)?;
        let stamp = stage.object.timestamp();
        let newer_input = stage.upstream_ports().any(|p| self.source_timestamp(p) > stamp);
        Ok(newer_input || stamp > stage.executive_timestamp())
    }

    fn update_outputs(&mut self, id: AlgorithmId) -> PipelineResult<()> {
        if !self.update_needed(id)? {
            tracing::trace!("Outputs of {:?} are up to date", id);
            return Ok(());
        }

        // 1. Slices of every input, connections concatenated
        let mut sources: Vec<Vec<NodeId>> = Vec::new();
        let mut slices = 0;
        for port in &self.stage(id)?.inputs {
            let mut children = Vec::new();
            for root in port.connections().iter().filter_map(|c| self.port(*c).and_then(Port::data)) {
                children.extend_from_slice(self.nodes.children(root));
            }
            let count = children.len();
            if count != 0 {
                if slices != 0 && count != slices {
                    return Err(PipelineError::SliceCountMismatch { algorithm: id, first: slices, second: count });
                }
                slices = count;
            }
            sources.push(children);
        }
        let inputs: Vec<Vec<Option<NodeId>>> = (0..slices)
            .map(|i| sources.iter().map(|s| s.get(i).copied()).collect())
            .collect();

        // 2. Outputs, created on demand for slices not held yet
        let (Stage { algorithm, information, outputs, executive, .. }, nodes) = self.split(id)?;
        let mut batch: Vec<Vec<NodeId>> = vec![Vec::with_capacity(outputs.len()); slices];
        for (index, port) in outputs.iter_mut().enumerate() {
            let mut held = port.data().map(|root| nodes.children(root).to_vec()).unwrap_or_default();
            let before = held.len();
            while held.len() < slices {
                match algorithm.create_output_data(index, nodes) {
                    Some(node) => held.push(node),
                    None => {
                        for node in held.drain(before..) {
                            nodes.destroy(node);
                        }
                        let expected = port.info::<OutputDataTypeid>();
                        return Err(PipelineError::OutputNotCreated { port: port.id(), expected });
                    }
                }
            }
            if held.len() != before {
                port.hold_data(nodes, &held);
            }
            for (slice, node) in batch.iter_mut().zip(&held) {
                slice.push(*node);
            }
        }

        // 3. Hooks
        executive.get_or_insert_with(Executive::default).mark_consumed();
        let mut ctx = UpdateContext { algorithm: id, information: &*information, nodes };
        if !algorithm.update_output_batch(&mut ctx, &inputs, &batch) {
            return Err(PipelineError::UpdateFailed(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Basic, NodeKind, NodeTypeId};

    #[derive(Debug, Clone)]
    struct Sample;

    impl Sample {
        const TYPE: NodeTypeId = NodeTypeId("Sample");
    }

    impl NodeKind for Sample {
        fn node_type(&self) -> NodeTypeId { Self::TYPE }
    }

    /// Emits `count` held slices on its single output.
    #[derive(Debug, Default)]
    struct Source;

    impl Algorithm for Source {
        fn configure(&self, setup: &mut StageSetup) { setup.set_outputs_number(1); }

        fn fill_output_information(&self, port: &mut Port) -> bool {
            port.set_info::<OutputDataTypeid>(Sample::TYPE);
            true
        }

        fn create_output_data(&self, _port: usize, nodes: &mut NodeRegistry) -> Option<NodeId> {
            Some(nodes.create_with("sample", Sample, None))
        }
    }

    /// Counts the slices it sees.
    #[derive(Debug, Default)]
    struct Sink {
        inputs: usize,
        seen: Vec<Vec<Option<NodeId>>>,
        required: Option<NodeTypeId>,
    }

    impl Algorithm for Sink {
        fn configure(&self, setup: &mut StageSetup) {
            setup.set_inputs_number(self.inputs.max(1));
            setup.set_outputs_number(1);
        }

        fn fill_input_information(&self, port: &mut Port) -> bool {
            if let Some(required) = self.required {
                port.set_info::<InputDataRequiredTypeid>(required);
            }
            true
        }

        fn create_output_data(&self, _port: usize, nodes: &mut NodeRegistry) -> Option<NodeId> {
            Some(nodes.create("sink"))
        }

        fn update_output_data(&mut self, _nodes: &mut NodeRegistry, inputs: &[Option<NodeId>], _outputs: &[NodeId]) -> bool {
            self.seen.push(inputs.to_vec());
            true
        }
    }

    /// Never produces data.
    #[derive(Debug, Default)]
    struct Barren;

    impl Algorithm for Barren {
        fn configure(&self, setup: &mut StageSetup) { setup.set_outputs_number(1); }
    }

    /// Whole-batch algorithm that forgot to override the batch hook.
    #[derive(Debug, Default)]
    struct Unsliced;

    impl Algorithm for Unsliced {
        fn configure(&self, setup: &mut StageSetup) {
            setup.set_outputs_number(1);
            setup.set_info::<ManageInputDataPerSlice>(false);
        }

        fn create_output_data(&self, _port: usize, nodes: &mut NodeRegistry) -> Option<NodeId> {
            Some(nodes.create("unsliced"))
        }
    }

    fn all_phases() -> Information { Information::request(true, true, true) }

    fn source_with(p: &mut Pipeline, slices: usize) -> AlgorithmId {
        let src = p.add_algorithm(Source);
        let out = PortId::output(src, 0);
        let nodes: Vec<NodeId> = (0..slices).map(|_| p.nodes_mut().create_with("s", Sample, None)).collect();
        p.hold_data(out, &nodes);
        src
    }

    #[test]
    fn test_create_output_data_creates_and_flags() {
        let mut p = Pipeline::new();
        let src = p.add_algorithm(Source);
        let out = PortId::output(src, 0);
        assert_eq!(p.process_request(src, &Information::request(true, false, false)), Outcome::Success);

        let port = p.port(out).unwrap();
        assert!(port.info::<InformationFilled>());
        assert!(port.info::<OutputDataCreated>());
        assert_eq!(port.info::<OutputDataTypeid>(), Sample::TYPE);
        let created = p.data_as(out, 0, Sample::TYPE).unwrap();

        assert_eq!(p.process_request(src, &Information::request(true, false, false)), Outcome::Success);
        assert_eq!(p.data_at(out, 0), Some(created));
    }

    #[test]
    fn test_create_output_data_replaces_wrong_type() {
        let mut p = Pipeline::new();
        let src = p.add_algorithm(Source);
        let out = PortId::output(src, 0);
        let wrong = p.nodes_mut().create_with("plain", Basic, None);
        p.hold_node(out, wrong);

        assert!(p.process_request(src, &Information::request(true, false, false)).is_success());
        assert!(!p.nodes().contains(wrong));
        assert!(p.data_as(out, 0, Sample::TYPE).is_some());
    }

    #[test]
    fn test_missing_output_data_is_an_error() {
        let mut p = Pipeline::new();
        let barren = p.add_algorithm(Barren);
        assert_eq!(p.process_request(barren, &Information::request(true, false, false)), Outcome::Error);
        assert!(!p.port(PortId::output(barren, 0)).unwrap().info::<OutputDataCreated>());
    }

    #[test]
    fn test_mandatory_input_must_be_connected() {
        let mut p = Pipeline::new();
        let sink = p.add_algorithm(Sink::default());
        assert_eq!(p.process_request(sink, &Information::request(false, true, false)), Outcome::Error);

        p.port_mut(PortId::input(sink, 0)).unwrap().set_info::<InputIsOptional>(true);
        assert_eq!(p.process_request(sink, &Information::request(false, true, false)), Outcome::Success);
    }

    #[test]
    fn test_consistency_requires_created_upstream() {
        let mut p = Pipeline::new();
        let src = p.add_algorithm(Source);
        let sink = p.add_algorithm(Sink::default());
        p.set_input(sink, 0, p.output(src, 0));
        assert_eq!(p.process_request(sink, &Information::request(false, true, false)), Outcome::Error);

        p.process_request(src, &Information::request(true, false, false));
        assert_eq!(p.process_request(sink, &Information::request(false, true, false)), Outcome::Success);
    }

    #[test]
    fn test_consistency_checks_required_type() {
        let mut p = Pipeline::new();
        let src = p.add_algorithm(Source);
        let sink = p.add_algorithm(Sink { required: Some(NodeTypeId("Other")), ..Sink::default() });
        p.set_input(sink, 0, p.output(src, 0));
        p.process_request(src, &Information::request(true, false, false));
        assert_eq!(p.process_request(sink, &Information::request(false, true, false)), Outcome::Error);
    }

    #[test]
    fn test_update_slices_inputs_and_grows_outputs() {
        let mut p = Pipeline::new();
        let src = source_with(&mut p, 3);
        let sink = p.add_algorithm(Sink::default());
        p.set_input(sink, 0, p.output(src, 0));

        assert!(p.process_request(src, &all_phases()).is_success());
        assert!(p.process_request(sink, &all_phases()).is_success());

        let seen = &p.algorithm::<Sink>(sink).unwrap().seen;
        assert_eq!(seen.len(), 3);
        let held = p.nodes().children(p.port_data(PortId::output(src, 0)).unwrap()).to_vec();
        assert_eq!(seen.iter().map(|s| s[0].unwrap()).collect::<Vec<_>>(), held);
        assert_eq!(p.port(PortId::output(sink, 0)).unwrap().slice_count(p.nodes()), 3);
    }

    #[test]
    fn test_multi_connection_inputs_concatenate() {
        let mut p = Pipeline::new();
        let a = source_with(&mut p, 1);
        let b = source_with(&mut p, 2);
        let sink = p.add_algorithm(Sink::default());
        p.add_input(sink, 0, PortId::output(a, 0));
        p.add_input(sink, 0, PortId::output(b, 0));
        for id in [a, b, sink] {
            assert!(p.process_request(id, &all_phases()).is_success());
        }
        assert_eq!(p.algorithm::<Sink>(sink).unwrap().seen.len(), 3);
    }

    #[test]
    fn test_slice_count_mismatch() {
        let mut p = Pipeline::new();
        let a = source_with(&mut p, 2);
        let b = source_with(&mut p, 3);
        let sink = p.add_algorithm(Sink { inputs: 2, ..Sink::default() });
        p.set_input(sink, 0, p.output(a, 0));
        p.set_input(sink, 1, p.output(b, 0));
        for id in [a, b] {
            p.process_request(id, &all_phases());
        }
        assert_eq!(p.process_request(sink, &all_phases()), Outcome::Error);
        assert!(p.algorithm::<Sink>(sink).unwrap().seen.is_empty());
    }

    #[test]
    fn test_empty_optional_input_yields_none() {
        let mut p = Pipeline::new();
        let a = source_with(&mut p, 2);
        let sink = p.add_algorithm(Sink { inputs: 2, ..Sink::default() });
        p.set_input(sink, 0, p.output(a, 0));
        p.port_mut(PortId::input(sink, 1)).unwrap().set_info::<InputIsOptional>(true);
        p.process_request(a, &all_phases());
        assert!(p.process_request(sink, &all_phases()).is_success());
        let seen = &p.algorithm::<Sink>(sink).unwrap().seen;
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|s| s[0].is_some() && s[1].is_none()));
    }

    #[test]
    fn test_update_skipped_when_nothing_changed() {
        let mut p = Pipeline::new();
        let src = source_with(&mut p, 1);
        let sink = p.add_algorithm(Sink::default());
        p.set_input(sink, 0, p.output(src, 0));
        p.process_request(src, &all_phases());
        p.process_request(sink, &all_phases());
        assert_eq!(p.algorithm::<Sink>(sink).unwrap().seen.len(), 1);

        // Stage newer than its inputs, executive newer than the stage.
        p.mark_modified(sink);
        p.executive_mut(sink).unwrap().modified();
        assert!(p.process_request(sink, &all_phases()).is_success());
        assert_eq!(p.algorithm::<Sink>(sink).unwrap().seen.len(), 1);
    }

    #[test]
    fn test_unsliced_algorithm_must_override_batch_hook() {
        let mut p = Pipeline::new();
        let alg = p.add_algorithm(Unsliced);
        assert_eq!(p.process_request(alg, &Information::request(true, false, false)), Outcome::Success);
        assert_eq!(p.process_request(alg, &Information::request(false, false, true)), Outcome::Error);
    }

    #[test]
    fn test_unknown_algorithm_is_an_error() {
        let mut p = Pipeline::new();
        assert_eq!(p.process_request(AlgorithmId(7), &all_phases()), Outcome::Error);
    }
}
