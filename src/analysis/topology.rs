//! topology.rs
//! Stage-level view of a pipeline: which algorithm feeds which.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{AlgorithmId, Pipeline};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{Dfs, Reversed, Walker};
use petgraph::Direction;
use std::collections::HashSet;

/// Edges point from the producing stage to the consuming one. Parallel
/// connections collapse into one edge; self-loops are kept.
pub fn dependency_graph(pipeline: &Pipeline) -> DiGraphMap<AlgorithmId, ()> {
    let mut graph = DiGraphMap::new();
    for id in pipeline.algorithm_ids() {
        graph.add_node(id);
        for port in 0..pipeline.inputs_number(id) {
            for upstream in pipeline.inputs(id, port) {
                graph.add_edge(upstream.algorithm, id, ());
            }
        }
    }
    graph
}

/// Every stage after the stages it consumes from.
pub fn sort(pipeline: &Pipeline) -> PipelineResult<Vec<AlgorithmId>> {
    let graph = dependency_graph(pipeline);
    petgraph::algo::toposort(&graph, None).map_err(|cycle| PipelineError::CycleDetected(cycle.node_id()))
}

/// Stages `id` depends on, itself included.
pub fn upstream_of(pipeline: &Pipeline, id: AlgorithmId) -> HashSet<AlgorithmId> {
    let graph = dependency_graph(pipeline);
    if !graph.contains_node(id) {
        return HashSet::new();
    }
    Dfs::new(Reversed(&graph), id).iter(Reversed(&graph)).collect()
}

/// Stages that would see a change of any of `start`, the start stages included.
pub fn downstream_from(pipeline: &Pipeline, start: &[AlgorithmId]) -> HashSet<AlgorithmId> {
    let graph = dependency_graph(pipeline);
    let mut visited = HashSet::new();
    let mut stack: Vec<AlgorithmId> = start.iter().copied().filter(|id| graph.contains_node(*id)).collect();
    while let Some(id) = stack.pop() {
        if visited.insert(id) {
            stack.extend(graph.neighbors_directed(id, Direction::Outgoing));
        }
    }
    visited
}
