//! error.rs
//! Failure taxonomy of the pipeline protocol. Errors are logged where they
//! occur and surface to callers only as `Outcome::Error`.

use crate::node::{NodeId, NodeTypeId};
use crate::pipeline::{AlgorithmId, PortId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Unknown algorithm {0:?}")]
    UnknownAlgorithm(AlgorithmId),
    #[error("Port {0:?} does not exist")]
    UnknownPort(PortId),
    #[error("Port {port:?} is not an output port")]
    NotAnOutput { port: PortId },
    #[error("Mandatory input {port:?} is not connected")]
    MissingInput { port: PortId },
    #[error("Upstream output {upstream:?} of input {port:?} could not fill its information")]
    UpstreamNotFilled { port: PortId, upstream: PortId },
    #[error("Upstream output {upstream:?} of input {port:?} has not created its data")]
    UpstreamNotCreated { port: PortId, upstream: PortId },
    #[error("Internal inconsistency: output {upstream:?} is flagged as created but holds no data")]
    UpstreamWithoutData { upstream: PortId },
    #[error("Input {port:?} received node {node:?} which is not castable to '{expected}'")]
    IncompatibleInput { port: PortId, node: NodeId, expected: NodeTypeId },
    #[error("Information of port {0:?} could not be filled")]
    InformationNotFilled(PortId),
    #[error("Output {port:?} produced no data of type '{expected}'")]
    OutputNotCreated { port: PortId, expected: NodeTypeId },
    #[error("Inputs of {algorithm:?} disagree on their number of slices ({first} vs {second})")]
    SliceCountMismatch { algorithm: AlgorithmId, first: usize, second: usize },
    #[error("Algorithm {0:?} manages whole batches but does not override the batch hook")]
    BatchHookMissing(AlgorithmId),
    #[error("Algorithm {0:?} failed to update its output data")]
    UpdateFailed(AlgorithmId),
    #[error("Cycle detected involving algorithm {0:?}")]
    CycleDetected(AlgorithmId),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result of a request sent through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    /// Reserved for requests interrupted on purpose.
    Aborted,
    Error,
}

impl Outcome {
    #[inline(always)]
    pub fn is_success(self) -> bool { self == Outcome::Success }
}

impl<T> From<PipelineResult<T>> for Outcome {
    fn from(result: PipelineResult<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) => {
                tracing::error!("{}", e);
                Outcome::Error
            }
        }
    }
}
