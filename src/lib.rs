//! Demand-driven processing pipelines with timestamp-cached results.
//!
//! Stages (`Algorithm`s) are linked through `Port`s inside a `Pipeline`.
//! Their data lives in a shared `NodeRegistry`: nodes form a multi-parent
//! DAG and are deleted once their last owner lets go of them. Calling
//! `Pipeline::update` on a stage reruns only what changed upstream of it.

// Core primitives
pub mod error;
pub mod information;
pub mod object;
pub mod value;

// Data model and orchestration
pub mod node;
pub mod pipeline;

pub mod analysis;

pub use error::{Outcome, PipelineError, PipelineResult};
pub use information::{InfoKey, Information};
pub use node::{ChildQuery, NodeId, NodeKind, NodeRegistry, NodeTypeId};
pub use object::Object;
pub use pipeline::{Algorithm, AlgorithmId, DataFactory, ExecutivePolicy, Pipeline, Port, PortId, RevisitPolicy};
pub use value::Value;
