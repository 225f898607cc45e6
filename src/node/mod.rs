//! Shared data model: an arena of typed nodes linked as a multi-parent DAG.
pub mod kind;
pub mod query;
pub mod registry;

pub use kind::{AsAny, Basic, NodeKind, NodeTypeId};
pub use query::ChildQuery;
pub use registry::{NodeId, NodeRegistry};
