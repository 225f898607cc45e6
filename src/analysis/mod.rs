//! Read-only analyses over a pipeline's stage graph.
pub mod topology;
