//! Shared data contracts for density runs: sample geometry, input arity, and run manifests.

pub mod manifest;
pub mod shape;

pub use manifest::{RunManifest, RunManifestSchemaVersion, RunParameters};
pub use shape::{InputArity, SampleShape, ValidationError};
