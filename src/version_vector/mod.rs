//! Version vectors
//!
//! This module provides:
//! - `VersionVector`, an ordered set of per-writer timestamps
//! - `VersionOrder`, the causal relation between two vectors
//!
//! The current writer's entry comes first. Each `SourceId` appears at most once.

mod order;
mod vector;

pub use order::VersionOrder;
pub use vector::VersionVector;
