//! Ember Core - Foundational types for the Ember particle runtime
//!
//! This crate provides the core types that all other Ember crates depend on:
//! - `EntityHandle` - Host-issued entity identifiers
//! - `Vec3`, `Aabb` - Spatial types
//! - Error types and Result alias

mod error;
mod id;
mod types;

pub use error::{EmberError, Result};
pub use id::EntityHandle;
pub use types::{Aabb, Vec3};
