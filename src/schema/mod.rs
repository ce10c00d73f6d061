//! mediguard.snapshot.v1 schema
//!
//! This module defines the read-only input a collaborator hands to the
//! pipeline: one user's ordered metric history, their lifestyle context and
//! an optional stored baseline.

mod adapter;
mod snapshot;

pub use adapter::*;
pub use snapshot::*;
