//! Domain types and port traits for the genflow job engine.
//!
//! This crate has zero internal dependencies. It defines the job ledger
//! row and its guarded mutations, the node-type routing table, the stall
//! predicate used by the recovery sweep, and the narrow async traits
//! through which the engine talks to its durable collaborators (ledger
//! store, queue backend, execution store, prediction service).
//!
//! In-memory implementations of every port live in [`memory`]; they back
//! the test suites and single-process development runs.

pub mod clock;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod memory;
pub mod node;
pub mod prediction;
pub mod progress;
pub mod queue;
pub mod recovery;
pub mod status;
pub mod types;
