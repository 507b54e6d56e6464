//! Row structs for the genflow tables.
//!
//! Each submodule holds a `FromRow` record matching the database row and
//! the conversion into the corresponding `genflow-core` domain type.

pub mod execution;
pub mod ledger;
pub mod queue_job;
