//! External command execution.
//!
//! All subprocess management is pure (no registry or store access) and
//! lives in the `core` crate for isolation and testability. The engine
//! supplies an [`executor::OutputSink`] that writes into a job record.

pub mod executor;
pub mod subprocess;
