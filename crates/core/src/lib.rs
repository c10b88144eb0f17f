//! Domain types and pure execution logic for the opsdeck job engine.
//!
//! - [`job`]: the job record and its lifecycle rules.
//! - [`actions`]: the closed set of action kinds plus input/placeholder helpers.
//! - [`scripting`]: subprocess execution with streamed output.
//! - [`store`]: the durable store seam implemented by `opsdeck-db`.

pub mod actions;
pub mod error;
pub mod job;
pub mod job_events;
pub mod output;
pub mod scripting;
pub mod store;
pub mod token;
pub mod types;
