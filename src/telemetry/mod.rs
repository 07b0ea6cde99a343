//! Observability helpers.
//!
//! Gateway code logs through `tracing` with `request_id`, `provider` and
//! `model` as structured fields; every accepted request runs inside a
//! `gateway_request` span. This module only wires those events to outputs.

pub mod logging;

pub use logging::{init_logging, LoggingConfig, LoggingGuard};
