//! Beacon probe - end-to-end verification harness for Beacon Socket.IO endpoints
//!
//! Connects to a running Beacon server, issues a fixed (or YAML-declared)
//! sequence of request/acknowledgment calls and records every result as a
//! timestamped JSON artifact.

pub mod call;
pub mod cli;
pub mod commands;
pub mod common;
pub mod scenario;
pub mod sink;
pub mod transport;

// Re-export commonly used types for tests
pub use call::CorrelatedCall;
pub use common::{Error, Result};
pub use scenario::{RunReport, Runner, Scenario, Step};
pub use sink::ResultSink;
