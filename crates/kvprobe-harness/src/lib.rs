//! Test suites for UDP key-value servers.
//!
//! Three suites are provided:
//!
//! - [`single_node`]: request/response conformance, size limits, capacity
//!   and stress against one server;
//! - [`throughput`]: concurrent PUT/GET load at increasing concurrency;
//! - [`multi_node`]: a shared keyspace checked for consistency across a
//!   cluster.
//!
//! Each suite produces a [`Report`]. Scenarios end as passed, failed or
//! undecided; a lost datagram never counts as a server error on its own.
//! The [`Driver`] runs suites against a target list, which is what the
//! `kvprobe` binary does.

mod config;
mod driver;
mod error;
pub mod multi_node;
mod node;
mod report;
pub mod shutdown;
pub mod single_node;
mod suite;
pub mod throughput;

pub use config::{ClientSection, Config, MultiNodeConfig, SingleNodeConfig, ThroughputConfig};
pub use driver::{Driver, Mode};
pub use error::HarnessError;
pub use node::{confirm_alive, index_key};
pub use report::{Log, Report, ScenarioRecord};
pub use suite::{Scenario, SuiteRunner};
