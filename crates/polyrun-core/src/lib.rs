//! Multi-runtime execution orchestration for guest-language playgrounds.
//!
//! Users submit source text in one of several guest languages (Python, Go,
//! JavaScript, TypeScript, SQL) and receive captured output within a bounded
//! time budget. Each language gets its own [`Coordinator`], which lazily boots
//! an isolated [`host`] running a language-specific [`adapters`] instance and
//! talks to it exclusively through the message [`protocol`].
//!
//! # Architecture Overview
//!
//! - **Runtime adapters**: boot a sandboxed interpreter, run one request at a time,
//!   capture output and surface lifecycle sub-phases such as package installation
//! - **Hosts**: one spawned task per adapter instance; forcibly terminated on timeout
//! - **Coordinators**: request correlation, timeout policy, generation tracking
//!   and host recreation
//! - **Status broadcasting**: lifecycle events republished to any number of subscribers
//! - **Configuration system**: YAML configuration with environment overrides

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod core_types;
pub mod errors;
pub mod host;
pub mod output;
pub mod playground;
pub mod protocol;
pub mod status;

pub use config::*;
pub use coordinator::{Coordinator, CoordinatorSettings, CoordinatorSnapshot, HostState};
pub use core_types::{ExecutionResult, GuestLanguage, SourceFile};
pub use errors::{ExecutionError, PolyrunError};
pub use host::{AdapterFactory, GuestFailure, HostSink, RunRequest, RuntimeAdapter};
pub use playground::Playground;
pub use protocol::{Generation, HostCommand, HostEnvelope, HostMessage, RequestId};
pub use status::{StatusBroadcaster, StatusEvent, StatusSubscription, StatusUpdate};

#[cfg(test)]
pub mod test_utils;
