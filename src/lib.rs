//! Fault injection for Kubernetes workloads under load tests.
//!
//! This crate lets a load-testing script degrade the traffic reaching a set
//! of pods so the resilience of the applications behind them can be measured
//! under realistic partial failures: elevated error rates, added latency,
//! per-path or per-method exclusions.
//!
//! # Architecture
//!
//! A [`disruptors::PodDisruptor`] is built from a [`selector::PodSelector`].
//! At construction it resolves the selector to a snapshot of target pods and
//! injects an agent into each one as an ephemeral container. Fault-injection
//! calls translate a declarative fault descriptor into the agent command
//! line and execute it in every target in parallel; the agent intercepts the
//! target port and applies the faults for the requested duration.
//!
//! A [`disruptors::ServiceDisruptor`] is a thin facade that resolves a
//! service to its backing pods and delegates to a pod disruptor.
//!
//! # Modules
//!
//! - [`faults`] - declarative HTTP and gRPC fault descriptors
//! - [`commands`] - fault descriptor to agent command-line translation
//! - [`selector`] - pod selection by namespace and labels
//! - [`kubernetes`] - the capability surface consumed from the cluster
//! - [`controller`] - agent injection and parallel command fan-out
//! - [`disruptors`] - the pod and service disruptors
//! - [`api`] - validation/conversion layer for embedding scripting runtimes
//! - [`fixtures`] - object builders and an in-memory cluster for tests
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod api;
pub mod commands;
pub mod controller;
pub mod disruptors;
pub mod error;
pub mod faults;
pub mod fixtures;
pub mod kubernetes;
pub mod selector;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the ephemeral container the agent runs in.
///
/// Injection is idempotent by this name: a pod that already carries an
/// ephemeral container called this is never injected twice.
pub const AGENT_CONTAINER_NAME: &str = "xk6-agent";

/// Image used for the agent container when no override is set.
pub const DEFAULT_AGENT_IMAGE: &str = "ghcr.io/xk6-disruptor/xk6-disruptor-agent:latest";

/// Environment variable overriding the agent image.
///
/// End-to-end suites set this to pin a locally built image instead of the
/// released one.
pub const AGENT_IMAGE_ENV: &str = "XK6_DISRUPTOR_AGENT_IMAGE";

/// Namespace used when a selector does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Image reference for the injected agent container.
pub fn agent_image() -> String {
    std::env::var(AGENT_IMAGE_ENV).unwrap_or_else(|_| DEFAULT_AGENT_IMAGE.to_string())
}
