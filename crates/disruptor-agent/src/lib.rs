//! In-target fault-injection agent.
//!
//! The agent runs as an ephemeral container next to the application under
//! test. On startup it redirects the traffic arriving at the target port to
//! a local proxy, lets the proxy degrade that traffic (added latency,
//! injected errors) for the requested duration, then removes the
//! redirection and exits.
//!
//! The command line is the contract with the controlling library; see
//! [`cli`] for the flags.

#![deny(missing_docs)]

pub mod cli;
pub mod proxy;
pub mod redirect;

mod runner;

pub use runner::run;
