//! Declarative fault descriptors.
//!
//! A fault describes *what* disruption to apply to the traffic reaching a
//! target; the agent decides *how*. Descriptors are plain data so they can
//! cross the scripting boundary unchanged, and every invariant is checked by
//! [`HttpFault::validate`] / [`GrpcFault::validate`] before any cluster call
//! is made.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Fault affecting the HTTP requests served by a target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpFault {
    /// Port the target application listens on. `0` selects the default (80).
    pub port: u16,
    /// Average delay added to each request, in milliseconds.
    pub average_delay: u32,
    /// Variation of the injected delay, in milliseconds.
    ///
    /// Ignored when `average_delay` is 0.
    pub delay_variation: u32,
    /// Fraction of requests that fail, in `[0, 1]`.
    pub error_rate: f64,
    /// Status code returned by faulted requests. Required when
    /// `error_rate` is greater than 0.
    pub error_code: u16,
    /// Body returned by faulted requests.
    pub error_body: String,
    /// Comma-separated list of request paths excluded from disruption.
    pub exclude: String,
}

/// Fault affecting the gRPC requests served by a target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GrpcFault {
    /// Port the target application listens on. `0` selects the default (80).
    pub port: u16,
    /// Average delay added to each request, in milliseconds.
    pub average_delay: u32,
    /// Variation of the injected delay, in milliseconds.
    ///
    /// Ignored when `average_delay` is 0.
    pub delay_variation: u32,
    /// Fraction of requests that fail, in `[0, 1]`.
    pub error_rate: f64,
    /// gRPC status code returned by faulted requests. Required (non-zero)
    /// when `error_rate` is greater than 0.
    pub status_code: i32,
    /// Status message returned by faulted requests.
    pub status_message: String,
    /// Comma-separated list of full method names excluded from disruption.
    pub exclude: String,
}

/// Options for the injection of HTTP faults in a target.
///
/// Defaults for unset fields are supplied by the agent binary, not here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpDisruptionOptions {
    /// Port the agent listens on inside the target.
    pub proxy_port: u16,
    /// Network interface the agent intercepts traffic from.
    pub iface: String,
}

/// Options for the injection of gRPC faults in a target.
///
/// Defaults for unset fields are supplied by the agent binary, not here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct GrpcDisruptionOptions {
    /// Port the agent listens on inside the target.
    pub proxy_port: u16,
    /// Network interface the agent intercepts traffic from.
    pub iface: String,
}

fn validate_error_rate(error_rate: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&error_rate) {
        return Err(Error::fault(format!(
            "error rate {} out of range [0, 1]",
            error_rate
        )));
    }
    Ok(())
}

impl HttpFault {
    /// Check the descriptor invariants.
    pub fn validate(&self) -> Result<()> {
        validate_error_rate(self.error_rate)?;
        if self.error_rate > 0.0 && self.error_code == 0 {
            return Err(Error::fault(
                "an error code is required when the error rate is greater than 0",
            ));
        }
        if self.error_code != 0 && !(100..=599).contains(&self.error_code) {
            return Err(Error::fault(format!(
                "{} is not a valid HTTP status code",
                self.error_code
            )));
        }
        Ok(())
    }
}

impl GrpcFault {
    /// Check the descriptor invariants.
    pub fn validate(&self) -> Result<()> {
        validate_error_rate(self.error_rate)?;
        if self.error_rate > 0.0 && self.status_code == 0 {
            return Err(Error::fault(
                "a status code is required when the error rate is greater than 0",
            ));
        }
        Ok(())
    }
}
