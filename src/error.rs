//! Error types for disruptor operations.
//!
//! Errors are structured with fields to aid debugging: each variant carries
//! the contextual information a script author needs to act on the failure,
//! such as the offending target pod or the agent's captured stderr.

use thiserror::Error;

/// Main error type for disruptor operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid selector or service reference
    #[error("invalid selector: {message}")]
    SelectorInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// Fault descriptor violates an invariant
    #[error("invalid fault: {message}")]
    FaultInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// A target does not declare the port the fault applies to
    #[error("target \"{target}\" doesn't listen to port {port}")]
    PortNotListening {
        /// Name of the offending pod
        target: String,
        /// Effective fault port that no container declares
        port: u16,
    },

    /// The agent container did not become ready within the injection timeout
    #[error("timeout waiting for container {container} to be running in pod {target}")]
    Timeout {
        /// Name of the pod the agent was injected into
        target: String,
        /// Name of the ephemeral container that never became ready
        container: String,
    },

    /// A command executed in an agent returned a failure
    #[error("error invoking agent in target {target}: {message}\n{stderr}")]
    AgentExecFailed {
        /// Name of the pod the command ran in
        target: String,
        /// Failure message reported by the exec channel
        message: String,
        /// Captured stderr of the agent
        stderr: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred (e.g., "controller")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a selector error with the given message
    pub fn selector(msg: impl Into<String>) -> Self {
        Self::SelectorInvalid {
            message: msg.into(),
        }
    }

    /// Create a fault descriptor error with the given message
    pub fn fault(msg: impl Into<String>) -> Self {
        Self::FaultInvalid {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Whether this error is a Kubernetes 404 for a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(e)
            } if e.code == 404
        )
    }

    /// Whether the cluster denied the operation
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(e)
            } if e.code == 403
        )
    }

    /// Get the target pod name if this error is associated with one
    pub fn target(&self) -> Option<&str> {
        match self {
            Error::PortNotListening { target, .. } => Some(target),
            Error::Timeout { target, .. } => Some(target),
            Error::AgentExecFailed { target, .. } => Some(target),
            _ => None,
        }
    }
}
