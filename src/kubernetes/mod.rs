//! The capability surface the disruptors consume from the cluster.
//!
//! Everything the core needs from Kubernetes goes through the [`Kubernetes`]
//! trait: listing pods by labels, reading a pod's container ports, attaching
//! the agent as an ephemeral container, executing commands in it, and
//! resolving a service to its backing pods. The trait is the only seam
//! against the cluster, which is how the test suite substitutes an
//! in-memory implementation ([`crate::fixtures::FakeKubernetes`]).

mod client;

pub use client::KubeClient;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EphemeralContainer, Pod};
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Output of a command executed inside a container.
///
/// A non-zero exit is reported as an error, not as output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecOutput {
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
}

/// A service resolved to its backing pods and the ports they expose.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceEndpoints {
    /// Names of the pods backing the service, without duplicates
    pub pods: Vec<String>,
    /// Target ports the endpoints expose, in declaration order
    pub ports: Vec<u16>,
}

/// Cluster operations the disruptors depend on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Kubernetes: Send + Sync {
    /// List the names of pods in `namespace` whose labels are a superset of
    /// `select` and not a superset of `exclude`.
    ///
    /// An empty `select` map matches every pod in the namespace; an empty
    /// `exclude` map excludes none.
    async fn list_pods(
        &self,
        namespace: &str,
        select: &BTreeMap<String, String>,
        exclude: &BTreeMap<String, String>,
    ) -> Result<Vec<String>>;

    /// Fetch a single pod, including its container port declarations.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// Attach an ephemeral container to a running pod.
    ///
    /// Idempotent by container name. When `timeout` is given, the call
    /// returns once the container reports running, or fails with
    /// [`crate::Error::Timeout`]; with `None` it returns as soon as the
    /// attach is accepted.
    async fn attach_ephemeral_container(
        &self,
        namespace: &str,
        pod: &str,
        container: EphemeralContainer,
        timeout: Option<Duration>,
    ) -> Result<()>;

    /// Execute a command inside a named container of a pod and collect its
    /// output. Commands that terminate with a failure status are surfaced as
    /// [`crate::Error::AgentExecFailed`] carrying the captured stderr.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Vec<u8>,
    ) -> Result<ExecOutput>;

    /// Resolve a service to its backing pods and exposed target ports.
    async fn resolve_service(&self, namespace: &str, service: &str) -> Result<ServiceEndpoints>;
}

/// Check whether `labels` contains every entry of `expected`.
///
/// An empty `expected` map is a subset of anything.
pub(crate) fn labels_superset(
    labels: Option<&BTreeMap<String, String>>,
    expected: &BTreeMap<String, String>,
) -> bool {
    expected.iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .is_some_and(|found| found == value)
    })
}
