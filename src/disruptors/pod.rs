//! Disruptor acting on the pods matched by a selector.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commands::{build_grpc_fault_command, build_http_fault_command};
use crate::controller::{AgentController, PodAgentController};
use crate::faults::{GrpcDisruptionOptions, GrpcFault, HttpDisruptionOptions, HttpFault};
use crate::kubernetes::Kubernetes;
use crate::selector::PodSelector;
use crate::{Error, Result};

/// Port validated when a fault does not name one.
///
/// The original behavior routes both HTTP and gRPC faults through the same
/// default; see `GrpcFault::port` for the gRPC caveat.
const DEFAULT_TARGET_PORT: u16 = 80;

/// Options that control a [`PodDisruptor`]'s behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PodDisruptorOptions {
    /// Timeout in seconds when waiting for the agent to be injected.
    ///
    /// 0 selects the default (30 s); a negative value disables the wait.
    pub inject_timeout: i32,
}

/// Injects faults into the traffic reaching a set of pods.
///
/// The target set is a snapshot taken at construction; cluster membership
/// changes afterwards are not observed. Fault-injection calls on a single
/// disruptor must not overlap: the agent runs one disruption per target at a
/// time, and calls block until the fault duration elapses on every target.
pub struct PodDisruptor {
    kubernetes: Arc<dyn Kubernetes>,
    namespace: String,
    controller: Box<dyn AgentController>,
}

impl std::fmt::Debug for PodDisruptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodDisruptor")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl PodDisruptor {
    /// Create a disruptor acting on the pods matched by `selector`.
    ///
    /// Resolves the selector, injects the agent into every matched pod and
    /// waits for readiness according to `options`. Any failure fails
    /// construction.
    pub async fn new(
        kubernetes: Arc<dyn Kubernetes>,
        selector: PodSelector,
        options: PodDisruptorOptions,
    ) -> Result<Self> {
        let namespace = selector.namespace().to_string();
        let targets = selector.resolve(kubernetes.as_ref()).await?;
        Self::from_targets(kubernetes, namespace, targets, options).await
    }

    /// Create a disruptor over an explicit snapshot of pods.
    ///
    /// Used by the service disruptor once a service has been resolved to its
    /// backing pods.
    pub async fn from_targets(
        kubernetes: Arc<dyn Kubernetes>,
        namespace: String,
        targets: Vec<String>,
        options: PodDisruptorOptions,
    ) -> Result<Self> {
        info!(namespace = %namespace, targets = ?targets, "injecting disruptor agents");

        let controller = PodAgentController::new(
            kubernetes.clone(),
            namespace.clone(),
            targets,
            options.inject_timeout,
        );
        controller.inject_agents().await?;

        Ok(Self {
            kubernetes,
            namespace,
            controller: Box::new(controller),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_controller(
        kubernetes: Arc<dyn Kubernetes>,
        namespace: impl Into<String>,
        controller: Box<dyn AgentController>,
    ) -> Self {
        Self {
            kubernetes,
            namespace: namespace.into(),
            controller,
        }
    }

    /// The snapshot of target pods captured at construction.
    pub fn targets(&self) -> Vec<String> {
        self.controller.targets()
    }

    /// Disrupt the HTTP requests served by the targets for `duration_secs`
    /// seconds.
    ///
    /// Blocks until the fault duration has elapsed on every target.
    pub async fn inject_http_faults(
        &self,
        fault: &HttpFault,
        duration_secs: u32,
        options: &HttpDisruptionOptions,
    ) -> Result<()> {
        fault.validate()?;
        self.validate_target_port(fault.port).await?;

        let command = build_http_fault_command(fault, duration_secs, options);
        debug!(command = ?command, "injecting HTTP faults");
        self.controller.exec_command(command).await
    }

    /// Disrupt the gRPC requests served by the targets for `duration_secs`
    /// seconds.
    ///
    /// Blocks until the fault duration has elapsed on every target.
    pub async fn inject_grpc_faults(
        &self,
        fault: &GrpcFault,
        duration_secs: u32,
        options: &GrpcDisruptionOptions,
    ) -> Result<()> {
        fault.validate()?;
        self.validate_target_port(fault.port).await?;

        let command = build_grpc_fault_command(fault, duration_secs, options);
        debug!(command = ?command, "injecting gRPC faults");
        self.controller.exec_command(command).await
    }

    /// Confirm every target declares the effective fault port.
    ///
    /// The agent's interception is a no-op unless the application actually
    /// binds the port; failing early gives a clear diagnostic.
    async fn validate_target_port(&self, port: u16) -> Result<()> {
        let port = if port == 0 { DEFAULT_TARGET_PORT } else { port };

        for target in self.controller.targets() {
            let pod = self.kubernetes.get_pod(&self.namespace, &target).await?;
            if !pod_listens_on(&pod, port) {
                return Err(Error::PortNotListening { target, port });
            }
        }

        Ok(())
    }
}

/// Whether any container of the pod declares the given port.
fn pod_listens_on(pod: &Pod, port: u16) -> bool {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers.iter().any(|container| {
                container
                    .ports
                    .as_ref()
                    .map(|ports| {
                        ports
                            .iter()
                            .any(|declared| declared.container_port == i32::from(port))
                    })
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
