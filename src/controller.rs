//! Agent lifecycle across a set of target pods.
//!
//! The controller owns the snapshot of resolved targets and performs every
//! per-target operation in parallel: one task per pod, a bounded error
//! channel sized to the target count so writers never block, and the first
//! error observed wins. The caller cannot meaningfully recover a partial
//! failure (a single missing agent makes subsequent fault injection
//! unsound), so one representative error is enough.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Capabilities, EphemeralContainer, SecurityContext};
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::kubernetes::Kubernetes;
use crate::{agent_image, Error, Result, AGENT_CONTAINER_NAME};

/// Timeout waiting for agent readiness when the caller passes 0.
pub const DEFAULT_INJECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Controls the agents running in a set of target pods.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AgentController: Send + Sync {
    /// Inject the agent into every target that does not already carry one.
    async fn inject_agents(&self) -> Result<()>;

    /// Execute a command in the agent of every target, in parallel, and
    /// report the first error.
    async fn exec_command(&self, command: Vec<String>) -> Result<()>;

    /// The snapshot of target pods captured at construction.
    fn targets(&self) -> Vec<String>;
}

/// [`AgentController`] implementation injecting agents as ephemeral
/// containers.
pub struct PodAgentController {
    kubernetes: Arc<dyn Kubernetes>,
    namespace: String,
    targets: Vec<String>,
    inject_timeout: Option<Duration>,
}

impl PodAgentController {
    /// Create a controller for a snapshot of target pods.
    ///
    /// `inject_timeout_secs` follows the disruptor option semantics: 0 means
    /// the default, negative means do not wait for agent readiness.
    pub fn new(
        kubernetes: Arc<dyn Kubernetes>,
        namespace: impl Into<String>,
        targets: Vec<String>,
        inject_timeout_secs: i32,
    ) -> Self {
        Self {
            kubernetes,
            namespace: namespace.into(),
            targets,
            inject_timeout: inject_timeout(inject_timeout_secs),
        }
    }

    /// Run one task per target and return the first error any of them sent.
    async fn fan_out<F, Fut>(&self, task: F) -> Result<()>
    where
        F: Fn(Arc<dyn Kubernetes>, String, String) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if self.targets.is_empty() {
            return Ok(());
        }

        // Sized to the target count so sending never blocks.
        let (errors_tx, mut errors_rx) = mpsc::channel(self.targets.len());

        let handles: Vec<_> = self
            .targets
            .iter()
            .map(|target| {
                let work = task(
                    self.kubernetes.clone(),
                    self.namespace.clone(),
                    target.clone(),
                );
                let errors_tx = errors_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = work.await {
                        let _ = errors_tx.try_send(e);
                    }
                })
            })
            .collect();

        for joined in join_all(handles).await {
            joined.map_err(|e| Error::internal("controller", format!("task failed: {}", e)))?;
        }
        drop(errors_tx);

        match errors_rx.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl AgentController for PodAgentController {
    async fn inject_agents(&self) -> Result<()> {
        let timeout = self.inject_timeout;
        self.fan_out(move |kubernetes, namespace, target| {
            inject_agent(kubernetes, namespace, target, timeout)
        })
        .await
    }

    async fn exec_command(&self, command: Vec<String>) -> Result<()> {
        self.fan_out(move |kubernetes, namespace, target| {
            let command = command.clone();
            async move {
                kubernetes
                    .exec(&namespace, &target, AGENT_CONTAINER_NAME, command, Vec::new())
                    .await?;
                Ok(())
            }
        })
        .await
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }
}

/// Inject the agent into a single pod, skipping pods that already carry it.
async fn inject_agent(
    kubernetes: Arc<dyn Kubernetes>,
    namespace: String,
    target: String,
    timeout: Option<Duration>,
) -> Result<()> {
    let pod = kubernetes.get_pod(&namespace, &target).await?;

    let already_injected = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.ephemeral_containers.as_ref())
        .map(|containers| {
            containers
                .iter()
                .any(|container| container.name == AGENT_CONTAINER_NAME)
        })
        .unwrap_or(false);

    if already_injected {
        debug!(target = %target, "agent already injected");
        return Ok(());
    }

    kubernetes
        .attach_ephemeral_container(&namespace, &target, agent_container(), timeout)
        .await
}

/// The canonical spec of the agent container.
pub(crate) fn agent_container() -> EphemeralContainer {
    EphemeralContainer {
        name: AGENT_CONTAINER_NAME.to_string(),
        image: Some(agent_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        // The agent needs a writable TTY to persist across execs.
        tty: Some(true),
        stdin: Some(true),
        ..Default::default()
    }
}

/// Resolve the inject timeout option to a concrete deadline.
fn inject_timeout(secs: i32) -> Option<Duration> {
    match secs {
        0 => Some(DEFAULT_INJECT_TIMEOUT),
        secs if secs < 0 => None,
        secs => Some(Duration::from_secs(secs as u64)),
    }
}
