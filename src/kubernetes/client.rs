//! kube-rs backed implementation of the cluster capability surface.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, EphemeralContainer, Pod};
use kube::api::{Api, AttachParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{labels_superset, ExecOutput, Kubernetes, ServiceEndpoints};
use crate::{Error, Result};

/// How often the readiness of an attached container is re-checked.
const ATTACH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Cluster access through a kube-rs [`Client`].
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a client from the default configuration (in-cluster or
    /// `KUBECONFIG`).
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create a client from a kubeconfig file.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| Error::internal("kubeconfig", format!("failed to read kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::internal("kubeconfig", format!("failed to load kubeconfig: {}", e)))?;
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Kubernetes for KubeClient {
    async fn list_pods(
        &self,
        namespace: &str,
        select: &BTreeMap<String, String>,
        exclude: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let mut params = ListParams::default();
        if !select.is_empty() {
            params = params.labels(&build_label_selector(select));
        }

        let list = self.pods(namespace).list(&params).await?;

        // The exclusion is a "not a superset" predicate, which the selector
        // grammar cannot express for more than one label; filter here.
        let names = list
            .items
            .into_iter()
            .filter(|pod| {
                exclude.is_empty() || !labels_superset(pod.metadata.labels.as_ref(), exclude)
            })
            .filter_map(|pod| pod.metadata.name)
            .collect();

        Ok(names)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        Ok(self.pods(namespace).get(name).await?)
    }

    async fn attach_ephemeral_container(
        &self,
        namespace: &str,
        pod: &str,
        container: EphemeralContainer,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let container_name = container.name.clone();
        let pods = self.pods(namespace);

        let patch = serde_json::json!({
            "spec": { "ephemeralContainers": [ container ] }
        });
        pods.patch_subresource(
            pod,
            "ephemeralcontainers",
            &PatchParams::default(),
            &Patch::Strategic(patch),
        )
        .await?;

        let Some(timeout) = timeout else {
            return Ok(());
        };

        let start = Instant::now();
        loop {
            let current = pods.get(pod).await?;
            if ephemeral_container_running(&current, &container_name) {
                debug!(pod, container = %container_name, "ephemeral container running");
                return Ok(());
            }

            if start.elapsed() > timeout {
                return Err(Error::Timeout {
                    target: pod.to_string(),
                    container: container_name,
                });
            }

            tokio::time::sleep(ATTACH_POLL_INTERVAL).await;
        }
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
        stdin: Vec<u8>,
    ) -> Result<ExecOutput> {
        let params = AttachParams::default()
            .container(container)
            .stdin(!stdin.is_empty())
            .stdout(true)
            .stderr(true);

        let mut attached = self.pods(namespace).exec(pod, command, &params).await?;

        if let Some(mut writer) = attached.stdin() {
            writer
                .write_all(&stdin)
                .await
                .map_err(|e| Error::internal("exec", format!("failed to write stdin: {}", e)))?;
            // Dropping the writer closes the stdin channel.
        }

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(mut reader) = stdout {
                let _ = reader.read_to_end(&mut buf).await;
            }
            buf
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Some(mut reader) = stderr {
                let _ = reader.read_to_end(&mut buf).await;
            }
            buf
        };
        let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };

        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                return Err(Error::AgentExecFailed {
                    target: pod.to_string(),
                    message: status.message.unwrap_or_default(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                });
            }
        }

        Ok(ExecOutput { stdout, stderr })
    }

    async fn resolve_service(&self, namespace: &str, service: &str) -> Result<ServiceEndpoints> {
        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let resolved = endpoints.get(service).await?;

        let mut pods: Vec<String> = Vec::new();
        let mut ports: Vec<u16> = Vec::new();
        for subset in resolved.subsets.unwrap_or_default() {
            for address in subset.addresses.unwrap_or_default() {
                let Some(target) = address.target_ref else {
                    continue;
                };
                if target.kind.as_deref() != Some("Pod") {
                    continue;
                }
                if let Some(name) = target.name {
                    if !pods.contains(&name) {
                        pods.push(name);
                    }
                }
            }
            for port in subset.ports.unwrap_or_default() {
                ports.push(port.port as u16);
            }
        }

        Ok(ServiceEndpoints { pods, ports })
    }
}

/// Render a label map as an equality-based selector string.
pub(crate) fn build_label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether the pod reports a running ephemeral container with the given name.
pub(crate) fn ephemeral_container_running(pod: &Pod, name: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.ephemeral_container_statuses.as_ref())
        .map(|statuses| {
            statuses.iter().any(|status| {
                status.name == name
                    && status
                        .state
                        .as_ref()
                        .is_some_and(|state| state.running.is_some())
            })
        })
        .unwrap_or(false)
}
