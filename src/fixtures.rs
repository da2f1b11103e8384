//! Test fixtures: Kubernetes object builders and an in-memory cluster.
//!
//! Shared by the unit tests and the integration suite. [`FakeKubernetes`]
//! implements the full capability surface against in-memory state and
//! records every attach and exec call so tests can assert on them.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, ContainerState, ContainerStateRunning, ContainerStatus,
    EphemeralContainer, Pod, PodSpec, PodStatus,
};
use kube::core::ErrorResponse;

use crate::kubernetes::{labels_superset, ExecOutput, Kubernetes, ServiceEndpoints};
use crate::{Error, Result};

/// Builder for [`Pod`] objects used in tests.
#[derive(Clone, Debug, Default)]
pub struct PodBuilder {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    ports: Vec<u16>,
    ephemeral: Vec<(String, bool)>,
}

impl PodBuilder {
    /// Start building a pod with the given name in the default namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            ..Default::default()
        }
    }

    /// Set the pod's namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Add labels to the pod.
    pub fn with_labels(mut self, labels: &[(&str, &str)]) -> Self {
        for (key, value) in labels {
            self.labels.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Add a container declaring the given TCP port.
    pub fn with_container_port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    /// Add an ephemeral container, optionally already running.
    pub fn with_ephemeral_container(mut self, name: impl Into<String>, running: bool) -> Self {
        self.ephemeral.push((name.into(), running));
        self
    }

    /// Build the pod object.
    pub fn build(self) -> Pod {
        let containers = if self.ports.is_empty() {
            vec![Container {
                name: "app".to_string(),
                ..Default::default()
            }]
        } else {
            self.ports
                .iter()
                .enumerate()
                .map(|(index, port)| Container {
                    name: if index == 0 {
                        "app".to_string()
                    } else {
                        format!("app-{}", index)
                    },
                    ports: Some(vec![ContainerPort {
                        container_port: i32::from(*port),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                })
                .collect()
        };

        let ephemeral_containers: Vec<EphemeralContainer> = self
            .ephemeral
            .iter()
            .map(|(name, _)| EphemeralContainer {
                name: name.clone(),
                ..Default::default()
            })
            .collect();

        let status = if self.ephemeral.is_empty() {
            None
        } else {
            Some(PodStatus {
                ephemeral_container_statuses: Some(
                    self.ephemeral
                        .iter()
                        .map(|(name, running)| ContainerStatus {
                            name: name.clone(),
                            state: running.then(|| ContainerState {
                                running: Some(ContainerStateRunning::default()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            })
        };

        Pod {
            metadata: kube::core::ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                labels: if self.labels.is_empty() {
                    None
                } else {
                    Some(self.labels)
                },
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers,
                ephemeral_containers: if ephemeral_containers.is_empty() {
                    None
                } else {
                    Some(ephemeral_containers)
                },
                ..Default::default()
            }),
            status,
        }
    }
}

#[derive(Default)]
struct FakeState {
    pods: BTreeMap<(String, String), Pod>,
    endpoints: BTreeMap<(String, String), ServiceEndpoints>,
    attached: Vec<(String, String)>,
    executed: Vec<Vec<String>>,
    exec_error: Option<String>,
    attach_times_out: bool,
}

/// In-memory implementation of the cluster capability surface.
#[derive(Default)]
pub struct FakeKubernetes {
    state: Mutex<FakeState>,
}

impl FakeKubernetes {
    /// Create an empty fake cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pod.
    pub fn add_pod(&self, pod: Pod) {
        let mut state = self.state.lock().expect("fixture state poisoned");
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        state.pods.insert((namespace, name), pod);
    }

    /// Store the endpoints of a service.
    pub fn add_endpoints(
        &self,
        namespace: impl Into<String>,
        service: impl Into<String>,
        pods: Vec<String>,
        ports: Vec<u16>,
    ) {
        let mut state = self.state.lock().expect("fixture state poisoned");
        state
            .endpoints
            .insert((namespace.into(), service.into()), ServiceEndpoints { pods, ports });
    }

    /// Make every subsequent exec fail with the given message.
    pub fn fail_execs_with(&self, message: impl Into<String>) {
        self.state
            .lock()
            .expect("fixture state poisoned")
            .exec_error = Some(message.into());
    }

    /// Make every subsequent attach with a deadline time out.
    pub fn fail_attach_with_timeout(&self) {
        self.state
            .lock()
            .expect("fixture state poisoned")
            .attach_times_out = true;
    }

    /// The `(pod, container)` pairs attached so far.
    pub fn attached_containers(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .expect("fixture state poisoned")
            .attached
            .clone()
    }

    /// The commands executed so far, in execution order.
    pub fn executed_commands(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .expect("fixture state poisoned")
            .executed
            .clone()
    }
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::Kube {
        source: kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} \"{}\" not found", kind, name),
            reason: "NotFound".to_string(),
            code: 404,
        }),
    }
}

#[async_trait]
impl Kubernetes for FakeKubernetes {
    async fn list_pods(
        &self,
        namespace: &str,
        select: &BTreeMap<String, String>,
        exclude: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().expect("fixture state poisoned");
        let names = state
            .pods
            .iter()
            .filter(|((pod_namespace, _), _)| pod_namespace.as_str() == namespace)
            .filter(|(_, pod)| {
                let labels = pod.metadata.labels.as_ref();
                labels_superset(labels, select)
                    && (exclude.is_empty() || !labels_superset(labels, exclude))
            })
            .map(|((_, name), _)| name.clone())
            .collect();
        Ok(names)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let state = self.state.lock().expect("fixture state poisoned");
        state
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("pods", name))
    }

    async fn attach_ephemeral_container(
        &self,
        namespace: &str,
        pod: &str,
        container: EphemeralContainer,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("fixture state poisoned");
        if state.attach_times_out && timeout.is_some() {
            return Err(Error::Timeout {
                target: pod.to_string(),
                container: container.name,
            });
        }

        let key = (namespace.to_string(), pod.to_string());
        let Some(stored) = state.pods.get_mut(&key) else {
            return Err(not_found("pods", pod));
        };

        let spec = stored.spec.get_or_insert_with(Default::default);
        let containers = spec.ephemeral_containers.get_or_insert_with(Vec::new);
        if !containers.iter().any(|c| c.name == container.name) {
            containers.push(container.clone());
            let status = stored.status.get_or_insert_with(Default::default);
            status
                .ephemeral_container_statuses
                .get_or_insert_with(Vec::new)
                .push(ContainerStatus {
                    name: container.name.clone(),
                    state: Some(ContainerState {
                        running: Some(ContainerStateRunning::default()),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
        }

        state
            .attached
            .push((pod.to_string(), container.name.clone()));
        Ok(())
    }

    async fn exec(
        &self,
        _namespace: &str,
        pod: &str,
        _container: &str,
        command: Vec<String>,
        _stdin: Vec<u8>,
    ) -> Result<ExecOutput> {
        let mut state = self.state.lock().expect("fixture state poisoned");
        state.executed.push(command);
        if let Some(message) = &state.exec_error {
            return Err(Error::AgentExecFailed {
                target: pod.to_string(),
                message: message.clone(),
                stderr: String::new(),
            });
        }
        Ok(ExecOutput::default())
    }

    async fn resolve_service(&self, namespace: &str, service: &str) -> Result<ServiceEndpoints> {
        let state = self.state.lock().expect("fixture state poisoned");
        state
            .endpoints
            .get(&(namespace.to_string(), service.to_string()))
            .cloned()
            .ok_or_else(|| not_found("endpoints", service))
    }
}

/// Compare a command against its expected rendering, ignoring flag order.
///
/// The agent contract fixes the clause order, but tests frequently state the
/// expectation in the most readable order; both sides are parsed into
/// positional arguments plus a flag/value map before comparing. Values keep
/// single spaces (`-m internal error`).
pub fn command_equals(expected: &str, actual: &[String]) -> bool {
    let expected_tokens: Vec<String> = expected.split_whitespace().map(str::to_string).collect();
    parse_command(&expected_tokens) == parse_command(actual)
}

fn parse_command(tokens: &[String]) -> (Vec<String>, BTreeMap<String, String>) {
    let mut positionals = Vec::new();
    let mut flags = BTreeMap::new();
    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        index += 1;
        if let Some(flag) = token.strip_prefix('-') {
            let mut value = Vec::new();
            while index < tokens.len() && !tokens[index].starts_with('-') {
                value.push(tokens[index].clone());
                index += 1;
            }
            flags.insert(flag.to_string(), value.join(" "));
        } else {
            positionals.push(token.clone());
        }
    }
    (positionals, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_args(command: &str) -> Vec<String> {
        command.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn command_comparison_ignores_flag_order() {
        assert!(command_equals(
            "xk6-disruptor-agent http -d 60s -r 0.1 -e 500",
            &to_args("xk6-disruptor-agent http -d 60s -e 500 -r 0.1"),
        ));
    }

    #[test]
    fn command_comparison_keeps_positional_order() {
        assert!(!command_equals(
            "xk6-disruptor-agent http -d 60s",
            &to_args("xk6-disruptor-agent grpc -d 60s"),
        ));
        assert!(!command_equals(
            "xk6-disruptor-agent http -d 60s",
            &to_args("http xk6-disruptor-agent -d 60s"),
        ));
    }

    #[test]
    fn command_comparison_detects_differing_values() {
        assert!(!command_equals(
            "xk6-disruptor-agent http -d 60s",
            &to_args("xk6-disruptor-agent http -d 30s"),
        ));
        assert!(!command_equals(
            "xk6-disruptor-agent http -d 60s -t 80",
            &to_args("xk6-disruptor-agent http -d 60s"),
        ));
    }

    #[test]
    fn command_comparison_joins_multi_token_values() {
        let actual = vec![
            "xk6-disruptor-agent".to_string(),
            "grpc".to_string(),
            "-d".to_string(),
            "60s".to_string(),
            "-m".to_string(),
            "internal error".to_string(),
        ];
        assert!(command_equals(
            "xk6-disruptor-agent grpc -d 60s -m internal error",
            &actual,
        ));
    }

    #[test]
    fn pod_builder_produces_ports_and_labels() {
        let pod = PodBuilder::new("my-app-pod")
            .with_namespace("testns")
            .with_labels(&[("app", "myapp")])
            .with_container_port(80)
            .build();

        assert_eq!(pod.metadata.name.as_deref(), Some("my-app-pod"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("testns"));
        let spec = pod.spec.unwrap();
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(
            spec.containers[0].ports.as_ref().unwrap()[0].container_port,
            80
        );
    }

    #[tokio::test]
    async fn fake_lists_pods_by_labels() {
        let fake = FakeKubernetes::new();
        fake.add_pod(
            PodBuilder::new("selected")
                .with_namespace("testns")
                .with_labels(&[("app", "myapp")])
                .build(),
        );
        fake.add_pod(
            PodBuilder::new("excluded")
                .with_namespace("testns")
                .with_labels(&[("app", "myapp"), ("canary", "true")])
                .build(),
        );
        fake.add_pod(
            PodBuilder::new("other-namespace")
                .with_namespace("prod")
                .with_labels(&[("app", "myapp")])
                .build(),
        );

        let select: BTreeMap<String, String> =
            [("app".to_string(), "myapp".to_string())].into_iter().collect();
        let exclude: BTreeMap<String, String> =
            [("canary".to_string(), "true".to_string())].into_iter().collect();

        let names = fake.list_pods("testns", &select, &exclude).await.unwrap();
        assert_eq!(names, vec!["selected".to_string()]);
    }

    #[tokio::test]
    async fn fake_attach_updates_the_stored_pod() {
        let fake = FakeKubernetes::new();
        fake.add_pod(PodBuilder::new("my-app-pod").with_namespace("testns").build());

        fake.attach_ephemeral_container(
            "testns",
            "my-app-pod",
            EphemeralContainer {
                name: "xk6-agent".to_string(),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

        let pod = fake.get_pod("testns", "my-app-pod").await.unwrap();
        let containers = pod.spec.unwrap().ephemeral_containers.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "xk6-agent");
    }
}
