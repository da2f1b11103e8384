//! Disruptor acting on the pods backing a service.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::faults::{GrpcDisruptionOptions, GrpcFault, HttpDisruptionOptions, HttpFault};
use crate::kubernetes::Kubernetes;
use crate::{Error, Result, DEFAULT_NAMESPACE};

use super::{PodDisruptor, PodDisruptorOptions};

/// Options that control a [`ServiceDisruptor`]'s behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceDisruptorOptions {
    /// Timeout in seconds when waiting for the agent to be injected.
    ///
    /// 0 selects the default (30 s); a negative value disables the wait.
    pub inject_timeout: i32,
}

/// Injects faults into the traffic reaching the pods backing a service.
///
/// Thin facade over a [`PodDisruptor`]: the service is resolved to its
/// endpoints once, at construction, and everything else is delegated. When a
/// fault does not name a port, the service's first port is used.
#[derive(Debug)]
pub struct ServiceDisruptor {
    disruptor: PodDisruptor,
    service: String,
    ports: Vec<u16>,
}

impl ServiceDisruptor {
    /// Create a disruptor acting on the pods backing `service` in
    /// `namespace`.
    pub async fn new(
        kubernetes: Arc<dyn Kubernetes>,
        service: &str,
        namespace: &str,
        options: ServiceDisruptorOptions,
    ) -> Result<Self> {
        if service.is_empty() {
            return Err(Error::selector("service name is required"));
        }
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };

        let endpoints = kubernetes.resolve_service(namespace, service).await?;
        debug!(
            service,
            namespace,
            pods = ?endpoints.pods,
            ports = ?endpoints.ports,
            "resolved service endpoints"
        );

        let disruptor = PodDisruptor::from_targets(
            kubernetes,
            namespace.to_string(),
            endpoints.pods,
            PodDisruptorOptions {
                inject_timeout: options.inject_timeout,
            },
        )
        .await?;

        Ok(Self {
            disruptor,
            service: service.to_string(),
            ports: endpoints.ports,
        })
    }

    /// The snapshot of backing pods captured at construction.
    pub fn targets(&self) -> Vec<String> {
        self.disruptor.targets()
    }

    /// Disrupt the HTTP requests served by the backing pods for
    /// `duration_secs` seconds.
    pub async fn inject_http_faults(
        &self,
        fault: &HttpFault,
        duration_secs: u32,
        options: &HttpDisruptionOptions,
    ) -> Result<()> {
        let mut fault = fault.clone();
        fault.port = self.effective_port(fault.port)?;
        self.disruptor
            .inject_http_faults(&fault, duration_secs, options)
            .await
    }

    /// Disrupt the gRPC requests served by the backing pods for
    /// `duration_secs` seconds.
    pub async fn inject_grpc_faults(
        &self,
        fault: &GrpcFault,
        duration_secs: u32,
        options: &GrpcDisruptionOptions,
    ) -> Result<()> {
        let mut fault = fault.clone();
        fault.port = self.effective_port(fault.port)?;
        self.disruptor
            .inject_grpc_faults(&fault, duration_secs, options)
            .await
    }

    /// A fault port of 0 is rewritten to the service's first port.
    fn effective_port(&self, port: u16) -> Result<u16> {
        if port != 0 {
            return Ok(port);
        }
        self.ports.first().copied().ok_or_else(|| {
            Error::selector(format!("service \"{}\" exposes no ports", self.service))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{command_equals, FakeKubernetes, PodBuilder};

    async fn service_disruptor(ports: Vec<u16>) -> (Arc<FakeKubernetes>, ServiceDisruptor) {
        let kubernetes = Arc::new(FakeKubernetes::new());
        kubernetes.add_pod(
            PodBuilder::new("my-app-pod")
                .with_namespace("testns")
                .with_labels(&[("app", "myapp")])
                .with_container_port(8080)
                .build(),
        );
        kubernetes.add_endpoints("testns", "my-service", vec!["my-app-pod".to_string()], ports);

        let disruptor = ServiceDisruptor::new(
            kubernetes.clone(),
            "my-service",
            "testns",
            ServiceDisruptorOptions { inject_timeout: -1 },
        )
        .await
        .unwrap();

        (kubernetes, disruptor)
    }

    #[tokio::test]
    async fn resolves_the_service_to_its_backing_pods() {
        let (kubernetes, disruptor) = service_disruptor(vec![8080]).await;

        assert_eq!(disruptor.targets(), vec!["my-app-pod".to_string()]);
        assert_eq!(
            kubernetes.attached_containers(),
            vec![("my-app-pod".to_string(), "xk6-agent".to_string())]
        );
    }

    #[tokio::test]
    async fn unset_fault_port_is_rewritten_to_the_first_service_port() {
        let (kubernetes, disruptor) = service_disruptor(vec![8080]).await;

        disruptor
            .inject_http_faults(&HttpFault::default(), 60, &HttpDisruptionOptions::default())
            .await
            .unwrap();

        let executed = kubernetes.executed_commands();
        assert_eq!(executed.len(), 1);
        assert!(command_equals(
            "xk6-disruptor-agent http -d 60s -t 8080",
            &executed[0]
        ));
    }

    #[tokio::test]
    async fn explicit_fault_port_passes_through() {
        let (kubernetes, disruptor) = service_disruptor(vec![9090, 8080]).await;

        let fault = HttpFault {
            port: 8080,
            ..Default::default()
        };
        disruptor
            .inject_http_faults(&fault, 60, &HttpDisruptionOptions::default())
            .await
            .unwrap();

        let executed = kubernetes.executed_commands();
        assert!(command_equals(
            "xk6-disruptor-agent http -d 60s -t 8080",
            &executed[0]
        ));
    }

    #[tokio::test]
    async fn missing_service_name_is_rejected() {
        let kubernetes = Arc::new(FakeKubernetes::new());
        let err = ServiceDisruptor::new(
            kubernetes,
            "",
            "testns",
            ServiceDisruptorOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SelectorInvalid { .. }));
    }

    #[tokio::test]
    async fn unknown_service_is_reported() {
        let kubernetes = Arc::new(FakeKubernetes::new());
        let err = ServiceDisruptor::new(
            kubernetes,
            "no-such-service",
            "testns",
            ServiceDisruptorOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn service_without_ports_cannot_default_the_fault_port() {
        let (_, disruptor) = service_disruptor(vec![]).await;

        let err = disruptor
            .inject_http_faults(&HttpFault::default(), 60, &HttpDisruptionOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exposes no ports"));
    }
}
