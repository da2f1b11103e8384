//! Validation and conversion layer for embedding scripting runtimes.
//!
//! A scripting runtime exposes the disruptor constructors and methods to
//! user scripts; the values it hands over arrive as untyped JSON. This
//! module performs the null/arity checks and type conversions before
//! anything touches the cluster, so script mistakes fail fast with a clear
//! message instead of a half-constructed disruptor.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::disruptors::{
    PodDisruptor, PodDisruptorOptions, ServiceDisruptor, ServiceDisruptorOptions,
};
use crate::faults::{GrpcDisruptionOptions, GrpcFault, HttpDisruptionOptions, HttpFault};
use crate::kubernetes::Kubernetes;
use crate::selector::PodSelector;
use crate::{Error, Result};

/// Create a [`PodDisruptor`] from untyped constructor arguments.
///
/// `selector` is required and non-null; `options` may be null.
pub async fn new_pod_disruptor(
    kubernetes: Arc<dyn Kubernetes>,
    selector: &Value,
    options: &Value,
) -> Result<PodDisruptor> {
    if selector.is_null() {
        return Err(Error::selector(
            "PodDisruptor constructor expects a non-null selector argument",
        ));
    }
    let selector: PodSelector = convert(selector, "selector")?;
    let options: PodDisruptorOptions = convert_or_default(options, "options")?;

    PodDisruptor::new(kubernetes, selector, options).await
}

/// Create a [`ServiceDisruptor`] from untyped constructor arguments.
///
/// `service` and `namespace` are required strings; `options` may be null.
pub async fn new_service_disruptor(
    kubernetes: Arc<dyn Kubernetes>,
    service: &Value,
    namespace: &Value,
    options: &Value,
) -> Result<ServiceDisruptor> {
    let service = required_string(service, "service")?;
    let namespace = required_string(namespace, "namespace")?;
    let options: ServiceDisruptorOptions = convert_or_default(options, "options")?;

    ServiceDisruptor::new(kubernetes, &service, &namespace, options).await
}

/// Convert an untyped HTTP fault descriptor.
pub fn http_fault(fault: &Value) -> Result<HttpFault> {
    serde_json::from_value(fault.clone())
        .map_err(|e| Error::fault(format!("invalid fault argument: {}", e)))
}

/// Convert untyped HTTP disruption options; null means defaults.
pub fn http_disruption_options(options: &Value) -> Result<HttpDisruptionOptions> {
    if options.is_null() {
        return Ok(HttpDisruptionOptions::default());
    }
    serde_json::from_value(options.clone())
        .map_err(|e| Error::fault(format!("invalid options argument: {}", e)))
}

/// Convert an untyped gRPC fault descriptor.
pub fn grpc_fault(fault: &Value) -> Result<GrpcFault> {
    serde_json::from_value(fault.clone())
        .map_err(|e| Error::fault(format!("invalid fault argument: {}", e)))
}

/// Convert untyped gRPC disruption options; null means defaults.
pub fn grpc_disruption_options(options: &Value) -> Result<GrpcDisruptionOptions> {
    if options.is_null() {
        return Ok(GrpcDisruptionOptions::default());
    }
    serde_json::from_value(options.clone())
        .map_err(|e| Error::fault(format!("invalid options argument: {}", e)))
}

fn convert<T: DeserializeOwned>(value: &Value, argument: &str) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::selector(format!("invalid {} argument: {}", argument, e)))
}

fn convert_or_default<T: DeserializeOwned + Default>(value: &Value, argument: &str) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    convert(value, argument)
}

fn required_string(value: &Value, argument: &str) -> Result<String> {
    match value.as_str() {
        Some(string) if !string.is_empty() => Ok(string.to_string()),
        _ => Err(Error::selector(format!(
            "a non-empty {} string is required",
            argument
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FakeKubernetes, PodBuilder};
    use serde_json::json;

    #[tokio::test]
    async fn null_selector_is_rejected_without_touching_the_cluster() {
        // An empty fake: any call would show up in its records.
        let kubernetes = Arc::new(FakeKubernetes::new());
        let err = new_pod_disruptor(kubernetes.clone(), &Value::Null, &Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-null selector"));
        assert!(kubernetes.attached_containers().is_empty());
    }

    #[tokio::test]
    async fn selector_of_the_wrong_shape_is_rejected() {
        let kubernetes = Arc::new(FakeKubernetes::new());
        let err = new_pod_disruptor(kubernetes, &json!({ "namespaces": "oops" }), &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelectorInvalid { .. }));
    }

    #[tokio::test]
    async fn pod_disruptor_is_built_from_untyped_arguments() {
        let kubernetes = Arc::new(FakeKubernetes::new());
        kubernetes.add_pod(
            PodBuilder::new("my-app-pod")
                .with_namespace("testns")
                .with_labels(&[("app", "myapp")])
                .with_container_port(80)
                .build(),
        );

        let disruptor = new_pod_disruptor(
            kubernetes,
            &json!({
                "namespace": "testns",
                "select": { "labels": { "app": "myapp" } },
            }),
            &json!({ "injectTimeout": -1 }),
        )
        .await
        .unwrap();

        assert_eq!(disruptor.targets(), vec!["my-app-pod".to_string()]);
    }

    #[tokio::test]
    async fn service_disruptor_requires_service_and_namespace() {
        let kubernetes = Arc::new(FakeKubernetes::new());
        let err = new_service_disruptor(
            kubernetes.clone(),
            &Value::Null,
            &json!("testns"),
            &Value::Null,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("service"));

        let err = new_service_disruptor(kubernetes, &json!("my-service"), &json!(""), &Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn fault_descriptors_convert_from_untyped_values() {
        let fault = http_fault(&json!({ "errorRate": 0.1, "errorCode": 500 })).unwrap();
        assert_eq!(fault.error_code, 500);

        let fault = grpc_fault(&json!({ "errorRate": 0.1, "statusCode": 14 })).unwrap();
        assert_eq!(fault.status_code, 14);

        let err = http_fault(&json!({ "errorRte": 0.1 })).unwrap_err();
        assert!(matches!(err, Error::FaultInvalid { .. }));
    }

    #[test]
    fn null_options_mean_defaults() {
        assert_eq!(
            http_disruption_options(&Value::Null).unwrap(),
            HttpDisruptionOptions::default()
        );
        assert_eq!(
            grpc_disruption_options(&Value::Null).unwrap(),
            GrpcDisruptionOptions::default()
        );
        let options = http_disruption_options(&json!({ "proxyPort": 8081 })).unwrap();
        assert_eq!(options.proxy_port, 8081);
    }
}
