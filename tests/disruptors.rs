//! Integration tests driving the public disruptor surface against the
//! in-memory cluster.

use std::sync::Arc;

use disruptor::disruptors::{
    PodDisruptor, PodDisruptorOptions, ServiceDisruptor, ServiceDisruptorOptions,
};
use disruptor::faults::{GrpcDisruptionOptions, GrpcFault, HttpDisruptionOptions, HttpFault};
use disruptor::fixtures::{command_equals, FakeKubernetes, PodBuilder};
use disruptor::selector::{PodAttributes, PodSelector};
use disruptor::Error;

fn app_selector(namespace: &str) -> PodSelector {
    PodSelector {
        namespace: namespace.to_string(),
        select: PodAttributes {
            labels: [("app".to_string(), "myapp".to_string())].into_iter().collect(),
        },
        ..Default::default()
    }
}

fn cluster_with_app_pod(port: u16) -> Arc<FakeKubernetes> {
    let kubernetes = Arc::new(FakeKubernetes::new());
    kubernetes.add_pod(
        PodBuilder::new("my-app-pod")
            .with_namespace("testns")
            .with_labels(&[("app", "myapp")])
            .with_container_port(port)
            .build(),
    );
    kubernetes
}

#[tokio::test]
async fn construction_resolves_targets_and_injects_agents() {
    let kubernetes = cluster_with_app_pod(80);
    kubernetes.add_pod(
        PodBuilder::new("unrelated-pod")
            .with_namespace("testns")
            .with_labels(&[("app", "other")])
            .build(),
    );

    let disruptor = PodDisruptor::new(
        kubernetes.clone(),
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(disruptor.targets(), vec!["my-app-pod".to_string()]);
    assert_eq!(
        kubernetes.attached_containers(),
        vec![("my-app-pod".to_string(), "xk6-agent".to_string())]
    );
}

#[tokio::test]
async fn reconstruction_does_not_duplicate_agents() {
    let kubernetes = cluster_with_app_pod(80);

    let first = PodDisruptor::new(
        kubernetes.clone(),
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();
    drop(first);

    // A script re-run builds a second disruptor against the same cluster.
    let second = PodDisruptor::new(
        kubernetes.clone(),
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(second.targets(), vec!["my-app-pod".to_string()]);
    assert_eq!(kubernetes.attached_containers().len(), 1);
}

#[tokio::test]
async fn empty_selection_constructs_a_disruptor_without_targets() {
    let kubernetes = Arc::new(FakeKubernetes::new());

    let disruptor = PodDisruptor::new(
        kubernetes,
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();

    assert!(disruptor.targets().is_empty());
}

#[tokio::test]
async fn targets_are_a_construction_time_snapshot() {
    let kubernetes = cluster_with_app_pod(80);

    let disruptor = PodDisruptor::new(
        kubernetes.clone(),
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();

    // A pod added after construction is not picked up.
    kubernetes.add_pod(
        PodBuilder::new("late-pod")
            .with_namespace("testns")
            .with_labels(&[("app", "myapp")])
            .with_container_port(80)
            .build(),
    );

    assert_eq!(disruptor.targets(), vec!["my-app-pod".to_string()]);
}

#[tokio::test]
async fn http_fault_scenarios_produce_the_documented_commands() {
    let cases = vec![
        (
            HttpFault {
                error_rate: 0.1,
                error_code: 500,
                ..Default::default()
            },
            "xk6-disruptor-agent http -d 60s -r 0.1 -e 500",
        ),
        (
            HttpFault {
                error_rate: 0.1,
                error_code: 500,
                error_body: "{\"error\": 500}".to_string(),
                ..Default::default()
            },
            "xk6-disruptor-agent http -d 60s -r 0.1 -e 500 -b {\"error\": 500}",
        ),
        (
            HttpFault {
                average_delay: 100,
                ..Default::default()
            },
            "xk6-disruptor-agent http -d 60s -a 100 -v 0",
        ),
        (
            HttpFault {
                exclude: "/path1,/path2".to_string(),
                ..Default::default()
            },
            "xk6-disruptor-agent http -d 60s -x /path1,/path2",
        ),
    ];

    for (fault, expected) in cases {
        let kubernetes = cluster_with_app_pod(80);
        let disruptor = PodDisruptor::new(
            kubernetes.clone(),
            app_selector("testns"),
            PodDisruptorOptions::default(),
        )
        .await
        .unwrap();

        disruptor
            .inject_http_faults(&fault, 60, &HttpDisruptionOptions::default())
            .await
            .unwrap();

        let executed = kubernetes.executed_commands();
        assert_eq!(executed.len(), 1);
        assert!(
            command_equals(expected, &executed[0]),
            "expected command: {} got: {}",
            expected,
            executed[0].join(" ")
        );
    }
}

#[tokio::test]
async fn grpc_fault_with_status_message_produces_the_documented_command() {
    let kubernetes = cluster_with_app_pod(80);
    let disruptor = PodDisruptor::new(
        kubernetes.clone(),
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();

    let fault = GrpcFault {
        error_rate: 0.1,
        status_code: 14,
        status_message: "internal error".to_string(),
        ..Default::default()
    };
    disruptor
        .inject_grpc_faults(&fault, 60, &GrpcDisruptionOptions::default())
        .await
        .unwrap();

    let executed = kubernetes.executed_commands();
    assert!(command_equals(
        "xk6-disruptor-agent grpc -d 60s -r 0.1 -s 14 -m internal error",
        &executed[0]
    ));
}

#[tokio::test]
async fn port_validation_failure_names_the_target_and_skips_exec() {
    let kubernetes = cluster_with_app_pod(80);
    let disruptor = PodDisruptor::new(
        kubernetes.clone(),
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();

    let fault = HttpFault {
        port: 8080,
        ..Default::default()
    };
    let err = disruptor
        .inject_http_faults(&fault, 60, &HttpDisruptionOptions::default())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "target \"my-app-pod\" doesn't listen to port 8080"
    );
    assert!(kubernetes.executed_commands().is_empty());
}

#[tokio::test]
async fn error_rate_without_code_is_rejected_before_any_exec() {
    let kubernetes = cluster_with_app_pod(80);
    let disruptor = PodDisruptor::new(
        kubernetes.clone(),
        app_selector("testns"),
        PodDisruptorOptions::default(),
    )
    .await
    .unwrap();

    let fault = HttpFault {
        error_rate: 0.1,
        ..Default::default()
    };
    let err = disruptor
        .inject_http_faults(&fault, 60, &HttpDisruptionOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FaultInvalid { .. }));
    assert!(kubernetes.executed_commands().is_empty());
}

#[tokio::test]
async fn agent_readiness_timeout_fails_construction() {
    let kubernetes = cluster_with_app_pod(80);
    kubernetes.fail_attach_with_timeout();

    let err = PodDisruptor::new(
        kubernetes,
        app_selector("testns"),
        PodDisruptorOptions { inject_timeout: 1 },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
}

#[tokio::test]
async fn service_disruptor_rewrites_the_default_port() {
    let kubernetes = Arc::new(FakeKubernetes::new());
    kubernetes.add_pod(
        PodBuilder::new("my-app-pod")
            .with_namespace("testns")
            .with_labels(&[("app", "myapp")])
            .with_container_port(8080)
            .build(),
    );
    kubernetes.add_endpoints(
        "testns",
        "my-service",
        vec!["my-app-pod".to_string()],
        vec![8080],
    );

    let disruptor = ServiceDisruptor::new(
        kubernetes.clone(),
        "my-service",
        "testns",
        ServiceDisruptorOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(disruptor.targets(), vec!["my-app-pod".to_string()]);

    disruptor
        .inject_http_faults(&HttpFault::default(), 60, &HttpDisruptionOptions::default())
        .await
        .unwrap();

    let executed = kubernetes.executed_commands();
    assert!(command_equals(
        "xk6-disruptor-agent http -d 60s -t 8080",
        &executed[0]
    ));
}
