//! Pod selection by namespace and labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kubernetes::Kubernetes;
use crate::{Result, DEFAULT_NAMESPACE};

/// Attributes a pod must match to be selected or excluded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PodAttributes {
    /// Labels the pod's labels must be a superset of
    pub labels: BTreeMap<String, String>,
}

/// Selects the pods a disruptor acts on.
///
/// Immutable after the disruptor is constructed: the selector is resolved
/// exactly once, and the resulting target list is a point-in-time snapshot
/// that later cluster membership changes do not affect.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PodSelector {
    /// Namespace the pods live in. Empty means the default namespace.
    pub namespace: String,
    /// Attributes a pod must match to be selected
    pub select: PodAttributes,
    /// Attributes that remove an otherwise selected pod
    pub exclude: PodAttributes,
}

impl PodSelector {
    /// The selector's namespace, defaulted when unset.
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    /// Resolve the selector to the names of the matching pods.
    ///
    /// An empty result is not an error here; it becomes observable when the
    /// caller asks for targets or attempts an injection.
    pub async fn resolve(&self, kubernetes: &dyn Kubernetes) -> Result<Vec<String>> {
        kubernetes
            .list_pods(self.namespace(), &self.select.labels, &self.exclude.labels)
            .await
    }
}
