use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Namespaces owned by the cluster itself, never part of the deployed workload.
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub ready_containers: usize,
    pub total_containers: usize,
}

impl PodStatus {
    pub fn is_ready(&self) -> bool {
        self.phase == "Running" && self.ready_containers == self.total_containers
    }

    pub fn is_system(&self) -> bool {
        SYSTEM_NAMESPACES.contains(&self.namespace.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub namespace: String,
    pub name: String,
    pub service_type: String,
    pub annotations: BTreeMap<String, String>,
    pub port: Option<u16>,
    /// The externally assigned hostname (or IP) once the load balancer exists.
    pub hostname: Option<String>,
}

/// The workload control plane of the cluster.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    async fn apply(&self, manifest: &str) -> ProviderResult<()>;
    async fn nodes(&self) -> ProviderResult<Vec<NodeStatus>>;
    async fn pods(&self) -> ProviderResult<Vec<PodStatus>>;
    async fn services(&self) -> ProviderResult<Vec<ServiceInfo>>;
    /// Pod descriptions, recent events, resource usage and workload logs, for humans.
    async fn diagnostics(&self) -> ProviderResult<String>;
}
