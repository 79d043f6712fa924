//! The collaborators the orchestrator drives: a cloud provider, a workload control plane and a
//! container image tool.
//!
//! Each collaborator is a trait so the orchestrator can be exercised against in-memory fakes. The
//! production implementations shell out to `aws`, `kubectl` and `docker`.

mod aws;
mod cloud;
mod command;
mod docker;
mod error;
mod image;
mod kubectl;
mod workload;

pub mod prelude {
    pub use crate::aws::AwsCli;
    pub use crate::cloud::{
        CallerIdentity, CloudApi, ClusterSpec, InstanceSpec, LoadBalancerRef, NodePoolSpec, Tag,
        CLUSTER_ACTIVE, INSTANCE_RUNNING, INSTANCE_SHUTTING_DOWN, INSTANCE_TERMINATED,
    };
    pub use crate::command::{require_tool, ToolCommand};
    pub use crate::docker::Docker;
    pub use crate::error::{ProviderError, ProviderResult};
    pub use crate::image::ImageTool;
    pub use crate::kubectl::Kubectl;
    pub use crate::workload::{
        NodeStatus, PodStatus, ServiceInfo, WorkloadApi, SYSTEM_NAMESPACES,
    };
}
