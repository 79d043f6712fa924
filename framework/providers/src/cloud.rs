use std::path::Path;

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Managed cluster and node pool status once they can take work.
pub const CLUSTER_ACTIVE: &str = "ACTIVE";
pub const INSTANCE_RUNNING: &str = "running";
pub const INSTANCE_SHUTTING_DOWN: &str = "shutting-down";
pub const INSTANCE_TERMINATED: &str = "terminated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

#[derive(Debug, Clone)]
pub struct ClusterSpec {
    pub name: String,
    pub kubernetes_version: String,
    pub role_arn: String,
    pub subnet_ids: Vec<String>,
    pub tags: Vec<Tag>,
}

/// A fixed-size node pool. Desired, minimum and maximum are all `node_count`.
#[derive(Debug, Clone)]
pub struct NodePoolSpec {
    pub cluster_name: String,
    pub name: String,
    pub node_role_arn: String,
    pub subnet_ids: Vec<String>,
    pub instance_type: String,
    pub node_count: u32,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    /// Gzip compressed boot script. Implementations transport it as instance user data.
    pub user_data: Vec<u8>,
    pub tags: Vec<Tag>,
}

/// A load balancer found by query rather than created directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerRef {
    /// ARN for application/network load balancers, name for classic ones.
    pub id: String,
    pub classic: bool,
}

/// The cloud provider, as the orchestrator needs it.
///
/// Every create call returns the provider identifier of the new object as soon as the provider
/// accepted the request. Status calls return `None` once the object is gone. Delete calls return
/// [crate::error::ProviderError::NotFound] when the object no longer exists.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn caller_identity(&self) -> ProviderResult<CallerIdentity>;
    fn region(&self) -> &str;

    // Network
    async fn availability_zones(&self) -> ProviderResult<Vec<String>>;
    async fn create_vpc(&self, cidr: &str, tags: &[Tag]) -> ProviderResult<String>;
    async fn vpc_state(&self, vpc_id: &str) -> ProviderResult<Option<String>>;
    async fn enable_vpc_dns(&self, vpc_id: &str) -> ProviderResult<()>;
    async fn delete_vpc(&self, vpc_id: &str) -> ProviderResult<()>;
    async fn create_internet_gateway(&self, tags: &[Tag]) -> ProviderResult<String>;
    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()>;
    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()>;
    async fn delete_internet_gateway(&self, gateway_id: &str) -> ProviderResult<()>;
    async fn internet_gateways_in_vpc(&self, vpc_id: &str) -> ProviderResult<Vec<String>>;
    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr: &str,
        zone: &str,
        tags: &[Tag],
    ) -> ProviderResult<String>;
    async fn subnet_state(&self, subnet_id: &str) -> ProviderResult<Option<String>>;
    async fn enable_public_ips(&self, subnet_id: &str) -> ProviderResult<()>;
    async fn delete_subnet(&self, subnet_id: &str) -> ProviderResult<()>;
    async fn create_route_table(&self, vpc_id: &str, tags: &[Tag]) -> ProviderResult<String>;
    async fn create_default_route(&self, route_table_id: &str, gateway_id: &str)
        -> ProviderResult<()>;
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
        -> ProviderResult<()>;
    async fn non_main_route_tables(&self, vpc_id: &str) -> ProviderResult<Vec<String>>;
    async fn delete_route_table(&self, route_table_id: &str) -> ProviderResult<()>;
    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
        tags: &[Tag],
    ) -> ProviderResult<String>;
    async fn non_default_security_groups(&self, vpc_id: &str) -> ProviderResult<Vec<String>>;
    async fn delete_security_group(&self, group_id: &str) -> ProviderResult<()>;
    async fn network_interfaces(&self, vpc_id: &str) -> ProviderResult<Vec<String>>;
    async fn delete_network_interface(&self, interface_id: &str) -> ProviderResult<()>;

    // Identity
    async fn create_role(
        &self,
        name: &str,
        trust_policy: &str,
        tags: &[Tag],
    ) -> ProviderResult<String>;
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> ProviderResult<()>;
    async fn attached_role_policies(&self, role_name: &str) -> ProviderResult<Vec<String>>;
    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> ProviderResult<()>;
    async fn delete_role(&self, role_name: &str) -> ProviderResult<()>;

    // Container registry
    /// The repository URI if a repository with this name exists.
    async fn find_repository(&self, name: &str) -> ProviderResult<Option<String>>;
    async fn create_repository(&self, name: &str, tags: &[Tag]) -> ProviderResult<String>;
    async fn image_tags(&self, repository: &str) -> ProviderResult<Vec<String>>;
    async fn delete_repository(&self, name: &str) -> ProviderResult<()>;
    async fn registry_password(&self) -> ProviderResult<String>;

    // Managed cluster
    async fn create_cluster(&self, spec: &ClusterSpec) -> ProviderResult<String>;
    async fn cluster_status(&self, name: &str) -> ProviderResult<Option<String>>;
    async fn delete_cluster(&self, name: &str) -> ProviderResult<()>;
    async fn create_node_pool(&self, spec: &NodePoolSpec) -> ProviderResult<String>;
    async fn node_pool_status(&self, cluster: &str, name: &str) -> ProviderResult<Option<String>>;
    async fn delete_node_pool(&self, cluster: &str, name: &str) -> ProviderResult<()>;
    async fn write_kubeconfig(&self, cluster: &str, path: &Path) -> ProviderResult<()>;

    // Compute instances
    async fn run_instance(&self, spec: &InstanceSpec) -> ProviderResult<String>;
    async fn instance_state(&self, instance_id: &str) -> ProviderResult<Option<String>>;
    async fn console_output(&self, instance_id: &str) -> ProviderResult<String>;
    async fn terminate_instance(&self, instance_id: &str) -> ProviderResult<()>;

    // Load balancers
    async fn load_balancers_in_vpc(&self, vpc_id: &str) -> ProviderResult<Vec<LoadBalancerRef>>;
    async fn delete_load_balancer(&self, load_balancer: &LoadBalancerRef) -> ProviderResult<()>;
}
