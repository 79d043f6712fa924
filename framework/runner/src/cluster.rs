use anyhow::Context;
use benchfleet_core::prelude::{poll, Poll, ProvisioningError};
use benchfleet_providers::prelude::{
    CloudApi, ClusterSpec, NodePoolSpec, WorkloadApi, CLUSTER_ACTIVE,
};

use crate::config::{RunConfig, Timings};
use crate::context::{RunContext, RunPhase};
use crate::registry::ResourceKind;

/// Status reported by the provider when a cluster or node pool will never become active.
const FAILED_STATUSES: &[&str] = &["FAILED", "CREATE_FAILED", "DEGRADED"];

/// Creates the managed control plane and its node pool, then waits for the nodes themselves.
pub struct ClusterBuilder<'a> {
    cloud: &'a dyn CloudApi,
    workloads: &'a dyn WorkloadApi,
    config: &'a RunConfig,
    timings: &'a Timings,
}

impl<'a> ClusterBuilder<'a> {
    pub fn new(
        cloud: &'a dyn CloudApi,
        workloads: &'a dyn WorkloadApi,
        config: &'a RunConfig,
        timings: &'a Timings,
    ) -> Self {
        Self {
            cloud,
            workloads,
            config,
            timings,
        }
    }

    pub async fn build(&self, ctx: &mut RunContext) -> anyhow::Result<()> {
        ctx.advance(RunPhase::BuildingCluster);

        let subnet_ids = ctx
            .registry()
            .live(ResourceKind::Subnet)
            .map(|h| h.identifier().to_string())
            .collect::<Vec<_>>();
        let cluster_name = ctx.cluster_name();
        let pool_name = ctx.node_pool_name();

        let cluster_role_arn = ctx
            .role_arn(&ctx.cluster_role_name())
            .ok_or_else(|| ProvisioningError::new("cluster", "caller identity unknown"))?;
        let spec = ClusterSpec {
            name: cluster_name.clone(),
            kubernetes_version: self.config.kubernetes_version.clone(),
            role_arn: cluster_role_arn,
            subnet_ids: subnet_ids.clone(),
            tags: ctx.tags(&cluster_name),
        };
        self.cloud
            .create_cluster(&spec)
            .await
            .context(ProvisioningError::new("cluster", "create call failed"))?;
        ctx.registry_mut().register(ResourceKind::Cluster, &cluster_name);
        ctx.check_interrupted()?;

        log::info!(
            "Waiting up to {:?} for cluster {cluster_name} to become active",
            self.timings.cluster_active.ceiling()
        );
        ctx.interruptible(self.wait_cluster_active(&cluster_name)).await?;

        let node_role_arn = ctx
            .role_arn(&ctx.node_role_name())
            .ok_or_else(|| ProvisioningError::new("node pool", "caller identity unknown"))?;
        let spec = NodePoolSpec {
            cluster_name: cluster_name.clone(),
            name: pool_name.clone(),
            node_role_arn,
            subnet_ids,
            instance_type: self.config.node_instance_type.clone(),
            node_count: self.config.node_count,
            tags: ctx.tags(&pool_name),
        };
        self.cloud
            .create_node_pool(&spec)
            .await
            .context(ProvisioningError::new("node pool", "create call failed"))?;
        ctx.registry_mut().register(ResourceKind::NodePool, &pool_name);
        ctx.check_interrupted()?;

        ctx.interruptible(self.wait_pool_active(&cluster_name, &pool_name)).await?;

        self.cloud
            .write_kubeconfig(&cluster_name, &self.config.kubeconfig_path())
            .await
            .context(ProvisioningError::new("cluster", "writing kubeconfig failed"))?;

        ctx.interruptible(self.wait_for_nodes()).await?;
        log::info!("Cluster {cluster_name} is ready with {} node(s)", self.config.node_count);

        Ok(())
    }

    async fn wait_cluster_active(&self, name: &str) -> anyhow::Result<()> {
        poll(&format!("cluster {name}"), self.timings.cluster_active, |_| async move {
            active_or_pending(self.cloud.cluster_status(name).await?)
        })
        .await
        .context(ProvisioningError::new("cluster", "control plane never became active"))
    }

    async fn wait_pool_active(&self, cluster: &str, pool: &str) -> anyhow::Result<()> {
        poll(&format!("node pool {pool}"), self.timings.node_pool_active, |_| async move {
            active_or_pending(self.cloud.node_pool_status(cluster, pool).await?)
        })
        .await
        .context(ProvisioningError::new("node pool", "never became active"))
    }

    /// An active node pool can still have nodes that have not joined the control plane.
    async fn wait_for_nodes(&self) -> anyhow::Result<()> {
        let wanted = self.config.node_count as usize;
        poll("ready nodes", self.timings.nodes_ready, |_| async move {
            let nodes = match self.workloads.nodes().await {
                Ok(nodes) => nodes,
                Err(e) => return Ok(Poll::Pending(format!("control plane not answering: {e}"))),
            };
            let ready = nodes.iter().filter(|n| n.ready).count();
            Ok(if ready >= wanted {
                Poll::Ready(())
            } else {
                Poll::Pending(format!("{ready}/{wanted} nodes ready"))
            })
        })
        .await
        .context(ProvisioningError::new("nodes", "nodes never became ready"))
    }
}

fn active_or_pending(status: Option<String>) -> anyhow::Result<Poll<()>> {
    match status.as_deref() {
        Some(CLUSTER_ACTIVE) => Ok(Poll::Ready(())),
        Some(s) if FAILED_STATUSES.contains(&s) => Err(anyhow::anyhow!("status is {s}")),
        Some(s) => Ok(Poll::Pending(s.to_string())),
        None => Ok(Poll::Pending("not visible yet".to_string())),
    }
}
