//! Reverse-order cleanup of everything a run registered.
//!
//! Every delete is attempted even when an earlier one failed. Failures are logged and recorded in
//! the [TeardownReport], never returned. A handle that is already absent, or was never owned, is
//! skipped, so running teardown twice issues no further deletes.

use std::future::Future;

use benchfleet_core::prelude::{poll, Poll, PollPolicy};
use benchfleet_providers::prelude::{CloudApi, ProviderResult, INSTANCE_TERMINATED};

use crate::config::Timings;
use crate::context::{RunContext, RunPhase};
use crate::provision::{CLUSTER_ROLE_POLICIES, NODE_ROLE_POLICIES};
use crate::registry::{Handle, HandleState, ResourceKind};

/// What one teardown pass did, as `kind identifier` strings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted: Vec<String>,
    pub already_absent: Vec<String>,
    pub failed: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
    Failed,
}

pub struct TeardownManager<'a> {
    cloud: &'a dyn CloudApi,
    timings: &'a Timings,
}

impl<'a> TeardownManager<'a> {
    pub fn new(cloud: &'a dyn CloudApi, timings: &'a Timings) -> Self {
        Self { cloud, timings }
    }

    pub async fn teardown(&self, ctx: &mut RunContext) -> TeardownReport {
        ctx.advance(RunPhase::TearingDown);
        let mut report = TeardownReport::default();
        log::info!(
            "Tearing down run {} ({} registered handles)",
            ctx.run_id(),
            ctx.registry().all().len()
        );

        // Only sweep a network this run created and has not deleted yet.
        let network = ctx
            .registry()
            .live_owned(ResourceKind::Network)
            .into_iter()
            .next()
            .map(|h| h.identifier().to_string());

        let mut released = self.instances(ctx, &mut report).await;
        if let Some(vpc_id) = &network {
            released |= self.load_balancers(ctx, &mut report, vpc_id).await;
        }
        if released && !self.timings.load_balancer_settle.is_zero() {
            log::info!(
                "Waiting {:?} for network interfaces to be released",
                self.timings.load_balancer_settle
            );
            tokio::time::sleep(self.timings.load_balancer_settle).await;
        }

        self.security_groups(ctx, &mut report).await;
        self.node_pools(ctx, &mut report).await;
        self.clusters(ctx, &mut report).await;

        if let Some(vpc_id) = &network {
            self.discover(
                ctx,
                ResourceKind::SecurityGroup,
                self.cloud.non_default_security_groups(vpc_id),
            )
            .await;
            self.security_groups(ctx, &mut report).await;
            self.discover(
                ctx,
                ResourceKind::NetworkInterface,
                self.cloud.network_interfaces(vpc_id),
            )
            .await;
            self.network_interfaces(ctx, &mut report).await;
            self.discover(
                ctx,
                ResourceKind::Gateway,
                self.cloud.internet_gateways_in_vpc(vpc_id),
            )
            .await;
        }

        self.gateways(ctx, &mut report).await;
        self.subnets(ctx, &mut report).await;
        if let Some(vpc_id) = &network {
            self.discover(
                ctx,
                ResourceKind::RouteTable,
                self.cloud.non_main_route_tables(vpc_id),
            )
            .await;
        }
        self.route_tables(ctx, &mut report).await;
        self.networks(ctx, &mut report).await;
        self.roles(ctx, &mut report).await;
        self.repositories(ctx, &mut report).await;

        log::info!(
            "Teardown finished: {} deleted, {} already absent, {} failed",
            report.deleted.len(),
            report.already_absent.len(),
            report.failed.len()
        );
        for failed in &report.failed {
            log::warn!("Left behind: {failed}");
        }

        report
    }

    /// Terminate instances and wait for them. Returns true if any instance was terminated.
    async fn instances(&self, ctx: &mut RunContext, report: &mut TeardownReport) -> bool {
        let mut released = false;
        for handle in ctx.registry().live_owned(ResourceKind::ComputeInstance) {
            let id = handle.identifier();
            let outcome = self
                .delete(ctx, report, &handle, None, || self.cloud.terminate_instance(id))
                .await;
            if matches!(outcome, DeleteOutcome::Deleted) {
                released = true;
                self.wait_gone(&handle, self.timings.instance_terminated, || async move {
                    Ok(match self.cloud.instance_state(id).await? {
                        None => true,
                        Some(state) => state == INSTANCE_TERMINATED,
                    })
                })
                .await;
            }
        }
        released
    }

    /// Load balancers are created by the cluster for the workload's services, so they are found
    /// by network rather than by handle.
    async fn load_balancers(
        &self,
        ctx: &mut RunContext,
        report: &mut TeardownReport,
        vpc_id: &str,
    ) -> bool {
        let found = match self.cloud.load_balancers_in_vpc(vpc_id).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Could not list load balancers in {vpc_id}: {e}");
                return false;
            }
        };

        let mut released = false;
        for load_balancer in &found {
            let handle = ctx
                .registry_mut()
                .register_discovered(ResourceKind::LoadBalancer, &load_balancer.id);
            let outcome = self
                .delete(ctx, report, &handle, None, || {
                    self.cloud.delete_load_balancer(load_balancer)
                })
                .await;
            released |= matches!(outcome, DeleteOutcome::Deleted);
        }

        // Known load balancers the provider no longer lists are gone.
        for handle in ctx.registry().live_owned(ResourceKind::LoadBalancer) {
            if !found.iter().any(|lb| lb.id == handle.identifier()) {
                self.forget(ctx, &handle);
            }
        }

        released
    }

    async fn security_groups(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        for handle in ctx.registry().live_owned(ResourceKind::SecurityGroup) {
            let id = handle.identifier();
            self.delete(
                ctx,
                report,
                &handle,
                Some(self.timings.security_group_delete),
                || self.cloud.delete_security_group(id),
            )
            .await;
        }
    }

    async fn node_pools(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        let cluster = ctx.cluster_name();
        for handle in ctx.registry().live_owned(ResourceKind::NodePool) {
            let (cluster, pool) = (cluster.as_str(), handle.identifier());
            let outcome = self
                .delete(ctx, report, &handle, None, || {
                    self.cloud.delete_node_pool(cluster, pool)
                })
                .await;
            if matches!(outcome, DeleteOutcome::Deleted) {
                self.wait_gone(&handle, self.timings.node_pool_deleted, || async move {
                    Ok(self.cloud.node_pool_status(cluster, pool).await?.is_none())
                })
                .await;
            }
        }
    }

    async fn clusters(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        for handle in ctx.registry().live_owned(ResourceKind::Cluster) {
            let name = handle.identifier();
            let outcome = self
                .delete(ctx, report, &handle, None, || self.cloud.delete_cluster(name))
                .await;
            if matches!(outcome, DeleteOutcome::Deleted) {
                self.wait_gone(&handle, self.timings.cluster_deleted, || async move {
                    Ok(self.cloud.cluster_status(name).await?.is_none())
                })
                .await;
            }
        }
    }

    async fn network_interfaces(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        for handle in ctx.registry().live_owned(ResourceKind::NetworkInterface) {
            let id = handle.identifier();
            self.delete(ctx, report, &handle, None, || {
                self.cloud.delete_network_interface(id)
            })
            .await;
        }
    }

    /// Detach from the run's network, then delete.
    async fn gateways(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        let vpc_id = ctx
            .registry()
            .all()
            .iter()
            .find(|h| h.kind() == ResourceKind::Network)
            .map(|h| h.identifier().to_string());

        for handle in ctx.registry().live_owned(ResourceKind::Gateway) {
            let id = handle.identifier();
            if let Some(vpc_id) = &vpc_id {
                match self.cloud.detach_internet_gateway(id, vpc_id).await {
                    Ok(()) => log::debug!("Detached {handle} from {vpc_id}"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => log::warn!("Could not detach {handle} from {vpc_id}: {e}"),
                }
            }
            self.delete(ctx, report, &handle, None, || {
                self.cloud.delete_internet_gateway(id)
            })
            .await;
        }
    }

    async fn networks(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        for handle in ctx.registry().live_owned(ResourceKind::Network) {
            let id = handle.identifier();
            self.delete(
                ctx,
                report,
                &handle,
                Some(self.timings.network_delete),
                || self.cloud.delete_vpc(id),
            )
            .await;
        }
    }

    /// Detach every policy the role may have, then delete it.
    async fn roles(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        let cluster_role = ctx.cluster_role_name();
        let node_role = ctx.node_role_name();

        for handle in ctx.registry().live_owned(ResourceKind::IamRole) {
            let name = handle.identifier();
            let mut policies: Vec<String> = if name == cluster_role {
                CLUSTER_ROLE_POLICIES.iter().map(|p| p.to_string()).collect()
            } else if name == node_role {
                NODE_ROLE_POLICIES.iter().map(|p| p.to_string()).collect()
            } else {
                Vec::new()
            };
            match self.cloud.attached_role_policies(name).await {
                Ok(attached) => policies.extend(attached),
                Err(e) if e.is_not_found() => {
                    log::info!("{handle} is already gone");
                    self.forget(ctx, &handle);
                    report.already_absent.push(handle.to_string());
                    continue;
                }
                Err(e) => log::warn!("Could not list policies of {handle}: {e}"),
            }
            policies.sort();
            policies.dedup();

            for policy in &policies {
                match self.cloud.detach_role_policy(name, policy).await {
                    Ok(()) => log::debug!("Detached {policy} from {handle}"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => log::warn!("Could not detach {policy} from {handle}: {e}"),
                }
            }

            self.delete(ctx, report, &handle, None, || self.cloud.delete_role(name))
                .await;
        }
    }

    async fn subnets(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        for handle in ctx.registry().live_owned(ResourceKind::Subnet) {
            let id = handle.identifier();
            self.delete(ctx, report, &handle, None, || self.cloud.delete_subnet(id)).await;
        }
    }

    async fn route_tables(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        for handle in ctx.registry().live_owned(ResourceKind::RouteTable) {
            let id = handle.identifier();
            self.delete(
                ctx,
                report,
                &handle,
                None,
                || self.cloud.delete_route_table(id),
            )
            .await;
        }
    }

    /// A reused repository is not owned, so it is never listed here.
    async fn repositories(&self, ctx: &mut RunContext, report: &mut TeardownReport) {
        for handle in ctx.registry().live_owned(ResourceKind::RegistryRepo) {
            let name = handle.identifier();
            self.delete(
                ctx,
                report,
                &handle,
                None,
                || self.cloud.delete_repository(name),
            )
            .await;
        }
    }

    /// Register objects found in the run's network so the following steps delete them.
    async fn discover<Fut>(&self, ctx: &mut RunContext, kind: ResourceKind, query: Fut)
    where
        Fut: Future<Output = ProviderResult<Vec<String>>>,
    {
        match query.await {
            Ok(ids) => {
                for id in ids {
                    if ctx.registry().find(kind, &id).is_none() {
                        log::info!("Found leftover {kind} {id}");
                    }
                    ctx.registry_mut().register_discovered(kind, &id);
                }
            }
            Err(e) => log::warn!("Could not list {kind} objects for cleanup: {e}"),
        }
    }

    /// Delete one owned, live handle, retrying dependency violations under `retry`.
    async fn delete<F, Fut>(
        &self,
        ctx: &mut RunContext,
        report: &mut TeardownReport,
        handle: &Handle,
        retry: Option<PollPolicy>,
        op: F,
    ) -> DeleteOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ProviderResult<()>>,
    {
        if !handle.owned() || !handle.is_live() {
            return DeleteOutcome::AlreadyAbsent;
        }
        self.set_state(ctx, handle, HandleState::Deleting);

        let result = match retry {
            None => op().await,
            Some(policy) => {
                let op = &op;
                let retried = poll(&format!("delete {handle}"), policy, |_| async move {
                    Ok(match op().await {
                        Err(e) if e.is_dependency_violation() => Poll::Pending(e.to_string()),
                        other => Poll::Ready(other),
                    })
                })
                .await;
                match retried {
                    Ok(result) => result,
                    Err(e) => {
                        log::warn!("Gave up deleting {handle}: {e}");
                        self.set_state(ctx, handle, HandleState::Active);
                        report.failed.push(handle.to_string());
                        return DeleteOutcome::Failed;
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                log::info!("Deleted {handle}");
                self.set_state(ctx, handle, HandleState::Absent);
                report.deleted.push(handle.to_string());
                DeleteOutcome::Deleted
            }
            Err(e) if e.is_not_found() => {
                log::info!("{handle} was already gone");
                self.set_state(ctx, handle, HandleState::Absent);
                report.already_absent.push(handle.to_string());
                DeleteOutcome::AlreadyAbsent
            }
            Err(e) => {
                log::warn!("Failed to delete {handle}: {e}");
                self.set_state(ctx, handle, HandleState::Active);
                report.failed.push(handle.to_string());
                DeleteOutcome::Failed
            }
        }
    }

    /// Wait for a deleted object to disappear. Not waiting long enough is logged, not fatal.
    async fn wait_gone<F, Fut>(&self, handle: &Handle, policy: PollPolicy, gone: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ProviderResult<bool>>,
    {
        let gone = &gone;
        let waited = poll(&format!("{handle} deletion"), policy, |_| async move {
            Ok(match gone().await {
                Ok(true) => Poll::Ready(()),
                Ok(false) => Poll::Pending("still present".to_string()),
                Err(e) if e.is_not_found() => Poll::Ready(()),
                Err(e) => Poll::Pending(e.to_string()),
            })
        })
        .await;
        if let Err(e) = waited {
            log::warn!("{e}");
        }
    }

    fn set_state(&self, ctx: &mut RunContext, handle: &Handle, state: HandleState) {
        if let Err(e) = ctx.registry_mut().transition(handle.id(), state) {
            log::warn!("{e}");
        }
    }

    fn forget(&self, ctx: &mut RunContext, handle: &Handle) {
        if let Err(e) = ctx.registry_mut().forget(handle.id()) {
            log::warn!("{e}");
        }
    }
}
