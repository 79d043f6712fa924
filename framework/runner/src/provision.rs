use anyhow::Context;
use benchfleet_core::prelude::{poll, Poll, ProvisioningError};
use benchfleet_providers::prelude::{CloudApi, Tag};

use crate::config::{RunConfig, Timings};
use crate::context::{RunContext, RunPhase};
use crate::registry::ResourceKind;

pub const VPC_CIDR: &str = "10.42.0.0/16";
pub const SUBNET_CIDRS: [&str; 2] = ["10.42.0.0/20", "10.42.16.0/20"];

const AVAILABLE: &str = "available";

pub const CLUSTER_ROLE_POLICIES: &[&str] = &["arn:aws:iam::aws:policy/AmazonEKSClusterPolicy"];
pub const NODE_ROLE_POLICIES: &[&str] = &[
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

/// Creates the network, identity and registry resources in dependency order.
pub struct Provisioner<'a> {
    cloud: &'a dyn CloudApi,
    config: &'a RunConfig,
    timings: &'a Timings,
}

impl<'a> Provisioner<'a> {
    pub fn new(cloud: &'a dyn CloudApi, config: &'a RunConfig, timings: &'a Timings) -> Self {
        Self {
            cloud,
            config,
            timings,
        }
    }

    pub async fn provision(&self, ctx: &mut RunContext) -> anyhow::Result<()> {
        ctx.advance(RunPhase::Provisioning);

        let vpc_id = self.create_network(ctx).await?;
        let gateway_id = self.create_gateway(ctx, &vpc_id).await?;
        let subnet_ids = self.create_subnets(ctx, &vpc_id).await?;
        self.create_routes(ctx, &vpc_id, &gateway_id, &subnet_ids).await?;
        let cluster_role = ctx.cluster_role_name();
        self.create_role(ctx, &cluster_role, "eks.amazonaws.com", CLUSTER_ROLE_POLICIES).await?;
        let node_role = ctx.node_role_name();
        self.create_role(ctx, &node_role, "ec2.amazonaws.com", NODE_ROLE_POLICIES).await?;
        self.ensure_repository(ctx).await?;

        log::info!("Provisioned network {vpc_id} with subnets {}", subnet_ids.join(", "));
        Ok(())
    }

    async fn create_network(&self, ctx: &mut RunContext) -> anyhow::Result<String> {
        let name = ctx.resource_name("vpc");
        let vpc_id = self
            .cloud
            .create_vpc(VPC_CIDR, &ctx.tags(&name))
            .await
            .context(ProvisioningError::new("network", "create call failed"))?;
        ctx.registry_mut().register(ResourceKind::Network, &vpc_id);
        ctx.check_interrupted()?;

        ctx.interruptible(self.wait_available(ResourceKind::Network, &vpc_id)).await?;
        self.cloud
            .enable_vpc_dns(&vpc_id)
            .await
            .context(ProvisioningError::new("network", "could not enable DNS hostnames"))?;

        Ok(vpc_id)
    }

    async fn create_gateway(&self, ctx: &mut RunContext, vpc_id: &str) -> anyhow::Result<String> {
        let name = ctx.resource_name("igw");
        let gateway_id = self
            .cloud
            .create_internet_gateway(&ctx.tags(&name))
            .await
            .context(ProvisioningError::new("gateway", "create call failed"))?;
        ctx.registry_mut().register(ResourceKind::Gateway, &gateway_id);
        ctx.check_interrupted()?;

        self.cloud
            .attach_internet_gateway(&gateway_id, vpc_id)
            .await
            .context(ProvisioningError::new("gateway", "attach failed"))?;

        Ok(gateway_id)
    }

    async fn create_subnets(
        &self,
        ctx: &mut RunContext,
        vpc_id: &str,
    ) -> anyhow::Result<Vec<String>> {
        let zones = self
            .cloud
            .availability_zones()
            .await
            .context(ProvisioningError::new("subnets", "could not list availability zones"))?;
        if zones.len() < SUBNET_CIDRS.len() {
            return Err(ProvisioningError::new(
                "subnets",
                format!(
                    "need {} availability zones in {}, found {}",
                    SUBNET_CIDRS.len(),
                    self.cloud.region(),
                    zones.len()
                ),
            )
            .into());
        }

        let mut subnet_ids = Vec::with_capacity(SUBNET_CIDRS.len());
        for (index, (cidr, zone)) in SUBNET_CIDRS.iter().zip(zones.iter()).enumerate() {
            let name = ctx.resource_name(&format!("subnet-{index}"));
            let tags = subnet_tags(ctx, &name);
            let subnet_id = self
                .cloud
                .create_subnet(vpc_id, cidr, zone, &tags)
                .await
                .context(ProvisioningError::new("subnets", format!("create in {zone} failed")))?;
            ctx.registry_mut().register(ResourceKind::Subnet, &subnet_id);
            ctx.check_interrupted()?;

            ctx.interruptible(self.wait_available(ResourceKind::Subnet, &subnet_id)).await?;
            self.cloud
                .enable_public_ips(&subnet_id)
                .await
                .context(ProvisioningError::new("subnets", "could not enable public IPs"))?;
            subnet_ids.push(subnet_id);
        }

        Ok(subnet_ids)
    }

    async fn create_routes(
        &self,
        ctx: &mut RunContext,
        vpc_id: &str,
        gateway_id: &str,
        subnet_ids: &[String],
    ) -> anyhow::Result<()> {
        let name = ctx.resource_name("routes");
        let route_table_id = self
            .cloud
            .create_route_table(vpc_id, &ctx.tags(&name))
            .await
            .context(ProvisioningError::new("route table", "create call failed"))?;
        ctx.registry_mut().register(ResourceKind::RouteTable, &route_table_id);
        ctx.check_interrupted()?;

        self.cloud
            .create_default_route(&route_table_id, gateway_id)
            .await
            .context(ProvisioningError::new("route table", "default route failed"))?;
        for subnet_id in subnet_ids {
            self.cloud
                .associate_route_table(&route_table_id, subnet_id)
                .await
                .context(ProvisioningError::new(
                    "route table",
                    format!("association with {subnet_id} failed"),
                ))?;
        }

        Ok(())
    }

    async fn create_role(
        &self,
        ctx: &mut RunContext,
        role_name: &str,
        service: &str,
        policies: &[&str],
    ) -> anyhow::Result<()> {
        let arn = self
            .cloud
            .create_role(role_name, &trust_policy(service), &ctx.tags(role_name))
            .await
            .context(ProvisioningError::new("roles", format!("create {role_name} failed")))?;
        ctx.registry_mut().register(ResourceKind::IamRole, role_name);
        ctx.check_interrupted()?;
        log::debug!("Created role {arn}");

        for policy in policies {
            self.cloud
                .attach_role_policy(role_name, policy)
                .await
                .context(ProvisioningError::new(
                    "roles",
                    format!("attaching {policy} to {role_name} failed"),
                ))?;
        }

        Ok(())
    }

    /// Reuse the repository if one with the configured name exists. A reused repository is never
    /// deleted by teardown.
    async fn ensure_repository(&self, ctx: &mut RunContext) -> anyhow::Result<()> {
        let name = &self.config.repository_name;
        let existing = self
            .cloud
            .find_repository(name)
            .await
            .context(ProvisioningError::new("registry", "lookup failed"))?;

        let uri = match existing {
            Some(uri) => {
                log::info!("Reusing existing repository {uri}");
                ctx.registry_mut().register_reused(ResourceKind::RegistryRepo, name);
                uri
            }
            None => {
                let uri = self
                    .cloud
                    .create_repository(name, &ctx.tags(name))
                    .await
                    .context(ProvisioningError::new("registry", "create call failed"))?;
                ctx.registry_mut().register(ResourceKind::RegistryRepo, name);
                ctx.check_interrupted()?;
                uri
            }
        };
        ctx.set_repository_uri(uri);

        Ok(())
    }

    async fn wait_available(&self, kind: ResourceKind, id: &str) -> anyhow::Result<()> {
        poll(&format!("{kind} {id}"), self.timings.resource_available, |_| async move {
            let state = match kind {
                ResourceKind::Network => self.cloud.vpc_state(id).await?,
                _ => self.cloud.subnet_state(id).await?,
            };
            Ok(match state {
                Some(s) if s == AVAILABLE => Poll::Ready(()),
                Some(s) => Poll::Pending(s),
                None => Poll::Pending("not visible yet".to_string()),
            })
        })
        .await
        .context(ProvisioningError::new(
            kind.to_string(),
            format!("{id} never became available"),
        ))
    }
}

fn subnet_tags(ctx: &RunContext, name: &str) -> Vec<Tag> {
    let mut tags = ctx.tags(name);
    tags.push(Tag::new("kubernetes.io/role/elb", "1"));
    tags.push(Tag::new(
        format!("kubernetes.io/cluster/{}", ctx.cluster_name()),
        "shared",
    ));
    tags
}

/// A trust policy letting `service` assume the role.
pub fn trust_policy(service: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_policy_names_the_service() {
        let policy: serde_json::Value =
            serde_json::from_str(&trust_policy("eks.amazonaws.com")).unwrap();

        assert_eq!("eks.amazonaws.com", policy["Statement"][0]["Principal"]["Service"]);
        assert_eq!("sts:AssumeRole", policy["Statement"][0]["Action"]);
    }

    #[test]
    fn subnets_are_tagged_for_load_balancers() {
        let ctx = RunContext::new("r1", "bench");
        let tags = subnet_tags(&ctx, "bench-r1-subnet-0");

        assert!(tags.contains(&Tag::new("kubernetes.io/role/elb", "1")));
        assert!(tags.contains(&Tag::new("kubernetes.io/cluster/bench-r1-cluster", "shared")));
        assert!(tags.contains(&Tag::new("Name", "bench-r1-subnet-0")));
    }
}
