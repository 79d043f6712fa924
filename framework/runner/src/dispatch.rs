use anyhow::Context;
use benchfleet_core::prelude::{poll, Poll, ProvisioningError};
use benchfleet_providers::prelude::{
    CloudApi, InstanceSpec, INSTANCE_RUNNING, INSTANCE_SHUTTING_DOWN, INSTANCE_TERMINATED,
};

use crate::boot_script::{self, MAX_USER_DATA_BYTES};
use crate::config::{RunConfig, Timings};
use crate::context::{RunContext, RunPhase};
use crate::registry::ResourceKind;

/// Launches the ephemeral load generator with its boot script.
pub struct Dispatcher<'a> {
    cloud: &'a dyn CloudApi,
    config: &'a RunConfig,
    timings: &'a Timings,
}

impl<'a> Dispatcher<'a> {
    pub fn new(cloud: &'a dyn CloudApi, config: &'a RunConfig, timings: &'a Timings) -> Self {
        Self {
            cloud,
            config,
            timings,
        }
    }

    /// Returns the instance id once it is running.
    pub async fn dispatch(&self, ctx: &mut RunContext) -> anyhow::Result<String> {
        ctx.advance(RunPhase::Dispatching);

        if ctx.endpoints().is_empty() {
            return Err(ProvisioningError::new("dispatch", "no endpoints to load test").into());
        }
        let user_data = self.user_data(ctx)?;

        let vpc_id = ctx
            .registry()
            .first_live(ResourceKind::Network)
            .map(|h| h.identifier().to_string())
            .ok_or_else(|| ProvisioningError::new("dispatch", "no network"))?;
        let subnet_id = ctx
            .registry()
            .first_live(ResourceKind::Subnet)
            .map(|h| h.identifier().to_string())
            .ok_or_else(|| ProvisioningError::new("dispatch", "no subnet"))?;

        let group_name = ctx.resource_name("loadgen");
        let group_id = self
            .cloud
            .create_security_group(
                &vpc_id,
                &group_name,
                "benchfleet load generator",
                &ctx.tags(&group_name),
            )
            .await
            .context(ProvisioningError::new("dispatch", "security group create failed"))?;
        ctx.registry_mut().register(ResourceKind::SecurityGroup, &group_id);
        ctx.check_interrupted()?;

        let spec = InstanceSpec {
            image_id: self.config.loadgen_ami.clone(),
            instance_type: self.config.loadgen_instance_type.clone(),
            subnet_id,
            security_group_ids: vec![group_id],
            user_data,
            tags: ctx.tags(&group_name),
        };
        let instance_id = self
            .cloud
            .run_instance(&spec)
            .await
            .context(ProvisioningError::new("dispatch", "instance launch failed"))?;
        ctx.registry_mut().register(ResourceKind::ComputeInstance, &instance_id);
        log::info!(
            "Launched load generator {instance_id} against {} endpoint(s)",
            ctx.endpoints().len()
        );
        ctx.check_interrupted()?;

        ctx.interruptible(self.wait_running(&instance_id)).await?;

        Ok(instance_id)
    }

    async fn wait_running(&self, instance_id: &str) -> anyhow::Result<()> {
        poll(&format!("instance {instance_id}"), self.timings.instance_running, |_| async move {
            match self.cloud.instance_state(instance_id).await?.as_deref() {
                Some(INSTANCE_RUNNING) => Ok(Poll::Ready(())),
                Some(s @ (INSTANCE_SHUTTING_DOWN | INSTANCE_TERMINATED)) => {
                    Err(anyhow::anyhow!("instance is {s}"))
                }
                Some(s) => Ok(Poll::Pending(s.to_string())),
                None => Ok(Poll::Pending("not visible yet".to_string())),
            }
        })
        .await
        .context(ProvisioningError::new("dispatch", "instance never started running"))
    }

    fn user_data(&self, ctx: &RunContext) -> anyhow::Result<Vec<u8>> {
        let script = boot_script::render(ctx.run_id(), ctx.endpoints(), &self.config.load);
        let compressed = boot_script::compress(&script)
            .context(ProvisioningError::new("dispatch", "boot script compression failed"))?;

        let size = boot_script::encoded_len(&compressed);
        if size > MAX_USER_DATA_BYTES {
            return Err(ProvisioningError::new(
                "dispatch",
                format!("boot script is {size} bytes encoded, the limit is {MAX_USER_DATA_BYTES}"),
            )
            .into());
        }
        log::debug!("Boot script is {size} bytes encoded");

        Ok(compressed)
    }
}
