use std::sync::Arc;

use anyhow::Context;
use benchfleet_core::prelude::{
    InterruptedError, PreconditionError, ProvisioningError, RuntimeError, ShutdownHandle,
};
use benchfleet_providers::prelude::{
    require_tool, AwsCli, CloudApi, Docker, ImageTool, Kubectl, WorkloadApi,
};
use benchfleet_summary_model::FlushedResult;

use crate::cli::BenchfleetCli;
use crate::cluster::ClusterBuilder;
use crate::config::RunConfig;
use crate::context::{RunContext, RunPhase};
use crate::deploy::DeploymentDriver;
use crate::diagnostics;
use crate::dispatch::Dispatcher;
use crate::images::ImagePublisher;
use crate::monitor::{MonitorOutcome, ProgressMonitor};
use crate::provision::Provisioner;
use crate::results::{persist_result, persist_transcript};
use crate::shutdown::start_shutdown_listener;
use crate::teardown::{TeardownManager, TeardownReport};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Lines of the transcript logged when the load test fails.
const TRANSCRIPT_TAIL_LINES: usize = 40;

/// The external collaborators of a run.
#[derive(Clone)]
pub struct Providers {
    pub cloud: Arc<dyn CloudApi>,
    pub workloads: Arc<dyn WorkloadApi>,
    pub images: Arc<dyn ImageTool>,
}

impl Providers {
    /// The command line backed collaborators. Every tool must be on the `PATH`.
    pub fn from_tools(config: &RunConfig) -> anyhow::Result<Self> {
        let tool = |name: &str| {
            require_tool(name)
                .map_err(|e| anyhow::Error::new(PreconditionError::new(e.to_string())))
        };
        let aws = tool("aws")?;
        let kubectl = tool("kubectl")?;
        let docker = tool("docker")?;

        Ok(Self {
            cloud: Arc::new(AwsCli::new(aws, &config.profile, &config.region)),
            workloads: Arc::new(Kubectl::new(kubectl, &config.kubeconfig_path())),
            images: Arc::new(Docker::new(docker)),
        })
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(FlushedResult),
    Failed(anyhow::Error),
    Interrupted,
}

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct RunReport {
    pub context: RunContext,
    pub outcome: RunOutcome,
    pub teardown: TeardownReport,
}

impl RunReport {
    pub fn exit_code(&self) -> u8 {
        match &self.outcome {
            RunOutcome::Succeeded(_) => EXIT_SUCCESS,
            RunOutcome::Interrupted => EXIT_INTERRUPTED,
            RunOutcome::Failed(e) if e.is::<InterruptedError>() => EXIT_INTERRUPTED,
            RunOutcome::Failed(_) => EXIT_FAILURE,
        }
    }
}

/// Run the benchmark, then tear down exactly once whatever happened.
///
/// A shutdown signal is only acted on where no create call is in flight. Every object the run
/// created is registered before teardown starts.
pub async fn execute(
    config: &RunConfig,
    providers: &Providers,
    shutdown: &ShutdownHandle,
) -> RunReport {
    let mut ctx = RunContext::new(&config.run_id, &config.name_prefix);
    ctx.listen_for_shutdown(shutdown.new_listener());
    log::info!("Starting run {}", config.run_id);

    let outcome = match happy_path(config, providers, &mut ctx).await {
        Ok(flushed) => RunOutcome::Succeeded(flushed),
        Err(e) if e.is::<InterruptedError>() => RunOutcome::Interrupted,
        Err(e) => RunOutcome::Failed(e),
    };

    match &outcome {
        RunOutcome::Succeeded(flushed) => {
            log::info!(
                "Run {} succeeded, results in {}",
                config.run_id,
                flushed.result_path.display()
            );
        }
        RunOutcome::Interrupted => {
            log::warn!("Run {} interrupted during {}", config.run_id, ctx.phase());
        }
        RunOutcome::Failed(e) => {
            log::error!("Run {} failed ({}): {e:?}", config.run_id, failure_class(e));
            if e.is::<RuntimeError>() {
                diagnostics::dump(providers.workloads.as_ref(), &ctx, config).await;
            }
        }
    }

    let teardown = TeardownManager::new(providers.cloud.as_ref(), &config.timings)
        .teardown(&mut ctx)
        .await;

    RunReport {
        context: ctx,
        outcome,
        teardown,
    }
}

fn failure_class(e: &anyhow::Error) -> &'static str {
    if e.is::<PreconditionError>() {
        "precondition"
    } else if e.is::<ProvisioningError>() {
        "provisioning"
    } else if e.is::<RuntimeError>() {
        "runtime"
    } else if e.is::<InterruptedError>() {
        "interrupted"
    } else {
        "unclassified"
    }
}

async fn happy_path(
    config: &RunConfig,
    providers: &Providers,
    ctx: &mut RunContext,
) -> anyhow::Result<FlushedResult> {
    let timings = &config.timings;
    let cloud = providers.cloud.as_ref();
    let workloads = providers.workloads.as_ref();

    preflight(config, cloud, ctx).await?;
    ctx.check_interrupted()?;
    Provisioner::new(cloud, config, timings).provision(ctx).await?;
    ctx.check_interrupted()?;
    ImagePublisher::new(cloud, providers.images.as_ref(), config, timings)
        .publish(ctx)
        .await?;
    ctx.check_interrupted()?;
    ClusterBuilder::new(cloud, workloads, config, timings)
        .build(ctx)
        .await?;
    ctx.check_interrupted()?;
    DeploymentDriver::new(workloads, config, timings)
        .deploy(ctx)
        .await?;
    ctx.check_interrupted()?;
    let instance_id = Dispatcher::new(cloud, config, timings).dispatch(ctx).await?;

    let outcome = ProgressMonitor::new(cloud, timings, !config.no_progress)
        .watch(ctx, &instance_id)
        .await?;
    match outcome {
        MonitorOutcome::Completed { window, .. } => {
            let flushed = persist_result(config, ctx, &window)
                .context("Load test completed but its result could not be written")?;
            ctx.advance(RunPhase::Complete);
            Ok(flushed)
        }
        MonitorOutcome::Failed {
            reason, transcript, ..
        } => {
            let tail = transcript
                .lines()
                .rev()
                .take(TRANSCRIPT_TAIL_LINES)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            log::error!("Last output of the load generator:\n{tail}");
            match persist_transcript(config, &transcript) {
                Ok(path) => log::error!("Full transcript written to {}", path.display()),
                Err(e) => log::error!("Could not write transcript: {e:?}"),
            }
            Err(RuntimeError::new(reason.to_string()).into())
        }
    }
}

/// Checks that must pass before anything is created.
async fn preflight(
    config: &RunConfig,
    cloud: &dyn CloudApi,
    ctx: &mut RunContext,
) -> anyhow::Result<()> {
    let manifest = config.manifest_path();
    if !manifest.is_file() {
        return Err(PreconditionError::new(format!(
            "workload manifest {} does not exist",
            manifest.display()
        ))
        .into());
    }
    if !config.workload_source.is_dir() {
        return Err(PreconditionError::new(format!(
            "workload source {} is not a directory",
            config.workload_source.display()
        ))
        .into());
    }
    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create work directory {}", config.work_dir.display()))
        .context(PreconditionError::new("work directory unusable"))?;

    let identity = cloud
        .caller_identity()
        .await
        .context(PreconditionError::new(format!(
            "could not verify credentials for profile {}",
            config.profile
        )))?;
    log::info!(
        "Running as {} in account {} ({})",
        identity.arn,
        identity.account_id,
        cloud.region()
    );
    ctx.set_identity(identity);

    Ok(())
}

/// Run benchfleet from a parsed command line, returning the process exit code.
pub fn run(cli: BenchfleetCli) -> anyhow::Result<u8> {
    let config = RunConfig::from_cli(&cli)?;
    log::info!(
        "Run {}: variant {}, {} x {} nodes, {} trial(s)",
        config.run_id,
        config.workload_variant,
        config.node_count,
        config.node_instance_type,
        config.load.trials
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown = start_shutdown_listener(&runtime)?;
    let providers = Providers::from_tools(&config)?;

    let report = runtime.block_on(execute(&config, &providers, &shutdown));
    if !report.teardown.is_clean() {
        log::error!(
            "{} resource(s) could not be deleted and may need manual cleanup",
            report.teardown.failed.len()
        );
    }

    Ok(report.exit_code())
}
