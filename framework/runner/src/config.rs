use std::path::PathBuf;
use std::time::Duration;

use benchfleet_core::prelude::{PollPolicy, PreconditionError};

use crate::cli::BenchfleetCli;

/// Everything a run needs to know up front, validated from the CLI and environment.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,
    pub name_prefix: String,
    pub profile: String,
    pub region: String,
    pub node_instance_type: String,
    pub node_count: u32,
    pub kubernetes_version: String,
    pub workload_variant: String,
    pub loadgen_ami: String,
    pub loadgen_instance_type: String,
    pub standard_base_image: String,
    pub caged_base_image: String,
    pub repository_name: String,
    pub workload_source: PathBuf,
    pub manifest_dir: PathBuf,
    pub results_dir: PathBuf,
    pub work_dir: PathBuf,
    /// Command run inside the freshly built baseline image to print its runtime version.
    pub version_command: Vec<String>,
    pub no_progress: bool,
    pub timings: Timings,
    pub load: LoadProfile,
}

impl RunConfig {
    pub fn from_cli(cli: &BenchfleetCli) -> anyhow::Result<Self> {
        let profile = cli
            .aws_profile
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                PreconditionError::new("AWS_PROFILE is not set, refusing to touch any cloud resource")
            })?
            .to_string();

        if cli.node_count == 0 {
            return Err(PreconditionError::new("NODE_COUNT must be at least 1").into());
        }
        if cli.trials == 0 {
            return Err(PreconditionError::new("TRIALS must be at least 1").into());
        }

        let run_id = cli
            .run_id
            .clone()
            .unwrap_or_else(|| nanoid::nanoid!(8, &RUN_ID_ALPHABET));

        Ok(Self {
            run_id,
            name_prefix: cli.cluster_name_prefix.clone(),
            profile,
            region: cli.aws_region.clone(),
            node_instance_type: cli.node_instance_type.clone(),
            node_count: cli.node_count,
            kubernetes_version: cli.kubernetes_version.clone(),
            workload_variant: cli.workload_variant.clone(),
            loadgen_ami: cli.loadgen_ami.clone(),
            loadgen_instance_type: cli.loadgen_instance_type.clone(),
            standard_base_image: cli.standard_base_image.clone(),
            caged_base_image: cli.caged_base_image.clone(),
            repository_name: cli.repository_name.clone(),
            workload_source: cli.workload_source.clone(),
            manifest_dir: cli.manifest_dir.clone(),
            results_dir: cli.results_dir.clone(),
            work_dir: cli.work_dir.clone(),
            version_command: vec!["python".to_string(), "--version".to_string()],
            no_progress: cli.no_progress,
            timings: Timings::default(),
            load: LoadProfile {
                trials: cli.trials,
                ..LoadProfile::default()
            },
        })
    }

    /// Run-private kubeconfig, never the user's default one.
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.work_dir.join(format!("kubeconfig-{}", self.run_id))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_dir
            .join(format!("{}.yaml", self.workload_variant))
    }

    /// File stem shared by every output of this run.
    pub fn output_stem(&self) -> String {
        format!("{}-{}", self.name_prefix, self.run_id)
    }
}

/// Lowercase alphanumerics only, since the run id ends up in cluster and role names.
const RUN_ID_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

pub const RESOURCE_AVAILABLE: PollPolicy = PollPolicy::new(Duration::from_secs(5), 24);
pub const IMAGE_VISIBLE: PollPolicy = PollPolicy::new(Duration::from_secs(5), 12);
pub const CLUSTER_ACTIVE: PollPolicy = PollPolicy::new(Duration::from_secs(15), 60);
pub const NODE_POOL_ACTIVE: PollPolicy = PollPolicy::new(Duration::from_secs(15), 60);
pub const NODES_READY: PollPolicy = PollPolicy::new(Duration::from_secs(10), 60);
pub const PODS_READY: PollPolicy = PollPolicy::new(Duration::from_secs(10), 90);
pub const SERVICE_HOSTNAME: PollPolicy = PollPolicy::new(Duration::from_secs(10), 60);
pub const INSTANCE_RUNNING: PollPolicy = PollPolicy::new(Duration::from_secs(10), 30);
/// 90 minutes of console polling.
pub const CONSOLE_OUTPUT: PollPolicy = PollPolicy::new(Duration::from_secs(10), 540);
pub const INSTANCE_TERMINATED: PollPolicy = PollPolicy::new(Duration::from_secs(10), 60);
pub const SECURITY_GROUP_DELETE: PollPolicy = PollPolicy::new(Duration::from_secs(15), 10);
pub const NODE_POOL_DELETED: PollPolicy = PollPolicy::new(Duration::from_secs(15), 80);
pub const CLUSTER_DELETED: PollPolicy = PollPolicy::new(Duration::from_secs(15), 60);
pub const NETWORK_DELETE: PollPolicy = PollPolicy::new(Duration::from_secs(15), 10);
pub const LOAD_BALANCER_SETTLE: Duration = Duration::from_secs(60);
/// A pod status summary is logged every this many pod-readiness polls.
pub const POD_STATUS_DUMP_EVERY: u32 = 6;

/// Poll interval and attempt ceiling for every convergence wait in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub resource_available: PollPolicy,
    pub image_visible: PollPolicy,
    pub cluster_active: PollPolicy,
    pub node_pool_active: PollPolicy,
    pub nodes_ready: PollPolicy,
    pub pods_ready: PollPolicy,
    pub pod_status_dump_every: u32,
    pub service_hostname: PollPolicy,
    pub instance_running: PollPolicy,
    pub console_output: PollPolicy,
    pub instance_terminated: PollPolicy,
    pub load_balancer_settle: Duration,
    pub security_group_delete: PollPolicy,
    pub node_pool_deleted: PollPolicy,
    pub cluster_deleted: PollPolicy,
    pub network_delete: PollPolicy,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            resource_available: RESOURCE_AVAILABLE,
            image_visible: IMAGE_VISIBLE,
            cluster_active: CLUSTER_ACTIVE,
            node_pool_active: NODE_POOL_ACTIVE,
            nodes_ready: NODES_READY,
            pods_ready: PODS_READY,
            pod_status_dump_every: POD_STATUS_DUMP_EVERY,
            service_hostname: SERVICE_HOSTNAME,
            instance_running: INSTANCE_RUNNING,
            console_output: CONSOLE_OUTPUT,
            instance_terminated: INSTANCE_TERMINATED,
            load_balancer_settle: LOAD_BALANCER_SETTLE,
            security_group_delete: SECURITY_GROUP_DELETE,
            node_pool_deleted: NODE_POOL_DELETED,
            cluster_deleted: CLUSTER_DELETED,
            network_delete: NETWORK_DELETE,
        }
    }
}

impl Timings {
    /// The default attempt ceilings with every interval and delay set to zero.
    pub fn immediate() -> Self {
        let d = Self::default();
        let now = |p: PollPolicy| PollPolicy::immediate(p.max_attempts);
        Self {
            resource_available: now(d.resource_available),
            image_visible: now(d.image_visible),
            cluster_active: now(d.cluster_active),
            node_pool_active: now(d.node_pool_active),
            nodes_ready: now(d.nodes_ready),
            pods_ready: now(d.pods_ready),
            pod_status_dump_every: d.pod_status_dump_every,
            service_hostname: now(d.service_hostname),
            instance_running: now(d.instance_running),
            console_output: now(d.console_output),
            instance_terminated: now(d.instance_terminated),
            load_balancer_settle: Duration::ZERO,
            security_group_delete: now(d.security_group_delete),
            node_pool_deleted: now(d.node_pool_deleted),
            cluster_deleted: now(d.cluster_deleted),
            network_delete: now(d.network_delete),
        }
    }
}

/// Shape of the traffic the load generator drives at each target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProfile {
    pub precheck_attempts: u32,
    pub precheck_interval: Duration,
    /// Concurrency levels of the ramping warm-up, each held for `warmup_step`.
    pub warmup_steps: Vec<u32>,
    pub warmup_step: Duration,
    pub reconnect: Duration,
    pub reconnect_connections: u32,
    pub measure_ramp: Duration,
    pub measure_ramp_connections: u32,
    pub measure_steady: Duration,
    pub measure_connections: u32,
    pub cooldown: Duration,
    pub trials: u32,
    pub oha_version: String,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            precheck_attempts: 30,
            precheck_interval: Duration::from_secs(10),
            warmup_steps: vec![10, 50, 100, 200],
            warmup_step: Duration::from_secs(30),
            reconnect: Duration::from_secs(15),
            reconnect_connections: 50,
            measure_ramp: Duration::from_secs(30),
            measure_ramp_connections: 50,
            measure_steady: Duration::from_secs(120),
            measure_connections: 200,
            cooldown: Duration::from_secs(60),
            trials: 1,
            oha_version: "1.4.5".to_string(),
        }
    }
}

impl LoadProfile {
    pub fn oha_url(&self) -> String {
        format!(
            "https://github.com/hatoo/oha/releases/download/v{}/oha-linux-amd64",
            self.oha_version
        )
    }
}
