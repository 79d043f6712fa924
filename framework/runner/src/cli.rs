use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct BenchfleetCli {
    /// Prefix for every cloud resource name this run creates. The run id is appended to it.
    #[clap(long, env = "CLUSTER_NAME_PREFIX", default_value = "benchfleet")]
    pub cluster_name_prefix: String,

    /// The cloud credentials profile to run as. Required, nothing is created without it.
    #[clap(long, env = "AWS_PROFILE")]
    pub aws_profile: Option<String>,

    #[clap(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,

    /// Instance type for the workload cluster's nodes.
    #[clap(long, env = "NODE_INSTANCE_TYPE", default_value = "m5.large")]
    pub node_instance_type: String,

    /// Fixed size of the node pool. There is no autoscaling.
    #[clap(long, env = "NODE_COUNT", default_value = "2")]
    pub node_count: u32,

    #[clap(long, env = "KUBERNETES_VERSION", default_value = "1.29")]
    pub kubernetes_version: String,

    /// Selects the manifest `<manifest-dir>/<variant>.yaml` to deploy.
    #[clap(long, env = "WORKLOAD_VARIANT", default_value = "webapp")]
    pub workload_variant: String,

    /// Machine image for the load generator instance.
    #[clap(long, env = "LOADGEN_AMI", default_value = "ami-0c7217cdde317cfec")]
    pub loadgen_ami: String,

    #[clap(long, env = "LOADGEN_INSTANCE_TYPE", default_value = "c5.xlarge")]
    pub loadgen_instance_type: String,

    /// Base image for the baseline variant.
    #[clap(long, env = "STANDARD_BASE_IMAGE", default_value = "python:3.12-slim")]
    pub standard_base_image: String,

    /// Base image for the modified-runtime variant.
    #[clap(long, env = "CAGED_BASE_IMAGE", default_value = "python-caged:3.12-slim")]
    pub caged_base_image: String,

    /// Registry repository both images are pushed to. Reused if it already exists.
    #[clap(long, env = "REPOSITORY_NAME", default_value = "benchfleet-webapp")]
    pub repository_name: String,

    /// How many times the full target sequence is repeated on the load generator.
    #[clap(long, env = "TRIALS", default_value = "1")]
    pub trials: u32,

    /// Directory containing the workload's Dockerfile.
    #[clap(long, default_value = "app")]
    pub workload_source: PathBuf,

    #[clap(long, default_value = "manifests")]
    pub manifest_dir: PathBuf,

    #[clap(long, default_value = "results")]
    pub results_dir: PathBuf,

    #[clap(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Scratch space for run-private files such as the kubeconfig.
    #[clap(long, default_value = ".benchfleet")]
    pub work_dir: PathBuf,

    /// Use this run id instead of generating one.
    #[clap(long)]
    pub run_id: Option<String>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}
