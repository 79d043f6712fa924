//! In-memory collaborators sharing one simulated cloud.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use benchfleet_core::prelude::ShutdownHandle;
use benchfleet_providers::prelude::*;
use benchfleet_runner::prelude::*;
use clap::Parser;

pub const ACCOUNT_ID: &str = "123456789012";
pub const REPOSITORY_URI: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/webapp";

pub const MANIFEST: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: webapp-standard
spec:
  template:
    spec:
      containers:
        - name: app
          image: "{{STANDARD_IMAGE}}"
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: webapp-caged
spec:
  template:
    spec:
      containers:
        - name: app
          image: "{{CAGED_IMAGE}}"
---
apiVersion: v1
kind: Service
metadata:
  name: standard-list
  annotations:
    benchfleet.io/expose: "true"
spec:
  type: LoadBalancer
---
apiVersion: v1
kind: Service
metadata:
  name: standard-detail
  annotations:
    benchfleet.io/expose: "true"
spec:
  type: LoadBalancer
---
apiVersion: v1
kind: Service
metadata:
  name: caged-list
  annotations:
    benchfleet.io/expose: "true"
spec:
  type: LoadBalancer
---
apiVersion: v1
kind: Service
metadata:
  name: caged-detail
  annotations:
    benchfleet.io/expose: "true"
spec:
  type: LoadBalancer
"#;

pub const SERVICES: [&str; 4] = ["standard-list", "standard-detail", "caged-list", "caged-detail"];

/// Console output of a load generator that measures every service once.
pub fn successful_console() -> Vec<String> {
    let mut lines = vec![
        "[    0.000000] Linux version 6.1.0".to_string(),
        "[    3.120000] IPv6: ADDRCONF(NETDEV_CHANGE): eth0: link becomes ready".to_string(),
        "cloud-init[812]: benchfleet load generator".to_string(),
        format!("cloud-init[812]: {TEST_START_MARKER}"),
    ];
    for service in SERVICES {
        let variant = if service.starts_with("caged") { "caged" } else { "standard" };
        lines.extend([
            format!("cloud-init[812]: BENCHFLEET_TARGET_BEGIN variant={variant} target={service} trial=1"),
            "cloud-init[812]: BENCHFLEET_PHASE precheck".to_string(),
            "cloud-init[812]: BENCHFLEET_PHASE measure-steady".to_string(),
            "cloud-init[812]: Summary:".to_string(),
            "cloud-init[812]:   Success rate:\t100.00%".to_string(),
            "cloud-init[812]:   Average:\t0.0123 secs".to_string(),
            "cloud-init[812]:   Requests/sec:\t812.5".to_string(),
            "cloud-init[812]:   99.00% in 0.0301 secs".to_string(),
            "cloud-init[812]: BENCHFLEET_PHASE cooldown".to_string(),
            "cloud-init[812]: BENCHFLEET_TARGET_END".to_string(),
        ]);
    }
    lines.push(format!("cloud-init[812]: {TEST_COMPLETE_MARKER}"));
    lines
}

#[derive(Default)]
pub struct World {
    /// Every collaborator call in order, as `name args`.
    pub calls: Vec<String>,
    next_id: u32,
    /// Objects that currently exist, by id or name.
    pub live: BTreeSet<String>,
    pub cluster_fails: bool,
    /// The control plane reports `CREATING` for as long as it exists.
    pub cluster_stuck: bool,
    pub repository_exists: bool,
    /// Pushes succeed but the registry never lists the tags.
    pub tags_hidden: bool,
    /// Workload pods stay `Pending` with no ready containers.
    pub pods_pending: bool,
    /// Load balancers are never given a hostname.
    pub hostnames_withheld: bool,
    /// Remaining delete_security_group calls answered with a dependency violation.
    pub security_group_violations: u32,
    /// The console shows one more entry per read.
    pub console: Vec<String>,
    pub console_reads: u32,
    pub load_balancers: Vec<LoadBalancerRef>,
    pub pushed_tags: Vec<String>,
    pub applied: Vec<String>,
    pub node_count: usize,
    /// Fire the shutdown handle when this call is made. The call itself still completes.
    pub interrupt_on: Option<(String, ShutdownHandle)>,
}

impl World {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn remove(&mut self, id: &str) -> ProviderResult<()> {
        if self.live.remove(id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(id.to_string()))
        }
    }
}

#[derive(Clone)]
pub struct Fake {
    world: Arc<Mutex<World>>,
}

impl Fake {
    pub fn new() -> Self {
        let world = World {
            console: successful_console(),
            node_count: 2,
            load_balancers: (1..=4)
                .map(|i| LoadBalancerRef {
                    id: format!("arn:aws:elasticloadbalancing:lb-{i}"),
                    classic: false,
                })
                .collect(),
            ..World::default()
        };
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    pub fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    pub fn providers(&self) -> Providers {
        Providers {
            cloud: Arc::new(self.clone()),
            workloads: Arc::new(FakeWorkloads(self.clone())),
            images: Arc::new(FakeImages(self.clone())),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.world().calls.clone()
    }

    /// Calls that delete, terminate or detach something.
    pub fn destructive_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                c.starts_with("delete_") || c.starts_with("terminate_") || c.starts_with("detach_")
            })
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(name))
            .count()
    }

    pub fn first_index(&self, name: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.split(' ').next() == Some(name))
    }

    async fn record(&self, call: String) {
        let interrupt = {
            let mut world = self.world();
            let name = call.split(' ').next().unwrap_or_default().to_string();
            world.calls.push(call);
            match &world.interrupt_on {
                Some((on, handle)) if *on == name => Some(handle.clone()),
                _ => None,
            }
        };
        if let Some(handle) = interrupt {
            handle.shutdown();
        }
    }

    async fn create(&self, call: String, prefix: &str) -> String {
        self.record(call).await;
        let mut world = self.world();
        let id = world.id(prefix);
        world.live.insert(id.clone());
        id
    }
}

#[async_trait]
impl CloudApi for Fake {
    async fn caller_identity(&self) -> ProviderResult<CallerIdentity> {
        self.record("caller_identity".to_string()).await;
        Ok(CallerIdentity {
            account_id: ACCOUNT_ID.to_string(),
            arn: format!("arn:aws:iam::{ACCOUNT_ID}:user/bench"),
        })
    }

    fn region(&self) -> &str {
        "us-east-1"
    }

    async fn availability_zones(&self) -> ProviderResult<Vec<String>> {
        self.record("availability_zones".to_string()).await;
        Ok(vec!["us-east-1a".to_string(), "us-east-1b".to_string()])
    }

    async fn create_vpc(&self, cidr: &str, _tags: &[Tag]) -> ProviderResult<String> {
        Ok(self.create(format!("create_vpc {cidr}"), "vpc").await)
    }

    async fn vpc_state(&self, vpc_id: &str) -> ProviderResult<Option<String>> {
        let world = self.world();
        Ok(world.live.contains(vpc_id).then(|| "available".to_string()))
    }

    async fn enable_vpc_dns(&self, vpc_id: &str) -> ProviderResult<()> {
        self.record(format!("enable_vpc_dns {vpc_id}")).await;
        Ok(())
    }

    async fn delete_vpc(&self, vpc_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_vpc {vpc_id}")).await;
        self.world().remove(vpc_id)
    }

    async fn create_internet_gateway(&self, _tags: &[Tag]) -> ProviderResult<String> {
        Ok(self.create("create_internet_gateway".to_string(), "igw").await)
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()> {
        self.record(format!("attach_internet_gateway {gateway_id} {vpc_id}"))
            .await;
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()> {
        self.record(format!("detach_internet_gateway {gateway_id} {vpc_id}"))
            .await;
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_internet_gateway {gateway_id}"))
            .await;
        self.world().remove(gateway_id)
    }

    async fn internet_gateways_in_vpc(&self, _vpc_id: &str) -> ProviderResult<Vec<String>> {
        let world = self.world();
        Ok(world
            .live
            .iter()
            .filter(|id| id.starts_with("igw-"))
            .cloned()
            .collect())
    }

    async fn create_subnet(
        &self,
        _vpc_id: &str,
        cidr: &str,
        zone: &str,
        _tags: &[Tag],
    ) -> ProviderResult<String> {
        Ok(self.create(format!("create_subnet {cidr} {zone}"), "subnet").await)
    }

    async fn subnet_state(&self, subnet_id: &str) -> ProviderResult<Option<String>> {
        let world = self.world();
        Ok(world.live.contains(subnet_id).then(|| "available".to_string()))
    }

    async fn enable_public_ips(&self, subnet_id: &str) -> ProviderResult<()> {
        self.record(format!("enable_public_ips {subnet_id}")).await;
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_subnet {subnet_id}")).await;
        self.world().remove(subnet_id)
    }

    async fn create_route_table(&self, _vpc_id: &str, _tags: &[Tag]) -> ProviderResult<String> {
        Ok(self.create("create_route_table".to_string(), "rtb").await)
    }

    async fn create_default_route(&self, route_table_id: &str, gateway_id: &str) -> ProviderResult<()> {
        self.record(format!("create_default_route {route_table_id} {gateway_id}"))
            .await;
        Ok(())
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> ProviderResult<()> {
        self.record(format!("associate_route_table {route_table_id} {subnet_id}"))
            .await;
        Ok(())
    }

    async fn non_main_route_tables(&self, _vpc_id: &str) -> ProviderResult<Vec<String>> {
        let world = self.world();
        Ok(world
            .live
            .iter()
            .filter(|id| id.starts_with("rtb-"))
            .cloned()
            .collect())
    }

    async fn delete_route_table(&self, route_table_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_route_table {route_table_id}"))
            .await;
        self.world().remove(route_table_id)
    }

    async fn create_security_group(
        &self,
        _vpc_id: &str,
        name: &str,
        _description: &str,
        _tags: &[Tag],
    ) -> ProviderResult<String> {
        Ok(self.create(format!("create_security_group {name}"), "sg").await)
    }

    async fn non_default_security_groups(&self, _vpc_id: &str) -> ProviderResult<Vec<String>> {
        let world = self.world();
        Ok(world
            .live
            .iter()
            .filter(|id| id.starts_with("sg-"))
            .cloned()
            .collect())
    }

    async fn delete_security_group(&self, group_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_security_group {group_id}"))
            .await;
        let mut world = self.world();
        if world.security_group_violations > 0 {
            world.security_group_violations -= 1;
            return Err(ProviderError::DependencyViolation(format!(
                "resource {group_id} has a dependent object"
            )));
        }
        world.remove(group_id)
    }

    async fn network_interfaces(&self, _vpc_id: &str) -> ProviderResult<Vec<String>> {
        let world = self.world();
        Ok(world
            .live
            .iter()
            .filter(|id| id.starts_with("eni-"))
            .cloned()
            .collect())
    }

    async fn delete_network_interface(&self, interface_id: &str) -> ProviderResult<()> {
        self.record(format!("delete_network_interface {interface_id}"))
            .await;
        self.world().remove(interface_id)
    }

    async fn create_role(&self, name: &str, _trust_policy: &str, _tags: &[Tag]) -> ProviderResult<String> {
        self.record(format!("create_role {name}")).await;
        self.world().live.insert(name.to_string());
        Ok(format!("arn:aws:iam::{ACCOUNT_ID}:role/{name}"))
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> ProviderResult<()> {
        self.record(format!("attach_role_policy {role_name} {policy_arn}"))
            .await;
        self.world()
            .live
            .insert(format!("{role_name}|{policy_arn}"));
        Ok(())
    }

    async fn attached_role_policies(&self, role_name: &str) -> ProviderResult<Vec<String>> {
        let world = self.world();
        if !world.live.contains(role_name) {
            return Err(ProviderError::NotFound(role_name.to_string()));
        }
        let prefix = format!("{role_name}|");
        Ok(world
            .live
            .iter()
            .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> ProviderResult<()> {
        self.record(format!("detach_role_policy {role_name} {policy_arn}"))
            .await;
        self.world().remove(&format!("{role_name}|{policy_arn}"))
    }

    async fn delete_role(&self, role_name: &str) -> ProviderResult<()> {
        self.record(format!("delete_role {role_name}")).await;
        self.world().remove(role_name)
    }

    async fn find_repository(&self, name: &str) -> ProviderResult<Option<String>> {
        self.record(format!("find_repository {name}")).await;
        let world = self.world();
        Ok(world.repository_exists.then(|| REPOSITORY_URI.to_string()))
    }

    async fn create_repository(&self, name: &str, _tags: &[Tag]) -> ProviderResult<String> {
        self.record(format!("create_repository {name}")).await;
        self.world().live.insert(format!("repo:{name}"));
        Ok(REPOSITORY_URI.to_string())
    }

    async fn image_tags(&self, _repository: &str) -> ProviderResult<Vec<String>> {
        let world = self.world();
        if world.tags_hidden {
            return Ok(Vec::new());
        }
        Ok(world.pushed_tags.clone())
    }

    async fn delete_repository(&self, name: &str) -> ProviderResult<()> {
        self.record(format!("delete_repository {name}")).await;
        self.world().remove(&format!("repo:{name}"))
    }

    async fn registry_password(&self) -> ProviderResult<String> {
        Ok("secret".to_string())
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> ProviderResult<String> {
        self.record(format!("create_cluster {}", spec.name)).await;
        let mut world = self.world();
        if world.cluster_fails {
            return Err(ProviderError::CommandFailed {
                command: "aws eks create-cluster".to_string(),
                status: "exit status: 254".to_string(),
                stderr: "UnsupportedAvailabilityZoneException".to_string(),
            });
        }
        world.live.insert(format!("cluster:{}", spec.name));
        Ok(format!("arn:aws:eks:us-east-1:{ACCOUNT_ID}:cluster/{}", spec.name))
    }

    async fn cluster_status(&self, name: &str) -> ProviderResult<Option<String>> {
        let world = self.world();
        let status = if world.cluster_stuck { "CREATING" } else { "ACTIVE" };
        Ok(world
            .live
            .contains(&format!("cluster:{name}"))
            .then(|| status.to_string()))
    }

    async fn delete_cluster(&self, name: &str) -> ProviderResult<()> {
        self.record(format!("delete_cluster {name}")).await;
        self.world().remove(&format!("cluster:{name}"))
    }

    async fn create_node_pool(&self, spec: &NodePoolSpec) -> ProviderResult<String> {
        self.record(format!("create_node_pool {} {}", spec.name, spec.node_count))
            .await;
        self.world()
            .live
            .insert(format!("pool:{}/{}", spec.cluster_name, spec.name));
        Ok(spec.name.clone())
    }

    async fn node_pool_status(&self, cluster: &str, name: &str) -> ProviderResult<Option<String>> {
        let world = self.world();
        Ok(world
            .live
            .contains(&format!("pool:{cluster}/{name}"))
            .then(|| "ACTIVE".to_string()))
    }

    async fn delete_node_pool(&self, cluster: &str, name: &str) -> ProviderResult<()> {
        self.record(format!("delete_node_pool {name}")).await;
        self.world().remove(&format!("pool:{cluster}/{name}"))
    }

    async fn write_kubeconfig(&self, cluster: &str, path: &Path) -> ProviderResult<()> {
        self.record(format!("write_kubeconfig {cluster}")).await;
        std::fs::write(path, "apiVersion: v1\n")?;
        Ok(())
    }

    async fn run_instance(&self, spec: &InstanceSpec) -> ProviderResult<String> {
        let call = format!("run_instance {} {}", spec.image_id, spec.user_data.len());
        Ok(self.create(call, "i").await)
    }

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<Option<String>> {
        let world = self.world();
        Ok(Some(if world.live.contains(instance_id) {
            "running".to_string()
        } else {
            "terminated".to_string()
        }))
    }

    async fn console_output(&self, instance_id: &str) -> ProviderResult<String> {
        self.record(format!("console_output {instance_id}")).await;
        let mut world = self.world();
        world.console_reads += 1;
        let shown = (world.console_reads as usize).min(world.console.len());
        let mut output = world.console[..shown].join("\n");
        output.push('\n');
        Ok(output)
    }

    async fn terminate_instance(&self, instance_id: &str) -> ProviderResult<()> {
        self.record(format!("terminate_instance {instance_id}"))
            .await;
        self.world().remove(instance_id)
    }

    async fn load_balancers_in_vpc(&self, _vpc_id: &str) -> ProviderResult<Vec<LoadBalancerRef>> {
        Ok(self.world().load_balancers.clone())
    }

    async fn delete_load_balancer(&self, load_balancer: &LoadBalancerRef) -> ProviderResult<()> {
        self.record(format!("delete_load_balancer {}", load_balancer.id))
            .await;
        let mut world = self.world();
        world.load_balancers.retain(|lb| lb.id != load_balancer.id);
        Ok(())
    }
}

pub struct FakeWorkloads(Fake);

#[async_trait]
impl WorkloadApi for FakeWorkloads {
    async fn apply(&self, manifest: &str) -> ProviderResult<()> {
        self.0.record("apply".to_string()).await;
        self.0.world().applied.push(manifest.to_string());
        Ok(())
    }

    async fn nodes(&self) -> ProviderResult<Vec<NodeStatus>> {
        let count = self.0.world().node_count;
        Ok((0..count)
            .map(|i| NodeStatus {
                name: format!("node-{i}"),
                ready: true,
            })
            .collect())
    }

    async fn pods(&self) -> ProviderResult<Vec<PodStatus>> {
        let (phase, ready) = if self.0.world().pods_pending {
            ("Pending", 0)
        } else {
            ("Running", 1)
        };
        Ok(vec![
            PodStatus {
                namespace: "kube-system".to_string(),
                name: "coredns".to_string(),
                phase: "Running".to_string(),
                ready_containers: 1,
                total_containers: 1,
            },
            PodStatus {
                namespace: "default".to_string(),
                name: "webapp-standard-1".to_string(),
                phase: phase.to_string(),
                ready_containers: ready,
                total_containers: 1,
            },
            PodStatus {
                namespace: "default".to_string(),
                name: "webapp-caged-1".to_string(),
                phase: phase.to_string(),
                ready_containers: ready,
                total_containers: 1,
            },
        ])
    }

    async fn services(&self) -> ProviderResult<Vec<ServiceInfo>> {
        let withheld = self.0.world().hostnames_withheld;
        Ok(SERVICES
            .iter()
            .map(|name| ServiceInfo {
                namespace: "default".to_string(),
                name: name.to_string(),
                service_type: "LoadBalancer".to_string(),
                annotations: BTreeMap::from([(
                    "benchfleet.io/expose".to_string(),
                    "true".to_string(),
                )]),
                port: Some(80),
                hostname: (!withheld).then(|| format!("{name}.elb.example.com")),
            })
            .collect())
    }

    async fn diagnostics(&self) -> ProviderResult<String> {
        self.0.record("diagnostics".to_string()).await;
        Ok("== pods ==\nwebapp-standard-1 Running\n".to_string())
    }
}

pub struct FakeImages(Fake);

#[async_trait]
impl ImageTool for FakeImages {
    async fn login(&self, registry_host: &str, _password: &str) -> ProviderResult<()> {
        self.0.record(format!("login {registry_host}")).await;
        Ok(())
    }

    async fn build(&self, _context_dir: &Path, tag: &str, build_args: &[(String, String)]) -> ProviderResult<()> {
        let args = build_args
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        self.0.record(format!("build {tag} {args}")).await;
        Ok(())
    }

    async fn run_once(&self, image: &str, _command: &[String]) -> ProviderResult<String> {
        self.0.record(format!("run_once {image}")).await;
        Ok("Python 3.12.1\n".to_string())
    }

    async fn tag(&self, source: &str, target: &str) -> ProviderResult<()> {
        self.0.record(format!("tag {source} {target}")).await;
        Ok(())
    }

    async fn push(&self, image: &str) -> ProviderResult<()> {
        self.0.record(format!("push {image}")).await;
        if let Some((_, tag)) = image.rsplit_once(':') {
            self.0.world().pushed_tags.push(tag.to_string());
        }
        Ok(())
    }
}

/// A run configured against scratch directories with no waiting between polls.
pub struct Scratch {
    pub dir: tempfile::TempDir,
    pub config: RunConfig,
}

impl Scratch {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("manifests")).unwrap();
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(root.join("manifests").join("webapp.yaml"), MANIFEST).unwrap();

        let path = |name: &str| root.join(name).display().to_string();
        let cli = BenchfleetCli::try_parse_from([
            "benchfleet".to_string(),
            "--aws-profile".to_string(),
            "bench".to_string(),
            "--run-id".to_string(),
            "t1".to_string(),
            "--cluster-name-prefix".to_string(),
            "bench".to_string(),
            "--workload-variant".to_string(),
            "webapp".to_string(),
            "--workload-source".to_string(),
            path("app"),
            "--manifest-dir".to_string(),
            path("manifests"),
            "--results-dir".to_string(),
            path("results"),
            "--log-dir".to_string(),
            path("logs"),
            "--work-dir".to_string(),
            path("work"),
            "--no-progress".to_string(),
        ])
        .unwrap();

        let mut config = RunConfig::from_cli(&cli).unwrap();
        config.timings = Timings::immediate();

        Self { dir, config }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.config.results_dir.clone()
    }
}

pub async fn execute_with(fake: &Fake, scratch: &Scratch) -> RunReport {
    execute(&scratch.config, &fake.providers(), &ShutdownHandle::new()).await
}
