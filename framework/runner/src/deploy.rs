use std::collections::BTreeMap;

use anyhow::Context;
use benchfleet_core::prelude::{poll, Poll, PollError, ProvisioningError};
use benchfleet_providers::prelude::{PodStatus, ServiceInfo, WorkloadApi};
use serde::Deserialize;

use crate::config::{RunConfig, Timings};
use crate::context::{RunContext, RunPhase};
use crate::types::Endpoint;

pub const STANDARD_IMAGE_PLACEHOLDER: &str = "{{STANDARD_IMAGE}}";
pub const CAGED_IMAGE_PLACEHOLDER: &str = "{{CAGED_IMAGE}}";

/// Set to `"true"` on a `LoadBalancer` service to make it a load test target.
pub const EXPOSE_ANNOTATION: &str = "benchfleet.io/expose";
/// `standard` or `caged`. Guessed from the service name when absent.
pub const VARIANT_ANNOTATION: &str = "benchfleet.io/variant";
/// Request path appended to the endpoint URL, `/` when absent.
pub const PATH_ANNOTATION: &str = "benchfleet.io/path";

const LOAD_BALANCER: &str = "LoadBalancer";
const DEFAULT_NAMESPACE: &str = "default";

/// A service the manifest asks to be exposed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpectedService {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    kind: Option<String>,
    metadata: Option<ManifestMetadata>,
    spec: Option<ManifestSpec>,
}

#[derive(Debug, Deserialize)]
struct ManifestMetadata {
    name: String,
    namespace: Option<String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ManifestSpec {
    #[serde(rename = "type")]
    service_type: Option<String>,
}

/// Substitute both image references into the manifest. Both placeholders must be present.
pub fn render_manifest(template: &str, standard: &str, caged: &str) -> anyhow::Result<String> {
    for placeholder in [STANDARD_IMAGE_PLACEHOLDER, CAGED_IMAGE_PLACEHOLDER] {
        if !template.contains(placeholder) {
            anyhow::bail!("manifest does not reference {placeholder}");
        }
    }

    Ok(template
        .replace(STANDARD_IMAGE_PLACEHOLDER, standard)
        .replace(CAGED_IMAGE_PLACEHOLDER, caged))
}

/// Exposed `LoadBalancer` services declared across all documents of a manifest.
pub fn expected_services(manifest: &str) -> anyhow::Result<Vec<ExpectedService>> {
    let mut expected = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let doc = Option::<ManifestDocument>::deserialize(document)
            .context("manifest is not valid YAML")?;
        let Some(ManifestDocument {
            kind: Some(kind),
            metadata: Some(metadata),
            spec,
        }) = doc
        else {
            continue;
        };

        let is_load_balancer = spec
            .and_then(|s| s.service_type)
            .is_some_and(|t| t == LOAD_BALANCER);
        if kind == "Service" && is_load_balancer && is_exposed(&metadata.annotations) {
            expected.push(ExpectedService {
                namespace: metadata
                    .namespace
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
                name: metadata.name,
            });
        }
    }

    Ok(expected)
}

fn is_exposed(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(EXPOSE_ANNOTATION)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Live services that are exposed load balancers.
pub fn exposed_services(services: &[ServiceInfo]) -> Vec<ExpectedService> {
    services
        .iter()
        .filter(|s| s.service_type == LOAD_BALANCER && is_exposed(&s.annotations))
        .map(|s| ExpectedService {
            namespace: s.namespace.clone(),
            name: s.name.clone(),
        })
        .collect()
}

pub fn endpoint_for(service: &ServiceInfo, hostname: &str) -> Endpoint {
    let variant = service
        .annotations
        .get(VARIANT_ANNOTATION)
        .cloned()
        .unwrap_or_else(|| {
            if service.name.contains("caged") {
                "caged".to_string()
            } else {
                "standard".to_string()
            }
        });
    let path = service
        .annotations
        .get(PATH_ANNOTATION)
        .map(String::as_str)
        .unwrap_or("/");
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    Endpoint {
        service: service.name.clone(),
        variant,
        url: format!("http://{hostname}:{}{path}", service.port.unwrap_or(80)),
    }
}

/// Readiness of the non-system pods: `None` when there is nothing to wait on yet.
fn pod_readiness(pods: &[PodStatus]) -> Option<(usize, usize)> {
    let workload = pods.iter().filter(|p| !p.is_system()).collect::<Vec<_>>();
    if workload.is_empty() {
        return None;
    }
    let ready = workload.iter().filter(|p| p.is_ready()).count();
    Some((ready, workload.len()))
}

fn pod_summary(pods: &[PodStatus]) -> String {
    pods.iter()
        .filter(|p| !p.is_system())
        .map(|p| {
            format!(
                "{}/{} {} {}/{}",
                p.namespace, p.name, p.phase, p.ready_containers, p.total_containers
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Applies the templated manifest, waits for the workload, and finds its endpoints.
pub struct DeploymentDriver<'a> {
    workloads: &'a dyn WorkloadApi,
    config: &'a RunConfig,
    timings: &'a Timings,
}

impl<'a> DeploymentDriver<'a> {
    pub fn new(
        workloads: &'a dyn WorkloadApi,
        config: &'a RunConfig,
        timings: &'a Timings,
    ) -> Self {
        Self {
            workloads,
            config,
            timings,
        }
    }

    pub async fn deploy(&self, ctx: &mut RunContext) -> anyhow::Result<()> {
        ctx.advance(RunPhase::Deploying);
        let published = ctx
            .published()
            .ok_or_else(|| ProvisioningError::new("deploy", "no published images"))?;

        let path = self.config.manifest_path();
        let template = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))
            .context(ProvisioningError::new("deploy", "manifest unreadable"))?;
        let manifest = render_manifest(
            &template,
            &published.images.standard,
            &published.images.caged,
        )
        .context(ProvisioningError::new("deploy", "manifest templating failed"))?;
        let declared = expected_services(&manifest)
            .context(ProvisioningError::new("deploy", "manifest could not be parsed"))?;

        self.workloads
            .apply(&manifest)
            .await
            .context(ProvisioningError::new("deploy", "apply failed"))?;
        log::info!("Applied manifest {}", path.display());
        ctx.check_interrupted()?;

        ctx.interruptible(self.wait_for_pods()).await?;
        let endpoints = ctx.interruptible(self.discover_endpoints(declared)).await?;
        for endpoint in &endpoints {
            log::info!("Endpoint {} ({}) at {}", endpoint.service, endpoint.variant, endpoint.url);
        }
        ctx.set_endpoints(endpoints);

        Ok(())
    }

    async fn wait_for_pods(&self) -> anyhow::Result<()> {
        let dump_every = self.timings.pod_status_dump_every.max(1);
        let result = poll("workload pods", self.timings.pods_ready, |attempt| async move {
            let pods = match self.workloads.pods().await {
                Ok(pods) => pods,
                Err(e) => return Ok(Poll::Pending(format!("could not list pods: {e}"))),
            };
            match pod_readiness(&pods) {
                None => Ok(Poll::Pending("no workload pods yet".to_string())),
                Some((ready, total)) if ready == total => Ok(Poll::Ready(total)),
                Some((ready, total)) => {
                    if attempt % dump_every == 0 {
                        log::info!("{ready}/{total} pods ready:\n{}", pod_summary(&pods));
                    }
                    Ok(Poll::Pending(format!("{ready}/{total} pods ready")))
                }
            }
        })
        .await;

        match result {
            Ok(total) => {
                log::info!("All {total} workload pods are ready");
                Ok(())
            }
            Err(e) => {
                self.dump_pod_state().await;
                Err(e).context(ProvisioningError::new("deploy", "pods never became ready"))
            }
        }
    }

    async fn dump_pod_state(&self) {
        match self.workloads.diagnostics().await {
            Ok(diagnostics) => log::error!("Workload state at timeout:\n{diagnostics}"),
            Err(e) => log::error!("Could not collect workload state: {e}"),
        }
    }

    /// The declared services plus any live service carrying the expose annotation, each polled
    /// until its load balancer has a hostname.
    async fn discover_endpoints(
        &self,
        mut expected: Vec<ExpectedService>,
    ) -> anyhow::Result<Vec<Endpoint>> {
        let live = self
            .workloads
            .services()
            .await
            .context(ProvisioningError::new("endpoints", "could not list services"))?;
        expected.extend(exposed_services(&live));
        expected.sort();
        expected.dedup();

        if expected.is_empty() {
            return Err(ProvisioningError::new(
                "endpoints",
                format!("no LoadBalancer service is annotated {EXPOSE_ANNOTATION}: \"true\""),
            )
            .into());
        }

        let mut endpoints = Vec::with_capacity(expected.len());
        for service in &expected {
            endpoints.push(self.wait_for_hostname(service).await?);
        }

        Ok(endpoints)
    }

    async fn wait_for_hostname(&self, expected: &ExpectedService) -> anyhow::Result<Endpoint> {
        let what = format!("hostname for {}/{}", expected.namespace, expected.name);
        poll(&what, self.timings.service_hostname, |_| async move {
            let services = match self.workloads.services().await {
                Ok(services) => services,
                Err(e) => return Ok(Poll::Pending(format!("could not list services: {e}"))),
            };
            let service = services
                .iter()
                .find(|s| s.namespace == expected.namespace && s.name == expected.name);
            Ok(match service {
                None => Poll::Pending("service not created yet".to_string()),
                Some(s) => match s.hostname.as_deref() {
                    Some(host) if !host.is_empty() => Poll::Ready(endpoint_for(s, host)),
                    _ => Poll::Pending("load balancer pending".to_string()),
                },
            })
        })
        .await
        .map_err(|e: PollError| {
            anyhow::Error::new(e).context(ProvisioningError::new(
                "endpoints",
                format!("{}/{} never got a hostname", expected.namespace, expected.name),
            ))
        })
    }
}
