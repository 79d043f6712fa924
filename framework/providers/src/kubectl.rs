use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::command::ToolCommand;
use crate::error::ProviderResult;
use crate::workload::{NodeStatus, PodStatus, ServiceInfo, WorkloadApi};

/// Log lines fetched per pod for diagnostics.
const DIAGNOSTIC_LOG_TAIL: &str = "--tail=200";

/// [WorkloadApi] backed by `kubectl`, always pointed at an explicit kubeconfig.
#[derive(Debug, Clone)]
pub struct Kubectl {
    cmd: ToolCommand,
    kubeconfig: PathBuf,
}

impl Kubectl {
    /// The kubeconfig file does not need to exist until the first call.
    pub fn new(program: PathBuf, kubeconfig: &Path) -> Self {
        Self {
            cmd: ToolCommand::new(program)
                .with_base_args(["--kubeconfig".to_string(), kubeconfig.display().to_string()]),
            kubeconfig: kubeconfig.to_path_buf(),
        }
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    async fn section(&self, out: &mut String, title: &str, args: &[&str]) {
        out.push_str(&format!("===== {title} =====\n"));
        match self.cmd.output(args, None).await {
            Ok(text) => out.push_str(&text),
            Err(e) => out.push_str(&format!("<failed: {e}>\n")),
        }
        out.push('\n');
    }
}

fn items(doc: &Value) -> &[Value] {
    doc.get("items")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

pub(crate) fn parse_nodes(doc: &Value) -> Vec<NodeStatus> {
    items(doc)
        .iter()
        .map(|node| {
            let ready = node
                .pointer("/status/conditions")
                .and_then(|c| c.as_array())
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c.get("type").and_then(|t| t.as_str()) == Some("Ready")
                            && c.get("status").and_then(|s| s.as_str()) == Some("True")
                    })
                })
                .unwrap_or(false);
            NodeStatus {
                name: str_at(node, "/metadata/name").to_string(),
                ready,
            }
        })
        .collect()
}

pub(crate) fn parse_pods(doc: &Value) -> Vec<PodStatus> {
    items(doc)
        .iter()
        .map(|pod| {
            let total_containers = pod
                .pointer("/spec/containers")
                .and_then(|c| c.as_array())
                .map(Vec::len)
                .unwrap_or(0);
            let ready_containers = pod
                .pointer("/status/containerStatuses")
                .and_then(|c| c.as_array())
                .map(|statuses| {
                    statuses
                        .iter()
                        .filter(|s| s.get("ready").and_then(|r| r.as_bool()) == Some(true))
                        .count()
                })
                .unwrap_or(0);
            PodStatus {
                namespace: str_at(pod, "/metadata/namespace").to_string(),
                name: str_at(pod, "/metadata/name").to_string(),
                phase: str_at(pod, "/status/phase").to_string(),
                ready_containers,
                total_containers,
            }
        })
        .collect()
}

pub(crate) fn parse_services(doc: &Value) -> Vec<ServiceInfo> {
    items(doc)
        .iter()
        .map(|svc| {
            let annotations = svc
                .pointer("/metadata/annotations")
                .and_then(|a| a.as_object())
                .map(|a| {
                    a.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default();
            let port = svc
                .pointer("/spec/ports/0/port")
                .and_then(|p| p.as_u64())
                .and_then(|p| u16::try_from(p).ok());
            let ingress = svc.pointer("/status/loadBalancer/ingress/0");
            let hostname = ingress
                .and_then(|i| i.get("hostname").or_else(|| i.get("ip")))
                .and_then(|h| h.as_str())
                .filter(|h| !h.is_empty())
                .map(str::to_string);

            ServiceInfo {
                namespace: str_at(svc, "/metadata/namespace").to_string(),
                name: str_at(svc, "/metadata/name").to_string(),
                service_type: str_at(svc, "/spec/type").to_string(),
                annotations,
                port,
                hostname,
            }
        })
        .collect()
}

#[async_trait]
impl WorkloadApi for Kubectl {
    async fn apply(&self, manifest: &str) -> ProviderResult<()> {
        let out = self
            .cmd
            .output(&["apply", "-f", "-"], Some(manifest.as_bytes()))
            .await?;
        for line in out.lines() {
            log::info!("kubectl: {line}");
        }
        Ok(())
    }

    async fn nodes(&self) -> ProviderResult<Vec<NodeStatus>> {
        let doc = self.cmd.json(&["get", "nodes", "-o", "json"]).await?;
        Ok(parse_nodes(&doc))
    }

    async fn pods(&self) -> ProviderResult<Vec<PodStatus>> {
        let doc = self
            .cmd
            .json(&["get", "pods", "--all-namespaces", "-o", "json"])
            .await?;
        Ok(parse_pods(&doc))
    }

    async fn services(&self) -> ProviderResult<Vec<ServiceInfo>> {
        let doc = self
            .cmd
            .json(&["get", "services", "--all-namespaces", "-o", "json"])
            .await?;
        Ok(parse_services(&doc))
    }

    async fn diagnostics(&self) -> ProviderResult<String> {
        let mut out = String::new();
        self.section(&mut out, "nodes", &["get", "nodes", "-o", "wide"])
            .await;
        self.section(&mut out, "pods", &["get", "pods", "--all-namespaces", "-o", "wide"])
            .await;
        self.section(&mut out, "pod descriptions", &["describe", "pods", "--all-namespaces"])
            .await;
        self.section(
            &mut out,
            "events",
            &["get", "events", "--all-namespaces", "--sort-by=.lastTimestamp"],
        )
        .await;
        self.section(&mut out, "node usage", &["top", "nodes"]).await;
        self.section(&mut out, "pod usage", &["top", "pods", "--all-namespaces"])
            .await;

        // Pod listing can fail if the control plane is gone, the sections above already say so.
        let pods = self.pods().await.unwrap_or_default();
        for pod in pods.iter().filter(|p| !p.is_system()) {
            let title = format!("logs {}/{}", pod.namespace, pod.name);
            self.section(
                &mut out,
                &title,
                &[
                    "logs",
                    "--namespace",
                    pod.namespace.as_str(),
                    pod.name.as_str(),
                    "--all-containers",
                    DIAGNOSTIC_LOG_TAIL,
                ],
            )
            .await;
        }

        Ok(out)
    }
}
