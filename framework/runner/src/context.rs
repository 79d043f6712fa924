use std::future::Future;

use benchfleet_core::prelude::{DelegatedShutdownListener, InterruptedError};
use benchfleet_providers::prelude::{CallerIdentity, Tag};
use benchfleet_summary_model::ImagePair;
use chrono::{DateTime, Utc};

use crate::registry::Registry;
use crate::types::Endpoint;

/// Tag key carrying the run id on every created cloud object.
pub const RUN_ID_TAG: &str = "benchfleet:run-id";

/// Where a run is. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
pub enum RunPhase {
    Preflight,
    Provisioning,
    PublishingImages,
    BuildingCluster,
    Deploying,
    Dispatching,
    Monitoring,
    Complete,
    TearingDown,
}

/// The published images and the runtime version they were tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedImages {
    pub version: String,
    pub images: ImagePair,
}

/// The single owner of everything a run creates and learns.
///
/// Components receive it mutably on the happy path. Teardown reads it to find what to delete, and
/// only changes handle states through the [Registry].
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    name_prefix: String,
    started_at: DateTime<Utc>,
    phase: RunPhase,
    registry: Registry,
    identity: Option<CallerIdentity>,
    repository_uri: Option<String>,
    published: Option<PublishedImages>,
    endpoints: Vec<Endpoint>,
    shutdown: Option<DelegatedShutdownListener>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, name_prefix: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            name_prefix: name_prefix.into(),
            started_at: Utc::now(),
            phase: RunPhase::Preflight,
            registry: Registry::new(),
            identity: None,
            repository_uri: None,
            published: None,
            endpoints: Vec::new(),
            shutdown: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to `next`. Requests to move backwards are ignored.
    pub fn advance(&mut self, next: RunPhase) {
        if next > self.phase {
            log::info!("Run {} entering phase {next}", self.run_id);
            self.phase = next;
        }
    }

    /// Observe `listener` at the run's safe points. Without one the run is never interrupted.
    pub fn listen_for_shutdown(&mut self, listener: DelegatedShutdownListener) {
        self.shutdown = Some(listener);
    }

    /// Fails with [InterruptedError] once a shutdown has been requested.
    ///
    /// Components call this after registering each object they create, so an interrupt never lands
    /// between a create being accepted and its handle being recorded.
    pub fn check_interrupted(&mut self) -> anyhow::Result<()> {
        let requested = self
            .shutdown
            .as_mut()
            .is_some_and(|listener| listener.should_shutdown());
        if requested {
            log::warn!("Shutdown requested during {}", self.phase);
            return Err(InterruptedError::default().into());
        }

        Ok(())
    }

    /// Wait on `work`, abandoning it with [InterruptedError] if a shutdown is requested first.
    ///
    /// `work` must not create anything: polls and reads only.
    pub async fn interruptible<T>(
        &mut self,
        work: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let Some(listener) = self.shutdown.as_mut() else {
            return work.await;
        };
        match listener.unless_shutdown(work).await {
            Some(result) => result,
            None => {
                log::warn!("Shutdown requested while waiting during {}", self.phase);
                Err(InterruptedError::default().into())
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// A resource name unique to this run.
    pub fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}-{suffix}", self.name_prefix, self.run_id)
    }

    pub fn cluster_name(&self) -> String {
        self.resource_name("cluster")
    }

    pub fn node_pool_name(&self) -> String {
        self.resource_name("nodes")
    }

    pub fn cluster_role_name(&self) -> String {
        self.resource_name("cluster-role")
    }

    pub fn node_role_name(&self) -> String {
        self.resource_name("node-role")
    }

    /// Tags for a new object called `name`.
    pub fn tags(&self, name: &str) -> Vec<Tag> {
        vec![Tag::new(RUN_ID_TAG, &self.run_id), Tag::new("Name", name)]
    }

    pub fn set_identity(&mut self, identity: CallerIdentity) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> Option<&CallerIdentity> {
        self.identity.as_ref()
    }

    pub fn role_arn(&self, role_name: &str) -> Option<String> {
        self.identity
            .as_ref()
            .map(|id| format!("arn:aws:iam::{}:role/{role_name}", id.account_id))
    }

    pub fn set_repository_uri(&mut self, uri: String) {
        self.repository_uri = Some(uri);
    }

    pub fn repository_uri(&self) -> Option<&str> {
        self.repository_uri.as_deref()
    }

    pub fn set_published(&mut self, published: PublishedImages) {
        self.published = Some(published);
    }

    pub fn published(&self) -> Option<&PublishedImages> {
        self.published.as_ref()
    }

    pub fn set_endpoints(&mut self, endpoints: Vec<Endpoint>) {
        self.endpoints = endpoints;
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}
