/// Error type for the orchestrator's happy path and for anything written against the
/// collaborator traits. Compatible with the failure markers in `benchfleet_core`.
pub type BenchfleetResult<T> = anyhow::Result<T>;

/// An externally reachable URL for one deployed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// The Kubernetes service that exposes it.
    pub service: String,
    /// Which image variant serves it, `standard` or `caged`.
    pub variant: String,
    pub url: String,
}
