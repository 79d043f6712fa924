use std::path::Path;

use async_trait::async_trait;

use crate::error::ProviderResult;

/// A local container build and push tool.
#[async_trait]
pub trait ImageTool: Send + Sync {
    async fn login(&self, registry_host: &str, password: &str) -> ProviderResult<()>;
    async fn build(
        &self,
        context_dir: &Path,
        tag: &str,
        build_args: &[(String, String)],
    ) -> ProviderResult<()>;
    /// Run the image once, removing the container afterwards, and return its stdout.
    async fn run_once(&self, image: &str, command: &[String]) -> ProviderResult<String>;
    async fn tag(&self, source: &str, target: &str) -> ProviderResult<()>;
    async fn push(&self, image: &str) -> ProviderResult<()>;
}
