use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::error::ProviderResult;
use crate::image::ImageTool;

/// [ImageTool] backed by the `docker` command line tool.
#[derive(Debug, Clone)]
pub struct Docker {
    cmd: ToolCommand,
}

impl Docker {
    pub fn new(program: PathBuf) -> Self {
        Self {
            cmd: ToolCommand::new(program),
        }
    }
}

#[async_trait]
impl ImageTool for Docker {
    async fn login(&self, registry_host: &str, password: &str) -> ProviderResult<()> {
        self.cmd
            .output(
                &["login", "--username", "AWS", "--password-stdin", registry_host],
                Some(password.as_bytes()),
            )
            .await
            .map(|_| ())
    }

    async fn build(
        &self,
        context_dir: &Path,
        tag: &str,
        build_args: &[(String, String)],
    ) -> ProviderResult<()> {
        let build_args = build_args
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();
        let context = context_dir.display().to_string();

        let mut args = vec!["build", "--tag", tag];
        for arg in &build_args {
            args.extend(["--build-arg", arg.as_str()]);
        }
        args.push(context.as_str());

        let out = self.cmd.output(&args, None).await?;
        log::debug!("docker build {tag}: {out}");
        Ok(())
    }

    async fn run_once(&self, image: &str, command: &[String]) -> ProviderResult<String> {
        let mut args = vec!["run", "--rm", image];
        args.extend(command.iter().map(String::as_str));
        self.cmd.output(&args, None).await
    }

    async fn tag(&self, source: &str, target: &str) -> ProviderResult<()> {
        self.cmd
            .output(&["tag", source, target], None)
            .await
            .map(|_| ())
    }

    async fn push(&self, image: &str) -> ProviderResult<()> {
        let out = self.cmd.output(&["push", image], None).await?;
        log::debug!("docker push {image}: {out}");
        Ok(())
    }
}
