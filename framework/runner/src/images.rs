use std::sync::LazyLock;

use anyhow::Context;
use benchfleet_core::prelude::{poll, Poll, ProvisioningError};
use benchfleet_providers::prelude::{CloudApi, ImageTool};
use benchfleet_summary_model::ImagePair;
use regex::Regex;

use crate::config::{RunConfig, Timings};
use crate::context::{PublishedImages, RunContext, RunPhase};

/// Build argument that selects the base image of the workload's Dockerfile.
pub const BASE_IMAGE_ARG: &str = "BASE_IMAGE";

static VERSION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+(?:\.\d+)?(?:[a-z]+\d*)?").ok());
static TAG_UNSAFE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").ok());

/// Builds, pushes and verifies the `standard` and `caged` images.
pub struct ImagePublisher<'a> {
    cloud: &'a dyn CloudApi,
    images: &'a dyn ImageTool,
    config: &'a RunConfig,
    timings: &'a Timings,
}

impl<'a> ImagePublisher<'a> {
    pub fn new(
        cloud: &'a dyn CloudApi,
        images: &'a dyn ImageTool,
        config: &'a RunConfig,
        timings: &'a Timings,
    ) -> Self {
        Self {
            cloud,
            images,
            config,
            timings,
        }
    }

    pub async fn publish(&self, ctx: &mut RunContext) -> anyhow::Result<()> {
        ctx.advance(RunPhase::PublishingImages);
        let repository_uri = ctx
            .repository_uri()
            .ok_or_else(|| ProvisioningError::new("images", "no repository to push to"))?
            .to_string();

        let local_tag = format!("benchfleet-local:{}-standard", ctx.run_id());

        // Nothing here creates a cloud object, so an interrupt may cut it short.
        let published = ctx.interruptible(self.build_and_push(&local_tag, &repository_uri)).await?;
        ctx.set_published(published);

        Ok(())
    }

    async fn build_and_push(
        &self,
        local_tag: &str,
        repository_uri: &str,
    ) -> anyhow::Result<PublishedImages> {
        self.build(local_tag, &self.config.standard_base_image).await?;
        let version = self.read_version(local_tag).await?;
        log::info!("Workload runtime version is {version}");

        let images = image_pair(repository_uri, &version);
        self.images
            .tag(local_tag, &images.standard)
            .await
            .context(ProvisioningError::new("images", "tagging baseline image failed"))?;
        self.build(&images.caged, &self.config.caged_base_image).await?;

        self.login(repository_uri).await?;
        for image in [&images.standard, &images.caged] {
            self.images
                .push(image)
                .await
                .context(ProvisioningError::new("images", format!("push of {image} failed")))?;
            log::info!("Pushed {image}");
        }

        self.verify(&images).await?;
        Ok(PublishedImages { version, images })
    }

    async fn build(&self, tag: &str, base_image: &str) -> anyhow::Result<()> {
        log::info!("Building {tag} from {base_image}");
        self.images
            .build(
                &self.config.workload_source,
                tag,
                &[(BASE_IMAGE_ARG.to_string(), base_image.to_string())],
            )
            .await
            .context(ProvisioningError::new("images", format!("build of {tag} failed")))
    }

    async fn read_version(&self, image: &str) -> anyhow::Result<String> {
        let output = self
            .images
            .run_once(image, &self.config.version_command)
            .await
            .context(ProvisioningError::new("images", "running the baseline image failed"))?;

        parse_version(&output).ok_or_else(|| {
            ProvisioningError::new(
                "images",
                format!(
                    "no version in output of {:?}: {}",
                    self.config.version_command,
                    output.trim()
                ),
            )
            .into()
        })
    }

    async fn login(&self, repository_uri: &str) -> anyhow::Result<()> {
        let password = self
            .cloud
            .registry_password()
            .await
            .context(ProvisioningError::new("images", "could not get a registry password"))?;
        self.images
            .login(registry_host(repository_uri), &password)
            .await
            .context(ProvisioningError::new("images", "registry login failed"))
    }

    /// A successful push does not mean the registry lists the tag yet.
    async fn verify(&self, images: &ImagePair) -> anyhow::Result<()> {
        let wanted = [tag_of(&images.standard), tag_of(&images.caged)];
        let repository = &self.config.repository_name;

        poll(&format!("images in {repository}"), self.timings.image_visible, |_| async move {
            let tags = self.cloud.image_tags(repository).await?;
            let missing = wanted
                .iter()
                .filter(|w| !tags.iter().any(|t| t == *w))
                .copied()
                .collect::<Vec<_>>();
            Ok(if missing.is_empty() {
                Poll::Ready(())
            } else {
                Poll::Pending(format!("missing tags {}", missing.join(", ")))
            })
        })
        .await
        .context(ProvisioningError::new(
            "images",
            "pushed images never became visible in the registry",
        ))
    }
}

/// The first version-looking token in `output`, e.g. `3.12.1` from `Python 3.12.1`.
pub fn parse_version(output: &str) -> Option<String> {
    VERSION_PATTERN
        .as_ref()?
        .find(output)
        .map(|m| m.as_str().to_string())
}

pub fn image_pair(repository_uri: &str, version: &str) -> ImagePair {
    let version = sanitize_tag(version);
    ImagePair {
        standard: format!("{repository_uri}:{version}-standard"),
        caged: format!("{repository_uri}:{version}-caged"),
    }
}

fn sanitize_tag(tag: &str) -> String {
    match TAG_UNSAFE.as_ref() {
        Some(re) => re.replace_all(tag, "-").into_owned(),
        None => tag.to_string(),
    }
}

/// `host` from `host/path/repo`.
pub fn registry_host(repository_uri: &str) -> &str {
    repository_uri
        .split_once('/')
        .map_or(repository_uri, |(host, _)| host)
}

/// `tag` from `host/repo:tag`.
fn tag_of(image: &str) -> &str {
    image.rsplit_once(':').map_or(image, |(_, tag)| tag)
}
