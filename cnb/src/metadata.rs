//! Buildpack metadata labels.
//!
//! Builders and built images carry structured build provenance as JSON
//! payloads in well-known config labels. The label keys and their shapes are
//! a compatibility contract with the buildpack lifecycle that produces the
//! images; changing either is a breaking change. Payloads parse strictly: a
//! missing or malformed label is a structural failure, never a partial
//! result.

use std::sync::Arc;

use buildplane_core::{BuildError, Result};
use buildplane_registry::{ImageRef, RemoteImage, RemoteImageFactory};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Label carrying [`BuilderImageMetadata`] on builder images.
pub const BUILDER_METADATA_LABEL: &str = "io.buildpacks.builder.metadata";

/// Label carrying [`BuildMetadata`] on built images.
pub const BUILD_METADATA_LABEL: &str = "io.buildpacks.build.metadata";

/// Label carrying [`LayersMetadata`] on built images.
pub const LIFECYCLE_METADATA_LABEL: &str = "io.buildpacks.lifecycle.metadata";

/// One buildpack identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackMetadata {
    pub id: String,
    pub version: String,
}

/// Payload of the builder-metadata label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderImageMetadata {
    pub buildpacks: Vec<BuildpackMetadata>,
    pub stack: StackMetadata,
}

/// Stack descriptor: names the run image repository (a mutable tag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackMetadata {
    #[serde(rename = "runImage")]
    pub run_image: StackRunImage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRunImage {
    pub image: String,
}

/// Payload of the build-metadata label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub buildpacks: Vec<BuildpackMetadata>,
}

/// Payload of the lifecycle-metadata label: the run image actually used,
/// recorded by exact digest and top-layer diff ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayersMetadata {
    #[serde(rename = "runImage")]
    pub run_image: RunImageMetadata,
    pub stack: StackMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunImageMetadata {
    /// Diff ID of the run image's last layer in the built image.
    #[serde(rename = "topLayer", default)]
    pub top_layer: String,
    /// Digest-pinned reference of the run image used at build time.
    #[serde(default)]
    pub reference: String,
}

/// Structured view of a builder image.
#[derive(Debug, Clone)]
pub struct BuilderImage {
    /// Buildpacks bundled in the builder, in order.
    pub buildpack_metadata: Vec<BuildpackMetadata>,
    /// `repository@digest` of the builder's current run image.
    pub run_image: String,
    /// `repository@digest` of the builder itself.
    pub identifier: String,
}

/// The authoritative record of a previously produced output image.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    /// `repository@digest` of the built image.
    pub identifier: String,
    /// When the image was produced.
    pub completed_at: DateTime<Utc>,
    /// Buildpacks actually used, in order.
    pub buildpack_metadata: Vec<BuildpackMetadata>,
    /// Canonical run image reference: repository from the stack descriptor,
    /// digest from the lifecycle metadata.
    pub run_image: String,
}

/// Reads builder and built-image metadata out of registry image labels.
/// Read-only and idempotent: repeated calls against an unchanged image return
/// identical results.
pub struct RemoteMetadataRetriever {
    factory: Arc<dyn RemoteImageFactory>,
}

impl RemoteMetadataRetriever {
    pub fn new(factory: Arc<dyn RemoteImageFactory>) -> Self {
        Self { factory }
    }

    /// Extract builder metadata from `builder_ref` and resolve the run image
    /// it names. Run images are publicly pullable and resolved without
    /// credentials.
    pub async fn get_builder_image(&self, builder_ref: &ImageRef) -> Result<BuilderImage> {
        let image = self.factory.new_remote(builder_ref).await?;
        let metadata: BuilderImageMetadata = parse_label(image.as_ref(), BUILDER_METADATA_LABEL)?;
        let identifier = image.identifier();

        let run_ref = ImageRef::no_auth(&metadata.stack.run_image.image);
        let run_image = self.factory.new_remote(&run_ref).await?;

        tracing::debug!(
            builder = %identifier,
            run_image = %run_image.identifier(),
            buildpacks = metadata.buildpacks.len(),
            "Retrieved builder image metadata"
        );

        Ok(BuilderImage {
            buildpack_metadata: metadata.buildpacks,
            run_image: run_image.identifier(),
            identifier,
        })
    }

    /// Extract the build record from a previously built image.
    pub async fn get_built_image(&self, image_ref: &ImageRef) -> Result<BuiltImage> {
        let image = self.factory.new_remote(image_ref).await?;
        read_built_image(image.as_ref())
    }
}

/// Read a [`BuiltImage`] from an image's build- and lifecycle-metadata labels.
pub(crate) fn read_built_image(image: &dyn RemoteImage) -> Result<BuiltImage> {
    let build_metadata: BuildMetadata = parse_label(image, BUILD_METADATA_LABEL)?;
    let layers_metadata: LayersMetadata = parse_label(image, LIFECYCLE_METADATA_LABEL)?;

    let run_image = canonical_run_image(image.repository(), &layers_metadata)?;

    Ok(BuiltImage {
        identifier: image.identifier(),
        completed_at: image.created_at(),
        buildpack_metadata: build_metadata.buildpacks,
        run_image,
    })
}

/// The canonical run image reference combines the repository named by the
/// stack descriptor (a mutable tag, human-identifiable) with the exact digest
/// the lifecycle recorded. The combination is both readable and
/// content-precise.
fn canonical_run_image(repository: &str, metadata: &LayersMetadata) -> Result<String> {
    let stack_image = &metadata.stack.run_image.image;
    if stack_image.is_empty() {
        return Err(BuildError::MetadataError {
            repository: repository.to_string(),
            message: "lifecycle metadata does not name a stack run image".to_string(),
        });
    }

    let run_repository = stack_image
        .split(':')
        .next()
        .unwrap_or(stack_image.as_str());

    let digest = metadata
        .run_image
        .reference
        .split_once('@')
        .map(|(_, digest)| digest)
        .ok_or_else(|| BuildError::MetadataError {
            repository: repository.to_string(),
            message: format!(
                "run image reference '{}' has no digest",
                metadata.run_image.reference
            ),
        })?;

    Ok(format!("{}@{}", run_repository, digest))
}

/// Parse a required label's JSON payload. An absent label and a malformed
/// payload are both structural failures carrying the image's repository.
pub(crate) fn parse_label<T: DeserializeOwned>(image: &dyn RemoteImage, key: &str) -> Result<T> {
    let payload = image.label(key);
    if payload.is_empty() {
        return Err(BuildError::MetadataError {
            repository: image.repository().to_string(),
            message: format!("label '{}' not present", key),
        });
    }

    serde_json::from_str(&payload).map_err(|e| BuildError::MetadataError {
        repository: image.repository().to_string(),
        message: format!("unsupported '{}' structure: {}", key, e),
    })
}
