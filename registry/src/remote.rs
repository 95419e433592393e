//! Remote image access.
//!
//! A [`RemoteImage`] is a lazily-fetched handle to one image's manifest and
//! config at one point in time: created per call, never cached, never mutated
//! in place. A rebase produces a new handle and leaves the original alone.
//! The registry-backed implementation talks to the registry through the
//! `oci-distribution` client; higher-level logic stays polymorphic over the
//! trait so it is testable against in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use buildplane_core::{BuildError, Result};
use chrono::{DateTime, Utc};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageManifest, OciManifest, IMAGE_CONFIG_MEDIA_TYPE,
    OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::{Client, RegistryOperation};
use sha2::{Digest, Sha256};

use crate::auth::{KeychainFactory, RegistryAuth};
use crate::config::{HistoryEntry, ImageConfig};
use crate::reference::{ImageName, ImageRef};
use crate::sub_image;

/// One layer of an image: the registry blob digest plus the diff ID of the
/// uncompressed contents. Diff IDs are stable across re-compression and are
/// what layers are matched by across images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    /// Content digest of the compressed blob as stored in the registry.
    pub digest: String,
    /// Content digest of the uncompressed layer.
    pub diff_id: String,
    /// Blob media type.
    pub media_type: String,
    /// Blob size in bytes.
    pub size: i64,
}

/// A registry-resident image: config-derived lookups, creation time, content
/// identity, and rebase.
#[async_trait]
pub trait RemoteImage: Send + Sync {
    /// Label value for `key`, or empty string if absent.
    fn label(&self, key: &str) -> String;

    /// First `KEY=VALUE` environment match for `key`, or empty string.
    fn env(&self, key: &str) -> String;

    /// Creation time of the image config, UTC.
    fn created_at(&self) -> DateTime<Utc>;

    /// Canonical `repository@digest` identity. Two images with the same
    /// identifier are the same content regardless of the tag used to reach
    /// them.
    fn identifier(&self) -> String;

    /// Repository name the image was resolved from (no tag or digest).
    fn repository(&self) -> &str;

    /// Layer descriptors, bottom to top.
    fn layers(&self) -> &[LayerDescriptor];

    /// Publish a new image combining this image's application layers (those
    /// above `top_layer_diff_id`) with all of `new_base`'s layers. The result
    /// is written back to this image's repository; this handle is unchanged.
    async fn rebase(
        &self,
        top_layer_diff_id: &str,
        new_base: &dyn RemoteImage,
    ) -> Result<Box<dyn RemoteImage>>;

    /// Registry-backed view of this image, if it has one.
    fn as_registry(&self) -> Option<&RegistryImage> {
        None
    }
}

/// Creates [`RemoteImage`] handles for image references.
#[async_trait]
pub trait RemoteImageFactory: Send + Sync {
    async fn new_remote(&self, image_ref: &ImageRef) -> Result<Box<dyn RemoteImage>>;
}

/// Registry-backed [`RemoteImage`]: an in-memory snapshot of one manifest and
/// config, fetched at construction.
pub struct RegistryImage {
    name: ImageName,
    repository: String,
    digest: String,
    manifest: OciImageManifest,
    config: ImageConfig,
    layers: Vec<LayerDescriptor>,
    client: Client,
    auth: RegistryAuth,
}

impl RegistryImage {
    /// Fetch the manifest and config for `reference` under `auth`.
    pub async fn fetch(reference: &str, auth: RegistryAuth) -> Result<Self> {
        let name = ImageName::parse(reference)?;
        let repository = name.repository_name();
        let oci_ref = name.oci_reference()?;
        let client = new_client();

        let (manifest, digest) = client
            .pull_image_manifest(&oci_ref, &auth.to_oci_auth())
            .await
            .map_err(|e| BuildError::RegistryError {
                repository: repository.clone(),
                message: format!("Failed to pull manifest: {}", e),
            })?;

        let mut config_data: Vec<u8> = Vec::new();
        client
            .pull_blob(&oci_ref, &manifest.config, &mut config_data)
            .await
            .map_err(|e| BuildError::RegistryError {
                repository: repository.clone(),
                message: format!("Failed to pull config blob: {}", e),
            })?;

        let config: ImageConfig =
            serde_json::from_slice(&config_data).map_err(|e| BuildError::MetadataError {
                repository: repository.clone(),
                message: format!("Failed to parse image config: {}", e),
            })?;

        let layers = zip_layers(&repository, &manifest.layers, &config.rootfs.diff_ids)?;

        tracing::debug!(
            repository = %repository,
            digest = %digest,
            layers = layers.len(),
            "Fetched remote image"
        );

        Ok(Self {
            name,
            repository,
            digest,
            manifest,
            config,
            layers,
            client,
            auth,
        })
    }

    /// The fetched image config.
    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Manifest digest at fetch time.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Publish (application layers above the boundary) + (all of `new_base`'s
    /// layers) to this image's repository. Blob pushes happen only for layers
    /// the repository does not already hold; application layer blobs are never
    /// re-uploaded. Fails before any write when the boundary is unknown.
    async fn rebase_onto(
        &self,
        top_layer_diff_id: &str,
        new_base: &RegistryImage,
    ) -> Result<RegistryImage> {
        let base = sub_image::base_layers(&self.repository, &self.layers, top_layer_diff_id)?;
        let base_len = base.len();

        let created = Utc::now();
        let config = rebased_config(&self.config, base_len, &new_base.config, created);
        let config_bytes = serde_json::to_vec(&config)?;
        let config_digest = sha256_digest(&config_bytes);

        let manifest = OciImageManifest {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_MEDIA_TYPE.to_string()),
            config: OciDescriptor {
                media_type: IMAGE_CONFIG_MEDIA_TYPE.to_string(),
                digest: config_digest.clone(),
                size: config_bytes.len() as i64,
                ..Default::default()
            },
            layers: new_base
                .manifest
                .layers
                .iter()
                .chain(self.manifest.layers[base_len..].iter())
                .cloned()
                .collect(),
            ..Default::default()
        };

        tracing::info!(
            repository = %self.repository,
            new_base = %new_base.repository,
            base_layers = base_len,
            app_layers = self.layers.len() - base_len,
            "Rebasing image"
        );

        let oci_ref = self.name.oci_reference()?;
        self.client
            .auth(&oci_ref, &self.auth.to_oci_auth(), RegistryOperation::Push)
            .await
            .map_err(|e| BuildError::AuthenticationError {
                repository: self.repository.clone(),
                message: e.to_string(),
            })?;

        // Copy over base layer blobs the target repository does not hold yet.
        // Application layers are already in this repository by definition.
        let new_base_ref = new_base.name.oci_reference()?;
        for layer in &new_base.manifest.layers {
            if self.manifest.layers.iter().any(|l| l.digest == layer.digest) {
                continue;
            }

            tracing::debug!(digest = %layer.digest, size = layer.size, "Copying base layer");

            let mut data: Vec<u8> = Vec::new();
            new_base
                .client
                .pull_blob(&new_base_ref, layer, &mut data)
                .await
                .map_err(|e| BuildError::RegistryError {
                    repository: new_base.repository.clone(),
                    message: format!("Failed to pull layer {}: {}", layer.digest, e),
                })?;

            self.client
                .push_blob(&oci_ref, &data, &layer.digest)
                .await
                .map_err(|e| BuildError::RegistryError {
                    repository: self.repository.clone(),
                    message: format!("Failed to push layer {}: {}", layer.digest, e),
                })?;
        }

        self.client
            .push_blob(&oci_ref, &config_bytes, &config_digest)
            .await
            .map_err(|e| BuildError::RegistryError {
                repository: self.repository.clone(),
                message: format!("Failed to push config blob: {}", e),
            })?;

        let manifest_bytes = serde_json::to_vec(&manifest)?;
        let manifest_digest = sha256_digest(&manifest_bytes);
        self.client
            .push_manifest(&oci_ref, &OciManifest::Image(manifest.clone()))
            .await
            .map_err(|e| BuildError::RegistryError {
                repository: self.repository.clone(),
                message: format!("Failed to push manifest: {}", e),
            })?;

        tracing::info!(
            repository = %self.repository,
            digest = %manifest_digest,
            "Rebased image published"
        );

        let layers = zip_layers(&self.repository, &manifest.layers, &config.rootfs.diff_ids)?;

        Ok(RegistryImage {
            name: self.name.clone(),
            repository: self.repository.clone(),
            digest: manifest_digest,
            manifest,
            config,
            layers,
            client: new_client(),
            auth: self.auth.clone(),
        })
    }
}

#[async_trait]
impl RemoteImage for RegistryImage {
    fn label(&self, key: &str) -> String {
        self.config.label(key)
    }

    fn env(&self, key: &str) -> String {
        self.config.env(key)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.config.created_at()
    }

    fn identifier(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }

    fn repository(&self) -> &str {
        &self.repository
    }

    fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    async fn rebase(
        &self,
        top_layer_diff_id: &str,
        new_base: &dyn RemoteImage,
    ) -> Result<Box<dyn RemoteImage>> {
        let new_base = new_base.as_registry().ok_or_else(|| {
            BuildError::Other("expected new base to be a registry-backed image".to_string())
        })?;
        let rebased = self.rebase_onto(top_layer_diff_id, new_base).await?;
        Ok(Box::new(rebased))
    }

    fn as_registry(&self) -> Option<&RegistryImage> {
        Some(self)
    }
}

/// [`RemoteImageFactory`] that resolves credentials through a keychain and
/// fetches from the registry. Every reference goes through the keychain;
/// anonymous access is the keychain's decision, not the factory's.
pub struct RegistryImageFactory {
    keychain: Arc<dyn KeychainFactory>,
}

impl RegistryImageFactory {
    pub fn new(keychain: Arc<dyn KeychainFactory>) -> Self {
        Self { keychain }
    }
}

#[async_trait]
impl RemoteImageFactory for RegistryImageFactory {
    async fn new_remote(&self, image_ref: &ImageRef) -> Result<Box<dyn RemoteImage>> {
        let auth = self.keychain.keychain_for(image_ref).await?;
        let image = RegistryImage::fetch(image_ref.image(), auth).await?;
        Ok(Box::new(image))
    }
}

fn new_client() -> Client {
    let config = ClientConfig {
        protocol: ClientProtocol::Https,
        platform_resolver: Some(Box::new(linux_platform_resolver)),
        ..Default::default()
    };
    Client::new(config)
}

/// Platform resolver that selects linux images matching the host architecture.
/// Built images run on linux regardless of where this engine runs.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}

/// Pair manifest layer descriptors with config diff IDs, in order. The two
/// lists describe the same layers and must have the same length.
fn zip_layers(
    repository: &str,
    manifest_layers: &[OciDescriptor],
    diff_ids: &[String],
) -> Result<Vec<LayerDescriptor>> {
    if manifest_layers.len() != diff_ids.len() {
        return Err(BuildError::MetadataError {
            repository: repository.to_string(),
            message: format!(
                "manifest has {} layers but config has {} diff IDs",
                manifest_layers.len(),
                diff_ids.len()
            ),
        });
    }

    Ok(manifest_layers
        .iter()
        .zip(diff_ids)
        .map(|(layer, diff_id)| LayerDescriptor {
            digest: layer.digest.clone(),
            diff_id: diff_id.clone(),
            media_type: layer.media_type.clone(),
            size: layer.size,
        })
        .collect())
}

/// Build the rebased config: the original config (labels, env, everything
/// else) with the base segment of `rootfs.diff_ids` and `history` replaced by
/// the new base's, and a refreshed creation timestamp.
fn rebased_config(
    original: &ImageConfig,
    base_len: usize,
    new_base: &ImageConfig,
    created: DateTime<Utc>,
) -> ImageConfig {
    let mut config = original.clone();

    let app_diff_ids = &original.rootfs.diff_ids[base_len..];
    config.rootfs.diff_ids = new_base
        .rootfs
        .diff_ids
        .iter()
        .chain(app_diff_ids)
        .cloned()
        .collect();

    config.history = spliced_history(original, base_len, new_base);
    config.created = Some(created);
    config
}

/// New history = new base's history followed by the original's application
/// entries. History can only be attributed to layers when its filled entries
/// line up with `rootfs.diff_ids` on both sides; otherwise it is dropped
/// rather than published misaligned.
fn spliced_history(
    original: &ImageConfig,
    base_len: usize,
    new_base: &ImageConfig,
) -> Vec<HistoryEntry> {
    if !history_aligned(original) || !history_aligned(new_base) {
        return Vec::new();
    }

    let app_start = history_index_after(&original.history, base_len);
    new_base
        .history
        .iter()
        .chain(original.history[app_start..].iter())
        .cloned()
        .collect()
}

fn history_aligned(config: &ImageConfig) -> bool {
    config.history.is_empty()
        || config.history.iter().filter(|h| h.fills_layer()).count()
            == config.rootfs.diff_ids.len()
}

/// Index of the first history entry after `filled` layer-filling entries.
fn history_index_after(history: &[HistoryEntry], filled: usize) -> usize {
    if filled == 0 {
        return 0;
    }
    let mut seen = 0;
    for (i, entry) in history.iter().enumerate() {
        if entry.fills_layer() {
            seen += 1;
            if seen == filled {
                return i + 1;
            }
        }
    }
    history.len()
}

fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}
