//! In-memory test doubles for [`RemoteImage`] and [`RemoteImageFactory`].
//!
//! Fakes hold label/env maps and layer lists directly and rebase by splicing
//! layer lists in memory, so metadata retrieval and rebase orchestration are
//! testable without a live registry. Exported for use by dependent crates'
//! tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use buildplane_core::{BuildError, Result};
use chrono::{DateTime, TimeZone, Utc};

use crate::reference::ImageRef;
use crate::remote::{LayerDescriptor, RemoteImage, RemoteImageFactory};
use crate::sub_image;

/// In-memory [`RemoteImage`].
#[derive(Clone)]
pub struct FakeRemoteImage {
    repository: String,
    digest: String,
    labels: HashMap<String, String>,
    env: HashMap<String, String>,
    created: DateTime<Utc>,
    layers: Vec<LayerDescriptor>,
    writes: Arc<AtomicUsize>,
}

impl FakeRemoteImage {
    pub fn new(repository: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            digest: digest.into(),
            labels: HashMap::new(),
            env: HashMap::new(),
            created: Utc.with_ymd_and_hms(2019, 6, 1, 12, 30, 0).unwrap(),
            layers: Vec::new(),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn with_layer(mut self, digest: impl Into<String>, diff_id: impl Into<String>) -> Self {
        self.layers.push(LayerDescriptor {
            digest: digest.into(),
            diff_id: diff_id.into(),
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
            size: 100,
        });
        self
    }

    /// Number of registry writes this image (and its rebased descendants)
    /// would have performed.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteImage for FakeRemoteImage {
    fn label(&self, key: &str) -> String {
        self.labels.get(key).cloned().unwrap_or_default()
    }

    fn env(&self, key: &str) -> String {
        self.env.get(key).cloned().unwrap_or_default()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created
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
        let base = sub_image::base_layers(&self.repository, &self.layers, top_layer_diff_id)?;
        let app = &self.layers[base.len()..];

        let layers: Vec<LayerDescriptor> =
            new_base.layers().iter().chain(app).cloned().collect();
        let digest = format!(
            "sha256:{:064x}",
            layers.len() as u128 + self.writes.load(Ordering::SeqCst) as u128
        );

        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeRemoteImage {
            repository: self.repository.clone(),
            digest,
            labels: self.labels.clone(),
            env: self.env.clone(),
            created: Utc::now(),
            layers,
            writes: self.writes.clone(),
        }))
    }
}

/// In-memory [`RemoteImageFactory`]: resolves references against registered
/// fakes and records every requested reference.
#[derive(Default)]
pub struct FakeRemoteImageFactory {
    images: HashMap<String, FakeRemoteImage>,
    calls: Mutex<Vec<ImageRef>>,
}

impl FakeRemoteImageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` for references whose image string equals `reference`.
    pub fn register(&mut self, reference: impl Into<String>, image: FakeRemoteImage) {
        self.images.insert(reference.into(), image);
    }

    /// References requested so far, in call order.
    pub fn calls(&self) -> Vec<ImageRef> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl RemoteImageFactory for FakeRemoteImageFactory {
    async fn new_remote(&self, image_ref: &ImageRef) -> Result<Box<dyn RemoteImage>> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(image_ref.clone());
        let image = self.images.get(image_ref.image()).cloned().ok_or_else(|| {
            BuildError::RegistryError {
                repository: image_ref.image().to_string(),
                message: "no fake image registered".to_string(),
            }
        })?;
        Ok(Box::new(image))
    }
}
