//! Rebase orchestration.
//!
//! One logical operation with two input modes: the caller either supplies the
//! boundary diff ID directly, or supplies the old base image and the boundary
//! is derived as that base's own top layer. Both modes resolve each reference
//! under its own credential and produce the same result for the same logical
//! rebase.

use std::sync::Arc;

use buildplane_core::{BuildError, Result};

use crate::reference::ImageRef;
use crate::remote::{RemoteImage, RemoteImageFactory};

/// Publishes a new image = (application layers of `original`) + (all layers
/// of `new_base`), written back to `original`'s repository.
pub struct ImageRebaser {
    factory: Arc<dyn RemoteImageFactory>,
}

impl ImageRebaser {
    pub fn new(factory: Arc<dyn RemoteImageFactory>) -> Self {
        Self { factory }
    }

    /// Rebase with the boundary derived from `old_base`: the last layer of
    /// the old base image marks where `original`'s base layers end.
    pub async fn rebase(
        &self,
        original: &ImageRef,
        old_base: &ImageRef,
        new_base: &ImageRef,
    ) -> Result<Box<dyn RemoteImage>> {
        let old_base_image = self.factory.new_remote(old_base).await?;
        let top_layer = old_base_image
            .layers()
            .last()
            .ok_or_else(|| BuildError::MetadataError {
                repository: old_base_image.repository().to_string(),
                message: "old base image has no layers".to_string(),
            })?
            .diff_id
            .clone();

        self.rebase_at(original, &top_layer, new_base).await
    }

    /// Rebase with an explicit boundary: `top_layer_diff_id` names the last
    /// base layer in `original`. Fails with a boundary error, before any
    /// registry write, when no layer of `original` matches.
    pub async fn rebase_at(
        &self,
        original: &ImageRef,
        top_layer_diff_id: &str,
        new_base: &ImageRef,
    ) -> Result<Box<dyn RemoteImage>> {
        let original_image = self.factory.new_remote(original).await?;
        let new_base_image = self.factory.new_remote(new_base).await?;

        tracing::info!(
            original = %original,
            new_base = %new_base,
            top_layer = %top_layer_diff_id,
            "Rebasing image onto new base"
        );

        original_image
            .rebase(top_layer_diff_id, new_base_image.as_ref())
            .await
    }
}
