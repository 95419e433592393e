//! Base-layer projection of an image.
//!
//! A rebase splits a source image's layer list at a boundary diff ID: layers
//! at or below the boundary belong to the base and are replaced, layers above
//! it are application layers and are preserved verbatim. The projection is a
//! borrowed prefix of the already-fetched layer list; it performs no network
//! calls of its own.

use buildplane_core::{BuildError, Result};

use crate::remote::LayerDescriptor;

/// The prefix of `layers` ending at (and including) the layer whose diff ID
/// matches `top_diff_id`, in original order.
///
/// No matching layer means the recorded boundary no longer exists in the
/// image (typically rebuilt from scratch rather than rebased); the rebase
/// cannot proceed.
pub fn base_layers<'a>(
    repository: &str,
    layers: &'a [LayerDescriptor],
    top_diff_id: &str,
) -> Result<&'a [LayerDescriptor]> {
    let boundary = layers
        .iter()
        .position(|layer| layer.diff_id == top_diff_id)
        .ok_or_else(|| BuildError::BoundaryNotFound {
            repository: repository.to_string(),
            diff_id: top_diff_id.to_string(),
        })?;
    Ok(&layers[..=boundary])
}
