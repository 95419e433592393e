//! Buildplane CNB - buildpack metadata retrieval and metadata-driven rebase.
//!
//! Reads structured build provenance (buildpack identities, stack and
//! run-image references) out of the well-known labels the buildpack lifecycle
//! writes on builder and built images, and rebases built images onto their
//! builder's current run image.

pub mod metadata;
pub mod rebase;

// Re-export commonly used types
pub use metadata::{
    BuildMetadata, BuilderImage, BuilderImageMetadata, BuildpackMetadata, BuiltImage,
    LayersMetadata, RemoteMetadataRetriever, RunImageMetadata, StackMetadata, StackRunImage,
    BUILDER_METADATA_LABEL, BUILD_METADATA_LABEL, LIFECYCLE_METADATA_LABEL,
};
pub use rebase::ImageRebaser;

/// Buildplane CNB version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
