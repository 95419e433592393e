//! Metadata-driven rebase.
//!
//! Fast-patches a previously built image onto its builder's current run
//! image: the builder's metadata label names the new base, and the previous
//! image's lifecycle metadata records where its run-image layers end
//! (`runImage.topLayer`). The run image is resolved under the builder's
//! authorization scope.

use std::sync::Arc;

use buildplane_core::{BuildError, Result};
use buildplane_registry::{ImageRef, RemoteImageFactory};

use crate::metadata::{
    parse_label, read_built_image, BuilderImageMetadata, BuiltImage, LayersMetadata,
    BUILDER_METADATA_LABEL, LIFECYCLE_METADATA_LABEL,
};

/// Rebases built images onto their builder's current run image.
pub struct ImageRebaser {
    factory: Arc<dyn RemoteImageFactory>,
}

impl ImageRebaser {
    pub fn new(factory: Arc<dyn RemoteImageFactory>) -> Self {
        Self { factory }
    }

    /// Rebase `previous_ref` onto the run image currently named by
    /// `builder_ref`'s metadata, and return the record of the published
    /// image.
    pub async fn rebase(
        &self,
        builder_ref: &ImageRef,
        previous_ref: &ImageRef,
    ) -> Result<BuiltImage> {
        let builder = self.factory.new_remote(builder_ref).await?;
        let metadata: BuilderImageMetadata = parse_label(builder.as_ref(), BUILDER_METADATA_LABEL)?;

        let previous = self.factory.new_remote(previous_ref).await?;
        let layers: LayersMetadata = parse_label(previous.as_ref(), LIFECYCLE_METADATA_LABEL)?;
        let top_layer = layers.run_image.top_layer;
        if top_layer.is_empty() {
            return Err(BuildError::MetadataError {
                repository: previous.repository().to_string(),
                message: "lifecycle metadata does not record the run image top layer".to_string(),
            });
        }

        let run_ref = builder_ref.with_image(&metadata.stack.run_image.image);
        let run_image = self.factory.new_remote(&run_ref).await?;

        tracing::info!(
            previous = %previous.identifier(),
            run_image = %run_image.identifier(),
            top_layer = %top_layer,
            "Rebasing built image onto current run image"
        );

        let rebased = previous.rebase(&top_layer, run_image.as_ref()).await?;
        read_built_image(rebased.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::BUILD_METADATA_LABEL;
    use buildplane_registry::fakes::{FakeRemoteImage, FakeRemoteImageFactory};
    use buildplane_registry::RemoteImage;

    const BUILDER_METADATA: &str = r#"{"buildpacks": [{"id": "test.id", "version": "1.2.3"}], "stack": { "runImage": { "image": "foo.io/run:basecnb" }}}"#;
    const BUILD_METADATA: &str = r#"{"buildpacks": [{"id": "test.id", "version": "1.2.3"}]}"#;
    const LIFECYCLE_METADATA: &str = r#"{"runImage":{"topLayer":"run-top","reference":"foo.io/run@sha256:oldrun"},"stack":{"runImage":{"image":"foo.io/run:basecnb"}}}"#;

    fn builder() -> FakeRemoteImage {
        FakeRemoteImage::new("index.docker.io/builder/image", "sha256:builder")
            .with_label(BUILDER_METADATA_LABEL, BUILDER_METADATA)
    }

    fn previous() -> FakeRemoteImage {
        FakeRemoteImage::new("index.docker.io/app/image", "sha256:previous")
            .with_label(BUILD_METADATA_LABEL, BUILD_METADATA)
            .with_label(LIFECYCLE_METADATA_LABEL, LIFECYCLE_METADATA)
            .with_layer("sha256:blob-run-bottom", "run-bottom")
            .with_layer("sha256:blob-run-top", "run-top")
            .with_layer("sha256:blob-app", "app")
    }

    fn run_image() -> FakeRemoteImage {
        FakeRemoteImage::new("foo.io/run", "sha256:newrun")
            .with_layer("sha256:blob-new-bottom", "new-bottom")
            .with_layer("sha256:blob-new-top", "new-top")
    }

    #[tokio::test]
    async fn test_rebase_replaces_run_image_layers() {
        let previous = previous();
        let mut factory = FakeRemoteImageFactory::new();
        factory.register("builder/image:tag", builder());
        factory.register("app/image:tag", previous.clone());
        factory.register("foo.io/run:basecnb", run_image());

        let rebaser = ImageRebaser::new(Arc::new(factory));
        let built = rebaser
            .rebase(
                &ImageRef::no_auth("builder/image:tag"),
                &ImageRef::no_auth("app/image:tag"),
            )
            .await
            .unwrap();

        // One publish happened, and the record reads from the rebased image.
        assert_eq!(previous.write_count(), 1);
        assert!(built.identifier.starts_with("index.docker.io/app/image@sha256:"));
        assert_ne!(built.identifier, previous.identifier());
        assert_eq!(built.buildpack_metadata[0].id, "test.id");
    }

    #[tokio::test]
    async fn test_rebase_resolves_run_image_under_builder_scope() {
        let mut factory = FakeRemoteImageFactory::new();
        factory.register("builder/image:tag", builder());
        factory.register("app/image:tag", previous());
        factory.register("foo.io/run:basecnb", run_image());

        let factory = Arc::new(factory);
        let rebaser = ImageRebaser::new(factory.clone());
        let builder_ref = ImageRef::new(
            "builder/image:tag",
            "team-a",
            Some("regcred".to_string()),
            None,
        );
        rebaser
            .rebase(&builder_ref, &ImageRef::no_auth("app/image:tag"))
            .await
            .unwrap();

        let run_call = &factory.calls()[2];
        assert_eq!(run_call.image(), "foo.io/run:basecnb");
        assert_eq!(run_call.namespace(), "team-a");
        assert_eq!(run_call.secret_name(), Some("regcred"));
    }

    #[tokio::test]
    async fn test_rebase_missing_builder_metadata_is_structural() {
        let mut factory = FakeRemoteImageFactory::new();
        factory.register(
            "builder/image:tag",
            FakeRemoteImage::new("index.docker.io/builder/image", "sha256:builder"),
        );
        factory.register("app/image:tag", previous());

        let rebaser = ImageRebaser::new(Arc::new(factory));
        let err = rebaser
            .rebase(
                &ImageRef::no_auth("builder/image:tag"),
                &ImageRef::no_auth("app/image:tag"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::MetadataError { .. }));
    }

    #[tokio::test]
    async fn test_rebase_missing_top_layer_is_structural() {
        let previous = FakeRemoteImage::new("index.docker.io/app/image", "sha256:previous")
            .with_label(BUILD_METADATA_LABEL, BUILD_METADATA)
            .with_label(
                LIFECYCLE_METADATA_LABEL,
                r#"{"runImage":{"reference":"foo.io/run@sha256:oldrun"},"stack":{"runImage":{"image":"foo.io/run:basecnb"}}}"#,
            )
            .with_layer("sha256:blob-app", "app");

        let mut factory = FakeRemoteImageFactory::new();
        factory.register("builder/image:tag", builder());
        factory.register("app/image:tag", previous.clone());
        factory.register("foo.io/run:basecnb", run_image());

        let rebaser = ImageRebaser::new(Arc::new(factory));
        let err = rebaser
            .rebase(
                &ImageRef::no_auth("builder/image:tag"),
                &ImageRef::no_auth("app/image:tag"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::MetadataError { .. }));
        assert_eq!(previous.write_count(), 0);
    }

    #[tokio::test]
    async fn test_rebase_stale_boundary_is_a_boundary_error() {
        // Previous image was rebuilt from scratch: the recorded top layer no
        // longer exists in its layer list.
        let previous = FakeRemoteImage::new("index.docker.io/app/image", "sha256:previous")
            .with_label(BUILD_METADATA_LABEL, BUILD_METADATA)
            .with_label(LIFECYCLE_METADATA_LABEL, LIFECYCLE_METADATA)
            .with_layer("sha256:blob-other", "other")
            .with_layer("sha256:blob-app", "app");

        let mut factory = FakeRemoteImageFactory::new();
        factory.register("builder/image:tag", builder());
        factory.register("app/image:tag", previous.clone());
        factory.register("foo.io/run:basecnb", run_image());

        let rebaser = ImageRebaser::new(Arc::new(factory));
        let err = rebaser
            .rebase(
                &ImageRef::no_auth("builder/image:tag"),
                &ImageRef::no_auth("app/image:tag"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::BoundaryNotFound { .. }));
        assert_eq!(previous.write_count(), 0);
    }
}
