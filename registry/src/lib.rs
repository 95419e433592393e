//! Buildplane Registry - remote image access and rebase.
//!
//! The registry-facing half of the image metadata and rebase engine: image
//! references, per-reference credential resolution, a per-call remote image
//! handle over the OCI distribution protocol, and the rebase operation that
//! swaps an image's base layers for a newer base without rebuilding the
//! application layers.
//!
//! Every operation is a sequence of network calls that runs to completion or
//! returns an error; there is no internal retry, cache, or shared state.
//! Concurrency and timeouts belong to the caller.

pub mod auth;
pub mod config;
pub mod fakes;
pub mod rebase;
pub mod reference;
pub mod remote;
pub mod sub_image;

// Re-export common types
pub use auth::{AnonymousKeychainFactory, EnvKeychainFactory, KeychainFactory, RegistryAuth};
pub use config::{ContainerConfig, HistoryEntry, ImageConfig, RootFs};
pub use rebase::ImageRebaser;
pub use reference::{ImageName, ImageRef};
pub use remote::{
    LayerDescriptor, RegistryImage, RegistryImageFactory, RemoteImage, RemoteImageFactory,
};

/// Buildplane registry engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
