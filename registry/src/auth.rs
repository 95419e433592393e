//! Registry authentication.
//!
//! Credentials are resolved per [`ImageRef`] through the [`KeychainFactory`]
//! capability. The mechanics of secret storage live outside this engine;
//! implementations here cover the anonymous case and an environment-variable
//! fallback.

use async_trait::async_trait;
use buildplane_core::Result;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;

use crate::reference::ImageRef;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Resolves an authentication capability for an image reference.
///
/// Anonymous is a valid resolution for public references. Failure means no
/// usable credential exists for the reference's registry.
#[async_trait]
pub trait KeychainFactory: Send + Sync {
    async fn keychain_for(&self, image_ref: &ImageRef) -> Result<RegistryAuth>;
}

/// Keychain that resolves every reference anonymously.
#[derive(Debug, Default)]
pub struct AnonymousKeychainFactory;

#[async_trait]
impl KeychainFactory for AnonymousKeychainFactory {
    async fn keychain_for(&self, _image_ref: &ImageRef) -> Result<RegistryAuth> {
        Ok(RegistryAuth::anonymous())
    }
}

/// Keychain backed by `REGISTRY_USERNAME`/`REGISTRY_PASSWORD` for references
/// that carry a secret; anonymous otherwise.
#[derive(Debug, Default)]
pub struct EnvKeychainFactory;

#[async_trait]
impl KeychainFactory for EnvKeychainFactory {
    async fn keychain_for(&self, image_ref: &ImageRef) -> Result<RegistryAuth> {
        if image_ref.has_secret() {
            Ok(RegistryAuth::from_env())
        } else {
            Ok(RegistryAuth::anonymous())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_basic() {
        let auth = RegistryAuth::basic("user", "pass");
        assert!(!auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }

    #[tokio::test]
    async fn test_anonymous_keychain() {
        let keychain = AnonymousKeychainFactory;
        let auth = keychain
            .keychain_for(&ImageRef::no_auth("foo.io/run:basecnb"))
            .await
            .unwrap();
        assert!(auth.is_anonymous());
    }

    #[tokio::test]
    async fn test_env_keychain_without_secret_is_anonymous() {
        let keychain = EnvKeychainFactory;
        let auth = keychain
            .keychain_for(&ImageRef::no_auth("foo.io/run:basecnb"))
            .await
            .unwrap();
        assert!(auth.is_anonymous());
    }
}
