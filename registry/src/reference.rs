//! Image references.
//!
//! Two layers of reference handling: [`ImageRef`] is the value callers hand
//! to the engine (reference string plus the authorization context needed to
//! reach it), and [`ImageName`] is the parsed form used to talk to a
//! registry (`ghcr.io/org/app:v1` split into registry, repository, tag,
//! digest).

use buildplane_core::{BuildError, Result};
use oci_distribution::Reference;

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Identifies a registry image plus the authorization context needed to
/// reach it. Immutable after construction; equality is by the string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Fully-qualified repository/tag or repository/digest string.
    image: String,
    /// Execution-identity scope the access is requested under.
    namespace: String,
    /// Reference to a stored credential, if the image needs one.
    secret_name: Option<String>,
    /// Service account the credential is resolved through, if any.
    service_account: Option<String>,
}

impl ImageRef {
    /// Reference that resolves credentials through a stored secret.
    pub fn new(
        image: impl Into<String>,
        namespace: impl Into<String>,
        secret_name: Option<String>,
        service_account: Option<String>,
    ) -> Self {
        Self {
            image: image.into(),
            namespace: namespace.into(),
            secret_name,
            service_account,
        }
    }

    /// Reference to a publicly pullable image; no credential is resolved.
    pub fn no_auth(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            namespace: String::new(),
            secret_name: None,
            service_account: None,
        }
    }

    /// The reference string as given by the caller.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Execution-identity scope (e.g. the namespace of the requesting workload).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the stored credential, if any.
    pub fn secret_name(&self) -> Option<&str> {
        self.secret_name.as_deref()
    }

    /// Service account the credential is resolved through, if any.
    pub fn service_account(&self) -> Option<&str> {
        self.service_account.as_deref()
    }

    pub fn has_secret(&self) -> bool {
        self.secret_name.is_some()
    }

    /// A reference to another image under the same authorization scope.
    pub fn with_image(&self, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            namespace: self.namespace.clone(),
            secret_name: self.secret_name.clone(),
            service_account: self.service_account.clone(),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.image)
    }
}

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "buildpacks/builder")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageName {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `org/image` → docker.io/org/image:latest
    /// - `ghcr.io/org/image:tag`
    /// - `ghcr.io/org/image@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(BuildError::InvalidReference {
                reference: reference.to_string(),
                message: "empty image reference".to_string(),
            });
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !digest_part.contains(':') {
                    return Err(BuildError::InvalidReference {
                        reference: reference.to_string(),
                        message: "digest must be of the form algorithm:hex".to_string(),
                    });
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        // Split tag (: separator after the last /)
        let (name, tag) = Self::split_tag(name_tag);

        // Determine registry and repository
        let (registry, repository) = Self::split_registry_repository(&name)?;

        // Apply default tag if no tag and no digest
        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(ImageName {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a trailing tag off a reference that has already had any digest
    /// removed. A colon before the last slash belongs to a registry port,
    /// not a tag.
    fn split_tag(name_tag: &str) -> (String, Option<String>) {
        let search_from = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        match name_tag[search_from..].rfind(':') {
            Some(rel_pos) => {
                let colon_pos = search_from + rel_pos;
                let candidate = &name_tag[colon_pos + 1..];
                // A bare "registry.io:5000" has a numeric port, not a tag
                if search_from == 0 && candidate.chars().all(|c| c.is_ascii_digit()) {
                    (name_tag.to_string(), None)
                } else {
                    (
                        name_tag[..colon_pos].to_string(),
                        Some(candidate.to_string()),
                    )
                }
            }
            None => (name_tag.to_string(), None),
        }
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        // The first component is a registry hostname if it contains a dot
        // or a port, or is "localhost"
        if let Some(slash_pos) = name.find('/') {
            let first = &name[..slash_pos];
            if first.contains('.') || first.contains(':') || first == "localhost" {
                let repository = name[slash_pos + 1..].to_string();
                if repository.is_empty() {
                    return Err(BuildError::InvalidReference {
                        reference: name.to_string(),
                        message: "empty repository".to_string(),
                    });
                }
                return Ok((first.to_string(), repository));
            }
        }

        // No registry detected: Docker Hub, with "library/" for bare names
        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// The identifier prefix: `registry/repository` with no tag or digest.
    /// Two references with the same repository name address the same
    /// repository regardless of the tag used to reach it.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Convert to an oci-distribution reference for wire calls.
    pub fn oci_reference(&self) -> Result<Reference> {
        let ref_str = match (&self.digest, &self.tag) {
            (Some(digest), _) => format!("{}/{}@{}", self.registry, self.repository, digest),
            (None, Some(tag)) => format!("{}/{}:{}", self.registry, self.repository, tag),
            (None, None) => format!("{}/{}:{}", self.registry, self.repository, DEFAULT_TAG),
        };

        ref_str
            .parse::<Reference>()
            .map_err(|e| BuildError::InvalidReference {
                reference: ref_str,
                message: e.to_string(),
            })
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageName::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageName::parse("cloudfoundry/run:full-cnb").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "cloudfoundry/run");
        assert_eq!(r.tag, Some("full-cnb".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageName::parse("ghcr.io/buildpacks/builder:bionic").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "buildpacks/builder");
        assert_eq!(r.tag, Some("bionic".to_string()));
    }

    #[test]
    fn test_parse_custom_registry_no_tag() {
        let r = ImageName::parse("foo.io/run").unwrap();
        assert_eq!(r.registry, "foo.io");
        assert_eq!(r.repository, "run");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageName::parse(
            "foo.io/run@sha256:0fd6395e4fe38a0c089665cbe10f52fb26fc64b4b15e672ada412bd7ab5499a0",
        )
        .unwrap();
        assert_eq!(r.registry, "foo.io");
        assert_eq!(r.repository, "run");
        assert_eq!(r.tag, None);
        assert_eq!(
            r.digest,
            Some(
                "sha256:0fd6395e4fe38a0c089665cbe10f52fb26fc64b4b15e672ada412bd7ab5499a0"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageName::parse("foo.io/run:basecnb@sha256:abcdef1234567890").unwrap();
        assert_eq!(r.tag, Some("basecnb".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef1234567890".to_string()));
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageName::parse("localhost:5000/node:10").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "node");
        assert_eq!(r.tag, Some("10".to_string()));
    }

    #[test]
    fn test_parse_empty_reference() {
        assert!(ImageName::parse("").is_err());
        assert!(ImageName::parse("   ").is_err());
    }

    #[test]
    fn test_parse_invalid_digest() {
        let r = ImageName::parse("nginx@invaliddigest");
        assert!(r.is_err());
    }

    #[test]
    fn test_repository_name_strips_tag() {
        let r = ImageName::parse("foo.io/run:basecnb").unwrap();
        assert_eq!(r.repository_name(), "foo.io/run");
    }

    #[test]
    fn test_repository_name_strips_digest() {
        let r = ImageName::parse("localhost:5000/node@sha256:abc123def456").unwrap();
        assert_eq!(r.repository_name(), "localhost:5000/node");
    }

    #[test]
    fn test_full_reference() {
        let r = ImageName::parse("ghcr.io/org/app:v1").unwrap();
        assert_eq!(r.full_reference(), "ghcr.io/org/app:v1");
        assert_eq!(format!("{}", r), "ghcr.io/org/app:v1");
    }

    #[test]
    fn test_oci_reference_with_tag() {
        let r = ImageName::parse("ghcr.io/org/app:v1").unwrap();
        let oci = r.oci_reference().unwrap();
        assert_eq!(oci.to_string(), "ghcr.io/org/app:v1");
    }

    #[test]
    fn test_image_ref_equality_is_by_fields() {
        let a = ImageRef::new("app/image:tag", "team-a", Some("regcred".to_string()), None);
        let b = ImageRef::new("app/image:tag", "team-a", Some("regcred".to_string()), None);
        assert_eq!(a, b);
        assert_ne!(a, ImageRef::no_auth("app/image:tag"));
    }

    #[test]
    fn test_image_ref_no_auth() {
        let r = ImageRef::no_auth("foo.io/run:basecnb");
        assert_eq!(r.image(), "foo.io/run:basecnb");
        assert!(!r.has_secret());
        assert_eq!(r.secret_name(), None);
    }

    #[test]
    fn test_image_ref_with_image_keeps_scope() {
        let builder = ImageRef::new("org/builder:v1", "team-a", Some("regcred".to_string()), None);
        let run = builder.with_image("org/run:base");
        assert_eq!(run.image(), "org/run:base");
        assert_eq!(run.namespace(), "team-a");
        assert_eq!(run.secret_name(), Some("regcred"));
    }
}
