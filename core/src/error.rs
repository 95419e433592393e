use thiserror::Error;

/// Buildplane error types
#[derive(Error, Debug)]
pub enum BuildError {
    /// Malformed image reference string
    #[error("Invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Credential resolution or registry auth rejection
    #[error("Authentication failed for '{repository}': {message}")]
    AuthenticationError {
        repository: String,
        message: String,
    },

    /// Registry unreachable or request rejected
    #[error("Registry error: {repository} - {message}")]
    RegistryError {
        repository: String,
        message: String,
    },

    /// A required image label is missing or does not parse into its schema
    #[error("Image metadata error: {repository} - {message}")]
    MetadataError {
        repository: String,
        message: String,
    },

    /// Rebase boundary layer not present in the source image
    #[error("Base layer '{diff_id}' not found in image '{repository}'")]
    BoundaryNotFound { repository: String, diff_id: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for BuildError {
    fn from(err: serde_json::Error) -> Self {
        BuildError::SerializationError(err.to_string())
    }
}

impl BuildError {
    /// True for errors that are permanent until the underlying image changes
    /// (producer-side contract violations and stale rebase boundaries).
    /// Callers should not retry these.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BuildError::InvalidReference { .. }
                | BuildError::MetadataError { .. }
                | BuildError::BoundaryNotFound { .. }
        )
    }
}

/// Result type alias for buildplane operations
pub type Result<T> = std::result::Result<T, BuildError>;
