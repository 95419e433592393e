//! OCI image configuration model.
//!
//! Serde model of the config-v1 JSON blob. Rebase rewrites `rootfs.diff_ids`,
//! `history`, and `created` on a clone of the fetched config, so the model is
//! plain owned data rather than a read-only view.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image configuration (the config blob referenced by the manifest).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// CPU architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    /// Operating system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// Container runtime configuration (env, labels, entrypoint, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ContainerConfig>,

    /// Root filesystem: ordered layer diff IDs.
    pub rootfs: RootFs,

    /// Per-layer history, in layer order (empty-layer entries included).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

/// Container configuration from the image config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Environment variables, each entry `KEY=VALUE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Root filesystem specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootFs {
    /// Type (always "layers").
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Diff IDs of the uncompressed layers, bottom to top.
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// Image history entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

impl HistoryEntry {
    /// Whether this entry corresponds to a layer in `rootfs.diff_ids`.
    pub fn fills_layer(&self) -> bool {
        !self.empty_layer.unwrap_or(false)
    }
}

impl ImageConfig {
    /// Label value for `key`, or empty string if absent. Absence is not an
    /// error at this layer; callers decide whether a missing label is fatal.
    pub fn label(&self, key: &str) -> String {
        self.config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|labels| labels.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// First environment value for `key` from the `KEY=VALUE` list, or empty
    /// string if none.
    pub fn env(&self, key: &str) -> String {
        self.config
            .as_ref()
            .and_then(|c| c.env.as_ref())
            .and_then(|env| {
                env.iter().find_map(|entry| {
                    let (k, v) = entry.split_once('=')?;
                    (k == key).then(|| v.to_string())
                })
            })
            .unwrap_or_default()
    }

    /// Creation time, normalized to UTC. Unset means the Unix epoch.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created.unwrap_or(DateTime::UNIX_EPOCH)
    }
}
