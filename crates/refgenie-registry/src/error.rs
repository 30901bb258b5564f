//! Registry error types.

use std::path::PathBuf;

use refgenie_core::{StoreError, TagRef};

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Path, lookup, digest, or schema error from the configuration model.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Exclusive lock not acquired in time.
    #[error("timed out after {waited_ms} ms waiting for lock on {path}{}", holder_suffix(.holder))]
    LockTimeout {
        path: PathBuf,
        waited_ms: u128,
        holder: Option<String>,
    },

    /// Explicit lock reclaim refused because the holder is alive (or there is none).
    #[error("lock on {path} is not stale: {detail}")]
    LockNotStale { path: PathBuf, detail: String },

    /// No configured server offers the asset.
    #[error("asset '{path}' is not available from any server (tried: {})", .servers.join(", "))]
    AssetNotAvailable { path: String, servers: Vec<String> },

    /// One server failed; discovery moves on to the next.
    #[error("network error talking to {server}: {detail}")]
    Network { server: String, detail: String },

    /// Resolved path does not exist on disk.
    #[error("'{registry_path}' resolves to {path}, which does not exist")]
    FileMissing { registry_path: String, path: PathBuf },

    /// Tag still has children; removal needs force.
    #[error("'{path}' has children ({}); use force to remove it anyway", join_refs(.children))]
    HasChildren { path: String, children: Vec<TagRef> },

    /// Invalid server entry in the configuration.
    #[error("invalid server '{server}': {detail}")]
    InvalidServer { server: String, detail: String },

    /// The build collaborator failed.
    #[error("build of '{path}' failed: {detail}")]
    Build { path: String, detail: String },

    /// No configuration path given and none in the environment.
    #[error("no genome configuration given and ${variable} is not set")]
    NoConfig { variable: &'static str },

    /// Filesystem error at a known location.
    #[error("storage error at {path}: {detail}")]
    Storage { path: PathBuf, detail: String },

    /// TOML parsing error in client settings.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether a lookup failed only because the asset or tag is not
    /// registered locally, so pulling it could help. An unknown genome, a
    /// missing seek key or a malformed path does not qualify.
    pub fn is_missing_asset(&self) -> bool {
        matches!(
            self,
            RegistryError::Store(StoreError::AssetNotFound { .. })
                | RegistryError::Store(StoreError::TagNotFound { .. })
        )
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        RegistryError::Storage {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}

fn holder_suffix(holder: &Option<String>) -> String {
    holder
        .as_deref()
        .map(|h| format!(" (held by {h})"))
        .unwrap_or_default()
}

fn join_refs(refs: &[TagRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
