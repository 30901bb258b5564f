//! Error types for the genome configuration model.

use std::path::PathBuf;

/// Errors raised while parsing registry paths or reading and mutating the
/// genome configuration.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Registry path does not follow `genome/asset[.seek_key][:tag]`.
    #[error("malformed registry path '{path}': {detail}")]
    MalformedPath { path: String, detail: String },

    /// Genome is not present in the configuration.
    #[error("genome not found: {genome}")]
    GenomeNotFound { genome: String },

    /// Genome exists but the asset does not.
    #[error("asset not found: {genome}/{asset}")]
    AssetNotFound { genome: String, asset: String },

    /// Asset exists but the tag does not.
    #[error("tag not found: {genome}/{asset}:{tag}")]
    TagNotFound {
        genome: String,
        asset: String,
        tag: String,
    },

    /// Tag exists but does not define the seek key.
    #[error("seek key not found: {genome}/{asset}.{seek_key}:{tag}")]
    SeekKeyNotFound {
        genome: String,
        asset: String,
        seek_key: String,
        tag: String,
    },

    /// Tag is already registered with different content.
    #[error("asset '{path}' already exists with digest {existing}, refusing to replace with {incoming}")]
    AssetExists {
        path: String,
        existing: String,
        incoming: String,
    },

    /// Files on disk no longer hash to the recorded digest.
    #[error("digest mismatch for '{path}': expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Configuration file was written by an incompatible schema version.
    #[error("unsupported config_version '{found}' (this build reads {supported}.x)")]
    ConfigVersion { found: String, supported: u64 },

    /// A relationship entry names a tag that cannot be parsed.
    #[error("relationship entry '{entry}' on {owner} is not a tag reference")]
    DanglingRelationship { owner: String, entry: String },

    /// A file named by a seek key could not be read.
    #[error("cannot read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, StoreError>;
