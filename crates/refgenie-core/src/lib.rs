//! Core data model for the reference genome asset registry.
//!
//! Everything in this crate is pure: parsing registry paths, hashing asset
//! files, and reading or mutating the in-memory genome configuration. File
//! locking, persistence, and network access live in `refgenie-registry`.
//!
//! # Architecture
//!
//! - **Registry paths** (`genome/asset.seek_key:tag`) address files
//! - **Genome configuration** mirrors the shared YAML file: genomes →
//!   assets → tags → seek keys
//! - **Digests** content-address a tag's files for provenance and integrity
//! - **Relationships** record which tags were built from which

pub mod config;
pub mod digest;
pub mod error;
pub mod graph;
pub mod path;

// Re-exports for convenience.
pub use config::{
    Asset, Genome, GenomeConfig, Registration, RegistrationOutcome, RemovedTag, Tag, TagRecord,
    CONFIG_VERSION, DEFAULT_TAG,
};
pub use digest::{digest_files, digest_tag, verify_files, AssetDigest};
pub use error::{Result, StoreError};
pub use graph::TagRef;
pub use path::RegistryPath;
