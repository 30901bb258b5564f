//! Shared reference-genome registry: locked configuration, asset servers,
//! and the operations that acquire, build, and remove assets.
//!
//! # Architecture
//!
//! - **Locked configuration** serializes every mutation of the shared YAML
//!   file across processes (`lock`)
//! - **Asset servers** publish tags over HTTP or from a mirror directory;
//!   discovery asks them in order, first match wins (`server`)
//! - **Managed storage** stages downloads and builds, then promotes them by
//!   rename (`storage`)
//! - **Registry manager** ties these together (`manager`)

pub mod error;
pub mod lock;
pub mod manager;
pub mod recipe;
pub mod server;
pub mod settings;
pub mod storage;

// Re-exports for convenience.
pub use error::{RegistryError, Result};
pub use lock::{LockHolder, LockStatus, LockedConfigFile};
pub use manager::{BuildOutcome, PullOutcome, RegistryManager, RemovalReport};
pub use recipe::{AssetBuilder, BuildContext, BuildOutput, BuildRequest, ResolvedParent};
pub use server::{
    AssetManifest, AssetServer, Catalog, HttpServer, LocalServer, ManifestFile, ServerCatalog,
    ServerClient,
};
pub use settings::{RegistrySettings, CONFIG_ENV_VAR};
