//! The registry manager: the operations users run against a genome
//! configuration.
//!
//! A [`RegistryManager`] owns one [`LockedConfigFile`]. Reads go through a
//! cached view that is reloaded whenever the file's stamp changes. Every
//! mutation is a closure applied to a fresh copy under the exclusive lock.
//!
//! Slow work (downloads, builds, digests) happens before the lock is taken,
//! in a staging directory inside the storage root. Only promotion of the
//! staged files and the configuration write happen under the lock, so two
//! processes pulling the same asset may both download it, but exactly one
//! registers it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use refgenie_core::config::TAG_ROOT_SEEK_VALUE;
use refgenie_core::{
    digest_tag, verify_files, AssetDigest, GenomeConfig, Registration, RegistrationOutcome,
    RegistryPath, StoreError, TagRecord, TagRef,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RegistryError, Result};
use crate::lock::{ConfigSnapshot, LockHolder, LockStatus, LockedConfigFile};
use crate::recipe::{AssetBuilder, BuildContext, BuildRequest, ResolvedParent};
use crate::server::{check_names, Catalog, ServerCatalog, ServerClient};
use crate::settings::{config_path_from_env, RegistrySettings, CONFIG_ENV_VAR};
use crate::storage::{self, Promotion, StagingArea};

/// Result of [`RegistryManager::pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Downloaded, verified, and registered.
    Pulled {
        reference: TagRef,
        server: String,
        digest: AssetDigest,
    },
    /// Already registered locally (possibly by a concurrent pull); nothing
    /// was written.
    AlreadyPresent { reference: TagRef },
}

impl PullOutcome {
    pub fn reference(&self) -> &TagRef {
        match self {
            PullOutcome::Pulled { reference, .. } | PullOutcome::AlreadyPresent { reference } => {
                reference
            }
        }
    }
}

/// Result of [`RegistryManager::build`].
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Built(Registration),
    /// The target tag exists and `force` was not set; the builder did not run.
    AlreadyPresent(TagRef),
}

/// Result of [`RegistryManager::remove`].
#[derive(Debug, Clone)]
pub struct RemovalReport {
    pub reference: TagRef,
    /// Children whose parent edge to the removed tag was severed.
    pub orphaned_children: Vec<TagRef>,
    /// Whether the tag directory was deleted. Files outside the storage root
    /// and directories still used by another tag are kept.
    pub files_deleted: bool,
    /// Why deleting the files failed after the tag was already removed from
    /// the configuration.
    pub cleanup_error: Option<String>,
}

pub struct RegistryManager {
    file: LockedConfigFile,
    settings: RegistrySettings,
    servers: Option<ServerClient>,
    view: Mutex<Option<ConfigSnapshot>>,
}

impl RegistryManager {
    /// Create the configuration file if it does not exist, then open it.
    ///
    /// `genome_folder` defaults to the directory holding the configuration.
    pub fn init(
        config_path: impl Into<PathBuf>,
        genome_folder: Option<PathBuf>,
        settings: RegistrySettings,
    ) -> Result<Self> {
        let file = LockedConfigFile::new(config_path, settings.lock_timeout);
        let folder = genome_folder.unwrap_or_else(|| PathBuf::from("."));
        if file.initialize(&GenomeConfig::new(folder))? {
            info!(path = %file.path().display(), "initialized genome configuration");
        }
        Self::with_file(file, settings)
    }

    /// Open an existing configuration file.
    pub fn open(config_path: impl Into<PathBuf>, settings: RegistrySettings) -> Result<Self> {
        let file = LockedConfigFile::new(config_path, settings.lock_timeout);
        if !file.exists() {
            return Err(RegistryError::storage(
                file.path(),
                "configuration file does not exist",
            ));
        }
        Self::with_file(file, settings)
    }

    /// Open the configuration named by `$REFGENIE`.
    pub fn from_env(settings: RegistrySettings) -> Result<Self> {
        let path = config_path_from_env().ok_or(RegistryError::NoConfig {
            variable: CONFIG_ENV_VAR,
        })?;
        Self::open(path, settings)
    }

    fn with_file(file: LockedConfigFile, settings: RegistrySettings) -> Result<Self> {
        let snapshot = file.read()?;
        Ok(RegistryManager {
            file,
            settings,
            servers: None,
            view: Mutex::new(Some(snapshot)),
        })
    }

    /// Use `servers` instead of the configured server list.
    pub fn with_servers(mut self, servers: ServerClient) -> Self {
        self.servers = Some(servers);
        self
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        self.file.path()
    }

    // ---- reading --------------------------------------------------------

    /// Current configuration, reloaded if the file changed since last seen.
    pub fn config(&self) -> Result<GenomeConfig> {
        let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = view.as_ref() {
            if !self.file.is_stale(snapshot) {
                return Ok(snapshot.config.clone());
            }
            debug!(path = %self.file.path().display(), "configuration changed on disk, reloading");
        }
        let snapshot = self.file.read()?;
        let config = snapshot.config.clone();
        *view = Some(snapshot);
        Ok(config)
    }

    /// Absolute storage root of `config`.
    pub fn storage_root(&self, config: &GenomeConfig) -> PathBuf {
        self.anchor(&config.genome_folder)
    }

    /// Resolve a registry path to a local file path.
    ///
    /// When the asset is not registered and auto-pull is enabled, it is
    /// pulled and the lookup retried once. With `must_exist`, a path that
    /// resolves but is absent on disk is a [`RegistryError::FileMissing`].
    pub fn seek(&self, path: &RegistryPath, must_exist: bool) -> Result<PathBuf> {
        let resolved = match self.config()?.resolve(path) {
            Ok(found) => found,
            Err(e) => {
                let err = RegistryError::from(e);
                if !(self.settings.auto_pull && err.is_missing_asset()) {
                    return Err(err);
                }
                info!(path = %path, "asset not present locally, pulling");
                self.pull(&path.genome, &path.asset, path.tag.as_deref(), false)?;
                self.config()?.resolve(path)?
            }
        };

        let resolved = self.anchor(&resolved);
        if must_exist && !resolved.exists() {
            return Err(RegistryError::FileMissing {
                registry_path: path.to_string(),
                path: resolved,
            });
        }
        Ok(resolved)
    }

    /// Registered genomes, assets, and tags.
    pub fn list_local(&self) -> Result<Catalog> {
        let config = self.config()?;
        let mut catalog = Catalog::new();
        for reference in config.tag_refs() {
            catalog
                .entry(reference.genome)
                .or_default()
                .entry(reference.asset)
                .or_default()
                .push(reference.tag);
        }
        Ok(catalog)
    }

    /// What each reachable server offers, in configured order.
    pub fn list_remote(&self) -> Result<Vec<ServerCatalog>> {
        let config = self.config()?;
        let built;
        let servers = match &self.servers {
            Some(servers) => servers,
            None => {
                built = ServerClient::from_urls(&config.genome_servers, self.settings.server_timeout)?;
                &built
            }
        };
        Ok(servers.list_available())
    }

    /// Recompute a tag's digest and compare it with the recorded one.
    pub fn verify(&self, genome: &str, asset: &str, tag: Option<&str>) -> Result<AssetDigest> {
        check_names(genome, asset, tag)?;
        let config = self.config()?;
        let tag_name = config.resolve_tag_name(genome, asset, tag)?;
        let reference = TagRef::new(genome, asset, &tag_name);
        let entry = config.tag_by_ref(&reference)?;
        let root = self.anchor(&config.tag_root(&reference)?);

        let actual = digest_tag(&root, &entry.seek_keys)?;
        match entry.asset_digest.as_deref() {
            Some(recorded) if recorded != actual.as_str() => {
                return Err(StoreError::DigestMismatch {
                    path: reference.to_string(),
                    expected: recorded.to_string(),
                    actual: actual.to_string(),
                }
                .into());
            }
            Some(_) => debug!(asset = %reference, digest = %actual, "digest verified"),
            None => warn!(asset = %reference, "no recorded digest to verify against"),
        }
        Ok(actual)
    }

    // ---- acquiring assets -----------------------------------------------

    /// Download an asset from the first server that has it.
    ///
    /// A tag that is already registered is left alone unless `force` is
    /// set. The download is verified against the server's digest before
    /// anything is registered; a mismatch is reported and not retried.
    pub fn pull(&self, genome: &str, asset: &str, tag: Option<&str>, force: bool) -> Result<PullOutcome> {
        check_names(genome, asset, tag)?;
        let config = self.config()?;
        if !force {
            if let Some(reference) = registered(&config, genome, asset, tag) {
                debug!(asset = %reference, "already present, not pulling");
                return Ok(PullOutcome::AlreadyPresent { reference });
            }
        }

        let built;
        let servers = match &self.servers {
            Some(servers) => servers,
            None => {
                built = ServerClient::from_urls(&config.genome_servers, self.settings.server_timeout)?;
                &built
            }
        };

        let staging = StagingArea::new_in(&self.storage_root(&config))?;
        let fetched = servers.fetch(genome, asset, tag, &staging)?;
        let manifest = &fetched.manifest;
        let reference = manifest.tag_ref()?;
        let digest = manifest.digest();

        let payload = staging.payload();
        let files: Vec<(&str, PathBuf)> = manifest
            .seek_keys
            .iter()
            .map(|(key, rel)| (key.as_str(), payload.join(rel)))
            .collect();
        verify_files(&reference.to_string(), &files, &digest)?;

        let record = TagRecord {
            asset_path: managed_path(&reference),
            digest: Some(digest.clone()),
            seek_keys: manifest.seek_keys.clone(),
            build_params: manifest.build_params.clone(),
            parents: manifest.parents()?,
        };
        let registration = self.install(&reference, &payload, record, force)?;
        report_skipped_parents(&registration);

        if registration.outcome == RegistrationOutcome::Unchanged && !force {
            info!(asset = %reference, "registered concurrently, discarding download");
            return Ok(PullOutcome::AlreadyPresent { reference });
        }
        info!(asset = %reference, server = %fetched.server, digest = %digest, "pulled asset");
        Ok(PullOutcome::Pulled {
            reference,
            server: fetched.server,
            digest,
        })
    }

    /// Register a directory of existing files without contacting a server.
    ///
    /// The files stay where they are. A tag with a different digest is only
    /// replaced with `force`.
    pub fn add(
        &self,
        reference: &TagRef,
        source: &Path,
        seek_keys: BTreeMap<String, String>,
        force: bool,
    ) -> Result<Registration> {
        check_names(&reference.genome, &reference.asset, Some(&reference.tag))?;
        let reference = TagRef::new(&reference.genome, &reference.asset, &reference.tag);
        if !source.is_dir() {
            return Err(RegistryError::FileMissing {
                registry_path: reference.to_string(),
                path: source.to_path_buf(),
            });
        }
        let location = std::fs::canonicalize(source)
            .map_err(|e| RegistryError::storage(source, e))?;

        let mut seek_keys = seek_keys;
        seek_keys
            .entry(reference.asset.clone())
            .or_insert_with(|| TAG_ROOT_SEEK_VALUE.to_string());
        storage::check_seek_keys(&seek_keys).map_err(|detail| RegistryError::storage(source, detail))?;
        let digest = digest_tag(&location, &seek_keys)?;

        let record = TagRecord {
            asset_path: location,
            digest: Some(digest.clone()),
            seek_keys,
            ..TagRecord::default()
        };
        let registration = self.update(|config| Ok(config.register_tag(&reference, record, force)?))?;
        info!(asset = %reference, digest = %digest, outcome = ?registration.outcome, "added asset");
        Ok(registration)
    }

    /// Build an asset with `builder` and register the result.
    ///
    /// Parent assets named in the request are resolved first (auto-pull
    /// applies) and recorded as parent edges together with any parents the
    /// builder declares.
    pub fn build(
        &self,
        request: &BuildRequest,
        builder: &dyn AssetBuilder,
        force: bool,
    ) -> Result<BuildOutcome> {
        let target = &request.target;
        check_names(&target.genome, &target.asset, Some(&target.tag))?;
        let target = TagRef::new(&target.genome, &target.asset, &target.tag);
        if !force && self.config()?.tag_by_ref(&target).is_ok() {
            debug!(asset = %target, "already present, not building");
            return Ok(BuildOutcome::AlreadyPresent(target));
        }

        let mut parents = Vec::new();
        for path in &request.parents {
            let location = self.seek(path, true)?;
            let tag_name = self
                .config()?
                .resolve_tag_name(&path.genome, &path.asset, path.tag.as_deref())?;
            parents.push(ResolvedParent {
                path: path.clone(),
                reference: TagRef::new(&path.genome, &path.asset, &tag_name),
                location,
            });
        }
        for input in request.inputs.values() {
            if !input.exists() {
                return Err(RegistryError::FileMissing {
                    registry_path: target.to_string(),
                    path: input.clone(),
                });
            }
        }

        let staging = StagingArea::new_in(&self.storage_root(&self.config()?))?;
        let output_dir = staging.payload();
        let ctx = BuildContext {
            request,
            parents: &parents,
            output_dir: &output_dir,
        };
        info!(asset = %target, recipe = %request.recipe, "building asset");
        let output = builder.build(&ctx).map_err(|e| match e {
            e @ RegistryError::Build { .. } => e,
            other => RegistryError::Build {
                path: target.to_string(),
                detail: other.to_string(),
            },
        })?;

        let mut seek_keys = output.seek_keys;
        seek_keys
            .entry(target.asset.clone())
            .or_insert_with(|| TAG_ROOT_SEEK_VALUE.to_string());
        storage::check_seek_keys(&seek_keys).map_err(|detail| RegistryError::Build {
            path: target.to_string(),
            detail,
        })?;
        let digest = digest_tag(&output_dir, &seek_keys)?;

        let mut parent_refs: Vec<TagRef> = parents.iter().map(|p| p.reference.clone()).collect();
        for declared in output.parents {
            if !parent_refs.contains(&declared) {
                parent_refs.push(declared);
            }
        }
        let mut build_params = request.params.clone();
        build_params
            .entry("recipe".to_string())
            .or_insert_with(|| request.recipe.clone());

        let record = TagRecord {
            asset_path: managed_path(&target),
            digest: Some(digest.clone()),
            seek_keys,
            build_params,
            parents: parent_refs,
        };
        let registration = self.install(&target, &output_dir, record, force)?;
        report_skipped_parents(&registration);
        info!(asset = %target, digest = %digest, "built asset");
        Ok(BuildOutcome::Built(registration))
    }

    // ---- editing --------------------------------------------------------

    /// Remove a tag.
    ///
    /// A tag with children is refused unless `force` is set; with force the
    /// orphaned children are listed in the report. Files are deleted after
    /// the configuration commit, and only when they live in the storage root
    /// and no other tag uses them. A failure to delete them does not undo the
    /// removal; it is logged and carried in the report.
    pub fn remove(&self, genome: &str, asset: &str, tag: Option<&str>, force: bool) -> Result<RemovalReport> {
        check_names(genome, asset, tag)?;
        let (removed, orphaned, root) = self.update(|config| {
            let tag_name = config.resolve_tag_name(genome, asset, tag)?;
            let reference = TagRef::new(genome, asset, &tag_name);
            let children: Vec<TagRef> = config.children(&reference)?.into_iter().collect();
            if !children.is_empty() && !force {
                return Err(RegistryError::HasChildren {
                    path: reference.to_string(),
                    children,
                });
            }
            let root = self.storage_root(config);
            let removed = config.remove_tag(&reference)?;
            Ok((removed, children, root))
        })?;

        let tag_root = self.anchor(&removed.tag_root);
        let (files_deleted, cleanup_error) = if removed.shared {
            (false, None)
        } else {
            match storage::remove_tag_dir(&root, &tag_root) {
                Ok(deleted) => (deleted, None),
                Err(e) => {
                    warn!(asset = %removed.reference, error = %e, "tag removed but its files could not be deleted");
                    (false, Some(e.to_string()))
                }
            }
        };

        if !orphaned.is_empty() {
            warn!(
                asset = %removed.reference,
                children = ?orphaned.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "removed a tag that other assets were built from"
            );
        }
        info!(asset = %removed.reference, files_deleted, "removed asset");
        Ok(RemovalReport {
            reference: removed.reference,
            orphaned_children: orphaned,
            files_deleted,
            cleanup_error,
        })
    }

    /// Give an existing tag a second name. Both names share the same files.
    pub fn tag(&self, genome: &str, asset: &str, source_tag: &str, new_tag: &str) -> Result<TagRef> {
        check_names(genome, asset, Some(source_tag))?;
        check_names(genome, asset, Some(new_tag))?;
        let source = TagRef::new(genome, asset, source_tag);
        let copy = self.update(|config| Ok(config.copy_tag(&source, new_tag)?))?;
        info!(source = %source, copy = %copy, "tagged asset");
        Ok(copy)
    }

    pub fn set_default_tag(&self, genome: &str, asset: &str, tag: &str) -> Result<()> {
        check_names(genome, asset, Some(tag))?;
        self.update(|config| Ok(config.set_default_tag(genome, asset, tag)?))
    }

    pub fn set_genome_description(&self, genome: &str, description: &str) -> Result<()> {
        self.update(|config| Ok(config.set_genome_description(genome, description)?))
    }

    pub fn set_asset_description(&self, genome: &str, asset: &str, description: &str) -> Result<()> {
        check_names(genome, asset, None)?;
        self.update(|config| Ok(config.set_asset_description(genome, asset, description)?))
    }

    /// Replace the configured server list. Every entry must be a valid
    /// server address.
    pub fn set_servers(&self, urls: Vec<String>) -> Result<()> {
        ServerClient::from_urls(&urls, self.settings.server_timeout)?;
        self.update(|config| {
            config.genome_servers = urls;
            Ok(())
        })
    }

    // ---- lock maintenance -----------------------------------------------

    pub fn lock_status(&self) -> Result<LockStatus> {
        self.file.lock_status()
    }

    /// Explicitly reclaim a lock left behind by a dead process.
    pub fn reclaim_stale_lock(&self) -> Result<LockHolder> {
        self.file.reclaim_stale_lock()
    }

    // ---- internals ------------------------------------------------------

    fn update<T>(&self, mutate: impl FnOnce(&mut GenomeConfig) -> Result<T>) -> Result<T> {
        let (snapshot, value) = self.file.update(mutate)?;
        self.remember(snapshot);
        Ok(value)
    }

    fn remember(&self, snapshot: ConfigSnapshot) {
        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Register `record` and move the staged files into its managed
    /// directory, both under the exclusive lock.
    ///
    /// An identical tag that is already registered keeps its files unless
    /// `overwrite` is set. When another tag still uses the target directory
    /// (a copy made by [`tag`](Self::tag)), the new files go to a fresh
    /// directory and only this tag is repointed. A directory this tag leaves
    /// behind is deleted once nothing uses it. If the configuration cannot
    /// be committed the promotion is rolled back.
    fn install(
        &self,
        reference: &TagRef,
        staged: &Path,
        mut record: TagRecord,
        overwrite: bool,
    ) -> Result<Registration> {
        let mut promotion: Option<Promotion> = None;
        let mut left_behind: Option<PathBuf> = None;
        let result = self.file.update(|config| {
            let mut recorded_root = config.genome_folder.join(&record.asset_path);
            let shared = config
                .tags_using(&recorded_root)
                .iter()
                .any(|other| other != reference);
            if shared {
                record.asset_path = fresh_managed_path(reference);
                recorded_root = config.genome_folder.join(&record.asset_path);
            }
            let previous = config.tag_root(reference).ok();

            let registration = config.register_tag(reference, record, overwrite)?;
            if registration.outcome != RegistrationOutcome::Unchanged || overwrite {
                let target = self.anchor(&recorded_root);
                promotion = Some(storage::promote(staged, &target)?);
                left_behind = previous.filter(|p| p != &recorded_root);
            }
            Ok(registration)
        });

        match result {
            Ok((snapshot, registration)) => {
                if let Some(promotion) = promotion {
                    promotion.commit();
                }
                if let Some(old) = left_behind {
                    self.discard_unused(&snapshot.config, &old);
                }
                self.remember(snapshot);
                Ok(registration)
            }
            Err(e) => {
                if let Some(promotion) = promotion {
                    promotion.rollback();
                }
                Err(e)
            }
        }
    }

    /// Delete a tag directory no registered tag points at any more.
    fn discard_unused(&self, config: &GenomeConfig, tag_root: &Path) {
        if !config.tags_using(tag_root).is_empty() {
            return;
        }
        let root = self.storage_root(config);
        if let Err(e) = storage::remove_tag_dir(&root, &self.anchor(tag_root)) {
            warn!(path = %tag_root.display(), error = %e, "could not delete replaced tag files");
        }
    }

    fn anchor(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.file.dir().join(path)
        }
    }
}

/// The registered tag a request refers to, if any.
fn registered(config: &GenomeConfig, genome: &str, asset: &str, tag: Option<&str>) -> Option<TagRef> {
    let tag_name = config.resolve_tag_name(genome, asset, tag).ok()?;
    config.tag(genome, asset, &tag_name).ok()?;
    Some(TagRef::new(genome, asset, &tag_name))
}

/// Tag directory relative to the storage root: `<genome>/<asset>/<tag>`.
fn managed_path(reference: &TagRef) -> PathBuf {
    PathBuf::from(&reference.genome)
        .join(&reference.asset)
        .join(&reference.tag)
}

/// A managed directory no other tag can be using: `<genome>/<asset>/<tag>.<id>`.
/// Tag names never contain `.`, so it cannot collide with [`managed_path`].
fn fresh_managed_path(reference: &TagRef) -> PathBuf {
    let id = Uuid::new_v4().simple().to_string();
    PathBuf::from(&reference.genome)
        .join(&reference.asset)
        .join(format!("{}.{}", reference.tag, &id[..8]))
}

fn report_skipped_parents(registration: &Registration) {
    for parent in &registration.skipped_parents {
        warn!(
            asset = %registration.reference,
            parent = %parent,
            "parent not registered locally, edge not recorded"
        );
    }
}
