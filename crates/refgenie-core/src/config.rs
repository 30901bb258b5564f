//! The genome configuration tree: genomes → assets → tags → seek keys.
//!
//! [`GenomeConfig`] mirrors the persisted YAML file. It holds no lock and
//! performs no I/O beyond (de)serialization; callers that share the file
//! between processes mutate it only inside a locked read-modify-write cycle.
//!
//! Genome and asset names are case-normalized (stored and looked up in
//! lowercase). Tag names and seek keys are case sensitive.
//!
//! Keys this model does not interpret are kept in the `extra` map at every
//! level and written back unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

use crate::digest::AssetDigest;
use crate::error::{Result, StoreError};
use crate::graph::TagRef;
use crate::path::{validate_identifier, RegistryPath};

/// Schema major version this build reads and writes.
pub const CONFIG_VERSION_MAJOR: u64 = 1;

/// Schema version written into new configuration files.
pub const CONFIG_VERSION: &str = "1.0";

/// Tag name used when an asset has no other default.
pub const DEFAULT_TAG: &str = "default";

/// Server list of a freshly initialized configuration.
pub const DEFAULT_SERVER: &str = "http://refgenomes.databio.org";

/// Seek-key value that resolves to the tag directory itself.
pub const TAG_ROOT_SEEK_VALUE: &str = ".";

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeConfig {
    #[serde(deserialize_with = "version_from_scalar")]
    pub config_version: String,
    /// Storage root. Relative paths are resolved against the directory that
    /// holds the configuration file.
    pub genome_folder: PathBuf,
    /// Remote registries, queried in order.
    #[serde(default)]
    pub genome_servers: Vec<String>,
    #[serde(default)]
    pub genomes: BTreeMap<String, Genome>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genome_description: Option<String>,
    #[serde(default)]
    pub assets: BTreeMap<String, Asset>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_description: Option<String>,
    #[serde(default = "default_tag_name")]
    pub default_tag: String,
    #[serde(default)]
    pub tags: BTreeMap<String, Tag>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Default for Asset {
    fn default() -> Self {
        Asset {
            asset_description: None,
            default_tag: default_tag_name(),
            tags: BTreeMap::new(),
            extra: Mapping::new(),
        }
    }
}

/// One concrete, versioned instance of an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Directory holding the tag's files. Relative to the storage root for
    /// managed assets, absolute for assets added in place.
    pub asset_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_digest: Option<String>,
    /// Seek-key name → path relative to `asset_path`.
    #[serde(default)]
    pub seek_keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_params: BTreeMap<String, String>,
    #[serde(default)]
    pub asset_parents: Vec<String>,
    #[serde(default)]
    pub asset_children: Vec<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

/// Everything needed to register (or re-register) a tag.
#[derive(Debug, Clone, Default)]
pub struct TagRecord {
    pub asset_path: PathBuf,
    pub digest: Option<AssetDigest>,
    pub seek_keys: BTreeMap<String, String>,
    pub build_params: BTreeMap<String, String>,
    pub parents: Vec<TagRef>,
}

/// What [`GenomeConfig::register_tag`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The tag did not exist before.
    Created,
    /// Same digest already registered; seek keys and parents were merged.
    Unchanged,
    /// An existing tag was replaced under an explicit overwrite.
    Replaced,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub reference: TagRef,
    pub outcome: RegistrationOutcome,
    /// Declared parents that are not registered locally; no edge was recorded.
    pub skipped_parents: Vec<TagRef>,
}

/// A tag taken out of the configuration by [`GenomeConfig::remove_tag`].
#[derive(Debug, Clone)]
pub struct RemovedTag {
    pub reference: TagRef,
    pub tag: Tag,
    /// Directory that held the tag's files, as resolved against the storage root.
    pub tag_root: PathBuf,
    /// Another tag still points at `tag_root`; its files must stay.
    pub shared: bool,
    pub pruned_asset: bool,
    pub pruned_genome: bool,
}

impl GenomeConfig {
    /// A fresh configuration rooted at `genome_folder`.
    pub fn new(genome_folder: impl Into<PathBuf>) -> Self {
        GenomeConfig {
            config_version: CONFIG_VERSION.to_string(),
            genome_folder: genome_folder.into(),
            genome_servers: vec![DEFAULT_SERVER.to_string()],
            genomes: BTreeMap::new(),
            extra: Mapping::new(),
        }
    }

    /// Parse a configuration, rejecting incompatible schema versions before
    /// interpreting anything else.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        let found = value
            .get("config_version")
            .and_then(scalar_to_string)
            .unwrap_or_else(|| "<missing>".to_string());
        check_config_version(&found)?;
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    // ---- typed accessors ------------------------------------------------

    pub fn genome(&self, genome: &str) -> Result<&Genome> {
        self.genomes
            .get(&normalize(genome))
            .ok_or_else(|| StoreError::GenomeNotFound {
                genome: genome.to_string(),
            })
    }

    pub fn asset(&self, genome: &str, asset: &str) -> Result<&Asset> {
        self.genome(genome)?
            .assets
            .get(&normalize(asset))
            .ok_or_else(|| StoreError::AssetNotFound {
                genome: genome.to_string(),
                asset: asset.to_string(),
            })
    }

    pub fn tag(&self, genome: &str, asset: &str, tag: &str) -> Result<&Tag> {
        self.asset(genome, asset)?
            .tags
            .get(tag)
            .ok_or_else(|| StoreError::TagNotFound {
                genome: genome.to_string(),
                asset: asset.to_string(),
                tag: tag.to_string(),
            })
    }

    pub fn tag_by_ref(&self, reference: &TagRef) -> Result<&Tag> {
        self.tag(&reference.genome, &reference.asset, &reference.tag)
    }

    pub(crate) fn tag_mut(&mut self, reference: &TagRef) -> Result<&mut Tag> {
        let genome = self
            .genomes
            .get_mut(&normalize(&reference.genome))
            .ok_or_else(|| StoreError::GenomeNotFound {
                genome: reference.genome.clone(),
            })?;
        let asset = genome
            .assets
            .get_mut(&normalize(&reference.asset))
            .ok_or_else(|| StoreError::AssetNotFound {
                genome: reference.genome.clone(),
                asset: reference.asset.clone(),
            })?;
        asset
            .tags
            .get_mut(&reference.tag)
            .ok_or_else(|| StoreError::TagNotFound {
                genome: reference.genome.clone(),
                asset: reference.asset.clone(),
                tag: reference.tag.clone(),
            })
    }

    pub fn genome_names(&self) -> Vec<&str> {
        self.genomes.keys().map(String::as_str).collect()
    }

    pub fn asset_names(&self, genome: &str) -> Result<Vec<&str>> {
        Ok(self.genome(genome)?.assets.keys().map(String::as_str).collect())
    }

    pub fn tag_names(&self, genome: &str, asset: &str) -> Result<Vec<&str>> {
        Ok(self.asset(genome, asset)?.tags.keys().map(String::as_str).collect())
    }

    /// Every registered tag, in genome/asset/tag order.
    pub fn tag_refs(&self) -> Vec<TagRef> {
        self.genomes
            .iter()
            .flat_map(|(g, genome)| {
                genome.assets.iter().flat_map(move |(a, asset)| {
                    asset.tags.keys().map(move |t| TagRef::new(g, a, t))
                })
            })
            .collect()
    }

    /// Resolve an omitted tag to the asset's default tag.
    pub fn resolve_tag_name(&self, genome: &str, asset: &str, tag: Option<&str>) -> Result<String> {
        let entry = self.asset(genome, asset)?;
        Ok(tag.unwrap_or(&entry.default_tag).to_string())
    }

    /// Directory holding a tag's files.
    pub fn tag_root(&self, reference: &TagRef) -> Result<PathBuf> {
        let tag = self.tag_by_ref(reference)?;
        Ok(self.genome_folder.join(&tag.asset_path))
    }

    /// Resolve a file path: genome → asset → tag → seek key.
    ///
    /// An omitted tag resolves to the asset's default tag, an omitted seek key
    /// to the asset name. The returned path is not checked for existence.
    pub fn get_asset(
        &self,
        genome: &str,
        asset: &str,
        tag: Option<&str>,
        seek_key: Option<&str>,
    ) -> Result<PathBuf> {
        let tag_name = self.resolve_tag_name(genome, asset, tag)?;
        let entry = self.tag(genome, asset, &tag_name)?;
        let seek_key = seek_key.unwrap_or(asset);
        let relative = entry
            .seek_keys
            .get(seek_key)
            .ok_or_else(|| StoreError::SeekKeyNotFound {
                genome: genome.to_string(),
                asset: asset.to_string(),
                seek_key: seek_key.to_string(),
                tag: tag_name.clone(),
            })?;

        let root = self.genome_folder.join(&entry.asset_path);
        if relative == TAG_ROOT_SEEK_VALUE {
            Ok(root)
        } else {
            Ok(root.join(relative))
        }
    }

    /// [`get_asset`](Self::get_asset) for a parsed registry path.
    pub fn resolve(&self, path: &RegistryPath) -> Result<PathBuf> {
        self.get_asset(
            &path.genome,
            &path.asset,
            path.tag.as_deref(),
            path.seek_key.as_deref(),
        )
    }

    // ---- mutators -------------------------------------------------------

    pub fn set_genome_description(&mut self, genome: &str, description: &str) -> Result<()> {
        validate_identifier("genome", genome)?;
        self.genomes
            .entry(normalize(genome))
            .or_default()
            .genome_description = Some(description.to_string());
        Ok(())
    }

    pub fn set_asset_description(&mut self, genome: &str, asset: &str, description: &str) -> Result<()> {
        self.asset(genome, asset)?;
        if let Some(entry) = self
            .genomes
            .get_mut(&normalize(genome))
            .and_then(|g| g.assets.get_mut(&normalize(asset)))
        {
            entry.asset_description = Some(description.to_string());
        }
        Ok(())
    }

    /// Point an asset's default tag at an existing tag.
    pub fn set_default_tag(&mut self, genome: &str, asset: &str, tag: &str) -> Result<()> {
        self.tag(genome, asset, tag)?;
        if let Some(entry) = self
            .genomes
            .get_mut(&normalize(genome))
            .and_then(|g| g.assets.get_mut(&normalize(asset)))
        {
            entry.default_tag = tag.to_string();
        }
        Ok(())
    }

    /// Add or repoint a seek key on an existing tag.
    pub fn set_seek_key(&mut self, reference: &TagRef, seek_key: &str, relative: &str) -> Result<()> {
        validate_identifier("seek key", seek_key)?;
        self.tag_mut(reference)?
            .seek_keys
            .insert(seek_key.to_string(), relative.to_string());
        Ok(())
    }

    /// Insert or update a tag.
    ///
    /// Re-registering the same digest is a no-op apart from merging seek keys
    /// and parents (and taking the new `asset_path` under `overwrite`). A different digest replaces the tag only when
    /// `overwrite` is set; otherwise the call fails with
    /// [`StoreError::AssetExists`] carrying both digests. Children of a
    /// replaced tag keep their edges.
    pub fn register_tag(
        &mut self,
        reference: &TagRef,
        record: TagRecord,
        overwrite: bool,
    ) -> Result<Registration> {
        validate_identifier("genome", &reference.genome)?;
        validate_identifier("asset", &reference.asset)?;
        validate_identifier("tag", &reference.tag)?;

        let reference = reference.normalized();
        let incoming = record.digest.as_ref().map(ToString::to_string);

        let mut seek_keys = record.seek_keys;
        seek_keys
            .entry(reference.asset.clone())
            .or_insert_with(|| TAG_ROOT_SEEK_VALUE.to_string());

        let existing = match self.tag_by_ref(&reference) {
            Ok(tag) => Some(tag.asset_digest.clone()),
            Err(StoreError::GenomeNotFound { .. })
            | Err(StoreError::AssetNotFound { .. })
            | Err(StoreError::TagNotFound { .. }) => None,
            Err(other) => return Err(other),
        };

        let outcome = match existing {
            Some(current) if current.is_some() && current == incoming => {
                let tag = self.tag_mut(&reference)?;
                if overwrite {
                    tag.asset_path = record.asset_path;
                }
                for (key, value) in seek_keys {
                    tag.seek_keys.entry(key).or_insert(value);
                }
                RegistrationOutcome::Unchanged
            }
            Some(Some(current)) if !overwrite => {
                return Err(StoreError::AssetExists {
                    path: reference.to_string(),
                    existing: current,
                    incoming: incoming.unwrap_or_else(|| "<none>".to_string()),
                });
            }
            Some(_) => {
                for parent in self.parents(&reference)? {
                    self.remove_edge(&parent, &reference)?;
                }
                let tag = self.tag_mut(&reference)?;
                tag.asset_path = record.asset_path;
                tag.asset_digest = incoming;
                tag.seek_keys = seek_keys;
                tag.build_params = record.build_params;
                RegistrationOutcome::Replaced
            }
            None => {
                let asset = self
                    .genomes
                    .entry(reference.genome.clone())
                    .or_default()
                    .assets
                    .entry(reference.asset.clone())
                    .or_insert_with(|| Asset {
                        default_tag: reference.tag.clone(),
                        ..Asset::default()
                    });
                asset.tags.insert(
                    reference.tag.clone(),
                    Tag {
                        asset_path: record.asset_path,
                        asset_digest: incoming,
                        seek_keys,
                        build_params: record.build_params,
                        ..Tag::default()
                    },
                );
                RegistrationOutcome::Created
            }
        };

        let mut skipped_parents = Vec::new();
        for parent in &record.parents {
            if self.tag_by_ref(parent).is_ok() {
                self.add_edge(parent, &reference)?;
            } else {
                skipped_parents.push(parent.normalized());
            }
        }

        Ok(Registration {
            reference,
            outcome,
            skipped_parents,
        })
    }

    /// Duplicate a tag's metadata under a new name.
    ///
    /// The copy shares the source's `asset_path` (and therefore its files)
    /// and its parents; it starts with no children. Copying onto an existing
    /// tag with the same digest is a no-op; a different digest fails with
    /// [`StoreError::AssetExists`].
    pub fn copy_tag(&mut self, source: &TagRef, new_tag: &str) -> Result<TagRef> {
        validate_identifier("tag", new_tag)?;
        let source = source.normalized();
        let target = TagRef::new(&source.genome, &source.asset, new_tag);

        let original = self.tag_by_ref(&source)?.clone();
        if let Ok(existing) = self.tag_by_ref(&target) {
            if existing.asset_digest == original.asset_digest {
                return Ok(target);
            }
            return Err(StoreError::AssetExists {
                path: target.to_string(),
                existing: existing
                    .asset_digest
                    .clone()
                    .unwrap_or_else(|| "<none>".to_string()),
                incoming: original
                    .asset_digest
                    .clone()
                    .unwrap_or_else(|| "<none>".to_string()),
            });
        }

        let parents = self.parents(&source)?;
        if let Some(asset) = self
            .genomes
            .get_mut(&source.genome)
            .and_then(|g| g.assets.get_mut(&source.asset))
        {
            asset.tags.insert(
                target.tag.clone(),
                Tag {
                    asset_parents: Vec::new(),
                    asset_children: Vec::new(),
                    ..original
                },
            );
        }
        for parent in parents {
            self.add_edge(&parent, &target)?;
        }
        Ok(target)
    }

    /// Take a tag out of the configuration.
    ///
    /// Severs every relationship edge that mentions the tag, then prunes the
    /// asset and genome only if the tag was their last entry. Files are not
    /// touched; the returned [`RemovedTag`] says where they are and whether
    /// another tag still uses them.
    pub fn remove_tag(&mut self, reference: &TagRef) -> Result<RemovedTag> {
        let reference = reference.normalized();
        let tag_root = self.tag_root(&reference)?;
        self.remove_node(&reference)?;

        let mut pruned_asset = false;
        let mut pruned_genome = false;
        let mut removed = None;

        if let Some(genome) = self.genomes.get_mut(&reference.genome) {
            if let Some(asset) = genome.assets.get_mut(&reference.asset) {
                removed = asset.tags.remove(&reference.tag);
                if asset.tags.is_empty() {
                    genome.assets.remove(&reference.asset);
                    pruned_asset = true;
                }
            }
            if genome.assets.is_empty() {
                self.genomes.remove(&reference.genome);
                pruned_genome = true;
            }
        }

        let tag = removed.ok_or_else(|| StoreError::TagNotFound {
            genome: reference.genome.clone(),
            asset: reference.asset.clone(),
            tag: reference.tag.clone(),
        })?;

        let shared = !self.tags_using(&tag_root).is_empty();

        Ok(RemovedTag {
            reference,
            tag,
            tag_root,
            shared,
            pruned_asset,
            pruned_genome,
        })
    }

    /// Tags whose files live in `root`.
    pub fn tags_using(&self, root: &Path) -> Vec<TagRef> {
        self.tag_refs()
            .into_iter()
            .filter(|other| self.tag_root(other).map_or(false, |r| r == root))
            .collect()
    }

    /// Whether `path` lies inside the storage root.
    pub fn is_managed(&self, path: &Path) -> bool {
        path.starts_with(&self.genome_folder)
    }
}

/// Lowercase form used for genome and asset keys.
pub fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn default_tag_name() -> String {
    DEFAULT_TAG.to_string()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn version_from_scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom("config_version must be a string or a number"))
}

fn check_config_version(found: &str) -> Result<()> {
    let padded = match found.split('.').count() {
        1 => format!("{found}.0.0"),
        2 => format!("{found}.0"),
        _ => found.to_string(),
    };
    match semver::Version::parse(&padded) {
        Ok(v) if v.major == CONFIG_VERSION_MAJOR => Ok(()),
        _ => Err(StoreError::ConfigVersion {
            found: found.to_string(),
            supported: CONFIG_VERSION_MAJOR,
        }),
    }
}
