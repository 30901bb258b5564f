//! The build collaborator.
//!
//! Building an asset (running an indexer, converting a FASTA, ...) is
//! delegated to an [`AssetBuilder`]. The registry resolves the parent assets
//! a recipe needs, hands the builder an empty output directory inside the
//! storage root, and afterwards digests, promotes, and registers whatever the
//! builder produced.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use refgenie_core::{RegistryPath, TagRef};

use crate::error::Result;

/// What to build and from what.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Tag to register the result as.
    pub target: TagRef,
    /// Opaque recipe name, interpreted by the builder.
    pub recipe: String,
    /// Recipe parameters; stored as the tag's `build_params`.
    pub params: BTreeMap<String, String>,
    /// Files from outside the registry, by input name.
    pub inputs: BTreeMap<String, PathBuf>,
    /// Registered assets the recipe reads. Each becomes a parent edge.
    pub parents: Vec<RegistryPath>,
}

impl BuildRequest {
    pub fn new(target: TagRef, recipe: impl Into<String>) -> Self {
        BuildRequest {
            target,
            recipe: recipe.into(),
            params: BTreeMap::new(),
            inputs: BTreeMap::new(),
            parents: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.inputs.insert(name.into(), path.into());
        self
    }

    pub fn with_parent(mut self, parent: RegistryPath) -> Self {
        self.parents.push(parent);
        self
    }
}

/// A parent asset resolved to a local path.
#[derive(Debug, Clone)]
pub struct ResolvedParent {
    pub path: RegistryPath,
    pub reference: TagRef,
    pub location: PathBuf,
}

/// Inputs handed to the builder.
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub request: &'a BuildRequest,
    pub parents: &'a [ResolvedParent],
    /// Empty directory the builder writes its files into.
    pub output_dir: &'a Path,
}

impl BuildContext<'_> {
    /// Resolved location of the parent requested as `path`.
    pub fn parent(&self, path: &RegistryPath) -> Option<&Path> {
        self.parents
            .iter()
            .find(|p| &p.path == path)
            .map(|p| p.location.as_path())
    }
}

/// What the builder produced.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Seek keys, relative to the output directory.
    pub seek_keys: BTreeMap<String, String>,
    /// Parents beyond the requested ones, e.g. discovered while building.
    pub parents: Vec<TagRef>,
}

/// Produces an asset's files.
pub trait AssetBuilder {
    fn build(&self, ctx: &BuildContext<'_>) -> Result<BuildOutput>;
}

impl<F> AssetBuilder for F
where
    F: Fn(&BuildContext<'_>) -> Result<BuildOutput>,
{
    fn build(&self, ctx: &BuildContext<'_>) -> Result<BuildOutput> {
        self(ctx)
    }
}
