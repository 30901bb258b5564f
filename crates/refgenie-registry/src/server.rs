//! Remote asset servers and ordered discovery across them.
//!
//! The [`AssetServer`] trait abstracts over where published assets come
//! from. Two implementations are provided:
//!
//! - [`HttpServer`] speaks the registry HTTP API:
//!   `GET {base}/v3/assets` for the catalog and
//!   `GET {base}/v3/assets/{genome}/{asset}/manifest?tag=` for one tag.
//! - [`LocalServer`] serves a directory laid out as
//!   `<root>/<genome>/<asset>/<tag>/{manifest.json, files...}`, addressed
//!   as a `file://` entry in the server list.
//!
//! [`ServerClient`] queries servers in configured order. The first server
//! that has the asset wins; a server that errors is logged and skipped.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use refgenie_core::config::{normalize, TAG_ROOT_SEEK_VALUE};
use refgenie_core::path::validate_identifier;
use refgenie_core::{digest_tag, AssetDigest, RegistryPath, TagRef, DEFAULT_TAG};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{RegistryError, Result};
use crate::storage::{check_seek_keys, safe_relative, StagingArea};

/// Published assets by genome, asset, and tag names.
pub type Catalog = BTreeMap<String, BTreeMap<String, Vec<String>>>;

const MANIFEST_FILE: &str = "manifest.json";

/// Everything a server publishes about one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub genome: String,
    pub asset: String,
    pub tag: String,
    pub asset_digest: String,
    #[serde(default)]
    pub seek_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub asset_parents: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_params: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

/// One file of a published tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Location inside the tag directory.
    pub path: String,
    /// Where to download it from; may be relative to the server base.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl AssetManifest {
    pub fn tag_ref(&self) -> Result<TagRef> {
        Ok(TagRef::parse(&format!("{}/{}:{}", self.genome, self.asset, self.tag))?)
    }

    pub fn digest(&self) -> AssetDigest {
        AssetDigest::from_hex(&self.asset_digest)
    }

    /// Declared parents; unparseable entries are an error.
    pub fn parents(&self) -> Result<Vec<TagRef>> {
        self.asset_parents
            .iter()
            .map(|p| TagRef::parse(p).map_err(RegistryError::from))
            .collect()
    }

    /// Check that this manifest answers the request for `genome/asset:tag`.
    ///
    /// The seek keys must include the default one (the asset name): the
    /// digest is computed over exactly these keys, and registration always
    /// records the default key. Every seek key must point inside the tag
    /// directory.
    pub fn check_answers(&self, genome: &str, asset: &str, tag: Option<&str>) -> std::result::Result<(), String> {
        let wanted = normalize(&self.genome) == normalize(genome)
            && normalize(&self.asset) == normalize(asset)
            && tag.map_or(true, |t| t == self.tag);
        if !wanted {
            return Err(format!(
                "answered with {}/{}:{}",
                self.genome, self.asset, self.tag
            ));
        }
        if !self.seek_keys.contains_key(&normalize(&self.asset)) {
            return Err(format!("manifest lacks the default seek key '{}'", self.asset));
        }
        check_seek_keys(&self.seek_keys)
    }
}

/// A source of published assets.
pub trait AssetServer: Send + Sync {
    /// The address this server was configured with.
    fn url(&self) -> &str;

    /// Everything the server publishes.
    fn catalog(&self) -> Result<Catalog>;

    /// Manifest of one tag, or `None` when the server does not have it.
    /// An omitted tag lets the server pick its default.
    fn manifest(&self, genome: &str, asset: &str, tag: Option<&str>) -> Result<Option<AssetManifest>>;

    /// Download every file of `manifest` into `dest`.
    fn download(&self, manifest: &AssetManifest, dest: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Client for a server speaking the registry HTTP API.
pub struct HttpServer {
    label: String,
    base: Url,
    client: Client,
    timeout: Duration,
}

impl HttpServer {
    /// Connect to `base`.
    ///
    /// `timeout` bounds connecting and each catalog or manifest request.
    /// File downloads are only bounded while connecting, since large assets
    /// legitimately take longer to stream.
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let invalid = |detail: String| RegistryError::InvalidServer {
            server: base.to_string(),
            detail,
        };
        let normalized = format!("{}/", base.trim_end_matches('/'));
        let url = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(HttpServer {
            label: base.to_string(),
            base: url,
            client,
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| self.network(e))
    }

    fn network(&self, detail: impl std::fmt::Display) -> RegistryError {
        RegistryError::Network {
            server: self.label.clone(),
            detail: detail.to_string(),
        }
    }

    /// A metadata request, bounded by the server timeout as a whole.
    fn get(&self, url: Url) -> Result<reqwest::blocking::Response> {
        debug!(server = %self.label, url = %url, "GET");
        self.client
            .get(url)
            .timeout(self.timeout)
            .send()
            .map_err(|e| self.network(e))
    }

    /// A file download; only connecting is bounded.
    fn get_file(&self, url: Url) -> Result<reqwest::blocking::Response> {
        debug!(server = %self.label, url = %url, "GET file");
        self.client.get(url).send().map_err(|e| self.network(e))
    }
}

impl AssetServer for HttpServer {
    fn url(&self) -> &str {
        &self.label
    }

    fn catalog(&self) -> Result<Catalog> {
        let resp = self.get(self.endpoint("v3/assets")?)?;
        if !resp.status().is_success() {
            return Err(self.network(format!("HTTP {} listing assets", resp.status())));
        }
        resp.json().map_err(|e| self.network(e))
    }

    fn manifest(&self, genome: &str, asset: &str, tag: Option<&str>) -> Result<Option<AssetManifest>> {
        check_names(genome, asset, tag)?;
        let mut url = self.endpoint(&format!("v3/assets/{genome}/{asset}/manifest"))?;
        if let Some(tag) = tag {
            url.query_pairs_mut().append_pair("tag", tag);
        }
        let resp = self.get(url)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => resp.json().map(Some).map_err(|e| self.network(e)),
            status => Err(self.network(format!("HTTP {status} fetching manifest"))),
        }
    }

    fn download(&self, manifest: &AssetManifest, dest: &Path) -> Result<()> {
        for file in &manifest.files {
            let target = dest_path(dest, &file.path)?;
            let url = self.base.join(&file.url).map_err(|e| self.network(e))?;
            let mut resp = self.get_file(url)?;
            if !resp.status().is_success() {
                return Err(self.network(format!("HTTP {} downloading {}", resp.status(), file.path)));
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            let written = resp.copy_to(&mut out).map_err(|e| self.network(e))?;
            check_size(&self.label, file, written)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filesystem mirror
// ---------------------------------------------------------------------------

/// A directory of published assets.
///
/// Layout:
/// ```text
/// <root>/
///   <genome>/
///     <asset>/
///       <tag>/
///         manifest.json
///         <files...>
/// ```
pub struct LocalServer {
    label: String,
    root: PathBuf,
}

impl LocalServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        LocalServer {
            label: format!("file://{}", root.display()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tag_dir(&self, genome: &str, asset: &str, tag: &str) -> PathBuf {
        self.root
            .join(normalize(genome))
            .join(normalize(asset))
            .join(tag)
    }

    /// Publish the files under `source` as `reference`.
    ///
    /// Every regular file below `source` is copied. The digest is computed
    /// over `seek_keys` (plus the default seek key) exactly as a client
    /// will recompute it after download.
    pub fn publish(
        &self,
        reference: &TagRef,
        source: &Path,
        seek_keys: BTreeMap<String, String>,
        parents: &[TagRef],
    ) -> Result<AssetManifest> {
        let mut seek_keys = seek_keys;
        seek_keys
            .entry(reference.asset.clone())
            .or_insert_with(|| TAG_ROOT_SEEK_VALUE.to_string());
        let digest = digest_tag(source, &seek_keys)?;

        let dir = self.tag_dir(&reference.genome, &reference.asset, &reference.tag);
        let staging = StagingArea::new_in(&self.root)?;
        let mut files = Vec::new();
        for entry in WalkDir::new(source).follow_links(true).sort_by_file_name().min_depth(1) {
            let entry = entry.map_err(|e| RegistryError::storage(source, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| RegistryError::storage(entry.path(), e))?;
            let rel_name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let target = staging.payload().join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let size = std::fs::copy(entry.path(), &target)?;
            files.push(ManifestFile {
                path: rel_name.clone(),
                url: rel_name,
                size: Some(size),
            });
        }

        let manifest = AssetManifest {
            genome: reference.genome.clone(),
            asset: reference.asset.clone(),
            tag: reference.tag.clone(),
            asset_digest: digest.to_string(),
            seek_keys,
            asset_parents: parents.iter().map(ToString::to_string).collect(),
            build_params: BTreeMap::new(),
            files,
        };
        std::fs::write(
            staging.payload().join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;
        crate::storage::promote(&staging.payload(), &dir)?.commit();

        info!(server = %self.label, asset = %reference, digest = %digest, "published asset");
        Ok(manifest)
    }
}

impl AssetServer for LocalServer {
    fn url(&self) -> &str {
        &self.label
    }

    fn catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        for genome in subdirs(&self.root)? {
            for asset in subdirs(&self.root.join(&genome))? {
                let asset_dir = self.root.join(&genome).join(&asset);
                let tags: Vec<String> = subdirs(&asset_dir)?
                    .into_iter()
                    .filter(|t| asset_dir.join(t).join(MANIFEST_FILE).is_file())
                    .collect();
                if !tags.is_empty() {
                    catalog
                        .entry(genome.clone())
                        .or_default()
                        .insert(asset, tags);
                }
            }
        }
        Ok(catalog)
    }

    fn manifest(&self, genome: &str, asset: &str, tag: Option<&str>) -> Result<Option<AssetManifest>> {
        check_names(genome, asset, tag)?;
        let tag = tag.unwrap_or(DEFAULT_TAG);
        let path = self.tag_dir(genome, asset, tag).join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let data = std::fs::read(&path).map_err(|e| RegistryError::Network {
            server: self.label.clone(),
            detail: format!("reading {}: {e}", path.display()),
        })?;
        let manifest = serde_json::from_slice(&data).map_err(|e| RegistryError::Network {
            server: self.label.clone(),
            detail: format!("parsing {}: {e}", path.display()),
        })?;
        Ok(Some(manifest))
    }

    fn download(&self, manifest: &AssetManifest, dest: &Path) -> Result<()> {
        let dir = self.tag_dir(&manifest.genome, &manifest.asset, &manifest.tag);
        for file in &manifest.files {
            let target = dest_path(dest, &file.path)?;
            let source = safe_relative(&file.url)
                .map(|rel| dir.join(rel))
                .ok_or_else(|| RegistryError::Network {
                    server: self.label.clone(),
                    detail: format!("unsafe file url '{}'", file.url),
                })?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let written = std::fs::copy(&source, &target).map_err(|e| RegistryError::Network {
                server: self.label.clone(),
                detail: format!("copying {}: {e}", source.display()),
            })?;
            check_size(&self.label, file, written)?;
        }
        Ok(())
    }
}

/// Names sent to a server must be plain identifiers.
pub(crate) fn check_names(genome: &str, asset: &str, tag: Option<&str>) -> Result<()> {
    validate_identifier("genome", genome)?;
    validate_identifier("asset", asset)?;
    if let Some(tag) = tag {
        validate_identifier("tag", tag)?;
    }
    Ok(())
}

fn subdirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn dest_path(dest: &Path, raw: &str) -> Result<PathBuf> {
    safe_relative(raw)
        .map(|rel| dest.join(rel))
        .ok_or_else(|| RegistryError::storage(dest, format!("refusing unsafe manifest path '{raw}'")))
}

fn check_size(server: &str, file: &ManifestFile, written: u64) -> Result<()> {
    match file.size {
        Some(expected) if expected != written => Err(RegistryError::Network {
            server: server.to_string(),
            detail: format!("{}: expected {expected} bytes, got {written}", file.path),
        }),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// What one server publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCatalog {
    pub server: String,
    pub catalog: Catalog,
}

/// A tag downloaded into a staging directory.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub server: String,
    pub manifest: AssetManifest,
}

/// Ordered list of servers.
pub struct ServerClient {
    servers: Vec<Box<dyn AssetServer>>,
}

impl ServerClient {
    pub fn new(servers: Vec<Box<dyn AssetServer>>) -> Self {
        ServerClient { servers }
    }

    /// Build clients for configured server URLs, keeping the first
    /// occurrence of duplicates. `http(s)://` entries become
    /// [`HttpServer`]s, `file://` entries [`LocalServer`]s.
    pub fn from_urls(urls: &[String], timeout: Duration) -> Result<Self> {
        let mut seen = Vec::new();
        let mut servers: Vec<Box<dyn AssetServer>> = Vec::new();
        for raw in urls {
            let url = raw.trim();
            if seen.iter().any(|s: &String| s == url) {
                continue;
            }
            seen.push(url.to_string());
            if let Some(path) = url.strip_prefix("file://") {
                servers.push(Box::new(LocalServer::new(path)));
            } else if url.starts_with("http://") || url.starts_with("https://") {
                servers.push(Box::new(HttpServer::new(url, timeout)?));
            } else {
                return Err(RegistryError::InvalidServer {
                    server: url.to_string(),
                    detail: "expected an http://, https:// or file:// address".to_string(),
                });
            }
        }
        Ok(ServerClient { servers })
    }

    pub fn urls(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.url().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Catalogs of every reachable server, in configured order. Servers that
    /// fail are logged and left out.
    pub fn list_available(&self) -> Vec<ServerCatalog> {
        let mut out = Vec::new();
        for server in &self.servers {
            match server.catalog() {
                Ok(catalog) => out.push(ServerCatalog {
                    server: server.url().to_string(),
                    catalog,
                }),
                Err(e) => warn!(server = %server.url(), error = %e, "skipping server"),
            }
        }
        out
    }

    /// First server that has the asset, with its manifest.
    pub fn locate(&self, genome: &str, asset: &str, tag: Option<&str>) -> Result<Fetched> {
        check_names(genome, asset, tag)?;
        for server in &self.servers {
            if let Some(manifest) = self.ask(server.as_ref(), genome, asset, tag) {
                return Ok(Fetched {
                    server: server.url().to_string(),
                    manifest,
                });
            }
        }
        Err(self.not_available(genome, asset, tag))
    }

    /// Locate the asset and download it into `staging`.
    ///
    /// A server whose download fails is skipped like one that errors during
    /// lookup, and the next server in order is asked.
    pub fn fetch(
        &self,
        genome: &str,
        asset: &str,
        tag: Option<&str>,
        staging: &StagingArea,
    ) -> Result<Fetched> {
        check_names(genome, asset, tag)?;
        for server in &self.servers {
            let Some(manifest) = self.ask(server.as_ref(), genome, asset, tag) else {
                continue;
            };
            staging.reset()?;
            match server.download(&manifest, &staging.payload()) {
                Ok(()) => {
                    debug!(server = %server.url(), files = manifest.files.len(), "downloaded asset");
                    return Ok(Fetched {
                        server: server.url().to_string(),
                        manifest,
                    });
                }
                Err(e) => warn!(server = %server.url(), error = %e, "download failed, skipping server"),
            }
        }
        Err(self.not_available(genome, asset, tag))
    }

    fn ask(
        &self,
        server: &dyn AssetServer,
        genome: &str,
        asset: &str,
        tag: Option<&str>,
    ) -> Option<AssetManifest> {
        match server.manifest(genome, asset, tag) {
            Ok(Some(manifest)) => match manifest.check_answers(genome, asset, tag) {
                Ok(()) => Some(manifest),
                Err(detail) => {
                    warn!(server = %server.url(), detail = %detail, "invalid manifest, skipping server");
                    None
                }
            },
            Ok(None) => {
                debug!(server = %server.url(), genome, asset, "not found on server");
                None
            }
            Err(e) => {
                warn!(server = %server.url(), error = %e, "skipping server");
                None
            }
        }
    }

    fn not_available(&self, genome: &str, asset: &str, tag: Option<&str>) -> RegistryError {
        let mut path = RegistryPath::new(genome, asset);
        if let Some(tag) = tag {
            path = path.with_tag(tag);
        }
        RegistryError::AssetNotAvailable {
            path: path.to_string(),
            servers: self.urls(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("genome.fa"), ">chr1\nACGT\n").unwrap();
        std::fs::write(dir.path().join("genome.fa.fai"), "chr1\t4\t6\t4\t5\n").unwrap();
        dir
    }

    fn keys() -> BTreeMap<String, String> {
        [("fasta", "genome.fa"), ("fai", "genome.fa.fai")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn publish_then_fetch_from_local_server() {
        let mirror = tempfile::tempdir().unwrap();
        let src = source_dir();
        let server = LocalServer::new(mirror.path());
        let reference = TagRef::new("hg38", "fasta", "default");
        let published = server.publish(&reference, src.path(), keys(), &[]).unwrap();

        let found = server.manifest("hg38", "fasta", None).unwrap().unwrap();
        assert_eq!(found, published);
        assert!(found.digest().is_well_formed());
        assert_eq!(found.seek_keys.get("fasta").map(String::as_str), Some("genome.fa"));

        let dest = tempfile::tempdir().unwrap();
        server.download(&found, dest.path()).unwrap();
        let digest = digest_tag(dest.path(), &found.seek_keys).unwrap();
        assert_eq!(digest, found.digest());
    }

    #[test]
    fn local_catalog_lists_published_tags() {
        let mirror = tempfile::tempdir().unwrap();
        let src = source_dir();
        let server = LocalServer::new(mirror.path());
        server
            .publish(&TagRef::new("hg38", "fasta", "default"), src.path(), keys(), &[])
            .unwrap();
        server
            .publish(&TagRef::new("hg38", "fasta", "v2"), src.path(), keys(), &[])
            .unwrap();

        let catalog = server.catalog().unwrap();
        assert_eq!(catalog["hg38"]["fasta"], vec!["default".to_string(), "v2".to_string()]);
    }

    #[test]
    fn missing_tag_is_none() {
        let mirror = tempfile::tempdir().unwrap();
        let server = LocalServer::new(mirror.path());
        assert!(server.manifest("hg38", "fasta", Some("v9")).unwrap().is_none());
    }

    #[test]
    fn first_match_wins_in_order() {
        let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let src = source_dir();
        let reference = TagRef::new("hg38", "fasta", "default");
        LocalServer::new(b.path())
            .publish(&reference, src.path(), keys(), &[])
            .unwrap();

        let urls = vec![
            format!("file://{}", a.path().display()),
            format!("file://{}", b.path().display()),
        ];
        let client = ServerClient::from_urls(&urls, Duration::from_secs(1)).unwrap();
        let located = client.locate("hg38", "fasta", Some("default")).unwrap();
        assert_eq!(located.server, urls[1]);
    }

    #[test]
    fn nobody_has_it() {
        let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let urls = vec![
            format!("file://{}", a.path().display()),
            format!("file://{}", b.path().display()),
        ];
        let client = ServerClient::from_urls(&urls, Duration::from_secs(1)).unwrap();
        match client.locate("hg38", "fasta", None).unwrap_err() {
            RegistryError::AssetNotAvailable { path, servers } => {
                assert_eq!(path, "hg38/fasta");
                assert_eq!(servers, urls);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_and_invalid_urls() {
        let urls = vec!["file:///srv/a".to_string(), "file:///srv/a".to_string()];
        let client = ServerClient::from_urls(&urls, Duration::from_secs(1)).unwrap();
        assert_eq!(client.urls().len(), 1);

        let err = ServerClient::from_urls(&["ftp://x".to_string()], Duration::from_secs(1));
        assert!(matches!(err, Err(RegistryError::InvalidServer { .. })));
    }

    #[test]
    fn manifest_rejects_escaping_paths() {
        let mirror = tempfile::tempdir().unwrap();
        let server = LocalServer::new(mirror.path());
        let manifest = AssetManifest {
            genome: "hg38".into(),
            asset: "fasta".into(),
            tag: "default".into(),
            asset_digest: "00".into(),
            seek_keys: BTreeMap::new(),
            asset_parents: vec![],
            build_params: BTreeMap::new(),
            files: vec![ManifestFile {
                path: "../escape".into(),
                url: "x".into(),
                size: None,
            }],
        };
        let dest = tempfile::tempdir().unwrap();
        assert!(server.download(&manifest, dest.path()).is_err());
    }

    fn manifest_with_keys(keys: &[(&str, &str)]) -> AssetManifest {
        AssetManifest {
            genome: "hg38".into(),
            asset: "fasta".into(),
            tag: "default".into(),
            asset_digest: "00".into(),
            seek_keys: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            asset_parents: vec![],
            build_params: BTreeMap::new(),
            files: vec![],
        }
    }

    #[test]
    fn seek_keys_outside_the_tag_are_not_an_answer() {
        let ok = manifest_with_keys(&[("fasta", "genome.fa"), ("fai", ".")]);
        assert!(ok.check_answers("hg38", "fasta", Some("default")).is_ok());

        let absolute = manifest_with_keys(&[("fasta", "/srv/outside/secret.txt")]);
        assert!(absolute.check_answers("hg38", "fasta", None).is_err());

        let climbing = manifest_with_keys(&[("fasta", "genome.fa"), ("fai", "../../x")]);
        assert!(climbing.check_answers("hg38", "fasta", None).is_err());
    }

    #[test]
    fn traversal_names_never_reach_a_server() {
        let mirror = tempfile::tempdir().unwrap();
        let server = LocalServer::new(mirror.path().join("inner"));
        let err = server.manifest("..", "..", Some("..")).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Store(refgenie_core::StoreError::MalformedPath { .. })
        ));

        let client = ServerClient::new(vec![Box::new(server)]);
        assert!(matches!(
            client.locate("hg38", "../fasta", None),
            Err(RegistryError::Store(refgenie_core::StoreError::MalformedPath { .. }))
        ));
    }
}
