#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use refgenie_core::TagRef;
use refgenie_registry::{AssetManifest, LocalServer, RegistryManager, RegistrySettings};
use tempfile::TempDir;

pub const FASTA: &str = ">chr1\nACGTACGTAC\n>chr2\nGGCCTTAA\n";
pub const FAI: &str = "chr1\t10\t6\t10\t11\nchr2\t8\t24\t8\t9\n";

/// A scratch area with a genome configuration and one mirror server.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("refgenie").join("genome_config.yaml")
    }

    pub fn genomes(&self) -> PathBuf {
        self.dir.path().join("genomes")
    }

    pub fn mirror(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("mirrors").join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn mirror_url(&self, name: &str) -> String {
        format!("file://{}", self.mirror(name).display())
    }

    pub fn settings() -> RegistrySettings {
        RegistrySettings::default()
            .with_lock_timeout(Duration::from_secs(30))
            .with_server_timeout(Duration::from_secs(2))
    }

    /// Initialize the configuration pointing at `servers`.
    pub fn manager_with(&self, servers: &[String], settings: RegistrySettings) -> RegistryManager {
        let manager =
            RegistryManager::init(self.config_path(), Some(self.genomes()), settings).unwrap();
        manager.set_servers(servers.to_vec()).unwrap();
        manager
    }

    /// Initialize the configuration with the `main` mirror as only server.
    pub fn manager(&self) -> RegistryManager {
        self.manager_with(&[self.mirror_url("main")], Self::settings())
    }

    /// Write a small FASTA with its index into a fresh source directory.
    pub fn fasta_source(&self, name: &str, content: &str) -> PathBuf {
        let src = self.dir.path().join("sources").join(name);
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("genome.fa"), content).unwrap();
        std::fs::write(src.join("genome.fa.fai"), FAI).unwrap();
        src
    }

    /// Publish `genome/fasta:tag` on the named mirror.
    pub fn publish_fasta(&self, mirror: &str, genome: &str, tag: &str) -> AssetManifest {
        let src = self.fasta_source(&format!("{mirror}-{genome}-{tag}"), FASTA);
        LocalServer::new(self.mirror(mirror))
            .publish(&TagRef::new(genome, "fasta", tag), &src, fasta_keys(), &[])
            .unwrap()
    }
}

pub fn fasta_keys() -> BTreeMap<String, String> {
    [("fasta", "genome.fa"), ("fai", "genome.fa.fai")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Names in `dir` that look like leftover staging or backup directories.
pub fn leftovers(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect(),
        Err(_) => Vec::new(),
    }
}
