//! Content digests over an asset's registered files.
//!
//! A digest is a SHA-256 over the asset's seek keys in name order. Each
//! entry contributes the seek-key name followed by the content it points at:
//! a file contributes its length and bytes, a directory contributes every
//! descendant in sorted order, keyed by its `/`-separated path relative to
//! that directory. Absolute paths never enter the hash, so the same files
//! digest identically on any machine and under any storage root.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Result, StoreError};

/// A hex-encoded SHA-256 asset digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetDigest(String);

impl AssetDigest {
    /// Wrap an already-computed digest string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        AssetDigest(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the string looks like a digest this module produces.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64 && self.0.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl std::fmt::Display for AssetDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the digest of `(seek_key, path)` entries.
///
/// Entries are sorted by seek-key name before hashing, so input order does
/// not matter.
pub fn digest_files<K, P>(files: &[(K, P)]) -> Result<AssetDigest>
where
    K: AsRef<str>,
    P: AsRef<Path>,
{
    let mut entries: Vec<(&str, &Path)> = files
        .iter()
        .map(|(k, p)| (k.as_ref(), p.as_ref()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (seek_key, path) in entries {
        hash_field(&mut hasher, b"k", seek_key.as_bytes());
        hash_entry(&mut hasher, path)?;
    }
    Ok(AssetDigest(hex_encode(&hasher.finalize())))
}

/// Digest the seek keys of a tag whose files live under `root`.
pub fn digest_tag(root: &Path, seek_keys: &BTreeMap<String, String>) -> Result<AssetDigest> {
    let files: Vec<(&str, PathBuf)> = seek_keys
        .iter()
        .map(|(key, rel)| (key.as_str(), root.join(rel)))
        .collect();
    digest_files(&files)
}

/// Recompute a digest and compare it against the recorded one.
///
/// `label` names the asset in the error (usually its registry path).
pub fn verify_files<K, P>(label: &str, files: &[(K, P)], expected: &AssetDigest) -> Result<()>
where
    K: AsRef<str>,
    P: AsRef<Path>,
{
    let actual = digest_files(files)?;
    if &actual != expected {
        return Err(StoreError::DigestMismatch {
            path: label.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn hash_entry(hasher: &mut Sha256, path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| read_error(path, e))?;
    if !meta.is_dir() {
        hasher.update(b"f");
        return hash_file(hasher, path, meta.len());
    }

    hasher.update(b"d");
    for entry in WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            read_error(&at, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            hash_field(hasher, b"d", rel.as_bytes());
        } else {
            hash_field(hasher, b"f", rel.as_bytes());
            let len = entry
                .metadata()
                .map_err(|e| read_error(entry.path(), e.into()))?
                .len();
            hash_file(hasher, entry.path(), len)?;
        }
    }
    Ok(())
}

fn hash_file(hasher: &mut Sha256, path: &Path, len: u64) -> Result<()> {
    hasher.update(len.to_le_bytes());
    let mut file = File::open(path).map_err(|e| read_error(path, e))?;
    io::copy(&mut file, hasher).map_err(|e| read_error(path, e))?;
    Ok(())
}

/// Length-prefixed field so adjacent names cannot run together.
fn hash_field(hasher: &mut Sha256, kind: &[u8], bytes: &[u8]) {
    hasher.update(kind);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn read_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::FileRead {
        path: path.to_path_buf(),
        source,
    }
}

/// Encode bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn digest_independent_of_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let fa = write(dir.path(), "genome.fa", b">chr1\nACGT\n");
        let fai = write(dir.path(), "genome.fa.fai", b"chr1\t4\t6\t4\t5\n");

        let d1 = digest_files(&[("fasta", &fa), ("fai", &fai)]).unwrap();
        let d2 = digest_files(&[("fai", &fai), ("fasta", &fa)]).unwrap();
        let d3 = digest_files(&[("fasta", &fa), ("fai", &fai)]).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1, d3);
        assert!(d1.is_well_formed());
    }

    #[test]
    fn digest_independent_of_location() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let fa_a = write(a.path(), "x/genome.fa", b"ACGT");
        let fa_b = write(b.path(), "elsewhere.fa", b"ACGT");

        let d1 = digest_files(&[("fasta", fa_a)]).unwrap();
        let d2 = digest_files(&[("fasta", fa_b)]).unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn seek_key_names_contribute() {
        let dir = tempfile::tempdir().unwrap();
        let fa = write(dir.path(), "genome.fa", b"ACGT");
        let d1 = digest_files(&[("fasta", &fa)]).unwrap();
        let d2 = digest_files(&[("sequence", &fa)]).unwrap();
        assert_ne!(d1, d2);
    }

    #[test]
    fn directory_contents_contribute() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index/a.bt2", b"one");
        write(dir.path(), "index/sub/b.bt2", b"two");
        let index = dir.path().join("index");

        let before = digest_files(&[("bowtie2_index", &index)]).unwrap();
        write(dir.path(), "index/sub/b.bt2", b"TWO");
        let after = digest_files(&[("bowtie2_index", &index)]).unwrap();
        assert_ne!(before, after);

        std::fs::rename(index.join("sub/b.bt2"), index.join("sub/c.bt2")).unwrap();
        let renamed = digest_files(&[("bowtie2_index", &index)]).unwrap();
        assert_ne!(after, renamed);
    }

    #[test]
    fn digest_tag_resolves_relative_seek_keys() {
        let dir = tempfile::tempdir().unwrap();
        let fa = write(dir.path(), "hg38.fa", b"ACGT");

        let mut keys = BTreeMap::new();
        keys.insert("fasta".to_string(), "hg38.fa".to_string());
        let by_tag = digest_tag(dir.path(), &keys).unwrap();
        let by_files = digest_files(&[("fasta", fa)]).unwrap();
        assert_eq!(by_tag, by_files);
    }

    #[test]
    fn verify_reports_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let fa = write(dir.path(), "genome.fa", b"ACGT");
        let recorded = digest_files(&[("fasta", &fa)]).unwrap();
        verify_files("hg38/fasta:default", &[("fasta", &fa)], &recorded).unwrap();

        write(dir.path(), "genome.fa", b"TTTT");
        let err = verify_files("hg38/fasta:default", &[("fasta", &fa)], &recorded).unwrap_err();
        match err {
            StoreError::DigestMismatch { path, expected, .. } => {
                assert_eq!(path, "hg38/fasta:default");
                assert_eq!(expected, recorded.to_string());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = digest_files(&[("fasta", dir.path().join("absent.fa"))]).unwrap_err();
        assert!(matches!(err, StoreError::FileRead { .. }));
    }
}
