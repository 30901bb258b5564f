//! Registry path parsing and formatting.
//!
//! A registry path addresses one file or directory of a tagged asset:
//!
//! ```text
//! genome/asset[.seek_key][:tag]
//! ```
//!
//! The `.seek_key` and `:tag` components are optional and may appear in
//! either order. Parsing is pure: omitted components stay `None` and are
//! resolved against the configuration by
//! [`GenomeConfig::get_asset`](crate::config::GenomeConfig::get_asset).

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StoreError};

const SEEK_KEY_MARKER: char = '.';
const TAG_MARKER: char = ':';

/// A parsed `genome/asset[.seek_key][:tag]` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryPath {
    pub genome: String,
    pub asset: String,
    pub seek_key: Option<String>,
    pub tag: Option<String>,
}

impl RegistryPath {
    /// Build a path with neither seek key nor tag.
    pub fn new(genome: impl Into<String>, asset: impl Into<String>) -> Self {
        RegistryPath {
            genome: genome.into(),
            asset: asset.into(),
            seek_key: None,
            tag: None,
        }
    }

    pub fn with_seek_key(mut self, seek_key: impl Into<String>) -> Self {
        self.seek_key = Some(seek_key.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Parse a registry path.
    ///
    /// Rejects missing `/`, empty names, repeated components, characters
    /// outside `[A-Za-z0-9_+-]`, and anything that looks like a filesystem
    /// path (`..`, a leading `/`, `\`, `~`).
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |detail: String| StoreError::MalformedPath {
            path: input.to_string(),
            detail,
        };

        if input.contains("..") {
            return Err(malformed("path traversal ('..') is not allowed".into()));
        }
        if input.starts_with('/') || input.starts_with('~') || input.contains('\\') {
            return Err(malformed(
                "filesystem paths are not registry paths".into(),
            ));
        }

        let (genome, rest) = input
            .split_once('/')
            .ok_or_else(|| malformed("missing '/' between genome and asset".into()))?;
        if rest.contains('/') {
            return Err(malformed("asset names cannot contain '/'".into()));
        }

        let is_marker = |c: char| c == SEEK_KEY_MARKER || c == TAG_MARKER;
        let asset_end = rest.find(is_marker).unwrap_or(rest.len());
        let asset = &rest[..asset_end];

        check_identifier("genome", genome).map_err(malformed)?;
        check_identifier("asset", asset).map_err(malformed)?;

        let mut seek_key: Option<String> = None;
        let mut tag: Option<String> = None;
        let mut remaining = &rest[asset_end..];

        while let Some(marker) = remaining.chars().next() {
            let body = &remaining[marker.len_utf8()..];
            let end = body.find(is_marker).unwrap_or(body.len());
            let value = &body[..end];

            let (kind, slot) = if marker == SEEK_KEY_MARKER {
                ("seek key", &mut seek_key)
            } else {
                ("tag", &mut tag)
            };
            if slot.is_some() {
                return Err(malformed(format!("{kind} given more than once")));
            }
            check_identifier(kind, value).map_err(malformed)?;
            *slot = Some(value.to_string());

            remaining = &body[end..];
        }

        Ok(RegistryPath {
            genome: genome.to_string(),
            asset: asset.to_string(),
            seek_key,
            tag,
        })
    }
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.genome, self.asset)?;
        if let Some(seek_key) = &self.seek_key {
            write!(f, "{SEEK_KEY_MARKER}{seek_key}")?;
        }
        if let Some(tag) = &self.tag {
            write!(f, "{TAG_MARKER}{tag}")?;
        }
        Ok(())
    }
}

impl FromStr for RegistryPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        RegistryPath::parse(s)
    }
}

/// Check that `value` is a legal genome, asset, seek key, or tag name.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    check_identifier(kind, value).map_err(|detail| StoreError::MalformedPath {
        path: value.to_string(),
        detail,
    })
}

fn check_identifier(kind: &str, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} name is empty"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
    {
        return Err(format!("{kind} name '{value}' contains illegal character '{bad}'"));
    }
    Ok(())
}
