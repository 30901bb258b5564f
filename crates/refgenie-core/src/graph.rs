//! Parent/child relationships between tagged assets.
//!
//! Edges record build provenance: a child was produced from its parents.
//! They are stored as adjacency lists of [`TagRef`] strings on both ends
//! (`asset_children` on the parent, `asset_parents` on the child), so
//! either direction is a direct lookup. Edges may cross genomes.
//!
//! Cycles are not rejected. Queries only ever walk one hop from the tag they
//! start at.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::config::{normalize, GenomeConfig};
use crate::error::{Result, StoreError};
use crate::path::RegistryPath;

/// Stable identifier of one tag: `genome/asset:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagRef {
    pub genome: String,
    pub asset: String,
    pub tag: String,
}

impl TagRef {
    /// Build a reference; genome and asset names are case-normalized.
    pub fn new(genome: &str, asset: &str, tag: &str) -> Self {
        TagRef {
            genome: normalize(genome),
            asset: normalize(asset),
            tag: tag.to_string(),
        }
    }

    /// Parse `genome/asset:tag`. The tag is required and a seek key is not
    /// allowed.
    pub fn parse(input: &str) -> Result<Self> {
        let path = RegistryPath::parse(input)?;
        if path.seek_key.is_some() {
            return Err(StoreError::MalformedPath {
                path: input.to_string(),
                detail: "a tag reference cannot name a seek key".into(),
            });
        }
        let tag = path.tag.ok_or_else(|| StoreError::MalformedPath {
            path: input.to_string(),
            detail: "a tag reference needs an explicit ':tag'".into(),
        })?;
        Ok(TagRef::new(&path.genome, &path.asset, &tag))
    }

    pub(crate) fn normalized(&self) -> TagRef {
        TagRef::new(&self.genome, &self.asset, &self.tag)
    }

    /// The registry path of this tag's default seek key.
    pub fn registry_path(&self) -> RegistryPath {
        RegistryPath::new(&self.genome, &self.asset).with_tag(&self.tag)
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.genome, self.asset, self.tag)
    }
}

impl FromStr for TagRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        TagRef::parse(s)
    }
}

/// Whether a stored relationship entry names `target`.
fn names(entry: &str, target: &TagRef) -> bool {
    TagRef::parse(entry).map(|r| &r == target).unwrap_or(false)
}

impl GenomeConfig {
    /// Record `parent → child` on both tags. Returns `false` when the edge
    /// was already present.
    pub fn add_edge(&mut self, parent: &TagRef, child: &TagRef) -> Result<bool> {
        let parent = parent.normalized();
        let child = child.normalized();
        self.tag_by_ref(&parent)?;
        self.tag_by_ref(&child)?;

        let mut added = false;
        let parent_tag = self.tag_mut(&parent)?;
        if !parent_tag.asset_children.iter().any(|e| names(e, &child)) {
            parent_tag.asset_children.push(child.to_string());
            added = true;
        }
        let child_tag = self.tag_mut(&child)?;
        if !child_tag.asset_parents.iter().any(|e| names(e, &parent)) {
            child_tag.asset_parents.push(parent.to_string());
            added = true;
        }
        Ok(added)
    }

    /// Drop the `parent → child` edge from both tags. Returns whether
    /// anything was removed.
    pub fn remove_edge(&mut self, parent: &TagRef, child: &TagRef) -> Result<bool> {
        let parent = parent.normalized();
        let child = child.normalized();
        let mut removed = false;

        if let Ok(tag) = self.tag_mut(&parent) {
            let before = tag.asset_children.len();
            tag.asset_children.retain(|e| !names(e, &child));
            removed |= tag.asset_children.len() != before;
        }
        if let Ok(tag) = self.tag_mut(&child) {
            let before = tag.asset_parents.len();
            tag.asset_parents.retain(|e| !names(e, &parent));
            removed |= tag.asset_parents.len() != before;
        }
        Ok(removed)
    }

    /// Sever every edge that mentions `node`, on both ends.
    ///
    /// Sweeps every tag rather than trusting the node's own lists, so
    /// half-recorded edges from hand-edited files are cleared too.
    pub fn remove_node(&mut self, node: &TagRef) -> Result<()> {
        let node = node.normalized();
        self.tag_by_ref(&node)?;

        for (genome_name, genome) in self.genomes.iter_mut() {
            for (asset_name, asset) in genome.assets.iter_mut() {
                for (tag_name, tag) in asset.tags.iter_mut() {
                    let this = TagRef::new(genome_name, asset_name, tag_name);
                    if this == node {
                        tag.asset_parents.clear();
                        tag.asset_children.clear();
                    } else {
                        tag.asset_parents.retain(|e| !names(e, &node));
                        tag.asset_children.retain(|e| !names(e, &node));
                    }
                }
            }
        }
        Ok(())
    }

    /// Tags built from `node`.
    pub fn children(&self, node: &TagRef) -> Result<BTreeSet<TagRef>> {
        let tag = self.tag_by_ref(node)?;
        parse_entries(node, &tag.asset_children)
    }

    /// Tags `node` was built from.
    pub fn parents(&self, node: &TagRef) -> Result<BTreeSet<TagRef>> {
        let tag = self.tag_by_ref(node)?;
        parse_entries(node, &tag.asset_parents)
    }
}

fn parse_entries(owner: &TagRef, entries: &[String]) -> Result<BTreeSet<TagRef>> {
    entries
        .iter()
        .map(|entry| {
            TagRef::parse(entry).map_err(|_| StoreError::DanglingRelationship {
                owner: owner.to_string(),
                entry: entry.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagRecord;
    use std::path::PathBuf;

    fn config_with(tags: &[&str]) -> GenomeConfig {
        let mut cfg = GenomeConfig::new("/g");
        for t in tags {
            let r = TagRef::parse(t).unwrap();
            cfg.register_tag(
                &r,
                TagRecord {
                    asset_path: PathBuf::from(format!("{}/{}/{}", r.genome, r.asset, r.tag)),
                    ..TagRecord::default()
                },
                false,
            )
            .unwrap();
        }
        cfg
    }

    fn r(s: &str) -> TagRef {
        TagRef::parse(s).unwrap()
    }

    #[test]
    fn tag_ref_parse_and_display() {
        let t = r("HG38/Fasta:default");
        assert_eq!(t.genome, "hg38");
        assert_eq!(t.asset, "fasta");
        assert_eq!(t.to_string(), "hg38/fasta:default");
        assert!(TagRef::parse("hg38/fasta").is_err());
        assert!(TagRef::parse("hg38/fasta.fai:default").is_err());
    }

    #[test]
    fn add_edge_is_symmetric() {
        let mut cfg = config_with(&["hg38/fasta:default", "hg38/bowtie2_index:default"]);
        let a = r("hg38/fasta:default");
        let b = r("hg38/bowtie2_index:default");

        assert!(cfg.add_edge(&a, &b).unwrap());
        assert!(cfg.children(&a).unwrap().contains(&b));
        assert!(cfg.parents(&b).unwrap().contains(&a));
    }

    #[test]
    fn add_edge_twice_keeps_one_edge() {
        let mut cfg = config_with(&["hg38/fasta:default", "hg38/bowtie2_index:default"]);
        let a = r("hg38/fasta:default");
        let b = r("hg38/bowtie2_index:default");

        cfg.add_edge(&a, &b).unwrap();
        assert!(!cfg.add_edge(&a, &b).unwrap());
        assert_eq!(cfg.children(&a).unwrap().len(), 1);
        assert_eq!(cfg.tag_by_ref(&a).unwrap().asset_children.len(), 1);
        assert_eq!(cfg.tag_by_ref(&b).unwrap().asset_parents.len(), 1);
    }

    #[test]
    fn remove_node_clears_both_directions() {
        let mut cfg = config_with(&[
            "hg38/fasta:default",
            "hg38/bowtie2_index:default",
            "hg38/bismark_bt2_index:default",
        ]);
        let a = r("hg38/fasta:default");
        let b = r("hg38/bowtie2_index:default");
        let c = r("hg38/bismark_bt2_index:default");
        cfg.add_edge(&a, &b).unwrap();
        cfg.add_edge(&b, &c).unwrap();

        cfg.remove_node(&b).unwrap();
        assert!(!cfg.children(&a).unwrap().contains(&b));
        assert!(!cfg.parents(&c).unwrap().contains(&b));
        assert!(cfg.parents(&b).unwrap().is_empty());
        assert!(cfg.children(&b).unwrap().is_empty());
    }

    #[test]
    fn edges_cross_genomes() {
        let mut cfg = config_with(&["hg38/fasta:default", "hg38_cdna/fasta:default"]);
        let a = r("hg38/fasta:default");
        let b = r("hg38_cdna/fasta:default");
        cfg.add_edge(&a, &b).unwrap();
        assert_eq!(cfg.parents(&b).unwrap().into_iter().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn cycles_do_not_break_queries() {
        let mut cfg = config_with(&["g/a:t", "g/b:t"]);
        cfg.add_edge(&r("g/a:t"), &r("g/b:t")).unwrap();
        cfg.add_edge(&r("g/b:t"), &r("g/a:t")).unwrap();
        assert!(cfg.children(&r("g/a:t")).unwrap().contains(&r("g/b:t")));
        assert!(cfg.parents(&r("g/a:t")).unwrap().contains(&r("g/b:t")));
    }

    #[test]
    fn add_edge_requires_both_tags() {
        let mut cfg = config_with(&["hg38/fasta:default"]);
        let err = cfg
            .add_edge(&r("hg38/fasta:default"), &r("hg38/star_index:default"))
            .unwrap_err();
        assert!(matches!(err, StoreError::AssetNotFound { .. }));
    }

    #[test]
    fn removing_tag_severs_its_edges() {
        let mut cfg = config_with(&["hg38/fasta:default", "hg38/bowtie2_index:default"]);
        let a = r("hg38/fasta:default");
        let b = r("hg38/bowtie2_index:default");
        cfg.add_edge(&a, &b).unwrap();

        cfg.remove_tag(&b).unwrap();
        assert!(cfg.children(&a).unwrap().is_empty());
    }

    #[test]
    fn registered_parents_become_edges() {
        let mut cfg = config_with(&["hg38/fasta:default"]);
        let child = r("hg38/bowtie2_index:default");
        let reg = cfg
            .register_tag(
                &child,
                TagRecord {
                    asset_path: PathBuf::from("hg38/bowtie2_index/default"),
                    parents: vec![r("hg38/fasta:default"), r("hg38/gtf:default")],
                    ..TagRecord::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(reg.skipped_parents, vec![r("hg38/gtf:default")]);
        assert!(cfg.children(&r("hg38/fasta:default")).unwrap().contains(&child));
    }

    #[test]
    fn unparseable_entry_is_reported() {
        let mut cfg = config_with(&["hg38/fasta:default"]);
        let a = r("hg38/fasta:default");
        cfg.tag_mut(&a).unwrap().asset_children.push("not a ref".into());
        assert!(matches!(
            cfg.children(&a),
            Err(StoreError::DanglingRelationship { .. })
        ));
    }
}
