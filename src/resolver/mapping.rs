use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use colored::*;
use crate::error::StandaloneError;
use super::paths::{relative_to, to_slash};
use super::{PathReference, RefKind, Roots};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    File,
    /// Copied recursively as one unit.
    Directory,
    /// Build output location: rewritten, never copied.
    Generated,
    /// The descriptor or the build file, written by the rewrite stages.
    Rewritten,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub source: PathBuf,
    /// Relative to the output root, `/`-separated.
    pub destination: String,
    pub content: Content,
    pub kind: RefKind,
}

/// Source path → destination table. Insertion order is first-seen order.
#[derive(Debug, Clone)]
pub struct OutputMapping {
    entries: Vec<Entry>,
    by_source: HashMap<PathBuf, usize>,
    by_destination: HashMap<String, usize>,
    anchors: Vec<PathBuf>,
    collapsed: Vec<PathBuf>,
    sdk_dir: String,
}

impl OutputMapping {
    fn new(roots: &Roots) -> Self {
        let mut anchors = vec![roots.descriptor_dir.clone(), roots.build_dir.clone(), roots.project_root.clone()];
        anchors.retain(|a| !a.starts_with(&roots.sdk_root));
        Self {
            entries: Vec::new(),
            by_source: HashMap::new(),
            by_destination: HashMap::new(),
            anchors,
            collapsed: Vec::new(),
            sdk_dir: roots.sdk_dir.clone(),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sdk_dir(&self) -> &str {
        &self.sdk_dir
    }

    /// Anchor directories that were referenced and folded onto the output root.
    /// Files inside them arrive only when referenced on their own.
    pub fn collapsed_anchors(&self) -> &[PathBuf] {
        &self.collapsed
    }

    pub fn get(&self, source: &Path) -> Option<&Entry> {
        self.by_source.get(source).map(|&i| &self.entries[i])
    }

    pub fn by_destination(&self, destination: &str) -> Option<&Entry> {
        self.by_destination.get(destination).map(|&i| &self.entries[i])
    }

    /// Destination a reference rewrites to, `None` when the mapping has no entry for it.
    /// Verbatim references rewrite to themselves.
    pub fn destination_of<'a>(&'a self, reference: &'a PathReference) -> Option<Target<'a>> {
        let Some(source) = &reference.source else {
            return Some(Target::Verbatim(&reference.raw));
        };
        if self.anchors.iter().any(|a| a == source) {
            return Some(Target::Destination("."));
        }
        self.get(source).map(|e| Target::Destination(e.destination.as_str()))
    }

    /// Stable digest of the whole table, equal across runs with equal inputs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for entry in &self.entries {
            hasher.update(entry.source.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(entry.destination.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }

    fn insert(&mut self, entry: Entry) -> Result<(), StandaloneError> {
        if let Some(&i) = self.by_source.get(&entry.source) {
            // Same source, same destination: only the content may be upgraded.
            let existing = &mut self.entries[i];
            if existing.content == Content::Generated && matches!(entry.content, Content::File | Content::Directory) {
                existing.content = entry.content;
                existing.kind = entry.kind;
            }
            return Ok(());
        }
        if let Some(&i) = self.by_destination.get(&entry.destination) {
            return Err(StandaloneError::AmbiguousMapping {
                destination: entry.destination,
                first: self.entries[i].source.clone(),
                second: entry.source,
            });
        }
        let index = self.entries.len();
        self.by_source.insert(entry.source.clone(), index);
        self.by_destination.insert(entry.destination.clone(), index);
        self.entries.push(entry);
        Ok(())
    }

    /// Every destination below a copied directory must be that directory's own file.
    /// Anything else would be overwritten by, or overwrite, the recursive copy.
    fn check_nesting(&self) -> Result<(), StandaloneError> {
        for entry in &self.entries {
            let mut ancestor = entry.destination.as_str();
            while let Some(cut) = ancestor.rfind('/') {
                ancestor = &ancestor[..cut];
                let Some(parent) = self.by_destination(ancestor) else {
                    continue;
                };
                let consistent = match parent.content {
                    Content::Generated => true,
                    // A missing directory is still a `File` here; the copy stage reports it.
                    Content::Directory | Content::File => relative_to(&entry.source, &parent.source)
                        .is_some_and(|rel| to_slash(rel) == entry.destination[cut + 1..]),
                    Content::Rewritten => false,
                };
                if !consistent {
                    return Err(StandaloneError::AmbiguousMapping {
                        destination: entry.destination.clone(),
                        first: parent.source.clone(),
                        second: entry.source.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn collapse(&mut self, anchor: &Path) {
        if self.collapsed.iter().any(|a| a == anchor) {
            return;
        }
        log::warn!(
            "{} {} maps onto the output root; only its referenced files are copied",
            "⚠️".yellow(),
            anchor.display()
        );
        self.collapsed.push(anchor.to_path_buf());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Verbatim(&'a str),
    Destination(&'a str),
}

/// Groups references by source and assigns one destination per group.
/// `reserved` are files the pipeline itself writes at the given destinations.
pub fn build_mapping(
    roots: &Roots,
    references: &[PathReference],
    reserved: &[(PathBuf, String)],
) -> Result<OutputMapping, StandaloneError> {
    let mut mapping = OutputMapping::new(roots);

    for (source, destination) in reserved {
        mapping.insert(Entry {
            source: source.clone(),
            destination: destination.clone(),
            content: Content::Rewritten,
            kind: RefKind::Local,
        })?;
    }

    for reference in references {
        let Some(source) = &reference.source else {
            continue;
        };
        if mapping.anchors.iter().any(|a| a == source) {
            mapping.collapse(source);
            continue;
        }

        let destination = roots.place(source).map_err(|reason| StandaloneError::UnresolvedReference {
            raw: reference.raw.clone(),
            origin: reference.origin.to_string(),
            reason,
        })?;

        let content = if reference.kind == RefKind::Fixed {
            Content::Generated
        } else {
            match fs::metadata(source) {
                Ok(meta) if meta.is_dir() => Content::Directory,
                // Missing sources stay files here; the copy stage reports them.
                _ => Content::File,
            }
        };

        log::debug!("{} {} -> {}", reference.kind, source.display(), destination);
        mapping.insert(Entry {
            source: source.clone(),
            destination,
            content,
            kind: reference.kind,
        })?;
    }

    mapping.check_nesting()?;
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Origin;

    fn roots() -> Roots {
        Roots {
            project_root: PathBuf::from("/work/blinky"),
            sdk_root: PathBuf::from("/opt/sdk"),
            descriptor_dir: PathBuf::from("/work/blinky/ses"),
            build_dir: PathBuf::from("/work/blinky/armgcc"),
            sdk_dir: "sdk_files".to_string(),
        }
    }

    fn reference(raw: &str, kind: RefKind, source: &str) -> PathReference {
        PathReference {
            raw: raw.to_string(),
            origin: Origin::Implicit("test"),
            kind,
            source: Some(PathBuf::from(source)),
        }
    }

    #[test]
    fn test_same_source_shares_one_destination() {
        let refs = vec![
            reference("../../../../opt/sdk/components/x.h", RefKind::Sdk, "/opt/sdk/components/x.h"),
            reference("$(SDK_ROOT)/components/x.h", RefKind::Sdk, "/opt/sdk/components/x.h"),
        ];
        let mapping = build_mapping(&roots(), &refs, &[]).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.destination_of(&refs[0]), mapping.destination_of(&refs[1]));
        assert_eq!(mapping.destination_of(&refs[0]), Some(Target::Destination("sdk_files/components/x.h")));
    }

    #[test]
    fn test_destination_collision_is_reported() {
        // ses/main.c and the project root's main.c both land on "main.c".
        let refs = vec![
            reference("main.c", RefKind::Local, "/work/blinky/ses/main.c"),
            reference("../main.c", RefKind::Local, "/work/blinky/main.c"),
        ];
        let err = build_mapping(&roots(), &refs, &[]).unwrap_err();
        match err {
            StandaloneError::AmbiguousMapping { destination, first, second } => {
                assert_eq!(destination, "main.c");
                assert_eq!(first, PathBuf::from("/work/blinky/ses/main.c"));
                assert_eq!(second, PathBuf::from("/work/blinky/main.c"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_reserved_destinations_collide_with_references() {
        let reserved = vec![(PathBuf::from("/work/blinky/armgcc/Makefile"), "Makefile".to_string())];
        let refs = vec![reference("Makefile", RefKind::Local, "/work/blinky/ses/Makefile")];
        assert!(matches!(
            build_mapping(&roots(), &refs, &reserved),
            Err(StandaloneError::AmbiguousMapping { .. })
        ));
    }

    #[test]
    fn test_mapping_is_independent_of_reference_order() {
        let a = reference("x.c", RefKind::Sdk, "/opt/sdk/components/x.c");
        let b = reference("../main.c", RefKind::Local, "/work/blinky/main.c");
        let forward = build_mapping(&roots(), &[a.clone(), b.clone()], &[]).unwrap();
        let backward = build_mapping(&roots(), &[b.clone(), a.clone()], &[]).unwrap();
        for r in [&a, &b] {
            assert_eq!(forward.destination_of(r), backward.destination_of(r));
        }
    }

    #[test]
    fn test_anchor_references_map_to_root_without_entry() {
        let r = reference(".", RefKind::Fixed, "/work/blinky/ses");
        let mapping = build_mapping(&roots(), &[r.clone()], &[]).unwrap();
        assert!(mapping.is_empty());
        assert_eq!(mapping.destination_of(&r), Some(Target::Destination(".")));
    }

    #[test]
    fn test_collapsed_anchors_are_recorded_once() {
        let refs = vec![
            reference(".", RefKind::Fixed, "/work/blinky/ses"),
            reference("..", RefKind::Fixed, "/work/blinky"),
            reference("$(ProjectDir)", RefKind::Fixed, "/work/blinky/ses"),
            reference("../main.c", RefKind::Local, "/work/blinky/main.c"),
        ];
        let mapping = build_mapping(&roots(), &refs, &[]).unwrap();
        assert_eq!(
            mapping.collapsed_anchors(),
            &[PathBuf::from("/work/blinky/ses"), PathBuf::from("/work/blinky")]
        );
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_file_nested_under_foreign_directory_is_ambiguous() {
        // armgcc/config copies onto "config", while the project root's config/sdk_config.h
        // would land inside it.
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("proj/armgcc/config")).unwrap();
        let roots = Roots {
            project_root: root.join("proj"),
            sdk_root: root.join("sdk"),
            descriptor_dir: root.join("proj/ses"),
            build_dir: root.join("proj/armgcc"),
            sdk_dir: "sdk_files".to_string(),
        };
        let dir = PathReference {
            raw: "config".to_string(),
            origin: Origin::Implicit("test"),
            kind: RefKind::Local,
            source: Some(root.join("proj/armgcc/config")),
        };
        let file = PathReference {
            raw: "../config/sdk_config.h".to_string(),
            origin: Origin::Implicit("test"),
            kind: RefKind::Local,
            source: Some(root.join("proj/config/sdk_config.h")),
        };

        for refs in [vec![dir.clone(), file.clone()], vec![file.clone(), dir.clone()]] {
            match build_mapping(&roots, &refs, &[]).unwrap_err() {
                StandaloneError::AmbiguousMapping { destination, first, second } => {
                    assert_eq!(destination, "config/sdk_config.h");
                    assert_eq!(first, root.join("proj/armgcc/config"));
                    assert_eq!(second, root.join("proj/config/sdk_config.h"));
                }
                other => panic!("unexpected error: {}", other),
            }
        }
    }

    #[test]
    fn test_directory_own_files_may_nest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sdk/components/util")).unwrap();
        let roots = Roots {
            project_root: root.join("proj"),
            sdk_root: root.join("sdk"),
            descriptor_dir: root.join("proj/ses"),
            build_dir: root.join("proj/armgcc"),
            sdk_dir: "sdk_files".to_string(),
        };
        let refs: Vec<PathReference> = ["components/util/x.h", "components/util"]
            .iter()
            .map(|rel| PathReference {
                raw: rel.to_string(),
                origin: Origin::Implicit("test"),
                kind: RefKind::Sdk,
                source: Some(root.join("sdk").join(rel)),
            })
            .collect();
        let mapping = build_mapping(&roots, &refs, &[]).unwrap();
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_fixed_output_locations_are_generated() {
        let r = reference("../_build", RefKind::Fixed, "/work/blinky/_build");
        let mapping = build_mapping(&roots(), &[r], &[]).unwrap();
        assert_eq!(mapping.entries()[0].content, Content::Generated);
        assert_eq!(mapping.entries()[0].destination, "_build");
    }

    #[test]
    fn test_verbatim_reference() {
        let r = PathReference {
            raw: "$(StudioDir)/include".to_string(),
            origin: Origin::Implicit("test"),
            kind: RefKind::Fixed,
            source: None,
        };
        let mapping = build_mapping(&roots(), &[r.clone()], &[]).unwrap();
        assert_eq!(mapping.destination_of(&r), Some(Target::Verbatim("$(StudioDir)/include")));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let refs = vec![reference("x.c", RefKind::Sdk, "/opt/sdk/components/x.c")];
        let a = build_mapping(&roots(), &refs, &[]).unwrap();
        let b = build_mapping(&roots(), &refs, &[]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
