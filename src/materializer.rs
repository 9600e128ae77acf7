use anyhow::Result;
use colored::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::error::StandaloneError;
use crate::resolver::{Content, OutputMapping};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MaterializeReport {
    pub files_copied: usize,
    /// Destination already held identical bytes.
    pub files_unchanged: usize,
    pub directories: usize,
    /// Entries already brought in by an enclosing directory entry.
    pub covered: usize,
}

/// Copies every file and directory entry of the mapping under `output_root`, in mapping order.
/// Stops at the first missing source or I/O failure.
pub fn materialize(mapping: &OutputMapping, output_root: &Path) -> Result<MaterializeReport> {
    let mut report = MaterializeReport::default();
    let mut copied_dirs: Vec<(&Path, &str)> = Vec::new();

    for entry in mapping.entries() {
        if !matches!(entry.content, Content::File | Content::Directory) {
            continue;
        }

        let meta = fs::metadata(&entry.source).map_err(|_| StandaloneError::MissingInput {
            path: entry.source.clone(),
            what: "referenced source",
        })?;

        if is_covered(&entry.source, &entry.destination, &copied_dirs) {
            log::debug!("Already copied with its directory: {}", entry.destination);
            report.covered += 1;
            continue;
        }
        let target = output_root.join(&entry.destination);

        if meta.is_dir() {
            log::info!("{} Copying directory: {}", "📁".blue(), entry.destination);
            copy_dir_recursive(&entry.source, &target, &mut report)?;
            report.directories += 1;
            copied_dirs.push((entry.source.as_path(), entry.destination.as_str()));
        } else {
            log::debug!("Copying file: {}", entry.destination);
            copy_file(&entry.source, &target, &mut report)?;
        }
    }

    Ok(report)
}

fn is_covered(source: &Path, destination: &str, copied_dirs: &[(&Path, &str)]) -> bool {
    copied_dirs.iter().any(|(dir_source, dir_destination)| {
        source
            .strip_prefix(dir_source)
            .map(|rel| Path::new(dir_destination).join(rel) == Path::new(destination))
            .unwrap_or(false)
    })
}

pub fn copy_dir_recursive(src: &Path, dst: &Path, report: &mut MaterializeReport) -> Result<()> {
    for item in WalkDir::new(src).sort_by_file_name() {
        let item = item.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            let source = e.into_io_error().unwrap_or_else(|| io::Error::other("filesystem loop"));
            StandaloneError::write(path, source)
        })?;
        let rel = item.path().strip_prefix(src).unwrap_or(item.path());
        let target = dst.join(rel);

        if item.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| StandaloneError::write(&target, e))?;
        } else {
            copy_file(item.path(), &target, report)?;
        }
    }
    Ok(())
}

/// Copies unless `dst` already holds the same bytes, so re-runs leave mtimes alone.
pub fn copy_file(src: &Path, dst: &Path, report: &mut MaterializeReport) -> Result<()> {
    if same_content(src, dst) {
        report.files_unchanged += 1;
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| StandaloneError::write(parent, e))?;
    }
    fs::copy(src, dst).map_err(|e| StandaloneError::write(dst, e))?;
    report.files_copied += 1;
    Ok(())
}

/// Writes rewritten text, skipping the write when the file already has it.
pub fn write_text(path: &Path, content: &str) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if blake3::hash(&existing) == blake3::hash(content.as_bytes()) {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StandaloneError::write(parent, e))?;
    }
    fs::write(path, content).map_err(|e| StandaloneError::write(path, e))?;
    Ok(true)
}

fn same_content(src: &Path, dst: &Path) -> bool {
    match (digest(src), digest(dst)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn digest(path: &Path) -> io::Result<blake3::Hash> {
    Ok(blake3::hash(&fs::read(path)?))
}

/// Creates the output root, refusing a non-empty one unless `force` is set.
pub fn prepare_output(output_root: &Path, force: bool) -> Result<PathBuf> {
    if output_root.exists() {
        if !output_root.is_dir() {
            return Err(StandaloneError::write(
                output_root,
                io::Error::new(io::ErrorKind::AlreadyExists, "exists and is not a directory"),
            )
            .into());
        }
        let non_empty = fs::read_dir(output_root)
            .map_err(|e| StandaloneError::write(output_root, e))?
            .next()
            .is_some();
        if non_empty && !force {
            return Err(StandaloneError::write(
                output_root,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "output directory is not empty (use --force to write into it)",
                ),
            )
            .into());
        }
        if non_empty {
            log::warn!("{} Writing into non-empty output directory {}", "⚠️".yellow(), output_root.display());
        }
    }
    fs::create_dir_all(output_root).map_err(|e| StandaloneError::write(output_root, e))?;
    Ok(output_root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{build_mapping, Origin, PathReference, RefKind, Roots};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Roots) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let roots = Roots {
            project_root: root.join("proj"),
            sdk_root: root.join("sdk"),
            descriptor_dir: root.join("proj/ses"),
            build_dir: root.join("proj/armgcc"),
            sdk_dir: "sdk_files".to_string(),
        };
        fs::create_dir_all(root.join("sdk/components/util")).unwrap();
        fs::write(root.join("sdk/components/util/x.h"), "#define X 1\n").unwrap();
        fs::write(root.join("sdk/components/util/x.c"), "int x;\n").unwrap();
        fs::create_dir_all(root.join("proj/ses")).unwrap();
        fs::write(root.join("proj/main.c"), "int main(void) { return 0; }\n").unwrap();
        (tmp, roots)
    }

    fn sdk_ref(roots: &Roots, rel: &str) -> PathReference {
        PathReference {
            raw: rel.to_string(),
            origin: Origin::Implicit("test"),
            kind: RefKind::Sdk,
            source: Some(roots.sdk_root.join(rel)),
        }
    }

    #[test]
    fn test_materialize_copies_files_and_directories() {
        let (tmp, roots) = setup();
        let refs = vec![
            sdk_ref(&roots, "components/util"),
            PathReference {
                raw: "../main.c".to_string(),
                origin: Origin::Implicit("test"),
                kind: RefKind::Local,
                source: Some(roots.project_root.join("main.c")),
            },
        ];
        let mapping = build_mapping(&roots, &refs, &[]).unwrap();
        let out = tmp.path().join("out");
        let report = materialize(&mapping, &out).unwrap();

        assert_eq!(report.directories, 1);
        assert_eq!(report.files_copied, 3);
        assert!(out.join("sdk_files/components/util/x.h").is_file());
        assert!(out.join("sdk_files/components/util/x.c").is_file());
        assert!(out.join("main.c").is_file());
    }

    #[test]
    fn test_files_inside_copied_directory_are_covered() {
        let (tmp, roots) = setup();
        let refs = vec![sdk_ref(&roots, "components/util"), sdk_ref(&roots, "components/util/x.h")];
        let mapping = build_mapping(&roots, &refs, &[]).unwrap();
        let report = materialize(&mapping, &tmp.path().join("out")).unwrap();
        assert_eq!(report.covered, 1);
        assert_eq!(report.files_copied, 2);
    }

    #[test]
    fn test_missing_source_fails_before_later_entries() {
        let (tmp, roots) = setup();
        let refs = vec![
            sdk_ref(&roots, "components/util/x.h"),
            sdk_ref(&roots, "components/missing.h"),
            sdk_ref(&roots, "components/util/x.c"),
        ];
        let mapping = build_mapping(&roots, &refs, &[]).unwrap();
        let out = tmp.path().join("out");
        let err = materialize(&mapping, &out).unwrap_err();

        match err.downcast_ref::<StandaloneError>() {
            Some(StandaloneError::MissingInput { path, .. }) => {
                assert_eq!(path, &roots.sdk_root.join("components/missing.h"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(out.join("sdk_files/components/util/x.h").is_file());
        assert!(!out.join("sdk_files/components/util/x.c").exists());
    }

    #[test]
    fn test_missing_file_inside_copied_directory_is_reported() {
        let (tmp, roots) = setup();
        let refs = vec![sdk_ref(&roots, "components/util"), sdk_ref(&roots, "components/util/gone.h")];
        let mapping = build_mapping(&roots, &refs, &[]).unwrap();
        let err = materialize(&mapping, &tmp.path().join("out")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StandaloneError>(),
            Some(StandaloneError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_second_run_leaves_files_unchanged() {
        let (tmp, roots) = setup();
        let refs = vec![sdk_ref(&roots, "components/util/x.h")];
        let mapping = build_mapping(&roots, &refs, &[]).unwrap();
        let out = tmp.path().join("out");
        materialize(&mapping, &out).unwrap();
        let report = materialize(&mapping, &out).unwrap();
        assert_eq!(report.files_copied, 0);
        assert_eq!(report.files_unchanged, 1);
    }

    #[test]
    fn test_prepare_output_refuses_non_empty_directory() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("stale.txt"), "x").unwrap();
        assert!(prepare_output(tmp.path(), false).is_err());
        assert!(prepare_output(tmp.path(), true).is_ok());
        assert!(prepare_output(&tmp.path().join("fresh"), false).is_ok());
    }

    #[test]
    fn test_write_text_skips_identical_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Makefile");
        assert!(write_text(&path, "all:\n").unwrap());
        assert!(!write_text(&path, "all:\n").unwrap());
        assert!(write_text(&path, "all: x\n").unwrap());
    }
}
