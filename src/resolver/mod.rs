pub mod paths;
pub mod scope;
pub mod mapping;

use std::fmt;
use std::path::{Path, PathBuf};
use crate::error::StandaloneError;
use self::paths::{relative_to, to_slash};
use self::scope::{Expansion, Scope};

pub use self::mapping::{build_mapping, Content, Entry, OutputMapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Project file living beside the descriptor or the build file.
    Local,
    /// File or directory inside the external SDK tree.
    Sdk,
    /// Build support makefile that is always vendored.
    Toolchain,
    /// Build output location, variable-rooted path or self reference: nothing to copy.
    Fixed,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefKind::Local => "local",
            RefKind::Sdk => "sdk",
            RefKind::Toolchain => "toolchain",
            RefKind::Fixed => "fixed",
        };
        f.write_str(label)
    }
}

/// Whether a field names something to read or a location the build will generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Descriptor {
        element: String,
        attribute: String,
        index: Option<usize>,
    },
    BuildFile {
        line: usize,
    },
    Implicit(&'static str),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Descriptor { element, attribute, index: Some(i) } => {
                write!(f, "<{}> {}[{}]", element, attribute, i)
            }
            Origin::Descriptor { element, attribute, index: None } => {
                write!(f, "<{}> {}", element, attribute)
            }
            Origin::BuildFile { line } => write!(f, "build file line {}", line),
            Origin::Implicit(why) => f.write_str(why),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathReference {
    pub raw: String,
    pub origin: Origin,
    pub kind: RefKind,
    /// `None` only for fixed references kept verbatim.
    pub source: Option<PathBuf>,
}

/// The base directories of one run. Computed once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct Roots {
    pub project_root: PathBuf,
    pub sdk_root: PathBuf,
    pub descriptor_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Name of the SDK subtree under the output root.
    pub sdk_dir: String,
}

impl Roots {
    /// Directories that are relocated onto the output root itself.
    pub fn is_anchor(&self, path: &Path) -> bool {
        path == self.descriptor_dir || path == self.build_dir || path == self.project_root
    }

    /// Destination of a resolved source, relative to the output root.
    /// Pure function of the source path: SDK first, then the anchor directories, then the project root.
    /// An anchor outside the SDK lands on the output root itself.
    pub fn place(&self, source: &Path) -> Result<String, String> {
        if let Some(rel) = relative_to(source, &self.sdk_root) {
            if rel.as_os_str().is_empty() {
                return Err("refers to the SDK root itself".to_string());
            }
            return Ok(format!("{}/{}", self.sdk_dir, to_slash(rel)));
        }
        if self.is_anchor(source) {
            return Ok(".".to_string());
        }
        for base in [&self.descriptor_dir, &self.build_dir, &self.project_root] {
            if let Some(rel) = relative_to(source, base) {
                return Ok(to_slash(rel));
            }
        }
        Err(format!(
            "{} is outside both the SDK root ({}) and the project root ({})",
            source.display(),
            self.sdk_root.display(),
            self.project_root.display()
        ))
    }
}

pub struct Resolver<'a> {
    roots: &'a Roots,
}

impl<'a> Resolver<'a> {
    pub fn new(roots: &'a Roots) -> Self {
        Self { roots }
    }

    /// Lexical classification of one raw reference. Never looks at the filesystem.
    pub fn classify(&self, raw: &str, scope: &Scope, role: Role) -> Result<(RefKind, Option<PathBuf>), String> {
        let source = match scope.expand(raw) {
            Expansion::Unknown(var) => {
                log::debug!("Keeping '{}' verbatim (unknown variable {})", raw, var);
                return Ok((RefKind::Fixed, None));
            }
            Expansion::Path(p) => p,
        };

        // Fixed entries still need a destination, so placement errors surface for them too.
        let destination = self.roots.place(&source)?;

        if role == Role::Output {
            return Ok((RefKind::Fixed, Some(source)));
        }
        if source.starts_with(&self.roots.sdk_root) {
            return Ok((RefKind::Sdk, Some(source)));
        }
        if destination == "." {
            return Ok((RefKind::Fixed, Some(source)));
        }
        Ok((RefKind::Local, Some(source)))
    }

    /// Classifies and wraps into a reference, turning failures into `UnresolvedReference`.
    pub fn reference(&self, raw: &str, origin: Origin, scope: &Scope, role: Role) -> Result<PathReference, StandaloneError> {
        match self.classify(raw, scope, role) {
            Ok((kind, source)) => Ok(PathReference {
                raw: raw.to_string(),
                origin,
                kind,
                source,
            }),
            Err(reason) => Err(StandaloneError::UnresolvedReference {
                raw: raw.to_string(),
                origin: origin.to_string(),
                reason,
            }),
        }
    }

    /// Toolchain support file given relative to the SDK root.
    pub fn toolchain(&self, sdk_relative: &str) -> Result<PathReference, StandaloneError> {
        let source = paths::normalize(&self.roots.sdk_root.join(paths::from_raw(sdk_relative)));
        if !source.starts_with(&self.roots.sdk_root) || source == self.roots.sdk_root {
            return Err(StandaloneError::UnresolvedReference {
                raw: sdk_relative.to_string(),
                origin: "toolchain files".to_string(),
                reason: "toolchain files must lie inside the SDK root".to_string(),
            });
        }
        Ok(PathReference {
            raw: sdk_relative.to_string(),
            origin: Origin::Implicit("toolchain support file"),
            kind: RefKind::Toolchain,
            source: Some(source),
        })
    }
}
