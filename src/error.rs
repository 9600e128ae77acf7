use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that end a run. Every one of them is fatal.
#[derive(Error, Debug)]
pub enum StandaloneError {
    #[error("Missing {what}: {}", path.display())]
    MissingInput { path: PathBuf, what: &'static str },

    #[error(
        "Ambiguous mapping: '{destination}' is claimed by both {} and {}",
        first.display(),
        second.display()
    )]
    AmbiguousMapping {
        destination: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Unresolved reference '{raw}' ({origin}): {reason}")]
    UnresolvedReference {
        raw: String,
        origin: String,
        reason: String,
    },

    #[error("Cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

impl StandaloneError {
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StandaloneError::Write {
            path: path.into(),
            source,
        }
    }
}
