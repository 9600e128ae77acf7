use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use super::paths::{from_raw, normalize};

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$[({]([A-Za-z_][A-Za-z0-9_]*)[)}]").expect("static pattern")
});

// Recursive make variables rarely nest deeper than this.
const MAX_EXPANSION_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    /// Lexically resolved absolute path.
    Path(PathBuf),
    /// The raw text uses a variable this scope does not define.
    Unknown(String),
}

/// The directory a reference is relative to, plus the variables that may appear in it.
#[derive(Debug, Clone)]
pub struct Scope {
    pub dir: PathBuf,
    vars: HashMap<String, String>,
}

impl Scope {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            vars: HashMap::new(),
        }
    }

    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.define(name, value);
        self
    }

    pub fn define(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(name.to_string(), value.into());
    }

    /// Substitutes every `$(NAME)` / `${NAME}` and resolves the result against `dir`.
    pub fn expand(&self, raw: &str) -> Expansion {
        let mut text = raw.trim().to_string();

        for _ in 0..MAX_EXPANSION_DEPTH {
            let Some(caps) = VARIABLE_RE.captures(&text) else {
                // `$(wildcard ...)` and other function calls are not paths.
                if text.contains("$(") || text.contains("${") {
                    return Expansion::Unknown(text);
                }
                return Expansion::Path(self.resolve(&text));
            };
            let name = &caps[1];
            let Some(value) = self.vars.get(name) else {
                return Expansion::Unknown(name.to_string());
            };
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            text.replace_range(whole, value);
        }

        // Self-referencing definitions never settle.
        match VARIABLE_RE.captures(&text) {
            Some(caps) => Expansion::Unknown(caps[1].to_string()),
            None => Expansion::Path(self.resolve(&text)),
        }
    }

    fn resolve(&self, text: &str) -> PathBuf {
        let path = from_raw(text);
        if path.is_absolute() {
            normalize(&path)
        } else {
            normalize(&join(&self.dir, &path))
        }
    }
}

fn join(base: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(rel)
    }
}
