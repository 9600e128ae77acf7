use colored::*;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use crate::config::ToolchainConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct InstallRoot {
    /// Directory holding the compiler binaries, with a trailing `/` as the makefiles expect.
    pub path: String,
    pub found_via: &'static str,
}

/// First of: explicit flag, environment (with `.env`), config, compiler found on `PATH`.
pub fn discover_install_root(
    explicit: Option<&Path>,
    env: &HashMap<String, String>,
    config: &ToolchainConfig,
) -> Option<InstallRoot> {
    if let Some(p) = explicit {
        return Some(install_root(&p.to_string_lossy(), "--gnu-install-root"));
    }
    if let Some(v) = env.get(&config.install_root_variable).filter(|v| !v.trim().is_empty()) {
        return Some(install_root(v, "environment"));
    }
    if let Some(v) = &config.install_root {
        return Some(install_root(v, "config"));
    }
    match which::which(&config.compiler) {
        Ok(compiler) => compiler
            .parent()
            .map(|dir| install_root(&dir.to_string_lossy(), "PATH")),
        Err(_) => None,
    }
}

fn install_root(raw: &str, found_via: &'static str) -> InstallRoot {
    let trimmed = raw.trim().trim_end_matches('/');
    InstallRoot {
        path: format!("{}/", trimmed),
        found_via,
    }
}

/// Rewrites the `VAR ?= default` line when the default differs from `install_root`.
/// `None` when the file has no such line or it already matches.
pub fn adjust_install_root(text: &str, variable: &str, install_root: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?m)^(?P<lead>[ \t]*{}[ \t]*(?:\?=|:=|=)[ \t]*)(?P<value>[^\r\n#]*?)(?P<tail>[ \t]*(?:#[^\r\n]*)?)\r?$",
        regex::escape(variable)
    ))
    .ok()?;

    let caps = re.captures(text)?;
    let current = caps.name("value")?.as_str();
    if current.trim_end_matches('/') == install_root.trim_end_matches('/') {
        return None;
    }

    let value = caps.name("value")?;
    log::info!(
        "{} Toolchain default {} -> {}",
        "🔧".yellow(),
        current.dimmed(),
        install_root.bold()
    );
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..value.start()]);
    out.push_str(install_root);
    out.push_str(&text[value.end()..]);
    Some(out)
}
