use anyhow::{Context, Result};
use colored::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "standalone.toml";

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct StandaloneConfig {
    /// Relative to the directory of the config file.
    pub sdk_root: Option<PathBuf>,
    pub project_root: Option<PathBuf>,
    /// Subdirectory of the output root holding the vendored SDK subset.
    pub sdk_dir: String,
    pub descriptor: DescriptorConfig,
    pub build_file: BuildFileConfig,
    pub toolchain: ToolchainConfig,
    /// Directory the relative paths above are taken from. Not part of the file.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorConfig {
    /// `;`-separated path lists.
    pub list_attributes: Vec<String>,
    pub path_attributes: Vec<String>,
    /// `;`-separated `NAME=value` lists; values that look like paths are rewritten.
    pub macro_attributes: Vec<String>,
    /// Build output locations: rewritten, never copied.
    pub output_attributes: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct BuildFileConfig {
    pub name: String,
    pub root_variable: String,
    pub project_variable: String,
    /// Assignments whose values are lists of paths.
    pub path_variables: Vec<String>,
    pub linker_script_glob: Option<String>,
    /// Lines inserted after the last `CFLAGS +=` statement.
    pub extra_cflags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Always vendored, relative to the SDK root.
    pub files: Vec<String>,
    /// Copied makefile holding the install root default.
    pub makefile: String,
    pub install_root_variable: String,
    pub compiler: String,
    pub install_root: Option<String>,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            sdk_root: None,
            project_root: None,
            sdk_dir: "sdk_files".to_string(),
            descriptor: DescriptorConfig::default(),
            build_file: BuildFileConfig::default(),
            toolchain: ToolchainConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            list_attributes: strings(&[
                "c_user_include_directories",
                "c_system_include_directories",
                "asm_additional_include_directories",
            ]),
            path_attributes: strings(&[
                "file_name",
                "linker_section_placement_file",
                "linker_script_file",
                "debug_additional_load_file",
                "debug_register_definition_file",
            ]),
            macro_attributes: strings(&["macros"]),
            output_attributes: strings(&["build_output_directory", "build_intermediate_directory"]),
        }
    }
}

impl Default for BuildFileConfig {
    fn default() -> Self {
        Self {
            name: "Makefile".to_string(),
            root_variable: "SDK_ROOT".to_string(),
            project_variable: "PROJ_DIR".to_string(),
            path_variables: strings(&["SRC_FILES", "INC_FOLDERS", "LIB_FILES", "LINKER_SCRIPT"]),
            linker_script_glob: Some("*.ld".to_string()),
            extra_cflags: Vec::new(),
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            files: strings(&[
                "components/toolchain/gcc/Makefile.common",
                "components/toolchain/gcc/Makefile.posix",
            ]),
            makefile: "components/toolchain/gcc/Makefile.posix".to_string(),
            install_root_variable: "GNU_INSTALL_ROOT".to_string(),
            compiler: "arm-none-eabi-gcc".to_string(),
            install_root: None,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl StandaloneConfig {
    pub fn sdk_root(&self) -> Option<PathBuf> {
        self.sdk_root.as_ref().map(|p| self.base_dir.join(p))
    }

    pub fn project_root(&self) -> Option<PathBuf> {
        self.project_root.as_ref().map(|p| self.base_dir.join(p))
    }
}

/// Loads `explicit` if given, else `standalone.toml` next to the descriptor, else defaults.
pub fn load_config(descriptor_dir: &Path, explicit: Option<&Path>) -> Result<StandaloneConfig> {
    let config_path = match explicit {
        Some(p) => {
            if !p.is_file() {
                return Err(crate::error::StandaloneError::MissingInput {
                    path: p.to_path_buf(),
                    what: "config file",
                }
                .into());
            }
            p.to_path_buf()
        }
        None => {
            let candidate = descriptor_dir.join(CONFIG_FILE_NAME);
            if !candidate.is_file() {
                log::debug!("No {} in {:?}, using defaults", CONFIG_FILE_NAME, descriptor_dir);
                return Ok(StandaloneConfig {
                    base_dir: descriptor_dir.to_path_buf(),
                    ..StandaloneConfig::default()
                });
            }
            candidate
        }
    };

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let mut config: StandaloneConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;
    config.base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| descriptor_dir.to_path_buf());

    log::info!("{} Loaded config from: {}", "⚙".cyan(), config_path.display().to_string().bold());
    Ok(config)
}

/// Process environment with `.env` from `dir` layered on top.
/// The global environment itself is left untouched.
pub fn load_env(dir: &Path) -> Result<HashMap<String, String>> {
    let mut vars: HashMap<String, String> = env::vars().collect();

    let env_path = dir.join(".env");
    if env_path.exists() {
        log::info!("{} Loading environment from: {}", "🌿".green(), env_path.display().to_string().bold());
        for item in dotenvy::from_path_iter(&env_path)? {
            let (key, val) = item?;
            vars.insert(key, val);
        }
    }

    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.sdk_dir, "sdk_files");
        assert_eq!(config.build_file.root_variable, "SDK_ROOT");
        assert!(config.descriptor.path_attributes.contains(&"file_name".to_string()));
        assert!(config.sdk_root().is_none());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "sdk_root = \"../sdk\"\n\n[build_file]\nextra_cflags = [\"CFLAGS += -Wno-array-bounds\"]\n",
        )
        .unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.sdk_root().unwrap(), dir.path().join("../sdk"));
        assert_eq!(config.build_file.extra_cflags, vec!["CFLAGS += -Wno-array-bounds".to_string()]);
        assert_eq!(config.build_file.name, "Makefile");
        assert_eq!(config.toolchain.compiler, "arm-none-eabi-gcc");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "sdk_rot = \"typo\"\n").unwrap();
        assert!(load_config(dir.path(), None).is_err());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = load_config(dir.path(), Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.downcast_ref::<crate::error::StandaloneError>().is_some());
    }

    #[test]
    fn test_dotenv_overrides_process_env() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "GNU_INSTALL_ROOT=/opt/gcc/bin/\n").unwrap();
        let vars = load_env(dir.path()).unwrap();
        assert_eq!(vars.get("GNU_INSTALL_ROOT").map(String::as_str), Some("/opt/gcc/bin/"));
    }
}
