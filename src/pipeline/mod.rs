
use anyhow::{bail, Context, Result};
use colored::*;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use crate::build_file::rules::RuleSet;
use crate::build_file::{self, BuildFile, Edit, Token, TokenEdits};
use crate::config::{load_config, load_env, StandaloneConfig};
use crate::descriptor::{Descriptor, FieldReference};
use crate::error::StandaloneError;
use crate::materializer::{self, MaterializeReport};
use crate::resolver::paths::{absolutize, from_raw};
use crate::resolver::scope::{Expansion, Scope};
use crate::resolver::{build_mapping, Origin, OutputMapping, PathReference, Resolver, Role, Roots};
use crate::toolchain::{adjust_install_root, discover_install_root, InstallRoot};

/// Inputs of one run, already parsed from the command line.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub project_file: PathBuf,
    pub output_dir: PathBuf,
    /// Defaults to the descriptor's directory.
    pub makefile_dir: Option<PathBuf>,
    pub sdk_root: Option<PathBuf>,
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub gnu_install_root: Option<PathBuf>,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Resolve,
    Copy,
    RewriteDescriptor,
    RewriteBuildFile,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Parse => "PARSE",
            Stage::Resolve => "RESOLVE",
            Stage::Copy => "COPY",
            Stage::RewriteDescriptor => "REWRITE-DESCRIPTOR",
            Stage::RewriteBuildFile => "REWRITE-BUILD-FILE",
            Stage::Done => "DONE",
        };
        f.write_str(label)
    }
}

fn enter(stage: Stage) {
    log::info!("{} {}", "▶".cyan(), stage.to_string().bold());
}

/// Everything PARSE and RESOLVE produce. Nothing has been written yet.
#[derive(Debug)]
pub struct Plan {
    pub roots: Roots,
    pub config: StandaloneConfig,
    pub descriptor: Descriptor,
    pub descriptor_path: PathBuf,
    pub descriptor_name: String,
    pub descriptor_refs: Vec<FieldReference>,
    pub build_file: BuildFile,
    pub build_path: PathBuf,
    pub build_name: String,
    pub build_refs: Vec<(Token, PathReference)>,
    /// References no file field points at: linker scripts and toolchain files.
    pub implicit_refs: Vec<PathReference>,
    pub mapping: OutputMapping,
    pub env: HashMap<String, String>,
}

impl Plan {
    pub fn references(&self) -> impl Iterator<Item = &PathReference> {
        self.descriptor_refs
            .iter()
            .map(|f| &f.reference)
            .chain(self.build_refs.iter().map(|(_, r)| r))
            .chain(self.implicit_refs.iter())
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output_root: PathBuf,
    pub entries: usize,
    pub fingerprint: String,
    pub copy: MaterializeReport,
    pub descriptor_written: bool,
    pub build_file_written: bool,
    pub install_root: Option<InstallRoot>,
}

pub fn run(opts: &Options) -> Result<RunSummary> {
    let plan = plan(opts)?;
    execute(&plan, opts)
}

/// PARSE and RESOLVE: reads the inputs and builds the full mapping.
pub fn plan(opts: &Options) -> Result<Plan> {
    enter(Stage::Parse);

    let descriptor_path = absolutize(&opts.project_file)?;
    let descriptor = Descriptor::load(&descriptor_path)?;
    let descriptor_dir = parent_of(&descriptor_path);
    let descriptor_name = file_name(&descriptor_path)?;
    log::info!("{} Descriptor: {}", "📄".green(), descriptor_path.display().to_string().bold());

    let config = load_config(&descriptor_dir, opts.config.as_deref())?;
    let env = load_env(&descriptor_dir)?;

    let build_dir = match &opts.makefile_dir {
        Some(dir) => absolutize(dir)?,
        None => descriptor_dir.clone(),
    };
    let build_path = build_dir.join(&config.build_file.name);
    let build_file = BuildFile::load(&build_path)?;
    let build_name = config.build_file.name.clone();
    log::info!("{} Build file: {}", "📄".green(), build_path.display().to_string().bold());

    let sdk_root = sdk_root(opts, &config, &build_file, &build_dir)?;
    let project_root = match (&opts.project_root, config.project_root()) {
        (Some(p), _) => absolutize(p)?,
        (None, Some(p)) => absolutize(&p)?,
        (None, None) => parent_of(&descriptor_dir),
    };

    let roots = Roots {
        project_root,
        sdk_root,
        descriptor_dir,
        build_dir,
        sdk_dir: config.sdk_dir.clone(),
    };
    log::debug!("Roots: {:?}", roots);

    enter(Stage::Resolve);
    let resolver = Resolver::new(&roots);

    let descriptor_scope = Scope::new(&roots.descriptor_dir)
        .with_var("ProjectDir", roots.descriptor_dir.to_string_lossy());
    let mut descriptor_refs = Vec::new();
    for field in descriptor.enumerate_path_fields(&config.descriptor) {
        let reference = resolver.reference(&field.raw, field.origin.clone(), &descriptor_scope, field.role)?;
        descriptor_refs.push(FieldReference { field, reference });
    }

    let build_scope = build_scope(&roots, &build_file, &config);
    let mut build_refs = Vec::new();
    for token in build_file.path_tokens(&config.build_file.path_variables) {
        let origin = Origin::BuildFile { line: token.line + 1 };
        let reference = resolver.reference(&token.text, origin, &build_scope, Role::Input)?;
        build_refs.push((token, reference));
    }

    let mut implicit_refs = Vec::new();
    if let Some(pattern) = &config.build_file.linker_script_glob {
        for script in linker_scripts(&roots.build_dir, pattern)? {
            let raw = script.to_string_lossy();
            implicit_refs.push(resolver.reference(&raw, Origin::Implicit("linker script"), &build_scope, Role::Input)?);
        }
    }
    for file in &config.toolchain.files {
        implicit_refs.push(resolver.toolchain(file)?);
    }

    let reserved = vec![
        (descriptor_path.clone(), descriptor_name.clone()),
        (build_path.clone(), build_name.clone()),
    ];
    let references: Vec<PathReference> = descriptor_refs
        .iter()
        .map(|f| f.reference.clone())
        .chain(build_refs.iter().map(|(_, r)| r.clone()))
        .chain(implicit_refs.iter().cloned())
        .collect();
    let mapping = build_mapping(&roots, &references, &reserved)?;
    log::info!(
        "{} {} references, {} mapping entries",
        "🧭".blue(),
        references.len(),
        mapping.len()
    );

    Ok(Plan {
        roots,
        config,
        descriptor,
        descriptor_path,
        descriptor_name,
        descriptor_refs,
        build_file,
        build_path,
        build_name,
        build_refs,
        implicit_refs,
        mapping,
        env,
    })
}

/// COPY, REWRITE-DESCRIPTOR and REWRITE-BUILD-FILE. Any error stops the run where it happens.
pub fn execute(plan: &Plan, opts: &Options) -> Result<RunSummary> {
    enter(Stage::Copy);
    let output_root = absolutize(&opts.output_dir)?;
    check_output_location(&output_root, &plan.roots)?;
    materializer::prepare_output(&output_root, opts.force)?;
    let copy = materializer::materialize(&plan.mapping, &output_root)?;
    log::info!(
        "{} {} copied, {} unchanged",
        "📦".green(),
        copy.files_copied,
        copy.files_unchanged
    );

    enter(Stage::RewriteDescriptor);
    let (rewritten, unresolved) = plan.descriptor.apply_mapping(&plan.descriptor_refs, &plan.mapping);
    if let Some(field) = unresolved.first() {
        return Err(StandaloneError::UnresolvedReference {
            raw: field.raw.clone(),
            origin: field.origin.to_string(),
            reason: "no mapping entry for this field".to_string(),
        }
        .into());
    }
    let descriptor_written = materializer::write_text(&output_root.join(&plan.descriptor_name), &rewritten.serialize())?;

    enter(Stage::RewriteBuildFile);
    let edits = build_edits(plan)?;
    let rules = RuleSet::new(&plan.config.build_file, &plan.roots.sdk_dir);
    let text = plan.build_file.rewrite(&rules, &edits);
    let build_file_written = materializer::write_text(&output_root.join(&plan.build_name), &text)?;

    let install_root = adjust_toolchain(plan, opts, &output_root)?;

    enter(Stage::Done);
    Ok(RunSummary {
        output_root,
        entries: plan.mapping.len(),
        fingerprint: plan.mapping.fingerprint(),
        copy,
        descriptor_written,
        build_file_written,
        install_root,
    })
}

/// CLI, then config, then the build file's own root assignment.
fn sdk_root(opts: &Options, config: &StandaloneConfig, build_file: &BuildFile, build_dir: &Path) -> Result<PathBuf> {
    let root_variable = &config.build_file.root_variable;
    let root = if let Some(p) = &opts.sdk_root {
        absolutize(p)?
    } else if let Some(p) = config.sdk_root() {
        absolutize(&p)?
    } else {
        let Some(value) = build_file.variable(root_variable) else {
            return Err(StandaloneError::UnresolvedReference {
                raw: root_variable.clone(),
                origin: "build file".to_string(),
                reason: "no SDK root assignment; pass --sdk-root".to_string(),
            }
            .into());
        };
        let mut scope = Scope::new(build_dir);
        for (name, val) in build_file.variables() {
            if name != root_variable {
                scope.define(name, val.clone());
            }
        }
        match scope.expand(value) {
            Expansion::Path(p) => p,
            Expansion::Unknown(var) => {
                return Err(StandaloneError::UnresolvedReference {
                    raw: value.to_string(),
                    origin: format!("build file {}", root_variable),
                    reason: format!("unknown variable {}; pass --sdk-root", var),
                }
                .into());
            }
        }
    };

    if !root.is_dir() {
        return Err(StandaloneError::MissingInput {
            path: root,
            what: "SDK root",
        }
        .into());
    }
    log::info!("{} SDK root: {}", "📚".cyan(), root.display().to_string().bold());
    Ok(root)
}

/// Build file variables with the SDK root variable pinned to the resolved root.
fn build_scope(roots: &Roots, build_file: &BuildFile, config: &StandaloneConfig) -> Scope {
    let mut scope = Scope::new(&roots.build_dir);
    for (name, value) in build_file.variables() {
        scope.define(name, value.clone());
    }
    scope.define(&config.build_file.root_variable, roots.sdk_root.to_string_lossy());
    scope
}

fn linker_scripts(build_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{}", glob::Pattern::escape(&build_dir.to_string_lossy()), pattern);
    let mut scripts = Vec::new();
    for entry in glob::glob(&full).with_context(|| format!("Invalid linker script pattern '{}'", pattern))? {
        let path = entry?;
        if path.is_file() {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

fn build_edits(plan: &Plan) -> Result<TokenEdits> {
    let cfg = &plan.config.build_file;
    let mut edits = TokenEdits::new();

    for (token, reference) in &plan.build_refs {
        let Some(target) = plan.mapping.destination_of(reference) else {
            return Err(StandaloneError::UnresolvedReference {
                raw: token.text.clone(),
                origin: reference.origin.to_string(),
                reason: "no mapping entry for this token".to_string(),
            }
            .into());
        };
        let text = build_file::render(target, &cfg.root_variable, &cfg.project_variable, plan.mapping.sdk_dir());
        edits.entry(token.line).or_default().push(Edit {
            start: token.start,
            end: token.end,
            text,
        });
    }

    Ok(edits)
}

fn adjust_toolchain(plan: &Plan, opts: &Options, output_root: &Path) -> Result<Option<InstallRoot>> {
    let toolchain = &plan.config.toolchain;
    let source = plan.roots.sdk_root.join(from_raw(&toolchain.makefile));
    let Some(entry) = plan.mapping.get(&source) else {
        log::debug!("{} is not part of the mapping", toolchain.makefile);
        return Ok(None);
    };

    let Some(install_root) = discover_install_root(opts.gnu_install_root.as_deref(), &plan.env, toolchain) else {
        log::warn!(
            "{} {} not found, keeping the default {}",
            "⚠️".yellow(),
            toolchain.compiler,
            toolchain.install_root_variable
        );
        return Ok(None);
    };
    log::info!(
        "{} Toolchain: {} (from {})",
        "🔧".yellow(),
        install_root.path.bold(),
        install_root.found_via
    );

    let target = output_root.join(&entry.destination);
    let text = fs::read_to_string(&target).with_context(|| format!("Failed to read {}", target.display()))?;
    if let Some(adjusted) = adjust_install_root(&text, &toolchain.install_root_variable, &install_root.path) {
        materializer::write_text(&target, &adjusted)?;
    }
    Ok(Some(install_root))
}

fn check_output_location(output_root: &Path, roots: &Roots) -> Result<()> {
    if output_root.starts_with(&roots.sdk_root) {
        bail!("Output directory {} lies inside the SDK root", output_root.display());
    }
    if roots.is_anchor(output_root) {
        bail!("Output directory {} is one of the input directories", output_root.display());
    }
    Ok(())
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/"))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}
