use anyhow::Result;
use colored::*;
use crate::cli::Cli;
use crate::pipeline::{self, Options, Plan};
use crate::resolver::{Content, Entry, RefKind};

fn options(cli: &Cli) -> Options {
    Options {
        project_file: cli.project_file.clone(),
        output_dir: cli.output_dir.clone(),
        makefile_dir: cli.makefile_dir.clone(),
        sdk_root: cli.sdk_root.clone(),
        project_root: cli.project_root.clone(),
        config: cli.config.clone(),
        gnu_install_root: cli.gnu_install_root.clone(),
        force: cli.force,
    }
}

pub fn handle_create(cli: &Cli) -> Result<()> {
    let summary = pipeline::run(&options(cli))?;

    println!();
    println!("{} {}", "✅ Standalone project ready:".green().bold(), summary.output_root.display());
    println!("   Entries:     {}", summary.entries);
    println!(
        "   Copied:      {} file(s), {} unchanged, {} dir(s)",
        summary.copy.files_copied, summary.copy.files_unchanged, summary.copy.directories
    );
    if let Some(root) = &summary.install_root {
        println!("   Toolchain:   {} {}", root.path, format!("({})", root.found_via).dimmed());
    }
    println!("   Fingerprint: {}", summary.fingerprint[..16].dimmed());
    Ok(())
}

pub fn handle_dry_run(cli: &Cli) -> Result<()> {
    let plan = pipeline::plan(&options(cli))?;
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!();
    println!("{}", "Planned layout (nothing written):".bold().underline());
    println!("   Descriptor:  {}", plan.descriptor_path.display());
    println!("   Build file:  {}", plan.build_path.display());
    println!("   SDK root:    {}", plan.roots.sdk_root.display());
    println!("   Project:     {}", plan.roots.project_root.display());

    let entries = plan.mapping.entries();
    let width = entries.iter().map(|e| e.destination.len()).max().unwrap_or(0);

    for (title, kind) in [
        ("Local", RefKind::Local),
        ("SDK", RefKind::Sdk),
        ("Toolchain", RefKind::Toolchain),
        ("Generated", RefKind::Fixed),
    ] {
        let group: Vec<&Entry> = entries
            .iter()
            .filter(|e| e.kind == kind && e.content != Content::Rewritten)
            .collect();
        if group.is_empty() {
            continue;
        }
        println!();
        println!("{} {}", title.cyan().bold(), format!("({})", group.len()).dimmed());
        for entry in group {
            let padding = " ".repeat(width - entry.destination.len() + 2);
            let marker = if entry.content == Content::Directory { "/" } else { "" };
            println!(
                "  {}{}{}{}",
                entry.destination,
                marker,
                padding,
                entry.source.display().to_string().dimmed()
            );
        }
    }

    let verbatim: Vec<&str> = plan
        .references()
        .filter(|r| r.source.is_none())
        .map(|r| r.raw.as_str())
        .collect();
    if !verbatim.is_empty() {
        println!();
        println!("{} {}", "Kept verbatim".cyan().bold(), format!("({})", verbatim.len()).dimmed());
        for raw in verbatim {
            println!("  {}", raw.italic());
        }
    }

    println!();
    println!("   Fingerprint: {}", plan.mapping.fingerprint()[..16].dimmed());
}
