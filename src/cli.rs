use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "standalone", version, about = "Turn an SDK example project into a self-contained copy")]
pub struct Cli {
    /// Project descriptor (.emProject)
    pub project_file: PathBuf,

    /// Directory the standalone project is written to (created if absent)
    pub output_dir: PathBuf,

    /// Directory holding the companion Makefile [default: the descriptor's directory]
    #[arg(short = 'm', long = "makefile-dir")]
    pub makefile_dir: Option<PathBuf>,

    /// SDK root [default: the Makefile's SDK_ROOT]
    #[arg(long = "sdk-root")]
    pub sdk_root: Option<PathBuf>,

    /// Project root [default: parent of the descriptor's directory]
    #[arg(long = "project-root")]
    pub project_root: Option<PathBuf>,

    /// Config file [default: standalone.toml next to the descriptor]
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Toolchain bin directory written into the copied Makefile.posix
    #[arg(long = "gnu-install-root")]
    pub gnu_install_root: Option<PathBuf>,

    /// Write into a non-empty output directory
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Print the planned layout without writing anything
    #[arg(short = 'd', long = "dry-run")]
    pub dry_run: bool,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
