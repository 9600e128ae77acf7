mod cli;
mod config;
mod error;
mod descriptor;
mod resolver;
mod build_file;
mod materializer;
mod toolchain;
mod pipeline;
mod handlers;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use handlers::create;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if cli.dry_run {
        create::handle_dry_run(&cli)
    } else {
        create::handle_create(&cli)
    }
}
