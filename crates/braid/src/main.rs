//! braid entry point

use clap::Parser;
use log::*;

pub mod cli;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .format_indent(None)
        .format_timestamp(None)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = cli::Args::parse();
    debug!("braid {VERSION}");
    cli::run(args)
}
