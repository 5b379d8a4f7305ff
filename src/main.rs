use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use tickcast::api::cli::{self, Cli};

fn main() -> Result<ExitCode> {
    cli::run(Cli::parse())
}
