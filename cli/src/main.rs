mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::run;

fn main() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let _logger = flexi_logger::Logger::try_with_str(level)?
        .log_to_stderr()
        .start()?;

    match &cli.command {
        Commands::Run(args) => run::run(&cli, args),
    }
}
