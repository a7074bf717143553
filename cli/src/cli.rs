use std::path::PathBuf;

/// Street-level pedestrian volume estimation
#[derive(clap::Parser, Debug)]
#[command(name = "pedvol", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Build the street feature table, fit the model and write volume estimates
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// JSON run manifest naming every input layer
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Output CSV, overriding the manifest's `output`
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Skip leave-one-out cross-validation
    #[arg(long)]
    pub no_cv: bool,
}
