//! Command-line options.

use super::options;
use structopt::StructOpt;

/// CLI configuration flags, top-level.
#[derive(Debug, StructOpt)]
pub struct CliOptions {
    /// Verbosity level
    #[structopt(long = "verbosity", short = "v", parse(from_occurrences))]
    pub verbosity: u8,

    /// Path to configuration file
    #[structopt(short = "c")]
    pub config_path: Option<std::path::PathBuf>,

    #[structopt(flatten)]
    pub service: options::ServiceOptions,

    #[structopt(flatten)]
    pub status: options::StatusOptions,

    #[structopt(flatten)]
    pub execution: options::ExecutionOptions,

    #[structopt(flatten)]
    pub sandbox: options::SandboxOptions,
}
