use clap::Parser;
use std::path::PathBuf;

use crate::config::Overrides;
use crate::error::RunnerError;
use crate::source::ScriptCategory;

/// sqlbatch - run generated Hive UDTF SQL scripts in parallel
#[derive(Parser, Debug)]
#[command(name = "sqlbatch")]
#[command(about = "Run Hive UDTF SQL scripts generated by the meta processor")]
#[command(version)]
pub struct Cli {
    /// Directory generated by the meta processor; runs every script in it
    #[arg(long, value_name = "DIR")]
    pub input_all: Option<PathBuf>,

    /// A single SQL script to run
    #[arg(long, value_name = "FILE")]
    pub input_single_file: Option<PathBuf>,

    /// Extra engine settings applied before each script
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Maximum number of scripts running at the same time
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub parallelism: Option<u64>,

    /// Retries for a failing script after its first attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Script category to run with --input-all
    #[arg(long, default_value_t = ScriptCategory::MultiPartition)]
    pub category: ScriptCategory,

    /// JSON file overriding the default configuration
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Carrier installation directory (default: $SQLBATCH_HOME, then the
    /// parent of the executable's directory)
    #[arg(long, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Engine executable invoked as `<engine> -e <script>`
    #[arg(long)]
    pub engine: Option<String>,

    /// Log debug details
    #[arg(short, long)]
    pub verbose: bool,
}

/// What the run processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    All(PathBuf),
    SingleFile(PathBuf),
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// The selected mode. Exactly one of the two inputs must be given.
    pub fn mode(&self) -> Result<Mode, RunnerError> {
        match (&self.input_all, &self.input_single_file) {
            (Some(dir), None) => Ok(Mode::All(dir.clone())),
            (None, Some(file)) => Ok(Mode::SingleFile(file.clone())),
            (None, None) => Err(RunnerError::invocation(
                "please specify --input-all or --input-single-file",
            )),
            (Some(_), Some(_)) => Err(RunnerError::invocation(
                "--input-all and --input-single-file cannot be used together",
            )),
        }
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            engine: self.engine.clone(),
            parallelism: self.parallelism.map(|n| n as usize),
            retries: self.retries,
            settings: self.settings.clone(),
        }
    }
}
