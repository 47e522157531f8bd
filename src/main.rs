//! sqlbatch - main entry point
//!
//! Resolves the carrier configuration, validates the required resources,
//! then feeds every generated script to one worker pool and waits for it to
//! drain. Individual script failures only show up in their log directories;
//! the exit status reflects fatal errors alone.

use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing::{debug, info, warn};

use sqlbatch::cli::{Cli, Mode};
use sqlbatch::config::{self, ConfigFile, RunnerConfig};
use sqlbatch::error::RunnerError;
use sqlbatch::executor::ProcessRunner;
use sqlbatch::logging;
use sqlbatch::pool::WorkerPool;
use sqlbatch::process_guard;
use sqlbatch::script::{ScriptAssembler, Settings};
use sqlbatch::source::{JobSource, ScriptJob};

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            let code = e
                .downcast_ref::<RunnerError>()
                .map(RunnerError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn load_config(cli: &Cli) -> Result<RunnerConfig> {
    let home = config::resolve_home(cli.home.clone(), std::env::var_os(config::HOME_ENV))?;
    let home = std::path::absolute(&home)
        .with_context(|| format!("Failed to resolve carrier home {:?}", home))?;
    debug!(home = %home.display(), "carrier home resolved");

    let mut config = RunnerConfig::from_home(home);
    if let Some(path) = &cli.config {
        config.apply_file(&ConfigFile::load_from_file(path)?);
    }
    config.apply_overrides(&cli.overrides());
    config.settings = std::path::absolute(&config.settings)?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    // Paths on the command line are relative to where we were started.
    let mode = match cli.mode()? {
        Mode::All(dir) => Mode::All(std::path::absolute(dir)?),
        Mode::SingleFile(file) => Mode::SingleFile(std::path::absolute(file)?),
    };
    let config = load_config(cli)?;
    config.validate()?;

    let settings = Settings::load(&config.settings)?;
    info!(
        engine = %config.engine,
        parallelism = config.parallelism,
        retries = config.retries,
        settings = settings.entries().len(),
        "configuration loaded"
    );

    let assembler = ScriptAssembler::new(&config.udtf_jar, &config.odps_config, settings);
    let source = JobSource::new(assembler, &config.engine, &config.log_root)
        .with_working_dir(&config.home);

    let jobs: Vec<ScriptJob> = match &mode {
        Mode::All(root) => source.jobs_for_tree(root, cli.category)?,
        Mode::SingleFile(file) => vec![source.job_for_file(file)?],
    };
    if jobs.is_empty() {
        warn!("no scripts found, nothing to run");
        return Ok(());
    }

    let runner = ProcessRunner::new();
    if let Err(e) = process_guard::init_signal_handlers(runner.registry()) {
        // Jobs still get SIGTERM from PR_SET_PDEATHSIG if we die.
        warn!(error = %e, "failed to install signal handlers");
    }

    let pool = WorkerPool::with_process_runner(config.parallelism, runner)?
        .with_retry_delay(config.retry_delay);
    pool.start()?;

    let total = jobs.len();
    for job in jobs {
        pool.submit(job.command, job.log_dir, config.retries)?;
    }
    info!(jobs = total, log_root = %config.log_root.display(), "all scripts submitted");

    pool.join_all()?;
    pool.stop()?;
    info!(jobs = total, "all scripts finished, see job.json in each log directory");
    Ok(())
}
