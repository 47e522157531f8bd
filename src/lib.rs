//! sqlbatch library
//!
//! Assembles Hive UDTF transfer scripts from generated templates and runs
//! them through a bounded worker pool with retries and per-job logs.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod log_record;
pub mod logging;
pub mod pool;
pub mod process_guard;
pub mod retry;
pub mod script;
pub mod source;

// Re-export main types for convenience
pub use config::{ConfigFile, RunnerConfig};
pub use error::{Result, RunnerError};
pub use executor::{JobRunner, ProcessRunner};
pub use job::{AttemptOutcome, Job, JobCommand, JobId, JobOutcome};
pub use log_record::{JobStatus, JobSummary, LogRecord};
pub use pool::{PoolError, WorkerPool};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use retry::{RetryOutcome, RetryPolicy};
pub use script::{EngineScript, ScriptAssembler, Settings, Statement};
pub use source::{DiscoveredScript, JobSource, ScriptCategory, ScriptJob};
