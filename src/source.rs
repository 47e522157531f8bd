//! Job discovery over the metadata processor's output tree.
//!
//! ```text
//! <root>/
//!   report.html
//!   <database>/
//!     odps_ddl/...
//!     hive_udtf_sql/
//!       single_partition/<table>.sql
//!       multi_partition/<table>.sql
//! ```
//!
//! Each `<table>.sql` becomes one job whose log directory mirrors the tree:
//! `<log_root>/<database>/<table>`.

use std::fs;
use std::path::{Path, PathBuf};

use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use crate::job::JobCommand;
use crate::script::ScriptAssembler;

/// Directory holding the generated UDTF scripts of a database.
pub const UDTF_SQL_DIR: &str = "hive_udtf_sql";

const SCRIPT_EXTENSION: &str = "sql";

/// Which generated scripts to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum ScriptCategory {
    #[strum(serialize = "single_partition")]
    SinglePartition,
    #[default]
    #[strum(serialize = "multi_partition")]
    MultiPartition,
}

/// A script file found under the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredScript {
    pub database: String,
    pub table: String,
    pub path: PathBuf,
}

/// Command and log destination for one script, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptJob {
    pub command: JobCommand,
    pub log_dir: PathBuf,
}

/// File name without its extension.
fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| RunnerError::script(format!("{} has no file name", path.display())))
}

/// Find every `<table>.sql` of `category`, sorted by database then table.
///
/// Entries of the root that are not directories are ignored, and databases
/// without a directory for `category` are skipped with a warning.
pub fn discover_scripts(root: &Path, category: ScriptCategory) -> Result<Vec<DiscoveredScript>> {
    if !root.is_dir() {
        return Err(RunnerError::script(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut scripts = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            debug!(path = %entry.path().display(), "skipping non-directory entry");
            continue;
        }
        let database = entry.file_name().to_string_lossy().into_owned();
        let category_dir = entry.path().join(UDTF_SQL_DIR).join(category.to_string());
        if !category_dir.is_dir() {
            warn!(%database, dir = %category_dir.display(), "no scripts for database, skipping");
            continue;
        }

        for script in fs::read_dir(&category_dir)? {
            let script = script?;
            let path = script.path();
            let is_sql = path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION);
            if !script.file_type()?.is_file() || !is_sql {
                continue;
            }
            scripts.push(DiscoveredScript {
                database: database.clone(),
                table: file_stem(&path)?,
                path,
            });
        }
    }

    scripts.sort_by(|a, b| (&a.database, &a.table).cmp(&(&b.database, &b.table)));
    Ok(scripts)
}

/// Turns script files into submittable jobs.
#[derive(Debug, Clone)]
pub struct JobSource {
    assembler: ScriptAssembler,
    engine: String,
    working_dir: Option<PathBuf>,
    log_root: PathBuf,
}

impl JobSource {
    pub fn new(assembler: ScriptAssembler, engine: impl Into<String>, log_root: impl Into<PathBuf>) -> Self {
        Self {
            assembler,
            engine: engine.into(),
            working_dir: None,
            log_root: log_root.into(),
        }
    }

    /// Directory the engine is launched in.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn job_for(&self, script_path: &Path, log_dir: PathBuf) -> Result<ScriptJob> {
        let script = self
            .assembler
            .assemble_file(script_path)
            .map_err(|e| RunnerError::script(format!("{:#}", e)))?;
        Ok(ScriptJob {
            command: script.to_command(&self.engine, self.working_dir.as_deref()),
            log_dir,
        })
    }

    /// Jobs for every script of `category` under `root`.
    pub fn jobs_for_tree(&self, root: &Path, category: ScriptCategory) -> Result<Vec<ScriptJob>> {
        discover_scripts(root, category)?
            .into_iter()
            .map(|script| {
                let log_dir = self.log_root.join(&script.database).join(&script.table);
                self.job_for(&script.path, log_dir)
            })
            .collect()
    }

    /// Job for a single prepared script, logged under `<log_root>/<stem>`.
    pub fn job_for_file(&self, path: &Path) -> Result<ScriptJob> {
        let log_dir = self.log_root.join(file_stem(path)?);
        self.job_for(path, log_dir)
    }
}
