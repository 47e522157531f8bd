//! Engine script assembly.
//!
//! A script handed to the engine is a fixed preamble followed by the table's
//! transfer statement:
//!
//! ```text
//! add jar <udtf jar>;
//! add file <odps config>;
//! create temporary function odps_data_dump_multi as '...';
//! create temporary function odps_data_dump_single as '...';
//! set <setting>;            one per retained settings line
//! <template body>           newlines flattened, backticks removed
//! ```
//!
//! Statements are kept as a list and joined with a single space only when the
//! final argument is built. The joined script is passed to the engine as one
//! argv element, so nothing in a template is ever interpreted by a shell.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::job::JobCommand;

/// Flag that makes the engine CLI execute the following argument as SQL.
pub const ENGINE_EXECUTE_FLAG: &str = "-e";

/// Temporary function for tables dumped across many partitions.
pub const MULTI_PARTITION_FUNCTION: (&str, &str) = (
    "odps_data_dump_multi",
    "com.aliyun.odps.datacarrier.transfer.OdpsDataTransferUDTF",
);

/// Temporary function for a single partition dump.
pub const SINGLE_PARTITION_FUNCTION: (&str, &str) = (
    "odps_data_dump_single",
    "com.aliyun.odps.datacarrier.transfer.OdpsPartitionTransferUDTF",
);

/// One statement of an engine script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    AddJar(PathBuf),
    AddFile(PathBuf),
    CreateTemporaryFunction { name: String, class: String },
    Set(String),
    /// A flattened template body, emitted as-is.
    Raw(String),
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::AddJar(path) => write!(f, "add jar {};", path.display()),
            Statement::AddFile(path) => write!(f, "add file {};", path.display()),
            Statement::CreateTemporaryFunction { name, class } => {
                write!(f, "create temporary function {} as '{}';", name, class)
            }
            Statement::Set(setting) => write!(f, "set {};", setting),
            Statement::Raw(body) => f.write_str(body),
        }
    }
}

/// Engine settings injected as `set` statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    entries: Vec<String>,
}

impl Settings {
    /// Keep every non-blank line that is not a `#` comment, trimmed.
    ///
    /// Lines are trimmed before the comment check, so an indented `  # x`
    /// is a comment too.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        Ok(Self::parse(&content))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Collapse a template into a single line: line breaks become spaces and
/// backtick identifier quoting is dropped.
pub fn flatten_template(template: &str) -> String {
    template
        .chars()
        .filter(|&c| c != '`')
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// An assembled, ordered engine script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineScript {
    statements: Vec<Statement>,
}

impl EngineScript {
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// The script text passed to the engine.
    pub fn render(&self) -> String {
        self.statements
            .iter()
            .map(Statement::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `<engine> -e <script>`, launched in `current_dir`.
    pub fn to_command(&self, engine: &str, current_dir: Option<&Path>) -> JobCommand {
        JobCommand::Exec {
            program: engine.to_string(),
            args: vec![ENGINE_EXECUTE_FLAG.to_string(), self.render()],
            current_dir: current_dir.map(Path::to_path_buf),
        }
    }
}

/// Builds engine scripts sharing the same resources and settings.
#[derive(Debug, Clone)]
pub struct ScriptAssembler {
    udtf_jar: PathBuf,
    odps_config: PathBuf,
    settings: Settings,
}

impl ScriptAssembler {
    pub fn new(udtf_jar: impl Into<PathBuf>, odps_config: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            udtf_jar: udtf_jar.into(),
            odps_config: odps_config.into(),
            settings,
        }
    }

    /// Assemble the script for one template body.
    pub fn assemble(&self, template: &str) -> EngineScript {
        let mut statements = vec![
            Statement::AddJar(self.udtf_jar.clone()),
            Statement::AddFile(self.odps_config.clone()),
        ];
        for (name, class) in [MULTI_PARTITION_FUNCTION, SINGLE_PARTITION_FUNCTION] {
            statements.push(Statement::CreateTemporaryFunction {
                name: name.to_string(),
                class: class.to_string(),
            });
        }
        statements.extend(self.settings.entries().iter().cloned().map(Statement::Set));
        statements.push(Statement::Raw(flatten_template(template)));

        EngineScript { statements }
    }

    /// Read a template file and assemble it.
    pub fn assemble_file(&self, path: &Path) -> Result<EngineScript> {
        let template = fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL template {:?}", path))?;
        Ok(self.assemble(&template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(settings: &str) -> ScriptAssembler {
        ScriptAssembler::new(
            "/carrier/libs/udtf.jar",
            "/carrier/odps_config.ini",
            Settings::parse(settings),
        )
    }

    #[test]
    fn test_settings_filtering() {
        let settings = Settings::parse("# comment\n\nkey=value\n  \n");
        assert_eq!(settings.entries(), ["key=value"]);
    }

    #[test]
    fn test_settings_trims_and_skips_indented_comments() {
        let settings = Settings::parse("  a=1  \r\n   # indented comment\nb=2");
        assert_eq!(settings.entries(), ["a=1", "b=2"]);
    }

    #[test]
    fn test_flatten_template() {
        assert_eq!(
            flatten_template("select `a`\nfrom `db`.`t`\r\n;"),
            "select a from db.t  ;"
        );
    }

    #[test]
    fn test_assemble_order() {
        let script = assembler("mapreduce.job.queuename=etl\n").assemble("select 1");
        assert_eq!(
            script.render(),
            "add jar /carrier/libs/udtf.jar; \
             add file /carrier/odps_config.ini; \
             create temporary function odps_data_dump_multi as \
             'com.aliyun.odps.datacarrier.transfer.OdpsDataTransferUDTF'; \
             create temporary function odps_data_dump_single as \
             'com.aliyun.odps.datacarrier.transfer.OdpsPartitionTransferUDTF'; \
             set mapreduce.job.queuename=etl; \
             select 1"
        );
    }

    #[test]
    fn test_no_settings_means_no_set_statements() {
        let script = assembler("# nothing\n").assemble("select 1");
        assert!(!script
            .statements()
            .iter()
            .any(|s| matches!(s, Statement::Set(_))));
        assert_eq!(script.statements().len(), 5);
    }

    #[test]
    fn test_to_command_is_single_argument() {
        let script = assembler("").assemble("select \"quoted\" from t; drop table x");
        let command = script.to_command("hive", Some(Path::new("/carrier")));
        match command {
            JobCommand::Exec {
                program,
                args,
                current_dir,
            } => {
                assert_eq!(program, "hive");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0], "-e");
                assert!(args[1].ends_with("select \"quoted\" from t; drop table x"));
                assert_eq!(current_dir, Some(PathBuf::from("/carrier")));
            }
            other => panic!("expected Exec, got {:?}", other),
        }
    }

    #[test]
    fn test_assemble_file_missing() {
        let err = assembler("").assemble_file(Path::new("/nonexistent/t.sql"));
        assert!(err.is_err());
    }
}
