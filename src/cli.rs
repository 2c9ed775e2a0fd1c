//! Command-line interface.
//!
//! Without a subcommand the binary runs the HTTP server. `generate` and
//! `optimize` run a single task through the coordinator and print its output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::task::{Task, TaskKind, TaskStatus, DEFAULT_LANGUAGE, SUPPORTED_LANGUAGES};

/// Hybrid local/remote task router for AI coding tasks
#[derive(Parser, Debug)]
#[command(name = "hybrid-router")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    EXECUTION_STRATEGY, REMOTE_ENDPOINT and the other settings are read from the environment")]
pub struct Cli {
    /// KEY=VALUE file read for settings missing from the environment
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Port for the API server (overrides PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Target programming language
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_LANGUAGE,
        value_parser = PossibleValuesParser::new(SUPPORTED_LANGUAGES.iter().copied())
    )]
    pub language: String,

    /// Logging level (overrides RUST_LOG)
    #[arg(long, global = true, value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,

    /// Ask for GPU execution where available
    #[arg(long, global = true)]
    pub use_gpu: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the HTTP API server (the default)
    Serve,

    /// Generate code from a prompt
    Generate {
        /// What the code should do
        prompt: String,

        /// Write the code to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Optimize a source file
    Optimize {
        /// File to optimize
        input: PathBuf,

        #[arg(long, default_value = "performance", value_parser = ["performance", "memory", "readability"])]
        target: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// `EnvFilter` directive applying this level to the crate and the HTTP layer.
    pub fn filter(&self) -> String {
        let level = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        };
        format!("hybrid_router={level},tower_http={level}")
    }
}

impl Cli {
    /// `true` when the HTTP server should run.
    pub fn serves(&self) -> bool {
        matches!(self.command, None | Some(Command::Serve))
    }

    /// Environment configuration, backed by `--config` and with `--port` applied.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let file = match &self.config {
            Some(path) => read_settings(path)?,
            None => HashMap::new(),
        };
        let mut config = Config::from_lookup(|name| {
            std::env::var(name)
                .ok()
                .or_else(|| file.get(name).cloned())
        })?;
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }

    /// The task a one-shot command runs, or `None` for `serve`.
    pub async fn build_task(&self) -> anyhow::Result<Option<Task>> {
        let task = match &self.command {
            None | Some(Command::Serve) => return Ok(None),
            Some(Command::Generate { prompt, .. }) => Task::new(
                TaskKind::Generation,
                json!({
                    "prompt": prompt,
                    "language": self.language,
                    "use_gpu": self.use_gpu,
                }),
            )?,
            Some(Command::Optimize { input, target }) => {
                let code = tokio::fs::read_to_string(input)
                    .await
                    .with_context(|| format!("Failed to read input file {}", input.display()))?;
                Task::new(
                    TaskKind::Optimization,
                    json!({
                        "code": code,
                        "optimization_target": target,
                        "language": self.language,
                        "use_gpu": self.use_gpu,
                    }),
                )?
            }
        };
        Ok(Some(task))
    }

    /// Run the one-shot command. Returns the text for stdout, or `None` if it
    /// went to `--output`.
    pub async fn run_once(&self, coordinator: &Coordinator) -> anyhow::Result<Option<String>> {
        let Some(task) = self.build_task().await? else {
            bail!("The serve command does not produce output");
        };
        let kind = task.kind();
        let result = run_task(coordinator, task).await?;
        let text = render_output(kind, &result);

        if let Some(Command::Generate {
            output: Some(path), ..
        }) = &self.command
        {
            tokio::fs::write(path, &text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Wrote generated code");
            return Ok(None);
        }
        Ok(Some(text))
    }
}

/// Submit a task and wait for its result document.
pub async fn run_task(coordinator: &Coordinator, task: Task) -> anyhow::Result<Value> {
    let id = coordinator.submit(task).await?;
    let task = coordinator.wait_for(id).await?;

    match task.status() {
        TaskStatus::Completed => Ok(task.result().cloned().unwrap_or(Value::Null)),
        _ => match task.error() {
            Some(failure) => bail!("{}", failure),
            None => bail!("Task {} finished without a result", id),
        },
    }
}

/// The field a command prints, or the whole result when it is missing.
pub fn render_output(kind: TaskKind, result: &Value) -> String {
    let field = match kind {
        TaskKind::Generation => Some("code"),
        TaskKind::Optimization => Some("optimized_code"),
        TaskKind::Review | TaskKind::SecurityAnalysis => None,
    };
    match field.and_then(|f| result.get(f)).and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string()),
    }
}

/// `KEY=VALUE` lines; blank lines and `#` comments are skipped.
fn read_settings(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let mut settings = HashMap::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("{}:{}: expected KEY=VALUE", path.display(), number + 1);
        };
        let value = value.trim().trim_matches('"');
        settings.insert(key.trim().to_string(), value.to_string());
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_coordinator() -> Coordinator {
        Coordinator::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn test_no_command_serves() {
        let cli = Cli::try_parse_from(["hybrid-router"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.serves());
        assert_eq!(cli.language, "python");
        assert_eq!(cli.log_level, None);
        assert!(!cli.use_gpu);
    }

    #[test]
    fn test_generate_command_with_global_flags() {
        let cli = Cli::try_parse_from([
            "hybrid-router",
            "generate",
            "sort a list",
            "--output",
            "out.java",
            "--language",
            "java",
            "--log-level",
            "DEBUG",
        ])
        .unwrap();
        match &cli.command {
            Some(Command::Generate { prompt, output }) => {
                assert_eq!(prompt, "sort a list");
                assert_eq!(output.as_deref(), Some(Path::new("out.java")));
            }
            _ => panic!("Expected Generate command"),
        }
        assert_eq!(cli.language, "java");
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(!cli.serves());
    }

    #[test]
    fn test_rejects_unknown_choices() {
        assert!(Cli::try_parse_from(["hybrid-router", "--language", "cobol"]).is_err());
        assert!(Cli::try_parse_from([
            "hybrid-router",
            "optimize",
            "main.py",
            "--target",
            "speed"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["hybrid-router", "--log-level", "trace"]).is_err());
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(
            LogLevel::Warning.filter(),
            "hybrid_router=warn,tower_http=warn"
        );
    }

    #[tokio::test]
    async fn test_generate_prints_code() {
        let cli = Cli::try_parse_from(["hybrid-router", "generate", "sort a list"]).unwrap();
        let output = cli.run_once(&local_coordinator()).await.unwrap().unwrap();
        assert!(output.starts_with("def sort_a_list("));
    }

    #[tokio::test]
    async fn test_generate_writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parse.ts");
        let cli = Cli::try_parse_from([
            "hybrid-router",
            "--language",
            "typescript",
            "generate",
            "parse config",
            "--output",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let output = cli.run_once(&local_coordinator()).await.unwrap();
        assert_eq!(output, None);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("export function parseConfig("));
    }

    #[tokio::test]
    async fn test_optimize_reads_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.py");
        std::fs::write(&path, "x = 1   \n\n\n\ny = 2\n").unwrap();

        let cli = Cli::try_parse_from([
            "hybrid-router",
            "optimize",
            path.to_str().unwrap(),
            "--target",
            "memory",
        ])
        .unwrap();
        let output = cli.run_once(&local_coordinator()).await.unwrap().unwrap();
        assert_eq!(output, "x = 1\n\ny = 2\n");
    }

    #[tokio::test]
    async fn test_optimize_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.py");
        let cli =
            Cli::try_parse_from(["hybrid-router", "optimize", path.to_str().unwrap()]).unwrap();

        let err = cli.run_once(&local_coordinator()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read input file"));
    }

    #[tokio::test]
    async fn test_empty_input_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.py");
        std::fs::write(&path, "  \n").unwrap();
        let cli =
            Cli::try_parse_from(["hybrid-router", "optimize", path.to_str().unwrap()]).unwrap();

        let coordinator = local_coordinator();
        assert!(cli.run_once(&coordinator).await.is_err());
        assert_eq!(coordinator.stats().await.total, 0);
    }

    #[test]
    fn test_config_file_and_port_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.env");
        std::fs::write(
            &path,
            "# local settings\nMAX_BATCH_SIZE=7\nLOCAL_COMPLEXITY_THRESHOLD = \"3\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "hybrid-router",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.execution.max_batch_size, 7);
        assert_eq!(config.routing.local_complexity_threshold, 3);

        std::fs::write(&path, "not a setting\n").unwrap();
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_render_falls_back_to_whole_result() {
        let result = json!({"content": "x"});
        assert!(render_output(TaskKind::Generation, &result).contains("\"content\""));
        assert_eq!(
            render_output(TaskKind::Optimization, &json!({"optimized_code": "y"})),
            "y"
        );
    }
}
