use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use screener_core::browser::{ChromiumSessionFactory, LaunchOverrides};
use screener_core::credentials::{CredentialStore, EnvCredentialStore, SecretError};
use screener_core::publish::{DirObjectStore, HttpObjectStore, ObjectStore};
use screener_core::transform::ColumnContract;
use screener_core::{
    load_pipeline_config, ConfigError, PipelineConfig, PipelineError, PipelineOrchestrator,
    RunOutcome,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Daily screener export pipeline", long_about = None)]
pub struct Cli {
    /// Path to pipeline.toml
    #[arg(long, default_value = "configs/pipeline.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one export run
    Run(RunArgs),
    /// Verify configuration and external prerequisites
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run the browser with a visible window for local debugging
    #[arg(long, default_value_t = false)]
    pub headed: bool,
    /// Store the artifact under this directory instead of the configured endpoint
    #[arg(long)]
    pub local_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Run configuration and prerequisite checks
    Check,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_pipeline_config(&cli.config)?;

    match &cli.command {
        Commands::Run(args) => {
            let outcome = execute_run(&config, args).await?;
            render(&outcome, cli.format)
        }
        Commands::Health(HealthCommands::Check) => {
            let report = health_check(&cli.config, &config);
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more health checks failed".to_string(),
                ));
            }
            Ok(())
        }
    }
}

async fn execute_run(config: &PipelineConfig, args: &RunArgs) -> Result<RunOutcome> {
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(EnvCredentialStore::new(config.secrets.env_prefix.clone()));
    let store = build_store(config, args, &credentials).await?;

    let mut factory =
        ChromiumSessionFactory::new(config.chromium.clone(), config.waits.page_poll());
    if args.headed {
        factory = factory.with_overrides(LaunchOverrides {
            headless: Some(false),
        });
    }

    let orchestrator =
        PipelineOrchestrator::new(config.clone(), credentials, Arc::new(factory), store);
    Ok(orchestrator.run().await?)
}

async fn build_store(
    config: &PipelineConfig,
    args: &RunArgs,
    credentials: &Arc<dyn CredentialStore>,
) -> Result<Arc<dyn ObjectStore>> {
    if let Some(root) = args
        .local_root
        .clone()
        .or_else(|| config.storage.local_root.clone())
    {
        return Ok(Arc::new(DirObjectStore::new(root)));
    }
    if let Some(endpoint) = &config.storage.endpoint {
        let token = match &config.storage.auth_token_secret {
            Some(name) => Some(credentials.get(name).await?),
            None => None,
        };
        return Ok(Arc::new(HttpObjectStore::new(endpoint.clone(), token)));
    }
    Err(AppError::MissingResource(
        "no storage target configured (storage.endpoint or storage.local_root)".to_string(),
    ))
}

fn health_check(config_path: &Path, config: &PipelineConfig) -> Vec<HealthEntry> {
    let mut results = Vec::new();
    results.push(check_file("pipeline.toml", config_path));
    results.push(check_contract(config));
    results.push(check_file(
        "chromium executable",
        Path::new(&config.chromium.executable_path),
    ));
    results.push(check_storage(config));
    results
}

fn check_file(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, path.display().to_string())
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

fn check_contract(config: &PipelineConfig) -> HealthEntry {
    match ColumnContract::load(&config.contract) {
        Ok(contract) => {
            let undeclared: Vec<&str> = contract
                .percent_columns
                .iter()
                .filter(|column| !contract.types.contains_key(*column))
                .map(String::as_str)
                .collect();
            if undeclared.is_empty() {
                HealthEntry::ok(
                    "column contract",
                    format!(
                        "{} typed columns, {} percent columns",
                        contract.types.len(),
                        contract.percent_columns.len()
                    ),
                )
            } else {
                HealthEntry::warn(
                    "column contract",
                    format!("percent columns missing from type map: {undeclared:?}"),
                )
            }
        }
        Err(err) => HealthEntry::error("column contract", err.to_string()),
    }
}

fn check_storage(config: &PipelineConfig) -> HealthEntry {
    match (&config.storage.endpoint, &config.storage.local_root) {
        (Some(endpoint), _) => HealthEntry::ok("storage target", endpoint.clone()),
        (None, Some(root)) => HealthEntry::ok("storage target", root.display().to_string()),
        (None, None) => HealthEntry::error(
            "storage target",
            "neither storage.endpoint nor storage.local_root configured".to_string(),
        ),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for RunOutcome {
    fn display(&self) -> String {
        format!(
            "uploaded {key} ({rows} rows, {secs}s{menu})",
            key = self.key,
            rows = self.rows,
            secs = self.duration_secs,
            menu = if self.menu_skipped {
                ", menu pre-expanded"
            } else {
                ""
            }
        )
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name} — {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}
