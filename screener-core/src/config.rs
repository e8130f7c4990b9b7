use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    pub portal: PortalSection,
    pub chromium: ChromiumSection,
    pub secrets: SecretsSection,
    pub waits: WaitSection,
    pub download: DownloadSection,
    pub contract: ContractSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSection {
    pub login_url: String,
    pub screener_url: String,
    pub email_field: String,
    pub password_field: String,
    pub login_button_label: String,
    pub view_marker_label: String,
    pub menu_trigger_label: String,
    pub export_action_label: String,
    pub menu_container_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub disable_dev_shm: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretsSection {
    pub env_prefix: String,
    pub email: String,
    pub password: String,
    pub bucket: String,
}

/// Timeouts bound every wait in the pipeline; settle intervals are fixed
/// pauses with no completion signal to observe.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitSection {
    pub page_poll_ms: u64,
    pub login_field_timeout_s: u64,
    pub form_settle_ms: u64,
    pub session_settle_ms: u64,
    pub marker_timeout_s: u64,
    pub view_click_timeout_s: u64,
    pub view_settle_ms: u64,
    pub menu_trigger_timeout_s: u64,
    pub menu_container_timeout_s: u64,
    pub menu_settle_ms: u64,
    pub export_timeout_s: u64,
}

impl WaitSection {
    pub fn page_poll(&self) -> Duration {
        Duration::from_millis(self.page_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub extension: String,
    pub poll_attempts: usize,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractSection {
    pub column_types: PathBuf,
    pub percent_columns: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub prefix: String,
    pub utc_offset_hours: i32,
    pub endpoint: Option<String>,
    pub auth_token_secret: Option<String>,
    pub local_root: Option<PathBuf>,
}

impl StorageSection {
    /// The fixed offset every run timestamp is rendered in. An out-of-range
    /// configuration value is rejected at load time, so the fallback here is
    /// unreachable in practice.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let mut config: PipelineConfig = load_toml(path)?;
    validate(&config)?;

    // Contract paths in the file are relative to the config file itself.
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    config.contract.column_types = resolve_against(&base, &config.contract.column_types);
    config.contract.percent_columns = resolve_against(&base, &config.contract.percent_columns);
    Ok(config)
}

fn resolve_against(base: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn validate(config: &PipelineConfig) -> Result<()> {
    url::Url::parse(&config.portal.login_url).map_err(|source| ConfigError::InvalidUrl {
        field: "portal.login_url",
        source,
    })?;
    url::Url::parse(&config.portal.screener_url).map_err(|source| ConfigError::InvalidUrl {
        field: "portal.screener_url",
        source,
    })?;
    if config.storage.utc_offset_hours.abs() >= 24 {
        return Err(ConfigError::InvalidValue {
            field: "storage.utc_offset_hours",
            reason: format!("{} is not a valid hour offset", config.storage.utc_offset_hours),
        });
    }
    if config.download.poll_attempts == 0 {
        return Err(ConfigError::InvalidValue {
            field: "download.poll_attempts",
            reason: "at least one poll is required".to_string(),
        });
    }
    Ok(())
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/pipeline.toml");
        let config = load_pipeline_config(&path).expect("fixture config should parse");
        assert_eq!(config.storage.utc_offset_hours, -5);
        assert_eq!(config.download.poll_attempts, 240);
        assert!(config.portal.screener_url.starts_with("https://"));
        // contract paths are resolved against the config directory
        assert!(config.contract.column_types.is_absolute() || config.contract.column_types.starts_with(".."));
        assert!(config.contract.column_types.to_string_lossy().ends_with("column_types.json"));
    }

    #[test]
    fn offset_matches_configured_hours() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/pipeline.toml");
        let config = load_pipeline_config(&path).unwrap();
        assert_eq!(config.storage.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn rejects_invalid_portal_url() {
        let toml_text = std::fs::read_to_string(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/pipeline.toml"),
        )
        .unwrap();
        let broken = toml_text.replace("https://stockanalysis.com/login/", "not a url");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, broken).unwrap();
        let err = load_pipeline_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { field, .. } if field == "portal.login_url"));
    }
}
