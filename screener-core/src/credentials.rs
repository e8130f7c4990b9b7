use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub type SecretResult<T> = Result<T, SecretError>;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),
}

/// Opaque key→secret lookup. Secrets are fetched once per run and never
/// persisted or logged.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, name: &str) -> SecretResult<String>;
}

/// Resolves secrets from the process environment: the logical name is
/// upper-cased, dashes become underscores, and the configured prefix is
/// prepended (`bucket-name` → `SCREENER_BUCKET_NAME`).
#[derive(Debug, Clone)]
pub struct EnvCredentialStore {
    prefix: String,
}

impl EnvCredentialStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable_for(&self, name: &str) -> String {
        format!(
            "{}{}",
            self.prefix,
            name.to_uppercase().replace('-', "_")
        )
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, name: &str) -> SecretResult<String> {
        let variable = self.variable_for(name);
        match std::env::var(&variable) {
            Ok(value) if !value.is_empty() => {
                debug!(secret = name, "credential resolved");
                Ok(value)
            }
            _ => Err(SecretError::NotFound(name.to_string())),
        }
    }
}

/// Fixed in-memory store for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    entries: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get(&self, name: &str) -> SecretResult<String> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}
