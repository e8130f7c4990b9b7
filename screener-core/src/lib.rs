pub mod auth;
pub mod browser;
pub mod config;
pub mod credentials;
pub mod error;
pub mod navigate;
pub mod pipeline;
pub mod publish;
pub mod table;
pub mod transform;
pub mod wait;
pub mod watcher;

pub use config::{load_pipeline_config, PipelineConfig};
pub use error::{ConfigError, Result};
pub use pipeline::{PipelineError, PipelineOrchestrator, PipelineResult, RunOutcome};
pub use publish::{DirObjectStore, HttpObjectStore, ObjectStore, StorageKey};
