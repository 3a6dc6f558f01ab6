//! Shared types, error model, and configuration for paperpipe.
//!
//! This crate is the foundation depended on by all other paperpipe crates.
//! It provides:
//! - [`PipelineError`]: the unified error type
//! - Domain types ([`PipelineJob`], [`JobStatus`], [`Document`], [`StateDocument`])
//! - Configuration ([`AppConfig`], [`PipelineSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, DiscoveryConfig, NotifyConfig, PipelineSettings, PromptsConfig,
    StateConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    read_secret,
};
pub use error::{PipelineError, Result};
pub use types::{
    CURRENT_SCHEMA_VERSION, Document, JobEntry, JobStatus, PipelineId, PipelineJob,
    StateDocument, SummaryRecord,
};
