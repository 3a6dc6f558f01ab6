//! Application configuration for paperpipe.
//!
//! User config lives at `~/.paperpipe/paperpipe.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored here; the config names the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperpipe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperpipe";

// ---------------------------------------------------------------------------
// Config structs (matching paperpipe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the pipeline state lives.
    #[serde(default)]
    pub state: StateConfig,

    /// Batch inference service settings.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Notification channel settings.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Document discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Prompt template locations.
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// `[state]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the JSON state file.
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> String {
    "state/pending_jobs.json".into()
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_batch_key_env")]
    pub api_key_env: String,

    /// API base URL.
    #[serde(default = "default_batch_base_url")]
    pub base_url: String,

    /// Model used for the relevance pass.
    #[serde(default = "default_interest_model")]
    pub interest_model: String,

    /// Model used for the summarization pass.
    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Hours a batch may run before it is cancelled in favor of the
    /// synchronous fallback.
    #[serde(default = "default_timeout_hours")]
    pub timeout_hours: f64,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_batch_key_env(),
            base_url: default_batch_base_url(),
            interest_model: default_interest_model(),
            summary_model: default_summary_model(),
            timeout_hours: default_timeout_hours(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_batch_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_batch_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_interest_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_summary_model() -> String {
    "gemini-3-flash-preview".into()
}
fn default_timeout_hours() -> f64 {
    48.0
}
fn default_request_timeout() -> u64 {
    120
}

/// `[notify]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Name of the env var holding the webhook URL.
    #[serde(default = "default_webhook_env")]
    pub webhook_url_env: String,

    /// Pause between individual item posts.
    #[serde(default = "default_item_delay")]
    pub item_delay_secs: f64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url_env: default_webhook_env(),
            item_delay_secs: default_item_delay(),
        }
    }
}

fn default_webhook_env() -> String {
    "ARXIV_RECOMMENDER_WEBHOOK_URL".into()
}
fn default_item_delay() -> f64 {
    1.5
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// arXiv export API query endpoint.
    #[serde(default = "default_discovery_url")]
    pub base_url: String,

    /// arXiv categories to search (OR-ed together).
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Search the submission day this many days before today.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Offset from UTC used to decide what "today" is.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    /// Results requested per API page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Optional cap on the total number of documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_url: default_discovery_url(),
            categories: default_categories(),
            lookback_days: default_lookback_days(),
            utc_offset_hours: default_utc_offset(),
            page_size: default_page_size(),
            max_results: None,
        }
    }
}

fn default_discovery_url() -> String {
    "https://export.arxiv.org/api/query".into()
}
fn default_categories() -> Vec<String> {
    ["math.DS", "math.CO", "math.GR", "cs.LO", "cs.FL", "cs.DM"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_lookback_days() -> u32 {
    3
}
fn default_utc_offset() -> i32 {
    -5
}
fn default_page_size() -> usize {
    100
}

/// `[prompts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Template appended to each relevance-check request.
    #[serde(default = "default_interest_prompt")]
    pub interest_path: String,

    /// Template appended to each summarization request.
    #[serde(default = "default_summary_prompt")]
    pub summary_path: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            interest_path: default_interest_prompt(),
            summary_path: default_summary_prompt(),
        }
    }
}

fn default_interest_prompt() -> String {
    "prompts/check_interest.txt".into()
}
fn default_summary_prompt() -> String {
    "prompts/summarize.txt".into()
}

// ---------------------------------------------------------------------------
// Pipeline settings (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime knobs of the pipeline state machine.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// A batch still running after this long is cancelled and replaced by
    /// the synchronous fallback.
    pub batch_timeout: chrono::Duration,
    /// Pause between consecutive notification posts.
    pub item_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Upper bound accepted for `[batch] timeout_hours` (ten years).
const MAX_TIMEOUT_HOURS: f64 = 24.0 * 365.0 * 10.0;

/// Upper bound accepted for `[notify] item_delay_secs`.
const MAX_ITEM_DELAY_SECS: f64 = 3600.0;

impl AppConfig {
    /// Reject numeric settings that cannot become durations.
    pub fn validate(&self) -> Result<()> {
        let timeout = self.batch.timeout_hours;
        if !timeout.is_finite() || timeout > MAX_TIMEOUT_HOURS {
            return Err(PipelineError::config(format!(
                "batch.timeout_hours must be a finite number of hours up to {MAX_TIMEOUT_HOURS}, got {timeout}"
            )));
        }
        let delay = self.notify.item_delay_secs;
        if !delay.is_finite() || delay > MAX_ITEM_DELAY_SECS {
            return Err(PipelineError::config(format!(
                "notify.item_delay_secs must be a finite number of seconds up to {MAX_ITEM_DELAY_SECS}, got {delay}"
            )));
        }
        Ok(())
    }
}

impl From<&AppConfig> for PipelineSettings {
    /// Negative values mean zero; out-of-range values are clamped to the
    /// limits [`AppConfig::validate`] enforces.
    fn from(config: &AppConfig) -> Self {
        let hours = finite_or_zero(config.batch.timeout_hours).clamp(0.0, MAX_TIMEOUT_HOURS);
        let delay = finite_or_zero(config.notify.item_delay_secs).clamp(0.0, MAX_ITEM_DELAY_SECS);
        Self {
            batch_timeout: chrono::Duration::seconds((hours * 3600.0) as i64),
            item_delay: Duration::from_secs_f64(delay),
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperpipe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PipelineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperpipe/paperpipe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("failed to parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PipelineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PipelineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the env var named by the config.
pub fn read_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(PipelineError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("pending_jobs.json"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
        assert!(toml_str.contains("ARXIV_RECOMMENDER_WEBHOOK_URL"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.batch.timeout_hours, 48.0);
        assert_eq!(parsed.notify.item_delay_secs, 1.5);
        assert_eq!(parsed.discovery.categories.len(), 6);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[batch]
timeout_hours = 6

[discovery]
categories = ["cs.LG"]
max_results = 20
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.batch.timeout_hours, 6.0);
        assert_eq!(config.batch.interest_model, "gemini-2.5-flash");
        assert_eq!(config.discovery.categories, vec!["cs.LG"]);
        assert_eq!(config.discovery.max_results, Some(20));
        assert_eq!(config.state.path, "state/pending_jobs.json");
    }

    #[test]
    fn pipeline_settings_from_app_config() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.batch_timeout, chrono::Duration::hours(48));
        assert_eq!(settings.item_delay, Duration::from_millis(1500));

        let mut config = AppConfig::default();
        config.notify.item_delay_secs = -3.0;
        config.batch.timeout_hours = 0.5;
        let settings = PipelineSettings::from(&config);
        assert_eq!(settings.item_delay, Duration::ZERO);
        assert_eq!(settings.batch_timeout, chrono::Duration::minutes(30));
    }

    #[test]
    fn unusable_durations_are_rejected_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");

        let path = dir.path().join("huge.toml");
        std::fs::write(&path, "[batch]\ntimeout_hours = 1e300\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
        assert!(err.to_string().contains("timeout_hours"));

        let path = dir.path().join("inf.toml");
        std::fs::write(&path, "[notify]\nitem_delay_secs = inf\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("item_delay_secs"));

        let path = dir.path().join("ok.toml");
        std::fs::write(&path, "[batch]\ntimeout_hours = 6\n").unwrap();
        assert_eq!(load_config_from(&path).unwrap().batch.timeout_hours, 6.0);
    }

    #[test]
    fn settings_clamp_instead_of_panicking() {
        let mut config = AppConfig::default();
        config.batch.timeout_hours = f64::MAX;
        config.notify.item_delay_secs = f64::INFINITY;
        let settings = PipelineSettings::from(&config);
        assert_eq!(
            settings.batch_timeout,
            chrono::Duration::hours(24 * 365 * 10)
        );
        assert_eq!(settings.item_delay, Duration::ZERO);
    }

    #[test]
    fn missing_secret_is_config_error() {
        // Use a unique env var name to avoid interfering with other tests
        let result = read_secret("PP_TEST_NONEXISTENT_SECRET_12345", "Webhook URL");
        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
        assert!(err.to_string().contains("PP_TEST_NONEXISTENT_SECRET_12345"));
    }
}
