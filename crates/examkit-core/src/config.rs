//! Pipeline configuration loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Timer defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSettings {
    /// Default tick interval in milliseconds.
    #[serde(default = "default_precision")]
    pub precision_ms: u64,
    /// Drift samples at or below this magnitude are not recorded.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold_ms: u64,
    /// Number of drift samples kept for the rolling average.
    #[serde(default = "default_drift_window")]
    pub drift_window: usize,
}

fn default_precision() -> u64 {
    1000
}
fn default_drift_threshold() -> u64 {
    50
}
fn default_drift_window() -> usize {
    10
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            precision_ms: default_precision(),
            drift_threshold_ms: default_drift_threshold(),
            drift_window: default_drift_window(),
        }
    }
}

/// Scoring engine settings.
///
/// Note: Custom Debug impl masks the integrity secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct ScoringSettings {
    /// Absolute tolerance for numerical-input questions.
    #[serde(default = "default_tolerance")]
    pub numeric_tolerance: f64,
    /// How long the marking scheme stays in the offline cache.
    #[serde(default = "default_scheme_ttl")]
    pub scheme_ttl_secs: u64,
    /// Deadline for a finalize request to the scoring worker.
    #[serde(default = "default_finalize_timeout")]
    pub finalize_timeout_ms: u64,
    /// Key for the submission integrity MAC.
    #[serde(default)]
    pub integrity_secret: String,
}

fn default_tolerance() -> f64 {
    0.01
}
fn default_scheme_ttl() -> u64 {
    4 * 60 * 60
}
fn default_finalize_timeout() -> u64 {
    5000
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            numeric_tolerance: default_tolerance(),
            scheme_ttl_secs: default_scheme_ttl(),
            finalize_timeout_ms: default_finalize_timeout(),
            integrity_secret: String::new(),
        }
    }
}

impl ScoringSettings {
    pub fn scheme_ttl(&self) -> Duration {
        Duration::from_secs(self.scheme_ttl_secs)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }
}

impl std::fmt::Debug for ScoringSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringSettings")
            .field("numeric_tolerance", &self.numeric_tolerance)
            .field("scheme_ttl_secs", &self.scheme_ttl_secs)
            .field("finalize_timeout_ms", &self.finalize_timeout_ms)
            .field("integrity_secret", &"***")
            .finish()
    }
}

/// Submission queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Worker pool size; the ceiling on concurrent persistence writes.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Fraction of the backoff delay added as random jitter.
    #[serde(default = "default_jitter")]
    pub jitter_ratio: f64,
    /// How long terminal submissions are kept before purging.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Append-only journal of queue transitions.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    /// JSONL sink for persisted submissions; in-memory when absent.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_workers() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.25
}
fn default_retention() -> u64 {
    24 * 60 * 60
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter_ratio: default_jitter(),
            retention_secs: default_retention(),
            journal_path: None,
            store_path: None,
        }
    }
}

/// Attempts read-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptsCacheSettings {
    #[serde(default = "default_attempts_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_attempts_entries")]
    pub max_entries: usize,
}

fn default_attempts_ttl() -> u64 {
    120
}
fn default_attempts_entries() -> usize {
    500
}

impl Default for AttemptsCacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_attempts_ttl(),
            max_entries: default_attempts_entries(),
        }
    }
}

/// Top-level examkit configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamkitConfig {
    #[serde(default)]
    pub timer: TimerSettings,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub attempts_cache: AttemptsCacheSettings,
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_path(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.as_ref()
        .map(|p| PathBuf::from(resolve_env_vars(&p.to_string_lossy())))
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examkit.toml` in the current directory
/// 2. `~/.config/examkit/config.toml`
///
/// Environment variable override: `EXAMKIT_INTEGRITY_SECRET`.
pub fn load_config() -> Result<ExamkitConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamkitConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("examkit.toml");
        if local.exists() {
            Some(local)
        } else if let Some(home) = dirs_path() {
            let global = home.join("config.toml");
            if global.exists() {
                Some(global)
            } else {
                None
            }
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<ExamkitConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExamkitConfig::default(),
    };

    if let Ok(secret) = std::env::var("EXAMKIT_INTEGRITY_SECRET") {
        config.scoring.integrity_secret = secret;
    }

    config.scoring.integrity_secret = resolve_env_vars(&config.scoring.integrity_secret);
    config.queue.journal_path = resolve_path(&config.queue.journal_path);
    config.queue.store_path = resolve_path(&config.queue.store_path);

    validate(&config)?;
    Ok(config)
}

fn validate(config: &ExamkitConfig) -> Result<()> {
    anyhow::ensure!(config.timer.precision_ms > 0, "timer.precision_ms must be positive");
    anyhow::ensure!(config.timer.drift_window > 0, "timer.drift_window must be positive");
    anyhow::ensure!(config.queue.workers >= 1, "queue.workers must be at least 1");
    anyhow::ensure!(
        config.queue.max_attempts >= 1,
        "queue.max_attempts must be at least 1"
    );
    anyhow::ensure!(
        (0.0..=1.0).contains(&config.queue.jitter_ratio),
        "queue.jitter_ratio must be between 0.0 and 1.0"
    );
    anyhow::ensure!(
        config.scoring.numeric_tolerance >= 0.0,
        "scoring.numeric_tolerance must not be negative"
    );
    anyhow::ensure!(
        config.attempts_cache.max_entries >= 1,
        "attempts_cache.max_entries must be at least 1"
    );
    Ok(())
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examkit"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_EXAMKIT_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_EXAMKIT_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_EXAMKIT_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        std::env::remove_var("_EXAMKIT_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = ExamkitConfig::default();
        assert_eq!(config.timer.precision_ms, 1000);
        assert_eq!(config.timer.drift_threshold_ms, 50);
        assert_eq!(config.timer.drift_window, 10);
        assert_eq!(config.queue.workers, 10);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.attempts_cache.ttl_secs, 120);
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
[scoring]
integrity_secret = "s3cret"
numeric_tolerance = 0.5

[queue]
workers = 4
journal_path = "/tmp/queue.jsonl"
"#;
        let config: ExamkitConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.scoring.numeric_tolerance, 0.5);
        assert_eq!(
            config.queue.journal_path,
            Some(PathBuf::from("/tmp/queue.jsonl"))
        );
    }

    #[test]
    fn debug_masks_secret() {
        let settings = ScoringSettings {
            integrity_secret: "top-secret".into(),
            ..Default::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("top-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn load_from_file_rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examkit.toml");
        std::fs::write(&path, "[queue]\nworkers = 0\n").unwrap();
        let err = load_config_from(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn load_missing_explicit_path_fails() {
        let err = load_config_from(Some(Path::new("/nonexistent/examkit.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
