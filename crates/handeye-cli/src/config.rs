//! Configuration vault: reads/writes `~/.handeye/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use handeye_runtime::{ControllerConfig, SandboxConfig};

/// Persisted user configuration stored in `~/.handeye/config.toml`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible vision grounding service.
    #[serde(default = "default_grounding_url")]
    pub grounding_url: String,

    /// Vision model name sent with every grounding request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for the grounding service.  Stored as plain text; the
    /// file is written owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Attempts per goal before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Settle delay between act and verify, in milliseconds.
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    #[serde(default)]
    pub driver_faults_fatal: bool,

    /// Maximum `step()` calls per script run.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default)]
    pub abort_on_exhausted_retries: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("grounding_url", &self.grounding_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("max_attempts", &self.max_attempts)
            .field("verify_delay_ms", &self.verify_delay_ms)
            .field("driver_faults_fatal", &self.driver_faults_fatal)
            .field("max_steps", &self.max_steps)
            .field("abort_on_exhausted_retries", &self.abort_on_exhausted_retries)
            .finish()
    }
}

fn default_grounding_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_model() -> String {
    "autoglm-phone-9b".to_string()
}
fn default_max_attempts() -> u32 {
    ControllerConfig::default().max_attempts
}
fn default_verify_delay_ms() -> u64 {
    ControllerConfig::default().verify_delay.as_millis() as u64
}
fn default_max_steps() -> u32 {
    SandboxConfig::default().max_steps
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grounding_url: default_grounding_url(),
            model: default_model(),
            api_key: String::new(),
            max_attempts: default_max_attempts(),
            verify_delay_ms: default_verify_delay_ms(),
            driver_faults_fatal: false,
            max_steps: default_max_steps(),
            abort_on_exhausted_retries: false,
        }
    }
}

impl Config {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_attempts: self.max_attempts,
            verify_delay: Duration::from_millis(self.verify_delay_ms),
            driver_faults_fatal: self.driver_faults_fatal,
        }
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            max_steps: self.max_steps,
            abort_on_exhausted_retries: self.abort_on_exhausted_retries,
            ..SandboxConfig::default()
        }
    }
}

/// Return the path to `~/.handeye/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".handeye").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.  Environment overrides are applied to whatever was read.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Load from `path`, falling back to defaults (with environment overrides)
/// when the file is absent.
pub fn load_or_default(path: &Path) -> Result<Config, String> {
    match load_from(path)? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Apply `HANDEYE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HANDEYE_GROUNDING_URL` | `grounding_url` |
/// | `HANDEYE_MODEL` | `model` |
/// | `HANDEYE_API_KEY` | `api_key` |
/// | `HANDEYE_MAX_ATTEMPTS` | `max_attempts` |
/// | `HANDEYE_VERIFY_DELAY_MS` | `verify_delay_ms` |
///
/// Numeric values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HANDEYE_GROUNDING_URL") {
        cfg.grounding_url = v;
    }
    if let Ok(v) = std::env::var("HANDEYE_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("HANDEYE_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("HANDEYE_MAX_ATTEMPTS")
        && let Ok(n) = v.parse::<u32>()
        && n > 0
    {
        cfg.max_attempts = n;
    }
    if let Ok(v) = std::env::var("HANDEYE_VERIFY_DELAY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.verify_delay_ms = ms;
    }
}

/// Save the config to a specific path, creating the parent directory.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let cfg = Config {
            api_key: "sk-super-secret".to_string(),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("sk-super-secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_key() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[test]
    fn defaults_match_library_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.controller_config(), ControllerConfig::default());
        let sandbox = cfg.sandbox_config();
        assert_eq!(sandbox.max_steps, 50);
        assert!(!sandbox.abort_on_exhausted_retries);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("load ok").is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_attempts = 4\nabort_on_exhausted_retries = true\n").unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.max_attempts, 4);
        assert!(cfg.abort_on_exhausted_retries);
        assert_eq!(cfg.max_steps, 50);
        assert_eq!(cfg.controller_config().max_attempts, 4);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_attempts = \"many\"").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("parse"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            model: "ui-tars".to_string(),
            verify_delay_ms: 500,
            driver_faults_fatal: true,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.model, "ui-tars");
        assert_eq!(loaded.verify_delay_ms, 500);
        assert!(loaded.driver_faults_fatal);
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: no other test reads these variables.
        unsafe {
            std::env::set_var("HANDEYE_API_KEY", "from-env");
            std::env::set_var("HANDEYE_MAX_ATTEMPTS", "not-a-number");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("HANDEYE_API_KEY");
            std::env::remove_var("HANDEYE_MAX_ATTEMPTS");
        }
        assert_eq!(cfg.api_key, "from-env");
        assert_eq!(cfg.max_attempts, 2);
    }
}
