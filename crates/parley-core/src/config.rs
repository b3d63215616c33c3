use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};
use crate::types::{PageContext, QuickAction};

/// Top-level configuration for the Parley widget engine.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults when absent, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub widget: WidgetConfig,
    #[serde(default)]
    pub contact: ContactConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply `PARLEY_INFERENCE_URL` and `PARLEY_LOG` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PARLEY_INFERENCE_URL").filter(|v| !v.trim().is_empty()) {
            self.inference.endpoint = Some(url);
        }
        if let Some(level) = lookup("PARLEY_LOG").filter(|v| !v.trim().is_empty()) {
            self.general.log_level = level;
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the SQLite database and the local key-value file.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    /// `data_dir` with a leading `~` expanded to the home directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        let data_dir = self.data_dir.as_str();
        if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
            #[cfg(target_os = "windows")]
            let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
            #[cfg(not(target_os = "windows"))]
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(&data_dir[2..])
        } else {
            PathBuf::from(data_dir)
        }
    }
}

/// Inference endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Full URL of the chat endpoint. `None` sends every turn down the
    /// fallback path.
    pub endpoint: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 30_000,
        }
    }
}

/// Durable and local storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Whether a durable backend is configured at all.
    pub durable_enabled: bool,
    /// SQLite file name inside `data_dir`.
    pub database_file: String,
    /// Local key-value file name inside `data_dir`.
    pub local_store_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            durable_enabled: true,
            database_file: "parley.db".to_string(),
            local_store_file: "local_store.json".to_string(),
        }
    }
}

/// Widget content shown at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub welcome_message: String,
    pub quick_actions: Vec<QuickAction>,
    pub input_placeholder: String,
    pub escalated_placeholder: String,
    pub page: PageContext,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            welcome_message:
                "Hi there! I'm the virtual assistant. How can I help you today?".to_string(),
            quick_actions: vec![
                QuickAction::new("💰", "Pricing Info", "pricing"),
                QuickAction::new("🛠️", "Our Services", "services"),
                QuickAction::new("📅", "Book a Consultation", "consultation"),
                QuickAction::new("👤", "Talk to a Human", "human"),
            ],
            input_placeholder: "Type your message...".to_string(),
            escalated_placeholder: "A team member will reply shortly...".to_string(),
            page: PageContext::default(),
        }
    }
}

/// Direct contact details offered when the assistant cannot answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub phone: String,
    pub email: String,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            phone: "+1-555-010-0100".to_string(),
            email: "hello@example.com".to_string(),
        }
    }
}
