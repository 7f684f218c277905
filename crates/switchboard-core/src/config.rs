//! Core configuration.
//!
//! Stored as a single camelCase JSON file. Every field has a default, so a
//! missing file or a partial file both load cleanly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engines::EngineKind;
use crate::error::{CoreError, Result};

/// Prompts at or above this many chars go through stdin instead of argv.
pub const DEFAULT_ARG_THRESHOLD_CHARS: usize = 7_500;
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 3_000;
pub const DEFAULT_DEDUP_WINDOW: usize = 64;
pub const DEFAULT_DEDUP_TTL_MS: u64 = 2_000;
pub const DEFAULT_REPLAY_MAX_CHARS: usize = 24_000;

/// Per-engine overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Explicit binary location, checked before PATH.
    pub binary_path: Option<PathBuf>,
    pub model: Option<String>,
    /// Appended verbatim after the generated arguments.
    pub extra_args: Vec<String>,
}

/// An external helper integration exposed as a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema for the helper's arguments.
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    /// Engines that should call this helper natively (missing = engine default).
    #[serde(default)]
    pub native_support: HashMap<EngineKind, bool>,
}

/// A named sub-agent persona exposed as a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub system_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub engines: HashMap<EngineKind, EngineSettings>,
    /// Replaces the default `$SHELL -l -c` wrapper on Unix.
    pub shell_prefix: Option<String>,
    pub arg_threshold_chars: usize,
    pub grace_period_ms: u64,
    pub dedup_window: usize,
    pub dedup_ttl_ms: u64,
    pub replay_max_chars: usize,
    /// Directory for raw per-session stream logs. No logs when unset.
    pub log_dir: Option<PathBuf>,
    pub helpers: Vec<HelperConfig>,
    pub sub_agents: Vec<SubAgentConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            engines: HashMap::new(),
            shell_prefix: None,
            arg_threshold_chars: DEFAULT_ARG_THRESHOLD_CHARS,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            dedup_ttl_ms: DEFAULT_DEDUP_TTL_MS,
            replay_max_chars: DEFAULT_REPLAY_MAX_CHARS,
            log_dir: None,
            helpers: Vec::new(),
            sub_agents: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let config: CoreConfig = serde_json::from_str(&contents)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_string_pretty(self)?)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.arg_threshold_chars == 0 {
            return Err(CoreError::Config(
                "argThresholdChars must be greater than zero".to_string(),
            ));
        }
        if self.dedup_window == 0 {
            return Err(CoreError::Config(
                "dedupWindow must be greater than zero".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for name in self
            .helpers
            .iter()
            .map(|h| &h.name)
            .chain(self.sub_agents.iter().map(|a| &a.name))
        {
            if !seen.insert(name) {
                return Err(CoreError::Config(format!("duplicate tool name: {name}")));
            }
        }
        Ok(())
    }

    pub fn engine(&self, kind: EngineKind) -> EngineSettings {
        self.engines.get(&kind).cloned().unwrap_or_default()
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.arg_threshold_chars, DEFAULT_ARG_THRESHOLD_CHARS);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"gracePeriodMs": 500, "engines": {"claude": {"binaryPath": "/opt/claude"}}}"#,
        )
        .unwrap();

        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.grace_period(), Duration::from_millis(500));
        assert_eq!(config.dedup_window, DEFAULT_DEDUP_WINDOW);
        assert_eq!(
            config.engine(EngineKind::Claude).binary_path,
            Some(PathBuf::from("/opt/claude"))
        );
        assert_eq!(config.engine(EngineKind::Gemini), EngineSettings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = CoreConfig::default();
        config.sub_agents.push(SubAgentConfig {
            name: "reviewer".to_string(),
            description: None,
            system_prompt: "Review the diff.".to_string(),
        });
        config.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(CoreConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn rejects_zero_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"argThresholdChars": 0}"#).unwrap();
        assert!(matches!(CoreConfig::load(&path), Err(CoreError::Config(_))));
    }

    #[test]
    fn rejects_duplicate_tool_names() {
        let mut config = CoreConfig::default();
        config.sub_agents.push(SubAgentConfig {
            name: "dup".to_string(),
            description: None,
            system_prompt: String::new(),
        });
        config.helpers.push(HelperConfig {
            name: "dup".to_string(),
            command: "true".to_string(),
            args: vec![],
            description: None,
            schema: None,
            native_support: HashMap::new(),
        });
        assert!(config.validate().is_err());
    }
}
