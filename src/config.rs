//! Configuration types for the worker runtime and session coordinator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmberConfig {
    /// Engine adapter settings.
    pub engine: EngineConfig,
    /// Worker runtime settings.
    pub worker: WorkerConfig,
    /// Foreground session settings.
    pub session: SessionConfig,
    /// Persistence settings.
    pub storage: StorageConfig,
}

/// Engine adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ask the engine to keep downloaded weights in its persistent on-device cache.
    pub use_persistent_cache: bool,
    /// Prefer the streaming chat call shape when the engine offers one.
    pub prefer_streaming: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_persistent_cache: true,
            prefer_streaming: true,
        }
    }
}

/// What the worker does with a prompt that arrives before an engine session exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotReadyPolicy {
    /// Log the prompt and forget it.
    #[default]
    Drop,
    /// Hold prompts received before `init` and replay them once
    /// initialization has concluded.
    Queue,
}

/// Worker runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deadline for the whole initialization sequence in milliseconds (0 = none).
    pub init_timeout_ms: u64,
    /// Deadline for a single completion in milliseconds (0 = none).
    pub prompt_timeout_ms: u64,
    /// Handling of prompts that arrive without an engine session.
    pub not_ready_policy: NotReadyPolicy,
    /// Capacity of the inbound message queue.
    pub inbound_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 10 * 60 * 1000,
            prompt_timeout_ms: 5 * 60 * 1000,
            not_ready_policy: NotReadyPolicy::Drop,
            inbound_capacity: 64,
        }
    }
}

impl WorkerConfig {
    /// Initialization deadline, `None` when disabled.
    #[must_use]
    pub fn init_timeout(&self) -> Option<Duration> {
        (self.init_timeout_ms > 0).then(|| Duration::from_millis(self.init_timeout_ms))
    }

    /// Completion deadline, `None` when disabled.
    #[must_use]
    pub fn prompt_timeout(&self) -> Option<Duration> {
        (self.prompt_timeout_ms > 0).then(|| Duration::from_millis(self.prompt_timeout_ms))
    }
}

/// How `response_chunk` messages land in the transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// Grow a single in-progress draft, committed by `response_final`.
    #[default]
    Accumulate,
    /// Append one assistant entry per chunk.
    PerChunk,
}

/// Foreground session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// System line the transcript starts with.
    pub greeting: String,
    /// Status text shown before the worker reports anything.
    pub initial_status: String,
    /// Status text (and system line) once the worker signals `ready`.
    pub ready_status: String,
    /// Chunk handling policy.
    pub chunk_policy: ChunkPolicy,
    /// Save and restore the transcript through the persistence helper.
    pub persist_history: bool,
    /// Key the transcript is stored under.
    pub history_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: "Ready. Type to begin.".to_owned(),
            initial_status: "Initializing...".to_owned(),
            ready_status: "Engine ready".to_owned(),
            chunk_policy: ChunkPolicy::Accumulate,
            persist_history: false,
            history_key: "chat_history".to_owned(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding persisted JSON values.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Default data directory: `<platform data dir>/ember`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("ember"))
        .unwrap_or_else(|| std::env::temp_dir().join("ember"))
}

impl EmberConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::EmberError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::EmberError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/ember/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("ember").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("ember")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/ember-config/config.toml")
        }
    }
}
