//! Configuration values passed explicitly to the preview and the generator.
//! Loaded from an optional YAML file, then overridden by environment
//! variables.

use crate::document::{DEFAULT_STYLING_RUNTIME, DEFAULT_TITLE};
use crate::error::{PreviewError, PreviewResult};
use crate::host::SignalSource;
use crate::preview::PreviewMode;
use crate::runtime::{
    SandboxLimits, DEFAULT_EXECUTION_BUDGET_MS, DEFAULT_MAX_OUTPUT_BYTES, LUA_MEMORY_LIMIT_BYTES,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 256 * 1024;

pub const ENV_PREVIEW_MODE: &str = "MEDIABYTE_PREVIEW_MODE";
pub const ENV_LOAD_TIMEOUT_MS: &str = "MEDIABYTE_LOAD_TIMEOUT_MS";
pub const ENV_EXEC_BUDGET_MS: &str = "MEDIABYTE_EXEC_BUDGET_MS";
pub const ENV_STYLING_RUNTIME: &str = "MEDIABYTE_STYLING_RUNTIME";
pub const ENV_SIGNAL_SOURCE: &str = "MEDIABYTE_SIGNAL_SOURCE";
pub const ENV_MAX_DOCUMENT_BYTES: &str = "MEDIABYTE_MAX_DOCUMENT_BYTES";
pub const ENV_GENERATE_TIMEOUT_MS: &str = "MEDIABYTE_GENERATE_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub mode: PreviewMode,
    pub load_timeout_ms: u64,
    pub execution_budget_ms: u64,
    pub memory_limit_bytes: usize,
    /// Script URL for the styling runtime; empty disables it.
    pub styling_runtime: String,
    pub title: String,
    /// Reject unbalanced markup instead of sanitizing it as-is.
    pub strict_markup: bool,
    pub max_source_bytes: usize,
    /// Cap on the markup a component may render.
    pub max_document_bytes: usize,
    /// Who reports a host's terminal signal: the host itself, or the frame
    /// that displays its document.
    pub signal_source: SignalSource,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        PreviewConfig {
            mode: PreviewMode::default(),
            load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
            execution_budget_ms: DEFAULT_EXECUTION_BUDGET_MS,
            memory_limit_bytes: LUA_MEMORY_LIMIT_BYTES,
            styling_runtime: DEFAULT_STYLING_RUNTIME.to_string(),
            title: DEFAULT_TITLE.to_string(),
            strict_markup: false,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_document_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            signal_source: SignalSource::default(),
        }
    }
}

impl PreviewConfig {
    pub fn from_yaml(yaml: &str) -> PreviewResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PreviewResult<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn apply_env(self) -> PreviewResult<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(mut self, lookup: F) -> PreviewResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_PREVIEW_MODE) {
            self.mode = mode.parse()?;
        }
        if let Some(ms) = lookup(ENV_LOAD_TIMEOUT_MS) {
            self.load_timeout_ms = parse_env(ENV_LOAD_TIMEOUT_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_EXEC_BUDGET_MS) {
            self.execution_budget_ms = parse_env(ENV_EXEC_BUDGET_MS, &ms)?;
        }
        if let Some(url) = lookup(ENV_STYLING_RUNTIME) {
            self.styling_runtime = url.trim().to_string();
        }
        if let Some(source) = lookup(ENV_SIGNAL_SOURCE) {
            self.signal_source = source.parse()?;
        }
        if let Some(bytes) = lookup(ENV_MAX_DOCUMENT_BYTES) {
            self.max_document_bytes = parse_env(ENV_MAX_DOCUMENT_BYTES, &bytes)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> PreviewResult<()> {
        if self.load_timeout_ms == 0 {
            return Err(PreviewError::Config("load_timeout_ms must be positive".to_string()));
        }
        if self.execution_budget_ms == 0 {
            return Err(PreviewError::Config(
                "execution_budget_ms must be positive".to_string(),
            ));
        }
        if self.memory_limit_bytes < 64 * 1024 {
            return Err(PreviewError::Config(
                "memory_limit_bytes must be at least 64 KiB".to_string(),
            ));
        }
        if self.max_document_bytes == 0 {
            return Err(PreviewError::Config(
                "max_document_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_limit_bytes: self.memory_limit_bytes,
            execution_budget: Duration::from_millis(self.execution_budget_ms),
            max_output_bytes: self.max_document_bytes,
        }
    }

    pub fn styling_runtime(&self) -> Option<&str> {
        Some(self.styling_runtime.as_str()).filter(|s| !s.is_empty())
    }
}

/// Request policy for the UI generation client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub gemini_model: Option<String>,
    pub claude_model: Option<String>,
    pub gpt_model: Option<String>,
    pub llama_model: Option<String>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings {
            timeout_ms: 20_000,
            max_retries: 1,
            retry_delay_ms: 500,
            gemini_model: None,
            claude_model: None,
            gpt_model: None,
            llama_model: None,
        }
    }
}

impl GeneratorSettings {
    pub fn apply_env_from<F>(mut self, lookup: F) -> PreviewResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = lookup(ENV_GENERATE_TIMEOUT_MS) {
            self.timeout_ms = parse_env(ENV_GENERATE_TIMEOUT_MS, &ms)?;
        }
        let models = [
            ("MEDIABYTE_GEMINI_MODEL", &mut self.gemini_model),
            ("MEDIABYTE_CLAUDE_MODEL", &mut self.claude_model),
            ("MEDIABYTE_GPT_MODEL", &mut self.gpt_model),
            ("MEDIABYTE_LLAMA_MODEL", &mut self.llama_model),
        ];
        for (key, slot) in models {
            if let Some(model) = lookup(key).filter(|m| !m.trim().is_empty()) {
                *slot = Some(model.trim().to_string());
            }
        }
        Ok(self)
    }
}

/// Top-level file layout: `preview:` and `generator:` sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub preview: PreviewConfig,
    pub generator: GeneratorSettings,
}

impl AppConfig {
    /// Reads `path` if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> PreviewResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> PreviewResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match path {
            Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
            None => AppConfig::default(),
        };
        Ok(AppConfig {
            preview: base.preview.apply_env_from(&lookup)?,
            generator: base.generator.apply_env_from(&lookup)?,
        })
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> PreviewResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| PreviewError::Config(format!("{} has an invalid value '{}'", key, raw)))
}
