use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::template::DEFAULT_SYSTEM_PROMPT;

/// Session and worker settings. Every field has a default so a partial YAML
/// file is enough.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub dtype: String,
    pub device: String,
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub system_prompt: String,
    /// Fail on invariant violations instead of logging and carrying on.
    pub strict: bool,
    /// Delay between simulated tokens or image steps.
    pub token_interval_ms: u64,
    pub image_steps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "HuggingFaceTB/SmolLM2-1.7B-Instruct".to_string(),
            dtype: "q4f16".to_string(),
            device: "webgpu".to_string(),
            max_new_tokens: 256,
            temperature: 0.2,
            top_p: 0.9,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            strict: cfg!(debug_assertions),
            token_interval_ms: 80,
            image_steps: 8,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// File (explicit, or the default location when it exists) overlaid by
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(model) = env::var("BROWSER_LLM_MODEL") {
            self.model = model;
        }
        if let Ok(dtype) = env::var("BROWSER_LLM_DTYPE") {
            self.dtype = dtype;
        }
        if let Ok(device) = env::var("BROWSER_LLM_DEVICE") {
            self.device = device;
        }
        if let Some(max) = parse_var("BROWSER_LLM_MAX_NEW_TOKENS") {
            self.max_new_tokens = max;
        }
        if let Some(temp) = parse_var("BROWSER_LLM_TEMPERATURE") {
            self.temperature = temp;
        }
        if let Some(top_p) = parse_var("BROWSER_LLM_TOP_P") {
            self.top_p = top_p;
        }
        if let Some(strict) = parse_var("BROWSER_LLM_STRICT") {
            self.strict = strict;
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.trim().parse().ok()
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("browser-llm").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("model: onnx-community/Janus-1.3B-ONNX\nimage_steps: 4\n").unwrap();
        assert_eq!(config.model, "onnx-community/Janus-1.3B-ONNX");
        assert_eq!(config.image_steps, 4);
        assert_eq!(config.dtype, "q4f16");
        assert_eq!(config.max_new_tokens, 256);
    }

    #[test]
    fn test_from_file() {
        let path = env::temp_dir().join(format!("browser-llm-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "max_new_tokens: 32\nstrict: false\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.max_new_tokens, 32);
        assert!(!config.strict);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::from_file(Path::new("/nonexistent/browser-llm.yaml")).is_err());
    }
}
