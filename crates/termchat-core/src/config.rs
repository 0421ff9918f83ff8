use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, anyhow, bail};

use crate::pipeline::CompletionSettings;
use crate::transport::DEFAULT_ENDPOINT;
use crate::MAX_DOCUMENT_LEN;

pub const RC_FILENAME: &str = "termchatrc.json";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(rename = "openai", default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    /// Role of the instruction message: `system`, `developer`, ...
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl Config {
    /// Load the rc file from `path`, or from the default location. An
    /// `OPENAI_API_KEY` in the environment replaces the file's key.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_path()?,
        };

        let mut config = Self::load_from(&path)?;
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                tracing::debug!("using API key from OPENAI_API_KEY");
                config.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Could not find rc file at {}", path.display());
        }

        let size = fs::metadata(path)
            .with_context(|| format!("Failed to inspect config file {}", path.display()))?
            .len();
        if size > MAX_DOCUMENT_LEN as u64 {
            bail!(
                "Config file {} is too large ({} bytes, limit {})",
                path.display(),
                size,
                MAX_DOCUMENT_LEN
            );
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.validate()?;
        tracing::debug!(path = %path.display(), model = %config.model, "loaded config");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("openai", &self.api_key, "api key"),
            ("model", &self.model, "model"),
            ("role", &self.role, "role"),
            ("instruction", &self.instruction, "instruction"),
        ];
        for (key, value, what) in required {
            if value.trim().is_empty() {
                bail!("Failed to get the {} from the config file (key \"{}\")", what, key);
            }
        }
        Ok(())
    }

    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            system_role: self.role.clone(),
            instruction: self.instruction.clone(),
            endpoint: self.endpoint.clone(),
        }
    }

    pub fn get_config_path() -> Result<PathBuf> {
        config_path_from(std::env::var_os("XDG_CONFIG_HOME"), dirs::home_dir())
    }
}

/// `$XDG_CONFIG_HOME/termchatrc.json`, else `~/.config/termchatrc.json`.
fn config_path_from(xdg_config_home: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = xdg_config_home.filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir).join(RC_FILENAME));
    }

    let home = home.ok_or_else(|| anyhow!("Could not find home directory"))?;
    Ok(home.join(".config").join(RC_FILENAME))
}
