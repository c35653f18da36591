// SPDX-License-Identifier: MIT

use crate::model::AuthConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: Option<String>,
    pub url: String,
    pub username: String,
    pub password: String,
}

impl AccountConfig {
    pub fn to_auth(&self) -> AuthConfig {
        AuthConfig {
            list_name: self.name.clone().unwrap_or_else(|| "default".to_string()),
            base_url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory; defaults to the platform cache dir when unset.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub background_throttle_ms: u64,
    pub manual_throttle_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            background_throttle_ms: 200,
            manual_throttle_ms: 100,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts: vec![AccountConfig {
                name: Some("Example Provider".to_string()),
                url: "https://your-server.com:8080".to_string(),
                username: "your-username".to_string(),
                password: "your-password".to_string(),
            }],
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Resolves an account by name, or the sole configured account when no
    /// name is given.
    pub fn account(&self, name: Option<&str>) -> Result<AuthConfig> {
        match name {
            Some(name) => self
                .accounts
                .iter()
                .find(|a| a.name.as_deref() == Some(name))
                .map(AccountConfig::to_auth)
                .with_context(|| format!("No account named '{name}' in config")),
            None => match self.accounts.as_slice() {
                [] => bail!("No accounts configured"),
                [only] => Ok(only.to_auth()),
                _ => bail!("Multiple accounts configured; pick one with --account"),
            },
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("xtv").join("config.toml"))
}
