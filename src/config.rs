use crate::scanner::DEFAULT_INSTALL_ROOT;
use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Registry,
    File {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    #[serde(default)]
    pub store: StoreBackend,
    #[serde(default = "default_true")]
    pub confirm_switch: bool,
    #[serde(default = "default_true")]
    pub backup_before_switch: bool,
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            store: StoreBackend::default(),
            confirm_switch: true,
            backup_before_switch: true,
            keep_backups: default_keep_backups(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let path = config_path(data_dir);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            return parse_config(&raw).context("parse app config");
        }

        let config = AppConfig::default();
        config.save(data_dir)?;
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(config_path(data_dir), raw).context("write app config")?;
        Ok(())
    }
}

// Every field has a default, so serde alone would accept `[]` or `null`.
fn parse_config(raw: &str) -> Result<AppConfig> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        bail!("expected a JSON object");
    }
    Ok(serde_json::from_value(value)?)
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.json")
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("vivswitch"))
}

fn default_install_root() -> PathBuf {
    PathBuf::from(DEFAULT_INSTALL_ROOT)
}

fn default_true() -> bool {
    true
}

fn default_keep_backups() -> usize {
    10
}
