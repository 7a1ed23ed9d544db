use crate::crypto::check_kdf;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Сколько живёт разблокированная карта, если в config.json не указано иное.
pub const DEFAULT_SESSION_HOURS: u32 = 8;

/// Дольше года сессия не живёт.
pub const MAX_SESSION_HOURS: u32 = 24 * 366;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_mib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_mib: 32,
            iterations: 3,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub session_hours: u32,
    pub kdf: KdfParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            session_hours: DEFAULT_SESSION_HOURS,
            kdf: KdfParams::default(),
        }
    }
}

impl Config {
    /// Загрузить config.json из корня хранилища; если файла нет, берём значения по умолчанию.
    pub fn load(store_dir: &Path) -> anyhow::Result<Self> {
        let path = config_path(store_dir);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read config {}", path.display()));
            }
        };

        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn session_duration(&self) -> time::Duration {
        time::Duration::hours(i64::from(self.session_hours))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(1..=MAX_SESSION_HOURS).contains(&self.session_hours) {
            bail!(
                "session_hours must be in 1..={MAX_SESSION_HOURS}, got {}",
                self.session_hours
            );
        }
        check_kdf(&self.kdf).context("invalid kdf section")?;
        Ok(())
    }
}

pub fn config_path(store_dir: &Path) -> PathBuf {
    store_dir.join("config.json")
}

pub fn save_config(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(cfg)?;
    std::fs::write(path, s)?;
    Ok(())
}
