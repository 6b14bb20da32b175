use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub handler: HandlerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Sqlite file path; `~` expands, relative paths resolve against the
    /// deployment root.
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub agent_type: String,
    pub poll_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    pub default_max_retries: u32,
    pub retention_days: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Command the worker runs per task: payload JSON on stdin, result JSON
    /// expected on stdout, non-zero exit reported as a task failure.
    pub command: Vec<String>,
}

impl Config {
    pub fn default_config() -> Self {
        Self {
            store: StoreConfig {
                path: ".swq/swq.db".to_string(),
            },
            worker: WorkerConfig {
                agent_type: "worker".to_string(),
                poll_interval_secs: 5,
                heartbeat_timeout_secs: 30,
            },
            queue: QueueConfig {
                default_max_retries: 3,
                retention_days: 7,
            },
            handler: HandlerConfig { command: vec![] },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse swq.toml")?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".swq").join("swq.toml")
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(&self.store.path).to_string();
        let p = PathBuf::from(expanded);
        if p.is_absolute() {
            p
        } else {
            root.join(p)
        }
    }
}
