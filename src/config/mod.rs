use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tencent: TencentConfig,
    pub lark: LarkConfig,
    pub queue: QueueConfig,
    pub poller: PollerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TencentConfig {
    /// Callback token shared with the platform, used for signatures.
    pub token: String,
    /// 43-character `EncodingAESKey`.
    pub encoding_aes_key: String,
    pub api_base_url: String,
    pub app_id: String,
    pub sdk_id: String,
    pub secret_id: String,
    pub secret_key: String,
    pub operator_id: String,
    /// Error codes treated as "transcript still processing".
    pub processing_codes: Vec<i64>,
    pub timeout_secs: u64,
}

impl Default for TencentConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            encoding_aes_key: String::new(),
            api_base_url: "https://api.meeting.qq.com".to_string(),
            app_id: String::new(),
            sdk_id: String::new(),
            secret_id: String::new(),
            secret_key: String::new(),
            operator_id: String::new(),
            processing_codes: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl TencentConfig {
    pub fn callbacks_enabled(&self) -> bool {
        !self.token.is_empty() && !self.encoding_aes_key.is_empty()
    }

    pub fn api_enabled(&self) -> bool {
        !self.secret_id.is_empty() && !self.secret_key.is_empty() && !self.app_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LarkConfig {
    pub app_id: String,
    pub app_secret: String,
    /// Empty when the app receives plain callbacks.
    pub encrypt_key: String,
    pub verification_token: String,
    pub base_url: String,
    pub processing_codes: Vec<i64>,
    pub timeout_secs: u64,
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            encrypt_key: String::new(),
            verification_token: String::new(),
            base_url: "https://open.feishu.cn".to_string(),
            processing_codes: vec![124002],
            timeout_secs: 30,
        }
    }
}

impl LarkConfig {
    pub fn callbacks_enabled(&self) -> bool {
        !self.encrypt_key.is_empty() || !self.verification_token.is_empty()
    }

    pub fn api_enabled(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    /// How long a completed idempotency key keeps suppressing redeliveries.
    pub retention_hours: u64,
    /// Running jobs whose claim has not been refreshed for this long are
    /// assumed orphaned and requeued.
    pub stale_after_secs: u64,
    pub prune_interval_secs: u64,
    pub inflight_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 1000,
            retention_hours: 24,
            stale_after_secs: 15 * 60,
            prune_interval_secs: 60 * 60,
            inflight_ttl_secs: 30 * 60,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub max_attempts: u32,
    pub interval_secs: u64,
    pub transcript_delay_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 24,
            interval_secs: 10,
            transcript_delay_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `<data_dir>/minutehook/minutehook.db`.
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => global::db_file(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            config
        } else {
            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
            info!("Loaded config from {:?}", config_path);
            config
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Secrets and deployment settings from the environment win over the file.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets: [(&str, &mut String); 6] = [
            ("MINUTEHOOK_TENCENT_TOKEN", &mut self.tencent.token),
            ("MINUTEHOOK_TENCENT_AES_KEY", &mut self.tencent.encoding_aes_key),
            ("MINUTEHOOK_LARK_APP_SECRET", &mut self.lark.app_secret),
            ("MINUTEHOOK_LARK_ENCRYPT_KEY", &mut self.lark.encrypt_key),
            (
                "MINUTEHOOK_LARK_VERIFICATION_TOKEN",
                &mut self.lark.verification_token,
            ),
            ("MINUTEHOOK_BIND", &mut self.server.bind),
        ];
        for (name, target) in targets {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *target = value;
            }
        }

        if let Some(path) = lookup("MINUTEHOOK_DB_PATH").filter(|v| !v.is_empty()) {
            self.database.path = Some(path);
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
