use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub streaming: StreamingConfig,
    pub auto_record: AutoRecordConfig,
    pub transcription: TranscriptionConfig,
    pub notes: NotesConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sample rate requested from the input device.
    pub sample_rate: u32,
    /// Maximum buffers allowed in flight to observers before new buffers
    /// are dropped.
    pub max_pending_buffers: u64,
    /// Every one of the first `log_burst` buffers is logged.
    pub log_burst: u32,
    /// After the burst, every `log_stride`-th buffer is logged.
    pub log_stride: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            max_pending_buffers: 32,
            log_burst: 5,
            log_stride: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Seconds without a token update before an active stream counts as stalled.
    pub stall_threshold_seconds: u64,
    /// Seconds to wait for the very first token before declaring a stall.
    pub first_token_grace_seconds: u64,
    /// Monitor poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Hard bound on total monitoring time; past this the monitor stops.
    pub max_monitor_seconds: u64,
    /// Base delay for the health retry backoff.
    pub retry_base_seconds: u64,
    /// How much captured audio accumulates before a live transcription pass.
    pub live_chunk_seconds: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            stall_threshold_seconds: 8,
            first_token_grace_seconds: 30,
            poll_interval_ms: 1000,
            max_monitor_seconds: 4 * 3600,
            retry_base_seconds: 5,
            live_chunk_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRecordConfig {
    /// Grace period before a lost detection actually stops the recording,
    /// to absorb transient focus changes.
    pub stop_grace_seconds: u64,
    /// Hard ceiling on one auto recording.
    pub max_duration_seconds: u64,
    /// Slack added to the ceiling before a stop is forced.
    pub duration_buffer_seconds: u64,
    /// Interval for polling the manager's status.
    pub status_poll_ms: u64,
}

impl Default for AutoRecordConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: 8,
            max_duration_seconds: 3 * 3600,
            duration_buffer_seconds: 60,
            status_poll_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Base URL of the transcription jobs API.
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub language: Option<String>,
    /// Maximum time to wait for a transcription job.
    pub job_timeout_seconds: u64,
    /// Maximum time to wait for model warmup.
    pub warmup_timeout_seconds: u64,
    /// Cooldown after a failed warmup before another attempt is allowed.
    pub warmup_cooldown_seconds: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            api_key: None,
            language: Some("en".to_string()),
            job_timeout_seconds: 3600,
            warmup_timeout_seconds: 30,
            warmup_cooldown_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Base delay for the notes retry backoff.
    pub retry_base_seconds: u64,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            retry_base_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3838 }
    }
}

impl StreamingConfig {
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_seconds)
    }

    pub fn first_token_grace(&self) -> Duration {
        Duration::from_secs(self.first_token_grace_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_monitor_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_monitor_seconds)
    }

    pub fn live_chunk_interval(&self) -> Duration {
        Duration::from_secs(self.live_chunk_seconds)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_seconds)
    }
}

impl AutoRecordConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn hard_ceiling(&self) -> Duration {
        Duration::from_secs(self.max_duration_seconds + self.duration_buffer_seconds)
    }

    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
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
