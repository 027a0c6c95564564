//! Configuration management for chat-speaker-rs.
//!
//! Loads config from YAML files in standard locations, then applies
//! environment overrides for credentials and the summarizer URL.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub interval_secs: u64,
    pub delimiter: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            delimiter: "\n- ".into(),
        }
    }
}

impl BatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub host: String,
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:1919".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub artifact_path: PathBuf,
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    /// Broadcast to the overlay even when no voice connection exists.
    pub announce_without_voice: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("tts.wav"),
            poll_interval_ms: 100,
            poll_attempts: 20,
            announce_without_voice: true,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Host both overlay servers bind to.
    pub bind: String,
    pub ws_port: u16,
    pub http_port: u16,
    pub static_dir: PathBuf,
    pub capacity: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            ws_port: 8080,
            http_port: 3000,
            static_dir: PathBuf::from("public"),
            capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub username: String,
    pub token: String,
    pub channel: String,
    pub server: String,
    pub reconnect_secs: u64,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            token: String::new(),
            channel: String::new(),
            server: "wss://irc-ws.chat.twitch.tv:443".into(),
            reconnect_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub enabled: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batch: BatchConfig,
    pub summarizer: SummarizerConfig,
    pub playback: PlaybackConfig,
    pub overlay: OverlayConfig,
    pub twitch: TwitchConfig,
    pub voice: VoiceConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from YAML file, then apply environment overrides.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/chat-speaker/config.yaml
    /// 3. /etc/chat-speaker/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = Self::load_file(path);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_file(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/chat-speaker/config.yaml")),
                Some(PathBuf::from("/etc/chat-speaker/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    /// Credentials and endpoints may come from the environment instead of YAML.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("TWITCH_USERNAME") {
            self.twitch.username = v;
        }
        if let Some(v) = non_empty("TWITCH_TOKEN") {
            self.twitch.token = v;
        }
        if let Some(v) = non_empty("TWITCH_CHANNEL") {
            self.twitch.channel = v;
        }
        if let Some(v) = non_empty("SUMMARIZER_URL") {
            self.summarizer.host = v;
        }
    }
}
