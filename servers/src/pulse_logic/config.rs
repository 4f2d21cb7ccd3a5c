use clap::Parser;
use lib_pulse::configs::Settings;
use lib_pulse::ingestors::StreamConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "server_pulse.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Heart-rate stream relay server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PULSE_HOST", help = "Address to bind the HTTP/WebSocket server to.")]
    pub host: Option<String>,

    #[clap(long, env = "PULSE_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "PULSE_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "PULSE_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "PULSE_LOG_LEVEL", help = "Logging level (debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "PULSOID_ENDPOINT", help = "Realtime endpoint template; {token} is replaced by the access token.")]
    pub endpoint_template: Option<String>,

    #[clap(long, env = "PULSOID_TOKEN", hide_env_values = true, help = "Access token for the realtime endpoint.")]
    pub access_token: Option<String>,

    #[clap(long, env = "PULSE_STREAMING_ENABLED", help = "Connect to the realtime endpoint on startup.")]
    pub streaming_enabled: Option<bool>,

    #[clap(long, env = "PULSE_ACTIVITY_ENABLED", help = "Publish the heart rate as Discord activity.")]
    pub activity_enabled: Option<bool>,

    #[clap(long, env = "PULSE_ACTIVITY_CLIENT_ID", help = "Discord application id used for the activity.")]
    pub activity_client_id: Option<String>,

    #[clap(long, env = "PULSE_MIN_ACTIVITY_INTERVAL_MS", help = "Minimum milliseconds between two activity updates (at least 1000).")]
    pub min_activity_interval_ms: Option<u64>,

    #[clap(long, env = "PULSE_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for upstream reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "PULSE_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for upstream reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "PULSE_CONNECT_TIMEOUT_MS", help = "Timeout in milliseconds for a single upstream connection attempt.")]
    pub connect_timeout_ms: Option<u64>,
}

/// Where the file layer of the configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Missing(PathBuf),
    Invalid(PathBuf, String),
}

impl Config {
    pub fn defaults() -> Config {
        let settings = Settings::default();
        let stream = StreamConfig::default();
        Config {
            host: Some("127.0.0.1".to_string()),
            port: Some(9003),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            endpoint_template: Some(settings.endpoint_template),
            streaming_enabled: Some(settings.streaming_enabled),
            activity_enabled: Some(settings.activity_enabled),
            activity_client_id: Some(settings.activity_client_id),
            min_activity_interval_ms: Some(settings.min_activity_interval_ms),
            reconnect_base_delay_ms: Some(stream.backoff_floor.as_millis() as u64),
            reconnect_max_delay_ms: Some(stream.backoff_cap.as_millis() as u64),
            connect_timeout_ms: Some(stream.connect_timeout.as_millis() as u64),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            endpoint_template: other.endpoint_template.or(self.endpoint_template),
            access_token: other.access_token.or(self.access_token),
            streaming_enabled: other.streaming_enabled.or(self.streaming_enabled),
            activity_enabled: other.activity_enabled.or(self.activity_enabled),
            activity_client_id: other.activity_client_id.or(self.activity_client_id),
            min_activity_interval_ms: other.min_activity_interval_ms.or(self.min_activity_interval_ms),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
        }
    }

    pub fn bind_address(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or("127.0.0.1"),
            self.port.unwrap_or(9003)
        )
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Initial runtime settings; unset keys keep their library defaults.
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            streaming_enabled: self.streaming_enabled.unwrap_or(defaults.streaming_enabled),
            activity_enabled: self.activity_enabled.unwrap_or(defaults.activity_enabled),
            access_token: self.access_token.clone().unwrap_or(defaults.access_token),
            min_activity_interval_ms: self.min_activity_interval_ms.unwrap_or(defaults.min_activity_interval_ms),
            activity_client_id: self.activity_client_id.clone().unwrap_or(defaults.activity_client_id),
            endpoint_template: self.endpoint_template.clone().unwrap_or(defaults.endpoint_template),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        let defaults = StreamConfig::default();
        StreamConfig {
            backoff_floor: self.reconnect_base_delay_ms.map(Duration::from_millis).unwrap_or(defaults.backoff_floor),
            backoff_cap: self.reconnect_max_delay_ms.map(Duration::from_millis).unwrap_or(defaults.backoff_cap),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.connect_timeout),
        }
    }
}

/// # Load Config
///
/// 1. Built-in defaults.
/// 2. The JSON config file (`--config-path`, else `server_pulse.conf` in the
///    working directory, else the user config directory).
/// 3. Environment variables and CLI arguments.
pub fn load_config() -> (Config, ConfigOrigin) {
    load_config_with(Config::parse())
}

pub fn load_config_with(cli: Config) -> (Config, ConfigOrigin) {
    let config_file_path = cli.config_path.clone().unwrap_or_else(default_config_path);

    let mut current_config = Config::defaults();
    let origin = match read_config_file(&config_file_path) {
        Ok(Some(file_config)) => {
            current_config = current_config.merge(file_config);
            ConfigOrigin::File(config_file_path)
        }
        Ok(None) => ConfigOrigin::Missing(config_file_path),
        Err(reason) => ConfigOrigin::Invalid(config_file_path, reason),
    };

    (current_config.merge(cli), origin)
}

fn read_config_file(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str::<Config>(&config_str)
        .map(Some)
        .map_err(|e| e.to_string())
}

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("server_pulse").join(CONFIG_FILE_NAME))
        .unwrap_or(local)
}
