use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ws::session::SessionConfig;

/// Command-line flags. Only flags the user actually passed are serialized,
/// so unset ones never shadow the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "realty-chat-server", version, about = "Real-time chat server")]
pub struct Cli {
    /// Port to listen on [default: 8088]
    #[arg(long, env = "REALTY_CHAT_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "REALTY_CHAT_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./realty-chat.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "REALTY_CHAT_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT secret) [default: ./data]
    #[arg(long, env = "REALTY_CHAT_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Effective server settings after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,

    /// Chat tuning ([chat] section in TOML, `REALTY_CHAT_CHAT__*` in env)
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Tuning knobs for sessions, the delivery sweep and chat queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    /// Pending events buffered per session before new ones are dropped (default: 256)
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Seconds after creation during which the sender may edit (default: 900)
    #[serde(default = "default_edit_window_secs")]
    pub edit_window_secs: u64,

    /// Maximum search results returned (default: 50)
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,

    /// Page size when the client sends none (default: 50)
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound on requested page size (default: 100)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Maximum message length in characters (default: 4000)
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Delivery sweeps allowed to run at once (default: 4)
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Pending delivery sweeps before new ones are dropped (default: 1024)
    #[serde(default = "default_sweep_queue_capacity")]
    pub sweep_queue_capacity: usize,

    /// Server ping interval in seconds (default: 30)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Close sessions silent for this many seconds (default: 90)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            edit_window_secs: default_edit_window_secs(),
            search_limit: default_search_limit(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            max_content_length: default_max_content_length(),
            sweep_concurrency: default_sweep_concurrency(),
            sweep_queue_capacity: default_sweep_queue_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ChatConfig {
    pub fn edit_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.edit_window_secs as i64)
    }

    pub fn session(&self) -> SessionConfig {
        let ping_interval = Duration::from_secs(self.ping_interval_secs.max(1));
        // Idle timeout must leave room for at least one ping/pong round trip
        let idle_timeout =
            Duration::from_secs(self.idle_timeout_secs).max(ping_interval * 2);
        SessionConfig {
            ping_interval,
            idle_timeout,
        }
    }
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_edit_window_secs() -> u64 {
    900
}

fn default_search_limit() -> u32 {
    50
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    100
}

fn default_max_content_length() -> usize {
    4000
}

fn default_sweep_concurrency() -> usize {
    4
}

fn default_sweep_queue_capacity() -> usize {
    1024
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8088,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            chat: ChatConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (REALTY_CHAT_*) < CLI args
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("REALTY_CHAT_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Realty chat server configuration
# Place this file at ./realty-chat.toml or specify with --config <path>
# All settings can be overridden via environment variables (REALTY_CHAT_PORT,
# REALTY_CHAT_CHAT__SEARCH_LIMIT, etc.) or CLI flags (--port, etc.)

# Server port (default: 8088)
# port = 8088

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# ---- Chat ----
# [chat]

# Pending events buffered per live session; overflow is dropped for that session
# outbound_queue_capacity = 256

# Seconds after sending during which a message may be edited
# edit_window_secs = 900

# Search and pagination limits
# search_limit = 50
# default_page_size = 50
# max_page_size = 100
# max_content_length = 4000

# Background delivery sweeps (sent -> delivered)
# sweep_concurrency = 4
# sweep_queue_capacity = 1024

# Session heartbeat
# ping_interval_secs = 30
# idle_timeout_secs = 90
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let parsed: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(parsed.port, 8088);
        assert_eq!(parsed.chat, ChatConfig::default());
    }

    #[test]
    fn test_chat_section_overrides() {
        let parsed: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string("[chat]\nedit_window_secs = 60\nsearch_limit = 10\n"))
            .extract()
            .unwrap();
        let chat = parsed.chat;
        assert_eq!(chat.edit_window_secs, 60);
        assert_eq!(chat.search_limit, 10);
        assert_eq!(chat.outbound_queue_capacity, 256);
    }

    fn write_toml(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_toml_file_survives_cli_layer() {
        let file = write_toml("port = 9999\ndata_dir = \"/srv/chat\"\n\n[chat]\nedit_window_secs = 60\n");
        let path = file.path().to_str().unwrap();
        let cli = Cli::try_parse_from(["realty-chat-server", "--config", path]).unwrap();

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.data_dir, "/srv/chat");
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.chat.edit_window_secs, 60);
        assert_eq!(config.chat.search_limit, 50);
    }

    #[test]
    fn test_cli_flag_beats_toml_file() {
        let file = write_toml("port = 9999\n\n[chat]\nsearch_limit = 5\n");
        let path = file.path().to_str().unwrap();
        let cli = Cli::try_parse_from(["realty-chat-server", "--config", path, "--port", "7000"])
            .unwrap();

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.chat.search_limit, 5);
    }

    #[test]
    fn test_idle_timeout_never_below_two_pings() {
        let chat = ChatConfig {
            ping_interval_secs: 30,
            idle_timeout_secs: 10,
            ..ChatConfig::default()
        };
        let session = chat.session();
        assert_eq!(session.idle_timeout, Duration::from_secs(60));
    }
}
