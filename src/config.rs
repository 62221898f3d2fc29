use crate::cli::Cli;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::Path;
use tracing::Level;

const TRACE_LEVELS: [&'static str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

pub static SETTINGS: Lazy<Settings> = Lazy::new(|| Settings::new());

// Settings are a singleton generated at runtime. All settings may be
// configured via environment variables. Example:
// ANALYTICS_API_TOKEN="xxx" would set analytics_api_token to the xxx value.
#[derive(Deserialize, Debug)]
pub struct Settings {
    #[serde(default = "default_trace_level")]
    trace_level: String,
    #[serde(default = "default_analytics_base_url")]
    pub analytics_base_url: String,
    pub analytics_api_token: String,
    // Staleness threshold before a read triggers a background refresh
    #[serde(default = "default_fresh_window_seconds")]
    pub fresh_window_seconds: u64,
    // Absolute expiry after which an entry is a miss rather than a stale hit
    #[serde(default = "default_cache_entry_ttl_seconds")]
    pub cache_entry_ttl_seconds: u64,
    #[serde(default = "default_source_compute_timeout_millis")]
    pub source_compute_timeout_millis: u64,
    // Six-field cron expression driving the periodic re-warm of all boards
    #[serde(default = "default_warm_refresh_schedule")]
    pub warm_refresh_schedule: String,
    // Whether to precompute every leaderboard combination at startup
    #[serde(default = "default_warm_on_start")]
    pub warm_on_start: bool,
}

impl Settings {
    pub fn new() -> Self {
        let local_settings_yaml_file = ".env.local.yaml";
        let settings: Settings = match Path::new(local_settings_yaml_file).exists() {
            true => {
                println!(
                    "\n######################################\n\
                       ##   Found '.env.local.yaml' file,  ##\n\
                       ##   loading local configuration.   ##\n\
                       ######################################\n\
                    "
                );
                Figment::new()
                    .merge(Yaml::file(local_settings_yaml_file))
                    .merge(Env::raw())
                    .merge(Serialized::defaults(Cli::parse()))
                    .extract()
                    .unwrap()
            }
            false => Figment::new()
                .merge(Env::raw())
                .merge(Serialized::defaults(Cli::parse()))
                .extract()
                .unwrap(),
        };

        settings
    }

    pub fn get_trace_level(&self) -> Level {
        get_trace_level(&self.trace_level)
    }
}

fn get_trace_level(level_str: &str) -> Level {
    match level_str {
        level if level == TRACE_LEVELS[0] => Level::TRACE,
        level if level == TRACE_LEVELS[1] => Level::DEBUG,
        level if level == TRACE_LEVELS[2] => Level::INFO,
        level if level == TRACE_LEVELS[3] => Level::WARN,
        level if level == TRACE_LEVELS[4] => Level::ERROR,
        // Default trace level
        _ => Level::INFO,
    }
}

fn default_trace_level() -> String {
    "INFO".to_string()
}

fn default_analytics_base_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_fresh_window_seconds() -> u64 {
    300
}

fn default_cache_entry_ttl_seconds() -> u64 {
    3600
}

fn default_source_compute_timeout_millis() -> u64 {
    2000
}

fn default_warm_refresh_schedule() -> String {
    // At every 5th minute, offset by one to avoid the top of the minute.
    "0 1/5 * * * *".to_string()
}

fn default_warm_on_start() -> bool {
    false
}
