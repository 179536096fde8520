use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::app::order_notifier::NotifierOptions;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: AppMode,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    /// Channel the order feed listens on. The `notify_order_change` trigger
    /// publishes to the database setting `ovenbell.orders_channel` (default
    /// `order_changes`); the two must match or no order changes arrive.
    pub orders_channel: String,
    pub feed_buffer_size: usize,
    pub alert_duration_ms: u64,
    pub alert_sound: bool,
    pub alert_stream_capacity: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppMode {
    /// Admin HTTP surface plus the notifier feeding dashboard streams.
    Api,
    /// Notifier only, alerts go to the log.
    Listener,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "api" => Ok(Self::Api),
            "listener" => Ok(Self::Listener),
            other => Err(anyhow!("unknown APP_MODE: {}", other)),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let orders_channel = env_or("ORDERS_CHANNEL", "order_changes");
        if !is_channel_name(&orders_channel) {
            return Err(anyhow!(
                "invalid ORDERS_CHANNEL: expected lowercase letters, digits and underscores"
            ));
        }

        let feed_buffer_size: usize = env_or_parse("FEED_BUFFER_SIZE", "256")?;
        if feed_buffer_size == 0 {
            return Err(anyhow!("invalid FEED_BUFFER_SIZE: must be greater than 0"));
        }

        Ok(Self {
            http_addr,
            app_mode: env_or_parse("APP_MODE", "api")?,
            database_url: env_or_err("DATABASE_URL")?,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "10")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            orders_channel,
            feed_buffer_size,
            alert_duration_ms: env_or_parse("ALERT_DURATION_MS", "5000")?,
            alert_sound: env_or_parse("ALERT_SOUND", "true")?,
            alert_stream_capacity: env_or_parse("ALERT_STREAM_CAPACITY", "64")?,
        })
    }

    pub fn notifier_options(&self) -> NotifierOptions {
        NotifierOptions {
            alert_duration: Duration::from_millis(self.alert_duration_ms),
            play_sound: self.alert_sound,
        }
    }
}

fn is_channel_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
