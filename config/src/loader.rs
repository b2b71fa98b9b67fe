use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use super::paths::{project_root, resolve_path};
use super::validate::validate_config;
use std::env;
use tg_core::settings::PipelineSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api_id: i32,
    pub api_hash: String,

    #[serde(default = "default_session_name")]
    pub session_name: String,

    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default = "default_hotreload_interval")]
    pub hotreload_interval: u64,

    #[serde(default = "default_message_cache_size")]
    pub message_cache_size: usize,

    #[serde(default = "default_shutdown_drain_timeout")]
    pub shutdown_drain_timeout: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_max_lines")]
    pub log_max_lines: usize,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

fn default_session_name() -> String {
    "user_session".to_string()
}
fn default_rules_file() -> PathBuf {
    PathBuf::from("forwarding_rules.json")
}
fn default_worker_count() -> usize {
    3
}
fn default_request_timeout() -> u64 {
    30
}
fn default_hotreload_interval() -> u64 {
    2
}
fn default_message_cache_size() -> usize {
    2000
}
fn default_shutdown_drain_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_max_lines() -> usize {
    1000
}
fn default_log_file() -> PathBuf {
    PathBuf::from("log.txt")
}

/// 读取环境变量，缺失或解析失败时使用默认值
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// 读取 .env 与进程环境，只做加载不做校验
pub fn load_config_unchecked() -> Result<AppConfig> {
    let project_root = project_root();
    let env_path = project_root.join(".env");

    if env_path.exists() {
        dotenv::from_path(&env_path)?;
    }

    let api_id_str = env::var("TG_API_ID").unwrap_or_default().trim().to_string();
    let api_id = api_id_str.parse::<i32>().context("TG_API_ID 必须为整数")?;

    let api_hash = env::var("TG_API_HASH")
        .context("请设置 TG_API_HASH")?
        .trim()
        .to_string();

    let session_name = env::var("TG_SESSION_NAME").unwrap_or_else(|_| default_session_name());

    let rules_file_raw =
        env::var("TG_RULES_FILE").unwrap_or_else(|_| "forwarding_rules.json".to_string());
    let rules_file = resolve_path(rules_file_raw.trim(), "forwarding_rules.json");

    let defaults = PipelineSettings::default();
    let pipeline = PipelineSettings {
        min_msg_length: env_or("TG_MIN_MSG_LENGTH", defaults.min_msg_length),
        max_msg_length: env_or("TG_MAX_MSG_LENGTH", defaults.max_msg_length),
        deferral_timeout_ms: env_or("TG_DEFERRAL_TIMEOUT_MS", defaults.deferral_timeout_ms),
        album_timeout_ms: env_or("TG_ALBUM_TIMEOUT_MS", defaults.album_timeout_ms),
        deduplication_window_seconds: env_or(
            "TG_DEDUP_WINDOW_SECONDS",
            defaults.deduplication_window_seconds,
        ),
        antispam_delay_seconds: env_or(
            "TG_ANTISPAM_DELAY_SECONDS",
            defaults.antispam_delay_seconds,
        ),
    };
    tracing::info!(
        "已加载管道参数: album={}ms deferral={}ms dedup={}s antispam={}s",
        pipeline.album_timeout_ms,
        pipeline.deferral_timeout_ms,
        pipeline.deduplication_window_seconds,
        pipeline.antispam_delay_seconds
    );

    let worker_count = env_or("TG_WORKER_COUNT", default_worker_count());
    let request_timeout = env_or("TG_REQUEST_TIMEOUT", default_request_timeout());
    let hotreload_interval = env_or("TG_HOTRELOAD_INTERVAL", default_hotreload_interval());
    let message_cache_size = env_or("TG_MESSAGE_CACHE_SIZE", default_message_cache_size());
    let shutdown_drain_timeout =
        env_or("TG_SHUTDOWN_DRAIN_TIMEOUT", default_shutdown_drain_timeout());

    let log_level = env::var("TG_LOG_LEVEL")
        .unwrap_or_else(|_| default_log_level())
        .trim()
        .to_uppercase();
    let log_max_lines = env_or("TG_LOG_MAX_LINES", default_log_max_lines());
    let log_file_raw = env::var("TG_LOG_FILE").unwrap_or_else(|_| "log.txt".to_string());
    let log_file = resolve_path(log_file_raw.trim(), "log.txt");

    Ok(AppConfig {
        api_id,
        api_hash,
        session_name,
        rules_file,
        pipeline,
        worker_count,
        request_timeout,
        hotreload_interval,
        message_cache_size,
        shutdown_drain_timeout,
        log_level,
        log_max_lines,
        log_file,
    })
}

pub fn load_config() -> Result<AppConfig> {
    let config = load_config_unchecked()?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_garbage() {
        env::set_var("TG_TEST_ENV_OR_GARBAGE", "abc");
        assert_eq!(env_or("TG_TEST_ENV_OR_GARBAGE", 7usize), 7);
        env::set_var("TG_TEST_ENV_OR_NUMBER", " 12 ");
        assert_eq!(env_or("TG_TEST_ENV_OR_NUMBER", 7usize), 12);
        assert_eq!(env_or("TG_TEST_ENV_OR_MISSING", 1.5f64), 1.5);
    }
}
