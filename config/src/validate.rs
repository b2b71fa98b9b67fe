use super::AppConfig;
use anyhow::Result;

pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.api_id <= 0 {
        anyhow::bail!("TG_API_ID 必须为正整数");
    }

    if config.api_hash.is_empty() {
        anyhow::bail!("TG_API_HASH 不能为空");
    }

    if config.session_name.trim().is_empty() {
        anyhow::bail!("TG_SESSION_NAME 不能为空");
    }

    if config.rules_file.as_os_str().is_empty() {
        anyhow::bail!("TG_RULES_FILE 不能为空");
    }

    let pipeline = &config.pipeline;
    if pipeline.min_msg_length > pipeline.max_msg_length {
        anyhow::bail!(
            "TG_MIN_MSG_LENGTH ({}) 不能大于 TG_MAX_MSG_LENGTH ({})",
            pipeline.min_msg_length,
            pipeline.max_msg_length
        );
    }
    if pipeline.deferral_timeout_ms == 0 {
        anyhow::bail!("TG_DEFERRAL_TIMEOUT_MS 必须大于 0");
    }
    if pipeline.album_timeout_ms == 0 {
        anyhow::bail!("TG_ALBUM_TIMEOUT_MS 必须大于 0");
    }
    if !pipeline.deduplication_window_seconds.is_finite()
        || pipeline.deduplication_window_seconds <= 0.0
    {
        anyhow::bail!("TG_DEDUP_WINDOW_SECONDS 必须大于 0");
    }
    if !pipeline.antispam_delay_seconds.is_finite() || pipeline.antispam_delay_seconds < 0.0 {
        anyhow::bail!("TG_ANTISPAM_DELAY_SECONDS 不能为负数");
    }

    if config.worker_count == 0 {
        anyhow::bail!("TG_WORKER_COUNT 必须大于 0");
    }
    if config.request_timeout == 0 {
        anyhow::bail!("TG_REQUEST_TIMEOUT 必须大于 0");
    }
    if config.hotreload_interval == 0 {
        anyhow::bail!("TG_HOTRELOAD_INTERVAL 必须大于 0");
    }
    if config.message_cache_size == 0 {
        anyhow::bail!("TG_MESSAGE_CACHE_SIZE 必须大于 0");
    }
    if config.shutdown_drain_timeout == 0 {
        anyhow::bail!("TG_SHUTDOWN_DRAIN_TIMEOUT 必须大于 0");
    }

    if !matches!(
        config.log_level.as_str(),
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR"
    ) {
        anyhow::bail!("TG_LOG_LEVEL 必须为 TRACE/DEBUG/INFO/WARN/ERROR 之一");
    }

    Ok(())
}
