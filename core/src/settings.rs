use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 管道运行参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_min_msg_length")]
    pub min_msg_length: usize,
    #[serde(default = "default_max_msg_length")]
    pub max_msg_length: usize,
    #[serde(default = "default_deferral_timeout_ms")]
    pub deferral_timeout_ms: u64,
    #[serde(default = "default_album_timeout_ms")]
    pub album_timeout_ms: u64,
    #[serde(default = "default_deduplication_window_seconds")]
    pub deduplication_window_seconds: f64,
    #[serde(default = "default_antispam_delay_seconds")]
    pub antispam_delay_seconds: f64,
}

fn default_min_msg_length() -> usize {
    1
}
fn default_max_msg_length() -> usize {
    4096
}
fn default_deferral_timeout_ms() -> u64 {
    5000
}
fn default_album_timeout_ms() -> u64 {
    800
}
fn default_deduplication_window_seconds() -> f64 {
    10.0
}
fn default_antispam_delay_seconds() -> f64 {
    1.0
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_msg_length: default_min_msg_length(),
            max_msg_length: default_max_msg_length(),
            deferral_timeout_ms: default_deferral_timeout_ms(),
            album_timeout_ms: default_album_timeout_ms(),
            deduplication_window_seconds: default_deduplication_window_seconds(),
            antispam_delay_seconds: default_antispam_delay_seconds(),
        }
    }
}

impl PipelineSettings {
    pub fn album_timeout(&self) -> Duration {
        common::millis_to_duration(self.album_timeout_ms)
    }

    pub fn deferral_timeout(&self) -> Duration {
        common::millis_to_duration(self.deferral_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        common::secs_to_duration(self.deduplication_window_seconds)
    }

    pub fn antispam_delay(&self) -> Duration {
        common::secs_to_duration(self.antispam_delay_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let settings: PipelineSettings =
            serde_json::from_str(r#"{"album_timeout_ms": 300}"#).unwrap();
        assert_eq!(settings.album_timeout(), Duration::from_millis(300));
        assert_eq!(settings.deferral_timeout(), Duration::from_millis(5000));
        assert_eq!(settings.dedup_window(), Duration::from_secs(10));
        assert_eq!(settings.min_msg_length, 1);
        assert_eq!(settings.max_msg_length, 4096);
    }
}
