use std::time::Duration;

/// 秒数转换为 Duration，负数与非有限值按 0 处理
pub fn secs_to_duration(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs)
}

pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
