use std::fs::OpenOptions;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub type LogGuard = WorkerGuard;

/// grammers 内部日志量很大，固定到较高级别
const NOISY_TARGETS: &[(&str, &str)] = &[
    ("grammers_mtsender", "warn"),
    ("grammers_mtproto", "info"),
    ("grammers_session", "warn"),
    ("grammers_client", "warn"),
];

fn ensure_log_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn filter_directives(level: &str) -> String {
    let mut directives = vec![level.trim().to_lowercase()];
    directives.extend(
        NOISY_TARGETS
            .iter()
            .map(|(target, level)| format!("{}={}", target, level)),
    );
    directives.join(",")
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(filter_directives(level))
            .unwrap_or_else(|_| EnvFilter::new(filter_directives("info")))
    })
}

/// 安装全局日志：终端输出 + 非阻塞文件输出。重复调用返回同一个 guard
pub fn init(log_file: &Path, level: &str) -> &'static WorkerGuard {
    LOG_GUARD.get_or_init(|| {
        ensure_log_dir(log_file).expect("无法创建日志目录");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .expect("无法创建日志文件");
        let (non_blocking, guard) = tracing_appender::non_blocking(file);

        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .init();

        guard
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_pin_grammers_targets() {
        let directives = filter_directives("INFO");
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("grammers_session=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
