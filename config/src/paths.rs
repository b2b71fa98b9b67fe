use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static PROJECT_ROOT: OnceLock<PathBuf> = OnceLock::new();

fn detect_project_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn project_root() -> PathBuf {
    PROJECT_ROOT.get_or_init(detect_project_root).clone()
}

/// 相对路径按项目根目录解析，空串使用默认文件名
pub fn resolve_path(raw: &str, default: &str) -> PathBuf {
    resolve_against(&project_root(), raw, default)
}

fn resolve_against(base: &Path, raw: &str, default: &str) -> PathBuf {
    if raw.is_empty() {
        return base.join(default);
    }

    let path = PathBuf::from(raw);
    if path.is_absolute() {
        return path;
    }

    base.join(path)
}
