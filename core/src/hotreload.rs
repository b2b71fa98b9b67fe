use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

type HotReloadCallback = Arc<dyn Fn(&Path) -> anyhow::Result<()> + Send + Sync>;
type HotReloadEntry = (SystemTime, HotReloadCallback);
type HotReloadFiles = HashMap<PathBuf, HotReloadEntry>;

/// 轮询文件修改时间，变化时调用回调
#[derive(Clone)]
pub struct HotReloadManager {
    files: Arc<RwLock<HotReloadFiles>>,
}

impl HotReloadManager {
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register<F>(&self, path: impl AsRef<Path>, callback: F)
    where
        F: Fn(&Path) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let mtime = Self::get_mtime(&path).unwrap_or(UNIX_EPOCH);
        let mut files = self.files.write().await;
        files.insert(path, (mtime, Arc::new(callback)));
    }

    /// 返回本轮成功重新加载的文件数；每个修改时间只尝试一次，失败要等文件再次变化
    pub async fn check_and_reload(&self) -> usize {
        let mut files = self.files.write().await;

        let mut reloaded = 0;
        for (path, (last_mtime, callback)) in files.iter_mut() {
            let current_mtime = match Self::get_mtime(path) {
                Ok(mtime) if mtime != *last_mtime => mtime,
                _ => continue,
            };
            *last_mtime = current_mtime;

            match (**callback)(path) {
                Ok(()) => {
                    reloaded += 1;
                    tracing::info!("检测到文件变更，已重新加载: {:?}", path);
                }
                Err(e) => {
                    tracing::warn!("重新加载文件失败，等待下次修改: {:?} error: {:#}", path, e);
                }
            }
        }
        reloaded
    }

    /// 后台按固定间隔轮询
    pub fn spawn(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.check_and_reload().await;
            }
        })
    }

    fn get_mtime(path: &Path) -> anyhow::Result<SystemTime> {
        let metadata = std::fs::metadata(path)?;
        Ok(metadata.modified()?)
    }
}

impl Default for HotReloadManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn reloads_only_after_mtime_changes() {
        let path = std::env::temp_dir().join(format!("hotreload_test_{}.json", std::process::id()));
        std::fs::write(&path, "{}").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let manager = HotReloadManager::new();
        manager
            .register(&path, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(manager.check_and_reload().await, 0);

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        assert_eq!(manager.check_and_reload().await, 1);
        assert_eq!(manager.check_and_reload().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failed_reload_waits_for_the_next_edit() {
        let path = std::env::temp_dir().join(format!("hotreload_fail_{}.json", std::process::id()));
        std::fs::write(&path, "{").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let manager = HotReloadManager::new();
        manager
            .register(&path, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("malformed")
            })
            .await;

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        assert_eq!(manager.check_and_reload().await, 0);
        assert_eq!(manager.check_and_reload().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();
        assert_eq!(manager.check_and_reload().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let _ = std::fs::remove_file(&path);
    }
}
