use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 一次性定时任务的句柄；取消可重复调用
#[derive(Debug)]
pub struct TimerHandle {
    handle: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// delay 后执行 fire
    pub fn schedule<F>(delay: Duration, fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });
        Self {
            handle: Some(handle),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
