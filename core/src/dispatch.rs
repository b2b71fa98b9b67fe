use super::model::ForwardTask;
use super::platform::Outbound;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// 发送任务池：即发即弃，失败只记日志，不重试
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<ForwardTask>,
    shared: Arc<Shared>,
}

struct Shared {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ForwardTask>>>,
    feeder: Mutex<Option<JoinHandle<()>>>,
    permits: Semaphore,
    /// 已接收但尚未发送完成的任务数，排队中的也算在内
    inflight: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn finish_one(&self) {
        if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl Dispatcher {
    pub fn new(worker_count: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            shared: Arc::new(Shared {
                receiver: Mutex::new(Some(receiver)),
                feeder: Mutex::new(None),
                permits: Semaphore::new(worker_count.max(1)),
                inflight: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 以 Outbound 作为处理器启动，每次发送受 request_timeout 限制
    pub fn start_outbound(&self, outbound: Arc<dyn Outbound>, request_timeout: Duration) {
        let receiver = self
            .shared
            .receiver
            .lock()
            .ok()
            .and_then(|mut receiver| receiver.take());
        let mut receiver = match receiver {
            Some(receiver) => receiver,
            None => {
                warn!("dispatcher 已启动，忽略重复启动");
                return;
            }
        };

        let shared = self.shared.clone();
        let feeder = tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let shared = shared.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    if let Ok(_permit) = shared.permits.acquire().await {
                        // 单独的 task 里发送，panic 只影响这一条
                        let sending = tokio::spawn(send_one(outbound, task, request_timeout));
                        if let Err(e) = sending.await {
                            if e.is_panic() {
                                error!("发送任务 panic，任务已丢弃: {}", panic_message(e.into_panic()));
                            } else {
                                error!("发送任务被取消: {}", e);
                            }
                        }
                    }
                    shared.finish_one();
                });
            }
        });

        if let Ok(mut slot) = self.shared.feeder.lock() {
            *slot = Some(feeder);
        }
    }

    pub fn dispatch(&self, task: ForwardTask) {
        if self.shared.closed.load(Ordering::Acquire) {
            warn!("dispatcher 已关闭，丢弃任务: dest={}", task.destination);
            return;
        }
        self.shared.inflight.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(task).is_err() {
            self.shared.finish_one();
            warn!("dispatcher 已停止，丢弃任务");
        }
    }

    pub fn inflight(&self) -> usize {
        self.shared.inflight.load(Ordering::Acquire)
    }

    /// 停止接收新任务，并在 timeout 内等待已接收的任务发送结束
    pub async fn shutdown_graceful(&self, timeout: Duration) -> bool {
        self.shared.closed.store(true, Ordering::Release);
        let drained = tokio::time::timeout(timeout, self.wait_idle()).await.is_ok();

        let feeder = self.shared.feeder.lock().ok().and_then(|mut slot| slot.take());
        if let Some(feeder) = feeder {
            feeder.abort();
        }
        drained
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.inflight() == 0 {
                break;
            }
            notified.await;
        }
    }
}

async fn send_one(outbound: Arc<dyn Outbound>, task: ForwardTask, request_timeout: Duration) {
    let destination = task.destination;
    let kind = task.kind();
    match tokio::time::timeout(request_timeout, outbound.send(task)).await {
        Ok(Ok(())) => debug!("发送完成: kind={} dest={}", kind, destination),
        Ok(Err(e)) => warn!("发送失败: kind={} dest={} error={:#}", kind, destination, e),
        Err(_) => warn!(
            "发送超时: kind={} dest={} timeout={:?}",
            kind, destination, request_timeout
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatId, ForwardPayload};
    use crate::platform::SendFuture;

    fn task(text: &str) -> ForwardTask {
        ForwardTask {
            source: ChatId(-1),
            destination: ChatId(-2),
            payload: ForwardPayload::Text {
                text: text.to_string(),
                entities: Vec::new(),
            },
        }
    }

    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    impl Outbound for Recorder {
        fn send(&self, task: ForwardTask) -> SendFuture {
            if let ForwardPayload::Text { text, .. } = &task.payload {
                if text == "boom" {
                    panic!("boom");
                }
                if text == "fail" {
                    return Box::pin(async { Err::<(), _>(anyhow::anyhow!("CHAT_WRITE_FORBIDDEN")) });
                }
                self.sent.lock().unwrap().push(text.clone());
            }
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_the_pool() {
        let recorder = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(2);
        dispatcher.start_outbound(recorder.clone(), Duration::from_secs(5));

        dispatcher.dispatch(task("boom"));
        dispatcher.dispatch(task("fail"));
        dispatcher.dispatch(task("ok"));

        assert!(dispatcher.shutdown_graceful(Duration::from_secs(5)).await);
        assert_eq!(*recorder.sent.lock().unwrap(), vec!["ok".to_string()]);

        dispatcher.dispatch(task("late"));
        assert_eq!(dispatcher.inflight(), 0);
    }

    #[tokio::test]
    async fn tasks_queued_before_start_count_as_inflight() {
        let recorder = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(1);
        dispatcher.dispatch(task("early"));
        assert_eq!(dispatcher.inflight(), 1);

        dispatcher.start_outbound(recorder.clone(), Duration::from_secs(5));
        assert!(dispatcher.shutdown_graceful(Duration::from_secs(5)).await);
        assert_eq!(*recorder.sent.lock().unwrap(), vec!["early".to_string()]);
    }
}
