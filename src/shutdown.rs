use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 所有长时间运行的循环（生产者调度、Worker轮询、HTTP服务）各自订阅一个接收器，
/// 触发后各循环在当前工作完成后退出。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号；已触发后订阅的接收器会立即收到信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_triggered() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.sender.subscribe()
    }

    /// 触发关闭，重复调用无副作用
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭信号已经发送过");
            return;
        }

        let receivers = self.sender.receiver_count();
        // 没有订阅者时发送失败，可以忽略
        let _ = self.sender.send(());
        info!("关闭信号已发送给 {} 个订阅者", receivers);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// 触发关闭并在超时内等待任务结束，返回是否按时结束
    pub async fn shutdown_and_wait(&self, handle: JoinHandle<()>, limit: Duration) -> bool {
        self.trigger();

        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("关闭过程中任务异常退出: {}", e);
                true
            }
            Err(_) => {
                warn!("等待关闭超时（{:?}），强制退出", limit);
                false
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
