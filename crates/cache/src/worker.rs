//! 后台刷新工作池
//!
//! 有界 mpsc 队列 + N 个常驻 worker 任务。请求路径用 try_submit
//! 投递刷新任务后立刻返回：队列满就丢弃任务（stale 值已经发出去了，
//! 丢一次刷新只是下个请求再触发），绝不反压到请求。
//! 任务自带错误处理，与请求生命周期完全解耦。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 投递给工作池的刷新任务
pub type RefreshJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 工作池参数
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// worker 任务数
    pub workers: usize,
    /// 队列容量，满了直接丢任务
    pub queue_depth: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 256,
        }
    }
}

/// 有界后台刷新工作池
pub struct RefreshWorkerPool {
    sender: Mutex<Option<mpsc::Sender<RefreshJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshWorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (tx, rx) = mpsc::channel::<RefreshJob>(config.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers.max(1) {
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    // 锁只为取任务，执行前释放，worker 之间互不阻塞
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                debug!(worker_id, "Refresh worker stopped");
            }));
        }

        info!(
            workers = config.workers.max(1),
            queue_depth = config.queue_depth.max(1),
            "Refresh worker pool started"
        );
        Self {
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        }
    }

    /// 非阻塞投递。队列满或池已关闭时返回 false，任务被丢弃
    pub fn try_submit(&self, job: RefreshJob) -> bool {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            warn!("Refresh job dropped, worker pool is shut down");
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Refresh job dropped, queue is full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Refresh job dropped, worker pool is shut down");
                false
            }
        }
    }

    /// 关闭队列并等待 worker 把已入队的任务跑完
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Refresh worker exited abnormally");
            }
        }
        info!("Refresh worker pool shut down");
    }
}
