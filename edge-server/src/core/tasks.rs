//! 后台任务管理
//!
//! 调度 worker、温度监控、效期巡检都在这里注册, 统一关闭。
//!
//! # 任务类型
//!
//! - [`TaskKind::Worker`] - 调度 worker (每个 worker 一次处理一个订单)
//! - [`TaskKind::Listener`] - 传感器数据流消费者
//! - [`TaskKind::Periodic`] - 定时任务 (效期巡检)

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Worker,
    Listener,
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Listener => write!(f, "Listener"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

/// 关闭时等待单个任务的上限; worker 可能正在等待货架应答
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct RegisteredTask {
    name: String,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// 运行任务并记录其结束方式
async fn supervise<F>(name: String, kind: TaskKind, shutdown: CancellationToken, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(()) if shutdown.is_cancelled() => {}
        Ok(()) => tracing::warn!(task = %name, %kind, "Background task exited before shutdown"),
        Err(payload) => tracing::error!(
            task = %name,
            %kind,
            panic = %panic_message(payload.as_ref()),
            "Background task panicked"
        ),
    }
}

/// 后台任务管理器
///
/// ```ignore
/// let mut tasks = BackgroundTasks::new();
/// let token = tasks.shutdown_token();
/// tasks.spawn("expiry_scanner", TaskKind::Periodic, scanner.run(interval, token));
/// tasks.shutdown().await;
/// ```
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 取消令牌 (任务内部监听 shutdown 信号)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 注册并启动一个后台任务, panic 被捕获并记录
    pub fn spawn<F>(&mut self, name: impl Into<String>, kind: TaskKind, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(supervise(name.clone(), kind, self.shutdown.clone(), future));
        tracing::debug!(task = %name, %kind, "Background task spawned");
        self.tasks.push(RegisteredTask { name, kind, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count(&self, kind: TaskKind) -> usize {
        self.tasks.iter().filter(|t| t.kind == kind).count()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            total = self.tasks.len(),
            workers = self.count(TaskKind::Worker),
            listeners = self.count(TaskKind::Listener),
            periodic = self.count(TaskKind::Periodic),
            "Background tasks running"
        );
    }

    /// 已经结束的任务名 (运行期间任何任务都不应结束)
    pub fn finished(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.handle.is_finished())
            .map(|t| t.name.as_str())
            .collect()
    }

    /// 返回异常终止的任务数量
    pub fn check_health(&self) -> usize {
        let finished = self.finished();
        if !finished.is_empty() {
            tracing::error!(tasks = ?finished, "Background tasks stopped unexpectedly");
        }
        finished.len()
    }

    /// 发送取消信号, 逐个等待任务结束; 超过宽限期的任务被 abort
    pub async fn shutdown(self) {
        tracing::info!(count = self.tasks.len(), "Stopping background tasks");
        self.shutdown.cancel();

        for RegisteredTask { name, mut handle, .. } in self.tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = %name, "Task stopped"),
                Ok(Err(e)) => tracing::error!(task = %name, error = ?e, "Task join failed"),
                Err(_) => {
                    tracing::warn!(task = %name, "Task ignored shutdown, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
