// src/task/manager.rs

use super::{Task, TaskKind, TaskState};
use crate::{config, config::AppConfig, error::AppError, error::AppResult};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

/// 单条调度通道：有界信号量 + 票号队列。
/// 票号在提交时领取（同步），运行器先等到自己的票号再去拿许可，
/// 通道内的派发顺序因此严格等于提交顺序，不依赖运行时的唤醒顺序。
struct Lane {
    gate: Semaphore,
    next_ticket: AtomicU64,
    serving: AtomicU64,
    turn: Notify,
}

impl Lane {
    fn new(bound: usize) -> Self {
        Self {
            gate: Semaphore::new(bound),
            next_ticket: AtomicU64::new(0),
            serving: AtomicU64::new(0),
            turn: Notify::new(),
        }
    }

    fn take_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    async fn wait_turn(&self, ticket: u64) {
        loop {
            let notified = self.turn.notified();
            if self.serving.load(Ordering::Acquire) >= ticket {
                return;
            }
            notified.await;
        }
    }

    /// 放行下一个票号。许可获取成败都必须调用一次，否则通道停摆。
    fn advance(&self) {
        self.serving.fetch_add(1, Ordering::Release);
        self.turn.notify_waiters();
    }
}

struct ManagerInner {
    // 排队/运行中任务的簿记；任务终结并回调后移除
    tasks: DashMap<u64, Task>,
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
    main_lane: Lane,
    background_lane: Lane,
    unnamed_lane: Lane,
    accepting: AtomicBool,
    idle_notify: Notify,
    shutdown_grace: Duration,
}

impl ManagerInner {
    fn lane(&self, kind: TaskKind) -> &Lane {
        match kind {
            TaskKind::Main => &self.main_lane,
            TaskKind::Background => &self.background_lane,
            TaskKind::Unnamed => &self.unnamed_lane,
        }
    }
}

/// 进程级任务调度器：三条调度通道 + 停机协议。
///
/// - Main 通道上限为 1，重量级库操作由此获得互斥；
/// - Background / Unnamed 通道按配置有界，用于 I/O 密集工作；
/// - 通道内按提交顺序 FIFO（票号队列保证）。
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                tasks: DashMap::new(),
                handles: Mutex::new(HashMap::new()),
                main_lane: Lane::new(config::MAIN_POOL_BOUND),
                background_lane: Lane::new(config.background_workers.max(1)),
                unnamed_lane: Lane::new(config.unnamed_workers.max(1)),
                accepting: AtomicBool::new(true),
                idle_notify: Notify::new(),
                shutdown_grace: config.shutdown_grace,
            }),
        }
    }

    /// 提交重量级互斥任务（库扫描、批量更新）。
    pub fn add_main_task<F, Fut>(&self, description: impl Into<String>, work: F) -> Task
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.add_task(TaskKind::Main, description, work)
    }

    /// 提交有名后台任务（下载、取图、取元数据）。
    pub fn add_background_task<F, Fut>(&self, description: impl Into<String>, work: F) -> Task
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.add_task(TaskKind::Background, description, work)
    }

    /// 提交即发即忘任务。
    pub fn add_unnamed_task<F, Fut>(&self, work: F) -> Task
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.add_task(TaskKind::Unnamed, "unnamed", work)
    }

    fn add_task<F, Fut>(&self, kind: TaskKind, description: impl Into<String>, work: F) -> Task
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let task = Task::new(kind, description);

        if !self.inner.accepting.load(Ordering::Relaxed) {
            warn!("调度器已停止接收，任务 '{}' 被拒绝。", task.description());
            task.request_cancel();
            return task;
        }

        task.transition(TaskState::Queued);
        self.inner.tasks.insert(task.id(), task.clone());

        // 票号在提交时领取，通道内的派发顺序由此定死
        let ticket = self.inner.lane(kind).take_ticket();
        let inner = self.inner.clone();
        let runner = task.clone();

        let handle = tokio::spawn(async move {
            let lane = inner.lane(kind);
            lane.wait_turn(ticket).await;
            let permit = match lane.gate.acquire().await {
                Ok(p) => {
                    lane.advance();
                    p
                }
                Err(_) => {
                    // 信号量已关闭：停机中，排队任务直接取消
                    lane.advance();
                    runner.request_cancel();
                    Self::finish_bookkeeping(&inner, runner.id());
                    return;
                }
            };

            if runner.cancel_requested() || runner.state().is_terminal() {
                runner.request_cancel();
                Self::finish_bookkeeping(&inner, runner.id());
                return;
            }

            runner.transition(TaskState::Started);
            debug!("任务 #{} '{}' 开始执行。", runner.id(), runner.description());

            let result = work(runner.clone()).await;
            let terminal = match result {
                Ok(()) if runner.cancel_requested() => TaskState::Cancelled,
                Ok(()) => TaskState::Finished,
                Err(AppError::Cancelled) | Err(AppError::UserInterrupt) => TaskState::Cancelled,
                Err(e) => {
                    // 统一的用户可见失败出口：状态行 + 日志
                    error!(
                        "任务 #{} '{}' 失败: {}",
                        runner.id(),
                        runner.description(),
                        e
                    );
                    runner.publish(runner.progress(), &e.to_string());
                    TaskState::Failed
                }
            };
            runner.transition(terminal);

            drop(permit);
            Self::finish_bookkeeping(&inner, runner.id());
        });

        let id = task.id();
        self.inner.handles.lock().unwrap().insert(id, handle);
        // 运行器可能赶在句柄入表之前就完成了簿记，此处补一次移除，
        // 否则死句柄会在 handles 表里常驻到进程结束
        if !self.inner.tasks.contains_key(&id) {
            self.inner.handles.lock().unwrap().remove(&id);
        }
        task
    }

    fn finish_bookkeeping(inner: &ManagerInner, id: u64) {
        inner.tasks.remove(&id);
        inner.handles.lock().unwrap().remove(&id);
        inner.idle_notify.notify_waiters();
    }

    pub fn cancel_task(&self, id: u64) {
        if let Some(task) = self.inner.tasks.get(&id) {
            task.request_cancel();
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.value().request_cancel();
        }
    }

    /// 是否还有排队或运行中的任务。无头调用方用它判断何时可以退出。
    pub fn pool_running(&self) -> bool {
        !self.inner.tasks.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// 测试辅助：尚未回收的运行句柄数。
    #[cfg(any(test, feature = "testing"))]
    pub fn handle_count(&self) -> usize {
        self.inner.handles.lock().unwrap().len()
    }

    /// 阻塞直到所有通道全部空闲。
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle_notify.notified();
            if self.inner.tasks.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// 停机协议：
    /// 1) 停止接收新提交；2) 竖起所有存活任务的取消标志；
    /// 3) 在宽限期内等待协作退出；4) 强制终止残余任务。
    pub async fn shutdown(&self) {
        info!("调度器停机：停止接收新任务。");
        self.inner.accepting.store(false, Ordering::Relaxed);
        self.inner.main_lane.gate.close();
        self.inner.background_lane.gate.close();
        self.inner.unnamed_lane.gate.close();
        self.cancel_all();

        let grace = self.inner.shutdown_grace;
        if tokio::time::timeout(grace, self.wait_until_idle())
            .await
            .is_err()
        {
            warn!(
                "宽限期 {:?} 内仍有 {} 个任务未退出，强制终止。",
                grace,
                self.running_count()
            );
            self.shutdown_now();
        }
    }

    /// 硬终止：中止所有残余的运行句柄并清空簿记。
    /// 任务持有的外部资源（套接字、临时文件）由各自的清理守卫兜底。
    pub fn shutdown_now(&self) {
        self.inner.accepting.store(false, Ordering::Relaxed);
        let mut handles = self.inner.handles.lock().unwrap();
        for (id, handle) in handles.drain() {
            handle.abort();
            if let Some((_, task)) = self.inner.tasks.remove(&id) {
                task.request_cancel();
                task.transition(TaskState::Cancelled);
            }
        }
        drop(handles);
        self.inner.idle_notify.notify_waiters();
    }
}
