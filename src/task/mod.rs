// src/task/mod.rs

mod manager;
mod worker_pool;

pub use manager::TaskManager;
pub use worker_pool::{PoolOutcome, WorkerPool};

use log::debug;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

/// 任务的调度归属：三条调度通道。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// 重量级互斥操作（库扫描、批量更新），实际上串行执行。
    Main,
    /// I/O 密集的有名后台工作（下载、取图、取元数据）。
    Background,
    /// 即发即忘的后台工作。
    Unnamed,
}

/// 任务状态机: Created → Queued → Started → {Finished | Failed | Cancelled}。
/// 终态之间、以及从终态向外均不可迁移。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Queued,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// 进度回调: (百分比, 状态行)。百分比 None 表示不确定进度。
/// 消费方（UI）不得在回调里长时间阻塞。
pub type ProgressCallback = Box<dyn Fn(Option<u8>, &str) + Send + Sync>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

struct TaskInner {
    id: u64,
    description: String,
    kind: TaskKind,
    // 状态迁移在此互斥锁下串行化
    state: Mutex<TaskState>,
    progress: Mutex<Option<u8>>,
    status_line: Mutex<Option<String>>,
    // 总工作量（下载任务为总字节数），0 表示未知
    work_units: AtomicU64,
    // 协作式取消标志：只被检查，从不抢占
    cancel: Arc<AtomicBool>,
    on_progress: Mutex<Option<ProgressCallback>>,
}

/// 可取消、可汇报进度的原子工作单元。
/// 克隆共享同一内部状态；运行中的闭包拿到的就是这个句柄。
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn new(kind: TaskKind, description: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                description: description.into(),
                kind,
                state: Mutex::new(TaskState::Created),
                progress: Mutex::new(None),
                status_line: Mutex::new(None),
                work_units: AtomicU64::new(0),
                cancel: Arc::new(AtomicBool::new(false)),
                on_progress: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.lock().unwrap()
    }

    pub fn progress(&self) -> Option<u8> {
        *self.inner.progress.lock().unwrap()
    }

    pub fn status_line(&self) -> Option<String> {
        self.inner.status_line.lock().unwrap().clone()
    }

    pub fn set_work_units(&self, total: u64) {
        self.inner.work_units.store(total, Ordering::Relaxed);
    }

    pub fn work_units(&self) -> u64 {
        self.inner.work_units.load(Ordering::Relaxed)
    }

    /// 注册进度回调（推送模式，消费方无需轮询）。
    pub fn set_on_progress(&self, callback: ProgressCallback) {
        *self.inner.on_progress.lock().unwrap() = Some(callback);
    }

    /// 尝试一次状态迁移；从终态出发的迁移一律拒绝并返回 false。
    pub(crate) fn transition(&self, to: TaskState) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if state.is_terminal() {
            return false;
        }
        debug!(
            "任务 #{} '{}': {:?} -> {:?}",
            self.inner.id, self.inner.description, *state, to
        );
        *state = to;
        true
    }

    /// 请求取消。幂等：重复调用或对终态任务调用没有额外效果。
    /// Queued 状态下直接迁移到 Cancelled（从队列移除）；
    /// Started 状态下只设置协作标志，由运行代码在检查点自行退出。
    pub fn request_cancel(&self) {
        self.inner.cancel.store(true, Ordering::Relaxed);
        let mut state = self.inner.state.lock().unwrap();
        match *state {
            TaskState::Created | TaskState::Queued => {
                debug!("任务 #{} 在入队前/排队中被取消。", self.inner.id);
                *state = TaskState::Cancelled;
            }
            _ => {}
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.inner.cancel.load(Ordering::Relaxed)
    }

    /// 协作取消标志的共享所有权（任务本身 + 管理器 + 子池）。
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.inner.cancel.clone()
    }

    /// 发布一次 (百分比, 状态行) 进度更新。Started → Started 自环，不算状态迁移。
    pub fn publish(&self, percent: Option<u8>, status: &str) {
        *self.inner.progress.lock().unwrap() = percent.map(|p| p.min(100));
        *self.inner.status_line.lock().unwrap() = Some(status.to_string());
        if let Some(cb) = self.inner.on_progress.lock().unwrap().as_ref() {
            cb(percent, status);
        }
    }
}
