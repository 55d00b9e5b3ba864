// tests/task_manager_test.rs

use mlib_dl::config::AppConfig;
use mlib_dl::error::AppError;
use mlib_dl::task::{TaskManager, TaskState, WorkerPool};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::time::sleep;

fn test_config(background_workers: usize) -> AppConfig {
    AppConfig {
        background_workers,
        unnamed_workers: background_workers,
        shutdown_grace: Duration::from_millis(300),
        ..AppConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_background_pool_bounds_concurrency() {
    // --- 1. Arrange ---
    let manager = TaskManager::new(&test_config(3));
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    // --- 2. Act: 提交 20 个任务，远多于池上限 ---
    for i in 0..20 {
        let live = live.clone();
        let peak = peak.clone();
        manager.add_background_task(format!("job-{}", i), move |_task| async move {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(30)).await;
            live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
    }
    manager.wait_until_idle().await;

    // --- 3. Assert: 并发峰值不得超过池上限 ---
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(!manager.pool_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_main_lane_is_mutually_exclusive() {
    // --- 1. Arrange: 后台池很宽，但主通道固定为 1 ---
    let manager = TaskManager::new(&test_config(8));
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    // --- 2. Act ---
    for i in 0..5 {
        let live = live.clone();
        let peak = peak.clone();
        manager.add_main_task(format!("scan-{}", i), move |_task| async move {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
    }
    manager.wait_until_idle().await;

    // --- 3. Assert: 重量级操作靠结构互斥 ---
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_task_reaches_failed_state() {
    let manager = TaskManager::new(&test_config(2));

    let task = manager.add_background_task("doomed", |_task| async {
        Err(AppError::Validation("制造一个失败".to_string()))
    });

    manager.wait_until_idle().await;
    assert_eq!(task.state(), TaskState::Failed);
    // 失败信息经由状态行对用户可见
    assert!(task.status_line().unwrap().contains("制造一个失败"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_running_task_is_cooperative() {
    // --- 1. Arrange: 任务在检查点轮询取消标志 ---
    let manager = TaskManager::new(&test_config(2));
    let task = manager.add_background_task("long-runner", |task| async move {
        for _ in 0..200 {
            if task.cancel_requested() {
                return Err(AppError::Cancelled);
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    });

    // --- 2. Act: 等任务启动后请求取消 ---
    sleep(Duration::from_millis(50)).await;
    manager.cancel_task(task.id());
    manager.wait_until_idle().await;

    // --- 3. Assert ---
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queued_tasks_are_cancelled_by_shutdown() {
    // --- 1. Arrange: 池宽 1，一个慢任务压住队列 ---
    let manager = TaskManager::new(&test_config(1));
    let blocker = manager.add_background_task("blocker", |task| async move {
        for _ in 0..500 {
            if task.cancel_requested() {
                return Err(AppError::Cancelled);
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    });
    let queued = manager.add_background_task("queued", |_task| async { Ok(()) });
    sleep(Duration::from_millis(30)).await;

    // --- 2. Act ---
    manager.shutdown().await;

    // --- 3. Assert: 运行中与排队中的任务都被取消 ---
    assert_eq!(blocker.state(), TaskState::Cancelled);
    assert_eq!(queued.state(), TaskState::Cancelled);
    assert!(!manager.pool_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uncooperative_task_is_hard_killed_after_grace() {
    // --- 1. Arrange: 一个从不检查取消标志的任务 ---
    let manager = TaskManager::new(&test_config(1));
    let stubborn = manager.add_background_task("stubborn", |_task| async move {
        sleep(Duration::from_secs(3600)).await;
        Ok(())
    });
    sleep(Duration::from_millis(30)).await;

    // --- 2. Act: 宽限期 300ms 后必须强制终止 ---
    let start = std::time::Instant::now();
    manager.shutdown().await;

    // --- 3. Assert ---
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(stubborn.state(), TaskState::Cancelled);
    assert!(!manager.pool_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submissions_after_shutdown_are_rejected() {
    let manager = TaskManager::new(&test_config(2));
    manager.shutdown().await;

    let rejected = manager.add_background_task("late", |_task| async { Ok(()) });
    // 拒绝的任务直接进入取消态，不占用任何通道
    assert_eq!(rejected.state(), TaskState::Cancelled);
    assert!(!manager.pool_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_main_lane_preserves_submission_order() {
    // --- 1. Arrange: 后台池很宽也不影响主通道的提交顺序 ---
    let manager = TaskManager::new(&test_config(8));
    let order = Arc::new(Mutex::new(Vec::new()));

    // --- 2. Act: 快速连续提交，执行顺序必须等于提交顺序 ---
    for i in 0..20 {
        let order = order.clone();
        manager.add_main_task(format!("scan-{}", i), move |_task| async move {
            order.lock().unwrap().push(i);
            Ok(())
        });
    }
    manager.wait_until_idle().await;

    // --- 3. Assert ---
    let got = order.lock().unwrap().clone();
    assert_eq!(got, (0..20).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_pool_runs_inside_background_task() {
    // --- 1. Arrange: 宿主任务在后台通道里驱动自己的有界子池 ---
    let manager = TaskManager::new(&test_config(2));
    let hits = Arc::new(AtomicUsize::new(0));

    // --- 2. Act ---
    let hits_outer = hits.clone();
    let task = manager.add_background_task("fan-out", move |task| async move {
        let mut pool = WorkerPool::new(2, task.cancel_flag());
        for i in 0..8 {
            let hits = hits_outer.clone();
            pool.submit(format!("sub-{}", i), async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        let outcome = pool.await_completion_or_cancel().await;
        assert_eq!(outcome.completed, 8);
        Ok(())
    });
    manager.wait_until_idle().await;

    // --- 3. Assert ---
    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(hits.load(Ordering::SeqCst), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bookkeeping_does_not_leak_handles() {
    // --- 1. Arrange & Act: 大量瞬时任务，运行器常常赶在句柄入表前就完成 ---
    let manager = TaskManager::new(&test_config(4));
    for i in 0..200 {
        manager.add_background_task(format!("blink-{}", i), |_task| async { Ok(()) });
    }
    manager.wait_until_idle().await;

    // --- 3. Assert: 句柄表最终必须清空，而不是随提交数单调增长 ---
    for _ in 0..50 {
        if manager.handle_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.handle_count(), 0);
    assert!(!manager.pool_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unnamed_lane_runs_fire_and_forget_work() {
    let manager = TaskManager::new(&test_config(2));
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let hits = hits.clone();
        manager.add_unnamed_task(move |_task| async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    manager.wait_until_idle().await;
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}
