// src/lib.rs

pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod download;
pub mod error;
pub mod library;
pub mod models;
pub mod symbols;
pub mod task;
pub mod ui;
pub mod utils;
mod workflows;

use crate::{
    cli::Cli,
    client::RobustClient,
    config::AppConfig,
    download::{DownloadManager, FfmpegMuxer, StreamMuxer},
    error::{AppError, AppResult},
    task::TaskManager,
};
use anyhow::anyhow;
use indicatif::MultiProgress;
use log::debug;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// 核心的执行上下文，包含所有任务所需的状态和工具
#[derive(Clone)]
pub struct TaskContext {
    pub manager: TaskManager,
    pub stats: DownloadManager,
    pub config: Arc<AppConfig>,
    pub http_client: Arc<RobustClient>,
    pub muxer: Arc<dyn StreamMuxer>,
    pub args: Arc<Cli>,
    pub multi: Arc<MultiProgress>,
    pub cancellation_token: Arc<AtomicBool>,
}

/// 库的公共入口点，由 `main.rs` 调用
pub async fn run_from_cli(args: Arc<Cli>, cancellation_token: Arc<AtomicBool>) -> AppResult<()> {
    debug!("CLI 参数: {:?}", args);

    let config = Arc::new(AppConfig::new(&args)?);
    debug!("加载的应用配置: {:?}", config);

    let http_client = Arc::new(RobustClient::new(config.clone())?);
    let manager = TaskManager::new(&config);
    let context = TaskContext {
        manager: manager.clone(),
        stats: DownloadManager::new(),
        config: config.clone(),
        http_client,
        muxer: Arc::new(FfmpegMuxer::new(&config.ffmpeg_path)),
        args: args.clone(),
        multi: Arc::new(MultiProgress::new()),
        cancellation_token: cancellation_token.clone(),
    };

    // Ctrl+C 标志 → 调度器取消的转发哨兵
    let watcher = {
        let manager = manager.clone();
        let flag = cancellation_token.clone();
        tokio::spawn(async move {
            loop {
                if flag.load(Ordering::Relaxed) {
                    manager.cancel_all();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    };

    let submit_result = if let Some(batch_file) = &args.batch_file {
        workflows::run_batch(batch_file.clone(), context.clone()).await
    } else if let Some(manifest) = &args.manifest {
        workflows::run_manifest(manifest.clone(), context.clone()).await
    } else if args.url.is_some() {
        workflows::run_single_url(context.clone()).await
    } else {
        Ok(())
    };

    manager.wait_until_idle().await;
    manager.shutdown().await;
    watcher.abort();

    context.stats.print_report();
    submit_result?;

    if cancellation_token.load(Ordering::Relaxed) {
        return Err(AppError::UserInterrupt);
    }
    if !context.stats.did_all_succeed() {
        return Err(AppError::Other(anyhow!("部分获取任务执行失败。")));
    }
    Ok(())
}
