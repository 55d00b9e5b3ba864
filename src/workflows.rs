// src/workflows.rs

use crate::{
    TaskContext,
    download::{DownloadSession, MediaAcquisition, SessionHooks},
    error::{AppError, AppResult},
    library::{SidecarEntity, load_format_catalog},
    models::DownloadStatus,
    task::Task,
    ui, utils,
};
use log::debug;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use url::Url;

/// 运行单链接模式（处理 --url）：不经过选流，直接开一条获取会话。
pub(crate) async fn run_single_url(context: TaskContext) -> AppResult<()> {
    // url 必然存在，由 clap 的 mode 分组保证
    let url = context.args.url.clone().unwrap();
    let name = derive_name(context.args.name.as_deref(), &url);

    ui::print_header(&format!("单链接获取: {}", utils::truncate_text(&url, 60)));
    context.stats.start_batch(1);

    let session = DownloadSession::new(
        context.http_client.clone(),
        context.config.clone(),
        url,
        context.args.output.join(&name),
    )
    .with_hooks(SessionHooks::with_min_size(context.config.min_media_bytes))
    .force_redownload(context.args.force_redownload);

    let ctx = context.clone();
    let label = name.clone();
    context
        .manager
        .add_background_task(format!("获取 {}", name), move |task| async move {
            let pbar = attach_progress_bar(&ctx, &task, &label);
            let result = session.run(&task).await.map(|r| r.status);
            pbar.finish_and_clear();
            record_outcome(&ctx, &label, result)
        });
    Ok(())
}

/// 运行清单模式（处理 --manifest）：选流 → 获取 → （必要时）混流。
pub(crate) async fn run_manifest(manifest: PathBuf, context: TaskContext) -> AppResult<()> {
    ui::print_header(&format!("清单获取: {}", manifest.display()));
    context.stats.start_batch(1);
    submit_manifest_task(&manifest, context)
}

/// 运行批量模式：每行一个清单路径或媒体直链，全部提交到后台池。
pub(crate) async fn run_batch(batch_file: PathBuf, context: TaskContext) -> AppResult<()> {
    let content = std::fs::read_to_string(&batch_file).map_err(AppError::from)?;
    let entries: Vec<String> = content
        .lines()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .collect();
    if entries.is_empty() {
        ui::warn("批量文件为空。");
        return Ok(());
    }

    ui::print_header(&format!("批量获取任务 (共 {} 个)", entries.len()));
    let total = entries.len();
    context.stats.start_batch(total);

    for entry in entries {
        if Url::parse(&entry).is_ok() {
            let name = derive_name(None, &entry);
            let session = DownloadSession::new(
                context.http_client.clone(),
                context.config.clone(),
                entry.clone(),
                context.args.output.join(&name),
            )
            .with_hooks(SessionHooks::with_min_size(context.config.min_media_bytes))
            .force_redownload(context.args.force_redownload);

            let ctx = context.clone();
            let label = name.clone();
            context
                .manager
                .add_background_task(format!("获取 {}", name), move |task| async move {
                    let pbar = attach_progress_bar(&ctx, &task, &label);
                    let result = session.run(&task).await.map(|r| r.status);
                    pbar.finish_and_clear();
                    record_outcome(&ctx, &label, result)
                });
        } else if let Err(e) = submit_manifest_task(Path::new(&entry), context.clone()) {
            // 坏清单不中断批次，计入失败后继续
            log::error!("批量条目 '{}' 解析失败: {}", entry, e);
            context
                .stats
                .record_failure(&entry, DownloadStatus::from(&e));
        }
    }
    ui::info(&format!("已提交 {} 个获取任务，等待全部完成...", total));
    Ok(())
}

/// 解析清单并提交一个后台获取任务。
fn submit_manifest_task(manifest: &Path, context: TaskContext) -> AppResult<()> {
    let catalog = load_format_catalog(manifest)?;
    debug!("清单 '{}' 含 {} 个流。", manifest.display(), catalog.len());

    let name = context.args.name.clone().unwrap_or_else(|| {
        manifest
            .file_stem()
            .map(|s| utils::sanitize_filename(&s.to_string_lossy()))
            .unwrap_or_else(|| "media".to_string())
    });
    let dest_stem = context.args.output.join(&name);

    // 媒体库侧记文件与产物同目录，记录归属的文件清单
    let entity = SidecarEntity::new(dest_stem.with_extension("sidecar.json"));
    let acquisition = MediaAcquisition::new(
        context.http_client.clone(),
        context.config.clone(),
        context.muxer.clone(),
        Arc::new(Mutex::new(entity)),
        catalog,
        dest_stem,
        context.args.quality,
        context.args.force_redownload,
    );

    let ctx = context.clone();
    let label = name.clone();
    context
        .manager
        .add_background_task(format!("获取 {}", name), move |task| async move {
            let pbar = attach_progress_bar(&ctx, &task, &label);
            let result = acquisition.run(&task).await.map(|r| r.status);
            pbar.finish_and_clear();
            record_outcome(&ctx, &label, result)
        });
    Ok(())
}

/// 把任务的推送式进度回调接到一个挂在共享 MultiProgress 下的百分比条。
fn attach_progress_bar(context: &TaskContext, task: &Task, label: &str) -> indicatif::ProgressBar {
    let pbar = context.multi.add(ui::new_percent_progress_bar(
        &utils::truncate_text(label, 24),
    ));
    let bar = pbar.clone();
    task.set_on_progress(Box::new(move |percent, status| {
        if let Some(p) = percent {
            bar.set_position(p as u64);
        }
        bar.set_message(status.to_string());
    }));
    pbar
}

/// 统一的结果登记出口：成功/跳过/失败都汇入批次统计。
/// 取消不计入失败，由调度器负责状态归类。
fn record_outcome(
    context: &TaskContext,
    label: &str,
    result: AppResult<DownloadStatus>,
) -> AppResult<()> {
    match result {
        Ok(DownloadStatus::Skipped) => {
            context.stats.record_skip(label, "文件已存在");
            Ok(())
        }
        Ok(_) => {
            context.stats.record_success();
            Ok(())
        }
        Err(e @ (AppError::Cancelled | AppError::UserInterrupt)) => Err(e),
        Err(e) => {
            context
                .stats
                .record_failure(label, DownloadStatus::from(&e));
            Err(e)
        }
    }
}

/// 从显式命名或链接路径推导保存名（不含扩展名）。
fn derive_name(explicit: Option<&str>, url: &str) -> String {
    if let Some(name) = explicit {
        return utils::sanitize_filename(name);
    }
    let from_url = Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segs| segs.next_back().map(|s| s.to_string()))
            .filter(|s| !s.is_empty())
    });
    let stem = from_url
        .as_deref()
        .map(|s| {
            Path::new(s)
                .file_stem()
                .map(|st| st.to_string_lossy().to_string())
                .unwrap_or_else(|| s.to_string())
        })
        .unwrap_or_else(|| "media".to_string());
    utils::sanitize_filename(&stem)
}
