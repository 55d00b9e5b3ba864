// src/download/pipeline.rs

use super::{
    mux::StreamMuxer,
    session::{DownloadSession, SessionHooks, SessionReport},
};
use crate::{
    client::RobustClient,
    config::AppConfig,
    error::*,
    library::MediaEntity,
    models::{Container, DownloadStatus, StreamFormat, StreamKind, StreamSelection},
    task::{Task, WorkerPool},
    utils,
};
use itertools::Itertools;
use log::{debug, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// 流选择策略，按优先级：
/// (a) 指定清晰度 + 首选容器的合流；
/// (b) 未指定清晰度时，沿降序清晰度阶梯取第一个合流；
/// (c) 指定清晰度的最佳纯视频流 + 按阶梯排序的最佳纯音频流；
/// (d) 兜底：全场最高清晰度的单一流，若为纯视频则配上最佳纯音频。
/// 一个组合都凑不出时返回 NoUsableStream。
pub fn select_streams(
    catalog: &[StreamFormat],
    pinned_quality: Option<u32>,
) -> AppResult<StreamSelection> {
    if catalog.is_empty() {
        return Err(AppError::NoUsableStream("流目录为空".to_string()));
    }

    // (a) 指定清晰度：要求合流 + 首选容器
    if let Some(q) = pinned_quality {
        if let Some(s) = best_combined_at(catalog, q, true) {
            debug!("选择 (a): {}p 合流, 容器 {}", q, s.container);
            return Ok(StreamSelection::Single(s.clone()));
        }
    } else {
        // (b) 降序清晰度阶梯上的第一个合流
        let ladder: Vec<u32> = catalog
            .iter()
            .filter(|s| s.kind == StreamKind::Combined)
            .filter_map(|s| s.video_quality)
            .unique()
            .sorted_unstable()
            .rev()
            .collect();
        for q in ladder {
            if let Some(s) = best_combined_at(catalog, q, false) {
                debug!("选择 (b): {}p 合流, 容器 {}", q, s.container);
                return Ok(StreamSelection::Single(s.clone()));
            }
        }
    }

    // (c) 纯视频 + 纯音频的组合；容器不限，交给混流器
    let video = match pinned_quality {
        Some(q) => best_video_only_at(catalog, q),
        None => best_video_only(catalog),
    };
    if let Some(video) = video
        && let Some(audio) = best_audio_only(catalog)
    {
        debug!(
            "选择 (c): {}p 纯视频 + 音频 (rank {:?})",
            video.video_quality.unwrap_or(0),
            audio.audio_quality
        );
        return Ok(StreamSelection::Muxed {
            video: video.clone(),
            audio: audio.clone(),
        });
    }

    // (d) 兜底：全场最高清晰度的流，不论合流与否
    if let Some(best) = catalog
        .iter()
        .filter(|s| s.has_video())
        .max_by_key(|s| (s.video_quality.unwrap_or(0), s.container.is_preferred()))
    {
        match best.kind {
            StreamKind::Combined => {
                debug!("选择 (d): 兜底合流 {}p", best.video_quality.unwrap_or(0));
                return Ok(StreamSelection::Single(best.clone()));
            }
            StreamKind::VideoOnly => {
                if let Some(audio) = best_audio_only(catalog) {
                    return Ok(StreamSelection::Muxed {
                        video: best.clone(),
                        audio: audio.clone(),
                    });
                }
                warn!("目录中没有任何音频流，退化为无声视频。");
                return Ok(StreamSelection::Single(best.clone()));
            }
            StreamKind::AudioOnly => unreachable!("has_video() 已过滤纯音频流"),
        }
    }
    // 目录里只剩纯音频
    if let Some(audio) = best_audio_only(catalog) {
        return Ok(StreamSelection::Single(audio.clone()));
    }

    Err(AppError::NoUsableStream(
        "在任何清晰度上都找不到可用的音视频组合".to_string(),
    ))
}

fn best_combined_at(
    catalog: &[StreamFormat],
    quality: u32,
    preferred_container_only: bool,
) -> Option<&StreamFormat> {
    catalog
        .iter()
        .filter(|s| s.kind == StreamKind::Combined && s.video_quality == Some(quality))
        .filter(|s| !preferred_container_only || s.container.is_preferred())
        // 同清晰度时偏向 mp4 > webm > 其他
        .max_by_key(|s| (s.container.is_preferred(), s.container == Container::Mp4))
}

fn best_video_only_at(catalog: &[StreamFormat], quality: u32) -> Option<&StreamFormat> {
    catalog
        .iter()
        .filter(|s| s.kind == StreamKind::VideoOnly && s.video_quality == Some(quality))
        .max_by_key(|s| (s.container.is_preferred(), s.container == Container::Mp4))
}

fn best_video_only(catalog: &[StreamFormat]) -> Option<&StreamFormat> {
    catalog
        .iter()
        .filter(|s| s.kind == StreamKind::VideoOnly)
        .max_by_key(|s| {
            (
                s.video_quality.unwrap_or(0),
                s.container.is_preferred(),
                s.container == Container::Mp4,
            )
        })
}

fn best_audio_only(catalog: &[StreamFormat]) -> Option<&StreamFormat> {
    catalog
        .iter()
        .filter(|s| s.kind == StreamKind::AudioOnly)
        .max_by_key(|s| (s.audio_quality.map(|q| q.rank()).unwrap_or(0)))
}

/// 混流的两路中间产物；无论混流成败都会被删除。
struct PartCleanup(Vec<PathBuf>);

impl Drop for PartCleanup {
    fn drop(&mut self) {
        for path in &self.0 {
            if path.exists()
                && let Err(e) = fs::remove_file(path)
            {
                warn!("清理混流中间文件 {:?} 失败: {}", path, e);
            }
        }
    }
}

/// 多流获取管线：选流 → 获取（单会话或双会话并发）→ 混流 → 安装登记。
pub struct MediaAcquisition {
    client: Arc<RobustClient>,
    config: Arc<AppConfig>,
    muxer: Arc<dyn StreamMuxer>,
    entity: Arc<Mutex<dyn MediaEntity>>,
    catalog: Vec<StreamFormat>,
    /// 不含扩展名的目标路径；扩展名由选中的容器决定。
    dest_stem: PathBuf,
    pinned_quality: Option<u32>,
    force_redownload: bool,
}

impl MediaAcquisition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<RobustClient>,
        config: Arc<AppConfig>,
        muxer: Arc<dyn StreamMuxer>,
        entity: Arc<Mutex<dyn MediaEntity>>,
        catalog: Vec<StreamFormat>,
        dest_stem: impl Into<PathBuf>,
        pinned_quality: Option<u32>,
        force_redownload: bool,
    ) -> Self {
        Self {
            client,
            config,
            muxer,
            entity,
            catalog,
            dest_stem: dest_stem.into(),
            pinned_quality,
            force_redownload,
        }
    }

    pub async fn run(&self, task: &Task) -> AppResult<SessionReport> {
        let selection = select_streams(&self.catalog, self.pinned_quality)?;
        let report = match selection {
            StreamSelection::Single(stream) => self.acquire_single(task, &stream).await?,
            StreamSelection::Muxed { video, audio } => {
                self.acquire_and_mux(task, &video, &audio).await?
            }
        };

        if report.status != DownloadStatus::Skipped {
            self.register_artifact(&report.final_path);
        }
        Ok(report)
    }

    async fn acquire_single(&self, task: &Task, stream: &StreamFormat) -> AppResult<SessionReport> {
        let dest_stem = self.dest_stem.with_extension(stream.container.extension());
        let session = DownloadSession::new(
            self.client.clone(),
            self.config.clone(),
            stream.url.clone(),
            dest_stem,
        )
        .with_hooks(SessionHooks::with_min_size(self.config.min_media_bytes))
        .force_redownload(self.force_redownload);
        session.run(task).await
    }

    /// 两条分离流经子池并发获取，汇合点是唯一的同步点；
    /// 任意一路缺失都使任务失败。
    async fn acquire_and_mux(
        &self,
        task: &Task,
        video: &StreamFormat,
        audio: &StreamFormat,
    ) -> AppResult<SessionReport> {
        let dest = self
            .dest_stem
            .with_extension(output_container(video, audio));
        if dest.exists() && !self.force_redownload {
            debug!("目标文件已存在，跳过混流获取: {:?}", dest);
            return Ok(SessionReport {
                final_path: dest,
                bytes: 0,
                status: DownloadStatus::Skipped,
            });
        }

        let scratch = utils::resolve_scratch_dir(&self.config.scratch_dir, &self.dest_stem);
        let name = self
            .dest_stem
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());

        // 中间产物带轨道标记，且各自携带完整扩展名，避免同容器时互相覆盖
        let video_path = scratch.join(format!(
            "{}.{}.{}",
            name,
            crate::constants::mux::VIDEO_PART_TAG,
            video.container.extension()
        ));
        let audio_path = scratch.join(format!(
            "{}.{}.{}",
            name,
            crate::constants::mux::AUDIO_PART_TAG,
            audio.container.extension()
        ));

        // 两路中间产物无论成败（含取消）都要清掉，守卫必须先于任何退出路径建立
        let _cleanup = PartCleanup(vec![video_path.clone(), audio_path.clone()]);

        let video_report: Arc<Mutex<Option<SessionReport>>> = Arc::new(Mutex::new(None));
        let audio_report: Arc<Mutex<Option<SessionReport>>> = Arc::new(Mutex::new(None));

        let mut pool = WorkerPool::new(2, task.cancel_flag());
        for (tag, stream, target, slot) in [
            (
                crate::constants::mux::VIDEO_PART_TAG,
                video,
                &video_path,
                video_report.clone(),
            ),
            (
                crate::constants::mux::AUDIO_PART_TAG,
                audio,
                &audio_path,
                audio_report.clone(),
            ),
        ] {
            let session = DownloadSession::new(
                self.client.clone(),
                self.config.clone(),
                stream.url.clone(),
                target.clone(),
            )
            // 中间产物总是重新覆盖安装，跳过检查只看最终目标
            .force_redownload(true);
            let sub_task = task.clone();
            pool.submit(format!("{}:{}", tag, name), async move {
                let report = session.run(&sub_task).await?;
                *slot.lock().unwrap() = Some(report);
                Ok(())
            });
        }

        let outcome = pool.await_completion_or_cancel().await;
        if task.cancel_requested() {
            return Err(AppError::Cancelled);
        }
        debug!(
            "分离流获取完成: completed={} failed={}",
            outcome.completed, outcome.failed
        );

        let video_part = video_report.lock().unwrap().take();
        let audio_part = audio_report.lock().unwrap().take();

        let (video_part, audio_part) = match (video_part, audio_part) {
            (Some(v), Some(a)) => (v, a),
            (v, a) => {
                return Err(AppError::Mux(format!(
                    "分离流获取不完整 (视频: {}, 音频: {})",
                    if v.is_some() { "成功" } else { "失败" },
                    if a.is_some() { "成功" } else { "失败" },
                )));
            }
        };

        task.publish(task.progress(), "正在混流...");
        self.muxer
            .mux(&video_part.final_path, &audio_part.final_path, &dest)
            .await?;

        Ok(SessionReport {
            bytes: video_part.bytes + audio_part.bytes,
            final_path: dest,
            status: if video_part.status == DownloadStatus::Resumed
                || audio_part.status == DownloadStatus::Resumed
            {
                DownloadStatus::Resumed
            } else {
                DownloadStatus::Success
            },
        })
    }

    /// 安装成功后登记到持有实体并请求一次持久化；
    /// 持久化失败只记日志，不重试。
    fn register_artifact(&self, path: &Path) {
        let mut entity = self.entity.lock().unwrap();
        entity.add_file(path);
        if let Err(e) = entity.save() {
            log::error!("实体持久化失败 (不重试): {}", e);
        } else {
            info!("产物已登记到媒体库实体: {:?}", path);
        }
    }
}

/// 根据两路流的容器决定混流输出容器。
fn output_container(video: &StreamFormat, audio: &StreamFormat) -> &'static str {
    match (video.container, audio.container) {
        (Container::Mp4, Container::M4a | Container::Mp3 | Container::Mp4) => "mp4",
        (Container::Webm, Container::Webm | Container::Ogg) => "webm",
        // 容器不同源时 mkv 兼容性最好
        _ => "mkv",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioQuality;

    fn stream(
        kind: StreamKind,
        container: Container,
        vq: Option<u32>,
        aq: Option<AudioQuality>,
    ) -> StreamFormat {
        StreamFormat {
            url: format!("https://cdn.example.com/{:?}/{:?}", kind, vq),
            kind,
            container,
            video_quality: vq,
            audio_quality: aq,
        }
    }

    #[test]
    fn test_pinned_quality_prefers_combined_preferred_container() {
        let catalog = vec![
            stream(StreamKind::Combined, Container::Mkv, Some(1080), None),
            stream(StreamKind::Combined, Container::Mp4, Some(1080), None),
            stream(StreamKind::VideoOnly, Container::Mp4, Some(1080), None),
        ];
        let sel = select_streams(&catalog, Some(1080)).unwrap();
        match sel {
            StreamSelection::Single(s) => {
                assert_eq!(s.kind, StreamKind::Combined);
                assert_eq!(s.container, Container::Mp4);
            }
            other => panic!("预期合流，实际: {:?}", other),
        }
    }

    #[test]
    fn test_ladder_walk_takes_highest_combined() {
        let catalog = vec![
            stream(StreamKind::Combined, Container::Mp4, Some(360), None),
            stream(StreamKind::Combined, Container::Webm, Some(720), None),
            stream(StreamKind::Combined, Container::Mp4, Some(480), None),
        ];
        let sel = select_streams(&catalog, None).unwrap();
        match sel {
            StreamSelection::Single(s) => assert_eq!(s.video_quality, Some(720)),
            other => panic!("预期合流，实际: {:?}", other),
        }
    }

    #[test]
    fn test_separate_streams_pick_highest_reachable_pair() {
        // 只有分离流：必须得到最高清晰度视频 + 阶梯最高音频的组合
        let catalog = vec![
            stream(StreamKind::VideoOnly, Container::Mp4, Some(720), None),
            stream(StreamKind::VideoOnly, Container::Webm, Some(1080), None),
            stream(
                StreamKind::AudioOnly,
                Container::M4a,
                None,
                Some(AudioQuality::Medium),
            ),
            stream(
                StreamKind::AudioOnly,
                Container::Ogg,
                None,
                Some(AudioQuality::High),
            ),
        ];
        let sel = select_streams(&catalog, None).unwrap();
        match sel {
            StreamSelection::Muxed { video, audio } => {
                assert_eq!(video.video_quality, Some(1080));
                assert_eq!(audio.audio_quality, Some(AudioQuality::High));
            }
            other => panic!("预期分离流组合，实际: {:?}", other),
        }
    }

    #[test]
    fn test_pinned_quality_separate_fallback() {
        // 指定 720p，合流只有 480p：应取 720p 纯视频 + 最佳音频
        let catalog = vec![
            stream(StreamKind::Combined, Container::Mp4, Some(480), None),
            stream(StreamKind::VideoOnly, Container::Mp4, Some(720), None),
            stream(
                StreamKind::AudioOnly,
                Container::M4a,
                None,
                Some(AudioQuality::Low),
            ),
        ];
        let sel = select_streams(&catalog, Some(720)).unwrap();
        match sel {
            StreamSelection::Muxed { video, .. } => {
                assert_eq!(video.video_quality, Some(720));
                assert_eq!(video.kind, StreamKind::VideoOnly);
            }
            other => panic!("预期分离流组合，实际: {:?}", other),
        }
    }

    #[test]
    fn test_last_resort_takes_best_available() {
        // 指定 2160p，不存在任何 2160p 流：兜底取全场最高
        let catalog = vec![
            stream(StreamKind::Combined, Container::Webm, Some(480), None),
            stream(StreamKind::Combined, Container::Mp4, Some(360), None),
        ];
        let sel = select_streams(&catalog, Some(2160)).unwrap();
        match sel {
            StreamSelection::Single(s) => assert_eq!(s.video_quality, Some(480)),
            other => panic!("预期兜底合流，实际: {:?}", other),
        }
    }

    #[test]
    fn test_empty_catalog_is_no_usable_stream() {
        let err = select_streams(&[], None).unwrap_err();
        assert!(matches!(err, AppError::NoUsableStream(_)));
    }

    #[test]
    fn test_output_container_choice() {
        let v_mp4 = stream(StreamKind::VideoOnly, Container::Mp4, Some(1080), None);
        let a_m4a = stream(
            StreamKind::AudioOnly,
            Container::M4a,
            None,
            Some(AudioQuality::High),
        );
        let a_ogg = stream(
            StreamKind::AudioOnly,
            Container::Ogg,
            None,
            Some(AudioQuality::High),
        );
        assert_eq!(output_container(&v_mp4, &a_m4a), "mp4");
        assert_eq!(output_container(&v_mp4, &a_ogg), "mkv");
    }
}
