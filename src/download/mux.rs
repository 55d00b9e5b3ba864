// src/download/mux.rs

use crate::error::*;
use async_trait::async_trait;
use log::{debug, info};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokio::process::Command;

/// 把分别下载的视频流与音频流合并进单一容器。
/// 抽成 trait 是为了让管线测试不依赖本机的 ffmpeg。
#[async_trait]
pub trait StreamMuxer: Send + Sync {
    async fn mux(&self, video: &Path, audio: &Path, dest: &Path) -> AppResult<()>;
}

/// 默认实现：调用外部 ffmpeg 做流拷贝（不转码）。
pub struct FfmpegMuxer {
    ffmpeg_path: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl StreamMuxer for FfmpegMuxer {
    async fn mux(&self, video: &Path, audio: &Path, dest: &Path) -> AppResult<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| AppError::Mux(format!("目标路径没有父目录: {:?}", dest)))?;
        fs::create_dir_all(parent)?;

        // 先写入目标目录内的暂存文件，成功后原子替换，
        // 失败的混流不会在目标位置留下半成品
        let ext = dest
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(crate::constants::mux::DEFAULT_OUTPUT_CONTAINER);
        let staged = tempfile::Builder::new()
            .prefix(".mux-")
            .suffix(&format!(".{}", ext))
            .tempfile_in(parent)?;

        debug!(
            "ffmpeg 混流: video={:?} audio={:?} -> {:?}",
            video, audio, dest
        );
        let output = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .arg("-c")
            .arg("copy")
            .arg(staged.path())
            .output()
            .await
            .map_err(|e| AppError::Mux(format!("无法启动 ffmpeg ({:?}): {}", self.ffmpeg_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(AppError::Mux(format!(
                "ffmpeg 退出码 {:?}: {}",
                output.status.code(),
                tail
            )));
        }

        if dest.exists() {
            fs::remove_file(dest)?;
        }
        staged.persist(dest)?;
        info!("混流完成: {:?}", dest);
        Ok(())
    }
}
