// src/models.rs

use crate::error::AppError;
use crate::symbols;
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::fmt;

// 1. 单个下载/混流任务的最终状态
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DownloadStatus {
    Success,
    Resumed,
    Skipped,
    Cancelled,
    HttpError,
    NetworkError,
    ConnectionError,
    TimeoutError,
    IoError,
    MuxError,
    NoStreamError,
    SizeFailed,
    InstallError,
    UnexpectedError,
}

// 2. 为 DownloadStatus 实现 get_display_info
impl DownloadStatus {
    pub fn get_display_info(
        &self,
    ) -> (
        &'static ColoredString,
        fn(ColoredString) -> ColoredString,
        &'static str,
    ) {
        match self {
            DownloadStatus::Success => (&symbols::OK, |s| s.green(), "下载并安装成功"),
            DownloadStatus::Resumed => (&symbols::OK, |s| s.green(), "续传成功，文件有效"),
            DownloadStatus::Skipped => (&symbols::INFO, |s| s.cyan(), "文件已存在，跳过"),
            DownloadStatus::Cancelled => (&symbols::WARN, |s| s.yellow(), "任务已取消"),
            DownloadStatus::HttpError => (&symbols::ERROR, |s| s.red(), "服务器返回错误"),
            DownloadStatus::NetworkError => (&symbols::ERROR, |s| s.red(), "网络请求失败"),
            DownloadStatus::ConnectionError => (&symbols::ERROR, |s| s.red(), "无法建立连接"),
            DownloadStatus::TimeoutError => (&symbols::WARN, |s| s.yellow(), "网络连接超时"),
            DownloadStatus::IoError => (&symbols::ERROR, |s| s.red(), "本地文件读写错误"),
            DownloadStatus::MuxError => (&symbols::ERROR, |s| s.red(), "音视频混流失败"),
            DownloadStatus::NoStreamError => {
                (&symbols::ERROR, |s| s.red(), "无可用的音视频流组合")
            }
            DownloadStatus::SizeFailed => (&symbols::ERROR, |s| s.red(), "校验失败 (大小异常)"),
            DownloadStatus::InstallError => {
                (&symbols::ERROR, |s| s.red(), "无法安装到媒体库 (移动失败)")
            }
            DownloadStatus::UnexpectedError => {
                (&symbols::ERROR, |s| s.red(), "发生未预期的程序错误")
            }
        }
    }
}

// 3. 为 DownloadStatus 实现 From<&AppError>
impl From<&AppError> for DownloadStatus {
    fn from(error: &AppError) -> Self {
        match error {
            AppError::Network(err)
            | AppError::NetworkMiddleware(reqwest_middleware::Error::Reqwest(err)) => {
                if err.is_timeout() {
                    DownloadStatus::TimeoutError
                } else if err.is_connect() {
                    DownloadStatus::ConnectionError
                } else if err.is_status() {
                    DownloadStatus::HttpError
                } else {
                    DownloadStatus::NetworkError
                }
            }
            AppError::NetworkMiddleware(_) => DownloadStatus::NetworkError,
            AppError::HttpStatus { .. } => DownloadStatus::HttpError,
            AppError::Io(_) | AppError::TempFilePersist(_) => DownloadStatus::IoError,
            AppError::Mux(_) => DownloadStatus::MuxError,
            AppError::NoUsableStream(_) => DownloadStatus::NoStreamError,
            AppError::Validation(_) => DownloadStatus::SizeFailed,
            AppError::Install(_) => DownloadStatus::InstallError,
            AppError::Cancelled | AppError::UserInterrupt => DownloadStatus::Cancelled,
            _ => DownloadStatus::UnexpectedError,
        }
    }
}

// 4. 远端流描述符（由外部元数据刮削器/清单提供，本层只读）

/// 区分“音视频合流”与单独的视频流/音频流。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Combined,
    VideoOnly,
    AudioOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
    Mkv,
    M4a,
    Mp3,
    Ogg,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
            Container::Mkv => "mkv",
            Container::M4a => "m4a",
            Container::Mp3 => "mp3",
            Container::Ogg => "ogg",
        }
    }

    /// 合流选择时的首选容器（媒体库播放兼容性最好）。
    pub fn is_preferred(&self) -> bool {
        matches!(self, Container::Mp4 | Container::Webm)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// 音频质量阶梯，降序排列: High > Medium > Low。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    High,
    Medium,
    Low,
}

impl AudioQuality {
    pub fn rank(&self) -> u8 {
        match self {
            AudioQuality::High => 3,
            AudioQuality::Medium => 2,
            AudioQuality::Low => 1,
        }
    }
}

/// 不可变的流格式描述符。
/// `video_quality` 为像素高度 (如 1080)；纯音频流为 None。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub url: String,
    pub kind: StreamKind,
    pub container: Container,
    #[serde(default)]
    pub video_quality: Option<u32>,
    #[serde(default)]
    pub audio_quality: Option<AudioQuality>,
}

impl StreamFormat {
    pub fn has_video(&self) -> bool {
        matches!(self.kind, StreamKind::Combined | StreamKind::VideoOnly)
    }

    pub fn has_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Combined | StreamKind::AudioOnly)
    }
}

/// 流选择算法的产物：单一合流，或需要混流的一对分离流。
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSelection {
    Single(StreamFormat),
    Muxed {
        video: StreamFormat,
        audio: StreamFormat,
    },
}
