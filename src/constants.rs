// src/constants.rs

pub const UI_WIDTH: usize = 88;
pub const MAX_FILENAME_BYTES: usize = 200;
pub const CONFIG_DIR_NAME: &str = concat!(".", clap::crate_name!());
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LOG_FILE_NAME: &str = concat!(clap::crate_name!(), ".log");
pub const LOG_FALLBACK_FILE_NAME: &str = "fallback.log";
pub const DEFAULT_SAVE_DIR: &str = "library";
pub const SCRATCH_DIR_NAME: &str = "scratch";
pub const TEMP_SUFFIX: &str = "part";
pub const GENERIC_EXTENSION: &str = "bin";

/// 单个 Range 请求的最大字节数（实际请求为该值的 95%–99%，规避服务端限速）。
pub const DEFAULT_CHUNK_MAX_BYTES: u64 = 10 * 1024 * 1024;
/// 随机化分块的下限/上限比例。
pub const CHUNK_JITTER_MIN: f64 = 0.95;
pub const CHUNK_JITTER_MAX: f64 = 0.99;

/// 速度采样间隔（毫秒），同时也是进度回调的节流间隔。
pub const SPEED_SAMPLE_MS: u64 = 250;

/// 低于该大小的媒体产物视为明显截断，被最小体积钩子拒绝。
pub const MIN_MEDIA_BYTES: u64 = 16 * 1024;

/// 优雅停机的宽限期（秒），超时后强制终止剩余任务。
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// 混流相关常量。
pub mod mux {
    pub const FFMPEG_BIN: &str = "ffmpeg";
    /// 分离流混流后的默认输出容器。
    pub const DEFAULT_OUTPUT_CONTAINER: &str = "mp4";
    pub const VIDEO_PART_TAG: &str = "video";
    pub const AUDIO_PART_TAG: &str = "audio";
}
