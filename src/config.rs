// src/config.rs

pub mod file;

use self::file::load_or_create_external_config;
use crate::{cli::Cli, constants, error::AppResult};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolConfig {
    /// 后台池并发上限；缺省时按 max(可用核数 - 1, 2) 推导。
    pub background_workers: Option<usize>,
    pub unnamed_workers: Option<usize>,
    pub shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DownloadConfig {
    pub chunk_max_bytes: Option<u64>,
    pub min_media_bytes: Option<u64>,
    pub scratch_dir: Option<PathBuf>,
    pub ffmpeg_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub pools: PoolConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

impl ExternalConfig {
    pub(crate) fn default_app_config() -> Self {
        // 为 NetworkConfig 提供一组稳健的默认值
        let network = NetworkConfig {
            connect_timeout_secs: Some(10),
            timeout_secs: Some(60),
            max_retries: Some(3),
        };
        Self {
            network,
            pools: PoolConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

/// 主任务池（库扫描等重量级互斥操作）的并发上限。
/// 固定为 1，由调度结构保证互斥，不开放配置。
pub const MAIN_POOL_BOUND: usize = 1;

/// 后台池的缺省并发策略。
pub fn derived_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(2)
        .max(2)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub background_workers: usize,
    pub unnamed_workers: usize,
    pub shutdown_grace: Duration,
    pub chunk_max_bytes: u64,
    pub min_media_bytes: u64,
    pub scratch_dir: PathBuf,
    pub ffmpeg_path: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl AppConfig {
    pub fn new(args: &Cli) -> AppResult<Self> {
        let external = load_or_create_external_config()?;

        let background_workers = args
            .workers
            .or(external.pools.background_workers)
            .unwrap_or_else(derived_parallelism);

        let scratch_dir = external.download.scratch_dir.unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(constants::CONFIG_DIR_NAME)
                .join(constants::SCRATCH_DIR_NAME)
        });

        Ok(Self {
            background_workers,
            unnamed_workers: external
                .pools
                .unnamed_workers
                .unwrap_or(background_workers),
            shutdown_grace: Duration::from_secs(
                external
                    .pools
                    .shutdown_grace_secs
                    .unwrap_or(constants::SHUTDOWN_GRACE_SECS),
            ),
            chunk_max_bytes: external
                .download
                .chunk_max_bytes
                .unwrap_or(constants::DEFAULT_CHUNK_MAX_BYTES),
            min_media_bytes: external
                .download
                .min_media_bytes
                .unwrap_or(constants::MIN_MEDIA_BYTES),
            scratch_dir,
            ffmpeg_path: external
                .download
                .ffmpeg_path
                .unwrap_or_else(|| constants::mux::FFMPEG_BIN.to_string()),
            user_agent: constants::USER_AGENT.into(),
            connect_timeout: Duration::from_secs(
                external.network.connect_timeout_secs.unwrap_or(10),
            ),
            timeout: Duration::from_secs(external.network.timeout_secs.unwrap_or(60)),
            max_retries: external.network.max_retries.unwrap_or(3),
        })
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            background_workers: 4,
            unnamed_workers: 4,
            shutdown_grace: Duration::from_secs(1),
            chunk_max_bytes: constants::DEFAULT_CHUNK_MAX_BYTES,
            min_media_bytes: 0,
            scratch_dir: std::env::temp_dir().join("mlib-dl-test-scratch"),
            ffmpeg_path: constants::mux::FFMPEG_BIN.to_string(),
            user_agent: "test-agent/1.0".to_string(),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            max_retries: 3,
        }
    }
}
