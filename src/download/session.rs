// src/download/session.rs

use crate::{
    client::RobustClient,
    config::AppConfig,
    constants,
    error::*,
    models::DownloadStatus,
    task::Task,
    utils,
};
use futures::StreamExt;
use indicatif::HumanBytes;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::{StatusCode, header};
use std::{
    fs::{self, File, OpenOptions},
    io::Write as IoWrite,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use url::Url;

/// 滚动速度估计：每 ~250ms 采样一次，
/// speed = (上次速度 + 本段字节数 / 本段秒数) / 2（简单指数平滑）。
pub(crate) struct SpeedTracker {
    last_sample: Instant,
    bytes_since: u64,
    speed: f64,
}

impl SpeedTracker {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            last_sample: now,
            bytes_since: 0,
            speed: 0.0,
        }
    }

    /// 记录一批字节；到达采样间隔时返回平滑后的速度 (bytes/s)。
    pub(crate) fn record(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        self.bytes_since += bytes;
        let dt = now.duration_since(self.last_sample);
        if dt < Duration::from_millis(constants::SPEED_SAMPLE_MS) {
            return None;
        }
        let instantaneous = self.bytes_since as f64 / dt.as_secs_f64();
        self.speed = (self.speed + instantaneous) / 2.0;
        self.bytes_since = 0;
        self.last_sample = now;
        Some(self.speed)
    }
}

/// 注入式策略钩子，取代原先按子类覆写的下载后处理。
#[derive(Default)]
pub struct SessionHooks {
    /// 下载完成、安装之前的产物校验（如最小体积检查）。
    pub check: Option<Box<dyn Fn(&Path) -> AppResult<()> + Send + Sync>>,
    /// 安装成功后的一次性通知（登记实体、触发持久化等）。
    pub installed: Option<Box<dyn Fn(&Path) + Send + Sync>>,
}

impl SessionHooks {
    /// 常用钩子：体积低于 min_bytes 的产物判为截断，拒绝安装。
    pub fn with_min_size(min_bytes: u64) -> Self {
        Self {
            check: Some(Box::new(move |path| {
                let actual = path.metadata()?.len();
                if actual < min_bytes {
                    return Err(AppError::Validation(format!(
                        "文件过小 (实际: {}, 下限: {})，疑似截断",
                        HumanBytes(actual),
                        HumanBytes(min_bytes)
                    )));
                }
                Ok(())
            })),
            installed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub final_path: PathBuf,
    pub bytes: u64,
    pub status: DownloadStatus,
}

/// 临时文件清理守卫：任何退出路径（成功、取消、出错、panic 展开）
/// 都会删除仍然存在的 part 文件。成功安装后文件已被改名，守卫为空操作。
struct TempCleanup(PathBuf);

impl Drop for TempCleanup {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = fs::remove_file(&self.0) {
                warn!("清理临时文件 {:?} 失败: {}", self.0, e);
            }
        }
    }
}

/// 一次可续传的分块下载会话：URL → 临时文件 → 原子安装。
///
/// 临时文件在安装前由会话独占；目标文件永远由“删除旧文件 + 移动完整
/// 临时文件”产生，不存在半写状态。续传偏移始终取自磁盘上 part 文件的
/// 实际大小。
pub struct DownloadSession {
    client: Arc<RobustClient>,
    config: Arc<AppConfig>,
    url: String,
    /// 不含扩展名的目标路径（也允许携带扩展名，此时以其为准）。
    dest_stem: PathBuf,
    hooks: SessionHooks,
    force_redownload: bool,
}

impl DownloadSession {
    pub fn new(
        client: Arc<RobustClient>,
        config: Arc<AppConfig>,
        url: impl Into<String>,
        dest_stem: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            config,
            url: url.into(),
            dest_stem: dest_stem.into(),
            hooks: SessionHooks::default(),
            force_redownload: false,
        }
    }

    pub fn with_hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn force_redownload(mut self, force: bool) -> Self {
        self.force_redownload = force;
        self
    }

    /// 执行会话。取消标志在每个缓冲区读取点被检查。
    pub async fn run(&self, task: &Task) -> AppResult<SessionReport> {
        let url = self.validate_url()?;

        // 扩展名推导链: 目标名 → URL 路径 → (响应头) Content-Type → 通用扩展名
        let mut ext = utils::extension_from_path(&self.dest_stem)
            .or_else(|| utils::extension_from_url(&url));

        // 已知扩展名时，完整产物已存在则跳过（除非强制重下）
        if let Some(e) = &ext {
            let dest = self.dest_with_ext(e);
            if dest.exists() && !self.force_redownload {
                debug!("目标文件已存在，跳过: {:?}", dest);
                return Ok(SessionReport {
                    final_path: dest,
                    bytes: 0,
                    status: DownloadStatus::Skipped,
                });
            }
        }

        let scratch = utils::resolve_scratch_dir(&self.config.scratch_dir, &self.dest_stem);
        let temp_path = scratch.join(utils::temp_part_name(&self.dest_stem));
        let _cleanup = TempCleanup(temp_path.clone());

        // 续传偏移永远来自磁盘上的实际大小，不信任内存状态
        let mut offset = temp_path.metadata().map(|m| m.len()).unwrap_or(0);
        let resumed = offset > 0;
        if resumed {
            info!("发现 {} 字节的未完成传输，将从该偏移续传: {:?}", offset, temp_path);
        }

        let mut total: Option<u64> = None;
        let mut speed = SpeedTracker::new(Instant::now());
        let mut first_request = true;

        loop {
            if task.cancel_requested() {
                return Err(AppError::Cancelled);
            }

            let chunk_len = randomized_chunk_len(self.config.chunk_max_bytes);
            let end = match total {
                Some(t) => (offset + chunk_len).min(t) - 1,
                None => offset + chunk_len - 1,
            };
            let res = self.client.get_range(url.clone(), offset, Some(end)).await?;
            let status = res.status();

            // 扩展名推导链的第三环：响应的 Content-Type
            if ext.is_none()
                && let Some(ct) = res
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
            {
                ext = utils::extension_from_content_type(ct);
            }

            match status {
                StatusCode::PARTIAL_CONTENT => {
                    if total.is_none() {
                        total = parse_content_range_total(&res);
                    }
                }
                StatusCode::OK => {
                    // 服务器不支持 Range：整体重来，丢弃已有的部分内容
                    if offset > 0 {
                        warn!("服务器忽略了 Range 请求，从头下载: {}", url);
                        offset = 0;
                    }
                    total = res.content_length();
                }
                StatusCode::RANGE_NOT_SATISFIABLE => {
                    if let Some(t) = total
                        && offset >= t
                    {
                        break; // 恰好在边界上收尾
                    }
                    if first_request && offset > 0 {
                        // 续传点无效，废弃 part 文件重新开始
                        warn!("续传点 {} 无效，将从头开始下载: {}", offset, url);
                        fs::remove_file(&temp_path)?;
                        offset = 0;
                        first_request = false;
                        continue;
                    }
                    if let Some(t) = total {
                        return Err(AppError::Validation(format!(
                            "服务器在 {} / {} 字节处拒绝了后续 Range 请求",
                            offset, t
                        )));
                    }
                    // 总长未知时，偏移越界即意味着传输已完成
                    break;
                }
                s => {
                    // 故障状态在本层不做重试，直接失败并给出用户可见信息
                    return Err(AppError::HttpStatus {
                        status: s.as_u16(),
                        url: url.to_string(),
                    });
                }
            }

            if let Some(t) = total
                && task.work_units() == 0
            {
                task.set_work_units(t);
            }

            let whole_body = status == StatusCode::OK;
            let mut file = if offset > 0 {
                OpenOptions::new().append(true).open(&temp_path)?
            } else {
                File::create(&temp_path)?
            };

            let requested = end.saturating_sub(offset) + 1;
            let mut received: u64 = 0;
            let mut stream = res.bytes_stream();
            while let Some(chunk_result) = stream.next().await {
                // 缓冲区粒度的取消检查点
                if task.cancel_requested() {
                    return Err(AppError::Cancelled);
                }
                let chunk = chunk_result.map_err(AppError::Network)?;
                file.write_all(&chunk)?;
                offset += chunk.len() as u64;
                received += chunk.len() as u64;
                if let Some(bps) = speed.record(chunk.len() as u64, Instant::now()) {
                    self.publish_progress(task, offset, total, bps);
                }
            }
            file.flush()?;
            first_request = false;

            if whole_body {
                break; // 整个资源已在一次响应中取完
            }
            if let Some(t) = total {
                if offset >= t {
                    break;
                }
                if received == 0 {
                    return Err(AppError::Validation(format!(
                        "服务器在 {} / {} 字节处提前结束传输",
                        offset, t
                    )));
                }
            } else if received < requested {
                break; // 总长未知且服务器给的比请求的少：资源已取尽
            }
        }

        self.publish_progress(task, offset, total.or(Some(offset)), 0.0);

        // 注入式的安装前校验钩子（如最小体积检查）
        if let Some(check) = &self.hooks.check {
            check(&temp_path)?;
        }

        // 扩展名仍未知时的最后一环：此时只能用通用扩展名
        let ext = ext.take().unwrap_or_else(|| {
            debug!("无法推导扩展名，使用通用扩展名 .{}", constants::GENERIC_EXTENSION);
            constants::GENERIC_EXTENSION.to_string()
        });
        let final_path = self.install(&temp_path, &ext)?;

        if let Some(installed) = &self.hooks.installed {
            installed(&final_path);
        }

        Ok(SessionReport {
            final_path,
            bytes: offset,
            status: if resumed {
                DownloadStatus::Resumed
            } else {
                DownloadStatus::Success
            },
        })
    }

    fn validate_url(&self) -> AppResult<Url> {
        if self.url.trim().is_empty() {
            return Err(AppError::UserInputError("下载链接为空".to_string()));
        }
        let url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::UserInputError(format!(
                "不支持的链接协议: {}",
                url.scheme()
            )));
        }
        Ok(url)
    }

    fn dest_with_ext(&self, ext: &str) -> PathBuf {
        if utils::extension_from_path(&self.dest_stem).is_some() {
            self.dest_stem.clone()
        } else {
            self.dest_stem.with_extension(ext)
        }
    }

    /// 原子安装：删除旧产物 → 建父目录 → 把写完的临时文件移动到位。
    /// 目标位置永远不会出现半写文件；移动失败时旧文件（此前已删）之外
    /// 不产生任何残留，任务按安装失败处理。
    fn install(&self, temp_path: &Path, ext: &str) -> AppResult<PathBuf> {
        let dest = self.dest_with_ext(ext);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if dest.exists() {
            fs::remove_file(&dest)
                .map_err(|e| AppError::Install(format!("无法删除旧文件 {:?}: {}", dest, e)))?;
        }
        fs::rename(temp_path, &dest)
            .map_err(|e| AppError::Install(format!("移动 {:?} -> {:?} 失败: {}", temp_path, dest, e)))?;
        info!("产物已安装: {}", dunce::simplified(&dest).display());
        Ok(dest)
    }

    fn publish_progress(&self, task: &Task, done: u64, total: Option<u64>, bps: f64) {
        let (percent, text) = match total {
            Some(t) if t > 0 => (
                Some(((done.min(t)) * 100 / t) as u8),
                format!(
                    "{} / {} ({}/s)",
                    HumanBytes(done),
                    HumanBytes(t),
                    HumanBytes(bps as u64)
                ),
            ),
            _ => (
                None,
                format!("{} ({}/s)", HumanBytes(done), HumanBytes(bps as u64)),
            ),
        };
        task.publish(percent, &text);
    }
}

/// 单次 Range 请求的长度：配置上限的 95%–99% 之间随机取值。
/// 固定请求整个上限会触发部分 CDN 的限速，这里刻意抖动。
fn randomized_chunk_len(chunk_max: u64) -> u64 {
    if chunk_max < 1024 {
        return chunk_max.max(1);
    }
    let ratio = rand::thread_rng()
        .gen_range(constants::CHUNK_JITTER_MIN..constants::CHUNK_JITTER_MAX);
    (chunk_max as f64 * ratio) as u64
}

fn parse_content_range_total(res: &reqwest::Response) -> Option<u64> {
    // 形如 "bytes 100-199/5000"；总长为 "*" 时未知
    let value = res.headers().get(header::CONTENT_RANGE)?.to_str().ok()?;
    let total = value.rsplit('/').next()?;
    total.parse::<u64>().ok()
}
