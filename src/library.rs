// src/library.rs

use crate::{
    error::{AppError, AppResult},
    models::StreamFormat,
};
use anyhow::Context;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// 媒体库实体的持久化契约。
/// 持久化层本身在引擎之外；下载管线只在产物安装成功后调用一次
/// `add_file` + `save`，save 失败只记日志，不重试。
pub trait MediaEntity: Send + Sync {
    fn add_file(&mut self, file: &Path);
    fn remove_file(&mut self, file: &Path);
    fn save(&mut self) -> AppResult<()>;
}

/// CLI 自带的最小实现：把实体的文件清单写入旁车 JSON，
/// 使安装结果在无头模式下可观测。
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SidecarEntity {
    #[serde(skip)]
    sidecar_path: PathBuf,
    pub files: Vec<PathBuf>,
}

impl SidecarEntity {
    pub fn new(sidecar_path: PathBuf) -> Self {
        let mut entity = Self::default();
        if let Ok(content) = fs::read_to_string(&sidecar_path)
            && let Ok(loaded) = serde_json::from_str::<SidecarEntity>(&content)
        {
            entity.files = loaded.files;
        }
        entity.sidecar_path = sidecar_path;
        entity
    }
}

impl MediaEntity for SidecarEntity {
    fn add_file(&mut self, file: &Path) {
        if !self.files.iter().any(|f| f == file) {
            self.files.push(file.to_path_buf());
        }
    }

    fn remove_file(&mut self, file: &Path) {
        self.files.retain(|f| f != file);
    }

    fn save(&mut self) -> AppResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&self.sidecar_path, json)?;
        debug!("实体文件清单已写入: {:?}", self.sidecar_path);
        Ok(())
    }
}

/// 从 JSON 清单加载流格式目录（外部刮削器的替身，本层只读）。
pub fn load_format_catalog(path: &Path) -> AppResult<Vec<StreamFormat>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("读取流清单 '{}' 失败", path.display()))?;
    let catalog: Vec<StreamFormat> = serde_json::from_str(&content)
        .with_context(|| format!("解析流清单 '{}' 失败", path.display()))
        .map_err(AppError::Other)?;
    if catalog.is_empty() {
        warn!("流清单 '{}' 为空。", path.display());
    }
    Ok(catalog)
}
