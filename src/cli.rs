// src/cli.rs

use crate::constants;
use clap::{Parser, ValueEnum, command, crate_version};
use std::path::PathBuf;

/// 定义日志输出级别
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// command 属性
#[derive(Parser, Debug, Clone)]
#[command(
    version = crate_version!(),
    about,
    long_about = None,
    arg_required_else_help = true,
    disable_help_flag = true,
    disable_version_flag = true,
)]
#[command(group(
    clap::ArgGroup::new("mode")
        .required(true)
        .args(&["url", "manifest", "batch_file"]),
))]
pub struct Cli {
    // --- 运行模式 (Mode) ---
    /// 指定要获取的单个媒体直链
    #[arg(long, help_heading = "Mode")]
    pub url: Option<String>,
    /// 从流清单文件 (JSON) 中按偏好选流并获取
    #[arg(short, long, value_name = "FILE", help_heading = "Mode")]
    pub manifest: Option<PathBuf>,
    /// 从文本文件批量获取多个清单 (每行一个路径)
    #[arg(short, long, value_name = "FILE", help_heading = "Mode")]
    pub batch_file: Option<PathBuf>,

    // --- 获取选项 (Options) ---
    /// 固定视频清晰度 (如 1080)；缺省时沿清晰度阶梯取最高
    #[arg(short = 'q', long, value_parser = clap::value_parser!(u32), help_heading = "Options")]
    pub quality: Option<u32>,
    /// 指定保存文件名 (不含扩展名)；缺省时从链接推导
    #[arg(short, long, help_heading = "Options")]
    pub name: Option<String>,
    /// 强制重新获取已存在的文件
    #[arg(short, long, action = clap::ArgAction::SetTrue, help_heading = "Options")]
    pub force_redownload: bool,
    /// 设置后台池最大并发数
    #[arg(short, long, value_parser = clap::value_parser!(usize), help_heading = "Options")]
    pub workers: Option<usize>,
    /// 设置文件保存目录
    #[arg(short, long, value_name = "DIR", default_value_os_t = PathBuf::from(constants::DEFAULT_SAVE_DIR), help_heading = "Options")]
    pub output: PathBuf,

    // --- 通用选项 (General) ---
    /// 显示此帮助信息并退出
    #[arg(short = 'h', long, action = clap::ArgAction::Help, global = true, help_heading = "General")]
    _help: Option<bool>,
    /// 显示版本信息并退出
    #[arg(short = 'V', long, action = clap::ArgAction::Version, global = true, help_heading = "General")]
    _version: Option<bool>,
    /// (隐藏参数) 设置日志文件的输出级别，用于调试
    #[arg(long, value_enum, default_value_t = LogLevel::Off, global = true, hide = true)]
    pub log_level: LogLevel,
}
