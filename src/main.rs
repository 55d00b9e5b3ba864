// src/main.rs

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use log::warn;
use mlib_dl::{
    cli::{Cli, LogLevel},
    constants, run_from_cli,
};
use std::{
    env,
    sync::{Arc, atomic::AtomicBool, atomic::Ordering},
    time::Duration,
};

#[tokio::main]
async fn main() {
    // 为 Windows 终端启用 ANSI 颜色支持。
    // 仅在 Windows 平台上编译并执行此代码块
    #[cfg(windows)]
    {
        colored::control::set_virtual_terminal(true).ok();
    }

    let cancellation_token = Arc::new(AtomicBool::new(false));
    {
        // 第一次 Ctrl+C 竖取消标志走协作停机；第二次直接硬退出
        let flag = cancellation_token.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.unwrap();
            println!(
                "\n{} 收到中断信号，正在取消所有任务... (再按一次 {} 强制退出)",
                "[!]".yellow(),
                *mlib_dl::symbols::CTRL_C
            );
            flag.store(true, Ordering::Relaxed);
            tokio::signal::ctrl_c().await.unwrap();
            println!("\n{} 用户强制中断程序。", "[!]".yellow());
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::process::exit(130);
        });
    }

    let bin_name = env::var("CARGO_BIN_NAME").unwrap_or_else(|_| "mlib-dl".to_string());

    let after_help = format!(
        "示例:\n  # 获取单个媒体直链\n  {bin} --url \"https://...\" -n my-video\n\n  # 按流清单选流获取 (固定 1080p)\n  {bin} -m manifest.json -q 1080\n\n  # 批量获取\n  {bin} -b my_list.txt -o library",
        bin = bin_name
    );

    let cmd = Cli::command().after_help(after_help);
    let args = Arc::new(Cli::from_arg_matches(&cmd.get_matches()).unwrap());

    setup_logging(args.log_level);

    match run_from_cli(args, cancellation_token).await {
        Ok(()) => {}
        Err(mlib_dl::error::AppError::UserInterrupt) => {
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("\n{} {}", "[X]".red(), format!("程序执行出错: {}", e).red());
            std::process::exit(1);
        }
    }
}

/// 初始化文件日志。任何口径的失败都只降级告警，绝不阻止程序运行。
fn setup_logging(level: LogLevel) {
    if level == LogLevel::Off {
        return;
    }

    let filter = match level {
        LogLevel::Off => log::LevelFilter::Off,
        LogLevel::Error => log::LevelFilter::Error,
        LogLevel::Warn => log::LevelFilter::Warn,
        LogLevel::Info => log::LevelFilter::Info,
        LogLevel::Debug => log::LevelFilter::Debug,
        LogLevel::Trace => log::LevelFilter::Trace,
    };

    let app_name = clap::crate_name!();

    // 优先使用标准配置目录
    let log_file_path = match dirs::home_dir() {
        Some(home) => home
            .join(constants::CONFIG_DIR_NAME)
            .join(constants::LOG_FILE_NAME),
        // 如果无法获取主目录，则回退到临时目录
        None => {
            eprintln!("警告: 无法获取用户主目录，日志将写入临时目录。");
            env::temp_dir().join(app_name).join(constants::LOG_FILE_NAME)
        }
    };

    if let Some(dir) = log_file_path.parent()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("警告: 无法创建日志目录 {:?}: {}", dir, e);
    }

    let file_appender = match fern::log_file(&log_file_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "警告: 无法打开主日志文件 {:?} : {}。将尝试使用备用日志文件。",
                log_file_path, e
            );
            let fallback_path = env::temp_dir().join(format!(
                "{}-{}",
                app_name,
                constants::LOG_FALLBACK_FILE_NAME
            ));
            match fern::log_file(&fallback_path) {
                Ok(fb_file) => {
                    warn!("日志将写入备用文件: {:?}", fallback_path);
                    fb_file
                }
                Err(e_fb) => {
                    eprintln!(
                        "错误: 无法创建主日志和备用日志文件 {:?}: {}。日志将不会被记录到文件。",
                        fallback_path, e_fb
                    );
                    return;
                }
            }
        }
    };

    let result = fern::Dispatch::new()
        .level(filter)
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{:<5}] [{}:{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.line().unwrap_or(0),
                message
            ))
        })
        .chain(file_appender)
        .apply();

    if let Err(e) = result {
        eprintln!("警告: 日志系统初始化失败: {}", e);
    }
}
