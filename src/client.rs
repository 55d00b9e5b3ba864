// src/client.rs

use crate::{config::AppConfig, error::*};
use reqwest::{IntoUrl, Response, header};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::sync::Arc;

/// 下载引擎共用的 HTTP 客户端。
/// 超时与瞬时故障重试都在这一层（中间件）处理；
/// 下载会话本身对服务器的故障状态不做任何重试。
#[derive(Clone)]
pub struct RobustClient {
    pub client: ClientWithMiddleware,
}

impl RobustClient {
    pub fn new(config: Arc<AppConfig>) -> AppResult<Self> {
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(
            reqwest::Client::builder()
                .user_agent(config.user_agent.clone())
                .connect_timeout(config.connect_timeout)
                .timeout(config.timeout)
                .pool_max_idle_per_host(config.background_workers * 3)
                .build()
                .map_err(AppError::Network)?,
        )
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

        Ok(Self { client })
    }

    /// 发起一次带 Range 头的 GET。`end` 为闭区间终点；None 表示开区间 `bytes=start-`。
    pub async fn get_range<T: IntoUrl>(
        &self,
        url: T,
        start: u64,
        end: Option<u64>,
    ) -> AppResult<Response> {
        let range = match end {
            Some(end) => format!("bytes={}-{}", start, end),
            None => format!("bytes={}-", start),
        };
        let res = self
            .client
            .get(url)
            .header(header::RANGE, range)
            .send()
            .await?;
        Ok(res)
    }
}
