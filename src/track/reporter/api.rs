//! 上报端 HTTP API 客户端
//!
//! 推送通道不可用时的兜底上报路径。

use crate::track::types::LocationSample;
use anyhow::{Context, Result};
use tracing::{debug, error};
use uuid::Uuid;

/// 定位上报 HTTP API 客户端
#[derive(Clone)]
pub struct ReporterApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl ReporterApi {
    /// 创建新的上报 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url,
        }
    }

    /// 兜底上报一份定位样本
    pub async fn post_location(&self, group_id: &str, sample: &LocationSample) -> Result<()> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/api/groups/{}/locations", self.api_base_url, group_id);

        debug!(
            "[ReporterAPI] 📡 HTTP 兜底上报定位, URL: {}, 操作ID: {}",
            url, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(sample)
            .send()
            .await
            .context("请求失败")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(
                "[ReporterAPI] 兜底上报失败，HTTP状态: {}, 响应: {}",
                status, text
            );
            return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, text));
        }

        debug!("[ReporterAPI] ✅ 兜底上报成功，HTTP状态: {}", status);
        Ok(())
    }
}
