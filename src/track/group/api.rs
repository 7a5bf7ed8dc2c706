//! 群组 HTTP API 客户端
//!
//! 负责花名册、定位快照和群组信息的拉取请求。

use crate::track::group::models::{GroupInfo, GroupMember};
use crate::track::group::types::LocationsResp;
use crate::track::types::{handle_rest_response, GroupLocation};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// 群组相关的 HTTP API 客户端
pub struct GroupApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl GroupApi {
    /// 创建新的群组 API 客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url,
        }
    }

    /// 拉取带定位的成员花名册（全量，权威）
    pub async fn get_members_with_locations(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}/api/groups/{}/members-with-locations",
            self.api_base_url, group_id
        );

        info!("[GroupAPI] 📡 请求成员花名册");
        debug!("[GroupAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        let members = handle_rest_response::<Vec<GroupMember>>(response, "成员花名册").await?;
        info!("[GroupAPI] ✅ 成员花名册响应，成员数: {}", members.len());
        Ok(members)
    }

    /// 拉取群组定位快照（全量）
    pub async fn get_locations(&self, group_id: &str) -> Result<HashMap<String, GroupLocation>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/api/groups/{}/locations", self.api_base_url, group_id);

        debug!(
            "[GroupAPI] 📡 请求定位快照, URL: {}, 操作ID: {}",
            url, operation_id
        );

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        let resp = handle_rest_response::<LocationsResp>(response, "定位快照").await?;
        let map = resp.locations.into_map();
        debug!("[GroupAPI] ✅ 定位快照响应，条目数: {}", map.len());
        Ok(map)
    }

    /// 拉取群组信息（围栏中心与半径）
    pub async fn get_group_info(&self, group_code: &str) -> Result<GroupInfo> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/api/groups/{}/info", self.api_base_url, group_code);

        info!("[GroupAPI] 📡 请求群组信息");
        debug!("[GroupAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        let info = handle_rest_response::<GroupInfo>(response, "群组信息").await?;
        info!(
            "[GroupAPI] ✅ 群组信息响应: name={}, workRadius={}",
            info.name, info.work_radius
        );
        Ok(info)
    }
}
