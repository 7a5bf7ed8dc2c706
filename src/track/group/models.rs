//! 群组本地模型定义

use crate::track::geofence::DEFAULT_WORK_RADIUS_M;
use crate::track::types::GroupLocation;
use serde::{Deserialize, Serialize};

/// 群组成员
///
/// 只由服务端花名册水合，客户端不自行创建成员。
/// `distance_from_center` / `in_work_area` 为本地计算的展示字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    /// 角色：admin 或 member
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(rename = "isOnline", default)]
    pub is_online: bool,
    #[serde(rename = "lastSeen", default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub location: Option<GroupLocation>,
    /// 到群组中心的距离（米，取整，仅本地计算）
    #[serde(
        rename = "distanceFromCenter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub distance_from_center: Option<i64>,
    /// 是否在作业区域内（仅本地计算）
    #[serde(rename = "inWorkArea", default, skip_serializing_if = "Option::is_none")]
    pub in_work_area: Option<bool>,
}

fn default_role() -> String {
    "member".to_string()
}

/// 群组信息（围栏中心与半径的来源）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(rename = "memberCount", default)]
    pub member_count: i64,
    /// 围栏半径（米），服务端缺省时取 150
    #[serde(rename = "workRadius", default = "default_work_radius")]
    pub work_radius: f64,
}

fn default_work_radius() -> f64 {
    DEFAULT_WORK_RADIUS_M
}

/// 群组同步器配置
pub struct GroupSyncerConfig {
    /// 用户 ID
    pub user_id: String,
    /// 群组 ID（事件过滤与拉取端点用）
    pub group_id: String,
    /// 群组邀请码（info 端点用）
    pub group_code: String,
    /// API 基础 URL
    pub api_base_url: String,
    /// Token
    pub token: String,
    /// 数据库路径（SQLite）
    pub db_path: String,
}
