use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// 推送通道事件名
///
/// 通道本身不按群组隔离，事件携带 groupId，由接收方过滤。
pub mod event {
    /// 加入群组房间（出站，data 为 groupId 字符串）
    pub const JOIN_GROUP: &str = "join_group";
    /// 离开群组房间（出站，data 为 groupId 字符串）
    pub const LEAVE_GROUP: &str = "leave_group";
    /// 上报定位（出站，data 为 LocationSample）
    pub const GROUP_LOCATION_UPDATE: &str = "group_location_update";
    /// 成员定位变更（入站）
    pub const LOCATION_UPDATE: &str = "location_update";
    /// 成员入群审批通过（入站）
    pub const MEMBER_APPROVED: &str = "member_approved";
    /// 电子围栏越界（入站）
    pub const GEOFENCE_VIOLATION: &str = "geofence_violation";
    /// 群组被删除（入站，终态事件）
    pub const GROUP_DELETED: &str = "group_deleted";
}

/// 推送通道帧结构（JSON 文本帧）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ChannelFrame {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

/// 上报端发送的定位样本
///
/// 客户端只保留最近一份用于重发，不做本地排队。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// 传感器给出的毫秒时间戳
    pub timestamp: i64,
}

impl LocationSample {
    /// 去掉身份字段，得到按成员存储的定位记录
    pub fn to_location(&self) -> GroupLocation {
        GroupLocation {
            lat: self.lat,
            lng: self.lng,
            heading: self.heading,
            accuracy: self.accuracy,
            timestamp: self.timestamp,
        }
    }
}

/// 按成员存储的定位记录（服务端下发的形态，不带身份字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub timestamp: i64,
}

/// 经纬度坐标点
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoCenter {
    pub lat: f64,
    pub lng: f64,
}

/// location_update 事件负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdateEvent {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub location: GroupLocation,
}

/// member_approved 事件负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberApprovedEvent {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

/// geofence_violation 事件负载
///
/// distance/radius 以服务端计算结果为准，客户端不做二次校验，
/// 事件只呈现一次，不落库。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceViolationEvent {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub distance: f64,
    pub radius: f64,
    pub center: GeoCenter,
    pub at: i64,
}

/// group_deleted 事件负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDeletedEvent {
    #[serde(rename = "groupId")]
    pub group_id: String,
}

/// 通用 REST 响应处理函数
///
/// 服务端部分接口把数据包在 `{"data": ...}` 里，部分直接返回裸结构，
/// 这里对两种形态都兼容，先取 data 字段，取不到就按整体反序列化。
pub async fn handle_rest_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<T> {
    use anyhow::Context;

    let status = response.status();
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    let json_value: serde_json::Value =
        serde_json::from_slice(&body_bytes).context("解析 JSON 失败")?;

    // 优先取 data 字段，缺失或为 null 时把整个响应体当作数据
    let data = match json_value.get("data") {
        Some(v) if !v.is_null() => v.clone(),
        _ => json_value,
    };

    serde_json::from_value::<T>(data).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })
}
