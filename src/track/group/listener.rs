//! 群组状态回调接口

use async_trait::async_trait;

/// 群组状态监听器回调接口
///
/// 列表类负载统一传 JSON 字符串，由宿主自行反序列化。
#[async_trait]
pub trait GroupListener: Send + Sync {
    /// 成员花名册变更（全量 JSON 数组）
    async fn on_members_changed(&self, members_json: String);

    /// 某成员定位更新
    async fn on_location_updated(&self, user_id: String, location_json: String);

    /// 新成员入群审批通过
    async fn on_member_approved(&self, user_id: String, display_name: String);

    /// 电子围栏越界（一次性提示，不落库）
    async fn on_geofence_violation(&self, violation_json: String);

    /// 群组被删除（终态，宿主应停止共享并离开页面）
    async fn on_group_deleted(&self, group_id: String);

    /// 推送通道连接状态变更
    async fn on_connection_status_changed(&self, connected: bool, reason: String);
}

/// 空实现（默认监听器）
pub struct EmptyGroupListener;

#[async_trait]
impl GroupListener for EmptyGroupListener {
    async fn on_members_changed(&self, _members_json: String) {}
    async fn on_location_updated(&self, _user_id: String, _location_json: String) {}
    async fn on_member_approved(&self, _user_id: String, _display_name: String) {}
    async fn on_geofence_violation(&self, _violation_json: String) {}
    async fn on_group_deleted(&self, _group_id: String) {}
    async fn on_connection_status_changed(&self, _connected: bool, _reason: String) {}
}
