//! 群组状态聚合服务层
//!
//! 把实时推送（低延迟，可能漏）和周期拉取（高延迟，权威）合并成
//! 每个成员的一致视图。合并一律按时间戳取新，旧的轮询响应不会
//! 覆盖更新的推送数据。

use crate::track::error::TrackError;
use crate::track::geofence::{display_meters, Geofence};
use crate::track::group::api::GroupApi;
use crate::track::group::dao::{share_persist_key, GroupDao, ACTIVE_GROUP_KEY};
use crate::track::group::listener::{EmptyGroupListener, GroupListener};
use crate::track::group::models::{GroupInfo, GroupMember, GroupSyncerConfig};
use crate::track::types::{
    GeoCenter, GeofenceViolationEvent, GroupDeletedEvent, GroupLocation, LocationUpdateEvent,
    MemberApprovedEvent,
};
use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 聚合的内存状态
///
/// 花名册整体替换，定位映射按 userId 合并；互不侵入，
/// 快照时再取每个成员最新的一份。
#[derive(Default)]
struct GroupState {
    members: Vec<GroupMember>,
    locations: HashMap<String, GroupLocation>,
    info: Option<GroupInfo>,
}

/// 群组状态同步器
pub struct GroupSyncer {
    config: GroupSyncerConfig,
    /// 群组 API 客户端
    api: GroupApi,
    /// 群组 DAO
    dao: GroupDao,
    /// 群组监听器
    listener: Arc<dyn GroupListener>,
    state: Mutex<GroupState>,
}

impl GroupSyncer {
    /// 创建新的群组同步器（使用默认空监听器）
    pub async fn new(config: GroupSyncerConfig) -> Result<Self> {
        Self::with_listener(config, Arc::new(EmptyGroupListener)).await
    }

    /// 创建新的群组同步器（带自定义监听器，内部创建连接池）
    pub async fn with_listener(
        config: GroupSyncerConfig,
        listener: Arc<dyn GroupListener>,
    ) -> Result<Self> {
        let db_url = config.db_path.clone();
        info!(
            "[GroupSync] 创建群组同步器，群组ID: {}, SQLite数据库: {}",
            config.group_id, db_url
        );

        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context(format!("连接SQLite数据库失败: {}", db_url))?;

        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&config.token)
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;

        let syncer = Self::assemble(config, listener, db, http_client);
        syncer.dao.init_db().await?;
        Ok(syncer)
    }

    /// 创建新的群组同步器（使用共享连接池和 HTTP 客户端）
    ///
    /// 表结构初始化由调用方负责。
    pub fn with_listener_and_db_and_client(
        config: GroupSyncerConfig,
        listener: Arc<dyn GroupListener>,
        db: Pool<Sqlite>,
        http_client: reqwest::Client,
    ) -> Self {
        info!(
            "[GroupSync] 创建群组同步器（使用共享连接池），群组ID: {}",
            config.group_id
        );
        Self::assemble(config, listener, db, http_client)
    }

    fn assemble(
        config: GroupSyncerConfig,
        listener: Arc<dyn GroupListener>,
        db: Pool<Sqlite>,
        http_client: reqwest::Client,
    ) -> Self {
        let api = GroupApi::new(http_client, config.api_base_url.clone());
        Self {
            api,
            dao: GroupDao::new(db),
            listener,
            state: Mutex::new(GroupState::default()),
            config,
        }
    }

    /// 拉取群组信息（围栏中心与半径）
    pub async fn load_group_info(&self) -> Result<GroupInfo> {
        match self.api.get_group_info(&self.config.group_code).await {
            Ok(info) => {
                self.state.lock().unwrap().info = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                warn!("[GroupSync] ⚠️ 拉取群组信息失败: {}", e);
                Err(TrackError::FetchFailed(e.to_string()).into())
            }
        }
    }

    /// 全量拉取成员花名册
    ///
    /// 成功时整体替换内存花名册并重写本地缓存；失败时回退到
    /// 已有数据：内存里有就保持不动，内存为空才读本地缓存。
    /// 任何失败路径都不会把已填充的花名册清空。
    pub async fn load_members(&self) -> Result<Vec<GroupMember>> {
        match self.api.get_members_with_locations(&self.config.group_id).await {
            Ok(members) => {
                self.state.lock().unwrap().members = members.clone();
                if let Err(e) = self.dao.save_members(&self.config.group_id, &members).await {
                    warn!("[GroupSync] 写入成员缓存失败: {}", e);
                }
                self.notify_members_changed().await;
                Ok(members)
            }
            Err(e) => {
                warn!("[GroupSync] ⚠️ 拉取成员花名册失败，回退本地数据: {}", e);

                {
                    let state = self.state.lock().unwrap();
                    if !state.members.is_empty() {
                        return Ok(state.members.clone());
                    }
                }

                match self.dao.get_members(&self.config.group_id).await {
                    Ok(cached) if !cached.is_empty() => {
                        info!(
                            "[GroupSync] 使用本地缓存花名册，成员数: {}",
                            cached.len()
                        );
                        self.state.lock().unwrap().members = cached.clone();
                        self.notify_members_changed().await;
                        Ok(cached)
                    }
                    _ => Err(TrackError::FetchFailed(e.to_string()).into()),
                }
            }
        }
    }

    /// 全量拉取定位快照
    ///
    /// 失败时保持现有映射不动（陈旧可见优于空白）。
    pub async fn load_locations(&self) -> Result<()> {
        match self.api.get_locations(&self.config.group_id).await {
            Ok(incoming) => {
                let applied = {
                    let mut state = self.state.lock().unwrap();
                    let mut applied = 0;
                    for (user_id, location) in incoming {
                        if Self::merge_location(&mut state.locations, &user_id, location) {
                            applied += 1;
                        }
                    }
                    applied
                };
                debug!("[GroupSync] 定位快照合并完成，采纳 {} 条", applied);
                Ok(())
            }
            Err(e) => {
                warn!("[GroupSync] ⚠️ 拉取定位快照失败，保持现有数据: {}", e);
                Err(TrackError::FetchFailed(e.to_string()).into())
            }
        }
    }

    /// 按时间戳合并一条定位：只有不早于现有记录才采纳
    ///
    /// 推送、轮询、兜底三条路径在此汇合，旧数据不会把新数据盖掉。
    fn merge_location(
        locations: &mut HashMap<String, GroupLocation>,
        user_id: &str,
        incoming: GroupLocation,
    ) -> bool {
        match locations.get(user_id) {
            Some(existing) if existing.timestamp > incoming.timestamp => {
                debug!(
                    "[GroupSync] 丢弃过期定位: userId={}, 现有={}, 入站={}",
                    user_id, existing.timestamp, incoming.timestamp
                );
                false
            }
            _ => {
                locations.insert(user_id.to_string(), incoming);
                true
            }
        }
    }

    /// 处理实时定位推送
    ///
    /// 通道在传输层不按群组隔离，其他群组的事件必须丢弃。
    pub async fn on_location_update(&self, event: LocationUpdateEvent) {
        if event.group_id != self.config.group_id {
            debug!(
                "[GroupSync] 忽略其他群组的定位事件: groupId={}",
                event.group_id
            );
            return;
        }

        let applied = {
            let mut state = self.state.lock().unwrap();
            Self::merge_location(&mut state.locations, &event.user_id, event.location.clone())
        };

        if applied {
            debug!(
                "[GroupSync] 📍 定位更新: userId={}, lat={}, lng={}",
                event.user_id, event.location.lat, event.location.lng
            );
            if let Ok(json) = serde_json::to_string(&event.location) {
                self.listener
                    .on_location_updated(event.user_id.clone(), json)
                    .await;
            }
        }
    }

    /// 处理成员审批通过推送：刷新花名册
    pub async fn on_member_approved(&self, event: MemberApprovedEvent) {
        if event.group_id != self.config.group_id {
            return;
        }
        info!(
            "[GroupSync] 🆕 成员入群: userId={}, displayName={}",
            event.user_id, event.display_name
        );
        self.listener
            .on_member_approved(event.user_id.clone(), event.display_name.clone())
            .await;
        if let Err(e) = self.load_members().await {
            warn!("[GroupSync] 入群事件触发花名册刷新失败: {}", e);
        }
    }

    /// 处理围栏越界推送：一次性转发，不落库
    ///
    /// distance/radius 以服务端计算为准，不做本地复核。
    pub async fn on_geofence_violation(&self, event: GeofenceViolationEvent) {
        if event.group_id != self.config.group_id {
            return;
        }
        warn!(
            "[GroupSync] ⚠️ 围栏越界: userId={}, 距离 {} m (限制 {} m)",
            event.user_id,
            display_meters(event.distance),
            display_meters(event.radius)
        );
        if let Ok(json) = serde_json::to_string(&event) {
            self.listener.on_geofence_violation(json).await;
        }
    }

    /// 处理群组删除推送（终态事件）
    ///
    /// 清掉该群组的所有持久状态：花名册缓存、共享偏好、活跃群组标识。
    /// 这是唯一会删除持久状态的事件。
    pub async fn on_group_deleted(&self, event: GroupDeletedEvent) -> Result<()> {
        if event.group_id != self.config.group_id {
            return Ok(());
        }
        warn!("[GroupSync] 🗑️ 群组已删除，清理本地状态: {}", event.group_id);

        self.dao.delete_members(&self.config.group_id).await?;
        self.dao
            .delete_setting(&share_persist_key(&self.config.group_id))
            .await?;
        self.dao.delete_setting(ACTIVE_GROUP_KEY).await?;

        {
            let mut state = self.state.lock().unwrap();
            state.members.clear();
            state.locations.clear();
        }

        self.listener.on_group_deleted(event.group_id).await;
        Ok(())
    }

    /// 当前花名册快照，带每人最新定位与本地围栏标记
    ///
    /// 花名册自带的定位和实时映射按时间戳取新的一份；有围栏中心时
    /// 顺带算出展示距离与是否在作业区域内。
    pub fn members_snapshot(&self) -> Vec<GroupMember> {
        let state = self.state.lock().unwrap();
        let fence = state.info.as_ref().and_then(|info| {
            match (info.lat, info.lng) {
                (Some(lat), Some(lng)) => Some(Geofence::new(
                    GeoCenter { lat, lng },
                    info.work_radius,
                )),
                _ => None,
            }
        });

        state
            .members
            .iter()
            .map(|member| {
                let mut member = member.clone();
                if let Some(live) = state.locations.get(&member.user_id) {
                    let stale = member
                        .location
                        .as_ref()
                        .map(|l| l.timestamp < live.timestamp)
                        .unwrap_or(true);
                    if stale {
                        member.location = Some(live.clone());
                    }
                }
                if let (Some(fence), Some(location)) = (&fence, &member.location) {
                    let distance = fence.distance_to(location.lat, location.lng);
                    member.distance_from_center = Some(display_meters(distance));
                    member.in_work_area = Some(distance <= fence.radius_m);
                }
                member
            })
            .collect()
    }

    /// 当前定位映射快照
    pub fn locations_snapshot(&self) -> HashMap<String, GroupLocation> {
        self.state.lock().unwrap().locations.clone()
    }

    /// 当前群组信息
    pub fn group_info(&self) -> Option<GroupInfo> {
        self.state.lock().unwrap().info.clone()
    }

    async fn notify_members_changed(&self) {
        let members = self.members_snapshot();
        if let Ok(json) = serde_json::to_string(&members) {
            self.listener.on_members_changed(json).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_syncer() -> GroupSyncer {
        // 内存库每个连接各一份，限制单连接保证看到同一份数据
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        GroupDao::init_db_with_connection(&db).await.unwrap();

        let config = GroupSyncerConfig {
            user_id: "admin".to_string(),
            group_id: "g1".to_string(),
            group_code: "ABC123".to_string(),
            // 端口 9 无服务监听，拉取会快速失败
            api_base_url: "http://127.0.0.1:9".to_string(),
            token: "test-token".to_string(),
            db_path: "sqlite::memory:".to_string(),
        };
        GroupSyncer::with_listener_and_db_and_client(
            config,
            Arc::new(EmptyGroupListener),
            db,
            reqwest::Client::new(),
        )
    }

    fn member(user_id: &str) -> GroupMember {
        GroupMember {
            user_id: user_id.to_string(),
            display_name: format!("成员{}", user_id),
            role: "member".to_string(),
            is_online: true,
            last_seen: None,
            location: None,
            distance_from_center: None,
            in_work_area: None,
        }
    }

    fn location(lat: f64, lng: f64, timestamp: i64) -> GroupLocation {
        GroupLocation {
            lat,
            lng,
            heading: None,
            accuracy: None,
            timestamp,
        }
    }

    #[tokio::test]
    async fn load_members_failure_keeps_populated_roster() {
        let syncer = test_syncer().await;
        syncer.state.lock().unwrap().members = vec![member("u1"), member("u2")];

        // 拉取注定失败，但已填充的花名册必须原样保留
        let result = syncer.load_members().await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(syncer.state.lock().unwrap().members.len(), 2);
    }

    #[tokio::test]
    async fn load_members_failure_falls_back_to_cached_roster() {
        let syncer = test_syncer().await;
        syncer
            .dao
            .save_members("g1", &[member("u1")])
            .await
            .unwrap();

        let result = syncer.load_members().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].user_id, "u1");
    }

    #[tokio::test]
    async fn load_members_failure_without_any_data_is_fetch_failed() {
        let syncer = test_syncer().await;
        let err = syncer.load_members().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackError>(),
            Some(TrackError::FetchFailed(_))
        ));
    }

    #[tokio::test]
    async fn cross_group_location_update_is_ignored() {
        let syncer = test_syncer().await;
        syncer
            .on_location_update(LocationUpdateEvent {
                group_id: "other-group".to_string(),
                user_id: "u1".to_string(),
                location: location(39.0, 35.2433, 1000),
            })
            .await;

        assert!(syncer.locations_snapshot().is_empty());
    }

    #[tokio::test]
    async fn matching_group_location_update_is_applied() {
        let syncer = test_syncer().await;
        syncer
            .on_location_update(LocationUpdateEvent {
                group_id: "g1".to_string(),
                user_id: "u1".to_string(),
                location: location(39.0, 35.2433, 1000),
            })
            .await;

        let snapshot = syncer.locations_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["u1"].timestamp, 1000);
    }

    #[tokio::test]
    async fn stale_update_does_not_overwrite_fresh_one() {
        let syncer = test_syncer().await;
        syncer
            .on_location_update(LocationUpdateEvent {
                group_id: "g1".to_string(),
                user_id: "u1".to_string(),
                location: location(39.001, 35.2433, 2000),
            })
            .await;

        // 迟到的旧数据（如过期的轮询响应）不得覆盖新推送
        syncer
            .on_location_update(LocationUpdateEvent {
                group_id: "g1".to_string(),
                user_id: "u1".to_string(),
                location: location(38.0, 30.0, 1000),
            })
            .await;

        let snapshot = syncer.locations_snapshot();
        assert_eq!(snapshot["u1"].timestamp, 2000);
        assert_eq!(snapshot["u1"].lat, 39.001);
    }

    #[test]
    fn merge_keeps_max_timestamp_per_user() {
        let mut locations = HashMap::new();
        assert!(GroupSyncer::merge_location(
            &mut locations,
            "u1",
            location(39.0, 35.0, 100)
        ));
        assert!(!GroupSyncer::merge_location(
            &mut locations,
            "u1",
            location(38.0, 34.0, 50)
        ));
        // 等时间戳按到达序采纳（后到覆盖）
        assert!(GroupSyncer::merge_location(
            &mut locations,
            "u1",
            location(40.0, 36.0, 100)
        ));
        assert_eq!(locations["u1"].lat, 40.0);
    }

    #[tokio::test]
    async fn group_deleted_purges_durable_state() {
        let syncer = test_syncer().await;
        syncer
            .dao
            .save_members("g1", &[member("u1")])
            .await
            .unwrap();
        syncer
            .dao
            .set_setting(&share_persist_key("g1"), "1")
            .await
            .unwrap();
        syncer.dao.set_setting(ACTIVE_GROUP_KEY, "g1").await.unwrap();
        syncer.state.lock().unwrap().members = vec![member("u1")];

        syncer
            .on_group_deleted(GroupDeletedEvent {
                group_id: "g1".to_string(),
            })
            .await
            .unwrap();

        assert!(syncer.dao.get_members("g1").await.unwrap().is_empty());
        assert_eq!(
            syncer.dao.get_setting(&share_persist_key("g1")).await.unwrap(),
            None
        );
        assert_eq!(syncer.dao.get_setting(ACTIVE_GROUP_KEY).await.unwrap(), None);
        assert!(syncer.state.lock().unwrap().members.is_empty());
    }

    #[tokio::test]
    async fn group_deleted_for_other_group_is_ignored() {
        let syncer = test_syncer().await;
        syncer
            .dao
            .set_setting(&share_persist_key("g1"), "1")
            .await
            .unwrap();

        syncer
            .on_group_deleted(GroupDeletedEvent {
                group_id: "other-group".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            syncer.dao.get_setting(&share_persist_key("g1")).await.unwrap(),
            Some("1".to_string())
        );
    }

    #[tokio::test]
    async fn snapshot_prefers_fresher_location_and_marks_work_area() {
        let syncer = test_syncer().await;
        {
            let mut state = syncer.state.lock().unwrap();
            let mut m = member("u1");
            // 花名册自带一份较旧的定位
            m.location = Some(location(38.0, 30.0, 1000));
            state.members = vec![m];
            state.info = Some(GroupInfo {
                id: "g1".to_string(),
                code: "ABC123".to_string(),
                name: "测试群组".to_string(),
                address: String::new(),
                lat: Some(39.0),
                lng: Some(35.2433),
                member_count: 1,
                work_radius: 150.0,
            });
        }

        // 实时映射里有一份更新的定位（约 111 m 北侧，围栏内）
        syncer
            .on_location_update(LocationUpdateEvent {
                group_id: "g1".to_string(),
                user_id: "u1".to_string(),
                location: location(39.001, 35.2433, 2000),
            })
            .await;

        let snapshot = syncer.members_snapshot();
        assert_eq!(snapshot.len(), 1);
        let m = &snapshot[0];
        let loc = m.location.as_ref().unwrap();
        assert_eq!(loc.timestamp, 2000);
        assert_eq!(m.in_work_area, Some(true));
        let d = m.distance_from_center.unwrap();
        assert!((d - 111).abs() <= 1, "distance = {}", d);
    }
}
