//! 客户端核心实现模块
//!
//! 持有推送通道的生命周期（连接、重连、心跳、事件分发），并把
//! 上报端与群组同步器装配在一起。身份信息全部在配置里显式传入。

use crate::track::channel::{PushChannel, WsChannel, WsReader};
use crate::track::group::dao::{share_persist_key, GroupDao, ACTIVE_GROUP_KEY, WORKER_ID_KEY};
use crate::track::group::listener::{EmptyGroupListener, GroupListener};
use crate::track::group::models::GroupSyncerConfig;
use crate::track::group::service::GroupSyncer;
use crate::track::reporter::listener::{EmptyReporterListener, ReporterListener};
use crate::track::reporter::models::ReporterConfig;
use crate::track::reporter::provider::PositionProvider;
use crate::track::reporter::service::LocationReporter;
use crate::track::types::{
    event, ChannelFrame, GeofenceViolationEvent, GroupDeletedEvent, LocationUpdateEvent,
    MemberApprovedEvent,
};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 用户 ID
    pub user_id: String,
    /// 认证 token
    pub token: String,
    /// 群组 ID
    pub group_id: String,
    /// 群组邀请码（info 端点用）
    pub group_code: String,
    /// WebSocket 服务器 URL
    pub ws_url: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://bavaxe.db?mode=rwc`
    pub db_url: String,
    /// 单轮重连的最大尝试次数
    pub reconnection_attempts: u32,
    /// 重连初始延迟
    pub reconnection_delay: Duration,
    /// 重连延迟上限
    pub reconnection_delay_max: Duration,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 定位快照轮询间隔
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(user_id: String, token: String, group_id: String, group_code: String) -> Self {
        Self {
            user_id,
            token,
            group_id,
            group_code,
            ws_url: "ws://localhost:4000/ws".to_string(),
            api_base_url: "http://localhost:4000".to_string(),
            db_url: "sqlite://bavaxe.db?mode=rwc".to_string(),
            reconnection_attempts: 5,
            reconnection_delay: Duration::from_secs(1),
            reconnection_delay_max: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(25),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// 位置共享客户端
///
/// 一个实例对应一个群组会话，通道句柄不跨群组共享。
pub struct TrackClient {
    config: ClientConfig,
    channel: Arc<WsChannel>,
    provider: Arc<dyn PositionProvider>,
    group_listener: Arc<dyn GroupListener>,
    reporter_listener: Arc<dyn ReporterListener>,
    syncer: Option<Arc<GroupSyncer>>,
    reporter: Option<Arc<LocationReporter>>,
    dao: Option<GroupDao>,
    tasks: Vec<JoinHandle<()>>,
}

impl TrackClient {
    /// 创建新的客户端
    /// - `config`: 客户端配置
    /// - `provider`: 平台注入的定位源
    pub fn new(config: ClientConfig, provider: Arc<dyn PositionProvider>) -> Self {
        Self {
            config,
            channel: WsChannel::new(),
            provider,
            group_listener: Arc::new(EmptyGroupListener),
            reporter_listener: Arc::new(EmptyReporterListener),
            syncer: None,
            reporter: None,
            dao: None,
            tasks: Vec::new(),
        }
    }

    /// 注册群组监听器（connect 之前调用）
    pub fn set_group_listener(&mut self, listener: Arc<dyn GroupListener>) {
        self.group_listener = listener;
    }

    /// 注册上报端监听器（connect 之前调用）
    pub fn set_reporter_listener(&mut self, listener: Arc<dyn ReporterListener>) {
        self.reporter_listener = listener;
    }

    /// 群组同步器（connect 之后可用）
    pub fn syncer(&self) -> Option<Arc<GroupSyncer>> {
        self.syncer.clone()
    }

    /// 上报端（connect 之后可用）
    pub fn reporter(&self) -> Option<Arc<LocationReporter>> {
        self.reporter.clone()
    }

    /// 构建 WebSocket 连接 URL
    fn build_url(&self) -> String {
        format!(
            "{}?userID={}&token={}",
            self.config.ws_url, self.config.user_id, self.config.token
        )
    }

    /// 连接并装配各组件
    ///
    /// 完成：本地库初始化、同步器/上报端创建、首轮拉取、轮询任务、
    /// 连接监督任务，以及持久共享偏好的自动恢复。
    pub async fn connect(&mut self) -> Result<()> {
        info!(
            "[Client] 🔗 连接位置共享服务 (user={}, group={})",
            self.config.user_id, self.config.group_id
        );

        // 创建共享数据库连接并初始化表结构
        info!("[Client] 🔗 创建共享数据库连接: {}", self.config.db_url);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&self.config.db_url)
            .await
            .context(format!("连接SQLite数据库失败: {}", self.config.db_url))?;
        GroupDao::init_db_with_connection(&db).await?;

        // 创建带认证头的 HTTP 客户端（token 通过 default_headers 自动添加）
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("token"),
                    reqwest::header::HeaderValue::from_str(&self.config.token)
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;

        // 群组同步器（HTTP 拉取 + 本地 SQLite 缓存）
        let syncer_cfg = GroupSyncerConfig {
            user_id: self.config.user_id.clone(),
            group_id: self.config.group_id.clone(),
            group_code: self.config.group_code.clone(),
            api_base_url: self.config.api_base_url.clone(),
            token: self.config.token.clone(),
            db_path: self.config.db_url.clone(),
        };
        let syncer = Arc::new(GroupSyncer::with_listener_and_db_and_client(
            syncer_cfg,
            self.group_listener.clone(),
            db.clone(),
            http_client.clone(),
        ));
        self.syncer = Some(syncer.clone());

        // 上报端
        let reporter_cfg = ReporterConfig::new(
            self.config.user_id.clone(),
            self.config.group_id.clone(),
            self.config.api_base_url.clone(),
            self.config.token.clone(),
        );
        let reporter = Arc::new(LocationReporter::with_listener_and_client(
            reporter_cfg,
            self.provider.clone(),
            self.channel.clone() as Arc<dyn PushChannel>,
            self.reporter_listener.clone(),
            http_client,
        ));
        self.reporter = Some(reporter.clone());

        // 写入身份标识，供下次启动恢复会话（运行期不回读）
        let dao = GroupDao::new(db);
        dao.set_setting(WORKER_ID_KEY, &self.config.user_id).await?;
        dao.set_setting(ACTIVE_GROUP_KEY, &self.config.group_id)
            .await?;
        self.dao = Some(dao.clone());

        // 首轮拉取：群组信息、花名册、定位快照
        {
            let syncer = syncer.clone();
            tokio::spawn(async move {
                info!("[Client] 🔄 启动首轮群组数据拉取");
                if let Err(e) = syncer.load_group_info().await {
                    warn!("[Client] 群组信息拉取失败: {}", e);
                }
                if let Err(e) = syncer.load_members().await {
                    warn!("[Client] 花名册拉取失败: {}", e);
                }
                if let Err(e) = syncer.load_locations().await {
                    warn!("[Client] 定位快照拉取失败: {}", e);
                }
            });
        }

        // 定位快照轮询：推送负责实时性，轮询兜住漏收，保证最终一致
        {
            let syncer = syncer.clone();
            let poll_interval = self.config.poll_interval;
            let poll_task = tokio::spawn(async move {
                let mut ticker = interval(poll_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = syncer.load_locations().await {
                        debug!("[Client] 定位轮询失败: {}", e);
                    }
                }
            });
            self.tasks.push(poll_task);
        }

        // 连接监督任务：连接、入群、重发、读循环、断线重连
        {
            let supervisor = tokio::spawn(Self::connection_supervisor(
                self.config.clone(),
                self.build_url(),
                self.channel.clone(),
                syncer.clone(),
                reporter.clone(),
                self.group_listener.clone(),
            ));
            self.tasks.push(supervisor);
        }

        // 持久共享偏好：上次开着就自动恢复共享
        let persisted = dao
            .get_setting(&share_persist_key(&self.config.group_id))
            .await?;
        if persisted.as_deref() == Some("1") {
            info!("[Client] 🔁 检测到持久共享偏好，自动恢复位置共享");
            let reporter = reporter.clone();
            tokio::spawn(async move {
                // 稍等通道建立，失败也没关系，HTTP 兜底可用
                sleep(Duration::from_millis(800)).await;
                if let Err(e) = reporter.start().await {
                    warn!("[Client] 自动恢复位置共享失败: {}", e);
                }
            });
        }

        Ok(())
    }

    /// 开始位置共享
    /// - `persist`: 是否持久化偏好，下次启动自动恢复
    pub async fn start_sharing(&self, persist: bool) -> Result<()> {
        let reporter = self
            .reporter
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("客户端尚未连接"))?;
        reporter.start().await?;

        if persist {
            if let Some(dao) = &self.dao {
                dao.set_setting(&share_persist_key(&self.config.group_id), "1")
                    .await?;
            }
        }
        Ok(())
    }

    /// 停止位置共享（同时清除持久偏好）
    pub async fn stop_sharing(&self) -> Result<()> {
        let reporter = self
            .reporter
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("客户端尚未连接"))?;
        reporter.stop();

        if let Some(dao) = &self.dao {
            dao.delete_setting(&share_persist_key(&self.config.group_id))
                .await?;
        }
        Ok(())
    }

    /// 关闭客户端：停止共享、取消所有任务、释放通道
    pub async fn close(&mut self) {
        if let Some(reporter) = &self.reporter {
            reporter.stop();
        }
        // 尽力通知服务端离开房间，失败忽略
        let _ = self
            .channel
            .emit(event::LEAVE_GROUP, serde_json::json!(self.config.group_id))
            .await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.channel.clear().await;
        info!("[Client] 🛑 客户端已关闭");
    }

    /// 连接监督循环
    ///
    /// 成功连接后：入群、（共享中则）立即重发最近样本、起心跳、进入
    /// 读循环；断开后按 1s 起步、5s 封顶的退避重连，连续失败超过
    /// 上限就放弃重连（轮询与 HTTP 兜底继续工作）。
    async fn connection_supervisor(
        config: ClientConfig,
        url: String,
        channel: Arc<WsChannel>,
        syncer: Arc<GroupSyncer>,
        reporter: Arc<LocationReporter>,
        listener: Arc<dyn GroupListener>,
    ) {
        let mut attempt: u32 = 0;
        let mut delay = config.reconnection_delay;

        loop {
            match connect_async(&url).await {
                Ok((ws_stream, response)) => {
                    info!(
                        "[Client] ✅ WebSocket 连接成功, 状态: {}",
                        response.status()
                    );
                    attempt = 0;
                    delay = config.reconnection_delay;

                    let (write, read) = ws_stream.split();
                    channel.install(write).await;
                    listener
                        .on_connection_status_changed(true, "连接成功".to_string())
                        .await;

                    // 入群：通道在传输层不分群组，按房间订阅
                    if let Err(e) = channel
                        .emit(event::JOIN_GROUP, serde_json::json!(config.group_id))
                        .await
                    {
                        warn!("[Client] join_group 发送失败: {}", e);
                    }

                    // 重连不等下一次自然定位，先把最近样本补上
                    reporter.resend_last().await;

                    // 心跳
                    let heartbeat = {
                        let channel = channel.clone();
                        let heartbeat_interval = config.heartbeat_interval;
                        tokio::spawn(async move {
                            let mut ticker = interval(heartbeat_interval);
                            ticker.tick().await;
                            loop {
                                ticker.tick().await;
                                if channel.ping().await.is_err() {
                                    break;
                                }
                            }
                        })
                    };

                    info!("[Client] 💓 启动心跳");
                    info!("[Client] 📥 开始监听服务器消息");
                    Self::read_loop(read, &config, &syncer, &reporter).await;

                    heartbeat.abort();
                    channel.clear().await;
                    listener
                        .on_connection_status_changed(false, "连接断开".to_string())
                        .await;
                    warn!("[Client] 👋 连接断开，准备重连");
                }
                Err(e) => {
                    attempt += 1;
                    error!(
                        "[Client] ❌ WebSocket 连接失败 (第 {}/{} 次): {}",
                        attempt, config.reconnection_attempts, e
                    );
                    if attempt >= config.reconnection_attempts {
                        error!("[Client] ❌ 重连次数用尽，停止重连（轮询与 HTTP 兜底继续）");
                        listener
                            .on_connection_status_changed(false, "重连已放弃".to_string())
                            .await;
                        return;
                    }
                }
            }

            sleep(delay).await;
            delay = std::cmp::min(delay * 2, config.reconnection_delay_max);
        }
    }

    /// 读循环：逐帧分发，连接错误或关闭帧退出
    async fn read_loop(
        mut read: WsReader,
        config: &ClientConfig,
        syncer: &Arc<GroupSyncer>,
        reporter: &Arc<LocationReporter>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(WsMessage::Text(text)) => {
                    Self::dispatch_frame(&text, config, syncer, reporter).await;
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    warn!("[Client] 👋 连接关闭: {:?}", frame);
                    break;
                }
                Err(e) => {
                    error!("[Client] WebSocket 错误: {}", e);
                    break;
                }
                _ => {}
            }
        }
    }

    /// 分发一帧事件
    async fn dispatch_frame(
        text: &str,
        config: &ClientConfig,
        syncer: &Arc<GroupSyncer>,
        reporter: &Arc<LocationReporter>,
    ) {
        let frame = match serde_json::from_str::<ChannelFrame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("[Client] 忽略无法解析的帧: {}, 原始数据: {}", e, text);
                return;
            }
        };

        match frame.event.as_str() {
            event::LOCATION_UPDATE => {
                match serde_json::from_value::<LocationUpdateEvent>(frame.data) {
                    Ok(ev) => syncer.on_location_update(ev).await,
                    Err(e) => warn!("[Client] location_update 负载解析失败: {}", e),
                }
            }
            event::MEMBER_APPROVED => {
                match serde_json::from_value::<MemberApprovedEvent>(frame.data) {
                    Ok(ev) => syncer.on_member_approved(ev).await,
                    Err(e) => warn!("[Client] member_approved 负载解析失败: {}", e),
                }
            }
            event::GEOFENCE_VIOLATION => {
                match serde_json::from_value::<GeofenceViolationEvent>(frame.data) {
                    Ok(ev) => syncer.on_geofence_violation(ev).await,
                    Err(e) => warn!("[Client] geofence_violation 负载解析失败: {}", e),
                }
            }
            event::GROUP_DELETED => {
                match serde_json::from_value::<GroupDeletedEvent>(frame.data) {
                    Ok(ev) => {
                        if ev.group_id == config.group_id {
                            warn!("[Client] ⚠️ 群组已删除，停止共享并清理本地状态");
                            reporter.stop();
                        }
                        if let Err(e) = syncer.on_group_deleted(ev).await {
                            warn!("[Client] 群组删除清理失败: {}", e);
                        }
                    }
                    Err(e) => warn!("[Client] group_deleted 负载解析失败: {}", e),
                }
            }
            other => {
                debug!("[Client] 未知事件类型: {}", other);
            }
        }
    }
}
