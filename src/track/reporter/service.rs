//! 上报端服务层
//!
//! 维护共享状态机：订阅定位、通道优先投递、HTTP 兜底、定时保活重发。
//! 单条样本的投递是发后即忘，正确性依赖保活重发和下一次自然定位，
//! 不做逐条重试。

use crate::track::channel::PushChannel;
use crate::track::error::TrackError;
use crate::track::reporter::api::ReporterApi;
use crate::track::reporter::listener::{EmptyReporterListener, ReporterListener};
use crate::track::reporter::models::{ReporterConfig, SharingState};
use crate::track::reporter::provider::PositionProvider;
use crate::track::types::{event, LocationSample};
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

struct ReporterInner {
    state: SharingState,
    /// 最近一份样本，停止共享后仍保留，便于同会话内恢复
    last_sample: Option<LocationSample>,
    watch_task: Option<JoinHandle<()>>,
    keepalive_task: Option<JoinHandle<()>>,
}

/// 位置上报端
pub struct LocationReporter {
    config: ReporterConfig,
    api: ReporterApi,
    provider: Arc<dyn PositionProvider>,
    channel: Arc<dyn PushChannel>,
    listener: Arc<dyn ReporterListener>,
    inner: Arc<Mutex<ReporterInner>>,
}

impl LocationReporter {
    /// 创建新的上报端（使用默认空监听器）
    pub fn new(
        config: ReporterConfig,
        provider: Arc<dyn PositionProvider>,
        channel: Arc<dyn PushChannel>,
    ) -> Result<Self> {
        Self::with_listener(config, provider, channel, Arc::new(EmptyReporterListener))
    }

    /// 创建新的上报端（带自定义监听器，内部创建 HTTP 客户端）
    pub fn with_listener(
        config: ReporterConfig,
        provider: Arc<dyn PositionProvider>,
        channel: Arc<dyn PushChannel>,
        listener: Arc<dyn ReporterListener>,
    ) -> Result<Self> {
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

        Ok(Self::with_listener_and_client(
            config,
            provider,
            channel,
            listener,
            http_client,
        ))
    }

    /// 创建新的上报端（使用共享 HTTP 客户端）
    pub fn with_listener_and_client(
        config: ReporterConfig,
        provider: Arc<dyn PositionProvider>,
        channel: Arc<dyn PushChannel>,
        listener: Arc<dyn ReporterListener>,
        http_client: reqwest::Client,
    ) -> Self {
        let api = ReporterApi::new(http_client, config.api_base_url.clone());
        Self {
            config,
            api,
            provider,
            channel,
            listener,
            inner: Arc::new(Mutex::new(ReporterInner {
                state: SharingState::Stopped,
                last_sample: None,
                watch_task: None,
                keepalive_task: None,
            })),
        }
    }

    /// 当前状态
    pub fn state(&self) -> SharingState {
        self.inner.lock().unwrap().state
    }

    /// 是否正在共享
    pub fn is_sharing(&self) -> bool {
        self.state() == SharingState::Sharing
    }

    /// 最近一份样本
    pub fn last_sample(&self) -> Option<LocationSample> {
        self.inner.lock().unwrap().last_sample.clone()
    }

    /// 开始位置共享
    ///
    /// 权限被拒返回 [`TrackError::PermissionDenied`]，状态回到 Stopped，
    /// 不会留下半建的订阅。重复调用是幂等的。
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                SharingState::Sharing | SharingState::Acquiring => {
                    info!("[Reporter] 位置共享已在进行中，忽略重复 start()");
                    return Ok(());
                }
                SharingState::Stopped => inner.state = SharingState::Acquiring,
            }
        }

        info!("[Reporter] 🟢 开始位置共享 (group={})", self.config.group_id);

        let granted = match self.provider.request_permission().await {
            Ok(granted) => granted,
            Err(e) => {
                self.inner.lock().unwrap().state = SharingState::Stopped;
                return Err(e.context("请求定位权限失败"));
            }
        };
        if !granted {
            self.inner.lock().unwrap().state = SharingState::Stopped;
            warn!("[Reporter] ❌ 定位权限被拒绝，本次启动终止");
            self.listener
                .on_sharing_failed(TrackError::PermissionDenied.to_string())
                .await;
            return Err(TrackError::PermissionDenied.into());
        }

        debug!("[Reporter] 📍 权限已授予，开始订阅位置变化");
        let rx = match self.provider.watch(self.config.watch_options).await {
            Ok(rx) => rx,
            Err(e) => {
                self.inner.lock().unwrap().state = SharingState::Stopped;
                return Err(e.context("订阅位置变化失败"));
            }
        };

        let watch_task = tokio::spawn(Self::watch_loop(
            rx,
            self.config.clone(),
            self.api.clone(),
            self.channel.clone(),
            self.inner.clone(),
        ));
        let keepalive_task = tokio::spawn(Self::keepalive_loop(
            self.config.clone(),
            self.api.clone(),
            self.channel.clone(),
            self.inner.clone(),
        ));

        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = SharingState::Sharing;
            inner.watch_task = Some(watch_task);
            inner.keepalive_task = Some(keepalive_task);
        }

        info!("[Reporter] ✅ 位置共享已启动");
        self.listener.on_sharing_started().await;
        Ok(())
    }

    /// 停止位置共享
    ///
    /// 同步取消订阅任务和保活任务；最近样本不清除。
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == SharingState::Stopped {
                debug!("[Reporter] 已是停止状态，忽略 stop()");
                return;
            }
            if let Some(task) = inner.watch_task.take() {
                task.abort();
            }
            if let Some(task) = inner.keepalive_task.take() {
                task.abort();
            }
            inner.state = SharingState::Stopped;
        }

        info!("[Reporter] 🛑 位置共享已停止");
        let listener = self.listener.clone();
        tokio::spawn(async move {
            listener.on_sharing_stopped().await;
        });
    }

    /// 通道重连后立即重发最近样本
    ///
    /// 不等待下一次自然定位，避免服务端在重连窗口内丢掉“当前位置”。
    pub async fn resend_last(&self) {
        let (state, sample) = {
            let inner = self.inner.lock().unwrap();
            (inner.state, inner.last_sample.clone())
        };
        if state != SharingState::Sharing {
            return;
        }
        if let Some(sample) = sample {
            info!("[Reporter] 🔄 通道重连，立即重发最近定位");
            Self::deliver(&self.channel, &self.api, &sample).await;
        }
    }

    /// 投递一份样本：通道优先，不可用时 HTTP 兜底
    ///
    /// 两条路径都是尽力而为，失败只记日志。
    async fn deliver(channel: &Arc<dyn PushChannel>, api: &ReporterApi, sample: &LocationSample) {
        if channel.is_connected() {
            match serde_json::to_value(sample) {
                Ok(payload) => match channel.emit(event::GROUP_LOCATION_UPDATE, payload).await {
                    Ok(()) => {
                        debug!(
                            "[Reporter] ✅ 通道投递成功: lat={}, lng={}",
                            sample.lat, sample.lng
                        );
                        return;
                    }
                    Err(e) => {
                        warn!("[Reporter] ⚠️ 通道投递失败，转用 HTTP 兜底: {}", e);
                    }
                },
                Err(e) => {
                    warn!("[Reporter] 样本序列化失败: {}", e);
                    return;
                }
            }
        } else {
            debug!("[Reporter] ⚠️ 通道未连接，使用 HTTP 兜底");
        }

        if let Err(e) = api.post_location(&sample.group_id, sample).await {
            warn!("[Reporter] ❌ HTTP 兜底投递失败: {}", e);
        }
    }

    /// 定位订阅消费任务
    async fn watch_loop(
        mut rx: tokio::sync::mpsc::Receiver<crate::track::reporter::provider::Position>,
        config: ReporterConfig,
        api: ReporterApi,
        channel: Arc<dyn PushChannel>,
        inner: Arc<Mutex<ReporterInner>>,
    ) {
        while let Some(pos) = rx.recv().await {
            let sample = LocationSample {
                user_id: config.user_id.clone(),
                group_id: config.group_id.clone(),
                lat: pos.lat,
                lng: pos.lng,
                heading: pos.heading,
                accuracy: pos.accuracy,
                timestamp: pos.timestamp,
            };
            debug!(
                "[Reporter] 📡 收到定位更新: lat={}, lng={}, accuracy={:?}",
                sample.lat, sample.lng, sample.accuracy
            );

            inner.lock().unwrap().last_sample = Some(sample.clone());

            // 投递不阻塞订阅流，结果不影响下一条样本
            let api = api.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                Self::deliver(&channel, &api, &sample).await;
            });
        }
        debug!("[Reporter] 定位订阅流已结束");
    }

    /// 保活重发任务：固定间隔重发最近样本
    ///
    /// 与定位更新相互独立，用于覆盖服务端在重连窗口内漏收的情况。
    async fn keepalive_loop(
        config: ReporterConfig,
        api: ReporterApi,
        channel: Arc<dyn PushChannel>,
        inner: Arc<Mutex<ReporterInner>>,
    ) {
        let mut ticker = interval(config.resend_interval);
        // interval 的第一次 tick 立即返回，跳过，保持“满一个间隔才重发”
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sample = inner.lock().unwrap().last_sample.clone();
            if let Some(sample) = sample {
                debug!("[Reporter] 🔄 保活重发最近定位");
                Self::deliver(&channel, &api, &sample).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::reporter::provider::{Position, WatchOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// 测试用定位源：权限可配置，位置由测试方主动注入
    struct MockProvider {
        grant: bool,
        watch_called: AtomicBool,
        sender: Mutex<Option<mpsc::Sender<Position>>>,
    }

    impl MockProvider {
        fn new(grant: bool) -> Arc<Self> {
            Arc::new(Self {
                grant,
                watch_called: AtomicBool::new(false),
                sender: Mutex::new(None),
            })
        }

        async fn push(&self, lat: f64, lng: f64, timestamp: i64) {
            let tx = self.sender.lock().unwrap().clone().expect("watch 未启动");
            tx.send(Position {
                lat,
                lng,
                heading: None,
                accuracy: Some(5.0),
                timestamp,
            })
            .await
            .unwrap();
        }
    }

    #[async_trait]
    impl PositionProvider for MockProvider {
        async fn request_permission(&self) -> Result<bool> {
            Ok(self.grant)
        }

        async fn watch(&self, _options: WatchOptions) -> Result<mpsc::Receiver<Position>> {
            self.watch_called.store(true, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    /// 测试用推送通道：记录所有 emit 调用
    struct MockChannel {
        connected: AtomicBool,
        emitted: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl MockChannel {
        fn new(connected: bool) -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(connected),
                emitted: Mutex::new(Vec::new()),
            })
        }

        fn emit_count(&self) -> usize {
            self.emitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PushChannel for MockChannel {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn emit(&self, event: &str, data: serde_json::Value) -> Result<()> {
            if !self.is_connected() {
                return Err(TrackError::ChannelUnavailable.into());
            }
            self.emitted
                .lock()
                .unwrap()
                .push((event.to_string(), data));
            Ok(())
        }
    }

    fn test_config(resend_ms: u64) -> ReporterConfig {
        let mut config = ReporterConfig::new(
            "u1".to_string(),
            "g1".to_string(),
            // 端口 9 无服务监听，HTTP 兜底会快速失败
            "http://127.0.0.1:9".to_string(),
            "test-token".to_string(),
        );
        config.resend_interval = Duration::from_millis(resend_ms);
        config
    }

    fn build_reporter(
        config: ReporterConfig,
        provider: Arc<MockProvider>,
        channel: Arc<MockChannel>,
    ) -> LocationReporter {
        LocationReporter::with_listener_and_client(
            config,
            provider,
            channel,
            Arc::new(EmptyReporterListener),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn start_without_permission_stays_stopped() {
        let provider = MockProvider::new(false);
        let channel = MockChannel::new(true);
        let reporter = build_reporter(test_config(30_000), provider.clone(), channel);

        let err = reporter.start().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackError>(),
            Some(TrackError::PermissionDenied)
        ));
        assert_eq!(reporter.state(), SharingState::Stopped);
        // 权限被拒后不应建立任何订阅
        assert!(!provider.watch_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn position_update_is_delivered_via_channel() {
        let provider = MockProvider::new(true);
        let channel = MockChannel::new(true);
        let reporter = build_reporter(test_config(30_000), provider.clone(), channel.clone());

        reporter.start().await.unwrap();
        assert!(reporter.is_sharing());

        provider.push(39.0, 35.2433, 1_000).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let emitted = channel.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, event::GROUP_LOCATION_UPDATE);
        assert_eq!(emitted[0].1["groupId"], "g1");
        drop(emitted);

        reporter.stop();
    }

    #[tokio::test]
    async fn keepalive_resends_and_stop_cancels_pending_timer() {
        let provider = MockProvider::new(true);
        let channel = MockChannel::new(true);
        let reporter = build_reporter(test_config(50), provider.clone(), channel.clone());

        reporter.start().await.unwrap();
        provider.push(39.0, 35.2433, 1_000).await;

        // 等几个保活周期：初始投递 + 至少两次重发
        tokio::time::sleep(Duration::from_millis(250)).await;
        let count_before_stop = channel.emit_count();
        assert!(count_before_stop >= 3, "count = {}", count_before_stop);

        reporter.stop();
        assert_eq!(reporter.state(), SharingState::Stopped);

        // 停止后待触发的保活定时器必须失效
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.emit_count(), count_before_stop);

        // 最近样本保留，便于同会话内恢复
        assert!(reporter.last_sample().is_some());
    }

    #[tokio::test]
    async fn reconnect_resends_last_sample_without_new_fix() {
        let provider = MockProvider::new(true);
        let channel = MockChannel::new(true);
        let reporter = build_reporter(test_config(30_000), provider.clone(), channel.clone());

        reporter.start().await.unwrap();
        provider.push(39.001, 35.2433, 2_000).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // 模拟断连期间丢写，重连后清空记录再触发重发
        channel.emitted.lock().unwrap().clear();
        reporter.resend_last().await;

        let emitted = channel.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1, "重连后必须立即重发，不等新定位");
        assert_eq!(emitted[0].1["lat"], 39.001);
        drop(emitted);

        reporter.stop();
    }

    #[tokio::test]
    async fn disconnected_channel_falls_back_without_emit() {
        let provider = MockProvider::new(true);
        let channel = MockChannel::new(false);
        let reporter = build_reporter(test_config(30_000), provider.clone(), channel.clone());

        reporter.start().await.unwrap();
        provider.push(39.0, 35.2433, 3_000).await;
        // HTTP 兜底指向未监听端口，失败只记日志，不影响订阅
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(channel.emit_count(), 0);
        assert!(reporter.is_sharing());
        reporter.stop();
    }
}
