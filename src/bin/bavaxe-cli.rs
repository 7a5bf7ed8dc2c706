//! 位置共享 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示 SDK 功能：
//! 启动时通过命令行参数指定用户与群组，自动连接，打印收到的所有事件；
//! 加 `--share` 后用模拟定位源开始上报位置。

use anyhow::Result;
use async_trait::async_trait;
use bavaxe_sdk_core_rust::track::client::{ClientConfig, TrackClient};
use bavaxe_sdk_core_rust::track::group::listener::GroupListener;
use bavaxe_sdk_core_rust::track::reporter::listener::ReporterListener;
use bavaxe_sdk_core_rust::track::reporter::provider::{Position, PositionProvider, WatchOptions};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 位置共享 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "bavaxe-cli")]
#[command(about = "位置共享 CLI 客户端 - 用于测试和展示 SDK 功能", long_about = None)]
struct Args {
    /// 用户 ID
    #[arg(short, long, default_value = "worker-1")]
    user: String,

    /// 认证 token
    #[arg(short, long, default_value = "dev-token")]
    token: String,

    /// 群组 ID
    #[arg(short, long, default_value = "group-1")]
    group: String,

    /// 群组邀请码
    #[arg(long, default_value = "ABC123")]
    group_code: String,

    /// WebSocket 服务器 URL
    #[arg(long, default_value = "ws://localhost:4000/ws")]
    ws_url: String,

    /// HTTP API 基础地址
    #[arg(long, default_value = "http://localhost:4000")]
    api_url: String,

    /// 本地 SQLite 数据库 URL
    #[arg(long, default_value = "sqlite://bavaxe.db?mode=rwc")]
    db: String,

    /// 启动后开始上报位置（模拟定位源）
    #[arg(long, default_value_t = false)]
    share: bool,

    /// 开始上报时持久化共享偏好（下次启动自动恢复）
    #[arg(long, default_value_t = false)]
    persist: bool,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别
    #[arg(long, default_value = "info,bavaxe_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 模拟定位源：从地图中心出发，每个订阅周期向北走一步
///
/// 每步约 0.0002 度（~22 m），十几分钟就能走出默认围栏，
/// 方便观察越界事件。
struct SimulatedRouteProvider {
    start_lat: f64,
    start_lng: f64,
    step_deg: f64,
}

impl SimulatedRouteProvider {
    fn new() -> Self {
        Self {
            // 地图默认中心（土耳其）
            start_lat: 39.0,
            start_lng: 35.2433,
            step_deg: 0.0002,
        }
    }
}

#[async_trait]
impl PositionProvider for SimulatedRouteProvider {
    async fn request_permission(&self) -> Result<bool> {
        // 模拟源永远有权限
        Ok(true)
    }

    async fn watch(&self, options: WatchOptions) -> Result<mpsc::Receiver<Position>> {
        let (tx, rx) = mpsc::channel(16);
        let start_lat = self.start_lat;
        let start_lng = self.start_lng;
        let step_deg = self.step_deg;

        tokio::spawn(async move {
            let mut step: u64 = 0;
            loop {
                let position = Position {
                    lat: start_lat + step_deg * step as f64,
                    lng: start_lng,
                    heading: Some(0.0),
                    accuracy: Some(5.0),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };
                if tx.send(position).await.is_err() {
                    break;
                }
                step += 1;
                sleep(options.time_interval).await;
            }
        });

        Ok(rx)
    }
}

/// 设置监听器（输出所有接收到的事件）
fn setup_listeners(client: &mut TrackClient) {
    // 群组监听器
    struct CliGroupListener;
    #[async_trait]
    impl GroupListener for CliGroupListener {
        async fn on_members_changed(&self, members_json: String) {
            info!("[CLI/Group] 👥 花名册变更: {}", members_json);
        }

        async fn on_location_updated(&self, user_id: String, location_json: String) {
            info!("[CLI/Group] 📍 定位更新: {} -> {}", user_id, location_json);
        }

        async fn on_member_approved(&self, user_id: String, display_name: String) {
            info!("[CLI/Group] 🆕 成员入群: {} ({})", display_name, user_id);
        }

        async fn on_geofence_violation(&self, violation_json: String) {
            warn!("[CLI/Group] ⚠️ 围栏越界: {}", violation_json);
        }

        async fn on_group_deleted(&self, group_id: String) {
            warn!("[CLI/Group] 🗑️ 群组已删除: {}，请退出页面", group_id);
        }

        async fn on_connection_status_changed(&self, connected: bool, reason: String) {
            if connected {
                info!("[CLI/Group] 🔗 通道已连接: {}", reason);
            } else {
                warn!("[CLI/Group] 👋 通道已断开: {}", reason);
            }
        }
    }
    client.set_group_listener(Arc::new(CliGroupListener));

    // 上报端监听器
    struct CliReporterListener;
    #[async_trait]
    impl ReporterListener for CliReporterListener {
        async fn on_sharing_started(&self) {
            info!("[CLI/Reporter] 🟢 位置共享已开始");
        }

        async fn on_sharing_stopped(&self) {
            info!("[CLI/Reporter] 🛑 位置共享已停止");
        }

        async fn on_sharing_failed(&self, reason: String) {
            error!("[CLI/Reporter] ❌ 位置共享启动失败: {}", reason);
        }
    }
    client.set_reporter_listener(Arc::new(CliReporterListener));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!(
        "[CLI] 🚀 启动位置共享客户端 (user={}, group={})",
        args.user, args.group
    );

    let mut config = ClientConfig::new(
        args.user.clone(),
        args.token.clone(),
        args.group.clone(),
        args.group_code.clone(),
    );
    config.ws_url = args.ws_url.clone();
    config.api_base_url = args.api_url.clone();
    config.db_url = args.db.clone();

    let mut client = TrackClient::new(config, Arc::new(SimulatedRouteProvider::new()));
    setup_listeners(&mut client);
    client.connect().await?;

    if args.share {
        if let Err(e) = client.start_sharing(args.persist).await {
            error!("[CLI] 开始上报失败: {}", e);
        }
    }

    if args.duration > 0 {
        info!("[CLI] ⏱️ 运行 {} 秒后退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] 按 Ctrl+C 退出");
        tokio::signal::ctrl_c().await?;
    }

    client.close().await;
    info!("[CLI] 再见 👋");
    Ok(())
}
