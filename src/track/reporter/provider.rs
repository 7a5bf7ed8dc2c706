//! 定位源抽象
//!
//! 平台定位能力（权限、订阅）由宿主注入，SDK 核心不绑定具体传感器。

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// 单次定位读数
#[derive(Debug, Clone)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    /// 传感器时间戳（毫秒）
    pub timestamp: i64,
}

/// 定位订阅参数
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// 最小上报时间间隔
    pub time_interval: Duration,
    /// 最小上报位移（米）
    pub distance_interval_m: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            time_interval: Duration::from_secs(8),
            distance_interval_m: 5.0,
        }
    }
}

/// 定位源接口
///
/// `watch` 返回的接收端关闭即代表订阅结束；订阅的取消由上层
/// 中止消费任务完成，定位源自身不需要感知。
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// 请求定位权限，返回是否授予
    async fn request_permission(&self) -> Result<bool>;

    /// 开始订阅位置变化
    async fn watch(&self, options: WatchOptions) -> Result<mpsc::Receiver<Position>>;
}
