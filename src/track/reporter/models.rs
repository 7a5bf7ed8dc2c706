//! 上报端配置与状态定义

use crate::track::reporter::provider::WatchOptions;
use std::time::Duration;

/// 上报端配置
///
/// 身份信息在构造时显式传入，运行期不读取任何全局存储。
#[derive(Clone)]
pub struct ReporterConfig {
    /// 用户 ID
    pub user_id: String,
    /// 群组 ID
    pub group_id: String,
    /// HTTP API 基础地址（兜底上报用）
    pub api_base_url: String,
    /// 认证 token
    pub token: String,
    /// 保活重发间隔
    pub resend_interval: Duration,
    /// 定位订阅参数
    pub watch_options: WatchOptions,
}

impl ReporterConfig {
    /// 创建默认配置
    pub fn new(user_id: String, group_id: String, api_base_url: String, token: String) -> Self {
        Self {
            user_id,
            group_id,
            api_base_url,
            token,
            resend_interval: Duration::from_secs(30),
            watch_options: WatchOptions::default(),
        }
    }
}

/// 共享状态机
///
/// Stopped → start() → Acquiring（请求权限）→ Sharing；
/// 权限被拒回到 Stopped，stop() 从任意状态回到 Stopped。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingState {
    Stopped,
    Acquiring,
    Sharing,
}
