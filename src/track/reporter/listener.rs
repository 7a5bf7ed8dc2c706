//! 上报端回调接口

use async_trait::async_trait;

/// 上报端监听器回调接口
///
/// 只有显式用户动作（开始/停止共享）会触发回调；
/// 后台投递失败只记日志，不打扰用户。
#[async_trait]
pub trait ReporterListener: Send + Sync {
    /// 位置共享已开始
    async fn on_sharing_started(&self);

    /// 位置共享已停止
    async fn on_sharing_stopped(&self);

    /// 位置共享启动失败（权限被拒等）
    async fn on_sharing_failed(&self, reason: String);
}

/// 空实现（默认监听器）
pub struct EmptyReporterListener;

#[async_trait]
impl ReporterListener for EmptyReporterListener {
    async fn on_sharing_started(&self) {}
    async fn on_sharing_stopped(&self) {}
    async fn on_sharing_failed(&self, _reason: String) {}
}
