//! 错误分类定义
//!
//! 按失败语义分为四类：权限拒绝（终态，面向用户）、通道不可用（非致命，
//! 触发 HTTP 兜底）、拉取失败（非致命，保留最近一次成功的数据）、
//! 群组已删除（终态，触发本地状态清理）。

use thiserror::Error;

/// 位置中继相关错误
#[derive(Error, Debug)]
pub enum TrackError {
    /// 定位权限被拒绝，本次 start() 终止，状态保持 Stopped
    #[error("定位权限被拒绝")]
    PermissionDenied,

    /// 推送通道未连接或发送失败，调用方应转用 HTTP 兜底
    #[error("推送通道不可用")]
    ChannelUnavailable,

    /// 拉取接口失败，调用方应保留最近一次成功的数据
    #[error("拉取失败: {0}")]
    FetchFailed(String),

    /// 群组已被删除
    #[error("群组已删除: {0}")]
    GroupDeleted(String),
}
