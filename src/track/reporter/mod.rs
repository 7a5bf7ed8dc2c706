//! 上报端模块
//!
//! 在共享设备上维持“服务端知道我在哪”：订阅定位、通道优先投递、
//! HTTP 兜底、定时保活重发。

pub mod api;
pub mod listener;
pub mod models;
pub mod provider;
pub mod service;

// 重新导出主要类型和函数
pub use api::ReporterApi;
pub use listener::{EmptyReporterListener, ReporterListener};
pub use models::{ReporterConfig, SharingState};
pub use provider::{Position, PositionProvider, WatchOptions};
pub use service::LocationReporter;
