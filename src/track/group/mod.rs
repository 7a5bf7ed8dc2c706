//! 群组状态聚合模块
//!
//! 观察端视角：推送与轮询合并出每个成员的定位视图。

pub mod api;
pub mod dao;
pub mod listener;
pub mod models;
pub mod service;
pub mod types;

// 重新导出主要类型和函数
pub use api::GroupApi;
pub use dao::{share_persist_key, GroupDao, ACTIVE_GROUP_KEY, WORKER_ID_KEY};
pub use listener::{EmptyGroupListener, GroupListener};
pub use models::{GroupInfo, GroupMember, GroupSyncerConfig};
pub use service::GroupSyncer;
pub use types::{LocationsResp, LocationsWire};
