//! 群组位置共享 SDK 核心
//!
//! 两个角色：上报端（reporter）持续把本机位置送达服务端，
//! 观察端（group）把推送与轮询合并成全组成员视图。

pub mod channel;
pub mod client;
pub mod error;
pub mod geofence;
pub mod group;
pub mod reporter;
pub mod types;

pub use error::TrackError;
