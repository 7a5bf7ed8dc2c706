pub mod track;

// 重新导出常用类型和函数，方便外部使用
pub use track::{
    client::{ClientConfig, TrackClient},
    geofence::{haversine_meters, Geofence},
    group::{GroupListener, GroupMember, GroupSyncer, GroupSyncerConfig},
    reporter::{LocationReporter, PositionProvider, ReporterConfig, ReporterListener},
    types::LocationSample,
    TrackError,
};
