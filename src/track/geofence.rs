//! 电子围栏距离计算
//!
//! 越界事件以服务端下发为准，这里的计算只用于本地标记着色，
//! 两边都是尽力估计，不做一致性对账。

use crate::track::types::GeoCenter;

/// 地球半径（米）
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 服务端未下发 workRadius 时的默认围栏半径（米）
pub const DEFAULT_WORK_RADIUS_M: f64 = 150.0;

/// Haversine 大圆距离（米，未取整）
///
/// 输入为度，内部转弧度。判定围栏归属必须用未取整的值，
/// 展示用 [`display_meters`] 取整。
pub fn haversine_meters(a_lat: f64, a_lng: f64, b_lat: f64, b_lng: f64) -> f64 {
    let d_lat = (b_lat - a_lat).to_radians();
    let d_lng = (b_lng - a_lng).to_radians();
    let lat1 = a_lat.to_radians();
    let lat2 = b_lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// 展示用距离：四舍五入到米
pub fn display_meters(distance: f64) -> i64 {
    distance.round() as i64
}

/// 展示用距离文本：1 km 以下显示米，以上显示公里
pub fn format_meters(distance: f64) -> String {
    if distance < 1000.0 {
        format!("{} m", display_meters(distance))
    } else {
        format!("{:.2} km", distance / 1000.0)
    }
}

/// 电子围栏：中心点加半径
#[derive(Debug, Clone, Copy)]
pub struct Geofence {
    pub center: GeoCenter,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(center: GeoCenter, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// 样本到围栏中心的距离（米，未取整）
    pub fn distance_to(&self, lat: f64, lng: f64) -> f64 {
        haversine_meters(self.center.lat, self.center.lng, lat, lng)
    }

    /// 围栏归属判定：距离等于半径时算在围栏内（闭区间）
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        self.distance_to(lat, lng) <= self.radius_m
    }
}
