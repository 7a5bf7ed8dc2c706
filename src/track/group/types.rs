//! 群组拉取接口的线上形态
//!
//! locations 端点历史上有两种返回形态：`{userId: location}` 映射和
//! `[{userId, location}]` 数组，这里对两种都兼容，并对坏条目做过滤。

use crate::track::types::GroupLocation;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

/// GET /api/groups/{id}/locations 响应
#[derive(Debug, Clone, Deserialize)]
pub struct LocationsResp {
    #[serde(default)]
    pub locations: LocationsWire,
}

/// locations 字段的两种线上形态
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LocationsWire {
    Map(HashMap<String, serde_json::Value>),
    List(Vec<serde_json::Value>),
}

impl Default for LocationsWire {
    fn default() -> Self {
        LocationsWire::Map(HashMap::new())
    }
}

/// 数组形态的单个条目
#[derive(Debug, Clone, Deserialize)]
pub struct LocationEntry {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub location: GroupLocation,
}

impl LocationsWire {
    /// 归一化成 userId → location 映射，坏条目跳过并告警
    pub fn into_map(self) -> HashMap<String, GroupLocation> {
        let mut result = HashMap::new();
        match self {
            LocationsWire::Map(entries) => {
                for (user_id, value) in entries {
                    match serde_json::from_value::<GroupLocation>(value) {
                        Ok(location) => {
                            result.insert(user_id, location);
                        }
                        Err(e) => {
                            warn!("[GroupAPI] 跳过无效定位条目: userId={}, {}", user_id, e);
                        }
                    }
                }
            }
            LocationsWire::List(entries) => {
                for value in entries {
                    match serde_json::from_value::<LocationEntry>(value) {
                        Ok(entry) => {
                            result.insert(entry.user_id, entry.location);
                        }
                        Err(e) => {
                            warn!("[GroupAPI] 跳过无效定位条目: {}", e);
                        }
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_shape_parses() {
        let raw = r#"{
            "locations": {
                "u1": {"lat": 39.0, "lng": 35.2433, "timestamp": 1000},
                "u2": {"lat": 41.0, "lng": 29.0, "timestamp": 2000}
            }
        }"#;
        let resp: LocationsResp = serde_json::from_str(raw).unwrap();
        let map = resp.locations.into_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["u2"].timestamp, 2000);
    }

    #[test]
    fn list_shape_parses() {
        let raw = r#"{
            "locations": [
                {"userId": "u1", "location": {"lat": 39.0, "lng": 35.2433, "timestamp": 1000}}
            ]
        }"#;
        let resp: LocationsResp = serde_json::from_str(raw).unwrap();
        let map = resp.locations.into_map();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("u1"));
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let raw = r#"{
            "locations": {
                "u1": {"lat": 39.0, "lng": 35.2433, "timestamp": 1000},
                "u2": {"lat": "broken"}
            }
        }"#;
        let resp: LocationsResp = serde_json::from_str(raw).unwrap();
        let map = resp.locations.into_map();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("u1"));
    }

    #[test]
    fn missing_locations_field_defaults_to_empty() {
        let resp: LocationsResp = serde_json::from_str("{}").unwrap();
        assert!(resp.locations.into_map().is_empty());
    }
}
