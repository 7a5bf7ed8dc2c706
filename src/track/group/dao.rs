//! 群组数据访问层（DAO）
//!
//! 两张表：成员花名册缓存（拉取失败时兜底展示）和不透明键值设置表
//! （共享偏好、活跃群组、本机用户标识）。

use crate::track::group::models::GroupMember;
use crate::track::types::GroupLocation;
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

/// 设置键只允许 [A-Za-z0-9_.-]，不能含冒号
pub fn share_persist_key(group_id: &str) -> String {
    format!("sharePersistent_{}", group_id)
}

/// 当前活跃群组 ID 的设置键
pub const ACTIVE_GROUP_KEY: &str = "activeGroupId";

/// 本机用户标识的设置键
pub const WORKER_ID_KEY: &str = "workerId";

/// 群组 DAO（基于 sqlx）
#[derive(Clone)]
pub struct GroupDao {
    db: Pool<Sqlite>,
}

impl GroupDao {
    /// 创建新的群组 DAO
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化数据库表结构
    pub async fn init_db(&self) -> Result<()> {
        Self::init_db_with_connection(&self.db).await
    }

    /// 使用共享连接初始化数据库表结构（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        info!("[GroupDAO/DB] 初始化群组数据库表结构");

        let sql1 = r#"
            CREATE TABLE IF NOT EXISTS local_group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'member',
                is_online INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER,
                location_json TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (group_id, user_id)
            )
        "#;
        sqlx::query(sql1)
            .execute(db)
            .await
            .context("创建成员缓存表失败")?;

        let sql2 = r#"
            CREATE TABLE IF NOT EXISTS local_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL DEFAULT ''
            )
        "#;
        sqlx::query(sql2)
            .execute(db)
            .await
            .context("创建设置表失败")?;

        info!("[GroupDAO/DB] 数据库表初始化完成");
        Ok(())
    }

    /// 读取某群组的花名册缓存
    pub async fn get_members(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, display_name, role, is_online, last_seen, location_json
            FROM local_group_members
            WHERE group_id = ?
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await
        .context("查询成员缓存失败")?;

        let members: Vec<GroupMember> = rows
            .into_iter()
            .map(|row| {
                let is_online: i64 = row.get("is_online");
                let location_json: String = row.get("location_json");
                let location = if location_json.is_empty() {
                    None
                } else {
                    serde_json::from_str::<GroupLocation>(&location_json).ok()
                };

                GroupMember {
                    user_id: row.get("user_id"),
                    display_name: row.get("display_name"),
                    role: row.get("role"),
                    is_online: is_online != 0,
                    last_seen: row.get("last_seen"),
                    location,
                    distance_from_center: None,
                    in_work_area: None,
                }
            })
            .collect();

        debug!(
            "[GroupDAO] 读取成员缓存，群组: {}, 共 {} 个成员",
            group_id,
            members.len()
        );
        Ok(members)
    }

    /// 整体重写某群组的花名册缓存（拉取成功后调用）
    pub async fn save_members(&self, group_id: &str, members: &[GroupMember]) -> Result<()> {
        let mut tx = self.db.begin().await.context("开启事务失败")?;

        sqlx::query("DELETE FROM local_group_members WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .context("清空成员缓存失败")?;

        for member in members {
            let location_json = match &member.location {
                Some(location) => serde_json::to_string(location)?,
                None => String::new(),
            };
            sqlx::query(
                r#"
                INSERT INTO local_group_members (
                    group_id, user_id, display_name, role, is_online, last_seen, location_json
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(group_id)
            .bind(&member.user_id)
            .bind(&member.display_name)
            .bind(&member.role)
            .bind(if member.is_online { 1 } else { 0 })
            .bind(member.last_seen)
            .bind(&location_json)
            .execute(&mut *tx)
            .await
            .context("写入成员缓存失败")?;
        }

        tx.commit().await.context("提交事务失败")?;
        debug!(
            "[GroupDAO] 成员缓存已重写，群组: {}, 共 {} 个成员",
            group_id,
            members.len()
        );
        Ok(())
    }

    /// 删除某群组的花名册缓存
    pub async fn delete_members(&self, group_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_group_members WHERE group_id = ?")
            .bind(group_id)
            .execute(&self.db)
            .await
            .context("删除成员缓存失败")?;
        Ok(())
    }

    /// 读取设置项
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM local_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .context("查询设置项失败")?;
        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    /// 写入设置项
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await
        .context("写入设置项失败")?;
        Ok(())
    }

    /// 删除设置项
    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_settings WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .context("删除设置项失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> Pool<Sqlite> {
        // 内存库每个连接各一份，限制单连接保证看到同一份数据
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn member(user_id: &str, with_location: bool) -> GroupMember {
        GroupMember {
            user_id: user_id.to_string(),
            display_name: format!("成员{}", user_id),
            role: "member".to_string(),
            is_online: true,
            last_seen: Some(1_700_000_000_000),
            location: with_location.then(|| GroupLocation {
                lat: 39.0,
                lng: 35.2433,
                heading: None,
                accuracy: Some(8.0),
                timestamp: 1_700_000_000_000,
            }),
            distance_from_center: None,
            in_work_area: None,
        }
    }

    #[tokio::test]
    async fn roster_cache_roundtrip() {
        let db = memory_pool().await;
        GroupDao::init_db_with_connection(&db).await.unwrap();
        let dao = GroupDao::new(db);

        dao.save_members("g1", &[member("u1", true), member("u2", false)])
            .await
            .unwrap();

        let cached = dao.get_members("g1").await.unwrap();
        assert_eq!(cached.len(), 2);
        let u1 = cached.iter().find(|m| m.user_id == "u1").unwrap();
        assert!(u1.location.is_some());
        let u2 = cached.iter().find(|m| m.user_id == "u2").unwrap();
        assert!(u2.location.is_none());

        // 重写是整体替换
        dao.save_members("g1", &[member("u3", false)]).await.unwrap();
        let cached = dao.get_members("g1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].user_id, "u3");

        dao.delete_members("g1").await.unwrap();
        assert!(dao.get_members("g1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn settings_lifecycle() {
        let db = memory_pool().await;
        GroupDao::init_db_with_connection(&db).await.unwrap();
        let dao = GroupDao::new(db);

        let key = share_persist_key("g1");
        assert_eq!(dao.get_setting(&key).await.unwrap(), None);

        dao.set_setting(&key, "1").await.unwrap();
        assert_eq!(dao.get_setting(&key).await.unwrap(), Some("1".to_string()));

        dao.set_setting(&key, "0").await.unwrap();
        assert_eq!(dao.get_setting(&key).await.unwrap(), Some("0".to_string()));

        dao.delete_setting(&key).await.unwrap();
        assert_eq!(dao.get_setting(&key).await.unwrap(), None);
    }
}
