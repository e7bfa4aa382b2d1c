// ==========================================
// 物料库存预留系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::reservation_config_trait::{ConfigError, ReservationConfigReader};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, ConfigError> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, ConfigError> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 启动时记录生效配置，便于排查
    pub fn get_config_snapshot(&self) -> Result<String, ConfigError> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }
}

// ==========================================
// ReservationConfigReader Trait 实现
// ==========================================
#[async_trait]
impl ReservationConfigReader for ConfigManager {
    async fn get_reserve_timeout_ms(&self) -> Result<u64, ConfigError> {
        let value = self.get_config_or_default(config_keys::RESERVE_TIMEOUT_MS, "5000")?;
        match value.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Ok(ms),
            _ => {
                tracing::warn!(
                    config_key = config_keys::RESERVE_TIMEOUT_MS,
                    raw_value = %value,
                    "预留超时配置非法，使用默认值 5000ms"
                );
                Ok(5000)
            }
        }
    }

    async fn get_default_currency(&self) -> Result<String, ConfigError> {
        let value = self.get_config_or_default(config_keys::DEFAULT_CURRENCY, "CNY")?;
        let trimmed = value.trim().to_uppercase();
        if trimmed.is_empty() {
            Ok("CNY".to_string())
        } else {
            Ok(trimmed)
        }
    }

    async fn get_allow_partial_usage(&self) -> Result<bool, ConfigError> {
        let value = self.get_config_or_default(config_keys::ALLOW_PARTIAL_USAGE, "true")?;
        Ok(!matches!(
            value.trim().to_lowercase().as_str(),
            "false" | "0" | "no" | "off"
        ))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 批量预留总超时（毫秒）
    pub const RESERVE_TIMEOUT_MS: &str = "reservation/reserve_timeout_ms";

    // 默认币种
    pub const DEFAULT_CURRENCY: &str = "reservation/default_currency";

    // 是否允许登记部分用量
    pub const ALLOW_PARTIAL_USAGE: &str = "reservation/allow_partial_usage";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults() {
        let config = setup();
        assert_eq!(config.get_reserve_timeout_ms().await.unwrap(), 5000);
        assert_eq!(config.get_default_currency().await.unwrap(), "CNY");
        assert!(config.get_allow_partial_usage().await.unwrap());
    }

    #[tokio::test]
    async fn test_overrides_and_invalid_values() {
        let config = setup();

        config.set_global_config_value(config_keys::RESERVE_TIMEOUT_MS, "250").unwrap();
        config.set_global_config_value(config_keys::DEFAULT_CURRENCY, " eur ").unwrap();
        config.set_global_config_value(config_keys::ALLOW_PARTIAL_USAGE, "off").unwrap();

        assert_eq!(config.get_reserve_timeout_ms().await.unwrap(), 250);
        assert_eq!(config.get_default_currency().await.unwrap(), "EUR");
        assert!(!config.get_allow_partial_usage().await.unwrap());

        config.set_global_config_value(config_keys::RESERVE_TIMEOUT_MS, "abc").unwrap();
        assert_eq!(config.get_reserve_timeout_ms().await.unwrap(), 5000);
    }

    #[test]
    fn test_snapshot_contains_keys() {
        let config = setup();
        config.set_global_config_value(config_keys::DEFAULT_CURRENCY, "USD").unwrap();

        let snapshot = config.get_config_snapshot().unwrap();
        let map: HashMap<String, String> = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(map.get(config_keys::DEFAULT_CURRENCY), Some(&"USD".to_string()));
    }
}
