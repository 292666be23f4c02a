// ==========================================
// 配件目录同步 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)，当前只使用 scope_id='global'
// 缺失或无法解析的值回落到默认值
// ==========================================

use crate::config::pipeline_config_trait::{ConfigResult, PipelineConfigReader};
use crate::db::open_sqlite_connection;
use crate::importer::retry::RetryPolicy;
use crate::importer::validator::ValidationRules;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

const GLOBAL_SCOPE: &str = "global";

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
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> ConfigResult<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?)
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（覆盖已有值）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// 列出 global scope 的全部配置（按键排序）
    pub fn list_global_config(&self) -> ConfigResult<BTreeMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config.insert(key, value);
        }
        Ok(config)
    }

    /// 读取并解析配置值；缺失或解析失败时返回默认值
    fn get_parsed_or<T: std::str::FromStr>(&self, key: &str, default: T) -> ConfigResult<T> {
        Ok(self
            .get_global_config_value(key)?
            .and_then(|v| v.trim().parse::<T>().ok())
            .unwrap_or(default))
    }
}

// ==========================================
// PipelineConfigReader 实现
// ==========================================
#[async_trait]
impl PipelineConfigReader for ConfigManager {
    async fn get_validation_rules(&self) -> ConfigResult<ValidationRules> {
        let defaults = ValidationRules::default();

        let year_min = self.get_parsed_or(config_keys::YEAR_MIN, defaults.year_min)?;
        let year_max_offset = self.get_parsed_or(config_keys::YEAR_MAX_OFFSET, 2)?;
        let year_max = Utc::now().year() + year_max_offset;

        Ok(ValidationRules {
            year_min,
            // 配置错误导致区间倒置时保留默认上限
            year_max: if year_max >= year_min {
                year_max
            } else {
                defaults.year_max
            },
            max_len_sku: self.get_parsed_or(config_keys::MAX_LEN_SKU, defaults.max_len_sku)?,
            max_len_name: self.get_parsed_or(config_keys::MAX_LEN_NAME, defaults.max_len_name)?,
            max_len_notes: self.get_parsed_or(config_keys::MAX_LEN_NOTES, defaults.max_len_notes)?,
            max_len_url: self.get_parsed_or(config_keys::MAX_LEN_URL, defaults.max_len_url)?,
            list_delete_prefix: self.get_list_delete_prefix().await?,
        })
    }

    async fn get_retry_policy(&self) -> ConfigResult<RetryPolicy> {
        let defaults = RetryPolicy::default();
        Ok(RetryPolicy {
            max_attempts: self
                .get_parsed_or(config_keys::RETRY_MAX_ATTEMPTS, defaults.max_attempts)?
                .max(1),
            initial_delay_ms: self
                .get_parsed_or(config_keys::RETRY_INITIAL_DELAY_MS, defaults.initial_delay_ms)?,
            max_delay_ms: self
                .get_parsed_or(config_keys::RETRY_MAX_DELAY_MS, defaults.max_delay_ms)?,
            multiplier: defaults.multiplier,
        })
    }

    async fn get_snapshot_retention(&self) -> ConfigResult<usize> {
        let value = self.get_parsed_or(
            config_keys::SNAPSHOT_RETENTION,
            crate::importer::executor::DEFAULT_SNAPSHOT_RETENTION,
        )?;
        // 至少保留 1 条，否则刚导入的记录会立即被清理
        Ok(value.max(1))
    }

    async fn get_list_delete_prefix(&self) -> ConfigResult<String> {
        let value = self.get_global_config_value(config_keys::LIST_DELETE_PREFIX)?;
        Ok(value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "DEL:".to_string()))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 年份范围
    pub const YEAR_MIN: &str = "year_min";
    pub const YEAR_MAX_OFFSET: &str = "year_max_offset"; // 当前年份 + offset

    // 快照保留
    pub const SNAPSHOT_RETENTION: &str = "snapshot_retention";

    // 写入重试
    pub const RETRY_MAX_ATTEMPTS: &str = "retry_max_attempts";
    pub const RETRY_INITIAL_DELAY_MS: &str = "retry_initial_delay_ms";
    pub const RETRY_MAX_DELAY_MS: &str = "retry_max_delay_ms";

    // 品牌列表删除前缀
    pub const LIST_DELETE_PREFIX: &str = "list_delete_prefix";

    // 字段长度
    pub const MAX_LEN_SKU: &str = "max_len_sku";
    pub const MAX_LEN_NAME: &str = "max_len_name";
    pub const MAX_LEN_NOTES: &str = "max_len_notes";
    pub const MAX_LEN_URL: &str = "max_len_url";
}
