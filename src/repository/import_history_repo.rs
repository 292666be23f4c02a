// ==========================================
// 配件目录同步 - 导入历史数据仓储
// ==========================================
// 表: import_history（每次成功导入一条，含写入前快照 JSON）
// 排序: created_at DESC, rowid DESC（同一时刻的记录按插入顺序区分新旧）
// 基线记录 is_baseline = 1: 不参与回滚顺序、不被清理、不可删除
// ==========================================

use crate::db::{format_ts, open_sqlite_connection, parse_ts};
use crate::domain::{CatalogSnapshot, ImportRecord, ImportRecordInfo, ImportSummary};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ==========================================
// ImportHistoryRepository Trait
// ==========================================
#[async_trait]
pub trait ImportHistoryRepository: Send + Sync {
    async fn insert_record(&self, record: &ImportRecord) -> RepositoryResult<()>;

    /// 按 id 读取完整记录（含快照）
    async fn get_record(&self, id: Uuid) -> RepositoryResult<Option<ImportRecord>>;

    /// ACTIVE 记录概要，最新在前（limit 为 None 时返回全部）
    async fn list_active(&self, limit: Option<usize>) -> RepositoryResult<Vec<ImportRecordInfo>>;

    /// 删除 ACTIVE 记录；返回是否删除了记录
    async fn delete_record(&self, id: Uuid) -> RepositoryResult<bool>;

    /// 仅保留最新 keep 条 ACTIVE 记录，返回清理条数
    async fn prune_active(&self, keep: usize) -> RepositoryResult<usize>;

    async fn has_baseline(&self) -> RepositoryResult<bool>;
}

// ==========================================
// SqliteImportHistoryRepository
// ==========================================
pub struct SqliteImportHistoryRepository {
    conn: Arc<Mutex<Connection>>,
}

const INFO_COLUMNS: &str = "id, created_at, file_name, file_size, rows_imported, \
                            adds, updates, deletes, imported_by, is_baseline";

fn map_info(row: &Row) -> rusqlite::Result<ImportRecordInfo> {
    let raw_id: String = row.get(0)?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let raw_created: String = row.get(1)?;
    let created_at = parse_ts(&raw_created)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(ImportRecordInfo {
        id,
        created_at,
        file_name: row.get(2)?,
        file_size: row.get::<_, i64>(3)? as u64,
        rows_imported: row.get::<_, i64>(4)? as usize,
        summary: ImportSummary {
            adds: row.get::<_, i64>(5)? as usize,
            updates: row.get::<_, i64>(6)? as usize,
            deletes: row.get::<_, i64>(7)? as usize,
        },
        imported_by: row.get(8)?,
        is_baseline: row.get::<_, i64>(9)? != 0,
    })
}

impl SqliteImportHistoryRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

#[async_trait]
impl ImportHistoryRepository for SqliteImportHistoryRepository {
    async fn insert_record(&self, record: &ImportRecord) -> RepositoryResult<()> {
        let snapshot_json = serde_json::to_string(&record.snapshot)?;
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO import_history (
                id, created_at, file_name, file_size, rows_imported,
                adds, updates, deletes, snapshot_json, imported_by, is_baseline
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.id.to_string(),
                format_ts(&record.created_at),
                record.file_name,
                record.file_size as i64,
                record.rows_imported as i64,
                record.summary.adds as i64,
                record.summary.updates as i64,
                record.summary.deletes as i64,
                snapshot_json,
                record.imported_by,
                record.is_baseline as i64,
            ],
        )?;
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> RepositoryResult<Option<ImportRecord>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {}, snapshot_json FROM import_history WHERE id = ?1",
                    INFO_COLUMNS
                ),
                params![id.to_string()],
                |row| Ok((map_info(row)?, row.get::<_, String>(10)?)),
            )
            .optional()?;

        let Some((info, snapshot_json)) = row else {
            return Ok(None);
        };
        let snapshot: CatalogSnapshot = serde_json::from_str(&snapshot_json)?;
        Ok(Some(ImportRecord {
            id: info.id,
            created_at: info.created_at,
            file_name: info.file_name,
            file_size: info.file_size,
            rows_imported: info.rows_imported,
            summary: info.summary,
            snapshot,
            imported_by: info.imported_by,
            is_baseline: info.is_baseline,
        }))
    }

    async fn list_active(&self, limit: Option<usize>) -> RepositoryResult<Vec<ImportRecordInfo>> {
        let conn = self.get_conn()?;
        // LIMIT -1 即不限
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_history
             WHERE is_baseline = 0
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
            INFO_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![limit], map_info)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn delete_record(&self, id: Uuid) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM import_history WHERE id = ?1 AND is_baseline = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    async fn prune_active(&self, keep: usize) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            DELETE FROM import_history
            WHERE is_baseline = 0
              AND id NOT IN (
                  SELECT id FROM import_history
                  WHERE is_baseline = 0
                  ORDER BY created_at DESC, rowid DESC
                  LIMIT ?1
              )
            "#,
            params![keep as i64],
        )?;
        Ok(affected)
    }

    async fn has_baseline(&self) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM import_history WHERE is_baseline = 1 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
