// ==========================================
// 配件目录同步 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod catalog_repo;
pub mod catalog_repo_impl;
pub mod error;
pub mod import_history_repo;

// 重导出核心仓储
pub use catalog_repo::CatalogRepository;
pub use catalog_repo_impl::SqliteCatalogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use import_history_repo::{ImportHistoryRepository, SqliteImportHistoryRepository};

use crate::db::{init_schema, open_sqlite_connection};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// 打开数据库并建表，返回可在各仓储之间共享的连接
pub fn open_shared_connection(db_path: &str) -> RepositoryResult<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
