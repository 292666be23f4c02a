// ==========================================
// 配件目录同步 - 目录数据 Repository Trait
// ==========================================
// 职责: 定义目录四张表的数据访问接口（不包含业务逻辑）
// 红线: 多表写入 / 快照恢复必须在单个事务内完成，失败则零变更
// ==========================================

use crate::domain::{
    CatalogSnapshot, ChangeSet, ConflictingRecord, RestoredCounts, TableCounts, WriteCounts,
};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// ==========================================
// CatalogRepository Trait
// ==========================================
// 实现者: SqliteCatalogRepository（使用 rusqlite）
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// 读取全部目录数据（校验 / 差异计算 / 回滚快照的输入）
    async fn load_catalog(&self) -> RepositoryResult<CatalogSnapshot>;

    /// 原子多表写入
    ///
    /// # 参数
    /// - changes: 各实体的新增 / 更新 / 删除载荷（子记录父引用已解析为 Id）
    /// - actor: 写入行的 updated_by
    /// - written_at: 写入行的 updated_at
    ///
    /// # 返回
    /// - Ok(WriteCounts): 各表写入计数
    /// - Err: 任一语句失败，整个事务回滚
    ///
    /// 顺序: 删除（子 → 父），再写入（父 → 子）；同一载荷重复提交结果不变
    async fn apply_changes(
        &self,
        changes: &ChangeSet,
        actor: &str,
        written_at: DateTime<Utc>,
    ) -> RepositoryResult<WriteCounts>;

    /// 原子恢复快照: 清空四张表后按父 → 子顺序原样插入快照行
    async fn restore_snapshot(&self, snapshot: &CatalogSnapshot)
        -> RepositoryResult<RestoredCounts>;

    /// 查询 since 之后被人工操作者修改过的行（回滚冲突检测）
    async fn find_modified_since(
        &self,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ConflictingRecord>>;

    /// 各表行数
    async fn count_rows(&self) -> RepositoryResult<TableCounts>;
}
