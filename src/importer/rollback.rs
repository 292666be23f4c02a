// ==========================================
// 配件目录同步 - 回滚服务
// ==========================================
// 状态机: ACTIVE →(回滚成功)→ 记录删除（CONSUMED）；基线记录 EXEMPT
// 步骤:
// 1. 顺序约束: 仅允许回滚最新的 ACTIVE 记录
// 2. 冲突检测: 导入之后被人工修改过的行阻止回滚
// 3. 原子恢复: 单事务清空并按父 → 子顺序写回快照
// 4. 删除已消费的导入记录（尽力而为，失败单独上报）
// ==========================================

use crate::domain::{ImportRecordInfo, RestoredCounts};
use crate::importer::error::{RollbackError, RollbackResult};
use crate::importer::retry::{retry_with_backoff, RetryPolicy};
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::error::RepositoryError;
use crate::repository::import_history_repo::ImportHistoryRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub import_id: Uuid,
    pub restored: RestoredCounts,
    /// 数据已恢复，但导入记录未能删除（需人工清理，避免重复回滚）
    pub record_cleanup_error: Option<String>,
}

pub struct RollbackService<C, H>
where
    C: CatalogRepository,
    H: ImportHistoryRepository,
{
    catalog: Arc<C>,
    history: Arc<H>,
    retry_policy: RetryPolicy,
}

impl<C, H> RollbackService<C, H>
where
    C: CatalogRepository,
    H: ImportHistoryRepository,
{
    pub fn new(catalog: Arc<C>, history: Arc<H>) -> Self {
        Self {
            catalog,
            history,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// 当前可回滚的导入（最新 ACTIVE 记录）
    pub async fn rollback_target(&self) -> RollbackResult<Option<ImportRecordInfo>> {
        Ok(self.history.list_active(Some(1)).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(import_id = %import_id))]
    pub async fn rollback(&self, import_id: Uuid) -> RollbackResult<RollbackOutcome> {
        info!("开始回滚导入");

        let record = self
            .history
            .get_record(import_id)
            .await
            .map_err(|e| match e {
                RepositoryError::SerializationError(message) => {
                    RollbackError::CorruptSnapshot(message)
                }
                other => RollbackError::Repository(other),
            })?
            .ok_or(RollbackError::NotFound(import_id))?;
        if record.is_baseline {
            return Err(RollbackError::BaselineNotRollbackable(import_id));
        }

        // === 步骤 1: 顺序约束 ===
        match self.rollback_target().await? {
            Some(latest) if latest.id != import_id => {
                warn!(most_recent = %latest.id, "请求回滚的不是最近一次导入");
                return Err(RollbackError::NotMostRecent {
                    requested: import_id,
                    most_recent: latest.id,
                });
            }
            Some(_) => {}
            None => return Err(RollbackError::NotFound(import_id)),
        }

        // === 步骤 2: 冲突检测 ===
        let conflicts = self.catalog.find_modified_since(record.created_at).await?;
        if !conflicts.is_empty() {
            warn!(conflicts = conflicts.len(), "导入之后存在人工修改，回滚已阻止");
            return Err(RollbackError::ConflictDetected {
                import_id,
                conflicts,
            });
        }

        // === 步骤 3: 原子恢复 ===
        let snapshot = &record.snapshot;
        let restored = retry_with_backoff(
            &self.retry_policy,
            RepositoryError::is_transient,
            |_| self.catalog.restore_snapshot(snapshot),
        )
        .await
        .map_err(|failure| {
            error!(attempts = failure.attempts, error = %failure.error, "快照恢复失败，数据未变更");
            RollbackError::RestoreFailed {
                attempts: failure.attempts,
                message: failure.error.to_string(),
            }
        })?
        .value;

        // === 步骤 4: 删除已消费记录 ===
        let record_cleanup_error = match self.history.delete_record(import_id).await {
            Ok(true) => None,
            Ok(false) => Some(format!("导入记录 {} 已不存在", import_id)),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = &record_cleanup_error {
            error!(reason = %reason, "数据已恢复，但导入记录未能删除");
        }

        info!(
            parts = restored.parts,
            vehicle_applications = restored.vehicle_applications,
            cross_references = restored.cross_references,
            aliases = restored.aliases,
            "回滚完成"
        );
        Ok(RollbackOutcome {
            import_id,
            restored,
            record_cleanup_error,
        })
    }
}
