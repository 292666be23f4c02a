// ==========================================
// 配件目录同步 - 导入执行器
// ==========================================
// 流程: 快照 → 载荷构造 → 原子写入（瞬时错误重试）→ 导入记录 → 基线 → 清理
// 红线:
// - 快照必须在任何写入之前完成
// - 任一失败路径数据库零变更（由单事务保证，不做应用层补偿）
// - 导入记录写入失败与数据写入失败分开上报
// ==========================================

use crate::domain::{
    natural_key, ChangeSet, ChildFields, DiffEntry, DiffOperation, DiffResult, EntityDiff,
    ImportRecord, ImportSummary, ParsedWorkbook, PartRef, RecordUpsert, TableChanges,
    WriteCounts, IMPORT_ACTOR,
};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::retry::{retry_with_backoff, RetryPolicy};
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::error::RepositoryError;
use crate::repository::import_history_repo::ImportHistoryRepository;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 默认保留的 ACTIVE 导入记录数
pub const DEFAULT_SNAPSHOT_RETENTION: usize = 10;

/// 上传文件元信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub imported_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub import_id: Uuid,
    pub summary: ImportSummary,
    pub duration_ms: u64,
    pub attempts: u32,
    pub write_counts: WriteCounts,
}

// ==========================================
// 载荷构造
// ==========================================

/// 子记录 PartRef::Sku → PartRef::Id
fn resolve_part(part: &PartRef, new_parts: &HashMap<String, Uuid>) -> ImportResult<PartRef> {
    match part {
        PartRef::Id(id) => Ok(PartRef::Id(*id)),
        PartRef::Sku(sku) => new_parts
            .get(&natural_key(sku))
            .map(|id| PartRef::Id(*id))
            .ok_or_else(|| ImportError::UnresolvedParent { sku: sku.clone() }),
    }
}

fn child_changes<F>(
    diff: &EntityDiff<F>,
    new_parts: &HashMap<String, Uuid>,
    with_part: impl Fn(&F, PartRef) -> F,
) -> ImportResult<TableChanges<F>>
where
    F: ChildFields + Clone,
{
    let mut changes = TableChanges::default();
    for entry in &diff.entries {
        let resolved = |after: &F| -> ImportResult<F> {
            Ok(with_part(after, resolve_part(after.part_ref(), new_parts)?))
        };
        match (entry.operation, entry.identity, &entry.after) {
            (DiffOperation::Add, _, Some(after)) => changes.inserts.push(RecordUpsert {
                id: Uuid::new_v4(),
                fields: resolved(after)?,
            }),
            (DiffOperation::Update, Some(id), Some(after)) => changes.updates.push(RecordUpsert {
                id,
                fields: resolved(after)?,
            }),
            (DiffOperation::Delete, Some(id), _) => changes.deletes.push(id),
            _ => {}
        }
    }
    Ok(changes)
}

/// 差异 → 原子写入载荷
///
/// 新增配件先分配身份，子记录对同批新增配件的 SKU 引用随后解析为该身份
pub fn build_change_set(diff: &DiffResult) -> ImportResult<ChangeSet> {
    let mut new_parts = HashMap::new();
    let mut parts = TableChanges::default();

    for entry in &diff.parts.entries {
        match entry {
            DiffEntry {
                operation: DiffOperation::Add,
                after: Some(after),
                ..
            } => {
                let id = Uuid::new_v4();
                new_parts.insert(natural_key(&after.sku), id);
                parts.inserts.push(RecordUpsert {
                    id,
                    fields: after.clone(),
                });
            }
            DiffEntry {
                operation: DiffOperation::Update,
                identity: Some(id),
                after: Some(after),
                ..
            } => parts.updates.push(RecordUpsert {
                id: *id,
                fields: after.clone(),
            }),
            DiffEntry {
                operation: DiffOperation::Delete,
                identity: Some(id),
                ..
            } => parts.deletes.push(*id),
            _ => {}
        }
    }

    Ok(ChangeSet {
        parts,
        vehicle_applications: child_changes(&diff.vehicle_applications, &new_parts, |f, part| {
            let mut f = f.clone();
            f.part = part;
            f
        })?,
        cross_references: child_changes(&diff.cross_references, &new_parts, |f, part| {
            let mut f = f.clone();
            f.part = part;
            f
        })?,
        aliases: child_changes(&diff.aliases, &new_parts, |f, part| {
            let mut f = f.clone();
            f.part = part;
            f
        })?,
    })
}

// ==========================================
// ImportExecutor
// ==========================================
pub struct ImportExecutor<C, H>
where
    C: CatalogRepository,
    H: ImportHistoryRepository,
{
    catalog: Arc<C>,
    history: Arc<H>,
    retry_policy: RetryPolicy,
    retention: usize,
}

impl<C, H> ImportExecutor<C, H>
where
    C: CatalogRepository,
    H: ImportHistoryRepository,
{
    pub fn new(catalog: Arc<C>, history: Arc<H>) -> Self {
        Self {
            catalog,
            history,
            retry_policy: RetryPolicy::default(),
            retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// 执行导入
    ///
    /// # 参数
    /// - parsed: 解析结果（用于统计导入行数）
    /// - diff: 差异结果（必须无 unresolved 行）
    /// - metadata: 文件元信息与操作者
    ///
    /// # 返回
    /// - Ok(ImportOutcome): 写入成功且导入记录已保存
    /// - Err(ImportError::HistoryWriteFailed): 数据已提交，但本次导入不可回滚
    /// - Err(其他): 数据库未发生任何变更
    #[instrument(skip_all, fields(file_name = %metadata.file_name, import_id = tracing::field::Empty))]
    pub async fn execute(
        &self,
        parsed: &ParsedWorkbook,
        diff: &DiffResult,
        metadata: ImportMetadata,
    ) -> ImportResult<ImportOutcome> {
        let start_time = Instant::now();
        let import_id = Uuid::new_v4();
        tracing::Span::current().record("import_id", tracing::field::display(import_id));
        info!(imported_by = %metadata.imported_by, "开始执行导入");

        let unresolved = diff.unresolved().len();
        if unresolved > 0 {
            warn!(unresolved, "存在无法归类的行，拒绝执行");
            return Err(ImportError::UnresolvedRows { count: unresolved });
        }

        // === 步骤 1: 写入前快照 ===
        debug!("步骤 1: 读取写入前快照");
        let snapshot = self.catalog.load_catalog().await.map_err(|e| {
            error!(error = %e, "快照读取失败");
            ImportError::SnapshotFailed(e.to_string())
        })?;

        // === 步骤 2: 构造载荷 ===
        debug!("步骤 2: 构造写入载荷");
        let changes = build_change_set(diff)?;
        let summary = changes.summary();
        debug!(
            adds = summary.adds,
            updates = summary.updates,
            deletes = summary.deletes,
            "载荷构造完成"
        );

        // === 步骤 3: 原子写入（瞬时错误重试）===
        debug!("步骤 3: 原子写入");
        let written_at = Utc::now();
        let written = retry_with_backoff(
            &self.retry_policy,
            RepositoryError::is_transient,
            |attempt| {
                debug!(attempt, "提交写入事务");
                self.catalog.apply_changes(&changes, IMPORT_ACTOR, written_at)
            },
        )
        .await
        .map_err(|failure| {
            error!(
                attempts = failure.attempts,
                retryable = failure.exhausted,
                error = %failure.error,
                "数据写入失败，数据库未变更"
            );
            ImportError::WriteFailed {
                attempts: failure.attempts,
                retryable: failure.exhausted,
                message: failure.error.to_string(),
            }
        })?;

        // === 步骤 4: 导入记录（事务之外）===
        debug!("步骤 4: 保存导入记录");
        let record = ImportRecord {
            id: import_id,
            created_at: written_at,
            file_name: metadata.file_name.clone(),
            file_size: metadata.file_size,
            rows_imported: parsed.total_rows(),
            summary,
            snapshot,
            imported_by: metadata.imported_by.clone(),
            is_baseline: false,
        };
        if let Err(e) = self.history.insert_record(&record).await {
            error!(error = %e, "导入记录保存失败，本次导入不可回滚");
            return Err(ImportError::HistoryWriteFailed {
                import_id,
                summary,
                message: e.to_string(),
            });
        }

        // === 步骤 5: 基线 / 清理（尽力而为）===
        self.ensure_baseline(&record).await;
        match self.history.prune_active(self.retention).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, retention = self.retention, "已清理过期导入记录"),
            Err(e) => warn!(error = %e, "导入记录清理失败"),
        }

        let duration_ms = start_time.elapsed().as_millis() as u64;
        info!(
            adds = summary.adds,
            updates = summary.updates,
            deletes = summary.deletes,
            attempts = written.attempts,
            duration_ms,
            "导入完成"
        );

        Ok(ImportOutcome {
            import_id,
            summary,
            duration_ms,
            attempts: written.attempts,
            write_counts: written.value,
        })
    }

    /// 首次导入时保留一份基线快照（不可回滚、不被清理）
    async fn ensure_baseline(&self, record: &ImportRecord) {
        match self.history.has_baseline().await {
            Ok(true) => {}
            Ok(false) => {
                let baseline = ImportRecord {
                    id: Uuid::new_v4(),
                    is_baseline: true,
                    ..record.clone()
                };
                match self.history.insert_record(&baseline).await {
                    Ok(()) => info!(baseline_id = %baseline.id, "已保存基线快照"),
                    Err(e) => warn!(error = %e, "基线快照保存失败"),
                }
            }
            Err(e) => warn!(error = %e, "基线快照查询失败"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CrossReferenceFields, EntityKind, PartFields};

    fn part(sku: &str) -> PartFields {
        PartFields {
            sku: sku.to_string(),
            name: "Rotor".to_string(),
            category: None,
            position: None,
            notes: None,
            image_url: None,
        }
    }

    fn diff_with(
        parts: Vec<DiffEntry<PartFields>>,
        xrefs: Vec<DiffEntry<CrossReferenceFields>>,
    ) -> DiffResult {
        let mut p = EntityDiff::new(EntityKind::Part);
        p.entries = parts;
        let mut x = EntityDiff::new(EntityKind::CrossReference);
        x.entries = xrefs;
        DiffResult::new(
            p,
            EntityDiff::new(EntityKind::VehicleApplication),
            x,
            EntityDiff::new(EntityKind::Alias),
        )
    }

    fn xref(part: PartRef) -> CrossReferenceFields {
        CrossReferenceFields {
            part,
            brand: "TRW".to_string(),
            reference_sku: "T-1".to_string(),
        }
    }

    #[test]
    fn test_forward_sku_reference_resolves_to_new_identity() {
        let diff = diff_with(
            vec![DiffEntry::add(Some(2), part("NEW-1"))],
            vec![DiffEntry::add(Some(2), xref(PartRef::Sku("new-1".to_string())))],
        );

        let changes = build_change_set(&diff).unwrap();
        let part_id = changes.parts.inserts[0].id;
        assert_eq!(changes.cross_references.inserts[0].fields.part, PartRef::Id(part_id));
        assert_eq!(changes.summary().adds, 2);
    }

    #[test]
    fn test_unresolvable_sku_fails_whole_change_set() {
        let diff = diff_with(
            vec![DiffEntry::add(Some(2), part("NEW-1"))],
            vec![DiffEntry::add(Some(3), xref(PartRef::Sku("GHOST".to_string())))],
        );

        let err = build_change_set(&diff).unwrap_err();
        assert!(matches!(err, ImportError::UnresolvedParent { sku } if sku == "GHOST"));
    }

    #[test]
    fn test_unchanged_entries_are_not_written() {
        let id = Uuid::new_v4();
        let diff = diff_with(
            vec![
                DiffEntry::compared(Some(2), id, part("A"), part("A"), vec![]),
                DiffEntry::delete(Some(3), Uuid::new_v4(), part("B")),
            ],
            vec![],
        );

        let changes = build_change_set(&diff).unwrap();
        assert!(changes.parts.updates.is_empty());
        assert_eq!(changes.parts.deletes.len(), 1);
    }
}
