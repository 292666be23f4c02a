// ==========================================
// 配件目录同步 - 导入记录 / 写入载荷模型
// ==========================================
// 对齐: db.rs import_history 表
// ==========================================

use crate::domain::catalog::{
    AliasFields, CatalogSnapshot, CrossReferenceFields, PartFields, TableCounts,
    VehicleApplicationFields,
};
use crate::domain::types::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// ImportSummary - 导入变更汇总
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub adds: usize,
    pub updates: usize,
    pub deletes: usize,
}

// ==========================================
// ImportRecord - 导入记录（回滚的唯一粒度）
// ==========================================
// 生命周期: ACTIVE → (回滚成功) 删除；基线记录 EXEMPT，永不删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub file_name: String,
    pub file_size: u64,
    pub rows_imported: usize,
    pub summary: ImportSummary,
    pub snapshot: CatalogSnapshot, // 写入前的完整快照
    pub imported_by: String,
    pub is_baseline: bool,
}

impl ImportRecord {
    pub fn state(&self) -> ImportRecordState {
        if self.is_baseline {
            ImportRecordState::Exempt
        } else {
            ImportRecordState::Active
        }
    }

    pub fn info(&self) -> ImportRecordInfo {
        ImportRecordInfo {
            id: self.id,
            created_at: self.created_at,
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            rows_imported: self.rows_imported,
            summary: self.summary,
            imported_by: self.imported_by.clone(),
            is_baseline: self.is_baseline,
        }
    }
}

/// 记录状态（CONSUMED 即记录已被删除，不再出现）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportRecordState {
    Active,
    Exempt,
}

/// 导入记录概要（不含快照，列表查询用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecordInfo {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub file_name: String,
    pub file_size: u64,
    pub rows_imported: usize,
    pub summary: ImportSummary,
    pub imported_by: String,
    pub is_baseline: bool,
}

// ==========================================
// ConflictingRecord - 回滚冲突行（导入后被人工修改）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingRecord {
    pub entity: EntityKind,
    pub id: Uuid,
    pub label: String, // 便于操作员定位（SKU / 车型 / 别名等）
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

// ==========================================
// ChangeSet - 原子写入载荷
// ==========================================
// 约束: 子记录 PartRef 必须已解析为 Id（由执行器负责）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpsert<F> {
    pub id: Uuid,
    pub fields: F,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableChanges<F> {
    pub inserts: Vec<RecordUpsert<F>>,
    pub updates: Vec<RecordUpsert<F>>,
    pub deletes: Vec<Uuid>,
}

impl<F> Default for TableChanges<F> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<F> TableChanges<F> {
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub parts: TableChanges<PartFields>,
    pub vehicle_applications: TableChanges<VehicleApplicationFields>,
    pub cross_references: TableChanges<CrossReferenceFields>,
    pub aliases: TableChanges<AliasFields>,
}

impl ChangeSet {
    pub fn summary(&self) -> ImportSummary {
        ImportSummary {
            adds: self.parts.inserts.len()
                + self.vehicle_applications.inserts.len()
                + self.cross_references.inserts.len()
                + self.aliases.inserts.len(),
            updates: self.parts.updates.len()
                + self.vehicle_applications.updates.len()
                + self.cross_references.updates.len()
                + self.aliases.updates.len(),
            deletes: self.parts.deletes.len()
                + self.vehicle_applications.deletes.len()
                + self.cross_references.deletes.len()
                + self.aliases.deletes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
            && self.vehicle_applications.is_empty()
            && self.cross_references.is_empty()
            && self.aliases.is_empty()
    }
}

// ==========================================
// WriteCounts - 原子写入返回的各表计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityWriteCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCounts {
    pub parts: EntityWriteCounts,
    pub vehicle_applications: EntityWriteCounts,
    pub cross_references: EntityWriteCounts,
    pub aliases: EntityWriteCounts,
}

/// 回滚恢复后的各表行数
pub type RestoredCounts = TableCounts;
