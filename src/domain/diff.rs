// ==========================================
// 配件目录同步 - 差异结果模型
// ==========================================
// 不变量:
// - ADD: 仅 after
// - DELETE: 仅 before
// - UPDATE: before + after + 非空 changed_fields
// - UNCHANGED: before + after + 空 changed_fields
// ==========================================

use crate::domain::catalog::{
    AliasFields, CrossReferenceFields, PartFields, VehicleApplicationFields,
};
use crate::domain::types::{DiffOperation, EntityKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// DiffEntry - 单条差异
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry<F> {
    pub operation: DiffOperation,
    pub row_number: Option<usize>, // 来源行号（级联删除等无来源行时为 None）
    pub identity: Option<Uuid>,    // 已持久化记录身份（ADD 为 None）
    pub before: Option<F>,
    pub after: Option<F>,
    pub changed_fields: Vec<String>,
}

impl<F> DiffEntry<F> {
    pub fn add(row_number: Option<usize>, after: F) -> Self {
        Self {
            operation: DiffOperation::Add,
            row_number,
            identity: None,
            before: None,
            after: Some(after),
            changed_fields: Vec::new(),
        }
    }

    pub fn delete(row_number: Option<usize>, identity: Uuid, before: F) -> Self {
        Self {
            operation: DiffOperation::Delete,
            row_number,
            identity: Some(identity),
            before: Some(before),
            after: None,
            changed_fields: Vec::new(),
        }
    }

    /// 根据 changed_fields 自动归类为 UPDATE 或 UNCHANGED
    pub fn compared(
        row_number: Option<usize>,
        identity: Uuid,
        before: F,
        after: F,
        changed_fields: Vec<String>,
    ) -> Self {
        let operation = if changed_fields.is_empty() {
            DiffOperation::Unchanged
        } else {
            DiffOperation::Update
        };
        Self {
            operation,
            row_number,
            identity: Some(identity),
            before: Some(before),
            after: Some(after),
            changed_fields,
        }
    }
}

// ==========================================
// UnresolvedRow - 无法归类的行（不静默丢弃）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedRow {
    pub sheet: String,
    pub row_number: usize,
    pub identity: Option<String>,
    pub reason: String,
}

// ==========================================
// ChangeCounts - 计数汇总
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub adds: usize,
    pub updates: usize,
    pub deletes: usize,
    pub unchanged: usize,
}

impl ChangeCounts {
    pub fn has_changes(&self) -> bool {
        self.adds + self.updates + self.deletes > 0
    }

    fn accumulate(&mut self, other: &ChangeCounts) {
        self.adds += other.adds;
        self.updates += other.updates;
        self.deletes += other.deletes;
        self.unchanged += other.unchanged;
    }
}

// ==========================================
// EntityDiff - 单实体差异
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDiff<F> {
    pub entity: EntityKind,
    pub entries: Vec<DiffEntry<F>>,
    pub unresolved: Vec<UnresolvedRow>,
}

impl<F> EntityDiff<F> {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            entries: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    pub fn with_operation(&self, operation: DiffOperation) -> impl Iterator<Item = &DiffEntry<F>> {
        self.entries.iter().filter(move |e| e.operation == operation)
    }

    pub fn counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for entry in &self.entries {
            match entry.operation {
                DiffOperation::Add => counts.adds += 1,
                DiffOperation::Update => counts.updates += 1,
                DiffOperation::Delete => counts.deletes += 1,
                DiffOperation::Unchanged => counts.unchanged += 1,
            }
        }
        counts
    }

    /// 某身份是否已有差异条目
    pub fn contains_identity(&self, id: Uuid) -> bool {
        self.entries.iter().any(|e| e.identity == Some(id))
    }
}

// ==========================================
// DiffSummary / DiffResult
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub parts: ChangeCounts,
    pub vehicle_applications: ChangeCounts,
    pub cross_references: ChangeCounts,
    pub aliases: ChangeCounts,
    pub total: ChangeCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub parts: EntityDiff<PartFields>,
    pub vehicle_applications: EntityDiff<VehicleApplicationFields>,
    pub cross_references: EntityDiff<CrossReferenceFields>,
    pub aliases: EntityDiff<AliasFields>,
    pub summary: DiffSummary,
}

impl DiffResult {
    /// 组装结果并计算汇总
    pub fn new(
        parts: EntityDiff<PartFields>,
        vehicle_applications: EntityDiff<VehicleApplicationFields>,
        cross_references: EntityDiff<CrossReferenceFields>,
        aliases: EntityDiff<AliasFields>,
    ) -> Self {
        let mut summary = DiffSummary {
            parts: parts.counts(),
            vehicle_applications: vehicle_applications.counts(),
            cross_references: cross_references.counts(),
            aliases: aliases.counts(),
            total: ChangeCounts::default(),
        };
        let per_entity = [
            summary.parts,
            summary.vehicle_applications,
            summary.cross_references,
            summary.aliases,
        ];
        for counts in &per_entity {
            summary.total.accumulate(counts);
        }

        Self {
            parts,
            vehicle_applications,
            cross_references,
            aliases,
            summary,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.summary.total.has_changes()
    }

    pub fn unresolved(&self) -> Vec<&UnresolvedRow> {
        self.parts
            .unresolved
            .iter()
            .chain(self.vehicle_applications.unresolved.iter())
            .chain(self.cross_references.unresolved.iter())
            .chain(self.aliases.unresolved.iter())
            .collect()
    }
}
