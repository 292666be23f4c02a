// ==========================================
// 配件目录同步 - 目录领域模型
// ==========================================
// 职责: 已持久化记录 / 目录快照 / 自然键索引
// 对齐: db.rs 中 parts / vehicle_applications / cross_references / aliases 表
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// 自然键归一化（TRIM + UPPER），用于 SKU / 品牌 / 互换号比对
pub fn natural_key(value: &str) -> String {
    value.trim().to_uppercase()
}

// ==========================================
// PartRef - 子记录对父配件的引用
// ==========================================
// Id: 已知身份（已存在配件，或上传中带 _id 的配件）
// Sku: 同一次上传中新增、尚未分配身份的配件
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartRef {
    Id(Uuid),
    Sku(String),
}

impl PartRef {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            PartRef::Id(id) => Some(*id),
            PartRef::Sku(_) => None,
        }
    }
}

// ==========================================
// 各实体字段（不含身份与审计字段）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartFields {
    pub sku: String,               // 配件号（自然键）
    pub name: String,              // 名称
    pub category: Option<String>,  // 分类
    pub position: Option<String>,  // 安装位置
    pub notes: Option<String>,     // 备注
    pub image_url: Option<String>, // 图片链接
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleApplicationFields {
    pub part: PartRef,
    pub make: String,
    pub model: String,
    pub year_start: i32,
    pub year_end: i32,
    pub engine: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReferenceFields {
    pub part: PartRef,
    pub brand: String,
    pub reference_sku: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasFields {
    pub part: PartRef,
    pub alias: String,
    pub alias_type: Option<String>,
    pub notes: Option<String>,
}

// ==========================================
// 审计戳 / 已持久化记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub updated_at: DateTime<Utc>, // 最后修改时间
    pub updated_by: String,        // 最后修改操作者
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<F> {
    pub id: Uuid,
    pub fields: F,
    pub audit: AuditStamp,
}

pub type PartRecord = StoredRecord<PartFields>;
pub type VehicleApplicationRecord = StoredRecord<VehicleApplicationFields>;
pub type CrossReferenceRecord = StoredRecord<CrossReferenceFields>;
pub type AliasRecord = StoredRecord<AliasFields>;

/// 子记录公共访问：父配件身份
pub trait ChildFields {
    fn part_ref(&self) -> &PartRef;
}

impl ChildFields for VehicleApplicationFields {
    fn part_ref(&self) -> &PartRef {
        &self.part
    }
}

impl ChildFields for CrossReferenceFields {
    fn part_ref(&self) -> &PartRef {
        &self.part
    }
}

impl ChildFields for AliasFields {
    fn part_ref(&self) -> &PartRef {
        &self.part
    }
}

// ==========================================
// TableCounts - 各表行数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub parts: usize,
    pub vehicle_applications: usize,
    pub cross_references: usize,
    pub aliases: usize,
}

impl TableCounts {
    pub fn total(&self) -> usize {
        self.parts + self.vehicle_applications + self.cross_references + self.aliases
    }
}

// ==========================================
// CatalogSnapshot - 目录时点快照
// ==========================================
// 用途:
// - 校验 / 差异计算的只读 "existing" 输入
// - 导入前的回滚快照（随 import_history 持久化为 JSON）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub captured_at: DateTime<Utc>,
    pub parts: BTreeMap<Uuid, PartRecord>,
    pub vehicle_applications: BTreeMap<Uuid, VehicleApplicationRecord>,
    pub cross_references: BTreeMap<Uuid, CrossReferenceRecord>,
    pub aliases: BTreeMap<Uuid, AliasRecord>,
}

impl CatalogSnapshot {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            parts: BTreeMap::new(),
            vehicle_applications: BTreeMap::new(),
            cross_references: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// 已用 SKU 的自然键索引（natural_key(sku) → part id）
    pub fn sku_index(&self) -> HashMap<String, Uuid> {
        self.parts
            .values()
            .map(|p| (natural_key(&p.fields.sku), p.id))
            .collect()
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            parts: self.parts.len(),
            vehicle_applications: self.vehicle_applications.len(),
            cross_references: self.cross_references.len(),
            aliases: self.aliases.len(),
        }
    }

    /// 指定配件下现存的子记录数量（车型适配 + 互换号 + 别名）
    pub fn child_count(&self, part_id: Uuid) -> usize {
        let owned = |part: &PartRef| part.id() == Some(part_id);
        self.vehicle_applications
            .values()
            .filter(|r| owned(&r.fields.part))
            .count()
            + self
                .cross_references
                .values()
                .filter(|r| owned(&r.fields.part))
                .count()
            + self.aliases.values().filter(|r| owned(&r.fields.part)).count()
    }

    /// 指定配件 + 品牌下现存的互换号
    pub fn cross_references_for(&self, part_id: Uuid, brand: &str) -> Vec<&CrossReferenceRecord> {
        let brand_key = natural_key(brand);
        self.cross_references
            .values()
            .filter(|r| {
                r.fields.part.id() == Some(part_id) && natural_key(&r.fields.brand) == brand_key
            })
            .collect()
    }

    /// 现存互换号涉及的全部品牌（导出用，按自然键去重，保留首次出现的写法）
    pub fn brands(&self) -> Vec<String> {
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for record in self.cross_references.values() {
            seen.entry(natural_key(&record.fields.brand))
                .or_insert_with(|| record.fields.brand.trim().to_string());
        }
        seen.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp() -> AuditStamp {
        AuditStamp {
            updated_at: Utc::now(),
            updated_by: "alice".to_string(),
        }
    }

    #[test]
    fn test_sku_index_uses_natural_key() {
        let mut snapshot = CatalogSnapshot::empty(Utc::now());
        let id = Uuid::new_v4();
        snapshot.parts.insert(
            id,
            StoredRecord {
                id,
                fields: PartFields {
                    sku: " bp-100 ".to_string(),
                    name: "Brake Pad".to_string(),
                    category: None,
                    position: None,
                    notes: None,
                    image_url: None,
                },
                audit: stamp(),
            },
        );

        let index = snapshot.sku_index();
        assert_eq!(index.get("BP-100"), Some(&id));
    }

    #[test]
    fn test_cross_references_for_matches_brand_case_insensitively() {
        let mut snapshot = CatalogSnapshot::empty(Utc::now());
        let part_id = Uuid::new_v4();
        let xref_id = Uuid::new_v4();
        snapshot.cross_references.insert(
            xref_id,
            StoredRecord {
                id: xref_id,
                fields: CrossReferenceFields {
                    part: PartRef::Id(part_id),
                    brand: "Dorman".to_string(),
                    reference_sku: "D-1".to_string(),
                },
                audit: stamp(),
            },
        );

        assert_eq!(snapshot.cross_references_for(part_id, "DORMAN").len(), 1);
        assert_eq!(snapshot.cross_references_for(part_id, "TRW").len(), 0);
        assert_eq!(snapshot.child_count(part_id), 1);
        assert_eq!(snapshot.brands(), vec!["Dorman".to_string()]);
    }
}
