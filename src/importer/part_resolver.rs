// ==========================================
// 配件目录同步 - 父配件引用解析
// ==========================================
// 校验器与差异引擎共用，保证两者对子记录归属的判断一致
// 优先级: _part_id > Part SKU（上传中的配件 > 已存在配件）
// ==========================================

use crate::domain::{natural_key, CatalogSnapshot, ParentColumns, ParsedPart, PartRef};
use crate::importer::data_cleaner::normalize_cell;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// 子记录解析出的父配件
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParentKey {
    Existing(Uuid), // 已持久化配件
    New(String),    // 同批新增配件（自然键）
}

impl ParentKey {
    pub fn to_part_ref(&self) -> PartRef {
        match self {
            ParentKey::Existing(id) => PartRef::Id(*id),
            ParentKey::New(sku) => PartRef::Sku(sku.clone()),
        }
    }
}

impl From<&PartRef> for ParentKey {
    fn from(part: &PartRef) -> Self {
        match part {
            PartRef::Id(id) => ParentKey::Existing(*id),
            PartRef::Sku(sku) => ParentKey::New(natural_key(sku)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentResolution {
    Resolved(ParentKey),
    InvalidIdentity(String), // _part_id 不是合法 UUID
    NotFound(String),        // 引用的身份 / SKU 不存在
    Missing,                 // 未提供父引用
}

/// 行身份文本 → UUID（格式非法返回 None）
pub fn parse_identity(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

pub struct PartResolver<'a> {
    existing: &'a CatalogSnapshot,
    existing_skus: HashMap<String, Uuid>,
    upload_skus: HashMap<String, ParentKey>,
    deleted: HashSet<Uuid>,
    renamed: HashSet<Uuid>,
}

impl<'a> PartResolver<'a> {
    pub fn new(parts: &[ParsedPart], existing: &'a CatalogSnapshot) -> Self {
        let mut upload_skus = HashMap::new();
        let mut deleted = HashSet::new();
        let mut renamed = HashSet::new();

        for row in parts {
            let identity = row.meta.identity.as_deref().map(parse_identity);
            if row.meta.is_delete() {
                if let Some(Some(id)) = identity {
                    if existing.parts.contains_key(&id) {
                        deleted.insert(id);
                    }
                }
                continue;
            }

            let Some(sku) = row.sku.as_ref().map(normalize_cell).filter(|s| !s.is_empty()) else {
                continue;
            };
            let key = natural_key(&sku);
            let parent = match identity {
                None => ParentKey::New(key.clone()),
                Some(Some(id)) => match existing.parts.get(&id) {
                    Some(record) => {
                        if natural_key(&record.fields.sku) != key {
                            renamed.insert(id);
                        }
                        ParentKey::Existing(id)
                    }
                    None => continue,
                },
                Some(_) => continue,
            };
            upload_skus.entry(key).or_insert(parent);
        }

        Self {
            existing,
            existing_skus: existing.sku_index(),
            upload_skus,
            deleted,
            renamed,
        }
    }

    /// 解析子记录的父配件引用
    pub fn resolve(&self, parent: &ParentColumns) -> ParentResolution {
        if let Some(raw) = parent.part_identity.as_deref() {
            return match parse_identity(raw) {
                None => ParentResolution::InvalidIdentity(raw.to_string()),
                Some(id) if self.existing.parts.contains_key(&id) => {
                    ParentResolution::Resolved(ParentKey::Existing(id))
                }
                Some(_) => ParentResolution::NotFound(raw.to_string()),
            };
        }

        let sku = parent
            .part_sku
            .as_ref()
            .map(normalize_cell)
            .filter(|s| !s.is_empty());
        match sku {
            Some(sku) => {
                let key = natural_key(&sku);
                if let Some(found) = self.upload_skus.get(&key) {
                    ParentResolution::Resolved(found.clone())
                } else if let Some(id) = self.existing_skus.get(&key) {
                    ParentResolution::Resolved(ParentKey::Existing(*id))
                } else {
                    ParentResolution::NotFound(sku)
                }
            }
            None => ParentResolution::Missing,
        }
    }

    /// 该已存在配件是否在本次上传中被删除
    pub fn is_deleted(&self, id: Uuid) -> bool {
        self.deleted.contains(&id)
    }

    /// 该已存在配件是否在本次上传中改用了其他 SKU
    pub fn is_renamed(&self, id: Uuid) -> bool {
        self.renamed.contains(&id)
    }

    pub fn deleted_parts(&self) -> &HashSet<Uuid> {
        &self.deleted
    }

    /// 解析结果是否指向被删除的配件
    pub fn points_to_deleted(&self, key: &ParentKey) -> bool {
        matches!(key, ParentKey::Existing(id) if self.is_deleted(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AuditStamp, CellValue, PartFields, RowMeta, StoredRecord, ActionMarker,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn part_row(identity: Option<Uuid>, sku: &str, delete: bool) -> ParsedPart {
        ParsedPart {
            meta: RowMeta {
                row_number: 2,
                identity: identity.map(|id| id.to_string()),
                action: if delete { Some(ActionMarker::Delete) } else { None },
            },
            sku: Some(CellValue::Text(sku.to_string())),
            name: None,
            category: None,
            position: None,
            notes: None,
            image_url: None,
            brand_lists: BTreeMap::new(),
        }
    }

    fn snapshot_with(id: Uuid, sku: &str) -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::empty(Utc::now());
        snapshot.parts.insert(
            id,
            StoredRecord {
                id,
                fields: PartFields {
                    sku: sku.to_string(),
                    name: "Existing".to_string(),
                    category: None,
                    position: None,
                    notes: None,
                    image_url: None,
                },
                audit: AuditStamp {
                    updated_at: Utc::now(),
                    updated_by: "system:import".to_string(),
                },
            },
        );
        snapshot
    }

    fn by_sku(sku: &str) -> ParentColumns {
        ParentColumns {
            part_identity: None,
            part_sku: Some(CellValue::Text(sku.to_string())),
        }
    }

    #[test]
    fn test_resolve_new_and_existing_sku() {
        let existing_id = Uuid::new_v4();
        let snapshot = snapshot_with(existing_id, "OLD-1");
        let rows = vec![part_row(None, "new-1", false)];
        let resolver = PartResolver::new(&rows, &snapshot);

        assert_eq!(
            resolver.resolve(&by_sku("NEW-1")),
            ParentResolution::Resolved(ParentKey::New("NEW-1".to_string()))
        );
        assert_eq!(
            resolver.resolve(&by_sku("old-1")),
            ParentResolution::Resolved(ParentKey::Existing(existing_id))
        );
        assert_eq!(
            resolver.resolve(&by_sku("GHOST")),
            ParentResolution::NotFound("GHOST".to_string())
        );
        assert_eq!(resolver.resolve(&ParentColumns::default()), ParentResolution::Missing);
    }

    #[test]
    fn test_part_identity_takes_precedence() {
        let existing_id = Uuid::new_v4();
        let snapshot = snapshot_with(existing_id, "OLD-1");
        let resolver = PartResolver::new(&[], &snapshot);

        let parent = ParentColumns {
            part_identity: Some(existing_id.to_string()),
            part_sku: Some(CellValue::Text("SOMETHING-ELSE".to_string())),
        };
        assert_eq!(
            resolver.resolve(&parent),
            ParentResolution::Resolved(ParentKey::Existing(existing_id))
        );

        let invalid = ParentColumns {
            part_identity: Some("not-a-uuid".to_string()),
            part_sku: None,
        };
        assert!(matches!(
            resolver.resolve(&invalid),
            ParentResolution::InvalidIdentity(_)
        ));
    }

    #[test]
    fn test_deleted_parts_are_tracked() {
        let existing_id = Uuid::new_v4();
        let snapshot = snapshot_with(existing_id, "OLD-1");
        let rows = vec![part_row(Some(existing_id), "OLD-1", true)];
        let resolver = PartResolver::new(&rows, &snapshot);

        assert!(resolver.is_deleted(existing_id));
        assert!(resolver.points_to_deleted(&ParentKey::Existing(existing_id)));
    }
}
