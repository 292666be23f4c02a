// ==========================================
// 配件目录同步 - 字段映射器实现
// ==========================================
// 职责: 原始行（列键 → 单元格值）→ 各实体解析行
// 规则:
// - 空白单元格在原始行中不存在 → 字段为 None
// - 身份列（_id / _part_id）之外没有任何非空单元格的行被丢弃
// ==========================================

use crate::domain::workbook::columns;
use crate::domain::{
    ActionMarker, CellValue, EntityKind, ParentColumns, ParsedAlias, ParsedCrossReference,
    ParsedPart, ParsedVehicleApplication, RowMeta,
};
use crate::importer::pipeline_trait::FieldMapper as FieldMapperTrait;
use std::collections::{BTreeMap, HashMap};

// ==========================================
// RawRow - 解析器输出的原始行
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub row_number: usize,                      // 工作表行号（1 基）
    pub cells: HashMap<String, CellValue>,      // 规范列键 → 值（空白单元格不出现）
    pub brand_cells: BTreeMap<String, CellValue>, // 品牌名 → 值（仅 Parts 表）
}

impl RawRow {
    fn take(&mut self, key: &str) -> Option<CellValue> {
        self.cells.remove(key)
    }

    fn take_text(&mut self, key: &str) -> Option<String> {
        self.take(key)
            .map(|v| v.to_text())
            .filter(|s| !s.is_empty())
    }

    /// 是否存在身份列以外的非空单元格
    fn has_content(&self) -> bool {
        let populated = |v: &CellValue| !v.is_empty_text();
        self.cells
            .iter()
            .any(|(k, v)| k != columns::ID && k != columns::PART_ID && populated(v))
            || self.brand_cells.values().any(populated)
    }

    fn take_meta(&mut self) -> RowMeta {
        RowMeta {
            row_number: self.row_number,
            identity: self.take_text(columns::ID),
            action: self
                .take(columns::STATUS)
                .and_then(|v| ActionMarker::parse(&v.to_text())),
        }
    }

    fn take_parent(&mut self) -> ParentColumns {
        ParentColumns {
            part_identity: self.take_text(columns::PART_ID),
            part_sku: self.take(columns::PART_SKU),
        }
    }
}

/// 各工作表可识别的列键
pub fn known_columns(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Part => &[
            columns::ID,
            columns::STATUS,
            columns::SKU,
            columns::NAME,
            columns::CATEGORY,
            columns::POSITION,
            columns::NOTES,
            columns::IMAGE_URL,
        ],
        EntityKind::VehicleApplication => &[
            columns::ID,
            columns::PART_ID,
            columns::STATUS,
            columns::PART_SKU,
            columns::MAKE,
            columns::MODEL,
            columns::YEAR_START,
            columns::YEAR_END,
            columns::ENGINE,
            columns::NOTES,
        ],
        EntityKind::CrossReference => &[
            columns::ID,
            columns::PART_ID,
            columns::STATUS,
            columns::PART_SKU,
            columns::BRAND,
            columns::REFERENCE_SKU,
        ],
        EntityKind::Alias => &[
            columns::ID,
            columns::PART_ID,
            columns::STATUS,
            columns::PART_SKU,
            columns::ALIAS,
            columns::ALIAS_TYPE,
            columns::NOTES,
        ],
    }
}

// ==========================================
// FieldMapper - 字段映射器
// ==========================================
pub struct FieldMapper;

impl FieldMapperTrait for FieldMapper {
    fn map_part(&self, mut raw: RawRow) -> Option<ParsedPart> {
        if !raw.has_content() {
            return None;
        }
        let meta = raw.take_meta();
        let brand_lists = std::mem::take(&mut raw.brand_cells)
            .into_iter()
            .map(|(brand, value)| (brand, value.to_text()))
            .collect();

        Some(ParsedPart {
            meta,
            sku: raw.take(columns::SKU),
            name: raw.take(columns::NAME),
            category: raw.take(columns::CATEGORY),
            position: raw.take(columns::POSITION),
            notes: raw.take(columns::NOTES),
            image_url: raw.take(columns::IMAGE_URL),
            brand_lists,
        })
    }

    fn map_vehicle_application(&self, mut raw: RawRow) -> Option<ParsedVehicleApplication> {
        if !raw.has_content() {
            return None;
        }
        Some(ParsedVehicleApplication {
            meta: raw.take_meta(),
            parent: raw.take_parent(),
            make: raw.take(columns::MAKE),
            model: raw.take(columns::MODEL),
            year_start: raw.take(columns::YEAR_START),
            year_end: raw.take(columns::YEAR_END),
            engine: raw.take(columns::ENGINE),
            notes: raw.take(columns::NOTES),
        })
    }

    fn map_cross_reference(&self, mut raw: RawRow) -> Option<ParsedCrossReference> {
        if !raw.has_content() {
            return None;
        }
        Some(ParsedCrossReference {
            meta: raw.take_meta(),
            parent: raw.take_parent(),
            brand: raw.take(columns::BRAND),
            reference_sku: raw.take(columns::REFERENCE_SKU),
        })
    }

    fn map_alias(&self, mut raw: RawRow) -> Option<ParsedAlias> {
        if !raw.has_content() {
            return None;
        }
        Some(ParsedAlias {
            meta: raw.take_meta(),
            parent: raw.take_parent(),
            alias: raw.take(columns::ALIAS),
            alias_type: raw.take(columns::ALIAS_TYPE),
            notes: raw.take(columns::NOTES),
        })
    }
}
