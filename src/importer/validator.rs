// ==========================================
// 配件目录同步 - 校验引擎
// ==========================================
// 输入: 解析结果 + 目录只读快照
// 输出: ValidationReport（错误阻断导入，告警不阻断）
// 规则类别（全部执行，不短路）:
// - 结构: 再导出工作簿的子表必须带 _id 列
// - 必填字段
// - 自然键唯一（SKU / 互换号）
// - 引用完整性（子记录父配件必须可解析）
// - 身份格式 / 存在性 / 重复
// - 数值与年份范围
// - 字段长度
// ==========================================

use crate::domain::workbook::columns;
use crate::domain::{
    natural_key, ActionMarker, CatalogSnapshot, CellValue, IssueCode,
    ParentColumns, ParsedRow, ParsedSheet, ParsedWorkbook, ValidationIssue, ValidationReport,
};
use crate::importer::data_cleaner::{normalize_cell, parse_year, split_list_tokens};
use crate::importer::part_resolver::{parse_identity, ParentKey, ParentResolution, PartResolver};
use crate::importer::pipeline_trait::CatalogValidator;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};
use uuid::Uuid;

// ==========================================
// ValidationRules - 可配置的校验参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRules {
    pub year_min: i32,
    pub year_max: i32,
    pub max_len_sku: usize,
    pub max_len_name: usize,
    pub max_len_notes: usize,
    pub max_len_url: usize,
    pub list_delete_prefix: String,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            year_min: 1900,
            year_max: Utc::now().year() + 2,
            max_len_sku: 64,
            max_len_name: 255,
            max_len_notes: 2000,
            max_len_url: 2048,
            list_delete_prefix: "DEL:".to_string(),
        }
    }
}

/// 互换号自然键: (父配件, 品牌, 互换号)
type CrossReferenceKey = (ParentKey, String, String);

// ==========================================
// IssueCollector - 问题收集
// ==========================================
#[derive(Default)]
struct IssueCollector {
    issues: Vec<ValidationIssue>,
}

impl IssueCollector {
    fn push(
        &mut self,
        code: IssueCode,
        sheet: &str,
        row: Option<usize>,
        column: Option<&str>,
        message: String,
    ) {
        self.issues
            .push(ValidationIssue::new(code, sheet, row, column, message));
    }
}

// ==========================================
// ValidationEngine
// ==========================================
pub struct ValidationEngine {
    rules: ValidationRules,
}

impl ValidationEngine {
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    // ===== 通用检查 =====

    /// 行身份 / 动作标记检查（所有工作表共用）
    fn check_row_identities<R: ParsedRow>(
        &self,
        out: &mut IssueCollector,
        sheet: &ParsedSheet<R>,
        exists: impl Fn(Uuid) -> bool,
    ) {
        let mut seen: HashMap<Uuid, usize> = HashMap::new();
        for row in &sheet.rows {
            let meta = row.meta();
            let row_no = Some(meta.row_number);

            if let Some(ActionMarker::Unrecognized(value)) = &meta.action {
                out.push(
                    IssueCode::UnknownActionMarker,
                    &sheet.name,
                    row_no,
                    Some(columns::STATUS),
                    format!("无法识别的状态标记 \"{}\"，该行按普通行处理", value),
                );
            }

            let Some(raw) = meta.identity.as_deref() else {
                if meta.is_delete() {
                    out.push(
                        IssueCode::DeleteWithoutIdentity,
                        &sheet.name,
                        row_no,
                        Some(columns::STATUS),
                        "标记删除的行没有 _id，无法定位已有记录，该行将被忽略".to_string(),
                    );
                }
                continue;
            };

            let Some(id) = parse_identity(raw) else {
                out.push(
                    IssueCode::InvalidIdentity,
                    &sheet.name,
                    row_no,
                    Some(columns::ID),
                    format!("_id \"{}\" 不是合法的身份标识", raw),
                );
                continue;
            };

            if let Some(first_row) = seen.get(&id) {
                out.push(
                    IssueCode::DuplicateIdentity,
                    &sheet.name,
                    row_no,
                    Some(columns::ID),
                    format!("_id {} 与第 {} 行重复", id, first_row),
                );
                continue;
            }
            seen.insert(id, meta.row_number);

            if !exists(id) {
                out.push(
                    IssueCode::IdentityNotFound,
                    &sheet.name,
                    row_no,
                    Some(columns::ID),
                    format!("_id {} 对应的记录不存在（可能已被删除）", id),
                );
            }
        }
    }

    /// 必填字段: 新增行必须提供非空值；已有行不允许显式清空
    fn check_required(
        &self,
        out: &mut IssueCollector,
        sheet: &str,
        row: usize,
        column: &str,
        value: &Option<CellValue>,
        is_new: bool,
    ) {
        let empty = match value {
            None => is_new,
            Some(v) => v.is_empty_text(),
        };
        if empty {
            out.push(
                IssueCode::RequiredFieldEmpty,
                sheet,
                Some(row),
                Some(column),
                format!("必填字段 {} 为空", column),
            );
        }
    }

    fn check_length(
        &self,
        out: &mut IssueCollector,
        sheet: &str,
        row: usize,
        column: &str,
        value: &Option<CellValue>,
        limit: usize,
    ) {
        if let Some(v) = value {
            let len = normalize_cell(v).chars().count();
            if len > limit {
                out.push(
                    IssueCode::FieldTooLong,
                    sheet,
                    Some(row),
                    Some(column),
                    format!("字段 {} 长度 {} 超过上限 {}", column, len, limit),
                );
            }
        }
    }

    /// 子记录父引用检查，返回解析结果
    #[allow(clippy::too_many_arguments)]
    fn check_parent(
        &self,
        out: &mut IssueCollector,
        sheet: &str,
        row: usize,
        parent: &ParentColumns,
        resolver: &PartResolver<'_>,
        is_new: bool,
        current_parent: Option<Uuid>,
    ) -> Option<ParentKey> {
        let column = if parent.part_identity.is_some() {
            columns::PART_ID
        } else {
            columns::PART_SKU
        };
        match resolver.resolve(parent) {
            ParentResolution::Resolved(key) => {
                // 已有子记录仍指向原父配件时随父配件级联删除，不报错
                let moved = match current_parent {
                    Some(id) => key != ParentKey::Existing(id),
                    None => true,
                };
                if resolver.points_to_deleted(&key) && (is_new || moved) {
                    out.push(
                        IssueCode::ChildOfDeletedParent,
                        sheet,
                        Some(row),
                        Some(column),
                        "子记录引用了本次上传中被删除的配件".to_string(),
                    );
                }
                Some(key)
            }
            ParentResolution::InvalidIdentity(raw) => {
                out.push(
                    IssueCode::InvalidIdentity,
                    sheet,
                    Some(row),
                    Some(columns::PART_ID),
                    format!("_part_id \"{}\" 不是合法的身份标识", raw),
                );
                None
            }
            ParentResolution::NotFound(reference) => {
                out.push(
                    IssueCode::OrphanedReference,
                    sheet,
                    Some(row),
                    Some(column),
                    format!(
                        "父配件 \"{}\" 既不在现有目录中，也不在本次上传中",
                        reference
                    ),
                );
                None
            }
            ParentResolution::Missing => {
                if is_new {
                    out.push(
                        IssueCode::RequiredFieldEmpty,
                        sheet,
                        Some(row),
                        Some(columns::PART_SKU),
                        "新增子记录必须提供 Part SKU 或 _part_id".to_string(),
                    );
                }
                None
            }
        }
    }

    // ===== 结构 =====

    fn check_structure(&self, out: &mut IssueCollector, parsed: &ParsedWorkbook) {
        let sheets: [(&str, bool, bool, &[String]); 4] = [
            (
                parsed.parts.name.as_str(),
                !parsed.parts.rows.is_empty(),
                parsed.parts.has_column(columns::ID),
                parsed.parts.unknown_columns.as_slice(),
            ),
            (
                parsed.vehicle_applications.name.as_str(),
                !parsed.vehicle_applications.rows.is_empty(),
                parsed.vehicle_applications.has_column(columns::ID),
                parsed.vehicle_applications.unknown_columns.as_slice(),
            ),
            (
                parsed.cross_references.name.as_str(),
                !parsed.cross_references.rows.is_empty(),
                parsed.cross_references.has_column(columns::ID),
                parsed.cross_references.unknown_columns.as_slice(),
            ),
            (
                parsed.aliases.name.as_str(),
                !parsed.aliases.rows.is_empty(),
                parsed.aliases.has_column(columns::ID),
                parsed.aliases.unknown_columns.as_slice(),
            ),
        ];

        for (sheet, has_rows, has_id, unknown) in sheets {
            for header in unknown {
                out.push(
                    IssueCode::UnknownColumn,
                    sheet,
                    None,
                    Some(header.as_str()),
                    format!("无法识别的列 \"{}\"，已忽略", header),
                );
            }
            if parsed.is_reexport() && has_rows && !has_id {
                out.push(
                    IssueCode::MissingIdentityColumn,
                    sheet,
                    None,
                    Some(columns::ID),
                    "工作簿为再导出文件，但该工作表缺少隐藏的 _id 列".to_string(),
                );
            }
        }
    }

    /// 再导出工作簿中未出现的已有记录（仅汇总告警，不会删除）
    fn check_missing_from_sheet(
        &self,
        out: &mut IssueCollector,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
    ) {
        if !parsed.is_reexport() {
            return;
        }

        fn listed<R: ParsedRow>(sheet: &ParsedSheet<R>) -> HashSet<Uuid> {
            sheet
                .rows
                .iter()
                .filter_map(|r| r.meta().identity.as_deref().and_then(parse_identity))
                .collect()
        }

        let mut report = |sheet: &str, missing: usize| {
            if missing > 0 {
                out.push(
                    IssueCode::ExistingRecordMissingFromSheet,
                    sheet,
                    None,
                    None,
                    format!("{} 条已有记录未出现在工作表中，将保持不变", missing),
                );
            }
        };

        let parts = listed(&parsed.parts);
        report(
            &parsed.parts.name,
            existing.parts.keys().filter(|id| !parts.contains(*id)).count(),
        );
        if parsed.vehicle_applications.has_column(columns::ID) {
            let ids = listed(&parsed.vehicle_applications);
            report(
                &parsed.vehicle_applications.name,
                existing
                    .vehicle_applications
                    .keys()
                    .filter(|id| !ids.contains(*id))
                    .count(),
            );
        }
        if parsed.cross_references.has_column(columns::ID) {
            let ids = listed(&parsed.cross_references);
            report(
                &parsed.cross_references.name,
                existing
                    .cross_references
                    .keys()
                    .filter(|id| !ids.contains(*id))
                    .count(),
            );
        }
        if parsed.aliases.has_column(columns::ID) {
            let ids = listed(&parsed.aliases);
            report(
                &parsed.aliases.name,
                existing.aliases.keys().filter(|id| !ids.contains(*id)).count(),
            );
        }
    }

    // ===== Parts =====

    fn check_parts(
        &self,
        out: &mut IssueCollector,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
        resolver: &PartResolver<'_>,
        pending_refs: &mut HashMap<CrossReferenceKey, usize>,
    ) {
        let sheet = &parsed.parts;
        let name = sheet.name.as_str();
        let rules = &self.rules;
        let existing_skus = existing.sku_index();
        let mut seen_skus: HashMap<String, usize> = HashMap::new();

        self.check_row_identities(out, sheet, |id| existing.parts.contains_key(&id));

        for row in &sheet.rows {
            let row_no = row.meta.row_number;
            let identity = row.meta.identity.as_deref().and_then(parse_identity);

            if row.meta.is_delete() {
                if let Some(id) = identity {
                    let children = existing.child_count(id);
                    if existing.parts.contains_key(&id) && children > 0 {
                        out.push(
                            IssueCode::DeleteCascades,
                            name,
                            Some(row_no),
                            Some(columns::STATUS),
                            format!("删除该配件将同时删除 {} 条子记录", children),
                        );
                    }
                }
                continue;
            }

            let is_new = row.meta.identity.is_none();
            self.check_required(out, name, row_no, columns::SKU, &row.sku, is_new);
            self.check_required(out, name, row_no, columns::NAME, &row.name, is_new);
            self.check_length(out, name, row_no, columns::SKU, &row.sku, rules.max_len_sku);
            self.check_length(out, name, row_no, columns::NAME, &row.name, rules.max_len_name);
            self.check_length(out, name, row_no, columns::CATEGORY, &row.category, rules.max_len_name);
            self.check_length(out, name, row_no, columns::POSITION, &row.position, rules.max_len_name);
            self.check_length(out, name, row_no, columns::NOTES, &row.notes, rules.max_len_notes);
            self.check_length(out, name, row_no, columns::IMAGE_URL, &row.image_url, rules.max_len_url);

            // === SKU 唯一性 ===
            let sku = row.sku.as_ref().map(normalize_cell).filter(|s| !s.is_empty());
            if let Some(sku) = &sku {
                let key = natural_key(sku);
                if let Some(first_row) = seen_skus.get(&key) {
                    out.push(
                        IssueCode::DuplicateNaturalKey,
                        name,
                        Some(row_no),
                        Some(columns::SKU),
                        format!("SKU \"{}\" 与第 {} 行重复", sku, first_row),
                    );
                } else {
                    seen_skus.insert(key.clone(), row_no);
                }

                // 原持有者被删除，或新增行接手被改名配件的旧 SKU 时不冲突
                if let Some(owner) = existing_skus.get(&key) {
                    let released =
                        resolver.is_deleted(*owner) || (is_new && resolver.is_renamed(*owner));
                    if identity != Some(*owner) && !released {
                        out.push(
                            IssueCode::SkuAlreadyExists,
                            name,
                            Some(row_no),
                            Some(columns::SKU),
                            format!("SKU \"{}\" 已被其他配件使用", sku),
                        );
                    }
                }
            }

            // === 品牌列 ===
            let parent = match identity {
                Some(id) if existing.parts.contains_key(&id) => Some(ParentKey::Existing(id)),
                None if is_new => sku.as_deref().map(|s| ParentKey::New(natural_key(s))),
                _ => None,
            };
            for (brand, raw) in &row.brand_lists {
                let column = format!("Brand: {}", brand);
                let tokens = split_list_tokens(raw, &rules.list_delete_prefix);

                for dup in &tokens.duplicates {
                    out.push(
                        IssueCode::DuplicateListMember,
                        name,
                        Some(row_no),
                        Some(column.as_str()),
                        format!("互换号 \"{}\" 在列表中重复出现，仅首次生效", dup),
                    );
                }
                for token in tokens.keep.iter().chain(tokens.remove.iter()) {
                    if token.chars().count() > rules.max_len_sku {
                        out.push(
                            IssueCode::FieldTooLong,
                            name,
                            Some(row_no),
                            Some(column.as_str()),
                            format!("互换号 \"{}\" 长度超过上限 {}", token, rules.max_len_sku),
                        );
                    }
                }

                let Some(parent) = &parent else {
                    continue;
                };
                let current: Vec<String> = match parent {
                    ParentKey::Existing(id) => existing
                        .cross_references_for(*id, brand)
                        .iter()
                        .map(|r| r.fields.reference_sku.clone())
                        .collect(),
                    ParentKey::New(_) => Vec::new(),
                };
                let current_keys: HashSet<String> = current.iter().map(|s| natural_key(s)).collect();

                for token in &tokens.keep {
                    if !current_keys.contains(&natural_key(token)) {
                        pending_refs
                            .entry((parent.clone(), natural_key(brand), natural_key(token)))
                            .or_insert(row_no);
                    }
                }

                let mentioned: HashSet<String> = tokens
                    .keep
                    .iter()
                    .chain(tokens.remove.iter())
                    .map(|s| natural_key(s))
                    .collect();
                let omitted: Vec<&str> = current
                    .iter()
                    .filter(|r| !mentioned.contains(&natural_key(r)))
                    .map(|r| r.as_str())
                    .collect();
                if !omitted.is_empty() {
                    out.push(
                        IssueCode::ListMemberOmitted,
                        name,
                        Some(row_no),
                        Some(column.as_str()),
                        format!(
                            "已有互换号 {} 未出现在列表中，将保留（删除需使用 {} 前缀）",
                            omitted.join(", "),
                            rules.list_delete_prefix
                        ),
                    );
                }
            }
        }
    }

    // ===== Vehicle Applications =====

    fn check_year(
        &self,
        out: &mut IssueCollector,
        sheet: &str,
        row: usize,
        column: &str,
        value: &Option<CellValue>,
    ) -> Option<i32> {
        let value = value.as_ref().filter(|v| !v.is_empty_text())?;
        match parse_year(value) {
            None => {
                out.push(
                    IssueCode::InvalidNumber,
                    sheet,
                    Some(row),
                    Some(column),
                    format!("{} 不是合法的年份: \"{}\"", column, value.to_text()),
                );
                None
            }
            Some(year) => {
                if year < self.rules.year_min || year > self.rules.year_max {
                    out.push(
                        IssueCode::YearOutOfRange,
                        sheet,
                        Some(row),
                        Some(column),
                        format!(
                            "年份 {} 超出允许范围 [{}, {}]",
                            year, self.rules.year_min, self.rules.year_max
                        ),
                    );
                }
                Some(year)
            }
        }
    }

    fn check_vehicle_applications(
        &self,
        out: &mut IssueCollector,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
        resolver: &PartResolver<'_>,
    ) {
        let sheet = &parsed.vehicle_applications;
        let name = sheet.name.as_str();
        let rules = &self.rules;

        self.check_row_identities(out, sheet, |id| {
            existing.vehicle_applications.contains_key(&id)
        });

        for row in sheet.rows.iter().filter(|r| !r.meta.is_delete()) {
            let row_no = row.meta.row_number;
            let is_new = row.meta.identity.is_none();
            let current = row
                .meta
                .identity
                .as_deref()
                .and_then(parse_identity)
                .and_then(|id| existing.vehicle_applications.get(&id));

            if is_new || row.parent.part_identity.is_some() || row.parent.part_sku.is_some() {
                let current_parent = current.and_then(|c| c.fields.part.id());
                self.check_parent(out, name, row_no, &row.parent, resolver, is_new, current_parent);
            }
            self.check_required(out, name, row_no, columns::MAKE, &row.make, is_new);
            self.check_required(out, name, row_no, columns::MODEL, &row.model, is_new);
            self.check_required(out, name, row_no, columns::YEAR_START, &row.year_start, is_new);
            self.check_required(out, name, row_no, columns::YEAR_END, &row.year_end, is_new);
            self.check_length(out, name, row_no, columns::MAKE, &row.make, rules.max_len_name);
            self.check_length(out, name, row_no, columns::MODEL, &row.model, rules.max_len_name);
            self.check_length(out, name, row_no, columns::ENGINE, &row.engine, rules.max_len_name);
            self.check_length(out, name, row_no, columns::NOTES, &row.notes, rules.max_len_notes);

            let start = self.check_year(out, name, row_no, columns::YEAR_START, &row.year_start);
            let end = self.check_year(out, name, row_no, columns::YEAR_END, &row.year_end);
            let start = start.or(current.map(|c| c.fields.year_start));
            let end = end.or(current.map(|c| c.fields.year_end));
            if let (Some(start), Some(end)) = (start, end) {
                if end < start {
                    out.push(
                        IssueCode::YearRangeInverted,
                        name,
                        Some(row_no),
                        Some(columns::YEAR_END),
                        format!("结束年份 {} 早于开始年份 {}", end, start),
                    );
                }
            }
        }
    }

    // ===== Cross References =====

    fn check_cross_references(
        &self,
        out: &mut IssueCollector,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
        resolver: &PartResolver<'_>,
        pending_refs: &mut HashMap<CrossReferenceKey, usize>,
    ) {
        let sheet = &parsed.cross_references;
        let name = sheet.name.as_str();
        let rules = &self.rules;

        self.check_row_identities(out, sheet, |id| existing.cross_references.contains_key(&id));

        for row in sheet.rows.iter().filter(|r| !r.meta.is_delete()) {
            let row_no = row.meta.row_number;
            let is_new = row.meta.identity.is_none();

            let current_parent = row
                .meta
                .identity
                .as_deref()
                .and_then(parse_identity)
                .and_then(|id| existing.cross_references.get(&id))
                .and_then(|c| c.fields.part.id());
            let parent = if is_new || row.parent.part_identity.is_some() || row.parent.part_sku.is_some() {
                self.check_parent(out, name, row_no, &row.parent, resolver, is_new, current_parent)
            } else {
                None
            };
            self.check_required(out, name, row_no, columns::BRAND, &row.brand, is_new);
            self.check_required(out, name, row_no, columns::REFERENCE_SKU, &row.reference_sku, is_new);
            self.check_length(out, name, row_no, columns::BRAND, &row.brand, rules.max_len_name);
            self.check_length(out, name, row_no, columns::REFERENCE_SKU, &row.reference_sku, rules.max_len_sku);

            if !is_new {
                continue;
            }
            let (Some(parent), Some(brand), Some(reference)) = (
                parent,
                row.brand.as_ref().map(normalize_cell).filter(|s| !s.is_empty()),
                row.reference_sku.as_ref().map(normalize_cell).filter(|s| !s.is_empty()),
            ) else {
                continue;
            };

            let already_stored = match &parent {
                ParentKey::Existing(id) => existing
                    .cross_references_for(*id, &brand)
                    .iter()
                    .any(|r| natural_key(&r.fields.reference_sku) == natural_key(&reference)),
                ParentKey::New(_) => false,
            };
            let key = (parent, natural_key(&brand), natural_key(&reference));
            if already_stored {
                out.push(
                    IssueCode::DuplicateNaturalKey,
                    name,
                    Some(row_no),
                    Some(columns::REFERENCE_SKU),
                    format!("互换号 {} / {} 已存在", brand, reference),
                );
            } else if let Some(first_row) = pending_refs.get(&key) {
                out.push(
                    IssueCode::DuplicateNaturalKey,
                    name,
                    Some(row_no),
                    Some(columns::REFERENCE_SKU),
                    format!(
                        "互换号 {} / {} 在本次上传中重复（首次出现于第 {} 行）",
                        brand, reference, first_row
                    ),
                );
            } else {
                pending_refs.insert(key, row_no);
            }
        }
    }

    // ===== Aliases =====

    fn check_aliases(
        &self,
        out: &mut IssueCollector,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
        resolver: &PartResolver<'_>,
    ) {
        let sheet = &parsed.aliases;
        let name = sheet.name.as_str();
        let rules = &self.rules;

        self.check_row_identities(out, sheet, |id| existing.aliases.contains_key(&id));

        for row in sheet.rows.iter().filter(|r| !r.meta.is_delete()) {
            let row_no = row.meta.row_number;
            let is_new = row.meta.identity.is_none();

            if is_new || row.parent.part_identity.is_some() || row.parent.part_sku.is_some() {
                let current_parent = row
                    .meta
                    .identity
                    .as_deref()
                    .and_then(parse_identity)
                    .and_then(|id| existing.aliases.get(&id))
                    .and_then(|c| c.fields.part.id());
                self.check_parent(out, name, row_no, &row.parent, resolver, is_new, current_parent);
            }
            self.check_required(out, name, row_no, columns::ALIAS, &row.alias, is_new);
            self.check_length(out, name, row_no, columns::ALIAS, &row.alias, rules.max_len_name);
            self.check_length(out, name, row_no, columns::ALIAS_TYPE, &row.alias_type, rules.max_len_name);
            self.check_length(out, name, row_no, columns::NOTES, &row.notes, rules.max_len_notes);
        }
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new(ValidationRules::default())
    }
}

impl CatalogValidator for ValidationEngine {
    #[instrument(skip_all, fields(rows = parsed.total_rows()))]
    fn validate(&self, parsed: &ParsedWorkbook, existing: &CatalogSnapshot) -> ValidationReport {
        let mut out = IssueCollector::default();
        let resolver = PartResolver::new(&parsed.parts.rows, existing);
        let mut pending_refs: HashMap<CrossReferenceKey, usize> = HashMap::new();

        self.check_structure(&mut out, parsed);
        self.check_parts(&mut out, parsed, existing, &resolver, &mut pending_refs);
        self.check_vehicle_applications(&mut out, parsed, existing, &resolver);
        self.check_cross_references(&mut out, parsed, existing, &resolver, &mut pending_refs);
        self.check_aliases(&mut out, parsed, existing, &resolver);
        self.check_missing_from_sheet(&mut out, parsed, existing);

        let report = ValidationReport::from_issues(out.issues);
        debug!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "校验完成"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditStamp, ParsedPart, ParsedVehicleApplication, PartFields, RowMeta, StoredRecord};
    use std::collections::BTreeMap;

    fn text(s: &str) -> Option<CellValue> {
        Some(CellValue::Text(s.to_string()))
    }

    fn meta(row_number: usize, identity: Option<&str>, action: Option<ActionMarker>) -> RowMeta {
        RowMeta {
            row_number,
            identity: identity.map(|s| s.to_string()),
            action,
        }
    }

    fn part(meta: RowMeta, sku: Option<&str>, name: Option<&str>) -> ParsedPart {
        ParsedPart {
            meta,
            sku: sku.and_then(text),
            name: name.and_then(text),
            category: None,
            position: None,
            notes: None,
            image_url: None,
            brand_lists: BTreeMap::new(),
        }
    }

    fn vehicle(
        meta: RowMeta,
        parent: ParentColumns,
        start: Option<CellValue>,
        end: Option<CellValue>,
    ) -> ParsedVehicleApplication {
        ParsedVehicleApplication {
            meta,
            parent,
            make: text("Toyota"),
            model: text("Camry"),
            year_start: start,
            year_end: end,
            engine: None,
            notes: None,
        }
    }

    fn by_sku(sku: &str) -> ParentColumns {
        ParentColumns {
            part_identity: None,
            part_sku: text(sku),
        }
    }

    fn workbook(
        part_columns: &[&str],
        parts: Vec<ParsedPart>,
        vehicle_columns: &[&str],
        vehicles: Vec<ParsedVehicleApplication>,
    ) -> ParsedWorkbook {
        let mut parts_sheet = ParsedSheet::absent("Parts");
        parts_sheet.present = true;
        parts_sheet.columns = part_columns.iter().map(|c| c.to_string()).collect();
        parts_sheet.rows = parts;
        let mut vehicle_sheet = ParsedSheet::absent("Vehicle Applications");
        vehicle_sheet.present = true;
        vehicle_sheet.columns = vehicle_columns.iter().map(|c| c.to_string()).collect();
        vehicle_sheet.rows = vehicles;
        ParsedWorkbook {
            parts: parts_sheet,
            vehicle_applications: vehicle_sheet,
            cross_references: ParsedSheet::absent("Cross References"),
            aliases: ParsedSheet::absent("Aliases"),
        }
    }

    /// 目录中已有一个配件 BP-1
    fn existing_catalog() -> (CatalogSnapshot, Uuid) {
        let mut snapshot = CatalogSnapshot::empty(chrono::Utc::now());
        let id = Uuid::new_v4();
        snapshot.parts.insert(
            id,
            StoredRecord {
                id,
                fields: PartFields {
                    sku: "BP-1".to_string(),
                    name: "Brake Pad".to_string(),
                    category: None,
                    position: None,
                    notes: None,
                    image_url: None,
                },
                audit: AuditStamp {
                    updated_at: chrono::Utc::now(),
                    updated_by: "system:import".to_string(),
                },
            },
        );
        (snapshot, id)
    }

    fn codes(report: &ValidationReport) -> Vec<IssueCode> {
        report.errors.iter().map(|i| i.code).collect()
    }

    #[test]
    fn test_all_rules_run_without_short_circuit() {
        let parsed = workbook(
            &["sku", "name"],
            vec![
                part(meta(2, None, None), Some("NEW-1"), Some("Pad")),
                part(meta(3, None, None), Some("new-1"), None),
            ],
            &["part_sku", "make", "model", "year_start", "year_end"],
            vec![vehicle(
                meta(2, None, None),
                by_sku("NOPE"),
                Some(CellValue::Number(2020.0)),
                Some(CellValue::Number(2018.0)),
            )],
        );
        let report = ValidationEngine::default().validate(&parsed, &CatalogSnapshot::empty(chrono::Utc::now()));

        assert!(!report.valid);
        let codes = codes(&report);
        assert!(codes.contains(&IssueCode::DuplicateNaturalKey));
        assert!(codes.contains(&IssueCode::RequiredFieldEmpty));
        assert!(codes.contains(&IssueCode::OrphanedReference));
        assert!(codes.contains(&IssueCode::YearRangeInverted));

        let duplicate = report
            .errors
            .iter()
            .find(|i| i.code == IssueCode::DuplicateNaturalKey)
            .unwrap();
        assert_eq!(duplicate.row, Some(3));
        assert_eq!(duplicate.column.as_deref(), Some(columns::SKU));
    }

    #[test]
    fn test_year_checks() {
        let parsed = workbook(
            &["sku", "name"],
            vec![part(meta(2, None, None), Some("NEW-1"), Some("Pad"))],
            &["part_sku", "make", "model", "year_start", "year_end"],
            vec![
                vehicle(meta(2, None, None), by_sku("NEW-1"), Some(CellValue::Number(1800.0)), Some(CellValue::Number(2001.0))),
                vehicle(meta(3, None, None), by_sku("NEW-1"), text("abc"), Some(CellValue::Number(2001.0))),
                vehicle(meta(4, None, None), by_sku("NEW-1"), text("2015"), Some(CellValue::Number(2016.0))),
            ],
        );
        let report = ValidationEngine::default().validate(&parsed, &CatalogSnapshot::empty(chrono::Utc::now()));

        let rows = |code: IssueCode| -> Vec<Option<usize>> {
            report.errors.iter().filter(|i| i.code == code).map(|i| i.row).collect()
        };
        assert_eq!(rows(IssueCode::YearOutOfRange), vec![Some(2)]);
        assert_eq!(rows(IssueCode::InvalidNumber), vec![Some(3)]);
        // 文本 "2015" 与数值同样合法，前向引用 NEW-1 可解析
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_identity_checks_on_reexport() {
        let (existing, part_id) = existing_catalog();
        let unknown = Uuid::new_v4().to_string();
        let parsed = workbook(
            &["_id", "sku", "name"],
            vec![
                part(meta(2, Some(&part_id.to_string()), None), Some("BP-1"), Some("Brake Pad")),
                part(meta(3, Some(&part_id.to_string()), None), Some("BP-1"), Some("Brake Pad")),
                part(meta(4, Some(&unknown), None), Some("X-1"), Some("Ghost")),
                part(meta(5, Some("not-a-uuid"), None), Some("X-2"), Some("Broken")),
            ],
            &["part_sku", "make", "model", "year_start", "year_end"],
            vec![vehicle(
                meta(2, None, None),
                by_sku("BP-1"),
                Some(CellValue::Number(2018.0)),
                Some(CellValue::Number(2020.0)),
            )],
        );
        let report = ValidationEngine::default().validate(&parsed, &existing);
        let codes = codes(&report);

        assert!(codes.contains(&IssueCode::DuplicateIdentity));
        assert!(codes.contains(&IssueCode::IdentityNotFound));
        assert!(codes.contains(&IssueCode::InvalidIdentity));
        // 再导出工作簿的子表必须带 _id 列
        assert!(codes.contains(&IssueCode::MissingIdentityColumn));
    }

    #[test]
    fn test_new_row_reusing_existing_sku() {
        let (existing, _) = existing_catalog();
        let parsed = workbook(
            &["sku", "name"],
            vec![part(meta(2, None, None), Some(" bp-1 "), Some("Copy"))],
            &["part_sku", "make", "model", "year_start", "year_end"],
            Vec::new(),
        );
        let report = ValidationEngine::default().validate(&parsed, &existing);

        assert_eq!(codes(&report), vec![IssueCode::SkuAlreadyExists]);
    }

    #[test]
    fn test_new_row_may_take_sku_of_renamed_part() {
        let (existing, part_id) = existing_catalog();
        let identity = part_id.to_string();
        let parsed = workbook(
            &["_id", "sku", "name"],
            vec![
                part(meta(2, Some(&identity), None), Some("BP-1A"), Some("Brake Pad")),
                part(meta(3, None, None), Some("BP-1"), Some("Brake Pad Gen 2")),
            ],
            &["_id", "_part_id", "part_sku", "make", "model", "year_start", "year_end"],
            Vec::new(),
        );
        let report = ValidationEngine::default().validate(&parsed, &existing);

        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_delete_rows_produce_warnings_only() {
        let (mut existing, part_id) = existing_catalog();
        let vehicle_id = Uuid::new_v4();
        existing.vehicle_applications.insert(
            vehicle_id,
            StoredRecord {
                id: vehicle_id,
                fields: crate::domain::VehicleApplicationFields {
                    part: crate::domain::PartRef::Id(part_id),
                    make: "Toyota".to_string(),
                    model: "Camry".to_string(),
                    year_start: 2018,
                    year_end: 2020,
                    engine: None,
                    notes: None,
                },
                audit: existing.parts[&part_id].audit.clone(),
            },
        );
        let parsed = workbook(
            &["_id", "status", "sku", "name"],
            vec![
                part(meta(2, Some(&part_id.to_string()), Some(ActionMarker::Delete)), Some("BP-1"), None),
                part(meta(3, None, Some(ActionMarker::Delete)), Some("ZZ-9"), Some("Nothing")),
                part(
                    meta(4, None, Some(ActionMarker::Unrecognized("maybe".to_string()))),
                    Some("NEW-2"),
                    Some("Clip"),
                ),
            ],
            &["_id", "part_sku", "make", "model", "year_start", "year_end"],
            Vec::new(),
        );
        let report = ValidationEngine::default().validate(&parsed, &existing);

        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert!(report.has_code(IssueCode::DeleteCascades));
        assert!(report.has_code(IssueCode::DeleteWithoutIdentity));
        assert!(report.has_code(IssueCode::UnknownActionMarker));
    }

    #[test]
    fn test_new_child_of_deleted_parent_is_blocked() {
        let (existing, part_id) = existing_catalog();
        let parsed = workbook(
            &["_id", "status", "sku", "name"],
            vec![part(meta(2, Some(&part_id.to_string()), Some(ActionMarker::Delete)), Some("BP-1"), None)],
            &["_id", "_part_id", "make", "model", "year_start", "year_end"],
            vec![vehicle(
                meta(2, None, None),
                ParentColumns {
                    part_identity: Some(part_id.to_string()),
                    part_sku: None,
                },
                Some(CellValue::Number(2018.0)),
                Some(CellValue::Number(2020.0)),
            )],
        );
        let report = ValidationEngine::default().validate(&parsed, &existing);

        assert_eq!(codes(&report), vec![IssueCode::ChildOfDeletedParent]);
    }
}
