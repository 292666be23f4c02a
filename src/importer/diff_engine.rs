// ==========================================
// 配件目录同步 - 差异引擎
// ==========================================
// 输入: 解析结果 + 目录只读快照（纯函数，无 I/O）
// 输出: 各实体 ADD / UPDATE / DELETE / UNCHANGED 条目 + 汇总
// ==========================================
// 规则:
// 1. 有身份的行: 删除标记 → DELETE（优先于字段变化）；否则逐字段比对 → UPDATE / UNCHANGED
// 2. 无身份的行: ADD（删除标记的无身份行忽略）
// 3. 未出现在上传中的已有记录不删除（删除只由显式标记驱动）
// 4. 品牌列: 按成员二级比对，成员之间互不影响
// 5. 被删除配件的子记录级联 DELETE
// 6. 无法归类的行进入 unresolved，绝不静默丢弃
// ==========================================

use crate::domain::{
    natural_key, AliasFields, CatalogSnapshot, CellValue, CrossReferenceFields, DiffEntry,
    DiffResult, EntityDiff, EntityKind, ParentColumns, ParsedPart, ParsedWorkbook, PartFields,
    PartRef, RowMeta, StoredRecord, UnresolvedRow, VehicleApplicationFields, ChildFields,
};
use crate::importer::data_cleaner::{
    normalize_cell, normalize_text, optional_text, parse_year, same_optional, split_list_tokens,
};
use crate::importer::part_resolver::{parse_identity, ParentKey, ParentResolution, PartResolver};
use crate::importer::pipeline_trait::DiffCalculator;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, instrument};
use uuid::Uuid;

/// 行定位结果
enum Located<'a, F> {
    Existing(&'a StoredRecord<F>),
    New,
    Skipped,
}

fn unresolved(sheet: &str, meta: &RowMeta, reason: impl Into<String>) -> UnresolvedRow {
    UnresolvedRow {
        sheet: sheet.to_string(),
        row_number: meta.row_number,
        identity: meta.identity.clone(),
        reason: reason.into(),
    }
}

/// 按身份定位已有记录
fn locate<'a, F>(
    out: &mut EntityDiff<F>,
    sheet: &str,
    meta: &RowMeta,
    table: &'a BTreeMap<Uuid, StoredRecord<F>>,
    seen: &mut HashSet<Uuid>,
) -> Located<'a, F> {
    let Some(raw) = meta.identity.as_deref() else {
        return if meta.is_delete() {
            Located::Skipped
        } else {
            Located::New
        };
    };
    let Some(id) = parse_identity(raw) else {
        out.unresolved.push(unresolved(sheet, meta, "身份格式非法"));
        return Located::Skipped;
    };
    if !seen.insert(id) {
        out.unresolved.push(unresolved(sheet, meta, "身份在工作表中重复出现"));
        return Located::Skipped;
    }
    match table.get(&id) {
        Some(record) => Located::Existing(record),
        None => {
            out.unresolved
                .push(unresolved(sheet, meta, "身份对应的记录不存在"));
            Located::Skipped
        }
    }
}

// ==========================================
// FieldComparer - 逐字段比对并生成 after
// ==========================================
// 仅比对行中出现的字段；after = before 叠加变化字段
#[derive(Default)]
struct FieldComparer {
    changed: Vec<String>,
}

impl FieldComparer {
    /// 键字段（SKU / 品牌 / 车型等）: 以归一化文本存储
    fn key_text(&mut self, column: &str, current: &mut String, value: &Option<CellValue>) {
        let Some(value) = value else { return };
        let incoming = normalize_cell(value);
        // 必填字段不允许清空（校验阶段已报错）
        if incoming.is_empty() {
            return;
        }
        if normalize_text(current) != incoming {
            *current = incoming;
            self.changed.push(column.to_string());
        }
    }

    /// 必填描述字段: 归一化比对，保留原文存储
    fn required_text(&mut self, column: &str, current: &mut String, value: &Option<CellValue>) {
        let Some(value) = value else { return };
        let incoming = value.to_text();
        if incoming.is_empty() {
            return;
        }
        if normalize_text(current) != normalize_text(&incoming) {
            *current = incoming;
            self.changed.push(column.to_string());
        }
    }

    fn optional_text(&mut self, column: &str, current: &mut Option<String>, value: &Option<CellValue>) {
        let Some(value) = value else { return };
        let incoming = optional_text(value);
        if !same_optional(current, &incoming) {
            *current = incoming;
            self.changed.push(column.to_string());
        }
    }

    fn year(&mut self, column: &str, current: &mut i32, value: &Option<CellValue>) {
        let Some(year) = value.as_ref().and_then(parse_year) else {
            return;
        };
        if *current != year {
            *current = year;
            self.changed.push(column.to_string());
        }
    }

    fn part(&mut self, current: &mut PartRef, incoming: Option<PartRef>) {
        let Some(incoming) = incoming else { return };
        if ParentKey::from(&*current) != ParentKey::from(&incoming) {
            *current = incoming;
            self.changed.push("part".to_string());
        }
    }
}

/// 子记录的父引用解析结果（行未给出父引用时为 Ok(None)）
fn resolve_parent(
    resolver: &PartResolver<'_>,
    parent: &ParentColumns,
) -> Result<Option<ParentKey>, String> {
    match resolver.resolve(parent) {
        ParentResolution::Resolved(key) => Ok(Some(key)),
        ParentResolution::Missing => Ok(None),
        ParentResolution::InvalidIdentity(raw) => Err(format!("_part_id \"{}\" 格式非法", raw)),
        ParentResolution::NotFound(reference) => Err(format!("父配件 \"{}\" 无法解析", reference)),
    }
}

fn required_value(value: &Option<CellValue>) -> Option<String> {
    value
        .as_ref()
        .map(normalize_cell)
        .filter(|s| !s.is_empty())
}

fn required_raw_value(value: &Option<CellValue>) -> Option<String> {
    value
        .as_ref()
        .map(CellValue::to_text)
        .filter(|s| !s.is_empty())
}

fn optional_value(value: &Option<CellValue>) -> Option<String> {
    value.as_ref().and_then(optional_text)
}

// ==========================================
// DiffEngine
// ==========================================
pub struct DiffEngine {
    list_delete_prefix: String,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new("DEL:")
    }
}

impl DiffEngine {
    pub fn new(list_delete_prefix: &str) -> Self {
        Self {
            list_delete_prefix: list_delete_prefix.to_string(),
        }
    }

    // ===== Parts =====

    fn diff_parts(&self, parsed: &ParsedWorkbook, existing: &CatalogSnapshot) -> EntityDiff<PartFields> {
        let sheet = &parsed.parts;
        let mut out = EntityDiff::new(EntityKind::Part);
        let mut seen = HashSet::new();

        for row in &sheet.rows {
            let meta = &row.meta;
            match locate(&mut out, &sheet.name, meta, &existing.parts, &mut seen) {
                Located::Skipped => {}
                Located::Existing(record) if meta.is_delete() => {
                    out.entries.push(DiffEntry::delete(
                        Some(meta.row_number),
                        record.id,
                        record.fields.clone(),
                    ));
                }
                Located::Existing(record) => {
                    let mut after = record.fields.clone();
                    let mut cmp = FieldComparer::default();
                    cmp.key_text("sku", &mut after.sku, &row.sku);
                    cmp.required_text("name", &mut after.name, &row.name);
                    cmp.optional_text("category", &mut after.category, &row.category);
                    cmp.optional_text("position", &mut after.position, &row.position);
                    cmp.optional_text("notes", &mut after.notes, &row.notes);
                    cmp.optional_text("image_url", &mut after.image_url, &row.image_url);
                    out.entries.push(DiffEntry::compared(
                        Some(meta.row_number),
                        record.id,
                        record.fields.clone(),
                        after,
                        cmp.changed,
                    ));
                }
                Located::New => match (required_value(&row.sku), required_raw_value(&row.name)) {
                    (Some(sku), Some(name)) => {
                        out.entries.push(DiffEntry::add(
                            Some(meta.row_number),
                            PartFields {
                                sku,
                                name,
                                category: optional_value(&row.category),
                                position: optional_value(&row.position),
                                notes: optional_value(&row.notes),
                                image_url: optional_value(&row.image_url),
                            },
                        ));
                    }
                    _ => out
                        .unresolved
                        .push(unresolved(&sheet.name, meta, "新增配件缺少 SKU 或名称")),
                },
            }
        }
        out
    }

    // ===== 子记录公共流程 =====

    /// 已有子记录: 级联删除 / 显式删除 / 比对
    ///
    /// 返回 None 表示该行已处理完毕（删除或无法归类）
    fn existing_child<F: ChildFields + Clone>(
        out: &mut EntityDiff<F>,
        sheet: &str,
        meta: &RowMeta,
        record: &StoredRecord<F>,
        parent: &ParentColumns,
        resolver: &PartResolver<'_>,
    ) -> Option<Option<PartRef>> {
        if meta.is_delete() {
            out.entries.push(DiffEntry::delete(
                Some(meta.row_number),
                record.id,
                record.fields.clone(),
            ));
            return None;
        }

        let incoming = match resolve_parent(resolver, parent) {
            Ok(key) => key,
            Err(reason) => {
                out.unresolved.push(unresolved(sheet, meta, reason));
                return None;
            }
        };
        let effective = incoming
            .clone()
            .unwrap_or_else(|| ParentKey::from(record.fields.part_ref()));
        if resolver.points_to_deleted(&effective) {
            if ParentKey::from(record.fields.part_ref()) == effective {
                // 父配件被删除 → 级联删除
                out.entries.push(DiffEntry::delete(
                    Some(meta.row_number),
                    record.id,
                    record.fields.clone(),
                ));
            } else {
                out.unresolved
                    .push(unresolved(sheet, meta, "子记录被移动到本次删除的配件下"));
            }
            return None;
        }
        Some(incoming.map(|k| k.to_part_ref()))
    }

    /// 新增子记录的父引用（必须可解析且未被删除）
    fn new_child_parent<F>(
        out: &mut EntityDiff<F>,
        sheet: &str,
        meta: &RowMeta,
        parent: &ParentColumns,
        resolver: &PartResolver<'_>,
    ) -> Option<ParentKey> {
        match resolve_parent(resolver, parent) {
            Ok(Some(key)) if resolver.points_to_deleted(&key) => {
                out.unresolved
                    .push(unresolved(sheet, meta, "新增子记录引用了本次删除的配件"));
                None
            }
            Ok(Some(key)) => Some(key),
            Ok(None) => {
                out.unresolved
                    .push(unresolved(sheet, meta, "新增子记录缺少父配件引用"));
                None
            }
            Err(reason) => {
                out.unresolved.push(unresolved(sheet, meta, reason));
                None
            }
        }
    }

    /// 被删除配件下、尚未出现在差异中的子记录 → 级联 DELETE
    fn cascade_deletes<F: ChildFields + Clone>(
        out: &mut EntityDiff<F>,
        table: &BTreeMap<Uuid, StoredRecord<F>>,
        resolver: &PartResolver<'_>,
    ) {
        for record in table.values() {
            let Some(part_id) = record.fields.part_ref().id() else {
                continue;
            };
            if resolver.is_deleted(part_id) && !out.contains_identity(record.id) {
                out.entries
                    .push(DiffEntry::delete(None, record.id, record.fields.clone()));
            }
        }
    }

    // ===== Vehicle Applications =====

    fn diff_vehicle_applications(
        &self,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
        resolver: &PartResolver<'_>,
    ) -> EntityDiff<VehicleApplicationFields> {
        let sheet = &parsed.vehicle_applications;
        let mut out = EntityDiff::new(EntityKind::VehicleApplication);
        let mut seen = HashSet::new();

        for row in &sheet.rows {
            let meta = &row.meta;
            match locate(&mut out, &sheet.name, meta, &existing.vehicle_applications, &mut seen) {
                Located::Skipped => {}
                Located::Existing(record) => {
                    let Some(incoming_parent) =
                        Self::existing_child(&mut out, &sheet.name, meta, record, &row.parent, resolver)
                    else {
                        continue;
                    };
                    let mut after = record.fields.clone();
                    let mut cmp = FieldComparer::default();
                    cmp.part(&mut after.part, incoming_parent);
                    cmp.key_text("make", &mut after.make, &row.make);
                    cmp.key_text("model", &mut after.model, &row.model);
                    cmp.year("year_start", &mut after.year_start, &row.year_start);
                    cmp.year("year_end", &mut after.year_end, &row.year_end);
                    cmp.optional_text("engine", &mut after.engine, &row.engine);
                    cmp.optional_text("notes", &mut after.notes, &row.notes);
                    out.entries.push(DiffEntry::compared(
                        Some(meta.row_number),
                        record.id,
                        record.fields.clone(),
                        after,
                        cmp.changed,
                    ));
                }
                Located::New => {
                    let Some(parent) =
                        Self::new_child_parent(&mut out, &sheet.name, meta, &row.parent, resolver)
                    else {
                        continue;
                    };
                    let fields = (|| {
                        Some(VehicleApplicationFields {
                            part: parent.to_part_ref(),
                            make: required_value(&row.make)?,
                            model: required_value(&row.model)?,
                            year_start: row.year_start.as_ref().and_then(parse_year)?,
                            year_end: row.year_end.as_ref().and_then(parse_year)?,
                            engine: optional_value(&row.engine),
                            notes: optional_value(&row.notes),
                        })
                    })();
                    match fields {
                        Some(fields) => out
                            .entries
                            .push(DiffEntry::add(Some(meta.row_number), fields)),
                        None => out.unresolved.push(unresolved(
                            &sheet.name,
                            meta,
                            "新增车型适配缺少品牌 / 车型 / 年份",
                        )),
                    }
                }
            }
        }

        Self::cascade_deletes(&mut out, &existing.vehicle_applications, resolver);
        out
    }

    // ===== Cross References =====

    fn diff_cross_references(
        &self,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
        resolver: &PartResolver<'_>,
    ) -> EntityDiff<CrossReferenceFields> {
        let sheet = &parsed.cross_references;
        let mut out = EntityDiff::new(EntityKind::CrossReference);
        let mut seen = HashSet::new();
        let mut pending: HashSet<(ParentKey, String, String)> = HashSet::new();

        for row in &sheet.rows {
            let meta = &row.meta;
            match locate(&mut out, &sheet.name, meta, &existing.cross_references, &mut seen) {
                Located::Skipped => {}
                Located::Existing(record) => {
                    let Some(incoming_parent) =
                        Self::existing_child(&mut out, &sheet.name, meta, record, &row.parent, resolver)
                    else {
                        continue;
                    };
                    let mut after = record.fields.clone();
                    let mut cmp = FieldComparer::default();
                    cmp.part(&mut after.part, incoming_parent);
                    cmp.key_text("brand", &mut after.brand, &row.brand);
                    cmp.key_text("reference_sku", &mut after.reference_sku, &row.reference_sku);
                    out.entries.push(DiffEntry::compared(
                        Some(meta.row_number),
                        record.id,
                        record.fields.clone(),
                        after,
                        cmp.changed,
                    ));
                }
                Located::New => {
                    let Some(parent) =
                        Self::new_child_parent(&mut out, &sheet.name, meta, &row.parent, resolver)
                    else {
                        continue;
                    };
                    match (required_value(&row.brand), required_value(&row.reference_sku)) {
                        (Some(brand), Some(reference_sku)) => {
                            let key = (
                                parent.clone(),
                                natural_key(&brand),
                                natural_key(&reference_sku),
                            );
                            if pending.insert(key) {
                                out.entries.push(DiffEntry::add(
                                    Some(meta.row_number),
                                    CrossReferenceFields {
                                        part: parent.to_part_ref(),
                                        brand,
                                        reference_sku,
                                    },
                                ));
                            }
                        }
                        _ => out.unresolved.push(unresolved(
                            &sheet.name,
                            meta,
                            "新增互换号缺少品牌或互换号",
                        )),
                    }
                }
            }
        }

        for row in parsed.parts.rows.iter().filter(|r| !r.meta.is_delete()) {
            self.diff_brand_lists(&mut out, row, existing, &mut pending);
        }

        Self::cascade_deletes(&mut out, &existing.cross_references, resolver);
        out
    }

    /// 品牌列成员级比对
    ///
    /// - 无前缀成员: 不存在 → ADD，已存在 → UNCHANGED
    /// - 删除前缀成员: 已存在 → DELETE，不存在 → 忽略
    /// - 列表中未提及的已有成员保持不变
    fn diff_brand_lists(
        &self,
        out: &mut EntityDiff<CrossReferenceFields>,
        row: &ParsedPart,
        existing: &CatalogSnapshot,
        pending: &mut HashSet<(ParentKey, String, String)>,
    ) {
        if row.brand_lists.is_empty() {
            return;
        }
        let parent = match row.meta.identity.as_deref() {
            Some(raw) => match parse_identity(raw) {
                Some(id) if existing.parts.contains_key(&id) => ParentKey::Existing(id),
                _ => return,
            },
            None => match required_value(&row.sku) {
                Some(sku) => ParentKey::New(natural_key(&sku)),
                None => return,
            },
        };
        let row_number = Some(row.meta.row_number);

        for (brand, raw) in &row.brand_lists {
            let brand = normalize_text(brand);
            let tokens = split_list_tokens(raw, &self.list_delete_prefix);
            let current: Vec<&StoredRecord<CrossReferenceFields>> = match &parent {
                ParentKey::Existing(id) => existing.cross_references_for(*id, &brand),
                ParentKey::New(_) => Vec::new(),
            };
            let find = |member: &str| {
                let key = natural_key(member);
                current
                    .iter()
                    .find(|r| natural_key(&r.fields.reference_sku) == key)
                    .copied()
            };

            for member in &tokens.keep {
                match find(member) {
                    Some(record) => {
                        if !out.contains_identity(record.id) {
                            out.entries.push(DiffEntry::compared(
                                row_number,
                                record.id,
                                record.fields.clone(),
                                record.fields.clone(),
                                Vec::new(),
                            ));
                        }
                    }
                    None => {
                        let key = (parent.clone(), natural_key(&brand), natural_key(member));
                        if pending.insert(key) {
                            out.entries.push(DiffEntry::add(
                                row_number,
                                CrossReferenceFields {
                                    part: parent.to_part_ref(),
                                    brand: brand.clone(),
                                    reference_sku: member.clone(),
                                },
                            ));
                        }
                    }
                }
            }

            for member in &tokens.remove {
                if let Some(record) = find(member) {
                    if !out.contains_identity(record.id) {
                        out.entries.push(DiffEntry::delete(
                            row_number,
                            record.id,
                            record.fields.clone(),
                        ));
                    }
                }
            }
        }
    }

    // ===== Aliases =====

    fn diff_aliases(
        &self,
        parsed: &ParsedWorkbook,
        existing: &CatalogSnapshot,
        resolver: &PartResolver<'_>,
    ) -> EntityDiff<AliasFields> {
        let sheet = &parsed.aliases;
        let mut out = EntityDiff::new(EntityKind::Alias);
        let mut seen = HashSet::new();

        for row in &sheet.rows {
            let meta = &row.meta;
            match locate(&mut out, &sheet.name, meta, &existing.aliases, &mut seen) {
                Located::Skipped => {}
                Located::Existing(record) => {
                    let Some(incoming_parent) =
                        Self::existing_child(&mut out, &sheet.name, meta, record, &row.parent, resolver)
                    else {
                        continue;
                    };
                    let mut after = record.fields.clone();
                    let mut cmp = FieldComparer::default();
                    cmp.part(&mut after.part, incoming_parent);
                    cmp.key_text("alias", &mut after.alias, &row.alias);
                    cmp.optional_text("alias_type", &mut after.alias_type, &row.alias_type);
                    cmp.optional_text("notes", &mut after.notes, &row.notes);
                    out.entries.push(DiffEntry::compared(
                        Some(meta.row_number),
                        record.id,
                        record.fields.clone(),
                        after,
                        cmp.changed,
                    ));
                }
                Located::New => {
                    let Some(parent) =
                        Self::new_child_parent(&mut out, &sheet.name, meta, &row.parent, resolver)
                    else {
                        continue;
                    };
                    match required_value(&row.alias) {
                        Some(alias) => out.entries.push(DiffEntry::add(
                            Some(meta.row_number),
                            AliasFields {
                                part: parent.to_part_ref(),
                                alias,
                                alias_type: optional_value(&row.alias_type),
                                notes: optional_value(&row.notes),
                            },
                        )),
                        None => out
                            .unresolved
                            .push(unresolved(&sheet.name, meta, "新增别名缺少别名文本")),
                    }
                }
            }
        }

        Self::cascade_deletes(&mut out, &existing.aliases, resolver);
        out
    }
}

impl DiffCalculator for DiffEngine {
    #[instrument(skip_all, fields(rows = parsed.total_rows()))]
    fn diff(&self, parsed: &ParsedWorkbook, existing: &CatalogSnapshot) -> DiffResult {
        let resolver = PartResolver::new(&parsed.parts.rows, existing);

        let result = DiffResult::new(
            self.diff_parts(parsed, existing),
            self.diff_vehicle_applications(parsed, existing, &resolver),
            self.diff_cross_references(parsed, existing, &resolver),
            self.diff_aliases(parsed, existing, &resolver),
        );

        let total = result.summary.total;
        debug!(
            adds = total.adds,
            updates = total.updates,
            deletes = total.deletes,
            unchanged = total.unchanged,
            unresolved = result.unresolved().len(),
            "差异计算完成"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ActionMarker, AuditStamp, DiffOperation, ParsedCrossReference, ParsedSheet,
        ParsedVehicleApplication,
    };
    use chrono::Utc;

    fn stamp() -> AuditStamp {
        AuditStamp {
            updated_at: Utc::now(),
            updated_by: "system:import".to_string(),
        }
    }

    fn text(s: &str) -> Option<CellValue> {
        Some(CellValue::Text(s.to_string()))
    }

    fn meta(row_number: usize, identity: Option<Uuid>, delete: bool) -> RowMeta {
        RowMeta {
            row_number,
            identity: identity.map(|id| id.to_string()),
            action: if delete { Some(ActionMarker::Delete) } else { None },
        }
    }

    fn part_row(meta: RowMeta, sku: &str, name: &str) -> ParsedPart {
        ParsedPart {
            meta,
            sku: text(sku),
            name: text(name),
            category: None,
            position: None,
            notes: None,
            image_url: None,
            brand_lists: BTreeMap::new(),
        }
    }

    fn workbook(parts: Vec<ParsedPart>) -> ParsedWorkbook {
        let mut sheet = ParsedSheet::absent("Parts");
        sheet.present = true;
        sheet.columns = vec!["_id".to_string(), "sku".to_string(), "name".to_string()];
        sheet.rows = parts;
        let mut vehicles = ParsedSheet::absent("Vehicle Applications");
        vehicles.present = true;
        ParsedWorkbook {
            parts: sheet,
            vehicle_applications: vehicles,
            cross_references: ParsedSheet::absent("Cross References"),
            aliases: ParsedSheet::absent("Aliases"),
        }
    }

    /// 一个配件（BP-1）+ 一条车型适配 + 两条 Dorman 互换号
    fn seeded() -> (CatalogSnapshot, Uuid, Uuid, Uuid, Uuid) {
        let mut snapshot = CatalogSnapshot::empty(Utc::now());
        let part_id = Uuid::new_v4();
        snapshot.parts.insert(
            part_id,
            StoredRecord {
                id: part_id,
                fields: PartFields {
                    sku: "BP-1".to_string(),
                    name: "Brake Pad".to_string(),
                    category: Some("Brakes".to_string()),
                    position: None,
                    notes: None,
                    image_url: None,
                },
                audit: stamp(),
            },
        );
        let vehicle_id = Uuid::new_v4();
        snapshot.vehicle_applications.insert(
            vehicle_id,
            StoredRecord {
                id: vehicle_id,
                fields: VehicleApplicationFields {
                    part: PartRef::Id(part_id),
                    make: "Ford".to_string(),
                    model: "Focus".to_string(),
                    year_start: 2015,
                    year_end: 2018,
                    engine: None,
                    notes: None,
                },
                audit: stamp(),
            },
        );
        let mut xref_ids = Vec::new();
        for reference in ["D-1", "D-2"] {
            let id = Uuid::new_v4();
            snapshot.cross_references.insert(
                id,
                StoredRecord {
                    id,
                    fields: CrossReferenceFields {
                        part: PartRef::Id(part_id),
                        brand: "Dorman".to_string(),
                        reference_sku: reference.to_string(),
                    },
                    audit: stamp(),
                },
            );
            xref_ids.push(id);
        }
        (snapshot, part_id, vehicle_id, xref_ids[0], xref_ids[1])
    }

    #[test]
    fn test_unchanged_when_numeric_and_text_match() {
        let (snapshot, part_id, vehicle_id, _, _) = seeded();
        let mut parsed = workbook(vec![part_row(meta(2, Some(part_id), false), " BP-1 ", "Brake  Pad")]);
        parsed.vehicle_applications.rows.push(ParsedVehicleApplication {
            meta: meta(2, Some(vehicle_id), false),
            parent: ParentColumns {
                part_identity: Some(part_id.to_string()),
                part_sku: text("BP-1"),
            },
            make: text("Ford"),
            model: text("Focus"),
            year_start: Some(CellValue::Number(2015.0)),
            year_end: text("2018"),
            engine: None,
            notes: None,
        });

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        assert!(!result.has_changes());
        assert_eq!(result.summary.total.unchanged, 2);
    }

    #[test]
    fn test_update_lists_changed_fields() {
        let (snapshot, part_id, _, _, _) = seeded();
        let mut row = part_row(meta(2, Some(part_id), false), "BP-1", "Brake Pad Set");
        row.category = text("");
        let parsed = workbook(vec![row]);

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        let entry = &result.parts.entries[0];
        assert_eq!(entry.operation, DiffOperation::Update);
        assert_eq!(entry.changed_fields, vec!["name".to_string(), "category".to_string()]);
        let after = entry.after.as_ref().unwrap();
        assert_eq!(after.name, "Brake Pad Set");
        assert_eq!(after.category, None);
    }

    #[test]
    fn test_update_stores_text_without_collapsing_whitespace() {
        let (mut snapshot, part_id, _, _, _) = seeded();
        snapshot.parts.get_mut(&part_id).unwrap().fields.notes = Some("line one\nline two".to_string());

        // 仅空白差异 → 不变
        let mut row = part_row(meta(2, Some(part_id), false), "BP-1", "Brake Pad");
        row.notes = text("line one  line two");
        let result = DiffEngine::default().diff(&workbook(vec![row]), &snapshot);
        assert!(!result.has_changes());

        // 实际变更 → 存储原文
        let mut row = part_row(meta(2, Some(part_id), false), "BP-1", " Brake  Pad Kit ");
        row.notes = text(" line one\nline three ");
        let result = DiffEngine::default().diff(&workbook(vec![row]), &snapshot);
        let after = result.parts.entries[0].after.as_ref().unwrap();
        assert_eq!(after.name, "Brake  Pad Kit");
        assert_eq!(after.notes.as_deref(), Some("line one\nline three"));
    }

    #[test]
    fn test_delete_takes_precedence_and_cascades() {
        let (snapshot, part_id, vehicle_id, xref_a, xref_b) = seeded();
        let parsed = workbook(vec![part_row(meta(2, Some(part_id), true), "BP-1", "Renamed")]);

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        assert_eq!(result.parts.counts().deletes, 1);
        assert_eq!(result.parts.counts().updates, 0);
        assert!(result.vehicle_applications.contains_identity(vehicle_id));
        assert!(result.cross_references.contains_identity(xref_a));
        assert!(result.cross_references.contains_identity(xref_b));
        assert_eq!(result.summary.total.deletes, 4);
    }

    #[test]
    fn test_brand_list_member_isolation() {
        let (snapshot, part_id, _, xref_a, xref_b) = seeded();
        let mut row = part_row(meta(2, Some(part_id), false), "BP-1", "Brake Pad");
        row.brand_lists
            .insert("Dorman".to_string(), "D-1; del:D-2; D-3".to_string());
        let parsed = workbook(vec![row]);

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        let xrefs = &result.cross_references;
        let deleted: Vec<_> = xrefs.with_operation(DiffOperation::Delete).collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].identity, Some(xref_b));

        let unchanged: Vec<_> = xrefs.with_operation(DiffOperation::Unchanged).collect();
        assert_eq!(unchanged.len(), 1);
        assert_eq!(unchanged[0].identity, Some(xref_a));

        let added: Vec<_> = xrefs.with_operation(DiffOperation::Add).collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].after.as_ref().unwrap().reference_sku, "D-3");
    }

    #[test]
    fn test_omitted_list_member_is_not_deleted() {
        let (snapshot, part_id, _, _, _) = seeded();
        let mut row = part_row(meta(2, Some(part_id), false), "BP-1", "Brake Pad");
        row.brand_lists.insert("Dorman".to_string(), "D-1".to_string());
        let parsed = workbook(vec![row]);

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        assert_eq!(result.cross_references.counts().deletes, 0);
    }

    #[test]
    fn test_new_rows_and_forward_reference() {
        let snapshot = CatalogSnapshot::empty(Utc::now());
        let mut parsed = workbook(vec![part_row(meta(2, None, false), "new-1", "Rotor")]);
        parsed.cross_references.present = true;
        parsed.cross_references.rows.push(ParsedCrossReference {
            meta: meta(2, None, false),
            parent: ParentColumns {
                part_identity: None,
                part_sku: text("NEW-1"),
            },
            brand: text("TRW"),
            reference_sku: text("T-9"),
        });

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        assert_eq!(result.parts.counts().adds, 1);
        let xref = result.cross_references.entries[0].after.as_ref().unwrap();
        assert_eq!(xref.part, PartRef::Sku("NEW-1".to_string()));
    }

    #[test]
    fn test_missing_identity_is_unresolved() {
        let (snapshot, _, _, _, _) = seeded();
        let parsed = workbook(vec![part_row(meta(7, Some(Uuid::new_v4()), false), "X", "Y")]);

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        assert!(result.parts.entries.is_empty());
        assert_eq!(result.unresolved().len(), 1);
        assert_eq!(result.unresolved()[0].row_number, 7);
    }

    #[test]
    fn test_existing_records_absent_from_sheet_are_kept() {
        let (snapshot, _, _, _, _) = seeded();
        let parsed = workbook(vec![]);

        let result = DiffEngine::default().diff(&parsed, &snapshot);
        assert!(!result.has_changes());
        assert!(result.parts.entries.is_empty());
    }
}
