// ==========================================
// 配件目录同步 - 工作簿导出
// ==========================================
// 布局: SingleHeader（第 1 行列表头，第 2 行起数据）
// 身份列 _id / _part_id 隐藏，原样回传以区分 "已有记录" 与 "新增"
// 互换号通过 Parts 表的 "Brand: X" 列导出（分号分隔），不单独导出 Cross References 表
// 导出后立即预览该文件应得到零变更
// ==========================================

use crate::domain::{natural_key, CatalogSnapshot, EntityKind, PartRef, StoredRecord};
use crate::importer::error::ExportError;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

const PARTS_HEADERS: [&str; 8] = [
    "_id", "Status", "SKU", "Name", "Category", "Position", "Notes", "Image URL",
];
const VEHICLE_HEADERS: [&str; 10] = [
    "_id", "_part_id", "Status", "Part SKU", "Make", "Model", "Year Start", "Year End", "Engine",
    "Notes",
];
const ALIAS_HEADERS: [&str; 7] = [
    "_id", "_part_id", "Status", "Part SKU", "Alias", "Alias Type", "Notes",
];

/// 品牌列表成员分隔符
const LIST_SEPARATOR: &str = "; ";

fn write_headers(ws: &mut Worksheet, headers: &[&str], hidden: usize) -> Result<(), ExportError> {
    let bold = Format::new().set_bold();
    for (col, name) in headers.iter().enumerate() {
        ws.write_string_with_format(0, col as u16, *name, &bold)?;
    }
    for col in 0..hidden {
        ws.set_column_hidden(col as u16)?;
    }
    ws.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_optional(ws: &mut Worksheet, row: u32, col: u16, value: &Option<String>) -> Result<(), ExportError> {
    if let Some(value) = value {
        ws.write_string(row, col, value)?;
    }
    Ok(())
}

/// 子记录排序键: 父配件 SKU + 记录标签
fn sort_children<'a, F>(
    records: impl Iterator<Item = &'a StoredRecord<F>>,
    skus: &HashMap<Uuid, String>,
    label: impl Fn(&F) -> String,
    part: impl Fn(&F) -> &PartRef,
) -> Vec<&'a StoredRecord<F>>
where
    F: 'a,
{
    let mut sorted: Vec<_> = records.collect();
    sorted.sort_by_cached_key(|r| {
        let sku = part(&r.fields)
            .id()
            .and_then(|id| skus.get(&id))
            .map(|s| natural_key(s))
            .unwrap_or_default();
        (sku, label(&r.fields))
    });
    sorted
}

fn part_columns(ws: &mut Worksheet, row: u32, part: &PartRef, skus: &HashMap<Uuid, String>) -> Result<(), ExportError> {
    if let Some(id) = part.id() {
        ws.write_string(row, 1, id.to_string())?;
        if let Some(sku) = skus.get(&id) {
            ws.write_string(row, 3, sku)?;
        }
    }
    Ok(())
}

fn write_parts(ws: &mut Worksheet, snapshot: &CatalogSnapshot) -> Result<(), ExportError> {
    ws.set_name(EntityKind::Part.sheet_name())?;
    let brands = snapshot.brands();
    let mut headers: Vec<String> = PARTS_HEADERS.iter().map(|h| h.to_string()).collect();
    headers.extend(brands.iter().map(|b| format!("Brand: {}", b)));
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    write_headers(ws, &header_refs, 1)?;

    let mut parts: Vec<_> = snapshot.parts.values().collect();
    parts.sort_by_cached_key(|p| natural_key(&p.fields.sku));

    for (idx, part) in parts.iter().enumerate() {
        let row = (idx + 1) as u32;
        let f = &part.fields;
        ws.write_string(row, 0, part.id.to_string())?;
        ws.write_string(row, 2, &f.sku)?;
        ws.write_string(row, 3, &f.name)?;
        write_optional(ws, row, 4, &f.category)?;
        write_optional(ws, row, 5, &f.position)?;
        write_optional(ws, row, 6, &f.notes)?;
        write_optional(ws, row, 7, &f.image_url)?;

        for (offset, brand) in brands.iter().enumerate() {
            let mut members: Vec<String> = snapshot
                .cross_references_for(part.id, brand)
                .into_iter()
                .map(|r| r.fields.reference_sku.clone())
                .collect();
            if members.is_empty() {
                continue;
            }
            members.sort_by_cached_key(|m| natural_key(m));
            let col = (PARTS_HEADERS.len() + offset) as u16;
            ws.write_string(row, col, members.join(LIST_SEPARATOR))?;
        }
    }
    Ok(())
}

fn write_vehicle_applications(
    ws: &mut Worksheet,
    snapshot: &CatalogSnapshot,
    skus: &HashMap<Uuid, String>,
) -> Result<(), ExportError> {
    ws.set_name(EntityKind::VehicleApplication.sheet_name())?;
    write_headers(ws, &VEHICLE_HEADERS, 2)?;

    let records = sort_children(
        snapshot.vehicle_applications.values(),
        skus,
        |f| format!("{} {} {:04}", f.make, f.model, f.year_start),
        |f| &f.part,
    );
    for (idx, record) in records.iter().enumerate() {
        let row = (idx + 1) as u32;
        let f = &record.fields;
        ws.write_string(row, 0, record.id.to_string())?;
        part_columns(ws, row, &f.part, skus)?;
        ws.write_string(row, 4, &f.make)?;
        ws.write_string(row, 5, &f.model)?;
        ws.write_number(row, 6, f.year_start as f64)?;
        ws.write_number(row, 7, f.year_end as f64)?;
        write_optional(ws, row, 8, &f.engine)?;
        write_optional(ws, row, 9, &f.notes)?;
    }
    Ok(())
}

fn write_aliases(
    ws: &mut Worksheet,
    snapshot: &CatalogSnapshot,
    skus: &HashMap<Uuid, String>,
) -> Result<(), ExportError> {
    ws.set_name(EntityKind::Alias.sheet_name())?;
    write_headers(ws, &ALIAS_HEADERS, 2)?;

    let records = sort_children(
        snapshot.aliases.values(),
        skus,
        |f| f.alias.clone(),
        |f| &f.part,
    );
    for (idx, record) in records.iter().enumerate() {
        let row = (idx + 1) as u32;
        let f = &record.fields;
        ws.write_string(row, 0, record.id.to_string())?;
        part_columns(ws, row, &f.part, skus)?;
        ws.write_string(row, 4, &f.alias)?;
        write_optional(ws, row, 5, &f.alias_type)?;
        write_optional(ws, row, 6, &f.notes)?;
    }
    Ok(())
}

/// 导出整个目录为 xlsx 缓冲区
pub fn export_workbook(snapshot: &CatalogSnapshot) -> Result<Vec<u8>, ExportError> {
    let skus: HashMap<Uuid, String> = snapshot
        .parts
        .values()
        .map(|p| (p.id, p.fields.sku.clone()))
        .collect();

    let mut workbook = Workbook::new();
    write_parts(workbook.add_worksheet(), snapshot)?;
    write_vehicle_applications(workbook.add_worksheet(), snapshot, &skus)?;
    write_aliases(workbook.add_worksheet(), snapshot, &skus)?;

    let buffer = workbook.save_to_buffer()?;
    let counts = snapshot.counts();
    debug!(
        parts = counts.parts,
        vehicle_applications = counts.vehicle_applications,
        cross_references = counts.cross_references,
        aliases = counts.aliases,
        bytes = buffer.len(),
        "目录导出完成"
    );
    Ok(buffer)
}
