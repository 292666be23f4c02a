// ==========================================
// 配件目录同步 - 工作簿解析器实现
// ==========================================
// 支持: OOXML (.xlsx)，从内存缓冲区读取
// 流程: 定位工作表 → 识别表头布局 → 列映射 → 单元格归一 → 字段映射
// ==========================================

use crate::domain::{CellValue, EntityKind, HeaderLayout, ParsedSheet, ParsedWorkbook};
use crate::importer::data_cleaner::{
    brand_from_header, canonical_column, excel_serial_to_text, normalize_header,
};
use crate::importer::error::ParseError;
use crate::importer::field_mapper::{known_columns, FieldMapper, RawRow};
use crate::importer::header_layout;
use crate::importer::pipeline_trait::{FieldMapper as FieldMapperTrait, WorkbookParser};
use calamine::{Data, Range, Reader, Xlsx};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tracing::{debug, instrument};

/// 表头列的归属
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnTarget {
    Field(String), // 规范列键
    Brand(String), // 品牌名（仅 Parts 表）
}

/// 单个工作表的原始解析结果
struct RawSheet {
    name: String,
    layout: Option<HeaderLayout>,
    columns: Vec<String>,
    unknown_columns: Vec<String>,
    rows: Vec<RawRow>,
}

// ==========================================
// XlsxWorkbookParser
// ==========================================
pub struct XlsxWorkbookParser {
    field_mapper: Box<dyn FieldMapperTrait>,
}

impl Default for XlsxWorkbookParser {
    fn default() -> Self {
        Self::new(Box::new(FieldMapper))
    }
}

impl XlsxWorkbookParser {
    pub fn new(field_mapper: Box<dyn FieldMapperTrait>) -> Self {
        Self { field_mapper }
    }

    /// 按归一化名称定位工作表（"cross-references" 与 "Cross References" 视为同一张表）
    fn find_sheet(sheet_names: &[String], expected: &str) -> Option<String> {
        let wanted = normalize_header(expected);
        sheet_names
            .iter()
            .find(|name| normalize_header(name) == wanted)
            .cloned()
    }

    fn read_sheet(
        workbook: &mut Xlsx<Cursor<Vec<u8>>>,
        sheet_name: &str,
        kind: EntityKind,
    ) -> Result<RawSheet, ParseError> {
        let range = workbook.worksheet_range(sheet_name)?;
        // 公式仅用于提取 HYPERLINK 目标，读取失败不影响取值
        let formulas = workbook.worksheet_formula(sheet_name).ok();
        let grid = build_grid(&range, formulas.as_ref());

        if grid.is_empty() {
            return Ok(RawSheet {
                name: sheet_name.to_string(),
                layout: None,
                columns: Vec::new(),
                unknown_columns: Vec::new(),
                rows: Vec::new(),
            });
        }

        // === 表头布局识别 ===
        let head: Vec<Vec<String>> = grid
            .iter()
            .take(3)
            .map(|row| {
                row.iter()
                    .map(|cell| cell.as_ref().map(|v| v.to_text()).unwrap_or_default())
                    .collect()
            })
            .collect();
        let layout = header_layout::classify(sheet_name, &head, known_columns(kind))?;
        debug!(sheet = sheet_name, layout = ?layout, "表头布局识别完成");

        // === 列映射 ===
        let known = known_columns(kind);
        let mut targets: Vec<Option<ColumnTarget>> = Vec::new();
        let mut columns_seen = Vec::new();
        let mut unknown_columns = Vec::new();
        if let Some(header_row) = grid.get(layout.header_row_index()) {
            for cell in header_row {
                let raw_header = cell.as_ref().map(|v| v.to_text()).unwrap_or_default();
                if raw_header.is_empty() {
                    targets.push(None);
                    continue;
                }
                let key = canonical_column(&raw_header);
                let target = if kind == EntityKind::Part {
                    brand_from_header(&raw_header).map(ColumnTarget::Brand)
                } else {
                    None
                };
                let target = match target {
                    Some(brand) => Some(brand),
                    None if known.contains(&key.as_str()) => Some(ColumnTarget::Field(key.clone())),
                    None => None,
                };
                match &target {
                    Some(_) => columns_seen.push(key),
                    None => unknown_columns.push(raw_header),
                }
                targets.push(target);
            }
        }

        // === 数据行 ===
        let mut rows = Vec::new();
        for (index, row) in grid.iter().enumerate().skip(layout.first_data_row_index()) {
            let mut raw = RawRow {
                row_number: index + 1,
                cells: HashMap::new(),
                brand_cells: BTreeMap::new(),
            };
            for (col, cell) in row.iter().enumerate() {
                let (Some(Some(target)), Some(value)) = (targets.get(col), cell) else {
                    continue;
                };
                match target {
                    ColumnTarget::Field(key) => {
                        raw.cells.insert(key.clone(), value.clone());
                    }
                    ColumnTarget::Brand(brand) => {
                        raw.brand_cells.insert(brand.clone(), value.clone());
                    }
                }
            }
            if !raw.cells.is_empty() || !raw.brand_cells.is_empty() {
                rows.push(raw);
            }
        }

        Ok(RawSheet {
            name: sheet_name.to_string(),
            layout: Some(layout),
            columns: columns_seen,
            unknown_columns,
            rows,
        })
    }

    fn into_parsed<R>(sheet: RawSheet, map: impl Fn(RawRow) -> Option<R>) -> ParsedSheet<R> {
        ParsedSheet {
            name: sheet.name,
            present: true,
            layout: sheet.layout,
            columns: sheet.columns,
            unknown_columns: sheet.unknown_columns,
            rows: sheet.rows.into_iter().filter_map(map).collect(),
        }
    }
}

impl WorkbookParser for XlsxWorkbookParser {
    #[instrument(skip(self, buffer), fields(size = buffer.len()))]
    fn parse(&self, buffer: &[u8]) -> Result<ParsedWorkbook, ParseError> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(buffer.to_vec()))?;
        let sheet_names = workbook.sheet_names();

        // === 必需工作表 ===
        let mut required = |kind: EntityKind| -> Result<RawSheet, ParseError> {
            let name = Self::find_sheet(&sheet_names, kind.sheet_name()).ok_or_else(|| {
                ParseError::MissingSheet {
                    sheet: kind.sheet_name().to_string(),
                }
            })?;
            Self::read_sheet(&mut workbook, &name, kind)
        };
        let parts = required(EntityKind::Part)?;
        let vehicle_applications = required(EntityKind::VehicleApplication)?;

        // === 可选工作表 ===
        let mut optional = |kind: EntityKind| -> Result<Option<RawSheet>, ParseError> {
            match Self::find_sheet(&sheet_names, kind.sheet_name()) {
                Some(name) => Self::read_sheet(&mut workbook, &name, kind).map(Some),
                None => Ok(None),
            }
        };
        let cross_references = optional(EntityKind::CrossReference)?;
        let aliases = optional(EntityKind::Alias)?;

        let mapper = &self.field_mapper;
        let parsed = ParsedWorkbook {
            parts: Self::into_parsed(parts, |r| mapper.map_part(r)),
            vehicle_applications: Self::into_parsed(vehicle_applications, |r| {
                mapper.map_vehicle_application(r)
            }),
            cross_references: match cross_references {
                Some(sheet) => Self::into_parsed(sheet, |r| mapper.map_cross_reference(r)),
                None => ParsedSheet::absent(EntityKind::CrossReference.sheet_name()),
            },
            aliases: match aliases {
                Some(sheet) => Self::into_parsed(sheet, |r| mapper.map_alias(r)),
                None => ParsedSheet::absent(EntityKind::Alias.sheet_name()),
            },
        };

        debug!(
            parts = parsed.parts.rows.len(),
            vehicle_applications = parsed.vehicle_applications.rows.len(),
            cross_references = parsed.cross_references.rows.len(),
            aliases = parsed.aliases.rows.len(),
            reexport = parsed.is_reexport(),
            "工作簿解析完成"
        );
        Ok(parsed)
    }
}

// ==========================================
// 单元格归一
// ==========================================

/// 以绝对坐标（自 A1 起）构建二维网格，空白单元格为 None
fn build_grid(range: &Range<Data>, formulas: Option<&Range<String>>) -> Vec<Vec<Option<CellValue>>> {
    let Some((_, _)) = range.start() else {
        return Vec::new();
    };
    let Some((end_row, end_col)) = range.end() else {
        return Vec::new();
    };

    (0..=end_row)
        .map(|r| {
            (0..=end_col)
                .map(|c| {
                    let formula = formulas
                        .and_then(|f| f.get_value((r, c)))
                        .map(|s| s.as_str());
                    coerce_cell(range.get_value((r, c)), formula)
                })
                .collect()
        })
        .collect()
}

/// 单元格值归一: 数值保持数值，日期转文本，公式取缓存值，HYPERLINK 取链接目标
fn coerce_cell(value: Option<&Data>, formula: Option<&str>) -> Option<CellValue> {
    if let Some(target) = formula.and_then(hyperlink_target) {
        return Some(CellValue::Text(target));
    }
    match value? {
        Data::Empty => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(dt) => {
            // 超出日期范围的序列值按原始数值保留，交由校验报告
            let serial = dt.as_f64();
            Some(match excel_serial_to_text(serial) {
                Some(text) => CellValue::Text(text),
                None => CellValue::Number(serial),
            })
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
        Data::Error(e) => Some(CellValue::Text(e.to_string())),
    }
}

/// 从 `HYPERLINK("target", "label")` 公式中提取链接目标
///
/// 仅支持字符串字面量作为第一个参数
pub fn hyperlink_target(formula: &str) -> Option<String> {
    let body = formula.trim().trim_start_matches('=').trim_start();
    let head = body.get(..10)?;
    if !head.eq_ignore_ascii_case("HYPERLINK(") {
        return None;
    }
    let args = body[10..].trim_start();
    let mut chars = args.chars();
    if chars.next()? != '"' {
        return None;
    }

    let mut target = String::new();
    let mut rest = chars.peekable();
    while let Some(c) = rest.next() {
        if c == '"' {
            // "" 为转义的双引号
            if rest.peek() == Some(&'"') {
                rest.next();
                target.push('"');
                continue;
            }
            let target = target.trim().to_string();
            return if target.is_empty() { None } else { Some(target) };
        }
        target.push(c);
    }
    None
}
