// ==========================================
// 配件目录同步 - 工作簿解析结果模型
// ==========================================
// 用途: 文件解析 → 此结构 → 校验 / 差异计算
// 生命周期: 仅在一次导入请求内
// ==========================================
// 约定:
// - 字段为 None: 单元格空白（"未提供"，不参与比对）
// - 字段为 Some(Text("")): 操作员显式清空
// ==========================================

use crate::domain::types::ActionMarker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// 列键（归一化后的表头）
// ==========================================
pub mod columns {
    pub const ID: &str = "_id";
    pub const PART_ID: &str = "_part_id";
    pub const STATUS: &str = "status";
    pub const SKU: &str = "sku";
    pub const NAME: &str = "name";
    pub const CATEGORY: &str = "category";
    pub const POSITION: &str = "position";
    pub const NOTES: &str = "notes";
    pub const IMAGE_URL: &str = "image_url";
    pub const PART_SKU: &str = "part_sku";
    pub const MAKE: &str = "make";
    pub const MODEL: &str = "model";
    pub const YEAR_START: &str = "year_start";
    pub const YEAR_END: &str = "year_end";
    pub const ENGINE: &str = "engine";
    pub const BRAND: &str = "brand";
    pub const REFERENCE_SKU: &str = "reference_sku";
    pub const ALIAS: &str = "alias";
    pub const ALIAS_TYPE: &str = "alias_type";

    /// 品牌列表头前缀（如 "Brand: Dorman"）
    pub const BRAND_COLUMN_PREFIX: &str = "brand:";
}

// ==========================================
// CellValue - 单元格值（已完成类型归一）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    /// 文本形式（整数值的浮点数不带小数部分）
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }
    }

    /// 是否为显式空值（仅空白文本）
    pub fn is_empty_text(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }
}

// ==========================================
// HeaderLayout - 表头布局
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderLayout {
    SingleHeader,            // 第 1 行表头，第 2 行起数据
    GroupedHeader,           // 第 1 行分组表头，第 2 行列表头，第 3 行起数据
    GroupedWithInstructions, // 第 3 行为填写说明，第 4 行起数据
}

impl HeaderLayout {
    /// 列表头所在行（0 基）
    pub fn header_row_index(&self) -> usize {
        match self {
            HeaderLayout::SingleHeader => 0,
            HeaderLayout::GroupedHeader | HeaderLayout::GroupedWithInstructions => 1,
        }
    }

    /// 首个数据行（0 基）
    pub fn first_data_row_index(&self) -> usize {
        match self {
            HeaderLayout::SingleHeader => 1,
            HeaderLayout::GroupedHeader => 2,
            HeaderLayout::GroupedWithInstructions => 3,
        }
    }
}

// ==========================================
// RowMeta - 行元信息（身份与动作标记为独立成员）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMeta {
    pub row_number: usize,              // 工作表行号（1 基，与 Excel 一致）
    pub identity: Option<String>,       // 隐藏 _id 原文（格式由校验器检查）
    pub action: Option<ActionMarker>,   // Status 列
}

impl RowMeta {
    pub fn is_delete(&self) -> bool {
        self.action.as_ref().map(|a| a.is_delete()).unwrap_or(false)
    }
}

// ==========================================
// 各实体解析行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPart {
    pub meta: RowMeta,
    pub sku: Option<CellValue>,
    pub name: Option<CellValue>,
    pub category: Option<CellValue>,
    pub position: Option<CellValue>,
    pub notes: Option<CellValue>,
    pub image_url: Option<CellValue>,
    /// 品牌列: 品牌名 → 分号分隔的互换号列表原文
    pub brand_lists: BTreeMap<String, String>,
}

/// 子记录行对父配件的引用列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentColumns {
    pub part_identity: Option<String>, // _part_id 原文
    pub part_sku: Option<CellValue>,   // Part SKU（同批新增父配件的前向引用）
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedVehicleApplication {
    pub meta: RowMeta,
    pub parent: ParentColumns,
    pub make: Option<CellValue>,
    pub model: Option<CellValue>,
    pub year_start: Option<CellValue>,
    pub year_end: Option<CellValue>,
    pub engine: Option<CellValue>,
    pub notes: Option<CellValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCrossReference {
    pub meta: RowMeta,
    pub parent: ParentColumns,
    pub brand: Option<CellValue>,
    pub reference_sku: Option<CellValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAlias {
    pub meta: RowMeta,
    pub parent: ParentColumns,
    pub alias: Option<CellValue>,
    pub alias_type: Option<CellValue>,
    pub notes: Option<CellValue>,
}

/// 解析行公共访问
pub trait ParsedRow {
    fn meta(&self) -> &RowMeta;
}

impl ParsedRow for ParsedPart {
    fn meta(&self) -> &RowMeta {
        &self.meta
    }
}

impl ParsedRow for ParsedVehicleApplication {
    fn meta(&self) -> &RowMeta {
        &self.meta
    }
}

impl ParsedRow for ParsedCrossReference {
    fn meta(&self) -> &RowMeta {
        &self.meta
    }
}

impl ParsedRow for ParsedAlias {
    fn meta(&self) -> &RowMeta {
        &self.meta
    }
}

// ==========================================
// ParsedSheet - 单个工作表解析结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSheet<R> {
    pub name: String,                  // 工作表名（原文）
    pub present: bool,                 // 工作簿中是否存在
    pub layout: Option<HeaderLayout>,  // 识别出的表头布局（空表为 None）
    pub columns: Vec<String>,          // 已识别列键
    pub unknown_columns: Vec<String>,  // 无法识别的表头原文
    pub rows: Vec<R>,
}

impl<R> ParsedSheet<R> {
    /// 可选工作表缺失时的默认值
    pub fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            present: false,
            layout: None,
            columns: Vec::new(),
            unknown_columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn has_column(&self, key: &str) -> bool {
        self.columns.iter().any(|c| c == key)
    }
}

// ==========================================
// ParsedWorkbook - 工作簿解析结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedWorkbook {
    pub parts: ParsedSheet<ParsedPart>,
    pub vehicle_applications: ParsedSheet<ParsedVehicleApplication>,
    pub cross_references: ParsedSheet<ParsedCrossReference>,
    pub aliases: ParsedSheet<ParsedAlias>,
}

impl ParsedWorkbook {
    /// 工作簿是否声明为 "再导出"（Parts 表带隐藏 _id 列）
    pub fn is_reexport(&self) -> bool {
        self.parts.has_column(columns::ID)
    }

    /// 全部数据行数
    pub fn total_rows(&self) -> usize {
        self.parts.rows.len()
            + self.vehicle_applications.rows.len()
            + self.cross_references.rows.len()
            + self.aliases.rows.len()
    }
}
