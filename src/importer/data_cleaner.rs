// ==========================================
// 配件目录同步 - 数据清洗工具
// ==========================================
// 职责: 表头归一化 / 比对归一化 / Excel 日期转换 / 年份解析 / 列表拆分
// ==========================================

use crate::domain::natural_key;
use crate::domain::workbook::columns;
use crate::domain::CellValue;
use chrono::{Duration, NaiveDate};
use std::collections::HashSet;

// ==========================================
// 表头
// ==========================================

/// 表头归一化: TRIM + 小写 + 空白/连字符转下划线 + 合并连续下划线
///
/// "Image URL" → "image_url"，"_part_id" 保持不变
pub fn normalize_header(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_underscore = false;
    for c in lowered.chars() {
        let c = if c.is_whitespace() || c == '-' { '_' } else { c };
        if c == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(c);
    }
    out
}

/// 归一化表头 → 规范列键（处理常见别名）
pub fn canonical_column(raw: &str) -> String {
    let key = normalize_header(raw);
    match key.as_str() {
        "action" => columns::STATUS.to_string(),
        "image" | "imageurl" => columns::IMAGE_URL.to_string(),
        "part_number" | "part_no" => columns::SKU.to_string(),
        "year_from" => columns::YEAR_START.to_string(),
        "year_to" => columns::YEAR_END.to_string(),
        "parent_sku" => columns::PART_SKU.to_string(),
        _ => key,
    }
}

/// 品牌列表头 "Brand: Dorman" → Some("Dorman")
pub fn brand_from_header(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if !normalize_header(trimmed).starts_with(columns::BRAND_COLUMN_PREFIX) {
        return None;
    }
    let (_, brand) = trimmed.split_once(':')?;
    let brand = brand.trim();
    if brand.is_empty() {
        None
    } else {
        Some(brand.to_string())
    }
}

// ==========================================
// 比对归一化
// ==========================================

/// 文本比对归一化: TRIM + 合并内部空白
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 单元格 → 比对用文本（数值 2020 与文本 "2020" 归一为同一结果）
pub fn normalize_cell(value: &CellValue) -> String {
    normalize_text(&value.to_text())
}

/// 单元格 → 可选文本字段（显式空文本表示清空）
///
/// 存储值保留原文（仅去首尾空白），内部换行与空白不做合并；
/// 比对统一走 `same_optional`
pub fn optional_text(value: &CellValue) -> Option<String> {
    let text = value.to_text();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// 可选字段比对（None 与空串视为相同）
pub fn same_optional(a: &Option<String>, b: &Option<String>) -> bool {
    let norm = |v: &Option<String>| v.as_deref().map(normalize_text).unwrap_or_default();
    norm(a) == norm(b)
}

// ==========================================
// 日期 / 数值
// ==========================================

/// Excel 序列日期 → 规范文本
///
/// 整数部分为日期（1899-12-30 起算），有小数部分时追加时间；
/// 序列值超出可表示的日期范围时返回 None
pub fn excel_serial_to_text(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc();
    let seconds = ((serial - days) * 86_400.0).round() as i64;
    let datetime = base
        .checked_add_signed(Duration::try_days(days as i64)?)?
        .checked_add_signed(Duration::try_seconds(seconds)?)?;

    if seconds == 0 {
        Some(datetime.format("%Y-%m-%d").to_string())
    } else {
        Some(datetime.format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

/// 年份解析（数值须为整数；文本须为整数写法）
pub fn parse_year(value: &CellValue) -> Option<i32> {
    match value {
        CellValue::Number(n) => {
            if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                Some(*n as i32)
            } else {
                None
            }
        }
        CellValue::Text(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i32>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.fract() == 0.0 && n.abs() < i32::MAX as f64)
                    .map(|n| n as i32)
            })
        }
        CellValue::Bool(_) => None,
    }
}

// ==========================================
// 分号列表
// ==========================================

/// 分号列表拆分结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListTokens {
    pub keep: Vec<String>,       // 保留 / 新增的成员
    pub remove: Vec<String>,     // 带删除前缀的成员（已去前缀）
    pub duplicates: Vec<String>, // 重复出现的成员（仅首次生效）
}

impl ListTokens {
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty() && self.remove.is_empty()
    }
}

/// 拆分 "A; DEL:B; C"
///
/// 前缀比较不区分大小写；同一成员重复出现时按自然键去重，首次出现生效
pub fn split_list_tokens(raw: &str, delete_prefix: &str) -> ListTokens {
    let prefix_upper = delete_prefix.trim().to_uppercase();
    let mut tokens = ListTokens::default();
    let mut seen: HashSet<String> = HashSet::new();

    for piece in raw.split(';') {
        let token = normalize_text(piece);
        if token.is_empty() {
            continue;
        }

        let stripped = token
            .get(..prefix_upper.len())
            .filter(|head| !prefix_upper.is_empty() && head.to_uppercase() == prefix_upper)
            .map(|_| normalize_text(&token[prefix_upper.len()..]));
        let (member, is_remove) = match stripped {
            Some(member) => (member, true),
            None => (token, false),
        };
        if member.is_empty() {
            continue;
        }

        if !seen.insert(natural_key(&member)) {
            tokens.duplicates.push(member);
            continue;
        }
        if is_remove {
            tokens.remove.push(member);
        } else {
            tokens.keep.push(member);
        }
    }

    tokens
}
