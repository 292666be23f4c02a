// ==========================================
// 配件目录同步 - 表头布局识别
// ==========================================
// 输入: 工作表前 3 行的文本（已 TRIM）
// 输出: SingleHeader / GroupedHeader / GroupedWithInstructions
// 纯函数，不依赖 calamine，可单独测试
// ==========================================
// 规则:
// 1. 第 1 行像列表头 → SingleHeader
// 2. 第 2 行像列表头 → GroupedHeader（第 3 行为填写说明时升级为 GroupedWithInstructions）
// 3. 两行都像 → 命中列数多者；命中数相同 → 歧义错误
// 4. 两行都不像 → UnrecognizedHeaderLayout
// ==========================================

use crate::domain::HeaderLayout;
use crate::importer::data_cleaner::normalize_header;
use crate::importer::error::ParseError;
use crate::domain::workbook::columns;

/// 填写说明行的特征短语（小写）
const INSTRUCTION_PHRASES: [&str; 8] = [
    "required",
    "optional",
    "enter",
    "format",
    "leave blank",
    "semicolon",
    "e.g.",
    "do not edit",
];

/// 单行的表头特征
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowScore {
    matched: usize,
    non_empty: usize,
}

impl RowScore {
    /// 至少一个命中，且命中数不少于非空单元格的一半
    fn looks_like_header(&self) -> bool {
        self.matched > 0 && self.matched * 2 >= self.non_empty
    }
}

fn score_row(row: &[String], known_columns: &[&str]) -> RowScore {
    let mut score = RowScore {
        matched: 0,
        non_empty: 0,
    };
    for cell in row {
        if cell.trim().is_empty() {
            continue;
        }
        score.non_empty += 1;
        let key = normalize_header(cell);
        if known_columns.contains(&key.as_str())
            || key.starts_with(columns::BRAND_COLUMN_PREFIX)
        {
            score.matched += 1;
        }
    }
    score
}

/// 按词边界匹配短语（避免 "center" 命中 "enter"）
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack.match_indices(phrase).any(|(start, matched)| {
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[start + matched.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// 第 3 行是否为填写说明
fn is_instruction_row(row: &[String]) -> bool {
    row.iter().any(|cell| {
        let lower = cell.to_lowercase();
        INSTRUCTION_PHRASES
            .iter()
            .any(|p| contains_phrase(&lower, p))
    })
}

/// 识别表头布局
///
/// # 参数
/// - sheet: 工作表名（错误定位用）
/// - rows: 前 3 行（不足 3 行时按实际行数）
/// - known_columns: 该工作表可识别的列键（归一化后）
pub fn classify(
    sheet: &str,
    rows: &[Vec<String>],
    known_columns: &[&str],
) -> Result<HeaderLayout, ParseError> {
    let empty = Vec::new();
    let row1 = rows.first().unwrap_or(&empty);
    let row2 = rows.get(1).unwrap_or(&empty);
    let row3 = rows.get(2).unwrap_or(&empty);

    let score1 = score_row(row1, known_columns);
    let score2 = score_row(row2, known_columns);

    let grouped = || {
        if is_instruction_row(row3) {
            HeaderLayout::GroupedWithInstructions
        } else {
            HeaderLayout::GroupedHeader
        }
    };

    match (score1.looks_like_header(), score2.looks_like_header()) {
        (true, false) => Ok(HeaderLayout::SingleHeader),
        (false, true) => Ok(grouped()),
        (true, true) => {
            if score1.matched > score2.matched {
                Ok(HeaderLayout::SingleHeader)
            } else if score2.matched > score1.matched {
                Ok(grouped())
            } else {
                Err(ParseError::AmbiguousHeaderLayout {
                    sheet: sheet.to_string(),
                })
            }
        }
        (false, false) => Err(ParseError::UnrecognizedHeaderLayout {
            sheet: sheet.to_string(),
        }),
    }
}
