// ==========================================
// 配件目录同步 - 导入管道 Trait
// ==========================================
// 职责: 定义解析 / 映射 / 校验 / 差异计算的接口（不包含实现）
// 红线: 以下接口均为纯计算，不访问数据库
// ==========================================

use crate::domain::{
    CatalogSnapshot, DiffResult, ParsedAlias, ParsedCrossReference, ParsedPart,
    ParsedVehicleApplication, ParsedWorkbook, ValidationReport,
};
use crate::importer::error::ParseError;
use crate::importer::field_mapper::RawRow;

// ==========================================
// WorkbookParser Trait
// ==========================================
// 实现者: XlsxWorkbookParser
pub trait WorkbookParser: Send + Sync {
    /// 解析工作簿缓冲区
    ///
    /// # 返回
    /// - Ok(ParsedWorkbook): 各工作表的类型化行
    /// - Err(ParseError): 文件损坏 / 缺少必需工作表 / 表头布局无法识别
    fn parse(&self, buffer: &[u8]) -> Result<ParsedWorkbook, ParseError>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// 实现者: FieldMapper
// 返回 None 表示该行应被丢弃（仅有身份列）
pub trait FieldMapper: Send + Sync {
    fn map_part(&self, raw: RawRow) -> Option<ParsedPart>;
    fn map_vehicle_application(&self, raw: RawRow) -> Option<ParsedVehicleApplication>;
    fn map_cross_reference(&self, raw: RawRow) -> Option<ParsedCrossReference>;
    fn map_alias(&self, raw: RawRow) -> Option<ParsedAlias>;
}

// ==========================================
// CatalogValidator Trait
// ==========================================
// 实现者: ValidationEngine
pub trait CatalogValidator: Send + Sync {
    /// 全部规则均执行（不短路），返回错误与告警
    fn validate(&self, parsed: &ParsedWorkbook, existing: &CatalogSnapshot) -> ValidationReport;
}

// ==========================================
// DiffCalculator Trait
// ==========================================
// 实现者: DiffEngine
pub trait DiffCalculator: Send + Sync {
    fn diff(&self, parsed: &ParsedWorkbook, existing: &CatalogSnapshot) -> DiffResult;
}
