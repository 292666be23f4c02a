// ==========================================
// 配件目录同步 - 校验结果模型
// ==========================================
// 每条问题都带稳定的机器可读代码 + 工作表 + 行号 + 列（如适用）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// Severity - 问题级别
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,   // 阻断
    Warning, // 提示，不阻断
}

// ==========================================
// IssueCode - 问题代码
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    // ===== 阻断 =====
    MissingIdentityColumn,
    RequiredFieldEmpty,
    DuplicateNaturalKey,
    SkuAlreadyExists,
    OrphanedReference,
    InvalidIdentity,
    IdentityNotFound,
    DuplicateIdentity,
    InvalidNumber,
    YearRangeInverted,
    YearOutOfRange,
    FieldTooLong,
    ChildOfDeletedParent,

    // ===== 提示 =====
    UnknownColumn,
    UnknownActionMarker,
    DeleteWithoutIdentity,
    DeleteCascades,
    ListMemberOmitted,
    DuplicateListMember,
    ExistingRecordMissingFromSheet,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::MissingIdentityColumn => "MISSING_IDENTITY_COLUMN",
            IssueCode::RequiredFieldEmpty => "REQUIRED_FIELD_EMPTY",
            IssueCode::DuplicateNaturalKey => "DUPLICATE_NATURAL_KEY",
            IssueCode::SkuAlreadyExists => "SKU_ALREADY_EXISTS",
            IssueCode::OrphanedReference => "ORPHANED_REFERENCE",
            IssueCode::InvalidIdentity => "INVALID_IDENTITY",
            IssueCode::IdentityNotFound => "IDENTITY_NOT_FOUND",
            IssueCode::DuplicateIdentity => "DUPLICATE_IDENTITY",
            IssueCode::InvalidNumber => "INVALID_NUMBER",
            IssueCode::YearRangeInverted => "YEAR_RANGE_INVERTED",
            IssueCode::YearOutOfRange => "YEAR_OUT_OF_RANGE",
            IssueCode::FieldTooLong => "FIELD_TOO_LONG",
            IssueCode::ChildOfDeletedParent => "CHILD_OF_DELETED_PARENT",
            IssueCode::UnknownColumn => "UNKNOWN_COLUMN",
            IssueCode::UnknownActionMarker => "UNKNOWN_ACTION_MARKER",
            IssueCode::DeleteWithoutIdentity => "DELETE_WITHOUT_IDENTITY",
            IssueCode::DeleteCascades => "DELETE_CASCADES",
            IssueCode::ListMemberOmitted => "LIST_MEMBER_OMITTED",
            IssueCode::DuplicateListMember => "DUPLICATE_LIST_MEMBER",
            IssueCode::ExistingRecordMissingFromSheet => "EXISTING_RECORD_MISSING_FROM_SHEET",
        }
    }

    /// 代码对应的默认级别
    pub fn severity(&self) -> Severity {
        match self {
            IssueCode::UnknownColumn
            | IssueCode::UnknownActionMarker
            | IssueCode::DeleteWithoutIdentity
            | IssueCode::DeleteCascades
            | IssueCode::ListMemberOmitted
            | IssueCode::DuplicateListMember
            | IssueCode::ExistingRecordMissingFromSheet => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// ValidationIssue - 单条问题
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub severity: Severity,
    pub sheet: String,
    pub row: Option<usize>,       // 工作表行号（1 基），表级问题为 None
    pub column: Option<String>,   // 列键
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        code: IssueCode,
        sheet: &str,
        row: Option<usize>,
        column: Option<&str>,
        message: String,
    ) -> Self {
        Self {
            code,
            severity: code.severity(),
            sheet: sheet.to_string(),
            row,
            column: column.map(|c| c.to_string()),
            message,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.sheet)?;
        if let Some(row) = self.row {
            write!(f, " 行 {}", row)?;
        }
        if let Some(column) = &self.column {
            write!(f, " 列 {}", column)?;
        }
        write!(f, ": {}", self.message)
    }
}

// ==========================================
// ValidationReport - 校验报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// 按级别拆分问题列表
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|i| i.severity == Severity::Error);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn has_code(&self, code: IssueCode) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|i| i.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_partitions_by_severity() {
        let report = ValidationReport::from_issues(vec![
            ValidationIssue::new(IssueCode::UnknownColumn, "Parts", None, Some("Colour"), "ignored".to_string()),
            ValidationIssue::new(IssueCode::RequiredFieldEmpty, "Parts", Some(4), Some("sku"), "empty".to_string()),
        ]);

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.has_code(IssueCode::UnknownColumn));
        assert!(!report.has_code(IssueCode::FieldTooLong));
    }

    #[test]
    fn test_issue_code_wire_format() {
        let json = serde_json::to_string(&IssueCode::ExistingRecordMissingFromSheet).unwrap();
        assert_eq!(json, format!("\"{}\"", IssueCode::ExistingRecordMissingFromSheet.as_str()));
        assert_eq!(IssueCode::ChildOfDeletedParent.severity(), Severity::Error);
        assert_eq!(IssueCode::ListMemberOmitted.severity(), Severity::Warning);

        let issue = ValidationIssue::new(IssueCode::InvalidNumber, "Vehicle Applications", Some(7), Some("year_start"), "bad".to_string());
        assert_eq!(issue.to_string(), "[INVALID_NUMBER] Vehicle Applications 行 7 列 year_start: bad");
    }
}
