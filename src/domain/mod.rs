// ==========================================
// 配件目录同步 - 领域模型层
// ==========================================
// 职责: 定义实体、解析行、差异、校验、导入记录类型
// 红线: 不含数据访问逻辑,不含导入流程逻辑
// ==========================================

pub mod catalog;
pub mod diff;
pub mod import_record;
pub mod types;
pub mod validation;
pub mod workbook;

// 重导出核心类型
pub use catalog::{
    natural_key, AliasFields, AliasRecord, AuditStamp, CatalogSnapshot, ChildFields,
    CrossReferenceFields, CrossReferenceRecord, PartFields, PartRecord, PartRef, StoredRecord,
    TableCounts, VehicleApplicationFields, VehicleApplicationRecord,
};
pub use diff::{ChangeCounts, DiffEntry, DiffResult, DiffSummary, EntityDiff, UnresolvedRow};
pub use import_record::{
    ChangeSet, ConflictingRecord, EntityWriteCounts, ImportRecord, ImportRecordInfo,
    ImportRecordState, ImportSummary, RecordUpsert, RestoredCounts, TableChanges, WriteCounts,
};
pub use types::{
    is_automation_actor, ActionMarker, DiffOperation, EntityKind, IMPORT_ACTOR, ROLLBACK_ACTOR,
};
pub use validation::{IssueCode, Severity, ValidationIssue, ValidationReport};
pub use workbook::{
    CellValue, HeaderLayout, ParentColumns, ParsedAlias, ParsedCrossReference, ParsedPart,
    ParsedRow, ParsedSheet, ParsedVehicleApplication, ParsedWorkbook, RowMeta,
};
