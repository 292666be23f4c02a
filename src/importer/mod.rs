// ==========================================
// 配件目录同步 - 导入层
// ==========================================
// 流水线: 解析 → 校验 → 差异 → 原子写入 → 快照回滚
// 支持: xlsx 工作簿（导入 / 导出）
// ==========================================

// 模块声明
pub mod data_cleaner;
pub mod diff_engine;
pub mod error;
pub mod executor;
pub mod exporter;
pub mod field_mapper;
pub mod file_parser;
pub mod header_layout;
pub mod part_resolver;
pub mod pipeline_trait;
pub mod retry;
pub mod rollback;
pub mod validator;

// 重导出核心类型
pub use diff_engine::DiffEngine;
pub use error::{
    ExportError, ImportError, ImportResult, ParseError, RollbackError, RollbackResult,
};
pub use executor::{
    build_change_set, ImportExecutor, ImportMetadata, ImportOutcome, DEFAULT_SNAPSHOT_RETENTION,
};
pub use exporter::export_workbook;
pub use field_mapper::FieldMapper as FieldMapperImpl;
pub use file_parser::XlsxWorkbookParser;
pub use retry::{retry_with_backoff, RetryFailure, RetryOutcome, RetryPolicy};
pub use rollback::{RollbackOutcome, RollbackService};
pub use validator::{ValidationEngine, ValidationRules};

// 重导出 Trait 接口
pub use pipeline_trait::{CatalogValidator, DiffCalculator, FieldMapper, WorkbookParser};
