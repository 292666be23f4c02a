// ==========================================
// 配件目录同步 - 导入模块错误类型
// ==========================================
// 分层:
// - ParseError: 文件结构错误（致命，无部分结果）
// - ImportError: 执行阶段错误（区分可重试 / 不可重试 / 历史写入失败）
// - RollbackError: 回滚错误（顺序违规 / 冲突 / 恢复失败）
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::{ConflictingRecord, ImportSummary};
use crate::repository::error::RepositoryError;
use thiserror::Error;
use uuid::Uuid;

/// 工作簿解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("工作簿无法读取: {0}")]
    InvalidWorkbook(String),

    #[error("缺少必需工作表: {sheet}")]
    MissingSheet { sheet: String },

    #[error("工作表 {sheet} 的表头布局无法识别（第 1、2 行均不像列表头）")]
    UnrecognizedHeaderLayout { sheet: String },

    #[error("工作表 {sheet} 的表头布局存在歧义（第 1、2 行同样像列表头）")]
    AmbiguousHeaderLayout { sheet: String },
}

impl From<calamine::XlsxError> for ParseError {
    fn from(err: calamine::XlsxError) -> Self {
        ParseError::InvalidWorkbook(err.to_string())
    }
}

/// 导入执行错误
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("存在 {count} 行无法归类的数据（身份不存在等）")]
    UnresolvedRows { count: usize },

    #[error("子记录引用的父配件 SKU 无法解析: {sku}")]
    UnresolvedParent { sku: String },

    #[error("导入前快照读取失败: {0}")]
    SnapshotFailed(String),

    #[error("数据写入失败（已尝试 {attempts} 次，可重试={retryable}）: {message}")]
    WriteFailed {
        attempts: u32,
        retryable: bool,
        message: String,
    },

    /// 数据已提交，但导入记录未能保存：本次导入不可回滚
    #[error("数据已写入，但导入记录保存失败（import_id={import_id}，本次导入不可回滚）: {message}")]
    HistoryWriteFailed {
        import_id: Uuid,
        summary: ImportSummary,
        message: String,
    },
}

/// 回滚错误
#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("导入记录不存在: {0}")]
    NotFound(Uuid),

    #[error("基线记录不可回滚: {0}")]
    BaselineNotRollbackable(Uuid),

    #[error("只能回滚最近一次导入: 请求 {requested}，应先回滚 {most_recent}")]
    NotMostRecent { requested: Uuid, most_recent: Uuid },

    #[error("导入 {import_id} 之后有 {} 条记录被人工修改，回滚已阻止", .conflicts.len())]
    ConflictDetected {
        import_id: Uuid,
        conflicts: Vec<ConflictingRecord>,
    },

    #[error("快照恢复失败（已尝试 {attempts} 次，数据未变更）: {message}")]
    RestoreFailed { attempts: u32, message: String },

    #[error("导入记录快照损坏: {0}")]
    CorruptSnapshot(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// 工作簿导出错误
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("工作簿生成失败: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
pub type RollbackResult<T> = Result<T, RollbackError>;
