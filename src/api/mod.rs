// ==========================================
// 配件目录同步 - API 层
// ==========================================
// 职责: 提供导入流水线的业务 API 接口,供命令行调用
// ==========================================

pub mod error;
pub mod import_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use import_api::{ImportApi, PreviewResponse};
