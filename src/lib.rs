// ==========================================
// 配件目录同步 - 核心库
// ==========================================
// 流水线: 工作簿解析 → 校验 → 差异 → 原子写入 → 快照回滚
// 技术栈: Rust + SQLite + xlsx
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 解析 / 校验 / 差异 / 执行 / 回滚 / 导出
pub mod importer;

// 配置层 - 流水线参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

pub use api::{ApiError, ImportApi, PreviewResponse};
pub use domain::{CatalogSnapshot, DiffResult, ImportRecordInfo, ValidationReport};
pub use importer::{ImportOutcome, RollbackOutcome};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "配件目录同步";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
