// ==========================================
// 配件目录同步 - 配置层
// ==========================================
// 职责: 导入流水线参数管理（校验规则 / 重试 / 快照保留）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod pipeline_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use pipeline_config_trait::{ConfigResult, PipelineConfigReader};
