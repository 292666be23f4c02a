// ==========================================
// 配件目录同步 - 导入流水线配置读取 Trait
// ==========================================
// 职责: 定义校验 / 差异 / 执行阶段所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::importer::retry::RetryPolicy;
use crate::importer::validator::ValidationRules;
use async_trait::async_trait;
use std::error::Error;

/// 配置层 Result 别名
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// PipelineConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait PipelineConfigReader: Send + Sync {
    /// 获取校验参数
    ///
    /// # 默认值
    /// - 年份范围 1900..=当前年份+2
    /// - 长度上限 SKU 64 / 名称 255 / 备注 2000 / URL 2048
    async fn get_validation_rules(&self) -> ConfigResult<ValidationRules>;

    /// 获取写入 / 恢复的重试策略
    ///
    /// # 默认值
    /// - 3 次，初始 100ms，×2，上限 2s
    async fn get_retry_policy(&self) -> ConfigResult<RetryPolicy>;

    /// 获取 ACTIVE 导入记录保留条数（基线记录不计入）
    ///
    /// # 默认值
    /// - 10
    async fn get_snapshot_retention(&self) -> ConfigResult<usize>;

    /// 获取品牌列表成员的删除前缀
    ///
    /// # 默认值
    /// - "DEL:"
    async fn get_list_delete_prefix(&self) -> ConfigResult<String>;
}
