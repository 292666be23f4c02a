// ==========================================
// 配件目录同步 - 导入API
// ==========================================
// 职责: 封装 预览 / 执行 / 回滚 / 导出 / 历史查询
// 预览与执行共用同一条 解析 → 校验 → 差异 流水线
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, PipelineConfigReader};
use crate::domain::{
    DiffResult, ImportRecordInfo, ParsedWorkbook, TableCounts, ValidationIssue, ValidationReport,
};
use crate::importer::exporter::export_workbook;
use crate::importer::{
    CatalogValidator, DiffCalculator, DiffEngine, ImportExecutor, ImportMetadata, ImportOutcome,
    RollbackOutcome, RollbackService, ValidationEngine, WorkbookParser, XlsxWorkbookParser,
};
use crate::repository::{
    open_shared_connection, CatalogRepository, ImportHistoryRepository, SqliteCatalogRepository,
    SqliteImportHistoryRepository,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 预览响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    /// 是否可以执行导入（无阻断错误）
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub diff: DiffResult,
}

/// 流水线中间结果
struct Analysis {
    parsed: ParsedWorkbook,
    report: ValidationReport,
    diff: DiffResult,
}

/// 导入API
pub struct ImportApi<
    C = SqliteCatalogRepository,
    H = SqliteImportHistoryRepository,
    P = ConfigManager,
> where
    C: CatalogRepository,
    H: ImportHistoryRepository,
    P: PipelineConfigReader,
{
    catalog: Arc<C>,
    history: Arc<H>,
    config: Arc<P>,
    parser: XlsxWorkbookParser,
}

impl ImportApi {
    /// 打开数据库（必要时建表）并创建基于 SQLite 的 ImportApi
    pub fn open(db_path: &str) -> ApiResult<Self> {
        let conn = open_shared_connection(db_path)?;
        let config = ConfigManager::from_connection(conn.clone())
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;

        Ok(Self::new(
            Arc::new(SqliteCatalogRepository::from_connection(conn.clone())),
            Arc::new(SqliteImportHistoryRepository::from_connection(conn)),
            Arc::new(config),
        ))
    }
}

impl<C, H, P> ImportApi<C, H, P>
where
    C: CatalogRepository,
    H: ImportHistoryRepository,
    P: PipelineConfigReader,
{
    pub fn new(catalog: Arc<C>, history: Arc<H>, config: Arc<P>) -> Self {
        Self {
            catalog,
            history,
            config,
            parser: XlsxWorkbookParser::default(),
        }
    }

    /// 解析 → 校验 → 差异（只读）
    async fn analyze(&self, buffer: &[u8]) -> ApiResult<Analysis> {
        let parsed = self.parser.parse(buffer)?;

        let rules = self
            .config
            .get_validation_rules()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        let existing = self.catalog.load_catalog().await?;

        let diff_engine = DiffEngine::new(&rules.list_delete_prefix);
        let report = ValidationEngine::new(rules).validate(&parsed, &existing);
        let diff = diff_engine.diff(&parsed, &existing);

        Ok(Analysis {
            parsed,
            report,
            diff,
        })
    }

    /// 预览导入（不写库）
    ///
    /// # 返回
    /// - Ok(PreviewResponse): 校验结果与差异
    /// - Err(ApiError::Parse): 工作簿结构错误（无部分结果）
    #[instrument(skip_all, fields(bytes = buffer.len()))]
    pub async fn preview(&self, buffer: &[u8]) -> ApiResult<PreviewResponse> {
        let Analysis { report, diff, .. } = self.analyze(buffer).await?;

        let total = diff.summary.total;
        info!(
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            adds = total.adds,
            updates = total.updates,
            deletes = total.deletes,
            unchanged = total.unchanged,
            "预览完成"
        );

        Ok(PreviewResponse {
            valid: report.valid,
            errors: report.errors,
            warnings: report.warnings,
            diff,
        })
    }

    /// 执行导入
    ///
    /// # 参数
    /// - buffer: 工作簿内容
    /// - file_name: 原始文件名（写入导入记录）
    /// - imported_by: 操作者
    ///
    /// # 返回
    /// - Err(ApiError::ValidationFailed): 存在阻断错误，未执行任何写入
    #[instrument(skip(self, buffer), fields(bytes = buffer.len()))]
    pub async fn execute(
        &self,
        buffer: &[u8],
        file_name: &str,
        imported_by: &str,
    ) -> ApiResult<ImportOutcome> {
        if imported_by.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作者不能为空".to_string()));
        }

        let Analysis {
            parsed,
            report,
            diff,
        } = self.analyze(buffer).await?;
        if !report.valid {
            warn!(errors = report.errors.len(), "校验未通过，拒绝执行导入");
            return Err(ApiError::ValidationFailed(report));
        }

        let retry_policy = self
            .config
            .get_retry_policy()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        let retention = self
            .config
            .get_snapshot_retention()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;

        let executor = ImportExecutor::new(self.catalog.clone(), self.history.clone())
            .with_retry_policy(retry_policy)
            .with_retention(retention);
        let metadata = ImportMetadata {
            file_name: file_name.to_string(),
            file_size: buffer.len() as u64,
            imported_by: imported_by.trim().to_string(),
        };
        Ok(executor.execute(&parsed, &diff, metadata).await?)
    }

    /// 回滚指定导入（必须是最近一次 ACTIVE 导入）
    pub async fn rollback(&self, import_id: Uuid) -> ApiResult<RollbackOutcome> {
        Ok(self.rollback_service().await?.rollback(import_id).await?)
    }

    /// 当前可回滚的导入
    pub async fn rollback_target(&self) -> ApiResult<Option<ImportRecordInfo>> {
        Ok(self.rollback_service().await?.rollback_target().await?)
    }

    async fn rollback_service(&self) -> ApiResult<RollbackService<C, H>> {
        let retry_policy = self
            .config
            .get_retry_policy()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        Ok(RollbackService::new(self.catalog.clone(), self.history.clone())
            .with_retry_policy(retry_policy))
    }

    /// 导出当前目录为 xlsx
    pub async fn export(&self) -> ApiResult<Vec<u8>> {
        let snapshot = self.catalog.load_catalog().await?;
        Ok(export_workbook(&snapshot)?)
    }

    /// ACTIVE 导入记录，最新在前
    pub async fn list_history(&self, limit: Option<usize>) -> ApiResult<Vec<ImportRecordInfo>> {
        Ok(self.history.list_active(limit).await?)
    }

    /// 目录各表行数
    pub async fn catalog_counts(&self) -> ApiResult<TableCounts> {
        Ok(self.catalog.count_rows().await?)
    }
}
