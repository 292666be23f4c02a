// ==========================================
// 导入流水线集成测试
// ==========================================
// 测试目标: 预览 / 执行 / 导出 在真实 SQLite 上的端到端行为
// ==========================================

mod test_helpers;

use async_trait::async_trait;
use catalog_sync::api::{ApiError, ImportApi};
use catalog_sync::config::ConfigManager;
use catalog_sync::domain::{
    CatalogSnapshot, ChangeSet, ConflictingRecord, IssueCode, RestoredCounts, TableCounts,
    WriteCounts,
};
use catalog_sync::importer::ImportError;
use catalog_sync::logging;
use catalog_sync::repository::{
    CatalogRepository, RepositoryError, RepositoryResult, SqliteCatalogRepository,
    SqliteImportHistoryRepository,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use test_helpers::{
    base_workbook, create_test_env, id, import_base, n, parts_only_reexport, t, Cell,
    WorkbookBuilder, PART_HEADERS, VEHICLE_HEADERS,
};

#[tokio::test]
async fn test_first_import_populates_catalog() {
    logging::init_test();
    let env = create_test_env();
    let api = env.api();

    let preview = api.preview(&base_workbook()).await.expect("preview");
    assert!(preview.valid, "errors: {:?}", preview.errors);
    assert_eq!(preview.diff.summary.total.adds, 7);
    assert_eq!(api.catalog_counts().await.unwrap(), TableCounts::default());

    let outcome = api
        .execute(&base_workbook(), "base.xlsx", "alice")
        .await
        .expect("execute");
    assert_eq!(outcome.summary.adds, 7);
    assert_eq!(outcome.attempts, 1);

    let counts = api.catalog_counts().await.unwrap();
    assert_eq!(counts.parts, 2);
    assert_eq!(counts.vehicle_applications, 2);
    assert_eq!(counts.cross_references, 2);
    assert_eq!(counts.aliases, 1);

    // 子记录按同批新增配件的 SKU 挂接
    let snapshot = env.snapshot().await;
    let bp1 = env.part_ids().await["BP-1"];
    assert_eq!(snapshot.cross_references_for(bp1, "dorman").len(), 2);
    assert!(snapshot
        .parts
        .values()
        .all(|p| p.audit.updated_by == "system:import"));

    let history = api.list_history(None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, outcome.import_id);
    assert_eq!(history[0].imported_by, "alice");
    assert_eq!(history[0].file_name, "base.xlsx");
}

#[tokio::test]
async fn test_export_then_preview_yields_zero_changes() {
    logging::init_test();
    let env = create_test_env();
    import_base(&env).await;
    let api = env.api();

    let exported = api.export().await.expect("export");
    let preview = api.preview(&exported).await.expect("preview");

    assert!(preview.valid, "errors: {:?}", preview.errors);
    let total = preview.diff.summary.total;
    assert_eq!((total.adds, total.updates, total.deletes), (0, 0, 0));
    assert_eq!(total.unchanged, 7);
    assert!(!preview.diff.has_changes());
}

#[tokio::test]
async fn test_reimporting_export_is_idempotent() {
    logging::init_test();
    let env = create_test_env();
    import_base(&env).await;
    let api = env.api();
    let before = env.snapshot().await;

    let exported = api.export().await.expect("export");
    let outcome = api
        .execute(&exported, "export.xlsx", "bob")
        .await
        .expect("re-import");

    assert_eq!(outcome.summary.adds + outcome.summary.updates + outcome.summary.deletes, 0);
    let after = env.snapshot().await;
    assert_eq!(after.parts, before.parts);
    assert_eq!(after.vehicle_applications, before.vehicle_applications);
    assert_eq!(after.cross_references, before.cross_references);
    assert_eq!(after.aliases, before.aliases);
    assert_eq!(api.list_history(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_multiline_notes_survive_import_and_export() {
    logging::init_test();
    let env = create_test_env();
    import_base(&env).await;
    let bp1 = env.part_ids().await["BP-1"];
    let api = env.api();

    let workbook = parts_only_reexport(
        &["_id", "SKU", "Name", "Notes"],
        vec![vec![id(bp1), t("BP-1"), t("Brake Pad"), t("Torque to 80 Nm\nReplace shims")]],
    );
    api.execute(&workbook, "notes.xlsx", "bob").await.expect("execute");
    let part = &env.snapshot().await.parts[&bp1];
    assert_eq!(part.fields.notes.as_deref(), Some("Torque to 80 Nm\nReplace shims"));

    let exported = api.export().await.expect("export");
    let preview = api.preview(&exported).await.expect("preview");
    assert!(preview.valid, "errors: {:?}", preview.errors);
    assert!(!preview.diff.has_changes());
}

#[tokio::test]
async fn test_update_changes_only_provided_fields() {
    logging::init_test();
    let env = create_test_env();
    import_base(&env).await;
    let bp1 = env.part_ids().await["BP-1"];
    let api = env.api();

    // Category 列不在工作表中 → 不参与比对
    let workbook = parts_only_reexport(
        &["_id", "SKU", "Name"],
        vec![vec![id(bp1), t("BP-1"), t("  Brake Pad Pro ")]],
    );
    let preview = api.preview(&workbook).await.expect("preview");
    assert!(preview.valid, "errors: {:?}", preview.errors);
    assert!(preview
        .warnings
        .iter()
        .any(|w| w.code == IssueCode::ExistingRecordMissingFromSheet));
    let entry = &preview.diff.parts.entries[0];
    assert_eq!(entry.changed_fields, vec!["name".to_string()]);

    api.execute(&workbook, "rename.xlsx", "bob").await.expect("execute");
    let part = &env.snapshot().await.parts[&bp1];
    assert_eq!(part.fields.name, "Brake Pad Pro");
    assert_eq!(part.fields.category.as_deref(), Some("Brakes"));
    assert_eq!(env.snapshot().await.parts.len(), 2);
}

#[tokio::test]
async fn test_delete_marker_wins_over_edits_and_cascades() {
    logging::init_test();
    let env = create_test_env();
    import_base(&env).await;
    let bp1 = env.part_ids().await["BP-1"];
    let api = env.api();

    let workbook = parts_only_reexport(
        &["_id", "Status", "SKU", "Name"],
        vec![vec![id(bp1), t("delete"), t("BP-1"), t("Renamed Pad")]],
    );
    let preview = api.preview(&workbook).await.expect("preview");
    assert!(preview.valid, "errors: {:?}", preview.errors);
    assert!(preview.warnings.iter().any(|w| w.code == IssueCode::DeleteCascades));
    assert_eq!(preview.diff.parts.counts().deletes, 1);
    assert_eq!(preview.diff.parts.counts().updates, 0);
    assert_eq!(preview.diff.summary.total.deletes, 5);

    api.execute(&workbook, "delete.xlsx", "bob").await.expect("execute");
    let counts = api.catalog_counts().await.unwrap();
    assert_eq!(counts.parts, 1);
    assert_eq!(counts.vehicle_applications, 1);
    assert_eq!(counts.cross_references, 0);
    assert_eq!(counts.aliases, 0);
}

#[tokio::test]
async fn test_brand_list_member_removal_is_isolated() {
    logging::init_test();
    let env = create_test_env();
    import_base(&env).await;
    let bp1 = env.part_ids().await["BP-1"];
    let api = env.api();

    // D-1 删除，D-2 省略（保留），D-3 新增
    let workbook = parts_only_reexport(
        &["_id", "SKU", "Name", "Brand: Dorman"],
        vec![vec![id(bp1), t("BP-1"), t("Brake Pad"), t("del:D-1; D-3")]],
    );
    let preview = api.preview(&workbook).await.expect("preview");
    assert!(preview.valid, "errors: {:?}", preview.errors);
    assert!(preview.warnings.iter().any(|w| w.code == IssueCode::ListMemberOmitted));

    api.execute(&workbook, "brands.xlsx", "bob").await.expect("execute");
    let snapshot = env.snapshot().await;
    let mut members: Vec<String> = snapshot
        .cross_references_for(bp1, "Dorman")
        .iter()
        .map(|r| r.fields.reference_sku.clone())
        .collect();
    members.sort();
    assert_eq!(members, vec!["D-2".to_string(), "D-3".to_string()]);
}

#[tokio::test]
async fn test_invalid_upload_is_rejected_without_writes() {
    logging::init_test();
    let env = create_test_env();
    let api = env.api();

    let workbook = WorkbookBuilder::new()
        .sheet("Parts", &PART_HEADERS, vec![vec![t("BP-1"), t("Brake Pad"), Cell::Blank, Cell::Blank]])
        .sheet(
            "Vehicle Applications",
            &VEHICLE_HEADERS,
            vec![
                vec![t("BP-1"), t("Toyota"), t("Camry"), n(2020.0), n(2018.0)],
                vec![t("NOPE"), t("Honda"), t("Civic"), n(2016.0), n(2019.0)],
            ],
        )
        .build();

    let err = api.execute(&workbook, "bad.xlsx", "alice").await.unwrap_err();
    let ApiError::ValidationFailed(report) = err else {
        panic!("expected validation failure, got {:?}", err);
    };
    assert!(report.has_code(IssueCode::YearRangeInverted));
    assert!(report.has_code(IssueCode::OrphanedReference));
    assert_eq!(api.catalog_counts().await.unwrap(), TableCounts::default());
    assert!(api.list_history(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_identity_is_reported_not_dropped() {
    logging::init_test();
    let env = create_test_env();
    import_base(&env).await;
    let api = env.api();

    let workbook = parts_only_reexport(
        &["_id", "SKU", "Name"],
        vec![vec![id(uuid::Uuid::new_v4()), t("GHOST-1"), t("Ghost")]],
    );
    let preview = api.preview(&workbook).await.expect("preview");

    assert!(!preview.valid);
    assert!(preview.errors.iter().any(|e| e.code == IssueCode::IdentityNotFound));
    assert_eq!(preview.diff.unresolved().len(), 1);
    assert_eq!(preview.diff.unresolved()[0].row_number, 2);
}

#[tokio::test]
async fn test_grouped_header_with_instructions_is_parsed() {
    logging::init_test();
    let env = create_test_env();
    let api = env.api();

    let workbook = WorkbookBuilder::new()
        .sheet_with_header_rows(
            "parts",
            vec![
                vec!["Part Info", "", "Extra"],
                vec!["SKU", "Name", "Colour"],
                vec!["Required", "Required", "Optional"],
            ],
            vec![vec![t("CL-1"), t("Clip"), t("Red")]],
        )
        .sheet(
            "Vehicle_Applications",
            &VEHICLE_HEADERS,
            vec![vec![t("CL-1"), t("Ford"), t("Focus"), t("2012"), n(2014.0)]],
        )
        .build();

    let preview = api.preview(&workbook).await.expect("preview");
    assert!(preview.valid, "errors: {:?}", preview.errors);
    assert!(preview.warnings.iter().any(|w| w.code == IssueCode::UnknownColumn));
    assert_eq!(preview.diff.parts.counts().adds, 1);
    assert_eq!(preview.diff.parts.entries[0].row_number, Some(4));
    assert_eq!(preview.diff.vehicle_applications.counts().adds, 1);
}

#[tokio::test]
async fn test_structural_errors_fail_parsing() {
    logging::init_test();
    let env = create_test_env();
    let api = env.api();

    let missing_sheet = WorkbookBuilder::new()
        .sheet("Parts", &PART_HEADERS, vec![vec![t("BP-1"), t("Brake Pad")]])
        .build();
    let err = api.preview(&missing_sheet).await.unwrap_err();
    assert!(matches!(err, ApiError::Parse(_)), "got {:?}", err);

    let unrecognized = WorkbookBuilder::new()
        .sheet("Parts", &["Foo", "Bar"], vec![vec![t("1"), t("2")]])
        .sheet("Vehicle Applications", &VEHICLE_HEADERS, Vec::new())
        .build();
    let err = api.preview(&unrecognized).await.unwrap_err();
    assert!(err.to_string().contains("Parts"), "got {}", err);

    let err = api.preview(b"not a workbook").await.unwrap_err();
    assert!(matches!(err, ApiError::Parse(_)));
}

// ==========================================
// 瞬时写入失败重试
// ==========================================

/// 前 N 次提交返回 DatabaseBusy 的目录仓储
struct FlakyCatalog {
    inner: Arc<SqliteCatalogRepository>,
    failures_left: AtomicU32,
}

#[async_trait]
impl CatalogRepository for FlakyCatalog {
    async fn load_catalog(&self) -> RepositoryResult<CatalogSnapshot> {
        self.inner.load_catalog().await
    }

    async fn apply_changes(
        &self,
        changes: &ChangeSet,
        actor: &str,
        written_at: DateTime<Utc>,
    ) -> RepositoryResult<WriteCounts> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::DatabaseBusy("database is locked".to_string()));
        }
        self.inner.apply_changes(changes, actor, written_at).await
    }

    async fn restore_snapshot(&self, snapshot: &CatalogSnapshot) -> RepositoryResult<RestoredCounts> {
        self.inner.restore_snapshot(snapshot).await
    }

    async fn find_modified_since(
        &self,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ConflictingRecord>> {
        self.inner.find_modified_since(since).await
    }

    async fn count_rows(&self) -> RepositoryResult<TableCounts> {
        self.inner.count_rows().await
    }
}

fn flaky_api(
    env: &test_helpers::TestEnv,
    failures: u32,
) -> ImportApi<FlakyCatalog, SqliteImportHistoryRepository, ConfigManager> {
    let catalog = FlakyCatalog {
        inner: env.catalog.clone(),
        failures_left: AtomicU32::new(failures),
    };
    ImportApi::new(Arc::new(catalog), env.history.clone(), env.config.clone())
}

#[tokio::test]
async fn test_transient_write_failure_is_retried() {
    logging::init_test();
    let env = create_test_env();
    let api = flaky_api(&env, 2);

    let outcome = api
        .execute(&base_workbook(), "base.xlsx", "alice")
        .await
        .expect("third attempt succeeds");

    assert_eq!(outcome.attempts, 3);
    assert_eq!(env.api().catalog_counts().await.unwrap().parts, 2);
}

#[tokio::test]
async fn test_exhausted_retries_leave_catalog_untouched() {
    logging::init_test();
    let env = create_test_env();
    let api = flaky_api(&env, 5);

    let err = api
        .execute(&base_workbook(), "base.xlsx", "alice")
        .await
        .unwrap_err();

    match err {
        ApiError::Import(ImportError::WriteFailed {
            attempts, retryable, ..
        }) => {
            assert_eq!(attempts, 3);
            assert!(retryable);
        }
        other => panic!("expected write failure, got {:?}", other),
    }
    assert_eq!(env.api().catalog_counts().await.unwrap(), TableCounts::default());
    assert!(env.api().list_history(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_actor_is_rejected() {
    logging::init_test();
    let env = create_test_env();

    let err = env
        .api()
        .execute(&base_workbook(), "base.xlsx", "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}
