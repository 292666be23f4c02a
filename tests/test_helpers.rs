// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库初始化、xlsx 工作簿构造、基础目录数据
// ==========================================
#![allow(dead_code)]

use catalog_sync::api::ImportApi;
use catalog_sync::config::{config_keys, ConfigManager};
use catalog_sync::domain::CatalogSnapshot;
use catalog_sync::repository::{
    open_shared_connection, CatalogRepository, SqliteCatalogRepository,
    SqliteImportHistoryRepository,
};
use rusqlite::Connection;
use rust_xlsxwriter::Workbook;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use uuid::Uuid;

// ==========================================
// 测试环境
// ==========================================

pub struct TestEnv {
    _temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub catalog: Arc<SqliteCatalogRepository>,
    pub history: Arc<SqliteImportHistoryRepository>,
    pub config: Arc<ConfigManager>,
}

impl TestEnv {
    pub fn api(&self) -> ImportApi {
        ImportApi::new(self.catalog.clone(), self.history.clone(), self.config.clone())
    }

    pub async fn snapshot(&self) -> CatalogSnapshot {
        self.catalog.load_catalog().await.expect("load catalog")
    }

    /// SKU → 配件身份
    pub async fn part_ids(&self) -> HashMap<String, Uuid> {
        self.snapshot().await.sku_index()
    }

    /// 直接执行 SQL（模拟人工在目录中编辑）
    pub fn execute_sql(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> usize {
        let conn = self.conn.lock().expect("lock");
        conn.execute(sql, params).expect("execute sql")
    }
}

/// 创建临时测试数据库并初始化 schema
///
/// 重试间隔压缩到毫秒级，避免测试等待
pub fn create_test_env() -> TestEnv {
    let temp_file = NamedTempFile::new().expect("temp file");
    let db_path = temp_file.path().to_str().expect("utf-8 path").to_string();

    let conn = open_shared_connection(&db_path).expect("open db");
    let config = ConfigManager::from_connection(conn.clone()).expect("config manager");
    config
        .set_global_config_value(config_keys::RETRY_INITIAL_DELAY_MS, "1")
        .expect("set config");
    config
        .set_global_config_value(config_keys::RETRY_MAX_DELAY_MS, "5")
        .expect("set config");

    TestEnv {
        _temp_file: temp_file,
        db_path,
        catalog: Arc::new(SqliteCatalogRepository::from_connection(conn.clone())),
        history: Arc::new(SqliteImportHistoryRepository::from_connection(conn.clone())),
        config: Arc::new(config),
        conn,
    }
}

// ==========================================
// 工作簿构造
// ==========================================

#[derive(Debug, Clone)]
pub enum Cell {
    Text(String),
    Number(f64),
    Blank,
}

pub fn t(value: &str) -> Cell {
    Cell::Text(value.to_string())
}

pub fn n(value: f64) -> Cell {
    Cell::Number(value)
}

pub fn id(value: Uuid) -> Cell {
    Cell::Text(value.to_string())
}

struct SheetSpec {
    name: String,
    header_rows: Vec<Vec<String>>,
    rows: Vec<Vec<Cell>>,
}

#[derive(Default)]
pub struct WorkbookBuilder {
    sheets: Vec<SheetSpec>,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单行表头工作表
    pub fn sheet(self, name: &str, headers: &[&str], rows: Vec<Vec<Cell>>) -> Self {
        self.sheet_with_header_rows(name, vec![headers.to_vec()], rows)
    }

    /// 多行表头工作表（分组表头 / 填写说明）
    pub fn sheet_with_header_rows(
        mut self,
        name: &str,
        header_rows: Vec<Vec<&str>>,
        rows: Vec<Vec<Cell>>,
    ) -> Self {
        self.sheets.push(SheetSpec {
            name: name.to_string(),
            header_rows: header_rows
                .into_iter()
                .map(|r| r.into_iter().map(|s| s.to_string()).collect())
                .collect(),
            rows,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut workbook = Workbook::new();
        for spec in &self.sheets {
            let ws = workbook.add_worksheet();
            ws.set_name(&spec.name).expect("sheet name");
            let mut row_index: u32 = 0;
            for header in &spec.header_rows {
                for (col, value) in header.iter().enumerate() {
                    if !value.is_empty() {
                        ws.write_string(row_index, col as u16, value).expect("write header");
                    }
                }
                row_index += 1;
            }
            for row in &spec.rows {
                for (col, cell) in row.iter().enumerate() {
                    match cell {
                        Cell::Text(s) => {
                            ws.write_string(row_index, col as u16, s).expect("write text");
                        }
                        Cell::Number(v) => {
                            ws.write_number(row_index, col as u16, *v).expect("write number");
                        }
                        Cell::Blank => {}
                    }
                }
                row_index += 1;
            }
        }
        workbook.save_to_buffer().expect("save workbook")
    }
}

// ==========================================
// 基础目录
// ==========================================

pub const PART_HEADERS: [&str; 4] = ["SKU", "Name", "Category", "Brand: Dorman"];
pub const VEHICLE_HEADERS: [&str; 5] = ["Part SKU", "Make", "Model", "Year Start", "Year End"];
pub const REEXPORT_VEHICLE_HEADERS: [&str; 7] =
    ["_id", "_part_id", "Part SKU", "Make", "Model", "Year Start", "Year End"];

/// 首次导入用工作簿（无隐藏身份列）
///
/// 2 个配件、2 条车型适配、2 条 Dorman 互换号、1 条别名
pub fn base_workbook() -> Vec<u8> {
    WorkbookBuilder::new()
        .sheet(
            "Parts",
            &PART_HEADERS,
            vec![
                vec![t("BP-1"), t("Brake Pad"), t("Brakes"), t("D-1; D-2")],
                vec![t("RT-2"), t("Rotor"), t("Brakes"), Cell::Blank],
            ],
        )
        .sheet(
            "Vehicle Applications",
            &VEHICLE_HEADERS,
            vec![
                vec![t("BP-1"), t("Toyota"), t("Camry"), n(2018.0), n(2020.0)],
                vec![t("RT-2"), t("Honda"), t("Civic"), n(2016.0), n(2019.0)],
            ],
        )
        .sheet(
            "Aliases",
            &["Part SKU", "Alias", "Alias Type"],
            vec![vec![t("BP-1"), t("PAD-A"), t("OEM")]],
        )
        .build()
}

/// 导入基础目录，返回导入记录身份
pub async fn import_base(env: &TestEnv) -> Uuid {
    env.api()
        .execute(&base_workbook(), "base.xlsx", "alice")
        .await
        .expect("base import")
        .import_id
}

/// 再导出格式的 Parts 工作表 + 仅有表头的车型适配表
pub fn parts_only_reexport(part_headers: &[&str], rows: Vec<Vec<Cell>>) -> Vec<u8> {
    WorkbookBuilder::new()
        .sheet("Parts", part_headers, rows)
        .sheet("Vehicle Applications", &REEXPORT_VEHICLE_HEADERS, Vec::new())
        .build()
}
