// ==========================================
// 配件目录同步 - 命令行入口
// ==========================================
// 子命令: preview / execute / rollback / export / history
// 数据库: CATALOG_SYNC_DB_PATH，未设置时使用用户数据目录
// ==========================================

use anyhow::{bail, Context, Result};
use catalog_sync::api::{ApiError, ImportApi};
use catalog_sync::logging;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "catalog-sync")]
#[command(version, about = "配件目录工作簿导入 / 回滚 / 导出", long_about = None)]
struct Cli {
    /// 数据库文件路径（覆盖 CATALOG_SYNC_DB_PATH）
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 预览导入: 输出校验问题与差异，不写库
    Preview { file: PathBuf },

    /// 执行导入
    Execute {
        file: PathBuf,

        /// 操作者（写入导入记录与 updated_by）
        #[arg(long, default_value = "operator")]
        actor: String,
    },

    /// 回滚导入（只能回滚最近一次）
    Rollback { import_id: Uuid },

    /// 导出当前目录
    Export { file: PathBuf },

    /// 列出可回滚的导入记录
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// 默认数据库路径
fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("CATALOG_SYNC_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    match dirs::data_dir() {
        Some(data_dir) => {
            let dir = data_dir.join("catalog-sync");
            std::fs::create_dir_all(&dir).ok();
            dir.join("catalog_sync.db")
        }
        None => PathBuf::from("./catalog_sync.db"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_workbook(path: &Path) -> Result<(Vec<u8>, String)> {
    let buffer = std::fs::read(path).with_context(|| format!("无法读取文件: {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((buffer, file_name))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let db_path = cli.db.unwrap_or_else(default_db_path);
    tracing::info!(version = catalog_sync::VERSION, db = %db_path.display(), "{}", catalog_sync::APP_NAME);
    let api = ImportApi::open(&db_path.to_string_lossy()).context("数据库初始化失败")?;

    match cli.command {
        Command::Preview { file } => {
            let (buffer, _) = read_workbook(&file)?;
            let preview = api.preview(&buffer).await?;
            print_json(&preview)?;
            if !preview.valid {
                bail!("校验未通过: {} 个错误", preview.errors.len());
            }
        }
        Command::Execute { file, actor } => {
            let (buffer, file_name) = read_workbook(&file)?;
            match api.execute(&buffer, &file_name, &actor).await {
                Ok(outcome) => print_json(&outcome)?,
                Err(ApiError::ValidationFailed(report)) => {
                    print_json(&report)?;
                    bail!("校验未通过: {} 个错误，未执行任何写入", report.errors.len());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Rollback { import_id } => {
            let outcome = api.rollback(import_id).await?;
            print_json(&outcome)?;
        }
        Command::Export { file } => {
            let buffer = api.export().await?;
            std::fs::write(&file, &buffer)
                .with_context(|| format!("无法写入文件: {}", file.display()))?;
            println!("已导出 {} 字节到 {}", buffer.len(), file.display());
        }
        Command::History { limit } => {
            let records = api.list_history(limit).await?;
            let counts = api.catalog_counts().await?;
            print_json(&serde_json::json!({
                "catalog": counts,
                "imports": records,
            }))?;
        }
    }

    Ok(())
}
