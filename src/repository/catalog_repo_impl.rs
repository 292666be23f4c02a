// ==========================================
// 配件目录同步 - 目录数据 Repository 实现
// ==========================================
// 职责: 实现 CatalogRepository（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================
// 事务顺序:
// - 删除: aliases → cross_references → vehicle_applications → parts
// - 写入: parts → vehicle_applications → cross_references → aliases
// 任意时刻外键关系均有效
// ==========================================

use crate::db::{format_ts, open_sqlite_connection, parse_ts};
use crate::domain::types::AUTOMATION_ACTOR_PREFIX;
use crate::domain::{
    AliasFields, AuditStamp, CatalogSnapshot, ChangeSet, ConflictingRecord,
    CrossReferenceFields, EntityKind, EntityWriteCounts, PartFields, PartRef, RecordUpsert,
    RestoredCounts, StoredRecord, TableChanges, TableCounts, VehicleApplicationFields,
    WriteCounts,
};
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

// ==========================================
// 列读取辅助
// ==========================================

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// updated_at / updated_by 固定为最后两列
fn audit_columns(row: &Row, idx: usize) -> rusqlite::Result<AuditStamp> {
    Ok(AuditStamp {
        updated_at: ts_column(row, idx)?,
        updated_by: row.get(idx + 1)?,
    })
}

fn load_table<F>(
    conn: &Connection,
    sql: &str,
    map: impl Fn(&Row) -> rusqlite::Result<StoredRecord<F>>,
) -> RepositoryResult<BTreeMap<Uuid, StoredRecord<F>>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map([], |row| map(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records.into_iter().map(|r| (r.id, r)).collect())
}

/// 子记录父引用必须已解析为 Id
fn part_id_param(part: &PartRef) -> RepositoryResult<String> {
    match part {
        PartRef::Id(id) => Ok(id.to_string()),
        PartRef::Sku(sku) => Err(RepositoryError::FieldValueError {
            field: "part_id".to_string(),
            message: format!("父配件引用未解析: {}", sku),
        }),
    }
}

// ==========================================
// SqliteCatalogRepository
// ==========================================
pub struct SqliteCatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogRepository {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（与导入历史仓储共享连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn load_catalog_sync(conn: &Connection) -> RepositoryResult<CatalogSnapshot> {
        let captured_at = Utc::now();

        let parts = load_table(
            conn,
            "SELECT id, sku, name, category, position, notes, image_url, updated_at, updated_by
             FROM parts",
            |row| {
                Ok(StoredRecord {
                    id: uuid_column(row, 0)?,
                    fields: PartFields {
                        sku: row.get(1)?,
                        name: row.get(2)?,
                        category: row.get(3)?,
                        position: row.get(4)?,
                        notes: row.get(5)?,
                        image_url: row.get(6)?,
                    },
                    audit: audit_columns(row, 7)?,
                })
            },
        )?;

        let vehicle_applications = load_table(
            conn,
            "SELECT id, part_id, make, model, year_start, year_end, engine, notes,
                    updated_at, updated_by
             FROM vehicle_applications",
            |row| {
                Ok(StoredRecord {
                    id: uuid_column(row, 0)?,
                    fields: VehicleApplicationFields {
                        part: PartRef::Id(uuid_column(row, 1)?),
                        make: row.get(2)?,
                        model: row.get(3)?,
                        year_start: row.get(4)?,
                        year_end: row.get(5)?,
                        engine: row.get(6)?,
                        notes: row.get(7)?,
                    },
                    audit: audit_columns(row, 8)?,
                })
            },
        )?;

        let cross_references = load_table(
            conn,
            "SELECT id, part_id, brand, reference_sku, updated_at, updated_by
             FROM cross_references",
            |row| {
                Ok(StoredRecord {
                    id: uuid_column(row, 0)?,
                    fields: CrossReferenceFields {
                        part: PartRef::Id(uuid_column(row, 1)?),
                        brand: row.get(2)?,
                        reference_sku: row.get(3)?,
                    },
                    audit: audit_columns(row, 4)?,
                })
            },
        )?;

        let aliases = load_table(
            conn,
            "SELECT id, part_id, alias, alias_type, notes, updated_at, updated_by
             FROM aliases",
            |row| {
                Ok(StoredRecord {
                    id: uuid_column(row, 0)?,
                    fields: AliasFields {
                        part: PartRef::Id(uuid_column(row, 1)?),
                        alias: row.get(2)?,
                        alias_type: row.get(3)?,
                        notes: row.get(4)?,
                    },
                    audit: audit_columns(row, 5)?,
                })
            },
        )?;

        Ok(CatalogSnapshot {
            captured_at,
            parts,
            vehicle_applications,
            cross_references,
            aliases,
        })
    }

    // ===== 事务内写入 =====

    fn delete_ids(tx: &Transaction, kind: EntityKind, ids: &[Uuid]) -> RepositoryResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table_name());
        let mut stmt = tx.prepare(&sql)?;
        let mut count = 0;
        for id in ids {
            count += stmt.execute(params![id.to_string()])?;
        }
        Ok(count)
    }

    fn upsert_part(
        tx: &Transaction,
        id: Uuid,
        fields: &PartFields,
        stamp: &AuditStamp,
    ) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO parts (
                id, sku, name, category, position, notes, image_url, updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                sku = excluded.sku,
                name = excluded.name,
                category = excluded.category,
                position = excluded.position,
                notes = excluded.notes,
                image_url = excluded.image_url,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
            "#,
            params![
                id.to_string(),
                fields.sku,
                fields.name,
                fields.category,
                fields.position,
                fields.notes,
                fields.image_url,
                format_ts(&stamp.updated_at),
                stamp.updated_by,
            ],
        )?;
        Ok(())
    }

    fn upsert_vehicle_application(
        tx: &Transaction,
        id: Uuid,
        fields: &VehicleApplicationFields,
        stamp: &AuditStamp,
    ) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO vehicle_applications (
                id, part_id, make, model, year_start, year_end, engine, notes,
                updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                part_id = excluded.part_id,
                make = excluded.make,
                model = excluded.model,
                year_start = excluded.year_start,
                year_end = excluded.year_end,
                engine = excluded.engine,
                notes = excluded.notes,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
            "#,
            params![
                id.to_string(),
                part_id_param(&fields.part)?,
                fields.make,
                fields.model,
                fields.year_start,
                fields.year_end,
                fields.engine,
                fields.notes,
                format_ts(&stamp.updated_at),
                stamp.updated_by,
            ],
        )?;
        Ok(())
    }

    fn upsert_cross_reference(
        tx: &Transaction,
        id: Uuid,
        fields: &CrossReferenceFields,
        stamp: &AuditStamp,
    ) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO cross_references (
                id, part_id, brand, reference_sku, updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                part_id = excluded.part_id,
                brand = excluded.brand,
                reference_sku = excluded.reference_sku,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
            "#,
            params![
                id.to_string(),
                part_id_param(&fields.part)?,
                fields.brand,
                fields.reference_sku,
                format_ts(&stamp.updated_at),
                stamp.updated_by,
            ],
        )?;
        Ok(())
    }

    fn upsert_alias(
        tx: &Transaction,
        id: Uuid,
        fields: &AliasFields,
        stamp: &AuditStamp,
    ) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO aliases (
                id, part_id, alias, alias_type, notes, updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                part_id = excluded.part_id,
                alias = excluded.alias,
                alias_type = excluded.alias_type,
                notes = excluded.notes,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by
            "#,
            params![
                id.to_string(),
                part_id_param(&fields.part)?,
                fields.alias,
                fields.alias_type,
                fields.notes,
                format_ts(&stamp.updated_at),
                stamp.updated_by,
            ],
        )?;
        Ok(())
    }

    /// 先更新后新增（新增行可能复用被改名配件的旧 SKU）
    fn write_table<F>(
        tx: &Transaction,
        changes: &TableChanges<F>,
        stamp: &AuditStamp,
        upsert: fn(&Transaction, Uuid, &F, &AuditStamp) -> RepositoryResult<()>,
    ) -> RepositoryResult<(usize, usize)> {
        let write = |rows: &[RecordUpsert<F>]| -> RepositoryResult<usize> {
            for row in rows {
                upsert(tx, row.id, &row.fields, stamp)?;
            }
            Ok(rows.len())
        };
        let updated = write(&changes.updates)?;
        let inserted = write(&changes.inserts)?;
        Ok((inserted, updated))
    }

    fn clear_all(tx: &Transaction) -> RepositoryResult<()> {
        for kind in EntityKind::ALL.iter().rev() {
            tx.execute(&format!("DELETE FROM {}", kind.table_name()), [])?;
        }
        Ok(())
    }

    fn count_rows_sync(conn: &Connection) -> RepositoryResult<TableCounts> {
        let count = |kind: EntityKind| -> RepositoryResult<usize> {
            let sql = format!("SELECT COUNT(*) FROM {}", kind.table_name());
            let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(TableCounts {
            parts: count(EntityKind::Part)?,
            vehicle_applications: count(EntityKind::VehicleApplication)?,
            cross_references: count(EntityKind::CrossReference)?,
            aliases: count(EntityKind::Alias)?,
        })
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn load_catalog(&self) -> RepositoryResult<CatalogSnapshot> {
        let conn = self.get_conn()?;
        Self::load_catalog_sync(&conn)
    }

    async fn apply_changes(
        &self,
        changes: &ChangeSet,
        actor: &str,
        written_at: DateTime<Utc>,
    ) -> RepositoryResult<WriteCounts> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let stamp = AuditStamp {
            updated_at: written_at,
            updated_by: actor.to_string(),
        };

        // 删除: 子 → 父
        let deleted_aliases = Self::delete_ids(&tx, EntityKind::Alias, &changes.aliases.deletes)?;
        let deleted_xrefs = Self::delete_ids(
            &tx,
            EntityKind::CrossReference,
            &changes.cross_references.deletes,
        )?;
        let deleted_vehicles = Self::delete_ids(
            &tx,
            EntityKind::VehicleApplication,
            &changes.vehicle_applications.deletes,
        )?;
        let deleted_parts = Self::delete_ids(&tx, EntityKind::Part, &changes.parts.deletes)?;

        // 写入: 父 → 子
        let (parts_in, parts_up) = Self::write_table(&tx, &changes.parts, &stamp, Self::upsert_part)?;
        let (vehicles_in, vehicles_up) = Self::write_table(
            &tx,
            &changes.vehicle_applications,
            &stamp,
            Self::upsert_vehicle_application,
        )?;
        let (xrefs_in, xrefs_up) = Self::write_table(
            &tx,
            &changes.cross_references,
            &stamp,
            Self::upsert_cross_reference,
        )?;
        let (aliases_in, aliases_up) =
            Self::write_table(&tx, &changes.aliases, &stamp, Self::upsert_alias)?;

        tx.commit()?;

        let counts = WriteCounts {
            parts: EntityWriteCounts {
                inserted: parts_in,
                updated: parts_up,
                deleted: deleted_parts,
            },
            vehicle_applications: EntityWriteCounts {
                inserted: vehicles_in,
                updated: vehicles_up,
                deleted: deleted_vehicles,
            },
            cross_references: EntityWriteCounts {
                inserted: xrefs_in,
                updated: xrefs_up,
                deleted: deleted_xrefs,
            },
            aliases: EntityWriteCounts {
                inserted: aliases_in,
                updated: aliases_up,
                deleted: deleted_aliases,
            },
        };
        debug!(?counts, "目录写入事务已提交");
        Ok(counts)
    }

    async fn restore_snapshot(
        &self,
        snapshot: &CatalogSnapshot,
    ) -> RepositoryResult<RestoredCounts> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        Self::clear_all(&tx)?;
        for record in snapshot.parts.values() {
            Self::upsert_part(&tx, record.id, &record.fields, &record.audit)?;
        }
        for record in snapshot.vehicle_applications.values() {
            Self::upsert_vehicle_application(&tx, record.id, &record.fields, &record.audit)?;
        }
        for record in snapshot.cross_references.values() {
            Self::upsert_cross_reference(&tx, record.id, &record.fields, &record.audit)?;
        }
        for record in snapshot.aliases.values() {
            Self::upsert_alias(&tx, record.id, &record.fields, &record.audit)?;
        }

        let restored = Self::count_rows_sync(&tx)?;
        tx.commit()?;
        Ok(restored)
    }

    async fn find_modified_since(
        &self,
        since: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ConflictingRecord>> {
        let conn = self.get_conn()?;
        let since = format_ts(&since);

        // (实体, 定位标签表达式)
        let sources = [
            (EntityKind::Part, "sku"),
            (
                EntityKind::VehicleApplication,
                "make || ' ' || model || ' ' || year_start || '-' || year_end",
            ),
            (EntityKind::CrossReference, "brand || ' ' || reference_sku"),
            (EntityKind::Alias, "alias"),
        ];

        let mut conflicts = Vec::new();
        for (entity, label) in sources {
            let sql = format!(
                "SELECT id, {label}, updated_at, updated_by FROM {table}
                 WHERE updated_at > ?1
                   AND substr(updated_by, 1, length(?2)) <> ?2
                 ORDER BY updated_at",
                label = label,
                table = entity.table_name()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![since, AUTOMATION_ACTOR_PREFIX], |row| {
                    Ok(ConflictingRecord {
                        entity,
                        id: uuid_column(row, 0)?,
                        label: row.get(1)?,
                        updated_at: ts_column(row, 2)?,
                        updated_by: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            conflicts.extend(rows);
        }
        Ok(conflicts)
    }

    async fn count_rows(&self) -> RepositoryResult<TableCounts> {
        let conn = self.get_conn()?;
        Self::count_rows_sync(&conn)
    }
}
