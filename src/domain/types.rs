// ==========================================
// 配件目录同步 - 领域类型定义
// ==========================================
// 职责: 实体种类 / 差异操作 / 行动作标记 / 操作者
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 实体种类 (Entity Kind)
// ==========================================
// 顺序即父 → 子顺序（恢复快照时按此顺序插入）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Part,               // 配件主数据
    VehicleApplication, // 车型适配
    CrossReference,     // 品牌互换号
    Alias,              // 别名
}

impl EntityKind {
    /// 父 → 子顺序
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Part,
        EntityKind::VehicleApplication,
        EntityKind::CrossReference,
        EntityKind::Alias,
    ];

    /// 对应数据表名
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Part => "parts",
            EntityKind::VehicleApplication => "vehicle_applications",
            EntityKind::CrossReference => "cross_references",
            EntityKind::Alias => "aliases",
        }
    }

    /// 对应工作表名（导出/报错定位用）
    pub fn sheet_name(&self) -> &'static str {
        match self {
            EntityKind::Part => "Parts",
            EntityKind::VehicleApplication => "Vehicle Applications",
            EntityKind::CrossReference => "Cross References",
            EntityKind::Alias => "Aliases",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Part => write!(f, "PART"),
            EntityKind::VehicleApplication => write!(f, "VEHICLE_APPLICATION"),
            EntityKind::CrossReference => write!(f, "CROSS_REFERENCE"),
            EntityKind::Alias => write!(f, "ALIAS"),
        }
    }
}

// ==========================================
// 差异操作 (Diff Operation)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffOperation {
    Add,
    Update,
    Delete,
    Unchanged,
}

impl fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffOperation::Add => write!(f, "ADD"),
            DiffOperation::Update => write!(f, "UPDATE"),
            DiffOperation::Delete => write!(f, "DELETE"),
            DiffOperation::Unchanged => write!(f, "UNCHANGED"),
        }
    }
}

// ==========================================
// 行动作标记 (Status 列)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionMarker {
    Delete,             // 显式删除
    Unrecognized(String), // 无法识别的标记（仅告警，不影响处理）
}

impl ActionMarker {
    /// 从单元格文本解析（空白返回 None）
    pub fn parse(raw: &str) -> Option<ActionMarker> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.to_uppercase().as_str() {
            "DELETE" | "DEL" | "REMOVE" => Some(ActionMarker::Delete),
            _ => Some(ActionMarker::Unrecognized(trimmed.to_string())),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ActionMarker::Delete)
    }
}

// ==========================================
// 操作者
// ==========================================
// 自动化操作者统一使用 "system:" 前缀，其余视为人工操作者

/// 自动化操作者前缀
pub const AUTOMATION_ACTOR_PREFIX: &str = "system:";

/// 导入写入使用的操作者标识
pub const IMPORT_ACTOR: &str = "system:import";

/// 回滚恢复使用的操作者标识
pub const ROLLBACK_ACTOR: &str = "system:rollback";

/// 是否为自动化操作者
pub fn is_automation_actor(actor: &str) -> bool {
    actor.starts_with(AUTOMATION_ACTOR_PREFIX)
}
