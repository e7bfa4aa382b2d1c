// ==========================================
// 物料库存预留系统 - 领域类型定义
// ==========================================
// 职责: 物料类别、预留状态、项目状态等枚举
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 物料类别 (Material Class)
// ==========================================
// 红线: 五类物料是封闭集合，新增类别必须同步建表
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialClass {
    Consumable, // 耗材
    Steel,      // 钢材
    Membrane,   // 膜材
    Rope,       // 绳索
    Wick,       // 芯材
}

impl MaterialClass {
    /// 全部物料类别（固定顺序）
    pub const ALL: [MaterialClass; 5] = [
        MaterialClass::Consumable,
        MaterialClass::Steel,
        MaterialClass::Membrane,
        MaterialClass::Rope,
        MaterialClass::Wick,
    ];

    /// 从字符串解析物料类别
    ///
    /// 兼容数据库编码（STEEL）、表名（steel_stock）、复数写法（consumables）与中文名（钢材）
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase();
        let code = normalized.strip_suffix("_STOCK").unwrap_or(&normalized);
        match code {
            "CONSUMABLE" | "CONSUMABLES" | "耗材" => Some(MaterialClass::Consumable),
            "STEEL" | "钢材" => Some(MaterialClass::Steel),
            "MEMBRANE" | "MEMBRANES" | "膜材" => Some(MaterialClass::Membrane),
            "ROPE" | "ROPES" | "绳索" => Some(MaterialClass::Rope),
            "WICK" | "WICKS" | "芯材" => Some(MaterialClass::Wick),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MaterialClass::Consumable => "CONSUMABLE",
            MaterialClass::Steel => "STEEL",
            MaterialClass::Membrane => "MEMBRANE",
            MaterialClass::Rope => "ROPE",
            MaterialClass::Wick => "WICK",
        }
    }

    /// 该类别对应的库存表
    pub fn table_name(&self) -> &'static str {
        match self {
            MaterialClass::Consumable => "consumable_stock",
            MaterialClass::Steel => "steel_stock",
            MaterialClass::Membrane => "membrane_stock",
            MaterialClass::Rope => "rope_stock",
            MaterialClass::Wick => "wick_stock",
        }
    }
}

impl fmt::Display for MaterialClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 预留状态 (Reservation Status)
// ==========================================
// 流转: RESERVED → ACTIVE → COMPLETED，RESERVED/ACTIVE → CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,  // 已预留
    Active,    // 使用中
    Completed, // 已完成（已消耗）
    Cancelled, // 已取消
}

impl ReservationStatus {
    /// 未结束的预留（计入库存预留量）
    pub fn is_open(&self) -> bool {
        matches!(self, ReservationStatus::Reserved | ReservationStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "RESERVED" => Some(ReservationStatus::Reserved),
            "ACTIVE" => Some(ReservationStatus::Active),
            "COMPLETED" => Some(ReservationStatus::Completed),
            "CANCELLED" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 项目状态 (Project Status)
// ==========================================
// 流转: PLANNING → RESERVED → ACTIVE → COMPLETED，非终态均可 → CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Planning,  // 计划中
    Reserved,  // 物料已预留
    Active,    // 进行中
    Completed, // 已完成
    Cancelled, // 已取消
}

impl ProjectStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PLANNING" => Some(ProjectStatus::Planning),
            "RESERVED" => Some(ProjectStatus::Reserved),
            "ACTIVE" => Some(ProjectStatus::Active),
            "COMPLETED" => Some(ProjectStatus::Completed),
            "CANCELLED" => Some(ProjectStatus::Cancelled),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "PLANNING",
            ProjectStatus::Reserved => "RESERVED",
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Completed => "COMPLETED",
            ProjectStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 物料行状态 (Material Line Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialLineStatus {
    Planned,   // 计划
    Reserved,  // 已预留
    Ordered,   // 已下单（自定义物料）
    Received,  // 已到货
    Used,      // 已登记用量
    Completed, // 已完成
}

impl MaterialLineStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PLANNED" => Some(MaterialLineStatus::Planned),
            "RESERVED" => Some(MaterialLineStatus::Reserved),
            "ORDERED" => Some(MaterialLineStatus::Ordered),
            "RECEIVED" => Some(MaterialLineStatus::Received),
            "USED" => Some(MaterialLineStatus::Used),
            "COMPLETED" => Some(MaterialLineStatus::Completed),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MaterialLineStatus::Planned => "PLANNED",
            MaterialLineStatus::Reserved => "RESERVED",
            MaterialLineStatus::Ordered => "ORDERED",
            MaterialLineStatus::Received => "RECEIVED",
            MaterialLineStatus::Used => "USED",
            MaterialLineStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for MaterialLineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 物料行优先级 (Line Priority)
// ==========================================
// 顺序: Low < Medium < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl LinePriority {
    /// 从字符串解析优先级（未知值回落为 MEDIUM）
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "LOW" => LinePriority::Low,
            "HIGH" => LinePriority::High,
            "CRITICAL" => LinePriority::Critical,
            _ => LinePriority::Medium,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            LinePriority::Low => "LOW",
            LinePriority::Medium => "MEDIUM",
            LinePriority::High => "HIGH",
            LinePriority::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LinePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}
