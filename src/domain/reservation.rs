// ==========================================
// 物料库存预留系统 - 预留领域模型
// ==========================================
// 职责: 预留记录、校验结果、冲突/缺口报告
// 红线: 预留记录只追加，仅 status/used_quantity 可变
// ==========================================

use crate::domain::project::ProjectMaterialLine;
use crate::domain::types::{MaterialClass, ReservationStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// Reservation - 预留记录
// ==========================================
// 不变量: 某批次所有 RESERVED/ACTIVE 预留的 reserved_quantity 之和
//         等于该批次的 reserved_quantity
// 对齐: schema.sql stock_reservation 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub material_class: MaterialClass,
    pub stock_item_id: String,
    pub project_id: String,
    pub material_line_id: String,
    pub reserved_quantity: Decimal,
    pub used_quantity: Option<Decimal>, // None = 未登记用量（完工时按全量消耗）
    pub unit: String,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// 完工时应消耗的数量
    pub fn settled_usage(&self) -> Decimal {
        self.used_quantity.unwrap_or(self.reserved_quantity)
    }
}

// ==========================================
// ValidatedLine - 物料行库存校验结果
// ==========================================
// 用途: evaluate 输出，供前端展示充足/不足状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedLine {
    pub line: ProjectMaterialLine,      // 已回填单价/总价/状态的物料行
    pub stock_available: bool,          // 库存是否充足（自定义物料恒为 false）
    pub available_stock: Option<Decimal>, // 当前可用量（自定义物料为 None）
}

// ==========================================
// StockShortage - 库存缺口明细
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockShortage {
    pub line_id: Option<String>, // 单批次直接调用时为 None
    pub material_class: MaterialClass,
    pub stock_item_id: String,
    pub requested: Decimal,
    pub available: Decimal,
    pub shortage: Decimal,
}

impl StockShortage {
    pub fn new(
        material_class: MaterialClass,
        stock_item_id: impl Into<String>,
        requested: Decimal,
        available: Decimal,
    ) -> Self {
        Self {
            line_id: None,
            material_class,
            stock_item_id: stock_item_id.into(),
            requested,
            available,
            shortage: (requested - available).max(Decimal::ZERO),
        }
    }

    pub fn for_line(mut self, line_id: impl Into<String>) -> Self {
        self.line_id = Some(line_id.into());
        self
    }
}

// ==========================================
// StockConflict - 跨项目超额占用冲突
// ==========================================
// 判定: reserved_by_others + requested > remaining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockConflict {
    pub line_id: String,
    pub material_class: MaterialClass,
    pub stock_item_id: String,
    pub requested_quantity: Decimal,
    pub reserved_by_others: Decimal,
    pub remaining_quantity: Decimal,
    pub shortage: Decimal,
    pub conflicting_projects: Vec<String>,
}

// ==========================================
// ReservationOutcome - 批量预留结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationOutcome {
    pub project_id: String,
    pub reservations: Vec<Reservation>,
    pub ordered_line_ids: Vec<String>, // 自定义物料行（转采购）
}

// ==========================================
// CompletionOutcome - 完工结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub project_id: String,
    pub completed_reservation_ids: Vec<String>,
    pub consumed_total: Decimal,
    pub released_total: Decimal, // 部分用量时退回可用的数量
}

// ==========================================
// ConsistencyReport - 账实一致性核对
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub material_class: MaterialClass,
    pub stock_item_id: String,
    pub ledger_reserved: Decimal,
    pub reservations_reserved: Decimal,
    pub remaining_quantity: Decimal,
    pub available_quantity: Decimal,
    pub violations: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_shortage_never_negative() {
        let s = StockShortage::new(MaterialClass::Steel, "S1", dec!(10), dec!(40));
        assert_eq!(s.shortage, Decimal::ZERO);

        let s = StockShortage::new(MaterialClass::Steel, "S1", dec!(50), dec!(40)).for_line("L1");
        assert_eq!(s.shortage, dec!(10));
        assert_eq!(s.line_id.as_deref(), Some("L1"));
    }

    #[test]
    fn test_settled_usage_defaults_to_reserved() {
        let now = Utc::now();
        let mut r = Reservation {
            reservation_id: "R1".into(),
            material_class: MaterialClass::Rope,
            stock_item_id: "S1".into(),
            project_id: "P1".into(),
            material_line_id: "L1".into(),
            reserved_quantity: dec!(60),
            used_quantity: None,
            unit: "m".into(),
            status: ReservationStatus::Active,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(r.settled_usage(), dec!(60));

        r.used_quantity = Some(dec!(45));
        assert_eq!(r.settled_usage(), dec!(45));
    }
}
