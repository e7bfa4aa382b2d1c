// ==========================================
// 物料库存预留系统 - 库存批次领域模型
// ==========================================
// 职责: 库存批次（StockItem）数量字段与派生量
// 红线: 数量字段只能经由 StockLedger 修改
// ==========================================

use crate::domain::types::MaterialClass;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// StockItem - 库存批次
// ==========================================
// 不变量:
// - 0 <= reserved_quantity <= remaining_quantity
// - available_quantity >= 0
// 对齐: schema.sql 五张 *_stock 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    // ===== 主键 =====
    pub stock_item_id: String,
    pub material_class: MaterialClass,

    // ===== 基础信息 =====
    pub unit: String,        // 计量单位（kg/m/pcs）
    pub unit_price: Decimal, // 单价
    pub currency: String,    // 币种

    // ===== 数量字段 =====
    pub total_quantity: Decimal,    // 累计入库量（单调递增）
    pub consumed_quantity: Decimal, // 已消耗量
    pub reserved_quantity: Decimal, // 已预留未消耗量

    // ===== 状态 =====
    pub is_active: bool, // 软停用标记（停用后不可再预留）
    pub revision: i32,   // 乐观锁版本号

    // ===== 审计字段 =====
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockItem {
    /// 创建新入库批次
    pub fn new(
        stock_item_id: impl Into<String>,
        material_class: MaterialClass,
        unit: impl Into<String>,
        unit_price: Decimal,
        currency: impl Into<String>,
        total_quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            stock_item_id: stock_item_id.into(),
            material_class,
            unit: unit.into(),
            unit_price,
            currency: currency.into(),
            total_quantity,
            consumed_quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            is_active: true,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 剩余量 = 累计入库 - 已消耗
    pub fn remaining_quantity(&self) -> Decimal {
        self.total_quantity - self.consumed_quantity
    }

    /// 可用量 = 剩余量 - 已预留
    pub fn available_quantity(&self) -> Decimal {
        self.remaining_quantity() - self.reserved_quantity
    }

    /// 可供新预留的数量（停用批次为 0）
    pub fn reservable_quantity(&self) -> Decimal {
        if self.is_active {
            self.available_quantity().max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    }

    /// 校验数量不变量，返回违规描述
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.reserved_quantity < Decimal::ZERO {
            violations.push(format!("reserved_quantity={} < 0", self.reserved_quantity));
        }
        if self.consumed_quantity < Decimal::ZERO {
            violations.push(format!("consumed_quantity={} < 0", self.consumed_quantity));
        }
        if self.reserved_quantity > self.remaining_quantity() {
            violations.push(format!(
                "reserved_quantity={} > remaining_quantity={}",
                self.reserved_quantity,
                self.remaining_quantity()
            ));
        }
        if self.available_quantity() < Decimal::ZERO {
            violations.push(format!("available_quantity={} < 0", self.available_quantity()));
        }
        violations
    }
}

// ==========================================
// StockAvailability - 可用量检查结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAvailability {
    pub sufficient: bool,
    pub available: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_derived_quantities() {
        let mut item = StockItem::new("S1", MaterialClass::Steel, "kg", dec!(2.5), "CNY", dec!(100));
        item.consumed_quantity = dec!(30);
        item.reserved_quantity = dec!(20);

        assert_eq!(item.remaining_quantity(), dec!(70));
        assert_eq!(item.available_quantity(), dec!(50));
        assert!(item.invariant_violations().is_empty());
    }

    #[test]
    fn test_inactive_item_is_not_reservable() {
        let mut item = StockItem::new("S1", MaterialClass::Rope, "m", dec!(1), "CNY", dec!(10));
        assert_eq!(item.reservable_quantity(), dec!(10));

        item.is_active = false;
        assert_eq!(item.reservable_quantity(), Decimal::ZERO);
    }

    #[test]
    fn test_invariant_violation_reported() {
        let mut item = StockItem::new("S1", MaterialClass::Wick, "pcs", dec!(1), "CNY", dec!(10));
        item.reserved_quantity = dec!(11);

        let violations = item.invariant_violations();
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("remaining_quantity"));
    }
}
