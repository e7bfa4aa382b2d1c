// ==========================================
// 物料库存预留系统 - 项目领域模型
// ==========================================
// 职责: 项目及其物料清单（物料行）
// 红线: 项目/物料行只由 ReservationEngine 修改
// ==========================================

use crate::domain::types::{LinePriority, MaterialClass, MaterialLineStatus, ProjectStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// LineSource - 物料来源
// ==========================================
// StockBacked: 关联库存批次，走预留/消耗流程
// Custom: 临时采购物料，不占用库存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineSource {
    StockBacked { stock_item_id: String },
    Custom,
}

impl LineSource {
    pub fn stock_item_id(&self) -> Option<&str> {
        match self {
            LineSource::StockBacked { stock_item_id } => Some(stock_item_id.as_str()),
            LineSource::Custom => None,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, LineSource::Custom)
    }
}

// ==========================================
// ProjectMaterialLine - 项目物料行
// ==========================================
// 不变量: reserved_quantity <= requested_quantity
//         used_quantity <= reserved_quantity（USED/COMPLETED 后）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMaterialLine {
    pub line_id: String,
    pub project_id: String,
    pub material_class: MaterialClass,
    pub source: LineSource,
    pub material_name: Option<String>, // 物料名称（自定义物料必填）

    // ===== 数量 =====
    pub requested_quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub used_quantity: Decimal,

    // ===== 计价 =====
    pub unit: String,
    pub unit_price: Decimal,
    pub total_price: Decimal,

    // ===== 状态 =====
    pub status: MaterialLineStatus,
    pub priority: LinePriority,
}

impl ProjectMaterialLine {
    /// 创建关联库存的物料行
    pub fn stock_backed(
        line_id: impl Into<String>,
        project_id: impl Into<String>,
        material_class: MaterialClass,
        stock_item_id: impl Into<String>,
        requested_quantity: Decimal,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            project_id: project_id.into(),
            material_class,
            source: LineSource::StockBacked {
                stock_item_id: stock_item_id.into(),
            },
            material_name: None,
            requested_quantity,
            reserved_quantity: Decimal::ZERO,
            used_quantity: Decimal::ZERO,
            unit: unit.into(),
            unit_price: Decimal::ZERO,
            total_price: Decimal::ZERO,
            status: MaterialLineStatus::Planned,
            priority: LinePriority::Medium,
        }
    }

    /// 创建自定义（不占库存）物料行
    pub fn custom(
        line_id: impl Into<String>,
        project_id: impl Into<String>,
        material_class: MaterialClass,
        material_name: impl Into<String>,
        requested_quantity: Decimal,
        unit: impl Into<String>,
        unit_price: Decimal,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            project_id: project_id.into(),
            material_class,
            source: LineSource::Custom,
            material_name: Some(material_name.into()),
            requested_quantity,
            reserved_quantity: Decimal::ZERO,
            used_quantity: Decimal::ZERO,
            unit: unit.into(),
            unit_price,
            total_price: unit_price.checked_mul(requested_quantity).unwrap_or_default(),
            status: MaterialLineStatus::Planned,
            priority: LinePriority::Medium,
        }
    }

    /// 按给定单价计算总价，溢出时返回 None
    pub fn priced_total(&self, unit_price: Decimal) -> Option<Decimal> {
        unit_price.checked_mul(self.requested_quantity)
    }

    pub fn with_priority(mut self, priority: LinePriority) -> Self {
        self.priority = priority;
        self
    }
}

// ==========================================
// Project - 项目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub project_name: String,
    pub status: ProjectStatus,
    pub material_lines: Vec<ProjectMaterialLine>, // 有序物料清单
    pub revision: i32,                            // 乐观锁版本号
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// 创建计划中的项目
    pub fn new(project_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            project_name: project_name.into(),
            status: ProjectStatus::Planning,
            material_lines: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_line(mut self, line: ProjectMaterialLine) -> Self {
        self.material_lines.push(line);
        self
    }

    pub fn line(&self, line_id: &str) -> Option<&ProjectMaterialLine> {
        self.material_lines.iter().find(|l| l.line_id == line_id)
    }

    pub fn line_mut(&mut self, line_id: &str) -> Option<&mut ProjectMaterialLine> {
        self.material_lines.iter_mut().find(|l| l.line_id == line_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_custom_line_prices_itself() {
        let line = ProjectMaterialLine::custom(
            "L1",
            "P1",
            MaterialClass::Membrane,
            "PTFE 膜",
            dec!(4),
            "m2",
            dec!(12.5),
        );
        assert!(line.source.is_custom());
        assert_eq!(line.source.stock_item_id(), None);
        assert_eq!(line.total_price, dec!(50));
    }

    #[test]
    fn test_line_source_serde_tag() {
        let source = LineSource::StockBacked {
            stock_item_id: "S1".to_string(),
        };
        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains("STOCK_BACKED"));
        let back: LineSource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }
}
