// ==========================================
// 物料库存预留系统 - 入库导入领域模型
// ==========================================
// 职责: 入库文件行映射结果、导入汇总
// ==========================================

use crate::domain::types::MaterialClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==========================================
// StockReceiptRow - 入库行（字段映射 + 数值解析后）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReceiptRow {
    pub row_number: usize, // 文件行号（表头为第 1 行）
    pub material_class: MaterialClass,
    pub stock_item_id: String,
    pub quantity: Decimal,

    // 仅新批次建档时使用
    pub unit: Option<String>,
    pub unit_price: Option<Decimal>,
    pub currency: Option<String>,
}

// ==========================================
// ImportRowFailure - 行级失败
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRowFailure {
    pub row_number: usize,
    pub stock_item_id: Option<String>,
    pub reason: String,
}

// ==========================================
// ImportSummary - 导入汇总
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub total_rows: usize,
    pub registered: usize, // 新建批次数
    pub received: usize,   // 已有批次追加入库数
    pub failures: Vec<ImportRowFailure>,
    pub elapsed_ms: i64,
}

impl ImportSummary {
    pub fn success_rows(&self) -> usize {
        self.registered + self.received
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}
