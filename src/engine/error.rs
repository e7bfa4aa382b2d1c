// ==========================================
// 物料库存预留系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类:
// - 不可重试: UnknownMaterialClass / StockItemNotFound / InvalidProjectState
// - 可处理: InsufficientStock / ConsumptionError / ReservationTimeout
// - 不变量故障: OverconsumptionError（必须记录 error 日志，不可静默修正）
// ==========================================

use crate::domain::reservation::StockShortage;
use crate::domain::types::{MaterialClass, ProjectStatus, ReservationStatus};
use crate::repository::error::RepositoryError;
use rust_decimal::Decimal;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ==========================================
    // 解析错误
    // ==========================================
    #[error("未知物料类别: {0}")]
    UnknownMaterialClass(String),

    #[error("库存批次不存在: class={material_class}, stock_item_id={stock_item_id}")]
    StockItemNotFound {
        material_class: MaterialClass,
        stock_item_id: String,
    },

    #[error("项目不存在: {0}")]
    ProjectNotFound(String),

    #[error("预留记录不存在: {0}")]
    ReservationNotFound(String),

    #[error("物料行 {line_id} 不属于项目 {project_id}")]
    LineNotInProject { project_id: String, line_id: String },

    // ==========================================
    // 数量错误
    // ==========================================
    #[error("库存不足: {}", describe_shortages(.shortages))]
    InsufficientStock { shortages: Vec<StockShortage> },

    #[error("超额消耗: class={material_class}, stock_item_id={stock_item_id}, requested={requested}, reserved={reserved}")]
    OverconsumptionError {
        material_class: MaterialClass,
        stock_item_id: String,
        requested: Decimal,
        reserved: Decimal,
    },

    #[error("数量非法: {0}")]
    InvalidQuantity(String),

    // ==========================================
    // 状态错误
    // ==========================================
    #[error("项目状态不允许此操作: project_id={project_id}, status={actual}, expected={expected}")]
    InvalidProjectState {
        project_id: String,
        actual: ProjectStatus,
        expected: String,
    },

    #[error("预留状态不允许此操作: reservation_id={reservation_id}, status={actual}")]
    InvalidReservationState {
        reservation_id: String,
        actual: ReservationStatus,
    },

    #[error("物料行未预留: project_id={project_id}, lines={}", .line_ids.join(","))]
    UnreservedLines {
        project_id: String,
        line_ids: Vec<String>,
    },

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    // ==========================================
    // 批量操作错误
    // ==========================================
    #[error("项目完工失败（项目保持进行中，可重试）: project_id={project_id}, failed={}", .failed_reservations.join(","))]
    ConsumptionError {
        project_id: String,
        failed_reservations: Vec<String>,
        reason: String,
    },

    #[error("项目取消未完成（可重试）: project_id={project_id}, failed={}", .failed_reservations.join(","))]
    CancellationError {
        project_id: String,
        failed_reservations: Vec<String>,
        reason: String,
    },

    #[error("批量预留超时（已回滚）: project_id={project_id}, timeout={timeout_ms}ms")]
    ReservationTimeout { project_id: String, timeout_ms: u64 },

    // ==========================================
    // 基础设施错误
    // ==========================================
    #[error("配置读取失败: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// 单批次库存不足
    pub fn insufficient(shortage: StockShortage) -> Self {
        EngineError::InsufficientStock {
            shortages: vec![shortage],
        }
    }

    /// 是否可重试（不改变输入重试可能成功）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ConsumptionError { .. }
                | EngineError::CancellationError { .. }
                | EngineError::ReservationTimeout { .. }
                | EngineError::Repository(RepositoryError::OptimisticLockFailure { .. })
                | EngineError::Repository(RepositoryError::LockError(_))
        )
    }
}

fn describe_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(|s| {
            format!(
                "{}:{}(line={}, requested={}, available={}, shortage={})",
                s.material_class,
                s.stock_item_id,
                s.line_id.as_deref().unwrap_or("-"),
                s.requested,
                s.available,
                s.shortage
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_stock_message_lists_every_line() {
        let err = EngineError::InsufficientStock {
            shortages: vec![
                StockShortage::new(MaterialClass::Steel, "S1", dec!(50), dec!(40)).for_line("L1"),
                StockShortage::new(MaterialClass::Rope, "R1", dec!(5), dec!(0)).for_line("L2"),
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("S1"));
        assert!(msg.contains("shortage=10"));
        assert!(msg.contains("line=L2"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::ReservationTimeout {
            project_id: "P1".to_string(),
            timeout_ms: 10
        }
        .is_retryable());
        assert!(!EngineError::UnknownMaterialClass("glass".to_string()).is_retryable());
        assert!(!EngineError::insufficient(StockShortage::new(
            MaterialClass::Wick,
            "W1",
            dec!(1),
            dec!(0)
        ))
        .is_retryable());
    }
}
