// ==========================================
// 物料库存预留系统 - API层错误类型
// ==========================================
// 职责: 汇总引擎/仓储/导入错误，转换为调用方可理解的错误
// 约束: 错误信息必须包含显式原因（批次、项目、缺口数量）
// ==========================================

use crate::domain::reservation::StockShortage;
use crate::engine::error::EngineError;
use crate::i18n;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与资源错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 库存数量错误
    // ==========================================
    /// 调用方可据此调整数量或改走采购
    #[error("库存不足: {message}")]
    InsufficientStock {
        message: String,
        shortages: Vec<StockShortage>,
    },

    /// 不变量故障，已由引擎记录 error 日志
    #[error("超额消耗: {0}")]
    Overconsumption(String),

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: {entity} {id} 当前为 {from}，要求 {to}")]
    InvalidStateTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    /// 批量操作部分失败（可重试）
    #[error("批量操作未全部成功: project_id={project_id}, failed={}", .failed.join(","))]
    PartialFailure {
        project_id: String,
        failed: Vec<String>,
        reason: String,
    },

    #[error("操作超时（已回滚）: project_id={project_id}, timeout={timeout_ms}ms")]
    Timeout { project_id: String, timeout_ms: u64 },

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("乐观锁冲突: {0}")]
    OptimisticLockFailure(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ==========================================
    // 导入错误
    // ==========================================
    #[error("文件导入失败: {0}")]
    ImportError(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 调用方能否通过调整输入或重试自行处理
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidInput(_)
                | ApiError::NotFound(_)
                | ApiError::InsufficientStock { .. }
                | ApiError::BusinessRuleViolation(_)
                | ApiError::InvalidStateTransition { .. }
                | ApiError::PartialFailure { .. }
                | ApiError::Timeout { .. }
                | ApiError::OptimisticLockFailure(_)
                | ApiError::ValidationError(_)
        )
    }

    /// 面向最终用户的本地化提示
    pub fn user_message(&self) -> String {
        match self {
            ApiError::InvalidInput(reason) | ApiError::ValidationError(reason) => {
                i18n::t_with_args("reservation.invalid_input", &[("reason", reason.as_str())])
            }
            ApiError::NotFound(target) => {
                i18n::t_with_args("reservation.not_found", &[("target", target.as_str())])
            }
            ApiError::InsufficientStock { message, .. } => {
                i18n::t_with_args("reservation.insufficient_stock", &[("details", message.as_str())])
            }
            ApiError::Overconsumption(details) => {
                i18n::t_with_args("reservation.overconsumption", &[("details", details.as_str())])
            }
            ApiError::InvalidStateTransition { entity, id, from, .. } => {
                if entity == "Reservation" {
                    i18n::t_with_args(
                        "reservation.invalid_reservation_state",
                        &[("reservation_id", id.as_str()), ("status", from.as_str())],
                    )
                } else {
                    i18n::t_with_args(
                        "reservation.invalid_project_state",
                        &[("project_id", id.as_str()), ("status", from.as_str())],
                    )
                }
            }
            ApiError::PartialFailure { project_id, reason, .. } => {
                let key = if reason.starts_with("cancel") {
                    "reservation.cancellation_failed"
                } else {
                    "reservation.consumption_failed"
                };
                i18n::t_with_args(key, &[("project_id", project_id.as_str())])
            }
            ApiError::Timeout { timeout_ms, .. } => i18n::t_with_args(
                "reservation.timeout",
                &[("timeout_ms", timeout_ms.to_string().as_str())],
            ),
            ApiError::OptimisticLockFailure(_) => i18n::t("reservation.concurrent_modification"),
            ApiError::BusinessRuleViolation(msg) | ApiError::ImportError(msg) => msg.clone(),
            ApiError::DatabaseError(_)
            | ApiError::ConfigError(_)
            | ApiError::InternalError(_)
            | ApiError::Other(_) => i18n::t("common.internal_error"),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
                actual,
            } => ApiError::OptimisticLockFailure(format!(
                "{}({})已被其他操作修改（期望revision={}，实际revision={}）",
                entity, id, expected, actual
            )),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::BusinessRuleViolation(msg) => ApiError::BusinessRuleViolation(msg),
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition {
                    entity: "Record".to_string(),
                    id: String::new(),
                    from,
                    to,
                }
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::UnknownMaterialClass(class) => ApiError::InvalidInput(
                i18n::t_with_args("reservation.unknown_material_class", &[("class", class.as_str())]),
            ),
            EngineError::StockItemNotFound { .. }
            | EngineError::ProjectNotFound(_)
            | EngineError::ReservationNotFound(_) => ApiError::NotFound(message),
            EngineError::LineNotInProject { .. } | EngineError::InvalidQuantity(_) => {
                ApiError::InvalidInput(message)
            }
            EngineError::InsufficientStock { shortages } => ApiError::InsufficientStock {
                message: message
                    .trim_start_matches("库存不足: ")
                    .to_string(),
                shortages,
            },
            EngineError::OverconsumptionError { .. } => ApiError::Overconsumption(message),
            EngineError::InvalidProjectState {
                project_id,
                actual,
                expected,
            } => ApiError::InvalidStateTransition {
                entity: "Project".to_string(),
                id: project_id,
                from: actual.to_string(),
                to: expected,
            },
            EngineError::InvalidReservationState {
                reservation_id,
                actual,
            } => ApiError::InvalidStateTransition {
                entity: "Reservation".to_string(),
                id: reservation_id,
                from: actual.to_string(),
                to: "-".to_string(),
            },
            EngineError::UnreservedLines { .. } => ApiError::BusinessRuleViolation(message),
            EngineError::BusinessRuleViolation(msg) => ApiError::BusinessRuleViolation(msg),
            EngineError::ConsumptionError {
                project_id,
                failed_reservations,
                reason,
            } => ApiError::PartialFailure {
                project_id,
                failed: failed_reservations,
                reason: format!("complete: {}", reason),
            },
            EngineError::CancellationError {
                project_id,
                failed_reservations,
                reason,
            } => ApiError::PartialFailure {
                project_id,
                failed: failed_reservations,
                reason: format!("cancel: {}", reason),
            },
            EngineError::ReservationTimeout {
                project_id,
                timeout_ms,
            } => ApiError::Timeout {
                project_id,
                timeout_ms,
            },
            EngineError::ConfigError(msg) => ApiError::ConfigError(msg),
            EngineError::Repository(e) => e.into(),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::FileNotFound(path) => ApiError::NotFound(i18n::t_with_args(
                "import.file_not_found",
                &[("path", path.as_str())],
            )),
            ImportError::UnsupportedFormat(format) => ApiError::InvalidInput(i18n::t_with_args(
                "import.unsupported_format",
                &[("format", format.as_str())],
            )),
            ImportError::ReceiptFailed { source, .. } => source.into(),
            ImportError::ConfigReadError { key, message } => {
                ApiError::ConfigError(format!("{}: {}", key, message))
            }
            ImportError::Other(e) => ApiError::Other(e),
            e @ (ImportError::MissingField { .. }
            | ImportError::TypeConversionError { .. }
            | ImportError::UnknownMaterialClass { .. }
            | ImportError::ValidationError { .. }) => ApiError::ValidationError(e.to_string()),
            e => ApiError::ImportError(e.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{MaterialClass, ProjectStatus};
    use rust_decimal_macros::dec;

    #[test]
    fn test_repository_error_conversion() {
        let api_err: ApiError = RepositoryError::NotFound {
            entity: "Project".to_string(),
            id: "P001".to_string(),
        }
        .into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("Project"));
                assert!(msg.contains("P001"));
            }
            _ => panic!("Expected NotFound"),
        }

        let api_err: ApiError = RepositoryError::OptimisticLockFailure {
            entity: "StockItem".to_string(),
            id: "S-1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        match api_err {
            ApiError::OptimisticLockFailure(msg) => {
                assert!(msg.contains("S-1"));
                assert!(msg.contains("已被其他操作修改"));
            }
            _ => panic!("Expected OptimisticLockFailure"),
        }
    }

    #[test]
    fn test_engine_error_conversion_keeps_shortages() {
        let shortage = StockShortage::new(MaterialClass::Steel, "S-1".to_string(), dec!(10), dec!(4));
        let api_err: ApiError = EngineError::insufficient(shortage).into();
        match &api_err {
            ApiError::InsufficientStock { shortages, message } => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].shortage, dec!(6));
                assert!(message.contains("S-1"));
            }
            _ => panic!("Expected InsufficientStock"),
        }
        assert!(api_err.is_actionable());
    }

    #[test]
    fn test_engine_state_error_conversion() {
        let api_err: ApiError = EngineError::InvalidProjectState {
            project_id: "P1".to_string(),
            actual: ProjectStatus::Completed,
            expected: "PLANNING".to_string(),
        }
        .into();
        match api_err {
            ApiError::InvalidStateTransition { entity, id, .. } => {
                assert_eq!(entity, "Project");
                assert_eq!(id, "P1");
            }
            _ => panic!("Expected InvalidStateTransition"),
        }

        let api_err: ApiError = EngineError::OverconsumptionError {
            material_class: MaterialClass::Rope,
            stock_item_id: "R1".to_string(),
            requested: dec!(5),
            reserved: dec!(3),
        }
        .into();
        assert!(matches!(api_err, ApiError::Overconsumption(_)));
        assert!(!api_err.is_actionable());

        let api_err: ApiError = EngineError::UnreservedLines {
            project_id: "P1".to_string(),
            line_ids: vec!["L1".to_string(), "L2".to_string()],
        }
        .into();
        match api_err {
            ApiError::BusinessRuleViolation(msg) => assert!(msg.contains("L1,L2")),
            _ => panic!("Expected BusinessRuleViolation"),
        }
    }

    #[test]
    fn test_import_error_conversion() {
        let api_err: ApiError = ImportError::MissingField {
            row: 3,
            field: "quantity".to_string(),
        }
        .into();
        assert!(matches!(api_err, ApiError::ValidationError(_)));

        let api_err: ApiError = ImportError::ReceiptFailed {
            row: 2,
            source: EngineError::ProjectNotFound("P9".to_string()),
        }
        .into();
        assert!(matches!(api_err, ApiError::NotFound(_)));
    }
}
