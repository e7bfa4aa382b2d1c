// ==========================================
// 物料库存预留系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod project;
pub mod receipt;
pub mod reservation;
pub mod stock;
pub mod types;

// 重导出核心类型
pub use project::{LineSource, Project, ProjectMaterialLine};
pub use receipt::{ImportRowFailure, ImportSummary, StockReceiptRow};
pub use reservation::{
    CompletionOutcome, ConsistencyReport, Reservation, ReservationOutcome, StockConflict,
    StockShortage, ValidatedLine,
};
pub use stock::{StockAvailability, StockItem};
pub use types::{LinePriority, MaterialClass, MaterialLineStatus, ProjectStatus, ReservationStatus};
