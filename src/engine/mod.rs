// ==========================================
// 物料库存预留系统 - 引擎层
// ==========================================
// 职责: 实现库存预留/消耗业务规则,不拼 SQL
// 红线: Engine 不拼 SQL, 所有拒绝必须携带原因
// ==========================================

pub mod catalog;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod locks;
pub mod reservation;

// 重导出核心引擎
pub use catalog::MaterialCatalog;
pub use error::{EngineError, EngineResult};
pub use events::{
    BroadcastEventPublisher, NoOpEventPublisher, OptionalEventPublisher, ReservationEvent,
    ReservationEventPublisher, ReservationEventType,
};
pub use ledger::{StockKey, StockLedger};
pub use lifecycle::{ProjectLifecycle, ProjectOperation};
pub use locks::KeyedLocks;
pub use reservation::ReservationEngine;
