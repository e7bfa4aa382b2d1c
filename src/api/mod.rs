// ==========================================
// 物料库存预留系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口，供上层（服务/命令行）调用
// ==========================================

pub mod error;
pub mod reservation_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use reservation_api::ReservationApi;
