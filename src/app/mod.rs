// ==========================================
// 物料库存预留系统 - 应用层
// ==========================================
// 职责: 组装数据库、引擎与 API
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
