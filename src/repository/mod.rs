// ==========================================
// 物料库存预留系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
//       表名只来自 MaterialClass::table_name()，不接受外部输入
// ==========================================

mod columns;
pub mod error;
pub mod project_repo;
pub mod reservation_repo;
pub mod stock_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use project_repo::ProjectRepository;
pub use reservation_repo::ReservationRepository;
pub use stock_repo::{SqliteStockRepository, StockRepository};
