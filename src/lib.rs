// ==========================================
// 物料库存预留系统 - 核心库
// ==========================================
// 职责: 项目物料的库存预留、开工、消耗与取消
// 技术栈: Rust + SQLite + tokio
// 红线: 库存数量只经 StockLedger 修改
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 预留/消耗规则
pub mod engine;

// 导入层 - 入库数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    LinePriority, MaterialClass, MaterialLineStatus, ProjectStatus, ReservationStatus,
};

// 领域实体
pub use domain::{
    ConsistencyReport, LineSource, Project, ProjectMaterialLine, Reservation, StockItem,
    ValidatedLine,
};

// 引擎
pub use engine::{EngineError, MaterialCatalog, ReservationEngine, StockLedger};

// API
pub use api::{ApiError, ReservationApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "物料库存预留系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
