// ==========================================
// 物料库存预留系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 组装顺序: 数据库 → 配置 → 仓储 → 目录 → 引擎 → 导入器 → API
// ==========================================

use std::sync::Arc;

use crate::api::ReservationApi;
use crate::config::ConfigManager;
use crate::db::{init_schema, open_shared_connection, read_schema_version};
use crate::engine::{BroadcastEventPublisher, MaterialCatalog, ReservationEngine};
use crate::importer::StockReceiptImporterImpl;
use crate::repository::{ProjectRepository, ReservationRepository};

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 配置管理器
    pub config: Arc<ConfigManager>,

    /// 预留引擎
    pub engine: Arc<ReservationEngine<ConfigManager>>,

    /// 预留业务API
    pub reservation_api: Arc<ReservationApi>,

    /// 事件发布器（外部通知组件可订阅）
    pub event_publisher: Arc<BroadcastEventPublisher>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        // 创建数据库连接（共享连接）并建表
        let conn = open_shared_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        {
            let guard = conn
                .lock()
                .map_err(|e| format!("数据库锁获取失败: {}", e))?;
            init_schema(&guard).map_err(|e| format!("数据库初始化失败: {}", e))?;
            match read_schema_version(&guard) {
                Ok(version) => tracing::info!(schema_version = ?version, "数据库结构就绪"),
                Err(e) => tracing::warn!("读取 schema_version 失败: {}", e),
            }
        }

        // ==========================================
        // 配置与仓储
        // ==========================================
        let config = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let project_repo = Arc::new(ProjectRepository::new(conn.clone()));
        let reservation_repo = Arc::new(ReservationRepository::new(conn.clone()));
        let catalog = Arc::new(MaterialCatalog::from_connection(conn));

        // ==========================================
        // 引擎与API
        // ==========================================
        let event_publisher = Arc::new(BroadcastEventPublisher::new(EVENT_CHANNEL_CAPACITY));
        let engine = Arc::new(
            ReservationEngine::new(
                catalog.clone(),
                project_repo,
                reservation_repo,
                config.clone(),
            )
            .with_event_publisher(event_publisher.clone()),
        );
        let importer = Arc::new(StockReceiptImporterImpl::new(catalog, config.clone()));
        let reservation_api = Arc::new(ReservationApi::new(engine.clone(), importer));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            config,
            engine,
            reservation_api,
            event_publisher,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先使用环境变量 MATERIAL_RESERVATION_DB_PATH，否则放在用户数据目录下
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("MATERIAL_RESERVATION_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./material_reservation.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("material-reservation");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("material_reservation.db");
        }
    }

    path.to_string_lossy().to_string()
}
