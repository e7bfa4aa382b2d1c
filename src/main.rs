// ==========================================
// 物料库存预留系统 - 主入口
// ==========================================
// 启动流程: 日志 → 数据库/组装 → 库存账实核对
// 用法: material-reservation [数据库路径]
// ==========================================

use material_reservation::app::{get_default_db_path, AppState};
use material_reservation::logging;

fn main() {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", material_reservation::APP_NAME);
    tracing::info!("系统版本: {}", material_reservation::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let app_state = match AppState::new(db_path) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("无法初始化AppState: {}", e);
            std::process::exit(1);
        }
    };

    // 启动时核对库存账实一致性
    match app_state.reservation_api.audit(None) {
        Ok(reports) => {
            let inconsistent: Vec<_> = reports.iter().filter(|r| !r.is_consistent()).collect();
            if inconsistent.is_empty() {
                tracing::info!(items = reports.len(), "库存账实一致");
            } else {
                for report in &inconsistent {
                    tracing::error!(
                        material_class = %report.material_class,
                        stock_item_id = %report.stock_item_id,
                        violations = ?report.violations,
                        "库存账实不一致，需人工核对"
                    );
                }
                std::process::exit(2);
            }
        }
        Err(e) => {
            tracing::error!("库存核对失败: {}", e.user_message());
            std::process::exit(1);
        }
    }
}
