// ==========================================
// 物料库存预留系统 - 预留配置读取 Trait
// ==========================================
// 职责: 定义预留引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use std::error::Error;

/// 配置读取错误
pub type ConfigError = Box<dyn Error + Send + Sync>;

// ==========================================
// ReservationConfigReader Trait
// ==========================================
// 用途: 预留引擎所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ReservationConfigReader: Send + Sync {
    /// 获取批量预留总超时（毫秒）
    ///
    /// # 默认值
    /// - 5000
    async fn get_reserve_timeout_ms(&self) -> Result<u64, ConfigError>;

    /// 获取默认币种（入库未指定币种时使用）
    ///
    /// # 默认值
    /// - CNY
    async fn get_default_currency(&self) -> Result<String, ConfigError>;

    /// 是否允许登记部分用量
    ///
    /// # 默认值
    /// - true
    async fn get_allow_partial_usage(&self) -> Result<bool, ConfigError>;
}
