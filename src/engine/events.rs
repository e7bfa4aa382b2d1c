// ==========================================
// 物料库存预留系统 - 引擎层事件发布
// ==========================================
// 职责: 定义预留事件发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，通知/日志组件实现订阅
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast;

// ==========================================
// 预留事件类型
// ==========================================

/// 预留事件触发类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEventType {
    /// 项目物料已预留
    Reserved,
    /// 项目开工，预留转为使用中
    Activated,
    /// 项目完工，预留已消耗
    Completed,
    /// 预留（或整个项目）已取消
    Cancelled,
}

impl ReservationEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            ReservationEventType::Reserved => "Reserved",
            ReservationEventType::Activated => "Activated",
            ReservationEventType::Completed => "Completed",
            ReservationEventType::Cancelled => "Cancelled",
        }
    }
}

/// 预留事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationEvent {
    /// 项目 ID
    pub project_id: String,
    /// 事件类型
    pub event_type: ReservationEventType,
    /// 涉及的预留记录
    pub reservation_ids: Vec<String>,
    /// 发生时间
    pub occurred_at: DateTime<Utc>,
}

impl ReservationEvent {
    pub fn new(
        project_id: impl Into<String>,
        event_type: ReservationEventType,
        reservation_ids: Vec<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            event_type,
            reservation_ids,
            occurred_at: Utc::now(),
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 预留事件发布者 Trait
///
/// # 返回
/// - `Ok(n)`: 收到事件的订阅者数量（不支持计数时为 0）
/// - `Err`: 发布失败（引擎只记录告警，不回滚业务）
pub trait ReservationEventPublisher: Send + Sync {
    fn publish(&self, event: ReservationEvent) -> Result<usize, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl ReservationEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: ReservationEvent) -> Result<usize, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - project_id={}, event_type={}",
            event.project_id,
            event.event_type.as_str()
        );
        Ok(0)
    }
}

/// 广播事件发布者
///
/// 基于 tokio broadcast 通道；无订阅者时事件被丢弃，不视为错误
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<ReservationEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<ReservationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ReservationEventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: ReservationEvent) -> Result<usize, Box<dyn Error + Send + Sync>> {
        match self.sender.send(event) {
            Ok(receivers) => Ok(receivers),
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(
                    "BroadcastEventPublisher: 无订阅者 - project_id={}, event_type={}",
                    event.project_id,
                    event.event_type.as_str()
                );
                Ok(0)
            }
        }
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn ReservationEventPublisher>> 的使用
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn ReservationEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn ReservationEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: ReservationEvent) -> Result<usize, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - project_id={}, event_type={}",
                    event.project_id,
                    event.event_type.as_str()
                );
                Ok(0)
            }
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}
