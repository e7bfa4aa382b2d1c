// ==========================================
// 物料库存预留系统 - 库存台账
// ==========================================
// 职责: 单个库存批次的数量流转（可用 → 预留 → 消耗）
// 并发: 所有写操作在批次锁内完成 加锁 → 读取 → 计算 → 乐观锁保存
// 红线: 数量字段只能经由本模块修改；超额消耗必须报错，不可静默修正
// ==========================================

use crate::domain::reservation::StockShortage;
use crate::domain::stock::{StockAvailability, StockItem};
use crate::domain::types::MaterialClass;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::locks::KeyedLocks;
use crate::repository::stock_repo::StockRepository;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 批次锁键: (物料类别, 批次ID)
pub type StockKey = (MaterialClass, String);

// ==========================================
// StockLedger - 单批次台账句柄
// ==========================================
// 由 MaterialCatalog::resolve 构造；句柄本身不缓存数量，每次操作重新读取
#[derive(Clone)]
pub struct StockLedger {
    material_class: MaterialClass,
    stock_item_id: String,
    repo: Arc<dyn StockRepository>,
    locks: Arc<KeyedLocks<StockKey>>,
}

impl StockLedger {
    pub(crate) fn new(
        material_class: MaterialClass,
        stock_item_id: impl Into<String>,
        repo: Arc<dyn StockRepository>,
        locks: Arc<KeyedLocks<StockKey>>,
    ) -> Self {
        Self {
            material_class,
            stock_item_id: stock_item_id.into(),
            repo,
            locks,
        }
    }

    pub fn material_class(&self) -> MaterialClass {
        self.material_class
    }

    pub fn stock_item_id(&self) -> &str {
        &self.stock_item_id
    }

    fn key(&self) -> StockKey {
        (self.material_class, self.stock_item_id.clone())
    }

    fn load(&self) -> EngineResult<StockItem> {
        self.repo
            .find_by_id(&self.stock_item_id)?
            .ok_or_else(|| EngineError::StockItemNotFound {
                material_class: self.material_class,
                stock_item_id: self.stock_item_id.clone(),
            })
    }

    /// 在批次锁内执行 读取 → 计算 → 保存
    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut StockItem) -> EngineResult<T>,
    ) -> EngineResult<(T, StockItem)> {
        let _guard = self.locks.acquire(&self.key()).await;

        let mut item = self.load()?;
        let value = apply(&mut item)?;
        self.repo.save(&item)?;
        item.revision += 1;

        Ok((value, item))
    }

    /// 读取批次当前快照（只读，不持锁）
    pub fn snapshot(&self) -> EngineResult<StockItem> {
        self.load()
    }

    /// 检查可用量是否满足需求（只读）
    pub fn check_available(&self, quantity: Decimal) -> EngineResult<StockAvailability> {
        let item = self.load()?;
        Ok(availability_of(&item, quantity))
    }

    /// 预留: 可用量不足时返回 InsufficientStock（携带当前可用量）
    pub async fn reserve(&self, quantity: Decimal) -> EngineResult<StockItem> {
        let (_, item) = self.mutate(|item| apply_reserve(item, quantity)).await?;
        debug!(
            material_class = %self.material_class,
            stock_item_id = %self.stock_item_id,
            quantity = %quantity,
            reserved = %item.reserved_quantity,
            "批次预留成功"
        );
        Ok(item)
    }

    /// 释放预留: 实际释放 min(quantity, reserved)，返回释放量
    pub async fn unreserve(&self, quantity: Decimal) -> EngineResult<Decimal> {
        let (released, item) = self.mutate(|item| apply_unreserve(item, quantity)).await?;
        debug!(
            material_class = %self.material_class,
            stock_item_id = %self.stock_item_id,
            requested = %quantity,
            released = %released,
            reserved = %item.reserved_quantity,
            "批次预留已释放"
        );
        Ok(released)
    }

    /// 消耗: 只能消耗已预留的部分
    pub async fn consume(&self, quantity: Decimal) -> EngineResult<StockItem> {
        let result = self.mutate(|item| apply_consume(item, quantity)).await;
        match result {
            Ok((_, item)) => Ok(item),
            Err(e) => {
                self.log_overconsumption(&e);
                Err(e)
            }
        }
    }

    /// 结算: 消耗 used，并释放 reserved - used（同一次保存）
    ///
    /// # 返回
    /// - 实际释放回可用的数量
    pub async fn settle(&self, reserved: Decimal, used: Decimal) -> EngineResult<Decimal> {
        let result = self.mutate(|item| apply_settle(item, reserved, used)).await;
        match result {
            Ok((released, item)) => {
                debug!(
                    material_class = %self.material_class,
                    stock_item_id = %self.stock_item_id,
                    consumed = %used,
                    released = %released,
                    remaining = %item.remaining_quantity(),
                    "批次结算完成"
                );
                Ok(released)
            }
            Err(e) => {
                self.log_overconsumption(&e);
                Err(e)
            }
        }
    }

    /// 入库: 累计入库量增加
    pub async fn receive(&self, quantity: Decimal) -> EngineResult<StockItem> {
        let (_, item) = self.mutate(|item| apply_receive(item, quantity)).await?;
        info!(
            material_class = %self.material_class,
            stock_item_id = %self.stock_item_id,
            quantity = %quantity,
            total = %item.total_quantity,
            "批次入库"
        );
        Ok(item)
    }

    /// 软停用（调用方负责确认无未结束预留）
    pub async fn deactivate(&self) -> EngineResult<StockItem> {
        let (_, item) = self
            .mutate(|item| {
                if item.reserved_quantity > Decimal::ZERO {
                    return Err(EngineError::BusinessRuleViolation(format!(
                        "批次 {} 仍有预留量 {}，不能停用",
                        item.stock_item_id, item.reserved_quantity
                    )));
                }
                item.is_active = false;
                Ok(())
            })
            .await?;
        info!(
            material_class = %self.material_class,
            stock_item_id = %self.stock_item_id,
            "批次已停用"
        );
        Ok(item)
    }

    fn log_overconsumption(&self, err: &EngineError) {
        if let EngineError::OverconsumptionError {
            requested, reserved, ..
        } = err
        {
            error!(
                material_class = %self.material_class,
                stock_item_id = %self.stock_item_id,
                requested = %requested,
                reserved = %reserved,
                "超额消耗被拒绝"
            );
        }
    }
}

// ==========================================
// 纯计算函数（不做 IO，便于单元测试）
// ==========================================

fn availability_of(item: &StockItem, quantity: Decimal) -> StockAvailability {
    let available = item.reservable_quantity();
    StockAvailability {
        sufficient: available >= quantity,
        available,
    }
}

fn ensure_positive(quantity: Decimal, op: &str) -> EngineResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(EngineError::InvalidQuantity(format!(
            "{} 数量必须大于 0，实际 {}",
            op, quantity
        )));
    }
    Ok(())
}

fn ensure_non_negative(quantity: Decimal, op: &str) -> EngineResult<()> {
    if quantity < Decimal::ZERO {
        return Err(EngineError::InvalidQuantity(format!(
            "{} 数量不能为负，实际 {}",
            op, quantity
        )));
    }
    Ok(())
}

pub(crate) fn apply_reserve(item: &mut StockItem, quantity: Decimal) -> EngineResult<()> {
    ensure_positive(quantity, "reserve")?;

    let available = item.reservable_quantity();
    if available < quantity {
        return Err(EngineError::insufficient(StockShortage::new(
            item.material_class,
            item.stock_item_id.clone(),
            quantity,
            available,
        )));
    }

    item.reserved_quantity += quantity;
    Ok(())
}

pub(crate) fn apply_unreserve(item: &mut StockItem, quantity: Decimal) -> EngineResult<Decimal> {
    ensure_non_negative(quantity, "unreserve")?;

    let released = quantity.min(item.reserved_quantity).max(Decimal::ZERO);
    item.reserved_quantity -= released;
    Ok(released)
}

pub(crate) fn apply_consume(item: &mut StockItem, quantity: Decimal) -> EngineResult<()> {
    ensure_non_negative(quantity, "consume")?;

    if quantity > item.reserved_quantity {
        return Err(EngineError::OverconsumptionError {
            material_class: item.material_class,
            stock_item_id: item.stock_item_id.clone(),
            requested: quantity,
            reserved: item.reserved_quantity,
        });
    }

    item.reserved_quantity -= quantity;
    item.consumed_quantity += quantity;
    Ok(())
}

pub(crate) fn apply_settle(
    item: &mut StockItem,
    reserved: Decimal,
    used: Decimal,
) -> EngineResult<Decimal> {
    ensure_non_negative(reserved, "settle")?;
    ensure_non_negative(used, "settle")?;

    if used > reserved {
        return Err(EngineError::OverconsumptionError {
            material_class: item.material_class,
            stock_item_id: item.stock_item_id.clone(),
            requested: used,
            reserved,
        });
    }

    apply_consume(item, used)?;
    apply_unreserve(item, reserved - used)
}

pub(crate) fn apply_receive(item: &mut StockItem, quantity: Decimal) -> EngineResult<()> {
    ensure_positive(quantity, "receive")?;
    item.total_quantity = item.total_quantity.checked_add(quantity).ok_or_else(|| {
        EngineError::InvalidQuantity(format!(
            "入库后累计数量溢出: 当前 {}，入库 {}",
            item.total_quantity, quantity
        ))
    })?;
    Ok(())
}
