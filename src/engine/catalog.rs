// ==========================================
// 物料库存预留系统 - 物料目录
// ==========================================
// 职责: (物料类别, 批次ID) → StockLedger
// 红线: 全系统唯一知道五类物料的组件；其他组件只通过目录解析批次
// ==========================================

use crate::domain::stock::StockItem;
use crate::domain::types::MaterialClass;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{StockKey, StockLedger};
use crate::engine::locks::KeyedLocks;
use crate::repository::stock_repo::{SqliteStockRepository, StockRepository};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

// ==========================================
// MaterialCatalog - 物料目录
// ==========================================
pub struct MaterialCatalog {
    repositories: HashMap<MaterialClass, Arc<dyn StockRepository>>,
    // 批次锁注册表由目录持有，所有台账句柄共享
    locks: Arc<KeyedLocks<StockKey>>,
}

impl MaterialCatalog {
    /// 由各类别仓储构造目录
    pub fn new(repositories: Vec<Arc<dyn StockRepository>>) -> Self {
        let repositories = repositories
            .into_iter()
            .map(|repo| (repo.material_class(), repo))
            .collect();

        Self {
            repositories,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// 基于共享连接构造五类物料的 SQLite 目录
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        let repositories = SqliteStockRepository::for_all_classes(conn)
            .into_iter()
            .map(|repo| Arc::new(repo) as Arc<dyn StockRepository>)
            .collect();
        Self::new(repositories)
    }

    /// 解析外部传入的物料类别名
    pub fn resolve_class(&self, material_class: &str) -> EngineResult<MaterialClass> {
        let class = MaterialClass::from_str(material_class)
            .ok_or_else(|| EngineError::UnknownMaterialClass(material_class.to_string()))?;
        if !self.repositories.contains_key(&class) {
            return Err(EngineError::UnknownMaterialClass(material_class.to_string()));
        }
        Ok(class)
    }

    /// 取得某类别的仓储
    pub fn repository(&self, material_class: MaterialClass) -> EngineResult<&Arc<dyn StockRepository>> {
        self.repositories
            .get(&material_class)
            .ok_or_else(|| EngineError::UnknownMaterialClass(material_class.to_string()))
    }

    /// 已注册的物料类别（有序）
    pub fn classes(&self) -> Vec<MaterialClass> {
        let mut classes: Vec<MaterialClass> = self.repositories.keys().copied().collect();
        classes.sort();
        classes
    }

    /// 解析批次台账
    ///
    /// # 错误
    /// - `EngineError::UnknownMaterialClass`: 类别未注册
    /// - `EngineError::StockItemNotFound`: 批次不存在
    pub fn resolve(&self, material_class: MaterialClass, stock_item_id: &str) -> EngineResult<StockLedger> {
        let repo = self.repository(material_class)?;
        if repo.find_by_id(stock_item_id)?.is_none() {
            return Err(EngineError::StockItemNotFound {
                material_class,
                stock_item_id: stock_item_id.to_string(),
            });
        }

        Ok(StockLedger::new(
            material_class,
            stock_item_id,
            repo.clone(),
            self.locks.clone(),
        ))
    }

    /// 按类别名解析批次台账
    pub fn resolve_by_name(&self, material_class: &str, stock_item_id: &str) -> EngineResult<StockLedger> {
        let class = self.resolve_class(material_class)?;
        self.resolve(class, stock_item_id)
    }

    /// 登记新批次（入库建档）
    pub fn register(&self, item: &StockItem) -> EngineResult<StockLedger> {
        if item.stock_item_id.trim().is_empty() {
            return Err(EngineError::BusinessRuleViolation(
                "批次ID不能为空".to_string(),
            ));
        }
        if item.total_quantity < Decimal::ZERO || item.unit_price < Decimal::ZERO {
            return Err(EngineError::InvalidQuantity(format!(
                "批次 {} 入库量/单价不能为负: total={}, unit_price={}",
                item.stock_item_id, item.total_quantity, item.unit_price
            )));
        }
        if item.reserved_quantity != Decimal::ZERO || !item.invariant_violations().is_empty() {
            return Err(EngineError::BusinessRuleViolation(format!(
                "新批次 {} 不能携带预留量或违反数量约束",
                item.stock_item_id
            )));
        }

        let repo = self.repository(item.material_class)?;
        repo.insert(item)?;

        tracing::info!(
            material_class = %item.material_class,
            stock_item_id = %item.stock_item_id,
            total = %item.total_quantity,
            "新批次已登记"
        );

        Ok(StockLedger::new(
            item.material_class,
            item.stock_item_id.clone(),
            repo.clone(),
            self.locks.clone(),
        ))
    }

    /// 独占持有某批次（盘点/人工维护期间阻止数量流转）
    pub async fn hold_item(&self, material_class: MaterialClass, stock_item_id: &str) -> OwnedMutexGuard<()> {
        self.locks
            .acquire(&(material_class, stock_item_id.to_string()))
            .await
    }

    /// 某类别的全部批次
    pub fn list_items(&self, material_class: MaterialClass) -> EngineResult<Vec<StockItem>> {
        Ok(self.repository(material_class)?.list_all()?)
    }
}
