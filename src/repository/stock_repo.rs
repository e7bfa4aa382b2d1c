// ==========================================
// 物料库存预留系统 - 库存批次仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 设计: 五类物料共用一套实现，按 MaterialClass 选择表
// ==========================================

use crate::domain::stock::StockItem;
use crate::domain::types::MaterialClass;
use crate::repository::columns::{datetime_at, decimal_at};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// StockRepository Trait
// ==========================================
// 用途: 单一物料类别的库存批次数据访问
// 实现者: SqliteStockRepository
pub trait StockRepository: Send + Sync {
    /// 本仓储负责的物料类别
    fn material_class(&self) -> MaterialClass;

    /// 按批次ID查询
    fn find_by_id(&self, stock_item_id: &str) -> RepositoryResult<Option<StockItem>>;

    /// 新增批次
    fn insert(&self, item: &StockItem) -> RepositoryResult<()>;

    /// 保存数量字段（带乐观锁检查）
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配
    /// - `RepositoryError::NotFound`: 批次不存在
    fn save(&self, item: &StockItem) -> RepositoryResult<()>;

    /// 软停用
    fn deactivate(&self, stock_item_id: &str) -> RepositoryResult<()>;

    /// 查询全部批次（核对用）
    fn list_all(&self) -> RepositoryResult<Vec<StockItem>>;
}

// ==========================================
// SqliteStockRepository - 库存批次仓储（SQLite）
// ==========================================
pub struct SqliteStockRepository {
    conn: Arc<Mutex<Connection>>,
    material_class: MaterialClass,
}

const SELECT_COLUMNS: &str = r#"
    stock_item_id, unit, unit_price, currency,
    total_quantity, consumed_quantity, reserved_quantity,
    is_active, revision, created_at, updated_at
"#;

impl SqliteStockRepository {
    /// 创建新的仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>, material_class: MaterialClass) -> Self {
        Self {
            conn,
            material_class,
        }
    }

    /// 为全部五类物料创建仓储
    pub fn for_all_classes(conn: Arc<Mutex<Connection>>) -> Vec<Self> {
        MaterialClass::ALL
            .iter()
            .map(|class| Self::new(conn.clone(), *class))
            .collect()
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn table(&self) -> &'static str {
        self.material_class.table_name()
    }

    fn map_row(&self, row: &Row<'_>) -> rusqlite::Result<StockItem> {
        Ok(StockItem {
            stock_item_id: row.get(0)?,
            material_class: self.material_class,
            unit: row.get(1)?,
            unit_price: decimal_at(row, 2)?,
            currency: row.get(3)?,
            total_quantity: decimal_at(row, 4)?,
            consumed_quantity: decimal_at(row, 5)?,
            reserved_quantity: decimal_at(row, 6)?,
            is_active: row.get::<_, i32>(7)? != 0,
            revision: row.get(8)?,
            created_at: datetime_at(row, 9)?,
            updated_at: datetime_at(row, 10)?,
        })
    }
}

impl StockRepository for SqliteStockRepository {
    fn material_class(&self) -> MaterialClass {
        self.material_class
    }

    fn find_by_id(&self, stock_item_id: &str) -> RepositoryResult<Option<StockItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE stock_item_id = ?1",
            SELECT_COLUMNS,
            self.table()
        );

        match conn.query_row(&sql, params![stock_item_id], |row| self.map_row(row)) {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn insert(&self, item: &StockItem) -> RepositoryResult<()> {
        if item.material_class != self.material_class {
            return Err(RepositoryError::FieldValueError {
                field: "material_class".to_string(),
                message: format!(
                    "批次 {} 属于 {}，不能写入 {}",
                    item.stock_item_id,
                    item.material_class,
                    self.table()
                ),
            });
        }

        let conn = self.get_conn()?;
        let sql = format!(
            r#"INSERT INTO {} (
                stock_item_id, unit, unit_price, currency,
                total_quantity, consumed_quantity, reserved_quantity,
                is_active, revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            self.table()
        );

        conn.execute(
            &sql,
            params![
                item.stock_item_id,
                item.unit,
                item.unit_price.to_string(),
                item.currency,
                item.total_quantity.to_string(),
                item.consumed_quantity.to_string(),
                item.reserved_quantity.to_string(),
                item.is_active as i32,
                item.revision,
                item.created_at.to_rfc3339(),
                item.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    fn save(&self, item: &StockItem) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"UPDATE {}
               SET unit_price = ?1, currency = ?2,
                   total_quantity = ?3, consumed_quantity = ?4, reserved_quantity = ?5,
                   is_active = ?6, revision = revision + 1, updated_at = ?7
               WHERE stock_item_id = ?8 AND revision = ?9"#,
            self.table()
        );

        let rows_affected = conn.execute(
            &sql,
            params![
                item.unit_price.to_string(),
                item.currency,
                item.total_quantity.to_string(),
                item.consumed_quantity.to_string(),
                item.reserved_quantity.to_string(),
                item.is_active as i32,
                Utc::now().to_rfc3339(),
                item.stock_item_id,
                item.revision,
            ],
        )?;

        if rows_affected == 0 {
            // 判断是记录不存在还是revision冲突
            let actual: Result<i32, _> = conn.query_row(
                &format!("SELECT revision FROM {} WHERE stock_item_id = ?1", self.table()),
                params![item.stock_item_id],
                |row| row.get(0),
            );

            return match actual {
                Ok(actual_revision) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "StockItem".to_string(),
                    id: item.stock_item_id.clone(),
                    expected: item.revision,
                    actual: actual_revision,
                }),
                Err(_) => Err(RepositoryError::NotFound {
                    entity: "StockItem".to_string(),
                    id: item.stock_item_id.clone(),
                }),
            };
        }

        Ok(())
    }

    fn deactivate(&self, stock_item_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let sql = format!(
            "UPDATE {} SET is_active = 0, revision = revision + 1, updated_at = ?1 WHERE stock_item_id = ?2",
            self.table()
        );
        let rows = conn.execute(&sql, params![Utc::now().to_rfc3339(), stock_item_id])?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "StockItem".to_string(),
                id: stock_item_id.to_string(),
            });
        }
        Ok(())
    }

    fn list_all(&self) -> RepositoryResult<Vec<StockItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY stock_item_id",
            SELECT_COLUMNS,
            self.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map([], |row| self.map_row(row))?
            .collect::<Result<Vec<StockItem>, _>>()?;
        Ok(items)
    }
}
