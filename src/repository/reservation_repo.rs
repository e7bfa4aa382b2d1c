// ==========================================
// 物料库存预留系统 - 预留记录仓储
// ==========================================
// 红线: 预留记录只追加；仅 status / used_quantity 可更新
// 并发: 状态变更带前置状态条件（WHERE status = ?），防止并发重复流转
// ==========================================

use crate::domain::reservation::Reservation;
use crate::domain::types::{MaterialClass, ReservationStatus};
use crate::repository::columns::{datetime_at, decimal_at, enum_at, optional_decimal_at};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rust_decimal::Decimal;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    reservation_id, material_class, stock_item_id, project_id, material_line_id,
    reserved_quantity, used_quantity, unit, status, created_at, updated_at
"#;

// ==========================================
// ReservationRepository - 预留记录仓储
// ==========================================
pub struct ReservationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ReservationRepository {
    /// 创建新的ReservationRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量写入预留记录（事务）
    pub fn insert_batch(&self, reservations: &[Reservation]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        for r in reservations {
            tx.execute(
                r#"INSERT INTO stock_reservation (
                    reservation_id, material_class, stock_item_id, project_id, material_line_id,
                    reserved_quantity, used_quantity, unit, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                params![
                    r.reservation_id,
                    r.material_class.to_db_str(),
                    r.stock_item_id,
                    r.project_id,
                    r.material_line_id,
                    r.reserved_quantity.to_string(),
                    r.used_quantity.map(|q| q.to_string()),
                    r.unit,
                    r.status.to_db_str(),
                    r.created_at.to_rfc3339(),
                    r.updated_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(reservations.len())
    }

    /// 按reservation_id查询
    pub fn find_by_id(&self, reservation_id: &str) -> RepositoryResult<Option<Reservation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stock_reservation WHERE reservation_id = ?1",
            SELECT_COLUMNS
        );

        match conn.query_row(&sql, params![reservation_id], map_row) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询项目的全部预留记录
    pub fn find_by_project(&self, project_id: &str) -> RepositoryResult<Vec<Reservation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stock_reservation WHERE project_id = ?1 ORDER BY created_at, reservation_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![project_id], map_row)?
            .collect::<Result<Vec<Reservation>, _>>()?;
        Ok(rows)
    }

    /// 查询某批次上未结束（RESERVED/ACTIVE）的预留
    pub fn find_open_by_stock_item(
        &self,
        material_class: MaterialClass,
        stock_item_id: &str,
    ) -> RepositoryResult<Vec<Reservation>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM stock_reservation
               WHERE material_class = ?1 AND stock_item_id = ?2
                 AND status IN ('RESERVED', 'ACTIVE')
               ORDER BY created_at, reservation_id"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![material_class.to_db_str(), stock_item_id], map_row)?
            .collect::<Result<Vec<Reservation>, _>>()?;
        Ok(rows)
    }

    /// 状态流转（带前置状态条件）
    ///
    /// # 参数
    /// - from: 期望的当前状态
    /// - to: 目标状态
    /// - used_quantity: 需要同时写入的用量（None 表示不修改）
    ///
    /// # 错误
    /// - `RepositoryError::InvalidStateTransition`: 当前状态不是 from
    /// - `RepositoryError::NotFound`: 记录不存在
    pub fn transition_status(
        &self,
        reservation_id: &str,
        from: ReservationStatus,
        to: ReservationStatus,
        used_quantity: Option<Decimal>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;

        let rows_affected = match used_quantity {
            Some(used) => conn.execute(
                r#"UPDATE stock_reservation
                   SET status = ?1, used_quantity = ?2, updated_at = ?3
                   WHERE reservation_id = ?4 AND status = ?5"#,
                params![
                    to.to_db_str(),
                    used.to_string(),
                    Utc::now().to_rfc3339(),
                    reservation_id,
                    from.to_db_str(),
                ],
            )?,
            None => conn.execute(
                r#"UPDATE stock_reservation
                   SET status = ?1, updated_at = ?2
                   WHERE reservation_id = ?3 AND status = ?4"#,
                params![
                    to.to_db_str(),
                    Utc::now().to_rfc3339(),
                    reservation_id,
                    from.to_db_str(),
                ],
            )?,
        };

        if rows_affected == 0 {
            let actual: Result<String, _> = conn.query_row(
                "SELECT status FROM stock_reservation WHERE reservation_id = ?1",
                params![reservation_id],
                |row| row.get(0),
            );
            return match actual {
                Ok(actual_status) => Err(RepositoryError::InvalidStateTransition {
                    from: actual_status,
                    to: to.to_db_str().to_string(),
                }),
                Err(_) => Err(RepositoryError::NotFound {
                    entity: "Reservation".to_string(),
                    id: reservation_id.to_string(),
                }),
            };
        }

        Ok(())
    }

    /// 回退用量登记（仅用于完工失败时撤销认领）
    pub fn clear_usage(&self, reservation_id: &str, used_quantity: Option<Decimal>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE stock_reservation SET used_quantity = ?1, updated_at = ?2 WHERE reservation_id = ?3",
            params![
                used_quantity.map(|q| q.to_string()),
                Utc::now().to_rfc3339(),
                reservation_id,
            ],
        )?;
        Ok(())
    }

    /// 登记部分用量（仅 ACTIVE 状态）
    pub fn record_usage(&self, reservation_id: &str, used_quantity: Decimal) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows_affected = conn.execute(
            r#"UPDATE stock_reservation
               SET used_quantity = ?1, updated_at = ?2
               WHERE reservation_id = ?3 AND status = 'ACTIVE'"#,
            params![used_quantity.to_string(), Utc::now().to_rfc3339(), reservation_id],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::BusinessRuleViolation(format!(
                "预留 {} 不存在或不处于 ACTIVE 状态",
                reservation_id
            )));
        }
        Ok(())
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Reservation> {
    Ok(Reservation {
        reservation_id: row.get(0)?,
        material_class: enum_at(row, 1, MaterialClass::from_str)?,
        stock_item_id: row.get(2)?,
        project_id: row.get(3)?,
        material_line_id: row.get(4)?,
        reserved_quantity: decimal_at(row, 5)?,
        used_quantity: optional_decimal_at(row, 6)?,
        unit: row.get(7)?,
        status: enum_at(row, 8, ReservationStatus::from_str)?,
        created_at: datetime_at(row, 9)?,
        updated_at: datetime_at(row, 10)?,
    })
}
