// ==========================================
// 物料库存预留系统 - 项目仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: project + project_material_line 两表读写
// ==========================================

use crate::domain::project::{LineSource, Project, ProjectMaterialLine};
use crate::domain::types::{LinePriority, MaterialClass, MaterialLineStatus, ProjectStatus};
use crate::repository::columns::{datetime_at, decimal_at, enum_at};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// ProjectRepository - 项目仓储
// ==========================================
pub struct ProjectRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProjectRepository {
    /// 创建新的ProjectRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建项目（含物料清单，事务写入）
    pub fn insert(&self, project: &Project) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO project (project_id, project_name, status, revision, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                project.project_id,
                project.project_name,
                project.status.to_db_str(),
                project.revision,
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ],
        )?;

        for (seq_no, line) in project.material_lines.iter().enumerate() {
            if line.project_id != project.project_id {
                return Err(RepositoryError::FieldValueError {
                    field: "project_id".to_string(),
                    message: format!(
                        "物料行 {} 归属项目 {}，与 {} 不一致",
                        line.line_id, line.project_id, project.project_id
                    ),
                });
            }

            tx.execute(
                r#"INSERT INTO project_material_line (
                    line_id, project_id, seq_no, material_class, stock_item_id, material_name,
                    requested_quantity, reserved_quantity, used_quantity,
                    unit, unit_price, total_price, status, priority
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
                params![
                    line.line_id,
                    line.project_id,
                    seq_no as i64,
                    line.material_class.to_db_str(),
                    line.source.stock_item_id(),
                    line.material_name,
                    line.requested_quantity.to_string(),
                    line.reserved_quantity.to_string(),
                    line.used_quantity.to_string(),
                    line.unit,
                    line.unit_price.to_string(),
                    line.total_price.to_string(),
                    line.status.to_db_str(),
                    line.priority.to_db_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// 按project_id查询项目（含物料清单）
    pub fn find_by_id(&self, project_id: &str) -> RepositoryResult<Option<Project>> {
        let conn = self.get_conn()?;

        let header = conn.query_row(
            r#"SELECT project_id, project_name, status, revision, created_at, updated_at
               FROM project WHERE project_id = ?1"#,
            params![project_id],
            |row| {
                Ok(Project {
                    project_id: row.get(0)?,
                    project_name: row.get(1)?,
                    status: enum_at(row, 2, ProjectStatus::from_str)?,
                    material_lines: Vec::new(),
                    revision: row.get(3)?,
                    created_at: datetime_at(row, 4)?,
                    updated_at: datetime_at(row, 5)?,
                })
            },
        );

        let mut project = match header {
            Ok(project) => project,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut stmt = conn.prepare(
            r#"SELECT line_id, project_id, material_class, stock_item_id, material_name,
                      requested_quantity, reserved_quantity, used_quantity,
                      unit, unit_price, total_price, status, priority
               FROM project_material_line
               WHERE project_id = ?1
               ORDER BY seq_no"#,
        )?;

        project.material_lines = stmt
            .query_map(params![project_id], map_line_row)?
            .collect::<Result<Vec<ProjectMaterialLine>, _>>()?;

        Ok(Some(project))
    }

    /// 保存项目状态与物料行数量/状态（带乐观锁检查）
    ///
    /// # 并发控制
    /// 使用 revision 字段防止并发覆盖；成功后数据库 revision + 1
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision不匹配
    /// - `RepositoryError::NotFound`: project_id不存在
    pub fn save(&self, project: &Project) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows_affected = tx.execute(
            r#"UPDATE project
               SET status = ?1, revision = revision + 1, updated_at = ?2
               WHERE project_id = ?3 AND revision = ?4"#,
            params![
                project.status.to_db_str(),
                Utc::now().to_rfc3339(),
                project.project_id,
                project.revision,
            ],
        )?;

        if rows_affected == 0 {
            let actual: Result<i32, _> = tx.query_row(
                "SELECT revision FROM project WHERE project_id = ?1",
                params![project.project_id],
                |row| row.get(0),
            );
            return match actual {
                Ok(actual_revision) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "Project".to_string(),
                    id: project.project_id.clone(),
                    expected: project.revision,
                    actual: actual_revision,
                }),
                Err(_) => Err(RepositoryError::NotFound {
                    entity: "Project".to_string(),
                    id: project.project_id.clone(),
                }),
            };
        }

        for line in &project.material_lines {
            tx.execute(
                r#"UPDATE project_material_line
                   SET reserved_quantity = ?1, used_quantity = ?2,
                       unit_price = ?3, total_price = ?4, status = ?5
                   WHERE line_id = ?6 AND project_id = ?7"#,
                params![
                    line.reserved_quantity.to_string(),
                    line.used_quantity.to_string(),
                    line.unit_price.to_string(),
                    line.total_price.to_string(),
                    line.status.to_db_str(),
                    line.line_id,
                    project.project_id,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn map_line_row(row: &Row<'_>) -> rusqlite::Result<ProjectMaterialLine> {
    let source = match row.get::<_, Option<String>>(3)? {
        Some(stock_item_id) => LineSource::StockBacked { stock_item_id },
        None => LineSource::Custom,
    };

    Ok(ProjectMaterialLine {
        line_id: row.get(0)?,
        project_id: row.get(1)?,
        material_class: enum_at(row, 2, MaterialClass::from_str)?,
        source,
        material_name: row.get(4)?,
        requested_quantity: decimal_at(row, 5)?,
        reserved_quantity: decimal_at(row, 6)?,
        used_quantity: decimal_at(row, 7)?,
        unit: row.get(8)?,
        unit_price: decimal_at(row, 9)?,
        total_price: decimal_at(row, 10)?,
        status: enum_at(row, 11, MaterialLineStatus::from_str)?,
        priority: LinePriority::from_str(&row.get::<_, String>(12)?),
    })
}
