// ==========================================
// 物料库存预留系统 - 预留业务API
// ==========================================
// 职责: 面向调用方的薄封装
// - 入参校验（非空 ID、正数数量、物料类别）
// - 引擎/导入错误统一转换为 ApiError
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::domain::project::{Project, ProjectMaterialLine};
use crate::domain::receipt::ImportSummary;
use crate::domain::reservation::{
    CompletionOutcome, ConsistencyReport, Reservation, ReservationOutcome, StockConflict,
    ValidatedLine,
};
use crate::domain::stock::StockItem;
use crate::domain::types::MaterialClass;
use crate::engine::ReservationEngine;
use crate::importer::StockReceiptImporter;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 预留业务API
pub struct ReservationApi {
    engine: Arc<ReservationEngine<ConfigManager>>,
    importer: Arc<dyn StockReceiptImporter>,
}

impl ReservationApi {
    /// 创建新的ReservationApi实例
    pub fn new(
        engine: Arc<ReservationEngine<ConfigManager>>,
        importer: Arc<dyn StockReceiptImporter>,
    ) -> Self {
        Self { engine, importer }
    }

    // ==========================================
    // 项目
    // ==========================================

    /// 登记项目
    pub fn create_project(&self, project: &Project) -> ApiResult<()> {
        validate_id("project_id", &project.project_id)?;
        if project.project_name.trim().is_empty() {
            return Err(ApiError::InvalidInput("项目名称不能为空".to_string()));
        }
        for line in &project.material_lines {
            validate_id("line_id", &line.line_id)?;
            validate_positive("requested_quantity", line.requested_quantity)?;
            if line.source.is_custom() && line.material_name.is_none() {
                return Err(ApiError::InvalidInput(format!(
                    "自定义物料行 {} 必须填写物料名称",
                    line.line_id
                )));
            }
        }

        self.engine.create_project(project)?;
        Ok(())
    }

    /// 查询项目
    pub fn get_project(&self, project_id: &str) -> ApiResult<Project> {
        validate_id("project_id", project_id)?;
        Ok(self.engine.project(project_id)?)
    }

    /// 查询项目的预留记录
    pub fn list_reservations(&self, project_id: &str) -> ApiResult<Vec<Reservation>> {
        validate_id("project_id", project_id)?;
        Ok(self.engine.reservations_for_project(project_id)?)
    }

    // ==========================================
    // 预留流程
    // ==========================================

    /// 物料行库存预览（无副作用）
    pub fn evaluate(&self, lines: &[ProjectMaterialLine]) -> ApiResult<Vec<ValidatedLine>> {
        if lines.is_empty() {
            return Err(ApiError::InvalidInput("物料行不能为空".to_string()));
        }
        for line in lines {
            validate_positive("requested_quantity", line.requested_quantity)?;
        }
        Ok(self.engine.evaluate(lines)?)
    }

    /// 按已保存的物料清单预览项目
    pub fn evaluate_project(&self, project_id: &str) -> ApiResult<Vec<ValidatedLine>> {
        let project = self.get_project(project_id)?;
        Ok(self.engine.evaluate(&project.material_lines)?)
    }

    /// 批量预留（调用方已持有校验结果）
    pub async fn reserve_all(
        &self,
        project_id: &str,
        validated_lines: &[ValidatedLine],
    ) -> ApiResult<ReservationOutcome> {
        validate_id("project_id", project_id)?;
        Ok(self.engine.reserve_all(project_id, validated_lines).await?)
    }

    /// 校验并预留项目全部物料
    pub async fn reserve_project(&self, project_id: &str) -> ApiResult<ReservationOutcome> {
        let validated = self.evaluate_project(project_id)?;
        self.engine
            .reserve_all(project_id, &validated)
            .await
            .map_err(|e| {
                warn!(project_id = %project_id, error = %e, "项目预留被拒绝");
                ApiError::from(e)
            })
    }

    /// 预留前冲突检测
    pub fn check_conflicts(&self, project_id: &str) -> ApiResult<Vec<StockConflict>> {
        validate_id("project_id", project_id)?;
        Ok(self.engine.check_conflicts(project_id)?)
    }

    /// 项目开工
    pub async fn activate_project(&self, project_id: &str) -> ApiResult<Vec<String>> {
        validate_id("project_id", project_id)?;
        Ok(self.engine.activate(project_id).await?)
    }

    /// 登记实际用量
    pub async fn record_usage(&self, reservation_id: &str, used: Decimal) -> ApiResult<Reservation> {
        validate_id("reservation_id", reservation_id)?;
        if used < Decimal::ZERO {
            return Err(ApiError::InvalidInput(format!("用量不能为负: {}", used)));
        }
        Ok(self.engine.record_usage(reservation_id, used).await?)
    }

    /// 项目完工
    pub async fn complete_project(&self, project_id: &str) -> ApiResult<CompletionOutcome> {
        validate_id("project_id", project_id)?;
        Ok(self.engine.complete(project_id).await?)
    }

    /// 取消单条预留
    pub async fn cancel_reservation(&self, reservation_id: &str) -> ApiResult<Reservation> {
        validate_id("reservation_id", reservation_id)?;
        Ok(self.engine.cancel_reservation(reservation_id).await?)
    }

    /// 取消项目
    pub async fn cancel_project(&self, project_id: &str) -> ApiResult<Vec<String>> {
        validate_id("project_id", project_id)?;
        Ok(self.engine.cancel_project(project_id).await?)
    }

    // ==========================================
    // 库存批次
    // ==========================================

    /// 查询批次
    pub fn get_stock_item(&self, material_class: &str, stock_item_id: &str) -> ApiResult<StockItem> {
        validate_id("stock_item_id", stock_item_id)?;
        let ledger = self
            .engine
            .catalog()
            .resolve_by_name(material_class, stock_item_id)?;
        Ok(ledger.snapshot()?)
    }

    /// 新批次建档
    pub fn register_stock_item(&self, item: &StockItem) -> ApiResult<StockItem> {
        validate_id("stock_item_id", &item.stock_item_id)?;
        if item.unit.trim().is_empty() {
            return Err(ApiError::InvalidInput("计量单位不能为空".to_string()));
        }
        let ledger = self.engine.catalog().register(item)?;
        Ok(ledger.snapshot()?)
    }

    /// 已有批次入库
    pub async fn receive_stock(
        &self,
        material_class: &str,
        stock_item_id: &str,
        quantity: Decimal,
    ) -> ApiResult<StockItem> {
        validate_id("stock_item_id", stock_item_id)?;
        validate_positive("quantity", quantity)?;
        let class = self.resolve_class(material_class)?;
        Ok(self
            .engine
            .receive_stock(class, stock_item_id, quantity)
            .await?)
    }

    /// 软停用批次
    pub async fn deactivate_stock_item(
        &self,
        material_class: &str,
        stock_item_id: &str,
    ) -> ApiResult<StockItem> {
        validate_id("stock_item_id", stock_item_id)?;
        let class = self.resolve_class(material_class)?;
        Ok(self
            .engine
            .deactivate_stock_item(class, stock_item_id)
            .await?)
    }

    /// 从文件导入入库数据
    pub async fn import_stock_file(&self, file_path: &str) -> ApiResult<ImportSummary> {
        if file_path.trim().is_empty() {
            return Err(ApiError::InvalidInput("文件路径不能为空".to_string()));
        }
        let summary = self.importer.import_file(Path::new(file_path)).await?;
        info!(
            batch_id = %summary.batch_id,
            registered = summary.registered,
            received = summary.received,
            failed = summary.failures.len(),
            "入库文件导入完成"
        );
        Ok(summary)
    }

    // ==========================================
    // 一致性核对
    // ==========================================

    /// 核对库存账实一致性
    ///
    /// 指定批次时只核对该批次，否则核对全部批次
    pub fn audit(&self, target: Option<(&str, &str)>) -> ApiResult<Vec<ConsistencyReport>> {
        match target {
            Some((material_class, stock_item_id)) => {
                validate_id("stock_item_id", stock_item_id)?;
                let class = self.resolve_class(material_class)?;
                Ok(vec![self.engine.audit_stock_item(class, stock_item_id)?])
            }
            None => Ok(self.engine.audit_all()?),
        }
    }

    fn resolve_class(&self, material_class: &str) -> ApiResult<MaterialClass> {
        Ok(self.engine.catalog().resolve_class(material_class)?)
    }
}

// ==========================================
// 入参校验
// ==========================================

fn validate_id(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{}不能为空", field)));
    }
    Ok(())
}

fn validate_positive(field: &str, value: Decimal) -> ApiResult<()> {
    if value <= Decimal::ZERO {
        return Err(ApiError::InvalidInput(format!(
            "{}必须大于 0，实际 {}",
            field, value
        )));
    }
    Ok(())
}
