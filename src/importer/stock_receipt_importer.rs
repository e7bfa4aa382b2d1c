// ==========================================
// 物料库存预留系统 - 入库导入器实现
// ==========================================
// 职责: 整合入库流程，从文件到库存台账
// 流程: 解析 → 映射 → 新批次建档 / 已有批次追加入库
// 约束: 单行失败只记录到汇总，不中断整批
// ==========================================

use crate::config::ReservationConfigReader;
use crate::config::config_keys;
use crate::domain::receipt::{ImportRowFailure, ImportSummary, StockReceiptRow};
use crate::domain::stock::StockItem;
use crate::engine::catalog::MaterialCatalog;
use crate::engine::error::EngineError;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::StockReceiptFieldMapper;
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::stock_importer_trait::{
    FieldMapper, FileParser, RawRow, StockReceiptImporter,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// 单行处理结果
enum RowOutcome {
    Registered,
    Received,
}

// ==========================================
// StockReceiptImporterImpl - 入库导入器实现
// ==========================================
pub struct StockReceiptImporterImpl<C>
where
    C: ReservationConfigReader,
{
    // 物料目录（建档/入库）
    catalog: Arc<MaterialCatalog>,

    // 配置读取器
    config: Arc<C>,

    // 导入组件
    file_parser: Box<dyn FileParser>,
    field_mapper: Box<dyn FieldMapper>,
}

impl<C> StockReceiptImporterImpl<C>
where
    C: ReservationConfigReader,
{
    /// 使用默认组件创建导入器
    pub fn new(catalog: Arc<MaterialCatalog>, config: Arc<C>) -> Self {
        Self::with_components(
            catalog,
            config,
            Box::new(UniversalFileParser),
            Box::new(StockReceiptFieldMapper),
        )
    }

    /// 使用自定义组件创建导入器
    pub fn with_components(
        catalog: Arc<MaterialCatalog>,
        config: Arc<C>,
        file_parser: Box<dyn FileParser>,
        field_mapper: Box<dyn FieldMapper>,
    ) -> Self {
        Self {
            catalog,
            config,
            file_parser,
            field_mapper,
        }
    }

    /// 处理单行: 批次存在则追加入库，否则建档
    async fn apply_row(&self, row: &StockReceiptRow, default_currency: &str) -> ImportResult<RowOutcome> {
        let failed = |source: EngineError| ImportError::ReceiptFailed {
            row: row.row_number,
            source,
        };

        match self.catalog.resolve(row.material_class, &row.stock_item_id) {
            Ok(ledger) => {
                let current = ledger.snapshot().map_err(failed)?;
                if let Some(unit) = &row.unit {
                    if !unit.eq_ignore_ascii_case(&current.unit) {
                        return Err(ImportError::ValidationError {
                            row: row.row_number,
                            message: format!(
                                "单位不一致: 批次 {} 为 {}，文件为 {}",
                                row.stock_item_id, current.unit, unit
                            ),
                        });
                    }
                }
                ledger.receive(row.quantity).await.map_err(failed)?;
                Ok(RowOutcome::Received)
            }
            Err(EngineError::StockItemNotFound { .. }) => {
                let unit = row.unit.clone().ok_or_else(|| ImportError::MissingField {
                    row: row.row_number,
                    field: "unit".to_string(),
                })?;
                let item = StockItem::new(
                    row.stock_item_id.clone(),
                    row.material_class,
                    unit,
                    row.unit_price.unwrap_or(Decimal::ZERO),
                    row.currency
                        .clone()
                        .unwrap_or_else(|| default_currency.to_string()),
                    row.quantity,
                );
                self.catalog.register(&item).map_err(failed)?;
                Ok(RowOutcome::Registered)
            }
            Err(e) => Err(failed(e)),
        }
    }
}

#[async_trait]
impl<C> StockReceiptImporter for StockReceiptImporterImpl<C>
where
    C: ReservationConfigReader,
{
    #[instrument(skip(self), fields(file = %file_path.display()))]
    async fn import_file(&self, file_path: &Path) -> ImportResult<ImportSummary> {
        let rows = self.file_parser.parse_to_raw_rows(file_path)?;
        info!(rows = rows.len(), "入库文件解析完成");
        self.import_rows(rows).await
    }

    async fn import_rows(&self, rows: Vec<RawRow>) -> ImportResult<ImportSummary> {
        let start = Instant::now();
        let default_currency = self
            .config
            .get_default_currency()
            .await
            .map_err(|e| ImportError::ConfigReadError {
                key: config_keys::DEFAULT_CURRENCY.to_string(),
                message: e.to_string(),
            })?;

        let mut summary = ImportSummary {
            batch_id: Uuid::new_v4().to_string(),
            total_rows: rows.len(),
            ..Default::default()
        };

        for (idx, raw) in rows.iter().enumerate() {
            // 表头为第 1 行
            let row_number = idx + 2;

            let result = match self.field_mapper.map_receipt_row(raw, row_number) {
                Ok(mapped) => self
                    .apply_row(&mapped, &default_currency)
                    .await
                    .map_err(|e| (Some(mapped.stock_item_id.clone()), e)),
                Err(e) => Err((None, e)),
            };

            match result {
                Ok(RowOutcome::Registered) => summary.registered += 1,
                Ok(RowOutcome::Received) => summary.received += 1,
                Err((stock_item_id, e)) => {
                    debug!(row = row_number, error = %e, "入库行失败");
                    summary.failures.push(ImportRowFailure {
                        row_number,
                        stock_item_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        summary.elapsed_ms = start.elapsed().as_millis() as i64;

        if summary.has_failures() {
            warn!(
                batch_id = %summary.batch_id,
                total = summary.total_rows,
                failed = summary.failures.len(),
                "入库导入完成（存在失败行）"
            );
        } else {
            info!(
                batch_id = %summary.batch_id,
                registered = summary.registered,
                received = summary.received,
                elapsed_ms = summary.elapsed_ms,
                "入库导入完成"
            );
        }

        Ok(summary)
    }
}
