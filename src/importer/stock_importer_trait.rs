// ==========================================
// 物料库存预留系统 - 入库导入 Trait
// ==========================================
// 职责: 定义入库导入接口（不包含实现）
// 管道: 文件解析 → 字段映射/数值解析 → 建档或追加入库
// ==========================================

use crate::domain::receipt::{ImportSummary, StockReceiptRow};
use crate::importer::error::ImportResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// 原始行记录（列名 → 单元格文本）
pub type RawRow = HashMap<String, String>;

// ==========================================
// StockReceiptImporter Trait
// ==========================================
// 用途: 入库导入主接口
// 实现者: StockReceiptImporterImpl
#[async_trait]
pub trait StockReceiptImporter: Send + Sync {
    /// 从文件导入（按扩展名选择 CSV / Excel）
    ///
    /// # 返回
    /// - Ok(ImportSummary): 行级失败记录在汇总中，不中断整批
    /// - Err: 文件级错误（不存在、格式不支持、解析失败）
    async fn import_file(&self, file_path: &Path) -> ImportResult<ImportSummary>;

    /// 导入已解析的原始行
    async fn import_rows(&self, rows: Vec<RawRow>) -> ImportResult<ImportSummary>;
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 文件解析接口
// 实现者: CsvParser, ExcelParser, UniversalFileParser
pub trait FileParser: Send + Sync {
    /// 解析文件为原始行记录（跳过完全空白的行）
    fn parse_to_raw_rows(&self, file_path: &Path) -> ImportResult<Vec<RawRow>>;
}

// ==========================================
// FieldMapper Trait
// ==========================================
// 用途: 字段映射接口（数值只在此处解析一次）
// 实现者: StockReceiptFieldMapper
pub trait FieldMapper: Send + Sync {
    /// 将原始行记录映射为入库行
    ///
    /// # 参数
    /// - row: 原始行记录
    /// - row_number: 文件行号（用于失败明细）
    fn map_receipt_row(&self, row: &RawRow, row_number: usize) -> ImportResult<StockReceiptRow>;
}
