// ==========================================
// 物料库存预留系统 - 导入层
// ==========================================
// 职责: 外部入库数据导入（建档 + 追加入库）
// 支持: Excel, CSV
// ==========================================

// 模块声明
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod stock_importer_trait;
pub mod stock_receipt_importer;

// 重导出核心类型
pub use error::{ImportError, ImportResult};
pub use field_mapper::StockReceiptFieldMapper;
pub use file_parser::{CsvParser, ExcelParser, UniversalFileParser};
pub use stock_receipt_importer::StockReceiptImporterImpl;

// 重导出 Trait 接口
pub use stock_importer_trait::{FieldMapper, FileParser, RawRow, StockReceiptImporter};
