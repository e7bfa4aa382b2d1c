// ==========================================
// 物料库存预留系统 - 字段映射器实现
// ==========================================
// 职责: 源字段 → 标准字段映射 + 类型转换
// 约束: 数量/单价在此解析为 Decimal，之后不再做字符串解析
// ==========================================

use crate::domain::receipt::StockReceiptRow;
use crate::domain::types::MaterialClass;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::stock_importer_trait::{FieldMapper, RawRow};
use rust_decimal::Decimal;
use std::str::FromStr;

// 标准字段名
const FIELD_MATERIAL_CLASS: &str = "material_class";
const FIELD_STOCK_ITEM_ID: &str = "stock_item_id";
const FIELD_QUANTITY: &str = "quantity";
const FIELD_UNIT: &str = "unit";
const FIELD_UNIT_PRICE: &str = "unit_price";
const FIELD_CURRENCY: &str = "currency";

pub struct StockReceiptFieldMapper;

impl FieldMapper for StockReceiptFieldMapper {
    fn map_receipt_row(&self, row: &RawRow, row_number: usize) -> ImportResult<StockReceiptRow> {
        let class_text = self.require(row, FIELD_MATERIAL_CLASS, row_number)?;
        let material_class = MaterialClass::from_str(&class_text).ok_or_else(|| {
            ImportError::UnknownMaterialClass {
                row: row_number,
                value: class_text.clone(),
            }
        })?;

        let stock_item_id = self.require(row, FIELD_STOCK_ITEM_ID, row_number)?;

        let quantity = self
            .parse_decimal(row, FIELD_QUANTITY, row_number)?
            .ok_or_else(|| ImportError::MissingField {
                row: row_number,
                field: FIELD_QUANTITY.to_string(),
            })?;
        if quantity <= Decimal::ZERO {
            return Err(ImportError::ValidationError {
                row: row_number,
                message: format!("入库数量必须大于 0，实际 {}", quantity),
            });
        }

        let unit_price = self.parse_decimal(row, FIELD_UNIT_PRICE, row_number)?;
        if matches!(unit_price, Some(p) if p < Decimal::ZERO) {
            return Err(ImportError::ValidationError {
                row: row_number,
                message: "单价不能为负".to_string(),
            });
        }

        Ok(StockReceiptRow {
            row_number,
            material_class,
            stock_item_id,
            quantity,
            unit: self.get_string(row, FIELD_UNIT),
            unit_price,
            currency: self
                .get_string(row, FIELD_CURRENCY)
                .map(|c| c.to_uppercase()),
        })
    }
}

impl StockReceiptFieldMapper {
    /// 提取字符串字段，支持多个可能的列名（别名）
    fn get_string(&self, row: &RawRow, key: &str) -> Option<String> {
        let aliases: &[&str] = match key {
            FIELD_MATERIAL_CLASS => &["material_class", "物料类别", "类别", "class"],
            FIELD_STOCK_ITEM_ID => &["stock_item_id", "批次号", "批次ID", "库存编号", "id"],
            FIELD_QUANTITY => &["quantity", "数量", "入库数量"],
            FIELD_UNIT => &["unit", "单位", "计量单位"],
            FIELD_UNIT_PRICE => &["unit_price", "单价"],
            FIELD_CURRENCY => &["currency", "币种"],
            _ => &[],
        };

        aliases.iter().find_map(|alias| {
            row.get(*alias)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        })
    }

    fn require(&self, row: &RawRow, key: &str, row_number: usize) -> ImportResult<String> {
        self.get_string(row, key)
            .ok_or_else(|| ImportError::MissingField {
                row: row_number,
                field: key.to_string(),
            })
    }

    /// 解析十进制数（允许千分位逗号）
    fn parse_decimal(&self, row: &RawRow, key: &str, row_number: usize) -> ImportResult<Option<Decimal>> {
        match self.get_string(row, key) {
            None => Ok(None),
            Some(value) => {
                let normalized = value.replace(',', "");
                Decimal::from_str(&normalized)
                    .or_else(|_| Decimal::from_scientific(&normalized))
                    .map(Some)
                    .map_err(|_| ImportError::TypeConversionError {
                        row: row_number,
                        field: key.to_string(),
                        message: format!("无法解析为数值: {}", value),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_maps_chinese_headers() {
        let mapped = StockReceiptFieldMapper
            .map_receipt_row(
                &row(&[
                    ("物料类别", "钢材"),
                    ("批次号", "S-001"),
                    ("入库数量", "1,200.5"),
                    ("单位", "kg"),
                    ("单价", "4.2"),
                    ("币种", "cny"),
                ]),
                2,
            )
            .unwrap();
        assert_eq!(mapped.material_class, MaterialClass::Steel);
        assert_eq!(mapped.stock_item_id, "S-001");
        assert_eq!(mapped.quantity, dec!(1200.5));
        assert_eq!(mapped.unit_price, Some(dec!(4.2)));
        assert_eq!(mapped.currency.as_deref(), Some("CNY"));
    }

    #[test]
    fn test_unknown_class_reports_row() {
        let err = StockReceiptFieldMapper
            .map_receipt_row(
                &row(&[("类别", "玻璃"), ("批次号", "G-1"), ("数量", "1")]),
                7,
            )
            .unwrap_err();
        assert!(matches!(err, ImportError::UnknownMaterialClass { row: 7, .. }));
        assert_eq!(err.row(), Some(7));
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        let err = StockReceiptFieldMapper
            .map_receipt_row(&row(&[("material_class", "rope"), ("quantity", "5")]), 3)
            .unwrap_err();
        assert!(matches!(err, ImportError::MissingField { row: 3, .. }));

        let err = StockReceiptFieldMapper
            .map_receipt_row(
                &row(&[("material_class", "rope"), ("stock_item_id", "R1"), ("quantity", "abc")]),
                4,
            )
            .unwrap_err();
        assert!(matches!(err, ImportError::TypeConversionError { row: 4, .. }));

        let err = StockReceiptFieldMapper
            .map_receipt_row(
                &row(&[("material_class", "rope"), ("stock_item_id", "R1"), ("quantity", "0")]),
                5,
            )
            .unwrap_err();
        assert!(matches!(err, ImportError::ValidationError { row: 5, .. }));
    }
}
