// ==========================================
// 物料库存预留系统 - 列值解析工具
// ==========================================
// 红线: 数量字段只在仓储边界解析一次，引擎层只见 Decimal
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use rust_decimal::Decimal;
use std::str::FromStr;

fn conversion_failure(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// 读取十进制数量列（TEXT）
pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(raw.trim())
        .map_err(|e| conversion_failure(idx, format!("非法数量 '{}': {}", raw, e)))
}

/// 读取可空十进制数量列
pub(crate) fn optional_decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Decimal::from_str(raw.trim())
            .map(Some)
            .map_err(|e| conversion_failure(idx, format!("非法数量 '{}': {}", raw, e))),
        None => Ok(None),
    }
}

/// 读取 RFC3339 时间列（解析失败回落为当前时间）
pub(crate) fn datetime_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)?
        .parse::<DateTime<Utc>>()
        .unwrap_or_else(|_| Utc::now()))
}

/// 读取枚举列
pub(crate) fn enum_at<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_failure(idx, format!("未知枚举值 '{}'", raw)))
}
