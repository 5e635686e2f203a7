use crate::models::PendingSku;
use bigdecimal::BigDecimal;
use std::io::Write;

/// 将 Option<BigDecimal> 转换为 CSV 字符串
fn option_to_csv(val: &Option<BigDecimal>) -> String {
    val.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// 导出待审核 SKU 队列到 CSV (含表头)
pub fn write_pending_csv<W: Write>(rows: &[PendingSku], output: W) -> Result<W, crate::Error> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "sku_key",
        "description",
        "product_code",
        "unit_code",
        "ai_category",
        "ai_subcategory",
        "ai_sub_subcategory",
        "ai_standardized_unit",
        "ai_conversion_factor",
        "frequency",
        "total_quantity",
        "avg_confidence",
        "needs_review",
        "existing_review_status",
    ])?;

    for row in rows {
        let category = row.suggested_category.as_ref();
        writer.write_record(&[
            row.sku_key.clone(),
            row.description.clone(),
            row.product_code.clone(),
            row.unit_code.clone().unwrap_or_default(),
            category.map(|c| c.category.clone()).unwrap_or_default(),
            category.map(|c| c.subcategory.clone()).unwrap_or_default(),
            category.map(|c| c.sub_subcategory.clone()).unwrap_or_default(),
            row.suggested_unit.clone().unwrap_or_default(),
            option_to_csv(&row.suggested_conversion_factor),
            row.frequency.to_string(),
            row.total_quantity.to_string(),
            row.avg_confidence.map(|c| format!("{:.2}", c)).unwrap_or_default(),
            row.needs_review.to_string(),
            row.existing_review_status
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| crate::Error::Io(e.into_error()))
}
