use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// XML 解析后的标准发票记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub uuid: String,
    pub issuer_rfc: String,
    pub issuer_name: Option<String>,
    pub issue_date: DateTime<Utc>,
    pub items: Vec<InvoiceLine>,
}

/// 发票明细 (有序)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub product_code: String,
    pub description: String,
    pub quantity: BigDecimal,
    pub unit_code: Option<String>,
}

/// 入库统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub invoice_id: i64,
    pub uuid: String,
    pub total_items: usize,
    pub from_cache: usize,
    pub from_ai: usize,
    pub unclassified: usize,
}
