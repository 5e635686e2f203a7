use crate::models::{ApprovedSku, InvoiceLine};
use crate::service::units;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 三级分类路径 (category → subcategory → sub-subcategory)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryPath {
    pub category: String,
    pub subcategory: String,
    pub sub_subcategory: String,
}

impl CategoryPath {
    pub fn new(
        category: impl Into<String>,
        subcategory: impl Into<String>,
        sub_subcategory: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
            sub_subcategory: sub_subcategory.into(),
        }
    }

    /// 三列全部非空才构成路径
    pub fn from_columns(
        category: Option<String>,
        subcategory: Option<String>,
        sub_subcategory: Option<String>,
    ) -> Option<Self> {
        match (category, subcategory, sub_subcategory) {
            (Some(c), Some(s), Some(ss)) => Some(Self::new(c, s, ss)),
            _ => None,
        }
    }
}

impl fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} -> {}", self.category, self.subcategory, self.sub_subcategory)
    }
}

/// 审批状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
        }
    }
}

/// 分类来源：置信度只对 AI 结果有意义
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationSource {
    Ai { confidence: f64 },
    Approved,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::Ai { .. } => "ai",
            ClassificationSource::Approved => "approved",
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            ClassificationSource::Ai { confidence } => Some(*confidence),
            ClassificationSource::Approved => None,
        }
    }

    /// 从数据库列还原
    pub fn from_columns(source: &str, confidence: Option<f64>) -> Result<Self, String> {
        match source {
            "ai" => Ok(ClassificationSource::Ai {
                confidence: confidence.unwrap_or(0.0),
            }),
            "approved" => Ok(ClassificationSource::Approved),
            other => Err(format!("unknown classification source '{}'", other)),
        }
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            other => Err(format!("unknown approval status '{}'", other)),
        }
    }
}

/// 发票明细行 (含分类结果)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub invoice_id: i64,
    pub line_number: i32,
    pub sku_key: String,
    pub product_code: String,
    pub description: String,
    pub unit_code: Option<String>,
    pub quantity: BigDecimal,
    pub category: Option<CategoryPath>,
    pub standardized_unit: Option<String>,
    pub conversion_factor: Option<BigDecimal>,
    pub standardized_quantity: Option<BigDecimal>,
    pub source: ClassificationSource,
    pub needs_review: bool,
    pub classified_at: DateTime<Utc>,
}

impl LineItem {
    /// 未分类的明细行 (待人工分类)
    pub fn unclassified(
        invoice_id: i64,
        line_number: i32,
        sku_key: String,
        line: &InvoiceLine,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            invoice_id,
            line_number,
            sku_key,
            product_code: line.product_code.clone(),
            description: line.description.clone(),
            unit_code: line.unit_code.clone(),
            quantity: line.quantity.clone(),
            category: None,
            standardized_unit: None,
            conversion_factor: None,
            standardized_quantity: None,
            source: ClassificationSource::Ai { confidence: 0.0 },
            needs_review: true,
            classified_at: at,
        }
    }

    /// 审批状态由分类来源决定
    pub fn approval_status(&self) -> ApprovalStatus {
        match self.source {
            ClassificationSource::Approved => ApprovalStatus::Approved,
            ClassificationSource::Ai { .. } => ApprovalStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.approval_status() == ApprovalStatus::Pending
    }

    /// 清空分类字段，回到待人工分类状态
    pub fn clear_classification(&mut self, at: DateTime<Utc>) {
        self.category = None;
        self.standardized_unit = None;
        self.conversion_factor = None;
        self.standardized_quantity = None;
        self.source = ClassificationSource::Ai { confidence: 0.0 };
        self.needs_review = true;
        self.classified_at = at;
    }

    /// 用已审批 SKU 覆盖分类字段
    pub fn apply_approved_sku(&mut self, sku: &ApprovedSku, at: DateTime<Utc>) {
        let factor = sku.conversion.units_per_package.clone();
        self.standardized_quantity =
            units::standardize(&self.quantity, self.unit_code.as_deref(), Some(&factor));
        self.needs_review = self.standardized_quantity.is_none();
        self.category = Some(sku.category.clone());
        self.standardized_unit = Some(sku.standardized_unit.clone());
        self.conversion_factor = Some(factor);
        self.source = ClassificationSource::Approved;
        self.classified_at = at;
    }
}
