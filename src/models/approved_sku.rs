use crate::models::CategoryPath;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 包装类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    Volume,
    Weight,
    Count,
    Mixed,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Volume => "volume",
            PackageKind::Weight => "weight",
            PackageKind::Count => "count",
            PackageKind::Mixed => "mixed",
        }
    }
}

impl FromStr for PackageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volume" => Ok(PackageKind::Volume),
            "weight" => Ok(PackageKind::Weight),
            "count" => Ok(PackageKind::Count),
            "mixed" => Ok(PackageKind::Mixed),
            other => Err(format!("unknown package kind '{}'", other)),
        }
    }
}

/// 审核状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    NeedsReview,
    Deprecated,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Approved => "approved",
            ReviewStatus::NeedsReview => "needs_review",
            ReviewStatus::Deprecated => "deprecated",
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ReviewStatus::Approved),
            "needs_review" => Ok(ReviewStatus::NeedsReview),
            "deprecated" => Ok(ReviewStatus::Deprecated),
            other => Err(format!("unknown review status '{}'", other)),
        }
    }
}

/// 单位换算参数 (人工设定)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionParams {
    pub units_per_package: BigDecimal,
    pub package_kind: PackageKind,
    pub conversion_notes: Option<String>,
}

/// 已审批 SKU (分类缓存行)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedSku {
    pub sku_key: String,
    pub category: CategoryPath,
    pub standardized_unit: String,
    pub conversion: ConversionParams,
    pub review_status: ReviewStatus,
    pub approved_by: String,
    pub approval_date: DateTime<Utc>,
    pub usage_count: i64,
    pub last_used: Option<DateTime<Utc>>,
}

/// 一次审批写入 (校验通过后才会落库)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuApproval {
    pub sku_key: String,
    pub category: CategoryPath,
    pub standardized_unit: String,
    pub conversion: ConversionParams,
    pub review_status: ReviewStatus,
    pub approved_by: String,
}

impl SkuApproval {
    /// 生成新的缓存行；已有行时保留使用统计
    ///
    /// 非 approved 状态只改审核字段：已有行的分类、单位和换算参数保持不变，
    /// 这样已回填的明细始终与缓存行一致。
    pub fn to_sku(&self, previous: Option<&ApprovedSku>, at: DateTime<Utc>) -> ApprovedSku {
        let (category, standardized_unit, conversion) = match previous {
            Some(p) if self.review_status != ReviewStatus::Approved => (
                p.category.clone(),
                p.standardized_unit.clone(),
                p.conversion.clone(),
            ),
            _ => (
                self.category.clone(),
                self.standardized_unit.clone(),
                self.conversion.clone(),
            ),
        };

        ApprovedSku {
            sku_key: self.sku_key.clone(),
            category,
            standardized_unit,
            conversion,
            review_status: self.review_status,
            approved_by: self.approved_by.clone(),
            approval_date: at,
            usage_count: previous.map(|p| p.usage_count).unwrap_or(0),
            last_used: previous.and_then(|p| p.last_used),
        }
    }
}
