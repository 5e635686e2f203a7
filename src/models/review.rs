use crate::models::{CategoryPath, PackageKind, ReviewStatus};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 待审核 SKU 汇总 (按 sku_key 分组)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSku {
    pub sku_key: String,
    pub description: String,
    pub product_code: String,
    pub unit_code: Option<String>,
    pub suggested_category: Option<CategoryPath>,
    pub suggested_unit: Option<String>,
    pub suggested_conversion_factor: Option<BigDecimal>,
    pub frequency: i64,
    pub total_quantity: BigDecimal,
    pub avg_confidence: Option<f64>,
    pub needs_review: bool,
    /// 已有缓存行时的审核状态 (needs_review / deprecated 仍需人工处理)
    pub existing_review_status: Option<ReviewStatus>,
}

/// 审核端提交的一条审批
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSubmission {
    pub sku_key: String,
    pub category: String,
    pub subcategory: String,
    pub sub_subcategory: String,
    pub standardized_unit: String,
    pub units_per_package: BigDecimal,
    pub package_kind: PackageKind,
    #[serde(default)]
    pub conversion_notes: Option<String>,
    #[serde(default)]
    pub review_status: Option<ReviewStatus>,
    #[serde(default)]
    pub approved_by: Option<String>,
}

impl ApprovalSubmission {
    pub fn category_path(&self) -> CategoryPath {
        CategoryPath::new(
            self.category.trim(),
            self.subcategory.trim(),
            self.sub_subcategory.trim(),
        )
    }
}

/// 已提交的审批
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedApproval {
    pub sku_key: String,
    pub review_status: ReviewStatus,
    pub items_updated: u64,
}

/// 被拒绝的审批 (附违反的规则)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedApproval {
    pub sku_key: String,
    pub field: String,
    pub rule: String,
    pub reason: String,
}

/// 批量审批结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalReport {
    pub committed: Vec<CommittedApproval>,
    pub rejected: Vec<RejectedApproval>,
}
