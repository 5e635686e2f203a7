//! 人工审批流程
//!
//! 审核端拿到按 SKU 键去重的待审核队列，逐键提交分类。每条提交独立校验、
//! 独立落库：不合法的提交被拒绝并注明违反的规则，同批其余提交照常生效。

use crate::db::{write_pending_csv, ClassificationStore};
use crate::error::{InvalidClassificationError, Result};
use crate::models::{
    ApprovalReport, ApprovalSubmission, CommittedApproval, ConversionParams, PendingSku,
    RejectedApproval, ReviewStatus, SkuApproval,
};
use crate::service::{CacheWriteError, ClassificationCache};
use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use std::sync::Arc;
use std::time::Instant;

/// 未填写审批人时的默认值
pub const DEFAULT_APPROVER: &str = "reviewer";

/// 同批提交并发落库的键数
const SUBMIT_CONCURRENCY: usize = 8;

pub struct ApprovalService {
    store: Arc<dyn ClassificationStore>,
    cache: Arc<ClassificationCache>,
    min_frequency: i64,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn ClassificationStore>,
        cache: Arc<ClassificationCache>,
        min_frequency: i64,
    ) -> Self {
        Self {
            store,
            cache,
            min_frequency,
        }
    }

    /// 待审核队列 (每个 SKU 键一行，频次降序)
    pub async fn pending(&self, min_frequency: Option<i64>) -> Result<Vec<PendingSku>> {
        let min_frequency = min_frequency.unwrap_or(self.min_frequency).max(1);
        Ok(self.store.pending_summaries(min_frequency).await?)
    }

    /// 待审核队列导出为 CSV
    pub async fn pending_csv(&self, min_frequency: Option<i64>) -> Result<Vec<u8>> {
        let rows = self.pending(min_frequency).await?;
        tracing::info!("导出待审核 SKU {} 个", rows.len());
        write_pending_csv(&rows, Vec::new())
    }

    /// 批量提交审批
    ///
    /// 批内重复的键只接受第一次合法出现。每个键的缓存写入与明细回填在同一事务内完成。
    pub async fn submit(&self, submissions: Vec<ApprovalSubmission>) -> ApprovalReport {
        let start = Instant::now();
        let total = submissions.len();
        let mut report = ApprovalReport::default();

        // 先校验，再在合法提交里去重：无效的第一次提交不占用这个键
        let mut seen: IndexSet<String> = IndexSet::with_capacity(total);
        let mut accepted = Vec::with_capacity(total);
        for submission in submissions {
            let approval = to_approval(submission);
            if let Err(e) = self.cache.validate(&approval) {
                report.rejected.push(rejected_invalid(e));
                continue;
            }
            if !seen.insert(approval.sku_key.clone()) {
                report.rejected.push(RejectedApproval {
                    sku_key: approval.sku_key,
                    field: "sku_key".to_string(),
                    rule: "duplicate_in_batch".to_string(),
                    reason: "key already submitted earlier in this batch".to_string(),
                });
                continue;
            }
            accepted.push(approval);
        }

        let results: Vec<(SkuApproval, std::result::Result<u64, CacheWriteError>)> =
            stream::iter(accepted)
                .map(|approval| async move {
                    let result = self.commit(&approval).await;
                    (approval, result)
                })
                .buffered(SUBMIT_CONCURRENCY)
                .collect()
                .await;

        for (approval, result) in results {
            match result {
                Ok(items_updated) => report.committed.push(CommittedApproval {
                    sku_key: approval.sku_key,
                    review_status: approval.review_status,
                    items_updated,
                }),
                Err(CacheWriteError::Invalid(e)) => report.rejected.push(rejected_invalid(e)),
                Err(CacheWriteError::Store(e)) => {
                    tracing::error!(sku_key = %approval.sku_key, "审批落库失败，未做任何修改: {}", e);
                    report.rejected.push(RejectedApproval {
                        sku_key: approval.sku_key,
                        field: "storage".to_string(),
                        rule: "store_error".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let items_updated: u64 = report.committed.iter().map(|c| c.items_updated).sum();
        tracing::info!(
            "审批批次完成: {} 提交, {} 生效, {} 拒绝, 回填明细 {} 条, 耗时 {:?}",
            total,
            report.committed.len(),
            report.rejected.len(),
            items_updated,
            start.elapsed()
        );
        report
    }

    /// 已审批的分类回填明细；needs_review / deprecated 只改缓存行的审核字段
    async fn commit(&self, approval: &SkuApproval) -> std::result::Result<u64, CacheWriteError> {
        if approval.review_status == ReviewStatus::Approved {
            let applied = self.cache.approve_and_propagate(approval).await?;
            Ok(applied.items_updated)
        } else {
            self.cache.upsert(approval).await?;
            Ok(0)
        }
    }
}

fn rejected_invalid(e: InvalidClassificationError) -> RejectedApproval {
    tracing::info!("审批被拒绝: {}", e);
    RejectedApproval {
        field: e.violation.field().to_string(),
        rule: e.violation.code().to_string(),
        reason: e.violation.to_string(),
        sku_key: e.sku_key,
    }
}

fn to_approval(submission: ApprovalSubmission) -> SkuApproval {
    let category = submission.category_path();
    let approved_by = submission
        .approved_by
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_APPROVER.to_string());
    let conversion_notes = submission
        .conversion_notes
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    SkuApproval {
        sku_key: submission.sku_key.trim().to_string(),
        category,
        standardized_unit: submission.standardized_unit.trim().to_string(),
        conversion: ConversionParams {
            units_per_package: submission.units_per_package,
            package_kind: submission.package_kind,
            conversion_notes,
        },
        review_status: submission.review_status.unwrap_or(ReviewStatus::Approved),
        approved_by,
    }
}
