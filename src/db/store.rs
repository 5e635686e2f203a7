use crate::error::StoreError;
use crate::models::{ApprovedSku, InvoiceRecord, LineItem, PendingSku, SkuApproval};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 一次审批落库的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedApproval {
    pub sku: ApprovedSku,
    pub items_updated: u64,
}

/// 持久层接口
///
/// 实现方负责单行写入的原子性，以及 `apply_approval` 在同一个事务里
/// 完成缓存行写入和同键明细的回填 (要么全部更新，要么一条都不更新)。
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// 按 SKU 键查询缓存行
    async fn find_sku(&self, sku_key: &str) -> Result<Option<ApprovedSku>, StoreError>;

    /// 写入/覆盖缓存行 (保留使用统计)
    ///
    /// 已有行遇到非 approved 状态时只更新审核字段，分类字段不变。
    async fn upsert_sku(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<ApprovedSku, StoreError>;

    /// 命中一次：usage_count + 1，刷新 last_used
    async fn record_sku_usage(&self, sku_key: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// 写入缓存行并回填所有同键明细 (单事务)
    async fn apply_approval(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<AppliedApproval, StoreError>;

    /// uuid 是否已登记
    async fn invoice_exists(&self, uuid: &str) -> Result<bool, StoreError>;

    /// 发票和全部明细一起落库 (单事务)，返回发票 ID
    ///
    /// 明细的 `invoice_id` 由存储填写。uuid 重复返回 `StoreError::DuplicateInvoice`；
    /// 任何一步失败都不留下发票行，调用方可以整体重试。
    async fn insert_invoice(
        &self,
        invoice: &InvoiceRecord,
        items: &[LineItem],
    ) -> Result<i64, StoreError>;

    /// 覆盖仍处于 pending 的明细分类；已审批的行不动，返回是否写入
    async fn update_pending_classification(&self, item: &LineItem) -> Result<bool, StoreError>;

    /// 按 ID 升序列出 pending 明细
    async fn list_pending_items(&self, limit: i64) -> Result<Vec<LineItem>, StoreError>;

    /// 列出某 SKU 键下的全部明细
    async fn list_items_by_key(&self, sku_key: &str) -> Result<Vec<LineItem>, StoreError>;

    /// 待审核 SKU 汇总 (频次降序)
    async fn pending_summaries(&self, min_frequency: i64) -> Result<Vec<PendingSku>, StoreError>;
}
