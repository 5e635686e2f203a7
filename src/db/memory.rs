use crate::db::store::{AppliedApproval, ClassificationStore};
use crate::error::StoreError;
use crate::models::{
    ApprovedSku, InvoiceRecord, LineItem, PendingSku, ReviewStatus, SkuApproval,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// 内存存储 (测试与单机模式)
///
/// 明细按 SKU 键分组保存在同一个 map 条目里，回填时在一把分片锁下
/// 整组更新。加锁顺序固定为 invoices → items → skus。
#[derive(Debug)]
pub struct MemoryStore {
    skus: DashMap<String, ApprovedSku>,
    items: DashMap<String, Vec<LineItem>>,
    invoices: DashMap<String, i64>,
    next_invoice_id: AtomicI64,
    next_item_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            skus: DashMap::new(),
            items: DashMap::new(),
            invoices: DashMap::new(),
            next_invoice_id: AtomicI64::new(1),
            next_item_id: AtomicI64::new(1),
        }
    }

    fn put_sku(&self, approval: &SkuApproval, at: DateTime<Utc>) -> ApprovedSku {
        match self.skus.entry(approval.sku_key.clone()) {
            Entry::Occupied(mut e) => {
                let sku = approval.to_sku(Some(e.get()), at);
                e.insert(sku.clone());
                sku
            }
            Entry::Vacant(e) => {
                let sku = approval.to_sku(None, at);
                e.insert(sku.clone());
                sku
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 汇总同一 SKU 键下的 pending 明细；没有 pending 行时返回 None
fn summarize_pending(sku_key: &str, items: &[LineItem]) -> Option<PendingSku> {
    let pending: Vec<&LineItem> = items.iter().filter(|i| i.is_pending()).collect();
    let first = pending.iter().min_by_key(|i| i.id)?;

    let total_quantity = pending
        .iter()
        .fold(BigDecimal::zero(), |acc, i| acc + &i.quantity);
    let confidences: Vec<f64> = pending.iter().filter_map(|i| i.source.confidence()).collect();
    let avg_confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    Some(PendingSku {
        sku_key: sku_key.to_string(),
        description: first.description.clone(),
        product_code: first.product_code.clone(),
        unit_code: first.unit_code.clone(),
        suggested_category: first.category.clone(),
        suggested_unit: first.standardized_unit.clone(),
        suggested_conversion_factor: first.conversion_factor.clone(),
        frequency: pending.len() as i64,
        total_quantity,
        avg_confidence,
        needs_review: pending.iter().any(|i| i.needs_review),
        existing_review_status: None,
    })
}

#[async_trait]
impl ClassificationStore for MemoryStore {
    async fn find_sku(&self, sku_key: &str) -> Result<Option<ApprovedSku>, StoreError> {
        Ok(self.skus.get(sku_key).map(|s| s.value().clone()))
    }

    async fn upsert_sku(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<ApprovedSku, StoreError> {
        Ok(self.put_sku(approval, at))
    }

    async fn record_sku_usage(&self, sku_key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut sku) = self.skus.get_mut(sku_key) {
            sku.usage_count += 1;
            sku.last_used = Some(at);
        }
        Ok(())
    }

    async fn apply_approval(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<AppliedApproval, StoreError> {
        // 先拿明细组的写锁，整组回填期间读者看不到中间状态
        let group = self.items.get_mut(&approval.sku_key);
        let sku = self.put_sku(approval, at);

        let mut items_updated = 0u64;
        if approval.review_status == ReviewStatus::Approved {
            if let Some(mut group) = group {
                for item in group.iter_mut() {
                    item.apply_approved_sku(&sku, at);
                    items_updated += 1;
                }
            }
        }

        Ok(AppliedApproval { sku, items_updated })
    }

    async fn invoice_exists(&self, uuid: &str) -> Result<bool, StoreError> {
        Ok(self.invoices.contains_key(uuid))
    }

    async fn insert_invoice(
        &self,
        invoice: &InvoiceRecord,
        items: &[LineItem],
    ) -> Result<i64, StoreError> {
        // 持有发票条目锁直到明细全部写入，并发的同 uuid 请求只会看到完整结果
        match self.invoices.entry(invoice.uuid.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateInvoice(invoice.uuid.clone())),
            Entry::Vacant(e) => {
                let invoice_id = self.next_invoice_id.fetch_add(1, Ordering::SeqCst);
                for item in items {
                    let mut stored = item.clone();
                    stored.id = self.next_item_id.fetch_add(1, Ordering::SeqCst);
                    stored.invoice_id = invoice_id;
                    self.items
                        .entry(item.sku_key.clone())
                        .or_default()
                        .push(stored);
                }
                e.insert(invoice_id);
                Ok(invoice_id)
            }
        }
    }

    async fn update_pending_classification(&self, item: &LineItem) -> Result<bool, StoreError> {
        let mut group = self
            .items
            .get_mut(&item.sku_key)
            .ok_or(StoreError::LineItemNotFound(item.id))?;
        let stored = group
            .iter_mut()
            .find(|i| i.id == item.id)
            .ok_or(StoreError::LineItemNotFound(item.id))?;

        if !stored.is_pending() {
            return Ok(false);
        }
        *stored = item.clone();
        Ok(true)
    }

    async fn list_pending_items(&self, limit: i64) -> Result<Vec<LineItem>, StoreError> {
        let mut pending: Vec<LineItem> = self
            .items
            .iter()
            .flat_map(|group| {
                group
                    .value()
                    .iter()
                    .filter(|i| i.is_pending())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        pending.sort_by_key(|i| i.id);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn list_items_by_key(&self, sku_key: &str) -> Result<Vec<LineItem>, StoreError> {
        Ok(self
            .items
            .get(sku_key)
            .map(|group| group.value().clone())
            .unwrap_or_default())
    }

    async fn pending_summaries(&self, min_frequency: i64) -> Result<Vec<PendingSku>, StoreError> {
        let mut summaries: Vec<PendingSku> = self
            .items
            .iter()
            .filter_map(|group| summarize_pending(group.key(), group.value()))
            .filter(|s| s.frequency >= min_frequency)
            .collect();

        // 分组遍历结束后再查缓存行
        for summary in summaries.iter_mut() {
            summary.existing_review_status =
                self.skus.get(&summary.sku_key).map(|s| s.review_status);
        }

        summaries.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| a.sku_key.cmp(&b.sku_key))
        });
        Ok(summaries)
    }
}
