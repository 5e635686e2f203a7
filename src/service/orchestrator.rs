use crate::db::ClassificationStore;
use crate::error::{ClassificationServiceError, Result};
use crate::models::{ClassificationSource, IngestReport, InvoiceRecord, LineItem, ReviewStatus};
use crate::service::classifier::{AiSuggestion, Classifier, ClassifyRequest};
use crate::service::{identity, units, ClassificationCache};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// 单条明细的分类来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Cache,
    Ai,
    Unclassified,
}

/// 分类统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationStats {
    pub cache_hits: u64,
    pub ai_successes: u64,
    pub ai_failures: u64,
}

/// 待分类明细重跑结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclassifyReport {
    pub scanned: usize,
    pub from_cache: usize,
    pub from_ai: usize,
    pub still_unclassified: usize,
    /// 重跑期间已被审批覆盖的行
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    ai_successes: AtomicU64,
    ai_failures: AtomicU64,
}

/// 分类编排：缓存优先，未命中再调 AI
///
/// AI 调用受信号量限流并带超时；任何失败都只让当前明细进入待人工分类，
/// 不影响同一张发票的其他明细。
pub struct ClassificationOrchestrator {
    store: Arc<dyn ClassificationStore>,
    cache: Arc<ClassificationCache>,
    classifier: Arc<dyn Classifier>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    call_timeout: Duration,
    counters: Counters,
}

impl ClassificationOrchestrator {
    pub fn new(
        store: Arc<dyn ClassificationStore>,
        cache: Arc<ClassificationCache>,
        classifier: Arc<dyn Classifier>,
        max_concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            store,
            cache,
            classifier,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            call_timeout,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> ClassificationStats {
        ClassificationStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            ai_successes: self.counters.ai_successes.load(Ordering::Relaxed),
            ai_failures: self.counters.ai_failures.load(Ordering::Relaxed),
        }
    }

    /// 分类全部明细后，发票和明细一起落库
    ///
    /// uuid 重复时直接返回 `DuplicateInvoice`，不会分类任何明细。落库失败时
    /// 不留下发票行，同一张发票可以整体重试。
    pub async fn ingest_invoice(&self, invoice: &InvoiceRecord) -> Result<IngestReport> {
        let start = Instant::now();
        if self.store.invoice_exists(&invoice.uuid).await? {
            return Err(crate::Error::DuplicateInvoice(invoice.uuid.clone()));
        }

        let keys: Vec<String> = invoice
            .items
            .par_iter()
            .map(|line| {
                identity::derive_sku_key(
                    &line.product_code,
                    &line.description,
                    line.unit_code.as_deref(),
                )
            })
            .collect();

        let now = Utc::now();
        let items: Vec<LineItem> = invoice
            .items
            .iter()
            .zip(keys)
            .enumerate()
            .map(|(idx, (line, key))| LineItem::unclassified(0, idx as i32 + 1, key, line, now))
            .collect();

        // 并发分类，结果保持行号顺序
        let (items, outcomes): (Vec<LineItem>, Vec<Outcome>) = stream::iter(items)
            .map(|item| self.classify_item(item))
            .buffered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .unzip();

        let invoice_id = self.store.insert_invoice(invoice, &items).await?;
        let mut report = IngestReport {
            invoice_id,
            uuid: invoice.uuid.clone(),
            total_items: items.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            match outcome {
                Outcome::Cache => report.from_cache += 1,
                Outcome::Ai => report.from_ai += 1,
                Outcome::Unclassified => report.unclassified += 1,
            }
        }

        tracing::info!(
            "Invoice {} ingested: {} items (缓存 {}, AI {}, 待人工 {}), 耗时 {:?}",
            invoice.uuid,
            report.total_items,
            report.from_cache,
            report.from_ai,
            report.unclassified,
            start.elapsed()
        );
        Ok(report)
    }

    /// 重跑仍处于 pending 的明细 (批量重试)
    pub async fn reclassify_pending(&self, limit: i64) -> Result<ReclassifyReport> {
        let start = Instant::now();
        let pending = self.store.list_pending_items(limit).await?;
        let mut report = ReclassifyReport {
            scanned: pending.len(),
            ..Default::default()
        };
        tracing::info!("重新分类 {} 条待审核明细", report.scanned);

        let mut results = stream::iter(pending)
            .map(|item| self.classify_item(item))
            .buffered(self.max_concurrency);

        let mut processed = 0usize;
        while let Some((item, outcome)) = results.next().await {
            if !self.store.update_pending_classification(&item).await? {
                report.skipped += 1;
            } else {
                match outcome {
                    Outcome::Cache => report.from_cache += 1,
                    Outcome::Ai => report.from_ai += 1,
                    Outcome::Unclassified => report.still_unclassified += 1,
                }
            }

            processed += 1;
            if processed % 100 == 0 {
                tracing::info!("重新分类进度: {}/{}", processed, report.scanned);
            }
        }

        let stats = self.stats();
        tracing::info!(
            "重新分类完成: {:?}, 累计 cache_hits={} ai_successes={} ai_failures={}, 耗时 {:?}",
            report,
            stats.cache_hits,
            stats.ai_successes,
            stats.ai_failures,
            start.elapsed()
        );
        Ok(report)
    }

    /// 分类单条明细 (只改内存中的行，不落库)
    ///
    /// 不会失败：查缓存出错按未命中处理，AI 出错让明细进入待人工分类。
    async fn classify_item(&self, mut item: LineItem) -> (LineItem, Outcome) {
        let now = Utc::now();

        let cached = match self.cache.lookup(&item.sku_key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(sku_key = %item.sku_key, "查询分类缓存失败，按未命中处理: {}", e);
                None
            }
        };

        if let Some(sku) = cached {
            if sku.review_status == ReviewStatus::Approved {
                item.apply_approved_sku(&sku, now);
                if let Err(e) = self.cache.record_usage(&item.sku_key).await {
                    tracing::warn!(sku_key = %item.sku_key, "记录缓存命中失败: {}", e);
                }
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return (item, Outcome::Cache);
            }
            tracing::debug!(
                sku_key = %item.sku_key,
                "SKU status {}, treated as cache miss",
                sku.review_status.as_str()
            );
        }

        let request = ClassifyRequest {
            product_code: item.product_code.clone(),
            description: item.description.clone(),
            quantity: item.quantity.clone(),
            unit_code: item.unit_code.clone(),
        };

        let suggestion = match self.call_classifier(&request).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    sku_key = %item.sku_key,
                    line = item.line_number,
                    "AI classification failed, item left pending: {}",
                    e
                );
                self.counters.ai_failures.fetch_add(1, Ordering::Relaxed);
                item.clear_classification(now);
                return (item, Outcome::Unclassified);
            }
        };

        if let Err(violation) = self.cache.taxonomy().check_path(&suggestion.category) {
            tracing::warn!(
                sku_key = %item.sku_key,
                "AI 返回的分类不在分类树内 ({}): {}",
                suggestion.category,
                violation
            );
            self.counters.ai_failures.fetch_add(1, Ordering::Relaxed);
            item.clear_classification(now);
            return (item, Outcome::Unclassified);
        }

        self.apply_suggestion(&mut item, suggestion, now);
        self.counters.ai_successes.fetch_add(1, Ordering::Relaxed);
        (item, Outcome::Ai)
    }

    /// 限流 + 超时；超时视为失败，不在此处重试
    async fn call_classifier(
        &self,
        request: &ClassifyRequest,
    ) -> std::result::Result<AiSuggestion, ClassificationServiceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ClassificationServiceError::Transport(e.to_string()))?;

        match tokio::time::timeout(self.call_timeout, self.classifier.classify(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClassificationServiceError::Timeout(self.call_timeout)),
        }
    }

    fn apply_suggestion(
        &self,
        item: &mut LineItem,
        suggestion: AiSuggestion,
        at: chrono::DateTime<Utc>,
    ) {
        let standardized = units::resolve(
            self.cache.taxonomy(),
            &item.quantity,
            item.unit_code.as_deref(),
            suggestion.standardized_unit.as_deref(),
            suggestion.conversion_factor.as_ref(),
        );

        item.category = Some(suggestion.category);
        item.standardized_unit = standardized.standardized_unit;
        item.conversion_factor = standardized.conversion_factor;
        item.standardized_quantity = standardized.standardized_quantity;
        item.needs_review = standardized.needs_review;
        item.source = ClassificationSource::Ai {
            confidence: suggestion.confidence,
        };
        item.classified_at = at;
    }
}
